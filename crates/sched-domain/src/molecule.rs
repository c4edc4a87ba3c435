use serde::{Deserialize, Serialize};

use crate::DomainError;
use std::fmt;

/// Molécula de entrada/salida de un cálculo.
///
/// Es un value type puro: símbolos atómicos + geometría cartesiana plana
/// (x,y,z por átomo, en bohr) + carga y multiplicidad. La identidad de
/// deduplicación (hash canónico) la calcula la capa de stores, no el dominio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Molecule {
    symbols: Vec<String>,
    geometry: Vec<f64>,
    charge: i32,
    multiplicity: u32,
}

impl Molecule {
    pub fn new(symbols: Vec<String>, geometry: Vec<f64>, charge: i32, multiplicity: u32) -> Result<Self, DomainError> {
        if symbols.is_empty() {
            return Err(DomainError::ValidationError("Molecule requires at least one atom".to_string()));
        }
        if geometry.len() != symbols.len() * 3 {
            return Err(DomainError::ValidationError(format!(
                "Geometry length {} does not match 3 * {} atoms",
                geometry.len(),
                symbols.len()
            )));
        }
        if multiplicity == 0 {
            return Err(DomainError::ValidationError("Multiplicity must be >= 1".to_string()));
        }
        // Normalizar símbolos a forma capitalizada ("h" -> "H", "HE" -> "He")
        let symbols = symbols
            .into_iter()
            .map(|s| {
                let mut cs = s.chars();
                match cs.next() {
                    Some(first) => first.to_uppercase().collect::<String>() + &cs.as_str().to_lowercase(),
                    None => s,
                }
            })
            .collect::<Vec<_>>();
        if symbols.iter().any(|s| s.is_empty() || !s.chars().all(|c| c.is_ascii_alphabetic())) {
            return Err(DomainError::ValidationError("Invalid atomic symbol".to_string()));
        }
        Ok(Molecule { symbols, geometry, charge, multiplicity })
    }

    /// Molécula neutra singlete (caso más común en tests y demos).
    pub fn neutral(symbols: Vec<String>, geometry: Vec<f64>) -> Result<Self, DomainError> {
        Molecule::new(symbols, geometry, 0, 1)
    }

    pub fn symbols(&self) -> &[String] { &self.symbols }
    pub fn geometry(&self) -> &[f64] { &self.geometry }
    pub fn charge(&self) -> i32 { self.charge }
    pub fn multiplicity(&self) -> u32 { self.multiplicity }
    pub fn num_atoms(&self) -> usize { self.symbols.len() }
}

impl fmt::Display for Molecule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{} q={} m={}>", self.symbols.join(""), self.charge, self.multiplicity)
    }
}
