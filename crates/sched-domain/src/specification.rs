//! Especificaciones inmutables de cálculo.
//!
//! Una especificación describe *cómo* se calcula algo (programa, método,
//! keywords, protocolos), nunca *sobre qué* molécula. Son value types puros;
//! la identidad content-addressed y la deduplicación viven en los stores.
//!
//! El anidamiento es por valor en la frontera de la API (una optimización
//! embebe su spec de singlepoint); los stores lo resuelven bottom-up a
//! referencias por id para no duplicar contenido.
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::DomainError;

/// Driver de un cálculo singlepoint: qué magnitud se pide al programa.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinglepointDriver {
    Energy,
    Gradient,
    Hessian,
    Properties,
    /// El driver lo decide el procedimiento padre (specs anidadas dentro de
    /// una optimización siempre se almacenan como `Deferred`).
    Deferred,
}

/// Especificación de un cálculo singlepoint (programa QC directo).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QcSpecification {
    pub program: String,
    pub driver: SinglepointDriver,
    pub method: String,
    pub basis: Option<String>,
    pub keywords: Value,
}

impl QcSpecification {
    pub fn new(program: &str,
               driver: SinglepointDriver,
               method: &str,
               basis: Option<&str>,
               keywords: Value)
               -> Result<Self, DomainError> {
        if program.trim().is_empty() {
            return Err(DomainError::ValidationError("QC specification requires a program".to_string()));
        }
        if method.trim().is_empty() {
            return Err(DomainError::ValidationError("QC specification requires a method".to_string()));
        }
        // Forma canónica: programas/métodos/bases en minúsculas para que la
        // deduplicación sea insensible a capitalización.
        Ok(QcSpecification { program: program.trim().to_lowercase(),
                             driver,
                             method: method.trim().to_lowercase(),
                             basis: basis.map(|b| b.trim().to_lowercase()).filter(|b| !b.is_empty()),
                             keywords })
    }
}

/// Especificación de una optimización de geometría.
///
/// `program` es el optimizador (p. ej. geometric); el gradiente de cada paso
/// lo produce la `qc_specification` embebida.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationSpecification {
    pub program: String,
    pub keywords: Value,
    pub protocols: Value,
    pub qc_specification: QcSpecification,
}

impl OptimizationSpecification {
    pub fn new(program: &str,
               keywords: Value,
               protocols: Value,
               qc_specification: QcSpecification)
               -> Result<Self, DomainError> {
        if program.trim().is_empty() {
            return Err(DomainError::ValidationError("Optimization specification requires a program".to_string()));
        }
        Ok(OptimizationSpecification { program: program.trim().to_lowercase(),
                                       keywords,
                                       protocols,
                                       qc_specification })
    }
}

/// Keywords propias de un torsiondrive: qué diedros escanear y con qué malla.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TorsiondriveKeywords {
    /// Cuádruplas de índices atómicos que definen cada diedro.
    pub dihedrals: Vec<[i32; 4]>,
    /// Separación de la malla en grados, una por diedro.
    pub grid_spacing: Vec<i32>,
    pub energy_decrease_thresh: Option<f64>,
    pub energy_upper_limit: Option<f64>,
}

impl TorsiondriveKeywords {
    pub fn new(dihedrals: Vec<[i32; 4]>, grid_spacing: Vec<i32>) -> Result<Self, DomainError> {
        if dihedrals.is_empty() {
            return Err(DomainError::ValidationError("Torsiondrive requires at least one dihedral".to_string()));
        }
        if grid_spacing.len() != dihedrals.len() {
            return Err(DomainError::ValidationError(format!(
                "grid_spacing has {} entries for {} dihedrals",
                grid_spacing.len(),
                dihedrals.len()
            )));
        }
        if grid_spacing.iter().any(|s| *s <= 0 || 360 % *s != 0) {
            return Err(DomainError::ValidationError("grid_spacing entries must be positive divisors of 360".to_string()));
        }
        Ok(TorsiondriveKeywords { dihedrals,
                                  grid_spacing,
                                  energy_decrease_thresh: None,
                                  energy_upper_limit: None })
    }
}

/// Especificación de un servicio torsiondrive (escaneo de diedros compuesto
/// de optimizaciones restringidas).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TorsiondriveSpecification {
    pub program: String,
    pub keywords: TorsiondriveKeywords,
    pub optimization_specification: OptimizationSpecification,
}

impl TorsiondriveSpecification {
    pub fn new(program: &str,
               keywords: TorsiondriveKeywords,
               optimization_specification: OptimizationSpecification)
               -> Result<Self, DomainError> {
        if program.trim().is_empty() {
            return Err(DomainError::ValidationError("Torsiondrive specification requires a program".to_string()));
        }
        Ok(TorsiondriveSpecification { program: program.trim().to_lowercase(),
                                       keywords,
                                       optimization_specification })
    }
}

/// Conjunto cerrado de especificaciones que el scheduler sabe ejecutar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Specification {
    Singlepoint(QcSpecification),
    Optimization(OptimizationSpecification),
    Torsiondrive(TorsiondriveSpecification),
}
