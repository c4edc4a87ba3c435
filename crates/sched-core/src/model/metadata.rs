//! Metadata de inserciones bulk y de queries.
//!
//! "Insertado" y "ya existente" son ambos éxito: la deduplicación nunca es un
//! error. Los índices refieren a la posición en el batch de entrada.
use serde::{Deserialize, Serialize};

/// Resultado de un insert-if-absent individual.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InsertOutcome {
    Inserted,
    Existing,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InsertMetadata {
    pub inserted_idx: Vec<usize>,
    pub existing_idx: Vec<usize>,
    pub error_description: Option<String>,
}

impl InsertMetadata {
    pub fn record(&mut self, idx: usize, outcome: InsertOutcome) {
        match outcome {
            InsertOutcome::Inserted => self.inserted_idx.push(idx),
            InsertOutcome::Existing => self.existing_idx.push(idx),
        }
    }

    pub fn n_inserted(&self) -> usize {
        self.inserted_idx.len()
    }

    pub fn n_existing(&self) -> usize {
        self.existing_idx.len()
    }

    pub fn success(&self) -> bool {
        self.error_description.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryMetadata {
    /// Total que matchea el filtro (antes de paginar).
    pub n_found: usize,
    /// Devueltos en esta página.
    pub n_returned: usize,
}
