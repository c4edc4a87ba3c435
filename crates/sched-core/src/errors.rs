//! Errores del núcleo de scheduling.
//!
//! Taxonomía: validación, conflicto, not-found, límite excedido e
//! infraestructura. Los fallos de ejecución remota NO son variantes aquí:
//! son datos (payload de error del record). Las carreras de deduplicación
//! tampoco: se resuelven localmente con retry-select y nunca se propagan.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use sched_domain::DomainError;

#[derive(Debug, Error, PartialEq, Clone, Serialize, Deserialize)]
pub enum CoreError {
    #[error("validation: {0}")]
    Validation(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("limit exceeded: requested {requested}, maximum {maximum}")]
    LimitExceeded { requested: usize, maximum: usize },
    #[error("manager not active: {0}")]
    InactiveManager(String),
    #[error("infrastructure (retryable): {0}")]
    Infrastructure(String),
    #[error("internal: {0}")]
    Internal(String),
}

impl From<DomainError> for CoreError {
    fn from(err: DomainError) -> Self {
        CoreError::Validation(err.to_string())
    }
}
