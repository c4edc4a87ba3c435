//! Task: proyección ejecutable de un record en estado runnable.
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Priority, RecordId};

/// Invocación remota que el manager debe ejecutar tal cual.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub function: String,
    pub args: Vec<Value>,
    pub kwargs: IndexMap<String, Value>,
}

/// Entrada de la cola de tasks. Existe 1:1 con un record no-servicio en
/// `waiting`/`running`; hereda tag y prioridad del record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub record_id: RecordId,
    pub spec: TaskSpec,
    /// Programa requerido; los managers declaran qué programas soportan.
    pub program: String,
    pub tag: String,
    pub priority: Priority,
    pub created_on: DateTime<Utc>,
    pub claimed_by: Option<String>,
    /// Timestamp del claim, usado por la detección de timeouts.
    pub claimed_on: Option<DateTime<Utc>>,
}
