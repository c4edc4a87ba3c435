//! Record: una unidad de trabajo y su ciclo de vida.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Id de especificación: hash canónico de contenido (ver `hashing`).
pub type SpecId = String;
/// Id de molécula: hash canónico de contenido.
pub type MoleculeId = String;
/// Id de record.
pub type RecordId = Uuid;

/// Estado de un record.
///
/// Transiciones válidas del flujo normal:
/// - `Waiting` -> `Running` (claim exitoso de su task)
/// - `Running` -> `Complete` | `Error` (reporte del manager o reclamación
///   agotada)
/// - `Running` -> `Waiting` (reclamación con reintentos restantes)
///
/// `Cancelled` e `Invalid` son sumideros administrativos; salir de ellos
/// requiere acción explícita (`uncancel`/`reset`), nunca el flujo normal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Waiting,
    Running,
    Complete,
    Error,
    Cancelled,
    Invalid,
}

impl RecordStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RecordStatus::Complete | RecordStatus::Error | RecordStatus::Cancelled | RecordStatus::Invalid)
    }
}

/// Prioridad de ejecución. El orden de los variants define el orden de claim
/// (mayor primero).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Normal,
    High,
}

/// Conjunto cerrado de tipos de record; clave de dispatch del
/// `HandlerRegistry` (sin subclassing abierto).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordType {
    Singlepoint,
    Optimization,
    Torsiondrive,
}

impl RecordType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::Singlepoint => "singlepoint",
            RecordType::Optimization => "optimization",
            RecordType::Torsiondrive => "torsiondrive",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    pub record_type: RecordType,
    pub specification_id: SpecId,
    pub status: RecordStatus,
    pub priority: Priority,
    pub tag: String,
    /// Un record de servicio nunca se convierte en task; sólo sus hijos.
    pub is_service: bool,
    /// Manager dueño mientras el record está `Running`.
    pub manager_name: Option<String>,
    pub molecule_ids: Vec<MoleculeId>,
    pub output: Option<Value>,
    pub error: Option<Value>,
    /// Veces que la task fue reclamada (claim incrementa).
    pub attempts: u32,
    /// Cancelación best-effort de un record `Running`: se aplica en el
    /// próximo contacto del manager, sin interrumpir la ejecución remota.
    pub cancel_requested: bool,
    /// Borrado lógico; los records referenciados nunca se eliminan físicamente.
    pub deleted: bool,
    pub created_on: DateTime<Utc>,
    pub modified_on: DateTime<Utc>,
}

/// Arista ordenada de dependencia de servicio (padre -> hijo).
///
/// `position` y `key` son semánticos y se preservan exactamente: posición de
/// trayectoria en una optimización, coordenada de malla en un torsiondrive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceDependency {
    pub parent_id: RecordId,
    pub child_id: RecordId,
    pub position: i64,
    pub key: String,
}
