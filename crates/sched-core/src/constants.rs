//! Constantes del núcleo de scheduling.
//!
//! `SCHEDULER_VERSION` participa en los hashes de contenido de las
//! especificaciones: un cambio incompatible de versión invalida la identidad
//! de deduplicación de forma determinista. Mantener estable mientras el
//! formato canónico no cambie.

/// Versión lógica del núcleo. Entra en el input de hashing de specs.
pub const SCHEDULER_VERSION: &str = "S1.0";

/// Ventana de staleness por defecto para heartbeats de managers (segundos).
pub const DEFAULT_HEARTBEAT_STALENESS_SECS: i64 = 300;

/// Reintentos por defecto de una task cuando su manager se pierde.
pub const DEFAULT_TASK_RETRY_LIMIT: u32 = 2;

/// Tamaño máximo por defecto de operaciones bulk (submit/claim).
pub const DEFAULT_MAX_BATCH_SIZE: usize = 1000;

/// Límite máximo por defecto de una página de query.
pub const DEFAULT_MAX_QUERY_LIMIT: usize = 500;
