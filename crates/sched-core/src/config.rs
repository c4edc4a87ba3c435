//! Carga de configuración del scheduler desde variables de entorno.
//! Convención `SCHED_*`; todos los parámetros tienen defaults razonables.

use std::env;

use dotenvy::dotenv;
use once_cell::sync::Lazy;

use crate::constants::{
    DEFAULT_HEARTBEAT_STALENESS_SECS, DEFAULT_MAX_BATCH_SIZE, DEFAULT_MAX_QUERY_LIMIT, DEFAULT_TASK_RETRY_LIMIT,
};

// Carga perezosa del archivo .env una sola vez.
static DOTENV_LOADED: Lazy<()> = Lazy::new(|| {
    let _ = dotenv(); // ignora error si no existe .env
});

/// Parámetros operativos del scheduler. Staleness y retries los evalúa el
/// sweep periódico, no el camino de claim.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Segundos sin heartbeat tras los que un manager se considera perdido.
    pub heartbeat_staleness_secs: i64,
    /// Cuántas veces se re-encola una task al perder su manager antes de
    /// marcarla `error`.
    pub task_retry_limit: u32,
    /// Tope de elementos en operaciones bulk (submit/claim).
    pub max_batch_size: usize,
    /// Tope de `limit` en queries paginadas.
    pub max_query_limit: usize,
}

impl SchedulerConfig {
    pub fn from_env() -> Self {
        Lazy::force(&DOTENV_LOADED);
        let read = |key: &str| env::var(key).ok();
        Self {
            heartbeat_staleness_secs: read("SCHED_HEARTBEAT_STALENESS_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_HEARTBEAT_STALENESS_SECS),
            task_retry_limit: read("SCHED_TASK_RETRY_LIMIT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_TASK_RETRY_LIMIT),
            max_batch_size: read("SCHED_MAX_BATCH_SIZE")
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_MAX_BATCH_SIZE),
            max_query_limit: read("SCHED_MAX_QUERY_LIMIT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_MAX_QUERY_LIMIT),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            heartbeat_staleness_secs: DEFAULT_HEARTBEAT_STALENESS_SECS,
            task_retry_limit: DEFAULT_TASK_RETRY_LIMIT,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            max_query_limit: DEFAULT_MAX_QUERY_LIMIT,
        }
    }
}

/// Forzar carga temprana de .env desde aplicaciones externas si se desea.
pub fn init_dotenv() {
    Lazy::force(&DOTENV_LOADED);
}
