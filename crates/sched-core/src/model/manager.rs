//! Manager: un pool de workers remoto que reclama y ejecuta tasks.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identidad compuesta de un manager. El `fullname` es la clave del registro:
/// no pueden coexistir dos managers activos con el mismo fullname.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ManagerName {
    pub cluster: String,
    pub hostname: String,
    pub uuid: String,
}

impl ManagerName {
    pub fn new(cluster: &str, hostname: &str, uuid: &str) -> Self {
        Self { cluster: cluster.to_string(), hostname: hostname.to_string(), uuid: uuid.to_string() }
    }

    pub fn fullname(&self) -> String {
        format!("{}-{}-{}", self.cluster, self.hostname, self.uuid)
    }
}

impl fmt::Display for ManagerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.fullname())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManagerStatus {
    Active,
    Inactive,
}

/// Contadores de recursos reportados en cada heartbeat/deactivación.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    pub active_tasks: i32,
    pub active_cores: i32,
    pub active_memory: f64,
    pub total_worker_walltime: f64,
    pub total_task_walltime: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manager {
    pub name: String,
    pub name_data: ManagerName,
    pub status: ManagerStatus,
    /// Programas que sus workers saben ejecutar (minúsculas).
    pub programs: Vec<String>,
    /// Tags que acepta; `*` acepta cualquiera.
    pub tags: Vec<String>,
    pub resources: ResourceSnapshot,
    /// Total acumulado de tasks reclamadas en esta activación.
    pub claimed: u64,
    pub created_on: DateTime<Utc>,
    /// Última señal de vida (heartbeat o claim). Base del sweep de staleness.
    pub modified_on: DateTime<Utc>,
}

impl Manager {
    /// ¿Acepta este manager una task con `tag`/`program` dados?
    pub fn accepts(&self, tag: &str, program: &str) -> bool {
        let tag_ok = self.tags.iter().any(|t| t == "*" || t == tag);
        let prog_ok = self.programs.iter().any(|p| p == program);
        tag_ok && prog_ok
    }
}
