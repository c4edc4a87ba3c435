//! Registro de managers: activación, heartbeat, desactivación.
//!
//! Invariante: no coexisten dos managers activos con el mismo fullname. La
//! activación es la única alta; el heartbeat es la señal de vida que evalúa
//! el sweep de staleness; la desactivación es la única salida ordenada.

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::errors::CoreError;
use crate::model::{Manager, ManagerName, ManagerStatus, ResourceSnapshot};

pub trait ManagerRegistry: Send + Sync {
    /// Registra un manager. Conflicto si ya hay uno activo con ese fullname.
    /// Devuelve el token (fullname) con el que opera el resto del protocolo.
    fn activate(&self, name_data: ManagerName, programs: Vec<String>, tags: Vec<String>)
                -> Result<String, CoreError>;
    /// Señal de vida + contadores de recursos. Rechazada para managers
    /// desconocidos o inactivos.
    fn heartbeat(&self, name: &str, snapshot: ResourceSnapshot) -> Result<(), CoreError>;
    /// Salida ordenada. Idempotente si ya estaba inactivo.
    fn deactivate(&self, name: &str, snapshot: ResourceSnapshot) -> Result<(), CoreError>;
    fn get_manager(&self, name: &str) -> Option<Manager>;
    fn active_managers(&self) -> Vec<Manager>;
    /// Marca inactivo sin snapshot (camino del sweep de staleness).
    fn mark_inactive(&self, name: &str) -> bool;
    /// Actualiza última actividad tras un claim (el claim también es vida).
    fn touch_claim(&self, name: &str, claimed: usize);
}

#[derive(Default)]
pub struct InMemoryManagerRegistry {
    inner: DashMap<String, Manager>,
}

impl InMemoryManagerRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ManagerRegistry for InMemoryManagerRegistry {
    fn activate(&self, name_data: ManagerName, programs: Vec<String>, tags: Vec<String>)
                -> Result<String, CoreError> {
        let fullname = name_data.fullname();
        if programs.is_empty() {
            return Err(CoreError::Validation("manager must declare at least one program".to_string()));
        }
        if tags.is_empty() {
            return Err(CoreError::Validation("manager must declare at least one tag".to_string()));
        }
        let now = Utc::now();
        let manager = Manager { name: fullname.clone(),
                                name_data,
                                status: ManagerStatus::Active,
                                programs: programs.into_iter().map(|p| p.to_lowercase()).collect(),
                                tags: tags.into_iter().map(|t| t.to_lowercase()).collect(),
                                resources: ResourceSnapshot::default(),
                                claimed: 0,
                                created_on: now,
                                modified_on: now };
        match self.inner.entry(fullname.clone()) {
            Entry::Occupied(mut existing) => {
                if existing.get().status == ManagerStatus::Active {
                    return Err(CoreError::Conflict(format!("manager {fullname} is already active")));
                }
                // Reactivación tras una salida/timeout previo: alta limpia.
                existing.insert(manager);
                Ok(fullname)
            }
            Entry::Vacant(slot) => {
                slot.insert(manager);
                Ok(fullname)
            }
        }
    }

    fn heartbeat(&self, name: &str, snapshot: ResourceSnapshot) -> Result<(), CoreError> {
        let Some(mut manager) = self.inner.get_mut(name) else {
            return Err(CoreError::NotFound(format!("manager {name}")));
        };
        if manager.status != ManagerStatus::Active {
            return Err(CoreError::InactiveManager(name.to_string()));
        }
        manager.resources = snapshot;
        manager.modified_on = Utc::now();
        Ok(())
    }

    fn deactivate(&self, name: &str, snapshot: ResourceSnapshot) -> Result<(), CoreError> {
        let Some(mut manager) = self.inner.get_mut(name) else {
            return Err(CoreError::NotFound(format!("manager {name}")));
        };
        manager.status = ManagerStatus::Inactive;
        manager.resources = snapshot;
        manager.modified_on = Utc::now();
        Ok(())
    }

    fn get_manager(&self, name: &str) -> Option<Manager> {
        self.inner.get(name).map(|m| m.clone())
    }

    fn active_managers(&self) -> Vec<Manager> {
        self.inner
            .iter()
            .filter(|m| m.status == ManagerStatus::Active)
            .map(|m| m.clone())
            .collect()
    }

    fn mark_inactive(&self, name: &str) -> bool {
        match self.inner.get_mut(name) {
            Some(mut manager) if manager.status == ManagerStatus::Active => {
                manager.status = ManagerStatus::Inactive;
                manager.modified_on = Utc::now();
                true
            }
            _ => false,
        }
    }

    fn touch_claim(&self, name: &str, claimed: usize) {
        if let Some(mut manager) = self.inner.get_mut(name) {
            manager.modified_on = Utc::now();
            manager.claimed += claimed as u64;
        }
    }
}
