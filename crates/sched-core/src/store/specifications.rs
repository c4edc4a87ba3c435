//! Store de especificaciones deduplicado por contenido.
//!
//! `add_specification` es insert-if-absent atómico sobre el hash canónico:
//! dos submitters concurrentes de la misma spec obtienen ambos éxito y el
//! mismo id, con una sola entrada física. Las specs anidadas se deduplican
//! primero y se referencian por id (`child_id`): la deduplicación compone
//! bottom-up y el contenido anidado nunca se almacena dos veces.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use sched_domain::{SinglepointDriver, Specification};

use crate::errors::CoreError;
use crate::hashing::content_id;
use crate::model::{InsertOutcome, SpecId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpecKind {
    Qc,
    Optimization,
    Torsiondrive,
}

impl SpecKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpecKind::Qc => "qc",
            SpecKind::Optimization => "optimization",
            SpecKind::Torsiondrive => "torsiondrive",
        }
    }
}

/// Especificación almacenada: payload canónico propio + referencia por id a
/// la spec anidada (si aplica). Inmutable una vez insertada.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredSpecification {
    pub id: SpecId,
    pub kind: SpecKind,
    pub payload: Value,
    pub child_id: Option<SpecId>,
}

pub trait SpecificationStore: Send + Sync {
    /// Dedup insert. Ambos outcomes son éxito; nunca error por duplicado.
    fn add_specification(&self, spec: &Specification) -> Result<(InsertOutcome, SpecId), CoreError>;
    fn get_specification(&self, id: &str) -> Option<StoredSpecification>;
}

#[derive(Default)]
pub struct InMemorySpecificationStore {
    inner: DashMap<SpecId, StoredSpecification>,
}

impl InMemorySpecificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    fn insert_if_absent(&self, kind: SpecKind, payload: Value, child_id: Option<SpecId>) -> (InsertOutcome, SpecId) {
        // La identidad incluye la referencia al hijo: misma spec anidada
        // (mismo contenido) => mismo child_id => mismo hash del padre.
        let id = content_id(kind.as_str(), &json!({ "payload": payload, "child": child_id }));
        match self.inner.entry(id.clone()) {
            Entry::Occupied(_) => (InsertOutcome::Existing, id),
            Entry::Vacant(slot) => {
                slot.insert(StoredSpecification { id: id.clone(), kind, payload, child_id });
                (InsertOutcome::Inserted, id)
            }
        }
    }
}

impl SpecificationStore for InMemorySpecificationStore {
    fn add_specification(&self, spec: &Specification) -> Result<(InsertOutcome, SpecId), CoreError> {
        match spec {
            Specification::Singlepoint(qc) => {
                let payload = serde_json::to_value(qc).map_err(|e| CoreError::Internal(e.to_string()))?;
                Ok(self.insert_if_absent(SpecKind::Qc, payload, None))
            }
            Specification::Optimization(opt) => {
                // El driver de la spec anidada lo decide el procedimiento:
                // siempre se almacena como deferred.
                let mut qc = opt.qc_specification.clone();
                qc.driver = SinglepointDriver::Deferred;
                let (_, qc_id) = self.add_specification(&Specification::Singlepoint(qc))?;
                let payload = json!({
                    "program": opt.program,
                    "keywords": opt.keywords,
                    "protocols": opt.protocols,
                });
                Ok(self.insert_if_absent(SpecKind::Optimization, payload, Some(qc_id)))
            }
            Specification::Torsiondrive(td) => {
                let (_, opt_id) =
                    self.add_specification(&Specification::Optimization(td.optimization_specification.clone()))?;
                let keywords = serde_json::to_value(&td.keywords).map_err(|e| CoreError::Internal(e.to_string()))?;
                let payload = json!({ "program": td.program, "keywords": keywords });
                Ok(self.insert_if_absent(SpecKind::Torsiondrive, payload, Some(opt_id)))
            }
        }
    }

    fn get_specification(&self, id: &str) -> Option<StoredSpecification> {
        self.inner.get(id).map(|r| r.clone())
    }
}
