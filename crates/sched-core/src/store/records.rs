//! Store de records: identidad, estado, resultados y aristas de dependencia.
//!
//! Dos mecanismos cargan con toda la corrección concurrente del protocolo:
//!
//! - `insert_record`: dedup insert-if-absent sobre la clave lógica
//!   (specification id, molecule ids ordenados). Submissions idénticas
//!   concurrentes observan ambas el mismo record id, con un solo record
//!   físico creado.
//! - `try_transition`: transición condicional guardada por el estado actual
//!   (compare-and-swap bajo el lock de entrada del mapa). Es el único camino
//!   por el que un record cambia de estado; claims y sweeps concurrentes no
//!   pueden pisarse.

use std::collections::HashMap;

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;
use uuid::Uuid;

use crate::errors::CoreError;
use crate::model::{
    InsertOutcome, MoleculeId, Priority, Record, RecordId, RecordStatus, RecordType, ServiceDependency, SpecId,
};

/// Datos para crear un record nuevo (siempre nace `waiting`, salvo el camino
/// `insert_completed`).
#[derive(Debug, Clone)]
pub struct NewRecord {
    pub record_type: RecordType,
    pub specification_id: SpecId,
    pub molecule_ids: Vec<MoleculeId>,
    pub tag: String,
    pub priority: Priority,
    pub is_service: bool,
}

pub trait RecordStore: Send + Sync {
    /// Dedup insert por (spec, inputs). Ambos outcomes son éxito.
    fn insert_record(&self, new: NewRecord) -> Result<(InsertOutcome, RecordId), CoreError>;
    /// Inserta un record ya terminal sin pasar por el protocolo de claim
    /// (ingesta interna de hijos generados, p. ej. trayectorias).
    fn insert_completed(&self, new: NewRecord, output: Value) -> Result<RecordId, CoreError>;
    fn get_record(&self, id: RecordId) -> Option<Record>;
    /// Transición condicional atómica. Devuelve false si el estado actual no
    /// es `from` (otro actor ganó la carrera) o el record no existe.
    ///
    /// El parámetro `manager` es doble: entrando a `running` es el dueño a
    /// registrar (claim); saliendo de `running` es el dueño esperado, y la
    /// transición falla si el record cambió de manos desde que el llamador lo
    /// observó. `None` al salir de `running` es incondicional (caminos
    /// administrativos sin dueño, p. ej. padres de servicio).
    fn try_transition(&self, id: RecordId, from: RecordStatus, to: RecordStatus, manager: Option<&str>) -> bool;
    /// Mutación puntual bajo el lock de entrada (payloads, flags).
    fn with_record_mut(&self, id: RecordId, f: &mut dyn FnMut(&mut Record)) -> bool;
    /// Alta idempotente de arista padre->hijo; false si ya existía esa key.
    fn add_dependency(&self, edge: ServiceDependency) -> bool;
    /// Aristas salientes de un padre, ordenadas por `position`.
    fn children_of(&self, parent: RecordId) -> Vec<ServiceDependency>;
    fn parents_of(&self, child: RecordId) -> Vec<RecordId>;
    /// Snapshot filtrado (queries y sweep). No bloquea escritores.
    fn select_records(&self, pred: &dyn Fn(&Record) -> bool) -> Vec<Record>;
    /// Conteo de records vivos por estado.
    fn status_counts(&self) -> HashMap<RecordStatus, usize>;
    /// Borrado lógico; el record sigue existiendo para padres/hijos.
    fn soft_delete(&self, id: RecordId) -> Result<(), CoreError>;
}

#[derive(Default)]
pub struct InMemoryRecordStore {
    records: DashMap<RecordId, Record>,
    /// Clave lógica "(spec)|(inputs)" -> record id. El entry lock de este
    /// mapa es la constraint de unicidad de la deduplicación.
    dedup_index: DashMap<String, RecordId>,
    children: DashMap<RecordId, Vec<ServiceDependency>>,
    parents: DashMap<RecordId, Vec<RecordId>>,
}

fn dedup_key(spec: &str, molecule_ids: &[MoleculeId]) -> String {
    // El orden de los inputs es semántico: no se normaliza.
    format!("{}|{}", spec, molecule_ids.join(";"))
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn build_record(new: NewRecord, status: RecordStatus, output: Option<Value>) -> Record {
        let now = Utc::now();
        Record { id: Uuid::new_v4(),
                 record_type: new.record_type,
                 specification_id: new.specification_id,
                 status,
                 priority: new.priority,
                 tag: new.tag,
                 is_service: new.is_service,
                 manager_name: None,
                 molecule_ids: new.molecule_ids,
                 output,
                 error: None,
                 attempts: 0,
                 cancel_requested: false,
                 deleted: false,
                 created_on: now,
                 modified_on: now }
    }
}

impl RecordStore for InMemoryRecordStore {
    fn insert_record(&self, new: NewRecord) -> Result<(InsertOutcome, RecordId), CoreError> {
        let key = dedup_key(&new.specification_id, &new.molecule_ids);
        match self.dedup_index.entry(key) {
            Entry::Occupied(existing) => Ok((InsertOutcome::Existing, *existing.get())),
            Entry::Vacant(slot) => {
                let record = Self::build_record(new, RecordStatus::Waiting, None);
                let id = record.id;
                // El record debe ser visible antes de publicar la clave.
                self.records.insert(id, record);
                slot.insert(id);
                Ok((InsertOutcome::Inserted, id))
            }
        }
    }

    fn insert_completed(&self, new: NewRecord, output: Value) -> Result<RecordId, CoreError> {
        let record = Self::build_record(new, RecordStatus::Complete, Some(output));
        let id = record.id;
        self.records.insert(id, record);
        Ok(id)
    }

    fn get_record(&self, id: RecordId) -> Option<Record> {
        self.records.get(&id).map(|r| r.clone())
    }

    fn try_transition(&self, id: RecordId, from: RecordStatus, to: RecordStatus, manager: Option<&str>) -> bool {
        let Some(mut record) = self.records.get_mut(&id) else {
            return false;
        };
        if record.deleted || record.status != from {
            return false;
        }
        // Bajo el mismo entry lock: un reporte o release de un manager que ya
        // perdió la task no puede aplicar aunque el estado coincida.
        if from == RecordStatus::Running {
            if let Some(expected) = manager {
                if record.manager_name.as_deref() != Some(expected) {
                    return false;
                }
            }
        }
        record.status = to;
        record.modified_on = Utc::now();
        match to {
            RecordStatus::Running => {
                if let Some(name) = manager {
                    record.manager_name = Some(name.to_string());
                    record.attempts += 1;
                }
            }
            RecordStatus::Waiting => {
                // Re-encolado: la task vuelve a estar sin dueño.
                record.manager_name = None;
            }
            // En estados terminales el manager-of-record se conserva como
            // histórico de quién lo ejecutó.
            _ => {}
        }
        true
    }

    fn with_record_mut(&self, id: RecordId, f: &mut dyn FnMut(&mut Record)) -> bool {
        let Some(mut record) = self.records.get_mut(&id) else {
            return false;
        };
        f(&mut record);
        record.modified_on = Utc::now();
        true
    }

    fn add_dependency(&self, edge: ServiceDependency) -> bool {
        let mut outgoing = self.children.entry(edge.parent_id).or_default();
        if outgoing.iter().any(|e| e.key == edge.key || e.child_id == edge.child_id) {
            return false;
        }
        let child_id = edge.child_id;
        let parent_id = edge.parent_id;
        outgoing.push(edge);
        drop(outgoing);
        let mut incoming = self.parents.entry(child_id).or_default();
        if !incoming.contains(&parent_id) {
            incoming.push(parent_id);
        }
        true
    }

    fn children_of(&self, parent: RecordId) -> Vec<ServiceDependency> {
        let mut edges = self.children.get(&parent).map(|v| v.clone()).unwrap_or_default();
        edges.sort_by_key(|e| e.position);
        edges
    }

    fn parents_of(&self, child: RecordId) -> Vec<RecordId> {
        self.parents.get(&child).map(|v| v.clone()).unwrap_or_default()
    }

    fn select_records(&self, pred: &dyn Fn(&Record) -> bool) -> Vec<Record> {
        self.records
            .iter()
            .filter(|entry| !entry.deleted && pred(entry.value()))
            .map(|entry| entry.clone())
            .collect()
    }

    fn status_counts(&self) -> HashMap<RecordStatus, usize> {
        let mut counts = HashMap::new();
        for entry in self.records.iter() {
            if !entry.deleted {
                *counts.entry(entry.status).or_insert(0) += 1;
            }
        }
        counts
    }

    fn soft_delete(&self, id: RecordId) -> Result<(), CoreError> {
        let done = self.with_record_mut(id, &mut |r| r.deleted = true);
        if done {
            Ok(())
        } else {
            Err(CoreError::NotFound(format!("record {id}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_record(spec: &str, mols: &[&str]) -> NewRecord {
        NewRecord { record_type: RecordType::Singlepoint,
                    specification_id: spec.to_string(),
                    molecule_ids: mols.iter().map(|m| m.to_string()).collect(),
                    tag: "compute".to_string(),
                    priority: Priority::Normal,
                    is_service: false }
    }

    #[test]
    fn duplicate_insert_returns_existing() {
        let store = InMemoryRecordStore::new();
        let (o1, id1) = store.insert_record(new_record("spec-a", &["m1"])).expect("insert");
        let (o2, id2) = store.insert_record(new_record("spec-a", &["m1"])).expect("re-insert");
        assert_eq!(o1, InsertOutcome::Inserted);
        assert_eq!(o2, InsertOutcome::Existing);
        assert_eq!(id1, id2);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn input_order_is_semantic_for_dedup() {
        let store = InMemoryRecordStore::new();
        let (_, id1) = store.insert_record(new_record("spec-a", &["m1", "m2"])).expect("insert");
        let (outcome, id2) = store.insert_record(new_record("spec-a", &["m2", "m1"])).expect("insert swapped");
        assert_eq!(outcome, InsertOutcome::Inserted);
        assert_ne!(id1, id2);
    }

    #[test]
    fn transition_guard_rejects_wrong_from_state() {
        let store = InMemoryRecordStore::new();
        let (_, id) = store.insert_record(new_record("spec-a", &["m1"])).expect("insert");
        assert!(store.try_transition(id, RecordStatus::Waiting, RecordStatus::Running, Some("mgr-a")));
        // segundo claim sobre el mismo record: pierde la carrera
        assert!(!store.try_transition(id, RecordStatus::Waiting, RecordStatus::Running, Some("mgr-b")));
        let record = store.get_record(id).expect("record");
        assert_eq!(record.manager_name.as_deref(), Some("mgr-a"));
        assert_eq!(record.attempts, 1);
    }

    #[test]
    fn leaving_running_is_owner_conditional() {
        let store = InMemoryRecordStore::new();
        let (_, id) = store.insert_record(new_record("spec-a", &["m1"])).expect("insert");
        assert!(store.try_transition(id, RecordStatus::Waiting, RecordStatus::Running, Some("mgr-a")));
        // la task cambió de manos: el dueño anterior no puede cerrarla
        assert!(!store.try_transition(id, RecordStatus::Running, RecordStatus::Complete, Some("mgr-b")));
        let record = store.get_record(id).expect("record");
        assert_eq!(record.status, RecordStatus::Running);
        assert_eq!(record.manager_name.as_deref(), Some("mgr-a"));
        // el dueño vigente sí
        assert!(store.try_transition(id, RecordStatus::Running, RecordStatus::Complete, Some("mgr-a")));
    }

    #[test]
    fn requeue_clears_owner() {
        let store = InMemoryRecordStore::new();
        let (_, id) = store.insert_record(new_record("spec-a", &["m1"])).expect("insert");
        store.try_transition(id, RecordStatus::Waiting, RecordStatus::Running, Some("mgr-a"));
        assert!(store.try_transition(id, RecordStatus::Running, RecordStatus::Waiting, None));
        let record = store.get_record(id).expect("record");
        assert_eq!(record.manager_name, None);
        assert_eq!(record.status, RecordStatus::Waiting);
    }

    #[test]
    fn dependency_edges_preserve_position_order() {
        let store = InMemoryRecordStore::new();
        let (_, parent) = store.insert_record(new_record("spec-a", &["m1"])).expect("parent");
        let mut child_ids = vec![];
        for i in 0..3 {
            let (_, c) = store.insert_record(new_record("spec-b", &[&format!("m{i}")])).expect("child");
            child_ids.push(c);
        }
        // alta en orden inverso; la lectura debe venir ordenada por position
        for (i, c) in child_ids.iter().enumerate().rev() {
            assert!(store.add_dependency(ServiceDependency { parent_id: parent,
                                                             child_id: *c,
                                                             position: i as i64,
                                                             key: i.to_string() }));
        }
        let edges = store.children_of(parent);
        assert_eq!(edges.len(), 3);
        assert_eq!(edges.iter().map(|e| e.position).collect::<Vec<_>>(), vec![0, 1, 2]);
        // re-alta de la misma key: idempotente
        assert!(!store.add_dependency(ServiceDependency { parent_id: parent,
                                                          child_id: child_ids[0],
                                                          position: 0,
                                                          key: "0".to_string() }));
        assert_eq!(store.children_of(parent).len(), 3);
        assert_eq!(store.parents_of(child_ids[0]), vec![parent]);
    }

    #[test]
    fn soft_delete_hides_from_select() {
        let store = InMemoryRecordStore::new();
        let (_, id) = store.insert_record(new_record("spec-a", &["m1"])).expect("insert");
        store.soft_delete(id).expect("delete");
        assert!(store.select_records(&|_| true).is_empty());
        // pero el record sigue siendo legible por id
        assert!(store.get_record(id).expect("record").deleted);
    }
}
