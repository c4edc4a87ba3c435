//! Store de moléculas con deduplicación por contenido.
//!
//! Misma semántica de dedup que las especificaciones: el id es el hash
//! canónico del value type y `add` es insert-if-absent por elemento.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use sched_domain::Molecule;

use crate::errors::CoreError;
use crate::hashing::content_id;
use crate::model::{InsertMetadata, InsertOutcome, MoleculeId};

pub trait MoleculeStore: Send + Sync {
    fn add_molecules(&self, molecules: &[Molecule]) -> Result<(InsertMetadata, Vec<MoleculeId>), CoreError>;
    fn get_molecules(&self, ids: &[MoleculeId]) -> Vec<Option<Molecule>>;
}

#[derive(Default)]
pub struct InMemoryMoleculeStore {
    inner: DashMap<MoleculeId, Molecule>,
}

impl InMemoryMoleculeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl MoleculeStore for InMemoryMoleculeStore {
    fn add_molecules(&self, molecules: &[Molecule]) -> Result<(InsertMetadata, Vec<MoleculeId>), CoreError> {
        let mut meta = InsertMetadata::default();
        let mut ids = Vec::with_capacity(molecules.len());
        for (idx, molecule) in molecules.iter().enumerate() {
            let value = serde_json::to_value(molecule).map_err(|e| CoreError::Internal(e.to_string()))?;
            let id = content_id("molecule", &value);
            let outcome = match self.inner.entry(id.clone()) {
                Entry::Occupied(_) => InsertOutcome::Existing,
                Entry::Vacant(slot) => {
                    slot.insert(molecule.clone());
                    InsertOutcome::Inserted
                }
            };
            meta.record(idx, outcome);
            ids.push(id);
        }
        Ok((meta, ids))
    }

    fn get_molecules(&self, ids: &[MoleculeId]) -> Vec<Option<Molecule>> {
        ids.iter().map(|id| self.inner.get(id).map(|m| m.clone())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn water() -> Molecule {
        Molecule::neutral(vec!["O".into(), "H".into(), "H".into()],
                          vec![0.0, 0.0, 0.0, 0.0, 0.0, 1.8, 0.0, 1.8, 0.0]).expect("valid molecule")
    }

    #[test]
    fn duplicate_molecule_returns_existing_id() {
        let store = InMemoryMoleculeStore::new();
        let (m1, ids1) = store.add_molecules(&[water()]).expect("add");
        let (m2, ids2) = store.add_molecules(&[water()]).expect("add dup");
        assert_eq!(m1.n_inserted(), 1);
        assert_eq!(m2.n_existing(), 1);
        assert_eq!(ids1, ids2);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn batch_mixes_inserted_and_existing() {
        let store = InMemoryMoleculeStore::new();
        store.add_molecules(&[water()]).expect("seed");
        let h2 = Molecule::neutral(vec!["H".into(), "H".into()], vec![0.0, 0.0, 0.0, 0.0, 0.0, 1.4])
            .expect("valid molecule");
        let (meta, ids) = store.add_molecules(&[water(), h2]).expect("add batch");
        assert_eq!(meta.existing_idx, vec![0]);
        assert_eq!(meta.inserted_idx, vec![1]);
        assert_eq!(store.get_molecules(&ids).iter().filter(|m| m.is_some()).count(), 2);
    }
}
