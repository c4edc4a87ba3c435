//! Stores compartidos del scheduler.
//!
//! Cada store es un trait (la frontera con el colaborador de storage) más una
//! implementación in-memory sobre `DashMap`. Toda mutación es una operación
//! atómica a nivel de entrada del mapa: el lock por entrada da el guard
//! condicional (compare-and-swap) que exige el protocolo de claim y los
//! inserts insert-if-absent de deduplicación.

mod managers;
mod molecules;
mod records;
mod specifications;

pub use managers::{InMemoryManagerRegistry, ManagerRegistry};
pub use molecules::{InMemoryMoleculeStore, MoleculeStore};
pub use records::{InMemoryRecordStore, NewRecord, RecordStore};
pub use specifications::{InMemorySpecificationStore, SpecKind, SpecificationStore, StoredSpecification};
