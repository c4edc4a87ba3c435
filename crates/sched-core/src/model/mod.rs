//! Modelo del núcleo: records, tasks, managers y metadata de inserción.

mod manager;
mod metadata;
mod record;
mod task;

pub use manager::{Manager, ManagerName, ManagerStatus, ResourceSnapshot};
pub use metadata::{InsertMetadata, InsertOutcome, QueryMetadata};
pub use record::{MoleculeId, Priority, Record, RecordId, RecordStatus, RecordType, ServiceDependency, SpecId};
pub use task::{Task, TaskSpec};
