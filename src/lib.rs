//! ChemSched Rust
//!
//! Este crate actúa como la fachada del workspace del scheduler:
//! - Re-exporta el dominio (`sched-domain`): moléculas y especificaciones.
//! - Re-exporta el núcleo (`sched-core`): scheduler, stores y modelo.
//! - Re-exporta los handlers (`sched-adapters`) y su registro por defecto.
//!
//! Puede usarse desde `main.rs` o por otros crates/clientes.

pub use sched_adapters::{default_registry, OptimizationHandler, SinglepointHandler, TorsiondriveHandler};
pub use sched_core::{
    CoreError, InMemoryScheduler, InsertMetadata, InsertOutcome, Manager, ManagerName, ManagerStatus, Priority,
    QueryMetadata, Record, RecordFilter, RecordId, RecordStatus, RecordType, ResourceSnapshot, Scheduler,
    SchedulerConfig, SubmitRequest, Task, TaskSpec,
};
pub use sched_domain::{
    DomainError, Molecule, OptimizationSpecification, QcSpecification, SinglepointDriver, Specification,
    TorsiondriveKeywords, TorsiondriveSpecification,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_covers_every_record_type() {
        let registry = default_registry().expect("registry");
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn facade_reexports_compose() {
        let scheduler = InMemoryScheduler::new(default_registry().expect("registry"));
        assert_eq!(scheduler.config().max_batch_size, SchedulerConfig::default().max_batch_size);
    }
}
