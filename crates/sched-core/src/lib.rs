//! Núcleo del scheduler de cómputo: stores deduplicantes, ciclo de vida de
//! records y tasks, registro de managers y orquestación de servicios.
//!
//! El crate es agnóstico de los procedimientos concretos: los handlers por
//! tipo de record viven en `sched-adapters` y se inyectan vía
//! [`handler::HandlerRegistry`].

pub mod config;
pub mod constants;
pub mod errors;
pub mod handler;
pub mod hashing;
pub mod model;
pub mod queue;
pub mod scheduler;
pub mod service;
pub mod store;

pub use config::SchedulerConfig;
pub use errors::CoreError;
pub use handler::{ChildSubmission, HandlerContext, HandlerRegistry, RecordHandler, ServiceAdvance};
pub use model::{
    InsertMetadata, InsertOutcome, Manager, ManagerName, ManagerStatus, MoleculeId, Priority, QueryMetadata, Record,
    RecordId, RecordStatus, RecordType, ResourceSnapshot, ServiceDependency, SpecId, Task, TaskSpec,
};
pub use scheduler::{InMemoryScheduler, RecordFilter, Scheduler, SubmitRequest};
pub use store::{
    InMemoryManagerRegistry, InMemoryMoleculeStore, InMemoryRecordStore, InMemorySpecificationStore, ManagerRegistry,
    MoleculeStore, NewRecord, RecordStore, SpecKind, SpecificationStore, StoredSpecification,
};
