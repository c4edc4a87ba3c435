// sched-domain library entry point
pub mod molecule;
pub mod specification;
pub mod error;
pub use molecule::Molecule;
pub use specification::{
    OptimizationSpecification, QcSpecification, SinglepointDriver, Specification, TorsiondriveKeywords,
    TorsiondriveSpecification,
};
pub use error::DomainError;
