//! Handlers concretos por tipo de record.
//!
//! Cada handler traduce un record a su task ejecutable (payload estilo
//! qcengine), extrae el resultado remoto a la forma almacenada y, para los
//! servicios, implementa la regla de expansión y la política de agregación.
//! El núcleo no conoce ninguno de estos tipos: se inyectan vía el registro.

pub mod optimization;
pub mod singlepoint;
pub mod torsiondrive;

pub use optimization::OptimizationHandler;
pub use singlepoint::SinglepointHandler;
pub use torsiondrive::TorsiondriveHandler;

use serde_json::Value;

use sched_core::{CoreError, HandlerContext, HandlerRegistry, Record, StoredSpecification};

/// Registro con el conjunto cerrado de handlers soportados.
pub fn default_registry() -> Result<HandlerRegistry, CoreError> {
    let mut registry = HandlerRegistry::new();
    registry.register(Box::new(SinglepointHandler))?;
    registry.register(Box::new(OptimizationHandler))?;
    registry.register(Box::new(TorsiondriveHandler))?;
    Ok(registry)
}

/// Especificación almacenada de un record, o error interno si el store la
/// perdió (los records siempre referencian specs existentes).
pub(crate) fn stored_spec_of(ctx: &HandlerContext, record: &Record) -> Result<StoredSpecification, CoreError> {
    ctx.specifications
       .get_specification(&record.specification_id)
       .ok_or_else(|| CoreError::Internal(format!("specification {} not found", record.specification_id)))
}

/// Primera molécula de input del record, como value JSON para el payload de
/// la task.
pub(crate) fn input_molecule_value(ctx: &HandlerContext, record: &Record) -> Result<Value, CoreError> {
    let id = record.molecule_ids
                   .first()
                   .ok_or_else(|| CoreError::Internal(format!("record {} has no input molecule", record.id)))?;
    let molecule = ctx.molecules
                      .get_molecules(std::slice::from_ref(id))
                      .pop()
                      .flatten()
                      .ok_or_else(|| CoreError::Internal(format!("molecule {id} not found")))?;
    serde_json::to_value(&molecule).map_err(|e| CoreError::Internal(e.to_string()))
}
