//! Seam de despacho por tipo de record.
//!
//! Conjunto cerrado de handlers (singlepoint, optimization, torsiondrive),
//! despachados por el tag `RecordType` almacenado en el record. El registro
//! se construye explícitamente al arranque del proceso y después es de sólo
//! lectura: no hay estado global mutable ambiente.

use std::collections::HashMap;

use serde_json::Value;

use sched_domain::Specification;

use crate::errors::CoreError;
use crate::model::{MoleculeId, Priority, Record, RecordType, TaskSpec};
use crate::store::{MoleculeStore, RecordStore, SpecificationStore};

/// Acceso de los handlers a los stores, sin acoplarlos a implementaciones
/// concretas.
pub struct HandlerContext<'a> {
    pub specifications: &'a dyn SpecificationStore,
    pub molecules: &'a dyn MoleculeStore,
    pub records: &'a dyn RecordStore,
}

/// Hijo que un servicio quiere materializar en un paso de expansión.
///
/// `key`/`position` identifican el paso (coordenada de malla, índice): la
/// idempotencia de la expansión se apoya en la deduplicación de records y en
/// el alta idempotente de aristas, no en contadores del orquestador.
#[derive(Debug, Clone)]
pub struct ChildSubmission {
    pub key: String,
    pub position: i64,
    pub specification: Specification,
    pub molecule_ids: Vec<MoleculeId>,
    pub tag: String,
    pub priority: Priority,
}

/// Decisión de un tick de servicio.
#[derive(Debug)]
pub enum ServiceAdvance {
    /// Generar el próximo lote de hijos (regla de expansión fija del
    /// procedimiento).
    CreateChildren(Vec<ChildSubmission>),
    /// Hay hijos no terminales: nada que hacer en este tick.
    Pending,
    /// Condición de terminación alcanzada; output agregado del padre.
    Completed(Value),
    /// Política de error del procedimiento decidió fallar el padre.
    Failed(Value),
}

/// Capacidades por tipo de record: construir su task, extraer su resultado
/// y (para servicios) avanzar su orquestación.
pub trait RecordHandler: Send + Sync {
    fn record_type(&self) -> RecordType;

    fn is_service(&self) -> bool {
        false
    }

    /// Proyección ejecutable del record (sólo tipos no-servicio).
    fn build_task(&self, ctx: &HandlerContext, record: &Record) -> Result<TaskSpec, CoreError>;

    /// Extracción de resultado específica del tipo, ejecutada antes de la
    /// transición a `complete`. Devuelve el output payload del record.
    fn extract_result(&self, ctx: &HandlerContext, record: &Record, result: &Value) -> Result<Value, CoreError>;

    /// Un tick idempotente de orquestación (sólo servicios).
    fn iterate_service(&self, _ctx: &HandlerContext, record: &Record) -> Result<ServiceAdvance, CoreError> {
        Err(CoreError::Internal(format!("record type {} is not a service", record.record_type.as_str())))
    }
}

/// Tabla de despacho construida una vez al arranque.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<RecordType, Box<dyn RecordHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Alta de un handler. Registrar dos veces el mismo tipo es un error de
    /// arranque, no una condición de runtime.
    pub fn register(&mut self, handler: Box<dyn RecordHandler>) -> Result<(), CoreError> {
        let rt = handler.record_type();
        if self.handlers.contains_key(&rt) {
            return Err(CoreError::Conflict(format!("handler for {} already registered", rt.as_str())));
        }
        self.handlers.insert(rt, handler);
        Ok(())
    }

    pub fn get(&self, record_type: RecordType) -> Result<&dyn RecordHandler, CoreError> {
        self.handlers
            .get(&record_type)
            .map(|h| h.as_ref())
            .ok_or_else(|| CoreError::Internal(format!("no handler registered for {}", record_type.as_str())))
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
