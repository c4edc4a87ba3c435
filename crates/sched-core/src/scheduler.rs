//! Scheduler: fachada central del núcleo.
//!
//! Orquesta los stores y el registro de handlers detrás de la superficie que
//! consume la capa de routing: submit / claim / report / activate / heartbeat
//! / deactivate / cancel / query / reclaim. Todos los métodos toman `&self`:
//! los stores llevan la concurrencia por dentro y el scheduler puede
//! compartirse entre hilos con `Arc`.

use chrono::{Duration, Utc};
use log::{debug, warn};
use serde_json::{json, Value};

use sched_domain::{Molecule, Specification};

use crate::config::SchedulerConfig;
use crate::errors::CoreError;
use crate::handler::{HandlerContext, HandlerRegistry};
use crate::model::{
    InsertMetadata, InsertOutcome, ManagerName, Priority, QueryMetadata, Record, RecordId, RecordStatus, RecordType,
    ResourceSnapshot, Task,
};
use crate::queue::TaskQueue;
use crate::store::{
    InMemoryManagerRegistry, InMemoryMoleculeStore, InMemoryRecordStore, InMemorySpecificationStore, ManagerRegistry,
    MoleculeStore, NewRecord, RecordStore, SpecificationStore,
};

/// Submission de un cliente: spec + inputs + routing.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub specification: Specification,
    pub molecules: Vec<Molecule>,
    pub tag: String,
    pub priority: Priority,
}

/// Filtro de query paginada sobre records.
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    pub status: Option<Vec<RecordStatus>>,
    pub record_type: Option<RecordType>,
    pub tag: Option<String>,
    pub limit: Option<usize>,
    pub offset: usize,
}

/// Tipo de record (y si es servicio) que corresponde a una especificación.
pub(crate) fn record_type_for(spec: &Specification) -> (RecordType, bool) {
    match spec {
        Specification::Singlepoint(_) => (RecordType::Singlepoint, false),
        Specification::Optimization(_) => (RecordType::Optimization, false),
        Specification::Torsiondrive(_) => (RecordType::Torsiondrive, true),
    }
}

pub struct Scheduler<S, M, R, G>
    where S: SpecificationStore,
          M: MoleculeStore,
          R: RecordStore,
          G: ManagerRegistry
{
    pub(crate) specifications: S,
    pub(crate) molecules: M,
    pub(crate) records: R,
    pub(crate) managers: G,
    pub(crate) queue: TaskQueue,
    pub(crate) registry: HandlerRegistry,
    pub(crate) config: SchedulerConfig,
}

/// Alias del scheduler con los stores in-memory.
pub type InMemoryScheduler =
    Scheduler<InMemorySpecificationStore, InMemoryMoleculeStore, InMemoryRecordStore, InMemoryManagerRegistry>;

impl InMemoryScheduler {
    /// Scheduler con stores in-memory y configuración de entorno.
    pub fn new(registry: HandlerRegistry) -> Self {
        Self::with_config(registry, SchedulerConfig::from_env())
    }

    pub fn with_config(registry: HandlerRegistry, config: SchedulerConfig) -> Self {
        Self::new_with_stores(InMemorySpecificationStore::new(),
                              InMemoryMoleculeStore::new(),
                              InMemoryRecordStore::new(),
                              InMemoryManagerRegistry::new(),
                              registry,
                              config)
    }
}

impl<S, M, R, G> Scheduler<S, M, R, G>
    where S: SpecificationStore,
          M: MoleculeStore,
          R: RecordStore,
          G: ManagerRegistry
{
    pub fn new_with_stores(specifications: S,
                           molecules: M,
                           records: R,
                           managers: G,
                           registry: HandlerRegistry,
                           config: SchedulerConfig)
                           -> Self {
        Self { specifications,
               molecules,
               records,
               managers,
               queue: TaskQueue::new(),
               registry,
               config }
    }

    pub(crate) fn ctx(&self) -> HandlerContext<'_> {
        HandlerContext { specifications: &self.specifications,
                         molecules: &self.molecules,
                         records: &self.records }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn get_record(&self, id: RecordId) -> Option<Record> {
        self.records.get_record(id)
    }

    pub fn get_task(&self, id: RecordId) -> Option<Task> {
        self.queue.get(id)
    }

    pub fn get_manager(&self, name: &str) -> Option<crate::model::Manager> {
        self.managers.get_manager(name)
    }

    pub fn children_of(&self, parent: RecordId) -> Vec<crate::model::ServiceDependency> {
        self.records.children_of(parent)
    }

    pub fn record_status_counts(&self) -> std::collections::HashMap<RecordStatus, usize> {
        self.records.status_counts()
    }

    pub fn molecule_store(&self) -> &M {
        &self.molecules
    }

    pub fn specification_store(&self) -> &S {
        &self.specifications
    }

    // ------------------------------------------------------------------
    // Submit
    // ------------------------------------------------------------------

    /// Alta idempotente de trabajo: deduplica spec (bottom-up), moléculas y
    /// records. Un record por molécula para tipos simples; un único record
    /// padre para servicios. Los records nuevos no-servicio entran a la cola;
    /// los servicios disparan su primera expansión.
    pub fn submit(&self, request: SubmitRequest) -> Result<(InsertMetadata, Vec<RecordId>), CoreError> {
        if request.molecules.is_empty() {
            return Err(CoreError::Validation("submission requires at least one molecule".to_string()));
        }
        if request.molecules.len() > self.config.max_batch_size {
            return Err(CoreError::LimitExceeded { requested: request.molecules.len(),
                                                  maximum: self.config.max_batch_size });
        }
        let tag = request.tag.trim().to_lowercase();
        if tag.is_empty() {
            return Err(CoreError::Validation("submission requires a routing tag".to_string()));
        }

        let (record_type, is_service) = record_type_for(&request.specification);
        let (_, spec_id) = self.specifications.add_specification(&request.specification)?;
        let (_, molecule_ids) = self.molecules.add_molecules(&request.molecules)?;

        // Tipos simples: un record por molécula. Servicios: un solo record
        // padre con el set completo de inputs.
        let units: Vec<Vec<String>> = if is_service {
            vec![molecule_ids]
        } else {
            molecule_ids.into_iter().map(|m| vec![m]).collect()
        };

        let mut meta = InsertMetadata::default();
        let mut ids = Vec::with_capacity(units.len());
        for (idx, unit) in units.into_iter().enumerate() {
            let (outcome, record_id) = self.records.insert_record(NewRecord { record_type,
                                                                              specification_id: spec_id.clone(),
                                                                              molecule_ids: unit,
                                                                              tag: tag.clone(),
                                                                              priority: request.priority,
                                                                              is_service })?;
            meta.record(idx, outcome);
            ids.push(record_id);
            if outcome == InsertOutcome::Inserted {
                if is_service {
                    self.advance_service(record_id)?;
                } else {
                    self.enqueue_task(record_id)?;
                }
            }
        }
        Ok((meta, ids))
    }

    /// Materializa la task de un record runnable recién insertado (o
    /// restaurado por `uncancel`).
    pub(crate) fn enqueue_task(&self, record_id: RecordId) -> Result<(), CoreError> {
        let record = self.records
                         .get_record(record_id)
                         .ok_or_else(|| CoreError::NotFound(format!("record {record_id}")))?;
        let handler = self.registry.get(record.record_type)?;
        let stored = self.specifications
                         .get_specification(&record.specification_id)
                         .ok_or_else(|| CoreError::NotFound(format!("specification {}", record.specification_id)))?;
        let program = stored.payload
                            .get("program")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string();
        let spec = handler.build_task(&self.ctx(), &record)?;
        self.queue.insert(Task { record_id,
                                 spec,
                                 program,
                                 tag: record.tag.clone(),
                                 priority: record.priority,
                                 // la antigüedad de la task es la del record:
                                 // un re-encolado no pierde seniority FIFO
                                 created_on: record.created_on,
                                 claimed_by: None,
                                 claimed_on: None });
        Ok(())
    }

    // ------------------------------------------------------------------
    // Claim / report
    // ------------------------------------------------------------------

    /// Reclama hasta `limit` tasks para un manager activo. Cada claim es una
    /// transición condicional individual: dos managers nunca obtienen la
    /// misma task.
    pub fn claim_tasks(&self, manager_name: &str, limit: usize) -> Result<Vec<Task>, CoreError> {
        if limit > self.config.max_batch_size {
            return Err(CoreError::LimitExceeded { requested: limit, maximum: self.config.max_batch_size });
        }
        let manager = self.managers
                          .get_manager(manager_name)
                          .ok_or_else(|| CoreError::NotFound(format!("manager {manager_name}")))?;
        if manager.status != crate::model::ManagerStatus::Active {
            return Err(CoreError::InactiveManager(manager_name.to_string()));
        }

        let mut claimed = Vec::new();
        for candidate in self.queue.candidates_for(&manager) {
            if claimed.len() == limit {
                break;
            }
            // El guard arbitra la carrera contra otros claims y el sweep.
            if self.records.try_transition(candidate, RecordStatus::Waiting, RecordStatus::Running, Some(manager_name))
            {
                if let Some(task) = self.queue.mark_claimed(candidate, manager_name) {
                    claimed.push(task);
                }
            }
        }
        if !claimed.is_empty() {
            self.managers.touch_claim(manager_name, claimed.len());
        }
        debug!("manager {manager_name} claimed {} task(s)", claimed.len());
        Ok(claimed)
    }

    /// Reporte de éxito: extracción de resultado específica del tipo antes de
    /// la transición a `complete`.
    pub fn report_success(&self, manager_name: &str, record_id: RecordId, result: Value) -> Result<(), CoreError> {
        self.report_outcome(manager_name, record_id, Ok(result))
    }

    /// Reporte de fallo remoto: el error es payload del record, no error del
    /// scheduler.
    pub fn report_failure(&self, manager_name: &str, record_id: RecordId, error: Value) -> Result<(), CoreError> {
        self.report_outcome(manager_name, record_id, Err(error))
    }

    fn report_outcome(&self,
                      manager_name: &str,
                      record_id: RecordId,
                      outcome: Result<Value, Value>)
                      -> Result<(), CoreError> {
        let record = self.records
                         .get_record(record_id)
                         .ok_or_else(|| CoreError::NotFound(format!("record {record_id}")))?;

        if record.status.is_terminal() {
            // Entrega duplicada: no-op, sin tocar resultados almacenados.
            debug!("duplicate report for terminal record {record_id}; ignoring");
            return Ok(());
        }
        if record.status != RecordStatus::Running {
            warn!("discarding report for record {record_id} in state {:?}", record.status);
            return Err(CoreError::Conflict(format!("record {record_id} is not running")));
        }
        if record.manager_name.as_deref() != Some(manager_name) {
            warn!("discarding stale report from {manager_name} for record {record_id} owned by {:?}",
                  record.manager_name);
            return Err(CoreError::Conflict(format!("record {record_id} is not owned by {manager_name}")));
        }
        if record.cancel_requested {
            // Cancelación best-effort: se aplica en este contacto y el
            // resultado remoto se descarta.
            if self.records
                   .try_transition(record_id, RecordStatus::Running, RecordStatus::Cancelled, Some(manager_name))
            {
                self.queue.remove(record_id);
                debug!("record {record_id} cancelled on manager contact");
            }
            return Ok(());
        }

        match outcome {
            Ok(result) => {
                let handler = self.registry.get(record.record_type)?;
                let output = handler.extract_result(&self.ctx(), &record, &result)?;
                // Guard condicionado al dueño: si el sweep re-encoló la task
                // y otro manager la reclamó entre el snapshot y este punto,
                // el reporte en vuelo pierde aquí.
                if !self.records
                        .try_transition(record_id, RecordStatus::Running, RecordStatus::Complete, Some(manager_name))
                {
                    return self.lost_completion_race(record_id);
                }
                self.records.with_record_mut(record_id, &mut |r| r.output = Some(output.clone()));
            }
            Err(error) => {
                if !self.records
                        .try_transition(record_id, RecordStatus::Running, RecordStatus::Error, Some(manager_name))
                {
                    return self.lost_completion_race(record_id);
                }
                self.records.with_record_mut(record_id, &mut |r| r.error = Some(error.clone()));
            }
        }
        self.queue.remove(record_id);
        self.notify_parents(record_id);
        Ok(())
    }

    /// El guard falló tras pasar las comprobaciones: otro actor llegó antes.
    /// Si el record quedó terminal es una entrega duplicada (no-op).
    fn lost_completion_race(&self, record_id: RecordId) -> Result<(), CoreError> {
        match self.records.get_record(record_id) {
            Some(r) if r.status.is_terminal() => Ok(()),
            _ => Err(CoreError::Conflict(format!("record {record_id} changed state during completion"))),
        }
    }

    /// Tick de orquestación de los padres de un hijo que acaba de terminar.
    pub(crate) fn notify_parents(&self, child_id: RecordId) {
        for parent in self.records.parents_of(child_id) {
            if let Err(err) = self.advance_service(parent) {
                // La notificación es at-least-once: el próximo hijo terminal
                // (o un tick externo) reintenta el avance.
                warn!("service advance failed for parent {parent}: {err}");
            }
        }
    }

    // ------------------------------------------------------------------
    // Managers
    // ------------------------------------------------------------------

    pub fn activate_manager(&self,
                            name_data: ManagerName,
                            programs: Vec<String>,
                            tags: Vec<String>)
                            -> Result<String, CoreError> {
        self.managers.activate(name_data, programs, tags)
    }

    pub fn manager_heartbeat(&self, name: &str, snapshot: ResourceSnapshot) -> Result<(), CoreError> {
        self.managers.heartbeat(name, snapshot)
    }

    /// Salida ordenada: además de marcar inactivo, recupera inmediatamente
    /// las tasks que el manager aún tuviera reclamadas (sin esperar la
    /// ventana de staleness).
    pub fn deactivate_manager(&self, name: &str, snapshot: ResourceSnapshot) -> Result<(), CoreError> {
        self.managers.deactivate(name, snapshot)?;
        let released = self.release_manager_tasks(name);
        if released > 0 {
            debug!("released {released} task(s) on deactivation of {name}");
        }
        Ok(())
    }

    /// Sweep periódico de staleness. Seguro de correr en paralelo con claims:
    /// sólo actúa vía el guard condicional sobre tasks ya reclamadas.
    pub fn reclaim_stale(&self) -> usize {
        let now = Utc::now();
        let window = Duration::seconds(self.config.heartbeat_staleness_secs);
        let mut released = 0;
        for manager in self.managers.active_managers() {
            if now - manager.modified_on > window {
                warn!("manager {} exceeded the heartbeat staleness window; deactivating", manager.name);
                self.managers.mark_inactive(&manager.name);
                released += self.release_manager_tasks(&manager.name);
            }
        }
        released
    }

    /// Recupera las tasks de un manager perdido: re-encola si quedan
    /// reintentos, marca `error` si el presupuesto se agotó.
    fn release_manager_tasks(&self, manager_name: &str) -> usize {
        let mut released = 0;
        for record_id in self.queue.claimed_by(manager_name) {
            let Some(record) = self.records.get_record(record_id) else {
                continue;
            };
            if record.status != RecordStatus::Running || record.manager_name.as_deref() != Some(manager_name) {
                continue;
            }
            if record.cancel_requested {
                if self.records
                       .try_transition(record_id, RecordStatus::Running, RecordStatus::Cancelled, Some(manager_name))
                {
                    self.queue.remove(record_id);
                    released += 1;
                }
                continue;
            }
            if record.attempts < self.config.task_retry_limit {
                if self.records
                       .try_transition(record_id, RecordStatus::Running, RecordStatus::Waiting, Some(manager_name))
                {
                    self.queue.release(record_id);
                    released += 1;
                }
            } else if self.records
                          .try_transition(record_id, RecordStatus::Running, RecordStatus::Error, Some(manager_name))
            {
                self.records.with_record_mut(record_id, &mut |r| {
                    r.error = Some(json!({
                        "error_type": "manager_lost",
                        "error_message": format!("manager {manager_name} was lost with the task claimed"),
                    }));
                });
                self.queue.remove(record_id);
                self.notify_parents(record_id);
                released += 1;
            }
        }
        released
    }

    // ------------------------------------------------------------------
    // Cancel / query
    // ------------------------------------------------------------------

    /// Cancela un record. `waiting`: task removida atómicamente. `running`:
    /// marcado para aplicar en el próximo contacto del manager (la ejecución
    /// remota no se interrumpe).
    pub fn cancel_record(&self, record_id: RecordId) -> Result<(), CoreError> {
        let record = self.records
                         .get_record(record_id)
                         .ok_or_else(|| CoreError::NotFound(format!("record {record_id}")))?;
        match record.status {
            RecordStatus::Waiting => {
                if self.records.try_transition(record_id, RecordStatus::Waiting, RecordStatus::Cancelled, None) {
                    self.queue.remove(record_id);
                    Ok(())
                } else {
                    Err(CoreError::Conflict(format!("record {record_id} changed state during cancel")))
                }
            }
            RecordStatus::Running => {
                self.records.with_record_mut(record_id, &mut |r| r.cancel_requested = true);
                Ok(())
            }
            other => Err(CoreError::Conflict(format!("record {record_id} is already {other:?}"))),
        }
    }

    /// Acción administrativa: saca un record de `cancelled` y lo devuelve a
    /// la cola (único camino hacia atrás del ciclo de vida).
    pub fn uncancel_record(&self, record_id: RecordId) -> Result<(), CoreError> {
        let record = self.records
                         .get_record(record_id)
                         .ok_or_else(|| CoreError::NotFound(format!("record {record_id}")))?;
        if record.status != RecordStatus::Cancelled {
            return Err(CoreError::Conflict(format!("record {record_id} is not cancelled")));
        }
        if !self.records.try_transition(record_id, RecordStatus::Cancelled, RecordStatus::Waiting, None) {
            return Err(CoreError::Conflict(format!("record {record_id} changed state during uncancel")));
        }
        self.records.with_record_mut(record_id, &mut |r| r.cancel_requested = false);
        if record.is_service {
            self.advance_service(record_id)?;
        } else {
            self.enqueue_task(record_id)?;
        }
        Ok(())
    }

    /// Acción administrativa: reintenta un record en `error` desde cero. El
    /// error almacenado se descarta y el presupuesto de reintentos vuelve a
    /// empezar.
    pub fn reset_record(&self, record_id: RecordId) -> Result<(), CoreError> {
        let record = self.records
                         .get_record(record_id)
                         .ok_or_else(|| CoreError::NotFound(format!("record {record_id}")))?;
        if record.status != RecordStatus::Error {
            return Err(CoreError::Conflict(format!("record {record_id} is not errored")));
        }
        if !self.records.try_transition(record_id, RecordStatus::Error, RecordStatus::Waiting, None) {
            return Err(CoreError::Conflict(format!("record {record_id} changed state during reset")));
        }
        self.records.with_record_mut(record_id, &mut |r| {
            r.error = None;
            r.attempts = 0;
        });
        if record.is_service {
            self.advance_service(record_id)?;
        } else {
            self.enqueue_task(record_id)?;
        }
        Ok(())
    }

    /// Acción administrativa: marca un resultado `complete` como inválido. El
    /// output se conserva pero el record deja de contar como resultado
    /// utilizable hasta un `uninvalidate`.
    pub fn invalidate_record(&self, record_id: RecordId) -> Result<(), CoreError> {
        self.records
            .get_record(record_id)
            .ok_or_else(|| CoreError::NotFound(format!("record {record_id}")))?;
        if self.records.try_transition(record_id, RecordStatus::Complete, RecordStatus::Invalid, None) {
            Ok(())
        } else {
            Err(CoreError::Conflict(format!("record {record_id} is not complete")))
        }
    }

    /// Revierte un `invalidate`; el output original sigue intacto.
    pub fn uninvalidate_record(&self, record_id: RecordId) -> Result<(), CoreError> {
        self.records
            .get_record(record_id)
            .ok_or_else(|| CoreError::NotFound(format!("record {record_id}")))?;
        if self.records.try_transition(record_id, RecordStatus::Invalid, RecordStatus::Complete, None) {
            Ok(())
        } else {
            Err(CoreError::Conflict(format!("record {record_id} is not invalid")))
        }
    }

    /// Query paginada. Un `limit` mayor al tope configurado se rechaza con
    /// `LimitExceeded`, nunca se trunca en silencio.
    pub fn query_records(&self, filter: RecordFilter) -> Result<(QueryMetadata, Vec<Record>), CoreError> {
        let limit = filter.limit.unwrap_or(self.config.max_query_limit);
        if limit > self.config.max_query_limit {
            return Err(CoreError::LimitExceeded { requested: limit, maximum: self.config.max_query_limit });
        }
        let mut found = self.records.select_records(&|r| {
            filter.status.as_ref().map_or(true, |wanted| wanted.contains(&r.status))
                && filter.record_type.map_or(true, |wanted| wanted == r.record_type)
                && filter.tag.as_ref().map_or(true, |wanted| wanted == &r.tag)
        });
        found.sort_by(|a, b| a.created_on.cmp(&b.created_on).then(a.id.cmp(&b.id)));
        let n_found = found.len();
        let page: Vec<Record> = found.into_iter().skip(filter.offset).take(limit).collect();
        let n_returned = page.len();
        Ok((QueryMetadata { n_found, n_returned }, page))
    }
}
