//! Orquestación de servicios: avance idempotente del DAG padre-hijos.
//!
//! `advance_service` es un tick: observa el estado actual de los hijos del
//! servicio, delega la decisión al handler del tipo y materializa lo que el
//! handler pida. Correr el tick dos veces (notificaciones duplicadas, varios
//! hijos terminando a la vez) converge al mismo estado porque la creación de
//! hijos se apoya en la deduplicación de records y en el alta idempotente de
//! aristas, no en contadores propios del orquestador.

use log::debug;

use crate::errors::CoreError;
use crate::handler::ServiceAdvance;
use crate::model::{InsertOutcome, RecordId, RecordStatus, ServiceDependency};
use crate::scheduler::{record_type_for, Scheduler};
use crate::store::{ManagerRegistry, MoleculeStore, NewRecord, RecordStore, SpecificationStore};

impl<S, M, R, G> Scheduler<S, M, R, G>
    where S: SpecificationStore,
          M: MoleculeStore,
          R: RecordStore,
          G: ManagerRegistry
{
    /// Un paso de orquestación sobre un record de servicio.
    ///
    /// Se invoca al hacer submit del servicio, cada vez que un hijo alcanza
    /// estado terminal, y desde cualquier tick externo de mantenimiento.
    pub fn advance_service(&self, parent_id: RecordId) -> Result<(), CoreError> {
        let record = self.records
                         .get_record(parent_id)
                         .ok_or_else(|| CoreError::NotFound(format!("record {parent_id}")))?;
        if !record.is_service {
            return Err(CoreError::Conflict(format!("record {parent_id} is not a service")));
        }
        if record.status.is_terminal() {
            // Notificación tardía de un hijo: el servicio ya cerró.
            return Ok(());
        }

        let handler = self.registry.get(record.record_type)?;
        match handler.iterate_service(&self.ctx(), &record)? {
            ServiceAdvance::CreateChildren(children) => {
                // El padre pasa a running al materializar su primer lote.
                self.records.try_transition(parent_id, RecordStatus::Waiting, RecordStatus::Running, None);
                let batch = children.len();
                let mut adopted_terminal = false;
                for child in children {
                    let (_, spec_id) = self.specifications.add_specification(&child.specification)?;
                    let (child_type, child_is_service) = record_type_for(&child.specification);
                    let (outcome, child_id) = self.records.insert_record(NewRecord { record_type: child_type,
                                                                                     specification_id: spec_id,
                                                                                     molecule_ids: child.molecule_ids,
                                                                                     tag: child.tag,
                                                                                     priority: child.priority,
                                                                                     is_service: child_is_service })?;
                    self.records.add_dependency(ServiceDependency { parent_id,
                                                                    child_id,
                                                                    position: child.position,
                                                                    key: child.key });
                    if outcome == InsertOutcome::Inserted {
                        if child_is_service {
                            self.advance_service(child_id)?;
                        } else {
                            self.enqueue_task(child_id)?;
                        }
                    } else if let Some(existing) = self.records.get_record(child_id) {
                        // Hijo compartido con otro padre (o con un submit
                        // directo) que ya terminó: ese hijo nunca notificará
                        // a este padre, hay que re-evaluar en este tick.
                        if existing.status.is_terminal() {
                            debug!("service {parent_id} adopted already-terminal child {child_id}");
                            adopted_terminal = true;
                        }
                    }
                }
                debug!("service {parent_id} materialized a batch of {batch} child(ren)");
                if adopted_terminal {
                    // Segundo tick inmediato: con los hijos ya materializados
                    // el handler sólo puede observar, no re-expandir.
                    return self.advance_service(parent_id);
                }
                Ok(())
            }
            ServiceAdvance::Pending => Ok(()),
            ServiceAdvance::Completed(output) => {
                if self.records.try_transition(parent_id, RecordStatus::Running, RecordStatus::Complete, None)
                   || self.records.try_transition(parent_id, RecordStatus::Waiting, RecordStatus::Complete, None)
                {
                    self.records.with_record_mut(parent_id, &mut |r| r.output = Some(output.clone()));
                    debug!("service {parent_id} completed");
                }
                Ok(())
            }
            ServiceAdvance::Failed(error) => {
                if self.records.try_transition(parent_id, RecordStatus::Running, RecordStatus::Error, None)
                   || self.records.try_transition(parent_id, RecordStatus::Waiting, RecordStatus::Error, None)
                {
                    self.records.with_record_mut(parent_id, &mut |r| r.error = Some(error.clone()));
                    debug!("service {parent_id} failed per its error policy");
                }
                Ok(())
            }
        }
    }
}
