//! Handler del servicio torsiondrive.
//!
//! Escaneo de diedros con fan-out fijo: un hijo de optimización restringida
//! por punto de malla, todos derivables de la spec del padre. La expansión es
//! puramente observacional: cada tick compara la malla completa contra las
//! aristas ya materializadas y sólo pide los puntos que faltan, de modo que
//! ticks duplicados o expansiones interrumpidas convergen solos.

use std::collections::HashSet;

use indexmap::IndexMap;
use serde_json::{json, Value};

use sched_core::{
    ChildSubmission, CoreError, HandlerContext, Record, RecordHandler, RecordType, ServiceAdvance, TaskSpec,
};
use sched_domain::{OptimizationSpecification, QcSpecification, Specification, TorsiondriveKeywords};

use crate::stored_spec_of;

pub struct TorsiondriveHandler;

/// Producto cartesiano de las mallas angulares, una dimensión por diedro.
/// Cada punto cubre [-180, 180) con el spacing configurado.
fn grid_points(keywords: &TorsiondriveKeywords) -> Vec<Vec<i64>> {
    let mut points: Vec<Vec<i64>> = vec![vec![]];
    for spacing in &keywords.grid_spacing {
        let angles: Vec<i64> = (-180..180).step_by(*spacing as usize).collect();
        points = points.into_iter()
                       .flat_map(|prefix| {
                           angles.iter().map(move |angle| {
                                      let mut point = prefix.clone();
                                      point.push(*angle);
                                      point
                                  })
                       })
                       .collect();
    }
    points
}

impl TorsiondriveHandler {
    /// Reconstruye la spec de optimización base a partir de las entradas
    /// almacenadas (torsiondrive -> optimization -> qc, por referencia).
    fn base_optimization(&self,
                         ctx: &HandlerContext,
                         record: &Record)
                         -> Result<(TorsiondriveKeywords, OptimizationSpecification), CoreError> {
        let stored = stored_spec_of(ctx, record)?;
        let keywords: TorsiondriveKeywords =
            serde_json::from_value(stored.payload.get("keywords").cloned().unwrap_or(Value::Null))
                .map_err(|e| CoreError::Internal(format!("malformed torsiondrive keywords: {e}")))?;

        let opt_id = stored.child_id
                           .as_deref()
                           .ok_or_else(|| CoreError::Internal(format!(
                               "torsiondrive specification {} has no nested optimization", stored.id
                           )))?;
        let opt = ctx.specifications
                     .get_specification(opt_id)
                     .ok_or_else(|| CoreError::Internal(format!("specification {opt_id} not found")))?;
        let qc_id = opt.child_id
                       .as_deref()
                       .ok_or_else(|| CoreError::Internal(format!(
                           "optimization specification {opt_id} has no nested QC specification"
                       )))?;
        let qc = ctx.specifications
                    .get_specification(qc_id)
                    .ok_or_else(|| CoreError::Internal(format!("specification {qc_id} not found")))?;
        let qc_specification: QcSpecification = serde_json::from_value(qc.payload.clone())
            .map_err(|e| CoreError::Internal(format!("malformed stored QC specification: {e}")))?;

        let base = OptimizationSpecification { program: opt.payload
                                                           .get("program")
                                                           .and_then(Value::as_str)
                                                           .unwrap_or_default()
                                                           .to_string(),
                                               keywords: opt.payload.get("keywords").cloned().unwrap_or(json!({})),
                                               protocols: opt.payload.get("protocols").cloned().unwrap_or(json!({})),
                                               qc_specification };
        Ok((keywords, base))
    }

    /// Optimización restringida para un punto de malla: la base más las
    /// constraints de diedro fijadas en los ángulos del punto.
    fn constrained_child(&self,
                         base: &OptimizationSpecification,
                         keywords: &TorsiondriveKeywords,
                         point: &[i64])
                         -> Specification {
        let constraints: Vec<Value> = keywords.dihedrals
                                              .iter()
                                              .zip(point)
                                              .map(|(dihedral, angle)| {
                                                  json!({
                                                      "type": "dihedral",
                                                      "indices": dihedral,
                                                      "value": angle,
                                                  })
                                              })
                                              .collect();
        let mut child = base.clone();
        if let Some(map) = child.keywords.as_object_mut() {
            map.insert("constraints".to_string(), json!({ "set": constraints }));
        } else {
            child.keywords = json!({ "constraints": { "set": constraints } });
        }
        Specification::Optimization(child)
    }
}

impl RecordHandler for TorsiondriveHandler {
    fn record_type(&self) -> RecordType {
        RecordType::Torsiondrive
    }

    fn is_service(&self) -> bool {
        true
    }

    fn build_task(&self, _ctx: &HandlerContext, record: &Record) -> Result<TaskSpec, CoreError> {
        Err(CoreError::Internal(format!("service record {} has no directly executable task", record.id)))
    }

    fn extract_result(&self, _ctx: &HandlerContext, record: &Record, _result: &Value) -> Result<Value, CoreError> {
        Err(CoreError::Internal(format!("service record {} does not accept manager reports", record.id)))
    }

    fn iterate_service(&self, ctx: &HandlerContext, record: &Record) -> Result<ServiceAdvance, CoreError> {
        let (keywords, base) = self.base_optimization(ctx, record)?;
        let grid = grid_points(&keywords);

        let edges = ctx.records.children_of(record.id);
        let existing: HashSet<&str> = edges.iter().map(|e| e.key.as_str()).collect();

        let missing: Vec<ChildSubmission> =
            grid.iter()
                .enumerate()
                .filter_map(|(position, point)| {
                    let key = serde_json::to_string(point).unwrap_or_default();
                    if existing.contains(key.as_str()) {
                        return None;
                    }
                    Some(ChildSubmission { key,
                                           position: position as i64,
                                           specification: self.constrained_child(&base, &keywords, point),
                                           molecule_ids: record.molecule_ids.clone(),
                                           tag: record.tag.clone(),
                                           priority: record.priority })
                })
                .collect();
        if !missing.is_empty() {
            return Ok(ServiceAdvance::CreateChildren(missing));
        }

        // Malla completa materializada: observar a los hijos.
        let mut final_energies: IndexMap<String, Value> = IndexMap::new();
        let mut optimizations: IndexMap<String, String> = IndexMap::new();
        let mut errors: IndexMap<String, Value> = IndexMap::new();
        for edge in &edges {
            let child = ctx.records
                           .get_record(edge.child_id)
                           .ok_or_else(|| CoreError::Internal(format!("child record {} not found", edge.child_id)))?;
            if !child.status.is_terminal() {
                return Ok(ServiceAdvance::Pending);
            }
            if child.status == sched_core::RecordStatus::Complete {
                let energy = child.output
                                  .as_ref()
                                  .and_then(|o| o.get("energies"))
                                  .and_then(Value::as_array)
                                  .and_then(|e| e.last())
                                  .cloned()
                                  .unwrap_or(Value::Null);
                final_energies.insert(edge.key.clone(), energy);
                optimizations.insert(edge.key.clone(), edge.child_id.to_string());
            } else {
                errors.insert(edge.key.clone(),
                              child.error.clone().unwrap_or_else(|| json!({"status": child.status})));
            }
        }

        // Política tolerante: el servicio sólo falla si no sobrevivió ningún
        // punto de la malla.
        if final_energies.is_empty() {
            return Ok(ServiceAdvance::Failed(json!({
                "error_type": "service_children_failed",
                "error_message": "all grid point optimizations failed",
                "errors": errors,
            })));
        }
        Ok(ServiceAdvance::Completed(json!({
            "final_energies": final_energies,
            "optimizations": optimizations,
            "errors": errors,
        })))
    }
}
