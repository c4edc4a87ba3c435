//! Handler de optimizaciones de geometría.
//!
//! Además del passthrough del resultado, la extracción ingesta la trayectoria
//! remota: cada paso del optimizador se materializa como un record
//! singlepoint ya completo (referenciando la spec QC anidada) y se enlaza al
//! record padre con aristas ordenadas, de modo que la trayectoria es
//! consultable con las mismas queries que cualquier otro record.

use indexmap::IndexMap;
use serde_json::{json, Value};

use sched_core::{
    CoreError, HandlerContext, NewRecord, Record, RecordHandler, RecordType, ServiceDependency, TaskSpec,
};
use sched_domain::Molecule;

use crate::{input_molecule_value, stored_spec_of};

pub struct OptimizationHandler;

impl RecordHandler for OptimizationHandler {
    fn record_type(&self) -> RecordType {
        RecordType::Optimization
    }

    /// Payload estilo `qcengine.compute_procedure(input, program)`. El
    /// gradiente de cada paso lo describe la spec QC anidada; el programa QC
    /// viaja dentro de las keywords del optimizador.
    fn build_task(&self, ctx: &HandlerContext, record: &Record) -> Result<TaskSpec, CoreError> {
        let stored = stored_spec_of(ctx, record)?;
        let qc_id = stored.child_id
                          .as_deref()
                          .ok_or_else(|| CoreError::Internal(format!(
                              "optimization specification {} has no nested QC specification", stored.id
                          )))?;
        let qc = ctx.specifications
                    .get_specification(qc_id)
                    .ok_or_else(|| CoreError::Internal(format!("specification {qc_id} not found")))?;

        let mut keywords = stored.payload.get("keywords").cloned().unwrap_or(json!({}));
        if let Some(map) = keywords.as_object_mut() {
            map.insert("program".to_string(), qc.payload.get("program").cloned().unwrap_or(Value::Null));
        }
        let input = json!({
            "input_specification": {
                "driver": "gradient",
                "model": {
                    "method": qc.payload.get("method").cloned().unwrap_or(Value::Null),
                    "basis": qc.payload.get("basis").cloned().unwrap_or(Value::Null),
                },
                "keywords": qc.payload.get("keywords").cloned().unwrap_or(json!({})),
            },
            "initial_molecule": input_molecule_value(ctx, record)?,
            "keywords": keywords,
            "protocols": stored.payload.get("protocols").cloned().unwrap_or(json!({})),
        });
        let program = stored.payload.get("program").cloned().unwrap_or(Value::Null);
        Ok(TaskSpec { function: "qcengine.compute_procedure".to_string(),
                      args: vec![input, program],
                      kwargs: IndexMap::new() })
    }

    fn extract_result(&self, ctx: &HandlerContext, record: &Record, result: &Value) -> Result<Value, CoreError> {
        let stored = stored_spec_of(ctx, record)?;
        let qc_id = stored.child_id
                          .clone()
                          .ok_or_else(|| CoreError::Internal(format!(
                              "optimization specification {} has no nested QC specification", stored.id
                          )))?;

        let final_molecule: Molecule =
            serde_json::from_value(result.get("final_molecule")
                                         .cloned()
                                         .ok_or_else(|| CoreError::Validation(format!(
                                             "result for record {} is missing final_molecule", record.id
                                         )))?)
                .map_err(|e| CoreError::Validation(format!("malformed final_molecule: {e}")))?;
        let (_, final_ids) = ctx.molecules.add_molecules(std::slice::from_ref(&final_molecule))?;

        let energies = result.get("energies").cloned().unwrap_or(json!([]));
        let trajectory = result.get("trajectory").and_then(Value::as_array).cloned().unwrap_or_default();

        // Re-extracción (entrega duplicada o reporte que perdió la carrera de
        // cierre): la trayectoria ya fue ingerida, reutilizarla en vez de
        // materializar un segundo lote desconectado de las aristas.
        let existing = ctx.records.children_of(record.id);
        if !existing.is_empty() {
            let trajectory_ids: Vec<_> = existing.iter().map(|e| e.child_id).collect();
            return Ok(json!({
                "energies": energies,
                "final_molecule_id": final_ids[0],
                "trajectory": trajectory_ids,
            }));
        }

        let mut trajectory_ids = Vec::with_capacity(trajectory.len());
        for (position, step) in trajectory.iter().enumerate() {
            let step_molecule: Molecule =
                serde_json::from_value(step.get("molecule").cloned().unwrap_or(Value::Null))
                    .map_err(|e| CoreError::Validation(format!(
                        "malformed molecule in trajectory step {position}: {e}"
                    )))?;
            let (_, step_mol_ids) = ctx.molecules.add_molecules(std::slice::from_ref(&step_molecule))?;
            let output = json!({
                "return_result": step.get("return_result").cloned().unwrap_or(Value::Null),
                "properties": step.get("properties").cloned().unwrap_or(json!({})),
            });
            // Ingesta interna: el paso nace terminal, sin pasar por la cola.
            let step_id = ctx.records.insert_completed(NewRecord { record_type: RecordType::Singlepoint,
                                                                   specification_id: qc_id.clone(),
                                                                   molecule_ids: step_mol_ids,
                                                                   tag: record.tag.clone(),
                                                                   priority: record.priority,
                                                                   is_service: false },
                                                       output)?;
            // El alta de arista arbitra por posición: si otra extracción ya
            // ocupó este paso, el duplicado recién creado se descarta y se
            // referencia al ganador.
            if ctx.records.add_dependency(ServiceDependency { parent_id: record.id,
                                                              child_id: step_id,
                                                              position: position as i64,
                                                              key: position.to_string() })
            {
                trajectory_ids.push(step_id);
            } else {
                ctx.records.soft_delete(step_id)?;
                let winner = ctx.records
                                .children_of(record.id)
                                .into_iter()
                                .find(|e| e.position == position as i64)
                                .ok_or_else(|| CoreError::Internal(format!(
                                    "trajectory step {position} of record {} vanished", record.id
                                )))?;
                trajectory_ids.push(winner.child_id);
            }
        }

        Ok(json!({
            "energies": energies,
            "final_molecule_id": final_ids[0],
            "trajectory": trajectory_ids,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sched_core::{
        InMemoryMoleculeStore, InMemoryRecordStore, InMemorySpecificationStore, MoleculeStore, Priority, RecordStatus,
        RecordStore, SpecificationStore,
    };
    use sched_domain::{OptimizationSpecification, QcSpecification, SinglepointDriver, Specification};

    fn opt_spec() -> Specification {
        let qc = QcSpecification::new("psi4", SinglepointDriver::Deferred, "b3lyp", Some("def2-svp"), json!({}))
            .expect("qc spec");
        Specification::Optimization(OptimizationSpecification::new("geometric", json!({"maxiter": 200}), json!({}), qc)
            .expect("opt spec"))
    }

    fn molecule(z: f64) -> Value {
        json!({"symbols": ["H", "H"], "geometry": [0.0, 0.0, 0.0, 0.0, 0.0, z], "charge": 0, "multiplicity": 1})
    }

    #[test]
    fn build_task_injects_qc_program_into_keywords() {
        let specs = InMemorySpecificationStore::new();
        let mols = InMemoryMoleculeStore::new();
        let recs = InMemoryRecordStore::new();
        let (_, spec_id) = specs.add_specification(&opt_spec()).expect("add spec");
        let h2 = Molecule::neutral(vec!["H".into(), "H".into()], vec![0.0, 0.0, 0.0, 0.0, 0.0, 1.4]).expect("h2");
        let (_, mol_ids) = mols.add_molecules(&[h2]).expect("add molecule");
        let (_, id) = recs.insert_record(NewRecord { record_type: RecordType::Optimization,
                                                     specification_id: spec_id,
                                                     molecule_ids: mol_ids,
                                                     tag: "compute".to_string(),
                                                     priority: Priority::Normal,
                                                     is_service: false }).expect("insert");
        let record = recs.get_record(id).expect("record");
        let ctx = HandlerContext { specifications: &specs, molecules: &mols, records: &recs };
        let task = OptimizationHandler.build_task(&ctx, &record).expect("task");
        assert_eq!(task.function, "qcengine.compute_procedure");
        assert_eq!(task.args[1], json!("geometric"));
        assert_eq!(task.args[0]["keywords"]["program"], json!("psi4"));
        assert_eq!(task.args[0]["keywords"]["maxiter"], json!(200));
        assert_eq!(task.args[0]["input_specification"]["model"]["method"], json!("b3lyp"));
    }

    #[test]
    fn extract_result_ingests_trajectory_as_completed_records() {
        let specs = InMemorySpecificationStore::new();
        let mols = InMemoryMoleculeStore::new();
        let recs = InMemoryRecordStore::new();
        let (_, spec_id) = specs.add_specification(&opt_spec()).expect("add spec");
        let h2 = Molecule::neutral(vec!["H".into(), "H".into()], vec![0.0, 0.0, 0.0, 0.0, 0.0, 1.6]).expect("h2");
        let (_, mol_ids) = mols.add_molecules(&[h2]).expect("add molecule");
        let (_, id) = recs.insert_record(NewRecord { record_type: RecordType::Optimization,
                                                     specification_id: spec_id.clone(),
                                                     molecule_ids: mol_ids,
                                                     tag: "compute".to_string(),
                                                     priority: Priority::Normal,
                                                     is_service: false }).expect("insert");
        let record = recs.get_record(id).expect("record");
        let ctx = HandlerContext { specifications: &specs, molecules: &mols, records: &recs };

        let result = json!({
            "success": true,
            "final_molecule": molecule(1.4),
            "energies": [-1.0, -1.1, -1.15],
            "trajectory": [
                {"molecule": molecule(1.6), "return_result": [0.1], "properties": {"return_energy": -1.0}},
                {"molecule": molecule(1.5), "return_result": [0.05], "properties": {"return_energy": -1.1}},
                {"molecule": molecule(1.4), "return_result": [0.01], "properties": {"return_energy": -1.15}},
            ],
        });
        let output = OptimizationHandler.extract_result(&ctx, &record, &result).expect("output");
        assert_eq!(output["energies"], json!([-1.0, -1.1, -1.15]));

        let edges = recs.children_of(id);
        assert_eq!(edges.len(), 3);
        let qc_id = specs.get_specification(&spec_id).expect("opt spec").child_id.expect("nested qc");
        for (i, edge) in edges.iter().enumerate() {
            assert_eq!(edge.position, i as i64);
            let step = recs.get_record(edge.child_id).expect("trajectory record");
            assert_eq!(step.status, RecordStatus::Complete);
            assert_eq!(step.record_type, RecordType::Singlepoint);
            assert_eq!(step.specification_id, qc_id);
            assert!(step.output.is_some());
        }
    }

    #[test]
    fn repeated_extraction_reuses_the_ingested_trajectory() {
        let specs = InMemorySpecificationStore::new();
        let mols = InMemoryMoleculeStore::new();
        let recs = InMemoryRecordStore::new();
        let (_, spec_id) = specs.add_specification(&opt_spec()).expect("add spec");
        let h2 = Molecule::neutral(vec!["H".into(), "H".into()], vec![0.0, 0.0, 0.0, 0.0, 0.0, 1.6]).expect("h2");
        let (_, mol_ids) = mols.add_molecules(&[h2]).expect("add molecule");
        let (_, id) = recs.insert_record(NewRecord { record_type: RecordType::Optimization,
                                                     specification_id: spec_id,
                                                     molecule_ids: mol_ids,
                                                     tag: "compute".to_string(),
                                                     priority: Priority::Normal,
                                                     is_service: false }).expect("insert");
        let record = recs.get_record(id).expect("record");
        let ctx = HandlerContext { specifications: &specs, molecules: &mols, records: &recs };

        let result = json!({
            "success": true,
            "final_molecule": molecule(1.4),
            "energies": [-1.0, -1.1],
            "trajectory": [
                {"molecule": molecule(1.6), "return_result": [0.1], "properties": {"return_energy": -1.0}},
                {"molecule": molecule(1.4), "return_result": [0.01], "properties": {"return_energy": -1.1}},
            ],
        });
        let first = OptimizationHandler.extract_result(&ctx, &record, &result).expect("first extraction");
        let second = OptimizationHandler.extract_result(&ctx, &record, &result).expect("repeat extraction");
        // mismo lote: sin pasos duplicados ni divergencia output/aristas
        assert_eq!(first["trajectory"], second["trajectory"]);
        assert_eq!(recs.children_of(id).len(), 2);
    }

    #[test]
    fn extract_result_rejects_missing_final_molecule() {
        let specs = InMemorySpecificationStore::new();
        let mols = InMemoryMoleculeStore::new();
        let recs = InMemoryRecordStore::new();
        let (_, spec_id) = specs.add_specification(&opt_spec()).expect("add spec");
        let (_, id) = recs.insert_record(NewRecord { record_type: RecordType::Optimization,
                                                     specification_id: spec_id,
                                                     molecule_ids: vec!["m".to_string()],
                                                     tag: "compute".to_string(),
                                                     priority: Priority::Normal,
                                                     is_service: false }).expect("insert");
        let record = recs.get_record(id).expect("record");
        let ctx = HandlerContext { specifications: &specs, molecules: &mols, records: &recs };
        let err = OptimizationHandler.extract_result(&ctx, &record, &json!({"success": true}));
        assert!(matches!(err, Err(CoreError::Validation(_))));
    }
}
