//! Handler de cálculos singlepoint: la unidad ejecutable más simple.

use indexmap::IndexMap;
use serde_json::{json, Value};

use sched_core::{CoreError, HandlerContext, Record, RecordHandler, RecordType, TaskSpec};

use crate::{input_molecule_value, stored_spec_of};

pub struct SinglepointHandler;

impl RecordHandler for SinglepointHandler {
    fn record_type(&self) -> RecordType {
        RecordType::Singlepoint
    }

    /// Payload estilo `qcengine.compute(input, program)`.
    fn build_task(&self, ctx: &HandlerContext, record: &Record) -> Result<TaskSpec, CoreError> {
        let stored = stored_spec_of(ctx, record)?;
        let driver = stored.payload.get("driver").and_then(Value::as_str).unwrap_or_default();
        if driver.is_empty() || driver == "deferred" {
            // Un driver diferido sólo tiene sentido dentro de un
            // procedimiento; nunca llega a ser una task directa.
            return Err(CoreError::Internal(format!("record {} has no concrete driver", record.id)));
        }
        let program = stored.payload.get("program").cloned().unwrap_or(Value::Null);
        let input = json!({
            "molecule": input_molecule_value(ctx, record)?,
            "driver": driver,
            "model": {
                "method": stored.payload.get("method").cloned().unwrap_or(Value::Null),
                "basis": stored.payload.get("basis").cloned().unwrap_or(Value::Null),
            },
            "keywords": stored.payload.get("keywords").cloned().unwrap_or(json!({})),
        });
        Ok(TaskSpec { function: "qcengine.compute".to_string(),
                      args: vec![input, program],
                      kwargs: IndexMap::new() })
    }

    fn extract_result(&self, _ctx: &HandlerContext, record: &Record, result: &Value) -> Result<Value, CoreError> {
        let return_result = result.get("return_result")
                                  .cloned()
                                  .ok_or_else(|| CoreError::Validation(format!(
                                      "result for record {} is missing return_result", record.id
                                  )))?;
        Ok(json!({
            "return_result": return_result,
            "properties": result.get("properties").cloned().unwrap_or(json!({})),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sched_core::{
        InMemoryMoleculeStore, InMemoryRecordStore, InMemorySpecificationStore, MoleculeStore, NewRecord, Priority,
        RecordStore, SpecificationStore,
    };
    use sched_domain::{Molecule, QcSpecification, SinglepointDriver, Specification};

    fn setup() -> (InMemorySpecificationStore, InMemoryMoleculeStore, InMemoryRecordStore) {
        (InMemorySpecificationStore::new(), InMemoryMoleculeStore::new(), InMemoryRecordStore::new())
    }

    #[test]
    fn build_task_produces_qcengine_compute_payload() {
        let (specs, mols, recs) = setup();
        let spec = QcSpecification::new("psi4", SinglepointDriver::Energy, "b3lyp", Some("def2-svp"), json!({}))
            .expect("valid spec");
        let (_, spec_id) = specs.add_specification(&Specification::Singlepoint(spec)).expect("add spec");
        let water = Molecule::neutral(vec!["O".into(), "H".into(), "H".into()],
                                      vec![0.0, 0.0, 0.0, 0.0, 0.0, 1.8, 0.0, 1.8, 0.0]).expect("molecule");
        let (_, mol_ids) = mols.add_molecules(&[water]).expect("add molecule");
        let (_, id) = recs.insert_record(NewRecord { record_type: RecordType::Singlepoint,
                                                     specification_id: spec_id,
                                                     molecule_ids: mol_ids,
                                                     tag: "compute".to_string(),
                                                     priority: Priority::Normal,
                                                     is_service: false }).expect("insert");
        let record = recs.get_record(id).expect("record");
        let ctx = HandlerContext { specifications: &specs, molecules: &mols, records: &recs };
        let task = SinglepointHandler.build_task(&ctx, &record).expect("task");
        assert_eq!(task.function, "qcengine.compute");
        assert_eq!(task.args[1], json!("psi4"));
        assert_eq!(task.args[0]["driver"], json!("energy"));
        assert_eq!(task.args[0]["model"]["method"], json!("b3lyp"));
        assert_eq!(task.args[0]["molecule"]["symbols"], json!(["O", "H", "H"]));
    }

    #[test]
    fn extract_result_requires_return_result() {
        let (specs, mols, recs) = setup();
        let ctx = HandlerContext { specifications: &specs, molecules: &mols, records: &recs };
        let (_, id) = recs.insert_record(NewRecord { record_type: RecordType::Singlepoint,
                                                     specification_id: "spec".to_string(),
                                                     molecule_ids: vec!["m".to_string()],
                                                     tag: "compute".to_string(),
                                                     priority: Priority::Normal,
                                                     is_service: false }).expect("insert");
        let record = recs.get_record(id).expect("record");
        let ok = SinglepointHandler.extract_result(&ctx, &record, &json!({"return_result": -76.4, "properties": {}}));
        assert_eq!(ok.expect("output")["return_result"], json!(-76.4));
        let missing = SinglepointHandler.extract_result(&ctx, &record, &json!({"success": true}));
        assert!(matches!(missing, Err(CoreError::Validation(_))));
    }
}
