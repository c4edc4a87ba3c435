//! Demo ejecutable del scheduler: ejercita el ciclo completo
//! submit -> claim -> report con managers simulados.
//!
//! Cada `run_*_demo` es un escenario autocontenido con asserts; el binario
//! termina con error si alguno no se cumple.

use std::sync::Arc;

use serde_json::{json, Value};

use sched_adapters::default_registry;
use sched_core::{
    InMemoryScheduler, ManagerName, Priority, RecordFilter, RecordStatus, ResourceSnapshot, SchedulerConfig,
    SubmitRequest, Task,
};
use sched_domain::{
    Molecule, OptimizationSpecification, QcSpecification, SinglepointDriver, Specification, TorsiondriveKeywords,
    TorsiondriveSpecification,
};

fn water() -> Molecule {
    Molecule::neutral(vec!["O".into(), "H".into(), "H".into()],
                      vec![0.0, 0.0, 0.0, 0.0, 0.0, 1.8, 0.0, 1.8, 0.0]).expect("molecule ok")
}

fn butane_fragment() -> Molecule {
    Molecule::neutral(vec!["C".into(), "C".into(), "C".into(), "C".into()],
                      vec![0.0, 0.0, 0.0, 2.9, 0.0, 0.0, 4.1, 2.6, 0.0, 7.0, 2.6, 0.0]).expect("molecule ok")
}

fn qc_energy_spec() -> Specification {
    let qc = QcSpecification::new("psi4", SinglepointDriver::Energy, "b3lyp", Some("def2-svp"), json!({}))
        .expect("qc spec ok");
    Specification::Singlepoint(qc)
}

fn optimization_spec() -> OptimizationSpecification {
    let qc = QcSpecification::new("psi4", SinglepointDriver::Deferred, "b3lyp", Some("def2-svp"), json!({}))
        .expect("qc spec ok");
    OptimizationSpecification::new("geometric", json!({"maxiter": 200}), json!({}), qc).expect("opt spec ok")
}

fn activate_demo_manager(scheduler: &InMemoryScheduler, uuid: &str) -> String {
    scheduler.activate_manager(ManagerName::new("demo-cluster", "node01", uuid),
                               vec!["psi4".into(), "geometric".into()],
                               vec!["*".into()])
             .expect("manager activation ok")
}

/// Resultado sintético con la forma que produciría un worker qcengine.
fn fake_result_for(task: &Task) -> Value {
    match task.spec.function.as_str() {
        "qcengine.compute" => json!({
            "success": true,
            "return_result": -76.40,
            "properties": { "return_energy": -76.40 },
        }),
        "qcengine.compute_procedure" => {
            let initial = task.spec.args[0]["initial_molecule"].clone();
            json!({
                "success": true,
                "final_molecule": initial.clone(),
                "energies": [-1.0, -1.1, -1.15],
                "trajectory": [
                    {"molecule": initial.clone(), "return_result": [0.1], "properties": {"return_energy": -1.0}},
                    {"molecule": initial, "return_result": [0.01], "properties": {"return_energy": -1.15}},
                ],
            })
        }
        other => panic!("unexpected task function {other}"),
    }
}

/// Submit deduplicado + claim + report de singlepoints.
fn run_singlepoint_demo() {
    let scheduler = InMemoryScheduler::new(default_registry().expect("registry ok"));
    let manager = activate_demo_manager(&scheduler, "sp");

    let (meta, ids) = scheduler.submit(SubmitRequest { specification: qc_energy_spec(),
                                                       molecules: vec![water(), butane_fragment()],
                                                       tag: "demo".into(),
                                                       priority: Priority::Normal })
                               .expect("submit ok");
    println!("[singlepoint] inserted={} existing={}", meta.n_inserted(), meta.n_existing());
    assert_eq!(meta.n_inserted(), 2);

    // Re-submit idéntico: mismos ids, nada nuevo que computar
    let (meta2, ids2) = scheduler.submit(SubmitRequest { specification: qc_energy_spec(),
                                                         molecules: vec![water(), butane_fragment()],
                                                         tag: "demo".into(),
                                                         priority: Priority::Normal })
                                 .expect("re-submit ok");
    assert_eq!(meta2.n_existing(), 2);
    assert_eq!(ids, ids2);

    let tasks = scheduler.claim_tasks(&manager, 10).expect("claim ok");
    assert_eq!(tasks.len(), 2);
    for task in &tasks {
        scheduler.report_success(&manager, task.record_id, fake_result_for(task)).expect("report ok");
    }
    for id in &ids {
        let record = scheduler.get_record(*id).expect("record ok");
        assert_eq!(record.status, RecordStatus::Complete);
        println!("[singlepoint] record {} -> {:?}", id, record.status);
    }
}

/// Optimización con ingesta de trayectoria.
fn run_optimization_demo() {
    let scheduler = InMemoryScheduler::new(default_registry().expect("registry ok"));
    let manager = activate_demo_manager(&scheduler, "opt");

    let (_, ids) = scheduler.submit(SubmitRequest { specification: Specification::Optimization(optimization_spec()),
                                                    molecules: vec![water()],
                                                    tag: "demo".into(),
                                                    priority: Priority::High })
                            .expect("submit ok");
    let task = scheduler.claim_tasks(&manager, 1).expect("claim ok").pop().expect("one task");
    scheduler.report_success(&manager, task.record_id, fake_result_for(&task)).expect("report ok");

    let record = scheduler.get_record(ids[0]).expect("record ok");
    assert_eq!(record.status, RecordStatus::Complete);
    let trajectory = scheduler.children_of(ids[0]);
    println!("[optimization] record {} complete, trajectory of {} step(s)", ids[0], trajectory.len());
    assert_eq!(trajectory.len(), 2);
}

/// Servicio torsiondrive completo con un pool de managers simulados.
async fn run_torsiondrive_demo() {
    let td = TorsiondriveSpecification::new("torsiondrive",
                                            TorsiondriveKeywords::new(vec![[0, 1, 2, 3]], vec![90])
                                                .expect("keywords ok"),
                                            optimization_spec()).expect("td spec ok");
    let scheduler = Arc::new(InMemoryScheduler::new(default_registry().expect("registry ok")));
    let (_, ids) = scheduler.submit(SubmitRequest { specification: Specification::Torsiondrive(td),
                                                    molecules: vec![butane_fragment()],
                                                    tag: "demo".into(),
                                                    priority: Priority::Normal })
                            .expect("submit ok");
    let parent = ids[0];
    assert_eq!(scheduler.children_of(parent).len(), 4, "4 grid points at 90 degree spacing");

    // Dos managers compitiendo por los hijos del servicio
    let mut workers = Vec::new();
    for uuid in ["w1", "w2"] {
        let scheduler = Arc::clone(&scheduler);
        let manager = activate_demo_manager(&scheduler, uuid);
        workers.push(tokio::spawn(async move {
            loop {
                let tasks = scheduler.claim_tasks(&manager, 2).expect("claim ok");
                if tasks.is_empty() {
                    break;
                }
                for task in tasks {
                    scheduler.report_success(&manager, task.record_id, fake_result_for(&task)).expect("report ok");
                }
            }
        }));
    }
    for worker in workers {
        worker.await.expect("worker ok");
    }

    let record = scheduler.get_record(parent).expect("record ok");
    assert_eq!(record.status, RecordStatus::Complete);
    let output = record.output.expect("aggregated output");
    println!("[torsiondrive] final_energies = {}", output["final_energies"]);
    assert_eq!(output["final_energies"].as_object().expect("map").len(), 4);
}

/// Timeout de manager: las tasks reclamadas vuelven a la cola.
fn run_staleness_demo() {
    let config = SchedulerConfig { heartbeat_staleness_secs: 0, ..SchedulerConfig::from_env() };
    let scheduler = InMemoryScheduler::with_config(default_registry().expect("registry ok"), config);
    let manager = activate_demo_manager(&scheduler, "stale");

    let (_, ids) = scheduler.submit(SubmitRequest { specification: qc_energy_spec(),
                                                    molecules: vec![water()],
                                                    tag: "demo".into(),
                                                    priority: Priority::Normal })
                            .expect("submit ok");
    scheduler.claim_tasks(&manager, 1).expect("claim ok");
    assert_eq!(scheduler.get_record(ids[0]).expect("record ok").status, RecordStatus::Running);

    std::thread::sleep(std::time::Duration::from_millis(5));
    let released = scheduler.reclaim_stale();
    println!("[staleness] released {released} task(s) from {manager}");
    assert_eq!(released, 1);
    assert_eq!(scheduler.get_record(ids[0]).expect("record ok").status, RecordStatus::Waiting);

    // El manager caído ya no puede reclamar sin reactivarse
    assert!(scheduler.claim_tasks(&manager, 1).is_err());
    assert!(scheduler.manager_heartbeat(&manager, ResourceSnapshot::default()).is_err());
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    run_singlepoint_demo();
    run_optimization_demo();
    run_torsiondrive_demo().await;
    run_staleness_demo();

    // Query de cortesía sobre un scheduler fresco
    let scheduler = InMemoryScheduler::new(default_registry().expect("registry ok"));
    let (qmeta, _) = scheduler.query_records(RecordFilter::default()).expect("query ok");
    println!("records in a fresh scheduler: {}", qmeta.n_found);
    println!("all demos passed");
}
