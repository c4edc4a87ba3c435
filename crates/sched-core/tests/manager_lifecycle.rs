//! Ciclo de vida de managers y recuperación de sus tasks.

use serde_json::json;

use sched_adapters::default_registry;
use sched_core::{
    CoreError, InMemoryScheduler, ManagerName, ManagerStatus, Priority, RecordStatus, ResourceSnapshot,
    SchedulerConfig, SubmitRequest,
};
use sched_domain::{Molecule, QcSpecification, SinglepointDriver, Specification};

fn scheduler_with(config: SchedulerConfig) -> InMemoryScheduler {
    InMemoryScheduler::with_config(default_registry().expect("registry"), config)
}

fn submit_one(s: &InMemoryScheduler, bond: f64) -> sched_core::RecordId {
    let spec = Specification::Singlepoint(QcSpecification::new("psi4", SinglepointDriver::Energy, "b3lyp", None,
                                                               json!({})).expect("spec"));
    let molecule = Molecule::neutral(vec!["H".into(), "H".into()], vec![0.0, 0.0, 0.0, 0.0, 0.0, bond])
        .expect("molecule");
    let (_, ids) = s.submit(SubmitRequest { specification: spec,
                                            molecules: vec![molecule],
                                            tag: "compute".into(),
                                            priority: Priority::Normal })
                    .expect("submit");
    ids[0]
}

fn activate(s: &InMemoryScheduler, uuid: &str) -> String {
    s.activate_manager(ManagerName::new("cluster", "node", uuid), vec!["psi4".into()], vec!["*".into()])
     .expect("activation")
}

#[test]
fn claim_requires_an_active_manager() {
    let s = scheduler_with(SchedulerConfig::default());
    submit_one(&s, 1.4);
    assert!(matches!(s.claim_tasks("ghost", 1), Err(CoreError::NotFound(_))));

    let manager = activate(&s, "m1");
    s.deactivate_manager(&manager, ResourceSnapshot::default()).expect("deactivate");
    assert!(matches!(s.claim_tasks(&manager, 1), Err(CoreError::InactiveManager(_))));
}

#[test]
fn heartbeat_updates_resources_and_keeps_manager_alive() {
    let s = scheduler_with(SchedulerConfig { heartbeat_staleness_secs: 3600, ..SchedulerConfig::default() });
    let manager = activate(&s, "m1");
    s.manager_heartbeat(&manager, ResourceSnapshot { active_tasks: 3,
                                                     active_cores: 12,
                                                     active_memory: 32.0,
                                                     total_worker_walltime: 100.0,
                                                     total_task_walltime: 80.0 })
     .expect("heartbeat");
    let stored = s.get_manager(&manager).expect("manager");
    assert_eq!(stored.status, ManagerStatus::Active);
    assert_eq!(stored.resources.active_cores, 12);
    assert_eq!(s.reclaim_stale(), 0, "fresh heartbeat, nothing to reclaim");
}

#[test]
fn deactivation_releases_claimed_tasks_immediately() {
    let s = scheduler_with(SchedulerConfig::default());
    let manager = activate(&s, "m1");
    let id = submit_one(&s, 1.4);
    s.claim_tasks(&manager, 1).expect("claim");

    s.deactivate_manager(&manager, ResourceSnapshot::default()).expect("deactivate");
    let record = s.get_record(id).expect("record");
    assert_eq!(record.status, RecordStatus::Waiting, "requeued without waiting for the sweep");
    assert_eq!(record.manager_name, None);

    // otro manager puede reclamarla ya mismo
    let other = activate(&s, "m2");
    let tasks = s.claim_tasks(&other, 1).expect("claim");
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].record_id, id);
}

#[test]
fn stale_manager_is_swept_and_task_requeued() {
    let s = scheduler_with(SchedulerConfig { heartbeat_staleness_secs: 0, ..SchedulerConfig::default() });
    let manager = activate(&s, "m1");
    let id = submit_one(&s, 1.4);
    s.claim_tasks(&manager, 1).expect("claim");

    std::thread::sleep(std::time::Duration::from_millis(5));
    assert_eq!(s.reclaim_stale(), 1);
    assert_eq!(s.get_manager(&manager).expect("manager").status, ManagerStatus::Inactive);
    assert_eq!(s.get_record(id).expect("record").status, RecordStatus::Waiting);
    // el heartbeat tardío del manager barrido se rechaza
    assert!(matches!(s.manager_heartbeat(&manager, ResourceSnapshot::default()),
                     Err(CoreError::InactiveManager(_))));
}

#[test]
fn retry_budget_exhaustion_marks_record_error() {
    let s = scheduler_with(SchedulerConfig { heartbeat_staleness_secs: 0,
                                             task_retry_limit: 2,
                                             ..SchedulerConfig::default() });
    let id = submit_one(&s, 1.4);

    for round in 0..2 {
        let manager = activate(&s, &format!("m{round}"));
        let tasks = s.claim_tasks(&manager, 1).expect("claim");
        assert_eq!(tasks.len(), 1, "round {round} should find the task requeued");
        std::thread::sleep(std::time::Duration::from_millis(5));
        s.reclaim_stale();
    }

    let record = s.get_record(id).expect("record");
    assert_eq!(record.status, RecordStatus::Error, "budget of 2 claims exhausted");
    assert_eq!(record.error.expect("error")["error_type"], json!("manager_lost"));
    assert!(s.get_task(id).is_none());
}

#[test]
fn late_report_from_a_lost_manager_cannot_close_a_reclaimed_record() {
    let s = scheduler_with(SchedulerConfig::default());
    let first = activate(&s, "m1");
    let id = submit_one(&s, 1.4);
    s.claim_tasks(&first, 1).expect("claim");

    // la task se recupera y cambia de manos
    s.deactivate_manager(&first, ResourceSnapshot::default()).expect("deactivate");
    let second = activate(&s, "m2");
    assert_eq!(s.claim_tasks(&second, 1).expect("claim").len(), 1);

    // el reporte en vuelo del primer manager llega tarde: descartado entero
    let err = s.report_success(&first, id, json!({"return_result": 0.0, "properties": {}}));
    assert!(matches!(err, Err(CoreError::Conflict(_))));
    let record = s.get_record(id).expect("record");
    assert_eq!(record.status, RecordStatus::Running);
    assert_eq!(record.manager_name.as_deref(), Some(second.as_str()));
    assert!(record.output.is_none());

    // el dueño vigente cierra con normalidad
    s.report_success(&second, id, json!({"return_result": -1.17, "properties": {}})).expect("report");
    let record = s.get_record(id).expect("record");
    assert_eq!(record.status, RecordStatus::Complete);
    assert_eq!(record.output.expect("output")["return_result"], json!(-1.17));
}

#[test]
fn reactivation_starts_a_fresh_claim_counter() {
    let s = scheduler_with(SchedulerConfig::default());
    let manager = activate(&s, "m1");
    submit_one(&s, 1.4);
    s.claim_tasks(&manager, 1).expect("claim");
    assert_eq!(s.get_manager(&manager).expect("manager").claimed, 1);

    s.deactivate_manager(&manager, ResourceSnapshot::default()).expect("deactivate");
    let again = activate(&s, "m1");
    assert_eq!(again, manager, "same fullname token");
    assert_eq!(s.get_manager(&again).expect("manager").claimed, 0);
}
