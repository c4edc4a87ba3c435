//! Cola de tasks: proyección ejecutable de los records runnables.
//!
//! La cola no decide transiciones de estado; sólo selecciona y ordena
//! candidatos. El claim real lo arbitra `RecordStore::try_transition` (el
//! guard condicional), de modo que la cola puede leerse de forma optimista.

use std::cmp::Reverse;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::model::{Manager, RecordId, Task};

#[derive(Default)]
pub struct TaskQueue {
    tasks: DashMap<RecordId, Task>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn insert(&self, task: Task) {
        self.tasks.insert(task.record_id, task);
    }

    pub fn get(&self, id: RecordId) -> Option<Task> {
        self.tasks.get(&id).map(|t| t.clone())
    }

    pub fn remove(&self, id: RecordId) -> Option<Task> {
        self.tasks.remove(&id).map(|(_, t)| t)
    }

    /// Ids de tasks sin reclamar que este manager puede ejecutar, en orden de
    /// claim: prioridad descendente, luego antigüedad, luego id (desempate
    /// determinista).
    pub fn candidates_for(&self, manager: &Manager) -> Vec<RecordId> {
        let mut candidates: Vec<(Reverse<crate::model::Priority>, DateTime<Utc>, RecordId)> = self
            .tasks
            .iter()
            .filter(|t| t.claimed_by.is_none() && manager.accepts(&t.tag, &t.program))
            .map(|t| (Reverse(t.priority), t.created_on, t.record_id))
            .collect();
        candidates.sort();
        candidates.into_iter().map(|(_, _, id)| id).collect()
    }

    /// Anota el dueño tras un claim exitoso (el guard ya lo arbitró).
    pub fn mark_claimed(&self, id: RecordId, manager: &str) -> Option<Task> {
        let mut task = self.tasks.get_mut(&id)?;
        task.claimed_by = Some(manager.to_string());
        task.claimed_on = Some(Utc::now());
        Some(task.clone())
    }

    /// Libera el claim (re-encolado tras timeout del manager).
    pub fn release(&self, id: RecordId) {
        if let Some(mut task) = self.tasks.get_mut(&id) {
            task.claimed_by = None;
            task.claimed_on = None;
        }
    }

    pub fn claimed_by(&self, manager: &str) -> Vec<RecordId> {
        self.tasks
            .iter()
            .filter(|t| t.claimed_by.as_deref() == Some(manager))
            .map(|t| t.record_id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ManagerName, ManagerStatus, Priority, ResourceSnapshot, TaskSpec};
    use chrono::Duration;
    use indexmap::IndexMap;
    use uuid::Uuid;

    fn task(priority: Priority, age_secs: i64, tag: &str) -> Task {
        Task { record_id: Uuid::new_v4(),
               spec: TaskSpec { function: "noop".to_string(), args: vec![], kwargs: IndexMap::new() },
               program: "psi4".to_string(),
               tag: tag.to_string(),
               priority,
               created_on: Utc::now() - Duration::seconds(age_secs),
               claimed_by: None,
               claimed_on: None }
    }

    fn manager(tags: &[&str]) -> Manager {
        let name_data = ManagerName::new("c", "h", "u");
        Manager { name: name_data.fullname(),
                  name_data,
                  status: ManagerStatus::Active,
                  programs: vec!["psi4".to_string()],
                  tags: tags.iter().map(|t| t.to_string()).collect(),
                  resources: ResourceSnapshot::default(),
                  claimed: 0,
                  created_on: Utc::now(),
                  modified_on: Utc::now() }
    }

    #[test]
    fn candidates_ordered_priority_then_age() {
        let queue = TaskQueue::new();
        let old_normal = task(Priority::Normal, 60, "compute");
        let new_normal = task(Priority::Normal, 1, "compute");
        let high = task(Priority::High, 1, "compute");
        let (a, b, c) = (old_normal.record_id, new_normal.record_id, high.record_id);
        queue.insert(new_normal);
        queue.insert(old_normal);
        queue.insert(high);
        let order = queue.candidates_for(&manager(&["compute"]));
        assert_eq!(order, vec![c, a, b], "high primero, luego FIFO dentro de la banda");
    }

    #[test]
    fn candidates_respect_tags_and_wildcard() {
        let queue = TaskQueue::new();
        let tagged = task(Priority::Normal, 1, "special");
        let id = tagged.record_id;
        queue.insert(tagged);
        assert!(queue.candidates_for(&manager(&["compute"])).is_empty());
        assert_eq!(queue.candidates_for(&manager(&["*"])), vec![id]);
    }

    #[test]
    fn claimed_tasks_are_not_candidates() {
        let queue = TaskQueue::new();
        let t = task(Priority::Normal, 1, "compute");
        let id = t.record_id;
        queue.insert(t);
        queue.mark_claimed(id, "mgr-a").expect("claim");
        assert!(queue.candidates_for(&manager(&["compute"])).is_empty());
        assert_eq!(queue.claimed_by("mgr-a"), vec![id]);
        queue.release(id);
        assert_eq!(queue.candidates_for(&manager(&["compute"])), vec![id]);
    }
}
