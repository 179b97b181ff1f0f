use super::proc::fetch_from_procfs;
use super::Task;
use dashmap::DashMap;
use std::sync::Arc;

/// Concurrent PID -> Task map. `dashmap` shards internally, giving the
/// reduced-contention behavior the design calls for without hand-rolling
/// a sharded RwLock<HashMap> the way the per-field-locking predecessor did.
pub struct TaskTable {
    tasks: DashMap<i32, Arc<Task>>,
}

impl Default for TaskTable {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskTable {
    pub fn new() -> Self {
        Self {
            tasks: DashMap::new(),
        }
    }

    pub fn insert(&self, task: Task) -> Arc<Task> {
        let arc = Arc::new(task);
        self.tasks.insert(arc.pid, arc.clone());
        arc
    }

    pub fn get(&self, pid: i32) -> Option<Arc<Task>> {
        self.tasks.get(&pid).map(|e| e.value().clone())
    }

    pub fn delete(&self, pid: i32) {
        self.tasks.remove(&pid);
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Look up a task; on miss, synthesize one from procfs (`Fetch` in the
    /// original design). The synthesized task is marked `from_procfs` so
    /// the rule-engine filter can suppress its pre-existing-process noise.
    pub fn get_or_fetch(&self, pid: i32) -> Option<Arc<Task>> {
        if let Some(t) = self.get(pid) {
            return Some(t);
        }
        let task = fetch_from_procfs(pid)?;
        task.mark_procfs_origin();
        Some(self.insert(task))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_get() {
        let table = TaskTable::new();
        table.insert(Task::new(10));
        assert!(table.get(10).is_some());
        assert!(table.get(11).is_none());
    }

    #[test]
    fn delete_removes() {
        let table = TaskTable::new();
        table.insert(Task::new(10));
        table.delete(10);
        assert!(table.get(10).is_none());
    }
}
