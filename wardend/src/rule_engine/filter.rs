use crate::event::Event;
use crate::task::TaskSnapshot;
use std::path::Path;

/// Pre-dispatch drop rules: pid 1 noise, the daemon's own events (it runs
/// under the same kernel it watches), and procfs-synthesized tasks whose
/// parent is pid 2 (`kthreadd`) — those are reparented zombies of interest
/// only when a fresh FORK actually ties them into the live process tree.
pub fn should_drop(event: &Event, task: &TaskSnapshot, self_exe: &Path) -> bool {
    if event.pid == 1 {
        return true;
    }
    if !task.comm.is_empty() && task.comm == self_exe.to_string_lossy() {
        return true;
    }
    if task.from_procfs && task.ppid == 2 && !event.function.contains("FORK") {
        return true;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn snap(comm: &str, ppid: i32, from_procfs: bool) -> TaskSnapshot {
        TaskSnapshot {
            pid: 10,
            vpid: 10,
            comm: comm.to_string(),
            argv: vec![],
            ppid,
            cwd: "/".into(),
            flags: 0,
            tracer: 0,
            score: 0,
            from_procfs,
            namespaces: std::collections::HashMap::new(),
        }
    }

    fn ev(pid: i32, function: &str) -> Event {
        Event {
            comm: "x".into(),
            pid,
            function: function.into(),
            args: vec![],
            ret_value: vec![],
        }
    }

    #[test]
    fn drops_pid_one() {
        assert!(should_drop(&ev(1, "OPEN"), &snap("init", 0, false), &PathBuf::from("/usr/bin/wardend")));
    }

    #[test]
    fn drops_self_events() {
        let path = PathBuf::from("/usr/bin/wardend");
        let task = snap(path.to_str().unwrap(), 5, false);
        assert!(should_drop(&ev(10, "OPEN"), &task, &path));
    }

    #[test]
    fn drops_procfs_kthreadd_children_except_fork() {
        let task = snap("worker", 2, true);
        let path = PathBuf::from("/usr/bin/wardend");
        assert!(should_drop(&ev(10, "OPEN"), &task, &path));
        assert!(!should_drop(&ev(10, "FORK"), &task, &path));
    }
}
