use super::Task;
use procfs::process::Process;

/// Synthesize a `Task` from `/proc/<pid>/{stat,status,cwd,cmdline,exe}` on a
/// TaskTable miss. Returns `None` if the process has already gone (raced
/// with its own exit before we could read procfs).
pub fn fetch_from_procfs(pid: i32) -> Option<Task> {
    let proc = Process::new(pid).ok()?;
    let stat = proc.stat().ok()?;
    let task = Task::new(pid);
    task.set_ppid(stat.ppid);
    task.set_vpid(pid);

    let exe = proc
        .exe()
        .ok()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|| stat.comm.clone());
    let cmdline = proc.cmdline().unwrap_or_default();
    let argv = if cmdline.is_empty() {
        vec![exe.clone()]
    } else {
        cmdline
    };
    task.set_comm_and_argv(exe, argv);

    if let Ok(cwd) = proc.cwd() {
        task.set_cwd(cwd.to_string_lossy().into_owned());
    }

    Some(task)
}

/// Sample `/proc/<pid>/stat` three times 100ms apart to confirm a task is
/// truly gone before evicting it (`IsDead` in the original design). This is
/// async so the caller can run it from a tokio task without blocking a
/// worker thread on real sleeps.
pub async fn confirm_dead(pid: i32) -> bool {
    for _ in 0..3 {
        if let Ok(proc) = Process::new(pid) {
            if let Ok(stat) = proc.stat() {
                if !matches!(stat.state, 'X' | 'Z') {
                    return false;
                }
            }
        } else {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
    true
}
