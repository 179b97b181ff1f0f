//! Per-event handler bodies. Each returns the IoC its threat analyzer (if
//! any) should consume, or `None` when the event only updates state.

use super::context::EventContext;
use crate::elf::Elf;
use crate::error::EngineError;
use crate::event::{Event, Ioc};
use crate::task::{clone_flags, NamespaceKind, Task, TraceOp, VPID_NEW_NS};

fn parse_arg<T: std::str::FromStr>(event: &Event, idx: usize, what: &str) -> Result<T, EngineError> {
    event
        .args
        .get(idx)
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| EngineError::HandlerError(format!("{} missing or unparseable arg {idx}", what)))
}

async fn switch_namespace(task: &std::sync::Arc<Task>, flags: u64, store: &crate::store::Store) {
    if flags & clone_flags::CLONE_NEWNS != 0 {
        if let Ok(id) = store.namespace_new("mount", "/").await {
            task.set_namespace(NamespaceKind::Mount, id);
        }
    }
    if flags & clone_flags::CLONE_NEWUTS != 0 {
        if let Ok(id) = store.namespace_new("uts", "").await {
            task.set_namespace(NamespaceKind::Uts, id);
        }
    }
    if flags & clone_flags::CLONE_NEWPID != 0 {
        if let Ok(id) = store.namespace_new("pid", "").await {
            task.set_namespace(NamespaceKind::Pid, id);
        }
    }
}

async fn mount_ns_root(ctx: &EventContext<'_>, task: &std::sync::Arc<Task>) -> Option<String> {
    let id = task.namespace(NamespaceKind::Mount)?;
    let (_, data) = ctx.store.namespace_get(id).await.ok()??;
    if data.is_empty() {
        None
    } else {
        Some(data)
    }
}

pub async fn task_newtask(ctx: &EventContext<'_>, event: &Event) -> Result<Option<Ioc>, EngineError> {
    let child_pid: i32 = parse_arg(event, 0, "task_newtask")?;
    let flags: u64 = event.args.get(1).and_then(|s| s.parse().ok()).unwrap_or(0);

    let parent_snapshot = ctx.task.snapshot();
    let child = Task::from_parent(child_pid, &parent_snapshot, ctx.task.creds());
    child.or_flags(flags);
    let child = ctx.tasks.insert(child);
    switch_namespace(&child, flags, ctx.store).await;
    ctx.task.set_last_fork(child_pid);
    Ok(None)
}

pub async fn fork(ctx: &EventContext<'_>, event: &Event) -> Result<Option<Ioc>, EngineError> {
    let ret = event.ret_code().unwrap_or(-1);
    let child_pid = ctx.task.last_fork();
    if child_pid == 0 {
        return Ok(None);
    }
    let Some(child) = ctx.tasks.get(child_pid) else {
        return Ok(None);
    };
    if ret < 0 {
        ctx.tasks.delete(child_pid);
        return Ok(None);
    }

    let parent_snapshot = ctx.task.snapshot();
    let flags = child.flags();
    let vpid = if flags & clone_flags::CLONE_NEWPID != 0 || parent_snapshot.vpid == VPID_NEW_NS {
        1
    } else {
        ret as i32
    };
    child.set_vpid(vpid);

    if flags & (clone_flags::CLONE_PARENT | clone_flags::CLONE_THREAD) != 0 {
        child.set_ppid(parent_snapshot.ppid);
    } else {
        child.set_ppid(ctx.task.pid);
    }
    if flags & clone_flags::CLONE_PTRACE != 0 && parent_snapshot.tracer != 0 {
        child.set_tracer(parent_snapshot.tracer);
    }
    Ok(None)
}

pub async fn exit(ctx: &EventContext<'_>, event: &Event) -> Result<Option<Ioc>, EngineError> {
    let dead = ctx.task.is_thread() || crate::task::confirm_dead(event.pid).await;
    if dead {
        let _ = ctx.store.fd_delete_all(event.pid).await;
        ctx.tasks.delete(event.pid);
    }
    Ok(None)
}

async fn resolve_argv0_and_open_elf(
    ctx: &EventContext<'_>,
    task: &std::sync::Arc<Task>,
    candidate: &str,
) -> Option<(String, Elf)> {
    let cwd = task.cwd();
    let ns_root = mount_ns_root(ctx, task).await;
    let resolved = crate::elf::path::resolve_in_namespace(candidate, &cwd, ns_root.as_deref());
    if let Ok(elf) = Elf::open(&resolved, ctx.files_dir) {
        return Some((resolved.to_string_lossy().into_owned(), elf));
    }

    // Path resolution against the decoded args didn't yield a readable ELF:
    // fall back to procfs's own view of the executable.
    let proc_task = crate::task::fetch_from_procfs(task.pid)?;
    let exe_path = proc_task.snapshot().comm;
    if exe_path.is_empty() {
        return None;
    }
    let exe_path_buf = std::path::PathBuf::from(&exe_path);
    Elf::open(&exe_path_buf, ctx.files_dir)
        .ok()
        .map(|elf| (exe_path, elf))
}

pub async fn execve(ctx: &EventContext<'_>, event: &Event) -> Result<Option<Ioc>, EngineError> {
    let rc = event.ret_code().unwrap_or(-1);
    if rc != 0 {
        return Ok(None);
    }
    let filename = event.args.first().cloned().unwrap_or_else(|| event.comm.clone());
    let argv0 = event.args.get(1).cloned().unwrap_or_else(|| filename.clone());

    if let Some((resolved_path, elf)) = resolve_argv0_and_open_elf(ctx, &ctx.task, &filename).await {
        ctx.task.set_comm_and_argv(argv0, event.args.clone());
        ctx.task.set_elf(Some(elf.temp_path.clone()));
        return Ok(Some(Ioc::Elf(std::path::PathBuf::from(resolved_path))));
    }
    ctx.task.set_comm_and_argv(argv0, event.args.clone());
    Ok(None)
}

pub async fn sched_process_exec(ctx: &EventContext<'_>, event: &Event) -> Result<Option<Ioc>, EngineError> {
    let old_pid: i32 = event.args.first().and_then(|s| s.parse().ok()).unwrap_or(event.pid);
    if old_pid != event.pid {
        if let Some(old_task) = ctx.tasks.get(old_pid) {
            let _ = old_task;
            ctx.tasks.delete(old_pid);
        }
    }

    let filename = event.args.get(1).cloned().unwrap_or_else(|| event.comm.clone());
    if let Some((resolved_path, elf)) = resolve_argv0_and_open_elf(ctx, &ctx.task, &filename).await {
        ctx.task.set_comm_and_argv(filename.clone(), event.args.clone());
        ctx.task.set_elf(Some(elf.temp_path.clone()));
        return Ok(Some(Ioc::Elf(std::path::PathBuf::from(resolved_path))));
    }
    // argv[0] could not be resolved by any method: fall back to comm, never
    // leave it blank.
    ctx.task.set_comm_and_argv(event.comm.clone(), event.args.clone());
    Ok(None)
}

pub async fn unshare(ctx: &EventContext<'_>, event: &Event) -> Result<Option<Ioc>, EngineError> {
    let rc = event.ret_code().unwrap_or(-1);
    if rc != 0 {
        return Ok(None);
    }
    let flags: u64 = parse_arg(event, 0, "UNSHARE")?;
    if flags & clone_flags::CLONE_NEWPID != 0 {
        ctx.task.set_vpid(VPID_NEW_NS);
    }
    switch_namespace(&ctx.task, flags, ctx.store).await;
    ctx.task.or_flags(flags);
    Ok(None)
}

pub async fn setns(_ctx: &EventContext<'_>, event: &Event) -> Result<Option<Ioc>, EngineError> {
    let rc = event.ret_code().unwrap_or(-1);
    if rc != 0 {
        return Ok(None);
    }
    // Flags aren't in the SETNS probe's register template (it reads an fd
    // and nstype, not a clone-style bitmask); nothing to OR into the task.
    Ok(None)
}

pub async fn sethostname(ctx: &EventContext<'_>, event: &Event) -> Result<Option<Ioc>, EngineError> {
    let rc = event.ret_code().unwrap_or(-1);
    if rc != 0 {
        return Ok(None);
    }
    let Some(name) = event.args.first() else {
        return Ok(None);
    };
    if let Some(id) = ctx.task.namespace(NamespaceKind::Uts) {
        let _ = ctx.store.namespace_update(id, name).await;
    }
    Ok(None)
}

pub async fn commit_creds(ctx: &EventContext<'_>, event: &Event) -> Result<Option<Ioc>, EngineError> {
    if event.args.len() < 4 {
        return Err(EngineError::HandlerError("COMMIT_CREDS expects 4 credential fields".into()));
    }
    let creds: [String; 4] = [
        event.args[0].clone(),
        event.args[1].clone(),
        event.args[2].clone(),
        event.args[3].clone(),
    ];
    ctx.task.set_creds(creds);
    Ok(None)
}

fn classify_trace_op(request: i64) -> TraceOp {
    match request {
        0 => TraceOp::Traceme,
        16 | 0x4206 => TraceOp::Attach,
        17 => TraceOp::Detach,
        4 | 5 => TraceOp::PokeText,
        _ => TraceOp::Other,
    }
}

pub async fn ptrace(ctx: &EventContext<'_>, event: &Event) -> Result<Option<Ioc>, EngineError> {
    let rc = event.ret_code().unwrap_or(-1);
    if rc != 0 {
        return Ok(None);
    }
    let request: i64 = parse_arg(event, 0, "PTRACE")?;
    let target_pid: i32 = event.args.get(1).and_then(|s| s.parse().ok()).unwrap_or(event.pid);
    let op = classify_trace_op(request);

    if op == TraceOp::Traceme {
        let ppid = ctx.task.snapshot().ppid;
        ctx.task.set_tracer(ppid);
    } else if let Some(target) = ctx.tasks.get(target_pid) {
        target.set_tracer(ctx.task.pid);
    }

    let already_recorded = ctx
        .task
        .get_tracee(target_pid)
        .map(|t| t.last == op)
        .unwrap_or(false);
    if op == TraceOp::PokeText && already_recorded {
        return Ok(None);
    }
    let tracee = ctx.task.record_tracee_op(target_pid, op);
    Ok(Some(Ioc::Tracee(tracee)))
}

pub async fn proc_vm_writev(ctx: &EventContext<'_>, event: &Event) -> Result<Option<Ioc>, EngineError> {
    let rc = event.ret_code().unwrap_or(-1);
    if rc != 0 {
        return Ok(None);
    }
    let target_pid: i32 = parse_arg(event, 0, "PROC_VM_WRITERV")?;
    if let Some(target) = ctx.tasks.get(target_pid) {
        target.set_tracer(ctx.task.pid);
    }
    let already_recorded = ctx
        .task
        .get_tracee(target_pid)
        .map(|t| t.last == TraceOp::PokeText)
        .unwrap_or(false);
    if already_recorded {
        return Ok(None);
    }
    let tracee = ctx.task.record_tracee_op(target_pid, TraceOp::PokeText);
    Ok(Some(Ioc::Tracee(tracee)))
}

pub async fn sigaction(_ctx: &EventContext<'_>, event: &Event) -> Result<Option<Ioc>, EngineError> {
    let rc = event.ret_code().unwrap_or(-1);
    if rc != 0 {
        return Ok(None);
    }
    let signum: i64 = parse_arg(event, 0, "SIGACTION")?;
    if !(0..17).contains(&signum) {
        return Ok(None);
    }
    // SIG_DFL/SIG_IGN are represented as a single-character sentinel by the
    // decoder; any other handler representation is considered "installed".
    let is_default_or_ignored = event
        .args
        .get(1)
        .map(|v| v.len() == 1)
        .unwrap_or(true);
    if is_default_or_ignored {
        return Ok(None);
    }
    if !_ctx.task.install_signal(signum as usize) {
        return Ok(None);
    }
    Ok(Some(Ioc::Signal(signum as u32)))
}

pub async fn open(ctx: &EventContext<'_>, event: &Event) -> Result<Option<Ioc>, EngineError> {
    let fd = event.ret_code().unwrap_or(-1);
    if fd < 0 {
        return Ok(None);
    }
    let Some(path) = event.args.first() else {
        return Ok(None);
    };
    if !crate::elf::path::valid_extension(path) && !ctx.store.executable_exists(path).await.unwrap_or(false) {
        return Ok(None);
    }
    let _ = ctx.store.fd_insert(fd as i32, event.pid, path).await;
    Ok(None)
}

pub async fn close(ctx: &EventContext<'_>, event: &Event) -> Result<Option<Ioc>, EngineError> {
    let rc = event.ret_code().unwrap_or(-1);
    if rc != 0 {
        return Ok(None);
    }
    let Some(fd): Option<i32> = event.args.first().and_then(|s| s.parse().ok()) else {
        return Ok(None);
    };
    let Some(path) = ctx.store.fd_get_path(fd, event.pid).await.unwrap_or(None) else {
        return Ok(None);
    };
    let _ = ctx.store.fd_delete(fd, event.pid).await;
    match Elf::open(std::path::Path::new(&path), ctx.files_dir) {
        Ok(elf) => {
            let p = elf.real_path.clone();
            elf.close();
            Ok(Some(Ioc::Elf(p)))
        }
        Err(_) => Ok(None),
    }
}

pub async fn unlink(ctx: &EventContext<'_>, event: &Event) -> Result<Option<Ioc>, EngineError> {
    let rc = event.ret_code().unwrap_or(-1);
    if rc != 0 {
        return Ok(None);
    }
    let Some(path) = event.args.first() else {
        return Ok(None);
    };
    let cwd = ctx.task.cwd();
    let ns_root = mount_ns_root(ctx, &ctx.task).await;
    let resolved = crate::elf::path::resolve_in_namespace(path, &cwd, ns_root.as_deref());
    let resolved_str = resolved.to_string_lossy().into_owned();
    if !ctx.store.executable_exists(&resolved_str).await.unwrap_or(false) {
        return Ok(None);
    }
    let _ = ctx.store.delete_executable(&resolved_str).await;
    Ok(Some(Ioc::Path(resolved_str)))
}

pub async fn rename(ctx: &EventContext<'_>, event: &Event) -> Result<Option<Ioc>, EngineError> {
    let rc = event.ret_code().unwrap_or(-1);
    if rc != 0 {
        return Ok(None);
    }
    let Some(old_path) = event.args.first() else {
        return Ok(None);
    };
    let Some(new_path) = event.args.get(1) else {
        return Ok(None);
    };

    let old_monitored = ctx.store.executable_exists(old_path).await.unwrap_or(false);
    let new_monitored = ctx.store.executable_exists(new_path).await.unwrap_or(false);
    if !old_monitored && !new_monitored {
        return Ok(None);
    }
    if old_monitored {
        let _ = ctx.store.delete_executable(old_path).await;
    }
    match Elf::open(std::path::Path::new(new_path), ctx.files_dir) {
        Ok(elf) => {
            let p = elf.real_path.clone();
            elf.close();
            Ok(Some(Ioc::Elf(p)))
        }
        Err(_) => Ok(None),
    }
}

pub async fn chdir(ctx: &EventContext<'_>, event: &Event) -> Result<Option<Ioc>, EngineError> {
    let rc = event.ret_code().unwrap_or(-1);
    if rc != 0 {
        return Ok(None);
    }
    let Some(path) = event.args.first() else {
        return Ok(None);
    };
    let cwd = ctx.task.cwd();
    let ns_root = mount_ns_root(ctx, &ctx.task).await;
    let resolved = crate::elf::path::resolve_in_namespace(path, &cwd, ns_root.as_deref());
    ctx.task.set_cwd(resolved.to_string_lossy().into_owned());
    Ok(None)
}

const MS_BIND: i64 = 4096;

pub async fn mount(ctx: &EventContext<'_>, event: &Event) -> Result<Option<Ioc>, EngineError> {
    let rc = event.ret_code().unwrap_or(-1);
    if rc != 0 {
        return Ok(None);
    }
    let Some(source) = event.args.first() else {
        return Ok(None);
    };
    let flags: i64 = event.args.get(2).and_then(|s| s.parse().ok()).unwrap_or(0);
    if flags & MS_BIND == 0 {
        return Ok(None);
    }
    let Some(id) = ctx.task.namespace(NamespaceKind::Mount) else {
        return Ok(None);
    };
    if !std::path::Path::new(source).is_dir() {
        return Ok(None);
    }
    let _ = ctx.store.namespace_update(id, source).await;
    ctx.task.set_cwd(source.clone());
    Ok(None)
}
