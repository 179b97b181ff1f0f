mod proc;
mod table;

pub use proc::{confirm_dead, fetch_from_procfs};
pub use table::TaskTable;

use std::collections::HashMap;
use std::sync::RwLock;

pub const SIGNAL_SLOTS: usize = 17;

/// clone()/unshare() flag bits this system cares about. Subset of the
/// kernel's CLONE_* constants, named the same way for direct comparison
/// against decoded `clone_flags` arguments.
pub mod clone_flags {
    pub const CLONE_VM: u64 = 0x0000_0100;
    pub const CLONE_PTRACE: u64 = 0x0000_2000;
    pub const CLONE_PARENT: u64 = 0x0000_8000;
    pub const CLONE_THREAD: u64 = 0x0001_0000;
    pub const CLONE_NEWNS: u64 = 0x0002_0000;
    pub const CLONE_NEWUTS: u64 = 0x0400_0000;
    pub const CLONE_NEWPID: u64 = 0x2000_0000;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NamespaceKind {
    Mount,
    Pid,
    Uts,
}

/// PTRACE/PROC_VM_WRITEV operation classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceOp {
    Traceme,
    Attach,
    Detach,
    PokeText,
    Other,
}

#[derive(Debug, Clone)]
pub struct Tracee {
    pub pid: i32,
    pub operations: u32,
    pub last: TraceOp,
}

impl Tracee {
    pub fn new(pid: i32) -> Self {
        Self {
            pid,
            operations: 0,
            last: TraceOp::Other,
        }
    }

    pub fn record(&mut self, op: TraceOp) {
        self.operations |= 1 << (op as u32);
        self.last = op;
    }
}

/// Four credential strings captured from COMMIT_CREDS: uid, gid, euid, egid.
pub type Creds = [String; 4];

/// Sentinel `vpid` meaning "a new PID namespace was just created; the next
/// fork inside it becomes vpid 1".
pub const VPID_NEW_NS: i32 = -2;

#[derive(Debug, Clone)]
struct TaskInner {
    vpid: i32,
    comm: String,
    argv: Vec<String>,
    ppid: i32,
    cwd: String,
    flags: u64,
    signals: [bool; SIGNAL_SLOTS],
    tracer: i32,
    tracees: HashMap<i32, Tracee>,
    namespaces: HashMap<NamespaceKind, i64>,
    creds: Creds,
    score: u32,
    last_fork: i32,
    elf: Option<std::path::PathBuf>,
    from_procfs: bool,
}

impl Default for TaskInner {
    fn default() -> Self {
        Self {
            vpid: 0,
            comm: String::new(),
            argv: Vec::new(),
            ppid: 0,
            cwd: String::new(),
            flags: 0,
            signals: [false; SIGNAL_SLOTS],
            tracer: 0,
            tracees: HashMap::new(),
            namespaces: HashMap::new(),
            creds: Default::default(),
            score: 0,
            last_fork: 0,
            elf: None,
            from_procfs: false,
        }
    }
}

/// A snapshot of every Task field taken under a single read lock, so
/// composite read sites never observe a torn state across fields.
#[derive(Debug, Clone)]
pub struct TaskSnapshot {
    pub pid: i32,
    pub vpid: i32,
    pub comm: String,
    pub argv: Vec<String>,
    pub ppid: i32,
    pub cwd: String,
    pub flags: u64,
    pub tracer: i32,
    pub score: u32,
    pub from_procfs: bool,
    pub namespaces: HashMap<NamespaceKind, i64>,
}

/// Per-process state. All mutable fields live behind one `RwLock`; every
/// getter/setter and `snapshot()` takes that lock, so a composite
/// inspect-then-mutate operation holds the write lock for its duration
/// instead of racing across several per-field locks.
pub struct Task {
    pub pid: i32,
    inner: RwLock<TaskInner>,
}

impl Task {
    pub fn new(pid: i32) -> Self {
        Self {
            pid,
            inner: RwLock::new(TaskInner::default()),
        }
    }

    pub fn from_parent(pid: i32, parent: &TaskSnapshot, parent_creds: Creds) -> Self {
        let mut inner = TaskInner {
            comm: parent.comm.clone(),
            argv: parent.argv.clone(),
            cwd: parent.cwd.clone(),
            creds: parent_creds,
            score: parent.score,
            namespaces: parent.namespaces.clone(),
            ..TaskInner::default()
        };
        inner.vpid = pid;
        Self {
            pid,
            inner: RwLock::new(inner),
        }
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        let inner = self.inner.read().unwrap();
        TaskSnapshot {
            pid: self.pid,
            vpid: inner.vpid,
            comm: inner.comm.clone(),
            argv: inner.argv.clone(),
            ppid: inner.ppid,
            cwd: inner.cwd.clone(),
            flags: inner.flags,
            tracer: inner.tracer,
            score: inner.score,
            from_procfs: inner.from_procfs,
            namespaces: inner.namespaces.clone(),
        }
    }

    pub fn set_vpid(&self, vpid: i32) {
        self.inner.write().unwrap().vpid = vpid;
    }

    pub fn set_ppid(&self, ppid: i32) {
        self.inner.write().unwrap().ppid = ppid;
    }

    pub fn set_comm_and_argv(&self, comm: String, argv: Vec<String>) {
        let mut inner = self.inner.write().unwrap();
        inner.comm = comm;
        inner.argv = argv;
    }

    pub fn set_cwd(&self, cwd: String) {
        self.inner.write().unwrap().cwd = cwd;
    }

    pub fn cwd(&self) -> String {
        self.inner.read().unwrap().cwd.clone()
    }

    pub fn or_flags(&self, flags: u64) {
        self.inner.write().unwrap().flags |= flags;
    }

    pub fn flags(&self) -> u64 {
        self.inner.read().unwrap().flags
    }

    pub fn mark_procfs_origin(&self) {
        self.inner.write().unwrap().from_procfs = true;
    }

    pub fn is_thread(&self) -> bool {
        self.flags() & clone_flags::CLONE_VM != 0
    }

    pub fn set_tracer(&self, tracer: i32) {
        self.inner.write().unwrap().tracer = tracer;
    }

    pub fn tracer(&self) -> i32 {
        self.inner.read().unwrap().tracer
    }

    pub fn record_tracee_op(&self, tpid: i32, op: TraceOp) -> Tracee {
        let mut inner = self.inner.write().unwrap();
        let tracee = inner.tracees.entry(tpid).or_insert_with(|| Tracee::new(tpid));
        tracee.record(op);
        tracee.clone()
    }

    pub fn remove_tracee(&self, tpid: i32) {
        self.inner.write().unwrap().tracees.remove(&tpid);
    }

    pub fn get_tracee(&self, tpid: i32) -> Option<Tracee> {
        self.inner.read().unwrap().tracees.get(&tpid).cloned()
    }

    pub fn set_last_fork(&self, child_pid: i32) {
        self.inner.write().unwrap().last_fork = child_pid;
    }

    pub fn last_fork(&self) -> i32 {
        self.inner.read().unwrap().last_fork
    }

    pub fn set_namespace(&self, kind: NamespaceKind, id: i64) {
        self.inner.write().unwrap().namespaces.insert(kind, id);
    }

    pub fn namespace(&self, kind: NamespaceKind) -> Option<i64> {
        self.inner.read().unwrap().namespaces.get(&kind).copied()
    }

    pub fn set_creds(&self, creds: Creds) {
        self.inner.write().unwrap().creds = creds;
    }

    pub fn creds(&self) -> Creds {
        self.inner.read().unwrap().creds.clone()
    }

    /// Raise the danger score to at least `level`; scores never decrease
    /// except via an explicit `reset_score`.
    pub fn raise_score(&self, level: u32) {
        let mut inner = self.inner.write().unwrap();
        if level > inner.score {
            inner.score = level;
        }
    }

    pub fn reset_score(&self) {
        self.inner.write().unwrap().score = 0;
    }

    pub fn score(&self) -> u32 {
        self.inner.read().unwrap().score
    }

    pub fn has_signal(&self, sig: usize) -> bool {
        if sig >= SIGNAL_SLOTS {
            return false;
        }
        self.inner.read().unwrap().signals[sig]
    }

    pub fn install_signal(&self, sig: usize) -> bool {
        if sig >= SIGNAL_SLOTS {
            return false;
        }
        let mut inner = self.inner.write().unwrap();
        if inner.signals[sig] {
            return false;
        }
        inner.signals[sig] = true;
        true
    }

    pub fn set_elf(&self, path: Option<std::path::PathBuf>) {
        self.inner.write().unwrap().elf = path;
    }

    pub fn elf(&self) -> Option<std::path::PathBuf> {
        self.inner.read().unwrap().elf.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_is_monotone_until_explicit_reset() {
        let t = Task::new(1);
        t.raise_score(3);
        t.raise_score(1);
        assert_eq!(t.score(), 3);
        t.reset_score();
        assert_eq!(t.score(), 0);
    }

    #[test]
    fn signal_installed_once() {
        let t = Task::new(1);
        assert!(t.install_signal(5));
        assert!(!t.install_signal(5));
        assert!(t.has_signal(5));
    }

    #[test]
    fn snapshot_is_consistent() {
        let t = Task::new(1);
        t.set_comm_and_argv("/bin/sh".into(), vec!["/bin/sh".into()]);
        t.set_ppid(42);
        let snap = t.snapshot();
        assert_eq!(snap.comm, "/bin/sh");
        assert_eq!(snap.ppid, 42);
    }
}
