pub mod catalog;
pub mod detectors;

pub use catalog::{Level, Technique, ThreatCategory};
pub use detectors::Threat;

use crate::elf::Elf;
use crate::event::Ioc;
use crate::store::Store;
use crate::task::{Task, TaskTable};
use crate::yara_scan::YaraScanner;
use std::sync::Arc;

/// Runs on EXECVE (and CLOSE/RENAME of a monitored file): the three
/// concurrent ELF-analysis detectors, joined before the triggering ELF
/// snapshot is closed.
pub async fn execve_analysis(
    task: &Arc<Task>,
    elf: &Elf,
    store: &Store,
) -> Vec<Threat> {
    let mut out = Vec::new();
    let snap = task.snapshot();

    if let Some(t) = detectors::detect_masquerading(&snap.comm, snap.ppid) {
        out.push(t);
    }

    let parsed = match elf.parse() {
        Ok(p) => p,
        Err(_) => return out,
    };

    let (pack, pack_dangerous) = detectors::detect_binary_packing(&parsed, &elf.bytes, &elf.real_path);
    let (parasite, parasite_dangerous) =
        detectors::detect_binary_parasite(&parsed, &elf.bytes, &elf.real_path);

    for t in [pack, parasite].into_iter().flatten() {
        task.raise_score(t.level.as_u32());
        out.push(t);
    }

    if pack_dangerous || parasite_dangerous {
        let path = elf.real_path.to_string_lossy().to_string();
        let _ = store.set_danger(&path, crate::elf::Danger::Dangerous.as_i32()).await;
    }

    out
}

pub fn signal_analysis(task: &Arc<Task>, signal: u32) -> Vec<Threat> {
    detectors::detect_sigtrap_handler(task, signal)
        .into_iter()
        .inspect(|t| task.raise_score(t.level.as_u32()))
        .collect()
}

pub fn ptrace_analysis(
    task: &Arc<Task>,
    tasks: &TaskTable,
    tracee: &crate::task::Tracee,
    tracee_ppid: i32,
) -> Vec<Threat> {
    let mut out = Vec::new();
    if let Some(t) = detectors::detect_unexpected_tracer(task.pid, tracee) {
        out.push(t);
    }
    if let Some(t) = detectors::detect_process_injection(task.pid, tracee, tracee_ppid) {
        out.push(t);
    }
    if let Some(t) = detectors::detect_two_way_tracing(task, tasks) {
        out.push(t);
    }
    for t in &out {
        task.raise_score(t.level.as_u32());
    }
    out
}

/// Used for CLOSE/RENAME, which skip the masquerading check (no fresh
/// EXECVE happened) but still want the two ELF-static detectors.
pub async fn binary_analysis(task: &Arc<Task>, elf: &Elf, store: &Store) -> Vec<Threat> {
    let Ok(parsed) = elf.parse() else {
        return Vec::new();
    };
    let mut out = Vec::new();
    let (pack, pack_dangerous) = detectors::detect_binary_packing(&parsed, &elf.bytes, &elf.real_path);
    let (parasite, parasite_dangerous) =
        detectors::detect_binary_parasite(&parsed, &elf.bytes, &elf.real_path);
    for t in [pack, parasite].into_iter().flatten() {
        task.raise_score(t.level.as_u32());
        out.push(t);
    }
    if pack_dangerous || parasite_dangerous {
        let path = elf.real_path.to_string_lossy().to_string();
        let _ = store.set_danger(&path, crate::elf::Danger::Dangerous.as_i32()).await;
    }
    out
}

pub fn unlink_analysis(
    tasks: &TaskTable,
    deleted_path: &str,
    current_comm: &str,
    ppid: i32,
) -> Vec<Threat> {
    detectors::detect_executable_deletion(tasks, deleted_path, current_comm, ppid)
        .into_iter()
        .collect()
}

pub fn yara_analysis(task: &Arc<Task>, scanner: &dyn YaraScanner, elf_path: &std::path::Path) -> Vec<Threat> {
    if !scanner.has_rules() {
        return Vec::new();
    }
    let matches = scanner.scan(elf_path);
    let t = detectors::detect_malware(!matches.is_empty(), elf_path);
    if let Some(t) = &t {
        task.raise_score(t.level.as_u32());
    }
    t.into_iter().collect()
}

/// IoC carried by a threat, stripped to the bits needed for a log line.
pub fn ioc_summary(ioc: &Ioc) -> String {
    match ioc {
        Ioc::Elf(p) => p.to_string_lossy().to_string(),
        Ioc::Tracee(t) => format!("tracee pid={}", t.pid),
        Ioc::Path(p) => p.clone(),
        Ioc::Signal(s) => s.to_string(),
        Ioc::None => String::new(),
    }
}
