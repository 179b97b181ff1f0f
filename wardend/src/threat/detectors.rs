use super::catalog::{Level, Technique};
use crate::elf::analysis;
use crate::event::Ioc;
use crate::task::{Task, TaskTable, Tracee, TraceOp};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct Threat {
    pub technique: Technique,
    pub level: Level,
    pub ioc: Ioc,
}

impl Threat {
    fn new(technique: Technique, level: Level, ioc: Ioc) -> Self {
        Self {
            technique,
            level,
            ioc,
        }
    }
}

pub fn detect_masquerading(path: &str, ppid: i32) -> Option<Threat> {
    let base = crate::elf::path::clean_path(path);
    if base.starts_with('[') && ppid != 2 {
        return Some(Threat::new(
            Technique::KernelThreadMasquerading,
            Level::Low,
            Ioc::Path(path.to_string()),
        ));
    }
    if !crate::elf::path::valid_extension(path) && path.ends_with(' ') {
        return Some(Threat::new(
            Technique::SpaceAfterFilenameMasquerading,
            Level::Low,
            Ioc::Path(path.to_string()),
        ));
    }
    None
}

/// Returns `(threat, elf-is-dangerous)`. The caller raises the task's
/// score and the ELF's persisted danger classification from this result
/// regardless of which branch triggered.
pub fn detect_binary_packing(
    elf: &goblin::elf::Elf,
    file_bytes: &[u8],
    elf_path: &std::path::Path,
) -> (Option<Threat>, bool) {
    if analysis::statically_linked(elf) {
        if analysis::packed_segment(elf, file_bytes) {
            return (
                Some(Threat::new(
                    Technique::SoftwarePacking,
                    Level::Moderate,
                    Ioc::Elf(elf_path.to_path_buf()),
                )),
                true,
            );
        }
        return (None, true);
    }
    (None, false)
}

pub fn detect_binary_parasite(
    elf: &goblin::elf::Elf,
    file_bytes: &[u8],
    elf_path: &std::path::Path,
) -> (Option<Threat>, bool) {
    if !analysis::dynamically_linked(elf) {
        return (None, false);
    }
    let init_entries = analysis::init_array_entries(elf, file_bytes);
    let hijacked = init_entries
        .iter()
        .any(|&addr| analysis::detect_control_flow_hijacking(elf, addr))
        || analysis::detect_control_flow_hijacking(elf, elf.header.e_entry);

    if hijacked {
        (
            Some(Threat::new(
                Technique::ExecutionFlowHijacking,
                Level::Moderate,
                Ioc::Elf(elf_path.to_path_buf()),
            )),
            true,
        )
    } else {
        (None, true)
    }
}

/// Walks the parent chain from `ppid` upward looking for an ancestor whose
/// `comm` matches `deleted_path`, per the original `detectExecutableDeletion`.
pub fn detect_executable_deletion(
    tasks: &TaskTable,
    deleted_path: &str,
    current_comm: &str,
    mut ppid: i32,
) -> Option<Threat> {
    if current_comm == deleted_path {
        return Some(Threat::new(
            Technique::ExecutableDeletion,
            Level::Low,
            Ioc::Path(deleted_path.to_string()),
        ));
    }
    while ppid > 2 {
        let Some(parent) = tasks.get(ppid) else {
            break;
        };
        let snap = parent.snapshot();
        if snap.comm == deleted_path {
            return Some(Threat::new(
                Technique::ExecutableDeletion,
                Level::Low,
                Ioc::Path(deleted_path.to_string()),
            ));
        }
        ppid = snap.ppid;
    }
    None
}

pub fn detect_unexpected_tracer(current_pid: i32, tracee: &Tracee) -> Option<Threat> {
    match tracee.last {
        TraceOp::Traceme => Some(Threat::new(
            Technique::TracemeProtection,
            Level::Low,
            Ioc::Signal(current_pid as u32),
        )),
        TraceOp::PokeText if tracee.pid == current_pid => Some(Threat::new(
            Technique::SelfTracingProtection,
            Level::Low,
            Ioc::Tracee(tracee.clone()),
        )),
        _ => None,
    }
}

pub fn detect_process_injection(current_pid: i32, tracee: &Tracee, tracee_ppid: i32) -> Option<Threat> {
    if tracee.last == TraceOp::PokeText && tracee_ppid != current_pid {
        return Some(Threat::new(
            Technique::ProcessInjection,
            Level::Moderate,
            Ioc::Tracee(tracee.clone()),
        ));
    }
    None
}

pub fn detect_two_way_tracing(current: &Arc<Task>, tasks: &TaskTable) -> Option<Threat> {
    let tracer_pid = current.tracer();
    if tracer_pid == 0 {
        return None;
    }
    let tracer = tasks.get(tracer_pid)?;
    if tracer.tracer() == current.pid {
        return Some(Threat::new(
            Technique::TwoWayTracingProtection,
            Level::Low,
            Ioc::Signal(current.pid as u32),
        ));
    }
    None
}

pub fn detect_sigtrap_handler(current: &Arc<Task>, signal: u32) -> Option<Threat> {
    const SIGTRAP: u32 = 5;
    if signal == SIGTRAP && current.score() != 0 {
        return Some(Threat::new(
            Technique::SigtrapHandlerProtection,
            Level::Low,
            Ioc::Signal(signal),
        ));
    }
    None
}

pub fn detect_malware(matches_found: bool, elf_path: &std::path::Path) -> Option<Threat> {
    if matches_found {
        Some(Threat::new(
            Technique::Malware,
            Level::High,
            Ioc::Elf(elf_path.to_path_buf()),
        ))
    } else {
        None
    }
}
