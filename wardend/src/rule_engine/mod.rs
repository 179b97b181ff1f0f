//! Dispatches decoded events to their handlers and, where a handler
//! surfaces an indicator of compromise, to the matching threat analyzer.

pub mod context;
pub mod filter;
pub mod handlers;

pub use context::EventContext;

use crate::event::{Category, Event, Ioc};
use crate::logging::{EventLog, ThreatLog};
use crate::metrics::Metrics;
use crate::store::Store;
use crate::task::TaskTable;
use crate::yara_scan::YaraScanner;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy)]
struct RuleMeta {
    category: Category,
    requires_scan: bool,
}

/// Static dispatch table keyed by event name, built once. Replaces what
/// would otherwise be a single large `match` over every probe/tracepoint
/// name — this table only carries dispatch metadata (logging category,
/// whether a YARA scan is required); the handler bodies themselves still
/// need per-event argument shapes, so they're invoked through one `match`
/// in `run_handler` rather than function pointers in the map (async fn
/// pointers can't be stored directly without boxing every call).
static RULES: Lazy<HashMap<&'static str, RuleMeta>> = Lazy::new(|| {
    use Category::*;
    let entries: &[(&str, Category, bool)] = &[
        ("task_newtask", Task, false),
        ("FORK", Task, false),
        ("EXIT", Task, false),
        ("EXECVE", Exec, true),
        ("sched_process_exec", Exec, true),
        ("UNSHARE", Namespace, false),
        ("SETNS", Namespace, false),
        ("SETHOSTNAME", Namespace, false),
        ("COMMIT_CREDS", Task, false),
        ("PTRACE", Ptrace, false),
        ("PROC_VM_WRITERV", Ptrace, false),
        ("SIGACTION", Signal, false),
        ("OPEN", File, false),
        ("CLOSE", File, false),
        ("UNLINK", File, false),
        ("RENAME", File, false),
        ("CHDIR", File, false),
        ("MOUNT", Mount, false),
    ];
    entries.iter().map(|(n, c, s)| (*n, RuleMeta { category: *c, requires_scan: *s })).collect()
});

pub struct RuleEngine<'a> {
    pub tasks: &'a TaskTable,
    pub store: &'a Store,
    pub scanner: &'a dyn YaraScanner,
    pub files_dir: &'a Path,
    pub self_exe: &'a Path,
    pub metrics: &'a Metrics,
    pub event_log: &'a EventLog,
    pub threat_log: &'a ThreatLog,
}

impl<'a> RuleEngine<'a> {
    pub async fn dispatch(&self, event: Event) {
        let Some(task) = self.tasks.get_or_fetch(event.pid) else {
            self.metrics.event_dropped_by_filter();
            return;
        };
        if task.snapshot().from_procfs {
            self.metrics.task_from_procfs();
        }

        let snapshot = task.snapshot();
        if filter::should_drop(&event, &snapshot, self.self_exe) {
            self.metrics.event_dropped_by_filter();
            return;
        }

        let Some(meta) = RULES.get(event.function.as_str()).copied() else {
            log::error!("no rule registered for event function {}", event.function);
            return;
        };

        let ctx = EventContext {
            task: task.clone(),
            tasks: self.tasks,
            store: self.store,
            scanner: self.scanner,
            files_dir: self.files_dir,
            self_exe: self.self_exe,
        };

        let ioc = match self.run_handler(&ctx, &event).await {
            Ok(ioc) => ioc,
            Err(e) => {
                log::warn!(
                    "handler error: function={} pid={} comm={} err={e}",
                    event.function,
                    event.pid,
                    event.comm
                );
                None
            }
        };

        self.metrics.event_decoded();
        self.event_log.record(meta.category, &event, &task.snapshot()).await;

        let mut threats = Vec::new();

        if meta.requires_scan {
            if let Some(elf_path) = ioc_elf_path(&ioc).or_else(|| task.elf()) {
                threats.extend(crate::threat::yara_analysis(&task, self.scanner, &elf_path));
            }
        }

        if let Some(ioc) = &ioc {
            threats.extend(self.run_threat_analysis(&task, &event, ioc).await);
        }

        for threat in &threats {
            self.metrics.threat_raised();
            self.threat_log.record(threat, &task.snapshot()).await;
        }
    }

    async fn run_handler(&self, ctx: &EventContext<'_>, event: &Event) -> Result<Option<Ioc>, crate::error::EngineError> {
        match event.function.as_str() {
            "task_newtask" => handlers::task_newtask(ctx, event).await,
            "FORK" => handlers::fork(ctx, event).await,
            "EXIT" => handlers::exit(ctx, event).await,
            "EXECVE" => handlers::execve(ctx, event).await,
            "sched_process_exec" => handlers::sched_process_exec(ctx, event).await,
            "UNSHARE" => handlers::unshare(ctx, event).await,
            "SETNS" => handlers::setns(ctx, event).await,
            "SETHOSTNAME" => handlers::sethostname(ctx, event).await,
            "COMMIT_CREDS" => handlers::commit_creds(ctx, event).await,
            "PTRACE" => handlers::ptrace(ctx, event).await,
            "PROC_VM_WRITERV" => handlers::proc_vm_writev(ctx, event).await,
            "SIGACTION" => handlers::sigaction(ctx, event).await,
            "OPEN" => handlers::open(ctx, event).await,
            "CLOSE" => handlers::close(ctx, event).await,
            "UNLINK" => handlers::unlink(ctx, event).await,
            "RENAME" => handlers::rename(ctx, event).await,
            "CHDIR" => handlers::chdir(ctx, event).await,
            "MOUNT" => handlers::mount(ctx, event).await,
            other => Err(crate::error::EngineError::HandlerError(format!("unhandled event {other}"))),
        }
    }

    async fn run_threat_analysis(
        &self,
        task: &std::sync::Arc<crate::task::Task>,
        event: &Event,
        ioc: &Ioc,
    ) -> Vec<crate::threat::Threat> {
        match event.function.as_str() {
            "EXECVE" | "sched_process_exec" => {
                if let Ioc::Elf(path) = ioc {
                    if let Ok(elf) = crate::elf::Elf::open(path, self.files_dir) {
                        return crate::threat::execve_analysis(task, &elf, self.store).await;
                    }
                }
                Vec::new()
            }
            "CLOSE" | "RENAME" => {
                if let Ioc::Elf(path) = ioc {
                    if let Ok(elf) = crate::elf::Elf::open(path, self.files_dir) {
                        return crate::threat::binary_analysis(task, &elf, self.store).await;
                    }
                }
                Vec::new()
            }
            "PTRACE" | "PROC_VM_WRITERV" => {
                if let Ioc::Tracee(tracee) = ioc {
                    let tracee_ppid = self.tasks.get(tracee.pid).map(|t| t.snapshot().ppid).unwrap_or(0);
                    return crate::threat::ptrace_analysis(task, self.tasks, tracee, tracee_ppid);
                }
                Vec::new()
            }
            "SIGACTION" => {
                if let Ioc::Signal(sig) = ioc {
                    return crate::threat::signal_analysis(task, *sig);
                }
                Vec::new()
            }
            "UNLINK" => {
                if let Ioc::Path(path) = ioc {
                    let snap = task.snapshot();
                    return crate::threat::unlink_analysis(self.tasks, path, &snap.comm, snap.ppid);
                }
                Vec::new()
            }
            _ => Vec::new(),
        }
    }
}

fn ioc_elf_path(ioc: &Option<Ioc>) -> Option<PathBuf> {
    match ioc {
        Some(Ioc::Elf(p)) => Some(p.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_rule_category_is_registered() {
        assert_eq!(RULES.get("EXECVE").unwrap().category, Category::Exec);
        assert!(RULES.get("EXECVE").unwrap().requires_scan);
        assert!(!RULES.get("FORK").unwrap().requires_scan);
        assert!(RULES.get("nonexistent_probe").is_none());
    }
}
