//! Probe definitions and the controller that installs/removes them against
//! the kernel's ftrace control files. Call probes (`kprobe_events`) decode
//! arguments from registers via a cookie-tagged template; tracepoints
//! (`set_event`) are static kernel instrumentation points enabled as-is.

use crate::cookie::Cookie;
use crate::error::EngineError;
use std::path::{Path, PathBuf};

/// A candidate kernel function name to attach a call probe to, tried in
/// order until one exists on the running kernel (naming varies across
/// kernel versions and config options).
#[derive(Debug, Clone)]
pub struct CallProbe {
    pub name: &'static str,
    pub candidates: &'static [&'static str],
    pub param_template: &'static str,
    pub retval_template: &'static str,
    pub optional: bool,
}

#[derive(Debug, Clone)]
pub struct Tracepoint {
    pub name: &'static str,
    pub optional: bool,
}

/// Register-read templates below target kernels exposing the raw
/// syscall-entry convention (`%di`/`%si`/`%dx`/...). On kernels >= 4.17
/// built with the `__x64_sys_` prefix, the registers point at a
/// `struct pt_regs *`, so arguments live at `+112(%di)`, `+104(%di)`,
/// `+56(%di)` rather than directly in `%si`/`%dx`/`%cx`.
const PT_REGS_OFFSETS: &[&str] = &["+112(%di)", "+104(%di)", "+56(%di)", "+48(%di)", "+32(%di)"];

pub fn rewrite_for_pt_regs(function: &str, template: &str) -> String {
    if !function.starts_with("__x64_sys_") {
        return template.to_string();
    }
    let mut out = template.to_string();
    for (reg, offset) in ["%si", "%dx", "%cx", "%r8", "%r9"].iter().zip(PT_REGS_OFFSETS) {
        out = out.replace(reg, offset);
    }
    out
}

pub fn call_probes() -> Vec<CallProbe> {
    vec![
        CallProbe {
            name: "FORK",
            candidates: &["__x64_sys_clone", "sys_clone", "_do_fork"],
            param_template: "flags=%di:u64",
            retval_template: "child_pid=%ax:s64",
            optional: false,
        },
        CallProbe {
            name: "EXECVE",
            candidates: &["__x64_sys_execve", "sys_execve"],
            param_template: "filename=%di:string argv0=%si:string",
            retval_template: "rc=%ax:s64",
            optional: false,
        },
        CallProbe {
            name: "UNSHARE",
            candidates: &["__x64_sys_unshare", "sys_unshare"],
            param_template: "flags=%di:u64",
            retval_template: "rc=%ax:s64",
            optional: true,
        },
        CallProbe {
            name: "SETNS",
            candidates: &["__x64_sys_setns", "sys_setns"],
            param_template: "fd=%di:s32 nstype=%si:s32",
            retval_template: "rc=%ax:s64",
            optional: true,
        },
        CallProbe {
            name: "SETHOSTNAME",
            candidates: &["__x64_sys_sethostname", "sys_sethostname"],
            param_template: "name=%di:string",
            retval_template: "rc=%ax:s64",
            optional: true,
        },
        CallProbe {
            name: "PTRACE",
            candidates: &["__x64_sys_ptrace", "sys_ptrace"],
            param_template: "request=%di:s64 pid=%si:s32 addr=%dx:u64",
            retval_template: "rc=%ax:s64",
            optional: false,
        },
        CallProbe {
            name: "PROC_VM_WRITEV",
            candidates: &["__x64_sys_process_vm_writev", "sys_process_vm_writev"],
            param_template: "pid=%di:s32",
            retval_template: "rc=%ax:s64",
            optional: true,
        },
        CallProbe {
            name: "SIGACTION",
            candidates: &["__x64_sys_rt_sigaction", "sys_rt_sigaction"],
            param_template: "signum=%di:s32",
            retval_template: "rc=%ax:s64",
            optional: true,
        },
        CallProbe {
            name: "OPEN",
            candidates: &["__x64_sys_openat", "sys_openat"],
            param_template: "filename=%si:string flags=%dx:s32",
            retval_template: "fd=%ax:s64",
            optional: false,
        },
        CallProbe {
            name: "CLOSE",
            candidates: &["__x64_sys_close", "sys_close"],
            param_template: "fd=%di:s32",
            retval_template: "rc=%ax:s64",
            optional: false,
        },
        CallProbe {
            name: "UNLINK",
            candidates: &["__x64_sys_unlinkat", "sys_unlinkat"],
            param_template: "pathname=%si:string",
            retval_template: "rc=%ax:s64",
            optional: false,
        },
        CallProbe {
            name: "RENAME",
            candidates: &["__x64_sys_renameat2", "__x64_sys_renameat", "sys_rename"],
            param_template: "oldname=%si:string newname=%r10:string",
            retval_template: "rc=%ax:s64",
            optional: true,
        },
        CallProbe {
            name: "CHDIR",
            candidates: &["__x64_sys_chdir", "sys_chdir"],
            param_template: "filename=%di:string",
            retval_template: "rc=%ax:s64",
            optional: true,
        },
        CallProbe {
            name: "MOUNT",
            candidates: &["__x64_sys_mount", "sys_mount"],
            param_template: "source=%di:string target=%si:string",
            retval_template: "rc=%ax:s64",
            optional: true,
        },
        CallProbe {
            name: "COMMIT_CREDS",
            candidates: &["commit_creds"],
            param_template: "newcreds=%di:u64",
            retval_template: "rc=%ax:s64",
            optional: true,
        },
    ]
}

pub fn tracepoints() -> Vec<Tracepoint> {
    vec![
        Tracepoint {
            name: "task:task_newtask",
            optional: false,
        },
        Tracepoint {
            name: "sched:sched_process_exec",
            optional: false,
        },
    ]
}

/// Paths to the kernel's ftrace control files, injectable for testing
/// against a fake tracing directory instead of the real debugfs mount.
#[derive(Debug, Clone)]
pub struct ProbePaths {
    pub kprobe_events: PathBuf,
    pub set_event: PathBuf,
    pub trace_pipe: PathBuf,
    pub tracing_dir: PathBuf,
}

impl ProbePaths {
    pub fn under(tracing_dir: &Path) -> Self {
        Self {
            kprobe_events: tracing_dir.join("kprobe_events"),
            set_event: tracing_dir.join("set_event"),
            trace_pipe: tracing_dir.join("trace_pipe"),
            tracing_dir: tracing_dir.to_path_buf(),
        }
    }
}

/// Installs call probes and tracepoints at startup, tracks what it
/// installed, and tears it all down on shutdown.
pub struct ProbeController {
    paths: ProbePaths,
    cookie: Cookie,
    installed_kprobes: Vec<String>,
    installed_tracepoints: Vec<String>,
}

impl ProbeController {
    pub fn new(paths: ProbePaths, cookie: Cookie) -> Self {
        Self {
            paths,
            cookie,
            installed_kprobes: Vec::new(),
            installed_tracepoints: Vec::new(),
        }
    }

    pub async fn install_all(&mut self) -> Result<(), EngineError> {
        for probe in call_probes() {
            self.install_call_probe(&probe).await?;
        }
        for tp in tracepoints() {
            self.install_tracepoint(&tp).await?;
        }
        Ok(())
    }

    async fn install_call_probe(&mut self, probe: &CallProbe) -> Result<(), EngineError> {
        for candidate in probe.candidates {
            let params = rewrite_for_pt_regs(candidate, probe.param_template);
            let marker = self.cookie.marker();
            let spec = format!(
                "p:{} {} {}{}\nr:ret_{} {} {}{}",
                probe.name, candidate, marker, params, probe.name, candidate, marker, probe.retval_template
            );
            if self.write_kprobe_spec(&spec).await.is_ok() {
                self.installed_kprobes.push(probe.name.to_string());
                return Ok(());
            }
        }
        if probe.optional {
            log::warn!("optional probe {} unavailable on this kernel, skipping", probe.name);
            Ok(())
        } else {
            Err(EngineError::KernelSetupFailure(format!(
                "no candidate kernel function available for required probe {}",
                probe.name
            )))
        }
    }

    async fn write_kprobe_spec(&self, spec: &str) -> std::io::Result<()> {
        tokio::fs::write(&self.paths.kprobe_events, spec).await
    }

    async fn install_tracepoint(&mut self, tp: &Tracepoint) -> Result<(), EngineError> {
        match tokio::fs::write(&self.paths.set_event, format!("{}\n", tp.name)).await {
            Ok(()) => {
                self.installed_tracepoints.push(tp.name.to_string());
                Ok(())
            }
            Err(e) if tp.optional => {
                log::warn!("optional tracepoint {} unavailable: {e}", tp.name);
                Ok(())
            }
            Err(e) => Err(EngineError::KernelSetupFailure(format!(
                "failed to enable required tracepoint {}: {e}",
                tp.name
            ))),
        }
    }

    pub async fn teardown(&mut self) {
        for name in self.installed_tracepoints.drain(..) {
            let _ = tokio::fs::write(&self.paths.set_event, format!("!{name}\n")).await;
        }
        if !self.installed_kprobes.is_empty() {
            let _ = tokio::fs::write(&self.paths.kprobe_events, "").await;
            self.installed_kprobes.clear();
        }
    }

    pub fn trace_pipe_path(&self) -> &Path {
        &self.paths.trace_pipe
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pt_regs_rewrite_applies_only_to_prefixed_functions() {
        let template = "a=%si:string b=%dx:s32";
        assert_eq!(
            rewrite_for_pt_regs("__x64_sys_openat", template),
            "a=+112(%di):string b=+104(%di):s32"
        );
        assert_eq!(rewrite_for_pt_regs("sys_openat", template), template);
    }

    #[test]
    fn required_probes_have_no_optional_flag() {
        let probes = call_probes();
        let execve = probes.iter().find(|p| p.name == "EXECVE").unwrap();
        assert!(!execve.optional);
    }

    #[test]
    fn tracepoints_are_both_required() {
        let tps = tracepoints();
        assert_eq!(tps.len(), 2);
        assert!(tps.iter().all(|t| !t.optional));
    }
}
