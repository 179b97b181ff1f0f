//! Structured log sinks: a console diagnostic logger plus two dedicated
//! JSONL sinks (event log, threat log), adapted from the same
//! open-append-one-line-at-a-time handler pattern used for JSONL output
//! elsewhere, but writing typed records instead of a generic event enum.

use crate::event::{Category, Event};
use crate::task::TaskSnapshot;
use crate::threat::{ioc_summary, Threat};
use serde::Serialize;
use std::sync::Arc;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

pub fn init_console_logger(debug: bool) {
    let level = if debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

/// Parses the `-e` mask (`a` or a colon-separated subset of category codes).
#[derive(Debug, Clone)]
pub struct EventMask {
    all: bool,
    codes: Vec<char>,
}

impl EventMask {
    pub fn parse(spec: &str) -> Self {
        if spec.trim() == "a" {
            return Self {
                all: true,
                codes: Vec::new(),
            };
        }
        Self {
            all: false,
            codes: spec.split(':').filter_map(|s| s.chars().next()).collect(),
        }
    }

    pub fn allows(&self, category: Category) -> bool {
        self.all || self.codes.contains(&category.code())
    }
}

#[derive(Debug, Serialize)]
struct CurrentBlock {
    comm: String,
    pid: i32,
    vpid: i32,
    task: &'static str,
    danger: u32,
}

fn current_block(task: &TaskSnapshot) -> CurrentBlock {
    CurrentBlock {
        comm: task.comm.clone(),
        pid: task.pid,
        vpid: task.vpid,
        task: if task.flags & crate::task::clone_flags::CLONE_VM != 0 {
            "Thread"
        } else {
            "Process"
        },
        danger: task.score,
    }
}

#[derive(Debug, Serialize)]
struct EventRecord<'a> {
    function: &'a str,
    args: &'a [String],
    ret_value: &'a [String],
    current: CurrentBlock,
}

#[derive(Debug, Serialize)]
struct ThreatInfo<'a> {
    level: u32,
    category: &'a str,
    technique: &'a str,
    description: &'a str,
}

#[derive(Debug, Serialize)]
struct IocInfo {
    #[serde(rename = "type")]
    kind: &'static str,
    value: String,
}

#[derive(Debug, Serialize)]
struct ThreatRecord<'a> {
    #[serde(rename = "type")]
    record_type: &'static str,
    threat: ThreatInfo<'a>,
    ioc: IocInfo,
    current: CurrentBlock,
}

struct JsonlSink {
    file: Mutex<tokio::fs::File>,
}

impl JsonlSink {
    async fn open(path: &str) -> std::io::Result<Self> {
        if let Some(parent) = std::path::Path::new(path).parent() {
            let _ = tokio::fs::create_dir_all(parent).await;
        }
        let file = OpenOptions::new().create(true).append(true).open(path).await?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }

    async fn write_line(&self, line: &str) {
        let mut f = self.file.lock().await;
        let _ = f.write_all(line.as_bytes()).await;
        let _ = f.write_all(b"\n").await;
    }
}

pub struct EventLog {
    sink: JsonlSink,
    stdout: bool,
    mask: EventMask,
}

impl EventLog {
    pub async fn open(path: &str, stdout: bool, mask: EventMask) -> std::io::Result<Self> {
        Ok(Self {
            sink: JsonlSink::open(path).await?,
            stdout,
            mask,
        })
    }

    pub async fn record(&self, category: Category, event: &Event, task: &TaskSnapshot) {
        if !self.mask.allows(category) {
            return;
        }
        let record = EventRecord {
            function: &event.function,
            args: &event.args,
            ret_value: &event.ret_value,
            current: current_block(task),
        };
        if let Ok(line) = serde_json::to_string(&record) {
            self.sink.write_line(&line).await;
            if self.stdout {
                println!("{line}");
            }
        }
    }
}

pub struct ThreatLog {
    sink: JsonlSink,
    stdout: bool,
}

impl ThreatLog {
    pub async fn open(path: &str, stdout: bool) -> std::io::Result<Self> {
        Ok(Self {
            sink: JsonlSink::open(path).await?,
            stdout,
        })
    }

    pub async fn record(&self, threat: &Threat, task: &TaskSnapshot) {
        let category = match threat.technique.category() {
            crate::threat::ThreatCategory::DefenseEvasion => "Defense Evasion",
            crate::threat::ThreatCategory::Persistence => "Persistence",
            crate::threat::ThreatCategory::Execution => "Execution",
        };
        let record = ThreatRecord {
            record_type: "Threat",
            threat: ThreatInfo {
                level: threat.level.as_u32(),
                category,
                technique: technique_name(threat.technique),
                description: threat.technique.description(),
            },
            ioc: IocInfo {
                kind: ioc_kind(&threat.ioc),
                value: ioc_summary(&threat.ioc),
            },
            current: current_block(task),
        };
        if let Ok(line) = serde_json::to_string(&record) {
            self.sink.write_line(&line).await;
            if self.stdout {
                println!("{line}");
            }
        }
    }
}

fn technique_name(t: crate::threat::Technique) -> &'static str {
    use crate::threat::Technique::*;
    match t {
        KernelThreadMasquerading => "Kernel Thread Masquerading",
        SpaceAfterFilenameMasquerading => "Space After Filename Masquerading",
        SoftwarePacking => "Software Packing",
        ExecutionFlowHijacking => "Execution Flow Hijacking",
        ExecutableDeletion => "Executable Deletion",
        TracemeProtection => "Traceme Protection",
        SelfTracingProtection => "Self-Tracing Protection",
        TwoWayTracingProtection => "Two-Way-Tracing Protection",
        ProcessInjection => "Process Injection",
        SigtrapHandlerProtection => "SIGTRAP-Handler Protection",
        Malware => "Malware",
    }
}

fn ioc_kind(ioc: &crate::event::Ioc) -> &'static str {
    use crate::event::Ioc::*;
    match ioc {
        Elf(_) => "executable",
        Tracee(_) => "tracee",
        Path(_) => "path",
        Signal(_) => "signal",
        None => "none",
    }
}

pub struct Logs {
    pub events: Arc<EventLog>,
    pub threats: Arc<ThreatLog>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_all_allows_everything() {
        let mask = EventMask::parse("a");
        assert!(mask.allows(Category::File));
        assert!(mask.allows(Category::Ptrace));
    }

    #[test]
    fn mask_subset_restricts() {
        let mask = EventMask::parse("x:f");
        assert!(mask.allows(Category::Exec));
        assert!(mask.allows(Category::File));
        assert!(!mask.allows(Category::Ptrace));
    }

    #[tokio::test]
    async fn event_log_writes_jsonl() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let log = EventLog::open(file.path().to_str().unwrap(), false, EventMask::parse("a"))
            .await
            .unwrap();
        let event = Event {
            comm: "bash".into(),
            pid: 1,
            function: "EXECVE".into(),
            args: vec![],
            ret_value: vec!["0".into()],
        };
        let task = TaskSnapshot {
            pid: 1,
            vpid: 1,
            comm: "bash".into(),
            argv: vec![],
            ppid: 0,
            cwd: "/".into(),
            flags: 0,
            tracer: 0,
            score: 0,
            from_procfs: false,
            namespaces: std::collections::HashMap::new(),
        };
        log.record(Category::Exec, &event, &task).await;
        let content = tokio::fs::read_to_string(file.path()).await.unwrap();
        assert_eq!(content.lines().count(), 1);
    }
}
