use serde::Serialize;

/// A decoded kernel trace line.
#[derive(Debug, Clone, Default)]
pub struct Event {
    pub comm: String,
    pub pid: i32,
    pub function: String,
    pub args: Vec<String>,
    pub ret_value: Vec<String>,
}

impl Event {
    pub fn is_call_probe(&self) -> bool {
        self.function
            .chars()
            .next()
            .map(|c| c.is_ascii_uppercase())
            .unwrap_or(false)
    }

    pub fn is_tracepoint(&self) -> bool {
        !self.is_call_probe()
    }

    pub fn ret_code(&self) -> Option<i64> {
        self.ret_value.first().and_then(|v| v.parse().ok())
    }
}

/// Dispatch category, used only to gate the `-e` event-log subscription mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Category {
    Exec,
    Task,
    Signal,
    File,
    Mount,
    Ptrace,
    Namespace,
}

impl Category {
    pub fn code(self) -> char {
        match self {
            Category::Exec => 'x',
            Category::Task => 't',
            Category::Signal => 's',
            Category::File => 'f',
            Category::Mount => 'm',
            Category::Ptrace => 'p',
            Category::Namespace => 'n',
        }
    }
}

/// Tagged indicator-of-compromise payload returned by an event handler
/// and consumed by the matching threat analyzer. One variant per analyzer
/// input type, replacing a dynamically-typed value.
#[derive(Debug, Clone)]
pub enum Ioc {
    Elf(std::path::PathBuf),
    Tracee(crate::task::Tracee),
    Path(String),
    Signal(u32),
    None,
}
