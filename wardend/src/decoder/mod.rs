mod correlate;

pub use correlate::CorrelationTable;

use crate::cookie::Cookie;
use crate::event::Event;
use once_cell::sync::Lazy;
use regex::Regex;

/// Stage A: splits a raw trace_pipe line into comm/pid/function/raw-args.
///
/// Matches lines of the shape:
/// `<comm>-<pid> [<cpu>] <flags> <ts>: <function>[ (<caller>)] <raw_args>`
static LINE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^\s*(?P<comm>\S+)-(?P<pid>\d+)\s+\[(?P<cpu>\d+)\]\s+(?P<flags>\S+)\s+(?P<ts>[\d.]+):\s+(?P<function>\w+)(?:\s*\([^)]*\))?\s*(?P<rest>.*)$",
    )
    .expect("static line regex is valid")
});

pub struct FieldSplit {
    pub comm: String,
    pub pid: i32,
    pub function: String,
    pub raw_args: String,
}

/// Parse one raw trace_pipe line. Returns `None` (and the caller should
/// log at debug level) if the line doesn't match the expected shape.
pub fn split_fields(line: &str) -> Option<FieldSplit> {
    let caps = LINE_RE.captures(line)?;
    let pid: i32 = caps.name("pid")?.as_str().parse().ok()?;
    Some(FieldSplit {
        comm: caps.name("comm")?.as_str().to_string(),
        pid,
        function: caps.name("function")?.as_str().to_string(),
        raw_args: caps.name("rest")?.as_str().to_string(),
    })
}

/// Stage B: decodes the raw argument string for a call probe (cookie-protected)
/// or a tracepoint (plain whitespace-separated `k=v` pairs).
pub fn decode_args(split: &FieldSplit, cookie: &Cookie) -> Option<Vec<String>> {
    let is_call_probe = split
        .function
        .chars()
        .next()
        .map(|c| c.is_ascii_uppercase())
        .unwrap_or(false);

    if is_call_probe {
        decode_call_probe_args(&split.raw_args, cookie, split.function == "EXECVE")
    } else {
        Some(decode_tracepoint_args(&split.raw_args))
    }
}

fn decode_call_probe_args(raw: &str, cookie: &Cookie, is_execve: bool) -> Option<Vec<String>> {
    let marker = cookie.marker();
    if !raw.contains(&marker) {
        // no cookie present: not genuine probe output, discard.
        return None;
    }

    let mut out = Vec::new();
    for fragment in raw.split(&marker).filter(|f| !f.is_empty()) {
        // fragment shape: "<N>_<type>=<value>" e.g. "0_str=\"/bin/sh\"" after
        // the "arg<cookie>_" marker is stripped; tolerate either "<type><N>=value".
        let Some((_, value)) = fragment.split_once('=') else {
            continue;
        };
        let value = value.trim();
        let is_str = fragment.contains("str");
        let decoded = if is_str {
            value.trim_matches('"').to_string()
        } else {
            value.to_string()
        };
        if decoded == "fault" {
            if is_execve {
                // NUL sentinel: stop scanning the argv walk.
                break;
            }
            // a faulted register read for any other probe just drops that field.
            continue;
        }
        out.push(decoded);
    }
    Some(out)
}

fn decode_tracepoint_args(raw: &str) -> Vec<String> {
    raw.split_whitespace()
        .filter_map(|kv| kv.split_once('=').map(|(_, v)| v.to_string()))
        .collect()
}

/// Assembles a partially-decoded event from stage A/B output.
pub fn build_event(split: FieldSplit, args: Vec<String>) -> Event {
    Event {
        comm: split.comm,
        pid: split.pid,
        function: split.function,
        args,
        ret_value: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_a_well_formed_line() {
        let line = "bash-1234  [002] ....  1234.5678: EXECVE (sys_execve) arg!#_0_str=\"/bin/ls\"";
        let split = split_fields(line).expect("should parse");
        assert_eq!(split.comm, "bash");
        assert_eq!(split.pid, 1234);
        assert_eq!(split.function, "EXECVE");
    }

    #[test]
    fn rejects_malformed_line() {
        assert!(split_fields("not a trace line at all").is_none());
    }

    #[test]
    fn call_probe_requires_cookie() {
        let cookie = Cookie::generate();
        let split = FieldSplit {
            comm: "x".into(),
            pid: 1,
            function: "EXECVE".into(),
            raw_args: "0_str=\"/bin/sh\"".into(),
        };
        assert!(decode_args(&split, &cookie).is_none());
    }

    #[test]
    fn non_execve_fault_drops_only_that_field() {
        let cookie = Cookie::generate();
        let marker = cookie.marker();
        let raw = format!("{marker}0_str=\"/bin/sh\"{marker}1_int=fault{marker}2_int=7");
        let split = FieldSplit {
            comm: "x".into(),
            pid: 1,
            function: "RENAME".into(),
            raw_args: raw,
        };
        let args = decode_args(&split, &cookie).unwrap();
        assert_eq!(args, vec!["/bin/sh", "7"]);
    }

    #[test]
    fn execve_fault_still_stops_the_argv_walk() {
        let cookie = Cookie::generate();
        let marker = cookie.marker();
        let raw = format!("{marker}0_str=\"/bin/sh\"{marker}1_str=fault{marker}2_str=\"ignored\"");
        let split = FieldSplit {
            comm: "x".into(),
            pid: 1,
            function: "EXECVE".into(),
            raw_args: raw,
        };
        let args = decode_args(&split, &cookie).unwrap();
        assert_eq!(args, vec!["/bin/sh"]);
    }

    #[test]
    fn tracepoint_decodes_plain_kv() {
        let split = FieldSplit {
            comm: "x".into(),
            pid: 1,
            function: "task_newtask".into(),
            raw_args: "pid=42 clone_flags=17 oom_score_adj=0".into(),
        };
        let cookie = Cookie::generate();
        let args = decode_args(&split, &cookie).unwrap();
        assert_eq!(args, vec!["42", "17", "0"]);
    }
}
