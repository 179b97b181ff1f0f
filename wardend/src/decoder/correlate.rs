use crate::event::Event;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Stage C: pairs call events with their return counterparts.
///
/// The original implementation kept call events in an unbounded map keyed
/// by `pid || function` until a matching `ret_*` event arrived — a known
/// memory leak when a process exits (or a kprobe's return probe never
/// fires) and no return ever comes. This version bounds residency with a
/// per-entry TTL, swept on every call to `insert`/`correlate`, and clears
/// every pending entry for a pid the moment that pid's `EXIT` call is seen.
pub struct CorrelationTable {
    ttl: Duration,
    pending: HashMap<String, (Event, Instant)>,
}

fn key(pid: i32, function: &str) -> String {
    format!("{pid}|{function}")
}

impl CorrelationTable {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            pending: HashMap::new(),
        }
    }

    /// Handle one decoded event. Returns `Some(event)` for anything that
    /// should be forwarded to the rule engine immediately (tracepoints,
    /// EXIT calls, and calls whose return just arrived); returns `None`
    /// when the event was stored pending correlation or dropped.
    pub fn step(&mut self, event: Event) -> Option<Event> {
        self.sweep_expired();

        if event.is_tracepoint() {
            return Some(event);
        }

        if let Some(suffix) = event.function.strip_prefix("ret_") {
            let k = key(event.pid, suffix);
            if let Some((mut call, _)) = self.pending.remove(&k) {
                call.ret_value = event.args;
                return Some(call);
            }
            log::debug!(
                "correlation miss: no pending call for pid={} function={}",
                event.pid,
                suffix
            );
            return None;
        }

        if event.function == "EXIT" {
            self.clear_pid(event.pid);
            return Some(event);
        }

        let k = key(event.pid, &event.function);
        self.pending.insert(k, (event, Instant::now()));
        None
    }

    /// Drop every pending call belonging to a pid (called on that pid's EXIT,
    /// since no return for an exited task's in-flight calls will ever arrive).
    pub fn clear_pid(&mut self, pid: i32) {
        self.pending
            .retain(|_, (event, _)| event.pid != pid);
    }

    fn sweep_expired(&mut self) {
        let ttl = self.ttl;
        let now = Instant::now();
        self.pending.retain(|k, (_, inserted)| {
            let alive = now.duration_since(*inserted) < ttl;
            if !alive {
                log::debug!("correlation entry expired: {k}");
            }
            alive
        });
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ev(pid: i32, function: &str) -> Event {
        Event {
            comm: "x".into(),
            pid,
            function: function.into(),
            args: vec![],
            ret_value: vec![],
        }
    }

    #[test]
    fn call_then_return_pairs_up() {
        let mut table = CorrelationTable::new(Duration::from_secs(5));
        assert!(table.step(ev(10, "EXECVE")).is_none());
        let mut ret = ev(10, "ret_EXECVE");
        ret.args = vec!["0".into()];
        let forwarded = table.step(ret).expect("should pair");
        assert_eq!(forwarded.ret_value, vec!["0".to_string()]);
    }

    #[test]
    fn exit_is_forwarded_immediately() {
        let mut table = CorrelationTable::new(Duration::from_secs(5));
        let forwarded = table.step(ev(10, "EXIT")).expect("EXIT always forwards");
        assert_eq!(forwarded.function, "EXIT");
    }

    #[test]
    fn exit_clears_pending_calls_for_pid() {
        let mut table = CorrelationTable::new(Duration::from_secs(5));
        table.step(ev(10, "FORK"));
        assert_eq!(table.pending_len(), 1);
        table.step(ev(10, "EXIT"));
        assert_eq!(table.pending_len(), 0);
    }

    #[test]
    fn unmatched_return_is_dropped() {
        let mut table = CorrelationTable::new(Duration::from_secs(5));
        assert!(table.step(ev(10, "ret_EXECVE")).is_none());
    }

    #[test]
    fn entries_expire_after_ttl() {
        let mut table = CorrelationTable::new(Duration::from_millis(1));
        table.step(ev(10, "FORK"));
        std::thread::sleep(Duration::from_millis(5));
        // the sweep happens on the next `step` call
        table.step(ev(99, "task_newtask"));
        assert_eq!(table.pending_len(), 0);
    }

    #[test]
    fn tracepoints_bypass_correlation() {
        let mut table = CorrelationTable::new(Duration::from_secs(5));
        let forwarded = table.step(ev(10, "task_newtask")).expect("tracepoints forward directly");
        assert_eq!(forwarded.function, "task_newtask");
        assert_eq!(table.pending_len(), 0);
    }
}
