//! Line-buffered tee of a child's stdout: every line is forwarded verbatim
//! to a mirror sink, then tested against a fixed set of substrings to
//! extract the events the state interlock cares about.

use std::io::{BufRead, BufReader, Read, Write};
use std::sync::mpsc::Sender;
use std::thread::{self, JoinHandle};

use regex::Regex;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEvent {
    Pid(u32),
    Active,
    Passive,
    Zap,
    Warn(String),
    Error(String),
}

const PID_SUBSTR: &str = "PID is";
const ACTIVE_SUBSTR: &str = "has started up as ACTIVE node";
const PASSIVE_SUBSTR: &str = "Moved to State[ PASSIVE-STANDBY ]";
const ZAP_SUBSTR: &str = "Restarting the server";
const WARN_SUBSTR: &str = "WARN";
const ERROR_SUBSTR: &str = "ERROR";

fn pid_pattern() -> Regex {
    Regex::new(r"PID is (\d+)").expect("static PID pattern is valid")
}

/// Classifies one completed line into zero or more events, in a fixed
/// check order. A line matching more than one substring fires more than
/// one event.
fn classify(line: &str, pid_pattern: &Regex) -> Vec<LogEvent> {
    let mut events = Vec::new();

    if line.contains(PID_SUBSTR) {
        match pid_pattern
            .captures(line)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<u32>().ok())
        {
            Some(pid) => events.push(LogEvent::Pid(pid)),
            None => warn!(line, "line mentions PID but did not match the expected pattern"),
        }
    }
    if line.contains(ACTIVE_SUBSTR) {
        events.push(LogEvent::Active);
    }
    if line.contains(PASSIVE_SUBSTR) {
        events.push(LogEvent::Passive);
    }
    if line.contains(ZAP_SUBSTR) {
        events.push(LogEvent::Zap);
    }
    if line.contains(WARN_SUBSTR) {
        events.push(LogEvent::Warn(line.to_string()));
    }
    if line.contains(ERROR_SUBSTR) {
        events.push(LogEvent::Error(line.to_string()));
    }

    events
}

/// Spawns the reader thread for a child's stdout: tees every completed
/// line to `mirror` and sends extracted events to `sender`. A partial
/// final line (no trailing newline before the stream closes) is discarded
/// rather than classified as a complete line.
pub fn spawn_stdout_reader<R, W>(reader: R, mut mirror: W, sender: Sender<LogEvent>) -> JoinHandle<()>
where
    R: Read + Send + 'static,
    W: Write + Send + 'static,
{
    thread::spawn(move || {
        let pattern = pid_pattern();
        let mut reader = BufReader::new(reader);
        let mut buf = String::new();
        loop {
            buf.clear();
            match reader.read_line(&mut buf) {
                Ok(0) => break,
                Ok(_) if !buf.ends_with('\n') => break, // partial final line: discard
                Ok(_) => {}
                Err(_) => {
                    warn!("stdout reader encountered an I/O error, stopping");
                    break;
                }
            }
            let line = buf.trim_end_matches(['\n', '\r']);
            if writeln!(mirror, "{line}").is_err() {
                warn!("failed to mirror stdout line to log sink");
            }
            for event in classify(line, &pattern) {
                if sender.send(event).is_err() {
                    // interlock side has gone away (shutdown in progress); keep
                    // draining so the child's pipe never blocks on a full buffer.
                }
            }
        }
    })
}

/// Spawns the reader thread for a child's stderr: log-only, no event
/// extraction, simply tee'd to the mirror sink.
pub fn spawn_stderr_mirror<R, W>(reader: R, mut mirror: W) -> JoinHandle<()>
where
    R: Read + Send + 'static,
    W: Write + Send + 'static,
{
    thread::spawn(move || {
        let mut lines = BufReader::new(reader).lines();
        while let Some(line) = lines.next() {
            let Ok(line) = line else { break };
            let _ = writeln!(mirror, "{line}");
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use tracing_test::traced_test;

    #[traced_test]
    #[test]
    fn malformed_pid_line_logs_a_diagnostic_warning() {
        let pattern = pid_pattern();
        let events = classify("the PID is unknown right now", &pattern);
        assert!(events.is_empty());
        assert!(tracing_test::internal::logs_with_scope_contain(
            module_path!(),
            "did not match the expected pattern"
        ));
    }

    #[test]
    fn pid_line_extracts_decimal() {
        let pattern = pid_pattern();
        let events = classify("2026-07-28 INFO PID is 4242 starting up", &pattern);
        assert_eq!(events, vec![LogEvent::Pid(4242)]);
    }

    #[test]
    fn malformed_pid_line_is_ignored_not_fatal() {
        let pattern = pid_pattern();
        let events = classify("the PID is unknown right now", &pattern);
        assert!(events.is_empty());
    }

    #[test]
    fn active_and_warn_on_same_line_both_fire() {
        let pattern = pid_pattern();
        let line = "WARN: node has started up as ACTIVE node under duress";
        let events = classify(line, &pattern);
        assert_eq!(events, vec![LogEvent::Active, LogEvent::Warn(line.to_string())]);
    }

    #[test]
    fn reader_tees_lines_and_emits_events_in_order() {
        let input = b"line one\nPID is 99\nhas started up as ACTIVE node\n".to_vec();
        let mirror = Vec::new();
        let (tx, rx) = mpsc::channel();

        let handle = spawn_stdout_reader(std::io::Cursor::new(input), mirror, tx);
        handle.join().unwrap();

        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(events, vec![LogEvent::Pid(99), LogEvent::Active]);
    }

    #[test]
    fn partial_final_line_is_discarded() {
        let input =
            b"has started up as ACTIVE node\nhas started up as ACTIVE node partial tail".to_vec();
        let mirror = Vec::new();
        let (tx, rx) = mpsc::channel();

        let handle = spawn_stdout_reader(std::io::Cursor::new(input), mirror, tx);
        handle.join().unwrap();

        // The second "line" never saw a trailing newline before EOF, so it is
        // dropped entirely rather than classified.
        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(events, vec![LogEvent::Active]);
    }
}
