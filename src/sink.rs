//! Test State Sink: the single place a verdict for the whole cluster test
//! is recorded. First call wins; later calls are diagnostics only.

use std::process::ExitStatus;

use tracing::{info, warn};

use crate::context::Monitor;

#[derive(Debug, Clone)]
pub struct FailureRecord {
    pub reason: String,
    pub exit_status: Option<ExitStatus>,
}

#[derive(Debug, Clone)]
pub enum Verdict {
    Pass,
    Fail(FailureRecord),
}

impl Verdict {
    pub fn reason(&self) -> String {
        match self {
            Verdict::Pass => "pass".to_string(),
            Verdict::Fail(record) => record.reason.clone(),
        }
    }
}

pub struct TestStateSink {
    verdict: Monitor<Option<Verdict>>,
}

impl Default for TestStateSink {
    fn default() -> Self {
        Self::new()
    }
}

impl TestStateSink {
    pub fn new() -> Self {
        TestStateSink {
            verdict: Monitor::new(None),
        }
    }

    pub fn test_did_pass(&self) {
        let set = self
            .verdict
            .mutate_and_notify_all(|v| {
                if v.is_none() {
                    *v = Some(Verdict::Pass);
                    true
                } else {
                    false
                }
            })
            .unwrap_or(false);
        if set {
            info!("test verdict: pass");
        } else {
            warn!("test_did_pass called after a verdict was already recorded");
        }
    }

    pub fn test_did_fail(&self, record: FailureRecord) {
        let reason = record.reason.clone();
        let set = self
            .verdict
            .mutate_and_notify_all(|v| {
                if v.is_none() {
                    *v = Some(Verdict::Fail(record));
                    true
                } else {
                    false
                }
            })
            .unwrap_or(false);
        if set {
            warn!(reason, "test verdict: fail");
        } else {
            warn!(reason, "additional failure recorded after first-wins verdict");
        }
    }

    /// Non-blocking snapshot.
    pub fn verdict(&self) -> Option<Verdict> {
        self.verdict.with_lock(|v| v.clone()).unwrap_or(None)
    }

    /// Blocks until either `test_did_pass` or `test_did_fail` has been called.
    pub fn await_verdict(&self) -> Verdict {
        self.verdict
            .wait_until(|v| v.is_some(), |v| v.clone())
            .ok()
            .flatten()
            .expect("wait_until only returns once the predicate holds")
    }
}
