//! State Interlock: the shared, condition-variable-driven registry that
//! classifies every supervised server and exposes blocking queries over
//! the aggregate state. This monitor sits strictly below the control
//! facade's own lock and strictly above any one supervisor's internal
//! state.

pub mod error;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{error, info, warn};

use self::error::InterlockError;
use crate::context::Monitor;
use crate::identity::ServerId;
use crate::sink::{FailureRecord, TestStateSink};
use crate::supervisor::{ExitOutcome, SupervisorObserver};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Terminated,
    UnknownRunning,
    Active,
    Passive,
    ZappedRestarting,
}

#[derive(Debug, Clone)]
struct Entry {
    state: ServerState,
    pid: u32,
}

impl Entry {
    fn terminated() -> Self {
        Entry {
            state: ServerState::Terminated,
            pid: 0,
        }
    }
}

pub struct StateInterlock {
    sealed: AtomicBool,
    registry: Monitor<HashMap<ServerId, Entry>>,
    sink: Arc<TestStateSink>,
}

impl StateInterlock {
    pub fn new(sink: Arc<TestStateSink>) -> Self {
        StateInterlock {
            sealed: AtomicBool::new(false),
            registry: Monitor::new(HashMap::new()),
            sink,
        }
    }

    /// Called by the control facade on its first operation. Registrations
    /// after this point are rejected.
    pub fn seal(&self) {
        self.sealed.store(true, Ordering::SeqCst);
    }

    pub fn register(&self, id: ServerId) -> Result<(), InterlockError> {
        if self.sealed.load(Ordering::SeqCst) {
            return Err(InterlockError::AlreadySealed);
        }
        self.registry
            .with_lock(|entries| entries.insert(id, Entry::terminated()))?;
        Ok(())
    }

    fn failure(&self) -> Option<InterlockError> {
        self.sink
            .verdict()
            .map(|verdict| InterlockError::HarnessFailed(verdict.reason()))
    }

    fn transition(&self, id: &ServerId, apply: impl FnOnce(&mut Entry)) -> Result<(), InterlockError> {
        let mut violated = None;
        self.registry.mutate_and_notify_all(|entries| {
            let Some(entry) = entries.get_mut(id) else {
                return;
            };
            let before = entry.state;
            apply(entry);
            if entry.state == ServerState::Active {
                if let Some((other, _)) = entries
                    .iter()
                    .find(|(other_id, e)| *other_id != id && e.state == ServerState::Active)
                {
                    violated = Some((other.clone(), before));
                }
            }
            // Reject the transition outright rather than leaving a second
            // Active entry in the map: invariant §8.1 must hold at every
            // instant a waiter can observe, not just "eventually".
            if let Some((_, before_state)) = &violated {
                if let Some(entry) = entries.get_mut(id) {
                    entry.state = *before_state;
                }
            }
        })?;
        if let Some((other, _)) = violated {
            error!(incoming = %id, existing = %other, "two servers reported ACTIVE simultaneously");
            return Err(InterlockError::DuplicateActive {
                existing: other,
                incoming: id.clone(),
            });
        }
        Ok(())
    }

    pub fn wait_for_active(&self) -> Result<ServerId, InterlockError> {
        let sink = self.sink.clone();
        let result = self.registry.wait_until(
            move |entries| {
                sink.verdict().is_some()
                    || entries.values().any(|e| e.state == ServerState::Active)
            },
            |entries| {
                entries
                    .iter()
                    .find(|(_, e)| e.state == ServerState::Active)
                    .map(|(id, _)| id.clone())
            },
        )?;
        result.ok_or_else(|| self.failure().expect("predicate only wakes on active or failure"))
    }

    fn all_ready(entries: &HashMap<ServerId, Entry>) -> bool {
        !entries.values().any(|e| {
            matches!(
                e.state,
                ServerState::UnknownRunning | ServerState::ZappedRestarting
            )
        }) && entries.values().any(|e| e.state == ServerState::Active)
    }

    pub fn wait_for_all_ready(&self) -> Result<(), InterlockError> {
        let sink = self.sink.clone();
        // `f` runs under the same lock acquisition that satisfied the
        // predicate, so the "is the cluster actually ready" snapshot can't
        // be invalidated by a transition racing in between the wait
        // unblocking and a separate, later re-lock.
        let ready = self.registry.wait_until(
            move |entries| sink.verdict().is_some() || Self::all_ready(entries),
            |entries| Self::all_ready(entries),
        )?;
        if ready {
            return Ok(());
        }
        Err(self
            .failure()
            .expect("predicate only wakes once ready or a failure is recorded"))
    }

    pub fn wait_for_server_running(&self, id: &ServerId) -> Result<(), InterlockError> {
        let target = id.clone();
        let sink = self.sink.clone();
        let snapshot_target = id.clone();
        // As with `wait_for_all_ready`, capture whether `id` itself left
        // Terminated in the same locked snapshot that satisfied the
        // predicate; an unrelated harness failure can also wake this wait,
        // and re-checking after releasing the lock would reopen the race
        // where `id` legitimately started but crashed microseconds later.
        let left_terminated = self.registry.wait_until(
            move |entries| {
                sink.verdict().is_some()
                    || entries
                        .get(&target)
                        .map(|e| e.state != ServerState::Terminated)
                        .unwrap_or(true)
            },
            move |entries| {
                entries
                    .get(&snapshot_target)
                    .map(|e| e.state != ServerState::Terminated)
                    .unwrap_or(true)
            },
        )?;
        if left_terminated {
            return Ok(());
        }
        Err(self
            .failure()
            .expect("predicate only wakes once running or a failure is recorded"))
    }

    pub fn wait_for_server_termination(&self, id: &ServerId) -> Result<(), InterlockError> {
        let target = id.clone();
        let sink = self.sink.clone();
        let snapshot_target = id.clone();
        let reached_terminated = self.registry.wait_until(
            move |entries| {
                sink.verdict().is_some()
                    || entries
                        .get(&target)
                        .map(|e| e.state == ServerState::Terminated)
                        .unwrap_or(true)
            },
            move |entries| {
                entries
                    .get(&snapshot_target)
                    .map(|e| e.state == ServerState::Terminated)
                    .unwrap_or(true)
            },
        )?;
        if reached_terminated {
            return Ok(());
        }
        Err(self
            .failure()
            .expect("predicate only wakes once terminated or a failure is recorded"))
    }

    pub fn get_active_server(&self) -> Result<Option<ServerId>, InterlockError> {
        Ok(self.registry.with_lock(|entries| {
            entries
                .iter()
                .find(|(_, e)| e.state == ServerState::Active)
                .map(|(id, _)| id.clone())
        })?)
    }

    pub fn get_one_passive_server(&self) -> Result<Option<ServerId>, InterlockError> {
        Ok(self.registry.with_lock(|entries| {
            entries
                .iter()
                .find(|(_, e)| e.state == ServerState::Passive)
                .map(|(id, _)| id.clone())
        })?)
    }

    pub fn get_one_terminated_server(&self) -> Result<Option<ServerId>, InterlockError> {
        Ok(self.registry.with_lock(|entries| {
            entries
                .iter()
                .find(|(_, e)| e.state == ServerState::Terminated)
                .map(|(id, _)| id.clone())
        })?)
    }

    pub fn is_server_running(&self, id: &ServerId) -> Result<bool, InterlockError> {
        Ok(self
            .registry
            .with_lock(|entries| {
                entries
                    .get(id)
                    .map(|e| e.state != ServerState::Terminated)
                    .unwrap_or(false)
            })?)
    }
}

impl SupervisorObserver for StateInterlock {
    fn on_started(&self, id: &ServerId) {
        info!(server = %id, "-> unknown_running");
        let _ = self.transition(id, |e| {
            e.state = ServerState::UnknownRunning;
            e.pid = 0;
        });
    }

    fn on_pid(&self, id: &ServerId, pid: u32) {
        let _ = self.transition(id, |e| e.pid = pid);
    }

    fn on_active(&self, id: &ServerId) {
        info!(server = %id, "-> active");
        if let Err(err) = self.transition(id, |e| e.state = ServerState::Active) {
            error!(server = %id, %err, "rejecting ACTIVE transition");
        }
    }

    fn on_passive(&self, id: &ServerId) {
        info!(server = %id, "-> passive");
        let _ = self.transition(id, |e| e.state = ServerState::Passive);
    }

    fn on_zap(&self, id: &ServerId) {
        warn!(server = %id, "-> zapped_restarting");
        let _ = self.transition(id, |e| {
            e.state = ServerState::ZappedRestarting;
            e.pid = 0;
        });
    }

    fn on_terminated(&self, id: &ServerId, outcome: ExitOutcome) {
        let _ = self.transition(id, |e| {
            e.state = ServerState::Terminated;
            e.pid = 0;
        });

        if outcome.expected {
            return;
        }

        let reason = if !outcome.pid_ever_observed {
            format!("Server crashed before reporting PID: {id}")
        } else {
            format!(
                "Unexpected server crash: {id}, PID {}, {}",
                outcome.last_known_pid,
                outcome
                    .exit_status
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "unknown exit status".to_string())
            )
        };
        self.sink.test_did_fail(FailureRecord {
            reason,
            exit_status: outcome.exit_status,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    fn interlock() -> (Arc<StateInterlock>, Arc<TestStateSink>) {
        let sink = Arc::new(TestStateSink::new());
        (Arc::new(StateInterlock::new(sink.clone())), sink)
    }

    #[test]
    fn at_most_one_active_is_enforced() {
        let (interlock, _sink) = interlock();
        let a = ServerId::new("a");
        let b = ServerId::new("b");
        interlock.register(a.clone()).unwrap();
        interlock.register(b.clone()).unwrap();

        interlock.on_started(&a);
        interlock.on_pid(&a, 1);
        interlock.on_active(&a);

        interlock.on_started(&b);
        interlock.on_pid(&b, 2);
        interlock.on_active(&b);

        // second ACTIVE call is rejected but does not corrupt a's state
        assert_eq!(interlock.get_active_server().unwrap(), Some(a));
    }

    #[test]
    fn rejected_active_transition_reverts_the_losing_entry() {
        let (interlock, _sink) = interlock();
        let a = ServerId::new("a");
        let b = ServerId::new("b");
        interlock.register(a.clone()).unwrap();
        interlock.register(b.clone()).unwrap();

        interlock.on_started(&a);
        interlock.on_pid(&a, 1);
        interlock.on_active(&a);

        interlock.on_started(&b);
        interlock.on_pid(&b, 2);
        interlock.on_active(&b);

        // b's attempted transition to Active must be rolled back, not just
        // ignored by get_active_server's "find first" scan: exactly one
        // entry in the whole registry may report Active.
        let active_count = interlock
            .registry
            .with_lock(|entries| {
                entries
                    .values()
                    .filter(|e| e.state == ServerState::Active)
                    .count()
            })
            .unwrap();
        assert_eq!(active_count, 1);
    }

    #[test]
    fn wait_for_active_unblocks_on_transition() {
        let (interlock, _sink) = interlock();
        let a = ServerId::new("a");
        interlock.register(a.clone()).unwrap();
        interlock.on_started(&a);

        let waiter = interlock.clone();
        let handle = thread::spawn(move || waiter.wait_for_active().unwrap());

        thread::sleep(Duration::from_millis(20));
        interlock.on_pid(&a, 7);
        interlock.on_active(&a);

        assert_eq!(handle.join().unwrap(), a);
    }

    #[test]
    fn wait_for_active_wakes_on_harness_failure() {
        let (interlock, sink) = interlock();
        let a = ServerId::new("a");
        interlock.register(a.clone()).unwrap();
        interlock.on_started(&a);

        let waiter = interlock.clone();
        let handle = thread::spawn(move || waiter.wait_for_active());

        thread::sleep(Duration::from_millis(20));
        interlock.on_terminated(
            &a,
            ExitOutcome {
                expected: false,
                exit_status: None,
                pid_ever_observed: false,
                last_known_pid: 0,
            },
        );

        assert!(handle.join().unwrap().is_err());
        assert!(sink.verdict().is_some());
    }

    #[test]
    fn register_after_seal_is_rejected() {
        let (interlock, _sink) = interlock();
        interlock.seal();
        assert!(matches!(
            interlock.register(ServerId::new("late")),
            Err(InterlockError::AlreadySealed)
        ));
    }

    #[test]
    fn wait_for_server_running_succeeds_despite_an_unrelated_failure() {
        let (interlock, _sink) = interlock();
        let a = ServerId::new("a");
        let b = ServerId::new("b");
        interlock.register(a.clone()).unwrap();
        interlock.register(b.clone()).unwrap();

        // b crashes unexpectedly, recording a harness failure, but a starts
        // up cleanly regardless; a's own wait must not be reported as
        // failed just because some failure was recorded somewhere.
        interlock.on_started(&b);
        interlock.on_terminated(
            &b,
            ExitOutcome {
                expected: false,
                exit_status: None,
                pid_ever_observed: false,
                last_known_pid: 0,
            },
        );
        interlock.on_started(&a);

        assert!(interlock.wait_for_server_running(&a).is_ok());
    }

    #[test]
    fn wait_for_server_termination_reports_harness_failure_when_still_running() {
        let (interlock, sink) = interlock();
        let a = ServerId::new("a");
        interlock.register(a.clone()).unwrap();
        interlock.on_started(&a);
        interlock.on_pid(&a, 1);

        sink.test_did_fail(FailureRecord {
            reason: "unrelated".to_string(),
            exit_status: None,
        });

        // a itself never terminated, so the wait must surface the failure.
        assert!(interlock.wait_for_server_termination(&a).is_err());
    }
}
