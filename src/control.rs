//! Multi-Process Control: the facade test code actually calls. Every
//! operation takes the controller's own lock first — before touching the
//! interlock or any supervisor — so that two test threads can never
//! interleave control operations. Lock order: this mutex, then the
//! interlock's monitor, then whichever supervisor's own gate.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::info;

use crate::identity::ServerId;
use crate::interlock::error::InterlockError;
use crate::interlock::StateInterlock;
use crate::supervisor::error::SupervisorError;
use crate::supervisor::ServerSupervisor;

#[derive(Error, Debug)]
pub enum ControlError {
    #[error("no terminated server available to start")]
    NoTerminatedServer,

    #[error("no active server to terminate")]
    NoActiveServer,

    #[error("interlock error: `{0}`")]
    Interlock(#[from] InterlockError),

    #[error("supervisor error: `{0}`")]
    Supervisor(#[from] SupervisorError),

    #[error("control lock poisoned")]
    Poisoned,
}

impl<T> From<std::sync::PoisonError<T>> for ControlError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        ControlError::Poisoned
    }
}

pub struct Control {
    lock: Mutex<()>,
    interlock: Arc<StateInterlock>,
    supervisors: HashMap<ServerId, Arc<ServerSupervisor>>,
}

impl Control {
    pub fn new(
        interlock: Arc<StateInterlock>,
        supervisors: HashMap<ServerId, Arc<ServerSupervisor>>,
    ) -> Self {
        Control {
            lock: Mutex::new(()),
            interlock,
            supervisors,
        }
    }

    fn supervisor(&self, id: &ServerId) -> Result<&Arc<ServerSupervisor>, ControlError> {
        self.supervisors
            .get(id)
            .ok_or_else(|| ControlError::Interlock(InterlockError::UnknownServer(id.clone())))
    }

    /// No-op marker used by test code to establish a synchronization point
    /// before issuing the next control call; present for parity with the
    /// other operations' locking discipline and for tracing visibility.
    pub fn synchronize_client(&self) -> Result<(), ControlError> {
        let _guard = self.lock.lock()?;
        self.interlock.seal();
        info!("control: synchronize_client");
        Ok(())
    }

    pub fn wait_for_active(&self) -> Result<ServerId, ControlError> {
        let _guard = self.lock.lock()?;
        self.interlock.seal();
        Ok(self.interlock.wait_for_active()?)
    }

    pub fn wait_for_running_passives_in_standby(&self) -> Result<(), ControlError> {
        let _guard = self.lock.lock()?;
        self.interlock.seal();
        Ok(self.interlock.wait_for_all_ready()?)
    }

    pub fn start_one_server(&self) -> Result<ServerId, ControlError> {
        let _guard = self.lock.lock()?;
        self.interlock.seal();
        let id = self
            .interlock
            .get_one_terminated_server()?
            .ok_or(ControlError::NoTerminatedServer)?;
        info!(server = %id, "control: start_one_server");
        self.supervisor(&id)?.start()?;
        self.interlock.wait_for_server_running(&id)?;
        Ok(id)
    }

    pub fn start_all_servers(&self) -> Result<(), ControlError> {
        let _guard = self.lock.lock()?;
        self.interlock.seal();
        loop {
            let Some(id) = self.interlock.get_one_terminated_server()? else {
                break;
            };
            info!(server = %id, "control: start_all_servers starting next");
            self.supervisor(&id)?.start()?;
            self.interlock.wait_for_server_running(&id)?;
        }
        Ok(())
    }

    pub fn terminate_active(&self) -> Result<(), ControlError> {
        let _guard = self.lock.lock()?;
        self.interlock.seal();
        let id = self
            .interlock
            .get_active_server()?
            .ok_or(ControlError::NoActiveServer)?;
        info!(server = %id, "control: terminate_active");
        self.supervisor(&id)?.stop()?;
        self.interlock.wait_for_server_termination(&id)?;
        Ok(())
    }

    pub fn terminate_one_passive(&self) -> Result<(), ControlError> {
        let _guard = self.lock.lock()?;
        self.interlock.seal();
        let Some(id) = self.interlock.get_one_passive_server()? else {
            return Ok(());
        };
        info!(server = %id, "control: terminate_one_passive");
        self.supervisor(&id)?.stop()?;
        self.interlock.wait_for_server_termination(&id)?;
        Ok(())
    }

    /// Stops every passive first, then the active: stopping the active
    /// first can trigger a fail-over of a passive before this call gets to
    /// it, losing track of which server is which.
    pub fn terminate_all_servers(&self) -> Result<(), ControlError> {
        let _guard = self.lock.lock()?;
        self.interlock.seal();
        self.interlock.wait_for_all_ready()?;

        while let Some(id) = self.interlock.get_one_passive_server()? {
            info!(server = %id, "control: terminate_all_servers stopping passive");
            self.supervisor(&id)?.stop()?;
            self.interlock.wait_for_server_termination(&id)?;
        }

        if let Some(id) = self.interlock.get_active_server()? {
            info!(server = %id, "control: terminate_all_servers stopping active");
            self.supervisor(&id)?.stop()?;
            self.interlock.wait_for_server_termination(&id)?;
        }
        Ok(())
    }
}
