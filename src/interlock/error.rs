use thiserror::Error;

use crate::identity::ServerId;

#[derive(Error, Debug)]
pub enum InterlockError {
    #[error("no server registered with id `{0}`")]
    UnknownServer(ServerId),

    #[error("registry already sealed by the first control call")]
    AlreadySealed,

    #[error(
        "invariant violated: `{incoming}` reported ACTIVE while `{existing}` is already active"
    )]
    DuplicateActive {
        existing: ServerId,
        incoming: ServerId,
    },

    #[error("harness has already recorded a failure: `{0}`")]
    HarnessFailed(String),

    #[error("interlock monitor lock poisoned")]
    Poisoned,
}

impl From<crate::context::Poisoned> for InterlockError {
    fn from(_: crate::context::Poisoned) -> Self {
        InterlockError::Poisoned
    }
}
