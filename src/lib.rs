pub mod cluster_info;
pub mod context;
pub mod control;
pub mod identity;
pub mod interlock;
pub mod log_stream;
pub mod logging;
pub mod sink;
pub mod supervisor;

pub use cluster_info::{ClusterInfo, ClusterInfoError, ServerEndpoint};
pub use control::{Control, ControlError};
pub use identity::{CommandSupplier, ConfigError, ServerId, ServerIdentity};
pub use interlock::{error::InterlockError, ServerState, StateInterlock};
pub use logging::{Logging, LoggingError};
pub use sink::{FailureRecord, TestStateSink, Verdict};
pub use supervisor::{error::SupervisorError, ExitOutcome, ServerSupervisor, SupervisorObserver};
