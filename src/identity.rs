use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

/// Unique name identifying one server in the cluster. A thin newtype
/// (mirroring `AgentID` in the sub-agent registry) so the map keys used
/// throughout the interlock can't accidentally be confused with arbitrary
/// strings.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ServerId(Arc<str>);

impl ServerId {
    pub fn new(name: impl Into<String>) -> Self {
        ServerId(Arc::from(name.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("server name must not be empty")]
    EmptyName,
    #[error("heap size must be positive, got {0}")]
    NonPositiveHeap(i64),
}

/// Startup command supplier: called fresh on every `start()` so the caller
/// can re-resolve paths (e.g. a rotated config symlink) rather than baking
/// argv in at registration time.
pub type CommandSupplier = Arc<dyn Fn() -> Vec<String> + Send + Sync>;

/// Immutable description of one cluster member. Validated at construction;
/// the working directory's existence is checked later, at supervisor
/// `start()` time, since it may legitimately not exist yet at registration.
#[derive(Clone)]
pub struct ServerIdentity {
    id: ServerId,
    working_dir: PathBuf,
    heap_mb: i64,
    debug_port: u16,
    system_properties: BTreeMap<String, String>,
    command: CommandSupplier,
}

impl fmt::Debug for ServerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerIdentity")
            .field("id", &self.id)
            .field("working_dir", &self.working_dir)
            .field("heap_mb", &self.heap_mb)
            .field("debug_port", &self.debug_port)
            .field("system_properties", &self.system_properties)
            .finish()
    }
}

impl ServerIdentity {
    pub fn new(
        name: impl Into<String>,
        working_dir: impl Into<PathBuf>,
        heap_mb: i64,
        debug_port: u16,
        system_properties: BTreeMap<String, String>,
        command: CommandSupplier,
    ) -> Result<Self, ConfigError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ConfigError::EmptyName);
        }
        if heap_mb <= 0 {
            return Err(ConfigError::NonPositiveHeap(heap_mb));
        }
        Ok(ServerIdentity {
            id: ServerId::new(name),
            working_dir: working_dir.into(),
            heap_mb,
            debug_port,
            system_properties,
            command,
        })
    }

    pub fn id(&self) -> &ServerId {
        &self.id
    }

    pub fn working_dir(&self) -> &PathBuf {
        &self.working_dir
    }

    pub fn heap_mb(&self) -> i64 {
        self.heap_mb
    }

    pub fn debug_port(&self) -> u16 {
        self.debug_port
    }

    pub fn system_properties(&self) -> &BTreeMap<String, String> {
        &self.system_properties
    }

    pub fn command(&self) -> Vec<String> {
        (self.command)()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn supplier() -> CommandSupplier {
        Arc::new(|| vec!["./start.sh".to_string()])
    }

    #[test]
    fn rejects_empty_name() {
        let err = ServerIdentity::new("  ", "/tmp", 64, 0, BTreeMap::new(), supplier()).unwrap_err();
        assert_matches::assert_matches!(err, ConfigError::EmptyName);
    }

    #[test]
    fn rejects_nonpositive_heap() {
        let err = ServerIdentity::new("s1", "/tmp", 0, 0, BTreeMap::new(), supplier()).unwrap_err();
        assert_matches::assert_matches!(err, ConfigError::NonPositiveHeap(0));
    }

    #[test]
    fn command_is_resolved_fresh_each_call() {
        let identity =
            ServerIdentity::new("s1", "/tmp", 64, 0, BTreeMap::new(), supplier()).unwrap();
        assert_eq!(identity.command(), vec!["./start.sh".to_string()]);
        assert_eq!(identity.command(), vec!["./start.sh".to_string()]);
    }
}
