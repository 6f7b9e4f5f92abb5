//! Cluster descriptor: the set of server identities and endpoint metadata
//! handed both to supervisors (for naming/logging) and to test clients
//! (for connection). Encoded as a `;`-delimited concatenation of per-server
//! tokens rather than via `serde`, since this is the one wire format the
//! harness itself defines end to end.

use thiserror::Error;

use crate::identity::ServerId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerEndpoint {
    pub id: ServerId,
    pub host: String,
    pub port: u16,
}

impl ServerEndpoint {
    fn encode(&self) -> String {
        format!("{}@{}:{}", self.id, self.host, self.port)
    }

    fn decode(token: &str) -> Result<Self, ClusterInfoError> {
        let (name, rest) = token
            .split_once('@')
            .ok_or_else(|| ClusterInfoError::Malformed(token.to_string()))?;
        let (host, port) = rest
            .rsplit_once(':')
            .ok_or_else(|| ClusterInfoError::Malformed(token.to_string()))?;
        let port: u16 = port
            .parse()
            .map_err(|_| ClusterInfoError::Malformed(token.to_string()))?;
        if name.is_empty() || host.is_empty() {
            return Err(ClusterInfoError::Malformed(token.to_string()));
        }
        Ok(ServerEndpoint {
            id: ServerId::new(name),
            host: host.to_string(),
            port,
        })
    }
}

#[derive(Error, Debug)]
pub enum ClusterInfoError {
    #[error("malformed cluster descriptor token: `{0}`")]
    Malformed(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterInfo {
    servers: Vec<ServerEndpoint>,
}

impl ClusterInfo {
    pub fn new(servers: Vec<ServerEndpoint>) -> Self {
        ClusterInfo { servers }
    }

    pub fn servers(&self) -> &[ServerEndpoint] {
        &self.servers
    }

    pub fn encode(&self) -> String {
        self.servers
            .iter()
            .map(ServerEndpoint::encode)
            .collect::<Vec<_>>()
            .join(";")
    }

    pub fn decode(encoded: &str) -> Result<Self, ClusterInfoError> {
        if encoded.is_empty() {
            return Ok(ClusterInfo::default());
        }
        let servers = encoded
            .split(';')
            .map(ServerEndpoint::decode)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ClusterInfo { servers })
    }
}
