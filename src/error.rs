//! Error types for container discovery.

use thiserror::Error;

/// Errors raised while discovering containers and building the registry.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// Malformed or out-of-range configuration. Fatal at startup.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The container runtime could not be reached or refused a request.
    #[error("container runtime error: {0}")]
    Runtime(#[from] bollard::errors::Error),

    /// The runtime does not know the requested container or service.
    #[error("{0} not found")]
    NotFound(String),

    /// None of the container's networks passed the network policy.
    #[error("unable to find network settings for container {0}")]
    NoPermittedNetwork(String),

    /// Strict policy only: the container has no IPv4 address.
    #[error("no ipv4 address for container {0} found")]
    NoIpv4(String),

    /// Shared network namespaces chained deeper than we follow.
    #[error("network namespace of container {0} is nested too deeply")]
    NamespaceDepth(String),

    /// A name normalizes outside every configured zone.
    #[error("name {0} is not in any configured zone")]
    NameRejected(String),
}

impl DiscoveryError {
    /// Map a runtime error for `what` to `NotFound` when the API answered 404.
    pub fn from_runtime(what: &str, err: bollard::errors::Error) -> Self {
        match err {
            bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            } => DiscoveryError::NotFound(what.to_string()),
            other => DiscoveryError::Runtime(other),
        }
    }
}
