//! Error types for graph construction, planning and state persistence.
//!
//! Failures of an individual provider `apply`/`destroy` call are not errors
//! at this level: they are recorded as [`Outcome::Failed`](crate::Outcome)
//! on the change that produced them, so a run can report partial success.

use crate::types::ResourceStatus;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the orchestration core
#[derive(Debug, Error)]
pub enum Error {
    /// A resource with this id is already declared
    #[error("duplicate resource id: {id}")]
    DuplicateId { id: String },

    /// A resource id is empty or not usable as a stable identifier
    #[error("invalid resource id {id:?}: only ASCII letters, digits, '-' and '_' are allowed")]
    InvalidId { id: String },

    /// An edge or reference names a resource that is not in the graph
    #[error("unknown resource: {id}")]
    UnknownResource { id: String },

    /// Adding the dependency `from -> to` would close a cycle
    #[error("dependency cycle detected: {from} -> {to}")]
    CycleDetected { from: String, to: String },

    /// No provider is registered for a resource kind
    #[error("no provider registered for resource kind '{kind}'")]
    UnknownProviderKind { kind: String },

    /// A resource's desired properties were rejected by its provider
    #[error("invalid properties for {resource_id}: {source}")]
    InvalidProperties {
        resource_id: String,
        #[source]
        source: anyhow::Error,
    },

    /// A provider failed to diff desired and observed state
    #[error("planning failed for {resource_id}: {source}")]
    Planning {
        resource_id: String,
        #[source]
        source: anyhow::Error,
    },

    /// A status change that the resource lifecycle does not allow
    #[error("invalid status transition for {id}: {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: ResourceStatus,
        to: ResourceStatus,
    },

    /// Reading or writing the state directory failed
    #[error("state I/O error at {}: {source}", .path.display())]
    StateIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A persisted state record could not be parsed
    #[error("corrupt state record {}: {source}", .path.display())]
    StateDecode {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// A state record could not be serialized
    #[error("failed to encode state record for {id}: {source}")]
    StateEncode {
        id: String,
        #[source]
        source: toml::ser::Error,
    },

    /// The executor's worker pool could not be created
    #[error("failed to create worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}

/// Result type for orchestration operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_resource() {
        let err = Error::CycleDetected {
            from: "vpc".into(),
            to: "cluster".into(),
        };
        assert_eq!(err.to_string(), "dependency cycle detected: vpc -> cluster");

        let err = Error::Planning {
            resource_id: "alb".into(),
            source: anyhow::anyhow!("describe timed out"),
        };
        assert_eq!(err.to_string(), "planning failed for alb: describe timed out");
    }
}
