//! # Infragraph
//!
//! Declarative infrastructure orchestration.
//!
//! Declare the resources you want and how they depend on each other; the
//! engine works out what must change relative to the last applied state and
//! applies those changes with bounded parallelism.
//!
//! ## Core Concepts
//!
//! - **ResourceGraph**: Declared resources and the dependencies between them
//! - **Provider**: Performs create/update/delete for one resource kind
//! - **Plan**: The ordered change-set between recorded and desired state
//! - **Executor**: Applies a plan, skipping only what depends on a failure
//! - **StateStore**: The last successfully applied snapshot of each resource
//!
//! ## Example
//!
//! ```ignore
//! use infragraph::{
//!     Applied, ApplyRequest, EngineContext, ExecuteOptions, FileStateStore, Provider,
//!     ProviderRegistry, ResourceGraph, ResourceSpec, StateRecord, execute_simple, plan,
//! };
//!
//! #[derive(Debug)]
//! struct Bucket;
//!
//! impl Provider for Bucket {
//!     fn apply(&self, request: &ApplyRequest<'_>) -> anyhow::Result<Applied> {
//!         Ok(Applied::new(format!("bucket-{}", request.resource_id))
//!             .with_output("arn", format!("arn:bucket:{}", request.resource_id)))
//!     }
//!
//!     fn destroy(&self, _record: &StateRecord) -> anyhow::Result<()> {
//!         Ok(())
//!     }
//! }
//!
//! let mut registry = ProviderRegistry::new();
//! registry.register("bucket", Bucket);
//! let store = FileStateStore::new(".state");
//!
//! let mut graph = ResourceGraph::new();
//! graph.add(ResourceSpec::new("logs", "bucket"))?;
//! graph.add(ResourceSpec::new("archive", "bucket").with_ref("source", "logs", "arn"))?;
//!
//! let ctx = EngineContext::new(&registry, &store);
//! let plan = plan(&ctx, &mut graph)?;
//! let result = execute_simple(&ctx, &plan, &ExecuteOptions::default())?;
//! assert!(result.is_success());
//! ```
//!
//! Planning never calls `apply`/`destroy` and never writes state; a second
//! run against unchanged declarations makes no provider calls at all.

pub mod context;
pub mod error;
pub mod executor;
pub mod graph;
pub mod planner;
pub mod provider;
pub mod retry;
pub mod state;
pub mod types;

// Re-export main types at crate root
pub use context::{CancellationToken, EngineContext, NoProgress, ProgressCallback};
pub use error::{Error, Result};
pub use executor::{ChangeResult, RunResult, converge, execute, execute_simple};
pub use graph::{Resource, ResourceGraph, ResourceSpec};
pub use planner::{Change, Plan, PlanSummary, plan, plan_destroy};
pub use provider::{
    Applied, ApplyRequest, PropertySpec, PropertyType, Provider, ProviderRegistry, Schema,
    diff_properties,
};
pub use retry::{RetryPolicy, with_retry};
pub use state::{FileStateStore, MemoryStateStore, StateRecord, StateStore};
pub use types::{
    ChangeKind, ExecuteOptions, ExecuteSummary, Outcome, Phase, Properties, Reference,
    ResourceStatus, RunStatus, SkipReason, Value,
};
