//! converge-provisioner
//!
//! Declarative reconciliation engine: converges a desired topology of cloud
//! resources (buckets, serverless services, SQL, load balancing, scheduler
//! jobs) against what exists, with state kept in a shared blob store.
//!
//! Public API:
//! - [`Engine::plan`]: refresh and plan without changing anything
//! - [`Engine::deploy`]: lock, load, refresh, plan, apply, persist, unlock
//! - [`Engine::destroy`]: deploy an empty topology
//! - [`plan::plan_resource`] and [`apply::execute_action`]: the per-resource
//!   building blocks, for callers driving their own workflow
//!
//! Resource kinds talk to the cloud only through the capability traits in
//! [`provider`]; the caller supplies implementations via [`Providers`].

pub mod apply;
pub mod config;
pub mod error;
pub mod field;
pub mod file_sync;
pub mod instance_lock;
pub mod orchestrate;
pub mod payload;
pub mod persistence;
pub mod plan;
pub mod progress;
pub mod provider;
pub mod readiness;
pub mod registry;
pub mod resource;
pub mod resources;
pub mod routing;
pub mod state;
pub mod workspace;

pub use crate::apply::{ApplyOutcome, ApplySettings};
pub use crate::config::EngineConfig;
pub use crate::error::ProvisionerError;
pub use crate::field::{AnyField, Field, FieldError};
pub use crate::orchestrate::{ApplyReport, CacheFlush, Engine};
pub use crate::payload::{Identity, Payload};
pub use crate::persistence::StatePersistence;
pub use crate::plan::{ActionKind, OperationKind, Plan, PlanAction, PlanOperation, PlanSummary};
pub use crate::progress::{ProgressEvent, ProgressSink, StepStatus};
pub use crate::provider::Providers;
pub use crate::registry::Registry;
pub use crate::resource::{Resource, Tier};
pub use crate::state::ProvisionerState;
pub use crate::workspace::{ResourceSpec, Topology, Workspace};
