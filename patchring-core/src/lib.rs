//! Core of patchring: drives a patch management REST API through a
//! scan, deploy and restart cycle for two machine-group rings.
//!
//! The pieces are layered bottom-up:
//!
//! - [`api`]: HTTP client for the console API, logging every exchange.
//! - [`resolver`]: maps configured names to server-side identifiers.
//! - [`poll`]: cooperative wait loop over a pluggable [`poll::Clock`].
//! - [`scan`] / [`deployment`]: start an operation and wait on it.
//! - [`remote`]: shutdown/reboot of patched machines.
//! - [`vcenter`]: optional power-on of the server ring.
//! - [`workflow`]: the end-to-end sequence.

pub mod api;
pub mod deployment;
pub mod error;
pub mod model;
pub mod operations;
pub mod poll;
pub mod remote;
pub mod resolver;
pub mod scan;
pub mod vcenter;
pub mod workflow;

#[cfg(test)]
pub(crate) mod testing;

pub use api::PatchApiClient;
pub use error::{
    ApiError, PollError, RemoteControlError, ResolutionError,
    TransientPollError, WorkflowError,
};
pub use model::{
    MachineRecord, OperationState, OperationStatus, ResolvedIds, ResourceId,
    ResourceKind,
};
pub use poll::{Clock, PollPolicy, TokioClock};
pub use remote::{RemoteControl, RemoteExit};
pub use workflow::{Ring, RingReport, Workflow, WorkflowReport};
