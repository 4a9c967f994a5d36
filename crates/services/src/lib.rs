//! Reactive service container.
//!
//! Long-lived subsystems (config, auth, model client, tool permissions) are
//! registered with a factory and the names of the services they depend on.
//! The container builds them lazily, never runs two loads of the same
//! service at once, and on `reload` rebuilds every transitive dependent
//! bottom-up. State transitions are broadcast as [`ServiceEvent`]s.

pub mod container;
pub mod graph;

pub use container::{ResolvedDeps, ServiceContainer, ServiceEvent, ServiceState, ServiceStatus};
