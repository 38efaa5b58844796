//! Bot fleet runtime: one runner per bot, a registry that owns them, and a
//! reconciler that keeps the registry in line with the desired state.

pub mod reconciler;
pub mod registry;
pub mod runner;

#[cfg(test)]
pub(crate) mod testing;

pub use reconciler::{FleetReconciler, ReconcileReport};
pub use registry::FleetRegistry;
pub use runner::{Runner, RunnerDeps, RunnerState};
