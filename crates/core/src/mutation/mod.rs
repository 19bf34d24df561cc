//! Mutation orchestrator: every create/update/delete on a resource goes
//! through a local transaction, then a remote hook, with compensation.

mod handlers;
mod hooks;
mod model;
mod orchestrator;
mod retry;
mod store;

#[cfg(test)]
mod tests;

pub use handlers::*;
pub use hooks::*;
pub use model::*;
pub use orchestrator::*;
pub use retry::*;
pub use store::*;
