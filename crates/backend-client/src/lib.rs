//! Direct REST client for the networking backend.
//!
//! Provides the `direct_rest` mutation hooks and `build_hooks`, which picks
//! the hooks for the configured client kind.

pub mod client;
pub mod error;
pub mod hooks;

pub use client::{collection_path, BackendClient};
pub use error::{ApiRetryClass, BackendError, Result};
pub use hooks::{build_hooks, DirectBackendHooks};
