//! Replication domain: task log, watermark tracker, resync coordinator.

mod admin;
mod model;
mod pager;
mod replay;
mod resync;
mod traits;

pub use admin::*;
pub use model::*;
pub use pager::*;
pub use replay::*;
pub use resync::*;
pub use traits::*;
