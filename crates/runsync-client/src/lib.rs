pub mod config;
pub mod error;
pub mod history;
pub mod session;
pub mod sse;
pub mod stream;
pub mod trigger;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::ClientConfig;
    pub use crate::error::{ClientError, Result};
    pub use crate::history::HistoryClient;
    pub use crate::session::RunSession;
    pub use crate::stream::{CancelHandle, EventStream, EventStreamClient};
    pub use crate::trigger::{RunHandle, RunOutcome, RunParams, RunTrigger};
}
