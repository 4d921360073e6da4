pub mod error;
pub mod event;
pub mod reconciler;
pub mod reducer;
pub mod state;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::error::{ProtocolError, Result};
    pub use crate::event::{Event, EventKind};
    pub use crate::reconciler::{DropReason, EventReconciler, Generation, Outcome};
    pub use crate::reducer::apply;
    pub use crate::state::{
        NodeProgress, NodeState, NodeStatus, RunState, RunStatus, Snapshot, SnapshotNode,
    };
}
