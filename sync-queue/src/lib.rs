pub mod event;
pub mod queue;

pub use event::{ParseOperationError, SyncEvent, SyncOperation};
pub use queue::{QueuedMessage, SyncQueue};
