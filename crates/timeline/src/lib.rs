//! Save timelines
//!
//! A timeline versions one game save directory: checkpoints are commits,
//! alternate histories are branches, and restores check snapshots back out
//! onto the live directory. [`TimelineManager`] is the only entry point.

pub mod config;
pub mod error;
pub mod events;
pub mod layout;
pub mod lock;
pub mod manager;
pub mod model;
pub mod validate;

pub use config::ManagerConfig;
pub use error::TimelineError;
pub use events::{EventBus, EventSink, NullSink, TimelineEvent};
pub use layout::TimelineLayout;
pub use manager::TimelineManager;
pub use model::{Checkpoint, DiscoveredSave, SaveGame, Timeline, TimelineBranch, TimelineStatus};

pub use journal::RefLogEntry;
pub use tl_core::Blake3Hash;

/// Result type of manager operations
pub type Result<T> = std::result::Result<T, TimelineError>;
