mod engine;
pub mod report;

pub use engine::{SyncEngine, SyncSettings};
pub use report::{PlaylistStatus, SyncEvent, SyncReport};
