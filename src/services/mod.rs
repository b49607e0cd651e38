pub mod app;
pub mod files;
pub mod loader;
pub mod publisher;
pub mod wall_sync;
pub mod watermark;

pub use app::CommunityApp;
pub use files::{FileSynchronizer, SyncReport};
pub use loader::PhotoSource;
pub use publisher::{Publisher, MAX_ATTACHMENTS_LIMIT};
pub use wall_sync::{plan_wall_sync, WallSyncPlan};
