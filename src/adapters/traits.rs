use async_trait::async_trait;

use crate::domain::{Photo, PhotoFilter};
use crate::error::Result;

/// Persistent set of photo records keyed by `vk_id`
#[async_trait]
pub trait PhotoStore: Send + Sync {
    /// Insert or fully overwrite records by `vk_id`
    async fn save_photos(&self, photos: &[Photo]) -> Result<()>;

    /// Records selected, ordered and paginated by `filter`
    async fn load_photos(&self, filter: &PhotoFilter) -> Result<Vec<Photo>>;
}
