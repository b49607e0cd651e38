use async_trait::async_trait;

use super::types::{
    Community, RawAlbum, RawPhoto, RawPost, SavedPhoto, UploadFile, UploadedPhotos,
};
use crate::error::Result;

/// VK API surface used by the bot
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VkApi: Send + Sync {
    /// `groups.getById` with the screen name
    async fn community(&self, group_id: i64) -> Result<Community>;

    /// `photos.getAlbums`
    async fn albums(&self, owner_id: i64) -> Result<Vec<RawAlbum>>;

    /// `photos.get`, every page
    async fn album_photos(&self, owner_id: i64, album_id: i64) -> Result<Vec<RawPhoto>>;

    /// `wall.get`, every page
    async fn wall_posts(&self, owner_id: i64) -> Result<Vec<RawPost>>;

    /// `photos.getWallUploadServer`, returns the upload URL
    async fn wall_upload_server(&self, group_id: i64) -> Result<String>;

    /// Multipart upload of image files to an upload URL
    async fn upload_wall_photos(
        &self,
        upload_url: &str,
        files: Vec<UploadFile>,
    ) -> Result<UploadedPhotos>;

    /// `photos.saveWallPhoto`
    async fn save_wall_photos(
        &self,
        group_id: i64,
        uploaded: &UploadedPhotos,
    ) -> Result<Vec<SavedPhoto>>;

    /// `wall.post` on behalf of the community, returns the post id
    async fn post_on_wall(&self, owner_id: i64, message: &str, attachments: &str) -> Result<i64>;

    /// `wall.delete`
    async fn delete_wall_post(&self, owner_id: i64, post_id: i64) -> Result<()>;

    /// `<kind>.delete` for an attachment (`photo.delete`, `audio.delete`, ...)
    async fn delete_attachment(&self, kind: &str, owner_id: i64, object_id: i64) -> Result<()>;
}

/// Fetches image bytes by link
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, link: &str) -> Result<Vec<u8>>;
}
