use chrono::Utc;
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use crate::adapters::PhotoStore;
use crate::domain::{check_filters, Attachment, Photo, Post, FILE_EXTENSION, MARKED_FILE_EXTENSION};
use crate::error::{CommunityError, Result};
use crate::vk::{Community, ImageFetcher, UploadFile, VkApi};

/// VK accepts at most ten attachments per wall post
pub const MAX_ATTACHMENTS_LIMIT: usize = 10;

const PIC_TAG: &str = "pic";

/// Re-posts stored photos on the destination community wall
pub struct Publisher {
    api: Arc<dyn VkApi>,
    store: Arc<dyn PhotoStore>,
    community: Community,
    images_path: PathBuf,
}

impl Publisher {
    pub fn new(
        api: Arc<dyn VkApi>,
        store: Arc<dyn PhotoStore>,
        community: Community,
        images_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            api,
            store,
            community,
            images_path: images_path.into(),
        }
    }

    /// Post random unposted photos picked by raw filters
    pub async fn post_random_photos(&self, raw_filters: &Map<String, Value>) -> Result<Vec<Photo>> {
        let filter = check_filters(raw_filters)?.for_posting();
        let photos = self.store.load_photos(&filter).await?;
        self.post_photos(photos, filter.marked()).await
    }

    /// Upload and post photos, then mark them posted
    pub async fn post_photos(&self, mut photos: Vec<Photo>, marked: bool) -> Result<Vec<Photo>> {
        if photos.len() > MAX_ATTACHMENTS_LIMIT {
            warn!(
                "Too many photos to post: {}, max available: {}",
                photos.len(),
                MAX_ATTACHMENTS_LIMIT
            );
            photos.truncate(MAX_ATTACHMENTS_LIMIT);
        }
        if photos.is_empty() {
            info!("No photos to post");
            return Ok(photos);
        }

        let extension = if marked {
            MARKED_FILE_EXTENSION
        } else {
            FILE_EXTENSION
        };
        let file_name = format!("{}.{}", PIC_TAG, extension);

        let mut files = Vec::with_capacity(photos.len());
        for (ind, photo) in photos.iter().enumerate() {
            let path = if marked {
                photo.marked_file_path(&self.images_path)
            } else {
                photo.file_path(&self.images_path)
            };
            let content = tokio::fs::read(&path).await.map_err(|e| {
                CommunityError::Internal(format!("cannot read {}: {}", path.display(), e))
            })?;
            files.push(UploadFile {
                field: format!("file{}", ind),
                file_name: file_name.clone(),
                content,
            });
        }

        let group_id = self.community.id;
        let upload_url = self.api.wall_upload_server(group_id).await?;
        let uploaded = self.api.upload_wall_photos(&upload_url, files).await?;
        let saved = self.api.save_wall_photos(group_id, &uploaded).await?;

        if saved.len() != photos.len() {
            warn!(
                "Uploaded {} photos but VK saved {}",
                photos.len(),
                saved.len()
            );
        }

        let mut posted = Vec::with_capacity(saved.len());
        for (saved_photo, mut photo) in saved.iter().zip(photos) {
            let message = photo.post_message(&self.community.screen_name);
            let post_id = match self
                .api
                .post_on_wall(-group_id, &message, &saved_photo.attachment())
                .await
            {
                Ok(post_id) => post_id,
                Err(e) => {
                    // photos already on the wall must leave the posting pool
                    warn!("Failed to post {}: {}", photo, e);
                    self.store.save_photos(&posted).await?;
                    return Err(e);
                }
            };
            info!("Posted {} as wall post {}", photo, post_id);

            photo.posted = true;
            photo.date_time = Utc::now();
            posted.push(photo);
        }

        self.store.save_photos(&posted).await?;
        Ok(posted)
    }

    /// Publish a copy of `post` on the destination wall, returns the new post id.
    ///
    /// With a `fetcher`, photo attachments are downloaded and uploaded to the
    /// destination wall first; photos that cannot be fetched and every other
    /// attachment kind are referenced as they are.
    pub async fn duplicate_post(
        &self,
        post: &Post,
        fetcher: Option<&dyn ImageFetcher>,
        text: Option<&str>,
    ) -> Result<i64> {
        let mut attachments: Vec<&Attachment> = post.attachments.iter().collect();
        if attachments.len() > MAX_ATTACHMENTS_LIMIT {
            warn!(
                "Post wall{}_{} has {} attachments, keeping {}",
                post.owner_id,
                post.object_id,
                attachments.len(),
                MAX_ATTACHMENTS_LIMIT
            );
            attachments.truncate(MAX_ATTACHMENTS_LIMIT);
        }

        let mut references: Vec<String> = attachments.iter().map(|a| a.reference()).collect();
        if let Some(fetcher) = fetcher {
            self.reload_photos(&attachments, &mut references, fetcher).await?;
        }

        let message = text.unwrap_or(&post.text);
        let post_id = self
            .api
            .post_on_wall(-self.community.id, message, &references.join(","))
            .await?;
        info!(
            "Duplicated wall{}_{} as wall{}_{}",
            post.owner_id, post.object_id, -self.community.id, post_id
        );
        Ok(post_id)
    }

    /// Upload fetchable photo attachments and point their references at the copies
    async fn reload_photos(
        &self,
        attachments: &[&Attachment],
        references: &mut [String],
        fetcher: &dyn ImageFetcher,
    ) -> Result<()> {
        let mut files = Vec::new();
        let mut slots = Vec::new();
        for (ind, attachment) in attachments.iter().enumerate() {
            let Attachment::Photo(photo) = attachment else {
                continue;
            };
            match fetcher.fetch(&photo.link).await {
                Ok(content) if !content.is_empty() => {
                    files.push(UploadFile {
                        field: format!("file{}", files.len()),
                        file_name: format!("{}{}.{}", PIC_TAG, ind, FILE_EXTENSION),
                        content,
                    });
                    slots.push(ind);
                }
                Ok(_) => warn!("{} returned no data, keeping the reference", photo.link),
                Err(e) => warn!("Cannot reload {}, keeping the reference: {}", photo, e),
            }
        }
        if files.is_empty() {
            return Ok(());
        }

        let group_id = self.community.id;
        let upload_url = self.api.wall_upload_server(group_id).await?;
        let uploaded = self.api.upload_wall_photos(&upload_url, files).await?;
        let saved = self.api.save_wall_photos(group_id, &uploaded).await?;
        if saved.len() != slots.len() {
            warn!("Uploaded {} photos but VK saved {}", slots.len(), saved.len());
        }

        for (slot, saved_photo) in slots.into_iter().zip(&saved) {
            references[slot] = saved_photo.attachment();
        }
        Ok(())
    }
}
