use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{error, info, instrument};

use super::files::{FileSynchronizer, SyncReport};
use super::loader::{load_photos, PhotoSource};
use super::publisher::Publisher;
use super::wall_sync::{self, WallSyncPlan};
use super::watermark;
use crate::adapters::PhotoStore;
use crate::config::AppConfig;
use crate::domain::{check_filters, Photo, Post};
use crate::error::{CommunityError, Result};
use crate::vk::{Community, ImageFetcher, VkApi};

/// Mirrors the source community into the store and images directory and
/// re-posts photos on the destination community wall
pub struct CommunityApp {
    config: AppConfig,
    api: Arc<dyn VkApi>,
    fetcher: Arc<dyn ImageFetcher>,
    store: Arc<dyn PhotoStore>,
    community: Community,
    files: FileSynchronizer,
    publisher: Publisher,
}

impl CommunityApp {
    /// Resolve the destination community and wire the services
    pub async fn new(
        config: AppConfig,
        api: Arc<dyn VkApi>,
        fetcher: Arc<dyn ImageFetcher>,
        store: Arc<dyn PhotoStore>,
    ) -> Result<Self> {
        let community = api.community(config.vk.dst_group_id).await?;
        info!(
            "Destination community: {} ({}, id {})",
            community.name, community.screen_name, community.id
        );

        let files = FileSynchronizer::new(
            &config.files.images_path,
            Duration::from_millis(config.sync.download_interval_ms),
        );
        let publisher = Publisher::new(
            api.clone(),
            store.clone(),
            community.clone(),
            &config.files.images_path,
        );

        Ok(Self {
            config,
            api,
            fetcher,
            store,
            community,
            files,
            publisher,
        })
    }

    pub fn community(&self) -> &Community {
        &self.community
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Source the configuration asks for
    pub fn default_source(&self) -> Result<PhotoSource> {
        self.config.sync.source.parse()
    }

    /// Load photos of the source community and upsert their records
    #[instrument(skip(self))]
    pub async fn synchronize_dao(&self, source: PhotoSource) -> Result<usize> {
        let photos = load_photos(self.api.as_ref(), -self.config.vk.src_group_id, source).await?;
        self.store.save_photos(&photos).await?;
        info!("Saved {} photo records from {}", photos.len(), source);
        Ok(photos.len())
    }

    /// Bring the images directory in line with the stored records
    #[instrument(skip(self))]
    pub async fn synchronize_files(&self) -> Result<SyncReport> {
        let report = self
            .files
            .synchronize(self.store.as_ref(), self.fetcher.as_ref())
            .await?;
        info!("Files synchronized: {}", report);
        Ok(report)
    }

    pub async fn synchronize(&self, source: PhotoSource) -> Result<SyncReport> {
        self.synchronize_dao(source).await?;
        self.synchronize_files().await
    }

    /// Watermark every image that has no marked copy yet
    #[instrument(skip(self))]
    pub async fn mark_images(&self) -> Result<usize> {
        let root = self.config.files.images_path.clone();
        let watermark_path = self.config.files.watermark_path.clone();

        let marked = tokio::task::spawn_blocking(move || {
            let watermark = watermark::load_watermark(&watermark_path)?;
            watermark::mark_images(&root, &watermark)
        })
        .await
        .map_err(|e| CommunityError::Internal(format!("watermarking panicked: {}", e)))??;

        info!("Marked {} images", marked);
        Ok(marked)
    }

    pub async fn synchronize_and_mark(&self, source: PhotoSource) -> Result<SyncReport> {
        let report = self.synchronize(source).await?;
        self.mark_images().await?;
        Ok(report)
    }

    pub async fn post_random_photos(&self, raw_filters: &Map<String, Value>) -> Result<Vec<Photo>> {
        self.publisher.post_random_photos(raw_filters).await
    }

    pub async fn synchronize_wall_posts(&self) -> Result<WallSyncPlan> {
        wall_sync::synchronize_wall_posts(self.api.as_ref(), self.store.as_ref(), -self.community.id)
            .await
    }

    /// Copy wall post `post_id` of `owner_id` to the destination wall,
    /// optionally re-uploading its photos and replacing its text
    #[instrument(skip(self, text))]
    pub async fn duplicate_post(
        &self,
        owner_id: i64,
        post_id: i64,
        reload: bool,
        text: Option<&str>,
    ) -> Result<i64> {
        let raw = self
            .api
            .wall_posts(owner_id)
            .await?
            .into_iter()
            .find(|raw| raw.id == post_id)
            .ok_or_else(|| {
                CommunityError::Validation(format!("no wall post {}_{}", owner_id, post_id))
            })?;
        let post = Post::from_raw(&raw)?;

        let fetcher = reload.then(|| self.fetcher.as_ref());
        self.publisher.duplicate_post(&post, fetcher, text).await
    }

    /// Stored photos selected by raw filters
    pub async fn list_photos(&self, raw_filters: &Map<String, Value>) -> Result<Vec<Photo>> {
        let filter = check_filters(raw_filters)?;
        self.store.load_photos(&filter).await
    }

    /// Periodic synchronization and posting until shutdown
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let source = self.default_source()?;
        let filters = self.config.posting.filters.clone();

        let mut sync_tick = interval(Duration::from_secs(self.config.sync.period_secs));
        let mut post_tick = interval(Duration::from_secs(self.config.posting.period_secs));
        sync_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        post_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "Running: sync from {} every {}s, posting every {}s",
            source, self.config.sync.period_secs, self.config.posting.period_secs
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Shutdown requested, stopping scheduler");
                    break;
                }
                _ = sync_tick.tick() => {
                    if let Err(e) = self.synchronize_and_mark(source).await {
                        error!("Synchronization failed: {}", e);
                    }
                }
                _ = post_tick.tick() => {
                    match self.post_random_photos(&filters).await {
                        Ok(posted) => info!("Posted {} photos", posted.len()),
                        Err(e) => error!("Posting failed: {}", e),
                    }
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MemoryStore;
    use crate::config::{DatabaseConfig, FilesConfig, LoggingConfig, PostingConfig, SyncConfig, VkConfig};
    use crate::vk::{MockImageFetcher, MockVkApi, RawAlbum, RawPhoto, RawPost};
    use image::{DynamicImage, Rgb, RgbImage, Rgba, RgbaImage};
    use mockall::predicate::eq;
    use serde_json::json;
    use std::path::Path;

    fn config(root: &Path) -> AppConfig {
        AppConfig {
            vk: VkConfig {
                api_url: "http://localhost".to_string(),
                api_version: "5.62".to_string(),
                access_token: "token".to_string(),
                src_group_id: 14,
                dst_group_id: 42,
                requests_per_second: 3,
                max_retries: 0,
            },
            files: FilesConfig {
                images_path: root.join("images"),
                watermark_path: root.join("watermark.png"),
            },
            database: DatabaseConfig {
                url: "postgres://localhost/test".to_string(),
                max_connections: 1,
            },
            sync: SyncConfig {
                download_interval_ms: 0,
                ..SyncConfig::default()
            },
            posting: PostingConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    fn jpeg_bytes() -> Vec<u8> {
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(RgbImage::from_pixel(16, 16, Rgb([200, 200, 200])))
            .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageOutputFormat::Jpeg(90))
            .unwrap();
        bytes
    }

    fn source_api() -> MockVkApi {
        let mut api = MockVkApi::new();
        api.expect_community().with(eq(42)).returning(|id| {
            Ok(Community {
                id,
                name: "Destination".to_string(),
                screen_name: "dst".to_string(),
            })
        });
        api.expect_albums().with(eq(-14)).returning(|owner_id| {
            Ok(vec![RawAlbum { id: 1, owner_id, title: "Cats".to_string(), size: Some(1) }])
        });
        api.expect_album_photos().with(eq(-14), eq(1)).returning(|_, _| {
            let photo: RawPhoto = serde_json::from_value(json!({
                "id": 5, "owner_id": -14, "album_id": 1, "date": 1475279707,
                "photo_604": "http://example.com/5.jpg"
            }))
            .unwrap();
            Ok(vec![photo])
        });
        api
    }

    #[tokio::test]
    async fn test_synchronize_and_mark() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        RgbaImage::from_pixel(4, 4, Rgba([0, 0, 0, 255]))
            .save(&config.files.watermark_path)
            .unwrap();

        let mut fetcher = MockImageFetcher::new();
        fetcher
            .expect_fetch()
            .with(eq("http://example.com/5.jpg"))
            .times(1)
            .returning(|_| Ok(jpeg_bytes()));

        let store = Arc::new(MemoryStore::new());
        let app = CommunityApp::new(config, Arc::new(source_api()), Arc::new(fetcher), store.clone())
            .await
            .unwrap();
        assert_eq!(app.community().screen_name, "dst");

        let report = app.synchronize_and_mark(PhotoSource::Album).await.unwrap();
        assert_eq!(report.downloaded, 1);
        assert_eq!(store.len().await, 1);

        let photo = store.get("-14_5").await.unwrap();
        let images = &app.config().files.images_path;
        assert!(photo.file_path(images).is_file());
        assert!(photo.marked_file_path(images).is_file());
    }

    #[tokio::test]
    async fn test_list_photos_validates_filters() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let app = CommunityApp::new(
            config(dir.path()),
            Arc::new(source_api()),
            Arc::new(MockImageFetcher::new()),
            store,
        )
        .await
        .unwrap();

        let filters = json!({"posted": 2}).as_object().cloned().unwrap();
        assert!(matches!(
            app.list_photos(&filters).await,
            Err(CommunityError::Filter(_))
        ));
        assert!(app.list_photos(&Map::new()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_post_by_id() {
        let dir = tempfile::tempdir().unwrap();
        let mut api = source_api();
        api.expect_wall_posts().with(eq(-14)).returning(|_| {
            let post: RawPost = serde_json::from_value(json!({
                "id": 8, "owner_id": -14, "date": 1475279707, "text": "hello",
                "attachments": [{"type": "audio", "audio": {"id": 5, "owner_id": 7}}]
            }))
            .unwrap();
            Ok(vec![post])
        });
        api.expect_post_on_wall()
            .withf(|owner_id, message, attachments| {
                *owner_id == -42 && message == "hello" && attachments == "audio7_5"
            })
            .times(1)
            .returning(|_, _, _| Ok(12));

        let app = CommunityApp::new(
            config(dir.path()),
            Arc::new(api),
            Arc::new(MockImageFetcher::new()),
            Arc::new(MemoryStore::new()),
        )
        .await
        .unwrap();

        assert_eq!(app.duplicate_post(-14, 8, true, None).await.unwrap(), 12);
        assert!(matches!(
            app.duplicate_post(-14, 9, false, None).await,
            Err(CommunityError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.sync.period_secs = 3600;
        config.posting.period_secs = 3600;

        let mut api = MockVkApi::new();
        api.expect_community().returning(|id| {
            Ok(Community { id, name: "Destination".to_string(), screen_name: "dst".to_string() })
        });
        api.expect_albums().returning(|_| Ok(Vec::new()));

        let app = CommunityApp::new(
            config,
            Arc::new(api),
            Arc::new(MockImageFetcher::new()),
            Arc::new(MemoryStore::new()),
        )
        .await
        .unwrap();

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        shutdown_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), app.run(shutdown_rx))
            .await
            .unwrap()
            .unwrap();
    }
}
