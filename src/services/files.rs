//! Keeps the images directory consistent with the stored photo records.
//!
//! Every record owns exactly one location, `Photo::file_path(root)`, which
//! depends on mutable fields (album, date). A pass moves files whose record
//! changed, downloads files that were never fetched, and leaves files
//! without a record alone.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::adapters::PhotoStore;
use crate::domain::{Photo, PhotoFilter, FILE_EXTENSION, MARKED_FILE_EXTENSION};
use crate::error::{CommunityError, Result};
use crate::vk::ImageFetcher;

/// Outcome of one synchronization pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Already at the expected path
    pub in_place: usize,
    /// Found elsewhere under the root and moved
    pub moved: usize,
    /// Fetched from the photo link
    pub downloaded: usize,
    /// Could not be moved or downloaded
    pub failed: usize,
    /// Files under the root no record claims
    pub orphaned: usize,
}

impl std::fmt::Display for SyncReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "in place: {}, moved: {}, downloaded: {}, failed: {}, orphaned: {}",
            self.in_place, self.moved, self.downloaded, self.failed, self.orphaned
        )
    }
}

/// Original images under the root, indexed by file name
struct FileIndex {
    by_name: HashMap<String, Vec<PathBuf>>,
}

impl FileIndex {
    fn scan(root: &Path) -> Self {
        let mut by_name: HashMap<String, Vec<PathBuf>> = HashMap::new();

        for entry in WalkDir::new(root).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable entry under {}: {}", root.display(), e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.into_path();
            let is_original = path
                .extension()
                .map_or(false, |ext| ext == FILE_EXTENSION);
            if !is_original {
                continue;
            }
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                by_name.entry(name.to_string()).or_default().push(path.clone());
            }
        }

        Self { by_name }
    }

    /// Forget `path`, it is claimed by the record that owns it
    fn claim(&mut self, name: &str, path: &Path) {
        if let Some(paths) = self.by_name.get_mut(name) {
            paths.retain(|p| p != path);
        }
    }

    /// First unclaimed file with this name; removed so it is moved only once
    fn take(&mut self, name: &str) -> Option<PathBuf> {
        let paths = self.by_name.get_mut(name)?;
        if paths.is_empty() {
            None
        } else {
            Some(paths.remove(0))
        }
    }

    fn len(&self) -> usize {
        self.by_name.values().map(Vec::len).sum()
    }
}

/// Order in which records are synchronized
pub fn sort_for_sync(photos: &mut [Photo]) {
    photos.sort_by(|a, b| {
        a.album
            .cmp(&b.album)
            .then_with(|| a.date_time.cmp(&b.date_time))
            .then_with(|| a.link.cmp(&b.link))
    });
}

pub struct FileSynchronizer {
    root: PathBuf,
    download_interval: Duration,
}

impl FileSynchronizer {
    pub fn new(root: impl Into<PathBuf>, download_interval: Duration) -> Self {
        Self {
            root: root.into(),
            download_interval,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Synchronize the files of every stored record
    pub async fn synchronize(
        &self,
        store: &dyn PhotoStore,
        fetcher: &dyn ImageFetcher,
    ) -> Result<SyncReport> {
        let mut photos = store.load_photos(&PhotoFilter::all()).await?;
        sort_for_sync(&mut photos);
        self.synchronize_photos(&photos, fetcher).await
    }

    pub async fn synchronize_photos(
        &self,
        photos: &[Photo],
        fetcher: &dyn ImageFetcher,
    ) -> Result<SyncReport> {
        tokio::fs::create_dir_all(&self.root).await?;

        let root = self.root.clone();
        let mut index = tokio::task::spawn_blocking(move || FileIndex::scan(&root))
            .await
            .map_err(|e| CommunityError::Internal(format!("file scan panicked: {}", e)))?;

        let mut report = SyncReport::default();
        let mut last_download: Option<Instant> = None;

        for photo in photos {
            debug!("Synchronizing {}", photo);
            let name = photo.file_name();
            let target = photo.file_path(&self.root);

            if target.is_file() {
                index.claim(&name, &target);
                report.in_place += 1;
                continue;
            }

            if let Some(source) = index.take(&name) {
                match move_photo_files(&source, &target).await {
                    Ok(()) => {
                        info!("Moved {} -> {}", source.display(), target.display());
                        report.moved += 1;
                    }
                    Err(e) => {
                        error!("Failed to move {} for {}: {}", source.display(), photo, e);
                        report.failed += 1;
                    }
                }
                continue;
            }

            if let Some(last) = last_download {
                let elapsed = last.elapsed();
                if elapsed < self.download_interval {
                    sleep(self.download_interval - elapsed).await;
                }
            }
            last_download = Some(Instant::now());

            match download_photo(photo, &target, fetcher).await {
                Ok(()) => {
                    info!("Downloaded {} -> {}", photo, target.display());
                    report.downloaded += 1;
                }
                Err(e) => {
                    // e.g. the photo is gone from VK servers
                    warn!("Failed to download {}: {}", photo, e);
                    report.failed += 1;
                }
            }
        }

        report.orphaned = index.len();
        info!("File synchronization finished: {}", report);
        Ok(report)
    }
}

/// Move an original image and, when present, its watermarked sibling
async fn move_photo_files(source: &Path, target: &Path) -> Result<()> {
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::rename(source, target).await?;

    // a missing watermark is redone by the next marking pass
    let marked_source = source.with_extension(MARKED_FILE_EXTENSION);
    let marked_target = target.with_extension(MARKED_FILE_EXTENSION);
    if marked_source.is_file() && !marked_target.is_file() {
        if let Err(e) = tokio::fs::rename(&marked_source, &marked_target).await {
            warn!(
                "Failed to move marked image {} -> {}: {}",
                marked_source.display(),
                marked_target.display(),
                e
            );
        }
    }
    Ok(())
}

/// Download to a temporary sibling, then rename into place
async fn download_photo(photo: &Photo, target: &Path, fetcher: &dyn ImageFetcher) -> Result<()> {
    let content = fetcher.fetch(&photo.link).await?;
    if content.is_empty() {
        return Err(CommunityError::Download(format!("{} returned no data", photo.link)));
    }

    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let partial = target.with_extension(format!("{}.part", FILE_EXTENSION));
    if let Err(e) = tokio::fs::write(&partial, &content).await {
        let _ = tokio::fs::remove_file(&partial).await;
        return Err(e.into());
    }
    tokio::fs::rename(&partial, target).await?;
    Ok(())
}
