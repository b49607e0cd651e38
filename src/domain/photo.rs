use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

use crate::error::{CommunityError, Result};
use crate::vk::types::RawPhoto;

pub const FILE_EXTENSION: &str = "jpg";
pub const MARKED_FILE_EXTENSION: &str = "png";

/// Album assigned to photos attached to wall posts
pub const WALL_ALBUM: &str = "wall";

const LEGACY_LINK_PREFIX: &str = "photo_";

/// Photo record mirrored from a community
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Photo {
    /// `"{owner_id}_{object_id}"`, unique across VK
    pub vk_id: String,
    pub owner_id: i64,
    pub object_id: i64,
    pub album_id: i64,
    /// Album title the photo was found in
    pub album: String,
    pub user_id: Option<i64>,
    pub text: Option<String>,
    /// Highest-resolution image link
    pub link: String,
    pub date_time: DateTime<Utc>,
    /// Whether the photo was re-posted to the destination wall
    pub posted: bool,
}

impl Photo {
    pub fn vk_id(owner_id: i64, object_id: i64) -> String {
        format!("{}_{}", owner_id, object_id)
    }

    /// Build a record from a VK photo payload
    pub fn from_raw(raw: &RawPhoto, album: &str) -> Result<Self> {
        let link = highest_resolution_link(raw).ok_or_else(|| {
            CommunityError::InvalidPayload(format!(
                "photo {}_{} has no image link",
                raw.owner_id, raw.id
            ))
        })?;
        let date_time = DateTime::<Utc>::from_timestamp(raw.date, 0).ok_or_else(|| {
            CommunityError::InvalidPayload(format!(
                "photo {}_{} has invalid date {}",
                raw.owner_id, raw.id, raw.date
            ))
        })?;

        Ok(Self {
            vk_id: Self::vk_id(raw.owner_id, raw.id),
            owner_id: raw.owner_id,
            object_id: raw.id,
            album_id: raw.album_id,
            album: album.to_string(),
            user_id: raw.user_id,
            text: raw.text.clone().filter(|t| !t.is_empty()),
            link,
            date_time,
            posted: false,
        })
    }

    /// Directories below the images root: album, then `YYYY.MM`
    pub fn file_subdirs(&self) -> Vec<String> {
        let album = sanitize_segment(&self.album);
        let year_month = self.date_time.format("%Y.%m").to_string();
        [album, year_month]
            .into_iter()
            .filter(|segment| !segment.is_empty())
            .collect()
    }

    pub fn file_name(&self) -> String {
        format!("{}.{}", self.vk_id, FILE_EXTENSION)
    }

    pub fn marked_file_name(&self) -> String {
        format!("{}.{}", self.vk_id, MARKED_FILE_EXTENSION)
    }

    pub fn file_dir(&self, root: &Path) -> PathBuf {
        self.file_subdirs()
            .iter()
            .fold(root.to_path_buf(), |dir, segment| dir.join(segment))
    }

    /// Where the original image of this photo belongs
    pub fn file_path(&self, root: &Path) -> PathBuf {
        self.file_dir(root).join(self.file_name())
    }

    /// Where the watermarked image of this photo belongs
    pub fn marked_file_path(&self, root: &Path) -> PathBuf {
        self.file_dir(root).join(self.marked_file_name())
    }

    pub fn tags(&self) -> Vec<String> {
        vec!["pic".to_string(), self.album.replace(' ', "_")]
    }

    /// Tags rendered as community hashtags, one per line
    pub fn hashtags(&self, screen_name: &str) -> String {
        self.tags()
            .iter()
            .map(|tag| format!("#{}@{}", tag, screen_name))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Wall post message used when re-posting
    pub fn post_message(&self, screen_name: &str) -> String {
        format!(
            "{}\n{}",
            self.text.as_deref().unwrap_or_default(),
            self.hashtags(screen_name)
        )
    }
}

impl std::fmt::Display for Photo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "photo{} [{}] {}",
            self.vk_id,
            self.album,
            self.date_time.format("%Y-%m-%d %H:%M:%S")
        )
    }
}

fn sanitize_segment(segment: &str) -> String {
    segment
        .trim()
        .chars()
        .map(|c| if matches!(c, '/' | '\\') { '_' } else { c })
        .collect::<String>()
        .trim_matches('.')
        .to_string()
}

/// Legacy payloads carry `photo_<width>` keys, newer ones a `sizes` array
fn highest_resolution_link(raw: &RawPhoto) -> Option<String> {
    let legacy = raw
        .extra
        .iter()
        .filter_map(|(key, value)| {
            let width = key.strip_prefix(LEGACY_LINK_PREFIX)?.parse::<u32>().ok()?;
            match value {
                Value::String(link) if !link.is_empty() => Some((width, link.clone())),
                _ => None,
            }
        })
        .max_by_key(|(width, _)| *width)
        .map(|(_, link)| link);

    legacy.or_else(|| {
        raw.sizes
            .as_ref()?
            .iter()
            .filter(|size| !size.url.is_empty())
            .max_by_key(|size| u64::from(size.width) * u64::from(size.height))
            .map(|size| size.url.clone())
    })
}
