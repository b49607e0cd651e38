use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;
use tracing::debug;

use super::traits::PhotoStore;
use crate::domain::{Photo, PhotoFilter};
use crate::error::Result;

/// In-process store with the same filter semantics as the SQL one
#[derive(Default)]
pub struct MemoryStore {
    photos: RwLock<BTreeMap<String, Photo>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_photos(photos: impl IntoIterator<Item = Photo>) -> Self {
        let photos = photos
            .into_iter()
            .map(|photo| (photo.vk_id.clone(), photo))
            .collect();
        Self {
            photos: RwLock::new(photos),
        }
    }

    pub async fn len(&self) -> usize {
        self.photos.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.photos.read().await.is_empty()
    }

    pub async fn get(&self, vk_id: &str) -> Option<Photo> {
        self.photos.read().await.get(vk_id).cloned()
    }
}

#[async_trait]
impl PhotoStore for MemoryStore {
    async fn save_photos(&self, photos: &[Photo]) -> Result<()> {
        let mut stored = self.photos.write().await;
        for photo in photos {
            stored.insert(photo.vk_id.clone(), photo.clone());
        }
        debug!("Saved {} photos in memory", photos.len());
        Ok(())
    }

    async fn load_photos(&self, filter: &PhotoFilter) -> Result<Vec<Photo>> {
        let stored = self.photos.read().await;
        Ok(filter.apply(stored.values().cloned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn photo(vk_id: &str, posted: bool) -> Photo {
        Photo {
            vk_id: vk_id.to_string(),
            owner_id: -1,
            object_id: 1,
            album_id: 1,
            album: "wall".to_string(),
            user_id: None,
            text: None,
            link: "http://example.com/a.jpg".to_string(),
            date_time: Utc.with_ymd_and_hms(2017, 1, 1, 0, 0, 0).unwrap(),
            posted,
        }
    }

    #[tokio::test]
    async fn test_save_is_upsert() {
        let store = MemoryStore::new();
        store.save_photos(&[photo("a", false)]).await.unwrap();
        store.save_photos(&[photo("a", true), photo("b", false)]).await.unwrap();

        assert_eq!(store.len().await, 2);
        assert!(store.get("a").await.unwrap().posted);
    }

    #[tokio::test]
    async fn test_load_applies_filter() {
        let store = MemoryStore::with_photos([photo("a", true), photo("b", false)]);
        let loaded = store.load_photos(&PhotoFilter::posted_only()).await.unwrap();

        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].vk_id, "a");
    }
}
