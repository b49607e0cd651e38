//! Raw VK API payloads.
//!
//! These mirror the JSON the API returns and are converted into domain
//! records (`Photo`, `Post`) by the domain layer.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Response envelope: every method answers with either `response` or `error`
#[derive(Debug, Deserialize)]
pub struct Envelope<T> {
    pub response: Option<T>,
    pub error: Option<ApiErrorBody>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    pub error_code: i64,
    #[serde(default)]
    pub error_msg: String,
}

/// Paged listing (`{"count": N, "items": [...]}`)
#[derive(Debug, Deserialize)]
pub struct ItemsPage<T> {
    #[serde(default)]
    pub count: usize,
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
}

/// Community info from `groups.getById`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Community {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    pub screen_name: String,
}

/// Album from `photos.getAlbums`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawAlbum {
    pub id: i64,
    #[serde(default)]
    pub owner_id: i64,
    pub title: String,
    #[serde(default)]
    pub size: Option<u32>,
}

/// One entry of the `sizes` array of newer API versions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawPhotoSize {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(alias = "src")]
    pub url: String,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
}

/// Photo object as returned by `photos.get` and inside wall attachments
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawPhoto {
    pub id: i64,
    pub owner_id: i64,
    #[serde(default)]
    pub album_id: i64,
    #[serde(default)]
    pub user_id: Option<i64>,
    #[serde(default)]
    pub text: Option<String>,
    pub date: i64,
    #[serde(default)]
    pub sizes: Option<Vec<RawPhotoSize>>,
    /// Legacy `photo_<N>` link keys and anything else we don't model
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

/// Wall attachment (`{"type": "photo", "photo": {...}}`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawAttachment {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(flatten)]
    pub body: HashMap<String, Value>,
}

impl RawAttachment {
    /// Payload stored under the key named by `type`
    pub fn payload(&self) -> Option<&Value> {
        self.body.get(&self.kind)
    }
}

/// Wall post from `wall.get`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawPost {
    pub id: i64,
    pub owner_id: i64,
    pub date: i64,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub attachments: Vec<RawAttachment>,
}

/// `photos.getWallUploadServer` answer
#[derive(Debug, Clone, Deserialize)]
pub struct UploadServer {
    pub upload_url: String,
}

/// File handed to the upload server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFile {
    /// Multipart field name (`file0`, `file1`, ...)
    pub field: String,
    /// File name announced to the server
    pub file_name: String,
    pub content: Vec<u8>,
}

/// Upload server answer, passed back verbatim to `photos.saveWallPhoto`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedPhotos {
    pub server: i64,
    pub photo: String,
    pub hash: String,
}

/// Saved wall photo from `photos.saveWallPhoto`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedPhoto {
    pub id: i64,
    pub owner_id: i64,
}

impl SavedPhoto {
    /// Attachment reference accepted by `wall.post`
    pub fn attachment(&self) -> String {
        format!("photo{}_{}", self.owner_id, self.id)
    }
}

/// `wall.post` answer
#[derive(Debug, Clone, Deserialize)]
pub struct PostedWallPost {
    pub post_id: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_raw_photo_keeps_legacy_links() {
        let raw: RawPhoto = serde_json::from_value(json!({
            "id": 431928280,
            "owner_id": -129836227,
            "album_id": -7,
            "user_id": 100,
            "text": "",
            "date": 1475279707,
            "photo_75": "http://cs638122.vk.me/75.jpg",
            "photo_604": "http://cs638122.vk.me/604.jpg"
        }))
        .unwrap();

        assert_eq!(raw.album_id, -7);
        assert!(raw.sizes.is_none());
        assert_eq!(raw.extra.len(), 2);
    }

    #[test]
    fn test_attachment_payload() {
        let raw: RawAttachment = serde_json::from_value(json!({
            "type": "audio",
            "audio": {"id": 1, "owner_id": 2}
        }))
        .unwrap();

        assert_eq!(raw.kind, "audio");
        assert_eq!(raw.payload().unwrap()["owner_id"], 2);
    }

    #[test]
    fn test_items_page_of_albums() {
        let page: ItemsPage<RawAlbum> = serde_json::from_value(json!({
            "count": 1,
            "items": [{"id": 5, "owner_id": -14, "title": "Cats"}]
        }))
        .unwrap();
        assert_eq!(page.count, 1);
        assert_eq!(page.items[0].title, "Cats");

        let empty: ItemsPage<RawPost> = serde_json::from_value(json!({"count": 3})).unwrap();
        assert!(empty.items.is_empty());
    }

    #[test]
    fn test_saved_photo_attachment() {
        let saved = SavedPhoto {
            id: 456,
            owner_id: -123,
        };
        assert_eq!(saved.attachment(), "photo-123_456");
    }
}
