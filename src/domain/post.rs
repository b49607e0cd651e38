use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::photo::{Photo, WALL_ALBUM};
use crate::error::{CommunityError, Result};
use crate::vk::types::{RawAttachment, RawPhoto, RawPost};

/// Attachment of a wall post
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Attachment {
    Photo(Photo),
    /// Audio, video, doc, ... kept only as a reference for deletion
    Other {
        kind: String,
        owner_id: i64,
        object_id: i64,
    },
}

impl Attachment {
    pub fn kind(&self) -> &str {
        match self {
            Attachment::Photo(_) => "photo",
            Attachment::Other { kind, .. } => kind,
        }
    }

    pub fn owner_id(&self) -> i64 {
        match self {
            Attachment::Photo(photo) => photo.owner_id,
            Attachment::Other { owner_id, .. } => *owner_id,
        }
    }

    pub fn object_id(&self) -> i64 {
        match self {
            Attachment::Photo(photo) => photo.object_id,
            Attachment::Other { object_id, .. } => *object_id,
        }
    }

    /// Reference accepted by `wall.post`, e.g. `photo-14_5`
    pub fn reference(&self) -> String {
        format!("{}{}_{}", self.kind(), self.owner_id(), self.object_id())
    }

    fn from_raw(raw: &RawAttachment) -> Result<Option<Self>> {
        let Some(payload) = raw.payload() else {
            return Ok(None);
        };

        if raw.kind == "photo" {
            let raw_photo: RawPhoto = serde_json::from_value(payload.clone())?;
            return Ok(Some(Attachment::Photo(Photo::from_raw(&raw_photo, WALL_ALBUM)?)));
        }

        let owner_id = payload.get("owner_id").and_then(|v| v.as_i64());
        let object_id = payload.get("id").and_then(|v| v.as_i64());
        match (owner_id, object_id) {
            (Some(owner_id), Some(object_id)) => Ok(Some(Attachment::Other {
                kind: raw.kind.clone(),
                owner_id,
                object_id,
            })),
            // links, polls and the like have no owner/id pair
            _ => Ok(None),
        }
    }
}

/// Wall post of a community
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub object_id: i64,
    pub owner_id: i64,
    pub date_time: DateTime<Utc>,
    pub text: String,
    pub attachments: Vec<Attachment>,
}

impl Post {
    pub fn from_raw(raw: &RawPost) -> Result<Self> {
        let date_time = DateTime::<Utc>::from_timestamp(raw.date, 0).ok_or_else(|| {
            CommunityError::InvalidPayload(format!(
                "post {}_{} has invalid date {}",
                raw.owner_id, raw.id, raw.date
            ))
        })?;

        let mut attachments = Vec::with_capacity(raw.attachments.len());
        for raw_attachment in &raw.attachments {
            match Attachment::from_raw(raw_attachment) {
                Ok(Some(attachment)) => attachments.push(attachment),
                Ok(None) => {}
                Err(e) => warn!(
                    "Skipping {} attachment of post {}_{}: {}",
                    raw_attachment.kind, raw.owner_id, raw.id, e
                ),
            }
        }

        Ok(Self {
            object_id: raw.id,
            owner_id: raw.owner_id,
            date_time,
            text: raw.text.clone(),
            attachments,
        })
    }

    pub fn photos(&self) -> impl Iterator<Item = &Photo> {
        self.attachments.iter().filter_map(|attachment| match attachment {
            Attachment::Photo(photo) => Some(photo),
            Attachment::Other { .. } => None,
        })
    }
}
