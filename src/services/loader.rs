use std::str::FromStr;
use tracing::{info, warn};

use crate::domain::{Photo, Post};
use crate::error::{CommunityError, Result};
use crate::vk::VkApi;

/// Where community photos are loaded from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhotoSource {
    /// Every photo album
    Album,
    /// Photos attached to wall posts
    Wall,
    /// Albums, then wall
    All,
}

impl PhotoSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Album => "album",
            Self::Wall => "wall",
            Self::All => "all",
        }
    }
}

impl std::fmt::Display for PhotoSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PhotoSource {
    type Err = CommunityError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "album" => Ok(Self::Album),
            "wall" => Ok(Self::Wall),
            "all" => Ok(Self::All),
            other => Err(CommunityError::Validation(format!(
                "Incorrect source value: {}. Allowable values: \"wall\", \"album\", \"all\"",
                other
            ))),
        }
    }
}

/// Photos of every album, tagged with the album title
pub async fn load_albums_photos(api: &dyn VkApi, owner_id: i64) -> Result<Vec<Photo>> {
    let albums = api.albums(owner_id).await?;

    let mut photos = Vec::new();
    for album in albums {
        let raw_photos = api.album_photos(owner_id, album.id).await?;
        let before = photos.len();
        for raw_photo in &raw_photos {
            match Photo::from_raw(raw_photo, &album.title) {
                Ok(photo) => photos.push(photo),
                Err(e) => warn!("Skipping photo in album '{}': {}", album.title, e),
            }
        }
        info!("Loaded {} photos from album '{}'", photos.len() - before, album.title);
    }

    Ok(photos)
}

pub async fn load_posts(api: &dyn VkApi, owner_id: i64) -> Result<Vec<Post>> {
    let raw_posts = api.wall_posts(owner_id).await?;

    let mut posts = Vec::with_capacity(raw_posts.len());
    for raw_post in &raw_posts {
        match Post::from_raw(raw_post) {
            Ok(post) => posts.push(post),
            Err(e) => warn!("Skipping wall post: {}", e),
        }
    }
    Ok(posts)
}

/// Photos attached to wall posts
pub async fn load_wall_photos(api: &dyn VkApi, owner_id: i64) -> Result<Vec<Photo>> {
    let posts = load_posts(api, owner_id).await?;
    let photos: Vec<Photo> = posts
        .iter()
        .flat_map(|post| post.photos().cloned())
        .collect();
    info!("Loaded {} photos from {} wall posts", photos.len(), posts.len());
    Ok(photos)
}

pub async fn load_photos(api: &dyn VkApi, owner_id: i64, source: PhotoSource) -> Result<Vec<Photo>> {
    match source {
        PhotoSource::Album => load_albums_photos(api, owner_id).await,
        PhotoSource::Wall => load_wall_photos(api, owner_id).await,
        PhotoSource::All => {
            let mut photos = load_albums_photos(api, owner_id).await?;
            photos.extend(load_wall_photos(api, owner_id).await?);
            Ok(photos)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vk::{MockVkApi, RawAlbum, RawPhoto, RawPost};
    use serde_json::json;

    fn raw_photo(id: i64) -> RawPhoto {
        serde_json::from_value(json!({
            "id": id,
            "owner_id": -14,
            "album_id": 1,
            "date": 1475279707,
            "photo_604": format!("http://example.com/{id}.jpg")
        }))
        .unwrap()
    }

    fn mock_api() -> MockVkApi {
        let mut api = MockVkApi::new();
        api.expect_albums().returning(|owner_id| {
            Ok(vec![
                RawAlbum { id: 1, owner_id, title: "Cats".to_string(), size: None },
                RawAlbum { id: 2, owner_id, title: "Dogs".to_string(), size: None },
            ])
        });
        api.expect_album_photos()
            .returning(|_, album_id| Ok(vec![raw_photo(album_id * 10), raw_photo(album_id * 10 + 1)]));
        api.expect_wall_posts().returning(|_| {
            let post: RawPost = serde_json::from_value(json!({
                "id": 7, "owner_id": -14, "date": 1475279707, "text": "",
                "attachments": [{"type": "photo", "photo": {
                    "id": 99, "owner_id": -14, "date": 1475279707,
                    "photo_130": "http://example.com/99.jpg"
                }}]
            }))
            .unwrap();
            Ok(vec![post])
        });
        api
    }

    #[test]
    fn test_source_parsing() {
        assert_eq!("wall".parse::<PhotoSource>().unwrap(), PhotoSource::Wall);
        assert_eq!(" ALL ".parse::<PhotoSource>().unwrap(), PhotoSource::All);

        let err = "albums".parse::<PhotoSource>().unwrap_err();
        assert!(err.to_string().contains("Allowable values"));
    }

    #[tokio::test]
    async fn test_albums_photos_get_album_titles() {
        let api = mock_api();
        let photos = load_photos(&api, -14, PhotoSource::Album).await.unwrap();

        assert_eq!(photos.len(), 4);
        assert_eq!(photos[0].album, "Cats");
        assert_eq!(photos[3].album, "Dogs");
        assert_eq!(photos[3].vk_id, "-14_21");
    }

    #[tokio::test]
    async fn test_all_loads_albums_then_wall() {
        let api = mock_api();
        let photos = load_photos(&api, -14, PhotoSource::All).await.unwrap();

        assert_eq!(photos.len(), 5);
        assert_eq!(photos[4].album, "wall");
        assert_eq!(photos[4].vk_id, "-14_99");
    }
}
