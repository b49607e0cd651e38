//! VK REST client (plain reqwest, no SDK).

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, instrument, warn};

use super::traits::{ImageFetcher, VkApi};
use super::types::{
    Community, Envelope, ItemsPage, PostedWallPost, RawAlbum, RawPhoto, RawPost, SavedPhoto,
    UploadFile, UploadServer, UploadedPhotos,
};
use crate::config::VkConfig;
use crate::error::{CommunityError, Result};

/// "Too many requests per second"
const TOO_MANY_REQUESTS: i64 = 6;

/// Backoff unit between rate-limited retries, multiplied by the attempt
const RETRY_BACKOFF: Duration = Duration::from_secs(1);

const WALL_PAGE_SIZE: usize = 100;
const PHOTOS_PAGE_SIZE: usize = 1000;

#[derive(Clone)]
pub struct VkClient {
    http: Client,
    api_url: String,
    access_token: String,
    api_version: String,
    max_retries: u8,
    min_interval: Duration,
    last_call: Arc<Mutex<Option<Instant>>>,
}

impl VkClient {
    pub fn new(config: &VkConfig) -> Result<Self> {
        let http = Client::builder()
            .user_agent("vkcommunity/0.1")
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .map_err(|e| CommunityError::Internal(format!("failed to build HTTP client: {}", e)))?;

        let min_interval = Duration::from_millis(1000 / u64::from(config.requests_per_second.max(1)));

        Ok(Self {
            http,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            access_token: config.access_token.clone(),
            api_version: config.api_version.clone(),
            max_retries: config.max_retries,
            min_interval,
            last_call: Arc::new(Mutex::new(None)),
        })
    }

    pub fn api_version(&self) -> &str {
        &self.api_version
    }

    /// Space consecutive calls by `min_interval`
    async fn throttle(&self) {
        let mut last_call = self.last_call.lock().await;
        if let Some(last) = *last_call {
            let elapsed = last.elapsed();
            if elapsed < self.min_interval {
                sleep(self.min_interval - elapsed).await;
            }
        }
        *last_call = Some(Instant::now());
    }

    /// Call an API method and deserialize its `response`
    pub async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: &[(&str, String)],
    ) -> Result<T> {
        let url = format!("{}/{}", self.api_url, method);
        let mut form: Vec<(&str, String)> = params.to_vec();
        form.push(("access_token", self.access_token.clone()));
        form.push(("v", self.api_version.clone()));

        let (url, form) = (&url, &form);
        let value = retry_rate_limited(method, self.max_retries, RETRY_BACKOFF, move || async move {
            self.throttle().await;

            let resp = self.http.post(url).form(form).send().await?;
            let status = resp.status();
            let text = resp.text().await?;

            if !status.is_success() {
                return Err(CommunityError::Internal(format!(
                    "VK API {} failed: status={} body={}",
                    method, status, text
                )));
            }
            unwrap_envelope(&text)
        })
        .await?;

        Ok(serde_json::from_value(value)?)
    }

    /// Collect every item of a paged listing
    pub async fn get_all_items<T: DeserializeOwned>(
        &self,
        method: &str,
        params: &[(&str, String)],
        page_size: usize,
    ) -> Result<Vec<T>> {
        let items = collect_pages(move |offset| async move {
            let mut page_params = params.to_vec();
            page_params.push(("count", page_size.to_string()));
            page_params.push(("offset", offset.to_string()));
            self.call::<ItemsPage<T>>(method, &page_params).await
        })
        .await?;

        debug!("{} returned {} items", method, items.len());
        Ok(items)
    }
}

/// Delay before retry number `attempt` (1-based), `None` once retries are
/// exhausted or the error is not a rate limit
fn retry_delay(
    err: &CommunityError,
    attempt: u8,
    max_retries: u8,
    backoff: Duration,
) -> Option<Duration> {
    match err {
        CommunityError::RateLimited(_) if attempt <= max_retries => {
            Some(backoff * u32::from(attempt))
        }
        _ => None,
    }
}

/// Run `op`, repeating it after "too many requests" answers
async fn retry_rate_limited<T, F, Fut>(
    method: &str,
    max_retries: u8,
    backoff: Duration,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt: u8 = 0;
    loop {
        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        attempt = attempt.saturating_add(1);
        match retry_delay(&err, attempt, max_retries, backoff) {
            Some(delay) => {
                warn!(
                    "VK API {} rate limited ({}), retry {}/{}",
                    method, err, attempt, max_retries
                );
                sleep(delay).await;
            }
            None => return Err(err),
        }
    }
}

/// Request pages by offset until `count` items arrived or a page is empty
async fn collect_pages<T, F, Fut>(mut fetch_page: F) -> Result<Vec<T>>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<ItemsPage<T>>>,
{
    let mut items: Vec<T> = Vec::new();
    loop {
        let page = fetch_page(items.len()).await?;
        let received = page.items.len();
        items.extend(page.items);

        if received == 0 || items.len() >= page.count {
            return Ok(items);
        }
    }
}

/// Split the `{"response": ...}` / `{"error": ...}` envelope
fn unwrap_envelope(text: &str) -> Result<Value> {
    let envelope: Envelope<Value> = serde_json::from_str(text)?;

    if let Some(error) = envelope.error {
        if error.error_code == TOO_MANY_REQUESTS {
            return Err(CommunityError::RateLimited(error.error_msg));
        }
        return Err(CommunityError::VkApi {
            code: error.error_code,
            message: error.error_msg,
        });
    }

    envelope
        .response
        .ok_or_else(|| CommunityError::InvalidPayload(format!("no response in {}", text)))
}

/// `groups.getById` answers with a bare array in old versions and
/// `{"groups": [...]}` in new ones
fn first_community(value: Value) -> Result<Community> {
    let first = match value {
        Value::Array(mut groups) if !groups.is_empty() => groups.swap_remove(0),
        Value::Object(mut map) => match map.remove("groups") {
            Some(Value::Array(mut groups)) if !groups.is_empty() => groups.swap_remove(0),
            _ => return Err(CommunityError::InvalidPayload("no groups in response".into())),
        },
        _ => return Err(CommunityError::InvalidPayload("no groups in response".into())),
    };
    Ok(serde_json::from_value(first)?)
}

#[async_trait]
impl VkApi for VkClient {
    #[instrument(skip(self))]
    async fn community(&self, group_id: i64) -> Result<Community> {
        let value: Value = self
            .call(
                "groups.getById",
                &[
                    ("group_id", group_id.to_string()),
                    ("fields", "screen_name".to_string()),
                ],
            )
            .await?;
        first_community(value)
    }

    #[instrument(skip(self))]
    async fn albums(&self, owner_id: i64) -> Result<Vec<RawAlbum>> {
        let page: ItemsPage<RawAlbum> = self
            .call("photos.getAlbums", &[("owner_id", owner_id.to_string())])
            .await?;
        Ok(page.items)
    }

    #[instrument(skip(self))]
    async fn album_photos(&self, owner_id: i64, album_id: i64) -> Result<Vec<RawPhoto>> {
        self.get_all_items(
            "photos.get",
            &[
                ("owner_id", owner_id.to_string()),
                ("album_id", album_id.to_string()),
            ],
            PHOTOS_PAGE_SIZE,
        )
        .await
    }

    #[instrument(skip(self))]
    async fn wall_posts(&self, owner_id: i64) -> Result<Vec<RawPost>> {
        self.get_all_items(
            "wall.get",
            &[("owner_id", owner_id.to_string())],
            WALL_PAGE_SIZE,
        )
        .await
    }

    #[instrument(skip(self))]
    async fn wall_upload_server(&self, group_id: i64) -> Result<String> {
        let server: UploadServer = self
            .call(
                "photos.getWallUploadServer",
                &[("group_id", group_id.to_string())],
            )
            .await?;
        Ok(server.upload_url)
    }

    #[instrument(skip(self, files), fields(files = files.len()))]
    async fn upload_wall_photos(
        &self,
        upload_url: &str,
        files: Vec<UploadFile>,
    ) -> Result<UploadedPhotos> {
        let mut form = Form::new();
        for file in files {
            let mime = if file.file_name.ends_with(".png") {
                "image/png"
            } else {
                "image/jpeg"
            };
            let part = Part::bytes(file.content)
                .file_name(file.file_name)
                .mime_str(mime)?;
            form = form.part(file.field, part);
        }

        let resp = self.http.post(upload_url).multipart(form).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(CommunityError::Internal(format!(
                "upload server answered {}",
                status
            )));
        }

        let uploaded: UploadedPhotos = resp.json().await?;
        if uploaded.photo.is_empty() || uploaded.photo == "[]" {
            return Err(CommunityError::InvalidPayload(
                "upload server accepted no photos".to_string(),
            ));
        }
        Ok(uploaded)
    }

    #[instrument(skip(self, uploaded))]
    async fn save_wall_photos(
        &self,
        group_id: i64,
        uploaded: &UploadedPhotos,
    ) -> Result<Vec<SavedPhoto>> {
        self.call(
            "photos.saveWallPhoto",
            &[
                ("group_id", group_id.to_string()),
                ("server", uploaded.server.to_string()),
                ("photo", uploaded.photo.clone()),
                ("hash", uploaded.hash.clone()),
            ],
        )
        .await
    }

    #[instrument(skip(self, message))]
    async fn post_on_wall(&self, owner_id: i64, message: &str, attachments: &str) -> Result<i64> {
        let posted: PostedWallPost = self
            .call(
                "wall.post",
                &[
                    ("owner_id", owner_id.to_string()),
                    ("from_group", "1".to_string()),
                    ("message", message.to_string()),
                    ("attachments", attachments.to_string()),
                ],
            )
            .await?;
        Ok(posted.post_id)
    }

    #[instrument(skip(self))]
    async fn delete_wall_post(&self, owner_id: i64, post_id: i64) -> Result<()> {
        let _: Value = self
            .call(
                "wall.delete",
                &[
                    ("owner_id", owner_id.to_string()),
                    ("post_id", post_id.to_string()),
                ],
            )
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_attachment(&self, kind: &str, owner_id: i64, object_id: i64) -> Result<()> {
        let id_param = format!("{}_id", kind);
        let _: Value = self
            .call(
                &format!("{}.delete", kind),
                &[
                    ("owner_id", owner_id.to_string()),
                    (id_param.as_str(), object_id.to_string()),
                ],
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ImageFetcher for VkClient {
    async fn fetch(&self, link: &str) -> Result<Vec<u8>> {
        let resp = self.http.get(link).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(CommunityError::Download(format!("{} answered {}", link, status)));
        }
        Ok(resp.bytes().await?.to_vec())
    }
}
