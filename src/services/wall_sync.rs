//! Reconciles the destination wall with the `posted` flags of the records.
//!
//! Posting stamps a photo with the time it went on the wall, so posted
//! photos and wall posts share one timeline. Posts older than every posted
//! photo were not made by us and are removed; photos stamped after the
//! newest post never made it to the wall and go back to the posting queue.

use tracing::{info, instrument};

use crate::adapters::PhotoStore;
use crate::domain::{Photo, PhotoFilter, Post};
use crate::error::Result;
use crate::services::loader::load_posts;
use crate::vk::VkApi;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct WallSyncPlan {
    /// Wall posts to delete, oldest first
    pub posts_to_delete: Vec<Post>,
    /// Photos whose `posted` flag is cleared, newest first
    pub photos_to_unpost: Vec<Photo>,
}

/// Decide which posts go and which photos return to the queue
pub fn plan_wall_sync(mut posted_photos: Vec<Photo>, mut posts: Vec<Post>) -> WallSyncPlan {
    posted_photos.sort_by(|a, b| {
        (b.date_time, b.object_id).cmp(&(a.date_time, a.object_id))
    });
    posts.sort_by_key(|post| (post.date_time, post.object_id));

    let Some(first_posted) = posted_photos.last().map(|photo| photo.date_time) else {
        return WallSyncPlan::default();
    };
    let last_post = posts.last().map(|post| post.date_time);

    let posts_to_delete = posts
        .into_iter()
        .take_while(|post| post.date_time < first_posted)
        .collect();

    let photos_to_unpost = posted_photos
        .into_iter()
        .take_while(|photo| last_post.map_or(true, |last| photo.date_time > last))
        .map(|mut photo| {
            photo.posted = false;
            photo
        })
        .collect();

    WallSyncPlan {
        posts_to_delete,
        photos_to_unpost,
    }
}

/// Delete a wall post with everything attached to it
pub async fn delete_wall_post(api: &dyn VkApi, post: &Post) -> Result<()> {
    for attachment in &post.attachments {
        api.delete_attachment(attachment.kind(), attachment.owner_id(), attachment.object_id())
            .await?;
    }
    api.delete_wall_post(post.owner_id, post.object_id).await
}

#[instrument(skip(api, store))]
pub async fn synchronize_wall_posts(
    api: &dyn VkApi,
    store: &dyn PhotoStore,
    owner_id: i64,
) -> Result<WallSyncPlan> {
    let posted_photos = store.load_photos(&PhotoFilter::posted_only()).await?;
    if posted_photos.is_empty() {
        info!("No posted photos, wall left as is");
        return Ok(WallSyncPlan::default());
    }

    let posts = load_posts(api, owner_id).await?;
    let plan = plan_wall_sync(posted_photos, posts);

    for post in &plan.posts_to_delete {
        delete_wall_post(api, post).await?;
        info!("Deleted wall post {}_{}", post.owner_id, post.object_id);
    }

    store.save_photos(&plan.photos_to_unpost).await?;
    info!(
        "Wall synchronized: {} posts deleted, {} photos unposted",
        plan.posts_to_delete.len(),
        plan.photos_to_unpost.len()
    );
    Ok(plan)
}
