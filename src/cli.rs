use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use std::path::PathBuf;

use crate::domain::Photo;
use crate::error::{CommunityError, Result};
use crate::services::{PhotoSource, SyncReport, WallSyncPlan};

#[derive(Parser, Debug)]
#[command(name = "vkcommunity")]
#[command(version = "0.1.0")]
#[command(about = "Mirrors VK community photos and re-posts them to another community", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Directory holding default.toml and environment overrides
    #[arg(short, long, default_value = "config", global = true)]
    pub config: PathBuf,

    /// Keep records in memory instead of PostgreSQL (dry run)
    #[arg(long, global = true)]
    pub memory: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Apply database migrations
    Migrate,
    /// Load photos from the source community and synchronize files
    Sync {
        /// Photo source: album, wall or all (defaults to sync.source)
        #[arg(short, long)]
        source: Option<PhotoSource>,
        /// Watermark new images after synchronizing
        #[arg(long)]
        mark: bool,
    },
    /// Watermark images that have no marked copy yet
    Mark,
    /// Post random unposted photos to the destination wall
    Post {
        /// Filters as a JSON object, e.g. '{"marked": 1, "limit": 2}'
        #[arg(short, long)]
        filters: Option<String>,
    },
    /// Reconcile the destination wall with posted photos
    SyncWall,
    /// Copy a wall post to the destination wall
    Repost {
        /// Wall owner, negative for communities
        #[arg(long, allow_hyphen_values = true)]
        owner_id: i64,
        /// Post id on that wall
        #[arg(long)]
        post_id: i64,
        /// Upload copies of the photos instead of referencing the originals
        #[arg(long)]
        reload: bool,
        /// Replace the post text
        #[arg(long)]
        text: Option<String>,
    },
    /// List stored photos
    Photos {
        /// Filters as a JSON object, e.g. '{"albums": ["wall"], "limit": 20}'
        #[arg(short, long)]
        filters: Option<String>,
    },
    /// Synchronize and post periodically until interrupted
    Run,
}

/// Parse a `--filters` argument into raw filter parameters
pub fn parse_filters(raw: Option<&str>) -> Result<Map<String, Value>> {
    let Some(raw) = raw else {
        return Ok(Map::new());
    };

    match serde_json::from_str::<Value>(raw)? {
        Value::Object(filters) => Ok(filters),
        other => Err(CommunityError::Validation(format!(
            "filters must be a JSON object, got {}",
            other
        ))),
    }
}

pub fn show_photos(photos: &[Photo]) {
    if photos.is_empty() {
        println!("No photos found");
        return;
    }

    println!(
        "{:<24} {:<20} {:<19} {:<6} {}",
        "ID", "ALBUM", "DATE", "POSTED", "LINK"
    );
    for photo in photos {
        println!(
            "{:<24} {:<20} {:<19} {:<6} {}",
            photo.vk_id,
            photo.album,
            photo.date_time.format("%Y-%m-%d %H:%M:%S"),
            if photo.posted { "yes" } else { "no" },
            photo.link
        );
    }
    println!("\n{} photos", photos.len());
}

pub fn show_sync_report(report: &SyncReport) {
    println!("Files synchronized:");
    println!("  In place:   {}", report.in_place);
    println!("  Moved:      {}", report.moved);
    println!("  Downloaded: {}", report.downloaded);
    if report.failed > 0 {
        println!("  \x1b[31mFailed:     {}\x1b[0m", report.failed);
    } else {
        println!("  Failed:     0");
    }
    println!("  Orphaned:   {}", report.orphaned);
}

pub fn show_posted(photos: &[Photo]) {
    if photos.is_empty() {
        println!("Nothing to post");
        return;
    }
    for photo in photos {
        println!("\x1b[32mPosted\x1b[0m {}", photo);
    }
}

pub fn show_wall_plan(plan: &WallSyncPlan) {
    println!("Deleted wall posts: {}", plan.posts_to_delete.len());
    for post in &plan.posts_to_delete {
        println!(
            "  wall{}_{} {}",
            post.owner_id,
            post.object_id,
            post.date_time.format("%Y-%m-%d %H:%M:%S")
        );
    }
    println!("Returned to posting queue: {}", plan.photos_to_unpost.len());
    for photo in &plan.photos_to_unpost {
        println!("  {}", photo);
    }
}
