pub mod adapters;
pub mod cli;
pub mod config;
pub mod domain;
pub mod error;
pub mod services;
pub mod vk;

pub use adapters::{MemoryStore, PhotoStore, PostgresStore};
pub use config::AppConfig;
pub use domain::{check_filters, Photo, PhotoFilter, Post};
pub use error::{CommunityError, FilterError, Result};
pub use services::{CommunityApp, FileSynchronizer, PhotoSource, SyncReport};
pub use vk::{ImageFetcher, VkApi, VkClient};
