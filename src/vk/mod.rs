pub mod client;
mod traits;
pub mod types;

pub use client::VkClient;
pub use traits::{ImageFetcher, VkApi};
#[cfg(test)]
pub use traits::{MockImageFetcher, MockVkApi};
pub use types::{
    Community, RawAlbum, RawAttachment, RawPhoto, RawPost, SavedPhoto, UploadFile,
    UploadedPhotos,
};
