pub mod filter;
pub mod photo;
pub mod post;

pub use filter::{check_filters, PhotoFilter};
pub use photo::*;
pub use post::*;
