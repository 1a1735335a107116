pub mod image;

pub use image::{CacheEntry, Resolution, ResolutionSource};
