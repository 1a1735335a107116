pub mod error;
pub mod search;

pub use error::ApiError;
