pub mod keyword;

pub use keyword::{CacheError, KeywordCache};
