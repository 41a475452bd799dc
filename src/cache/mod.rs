pub mod result_cache;

pub use result_cache::{normalize_question, CacheKey, ResultCache};
