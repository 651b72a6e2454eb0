pub mod embedding;
pub mod error;
pub mod semantic;

pub use embedding::{EmbeddingProvider, HttpEmbeddingProvider, MockEmbeddingProvider};
pub use error::CacheError;
pub use semantic::{CacheHit, SemanticCache};
