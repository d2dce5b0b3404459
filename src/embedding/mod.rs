//! Embeddings and the derived search indexes

pub mod indexer;
pub mod keyword_index;
pub mod provider;
pub mod vector_index;

pub use indexer::ContextIndexer;
pub use keyword_index::{KeywordIndex, KeywordIndexError, KeywordSearchResult};
pub use provider::{EmbeddingError, EmbeddingProvider, FastEmbedProvider};
pub use vector_index::{IndexPayload, PayloadFilter, VectorIndex, VectorIndexError, VectorSearchResult};
