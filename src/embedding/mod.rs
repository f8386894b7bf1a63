/// Embedding-backed vector retrieval
///
/// - EmbeddingProvider trait for abstraction over embedding backends
/// - FastEmbedProvider for local embedding
/// - EmbeddingVectorSource: exhaustive cosine search implementing the
///   retrieval layer's VectorSource
mod provider;
mod vector_source;

pub use provider::{EmbeddingError, EmbeddingProvider, FastEmbedProvider};
pub use vector_source::EmbeddingVectorSource;
