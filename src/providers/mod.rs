//! External capability clients.
//!
//! Two seams cover every model call the pipeline makes:
//!
//! * [`embeddings::EmbeddingProvider`]: text batches to fixed-dimension
//!   vectors, order-preserving.
//! * [`completion::CompletionProvider`]: (system, user, temperature) to a
//!   single text completion.
//!
//! Each seam ships a production HTTP client and a deterministic mock for
//! tests and offline runs.

pub mod completion;
pub mod embeddings;

pub use completion::{CompletionProvider, GroqCompletions, MockCompletionProvider};
pub use embeddings::{EmbeddingProvider, MockEmbeddingProvider, OpenRouterEmbeddings};
