//! Lectern - query routing and hybrid retrieval for a study assistant
//!
//! For each student question Lectern decides whether to answer from the
//! course corpus, generate unaided, or both, and ranks the supporting
//! passages through weighted reciprocal rank fusion of exact-match,
//! lexical and vector sources with optional cross-encoder reranking.

pub mod cli;
pub mod config;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod intent;
pub mod retrieval;
pub mod router;
pub mod session;
pub mod signal;
pub mod text;

pub use error::{LecternError, Result};
