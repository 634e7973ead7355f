//! Astra DB vector store integration for the Dendrite toolkit.
//!
//! [`AstraVectorStore`] implements the [`VectorStore`](dendrite_core::VectorStore)
//! trait on top of the DataStax Astra DB Data API (JSON over HTTP). Rows are
//! stored flat: the configured id and content fields, the reserved `$vector`
//! field, and every metadata key at the top level of the row.
//!
//! A store must bind its collection before use — either
//! [`initialize`](AstraVectorStore::initialize) (create-if-absent) or
//! [`connect`](AstraVectorStore::connect) (bind an existing collection).
//!
//! # Quick start
//!
//! ```rust,no_run
//! use dendrite_astra::{AstraConfig, AstraVectorStore};
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AstraConfig::new(
//!     "AstraCS:...",
//!     "https://my-db-us-east-2.apps.astra.datastax.com",
//!     "documents",
//! )
//! .with_collection_options(json!({ "vector": { "dimension": 1536, "metric": "cosine" } }));
//!
//! let store = AstraVectorStore::new(config);
//! store.initialize().await?;
//! # Ok(())
//! # }
//! ```

mod vector_store;

pub use vector_store::{AstraConfig, AstraVectorStore, Metadatas, MmrOptions};

// Re-export core traits for convenience.
pub use dendrite_core::{Document, Embeddings, VectorStore};
