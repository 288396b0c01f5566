//! Optional retrieval over a category-partitioned in-memory vector index.

pub mod index;
pub mod store;
pub mod types;

pub use index::{RagIndex, RagQueryFilters};
pub use store::RagStore;
pub use types::{
    compute_dedupe_key, embedding_to_json, json_to_embedding, parse_csv_filter, CategoryConfig,
    RagCategory, RagEntry, RagResults, RagSearchHit,
};
