//! # atlas-vector
//!
//! Stores (text, coordinates, embedding) records and answers combined
//! similarity and radius queries.
//!
//! ## Features
//! - Haversine radius filter with an inclusive boundary
//! - Cosine ranking, descending and stable on ties
//! - Lane-blocked similarity math with deterministic reduction order
//! - RocksDB or in-memory record storage behind [`RecordStore`]
//!
//! Queries scan every record. There is no approximate index.

pub mod error;
pub mod geo;
pub mod index;
pub mod similarity;
pub mod store;

pub use error::VectorError;
pub use geo::{haversine_km, GeoPoint, EARTH_RADIUS_KM};
pub use index::{rank, GeoVectorIndex, IndexConfig, SearchResult};
pub use similarity::{cosine_similarity, dot, LANES};
pub use store::{
    MemoryRecordStore, NewRecord, RecordStore, RocksRecordStore, SearchRecord, CF_SEARCH_EMBEDDINGS,
    CF_SEARCH_ROWS,
};
