//! Stripeio Catalog - Durable metadata store
//!
//! The catalog is the authoritative map from a file id to the physical
//! placement of every one of its blocks, plus a table of driver health.
//! Records are JSON documents, one per file, in a single directory; an
//! in-memory cache fronts the directory and is hydrated by a startup scan.

mod store;

pub use store::MetadataCatalog;
