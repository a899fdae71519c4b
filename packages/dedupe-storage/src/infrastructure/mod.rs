//! Storage adapters.
//!
//! SQLite is the only backend; the `DedupeStore` trait keeps the engine
//! portable to other transactional stores.

pub mod sqlite;
