//! # Storage Layer
//!
//! Backends for the two stores behind the access control core:
//! - decision cache backing store (in-memory, Redis)
//! - attribute-entity store (in-memory, PostgreSQL)

pub mod memory;
pub mod postgres;
pub mod redis;

pub use memory::{InMemoryAttributeStore, InMemoryKeyValueStore};
pub use postgres::PostgresAttributeStore;
pub use redis::RedisKeyValueStore;
