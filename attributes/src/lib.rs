//! # Hierarchical Attributes
//!
//! Inherited-attribute resolution, descendant enumeration and parent-edge
//! integrity checks for resources and subjects.

pub mod resolver;

pub use resolver::{DEFAULT_TRAVERSAL_LIMIT, HierarchicalAttributeResolver, ResolverSettings};
