//! Shipment fact graph with conflict detection and cascading invalidation.
//!
//! The graph stores immutable `(subject, predicate, object)` facts plus two
//! kinds of directed edges between them:
//!
//! - **depends_on**: `A --depends_on--> B` means A is only valid while B is
//! - **validates**: `A --validates--> B` means A certifies B
//!
//! A changed value is recorded as a new fact, never as a mutation, so two facts
//! sharing subject and predicate with different objects are a *conflict*, not
//! corruption. Invalidating a fact walks both edge kinds breadth-first.
//!
//! ## Example
//!
//! ```rust,ignore
//! use consign_core::graph::{DependencyGraph, Fact, Relationship, RelationshipType};
//!
//! let mut graph = DependencyGraph::new();
//! graph.add_fact(Fact::new("f1", "shipment-42", "origin_country", "Vietnam", "invoice-upload"))?;
//! graph.add_fact(Fact::new("f2", "shipment-42", "duty_rate", "0.0", "tariff-skill"))?;
//! graph.add_relationship(Relationship::depends_on("f2", "f1"))?;
//!
//! // The duty rate was derived from the origin, so it falls with it.
//! let invalid = graph.invalidate_fact(&"f1".into());
//! assert!(invalid.contains(&"f2".into()));
//! ```

mod store;
mod types;

pub use store::{DependencyGraph, GraphState};
pub use types::{Fact, FactId, Relationship, RelationshipType};
