//! Fact and relationship types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a fact within a graph.
///
/// Ids are usually supplied by the producer of the fact (document parser,
/// skill, agent) so they stay stable across serialization.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FactId(pub String);

impl FactId {
    /// Generate a new random fact id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for FactId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for FactId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for FactId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One asserted piece of shipment truth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    pub id: FactId,
    /// What the fact is about (usually a shipment or party id)
    pub subject: String,
    /// Field name, e.g. `origin_country`
    pub predicate: String,
    /// Asserted value
    pub object: String,
    /// Provenance, e.g. `invoice-upload` or `document-extraction`
    pub source: String,
    /// Producer confidence (0.0 - 1.0)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Fact {
    pub fn new(
        id: impl Into<FactId>,
        subject: impl Into<String>,
        predicate: impl Into<String>,
        object: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            subject: subject.into(),
            predicate: predicate.into(),
            object: object.into(),
            source: source.into(),
            confidence: None,
            created_at: Utc::now(),
        }
    }

    /// Create a fact with a generated id.
    pub fn generated(
        subject: impl Into<String>,
        predicate: impl Into<String>,
        object: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self::new(FactId::generate(), subject, predicate, object, source)
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence.clamp(0.0, 1.0));
        self
    }

    /// Whether `other` asserts a different value for the same field.
    pub fn conflicts_with(&self, other: &Fact) -> bool {
        self.id != other.id
            && self.subject == other.subject
            && self.predicate == other.predicate
            && self.object != other.object
    }
}

/// Kind of edge between two facts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipType {
    /// `from` is only valid while `to` is valid
    DependsOn,
    /// `from` certifies `to`
    Validates,
}

impl std::fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DependsOn => write!(f, "depends_on"),
            Self::Validates => write!(f, "validates"),
        }
    }
}

/// Directed edge between two facts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Relationship {
    pub from: FactId,
    pub to: FactId,
    pub relationship_type: RelationshipType,
}

impl Relationship {
    pub fn new(
        from: impl Into<FactId>,
        to: impl Into<FactId>,
        relationship_type: RelationshipType,
    ) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            relationship_type,
        }
    }

    /// `from` depends on `to`.
    pub fn depends_on(from: impl Into<FactId>, to: impl Into<FactId>) -> Self {
        Self::new(from, to, RelationshipType::DependsOn)
    }

    /// `from` validates `to`.
    pub fn validates(from: impl Into<FactId>, to: impl Into<FactId>) -> Self {
        Self::new(from, to, RelationshipType::Validates)
    }
}
