//! In-memory fact graph.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::types::{Fact, FactId, Relationship, RelationshipType};
use crate::error::{Error, Result};

/// Plain serialized form handed to the persistence collaborator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphState {
    pub facts: Vec<Fact>,
    pub relationships: Vec<Relationship>,
    /// Mutation counter at the time of serialization
    pub version: u64,
}

/// Fact graph for one consignment session.
///
/// Cloning produces an independent snapshot, which is how an orchestration
/// pass gets read-consistent conflict and invalidation queries while new
/// facts are still being gathered.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    facts: Vec<Fact>,
    index: HashMap<FactId, usize>,
    relationships: Vec<Relationship>,
    /// `to` -> facts that depend on it
    dependents: HashMap<FactId, Vec<FactId>>,
    /// `from` -> facts it validates
    validated: HashMap<FactId, Vec<FactId>>,
    version: u64,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a fact. Facts are immutable, so re-using an id is an error.
    pub fn add_fact(&mut self, fact: Fact) -> Result<()> {
        if self.index.contains_key(&fact.id) {
            return Err(Error::DuplicateFact(fact.id.to_string()));
        }
        self.index.insert(fact.id.clone(), self.facts.len());
        self.facts.push(fact);
        self.version += 1;
        Ok(())
    }

    /// Add a directed relationship between two existing facts.
    pub fn add_relationship(&mut self, relationship: Relationship) -> Result<()> {
        for id in [&relationship.from, &relationship.to] {
            if !self.index.contains_key(id) {
                return Err(Error::UnknownFact(id.to_string()));
            }
        }
        self.index_relationship(&relationship);
        self.relationships.push(relationship);
        self.version += 1;
        Ok(())
    }

    fn index_relationship(&mut self, relationship: &Relationship) {
        match relationship.relationship_type {
            RelationshipType::DependsOn => self
                .dependents
                .entry(relationship.to.clone())
                .or_default()
                .push(relationship.from.clone()),
            RelationshipType::Validates => self
                .validated
                .entry(relationship.from.clone())
                .or_default()
                .push(relationship.to.clone()),
        }
    }

    pub fn get_fact(&self, id: &FactId) -> Option<&Fact> {
        self.index.get(id).map(|&i| &self.facts[i])
    }

    /// All facts in insertion order.
    pub fn get_all_facts(&self) -> &[Fact] {
        &self.facts
    }

    pub fn relationships(&self) -> &[Relationship] {
        &self.relationships
    }

    pub fn facts_for_subject<'a>(&'a self, subject: &'a str) -> impl Iterator<Item = &'a Fact> {
        self.facts.iter().filter(move |f| f.subject == subject)
    }

    pub fn facts_with_predicate<'a>(
        &'a self,
        predicate: &'a str,
    ) -> impl Iterator<Item = &'a Fact> {
        self.facts.iter().filter(move |f| f.predicate == predicate)
    }

    /// Most recently added fact for a subject's field.
    pub fn latest_fact(&self, subject: &str, predicate: &str) -> Option<&Fact> {
        self.facts
            .iter()
            .rev()
            .find(|f| f.subject == subject && f.predicate == predicate)
    }

    pub fn latest_value(&self, subject: &str, predicate: &str) -> Option<&str> {
        self.latest_fact(subject, predicate).map(|f| f.object.as_str())
    }

    pub fn contains(&self, id: &FactId) -> bool {
        self.index.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.facts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Existing facts with the same subject and predicate as `fact` but a
    /// different object and a different id.
    pub fn detect_conflicts(&self, fact: &Fact) -> Vec<&Fact> {
        self.facts.iter().filter(|f| fact.conflicts_with(f)).collect()
    }

    /// Ids that lose validity when `id` is invalidated, including `id` itself.
    ///
    /// Walks breadth-first: facts that depend on an invalid fact are invalid,
    /// and facts validated by an invalid fact lose that validation. Each id is
    /// visited once, so cycles terminate.
    pub fn invalidate_fact(&self, id: &FactId) -> HashSet<FactId> {
        let mut visited: HashSet<FactId> = HashSet::new();
        let mut queue: VecDeque<FactId> = VecDeque::new();

        visited.insert(id.clone());
        queue.push_back(id.clone());

        while let Some(current) = queue.pop_front() {
            let dependents = self.dependents.get(&current).into_iter().flatten();
            let validated = self.validated.get(&current).into_iter().flatten();

            for next in dependents.chain(validated) {
                if visited.insert(next.clone()) {
                    queue.push_back(next.clone());
                }
            }
        }

        debug!(seed = %id, invalidated = visited.len(), "Invalidation closure computed");
        visited
    }

    /// Serialize into the persistence shape.
    pub fn to_state(&self) -> GraphState {
        GraphState {
            facts: self.facts.clone(),
            relationships: self.relationships.clone(),
            version: self.version,
        }
    }

    /// Rebuild a graph from persisted state.
    ///
    /// Duplicate ids and dangling relationships mean the stored graph cannot
    /// be trusted, so they fail with `Error::CorruptGraph`.
    pub fn from_state(state: GraphState) -> Result<Self> {
        let mut graph = Self::new();
        for fact in state.facts {
            graph
                .add_fact(fact)
                .map_err(|e| Error::CorruptGraph(e.to_string()))?;
        }
        for relationship in state.relationships {
            graph
                .add_relationship(relationship)
                .map_err(|e| Error::CorruptGraph(e.to_string()))?;
        }
        graph.version = graph.version.max(state.version);
        Ok(graph)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.to_state())?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let state: GraphState =
            serde_json::from_str(json).map_err(|e| Error::CorruptGraph(e.to_string()))?;
        Self::from_state(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn fact(id: &str, predicate: &str, object: &str) -> Fact {
        Fact::new(id, "shipment-42", predicate, object, "test")
    }

    fn ids(list: &[&str]) -> HashSet<FactId> {
        list.iter().map(|s| FactId::from(*s)).collect()
    }

    #[test]
    fn test_add_and_get() {
        let mut graph = DependencyGraph::new();
        graph.add_fact(fact("f1", "origin_country", "Vietnam")).unwrap();

        assert_eq!(graph.len(), 1);
        assert_eq!(graph.version(), 1);
        assert_eq!(
            graph.get_fact(&"f1".into()).map(|f| f.object.as_str()),
            Some("Vietnam")
        );
        assert!(graph.get_fact(&"missing".into()).is_none());
    }

    #[test]
    fn test_duplicate_fact_rejected() {
        let mut graph = DependencyGraph::new();
        graph.add_fact(fact("f1", "origin_country", "Vietnam")).unwrap();
        let err = graph.add_fact(fact("f1", "origin_country", "China")).unwrap_err();
        assert!(matches!(err, Error::DuplicateFact(_)));
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn test_relationship_requires_known_facts() {
        let mut graph = DependencyGraph::new();
        graph.add_fact(fact("f1", "origin_country", "Vietnam")).unwrap();
        let err = graph
            .add_relationship(Relationship::depends_on("f2", "f1"))
            .unwrap_err();
        assert!(matches!(err, Error::UnknownFact(id) if id == "f2"));
    }

    #[test]
    fn test_detect_conflicts() {
        let mut graph = DependencyGraph::new();
        graph.add_fact(fact("f1", "origin_country", "Vietnam")).unwrap();
        graph.add_fact(fact("f2", "hs_code", "8541.43")).unwrap();

        let incoming = fact("f3", "origin_country", "China");
        let conflicts = graph.detect_conflicts(&incoming);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].id, FactId::from("f1"));

        // Same value is not a conflict
        let agreeing = fact("f4", "origin_country", "Vietnam");
        assert!(graph.detect_conflicts(&agreeing).is_empty());
    }

    #[test]
    fn test_conflict_query_idempotent_after_add() {
        let mut graph = DependencyGraph::new();
        graph.add_fact(fact("f1", "origin_country", "Vietnam")).unwrap();

        let incoming = fact("f2", "origin_country", "Vietnam");
        assert!(graph.detect_conflicts(&incoming).is_empty());
        graph.add_fact(incoming.clone()).unwrap();
        assert!(graph.detect_conflicts(&incoming).is_empty());
    }

    #[test]
    fn test_invalidate_follows_both_edge_kinds() {
        let mut graph = DependencyGraph::new();
        for id in ["origin", "duty", "landed_cost", "coo", "unrelated"] {
            graph.add_fact(fact(id, id, "x")).unwrap();
        }
        // duty depends on origin, landed_cost depends on duty
        graph.add_relationship(Relationship::depends_on("duty", "origin")).unwrap();
        graph
            .add_relationship(Relationship::depends_on("landed_cost", "duty"))
            .unwrap();
        // origin validates the certificate of origin record
        graph.add_relationship(Relationship::validates("origin", "coo")).unwrap();

        assert_eq!(
            graph.invalidate_fact(&"origin".into()),
            ids(&["origin", "duty", "landed_cost", "coo"])
        );
        // Edges are directional: invalidating a dependent leaves its basis alone
        assert_eq!(
            graph.invalidate_fact(&"landed_cost".into()),
            ids(&["landed_cost"])
        );
    }

    #[test]
    fn test_invalidate_does_not_follow_reverse_validates() {
        let mut graph = DependencyGraph::new();
        graph.add_fact(fact("cert", "certificate", "ok")).unwrap();
        graph.add_fact(fact("origin", "origin_country", "Peru")).unwrap();
        graph.add_relationship(Relationship::validates("cert", "origin")).unwrap();

        // The validated fact losing validity says nothing about its validator
        assert_eq!(graph.invalidate_fact(&"origin".into()), ids(&["origin"]));
    }

    #[test]
    fn test_invalidate_terminates_on_cycles() {
        let mut graph = DependencyGraph::new();
        for id in ["a", "b", "c"] {
            graph.add_fact(fact(id, id, "x")).unwrap();
        }
        graph.add_relationship(Relationship::depends_on("b", "a")).unwrap();
        graph.add_relationship(Relationship::depends_on("c", "b")).unwrap();
        graph.add_relationship(Relationship::depends_on("a", "c")).unwrap();

        assert_eq!(graph.invalidate_fact(&"b".into()), ids(&["a", "b", "c"]));
    }

    #[test]
    fn test_invalidate_unknown_seed_returns_seed() {
        let graph = DependencyGraph::new();
        assert_eq!(graph.invalidate_fact(&"ghost".into()), ids(&["ghost"]));
    }

    #[test]
    fn test_invalidate_deep_chain() {
        let mut graph = DependencyGraph::new();
        let depth = 20_000;
        for i in 0..depth {
            graph.add_fact(fact(&format!("n{i}"), "p", "x")).unwrap();
        }
        for i in 1..depth {
            graph
                .add_relationship(Relationship::depends_on(
                    format!("n{i}").as_str(),
                    format!("n{}", i - 1).as_str(),
                ))
                .unwrap();
        }
        assert_eq!(graph.invalidate_fact(&"n0".into()).len(), depth);
    }

    #[test]
    fn test_state_roundtrip_preserves_indexes() {
        let mut graph = DependencyGraph::new();
        graph.add_fact(fact("f1", "origin_country", "Vietnam")).unwrap();
        graph.add_fact(fact("f2", "duty_rate", "0.0")).unwrap();
        graph.add_relationship(Relationship::depends_on("f2", "f1")).unwrap();

        let json = graph.to_json().unwrap();
        let restored = DependencyGraph::from_json(&json).unwrap();

        assert_eq!(restored.to_state(), graph.to_state());
        assert_eq!(restored.invalidate_fact(&"f1".into()), ids(&["f1", "f2"]));
    }

    #[test]
    fn test_from_state_rejects_dangling_relationship() {
        let state = GraphState {
            facts: vec![fact("f1", "origin_country", "Vietnam")],
            relationships: vec![Relationship::depends_on("f1", "nope")],
            version: 2,
        };
        let err = DependencyGraph::from_state(state).unwrap_err();
        assert!(matches!(err, Error::CorruptGraph(_)));
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        let err = DependencyGraph::from_json("{\"facts\": 3}").unwrap_err();
        assert!(matches!(err, Error::CorruptGraph(_)));
    }

    #[test]
    fn test_latest_value() {
        let mut graph = DependencyGraph::new();
        graph.add_fact(fact("f1", "price", "2000")).unwrap();
        graph.add_fact(fact("f2", "price", "1800")).unwrap();
        assert_eq!(graph.latest_value("shipment-42", "price"), Some("1800"));
        assert_eq!(graph.latest_value("shipment-42", "currency"), None);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn edges(n: usize) -> impl Strategy<Value = Vec<(usize, usize, bool)>> {
            prop::collection::vec((0..n, 0..n, any::<bool>()), 0..(n * 3))
        }

        /// Naive fixed-point reachability used as the oracle.
        fn reachable(edges: &[(usize, usize, bool)], seed: usize) -> HashSet<FactId> {
            let mut set: HashSet<usize> = HashSet::from([seed]);
            loop {
                let mut grew = false;
                for &(from, to, depends) in edges {
                    // depends_on: from depends on to; invalid `to` spreads to `from`
                    // validates: from validates to; invalid `from` spreads to `to`
                    let (src, dst) = if depends { (to, from) } else { (from, to) };
                    if set.contains(&src) && set.insert(dst) {
                        grew = true;
                    }
                }
                if !grew {
                    break;
                }
            }
            set.into_iter().map(|i| FactId(format!("n{i}"))).collect()
        }

        proptest! {
            #[test]
            fn invalidation_is_exact_closure(
                (n, edges, seed) in (1usize..12).prop_flat_map(|n| (Just(n), edges(n), 0..n))
            ) {
                let mut graph = DependencyGraph::new();
                for i in 0..n {
                    graph.add_fact(fact(&format!("n{i}"), "p", "x")).unwrap();
                }
                for &(from, to, depends) in &edges {
                    let rel = if depends {
                        Relationship::depends_on(format!("n{from}"), format!("n{to}"))
                    } else {
                        Relationship::validates(format!("n{from}"), format!("n{to}"))
                    };
                    graph.add_relationship(rel).unwrap();
                }

                let seed_id = FactId(format!("n{seed}"));
                let result = graph.invalidate_fact(&seed_id);
                prop_assert!(result.contains(&seed_id));
                prop_assert_eq!(result, reachable(&edges, seed));
            }

            #[test]
            fn conflicts_are_exactly_differing_objects(
                objects in prop::collection::vec(0u8..4, 1..10),
                probe in 0u8..4
            ) {
                let mut graph = DependencyGraph::new();
                for (i, o) in objects.iter().enumerate() {
                    graph.add_fact(fact(&format!("f{i}"), "origin_country", &o.to_string())).unwrap();
                }
                let incoming = fact("probe", "origin_country", &probe.to_string());
                let expected = objects.iter().filter(|o| **o != probe).count();
                prop_assert_eq!(graph.detect_conflicts(&incoming).len(), expected);
            }
        }
    }
}
