//! Agent registration.

use std::sync::Arc;

use tracing::debug;

use super::specialists;
use super::types::ShipmentContext;
use super::SubAgent;
use crate::error::{Error, Result};

/// Static activation check: a pure function of the shipment context.
pub type ActivationPredicate = fn(&ShipmentContext) -> bool;

/// Constructs a fresh agent instance.
pub type AgentBuilder = fn() -> Arc<dyn SubAgent>;

/// Static description of an agent kind.
#[derive(Clone, Copy)]
pub struct AgentDescriptor {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub should_activate: ActivationPredicate,
    pub build: AgentBuilder,
}

impl std::fmt::Debug for AgentDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentDescriptor")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish()
    }
}

/// Registered agent kinds, in registration order.
#[derive(Debug, Clone, Default)]
pub struct AgentFactory {
    descriptors: Vec<AgentDescriptor>,
}

impl AgentFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory with every built-in specialist registered.
    pub fn with_builtin_agents() -> Result<Self> {
        let mut factory = Self::new();
        for descriptor in specialists::builtin_descriptors() {
            factory.register(descriptor)?;
        }
        Ok(factory)
    }

    pub fn register(&mut self, descriptor: AgentDescriptor) -> Result<()> {
        if self.get(descriptor.id).is_some() {
            return Err(Error::DuplicateAgent(descriptor.id.to_string()));
        }
        debug!(agent_id = descriptor.id, "Registered agent");
        self.descriptors.push(descriptor);
        Ok(())
    }

    pub fn descriptors(&self) -> &[AgentDescriptor] {
        &self.descriptors
    }

    pub fn get(&self, id: &str) -> Option<&AgentDescriptor> {
        self.descriptors.iter().find(|d| d.id == id)
    }

    pub fn build(&self, id: &str) -> Option<Arc<dyn SubAgent>> {
        self.get(id).map(|d| (d.build)())
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}
