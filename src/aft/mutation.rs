use crate::aft::entry::{Entity, EntityKey};
use std::fmt;

#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq)]
pub enum OpType {
    Add,
    Replace,
    Delete,
}

impl fmt::Display for OpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpType::Add => write!(f, "ADD"),
            OpType::Replace => write!(f, "REPLACE"),
            OpType::Delete => write!(f, "DELETE"),
        }
    }
}

/// Mutation is one requested change to one entity in one routing instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Mutation {
    pub network_instance: String,
    pub op: OpType,
    pub entity: Entity,
}

impl Mutation {
    pub fn add(network_instance: impl Into<String>, entity: impl Into<Entity>) -> Self {
        Self::new(network_instance, OpType::Add, entity)
    }

    pub fn replace(network_instance: impl Into<String>, entity: impl Into<Entity>) -> Self {
        Self::new(network_instance, OpType::Replace, entity)
    }

    pub fn delete(network_instance: impl Into<String>, entity: impl Into<Entity>) -> Self {
        Self::new(network_instance, OpType::Delete, entity)
    }

    fn new(network_instance: impl Into<String>, op: OpType, entity: impl Into<Entity>) -> Self {
        Self {
            network_instance: network_instance.into(),
            op,
            entity: entity.into(),
        }
    }

    pub fn key(&self) -> EntityKey {
        self.entity.key()
    }
}
