use crate::aft::entry::{Entity, Ipv4Entry, NextHop, NextHopGroup};
use crate::aft::instance::{InstanceAliases, RoutingInstanceAft};
use crate::aft::mutation::{Mutation, OpType};
use ipnetwork::Ipv4Network;
use std::collections::BTreeMap;
use std::fmt;

/// AftSnapshot is one frame of the shadow state: every routing instance's table.
pub type AftSnapshot = BTreeMap<String, RoutingInstanceAft>;

/// Generation identifies a frame of the shadow state. The base frame is generation 0.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd)]
pub struct Generation(usize);

impl Generation {
    pub fn as_usize(&self) -> usize {
        self.0
    }
}

impl fmt::Debug for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gen-{}", self.0)
    }
}

#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum ShadowError {
    #[error("{0} already exists in instance '{1}'; issue a Replace instead of an Add")]
    AlreadyExists(String, String),
    #[error("{0} does not exist in instance '{1}'")]
    Missing(String, String),
    #[error("{entity} in instance '{instance}' references missing {missing}")]
    DanglingReference {
        entity: String,
        instance: String,
        missing: String,
    },
    #[error("{entity} in instance '{instance}' is still referenced by {referrer}")]
    StillReferenced {
        entity: String,
        instance: String,
        referrer: String,
    },
    #[error("Invalid {0}: {1}")]
    InvalidEntity(String, &'static str),
    #[error("Cannot pop the last shadow AFT frame")]
    LastFrame,
}

/// ShadowState is the client's local copy of what it expects the device's forwarding tables to
/// contain. It is a stack of snapshots. Only the top snapshot (the current generation) is ever
/// read or mutated; lower frames are kept intact so that a speculative sequence of mutations can
/// be dropped with `pop()`.
///
/// Every frame is an owned deep copy, so no entity is shared between generations.
#[derive(Clone, Debug)]
pub struct ShadowState {
    frames: Vec<AftSnapshot>,
    aliases: InstanceAliases,
}

impl ShadowState {
    pub fn new(aliases: InstanceAliases) -> Self {
        Self {
            frames: vec![AftSnapshot::new()],
            aliases,
        }
    }

    pub fn aliases(&self) -> &InstanceAliases {
        &self.aliases
    }

    pub fn generation(&self) -> Generation {
        Generation(self.frames.len() - 1)
    }

    pub fn current(&self) -> &AftSnapshot {
        self.frames.last().expect("ShadowState always holds a frame")
    }

    fn current_mut(&mut self) -> &mut AftSnapshot {
        self.frames.last_mut().expect("ShadowState always holds a frame")
    }

    pub(crate) fn current_mut_for_cascade(&mut self) -> (&mut AftSnapshot, &InstanceAliases) {
        let aliases = &self.aliases;
        let frame = self.frames.last_mut().expect("ShadowState always holds a frame");
        (frame, aliases)
    }

    /// Copies the current frame and makes the copy current.
    pub fn push(&mut self) -> Generation {
        let copy = self.current().clone();
        self.frames.push(copy);
        self.generation()
    }

    /// Discards the current frame. The base frame can never be popped.
    pub fn pop(&mut self) -> Result<Generation, ShadowError> {
        if self.frames.len() <= 1 {
            return Err(ShadowError::LastFrame);
        }
        self.frames.pop();
        Ok(self.generation())
    }

    /// Drops every frame and starts over with a single empty one.
    pub fn reset(&mut self) {
        self.frames = vec![AftSnapshot::new()];
    }

    /// Looks up an instance by name, falling back to any alias-equivalent name.
    pub fn instance(&self, name: &str) -> Option<&RoutingInstanceAft> {
        find_instance(self.current(), &self.aliases, name)
    }

    pub fn next_hop(&self, instance: &str, index: u64) -> Option<&NextHop> {
        self.instance(instance).and_then(|aft| aft.next_hops.get(&index))
    }

    pub fn next_hop_group(&self, instance: &str, id: u64) -> Option<&NextHopGroup> {
        self.instance(instance).and_then(|aft| aft.next_hop_groups.get(&id))
    }

    pub fn ipv4_entry(&self, instance: &str, prefix: &str) -> Option<&Ipv4Entry> {
        self.instance(instance).and_then(|aft| aft.ipv4_entries.get(prefix))
    }

    /// All (instance, prefix) pairs in the current frame.
    pub fn ipv4_keys(&self) -> Vec<(String, String)> {
        self.current()
            .iter()
            .flat_map(|(instance, aft)| {
                aft.ipv4_entries
                    .keys()
                    .map(move |prefix| (instance.clone(), prefix.clone()))
            })
            .collect()
    }

    pub fn entity_count(&self) -> usize {
        self.current().values().map(RoutingInstanceAft::entity_count).sum()
    }

    /// Checks that applying `mutation` keeps every reference in the current frame resolvable.
    pub fn validate(&self, mutation: &Mutation) -> Result<(), ShadowError> {
        let instance = mutation.network_instance.as_str();
        let key = mutation.key().to_string();
        // A delete is keyed only; its payload need not be well formed.
        if mutation.op != OpType::Delete {
            validate_shape(&mutation.entity, &key)?;
        }

        let aft = self.instance(instance);
        let exists = match (&mutation.entity, aft) {
            (_, None) => false,
            (Entity::NextHop(nh), Some(aft)) => aft.next_hops.contains_key(&nh.index),
            (Entity::NextHopGroup(nhg), Some(aft)) => aft.next_hop_groups.contains_key(&nhg.id),
            (Entity::Ipv4(entry), Some(aft)) => aft.ipv4_entries.contains_key(&entry.prefix),
        };

        match mutation.op {
            OpType::Add if exists => return Err(ShadowError::AlreadyExists(key, instance.to_string())),
            OpType::Replace | OpType::Delete if !exists => {
                return Err(ShadowError::Missing(key, instance.to_string()))
            }
            _ => {}
        }

        match mutation.op {
            OpType::Add | OpType::Replace => self.validate_references(instance, &mutation.entity, &key),
            OpType::Delete => self.validate_unreferenced(instance, &mutation.entity, &key),
        }
    }

    fn validate_references(&self, instance: &str, entity: &Entity, key: &str) -> Result<(), ShadowError> {
        let dangling = |missing: String| ShadowError::DanglingReference {
            entity: key.to_string(),
            instance: instance.to_string(),
            missing,
        };

        match entity {
            Entity::NextHop(_) => Ok(()),
            Entity::NextHopGroup(nhg) => {
                for index in nhg.members.keys() {
                    if self.next_hop(instance, *index).is_none() {
                        return Err(dangling(format!("next-hop {}", index)));
                    }
                }
                if let Some(backup) = nhg.backup_group_id {
                    if backup == nhg.id || self.next_hop_group(instance, backup).is_none() {
                        return Err(dangling(format!("backup next-hop-group {}", backup)));
                    }
                }
                Ok(())
            }
            Entity::Ipv4(entry) => {
                let group_instance = entry.group_network_instance(instance);
                if self.next_hop_group(group_instance, entry.next_hop_group_id).is_none() {
                    return Err(dangling(format!(
                        "next-hop-group {} in instance '{}'",
                        entry.next_hop_group_id, group_instance
                    )));
                }
                Ok(())
            }
        }
    }

    fn validate_unreferenced(&self, instance: &str, entity: &Entity, key: &str) -> Result<(), ShadowError> {
        let still_referenced = |referrer: String| ShadowError::StillReferenced {
            entity: key.to_string(),
            instance: instance.to_string(),
            referrer,
        };
        let aft = match self.instance(instance) {
            Some(aft) => aft,
            None => return Ok(()),
        };

        match entity {
            Entity::NextHop(nh) => match aft.group_references_next_hop(nh.index) {
                Some(group) => Err(still_referenced(format!("next-hop-group {}", group))),
                None => Ok(()),
            },
            Entity::NextHopGroup(nhg) => {
                if let Some(group) = aft.group_uses_backup(nhg.id) {
                    return Err(still_referenced(format!("next-hop-group {} (as backup)", group)));
                }
                for (entry_instance, entry_aft) in self.current() {
                    for entry in entry_aft.ipv4_entries.values() {
                        let group_instance = entry.group_network_instance(entry_instance);
                        if entry.next_hop_group_id == nhg.id && self.aliases.same_instance(group_instance, instance) {
                            return Err(still_referenced(format!(
                                "ipv4-entry {} in instance '{}'",
                                entry.prefix, entry_instance
                            )));
                        }
                    }
                }
                Ok(())
            }
            Entity::Ipv4(_) => Ok(()),
        }
    }

    /// Applies `mutation` to the current frame. Replace is delete-then-recreate: the stored
    /// entity is swapped for the new payload wholesale.
    pub fn apply(&mut self, mutation: &Mutation) {
        let key = self.instance_key(&mutation.network_instance);
        let frame = self.current_mut();

        match mutation.op {
            OpType::Add | OpType::Replace => {
                let aft = frame.entry(key).or_default();
                match &mutation.entity {
                    Entity::NextHop(nh) => {
                        aft.next_hops.insert(nh.index, nh.clone());
                    }
                    Entity::NextHopGroup(nhg) => {
                        aft.next_hop_groups.insert(nhg.id, nhg.clone());
                    }
                    Entity::Ipv4(entry) => {
                        aft.ipv4_entries.insert(entry.prefix.clone(), entry.clone());
                    }
                }
            }
            OpType::Delete => {
                if let Some(aft) = frame.get_mut(&key) {
                    match &mutation.entity {
                        Entity::NextHop(nh) => {
                            aft.next_hops.remove(&nh.index);
                        }
                        Entity::NextHopGroup(nhg) => {
                            aft.next_hop_groups.remove(&nhg.id);
                        }
                        Entity::Ipv4(entry) => {
                            aft.ipv4_entries.remove(&entry.prefix);
                        }
                    }
                }
            }
        }
    }

    /// Records the device-assigned programmed index of a next hop, once learned from telemetry.
    pub fn confirm_programmed_index(&mut self, instance: &str, index: u64, programmed_index: u64) {
        let key = self.instance_key(instance);
        if let Some(nh) = self
            .current_mut()
            .get_mut(&key)
            .and_then(|aft| aft.next_hops.get_mut(&index))
        {
            nh.programmed_index = programmed_index;
        }
    }

    // Existing instances are matched through aliases so that one instance is never split into two.
    fn instance_key(&self, name: &str) -> String {
        if self.current().contains_key(name) {
            return name.to_string();
        }
        self.current()
            .keys()
            .find(|existing| self.aliases.same_instance(existing, name))
            .cloned()
            .unwrap_or_else(|| name.to_string())
    }
}

pub(crate) fn find_instance<'a>(
    frame: &'a AftSnapshot,
    aliases: &InstanceAliases,
    name: &str,
) -> Option<&'a RoutingInstanceAft> {
    frame.get(name).or_else(|| {
        frame
            .iter()
            .find(|(existing, _)| aliases.same_instance(existing, name))
            .map(|(_, aft)| aft)
    })
}

fn validate_shape(entity: &Entity, key: &str) -> Result<(), ShadowError> {
    let invalid = |reason| Err(ShadowError::InvalidEntity(key.to_string(), reason));
    match entity {
        Entity::NextHop(nh) => {
            if nh.index == 0 {
                return invalid("index must be non-zero");
            }
        }
        Entity::NextHopGroup(nhg) => {
            if nhg.id == 0 {
                return invalid("id must be non-zero");
            }
            if nhg.members.is_empty() && nhg.backup_group_id.is_none() {
                return invalid("group needs at least one member or a backup group");
            }
            if nhg.members.values().any(|weight| *weight == 0) {
                return invalid("member weights must be greater than zero");
            }
            if nhg.backup_group_id == Some(0) {
                return invalid("backup group id must be non-zero");
            }
        }
        Entity::Ipv4(entry) => {
            if entry.prefix.parse::<Ipv4Network>().is_err() {
                return invalid("prefix is not an IPv4 CIDR");
            }
            if entry.next_hop_group_id == 0 {
                return invalid("next hop group id must be non-zero");
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aft::entry::{Ipv4Entry, NextHop, NextHopGroup};
    use std::collections::HashMap;

    const VRF: &str = "default";

    fn populated() -> ShadowState {
        let mut shadow = ShadowState::new(InstanceAliases::default());
        for mutation in vec![
            Mutation::add(VRF, NextHop::decap(10)),
            Mutation::add(VRF, NextHopGroup::new(101).with_member(10, 100)),
            Mutation::add(VRF, Ipv4Entry::new("198.51.100.1/32", 101)),
        ] {
            shadow.validate(&mutation).unwrap();
            shadow.apply(&mutation);
        }
        shadow
    }

    #[test]
    fn add_of_existing_key_is_rejected() {
        let shadow = populated();

        let err = shadow
            .validate(&Mutation::add(VRF, Ipv4Entry::new("198.51.100.1/32", 101)))
            .unwrap_err();
        assert_eq!(
            err,
            ShadowError::AlreadyExists("ipv4-entry 198.51.100.1/32".into(), VRF.into())
        );
        shadow
            .validate(&Mutation::replace(VRF, Ipv4Entry::new("198.51.100.1/32", 101)))
            .unwrap();
    }

    #[test]
    fn dangling_references_are_rejected() {
        let shadow = populated();

        let err = shadow
            .validate(&Mutation::add(VRF, NextHopGroup::new(102).with_member(11, 1)))
            .unwrap_err();
        assert!(matches!(err, ShadowError::DanglingReference { .. }));

        let err = shadow
            .validate(&Mutation::add(VRF, NextHopGroup::new(102).with_member(10, 1).with_backup(999)))
            .unwrap_err();
        assert!(matches!(err, ShadowError::DanglingReference { .. }));

        let err = shadow
            .validate(&Mutation::add("VRF1", Ipv4Entry::new("10.0.0.0/8", 101)))
            .unwrap_err();
        assert!(matches!(err, ShadowError::DanglingReference { .. }));

        shadow
            .validate(&Mutation::add(
                "VRF1",
                Ipv4Entry::new("10.0.0.0/8", 101).with_group_network_instance(VRF),
            ))
            .unwrap();
    }

    #[test]
    fn deleting_referenced_entities_is_rejected() {
        let shadow = populated();

        let err = shadow.validate(&Mutation::delete(VRF, NextHop::decap(10))).unwrap_err();
        assert!(matches!(err, ShadowError::StillReferenced { .. }));
        let err = shadow.validate(&Mutation::delete(VRF, NextHopGroup::new(101))).unwrap_err();
        assert!(matches!(err, ShadowError::StillReferenced { .. }));
        shadow
            .validate(&Mutation::delete(VRF, Ipv4Entry::new("198.51.100.1/32", 101)))
            .unwrap();
    }

    #[test]
    fn malformed_entities_are_rejected() {
        let shadow = ShadowState::new(InstanceAliases::default());

        for mutation in vec![
            Mutation::add(VRF, NextHop::decap(0)),
            Mutation::add(VRF, NextHopGroup::new(5)),
            Mutation::add(VRF, Ipv4Entry::new("not-a-prefix", 5)),
        ] {
            assert!(matches!(
                shadow.validate(&mutation),
                Err(ShadowError::InvalidEntity(_, _))
            ));
        }
    }

    #[test]
    fn replace_is_idempotent() {
        let mut once = populated();
        let replacement = Mutation::replace(VRF, NextHopGroup::new(101).with_member(10, 7));
        once.apply(&replacement);

        let mut twice = once.clone();
        twice.validate(&replacement).unwrap();
        twice.apply(&replacement);

        assert_eq!(once.current(), twice.current());
        assert_eq!(once.next_hop_group(VRF, 101).unwrap().members[&10], 7);
    }

    #[test]
    fn push_mutate_pop_restores_previous_frame() {
        let mut shadow = populated();
        let before = shadow.current().clone();

        assert_eq!(shadow.push(), Generation(1));
        shadow.apply(&Mutation::delete(VRF, Ipv4Entry::new("198.51.100.1/32", 101)));
        shadow.apply(&Mutation::add(VRF, NextHop::ip(11, "192.0.2.1")));
        assert_ne!(shadow.current(), &before);

        assert_eq!(shadow.pop().unwrap(), Generation(0));
        assert_eq!(shadow.current(), &before);
        assert_eq!(shadow.pop().unwrap_err(), ShadowError::LastFrame);
    }

    #[test]
    fn reset_leaves_single_empty_frame() {
        let mut shadow = populated();
        shadow.push();
        shadow.push();

        shadow.reset();

        assert_eq!(shadow.generation(), Generation(0));
        assert!(shadow.current().is_empty());
    }

    #[test]
    fn aliased_instances_share_one_table() {
        let mut aliases = HashMap::new();
        aliases.insert("DEFAULT".to_string(), "default".to_string());
        let mut shadow = ShadowState::new(InstanceAliases::new(aliases));
        shadow.apply(&Mutation::add("default", NextHop::decap(1)));

        shadow.apply(&Mutation::add("DEFAULT", NextHop::decap(2)));

        assert_eq!(shadow.current().len(), 1);
        assert!(shadow.next_hop("DEFAULT", 1).is_some());
        assert!(shadow.next_hop("default", 2).is_some());
    }
}
