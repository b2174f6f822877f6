use crate::aft::entry::{Ipv4Entry, NextHop, NextHopGroup};
use std::collections::{BTreeMap, HashMap};

/// RoutingInstanceAft is the shadow forwarding table of one routing instance.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RoutingInstanceAft {
    pub next_hops: BTreeMap<u64, NextHop>,
    pub next_hop_groups: BTreeMap<u64, NextHopGroup>,
    pub ipv4_entries: BTreeMap<String, Ipv4Entry>,
}

impl RoutingInstanceAft {
    pub fn is_empty(&self) -> bool {
        self.next_hops.is_empty() && self.next_hop_groups.is_empty() && self.ipv4_entries.is_empty()
    }

    pub fn entity_count(&self) -> usize {
        self.next_hops.len() + self.next_hop_groups.len() + self.ipv4_entries.len()
    }

    pub(crate) fn group_references_next_hop(&self, next_hop_index: u64) -> Option<u64> {
        self.next_hop_groups
            .values()
            .find(|nhg| nhg.members.contains_key(&next_hop_index))
            .map(|nhg| nhg.id)
    }

    pub(crate) fn group_uses_backup(&self, backup_group_id: u64) -> Option<u64> {
        self.next_hop_groups
            .values()
            .find(|nhg| nhg.backup_group_id == Some(backup_group_id))
            .map(|nhg| nhg.id)
    }
}

/// InstanceAliases maps alternative spellings of a routing instance name onto the name the
/// shadow tables are keyed by. Devices and scenarios do not always agree on how the default
/// instance is spelled (e.g. `DEFAULT` vs `default`).
#[derive(Clone, Debug, Default)]
pub struct InstanceAliases {
    aliases: HashMap<String, String>,
}

impl InstanceAliases {
    pub fn new(aliases: HashMap<String, String>) -> Self {
        Self { aliases }
    }

    pub fn resolve<'a>(&'a self, name: &'a str) -> &'a str {
        self.aliases.get(name).map(String::as_str).unwrap_or(name)
    }

    pub fn same_instance(&self, a: &str, b: &str) -> bool {
        self.resolve(a) == self.resolve(b)
    }
}
