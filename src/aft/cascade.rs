use crate::aft::instance::InstanceAliases;
use crate::aft::shadow::{AftSnapshot, ShadowState};
use ipnetwork::Ipv4Network;
use std::collections::VecDeque;

/// Invalidation is an out-of-band observation that something stopped forwarding, e.g. because an
/// interface was administratively disabled.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Invalidation {
    /// The route for `prefix` is gone, and with it every next hop whose address falls in it.
    Prefix { instance: String, prefix: String },
    /// A single next hop is no longer usable.
    NextHop { instance: String, index: u64 },
}

/// CascadeReport lists every entity removed by one invalidation, in removal order.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CascadeReport {
    pub next_hops: Vec<(String, u64)>,
    pub next_hop_groups: Vec<(String, u64)>,
    pub ipv4_entries: Vec<(String, String)>,
}

impl CascadeReport {
    pub fn is_empty(&self) -> bool {
        self.removed_count() == 0
    }

    pub fn removed_count(&self) -> usize {
        self.next_hops.len() + self.next_hop_groups.len() + self.ipv4_entries.len()
    }
}

enum Work {
    Unreachable(String),
    NextHopRemoved { instance: String, index: u64 },
    GroupRemoved { instance: String, id: u64 },
}

/// Removes the invalidated entity and everything that only forwarded through it from the current
/// shadow frame.
///
/// A route removed along the way makes its own prefix unreachable in turn. Next hops addressed
/// inside that prefix are then removed as well, in every instance.
///
/// Each entity is removed at most once and only removals enqueue more work, so the queue always
/// drains. Running the same invalidation again finds nothing left to remove.
pub fn invalidate(shadow: &mut ShadowState, invalidation: Invalidation) -> CascadeReport {
    let (frame, aliases) = shadow.current_mut_for_cascade();
    let mut report = CascadeReport::default();
    let mut queue = VecDeque::new();

    match invalidation {
        Invalidation::Prefix { instance, prefix } => {
            if let Some(key) = resolve_key(frame, aliases, &instance) {
                if let Some(aft) = frame.get_mut(&key) {
                    if aft.ipv4_entries.remove(&prefix).is_some() {
                        report.ipv4_entries.push((key, prefix.clone()));
                    }
                }
            }
            // The target is unreachable whether or not we still had a route for it.
            queue.push_back(Work::Unreachable(prefix));
        }
        Invalidation::NextHop { instance, index } => {
            if let Some(key) = resolve_key(frame, aliases, &instance) {
                if let Some(aft) = frame.get_mut(&key) {
                    if aft.next_hops.remove(&index).is_some() {
                        report.next_hops.push((key.clone(), index));
                        queue.push_back(Work::NextHopRemoved { instance: key, index });
                    }
                }
            }
        }
    }

    while let Some(work) = queue.pop_front() {
        match work {
            Work::Unreachable(prefix) => {
                let network = match prefix.parse::<Ipv4Network>() {
                    Ok(network) => network,
                    Err(_) => continue,
                };
                for (instance, aft) in frame.iter_mut() {
                    let doomed: Vec<u64> = aft
                        .next_hops
                        .values()
                        .filter(|nh| nh.targets(&network))
                        .map(|nh| nh.index)
                        .collect();
                    for index in doomed {
                        aft.next_hops.remove(&index);
                        report.next_hops.push((instance.clone(), index));
                        queue.push_back(Work::NextHopRemoved {
                            instance: instance.clone(),
                            index,
                        });
                    }
                }
            }
            Work::NextHopRemoved { instance, index } => {
                let aft = match frame.get_mut(&instance) {
                    Some(aft) => aft,
                    None => continue,
                };
                let mut doomed = Vec::new();
                for nhg in aft.next_hop_groups.values_mut() {
                    if nhg.members.remove(&index).is_some() && nhg.members.is_empty() && nhg.backup_group_id.is_none() {
                        doomed.push(nhg.id);
                    }
                }
                for id in doomed {
                    aft.next_hop_groups.remove(&id);
                    report.next_hop_groups.push((instance.clone(), id));
                    queue.push_back(Work::GroupRemoved {
                        instance: instance.clone(),
                        id,
                    });
                }
            }
            Work::GroupRemoved { instance, id } => {
                if let Some(aft) = frame.get_mut(&instance) {
                    let mut doomed = Vec::new();
                    for nhg in aft.next_hop_groups.values_mut() {
                        if nhg.backup_group_id == Some(id) {
                            nhg.backup_group_id = None;
                            if nhg.members.is_empty() {
                                doomed.push(nhg.id);
                            }
                        }
                    }
                    for doomed_id in doomed {
                        aft.next_hop_groups.remove(&doomed_id);
                        report.next_hop_groups.push((instance.clone(), doomed_id));
                        queue.push_back(Work::GroupRemoved {
                            instance: instance.clone(),
                            id: doomed_id,
                        });
                    }
                }

                for (route_instance, aft) in frame.iter_mut() {
                    let doomed: Vec<String> = aft
                        .ipv4_entries
                        .values()
                        .filter(|entry| {
                            entry.next_hop_group_id == id
                                && aliases.same_instance(entry.group_network_instance(route_instance), &instance)
                        })
                        .map(|entry| entry.prefix.clone())
                        .collect();
                    for prefix in doomed {
                        aft.ipv4_entries.remove(&prefix);
                        report.ipv4_entries.push((route_instance.clone(), prefix.clone()));
                        queue.push_back(Work::Unreachable(prefix));
                    }
                }
            }
        }
    }

    report
}

fn resolve_key(frame: &AftSnapshot, aliases: &InstanceAliases, name: &str) -> Option<String> {
    if frame.contains_key(name) {
        return Some(name.to_string());
    }
    frame
        .keys()
        .find(|existing| aliases.same_instance(existing, name))
        .cloned()
}
