use crate::aft::{EntityKey, NextHop, ShadowState};
use crate::verify::telemetry::{AftNextHop, AftNextHopGroup, AftTelemetry, TelemetryError};
use ipnetwork::Ipv4Network;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum ConsistencyError {
    #[error("{0} is not in the shadow AFT of instance '{1}'")]
    NotInShadow(String, String),
    #[error("Device reports no next hop in instance '{instance}' with action {action}")]
    NextHopNotFound { instance: String, action: String },
    #[error("Device reports no next-hop-group with programmed id {programmed_id} in instance '{instance}'")]
    GroupNotFound { instance: String, programmed_id: u64 },
    #[error("Device reports no ipv4-entry {prefix} in instance '{instance}'")]
    EntryNotFound { instance: String, prefix: String },
    #[error("{entity} in instance '{instance}' references unknown device {reference}")]
    UnresolvedReference {
        entity: String,
        instance: String,
        reference: String,
    },
    #[error("{entity} in instance '{instance}': {field} is {actual}, expected {expected}")]
    Mismatch {
        entity: String,
        instance: String,
        field: &'static str,
        expected: String,
        actual: String,
    },
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
}

/// ConsistencyChecker compares what the device reports against the shadow AFT.
///
/// The device is free to renumber. Next hops are correlated by action, groups by programmed id, and
/// every device-internal reference is dereferenced to a programmed index before comparing. Only
/// the fields below are compared; device indices themselves never are.
pub struct ConsistencyChecker<'a> {
    shadow: &'a ShadowState,
    telemetry: &'a dyn AftTelemetry,
}

impl<'a> ConsistencyChecker<'a> {
    pub fn new(shadow: &'a ShadowState, telemetry: &'a dyn AftTelemetry) -> Self {
        ConsistencyChecker { shadow, telemetry }
    }

    /// Checks every route in the shadow AFT, and everything it forwards through.
    pub async fn check_all(&self) -> Result<(), ConsistencyError> {
        for (instance, prefix) in self.shadow.ipv4_keys() {
            self.check_ipv4_entry(&instance, &prefix).await?;
        }
        Ok(())
    }

    pub async fn check_next_hop(&self, instance: &str, index: u64) -> Result<AftNextHop, ConsistencyError> {
        let expected = self
            .shadow
            .next_hop(instance, index)
            .ok_or_else(|| not_in_shadow(EntityKey::NextHop(index), instance))?;
        let reported = self.telemetry.next_hops(instance).await?;
        let found = self.match_next_hop(instance, expected, &reported)?.clone();

        // Routes this next hop resolves through must be programmed too.
        let resolving_instance = expected
            .next_hop_network_instance
            .as_deref()
            .unwrap_or(instance);
        for (route_instance, prefix) in self.shadow.ipv4_keys() {
            if !self.shadow.aliases().same_instance(&route_instance, resolving_instance) {
                continue;
            }
            let covers = match prefix.parse::<Ipv4Network>() {
                Ok(network) => expected.targets(&network),
                Err(_) => false,
            };
            if covers {
                self.check_ipv4_entry(&route_instance, &prefix).await?;
            }
        }

        Ok(found)
    }

    /// Checks the group with `programmed_id` and then its chain of backups.
    pub async fn check_next_hop_group(&self, instance: &str, programmed_id: u64) -> Result<(), ConsistencyError> {
        let groups = self.telemetry.next_hop_groups(instance).await?;
        let next_hops = self.telemetry.next_hops(instance).await?;

        let mut visited = BTreeSet::new();
        let mut next = Some(programmed_id);
        while let Some(programmed_id) = next {
            if !visited.insert(programmed_id) {
                break;
            }
            next = self.compare_group(instance, programmed_id, &groups, &next_hops)?;
        }
        Ok(())
    }

    pub async fn check_ipv4_entry(&self, instance: &str, prefix: &str) -> Result<(), ConsistencyError> {
        let key = EntityKey::Ipv4(prefix.to_string());
        let expected = self
            .shadow
            .ipv4_entry(instance, prefix)
            .ok_or_else(|| not_in_shadow(key.clone(), instance))?;
        let reported = self
            .telemetry
            .ipv4_entry(instance, prefix)
            .await?
            .ok_or_else(|| ConsistencyError::EntryNotFound {
                instance: instance.to_string(),
                prefix: prefix.to_string(),
            })?;
        let mismatch = |field, expected: String, actual: String| ConsistencyError::Mismatch {
            entity: key.to_string(),
            instance: instance.to_string(),
            field,
            expected,
            actual,
        };

        if reported.prefix != expected.prefix {
            return Err(mismatch("prefix", expected.prefix.clone(), reported.prefix));
        }

        let group_instance = expected.group_network_instance(instance);
        let reported_group_instance = reported
            .next_hop_group_network_instance
            .as_deref()
            .unwrap_or(instance);
        if !self.shadow.aliases().same_instance(group_instance, reported_group_instance) {
            return Err(mismatch(
                "next-hop-group-network-instance",
                group_instance.to_string(),
                reported_group_instance.to_string(),
            ));
        }

        if reported.origin_protocol != expected.origin_protocol {
            return Err(mismatch(
                "origin-protocol",
                format!("{:?}", expected.origin_protocol),
                format!("{:?}", reported.origin_protocol),
            ));
        }

        let groups = self.telemetry.next_hop_groups(group_instance).await?;
        let reported_programmed_id = groups
            .iter()
            .find(|nhg| nhg.id == reported.next_hop_group)
            .map(|nhg| nhg.programmed_id)
            .ok_or_else(|| ConsistencyError::UnresolvedReference {
                entity: key.to_string(),
                instance: instance.to_string(),
                reference: format!("next-hop-group {}", reported.next_hop_group),
            })?;
        let expected_programmed_id = self
            .shadow
            .next_hop_group(group_instance, expected.next_hop_group_id)
            .map(|nhg| nhg.programmed_id)
            .unwrap_or(expected.next_hop_group_id);
        if reported_programmed_id != expected_programmed_id {
            return Err(mismatch(
                "next-hop-group",
                expected_programmed_id.to_string(),
                reported_programmed_id.to_string(),
            ));
        }

        self.check_next_hop_group(group_instance, expected_programmed_id)
            .await
    }

    // Among next hops with the same action, the one with a matching programmed index wins.
    fn match_next_hop<'r>(
        &self,
        instance: &str,
        expected: &NextHop,
        reported: &'r [AftNextHop],
    ) -> Result<&'r AftNextHop, ConsistencyError> {
        let candidates: Vec<&AftNextHop> = reported
            .iter()
            .filter(|nh| nh.action.as_ref() == Some(&expected.action))
            .collect();
        let found = candidates
            .iter()
            .find(|nh| nh.programmed_index == expected.programmed_index)
            .or_else(|| candidates.first())
            .copied()
            .ok_or_else(|| ConsistencyError::NextHopNotFound {
                instance: instance.to_string(),
                action: format!("{:?}", expected.action),
            })?;
        let mismatch = |field, expected: String, actual: String| ConsistencyError::Mismatch {
            entity: EntityKey::NextHop(found.programmed_index).to_string(),
            instance: instance.to_string(),
            field,
            expected,
            actual,
        };

        let same_instance = match (&expected.next_hop_network_instance, &found.network_instance) {
            (None, None) => true,
            (Some(ours), Some(theirs)) => self.shadow.aliases().same_instance(ours, theirs),
            _ => false,
        };
        if !same_instance {
            return Err(mismatch(
                "network-instance",
                format!("{:?}", expected.next_hop_network_instance),
                format!("{:?}", found.network_instance),
            ));
        }

        if expected.action.interface_ref() != found.interface_ref.as_ref() {
            return Err(mismatch(
                "interface-ref",
                format!("{:?}", expected.action.interface_ref()),
                format!("{:?}", found.interface_ref),
            ));
        }

        Ok(found)
    }

    /// Returns the programmed id of the backup group, if any, for the caller to check next.
    fn compare_group(
        &self,
        instance: &str,
        programmed_id: u64,
        groups: &[AftNextHopGroup],
        next_hops: &[AftNextHop],
    ) -> Result<Option<u64>, ConsistencyError> {
        let expected = self
            .shadow
            .instance(instance)
            .and_then(|aft| {
                aft.next_hop_groups
                    .values()
                    .find(|nhg| nhg.programmed_id == programmed_id)
            })
            .ok_or_else(|| not_in_shadow(EntityKey::NextHopGroup(programmed_id), instance))?;
        let reported = groups
            .iter()
            .find(|nhg| nhg.programmed_id == programmed_id)
            .ok_or_else(|| ConsistencyError::GroupNotFound {
                instance: instance.to_string(),
                programmed_id,
            })?;
        let key = EntityKey::NextHopGroup(expected.id).to_string();
        let mismatch = |field, expected: String, actual: String| ConsistencyError::Mismatch {
            entity: key.clone(),
            instance: instance.to_string(),
            field,
            expected,
            actual,
        };
        let unresolved = |reference: String| ConsistencyError::UnresolvedReference {
            entity: key.clone(),
            instance: instance.to_string(),
            reference,
        };

        let expected_backup = expected.backup_group_id.map(|id| {
            self.shadow
                .next_hop_group(instance, id)
                .map(|nhg| nhg.programmed_id)
                .unwrap_or(id)
        });
        let reported_backup = match reported.backup_next_hop_group {
            Some(device_id) => Some(
                groups
                    .iter()
                    .find(|nhg| nhg.id == device_id)
                    .map(|nhg| nhg.programmed_id)
                    .ok_or_else(|| unresolved(format!("next-hop-group {}", device_id)))?,
            ),
            None => None,
        };
        if expected_backup != reported_backup {
            return Err(mismatch(
                "backup-next-hop-group",
                format!("{:?}", expected_backup),
                format!("{:?}", reported_backup),
            ));
        }

        // Members are keyed by device index on the device side; bring both sides to programmed
        // indices.
        let mut reported_members = BTreeMap::new();
        for (device_index, weight) in &reported.next_hops {
            let nh = next_hops
                .iter()
                .find(|nh| nh.index == *device_index)
                .ok_or_else(|| unresolved(format!("next-hop {}", device_index)))?;
            reported_members.insert(nh.programmed_index, *weight);
        }
        let expected_members: BTreeMap<u64, u64> = expected
            .members
            .iter()
            .map(|(index, weight)| {
                let programmed = self
                    .shadow
                    .next_hop(instance, *index)
                    .map(|nh| nh.programmed_index)
                    .unwrap_or(*index);
                (programmed, *weight)
            })
            .collect();

        for (programmed, weight) in &expected_members {
            match reported_members.get(programmed) {
                None => {
                    return Err(mismatch(
                        "member",
                        format!("next-hop {} with weight {}", programmed, weight),
                        "absent".to_string(),
                    ))
                }
                Some(actual) if actual != weight => {
                    return Err(mismatch(
                        "member weight",
                        format!("next-hop {} with weight {}", programmed, weight),
                        format!("weight {}", actual),
                    ))
                }
                Some(_) => {}
            }
        }
        if let Some((programmed, weight)) = reported_members
            .iter()
            .find(|(programmed, _)| !expected_members.contains_key(programmed))
        {
            return Err(mismatch(
                "member",
                "absent".to_string(),
                format!("next-hop {} with weight {}", programmed, weight),
            ));
        }

        for index in expected.members.keys() {
            if let Some(nh) = self.shadow.next_hop(instance, *index) {
                self.match_next_hop(instance, nh, next_hops)?;
            }
        }

        Ok(expected_backup)
    }
}

fn not_in_shadow(key: EntityKey, instance: &str) -> ConsistencyError {
    ConsistencyError::NotInShadow(key.to_string(), instance.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aft::{InstanceAliases, InterfaceRef, Ipv4Entry, Mutation, NextHopAction, NextHopGroup, OriginProtocol};
    use crate::verify::telemetry::{AftIpv4Entry, StaticTelemetry};

    const DEVICE_OFFSET: u64 = 1000;

    fn shadow_with(mutations: Vec<Mutation>) -> ShadowState {
        let mut shadow = ShadowState::new(InstanceAliases::default());
        for mutation in mutations {
            shadow.validate(&mutation).unwrap();
            shadow.apply(&mutation);
        }
        shadow
    }

    /// Reports the shadow back the way a renumbering device would.
    fn mirror(shadow: &ShadowState) -> StaticTelemetry {
        let mut telemetry = StaticTelemetry::default();
        for (instance, aft) in shadow.current() {
            let device = telemetry.instance_mut(instance);
            for nh in aft.next_hops.values() {
                device.next_hops.insert(
                    nh.index + DEVICE_OFFSET,
                    AftNextHop {
                        index: nh.index + DEVICE_OFFSET,
                        programmed_index: nh.index,
                        action: Some(nh.action.clone()),
                        network_instance: nh.next_hop_network_instance.clone(),
                        interface_ref: nh.action.interface_ref().cloned(),
                    },
                );
            }
            for nhg in aft.next_hop_groups.values() {
                device.next_hop_groups.insert(
                    nhg.id + DEVICE_OFFSET,
                    AftNextHopGroup {
                        id: nhg.id + DEVICE_OFFSET,
                        programmed_id: nhg.id,
                        next_hops: nhg
                            .members
                            .iter()
                            .map(|(index, weight)| (index + DEVICE_OFFSET, *weight))
                            .collect(),
                        backup_next_hop_group: nhg.backup_group_id.map(|id| id + DEVICE_OFFSET),
                    },
                );
            }
            for entry in aft.ipv4_entries.values() {
                device.ipv4_entries.insert(
                    entry.prefix.clone(),
                    AftIpv4Entry {
                        prefix: entry.prefix.clone(),
                        next_hop_group: entry.next_hop_group_id + DEVICE_OFFSET,
                        next_hop_group_network_instance: entry.next_hop_group_network_instance.clone(),
                        origin_protocol: entry.origin_protocol,
                    },
                );
            }
        }
        telemetry
    }

    fn topology() -> ShadowState {
        shadow_with(vec![
            Mutation::add("default", NextHop::decap(10)),
            Mutation::add(
                "default",
                NextHop::interface(11, InterfaceRef::with_subinterface("Bundle-Ether120", 1)),
            ),
            Mutation::add("default", NextHop::ip(12, "192.0.2.40")),
            Mutation::add("default", NextHopGroup::new(100).with_member(12, 1)),
            Mutation::add(
                "default",
                NextHopGroup::new(101)
                    .with_member(10, 100)
                    .with_member(11, 20)
                    .with_backup(100),
            ),
            Mutation::add("default", Ipv4Entry::new("198.51.100.1/32", 101)),
            Mutation::add(
                "VRF1",
                Ipv4Entry::new("11.11.11.0/32", 101).with_group_network_instance("default"),
            ),
        ])
    }

    #[tokio::test]
    async fn renumbered_device_state_matches() {
        let shadow = topology();
        let telemetry = mirror(&shadow);

        ConsistencyChecker::new(&shadow, &telemetry).check_all().await.unwrap();
    }

    #[tokio::test]
    async fn member_weight_difference_is_reported() {
        // -- setup --
        let shadow = topology();
        let mut telemetry = mirror(&shadow);
        let nhg = telemetry
            .instance_mut("default")
            .next_hop_groups
            .get_mut(&(101 + DEVICE_OFFSET))
            .unwrap();
        nhg.next_hops.insert(10 + DEVICE_OFFSET, 99);

        // -- execute --
        let err = ConsistencyChecker::new(&shadow, &telemetry)
            .check_ipv4_entry("default", "198.51.100.1/32")
            .await
            .unwrap_err();

        // -- verify --
        match err {
            ConsistencyError::Mismatch { field, .. } => assert_eq!(field, "member weight"),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn extra_device_member_is_reported() {
        // -- setup --
        let shadow = topology();
        let mut telemetry = mirror(&shadow);
        let nhg = telemetry
            .instance_mut("default")
            .next_hop_groups
            .get_mut(&(100 + DEVICE_OFFSET))
            .unwrap();
        nhg.next_hops.insert(10 + DEVICE_OFFSET, 5);

        // -- execute --
        let err = ConsistencyChecker::new(&shadow, &telemetry)
            .check_next_hop_group("default", 100)
            .await
            .unwrap_err();

        // -- verify --
        assert!(matches!(err, ConsistencyError::Mismatch { field: "member", .. }));
    }

    #[tokio::test]
    async fn missing_backup_is_reported() {
        // -- setup --
        let shadow = topology();
        let mut telemetry = mirror(&shadow);
        telemetry
            .instance_mut("default")
            .next_hop_groups
            .get_mut(&(101 + DEVICE_OFFSET))
            .unwrap()
            .backup_next_hop_group = None;

        // -- execute --
        let err = ConsistencyChecker::new(&shadow, &telemetry)
            .check_next_hop_group("default", 101)
            .await
            .unwrap_err();

        // -- verify --
        assert!(matches!(
            err,
            ConsistencyError::Mismatch {
                field: "backup-next-hop-group",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn next_hop_is_found_by_action_not_index() {
        // -- setup --
        let shadow = topology();
        let mut telemetry = mirror(&shadow);
        // Subinterface differs, so nothing on the device has our action any more.
        let nh = telemetry
            .instance_mut("default")
            .next_hops
            .get_mut(&(11 + DEVICE_OFFSET))
            .unwrap();
        nh.action = Some(NextHopAction::Interface(InterfaceRef::new("Bundle-Ether120")));

        // -- execute --
        let checker = ConsistencyChecker::new(&shadow, &telemetry);
        let found = checker.check_next_hop("default", 12).await.unwrap();
        let err = checker.check_next_hop("default", 11).await.unwrap_err();

        // -- verify --
        assert_eq!(found.index, 12 + DEVICE_OFFSET);
        assert!(matches!(err, ConsistencyError::NextHopNotFound { .. }));
    }

    #[tokio::test]
    async fn origin_protocol_is_compared() {
        // -- setup --
        let shadow = topology();
        let mut telemetry = mirror(&shadow);
        telemetry
            .instance_mut("VRF1")
            .ipv4_entries
            .get_mut("11.11.11.0/32")
            .unwrap()
            .origin_protocol = OriginProtocol::Static;

        // -- execute --
        let err = ConsistencyChecker::new(&shadow, &telemetry).check_all().await.unwrap_err();

        // -- verify --
        assert!(matches!(
            err,
            ConsistencyError::Mismatch {
                field: "origin-protocol",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn cyclic_backups_terminate() {
        // -- setup --
        let shadow = shadow_with(vec![
            Mutation::add("default", NextHop::decap(1)),
            Mutation::add("default", NextHopGroup::new(1).with_member(1, 1)),
            Mutation::add("default", NextHopGroup::new(2).with_member(1, 1).with_backup(1)),
            Mutation::replace("default", NextHopGroup::new(1).with_member(1, 1).with_backup(2)),
        ]);
        let telemetry = mirror(&shadow);

        // -- execute & verify --
        ConsistencyChecker::new(&shadow, &telemetry)
            .check_next_hop_group("default", 1)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn missing_route_is_reported() {
        let shadow = topology();
        let mut telemetry = mirror(&shadow);
        telemetry.instance_mut("default").ipv4_entries.clear();

        let err = ConsistencyChecker::new(&shadow, &telemetry)
            .check_ipv4_entry("default", "198.51.100.1/32")
            .await
            .unwrap_err();

        assert!(matches!(err, ConsistencyError::EntryNotFound { .. }));
    }

    #[tokio::test]
    async fn next_hop_check_covers_routes_it_resolves_through() {
        // -- setup --
        let shadow = shadow_with(vec![
            Mutation::add("default", NextHop::decap(2)),
            Mutation::add("default", NextHopGroup::new(1).with_member(2, 1)),
            Mutation::add("default", Ipv4Entry::new("203.0.113.0/24", 1)),
            Mutation::add("default", Ipv4Entry::new("198.51.100.0/24", 1)),
            Mutation::add("default", NextHop::ip(3, "203.0.113.9")),
            Mutation::add(
                "VRF1",
                Ipv4Entry::new("203.0.113.0/25", 1).with_group_network_instance("default"),
            ),
        ]);
        let mut telemetry = mirror(&shadow);
        // Neither route resolves the next hop.
        telemetry.instance_mut("default").ipv4_entries.remove("198.51.100.0/24");
        telemetry.instance_mut("VRF1").ipv4_entries.clear();
        let checker = ConsistencyChecker::new(&shadow, &telemetry);
        checker.check_next_hop("default", 3).await.unwrap();

        // -- execute --
        telemetry.instance_mut("default").ipv4_entries.remove("203.0.113.0/24");
        let err = ConsistencyChecker::new(&shadow, &telemetry)
            .check_next_hop("default", 3)
            .await
            .unwrap_err();

        // -- verify --
        match err {
            ConsistencyError::EntryNotFound { instance, prefix } => {
                assert_eq!(instance, "default");
                assert_eq!(prefix, "203.0.113.0/24");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn encapsulating_next_hops_are_matched_by_parameters() {
        // -- setup --
        let decap_encap = NextHopAction::DecapsulateThenEncapsulate {
            src_ip: "192.0.2.1".into(),
            dst_ips: vec!["198.51.100.7".into()],
            network_instance: "TE".into(),
        };
        let shadow = shadow_with(vec![
            Mutation::add("default", NextHop::new(1, NextHopAction::Encapsulate)),
            Mutation::add("default", NextHop::new(2, decap_encap)),
        ]);
        let mut telemetry = mirror(&shadow);
        let checker = ConsistencyChecker::new(&shadow, &telemetry);
        assert_eq!(checker.check_next_hop("default", 1).await.unwrap().index, 1 + DEVICE_OFFSET);
        assert_eq!(checker.check_next_hop("default", 2).await.unwrap().index, 2 + DEVICE_OFFSET);

        // -- execute --
        telemetry
            .instance_mut("default")
            .next_hops
            .get_mut(&(2 + DEVICE_OFFSET))
            .unwrap()
            .action = Some(NextHopAction::DecapsulateThenEncapsulate {
            src_ip: "192.0.2.1".into(),
            dst_ips: vec!["198.51.100.8".into()],
            network_instance: "TE".into(),
        });
        let err = ConsistencyChecker::new(&shadow, &telemetry)
            .check_next_hop("default", 2)
            .await
            .unwrap_err();

        // -- verify --
        assert!(matches!(err, ConsistencyError::NextHopNotFound { .. }));
    }
}
