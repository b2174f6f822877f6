use crate::aft::{InterfaceRef, NextHopAction, OriginProtocol};
use std::collections::BTreeMap;

/// A next hop as the device reports it. `index` is the device's own; `programmed_index` is the
/// index the client asked for.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AftNextHop {
    pub index: u64,
    pub programmed_index: u64,
    pub action: Option<NextHopAction>,
    pub network_instance: Option<String>,
    pub interface_ref: Option<InterfaceRef>,
}

/// A next hop group as the device reports it. Member and backup references use the device's own
/// indices.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AftNextHopGroup {
    pub id: u64,
    pub programmed_id: u64,
    /// Device next hop index -> weight.
    pub next_hops: BTreeMap<u64, u64>,
    pub backup_next_hop_group: Option<u64>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AftIpv4Entry {
    pub prefix: String,
    /// Device id of the group.
    pub next_hop_group: u64,
    pub next_hop_group_network_instance: Option<String>,
    pub origin_protocol: OriginProtocol,
}

#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum TelemetryError {
    #[error("Telemetry unavailable: {0}")]
    Unavailable(String),
}

/// AftTelemetry is the read-back surface of a device's forwarding tables.
#[async_trait::async_trait]
pub trait AftTelemetry: Send + Sync {
    async fn next_hops(&self, instance: &str) -> Result<Vec<AftNextHop>, TelemetryError>;

    async fn next_hop_groups(&self, instance: &str) -> Result<Vec<AftNextHopGroup>, TelemetryError>;

    async fn ipv4_entry(&self, instance: &str, prefix: &str) -> Result<Option<AftIpv4Entry>, TelemetryError>;
}

/// DeviceAft is one routing instance's tables, keyed the way the device keys them.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DeviceAft {
    pub next_hops: BTreeMap<u64, AftNextHop>,
    pub next_hop_groups: BTreeMap<u64, AftNextHopGroup>,
    pub ipv4_entries: BTreeMap<String, AftIpv4Entry>,
}

impl DeviceAft {
    pub fn next_hop_by_programmed_index(&self, programmed_index: u64) -> Option<&AftNextHop> {
        self.next_hops
            .values()
            .find(|nh| nh.programmed_index == programmed_index)
    }

    pub fn next_hop_group_by_programmed_id(&self, programmed_id: u64) -> Option<&AftNextHopGroup> {
        self.next_hop_groups
            .values()
            .find(|nhg| nhg.programmed_id == programmed_id)
    }

    pub fn is_empty(&self) -> bool {
        self.next_hops.is_empty() && self.next_hop_groups.is_empty() && self.ipv4_entries.is_empty()
    }
}

/// A fixed set of tables, e.g. captured earlier or built by hand.
#[derive(Clone, Debug, Default)]
pub struct StaticTelemetry {
    pub instances: BTreeMap<String, DeviceAft>,
}

impl StaticTelemetry {
    pub fn instance_mut(&mut self, instance: &str) -> &mut DeviceAft {
        self.instances.entry(instance.to_string()).or_default()
    }
}

#[async_trait::async_trait]
impl AftTelemetry for StaticTelemetry {
    async fn next_hops(&self, instance: &str) -> Result<Vec<AftNextHop>, TelemetryError> {
        Ok(self
            .instances
            .get(instance)
            .map(|aft| aft.next_hops.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn next_hop_groups(&self, instance: &str) -> Result<Vec<AftNextHopGroup>, TelemetryError> {
        Ok(self
            .instances
            .get(instance)
            .map(|aft| aft.next_hop_groups.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn ipv4_entry(&self, instance: &str, prefix: &str) -> Result<Option<AftIpv4Entry>, TelemetryError> {
        Ok(self
            .instances
            .get(instance)
            .and_then(|aft| aft.ipv4_entries.get(prefix))
            .cloned())
    }
}
