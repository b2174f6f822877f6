use ipnetwork::Ipv4Network;
use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;

/// NextHopAction is the forwarding action of a single next hop. Exactly one is set per next hop.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum NextHopAction {
    IpAddress(String),
    Decapsulate,
    Encapsulate,
    DecapsulateThenEncapsulate {
        src_ip: String,
        dst_ips: Vec<String>,
        network_instance: String,
    },
    Interface(InterfaceRef),
}

impl NextHopAction {
    pub fn ip_address(&self) -> Option<&str> {
        match self {
            NextHopAction::IpAddress(address) => Some(address),
            _ => None,
        }
    }

    pub fn interface_ref(&self) -> Option<&InterfaceRef> {
        match self {
            NextHopAction::Interface(interface_ref) => Some(interface_ref),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InterfaceRef {
    pub interface: String,
    pub subinterface: Option<u32>,
}

impl InterfaceRef {
    pub fn new(interface: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
            subinterface: None,
        }
    }

    pub fn with_subinterface(interface: impl Into<String>, subinterface: u32) -> Self {
        Self {
            interface: interface.into(),
            subinterface: Some(subinterface),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NextHop {
    pub index: u64,
    // Assigned by the device. Until telemetry confirms it, we assume it equals `index`.
    pub programmed_index: u64,
    pub action: NextHopAction,
    pub next_hop_network_instance: Option<String>,
}

impl NextHop {
    pub fn new(index: u64, action: NextHopAction) -> Self {
        Self {
            index,
            programmed_index: index,
            action,
            next_hop_network_instance: None,
        }
    }

    pub fn ip(index: u64, address: impl Into<String>) -> Self {
        Self::new(index, NextHopAction::IpAddress(address.into()))
    }

    pub fn decap(index: u64) -> Self {
        Self::new(index, NextHopAction::Decapsulate)
    }

    pub fn interface(index: u64, interface_ref: InterfaceRef) -> Self {
        Self::new(index, NextHopAction::Interface(interface_ref))
    }

    pub fn in_network_instance(mut self, network_instance: impl Into<String>) -> Self {
        self.next_hop_network_instance = Some(network_instance.into());
        self
    }

    /// Whether this next hop forwards towards an address inside `network`.
    pub(crate) fn targets(&self, network: &Ipv4Network) -> bool {
        match self.action.ip_address().map(str::parse::<Ipv4Addr>) {
            Some(Ok(address)) => network.contains(address),
            _ => false,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NextHopGroup {
    pub id: u64,
    pub programmed_id: u64,
    /// Next hop index -> weight.
    pub members: BTreeMap<u64, u64>,
    pub backup_group_id: Option<u64>,
}

impl NextHopGroup {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            programmed_id: id,
            members: BTreeMap::new(),
            backup_group_id: None,
        }
    }

    pub fn with_member(mut self, next_hop_index: u64, weight: u64) -> Self {
        self.members.insert(next_hop_index, weight);
        self
    }

    pub fn with_members<I: IntoIterator<Item = (u64, u64)>>(mut self, members: I) -> Self {
        self.members.extend(members);
        self
    }

    pub fn with_backup(mut self, backup_group_id: u64) -> Self {
        self.backup_group_id = Some(backup_group_id);
        self
    }
}

/// How an entry came to be in the device's forwarding table.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum OriginProtocol {
    Gribi,
    Static,
    Unspecified,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Ipv4Entry {
    pub prefix: String,
    pub next_hop_group_id: u64,
    pub next_hop_group_network_instance: Option<String>,
    pub origin_protocol: OriginProtocol,
}

impl Ipv4Entry {
    pub fn new(prefix: impl Into<String>, next_hop_group_id: u64) -> Self {
        Self {
            prefix: prefix.into(),
            next_hop_group_id,
            next_hop_group_network_instance: None,
            origin_protocol: OriginProtocol::Gribi,
        }
    }

    pub fn with_group_network_instance(mut self, network_instance: impl Into<String>) -> Self {
        self.next_hop_group_network_instance = Some(network_instance.into());
        self
    }

    /// The instance the referenced group lives in, before alias resolution.
    pub fn group_network_instance<'a>(&'a self, own_instance: &'a str) -> &'a str {
        self.next_hop_group_network_instance
            .as_deref()
            .unwrap_or(own_instance)
    }
}

/// Entity is the payload of a single mutation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Entity {
    NextHop(NextHop),
    NextHopGroup(NextHopGroup),
    Ipv4(Ipv4Entry),
}

impl Entity {
    pub fn key(&self) -> EntityKey {
        match self {
            Entity::NextHop(nh) => EntityKey::NextHop(nh.index),
            Entity::NextHopGroup(nhg) => EntityKey::NextHopGroup(nhg.id),
            Entity::Ipv4(entry) => EntityKey::Ipv4(entry.prefix.clone()),
        }
    }
}

impl From<NextHop> for Entity {
    fn from(nh: NextHop) -> Self {
        Entity::NextHop(nh)
    }
}

impl From<NextHopGroup> for Entity {
    fn from(nhg: NextHopGroup) -> Self {
        Entity::NextHopGroup(nhg)
    }
}

impl From<Ipv4Entry> for Entity {
    fn from(entry: Ipv4Entry) -> Self {
        Entity::Ipv4(entry)
    }
}

/// EntityKey identifies an entity within a routing instance.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub enum EntityKey {
    NextHop(u64),
    NextHopGroup(u64),
    Ipv4(String),
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKey::NextHop(index) => write!(f, "next-hop {}", index),
            EntityKey::NextHopGroup(id) => write!(f, "next-hop-group {}", id),
            EntityKey::Ipv4(prefix) => write!(f, "ipv4-entry {}", prefix),
        }
    }
}
