//! Conversions between the domain model and the generated wire types.
use crate::aft::{Entity, InterfaceRef, Ipv4Entry, Mutation, NextHop, NextHopAction, NextHopGroup, OpType};
use crate::election::ElectionId;
use crate::grpc;
use crate::grpc::aft_operation::{Entry, Operation};
use crate::grpc::next_hop::Action;

impl From<ElectionId> for grpc::Uint128 {
    fn from(id: ElectionId) -> Self {
        grpc::Uint128 {
            high: id.high,
            low: id.low,
        }
    }
}

impl From<grpc::Uint128> for ElectionId {
    fn from(id: grpc::Uint128) -> Self {
        ElectionId::new(id.low, id.high)
    }
}

pub(crate) fn to_aft_operation(id: u64, mutation: &Mutation, election_id: Option<ElectionId>) -> grpc::AftOperation {
    let op = match mutation.op {
        OpType::Add => Operation::Add,
        OpType::Replace => Operation::Replace,
        OpType::Delete => Operation::Delete,
    };
    let entry = match &mutation.entity {
        Entity::NextHop(nh) => Entry::NextHop(next_hop_to_wire(nh)),
        Entity::NextHopGroup(nhg) => Entry::NextHopGroup(next_hop_group_to_wire(nhg)),
        Entity::Ipv4(entry) => Entry::Ipv4(grpc::Ipv4Entry {
            prefix: entry.prefix.clone(),
            next_hop_group: entry.next_hop_group_id,
            next_hop_group_network_instance: entry.next_hop_group_network_instance.clone().unwrap_or_default(),
        }),
    };

    grpc::AftOperation {
        id,
        network_instance: mutation.network_instance.clone(),
        op: op as i32,
        election_id: election_id.map(grpc::Uint128::from),
        entry: Some(entry),
    }
}

fn next_hop_to_wire(nh: &NextHop) -> grpc::NextHop {
    let action = match &nh.action {
        NextHopAction::IpAddress(address) => Action::IpAddress(address.clone()),
        NextHopAction::Decapsulate => Action::Decapsulate(grpc::Decapsulate {}),
        NextHopAction::Encapsulate => Action::Encapsulate(grpc::Encapsulate {}),
        NextHopAction::DecapsulateThenEncapsulate {
            src_ip,
            dst_ips,
            network_instance,
        } => Action::DecapEncap(grpc::DecapEncap {
            src_ip: src_ip.clone(),
            dst_ips: dst_ips.clone(),
            network_instance: network_instance.clone(),
        }),
        NextHopAction::Interface(interface_ref) => Action::InterfaceRef(grpc::InterfaceRef {
            interface: interface_ref.interface.clone(),
            subinterface: interface_ref
                .subinterface
                .map(|index| grpc::Subinterface { index }),
        }),
    };

    grpc::NextHop {
        index: nh.index,
        action: Some(action),
        next_hop_network_instance: nh.next_hop_network_instance.clone().unwrap_or_default(),
    }
}

fn next_hop_group_to_wire(nhg: &NextHopGroup) -> grpc::NextHopGroup {
    grpc::NextHopGroup {
        id: nhg.id,
        next_hop: nhg
            .members
            .iter()
            .map(|(index, weight)| grpc::NextHopGroupMember {
                index: *index,
                weight: *weight,
            })
            .collect(),
        backup_next_hop_group: nhg.backup_group_id.unwrap_or_default(),
    }
}

/// Decodes an operation received by the device. The operation id and election id are left to the
/// caller.
pub(crate) fn from_aft_operation(operation: &grpc::AftOperation) -> Result<Mutation, &'static str> {
    let op = match Operation::from_i32(operation.op) {
        Some(Operation::Add) => OpType::Add,
        Some(Operation::Replace) => OpType::Replace,
        Some(Operation::Delete) => OpType::Delete,
        Some(Operation::Invalid) | None => return Err("invalid operation type"),
    };
    let entity = match &operation.entry {
        Some(Entry::NextHop(nh)) => Entity::NextHop(next_hop_from_wire(nh)?),
        Some(Entry::NextHopGroup(nhg)) => Entity::NextHopGroup(next_hop_group_from_wire(nhg)),
        Some(Entry::Ipv4(entry)) => Entity::Ipv4(Ipv4Entry {
            prefix: entry.prefix.clone(),
            next_hop_group_id: entry.next_hop_group,
            next_hop_group_network_instance: non_empty(&entry.next_hop_group_network_instance),
            origin_protocol: crate::aft::OriginProtocol::Gribi,
        }),
        None => return Err("operation carries no entry"),
    };

    Ok(Mutation {
        network_instance: operation.network_instance.clone(),
        op,
        entity,
    })
}

fn next_hop_from_wire(nh: &grpc::NextHop) -> Result<NextHop, &'static str> {
    let action = match &nh.action {
        Some(Action::IpAddress(address)) => NextHopAction::IpAddress(address.clone()),
        Some(Action::Decapsulate(_)) => NextHopAction::Decapsulate,
        Some(Action::Encapsulate(_)) => NextHopAction::Encapsulate,
        Some(Action::DecapEncap(decap_encap)) => NextHopAction::DecapsulateThenEncapsulate {
            src_ip: decap_encap.src_ip.clone(),
            dst_ips: decap_encap.dst_ips.clone(),
            network_instance: decap_encap.network_instance.clone(),
        },
        Some(Action::InterfaceRef(interface_ref)) => NextHopAction::Interface(InterfaceRef {
            interface: interface_ref.interface.clone(),
            subinterface: interface_ref.subinterface.as_ref().map(|sub| sub.index),
        }),
        None => return Err("next hop carries no action"),
    };

    let mut next_hop = NextHop::new(nh.index, action);
    next_hop.next_hop_network_instance = non_empty(&nh.next_hop_network_instance);
    Ok(next_hop)
}

fn next_hop_group_from_wire(nhg: &grpc::NextHopGroup) -> NextHopGroup {
    let mut group = NextHopGroup::new(nhg.id).with_members(nhg.next_hop.iter().map(|member| (member.index, member.weight)));
    if nhg.backup_next_hop_group != 0 {
        group = group.with_backup(nhg.backup_next_hop_group);
    }
    group
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}
