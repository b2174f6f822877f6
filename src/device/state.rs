use crate::aft::{Entity, Ipv4Entry, Mutation, NextHop, NextHopGroup, OpType, OriginProtocol};
use crate::channel::{from_aft_operation, Persistence, SessionParams};
use crate::election::ElectionId;
use crate::grpc;
use crate::grpc::aft_result::Status as AftStatus;
use crate::grpc::flush_response::Status as FlushStatus;
use crate::grpc::session_parameters_result::Status as SessionStatus;
use crate::verify::{AftIpv4Entry, AftNextHop, AftNextHopGroup, DeviceAft};
use chrono::Utc;
use ipnetwork::Ipv4Network;
use std::collections::{BTreeMap, HashMap};
use tonic::Status;

pub(crate) type SessionId = u64;

#[derive(Default)]
struct SessionState {
    params: Option<SessionParams>,
    election_id: Option<ElectionId>,
}

/// DeviceState is everything the reference device knows. It is only ever touched from the device
/// event loop, so nothing in here is async or locked.
///
/// The device renumbers: every entity gets an internal index from a single counter, and the index
/// the client asked for is kept as the programmed index.
pub(crate) struct DeviceState {
    logger: slog::Logger,
    sessions: HashMap<SessionId, SessionState>,
    next_session_id: SessionId,
    current_election_id: ElectionId,
    leader: Option<SessionId>,
    instances: BTreeMap<String, DeviceAft>,
    next_internal_index: u64,
}

impl DeviceState {
    pub(crate) fn new(logger: slog::Logger) -> Self {
        DeviceState {
            logger,
            sessions: HashMap::new(),
            next_session_id: 1,
            current_election_id: ElectionId::default(),
            leader: None,
            instances: BTreeMap::new(),
            next_internal_index: 1,
        }
    }

    pub(crate) fn open_session(&mut self) -> SessionId {
        let session_id = self.next_session_id;
        self.next_session_id += 1;
        self.sessions.insert(session_id, SessionState::default());
        slog::debug!(self.logger, "Session {} opened", session_id);
        session_id
    }

    pub(crate) fn close_session(&mut self, session_id: SessionId) {
        let session = match self.sessions.remove(&session_id) {
            Some(session) => session,
            None => return,
        };

        if self.leader == Some(session_id) {
            self.leader = None;
            if session.params.map(|params| params.persistence) == Some(Persistence::Delete) {
                slog::info!(self.logger, "Primary session {} ended; removing its entries", session_id);
                self.instances.clear();
            }
        }
        slog::debug!(self.logger, "Session {} closed", session_id);
    }

    pub(crate) fn instance(&self, name: &str) -> Option<&DeviceAft> {
        self.instances.get(name)
    }

    pub(crate) fn modify(&mut self, session_id: SessionId, request: grpc::ModifyRequest) -> Vec<grpc::ModifyResponse> {
        let mut responses = Vec::new();

        if let Some(params) = request.params {
            let accepted = self.negotiate(session_id, &params);
            let status = if accepted {
                SessionStatus::Ok
            } else {
                SessionStatus::NotSupported
            };
            responses.push(grpc::ModifyResponse {
                session_params_result: Some(grpc::SessionParametersResult { status: status as i32 }),
                ..Default::default()
            });
        }

        if let Some(election_id) = request.election_id {
            self.update_election_id(session_id, election_id.into());
            responses.push(grpc::ModifyResponse {
                election_id: Some(self.current_election_id.into()),
                ..Default::default()
            });
        }

        if !request.operation.is_empty() {
            let results = request
                .operation
                .iter()
                .flat_map(|operation| self.program(session_id, operation))
                .collect();
            responses.push(grpc::ModifyResponse {
                result: results,
                ..Default::default()
            });
        }

        responses
    }

    pub(crate) fn flush(&mut self, request: &grpc::FlushRequest) -> Result<grpc::FlushResponse, Status> {
        if !request.election_override {
            let claimed = request.election_id.clone().map(ElectionId::from);
            if claimed != Some(self.current_election_id) {
                return Err(Status::failed_precondition(
                    "flush requires the current election id or an election override",
                ));
            }
        }

        if request.all_network_instances {
            self.instances.clear();
        } else {
            self.instances.remove(&request.network_instance);
        }
        slog::info!(self.logger, "Flushed forwarding state");

        Ok(grpc::FlushResponse {
            result: FlushStatus::Ok as i32,
            timestamp: now_nanos(),
        })
    }

    // Parameters may only be negotiated once per session.
    fn negotiate(&mut self, session_id: SessionId, params: &grpc::SessionParameters) -> bool {
        let session = self.sessions.entry(session_id).or_default();
        if session.params.is_some() {
            return false;
        }
        match SessionParams::from_wire(params) {
            Ok(params) => {
                session.params = Some(params);
                true
            }
            Err(reason) => {
                slog::warn!(self.logger, "Session {} parameters rejected: {}", session_id, reason);
                false
            }
        }
    }

    fn update_election_id(&mut self, session_id: SessionId, election_id: ElectionId) {
        self.sessions.entry(session_id).or_default().election_id = Some(election_id);

        if election_id > self.current_election_id {
            self.current_election_id = election_id;
            self.leader = Some(session_id);
        } else if election_id == self.current_election_id && self.leader.is_none() {
            self.leader = Some(session_id);
        }
    }

    fn is_leader(&self, session_id: SessionId) -> bool {
        self.leader == Some(session_id)
            && self
                .sessions
                .get(&session_id)
                .and_then(|session| session.election_id)
                == Some(self.current_election_id)
    }

    fn program(&mut self, session_id: SessionId, operation: &grpc::AftOperation) -> Vec<grpc::AftResult> {
        let fib_ack = match self.sessions.get(&session_id).and_then(|session| session.params) {
            Some(params) => params.fib_ack,
            None => return vec![failed(operation.id, "session parameters were not negotiated")],
        };
        if !self.is_leader(session_id) {
            return vec![failed(operation.id, "session is not the primary client")];
        }
        if let Some(election_id) = operation.election_id.clone() {
            if ElectionId::from(election_id) != self.current_election_id {
                return vec![failed(operation.id, "operation carries a stale election id")];
            }
        }

        let outcome = from_aft_operation(operation)
            .map_err(str::to_string)
            .and_then(|mutation| self.apply(&mutation));
        if let Err(details) = outcome {
            slog::debug!(self.logger, "Operation {} failed: {}", operation.id, details);
            return vec![failed(operation.id, &details)];
        }

        let mut results = vec![programmed(operation.id, AftStatus::RibProgrammed)];
        if fib_ack {
            results.push(programmed(operation.id, AftStatus::FibProgrammed));
        }
        results
    }

    fn apply(&mut self, mutation: &Mutation) -> Result<(), String> {
        let instance = mutation.network_instance.as_str();
        match &mutation.entity {
            Entity::NextHop(nh) => self.apply_next_hop(instance, mutation.op, nh),
            Entity::NextHopGroup(nhg) => self.apply_next_hop_group(instance, mutation.op, nhg),
            Entity::Ipv4(entry) => self.apply_ipv4_entry(instance, mutation.op, entry),
        }
    }

    fn apply_next_hop(&mut self, instance: &str, op: OpType, nh: &NextHop) -> Result<(), String> {
        let existing = self
            .instances
            .get(instance)
            .and_then(|aft| aft.next_hop_by_programmed_index(nh.index))
            .map(|device_nh| device_nh.index);

        match (op, existing) {
            (OpType::Delete, None) | (OpType::Replace, None) => Err(format!("next-hop {} does not exist", nh.index)),
            (OpType::Delete, Some(index)) => {
                let aft = self.instance_mut(instance);
                if aft.next_hop_groups.values().any(|nhg| nhg.next_hops.contains_key(&index)) {
                    return Err(format!("next-hop {} is still referenced", nh.index));
                }
                aft.next_hops.remove(&index);
                Ok(())
            }
            (OpType::Add, existing) | (OpType::Replace, existing) => {
                let index = existing.unwrap_or_else(|| self.allocate_index());
                self.instance_mut(instance).next_hops.insert(
                    index,
                    AftNextHop {
                        index,
                        programmed_index: nh.index,
                        action: Some(nh.action.clone()),
                        network_instance: nh.next_hop_network_instance.clone(),
                        interface_ref: nh.action.interface_ref().cloned(),
                    },
                );
                Ok(())
            }
        }
    }

    fn apply_next_hop_group(&mut self, instance: &str, op: OpType, nhg: &NextHopGroup) -> Result<(), String> {
        let aft = self.instances.get(instance);
        let existing = aft
            .and_then(|aft| aft.next_hop_group_by_programmed_id(nhg.id))
            .map(|device_nhg| device_nhg.id);

        match (op, existing) {
            (OpType::Delete, None) | (OpType::Replace, None) => {
                Err(format!("next-hop-group {} does not exist", nhg.id))
            }
            (OpType::Delete, Some(id)) => {
                if self.group_is_referenced(instance, id) {
                    return Err(format!("next-hop-group {} is still referenced", nhg.id));
                }
                self.instance_mut(instance).next_hop_groups.remove(&id);
                Ok(())
            }
            (OpType::Add, existing) | (OpType::Replace, existing) => {
                if nhg.members.is_empty() && nhg.backup_group_id.is_none() {
                    return Err(format!("next-hop-group {} has no members and no backup", nhg.id));
                }
                let mut next_hops = BTreeMap::new();
                for (programmed_index, weight) in &nhg.members {
                    if *weight == 0 {
                        return Err(format!("next-hop {} has weight 0", programmed_index));
                    }
                    let index = aft
                        .and_then(|aft| aft.next_hop_by_programmed_index(*programmed_index))
                        .map(|device_nh| device_nh.index)
                        .ok_or_else(|| format!("references missing next-hop {}", programmed_index))?;
                    next_hops.insert(index, *weight);
                }
                let backup_next_hop_group = match nhg.backup_group_id {
                    Some(backup) if backup == nhg.id => {
                        return Err(format!("next-hop-group {} cannot back itself up", nhg.id))
                    }
                    Some(backup) => Some(
                        aft.and_then(|aft| aft.next_hop_group_by_programmed_id(backup))
                            .map(|device_nhg| device_nhg.id)
                            .ok_or_else(|| format!("references missing backup next-hop-group {}", backup))?,
                    ),
                    None => None,
                };

                let id = existing.unwrap_or_else(|| self.allocate_index());
                self.instance_mut(instance).next_hop_groups.insert(
                    id,
                    AftNextHopGroup {
                        id,
                        programmed_id: nhg.id,
                        next_hops,
                        backup_next_hop_group,
                    },
                );
                Ok(())
            }
        }
    }

    fn apply_ipv4_entry(&mut self, instance: &str, op: OpType, entry: &Ipv4Entry) -> Result<(), String> {
        let exists = self
            .instances
            .get(instance)
            .map_or(false, |aft| aft.ipv4_entries.contains_key(&entry.prefix));

        match op {
            OpType::Delete | OpType::Replace if !exists => Err(format!("ipv4-entry {} does not exist", entry.prefix)),
            OpType::Delete => {
                self.instance_mut(instance).ipv4_entries.remove(&entry.prefix);
                Ok(())
            }
            OpType::Add | OpType::Replace => {
                if entry.prefix.parse::<Ipv4Network>().is_err() {
                    return Err(format!("{} is not an IPv4 prefix", entry.prefix));
                }
                let group_instance = entry.group_network_instance(instance);
                let next_hop_group = self
                    .instances
                    .get(group_instance)
                    .and_then(|aft| aft.next_hop_group_by_programmed_id(entry.next_hop_group_id))
                    .map(|device_nhg| device_nhg.id)
                    .ok_or_else(|| {
                        format!(
                            "references missing next-hop-group {} in instance '{}'",
                            entry.next_hop_group_id, group_instance
                        )
                    })?;

                self.instance_mut(instance).ipv4_entries.insert(
                    entry.prefix.clone(),
                    AftIpv4Entry {
                        prefix: entry.prefix.clone(),
                        next_hop_group,
                        next_hop_group_network_instance: entry.next_hop_group_network_instance.clone(),
                        origin_protocol: OriginProtocol::Gribi,
                    },
                );
                Ok(())
            }
        }
    }

    fn group_is_referenced(&self, instance: &str, id: u64) -> bool {
        let as_backup = self.instances.get(instance).map_or(false, |aft| {
            aft.next_hop_groups
                .values()
                .any(|nhg| nhg.backup_next_hop_group == Some(id))
        });
        let by_route = self.instances.iter().any(|(route_instance, aft)| {
            aft.ipv4_entries.values().any(|entry| {
                entry.next_hop_group == id
                    && entry
                        .next_hop_group_network_instance
                        .as_deref()
                        .unwrap_or(route_instance)
                        == instance
            })
        });
        as_backup || by_route
    }

    fn instance_mut(&mut self, instance: &str) -> &mut DeviceAft {
        self.instances.entry(instance.to_string()).or_default()
    }

    fn allocate_index(&mut self) -> u64 {
        let index = self.next_internal_index;
        self.next_internal_index += 1;
        index
    }
}

fn programmed(id: u64, status: AftStatus) -> grpc::AftResult {
    grpc::AftResult {
        id,
        status: status as i32,
        timestamp: now_nanos(),
        error_details: String::new(),
    }
}

fn failed(id: u64, details: &str) -> grpc::AftResult {
    grpc::AftResult {
        id,
        status: AftStatus::Failed as i32,
        timestamp: now_nanos(),
        error_details: details.to_string(),
    }
}

fn now_nanos() -> i64 {
    Utc::now().timestamp_nanos_opt().unwrap_or_default()
}
