use crate::aft::{
    self, CascadeReport, Entity, Generation, InstanceAliases, Invalidation, Ipv4Entry, Mutation, NextHop,
    NextHopAction, NextHopGroup, ShadowState,
};
use crate::channel::{Expectation, GribiStub, OperationChannel, OperationResult, SessionParams};
use crate::client::error::{ClientCreationError, ClientError};
use crate::client::options::{ClientOptions, ClientOptionsValidated};
use crate::election::{ElectionId, ElectionSession};
use crate::grpc;
use crate::grpc::flush_response::Status as FlushStatus;
use crate::verify::{AftTelemetry, ConsistencyChecker};
use std::convert::TryFrom;
use std::sync::Arc;
use std::time::Duration;

/// Client drives one device through one modify stream, and keeps the shadow AFT of what that
/// device should now contain.
///
/// Mutations are issued one call at a time. Each call blocks until the device has answered every
/// operation in it.
pub struct Client {
    pub(super) logger: slog::Logger,
    pub(super) stub: Arc<dyn GribiStub>,
    pub(super) telemetry: Option<Arc<dyn AftTelemetry>>,
    pub(super) channel: OperationChannel,
    pub(super) election: ElectionSession,
    pub(super) shadow: ShadowState,
    pub(super) options: ClientOptionsValidated,
}

impl Client {
    /// Opens the modify stream, negotiates session parameters and announces the initial election
    /// id. Does not claim leadership.
    pub async fn start(
        stub: Arc<dyn GribiStub>,
        telemetry: Option<Arc<dyn AftTelemetry>>,
        options: ClientOptions,
        logger: slog::Logger,
    ) -> Result<Self, ClientCreationError> {
        let options = ClientOptionsValidated::try_from(options)
            .map_err(|e| ClientCreationError::IllegalClientOptions(e.to_string()))?;

        let params = SessionParams {
            persistence: options.persistence,
            fib_ack: options.fib_ack,
        };
        let mut channel = OperationChannel::start(
            stub.as_ref(),
            params,
            options.session_timeout,
            &options.cancellation,
            logger.clone(),
        )
        .await?;

        channel.send_election_id(options.initial_election_id).await?;
        channel.wait(None).await?;
        slog::info!(
            logger,
            "Session started; device reports election id {:?}",
            channel.reported_election_id()
        );

        Ok(Client {
            election: ElectionSession::new(logger.clone()),
            shadow: ShadowState::new(InstanceAliases::new(options.instance_aliases.clone())),
            logger,
            stub,
            telemetry,
            channel,
            options,
        })
    }

    /// Closes the modify stream. Dropping the client does the same.
    pub fn close(&mut self) {
        self.channel.close();
        self.options.cancellation.cancel();
    }

    pub fn shadow(&self) -> &ShadowState {
        &self.shadow
    }

    pub fn results(&self) -> &[OperationResult] {
        self.channel.results()
    }

    pub fn election_id(&self) -> Option<ElectionId> {
        self.channel.election_id()
    }

    pub fn fib_ack(&self) -> bool {
        self.options.fib_ack
    }

    pub async fn learn_election_id(&mut self) -> Result<ElectionId, ClientError> {
        self.election.learn(&mut self.channel).await
    }

    pub async fn become_leader(&mut self) -> Result<ElectionId, ClientError> {
        self.election.become_leader(&mut self.channel).await
    }

    pub async fn update_election_id(&mut self, low: u64, high: u64) -> Result<(), ClientError> {
        self.election
            .update(&mut self.channel, ElectionId::new(low, high))
            .await
    }

    pub async fn add_next_hop(&mut self, instance: &str, nh: NextHop, expectation: Expectation) -> Result<(), ClientError> {
        self.modify(vec![Mutation::add(instance, nh)], expectation, None).await
    }

    pub async fn replace_next_hop(
        &mut self,
        instance: &str,
        nh: NextHop,
        expectation: Expectation,
    ) -> Result<(), ClientError> {
        self.modify(vec![Mutation::replace(instance, nh)], expectation, None).await
    }

    pub async fn delete_next_hop(&mut self, instance: &str, index: u64, expectation: Expectation) -> Result<(), ClientError> {
        let nh = self
            .shadow
            .next_hop(instance, index)
            .cloned()
            .unwrap_or_else(|| NextHop::new(index, NextHopAction::Decapsulate));
        self.modify(vec![Mutation::delete(instance, nh)], expectation, None).await
    }

    pub async fn add_next_hop_group(
        &mut self,
        instance: &str,
        nhg: NextHopGroup,
        expectation: Expectation,
    ) -> Result<(), ClientError> {
        self.modify(vec![Mutation::add(instance, nhg)], expectation, None).await
    }

    pub async fn replace_next_hop_group(
        &mut self,
        instance: &str,
        nhg: NextHopGroup,
        expectation: Expectation,
    ) -> Result<(), ClientError> {
        self.modify(vec![Mutation::replace(instance, nhg)], expectation, None).await
    }

    pub async fn delete_next_hop_group(
        &mut self,
        instance: &str,
        id: u64,
        expectation: Expectation,
    ) -> Result<(), ClientError> {
        let nhg = self
            .shadow
            .next_hop_group(instance, id)
            .cloned()
            .unwrap_or_else(|| NextHopGroup::new(id));
        self.modify(vec![Mutation::delete(instance, nhg)], expectation, None).await
    }

    pub async fn add_ipv4_entry(
        &mut self,
        instance: &str,
        entry: Ipv4Entry,
        expectation: Expectation,
    ) -> Result<(), ClientError> {
        self.modify(vec![Mutation::add(instance, entry)], expectation, None).await
    }

    pub async fn replace_ipv4_entry(
        &mut self,
        instance: &str,
        entry: Ipv4Entry,
        expectation: Expectation,
    ) -> Result<(), ClientError> {
        self.modify(vec![Mutation::replace(instance, entry)], expectation, None).await
    }

    pub async fn delete_ipv4_entry(
        &mut self,
        instance: &str,
        prefix: &str,
        expectation: Expectation,
    ) -> Result<(), ClientError> {
        let entry = self
            .shadow
            .ipv4_entry(instance, prefix)
            .cloned()
            .unwrap_or_else(|| Ipv4Entry::new(prefix, 0));
        self.modify(vec![Mutation::delete(instance, entry)], expectation, None).await
    }

    /// Sends `mutations` in one request, waits for all of their results and checks each against
    /// `expectation`. `timeout` overrides the session default.
    pub async fn modify(
        &mut self,
        mutations: Vec<Mutation>,
        expectation: Expectation,
        timeout: Option<Duration>,
    ) -> Result<(), ClientError> {
        self.submit(&mutations, expectation).await?;
        self.channel.wait(timeout).await?;

        for mutation in &mutations {
            self.channel
                .expect_outcome(&mutation.network_instance, &mutation.key(), mutation.op, expectation)?;
        }

        if expectation == Expectation::Success && self.options.verify_after_write && self.telemetry.is_some() {
            for mutation in &mutations {
                self.verify_written(mutation).await?;
            }
        }
        Ok(())
    }

    /// Removes every route from the device and resets the shadow AFT to a single empty frame.
    pub async fn flush(&mut self, election_override: bool) -> Result<(), ClientError> {
        let request = grpc::FlushRequest {
            election_id: self.channel.election_id().map(grpc::Uint128::from),
            election_override,
            all_network_instances: true,
            network_instance: String::new(),
        };
        let response = self.stub.flush(request).await?;

        match FlushStatus::from_i32(response.result) {
            Some(FlushStatus::Ok) => {
                slog::info!(self.logger, "Flushed device; shadow AFT reset");
                self.shadow.reset();
                Ok(())
            }
            other => Err(ClientError::FlushFailed(format!("{:?}", other))),
        }
    }

    pub fn aft_push(&mut self) -> Generation {
        self.shadow.push()
    }

    pub fn aft_pop(&mut self) -> Result<Generation, ClientError> {
        Ok(self.shadow.pop()?)
    }

    /// `prefix` is no longer reachable; drop it and everything forwarding through it.
    pub fn invalidate_prefix(&mut self, instance: &str, prefix: &str) -> CascadeReport {
        self.invalidate(Invalidation::Prefix {
            instance: instance.to_string(),
            prefix: prefix.to_string(),
        })
    }

    pub fn invalidate_next_hop(&mut self, instance: &str, index: u64) -> CascadeReport {
        self.invalidate(Invalidation::NextHop {
            instance: instance.to_string(),
            index,
        })
    }

    pub async fn check_all(&self) -> Result<(), ClientError> {
        Ok(self.checker()?.check_all().await?)
    }

    pub async fn check_next_hop(&mut self, instance: &str, index: u64) -> Result<(), ClientError> {
        let found = self.checker()?.check_next_hop(instance, index).await?;
        self.shadow
            .confirm_programmed_index(instance, index, found.programmed_index);
        Ok(())
    }

    pub async fn check_next_hop_group(&self, instance: &str, programmed_id: u64) -> Result<(), ClientError> {
        Ok(self
            .checker()?
            .check_next_hop_group(instance, programmed_id)
            .await?)
    }

    pub async fn check_ipv4_entry(&self, instance: &str, prefix: &str) -> Result<(), ClientError> {
        Ok(self.checker()?.check_ipv4_entry(instance, prefix).await?)
    }

    /// Validates and applies to the shadow AFT before sending, so that callers see the intended
    /// state immediately. Nothing is applied when a failure is expected.
    pub(super) async fn submit(&mut self, mutations: &[Mutation], expectation: Expectation) -> Result<(), ClientError> {
        if expectation == Expectation::Success {
            let mut staged = self.shadow.clone();
            for mutation in mutations {
                staged.validate(mutation)?;
                staged.apply(mutation);
            }
            self.shadow = staged;
        }

        self.channel.submit(mutations).await?;
        Ok(())
    }

    fn invalidate(&mut self, invalidation: Invalidation) -> CascadeReport {
        let report = aft::invalidate(&mut self.shadow, invalidation);
        if !report.is_empty() {
            slog::info!(self.logger, "Invalidation removed {} entities", report.removed_count());
        }
        report
    }

    fn checker(&self) -> Result<ConsistencyChecker<'_>, ClientError> {
        let telemetry = self.telemetry.as_deref().ok_or(ClientError::NoTelemetry)?;
        Ok(ConsistencyChecker::new(&self.shadow, telemetry))
    }

    pub(super) async fn verify_written(&mut self, mutation: &Mutation) -> Result<(), ClientError> {
        let instance = mutation.network_instance.as_str();
        match (&mutation.entity, mutation.op) {
            (_, aft::OpType::Delete) => Ok(()),
            (Entity::NextHop(nh), _) => self.check_next_hop(instance, nh.index).await,
            (Entity::NextHopGroup(nhg), _) => {
                let programmed_id = self
                    .shadow
                    .next_hop_group(instance, nhg.id)
                    .map(|nhg| nhg.programmed_id)
                    .unwrap_or(nhg.id);
                self.check_next_hop_group(instance, programmed_id).await
            }
            (Entity::Ipv4(entry), _) => self.check_ipv4_entry(instance, &entry.prefix).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aft::{EntityKey, ShadowError};
    use crate::channel::Persistence;
    use crate::device::ReferenceDevice;
    use crate::test_utils::test_logger;

    const VRF: &str = "default";

    async fn leader(device: &ReferenceDevice, options: ClientOptions) -> Client {
        let mut client = Client::start(
            Arc::new(device.clone()),
            Some(Arc::new(device.clone())),
            options,
            test_logger(),
        )
        .await
        .unwrap();
        client.become_leader().await.unwrap();
        client
    }

    async fn program_basic_topology(client: &mut Client) {
        client
            .add_next_hop(VRF, NextHop::decap(10), Expectation::Success)
            .await
            .unwrap();
        client
            .add_next_hop_group(VRF, NextHopGroup::new(101).with_member(10, 100), Expectation::Success)
            .await
            .unwrap();
        client
            .add_ipv4_entry(VRF, Ipv4Entry::new("198.51.100.1/32", 101), Expectation::Success)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn programmed_topology_passes_check_then_cascades_away() {
        // -- setup --
        let device = ReferenceDevice::spawn(test_logger());
        let mut client = leader(&device, ClientOptions::default()).await;

        // -- execute --
        program_basic_topology(&mut client).await;
        client.check_all().await.unwrap();
        let report = client.invalidate_next_hop(VRF, 10);

        // -- verify --
        assert_eq!(report.removed_count(), 3);
        assert!(client.shadow().next_hop_group(VRF, 101).is_none());
        assert!(client.shadow().ipv4_entry(VRF, "198.51.100.1/32").is_none());
    }

    #[tokio::test]
    async fn second_add_of_same_prefix_is_rejected_before_sending() {
        // -- setup --
        let device = ReferenceDevice::spawn(test_logger());
        let mut client = leader(&device, ClientOptions::default()).await;
        program_basic_topology(&mut client).await;
        client
            .add_next_hop_group(VRF, NextHopGroup::new(102).with_member(10, 1), Expectation::Success)
            .await
            .unwrap();
        let sent_before = client.results().len();

        // -- execute --
        let err = client
            .add_ipv4_entry(VRF, Ipv4Entry::new("198.51.100.1/32", 102), Expectation::Success)
            .await
            .unwrap_err();

        // -- verify --
        assert!(matches!(
            err,
            ClientError::Invariant(ShadowError::AlreadyExists(_, _))
        ));
        assert_eq!(client.results().len(), sent_before);
        client
            .replace_ipv4_entry(VRF, Ipv4Entry::new("198.51.100.1/32", 102), Expectation::Success)
            .await
            .unwrap();
        client.check_all().await.unwrap();
    }

    #[tokio::test]
    async fn replace_twice_is_idempotent() {
        // -- setup --
        let device = ReferenceDevice::spawn(test_logger());
        let mut client = leader(&device, ClientOptions::default()).await;
        program_basic_topology(&mut client).await;
        let replacement = NextHopGroup::new(101).with_member(10, 7);

        // -- execute --
        client
            .replace_next_hop_group(VRF, replacement.clone(), Expectation::Success)
            .await
            .unwrap();
        let once = client.shadow().current().clone();
        client
            .replace_next_hop_group(VRF, replacement, Expectation::Success)
            .await
            .unwrap();

        // -- verify --
        assert_eq!(client.shadow().current(), &once);
        client.check_all().await.unwrap();
    }

    #[tokio::test]
    async fn expected_failure_leaves_shadow_untouched() {
        // -- setup --
        let device = ReferenceDevice::spawn(test_logger());
        let mut client = leader(&device, ClientOptions::default()).await;
        let before = client.shadow().current().clone();

        // -- execute --
        client
            .add_ipv4_entry(VRF, Ipv4Entry::new("203.0.113.0/24", 999), Expectation::Failure)
            .await
            .unwrap();

        // -- verify --
        assert_eq!(client.shadow().current(), &before);
    }

    #[tokio::test]
    async fn unexpected_success_is_a_result_mismatch() {
        // -- setup --
        let device = ReferenceDevice::spawn(test_logger());
        let mut client = leader(&device, ClientOptions::default()).await;

        // -- execute --
        let err = client
            .add_next_hop(VRF, NextHop::decap(20), Expectation::Failure)
            .await
            .unwrap_err();

        // -- verify --
        match err {
            ClientError::ResultMismatch { observed, .. } => assert_eq!(observed, "RIB_PROGRAMMED"),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn fib_ack_requires_both_acknowledgements() {
        // -- setup --
        let device = ReferenceDevice::spawn(test_logger());
        let options = ClientOptions {
            fib_ack: Some(true),
            ..Default::default()
        };
        let mut client = leader(&device, options).await;

        // -- execute --
        program_basic_topology(&mut client).await;

        // -- verify --
        let key = EntityKey::Ipv4("198.51.100.1/32".to_string());
        let acks = client
            .results()
            .iter()
            .filter_map(OperationResult::as_operation)
            .filter(|result| result.key == key)
            .count();
        assert_eq!(acks, 2);
    }

    #[tokio::test]
    async fn verify_after_write_checks_each_write() {
        // -- setup --
        let device = ReferenceDevice::spawn(test_logger());
        let options = ClientOptions {
            verify_after_write: Some(true),
            ..Default::default()
        };
        let mut client = leader(&device, options).await;

        // -- execute & verify --
        program_basic_topology(&mut client).await;
        client
            .delete_ipv4_entry(VRF, "198.51.100.1/32", Expectation::Success)
            .await
            .unwrap();
        client.delete_next_hop_group(VRF, 101, Expectation::Success).await.unwrap();
        client.delete_next_hop(VRF, 10, Expectation::Success).await.unwrap();
        assert_eq!(client.shadow().entity_count(), 0);
    }

    #[tokio::test]
    async fn checks_need_telemetry() {
        let device = ReferenceDevice::spawn(test_logger());
        let client = Client::start(Arc::new(device), None, ClientOptions::default(), test_logger())
            .await
            .unwrap();

        assert!(matches!(client.check_all().await, Err(ClientError::NoTelemetry)));
    }

    #[tokio::test]
    async fn flush_clears_device_and_shadow() {
        // -- setup --
        let device = ReferenceDevice::spawn(test_logger());
        let mut client = leader(&device, ClientOptions::default()).await;
        program_basic_topology(&mut client).await;
        client.aft_push();

        // -- execute --
        client.flush(false).await.unwrap();

        // -- verify --
        assert_eq!(client.shadow().generation().as_usize(), 0);
        assert_eq!(client.shadow().entity_count(), 0);
        assert!(device.aft(VRF).await.unwrap().is_empty());
        client.check_all().await.unwrap();
    }

    #[tokio::test]
    async fn speculative_frame_is_discarded_by_pop() {
        // -- setup --
        let device = ReferenceDevice::spawn(test_logger());
        let mut client = leader(&device, ClientOptions::default()).await;
        program_basic_topology(&mut client).await;
        let before = client.shadow().current().clone();

        // -- execute --
        client.aft_push();
        client.invalidate_prefix(VRF, "198.51.100.1/32");
        assert_ne!(client.shadow().current(), &before);
        client.aft_pop().unwrap();

        // -- verify --
        assert_eq!(client.shadow().current(), &before);
        assert!(client.aft_pop().is_err());
    }

    #[tokio::test]
    async fn delete_persistence_drops_entries_when_client_closes() {
        // -- setup --
        let device = ReferenceDevice::spawn(test_logger());
        let options = ClientOptions {
            persistence: Some(Persistence::Delete),
            ..Default::default()
        };
        let mut client = leader(&device, options).await;
        client
            .add_next_hop(VRF, NextHop::decap(1), Expectation::Success)
            .await
            .unwrap();

        // -- execute --
        client.close();
        drop(client);

        // -- verify --
        let mut cleared = false;
        for _ in 0..50 {
            if device.aft(VRF).await.unwrap().is_empty() {
                cleared = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(cleared);
    }
}
