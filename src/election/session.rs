use crate::channel::OperationChannel;
use crate::client::ClientError;
use crate::election::ElectionId;

/// Sent only to make the device report its current election id. It is never a winning claim.
const LEARNING_ELECTION_ID: ElectionId = ElectionId::new(1, 0);

/// ElectionSession tracks the election ids this client has claimed. A claim is always the
/// device's current id plus one, learned right before claiming, so the client never caches an id
/// across calls.
pub struct ElectionSession {
    logger: slog::Logger,
    last_claimed: Option<ElectionId>,
}

impl ElectionSession {
    pub fn new(logger: slog::Logger) -> Self {
        ElectionSession {
            logger,
            last_claimed: None,
        }
    }

    pub fn last_claimed(&self) -> Option<ElectionId> {
        self.last_claimed
    }

    /// Provokes the device into reporting its current election id, and returns it.
    pub async fn learn(&self, channel: &mut OperationChannel) -> Result<ElectionId, ClientError> {
        channel.send_election_id(LEARNING_ELECTION_ID).await?;
        channel.wait(None).await?;
        let current = channel.reported_election_id().ok_or(ClientError::NoElectionId)?;

        slog::debug!(self.logger, "Learned current election id {}", current);
        Ok(current)
    }

    /// Claims the device's current election id plus one.
    pub async fn become_leader(&mut self, channel: &mut OperationChannel) -> Result<ElectionId, ClientError> {
        let current = self.learn(channel).await?;
        let claim = current.checked_next().ok_or(ClientError::ElectionExhausted)?;

        self.update(channel, claim).await?;
        slog::info!(self.logger, "Became leader with election id {}", claim);
        Ok(claim)
    }

    /// Sends `claim` and requires the device to echo it back as its current id.
    pub async fn update(&mut self, channel: &mut OperationChannel, claim: ElectionId) -> Result<(), ClientError> {
        if let Some(previous) = self.last_claimed {
            if claim <= previous {
                return Err(ClientError::ElectionNotIncreasing { claimed: claim, previous });
            }
        }

        channel.send_election_id(claim).await?;
        channel.wait(None).await?;
        self.last_claimed = Some(claim);

        let reported = channel.reported_election_id().ok_or(ClientError::NoElectionId)?;
        if reported != claim {
            return Err(ClientError::ElectionMismatch { claimed: claim, reported });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::SessionParams;
    use crate::device::ReferenceDevice;
    use crate::test_utils::test_logger;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    async fn start(device: &ReferenceDevice) -> OperationChannel {
        OperationChannel::start(
            device,
            SessionParams::default(),
            Duration::from_secs(5),
            &CancellationToken::new(),
            test_logger(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn become_leader_claims_strictly_increasing_ids() {
        // -- setup --
        let device = ReferenceDevice::spawn(test_logger());
        let mut channel = start(&device).await;
        let mut session = ElectionSession::new(test_logger());

        // -- execute --
        let first = session.become_leader(&mut channel).await.unwrap();
        let second = session.become_leader(&mut channel).await.unwrap();

        // -- verify --
        assert_eq!(first, ElectionId::new(2, 0));
        assert!(second > first);
        assert_eq!(session.last_claimed(), Some(second));
    }

    #[tokio::test]
    async fn claim_carries_into_high() {
        // -- setup --
        let device = ReferenceDevice::spawn(test_logger());
        let mut channel = start(&device).await;
        let mut session = ElectionSession::new(test_logger());
        session.update(&mut channel, ElectionId::new(u64::MAX, 0)).await.unwrap();

        // -- execute --
        let claim = session.become_leader(&mut channel).await.unwrap();

        // -- verify --
        assert_eq!(claim, ElectionId::new(0, 1));
    }

    #[tokio::test]
    async fn losing_race_to_other_client_is_reported() {
        // -- setup --
        let device = ReferenceDevice::spawn(test_logger());
        let mut ours = start(&device).await;
        let mut theirs = start(&device).await;
        let mut our_session = ElectionSession::new(test_logger());
        let mut their_session = ElectionSession::new(test_logger());
        their_session.update(&mut theirs, ElectionId::new(10, 0)).await.unwrap();

        // -- execute --
        let err = our_session.update(&mut ours, ElectionId::new(5, 0)).await.unwrap_err();

        // -- verify --
        match err {
            ClientError::ElectionMismatch { claimed, reported } => {
                assert_eq!(claimed, ElectionId::new(5, 0));
                assert_eq!(reported, ElectionId::new(10, 0));
            }
            other => panic!("unexpected error {:?}", other),
        }
        // Re-learning first always gets us ahead again.
        assert_eq!(
            our_session.become_leader(&mut ours).await.unwrap(),
            ElectionId::new(11, 0)
        );
    }

    #[tokio::test]
    async fn repeated_claim_is_rejected_locally() {
        // -- setup --
        let device = ReferenceDevice::spawn(test_logger());
        let mut channel = start(&device).await;
        let mut session = ElectionSession::new(test_logger());
        session.update(&mut channel, ElectionId::new(3, 0)).await.unwrap();

        // -- execute --
        let err = session.update(&mut channel, ElectionId::new(3, 0)).await.unwrap_err();

        // -- verify --
        assert!(matches!(err, ClientError::ElectionNotIncreasing { .. }));
    }
}
