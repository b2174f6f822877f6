use crate::channel::Persistence;
use crate::election::ElectionId;
use std::collections::HashMap;
use std::convert::TryFrom;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Default)]
pub struct ClientOptions {
    /// Default deadline for every wait on the modify stream.
    pub session_timeout: Option<Duration>,
    /// Batch results slower than this are logged.
    pub latency_threshold: Option<Duration>,
    pub persistence: Option<Persistence>,
    pub fib_ack: Option<bool>,
    pub initial_election_id: Option<ElectionId>,
    /// Check every successful single-entity write against telemetry right away.
    pub verify_after_write: Option<bool>,
    /// Alternative spellings of routing instance names, e.g. `DEFAULT` -> `default`.
    pub instance_aliases: Option<HashMap<String, String>>,
    /// Cancelling this aborts any wait in progress, e.g. on test teardown.
    pub parent_cancellation: Option<CancellationToken>,
}

pub(super) struct ClientOptionsValidated {
    pub session_timeout: Duration,
    pub latency_threshold: Duration,
    pub persistence: Persistence,
    pub fib_ack: bool,
    pub initial_election_id: ElectionId,
    pub verify_after_write: bool,
    pub instance_aliases: HashMap<String, String>,
    pub cancellation: CancellationToken,
}

impl ClientOptionsValidated {
    fn validate(&self) -> Result<(), &'static str> {
        if self.session_timeout == Duration::from_secs(0) {
            return Err("Session timeout must be greater than zero");
        }
        if self.latency_threshold >= self.session_timeout {
            return Err("Latency threshold must be less than the session timeout");
        }
        if self.initial_election_id.is_zero() {
            return Err("Initial election id must be non-zero");
        }
        if self.instance_aliases.iter().any(|(alias, name)| alias == name) {
            return Err("An instance alias must differ from the name it stands for");
        }

        Ok(())
    }
}

impl TryFrom<ClientOptions> for ClientOptionsValidated {
    type Error = &'static str;

    fn try_from(options: ClientOptions) -> Result<Self, Self::Error> {
        let values = ClientOptionsValidated {
            session_timeout: options.session_timeout.unwrap_or(Duration::from_secs(60)),
            latency_threshold: options.latency_threshold.unwrap_or(Duration::from_millis(10)),
            persistence: options.persistence.unwrap_or(Persistence::Preserve),
            fib_ack: options.fib_ack.unwrap_or(false),
            initial_election_id: options.initial_election_id.unwrap_or(ElectionId::new(1, 0)),
            verify_after_write: options.verify_after_write.unwrap_or(false),
            instance_aliases: options.instance_aliases.unwrap_or_default(),
            cancellation: options
                .parent_cancellation
                .map(|parent| parent.child_token())
                .unwrap_or_default(),
        };

        values.validate()?;
        Ok(values)
    }
}
