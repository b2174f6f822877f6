use crate::aft::{Ipv4Entry, Mutation, OpType};
use crate::channel::{AftOperationResult, Expectation, OperationResult, ProgrammingStatus};
use crate::client::client::Client;
use crate::client::error::{expected_description, ClientError};
use rand::seq::SliceRandom;
use std::time::Duration;

/// BatchSummary is what one batch produced on the wire.
#[derive(Debug)]
pub struct BatchSummary {
    pub results: Vec<AftOperationResult>,
    /// How many results took longer than the configured latency threshold.
    pub over_latency_threshold: usize,
}

impl Client {
    /// Adds one route per prefix, all pointing at group `nhg_id`, in a single request. `timeout`
    /// overrides the session default.
    pub async fn add_ipv4_batch(
        &mut self,
        prefixes: &[String],
        nhg_id: u64,
        instance: &str,
        nhg_instance: Option<&str>,
        expectation: Expectation,
        timeout: Option<Duration>,
    ) -> Result<BatchSummary, ClientError> {
        let mutations = batch_mutations(prefixes, nhg_id, instance, nhg_instance, |instance, entry| {
            Mutation::add(instance, entry)
        });
        self.run_batch(mutations, OpType::Add, expectation, timeout).await
    }

    pub async fn replace_ipv4_batch(
        &mut self,
        prefixes: &[String],
        nhg_id: u64,
        instance: &str,
        nhg_instance: Option<&str>,
        expectation: Expectation,
        timeout: Option<Duration>,
    ) -> Result<BatchSummary, ClientError> {
        let mutations = batch_mutations(prefixes, nhg_id, instance, nhg_instance, |instance, entry| {
            Mutation::replace(instance, entry)
        });
        self.run_batch(mutations, OpType::Replace, expectation, timeout).await
    }

    pub async fn delete_ipv4_batch(
        &mut self,
        prefixes: &[String],
        nhg_id: u64,
        instance: &str,
        nhg_instance: Option<&str>,
        expectation: Expectation,
        timeout: Option<Duration>,
    ) -> Result<BatchSummary, ClientError> {
        let mutations = batch_mutations(prefixes, nhg_id, instance, nhg_instance, |instance, entry| {
            Mutation::delete(instance, entry)
        });
        self.run_batch(mutations, OpType::Delete, expectation, timeout).await
    }

    async fn run_batch(
        &mut self,
        mutations: Vec<Mutation>,
        op: OpType,
        expectation: Expectation,
        timeout: Option<Duration>,
    ) -> Result<BatchSummary, ClientError> {
        let count = mutations.len();
        self.submit(&mutations, expectation).await?;
        self.channel.wait(timeout).await?;

        let results: Vec<AftOperationResult> = self
            .channel
            .batch_results()
            .iter()
            .filter_map(OperationResult::as_operation)
            .cloned()
            .collect();

        let expected = match expectation {
            Expectation::Success if self.options.fib_ack => 2 * count,
            _ => count,
        };
        if results.len() != expected {
            return Err(ClientError::Cardinality {
                expected,
                observed: results.len(),
            });
        }

        let mut over_latency_threshold = 0;
        for result in &results {
            let ok = match expectation {
                Expectation::Failure => result.status == ProgrammingStatus::Failed,
                Expectation::Success => result.status != ProgrammingStatus::Failed,
            };
            if !ok {
                return Err(ClientError::ResultMismatch {
                    instance: result.network_instance.clone(),
                    key: result.key.to_string(),
                    op,
                    expected: expected_description(expectation, self.options.fib_ack),
                    observed: result.status.to_string(),
                });
            }
            // Deletes are not timed.
            if op != OpType::Delete && result.latency > self.options.latency_threshold {
                over_latency_threshold += 1;
                slog::warn!(
                    self.logger,
                    "{} of {} took {:?}, above the {:?} threshold",
                    op,
                    result.key,
                    result.latency,
                    self.options.latency_threshold
                );
            }
        }

        if expectation == Expectation::Success && self.options.verify_after_write && self.telemetry.is_some() {
            for mutation in &mutations {
                self.verify_written(mutation).await?;
            }
        }

        slog::info!(self.logger, "Batch {} of {} prefixes done", op, count);
        Ok(BatchSummary {
            results,
            over_latency_threshold,
        })
    }
}

fn batch_mutations(
    prefixes: &[String],
    nhg_id: u64,
    instance: &str,
    nhg_instance: Option<&str>,
    build: fn(String, Ipv4Entry) -> Mutation,
) -> Vec<Mutation> {
    prefixes
        .iter()
        .map(|prefix| {
            let mut entry = Ipv4Entry::new(prefix.as_str(), nhg_id);
            if let Some(nhg_instance) = nhg_instance {
                entry = entry.with_group_network_instance(nhg_instance);
            }
            build(instance.to_string(), entry)
        })
        .collect()
}

/// Picks `confidence` percent of `prefixes` at random, rounding down.
pub fn random_entries(confidence: u8, prefixes: &[String]) -> Vec<String> {
    let count = prefixes.len() * usize::from(confidence.min(100)) / 100;
    prefixes
        .choose_multiple(&mut rand::thread_rng(), count)
        .cloned()
        .collect()
}
