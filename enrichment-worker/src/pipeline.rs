//! Runs every record through the stages, several records at a time, keeping input order.
use std::collections::BTreeMap;

use futures::future::BoxFuture;
use futures::stream::{self, StreamExt};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::client::EnrichmentClient;
use crate::error::{AuthError, StageCallError};
use crate::record::{EnrichmentOutcome, Record, StageKind};
use crate::stages::Stage;

pub const DEADLINE_EXCEEDED: &str = "job deadline exceeded";

/// API attempts made by each stage for one record.
pub type StageAttempts = BTreeMap<StageKind, u32>;

/// One record being enriched, tagged with its input position. Boxed as `Send` so that a job can
/// run on any runtime worker.
type RecordTask<'a> = BoxFuture<'a, (usize, Result<(Record, StageAttempts), AuthError>)>;

/// The result of running the pipeline over a file's records.
#[derive(Debug)]
pub struct PipelineRun {
    /// One record per input record, in input order.
    pub records: Vec<Record>,
    pub attempts: Vec<StageAttempts>,
    /// Records that were still being enriched at the deadline.
    pub abandoned: usize,
}

impl PipelineRun {
    pub fn failed_records(&self) -> usize {
        self.records
            .iter()
            .filter(|record| record.has_failures())
            .count()
    }
}

pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
    client: EnrichmentClient,
    max_concurrent_records: usize,
}

impl Pipeline {
    pub fn new(
        stages: Vec<Box<dyn Stage>>,
        client: EnrichmentClient,
        max_concurrent_records: usize,
    ) -> Self {
        Self {
            stages,
            client,
            max_concurrent_records: max_concurrent_records.max(1),
        }
    }

    /// Obtain a token before any record is processed, so that bad credentials fail the job
    /// up front.
    pub async fn authenticate(&self) -> Result<(), AuthError> {
        self.client.tokens().token().await.map(|_| ())
    }

    /// Run one record through every stage. Stage failures are recorded on the record; only a
    /// failure to obtain a token stops the record, and with it the job.
    pub async fn enrich_record(
        &self,
        record: &Record,
    ) -> Result<(Record, StageAttempts), AuthError> {
        let mut record = record.prepared();
        let mut attempts = StageAttempts::new();

        for stage in &self.stages {
            let kind = stage.kind();
            let client = self.client.for_stage(kind);

            let result = stage.enrich(&record, &client).await;
            attempts.insert(kind, client.attempts());

            let outcome = match result {
                Ok((enriched, outcome)) => {
                    record = enriched;
                    outcome
                }
                Err(StageCallError::Auth(error)) => return Err(error),
                Err(error) => {
                    warn!(stage = kind.as_str(), %error, "stage failed");
                    record.push_error(&format!("{}: {error}", kind.as_str()));
                    EnrichmentOutcome::Failed
                }
            };

            debug!(stage = kind.as_str(), outcome = outcome.as_str(), "stage finished");
            metrics::counter!(
                "enrichment_stage_outcomes_total",
                "stage" => kind.as_str(),
                "outcome" => outcome.as_str()
            )
            .increment(1);
            record.set_outcome(kind, outcome);
        }

        Ok((record, attempts))
    }

    /// Enrich `records` concurrently. Records not finished by `deadline` are returned prepared
    /// but unenriched, with every stage failed.
    pub async fn run(
        &self,
        records: &[Record],
        deadline: Instant,
    ) -> Result<PipelineRun, AuthError> {
        let mut finished: Vec<Option<(Record, StageAttempts)>> = vec![None; records.len()];

        {
            let tasks: Vec<RecordTask<'_>> = records
                .iter()
                .enumerate()
                .map(|(index, record)| {
                    let task: RecordTask<'_> =
                        Box::pin(async move { (index, self.enrich_record(record).await) });
                    task
                })
                .collect();
            let mut in_flight = stream::iter(tasks).buffer_unordered(self.max_concurrent_records);

            let expired = tokio::time::sleep_until(deadline);
            tokio::pin!(expired);

            loop {
                tokio::select! {
                    next = in_flight.next() => match next {
                        Some((index, result)) => finished[index] = Some(result?),
                        None => break,
                    },
                    _ = &mut expired => {
                        warn!(
                            remaining = finished.iter().filter(|slot| slot.is_none()).count(),
                            "deadline reached, abandoning records in flight"
                        );
                        break;
                    }
                }
            }
        }

        let mut run = PipelineRun {
            records: Vec::with_capacity(records.len()),
            attempts: Vec::with_capacity(records.len()),
            abandoned: 0,
        };
        for (slot, original) in finished.into_iter().zip(records) {
            let (record, attempts) = match slot {
                Some(done) => done,
                None => {
                    run.abandoned += 1;
                    (abandoned(original), StageAttempts::new())
                }
            };
            run.records.push(record);
            run.attempts.push(attempts);
        }

        Ok(run)
    }
}

fn abandoned(record: &Record) -> Record {
    let mut record = record.prepared();
    for stage in StageKind::ALL {
        record.set_outcome(stage, EnrichmentOutcome::Failed);
    }
    record.set_error_message(DEADLINE_EXCEEDED);
    record
}
