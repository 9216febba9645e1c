//! One raw file in, one enriched file out.
use std::sync::Arc;
use std::time;

use enrichment_common::retry::RetryPolicy;
use enrichment_common::store::{BlobLocation, BlobStore};
use serde_derive::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::codec::{self, Template};
use crate::error::JobError;
use crate::pipeline::Pipeline;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOutcome {
    Completed,
    CompletedWithErrors,
    Failed,
}

impl JobOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobOutcome::Completed => "completed",
            JobOutcome::CompletedWithErrors => "completed_with_errors",
            JobOutcome::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobReport {
    pub input: String,
    pub output: String,
    pub outcome: JobOutcome,
    pub records: usize,
    pub failed_records: usize,
    pub abandoned_records: usize,
}

#[derive(Debug, Clone)]
pub struct JobSettings {
    /// Namespace of the raw files this driver accepts.
    pub input_prefix: String,
    /// Namespace enriched files are written to, under the input's file name.
    pub output_prefix: String,
    /// Wall-clock budget of a job, from the moment it is handled.
    pub timeout: time::Duration,
    pub write_retry_policy: RetryPolicy,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            input_prefix: "SupplierOperations/dataEnrichment/raw/".to_owned(),
            output_prefix: "SupplierOperations/dataEnrichment/enhanced/".to_owned(),
            timeout: time::Duration::from_secs(14 * 60),
            write_retry_policy: RetryPolicy::build(2, time::Duration::from_millis(500))
                .max_attempts(3)
                .provide(),
        }
    }
}

pub struct JobDriver {
    store: Arc<dyn BlobStore>,
    pipeline: Pipeline,
    settings: JobSettings,
}

impl JobDriver {
    pub fn new(store: Arc<dyn BlobStore>, pipeline: Pipeline, settings: JobSettings) -> Self {
        Self {
            store,
            pipeline,
            settings,
        }
    }

    /// Whether `location` is a raw file this driver should process.
    pub fn accepts(&self, location: &BlobLocation) -> bool {
        location.key.starts_with(&self.settings.input_prefix)
            && location.key.len() > self.settings.input_prefix.len()
            && !location.key.ends_with('/')
    }

    pub fn output_location(&self, input: &BlobLocation) -> BlobLocation {
        BlobLocation::new(
            input.bucket.clone(),
            format!("{}{}", self.settings.output_prefix, input.file_name()),
        )
    }

    /// Enrich the file at `location` and write the result. Either the complete output is written
    /// or nothing is.
    pub async fn handle(&self, location: &BlobLocation) -> Result<JobReport, JobError> {
        let started = Instant::now();
        info!(input = %location, "starting enrichment job");

        let result = self.process(location, started + self.settings.timeout).await;

        let outcome = match &result {
            Ok(report) => report.outcome,
            Err(error) => error.outcome(),
        };
        metrics::counter!("enrichment_jobs_total", "outcome" => outcome.as_str()).increment(1);
        metrics::histogram!("enrichment_job_duration_seconds")
            .record(started.elapsed().as_secs_f64());

        match &result {
            Ok(report) => info!(
                input = %location,
                output = %report.output,
                outcome = outcome.as_str(),
                records = report.records,
                failed_records = report.failed_records,
                "enrichment job finished"
            ),
            Err(error) => error!(input = %location, %error, "enrichment job failed"),
        }

        result
    }

    async fn process(
        &self,
        location: &BlobLocation,
        deadline: Instant,
    ) -> Result<JobReport, JobError> {
        let raw = self
            .store
            .get(location)
            .await
            .map_err(|error| JobError::SourceUnavailable {
                location: location.to_string(),
                error,
            })?;

        let records = codec::decode(&raw, &Template::supplier_input())?;
        self.pipeline.authenticate().await?;

        let run = self.pipeline.run(&records, deadline).await?;
        if run.abandoned > 0 {
            warn!(input = %location, abandoned = run.abandoned, "job deadline exceeded");
        }

        let encoded =
            codec::encode(&run.records, &Template::enriched_output()).map_err(JobError::Encode)?;

        let output = self.output_location(location);
        self.settings
            .write_retry_policy
            .execute(|attempt| {
                let data = encoded.clone();
                let output = &output;
                async move {
                    let result = self.store.put(output, data).await;
                    if let Err(error) = &result {
                        warn!(output = %output, attempt, %error, "failed to write output");
                    }
                    result
                }
            })
            .await
            .map_err(|error| JobError::SinkUnavailable {
                location: output.to_string(),
                error,
            })?;

        let failed_records = run.failed_records();
        let outcome = if failed_records > 0 || run.abandoned > 0 {
            JobOutcome::CompletedWithErrors
        } else {
            JobOutcome::Completed
        };

        Ok(JobReport {
            input: location.to_string(),
            output: output.to_string(),
            outcome,
            records: run.records.len(),
            failed_records,
            abandoned_records: run.abandoned,
        })
    }
}
