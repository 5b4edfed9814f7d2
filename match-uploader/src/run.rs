use std::time;

use chrono::{DateTime, Utc};

use match_common::identifier::IdentifierBuilder;
use match_common::metrics::RUNS;
use match_common::retry::RetryPolicy;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

use crate::brands::UploadTarget;
use crate::counters::RunCounters;
use crate::error::RunError;
use crate::monitor::{JobMonitor, MonitorOutcome};
use crate::processor::RecordProcessor;
use crate::service::MatchingService;
use crate::source::{CustomerSource, UploadMode};
use crate::tracking::{RunRecorder, UploadRunRecord};
use crate::uploader::{BatchUploader, UploadReport, UploadSettings};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorSettings {
    pub poll_interval: time::Duration,
    pub timeout: time::Duration,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            poll_interval: time::Duration::from_secs(10),
            timeout: time::Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    pub mode: UploadMode,
    /// Poll the job after it was started until it finishes.
    pub wait: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub run_id: Uuid,
    pub counters: RunCounters,
    pub upload: UploadReport,
    pub monitor: Option<MonitorOutcome>,
    pub success: bool,
}

/// One end to end upload: source rows to a running remote job.
pub struct UploadRun<'a, S: ?Sized> {
    service: &'a S,
    recorder: &'a dyn RunRecorder,
    builder: IdentifierBuilder,
    retry_policy: RetryPolicy,
    settings: UploadSettings,
    monitor: MonitorSettings,
}

impl<'a, S> UploadRun<'a, S>
where
    S: MatchingService + ?Sized,
{
    pub fn new(service: &'a S, recorder: &'a dyn RunRecorder) -> Self {
        Self {
            service,
            recorder,
            builder: IdentifierBuilder::default(),
            retry_policy: RetryPolicy::default(),
            settings: UploadSettings::default(),
            monitor: MonitorSettings::default(),
        }
    }

    pub fn identifier_builder(mut self, builder: IdentifierBuilder) -> Self {
        self.builder = builder;
        self
    }

    pub fn retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn upload_settings(mut self, settings: UploadSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn monitor_settings(mut self, monitor: MonitorSettings) -> Self {
        self.monitor = monitor;
        self
    }

    /// Run the upload. The run is recorded and summarized whether or not it succeeds.
    pub async fn execute<C>(
        &self,
        target: &UploadTarget,
        options: RunOptions,
        source: &mut C,
    ) -> Result<RunReport, RunError>
    where
        C: CustomerSource + ?Sized,
    {
        let run_id = Uuid::now_v7();
        let started_at = Utc::now();
        let span = info_span!("run", %run_id, mode = %options.mode);

        self.execute_run(run_id, started_at, target, options, source)
            .instrument(span)
            .await
    }

    async fn execute_run<C>(
        &self,
        run_id: Uuid,
        started_at: DateTime<Utc>,
        target: &UploadTarget,
        options: RunOptions,
        source: &mut C,
    ) -> Result<RunReport, RunError>
    where
        C: CustomerSource + ?Sized,
    {
        info!(
            brand = ?target.brand_filter,
            user_list_id = %target.user_list_id,
            "starting customer match upload"
        );

        let mut counters = RunCounters::default();
        let outcome = self.upload(target, source, &mut counters).await;

        let mut success = matches!(&outcome, Ok(report) if report.is_success());
        let mut monitor = None;

        if let (Ok(report), true) = (&outcome, options.wait) {
            if let (Some(job), true) = (&report.job, success) {
                let job_monitor =
                    JobMonitor::new(self.service, self.monitor.poll_interval, self.monitor.timeout);
                match job_monitor.wait(job).await {
                    Ok(outcome) => {
                        success = outcome.is_success();
                        monitor = Some(outcome);
                    }
                    Err(error) => {
                        error!(%error, "failed to monitor job");
                        success = false;
                    }
                }
            }
        }

        let job = match &outcome {
            Ok(report) => report.job.as_ref().map(ToString::to_string),
            Err(RunError::RunJob { job, .. }) => Some(job.clone()),
            Err(_) => None,
        };
        let record = UploadRunRecord {
            run_id,
            started_at,
            mode: options.mode,
            brand: target.brand_filter.clone(),
            rows_processed: counters.rows_seen,
            uploaded_count: counters.records_uploaded(),
            success,
            job,
        };
        if let Err(error) = self.recorder.record(&record).await {
            error!(error = ?error, "failed to record upload run");
        }

        counters.log_summary();
        let status = if success { "success" } else { "failure" };
        metrics::counter!(RUNS, "status" => status).increment(1);

        let upload = match outcome {
            Ok(upload) => upload,
            Err(error) => {
                error!(%error, "customer match upload failed");
                return Err(error);
            }
        };

        if success {
            info!("customer match upload finished");
        } else {
            error!("customer match upload finished without success");
        }

        Ok(RunReport {
            run_id,
            counters,
            upload,
            monitor,
            success,
        })
    }

    async fn upload<C>(
        &self,
        target: &UploadTarget,
        source: &mut C,
        counters: &mut RunCounters,
    ) -> Result<UploadReport, RunError>
    where
        C: CustomerSource + ?Sized,
    {
        let processor = RecordProcessor::new(self.builder, target.brand_filter.clone());
        let records = processor.process(source, counters).await?;

        BatchUploader::new(self.service, self.retry_policy.clone(), self.settings)
            .upload(&target.user_list_id, &records, counters)
            .await
    }
}
