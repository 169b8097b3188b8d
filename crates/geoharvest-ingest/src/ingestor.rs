//! Resumable ingestion of harvest targets
//!
//! For each target the ingestor counts the records already in its output
//! stream, pages the upstream from that position, normalizes every feature
//! and appends one line per record. Targets run on a bounded pool of
//! workers; a failing target stops on its own and never takes its siblings
//! down with it.
//!
//! ```text
//! ingest_all ──▶ worker ──▶ resolve_resume_position ──▶ Pager::next_batch ──▶ normalize ──▶ RecordSink::append
//!                                                              │
//!                                                              └─ skipped positions ──▶ skip sidecar (after the loop)
//! ```

use futures::stream::{self, StreamExt};
use geoharvest_common::{HarvestRecord, SkipSidecar};
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::HarvestConfig;
use crate::error::{IngestError, Result};
use crate::http::Fetcher;
use crate::pager::{Pager, PagerOptions};
use crate::policy::FailurePolicy;
use crate::sink::{count_records, write_sidecar, RecordSink};
use crate::target::{Target, TargetResolver, TargetSpec};

/// Outcome of one target in one run
#[derive(Debug)]
pub struct TargetReport {
    pub label: String,
    pub output_path: PathBuf,
    /// Records already present when the run started
    pub resumed_from: u64,
    /// Records appended in this run, also when the target failed
    pub appended: u64,
    pub skipped: Vec<u64>,
    /// Page requests issued in this run
    pub fetches: u64,
    pub error: Option<IngestError>,
}

impl TargetReport {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Drives targets from their resume position to the end of the upstream
pub struct Ingestor {
    config: Arc<HarvestConfig>,
    fetcher: Arc<Fetcher>,
    policy: FailurePolicy,
    progress: MultiProgress,
}

impl Ingestor {
    /// Create an ingestor; the configuration is validated here
    pub fn new(config: HarvestConfig) -> Result<Self> {
        config.validate()?;

        let policy = FailurePolicy::new(&config.fetch, &config.paging);
        let fetcher = Fetcher::new(&config.fetch, policy)?;

        let progress = if config.progress {
            MultiProgress::new()
        } else {
            MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
        };

        Ok(Self {
            config: Arc::new(config),
            fetcher: Arc::new(fetcher),
            policy,
            progress,
        })
    }

    pub fn config(&self) -> &HarvestConfig {
        &self.config
    }

    pub fn fetcher(&self) -> Arc<Fetcher> {
        self.fetcher.clone()
    }

    /// Resolve target specs against the configured upstreams
    pub async fn resolve(&self, specs: &[TargetSpec]) -> Result<Vec<Target>> {
        TargetResolver::new(self.config.clone(), self.fetcher.clone())
            .resolve(specs)
            .await
    }

    /// Position to resume a target from: the number of records already in
    /// its output stream
    pub async fn resolve_resume_position(&self, output_path: &Path) -> Result<u64> {
        let position = count_records(output_path).await?;
        if position > 0 {
            info!(path = %output_path.display(), position, "Resuming from existing output");
        }
        Ok(position)
    }

    /// Ingest one target from `resume`, returning the records appended
    ///
    /// Partial output is kept when the target fails.
    pub async fn ingest_target(&self, target: &Target, resume: u64) -> Result<u64> {
        let report = self.run_target(target, resume).await;
        match report.error {
            Some(err) => Err(err),
            None => Ok(report.appended),
        }
    }

    /// Ingest all targets with at most `concurrency` running at once
    ///
    /// Reports come back in the order the targets were given, whatever
    /// order they finished in.
    pub async fn ingest_all(&self, targets: Vec<Target>, concurrency: usize) -> Vec<TargetReport> {
        let workers = concurrency.max(1);
        info!(targets = targets.len(), workers, "Starting ingestion");

        let mut reports: Vec<(usize, TargetReport)> = stream::iter(targets.into_iter().enumerate())
            .map(|(index, target)| async move { (index, self.ingest_resumed(&target).await) })
            .buffer_unordered(workers)
            .collect()
            .await;

        reports.sort_by_key(|(index, _)| *index);
        reports.into_iter().map(|(_, report)| report).collect()
    }

    async fn ingest_resumed(&self, target: &Target) -> TargetReport {
        match self.resolve_resume_position(&target.output_path).await {
            Ok(resume) => self.run_target(target, resume).await,
            Err(err) => {
                error!(target_label = %target.label, error = %err, "Could not read existing output");
                TargetReport {
                    label: target.label.clone(),
                    output_path: target.output_path.clone(),
                    resumed_from: 0,
                    appended: 0,
                    skipped: Vec::new(),
                    fetches: 0,
                    error: Some(IngestError::TargetIngestion {
                        target: target.label.clone(),
                        position: 0,
                        source: Box::new(err),
                    }),
                }
            },
        }
    }

    async fn run_target(&self, target: &Target, resume: u64) -> TargetReport {
        let spinner = self.spinner(&target.label, resume);
        let mut pager = Pager::new(
            target.source.clone(),
            self.policy,
            PagerOptions {
                nominal_page_size: target.nominal_page_size,
                max_items: self.config.paging.max_items(),
                filter: target.filter.clone(),
            },
            resume,
        );

        info!(
            target_label = %target.label,
            position = resume,
            page_size = target.nominal_page_size,
            path = %target.output_path.display(),
            "Ingesting target"
        );

        let mut appended = 0u64;
        let outcome = self
            .drive(target, &mut pager, &spinner, &mut appended)
            .await
            .map_err(|err| IngestError::TargetIngestion {
                target: target.label.clone(),
                position: pager.position(),
                source: Box::new(err),
            });

        let skipped = pager.skipped().to_vec();
        if !skipped.is_empty() {
            let sidecar = SkipSidecar::new(target.dataset.clone(), target.collection.clone(), skipped.clone());
            let path = target.sidecar_path();
            match write_sidecar(&path, &sidecar).await {
                Ok(()) => warn!(
                    target_label = %target.label,
                    skipped = skipped.len(),
                    path = %path.display(),
                    "Wrote skip sidecar"
                ),
                Err(e) => error!(target_label = %target.label, path = %path.display(), error = %e, "Could not write skip sidecar"),
            }
        }

        match &outcome {
            Ok(()) => {
                spinner.finish_with_message(format!("{} done", target.label));
                info!(
                    target_label = %target.label,
                    appended,
                    skipped = skipped.len(),
                    fetches = pager.fetches(),
                    "Target complete"
                );
            },
            Err(err) => {
                spinner.abandon_with_message(format!("{} failed", target.label));
                error!(target_label = %target.label, appended, error = %err, "Target failed");
            },
        }

        TargetReport {
            label: target.label.clone(),
            output_path: target.output_path.clone(),
            resumed_from: resume,
            appended,
            skipped,
            fetches: pager.fetches(),
            error: outcome.err(),
        }
    }

    /// Page, normalize and append until the pager is finished
    async fn drive(
        &self,
        target: &Target,
        pager: &mut Pager,
        spinner: &ProgressBar,
        appended: &mut u64,
    ) -> Result<()> {
        let mut sink = RecordSink::open(&target.output_path).await?;

        while let Some(batch) = pager.next_batch().await? {
            let records: Vec<HarvestRecord> = batch
                .into_iter()
                .map(|feature| target.normalizer.normalize(feature))
                .collect();

            *appended += sink.append(&records).await?;
            spinner.inc(records.len() as u64);
        }

        Ok(())
    }

    fn spinner(&self, label: &str, resume: u64) -> ProgressBar {
        let spinner = self.progress.add(ProgressBar::new_spinner());
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg} {pos} records") {
            spinner.set_style(style);
        }
        spinner.set_message(label.to_string());
        spinner.set_position(resume);
        spinner.enable_steady_tick(Duration::from_millis(120));
        spinner
    }
}
