use std::path::PathBuf;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, warn};

use crate::archive::{ArchiveClient, RetrievalRequest, era5_request, s2s_request};
use crate::config::{IdempotencyPolicy, ResolvedConfig};
use crate::domain::TimeWindow;
use crate::error::IngestError;
use crate::fragment::{FragmentReader, RawFragment};
use crate::harmonize::Harmonizer;
use crate::partition::{DailyPartition, PartitionWriter};
use crate::planner::{WindowPlan, WindowPlanner};
use crate::source::SourceSpec;
use crate::store::Store;
use crate::zarr::ZarrWriter;

#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct FetchResult {
    pub provider: String,
    pub resolution: String,
    pub windows: Vec<WindowResult>,
}

impl FetchResult {
    pub fn fetched(&self) -> usize {
        self.windows.iter().filter(|w| w.action == "fetched").count()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WindowResult {
    pub window: String,
    pub action: String,
    pub selector: String,
    pub is_exception: bool,
    pub fragments: usize,
    pub partitions: Vec<DailyPartition>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanResult {
    pub provider: String,
    pub resolution: String,
    pub policy: IdempotencyPolicy,
    pub windows: Vec<WindowPlan>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusResult {
    pub provider: String,
    pub resolution: String,
    pub windows: Vec<WindowStatusEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WindowStatusEntry {
    pub window: String,
    pub partitions: usize,
    pub expected_days: u32,
    pub marker: bool,
    pub complete: bool,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

/// Runs windows strictly in order: plan, fetch fragments, harmonize,
/// partition. One window is fully persisted before the next starts.
pub struct App<A: ArchiveClient, F: FragmentReader> {
    store: Store,
    config: ResolvedConfig,
    archive: A,
    reader: F,
}

impl<A: ArchiveClient, F: FragmentReader> App<A, F> {
    pub fn new(config: ResolvedConfig, archive: A, reader: F) -> Self {
        let store = Store::new(config.data_dir.clone());
        Self {
            store,
            config,
            archive,
            reader,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    pub fn archive(&self) -> &A {
        &self.archive
    }

    /// Configured windows, or `only` when given.
    pub fn windows(
        &self,
        spec: &SourceSpec,
        only: &[TimeWindow],
    ) -> Result<Vec<TimeWindow>, IngestError> {
        if only.is_empty() {
            self.config.windows(spec.provider)
        } else {
            Ok(only.to_vec())
        }
    }

    pub fn plan(
        &self,
        spec: &SourceSpec,
        windows: &[TimeWindow],
        sink: &dyn ProgressSink,
    ) -> Result<PlanResult, IngestError> {
        sink.event(ProgressEvent {
            message: format!("phase=Plan; {} windows for {}", windows.len(), spec.provider),
            elapsed: None,
        });
        let planner = WindowPlanner::new(spec, &self.store, self.config.store.idempotency);
        Ok(PlanResult {
            provider: spec.provider.to_string(),
            resolution: spec.resolution.to_string(),
            policy: self.config.store.idempotency,
            windows: planner.plan(windows)?,
        })
    }

    pub fn fetch(
        &self,
        spec: &SourceSpec,
        windows: &[TimeWindow],
        options: FetchOptions,
        sink: &dyn ProgressSink,
    ) -> Result<FetchResult, IngestError> {
        let plans = self.plan(spec, windows, sink)?.windows;
        let mut results = Vec::with_capacity(plans.len());
        for plan in plans {
            let selector = plan.selector.render();
            if !plan.is_pending() {
                info!(provider = %spec.provider, window = %plan.window, "window already persisted, skipping");
                sink.event(ProgressEvent {
                    message: format!("phase=Resolve; {} already persisted", plan.window),
                    elapsed: None,
                });
                results.push(WindowResult {
                    window: plan.window.key(),
                    action: "skipped".to_string(),
                    selector,
                    is_exception: plan.is_exception,
                    fragments: 0,
                    partitions: Vec::new(),
                });
                continue;
            }
            if options.dry_run {
                results.push(WindowResult {
                    window: plan.window.key(),
                    action: "planned".to_string(),
                    selector,
                    is_exception: plan.is_exception,
                    fragments: 0,
                    partitions: Vec::new(),
                });
                continue;
            }
            let (fragments, partitions) = self.run_window(spec, &plan, sink)?;
            results.push(WindowResult {
                window: plan.window.key(),
                action: "fetched".to_string(),
                selector,
                is_exception: plan.is_exception,
                fragments,
                partitions,
            });
        }
        Ok(FetchResult {
            provider: spec.provider.to_string(),
            resolution: spec.resolution.to_string(),
            windows: results,
        })
    }

    pub fn status(
        &self,
        spec: &SourceSpec,
        windows: &[TimeWindow],
        sink: &dyn ProgressSink,
    ) -> Result<StatusResult, IngestError> {
        sink.event(ProgressEvent {
            message: format!("phase=Resolve; scanning {}", self.store.provider_dir(spec.provider)),
            elapsed: None,
        });
        let mut entries = Vec::with_capacity(windows.len());
        for window in windows {
            let partitions = self.store.window_partitions(spec, *window)?.len();
            let marker = self.store.has_marker(spec, *window);
            let expected_days = window.num_days();
            entries.push(WindowStatusEntry {
                window: window.key(),
                partitions,
                expected_days,
                marker,
                complete: marker || partitions >= expected_days as usize,
            });
        }
        Ok(StatusResult {
            provider: spec.provider.to_string(),
            resolution: spec.resolution.to_string(),
            windows: entries,
        })
    }

    fn run_window(
        &self,
        spec: &SourceSpec,
        plan: &WindowPlan,
        sink: &dyn ProgressSink,
    ) -> Result<(usize, Vec<DailyPartition>), IngestError> {
        let window = plan.window;
        let started = Instant::now();
        info!(
            provider = %spec.provider,
            window = %window,
            selector = %plan.selector,
            exception = plan.is_exception,
            "fetching window"
        );

        let scratch = self.store.scratch_dir(spec, window)?;
        let mut fragments = Vec::new();
        for (index, (name, request)) in self.requests(spec, plan)?.into_iter().enumerate() {
            let path: PathBuf = scratch
                .path()
                .join(format!("fragment_{index}.{}", spec.fragment_format.extension()));
            sink.event(ProgressEvent {
                message: format!("phase=Download; {window} {name}"),
                elapsed: Some(started.elapsed()),
            });
            self.archive.retrieve(&request, &path)?;
            fragments.push(RawFragment {
                window,
                group_index: index,
                canonical_name: name,
                path,
            });
        }

        sink.event(ProgressEvent {
            message: format!("phase=Merge; {window} {} fragments", fragments.len()),
            elapsed: Some(started.elapsed()),
        });
        let harmonizer = Harmonizer::new(spec, &self.reader);
        let dataset = harmonizer.merge(&fragments, plan.is_exception, window)?;

        sink.event(ProgressEvent {
            message: format!("phase=Store; {window} writing daily partitions"),
            elapsed: Some(started.elapsed()),
        });
        let writer = PartitionWriter::new(
            &self.store,
            spec,
            ZarrWriter::new(self.config.store.compression),
            self.config.store.zip,
        );
        let partitions = writer.split_and_persist(&dataset, window)?;

        if self.config.store.idempotency == IdempotencyPolicy::CompletionMarker {
            self.store.write_marker(spec, window, partitions.len())?;
        }
        if let Err(err) = scratch.close() {
            warn!(window = %window, error = %err, "failed to remove scratch directory");
        }
        sink.event(ProgressEvent {
            message: format!("phase=Done; {window} {} partitions", partitions.len()),
            elapsed: Some(started.elapsed()),
        });
        Ok((fragments.len(), partitions))
    }

    /// Requests in declared group order; a single one for reanalysis.
    fn requests(
        &self,
        spec: &SourceSpec,
        plan: &WindowPlan,
    ) -> Result<Vec<(String, RetrievalRequest)>, IngestError> {
        if spec.is_reanalysis() {
            let request = era5_request(spec, plan.window, &self.config.days)?;
            let name = spec
                .variable_level_map
                .first()
                .map(|group| group.canonical_name.clone())
                .unwrap_or_else(|| "reanalysis".to_string());
            return Ok(vec![(name, request)]);
        }
        spec.variable_level_map
            .iter()
            .map(|group| {
                s2s_request(spec, group, &plan.selector)
                    .map(|request| (group.canonical_name.clone(), request))
            })
            .collect()
    }
}
