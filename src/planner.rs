use serde::Serialize;
use tracing::debug;

use crate::archive::DateSelector;
use crate::config::IdempotencyPolicy;
use crate::domain::TimeWindow;
use crate::error::IngestError;
use crate::source::SourceSpec;
use crate::store::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowStatus {
    Pending,
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WindowPlan {
    pub window: TimeWindow,
    pub selector: DateSelector,
    pub is_exception: bool,
    pub status: WindowStatus,
}

impl WindowPlan {
    pub fn is_pending(&self) -> bool {
        self.status == WindowStatus::Pending
    }
}

/// Decides, per window, whether work is needed and which dates to request.
pub struct WindowPlanner<'a> {
    spec: &'a SourceSpec,
    store: &'a Store,
    policy: IdempotencyPolicy,
}

impl<'a> WindowPlanner<'a> {
    pub fn new(spec: &'a SourceSpec, store: &'a Store, policy: IdempotencyPolicy) -> Self {
        Self {
            spec,
            store,
            policy,
        }
    }

    pub fn plan(&self, windows: &[TimeWindow]) -> Result<Vec<WindowPlan>, IngestError> {
        windows.iter().map(|window| self.plan_window(*window)).collect()
    }

    pub fn plan_window(&self, window: TimeWindow) -> Result<WindowPlan, IngestError> {
        let selector = self.selector(window);
        let status = if self.is_done(window)? {
            WindowStatus::Done
        } else {
            WindowStatus::Pending
        };
        debug!(window = %window, selector = %selector, ?status, "planned window");
        Ok(WindowPlan {
            window,
            is_exception: selector.is_exception(),
            selector,
            status,
        })
    }

    /// Exception table first, then the sparse calendar, then the whole month.
    pub fn selector(&self, window: TimeWindow) -> DateSelector {
        if self.spec.is_reanalysis() {
            return DateSelector::dense(window);
        }
        if let Some(dates) = self.spec.exception(window) {
            return DateSelector::Exception {
                dates: dates.to_string(),
            };
        }
        if let Some(calendar) = self.spec.calendar() {
            let dates = calendar.in_window(window);
            if !dates.is_empty() {
                return DateSelector::Sparse { dates };
            }
        }
        DateSelector::dense(window)
    }

    fn is_done(&self, window: TimeWindow) -> Result<bool, IngestError> {
        match self.policy {
            IdempotencyPolicy::AnyPartition => self.store.has_any_partition(self.spec, window),
            IdempotencyPolicy::CompletionMarker => Ok(self.store.has_marker(self.spec, window)),
        }
    }
}
