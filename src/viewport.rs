//! Viewport-driven pin fetching.
//!
//! Bounds changes are debounced; each new request aborts the previous one and
//! bumps a generation counter so only the last issued request can land.
//! Results replace the previous points and server drafts wholesale.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::drafts::{DraftStore, MergedDraft};
use crate::error::{ApiError, ApiResult};
use crate::geo::Bounds;
use crate::models::{DraftPin, MapMarker, PinFilters, PinPoint, PinQuery, PinsResponse, build_markers};

pub trait PinSource: Send + Sync + 'static {
    fn get_pins_in_bounds(&self, query: PinQuery) -> impl Future<Output = ApiResult<PinsResponse>> + Send;
}

#[derive(Debug, Clone, Default)]
pub struct PinsSnapshot {
    pub points: Vec<PinPoint>,
    pub drafts: Vec<DraftPin>,
    pub drafts_merged: Vec<MergedDraft>,
    pub markers: Vec<MapMarker>,
    pub loading: bool,
    pub error: Option<String>,
    pub forbidden: bool,
    pub fetched_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct Inner {
    points: Vec<PinPoint>,
    drafts: DraftStore,
    loading: bool,
    error: Option<String>,
    forbidden: bool,
    fetched_at: Option<DateTime<Utc>>,
}

impl Inner {
    fn snapshot(&self) -> PinsSnapshot {
        let drafts_merged = self.drafts.merged();
        let markers = build_markers(&self.points, drafts_merged.iter().map(|d| &d.pin));
        PinsSnapshot {
            points: self.points.clone(),
            drafts: self.drafts.server().to_vec(),
            drafts_merged,
            markers,
            loading: self.loading,
            error: self.error.clone(),
            forbidden: self.forbidden,
            fetched_at: self.fetched_at,
        }
    }
}

struct Shared {
    inner: Mutex<Inner>,
    tx: watch::Sender<PinsSnapshot>,
    generation: AtomicU64,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Publishes while still holding the lock so snapshots go out in order.
    fn update(&self, f: impl FnOnce(&mut Inner)) {
        let mut inner = self.lock();
        f(&mut inner);
        self.tx.send_replace(inner.snapshot());
    }

    /// Like `update`, but only while `generation` is the latest issued.
    /// Generations are bumped under the same lock, so the check cannot race.
    fn update_if_current(&self, generation: u64, f: impl FnOnce(&mut Inner)) -> bool {
        let mut inner = self.lock();
        if !self.is_current(generation) {
            return false;
        }
        f(&mut inner);
        self.tx.send_replace(inner.snapshot());
        true
    }

    fn next_generation(&self) -> u64 {
        let _inner = self.lock();
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }
}

pub struct ViewportPins<S> {
    source: Arc<S>,
    shared: Arc<Shared>,
    debounce: Duration,
    bounds: Option<Bounds>,
    filters: PinFilters,
    task: Option<JoinHandle<()>>,
}

impl<S: PinSource> ViewportPins<S> {
    pub fn new(source: S, debounce: Duration) -> Self {
        let (tx, _rx) = watch::channel(PinsSnapshot::default());
        Self {
            source: Arc::new(source),
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner::default()),
                tx,
                generation: AtomicU64::new(0),
            }),
            debounce,
            bounds: None,
            filters: PinFilters::default(),
            task: None,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<PinsSnapshot> {
        self.shared.tx.subscribe()
    }

    pub fn snapshot(&self) -> PinsSnapshot {
        self.shared.tx.borrow().clone()
    }

    pub fn bounds(&self) -> Option<Bounds> {
        self.bounds
    }

    /// Debounced; supersedes any pending or in-flight request.
    pub fn set_bounds(&mut self, bounds: Bounds) {
        self.bounds = Some(bounds);
        self.schedule(self.debounce);
    }

    pub fn set_filters(&mut self, filters: PinFilters) {
        if self.filters == filters {
            return;
        }
        self.filters = filters;
        if self.bounds.is_some() {
            self.schedule(self.debounce);
        }
    }

    /// Re-issues the last request immediately. No retry on failure.
    pub fn refetch(&mut self) {
        if self.bounds.is_some() {
            self.schedule(Duration::ZERO);
        }
    }

    pub fn upsert_draft_marker(&self, draft: DraftPin) {
        self.shared.update(|inner| inner.drafts.upsert_draft_marker(draft));
    }

    pub fn replace_temp_by_real_id(&self, temp_id: &str, real_id: &str) -> bool {
        let mut replaced = false;
        self.shared
            .update(|inner| replaced = inner.drafts.replace_temp_by_real_id(temp_id, real_id));
        replaced
    }

    /// Drops one local draft, e.g. when the user cancels it before saving.
    pub fn remove_local_draft(&self, id: &str) -> bool {
        let mut removed = false;
        self.shared
            .update(|inner| removed = inner.drafts.remove_local(id));
        removed
    }

    pub fn clear_local_drafts(&self) {
        self.shared.update(|inner| inner.drafts.clear_local_drafts());
    }

    pub fn drafts_merged(&self) -> Vec<MergedDraft> {
        self.shared.lock().drafts.merged()
    }

    fn schedule(&mut self, delay: Duration) {
        let Some(bounds) = self.bounds else {
            return;
        };
        if let Some(task) = self.task.take() {
            task.abort();
        }
        let generation = self.shared.next_generation();
        let query = PinQuery::new(&bounds, &self.filters);
        let source = Arc::clone(&self.source);
        let shared = Arc::clone(&self.shared);

        self.task = Some(tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if !shared.update_if_current(generation, |inner| inner.loading = true) {
                return;
            }
            debug!("📡 fetching pins gen={} {:?}", generation, query);

            let result = source.get_pins_in_bounds(query).await;
            if !apply_result(&shared, generation, result) {
                debug!("🗑️ dropping stale pins response gen={}", generation);
            }
        }));
    }
}

/// Returns `false` when a newer request was issued in the meantime.
fn apply_result(shared: &Shared, generation: u64, result: ApiResult<PinsResponse>) -> bool {
    match result {
        Ok(PinsResponse { points, drafts }) => {
            let (n_points, n_drafts) = (points.len(), drafts.len());
            let applied = shared.update_if_current(generation, |inner| {
                inner.points = points;
                inner.drafts.set_server_drafts(drafts);
                inner.loading = false;
                inner.error = None;
                inner.forbidden = false;
                inner.fetched_at = Some(Utc::now());
            });
            if applied {
                info!("📍 {} points, {} drafts in view", n_points, n_drafts);
            }
            applied
        }
        Err(e) if e.is_cancellation() => shared.update_if_current(generation, |inner| inner.loading = false),
        Err(e) => {
            let forbidden = matches!(e, ApiError::Forbidden(_));
            let message = e.to_string();
            let applied = shared.update_if_current(generation, |inner| {
                inner.loading = false;
                inner.error = Some(message);
                inner.forbidden = forbidden;
            });
            if applied {
                e.log("pins in bounds");
            }
            applied
        }
    }
}

impl<S> Drop for ViewportPins<S> {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
