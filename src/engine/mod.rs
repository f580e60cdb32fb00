pub mod calendar;
mod coverage;
mod error;
pub mod filters;
pub mod stages;
mod store;

pub use calendar::{Calendar, DAY_SECS, DayBuckets, DayKey, Direction};
pub use coverage::{CoverageSet, CoverageTracker};
pub use error::EngineError;
pub use filters::{
    DURATION_STAGE, FilterPipeline, FilterSelection, FilterStage, STAFF_MEMBER_STAGE, StageStrategy,
    reduce_selections,
};
pub use stages::{DurationStage, StaffMemberStage};
pub use store::SessionStore;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::limits::*;
use crate::model::*;
use crate::observability;
use crate::transport::{SessionQuery, SessionReadTransformer, SessionTransformer, SessionTransport};

/// What the booking UI currently has selected.
#[derive(Debug, Clone, Default)]
struct BookingState {
    service: Option<ServiceSpec>,
    selections: FilterSelection,
    /// Session being edited; shown even if the API no longer returns it.
    preloaded: Option<Session>,
}

/// Everything the UI needs to render one selected day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DayView {
    pub day: DayKey,
    pub sessions: Vec<Session>,
    pub prev: Option<DayKey>,
    pub next: Option<DayKey>,
    /// The day's only session, when whole-day sessions are being picked.
    pub auto_selected: Option<Session>,
}

/// Holds the in-flight counter raised while it lives.
struct LoadingGuard<'a> {
    in_flight: &'a AtomicUsize,
}

impl<'a> LoadingGuard<'a> {
    fn new(in_flight: &'a AtomicUsize) -> Self {
        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::gauge!(observability::FETCHES_IN_FLIGHT).set(now as f64);
        Self { in_flight }
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        let now = self.in_flight.fetch_sub(1, Ordering::SeqCst) - 1;
        metrics::gauge!(observability::FETCHES_IN_FLIGHT).set(now as f64);
    }
}

/// Session availability for one booking flow: fetched-range bookkeeping,
/// the session store, cascading filters and day bucketing behind the entry
/// points the UI calls.
pub struct SessionEngine {
    transport: Arc<dyn SessionTransport>,
    transformer: Arc<dyn SessionTransformer>,
    pipeline: FilterPipeline,
    calendar: Calendar,
    daily_threshold: Secs,
    coverage: CoverageTracker,
    store: RwLock<SessionStore>,
    booking: RwLock<BookingState>,
    in_flight: AtomicUsize,
}

impl SessionEngine {
    pub fn new(
        pipeline: FilterPipeline,
        calendar: Calendar,
        daily_threshold: Secs,
        transport: Arc<dyn SessionTransport>,
        transformer: Arc<dyn SessionTransformer>,
    ) -> Result<Self, EngineError> {
        if daily_threshold <= 0 {
            return Err(EngineError::InvalidThreshold(daily_threshold));
        }
        Ok(Self {
            transport,
            transformer,
            pipeline,
            calendar,
            daily_threshold,
            coverage: CoverageTracker::new(),
            store: RwLock::new(SessionStore::new()),
            booking: RwLock::new(BookingState::default()),
            in_flight: AtomicUsize::new(0),
        })
    }

    pub fn from_config(config: &Config, transport: Arc<dyn SessionTransport>) -> Result<Self, EngineError> {
        let pipeline = FilterPipeline::from_names(&config.filters)?;
        let calendar = Calendar::named(&config.timezone)?;
        Self::new(
            pipeline,
            calendar,
            config.daily_threshold,
            transport,
            Arc::new(SessionReadTransformer),
        )
    }

    /// Start from an existing store instead of an empty one.
    pub fn with_store(mut self, store: SessionStore) -> Self {
        self.store = RwLock::new(store);
        self
    }

    pub fn pipeline(&self) -> &FilterPipeline {
        &self.pipeline
    }

    pub fn calendar(&self) -> &Calendar {
        &self.calendar
    }

    pub fn daily_threshold(&self) -> Secs {
        self.daily_threshold
    }

    pub fn covered(&self, service: ServiceId) -> Vec<Span> {
        self.coverage.covered(service)
    }

    pub async fn store_snapshot(&self) -> SessionStore {
        self.store.read().await.clone()
    }

    /// True while at least one fetch is in flight.
    pub fn is_loading(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst) > 0
    }

    // ── Service context ─────────────────────────────────────

    /// Switch the bookable service. Coverage and selections start over;
    /// selections are initialized as if the first stage had just changed,
    /// also when `service` is the one already active.
    pub async fn set_service(&self, service: ServiceSpec) {
        self.coverage.reset();
        let selections = self.pipeline.initial_selections(&service);
        info!(
            "service {} active with {} session types",
            service.id,
            service.session_types.len()
        );
        let mut booking = self.booking.write().await;
        *booking = BookingState {
            service: Some(service),
            selections,
            preloaded: None,
        };
    }

    pub async fn service(&self) -> Option<ServiceSpec> {
        self.booking.read().await.service.clone()
    }

    async fn active_service_id(&self) -> Result<ServiceId, EngineError> {
        self.booking
            .read()
            .await
            .service
            .as_ref()
            .map(|s| s.id)
            .ok_or(EngineError::NoActiveService)
    }

    // ── Fetching ────────────────────────────────────────────

    /// Sessions of `service` starting inside or after `window`, fetching
    /// only what has not been retrieved before.
    pub async fn request_window(&self, service: ServiceId, window: Span) -> Result<Vec<Session>, EngineError> {
        if window.duration_ms() > MAX_QUERY_WINDOW_MS {
            return Err(EngineError::LimitExceeded("query window too wide"));
        }
        match self.coverage.uncovered_range(service, &window) {
            None => {
                metrics::counter!(observability::COVERAGE_HITS_TOTAL).increment(1);
                debug!(
                    "service {service}: [{}, {}) already covered",
                    window.start, window.end
                );
            }
            Some(gap) => {
                self.fetch_range(service, gap).await?;
            }
        }
        Ok(self.store.read().await.query(service, window.start))
    }

    /// Request the bookable part of the month containing `anchor` for the
    /// active service.
    pub async fn request_month(
        &self,
        anchor: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Session>, EngineError> {
        let service = self.active_service_id().await?;
        match self.calendar.month_window(anchor, now) {
            Some(window) => self.request_window(service, window).await,
            None => {
                debug!("service {service}: month of {anchor} is in the past");
                Ok(Vec::new())
            }
        }
    }

    /// Fetch `gap`, store the result and mark it covered. Coverage is only
    /// updated when every item arrived and transformed.
    async fn fetch_range(&self, service: ServiceId, gap: Span) -> Result<usize, EngineError> {
        let _loading = LoadingGuard::new(&self.in_flight);
        let started = std::time::Instant::now();
        let result = self.fetch_sessions(service, gap).await;
        metrics::histogram!(observability::FETCH_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        let status = observability::fetch_status_label(&result.as_ref().map(|_| ()));
        metrics::counter!(observability::FETCHES_TOTAL, "status" => status).increment(1);

        let sessions = match result {
            Ok(sessions) => sessions,
            Err(e) => {
                warn!("{e}");
                return Err(e);
            }
        };

        let fetched = sessions.len();
        let added = {
            let mut store = self.store.write().await;
            let added = store.append(sessions);
            metrics::gauge!(observability::SESSIONS_STORED).set(store.len() as f64);
            added
        };
        metrics::counter!(observability::DUPLICATES_DROPPED_TOTAL).increment((fetched - added) as u64);
        self.coverage.remember(service, gap);
        info!(
            "service {service}: fetched [{}, {}), {fetched} sessions, {added} new",
            gap.start, gap.end
        );
        Ok(added)
    }

    async fn fetch_sessions(&self, service: ServiceId, span: Span) -> Result<Vec<Session>, EngineError> {
        let query = SessionQuery::new(service, &span).ok_or(EngineError::InvalidRange {
            start: span.start,
            end: span.end,
        })?;
        let response = self
            .transport
            .fetch(&query)
            .await
            .map_err(|source| EngineError::Transport { service, span, source })?;
        response
            .items
            .iter()
            .map(|raw| self.transformer.transform(raw))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|source| EngineError::Transform { service, span, source })
    }

    // ── Filters ─────────────────────────────────────────────

    pub async fn selections(&self) -> FilterSelection {
        self.booking.read().await.selections.clone()
    }

    pub async fn candidate_values(&self, stage: &str) -> Result<Vec<FilterItem>, EngineError> {
        let booking = self.booking.read().await;
        let service = booking.service.as_ref().ok_or(EngineError::NoActiveService)?;
        self.pipeline.candidate_values(service, stage, &booking.selections)
    }

    /// Select `value` on `stage`, cascading resets to every later stage.
    pub async fn set_filter_selection(
        &self,
        stage: &str,
        value: Option<String>,
    ) -> Result<FilterSelection, EngineError> {
        let mut booking = self.booking.write().await;
        let service = booking.service.as_ref().ok_or(EngineError::NoActiveService)?;
        let next = reduce_selections(&self.pipeline, service, &booking.selections, stage, value)?;
        debug!("filter {stage} changed, selections now {next:?}");
        booking.selections = next.clone();
        Ok(next)
    }

    /// Whether the selected duration is whole-day or longer.
    pub async fn is_daily_duration(&self) -> bool {
        let booking = self.booking.read().await;
        let Some(service) = booking.service.as_ref() else {
            return false;
        };
        booking
            .selections
            .get(DURATION_STAGE)
            .and_then(|key| service.session_type(key))
            .is_some_and(|t| t.duration >= self.daily_threshold)
    }

    /// Every stored session of the active service passing the current
    /// selections, plus the preloaded session when the store lacks it.
    pub async fn filtered_sessions(&self) -> Result<Vec<Session>, EngineError> {
        let booking = self.booking.read().await;
        let service = booking.service.as_ref().ok_or(EngineError::NoActiveService)?;
        let mut sessions = self.store.read().await.all(service.id);
        if let Some(pre) = &booking.preloaded
            && pre.service == service.id
            && !sessions.iter().any(|s| s.is_same_slot(pre)) {
                sessions.push(pre.clone());
            }
        Ok(self.pipeline.filter(service, sessions, &booking.selections))
    }

    // ── Days ────────────────────────────────────────────────

    pub async fn filtered_buckets(&self) -> Result<DayBuckets, EngineError> {
        let sessions = self.filtered_sessions().await?;
        DayBuckets::bucket(&sessions, &self.calendar, self.daily_threshold)
    }

    pub async fn nearest_day(&self, day: DayKey, direction: Direction) -> Result<Option<DayKey>, EngineError> {
        Ok(self.filtered_buckets().await?.nearest_available_day(&day, direction))
    }

    pub async fn is_day_disabled(&self, day: DayKey) -> Result<bool, EngineError> {
        Ok(self.filtered_buckets().await?.is_day_disabled(&day, self.is_loading()))
    }

    pub async fn select_day(&self, day: DayKey) -> Result<DayView, EngineError> {
        let buckets = self.filtered_buckets().await?;
        let sessions = buckets.sessions_for_day(&day).to_vec();
        let daily = self.is_daily_duration().await;
        let auto_selected = match sessions.as_slice() {
            [only] if daily => Some(only.clone()),
            _ => None,
        };
        Ok(DayView {
            day,
            prev: buckets.nearest_available_day(&day, Direction::Prev),
            next: buckets.nearest_available_day(&day, Direction::Next),
            sessions,
            auto_selected,
        })
    }

    // ── Edit mode ───────────────────────────────────────────

    /// Reopen an existing booking: rebuild the filter path leading to
    /// `session`, keep it visible, and load its month.
    pub async fn edit_session(
        &self,
        session: Session,
        now: DateTime<Utc>,
    ) -> Result<Vec<Session>, EngineError> {
        {
            let mut booking = self.booking.write().await;
            let service = booking.service.as_ref().ok_or(EngineError::NoActiveService)?;
            if service.id != session.service {
                return Err(EngineError::ServiceMismatch {
                    active: service.id,
                    session: session.service,
                });
            }
            let selections = self.pipeline.select_filters_for_session(service, &session);
            info!(
                "editing session of service {} at {}, selections {selections:?}",
                session.service, session.start
            );
            booking.selections = selections;
            booking.preloaded = Some(session.clone());
        }
        self.request_month(session.start, now).await
    }
}
