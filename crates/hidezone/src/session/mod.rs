//! Session: the single writer over all mutable state.
//!
//! Purpose
//! - Own the constraint store, base area, exclusions, current station set and
//!   the committed Candidate Region, and keep the region consistent with them.
//! - Every mutation goes through `&mut self`; a change that affects the
//!   region advances the generation, recomputes from scratch, commits and
//!   emits exactly one `RegionChanged`.
//! - Station results are tagged with the generation they were requested for;
//!   results for an older generation are discarded.
//!
//! Settings are persisted on every change. Questions, base area and
//! exclusions are persisted on change only while `auto_save` is on, and by
//! an explicit [`Session::save`] otherwise. Recompute never depends on
//! `auto_save`.
//!
//! Code cross-refs: `engine::reduce`, `refine::eliminate`, `snapshot`,
//! `task::spawn_session` (async host).

mod task;

pub use task::{spawn_session, Command, SessionHandle};

use std::collections::BTreeSet;

use geo_types::{Point, Polygon};
use serde_json::Value;

use crate::engine::{reduce, BaseArea, EngineCfg, Generation, Scheduler};
use crate::error::{CoreError, RefineError, Result, StationError};
use crate::events::{CoreEvent, EventSink};
use crate::persist::{
    Persistence, KEY_BASE_AREA, KEY_DISABLED_STATIONS, KEY_QUESTIONS, KEY_SETTINGS,
};
use crate::question::{Question, QuestionKey, QuestionKind};
use crate::refine::{
    eliminate, exclusion_mask, viewport_for, ContradictionPolicy, Elimination,
};
use crate::region::{CandidateRegion, Unit};
use crate::snapshot::{self, Snapshot};
use crate::stations::{SearchArea, StationId, StationQuery, StationSet};
use crate::store::{ConstraintStore, Settings};

/// A station search the host should run, tagged with the generation whose
/// state it was built from.
#[derive(Clone, Debug, PartialEq)]
pub struct StationRequest {
    pub generation: Generation,
    pub query: StationQuery,
}

pub struct Session {
    cfg: EngineCfg,
    store: ConstraintStore,
    base: BaseArea,
    exclusions: BTreeSet<StationId>,
    stations: StationSet,
    /// `reduce` output, before exclusions.
    constrained: CandidateRegion,
    /// Committed region.
    region: CandidateRegion,
    scheduler: Scheduler,
    policy: ContradictionPolicy,
    events: Box<dyn EventSink + Send>,
    persistence: Box<dyn Persistence + Send>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("store", &self.store)
            .field("base", &self.base)
            .field("exclusions", &self.exclusions)
            .field("stations", &self.stations.len())
            .field("generation", &self.scheduler.current())
            .finish()
    }
}

impl Session {
    pub fn new(
        persistence: impl Persistence + Send + 'static,
        events: impl EventSink + Send + 'static,
    ) -> Self {
        Self::with_config(EngineCfg::default(), persistence, events)
    }

    /// Restore whatever `persistence` holds; anything missing or unreadable
    /// falls back to the defaults (Amsterdam zone, no questions).
    pub fn with_config(
        cfg: EngineCfg,
        persistence: impl Persistence + Send + 'static,
        events: impl EventSink + Send + 'static,
    ) -> Self {
        let settings = load_settings(&persistence);
        let base = load_base(&persistence).unwrap_or_else(|| BaseArea::default_zone(&cfg));
        let questions = load_questions(&persistence);
        let exclusions = load_exclusions(&persistence);
        tracing::info!(
            questions = questions.len(),
            exclusions = exclusions.len(),
            "session_loaded"
        );

        let mut store = ConstraintStore::new(settings);
        if let Err(e) = store.replace_all(questions.into_iter().map(|q| (Some(q.key), q.kind))) {
            tracing::warn!(error = %e, "dropping persisted questions");
        }
        let mut session = Self {
            cfg,
            store,
            base,
            exclusions,
            stations: StationSet::default(),
            constrained: CandidateRegion::empty(),
            region: CandidateRegion::empty(),
            scheduler: Scheduler::new(),
            policy: ContradictionPolicy::default(),
            events: Box::new(events),
            persistence: Box::new(persistence),
        };
        session.scheduler.advance();
        match reduce(&session.base, session.store.list(), &session.cfg) {
            Ok(constrained) => {
                session.constrained = constrained;
                session.region = session.apply_exclusions();
            }
            Err(e) => tracing::warn!(error = %e, "persisted state does not reduce"),
        }
        session
    }

    // ---- questions ----

    pub fn add_question(&mut self, kind: QuestionKind) -> Result<QuestionKey> {
        let key = self.store.add(kind).map_err(|e| self.reject(e))?;
        self.questions_changed();
        Ok(key)
    }

    /// Radius question at `center` with the interactive defaults.
    pub fn add_radius_here(&mut self, center: Point<f64>) -> Result<QuestionKey> {
        let unit = self.store.settings().unit;
        self.add_question(QuestionKind::radius_at(center, unit))
    }

    /// Thermometer from `center` to 5 km east of it.
    pub fn add_thermometer_here(&mut self, center: Point<f64>) -> Result<QuestionKey> {
        self.add_question(QuestionKind::thermometer_at(center))
    }

    pub fn remove_question(&mut self, key: QuestionKey) -> Result<Question> {
        let removed = self.store.remove(key).map_err(|e| self.reject(e))?;
        self.questions_changed();
        Ok(removed)
    }

    pub fn update_question<F>(&mut self, key: QuestionKey, patch: F) -> Result<()>
    where
        F: FnOnce(&mut QuestionKind),
    {
        self.store.update(key, patch).map_err(|e| self.reject(e))?;
        self.questions_changed();
        Ok(())
    }

    fn questions_changed(&mut self) {
        if self.store.settings().auto_save {
            self.persist_questions();
        }
        self.recompute();
    }

    // ---- base area and settings ----

    /// Replace the base area. A malformed base area is rejected and the
    /// committed region stays as it was.
    pub fn set_base_area(&mut self, base: BaseArea) -> Result<()> {
        base.region(&self.cfg.geom).map_err(|e| self.reject(e))?;
        self.base = base;
        if self.store.settings().auto_save {
            self.persist_base();
        }
        self.recompute();
        Ok(())
    }

    /// Apply `patch` to the settings. Recomputes only when the hiding radius,
    /// its unit or the station filters changed.
    pub fn update_settings<F>(&mut self, patch: F) -> Result<()>
    where
        F: FnOnce(&mut Settings),
    {
        let before = self.store.settings().clone();
        self.store.update_settings(patch).map_err(|e| self.reject(e))?;
        self.persist_settings();
        let after = self.store.settings();
        if before.hiding_radius != after.hiding_radius
            || before.unit != after.unit
            || before.station_filters != after.station_filters
        {
            self.recompute();
        }
        Ok(())
    }

    pub fn set_settings(&mut self, settings: Settings) -> Result<()> {
        self.update_settings(|s| *s = settings)
    }

    pub fn set_hiding_radius(&mut self, radius: f64) -> Result<()> {
        self.update_settings(|s| s.hiding_radius = radius)
    }

    pub fn set_unit(&mut self, unit: Unit) -> Result<()> {
        self.update_settings(|s| s.unit = unit)
    }

    pub fn set_station_filters(&mut self, filters: Vec<String>) -> Result<()> {
        self.update_settings(|s| s.station_filters = filters)
    }

    pub fn set_policy(&mut self, policy: ContradictionPolicy) {
        self.policy = policy;
    }

    // ---- stations ----

    /// Search to run for the current state, or `None` when station display
    /// is off. An empty filter list is rejected before it reaches any source.
    pub fn station_request(&mut self) -> Result<Option<StationRequest>> {
        let settings = self.store.settings();
        if !settings.display_stations {
            return Ok(None);
        }
        let Some(bbox) = self.base.region(&self.cfg.geom).ok().and_then(|r| r.bbox()) else {
            return Ok(None);
        };
        let query = StationQuery::new(&settings.station_filters, SearchArea::from_bbox(&bbox))
            .map_err(|e| self.reject(e))?;
        Ok(Some(StationRequest {
            generation: self.scheduler.current(),
            query,
        }))
    }

    /// Commit a station search result. Returns `Ok(false)` when `generation`
    /// is stale and the result was dropped.
    pub fn apply_stations(
        &mut self,
        generation: Generation,
        result: std::result::Result<StationSet, StationError>,
    ) -> Result<bool> {
        if !self.scheduler.is_current(generation) {
            tracing::warn!(
                %generation,
                current = %self.scheduler.current(),
                "discarding stale station result"
            );
            return Ok(false);
        }
        let stations = result.map_err(|e| self.reject(e))?;
        tracing::info!(count = stations.len(), "stations_refreshed");
        self.stations = stations;
        self.commit(self.apply_exclusions());
        Ok(true)
    }

    /// "The hider is not at this station."
    pub fn eliminate_station(&mut self, id: &StationId) -> Result<Elimination> {
        let hiding = self.store.settings().hiding_distance();
        let animated = self.store.settings().animate_map_movements;
        let mut outcome = if self.exclusions.contains(id) {
            // Already excluded: nothing to subtract, only refocus.
            let Some(station) = self.stations.get(id).cloned() else {
                return Err(self.reject(RefineError::UnknownStation(id.clone())));
            };
            Elimination {
                region: self.region.clone(),
                contradiction: false,
                committed: false,
                focus: id.clone(),
                viewport: viewport_for(&station, hiding, &self.cfg.geom),
            }
        } else {
            eliminate(id, &self.region, &self.stations, hiding, &self.cfg.geom, self.policy)
                .map_err(|e| self.reject(e))?
        };

        self.events.emit(CoreEvent::FocusStation(id.clone()));
        self.events.emit(CoreEvent::FitViewport {
            bbox: outcome.viewport,
            animated,
        });
        if outcome.contradiction {
            self.events.emit(CoreEvent::Contradiction(id.clone()));
        }
        if outcome.committed {
            self.exclusions.insert(id.clone());
            if self.store.settings().auto_save {
                self.persist_exclusions();
            }
            self.recompute();
            outcome.region = self.region.clone();
        }
        Ok(outcome)
    }

    /// Undo an elimination. Returns whether `id` was excluded.
    pub fn restore_station(&mut self, id: &StationId) -> bool {
        if !self.exclusions.remove(id) {
            return false;
        }
        if self.store.settings().auto_save {
            self.persist_exclusions();
        }
        self.recompute();
        true
    }

    // ---- snapshots ----

    pub fn snapshot(&self) -> Snapshot {
        let settings = self.store.settings();
        Snapshot {
            base: self.base.clone(),
            questions: self.store.list().to_vec(),
            disabled_stations: self.exclusions.clone(),
            hiding_radius: settings.hiding_radius,
            unit: settings.unit,
        }
    }

    pub fn share_string(&self) -> String {
        snapshot::encode_share(&self.snapshot())
    }

    pub fn share_url(&self, base: &str) -> String {
        snapshot::share_url(base, &self.snapshot())
    }

    /// Replace everything from a share string, URL or raw snapshot JSON.
    /// A document that fails to decode changes nothing.
    pub fn load_snapshot(&mut self, text: &str) -> Result<()> {
        let snap = snapshot::decode_share(text).map_err(|e| self.reject(e))?;
        self.apply_snapshot(snap)
    }

    pub fn apply_snapshot(&mut self, snap: Snapshot) -> Result<()> {
        let mut settings = self.store.settings().clone();
        settings.hiding_radius = snap.hiding_radius;
        settings.unit = snap.unit;
        settings.validate().map_err(|e| self.reject(e))?;
        snap.base
            .region(&self.cfg.geom)
            .map_err(|e| self.reject(e))?;
        self.store
            .replace_all(snap.questions.into_iter().map(|q| (Some(q.key), q.kind)))
            .map_err(|e| self.reject(e))?;
        self.store
            .update_settings(|s| *s = settings)
            .map_err(|e| self.reject(e))?;
        self.base = snap.base;
        self.exclusions = snap.disabled_stations;
        tracing::info!(questions = self.store.list().len(), "hiding zone loaded");
        self.persist_settings();
        if self.store.settings().auto_save {
            self.persist_questions();
            self.persist_base();
            self.persist_exclusions();
        }
        self.recompute();
        Ok(())
    }

    /// Write everything to persistence.
    pub fn save(&mut self) -> Result<()> {
        let entries = [
            (KEY_SETTINGS, self.settings_json()),
            (KEY_QUESTIONS, snapshot::encode_questions(self.store.list()).to_string()),
            (KEY_BASE_AREA, self.base_json()),
            (KEY_DISABLED_STATIONS, self.exclusions_json()),
        ];
        for (key, value) in entries {
            self.persistence
                .save(key, &value)
                .map_err(|e| CoreError::Persistence(format!("{key}: {e}")))?;
        }
        Ok(())
    }

    // ---- accessors ----

    #[inline]
    pub fn region(&self) -> &CandidateRegion {
        &self.region
    }

    /// Region after the questions, before station exclusions.
    #[inline]
    pub fn constrained_region(&self) -> &CandidateRegion {
        &self.constrained
    }

    pub fn questions(&self) -> &[Question] {
        self.store.list()
    }

    pub fn settings(&self) -> &Settings {
        self.store.settings()
    }

    pub fn base_area(&self) -> &BaseArea {
        &self.base
    }

    pub fn exclusions(&self) -> &BTreeSet<StationId> {
        &self.exclusions
    }

    pub fn stations(&self) -> &StationSet {
        &self.stations
    }

    pub fn generation(&self) -> Generation {
        self.scheduler.current()
    }

    pub fn policy(&self) -> ContradictionPolicy {
        self.policy
    }

    /// Read-only view; every write goes through the session so the region
    /// follows the constraint set.
    pub fn store(&self) -> &ConstraintStore {
        &self.store
    }

    // ---- internals ----

    /// New generation, full recompute, commit. A malformed base area keeps
    /// the previously committed region.
    fn recompute(&mut self) {
        let generation = self.scheduler.advance();
        match reduce(&self.base, self.store.list(), &self.cfg) {
            Ok(constrained) => {
                self.constrained = constrained;
                let region = self.apply_exclusions();
                tracing::debug!(
                    %generation,
                    parts = region.part_count(),
                    area = region.area(),
                    "recompute"
                );
                self.commit(region);
            }
            Err(e) => {
                tracing::warn!(%generation, error = %e, "recompute rejected");
                self.events.emit(CoreEvent::ValidationError(e.to_string()));
            }
        }
    }

    /// `constrained` minus the masks of excluded stations that are part of
    /// the current station set.
    fn apply_exclusions(&self) -> CandidateRegion {
        let hiding = self.store.settings().hiding_distance();
        let masks: Vec<Polygon<f64>> = self
            .exclusions
            .iter()
            .filter_map(|id| self.stations.get(id))
            .map(|s| exclusion_mask(s, hiding, &self.cfg.geom))
            .collect();
        if masks.is_empty() {
            return self.constrained.clone();
        }
        self.constrained.subtract(&CandidateRegion::union_all(&masks))
    }

    fn commit(&mut self, region: CandidateRegion) {
        self.region = region;
        self.events.emit(CoreEvent::RegionChanged(self.region.clone()));
    }

    fn reject(&mut self, err: impl Into<CoreError>) -> CoreError {
        let err = err.into();
        tracing::debug!(error = %err, "rejected");
        self.events.emit(CoreEvent::ValidationError(err.to_string()));
        err
    }

    fn settings_json(&self) -> String {
        serde_json::to_string(self.store.settings()).unwrap_or_default()
    }

    fn base_json(&self) -> String {
        Value::Object(snapshot::encode_base(&self.base, Value::Array(vec![]))).to_string()
    }

    fn exclusions_json(&self) -> String {
        serde_json::to_string(&self.exclusions).unwrap_or_default()
    }

    fn persist(&mut self, key: &str, value: String) {
        if let Err(e) = self.persistence.save(key, &value) {
            tracing::warn!(key, error = %e, "persist_failed");
        }
    }

    fn persist_settings(&mut self) {
        let v = self.settings_json();
        self.persist(KEY_SETTINGS, v);
    }

    fn persist_questions(&mut self) {
        let v = snapshot::encode_questions(self.store.list()).to_string();
        self.persist(KEY_QUESTIONS, v);
    }

    fn persist_base(&mut self) {
        let v = self.base_json();
        self.persist(KEY_BASE_AREA, v);
    }

    fn persist_exclusions(&mut self) {
        let v = self.exclusions_json();
        self.persist(KEY_DISABLED_STATIONS, v);
    }
}

fn load_settings(p: &impl Persistence) -> Settings {
    p.load(KEY_SETTINGS)
        .and_then(|s| match serde_json::from_str::<Settings>(&s) {
            Ok(settings) if settings.validate().is_ok() => Some(settings),
            _ => {
                tracing::warn!("ignoring unreadable persisted settings");
                None
            }
        })
        .unwrap_or_default()
}

fn load_base(p: &impl Persistence) -> Option<BaseArea> {
    let text = p.load(KEY_BASE_AREA)?;
    let decoded = serde_json::from_str::<Value>(&text)
        .ok()
        .and_then(|v| v.as_object().cloned())
        .ok_or_else(|| crate::error::SnapshotError::invalid("not a JSON object"))
        .and_then(|doc| snapshot::decode_base(&doc));
    match decoded {
        Ok((base, _)) => Some(base),
        Err(e) => {
            tracing::warn!(error = %e, "ignoring unreadable persisted base area");
            None
        }
    }
}

fn load_questions(p: &impl Persistence) -> Vec<Question> {
    let Some(text) = p.load(KEY_QUESTIONS) else {
        return Vec::new();
    };
    serde_json::from_str::<Value>(&text)
        .map_err(|e| e.to_string())
        .and_then(|v| snapshot::decode_questions(&v).map_err(|e| e.to_string()))
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, "ignoring unreadable persisted questions");
            Vec::new()
        })
}

fn load_exclusions(p: &impl Persistence) -> BTreeSet<StationId> {
    p.load(KEY_DISABLED_STATIONS)
        .and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests;
