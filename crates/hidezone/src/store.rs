//! Constraint Store: ordered questions plus the scalar settings next to them.
//!
//! Each successful mutating call bumps `revision` once and notifies
//! subscribers once, however many fields it touched. Failed calls leave the
//! store untouched and notify nobody.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::question::{Question, QuestionKey, QuestionKind};
use crate::region::{Distance, Unit};

/// What a single mutating call changed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreChange {
    QuestionAdded(QuestionKey),
    QuestionRemoved(QuestionKey),
    QuestionUpdated(QuestionKey),
    QuestionsReplaced,
    SettingsChanged,
}

/// Handle returned by [`ConstraintStore::subscribe`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Observer = Box<dyn FnMut(&StoreChange) + Send>;

/// Persisted user settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Radius of the hiding zone around each station.
    pub hiding_radius: f64,
    /// Unit of `hiding_radius` and of new radius questions.
    pub unit: Unit,
    pub animate_map_movements: bool,
    pub auto_save: bool,
    pub display_stations: bool,
    /// Overpass tag filters; the first is the primary one.
    pub station_filters: Vec<String>,
    /// Tag consulted before `name` when labelling stations.
    pub preferred_name_tag: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            hiding_radius: 0.5,
            unit: Unit::Kilometers,
            animate_map_movements: false,
            auto_save: true,
            display_stations: true,
            station_filters: vec![
                "[railway=station]".to_string(),
                "[railway=tram_stop]".to_string(),
                "[railway=stop]".to_string(),
            ],
            preferred_name_tag: "name:nl".to_string(),
        }
    }
}

impl Settings {
    #[inline]
    pub fn hiding_distance(&self) -> Distance {
        Distance::new(self.hiding_radius, self.unit)
    }

    pub fn validate(&self) -> Result<(), StoreError> {
        if !(self.hiding_radius.is_finite() && self.hiding_radius > 0.0) {
            return Err(StoreError::InvalidSetting(format!(
                "hiding radius must be positive, got {}",
                self.hiding_radius
            )));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct ConstraintStore {
    questions: Vec<Question>,
    settings: Settings,
    next_key: u64,
    revision: u64,
    observers: Vec<(SubscriptionId, Observer)>,
    next_subscription: u64,
}

impl fmt::Debug for ConstraintStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConstraintStore")
            .field("questions", &self.questions)
            .field("settings", &self.settings)
            .field("next_key", &self.next_key)
            .field("revision", &self.revision)
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl ConstraintStore {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            ..Self::default()
        }
    }

    /// Validate, assign a fresh key, append.
    pub fn add(&mut self, kind: QuestionKind) -> Result<QuestionKey, StoreError> {
        kind.validate()?;
        let key = self.fresh_key();
        self.questions.push(Question { key, kind });
        self.commit(StoreChange::QuestionAdded(key));
        Ok(key)
    }

    pub fn remove(&mut self, key: QuestionKey) -> Result<Question, StoreError> {
        let idx = self.index_of(key)?;
        let removed = self.questions.remove(idx);
        self.commit(StoreChange::QuestionRemoved(key));
        Ok(removed)
    }

    /// Apply `patch` to a copy of the question; commit only if it validates.
    pub fn update<F>(&mut self, key: QuestionKey, patch: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut QuestionKind),
    {
        let idx = self.index_of(key)?;
        let mut kind = self.questions[idx].kind;
        patch(&mut kind);
        kind.validate()?;
        self.questions[idx].kind = kind;
        self.commit(StoreChange::QuestionUpdated(key));
        Ok(())
    }

    /// Replace every question at once (load path). Keys are kept when unique,
    /// otherwise reassigned.
    pub fn replace_all(
        &mut self,
        questions: impl IntoIterator<Item = (Option<QuestionKey>, QuestionKind)>,
    ) -> Result<(), StoreError> {
        let items: Vec<_> = questions.into_iter().collect();
        for (_, kind) in &items {
            kind.validate()?;
        }
        self.questions = assign_keys(items);
        self.next_key = next_key_after(&self.questions);
        self.commit(StoreChange::QuestionsReplaced);
        Ok(())
    }

    pub fn update_settings<F>(&mut self, patch: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut Settings),
    {
        let mut settings = self.settings.clone();
        patch(&mut settings);
        settings.validate()?;
        self.settings = settings;
        self.commit(StoreChange::SettingsChanged);
        Ok(())
    }

    #[inline]
    pub fn list(&self) -> &[Question] {
        &self.questions
    }

    pub fn get(&self, key: QuestionKey) -> Option<&Question> {
        self.questions.iter().find(|q| q.key == key)
    }

    #[inline]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    #[inline]
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn subscribe<F>(&mut self, observer: F) -> SubscriptionId
    where
        F: FnMut(&StoreChange) + Send + 'static,
    {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.observers.push((id, Box::new(observer)));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(sid, _)| *sid != id);
        self.observers.len() != before
    }

    fn fresh_key(&mut self) -> QuestionKey {
        let key = QuestionKey(self.next_key);
        self.next_key += 1;
        key
    }

    fn index_of(&self, key: QuestionKey) -> Result<usize, StoreError> {
        self.questions
            .iter()
            .position(|q| q.key == key)
            .ok_or(StoreError::UnknownQuestion(key))
    }

    fn commit(&mut self, change: StoreChange) {
        self.revision += 1;
        tracing::debug!(revision = self.revision, ?change, "store_commit");
        for (_, observer) in &mut self.observers {
            observer(&change);
        }
    }
}

/// Keep unique keys, give missing or repeated ones fresh keys above the max.
pub fn assign_keys(items: Vec<(Option<QuestionKey>, QuestionKind)>) -> Vec<Question> {
    let mut next = items
        .iter()
        .filter_map(|(k, _)| k.map(|k| k.0 + 1))
        .max()
        .unwrap_or(0);
    let mut seen = HashSet::with_capacity(items.len());
    items
        .into_iter()
        .map(|(key, kind)| {
            let key = match key {
                Some(k) if seen.insert(k) => k,
                _ => {
                    let k = QuestionKey(next);
                    next += 1;
                    seen.insert(k);
                    k
                }
            };
            Question { key, kind }
        })
        .collect()
}

fn next_key_after(questions: &[Question]) -> u64 {
    questions.iter().map(|q| q.key.0 + 1).max().unwrap_or(0)
}
