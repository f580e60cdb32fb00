use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::limits::MAX_FILTER_STAGES;
use crate::model::*;

use super::EngineError;
use super::stages::{DurationStage, StaffMemberStage};

/// How one filter stage interprets its keys.
pub trait StageStrategy: Send + Sync {
    /// Items offered for the session types still eligible after earlier stages.
    fn domain_items(&self, eligible: &[&SessionType]) -> Vec<FilterItem>;

    /// Whether choosing `key` on this stage leaves `session_type` possible.
    fn admits_type(&self, service: &ServiceSpec, key: &str, session_type: &SessionType) -> bool;

    /// Whether `session` passes this stage when `key` is selected.
    fn predicate(&self, service: &ServiceSpec, key: &str, session: &Session) -> bool;

    /// Whether `key` describes `session` (used to rebuild selections for a
    /// preselected session).
    fn corresponds_to(&self, service: &ServiceSpec, key: &str, session: &Session) -> bool {
        self.predicate(service, key, session)
    }
}

#[derive(Clone)]
pub struct FilterStage {
    pub id: String,
    pub order: i32,
    pub strategy: Arc<dyn StageStrategy>,
}

impl FilterStage {
    pub fn new(id: impl Into<String>, order: i32, strategy: impl StageStrategy + 'static) -> Self {
        Self {
            id: id.into(),
            order,
            strategy: Arc::new(strategy),
        }
    }
}

impl std::fmt::Debug for FilterStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterStage")
            .field("id", &self.id)
            .field("order", &self.order)
            .finish()
    }
}

/// Stage id → selected key. Absent means unset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilterSelection(BTreeMap<String, String>);

impl FilterSelection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, stage: &str) -> Option<&str> {
        self.0.get(stage).map(String::as_str)
    }

    pub fn set(&mut self, stage: &str, key: Option<String>) {
        match key {
            Some(k) => {
                self.0.insert(stage.to_string(), k);
            }
            None => {
                self.0.remove(stage);
            }
        }
    }

    pub fn clear(&mut self, stage: &str) {
        self.0.remove(stage);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Ordered list of cascading stages.
#[derive(Debug, Clone)]
pub struct FilterPipeline {
    stages: Vec<FilterStage>,
}

pub const DURATION_STAGE: &str = "duration";
pub const STAFF_MEMBER_STAGE: &str = "staffMember";

impl FilterPipeline {
    pub fn new(mut stages: Vec<FilterStage>) -> Result<Self, EngineError> {
        if stages.len() > MAX_FILTER_STAGES {
            return Err(EngineError::LimitExceeded("too many filter stages"));
        }
        stages.sort_by_key(|s| s.order);
        for (i, stage) in stages.iter().enumerate() {
            if stages[..i].iter().any(|s| s.id == stage.id) {
                return Err(EngineError::DuplicateStage(stage.id.clone()));
            }
        }
        Ok(Self { stages })
    }

    /// Build from built-in stage names, in the given order.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self, EngineError> {
        let stages = names
            .iter()
            .enumerate()
            .map(|(order, name)| {
                let name = name.as_ref();
                let order = order as i32;
                match name {
                    DURATION_STAGE => Ok(FilterStage::new(name, order, DurationStage::default())),
                    STAFF_MEMBER_STAGE => Ok(FilterStage::new(name, order, StaffMemberStage)),
                    other => Err(EngineError::UnknownStage(other.to_string())),
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(stages)
    }

    /// Duration first, then staff member.
    pub fn standard() -> Self {
        Self {
            stages: vec![
                FilterStage::new(DURATION_STAGE, 0, DurationStage::default()),
                FilterStage::new(STAFF_MEMBER_STAGE, 1, StaffMemberStage),
            ],
        }
    }

    pub fn stages(&self) -> &[FilterStage] {
        &self.stages
    }

    pub fn stage_ids(&self) -> impl Iterator<Item = &str> {
        self.stages.iter().map(|s| s.id.as_str())
    }

    pub fn index_of(&self, stage: &str) -> Result<usize, EngineError> {
        self.stages
            .iter()
            .position(|s| s.id == stage)
            .ok_or_else(|| EngineError::UnknownStage(stage.to_string()))
    }

    pub fn has_stage(&self, stage: &str) -> bool {
        self.stages.iter().any(|s| s.id == stage)
    }

    /// Domain of stage `i`, given the already computed domains of every
    /// earlier stage. Earlier stages that are unset or have an empty domain
    /// do not constrain.
    fn domain_at(
        &self,
        i: usize,
        service: &ServiceSpec,
        selections: &FilterSelection,
        earlier: &[Vec<FilterItem>],
    ) -> Vec<FilterItem> {
        let eligible: Vec<&SessionType> = service
            .session_types
            .iter()
            .filter(|st| {
                self.stages[..i].iter().zip(earlier).all(|(stage, domain)| {
                    match selections.get(&stage.id) {
                        Some(key) if !domain.is_empty() => {
                            stage.strategy.admits_type(service, key, st)
                        }
                        _ => true,
                    }
                })
            })
            .collect();
        self.stages[i].strategy.domain_items(&eligible)
    }

    /// Domains of every stage, in pipeline order.
    pub fn domains(&self, service: &ServiceSpec, selections: &FilterSelection) -> Vec<Vec<FilterItem>> {
        let mut domains = Vec::with_capacity(self.stages.len());
        for i in 0..self.stages.len() {
            let domain = self.domain_at(i, service, selections, &domains);
            domains.push(domain);
        }
        domains
    }

    /// Candidate items for `stage` under the current selections of the
    /// stages before it.
    pub fn candidate_values(
        &self,
        service: &ServiceSpec,
        stage: &str,
        selections: &FilterSelection,
    ) -> Result<Vec<FilterItem>, EngineError> {
        let idx = self.index_of(stage)?;
        let mut domains = Vec::with_capacity(idx + 1);
        for i in 0..=idx {
            let domain = self.domain_at(i, service, selections, &domains);
            domains.push(domain);
        }
        Ok(domains.pop().unwrap_or_default())
    }

    /// Selections after setting the first stage to its first candidate.
    pub fn initial_selections(&self, service: &ServiceSpec) -> FilterSelection {
        let Some(first) = self.stages.first() else {
            return FilterSelection::new();
        };
        let empty = FilterSelection::new();
        let key = self
            .domain_at(0, service, &empty, &[])
            .into_iter()
            .next()
            .map(|item| item.key);
        // The stage id comes from the pipeline itself.
        reduce_selections(self, service, &empty, &first.id, key).unwrap_or_default()
    }

    /// Whether `session` passes every stage with a set selection.
    pub fn passes(&self, service: &ServiceSpec, session: &Session, selections: &FilterSelection) -> bool {
        let domains = self.domains(service, selections);
        self.passes_with(service, session, selections, &domains)
    }

    fn passes_with(
        &self,
        service: &ServiceSpec,
        session: &Session,
        selections: &FilterSelection,
        domains: &[Vec<FilterItem>],
    ) -> bool {
        self.stages.iter().zip(domains).all(|(stage, domain)| {
            match selections.get(&stage.id) {
                Some(key) if !domain.is_empty() => stage.strategy.predicate(service, key, session),
                _ => true,
            }
        })
    }

    /// Keep the sessions passing every stage, order preserved.
    pub fn filter(
        &self,
        service: &ServiceSpec,
        sessions: impl IntoIterator<Item = Session>,
        selections: &FilterSelection,
    ) -> Vec<Session> {
        let domains = self.domains(service, selections);
        sessions
            .into_iter()
            .filter(|s| self.passes_with(service, s, selections, &domains))
            .collect()
    }

    /// Rebuild the selection path leading to `session`: per stage, the first
    /// candidate that corresponds to it.
    pub fn select_filters_for_session(&self, service: &ServiceSpec, session: &Session) -> FilterSelection {
        let mut selections = FilterSelection::new();
        let mut domains = Vec::with_capacity(self.stages.len());
        for (i, stage) in self.stages.iter().enumerate() {
            let domain = self.domain_at(i, service, &selections, &domains);
            let key = domain
                .iter()
                .find(|item| stage.strategy.corresponds_to(service, &item.key, session))
                .map(|item| item.key.clone());
            selections.set(&stage.id, key);
            domains.push(domain);
        }
        selections
    }
}

/// Apply a selection change and cascade it: every later stage is reset to
/// the first of its freshly computed candidates (or unset when there are
/// none), and any key no longer in its stage's domain is cleared.
pub fn reduce_selections(
    pipeline: &FilterPipeline,
    service: &ServiceSpec,
    selections: &FilterSelection,
    stage: &str,
    value: Option<String>,
) -> Result<FilterSelection, EngineError> {
    let changed = pipeline.index_of(stage)?;
    let mut next = selections.clone();
    next.set(stage, value);

    let mut domains: Vec<Vec<FilterItem>> = Vec::with_capacity(pipeline.stages.len());
    for (i, s) in pipeline.stages.iter().enumerate() {
        let domain = pipeline.domain_at(i, service, &next, &domains);
        if i > changed {
            next.set(&s.id, domain.first().map(|item| item.key.clone()));
        } else if let Some(key) = next.get(&s.id)
            && !domain.iter().any(|item| item.key == key) {
                next.clear(&s.id);
            }
        domains.push(domain);
    }
    Ok(next)
}
