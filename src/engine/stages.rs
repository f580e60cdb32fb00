use std::sync::Arc;

use crate::model::*;

use super::filters::StageStrategy;

pub type DurationLabeler = Arc<dyn Fn(&SessionType) -> String + Send + Sync>;

/// Filters by session length. One item per session type, keyed by the
/// session type id.
#[derive(Clone)]
pub struct DurationStage {
    labeler: DurationLabeler,
}

impl Default for DurationStage {
    fn default() -> Self {
        Self {
            labeler: Arc::new(|t: &SessionType| t.label.clone().unwrap_or_else(|| format!("{}s", t.duration))),
        }
    }
}

impl DurationStage {
    /// Use a custom label renderer, e.g. a humanized duration.
    pub fn with_labeler(labeler: impl Fn(&SessionType) -> String + Send + Sync + 'static) -> Self {
        Self {
            labeler: Arc::new(labeler),
        }
    }

    fn selected_duration(service: &ServiceSpec, key: &str) -> Option<Secs> {
        service.session_type(key).map(|t| t.duration)
    }
}

impl StageStrategy for DurationStage {
    fn domain_items(&self, eligible: &[&SessionType]) -> Vec<FilterItem> {
        eligible
            .iter()
            .map(|t| FilterItem {
                key: t.id.clone(),
                label: (self.labeler)(t),
            })
            .collect()
    }

    fn admits_type(&self, service: &ServiceSpec, key: &str, session_type: &SessionType) -> bool {
        Self::selected_duration(service, key) == Some(session_type.duration)
    }

    fn predicate(&self, service: &ServiceSpec, key: &str, session: &Session) -> bool {
        Self::selected_duration(service, key) == Some(session.duration)
    }
}

/// Filters by the staff member providing the session. Items are the
/// distinct staff resources of the eligible session types, in first-seen
/// order, keyed by resource id.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaffMemberStage;

impl StaffMemberStage {
    fn parse_key(key: &str) -> Option<ResourceId> {
        key.parse().ok()
    }
}

impl StageStrategy for StaffMemberStage {
    fn domain_items(&self, eligible: &[&SessionType]) -> Vec<FilterItem> {
        let mut items: Vec<FilterItem> = Vec::new();
        let mut seen: Vec<ResourceId> = Vec::new();
        for member in eligible.iter().flat_map(|t| t.staff()) {
            if seen.contains(&member.id) {
                continue;
            }
            seen.push(member.id);
            items.push(FilterItem {
                key: member.id.to_string(),
                label: member.name.clone(),
            });
        }
        items
    }

    fn admits_type(&self, _service: &ServiceSpec, key: &str, session_type: &SessionType) -> bool {
        Self::parse_key(key).is_some_and(|id| session_type.has_staff(id))
    }

    fn predicate(&self, _service: &ServiceSpec, key: &str, session: &Session) -> bool {
        Self::parse_key(key) == Some(session.resource)
    }
}
