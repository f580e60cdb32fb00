use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unix milliseconds, the time type of all range arithmetic.
pub type Ms = i64;

/// Durations are carried in whole seconds, like the remote API.
pub type Secs = i64;

pub type ServiceId = u64;
pub type ResourceId = u64;

pub fn to_ms(t: DateTime<Utc>) -> Ms {
    t.timestamp_millis()
}

pub fn from_ms(ms: Ms) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
}

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// Like `new`, but returns `None` for empty or inverted bounds.
    pub fn checked(start: Ms, end: Ms) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Overlapping or sharing an endpoint.
    pub fn touches(&self, other: &Span) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

/// A bookable slot as normalized by the transformer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub service: ServiceId,
    pub resource: ResourceId,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Always `end - start`, in seconds.
    pub duration: Secs,
}

/// Composite identity of a session: two fetches returning the same slot
/// produce equal keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionKey {
    pub service: ServiceId,
    pub resource: ResourceId,
    pub start: Ms,
    pub end: Ms,
}

impl Session {
    pub fn new(
        service: ServiceId,
        resource: ResourceId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Self {
        debug_assert!(start < end, "Session start must be before end");
        Self {
            service,
            resource,
            start,
            end,
            duration: (end - start).num_seconds(),
        }
    }

    pub fn span(&self) -> Span {
        Span::new(to_ms(self.start), to_ms(self.end))
    }

    pub fn key(&self) -> SessionKey {
        SessionKey {
            service: self.service,
            resource: self.resource,
            start: to_ms(self.start),
            end: to_ms(self.end),
        }
    }

    pub fn is_same_slot(&self, other: &Session) -> bool {
        self.key() == other.key()
    }
}

// ── Service description ──────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Staff,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRef {
    pub id: ResourceId,
    #[serde(rename = "type")]
    pub kind: ResourceKind,
    #[serde(default)]
    pub name: String,
}

/// One bookable session length offered by a service, with the resources
/// able to provide it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionType {
    pub id: String,
    #[serde(default)]
    pub label: Option<String>,
    pub duration: Secs,
    #[serde(default)]
    pub resources: Vec<ResourceRef>,
}

impl SessionType {
    pub fn staff(&self) -> impl Iterator<Item = &ResourceRef> {
        self.resources.iter().filter(|r| r.kind == ResourceKind::Staff)
    }

    pub fn has_staff(&self, id: ResourceId) -> bool {
        self.staff().any(|r| r.id == id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub id: ServiceId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "sessionTypes", alias = "session_types", default)]
    pub session_types: Vec<SessionType>,
}

impl ServiceSpec {
    pub fn session_type(&self, id: &str) -> Option<&SessionType> {
        self.session_types.iter().find(|t| t.id == id)
    }
}

/// One selectable entry of a filter stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterItem {
    pub key: String,
    pub label: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 5, h, m, 0).unwrap()
    }

    #[test]
    fn span_basics() {
        let s = Span::new(100, 200);
        assert_eq!(s.duration_ms(), 100);
        assert!(s.contains_instant(100));
        assert!(s.contains_instant(199));
        assert!(!s.contains_instant(200)); // half-open
    }

    #[test]
    fn span_overlap_and_touch() {
        let a = Span::new(100, 200);
        let b = Span::new(150, 250);
        let c = Span::new(200, 300);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c));
        assert!(a.touches(&c));
        assert!(!a.touches(&Span::new(201, 300)));
    }

    #[test]
    fn span_checked_rejects_empty() {
        assert!(Span::checked(5, 5).is_none());
        assert!(Span::checked(6, 5).is_none());
        assert_eq!(Span::checked(5, 6), Some(Span::new(5, 6)));
    }

    #[test]
    fn span_contains_span() {
        let outer = Span::new(100, 400);
        assert!(outer.contains_span(&Span::new(150, 300)));
        assert!(outer.contains_span(&outer));
        assert!(!outer.contains_span(&Span::new(50, 200)));
    }

    #[test]
    fn session_duration_is_derived() {
        let s = Session::new(1, 7, at(9, 0), at(10, 30));
        assert_eq!(s.duration, 5400);
        assert_eq!(s.span().duration_ms(), 5_400_000);
    }

    #[test]
    fn same_slot_ignores_nothing_but_identity() {
        let a = Session::new(1, 7, at(9, 0), at(10, 0));
        let b = Session::new(1, 7, at(9, 0), at(10, 0));
        let other_resource = Session::new(1, 8, at(9, 0), at(10, 0));
        assert!(a.is_same_slot(&b));
        assert!(!a.is_same_slot(&other_resource));
    }

    #[test]
    fn service_spec_from_json() {
        let json = r#"{
            "id": 12,
            "sessionTypes": [
                {"id": "t1", "label": "Short", "duration": 1800,
                 "resources": [{"id": 3, "type": "staff", "name": "Ann"},
                               {"id": 9, "type": "room", "name": "A"}]}
            ]
        }"#;
        let spec: ServiceSpec = serde_json::from_str(json).unwrap();
        assert_eq!(spec.id, 12);
        let t = spec.session_type("t1").unwrap();
        assert_eq!(t.resources[1].kind, ResourceKind::Other);
        assert_eq!(t.staff().count(), 1);
        assert!(t.has_staff(3));
        assert!(!t.has_staff(9));
    }
}
