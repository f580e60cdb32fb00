use std::collections::{HashMap, HashSet};

use crate::model::*;

/// A stored session plus its query index field.
#[derive(Debug, Clone)]
struct StoredSession {
    session: Session,
    start_ms: Ms,
}

/// Append-only accumulation of every session fetched so far.
#[derive(Debug, Clone, Default)]
pub struct SessionStore {
    /// Per service, in discovery order.
    sessions: HashMap<ServiceId, Vec<StoredSession>>,
    keys: HashSet<SessionKey>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn service_len(&self, service: ServiceId) -> usize {
        self.sessions.get(&service).map_or(0, Vec::len)
    }

    pub fn contains(&self, session: &Session) -> bool {
        self.keys.contains(&session.key())
    }

    /// Store sessions, dropping any whose composite key is already present.
    /// Returns how many were actually added.
    pub fn append(&mut self, sessions: impl IntoIterator<Item = Session>) -> usize {
        let mut added = 0;
        for session in sessions {
            if !self.keys.insert(session.key()) {
                continue;
            }
            let start_ms = to_ms(session.start);
            self.sessions
                .entry(session.service)
                .or_default()
                .push(StoredSession { session, start_ms });
            added += 1;
        }
        added
    }

    /// Sessions of `service` starting at or after `since`, in discovery order.
    pub fn query(&self, service: ServiceId, since: Ms) -> Vec<Session> {
        self.sessions
            .get(&service)
            .map(|stored| {
                stored
                    .iter()
                    .filter(|s| s.start_ms >= since)
                    .map(|s| s.session.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every session of `service`.
    pub fn all(&self, service: ServiceId) -> Vec<Session> {
        self.query(service, Ms::MIN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    fn at(day: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, day, h, 0, 0).unwrap()
    }

    fn session(service: ServiceId, resource: ResourceId, day: u32, h: u32) -> Session {
        Session::new(service, resource, at(day, h), at(day, h + 1))
    }

    #[test]
    fn append_is_idempotent_for_duplicates() {
        let mut store = SessionStore::new();
        let s = session(1, 1, 5, 9);
        assert_eq!(store.append([s.clone()]), 1);
        assert_eq!(store.append([s.clone()]), 0);
        assert_eq!(store.len(), 1);
        assert_eq!(store.all(1), vec![s]);
    }

    #[test]
    fn duplicates_within_one_batch_are_dropped() {
        let mut store = SessionStore::new();
        let s = session(1, 1, 5, 9);
        assert_eq!(store.append([s.clone(), s.clone(), session(1, 2, 5, 9)]), 2);
        assert_eq!(store.service_len(1), 2);
    }

    #[test]
    fn query_filters_by_service_and_start() {
        let mut store = SessionStore::new();
        store.append([
            session(1, 1, 5, 9),
            session(2, 1, 6, 9),
            session(1, 1, 7, 9),
            session(1, 1, 3, 9),
        ]);
        let since = to_ms(at(5, 9));
        let got = store.query(1, since);
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].start, at(5, 9)); // inclusive bound
        assert_eq!(got[1].start, at(7, 9));
        assert!(store.query(3, Ms::MIN).is_empty());
    }

    #[test]
    fn query_preserves_discovery_order() {
        let mut store = SessionStore::new();
        store.append([session(1, 1, 9, 9)]);
        store.append([session(1, 1, 2, 9), session(1, 1, 4, 9)]);
        let days: Vec<_> = store.all(1).iter().map(|s| s.start).collect();
        assert_eq!(days, vec![at(9, 9), at(2, 9), at(4, 9)]);
    }
}
