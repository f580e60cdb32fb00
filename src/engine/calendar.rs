use std::collections::BTreeMap;
use std::ops::Bound::{Excluded, Unbounded};

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::limits::MAX_DAYS_PER_SESSION;
use crate::model::*;

use super::EngineError;

pub const DAY_SECS: Secs = 86_400;

/// A calendar day in the display timezone. Orders like the calendar and
/// renders as `YYYY-MM-DD`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DayKey(NaiveDate);

impl DayKey {
    pub fn new(date: NaiveDate) -> Self {
        Self(date)
    }

    pub fn from_ymd(year: i32, month: u32, day: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, day).map(Self)
    }

    pub fn date(&self) -> NaiveDate {
        self.0
    }

    pub fn succ(&self) -> Option<Self> {
        self.0.succ_opt().map(Self)
    }
}

impl std::fmt::Display for DayKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d"))
    }
}

impl std::str::FromStr for DayKey {
    type Err = chrono::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").map(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Prev,
    Next,
}

/// Day arithmetic in one timezone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Calendar {
    tz: Tz,
}

impl Default for Calendar {
    fn default() -> Self {
        Self::utc()
    }
}

impl Calendar {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }

    pub fn utc() -> Self {
        Self { tz: Tz::UTC }
    }

    /// Resolve an IANA timezone name such as `Europe/Malta`.
    pub fn named(name: &str) -> Result<Self, EngineError> {
        name.parse::<Tz>()
            .map(Self::new)
            .map_err(|_| EngineError::InvalidTimezone(name.to_string()))
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    pub fn day_key(&self, t: DateTime<Utc>) -> DayKey {
        DayKey(t.with_timezone(&self.tz).date_naive())
    }

    /// First instant of `day` in this timezone. Where midnight falls in a
    /// DST gap, the first valid instant after it.
    pub fn day_start(&self, day: DayKey) -> Option<DateTime<Utc>> {
        let mut local = day.0.and_hms_opt(0, 0, 0)?;
        for _ in 0..4 {
            if let Some(t) = self.tz.from_local_datetime(&local).earliest() {
                return Some(t.with_timezone(&Utc));
            }
            local += Duration::minutes(30);
        }
        None
    }

    /// Every day touched by `[start, end)`: the start day, then each
    /// following day whose first instant lies before `end`. Stops after
    /// `MAX_DAYS_PER_SESSION` days.
    pub fn days_touched(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<DayKey> {
        let mut day = self.day_key(start);
        let mut days = vec![day];
        while let Some(next) = day.succ() {
            match self.day_start(next) {
                Some(next_start) if next_start < end => {
                    if days.len() >= MAX_DAYS_PER_SESSION {
                        warn!("session {start} .. {end} truncated to {MAX_DAYS_PER_SESSION} days");
                        break;
                    }
                    days.push(next);
                    day = next;
                }
                _ => break,
            }
        }
        days
    }

    /// Fetch window for the month containing `anchor`: from the later of
    /// today and the month's first day, to the start of the next month.
    /// `None` once the whole month lies in the past.
    pub fn month_window(&self, anchor: DateTime<Utc>, now: DateTime<Utc>) -> Option<Span> {
        let local = anchor.with_timezone(&self.tz).date_naive();
        let first = NaiveDate::from_ymd_opt(local.year(), local.month(), 1)?;
        let next_first = if local.month() == 12 {
            NaiveDate::from_ymd_opt(local.year() + 1, 1, 1)?
        } else {
            NaiveDate::from_ymd_opt(local.year(), local.month() + 1, 1)?
        };
        let today = self.day_key(now).0;
        let start = self.day_start(DayKey(first.max(today)))?;
        let end = self.day_start(DayKey(next_first))?;
        Span::checked(to_ms(start), to_ms(end))
    }
}

/// Sessions grouped by the calendar days they occupy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DayBuckets {
    days: BTreeMap<DayKey, Vec<Session>>,
}

impl DayBuckets {
    /// Group `sessions` by day. Sessions at least `daily_threshold` long
    /// claim every day they touch exclusively; shorter ones are listed under
    /// their start day in start order.
    pub fn bucket(
        sessions: &[Session],
        calendar: &Calendar,
        daily_threshold: Secs,
    ) -> Result<Self, EngineError> {
        if daily_threshold <= 0 {
            return Err(EngineError::InvalidThreshold(daily_threshold));
        }
        let mut ordered: Vec<&Session> = sessions.iter().collect();
        ordered.sort_by_key(|s| s.start);

        let mut days: BTreeMap<DayKey, Vec<Session>> = BTreeMap::new();
        for session in ordered {
            if session.duration < daily_threshold {
                days.entry(calendar.day_key(session.start))
                    .or_default()
                    .push(session.clone());
            } else {
                for day in calendar.days_touched(session.start, session.end) {
                    days.insert(day, vec![session.clone()]);
                }
            }
        }
        Ok(Self { days })
    }

    pub fn len(&self) -> usize {
        self.days.len()
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }

    pub fn contains(&self, day: &DayKey) -> bool {
        self.days.contains_key(day)
    }

    /// Day keys with at least one session, ascending.
    pub fn available_days(&self) -> Vec<DayKey> {
        self.days.keys().copied().collect()
    }

    pub fn sessions_for_day(&self, day: &DayKey) -> &[Session] {
        self.days.get(day).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The available day adjacent to `day` in `direction`. `None` when `day`
    /// is the first/last available day or is not available at all.
    pub fn nearest_available_day(&self, day: &DayKey, direction: Direction) -> Option<DayKey> {
        if !self.days.contains_key(day) {
            return None;
        }
        match direction {
            Direction::Prev => self.days.range(..*day).next_back().map(|(k, _)| *k),
            Direction::Next => self
                .days
                .range((Excluded(*day), Unbounded))
                .next()
                .map(|(k, _)| *k),
        }
    }

    pub fn is_day_disabled(&self, day: &DayKey, loading: bool) -> bool {
        loading || !self.days.contains_key(day)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&DayKey, &[Session])> {
        self.days.iter().map(|(k, v)| (k, v.as_slice()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    fn day(m: u32, d: u32) -> DayKey {
        DayKey::from_ymd(2026, m, d).unwrap()
    }

    fn session(start: DateTime<Utc>, end: DateTime<Utc>) -> Session {
        Session::new(1, 1, start, end)
    }

    #[test]
    fn day_key_renders_and_parses() {
        let k = day(1, 5);
        assert_eq!(k.to_string(), "2026-01-05");
        assert_eq!("2026-01-05".parse::<DayKey>().unwrap(), k);
        assert!(day(1, 31) < day(2, 1));
    }

    #[test]
    fn day_key_follows_timezone() {
        let t = utc(2026, 1, 5, 23, 30);
        assert_eq!(Calendar::utc().day_key(t), day(1, 5));
        let malta = Calendar::named("Europe/Malta").unwrap();
        assert_eq!(malta.day_key(t), day(1, 6));
    }

    #[test]
    fn unknown_timezone_rejected() {
        assert!(matches!(Calendar::named("Mars/Olympus"), Err(EngineError::InvalidTimezone(_))));
    }

    #[test]
    fn three_day_session_occupies_three_days() {
        let s = session(utc(2026, 1, 5, 0, 0), utc(2026, 1, 8, 0, 0));
        assert_eq!(s.duration, 3 * DAY_SECS);
        let b = DayBuckets::bucket(&[s.clone()], &Calendar::utc(), DAY_SECS).unwrap();
        assert_eq!(b.available_days(), vec![day(1, 5), day(1, 6), day(1, 7)]);
        for d in b.available_days() {
            assert_eq!(b.sessions_for_day(&d), std::slice::from_ref(&s));
        }
    }

    #[test]
    fn midday_daily_session_touches_end_day() {
        let s = session(utc(2026, 1, 5, 12, 0), utc(2026, 1, 6, 12, 0));
        let b = DayBuckets::bucket(&[s], &Calendar::utc(), DAY_SECS).unwrap();
        assert_eq!(b.available_days(), vec![day(1, 5), day(1, 6)]);
    }

    #[test]
    fn sub_day_sessions_share_their_start_day() {
        let a = session(utc(2026, 1, 5, 14, 0), utc(2026, 1, 5, 14, 30));
        let b = session(utc(2026, 1, 5, 9, 0), utc(2026, 1, 5, 10, 0));
        let c = session(utc(2026, 1, 6, 9, 0), utc(2026, 1, 6, 9, 30));
        let buckets = DayBuckets::bucket(&[a.clone(), b.clone(), c.clone()], &Calendar::utc(), DAY_SECS).unwrap();
        assert_eq!(buckets.sessions_for_day(&day(1, 5)), &[b, a][..]);
        assert_eq!(buckets.sessions_for_day(&day(1, 6)), &[c][..]);
    }

    #[test]
    fn late_sub_day_session_stays_on_start_day() {
        let s = session(utc(2026, 1, 5, 23, 30), utc(2026, 1, 6, 0, 30));
        let b = DayBuckets::bucket(&[s], &Calendar::utc(), DAY_SECS).unwrap();
        assert_eq!(b.available_days(), vec![day(1, 5)]);
    }

    #[test]
    fn later_daily_session_replaces_overlapping_one() {
        let first = session(utc(2026, 1, 5, 0, 0), utc(2026, 1, 7, 0, 0));
        let second = session(utc(2026, 1, 6, 0, 0), utc(2026, 1, 8, 0, 0));
        let b = DayBuckets::bucket(&[second.clone(), first.clone()], &Calendar::utc(), DAY_SECS).unwrap();
        assert_eq!(b.sessions_for_day(&day(1, 5)), &[first][..]);
        assert_eq!(b.sessions_for_day(&day(1, 6)), std::slice::from_ref(&second));
        assert_eq!(b.sessions_for_day(&day(1, 7)), &[second][..]);
    }

    #[test]
    fn threshold_must_be_positive() {
        let err = DayBuckets::bucket(&[], &Calendar::utc(), 0).unwrap_err();
        assert!(matches!(err, EngineError::InvalidThreshold(0)));
    }

    #[test]
    fn overlong_session_is_truncated_without_hiding_other_days() {
        let hour = session(utc(2026, 1, 5, 9, 0), utc(2026, 1, 5, 10, 0));
        let start = utc(2026, 2, 1, 0, 0);
        let long = session(start, start + Duration::days(800));
        let b = DayBuckets::bucket(&[hour.clone(), long.clone()], &Calendar::utc(), DAY_SECS).unwrap();

        assert_eq!(b.sessions_for_day(&day(1, 5)), &[hour]);
        assert_eq!(b.sessions_for_day(&day(2, 1)), &[long]);
        assert_eq!(b.len(), 1 + MAX_DAYS_PER_SESSION);
        let last = DayKey::new(day(2, 1).date() + Duration::days(MAX_DAYS_PER_SESSION as i64 - 1));
        assert_eq!(b.available_days().last(), Some(&last));
    }

    #[test]
    fn nearest_day_navigation() {
        let sessions: Vec<_> = [5, 9, 12]
            .iter()
            .map(|&d| session(utc(2026, 1, d, 9, 0), utc(2026, 1, d, 10, 0)))
            .collect();
        let b = DayBuckets::bucket(&sessions, &Calendar::utc(), DAY_SECS).unwrap();
        assert_eq!(b.nearest_available_day(&day(1, 9), Direction::Prev), Some(day(1, 5)));
        assert_eq!(b.nearest_available_day(&day(1, 9), Direction::Next), Some(day(1, 12)));
        assert_eq!(b.nearest_available_day(&day(1, 5), Direction::Prev), None);
        assert_eq!(b.nearest_available_day(&day(1, 12), Direction::Next), None);
        // Not an available day.
        assert_eq!(b.nearest_available_day(&day(1, 10), Direction::Next), None);
        assert_eq!(b.nearest_available_day(&day(1, 10), Direction::Prev), None);
    }

    #[test]
    fn single_available_day_has_no_neighbours() {
        let s = session(utc(2026, 1, 5, 9, 0), utc(2026, 1, 5, 10, 0));
        let b = DayBuckets::bucket(&[s], &Calendar::utc(), DAY_SECS).unwrap();
        assert_eq!(b.nearest_available_day(&day(1, 5), Direction::Prev), None);
        assert_eq!(b.nearest_available_day(&day(1, 5), Direction::Next), None);
    }

    #[test]
    fn disabled_days() {
        let s = session(utc(2026, 1, 5, 9, 0), utc(2026, 1, 5, 10, 0));
        let b = DayBuckets::bucket(&[s], &Calendar::utc(), DAY_SECS).unwrap();
        assert!(!b.is_day_disabled(&day(1, 5), false));
        assert!(b.is_day_disabled(&day(1, 5), true));
        assert!(b.is_day_disabled(&day(1, 6), false));
    }

    #[test]
    fn month_window_starts_today_within_current_month() {
        let cal = Calendar::utc();
        let now = utc(2026, 1, 14, 15, 0);
        let w = cal.month_window(utc(2026, 1, 20, 0, 0), now).unwrap();
        assert_eq!(w.start, to_ms(utc(2026, 1, 14, 0, 0)));
        assert_eq!(w.end, to_ms(utc(2026, 2, 1, 0, 0)));
    }

    #[test]
    fn month_window_for_future_month_is_whole_month() {
        let cal = Calendar::utc();
        let w = cal
            .month_window(utc(2026, 12, 3, 0, 0), utc(2026, 1, 14, 15, 0))
            .unwrap();
        assert_eq!(w.start, to_ms(utc(2026, 12, 1, 0, 0)));
        assert_eq!(w.end, to_ms(utc(2027, 1, 1, 0, 0)));
    }

    #[test]
    fn month_window_for_past_month_is_none() {
        let cal = Calendar::utc();
        assert!(cal.month_window(utc(2025, 11, 3, 0, 0), utc(2026, 1, 14, 15, 0)).is_none());
    }

    #[test]
    fn month_window_uses_local_midnight() {
        let cal = Calendar::named("Europe/Malta").unwrap();
        let w = cal
            .month_window(utc(2026, 3, 10, 0, 0), utc(2026, 1, 1, 0, 0))
            .unwrap();
        // Malta is UTC+1 in winter.
        assert_eq!(w.start, to_ms(utc(2026, 2, 28, 23, 0)));
        // Month ends after the switch to UTC+2 on the last Sunday of March.
        assert_eq!(w.end, to_ms(utc(2026, 3, 31, 22, 0)));
    }
}
