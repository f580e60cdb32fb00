use dashmap::DashMap;

use crate::model::*;

/// Ranges already fetched for one service.
/// Invariant: sorted by start, no two spans overlap or touch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoverageSet {
    spans: Vec<Span>,
}

impl CoverageSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spans(&self) -> &[Span] {
        &self.spans
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    /// The single span to fetch so that `query` becomes fully covered, or
    /// `None` if it already is. When several gaps exist inside `query`, the
    /// result runs from the start of the first gap to the end of the last:
    /// one request, at the cost of re-fetching whatever covered stretches
    /// sit between the gaps.
    pub fn uncovered(&self, query: &Span) -> Option<Span> {
        let first = self.spans.partition_point(|s| s.end <= query.start);
        let mut cursor = query.start;
        let mut gap_start = None;
        let mut gap_end = query.start;
        for span in &self.spans[first..] {
            if span.start >= query.end || cursor >= query.end {
                break;
            }
            if span.start > cursor {
                gap_start.get_or_insert(cursor);
                gap_end = span.start;
            }
            cursor = cursor.max(span.end);
        }
        if cursor < query.end {
            gap_start.get_or_insert(cursor);
            gap_end = query.end;
        }
        gap_start.map(|start| Span::new(start, gap_end))
    }

    /// Add `span`, coalescing it with every span it overlaps or touches.
    pub fn remember(&mut self, span: Span) {
        let lo = self.spans.partition_point(|s| s.end < span.start);
        let hi = self.spans.partition_point(|s| s.start <= span.end);
        let merged = self.spans[lo..hi].iter().fold(span, |acc, s| Span {
            start: acc.start.min(s.start),
            end: acc.end.max(s.end),
        });
        self.spans.splice(lo..hi, [merged]);
    }
}

/// Per-service bookkeeping of fetched ranges. Never performs I/O.
#[derive(Debug, Default)]
pub struct CoverageTracker {
    services: DashMap<ServiceId, CoverageSet>,
}

impl CoverageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn uncovered_range(&self, service: ServiceId, query: &Span) -> Option<Span> {
        match self.services.get(&service) {
            Some(set) => set.uncovered(query),
            None => Some(*query),
        }
    }

    /// Record `span` as fetched. Call only after the fetch for exactly this
    /// span succeeded.
    pub fn remember(&self, service: ServiceId, span: Span) {
        self.services.entry(service).or_default().remember(span);
    }

    pub fn covered(&self, service: ServiceId) -> Vec<Span> {
        self.services
            .get(&service)
            .map(|set| set.spans().to_vec())
            .unwrap_or_default()
    }

    pub fn reset(&self) {
        self.services.clear();
    }
}
