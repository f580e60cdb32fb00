use crate::model::Ms;

/// Widest window a single `request_window` call may ask for (~13 months).
pub const MAX_QUERY_WINDOW_MS: Ms = 400 * 86_400_000;

/// Days a single daily-or-longer session may be expanded into.
pub const MAX_DAYS_PER_SESSION: usize = 366;

/// Stages a pipeline may be configured with.
pub const MAX_FILTER_STAGES: usize = 16;
