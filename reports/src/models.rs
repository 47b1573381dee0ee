use sqlx::FromRow;

/// One `width_bucket` slot of the demographics statement.
#[derive(Debug, Clone, FromRow)]
pub struct AgeSlotRow {
    pub slot: i32,
    pub total_listeners: i64,
    pub age_sum: i64,
}

/// Per-table row counts, used by the store inspection command.
#[derive(Debug, Clone, Default, FromRow, serde::Serialize)]
pub struct CollectionCounts {
    pub users: i64,
    pub songs: i64,
    pub streams: i64,
}
