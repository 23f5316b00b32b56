use serde::{Deserialize, Serialize};

/// Save lifecycle of a workout session.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, strum_macros::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum WorkoutStatus {
    #[default]
    Idle,
    Active,
    Saving,
    Saved,
    Failed,
    Partial,
    Recovering,
}

/// Pure lookup of the legal transition table.
///
/// Illegal requests are expected under UI races (double-click save), so
/// callers treat a `false` here as a warned no-op, never a panic.
pub fn is_valid_transition(from: WorkoutStatus, to: WorkoutStatus) -> bool {
    use WorkoutStatus::*;
    matches!(
        (from, to),
        (Idle, Active)
            | (Idle, Recovering)
            | (Active, Saving)
            | (Active, Failed)
            | (Active, Idle)
            | (Saving, Saved)
            | (Saving, Failed)
            | (Saving, Partial)
            | (Saved, Idle)
            | (Failed, Saving)
            | (Failed, Idle)
            | (Failed, Recovering)
            | (Partial, Saving)
            | (Partial, Recovering)
            | (Partial, Idle)
            | (Recovering, Saved)
            | (Recovering, Failed)
            | (Recovering, Idle)
    )
}
