use chrono::{DateTime, Duration, Utc};

use crate::lifecycle::WorkoutStatus;
use crate::model::{ExerciseSet, WorkoutState};

/// Thresholds for zombie detection. Both values come from the original
/// product behavior and are deliberately configurable rather than inferred.
#[derive(Debug, Clone)]
pub struct ValidationConfig {
    /// How long an active workout may stay empty after creation.
    pub creation_grace: Duration,
    /// How stale `last_tab_activity` may be before an active session is
    /// considered abandoned.
    pub inactivity_threshold: Duration,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            creation_grace: Duration::seconds(30),
            inactivity_threshold: Duration::hours(24),
        }
    }
}

/// Outcome of a consistency pass over one snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub issues: Vec<String>,
    pub needs_repair: bool,
    /// Zombie snapshots cannot be repaired in place; the caller must reset.
    pub is_zombie: bool,
}

impl ValidationReport {
    fn valid() -> Self {
        Self {
            is_valid: true,
            issues: Vec::new(),
            needs_repair: false,
            is_zombie: false,
        }
    }
}

/// Why a snapshot can no longer be trusted.
fn zombie_reason(
    state: &WorkoutState,
    now: DateTime<Utc>,
    config: &ValidationConfig,
) -> Option<String> {
    if state.explicitly_ended && state.is_active {
        return Some("workout is marked ended but still active".into());
    }
    if state.workout_status == WorkoutStatus::Saved && state.is_active {
        return Some("workout is saved but still active".into());
    }
    if state.is_active && state.workout_id.is_none() {
        return Some("active workout has no workout id".into());
    }
    if state.is_active && state.exercises.is_empty() {
        let past_grace = match state.start_time {
            Some(start) => now.signed_duration_since(start) > config.creation_grace,
            // Active with no start time is unaccountable.
            None => true,
        };
        if past_grace {
            return Some("active workout has no exercises past the creation grace period".into());
        }
    }
    if state.is_active
        && now.signed_duration_since(state.last_tab_activity) > config.inactivity_threshold
    {
        return Some("active workout has seen no activity past the inactivity threshold".into());
    }
    None
}

/// True when the snapshot is in an impossible state that must be reset.
pub fn is_zombie(state: &WorkoutState, now: DateTime<Utc>, config: &ValidationConfig) -> bool {
    zombie_reason(state, now, config).is_some()
}

fn set_issues(exercise: &str, index: usize, set: &ExerciseSet, issues: &mut Vec<String>) {
    if !set.weight.is_finite() || set.weight < 0.0 {
        issues.push(format!("{exercise}: set {index} has an unusable weight"));
    }
    if set.reps == 0 {
        issues.push(format!("{exercise}: set {index} has zero reps"));
    }
    if set.rest_time_seconds == 0 {
        issues.push(format!("{exercise}: set {index} has no rest period"));
    }
    if let Some(rpe) = set.rpe {
        if !(1..=10).contains(&rpe) {
            issues.push(format!("{exercise}: set {index} has RPE {rpe} outside 1-10"));
        }
    }
}

/// Inspects a snapshot and reports structural problems without mutating it.
///
/// Checks run in severity order and short-circuit at the first failing
/// class: zombie, then per-set structure, then pointer references. A snapshot
/// that is saved and inactive is terminal and always valid, so validation
/// never fights the save pipeline after a success.
pub fn validate(
    state: &WorkoutState,
    now: DateTime<Utc>,
    config: &ValidationConfig,
) -> ValidationReport {
    if state.workout_status == WorkoutStatus::Saved && !state.is_active {
        return ValidationReport::valid();
    }

    if let Some(reason) = zombie_reason(state, now, config) {
        return ValidationReport {
            is_valid: false,
            issues: vec![format!("zombie session: {reason}")],
            needs_repair: true,
            is_zombie: true,
        };
    }

    let mut issues = Vec::new();
    for (name, sets) in state.exercises.iter() {
        if sets.is_empty() {
            issues.push(format!("{name}: exercise has no sets"));
            continue;
        }
        for (i, set) in sets.iter().enumerate() {
            set_issues(name, i + 1, set, &mut issues);
            if set.set_number != (i + 1) as u32 {
                issues.push(format!("{name}: set {} is numbered {}", i + 1, set.set_number));
            }
        }
    }
    if !issues.is_empty() {
        return ValidationReport {
            is_valid: false,
            issues,
            needs_repair: true,
            is_zombie: false,
        };
    }

    let mut issues = Vec::new();
    for (label, pointer) in [
        ("active exercise", &state.active_exercise),
        ("focused exercise", &state.focused_exercise),
    ] {
        if let Some(name) = pointer {
            if !state.exercises.contains(name) {
                issues.push(format!("{label} '{name}' does not exist"));
            }
        }
    }
    if !issues.is_empty() {
        return ValidationReport {
            is_valid: false,
            issues,
            needs_repair: true,
            is_zombie: false,
        };
    }

    ValidationReport::valid()
}
