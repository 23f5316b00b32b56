use crate::model::{ExerciseSet, WorkoutExercises, DEFAULT_REPS, DEFAULT_REST_SECS};

fn repair_set(original: &ExerciseSet, set_number: u32) -> ExerciseSet {
    let weight = if original.weight.is_finite() && original.weight >= 0.0 {
        original.weight
    } else {
        0.0
    };
    ExerciseSet {
        weight,
        reps: if original.reps >= 1 {
            original.reps
        } else {
            DEFAULT_REPS
        },
        rest_time_seconds: if original.rest_time_seconds >= 1 {
            original.rest_time_seconds
        } else {
            DEFAULT_REST_SECS
        },
        completed: original.completed,
        is_editing: false,
        set_number,
        rpe: original.rpe.filter(|r| (1..=10).contains(r)),
        metadata: original.metadata.clone(),
    }
}

/// Best-effort reconstruction of a possibly-broken exercise map.
///
/// Exercises with no sets are dropped; every surviving set is rebuilt by
/// merging the safe defaults with whatever usable fields it had, and set
/// numbers are reassigned contiguously from 1 in list order. Never invents
/// an exercise that was not already present, never mutates the input, and
/// is idempotent.
pub fn repair_exercises(exercises: &WorkoutExercises) -> WorkoutExercises {
    let mut repaired = WorkoutExercises::new();
    for (name, sets) in exercises.iter() {
        if sets.is_empty() {
            continue;
        }
        let rebuilt = sets
            .iter()
            .enumerate()
            .map(|(i, set)| repair_set(set, (i + 1) as u32))
            .collect();
        repaired.insert(name, rebuilt);
    }
    repaired
}
