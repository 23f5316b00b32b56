use itertools::Itertools;

use crate::lifecycle::WorkoutStatus;
use crate::model::{ExerciseSet, SaveError, SetRecommendation, WorkoutExercises, WorkoutState};
use crate::store::SessionStore;

/// Result of handing a finished workout to the backend save pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum SaveOutcome {
    Saved {
        workout_id: String,
    },
    /// Some of the workout landed; the rest needs a recovery attempt.
    Partial {
        workout_id: Option<String>,
        errors: Vec<SaveError>,
    },
    Failed {
        errors: Vec<SaveError>,
    },
}

/// Backend collaborator that persists a finished workout and mints the
/// durable workout id.
pub trait SavePipeline {
    fn save(&self, exercises: &WorkoutExercises, elapsed_seconds: u64) -> SaveOutcome;
}

/// Collaborator that suggests the next set's weight/reps/rest from the set
/// the user just rated. Best-effort; `None` means no suggestion.
pub trait Recommender {
    fn recommend(&self, exercise: &str, completed: &ExerciseSet, rpe: u8)
        -> Option<SetRecommendation>;
}

/// Look-ahead for the rest-timer UI.
#[derive(Debug, Clone, PartialEq)]
pub struct NextSetDetails {
    pub exercise: String,
    pub set_index: usize,
    pub set: ExerciseSet,
    /// True when the next set opens a different exercise.
    pub starts_new_exercise: bool,
}

/// Combines the raw store with the injected save and recommendation
/// collaborators, and exposes derived read-only projections. Projections are
/// pure functions of the current snapshot, never a second source of truth.
pub struct SessionFacade {
    store: SessionStore,
    save_pipeline: Box<dyn SavePipeline>,
    recommender: Box<dyn Recommender>,
}

impl SessionFacade {
    pub fn new(
        store: SessionStore,
        save_pipeline: Box<dyn SavePipeline>,
        recommender: Box<dyn Recommender>,
    ) -> Self {
        Self {
            store,
            save_pipeline,
            recommender,
        }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut SessionStore {
        &mut self.store
    }

    pub fn state(&self) -> &WorkoutState {
        self.store.state()
    }

    // ---- derived projections ----

    pub fn has_exercises(&self) -> bool {
        !self.state().exercises.is_empty()
    }

    pub fn exercise_count(&self) -> usize {
        self.state().exercises.len()
    }

    pub fn total_sets(&self) -> usize {
        self.state().exercises.iter().map(|(_, sets)| sets.len()).sum()
    }

    pub fn completed_sets(&self) -> usize {
        self.state()
            .exercises
            .iter()
            .flat_map(|(_, sets)| sets.iter())
            .filter(|set| set.completed)
            .count()
    }

    /// The exercise immediately after the focused one in insertion order.
    pub fn next_exercise_name(&self) -> Option<&str> {
        let focused = self.state().focused_exercise.as_deref()?;
        self.state().exercises.name_after(focused)
    }

    /// The set that follows the last-completed one: the next set in the same
    /// exercise, else the first set of the next exercise.
    pub fn next_set_details(&self) -> Option<NextSetDetails> {
        let state = self.state();
        let exercise = state.last_completed_exercise.as_deref()?;
        let set_index = state.last_completed_set_index?;

        let flat = state
            .exercises
            .iter()
            .flat_map(|(name, sets)| sets.iter().enumerate().map(move |(i, s)| (name, i, s)))
            .collect_vec();
        let pos = flat
            .iter()
            .position(|(name, i, _)| *name == exercise && *i == set_index)?;
        let (name, i, set) = flat.get(pos + 1)?;
        Some(NextSetDetails {
            exercise: name.to_string(),
            set_index: *i,
            set: (*set).clone(),
            starts_new_exercise: *name != exercise,
        })
    }

    // ---- composed operations ----

    /// Writes the rating, then consults the recommendation collaborator for
    /// the following set of the same exercise. The application is queued with
    /// an existence re-check, so a deletion in between stays safe.
    pub fn submit_set_rating(&mut self, rpe: u8) {
        let Some(rated) = self.store.submit_set_rating(rpe) else {
            return;
        };
        let next_index = rated.set_index + 1;
        let has_next = self
            .state()
            .exercises
            .get(&rated.exercise)
            .is_some_and(|sets| next_index < sets.len());
        if !has_next {
            return;
        }
        if let Some(rec) = self
            .recommender
            .recommend(&rated.exercise, &rated.set, rpe)
        {
            self.store
                .schedule_recommendation(&rated.exercise, next_index, rec);
        }
    }

    /// Drives the save lifecycle: saving, then saved/partial/failed from the
    /// pipeline outcome. Returns `None` when saving was not legal to begin
    /// (already warned by the store).
    pub fn save_workout(&mut self) -> Option<SaveOutcome> {
        self.store.transition_to_saving();
        if self.state().workout_status != WorkoutStatus::Saving {
            return None;
        }
        let outcome = self
            .save_pipeline
            .save(&self.state().exercises, self.state().elapsed_time_seconds);
        match &outcome {
            SaveOutcome::Saved { workout_id } => {
                self.store.set_durable_workout_id(workout_id.clone());
                self.store.transition_to_saved();
            }
            SaveOutcome::Partial { workout_id, errors } => {
                for error in errors {
                    self.store.record_save_error(error.clone());
                }
                if let Some(id) = workout_id {
                    self.store.set_durable_workout_id(id.clone());
                }
                self.store.transition_to_partial();
            }
            SaveOutcome::Failed { errors } => {
                for error in errors {
                    self.store.record_save_error(error.clone());
                }
                self.store.transition_to_failed();
            }
        }
        Some(outcome)
    }

    /// Re-attempts a failed or partial save through the recovering state.
    pub fn recover_workout(&mut self) -> Option<SaveOutcome> {
        self.store.transition_to_recovering();
        if self.state().workout_status != WorkoutStatus::Recovering {
            return None;
        }
        let outcome = self
            .save_pipeline
            .save(&self.state().exercises, self.state().elapsed_time_seconds);
        match &outcome {
            SaveOutcome::Saved { workout_id } => {
                self.store.set_durable_workout_id(workout_id.clone());
                self.store.transition_to_saved();
            }
            SaveOutcome::Partial { errors, .. } | SaveOutcome::Failed { errors } => {
                for error in errors {
                    self.store.record_save_error(error.clone());
                }
                self.store.transition_to_failed();
            }
        }
        Some(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::model::{SaveErrorKind, SetRecommendation};
    use crate::notify::RecordingNotifier;
    use crate::persist::MemorySnapshotStore;
    use crate::store::StoreConfig;
    use chrono::{Duration, Utc};
    use std::cell::{Cell, RefCell};

    struct StubPipeline {
        outcome: RefCell<SaveOutcome>,
        calls: Cell<usize>,
    }

    impl StubPipeline {
        fn saved(id: &str) -> Self {
            Self {
                outcome: RefCell::new(SaveOutcome::Saved {
                    workout_id: id.to_string(),
                }),
                calls: Cell::new(0),
            }
        }

        fn failing(message: &str) -> Self {
            Self {
                outcome: RefCell::new(SaveOutcome::Failed {
                    errors: vec![SaveError::new(
                        SaveErrorKind::Network,
                        message,
                        Utc::now(),
                        true,
                    )],
                }),
                calls: Cell::new(0),
            }
        }
    }

    impl SavePipeline for &StubPipeline {
        fn save(&self, _exercises: &WorkoutExercises, _elapsed: u64) -> SaveOutcome {
            self.calls.set(self.calls.get() + 1);
            self.outcome.borrow().clone()
        }
    }

    struct FixedRecommender(Option<SetRecommendation>);

    impl Recommender for FixedRecommender {
        fn recommend(
            &self,
            _exercise: &str,
            _completed: &ExerciseSet,
            _rpe: u8,
        ) -> Option<SetRecommendation> {
            self.0.clone()
        }
    }

    fn store_with(clock: &ManualClock) -> SessionStore {
        SessionStore::new(
            Box::new(clock.clone()),
            Box::new(MemorySnapshotStore::new()),
            Box::new(RecordingNotifier::new()),
            StoreConfig::default(),
        )
    }

    fn facade_with(
        clock: &ManualClock,
        pipeline: &'static StubPipeline,
        rec: Option<SetRecommendation>,
    ) -> SessionFacade {
        SessionFacade::new(
            store_with(clock),
            Box::new(pipeline),
            Box::new(FixedRecommender(rec)),
        )
    }

    // Tests keep a handle on the pipeline to inspect call counts, so it is
    // leaked to satisfy the facade's owned box.
    fn leak(pipeline: StubPipeline) -> &'static StubPipeline {
        Box::leak(Box::new(pipeline))
    }

    #[test]
    fn projections_follow_the_snapshot() {
        let clock = ManualClock::new(Utc::now());
        let pipeline = leak(StubPipeline::saved("w-1"));
        let mut facade = facade_with(&clock, pipeline, None);

        assert!(!facade.has_exercises());
        assert_eq!(facade.exercise_count(), 0);

        facade.store_mut().start_workout();
        facade.store_mut().add_exercise("Squat");
        facade.store_mut().add_exercise("Bench Press");
        facade.store_mut().handle_complete_set("Squat", 0, None);

        assert!(facade.has_exercises());
        assert_eq!(facade.exercise_count(), 2);
        assert_eq!(facade.total_sets(), 2);
        assert_eq!(facade.completed_sets(), 1);
    }

    #[test]
    fn next_exercise_follows_insertion_order() {
        let clock = ManualClock::new(Utc::now());
        let pipeline = leak(StubPipeline::saved("w-1"));
        let mut facade = facade_with(&clock, pipeline, None);

        facade.store_mut().start_workout();
        facade.store_mut().add_exercise("Squat");
        facade.store_mut().add_exercise("Bench Press");
        facade.store_mut().add_exercise("Deadlift");

        assert_eq!(facade.next_exercise_name(), None);
        facade.store_mut().set_focused_exercise(Some("Bench Press"), None);
        assert_eq!(facade.next_exercise_name(), Some("Deadlift"));
        facade.store_mut().set_focused_exercise(Some("Deadlift"), None);
        assert_eq!(facade.next_exercise_name(), None);
    }

    #[test]
    fn next_set_details_prefers_same_exercise() {
        let clock = ManualClock::new(Utc::now());
        let pipeline = leak(StubPipeline::saved("w-1"));
        let mut facade = facade_with(&clock, pipeline, None);

        facade.store_mut().start_workout();
        facade.store_mut().add_exercise("Squat");
        facade.store_mut().set_exercises_with(|ex| {
            let mut next = ex.clone();
            next.get_mut("Squat").unwrap().push(ExerciseSet::default_set(2));
            next
        });
        facade.store_mut().add_exercise("Bench Press");
        facade.store_mut().handle_complete_set("Squat", 0, None);

        let details = facade.next_set_details().unwrap();
        assert_eq!(details.exercise, "Squat");
        assert_eq!(details.set_index, 1);
        assert!(!details.starts_new_exercise);
    }

    #[test]
    fn next_set_details_rolls_over_to_next_exercise() {
        let clock = ManualClock::new(Utc::now());
        let pipeline = leak(StubPipeline::saved("w-1"));
        let mut facade = facade_with(&clock, pipeline, None);

        facade.store_mut().start_workout();
        facade.store_mut().add_exercise("Squat");
        facade.store_mut().add_exercise("Bench Press");
        facade.store_mut().handle_complete_set("Squat", 0, None);

        let details = facade.next_set_details().unwrap();
        assert_eq!(details.exercise, "Bench Press");
        assert_eq!(details.set_index, 0);
        assert!(details.starts_new_exercise);
    }

    #[test]
    fn next_set_details_is_none_at_the_end() {
        let clock = ManualClock::new(Utc::now());
        let pipeline = leak(StubPipeline::saved("w-1"));
        let mut facade = facade_with(&clock, pipeline, None);

        facade.store_mut().start_workout();
        facade.store_mut().add_exercise("Squat");
        facade.store_mut().handle_complete_set("Squat", 0, None);
        assert_eq!(facade.next_set_details(), None);
    }

    #[test]
    fn rating_schedules_recommendation_for_next_set() {
        let clock = ManualClock::new(Utc::now());
        let pipeline = leak(StubPipeline::saved("w-1"));
        let rec = SetRecommendation {
            weight: 57.5,
            reps: 8,
            rest_time_seconds: 90,
        };
        let mut facade = facade_with(&clock, pipeline, Some(rec));

        facade.store_mut().start_workout();
        facade.store_mut().add_exercise("Bench Press");
        facade.store_mut().set_exercises_with(|ex| {
            let mut next = ex.clone();
            next.get_mut("Bench Press").unwrap().push(ExerciseSet::default_set(2));
            next
        });
        facade.store_mut().handle_complete_set("Bench Press", 0, None);
        facade.submit_set_rating(8);
        facade.store_mut().pump_deferred();

        let sets = facade.state().exercises.get("Bench Press").unwrap();
        assert_eq!(sets[0].rpe, Some(8));
        assert_eq!(sets[1].weight, 57.5);
        assert!(sets[1].metadata.as_ref().unwrap().auto_adjusted);
    }

    #[test]
    fn rating_without_next_set_skips_recommendation() {
        let clock = ManualClock::new(Utc::now());
        let pipeline = leak(StubPipeline::saved("w-1"));
        let rec = SetRecommendation {
            weight: 100.0,
            reps: 5,
            rest_time_seconds: 120,
        };
        let mut facade = facade_with(&clock, pipeline, Some(rec));

        facade.store_mut().start_workout();
        facade.store_mut().add_exercise("Bench Press");
        facade.store_mut().handle_complete_set("Bench Press", 0, None);
        facade.submit_set_rating(9);
        facade.store_mut().pump_deferred();

        let sets = facade.state().exercises.get("Bench Press").unwrap();
        assert_eq!(sets[0].weight, 0.0);
    }

    #[test]
    fn successful_save_lands_on_saved_with_durable_id() {
        let clock = ManualClock::new(Utc::now());
        let pipeline = leak(StubPipeline::saved("durable-42"));
        let mut facade = facade_with(&clock, pipeline, None);

        facade.store_mut().start_workout();
        facade.store_mut().add_exercise("Squat");
        let outcome = facade.save_workout().unwrap();

        assert_eq!(
            outcome,
            SaveOutcome::Saved {
                workout_id: "durable-42".into()
            }
        );
        let state = facade.state();
        assert_eq!(state.workout_status, WorkoutStatus::Saved);
        assert_eq!(state.workout_id.as_deref(), Some("durable-42"));
        assert!(!state.is_active);
        assert_eq!(pipeline.calls.get(), 1);
    }

    #[test]
    fn save_from_idle_is_rejected_without_calling_pipeline() {
        let clock = ManualClock::new(Utc::now());
        let pipeline = leak(StubPipeline::saved("w-1"));
        let mut facade = facade_with(&clock, pipeline, None);

        assert!(facade.save_workout().is_none());
        assert_eq!(facade.state().workout_status, WorkoutStatus::Idle);
        assert_eq!(pipeline.calls.get(), 0);
    }

    #[test]
    fn failed_save_records_errors_and_recovers() {
        let clock = ManualClock::new(Utc::now());
        let pipeline = leak(StubPipeline::failing("backend unreachable"));
        let mut facade = facade_with(&clock, pipeline, None);

        facade.store_mut().start_workout();
        facade.store_mut().add_exercise("Squat");
        facade.save_workout();

        let state = facade.state();
        assert_eq!(state.workout_status, WorkoutStatus::Failed);
        assert_eq!(state.saving_errors.len(), 1);
        assert_eq!(state.saving_errors[0].kind, SaveErrorKind::Network);
        assert!(state.saving_errors[0].recoverable);

        // The backend comes back; recovery re-attempts the save.
        *pipeline.outcome.borrow_mut() = SaveOutcome::Saved {
            workout_id: "durable-7".into(),
        };
        let outcome = facade.recover_workout().unwrap();
        assert!(matches!(outcome, SaveOutcome::Saved { .. }));
        assert_eq!(facade.state().workout_status, WorkoutStatus::Saved);
    }

    #[test]
    fn partial_save_keeps_partial_status_until_recovery() {
        let clock = ManualClock::new(Utc::now());
        let pipeline = leak(StubPipeline::saved("w-1"));
        *pipeline.outcome.borrow_mut() = SaveOutcome::Partial {
            workout_id: Some("partial-3".into()),
            errors: vec![SaveError::new(
                SaveErrorKind::Database,
                "two sets rejected",
                Utc::now(),
                true,
            )],
        };
        let mut facade = facade_with(&clock, pipeline, None);

        facade.store_mut().start_workout();
        facade.store_mut().add_exercise("Squat");
        facade.save_workout();

        let state = facade.state();
        assert_eq!(state.workout_status, WorkoutStatus::Partial);
        assert_eq!(state.workout_id.as_deref(), Some("partial-3"));
        assert_eq!(state.saving_errors.len(), 1);
    }

    #[test]
    fn saved_state_resets_after_the_grace_window() {
        let clock = ManualClock::new(Utc::now());
        let pipeline = leak(StubPipeline::saved("w-9"));
        let mut facade = facade_with(&clock, pipeline, None);

        facade.store_mut().start_workout();
        facade.store_mut().add_exercise("Squat");
        facade.save_workout();
        assert_eq!(facade.state().workout_status, WorkoutStatus::Saved);

        clock.advance(Duration::milliseconds(2500));
        facade.store_mut().pump_deferred();
        assert_eq!(facade.state().workout_status, WorkoutStatus::Idle);
        assert!(facade.state().exercises.is_empty());
    }
}
