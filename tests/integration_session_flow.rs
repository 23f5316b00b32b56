// End-to-end session flow through the facade, headless: no UI, a manual
// clock standing in for timers and tab visibility.

use chrono::{Duration, Utc};

use liftlog::clock::ManualClock;
use liftlog::facade::{Recommender, SaveOutcome, SavePipeline, SessionFacade};
use liftlog::lifecycle::WorkoutStatus;
use liftlog::model::{ExerciseSet, PostSetFlow, SetRecommendation, WorkoutExercises};
use liftlog::notify::RecordingNotifier;
use liftlog::persist::MemorySnapshotStore;
use liftlog::store::{SessionEvent, SessionStore, StoreConfig};

struct AlwaysSaves;

impl SavePipeline for AlwaysSaves {
    fn save(&self, _exercises: &WorkoutExercises, _elapsed: u64) -> SaveOutcome {
        SaveOutcome::Saved {
            workout_id: "durable-1".into(),
        }
    }
}

struct ProgressiveOverload;

impl Recommender for ProgressiveOverload {
    fn recommend(
        &self,
        _exercise: &str,
        completed: &ExerciseSet,
        rpe: u8,
    ) -> Option<SetRecommendation> {
        let bump = if rpe <= 7 { 2.5 } else { 0.0 };
        Some(SetRecommendation {
            weight: completed.weight + bump,
            reps: completed.reps,
            rest_time_seconds: completed.rest_time_seconds,
        })
    }
}

fn harness() -> (SessionFacade, ManualClock, MemorySnapshotStore, RecordingNotifier) {
    let clock = ManualClock::new(Utc::now());
    let persistence = MemorySnapshotStore::new();
    let notifier = RecordingNotifier::new();
    let store = SessionStore::new(
        Box::new(clock.clone()),
        Box::new(persistence.clone()),
        Box::new(notifier.clone()),
        StoreConfig::default(),
    );
    let facade = SessionFacade::new(store, Box::new(AlwaysSaves), Box::new(ProgressiveOverload));
    (facade, clock, persistence, notifier)
}

#[test]
fn full_session_from_start_to_debounced_end_offer() {
    let (mut facade, clock, _, _) = harness();

    facade.store_mut().start_workout();
    facade.store_mut().add_exercise("Bench Press");

    let sets = facade.state().exercises.get("Bench Press").unwrap();
    assert_eq!(sets.len(), 1);
    assert_eq!(
        (sets[0].weight, sets[0].reps, sets[0].rest_time_seconds),
        (0.0, 10, 60)
    );
    assert!(!sets[0].completed);
    assert_eq!(sets[0].set_number, 1);

    facade.store_mut().handle_complete_set("Bench Press", 0, None);
    assert!(facade.state().exercises.get("Bench Press").unwrap()[0].completed);
    assert_eq!(
        facade.state().last_completed_exercise.as_deref(),
        Some("Bench Press")
    );

    // The rating flow arrives on a later pump, as its own commit.
    clock.advance(Duration::milliseconds(200));
    facade.store_mut().pump_deferred();
    assert_eq!(facade.state().post_set_flow, PostSetFlow::Rating);

    facade.submit_set_rating(8);
    assert_eq!(
        facade.state().exercises.get("Bench Press").unwrap()[0].rpe,
        Some(8)
    );
    assert_eq!(facade.state().post_set_flow, PostSetFlow::Resting);

    facade.store_mut().delete_exercise("Bench Press");
    assert!(facade.state().exercises.is_empty());

    clock.advance(Duration::milliseconds(600));
    facade.store_mut().pump_deferred();
    let events = facade.store_mut().take_events();
    assert_eq!(
        events
            .iter()
            .filter(|e| **e == SessionEvent::EndWorkoutOffered)
            .count(),
        1
    );

    // The offer does not repeat on later pumps.
    facade.store_mut().pump_deferred();
    assert!(facade.store_mut().take_events().is_empty());
}

#[test]
fn session_survives_a_restart_via_the_snapshot() {
    let clock = ManualClock::new(Utc::now());
    let persistence = MemorySnapshotStore::new();
    let notifier = RecordingNotifier::new();

    let mut store = SessionStore::new(
        Box::new(clock.clone()),
        Box::new(persistence.clone()),
        Box::new(notifier.clone()),
        StoreConfig::default(),
    );
    store.start_workout();
    store.add_exercise("Squat");
    store.handle_complete_set("Squat", 0, Some(7));
    let before = store.state().clone();
    drop(store);

    // "Reload": a fresh store picks the snapshot back up.
    let revived = SessionStore::new(
        Box::new(clock),
        Box::new(persistence),
        Box::new(notifier),
        StoreConfig::default(),
    );
    assert_eq!(*revived.state(), before);
    assert!(revived.state().is_active);
}

#[test]
fn stale_snapshot_from_yesterday_is_cleaned_up_on_load() {
    let clock = ManualClock::new(Utc::now());
    let persistence = MemorySnapshotStore::new();
    let notifier = RecordingNotifier::new();

    let mut store = SessionStore::new(
        Box::new(clock.clone()),
        Box::new(persistence.clone()),
        Box::new(notifier.clone()),
        StoreConfig::default(),
    );
    store.start_workout();
    store.add_exercise("Squat");
    drop(store);

    // A day later the app starts again with the same snapshot on disk.
    clock.advance(Duration::hours(25));
    let mut revived = SessionStore::new(
        Box::new(clock),
        Box::new(persistence.clone()),
        Box::new(notifier.clone()),
        StoreConfig::default(),
    );
    assert!(revived.detect_and_cleanup_zombie_workout());
    assert!(!revived.state().is_active);
    assert!(persistence.persisted().is_none());
    assert!(!notifier.warnings().is_empty());
}

#[test]
fn rating_feeds_the_next_set_through_the_recommender() {
    let (mut facade, clock, _, _) = harness();

    facade.store_mut().start_workout();
    facade.store_mut().add_exercise("Squat");
    facade.store_mut().set_exercises_with(|ex| {
        let mut next = ex.clone();
        let sets = next.get_mut("Squat").unwrap();
        sets[0].weight = 100.0;
        sets.push(ExerciseSet {
            weight: 100.0,
            ..ExerciseSet::default_set(2)
        });
        next
    });

    facade.store_mut().handle_complete_set("Squat", 0, None);
    clock.advance(Duration::milliseconds(200));
    facade.store_mut().pump_deferred();

    // An easy set: the recommender bumps the next one.
    facade.submit_set_rating(6);
    facade.store_mut().pump_deferred();

    let sets = facade.state().exercises.get("Squat").unwrap();
    assert_eq!(sets[1].weight, 102.5);
    let meta = sets[1].metadata.as_ref().unwrap();
    assert!(meta.auto_adjusted);
    assert_eq!(meta.previous_weight, Some(100.0));
}

#[test]
fn save_then_automatic_reset_completes_the_lifecycle() {
    let (mut facade, clock, persistence, _) = harness();

    facade.store_mut().start_workout();
    facade.store_mut().add_exercise("Deadlift");
    facade.store_mut().handle_complete_set("Deadlift", 0, Some(9));

    // A few ticks of workout time.
    for _ in 0..5 {
        facade.store_mut().tick();
    }
    assert_eq!(facade.state().elapsed_time_seconds, 5);

    let outcome = facade.save_workout().unwrap();
    assert!(matches!(outcome, SaveOutcome::Saved { .. }));
    assert_eq!(facade.state().workout_status, WorkoutStatus::Saved);
    assert_eq!(facade.state().workout_id.as_deref(), Some("durable-1"));
    assert!(!facade.state().is_active);

    // Shortly after, the session resets itself and the snapshot is erased.
    clock.advance(Duration::seconds(3));
    facade.store_mut().pump_deferred();
    assert_eq!(facade.state().workout_status, WorkoutStatus::Idle);
    assert!(facade.state().exercises.is_empty());
    assert!(persistence.persisted().is_none());
}

#[test]
fn double_save_click_does_not_break_the_lifecycle() {
    let (mut facade, _, _, notifier) = harness();

    facade.store_mut().start_workout();
    facade.store_mut().add_exercise("Squat");
    assert!(facade.save_workout().is_some());
    // Second click lands while already saved: rejected, not crashed.
    assert!(facade.save_workout().is_none());
    assert_eq!(facade.state().workout_status, WorkoutStatus::Saved);
    assert!(notifier
        .warnings()
        .iter()
        .any(|w| w.contains("illegal workout transition")));
}
