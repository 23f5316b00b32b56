use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::lifecycle::{is_valid_transition, WorkoutStatus};
use crate::model::{
    ExerciseSet, PostSetFlow, SaveError, SetMetadata, SetRecommendation, WorkoutExercises,
    WorkoutState,
};
use crate::notify::{LogNotifier, NoticeKind, Notifier};
use crate::persist::{FileSnapshotStore, SnapshotStore};
use crate::repair::repair_exercises;
use crate::validate::{is_zombie, validate, ValidationConfig, ValidationReport};

/// Tuning knobs for the store's cooperative scheduling.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub validation: ValidationConfig,
    /// Debounce before offering to end an emptied workout, so a
    /// delete-then-re-add does not flash a reset prompt.
    pub end_offer_debounce: Duration,
    /// Delay before verifying an exercise actually landed in the map.
    pub add_verify_delay: Duration,
    /// Gap between a set completion commit and the rating-flow commit.
    pub post_set_flow_delay: Duration,
    /// How long the UI gets to show the saved state before the full reset.
    pub saved_reset_delay: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            validation: ValidationConfig::default(),
            end_offer_debounce: Duration::milliseconds(500),
            add_verify_delay: Duration::milliseconds(300),
            post_set_flow_delay: Duration::milliseconds(150),
            saved_reset_delay: Duration::milliseconds(2000),
        }
    }
}

/// Knobs for one validation pass.
#[derive(Debug, Clone, Copy)]
pub struct ValidationOptions {
    pub show_notifications: bool,
    pub attempt_repair: bool,
}

impl Default for ValidationOptions {
    fn default() -> Self {
        Self {
            show_notifications: true,
            attempt_repair: true,
        }
    }
}

/// Host-facing happenings that are not plain state changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The workout has been empty past the debounce window; the host should
    /// ask the user whether to end it.
    EndWorkoutOffered,
    RecommendationApplied { exercise: String, set_index: usize },
}

/// The set a rating was just written to, handed back so the facade can
/// consult the recommendation collaborator.
#[derive(Debug, Clone, PartialEq)]
pub struct RatedSet {
    pub exercise: String,
    pub set_index: usize,
    pub set: ExerciseSet,
}

#[derive(Debug, Clone)]
enum DeferredAction {
    EnterRatingFlow { exercise: String, set_index: usize },
    OfferEndWorkout { token: u64 },
    VerifyExerciseAdded { name: String },
    ResetAfterSaved,
    ApplyRecommendation {
        exercise: String,
        set_index: usize,
        rec: SetRecommendation,
    },
}

#[derive(Debug, Clone)]
struct Deferred {
    due: DateTime<Utc>,
    action: DeferredAction,
}

/// Drops exercise pointers that no longer resolve against the map.
fn clear_dangling_pointers(s: &mut WorkoutState) {
    let active_ok = s
        .active_exercise
        .as_deref()
        .map_or(true, |n| s.exercises.contains(n));
    if !active_ok {
        s.active_exercise = None;
    }
    let focused_ok = s
        .focused_exercise
        .as_deref()
        .map_or(true, |n| s.exercises.contains(n));
    if !focused_ok {
        s.focused_exercise = None;
        s.focused_set_index = None;
    }
    let last_ok = s
        .last_completed_exercise
        .as_deref()
        .map_or(true, |n| s.exercises.contains(n));
    if !last_ok {
        s.last_completed_exercise = None;
        s.last_completed_set_index = None;
    }
}

/// The canonical, persisted session container.
///
/// Every action reads the current snapshot, computes the full next snapshot
/// and commits it as one atomic replace; observers never see a half-updated
/// state. Actions never panic: they succeed, no-op with a warning, or
/// escalate to a full reset.
pub struct SessionStore {
    state: WorkoutState,
    config: StoreConfig,
    clock: Box<dyn Clock>,
    persistence: Box<dyn SnapshotStore>,
    notifier: Box<dyn Notifier>,
    observers: Vec<Box<dyn Fn(&WorkoutState)>>,
    deferred: Vec<Deferred>,
    events: Vec<SessionEvent>,
    /// Bumped whenever a pending end-workout offer must be cancelled.
    end_offer_token: u64,
}

impl SessionStore {
    pub fn new(
        clock: Box<dyn Clock>,
        persistence: Box<dyn SnapshotStore>,
        notifier: Box<dyn Notifier>,
        config: StoreConfig,
    ) -> Self {
        let now = clock.now();
        let state = persistence.load().unwrap_or_else(|| WorkoutState::idle(now));
        Self {
            state,
            config,
            clock,
            persistence,
            notifier,
            observers: Vec::new(),
            deferred: Vec::new(),
            events: Vec::new(),
            end_offer_token: 0,
        }
    }

    /// Production store: system clock, platform data dir, log-backed notices.
    pub fn open() -> Self {
        Self::new(
            Box::new(SystemClock),
            Box::new(FileSnapshotStore::new()),
            Box::new(LogNotifier),
            StoreConfig::default(),
        )
    }

    pub fn state(&self) -> &WorkoutState {
        &self.state
    }

    pub fn subscribe(&mut self, observer: impl Fn(&WorkoutState) + 'static) {
        self.observers.push(Box::new(observer));
    }

    /// Drains host-facing events accumulated since the last call.
    pub fn take_events(&mut self) -> Vec<SessionEvent> {
        std::mem::take(&mut self.events)
    }

    #[cfg(test)]
    fn pending_deferred(&self) -> usize {
        self.deferred.len()
    }

    // ---- commit machinery ----

    fn commit(&mut self, mut next: WorkoutState) {
        next.last_tab_activity = self.clock.now();
        self.state = next;
        if let Err(err) = self.persistence.save(&self.state) {
            log::warn!("failed to persist session snapshot: {err}");
        }
        for observer in &self.observers {
            observer(&self.state);
        }
    }

    /// Computes the next snapshot from a copy of the current one and commits
    /// it atomically.
    pub fn set_state(&mut self, update: impl FnOnce(&mut WorkoutState)) {
        let mut next = self.state.clone();
        update(&mut next);
        self.commit(next);
    }

    fn schedule(&mut self, delay: Duration, action: DeferredAction) {
        self.deferred.push(Deferred {
            due: self.clock.now() + delay,
            action,
        });
    }

    fn warn(&self, message: String) {
        log::warn!("{message}");
        self.notifier.notify(NoticeKind::Warning, &message);
    }

    /// Legality gate for every status change. Illegal requests surface a
    /// warning and leave the snapshot untouched; UI races must not crash.
    fn check_transition(&self, to: WorkoutStatus) -> bool {
        let from = self.state.workout_status;
        if is_valid_transition(from, to) {
            true
        } else {
            self.warn(format!("ignoring illegal workout transition {from} -> {to}"));
            false
        }
    }

    // ---- exercise map actions ----

    /// Replaces the exercise map wholesale. No inline validation; callers
    /// invoke `run_workout_validation` explicitly.
    pub fn set_exercises(&mut self, next: WorkoutExercises) {
        self.set_state(|s| s.exercises = next);
    }

    /// Same as `set_exercises`, but from a pure updater over the previous map.
    pub fn set_exercises_with(
        &mut self,
        update: impl FnOnce(&WorkoutExercises) -> WorkoutExercises,
    ) {
        let next = update(&self.state.exercises);
        self.set_exercises(next);
    }

    /// Adds an exercise seeded with one default set. No-op if the name is
    /// already present. A deferred check verifies the insert actually stuck.
    pub fn add_exercise(&mut self, name: &str) {
        if self.state.exercises.contains(name) {
            log::debug!("exercise '{name}' already exists, not adding");
            return;
        }
        let seed = ExerciseSet::default_set(1);
        let owned = name.to_string();
        self.set_state(move |s| {
            s.exercises.insert(owned, vec![seed]);
        });
        // A fresh exercise cancels any pending offer to end the workout.
        self.end_offer_token += 1;
        self.schedule(
            self.config.add_verify_delay,
            DeferredAction::VerifyExerciseAdded {
                name: name.to_string(),
            },
        );
    }

    pub fn delete_exercise(&mut self, name: &str) {
        if !self.state.exercises.contains(name) {
            log::debug!("exercise '{name}' does not exist, nothing to delete");
            return;
        }
        let owned = name.to_string();
        self.set_state(move |s| {
            s.exercises.remove(&owned);
            if s.active_exercise.as_deref() == Some(owned.as_str()) {
                s.active_exercise = None;
            }
            if s.focused_exercise.as_deref() == Some(owned.as_str()) {
                s.focused_exercise = None;
                s.focused_set_index = None;
            }
            if s.last_completed_exercise.as_deref() == Some(owned.as_str()) {
                s.last_completed_exercise = None;
                s.last_completed_set_index = None;
            }
        });
        if self.state.exercises.is_empty() && self.state.is_active {
            let token = self.end_offer_token;
            self.schedule(
                self.config.end_offer_debounce,
                DeferredAction::OfferEndWorkout { token },
            );
        }
    }

    pub fn set_active_exercise(&mut self, name: Option<&str>) {
        if let Some(n) = name {
            if !self.state.exercises.contains(n) {
                self.warn(format!("cannot activate unknown exercise '{n}'"));
                return;
            }
        }
        let owned = name.map(str::to_string);
        self.set_state(|s| s.active_exercise = owned);
    }

    pub fn set_focused_exercise(&mut self, name: Option<&str>, set_index: Option<usize>) {
        if let Some(n) = name {
            if !self.state.exercises.contains(n) {
                self.warn(format!("cannot focus unknown exercise '{n}'"));
                return;
            }
        }
        let owned = name.map(str::to_string);
        self.set_state(|s| {
            s.focused_set_index = if owned.is_some() { set_index } else { None };
            s.focused_exercise = owned;
        });
    }

    // ---- set completion and rating ----

    /// Marks a set complete and records it as the last-completed set. The
    /// rating flow starts on a later pump so the completion write and the
    /// flow transition are two observably separate commits.
    pub fn handle_complete_set(&mut self, exercise: &str, set_index: usize, rpe: Option<u8>) {
        let Some(sets) = self.state.exercises.get(exercise) else {
            self.warn(format!("cannot complete a set of unknown exercise '{exercise}'"));
            return;
        };
        if set_index >= sets.len() {
            self.warn(format!(
                "cannot complete set {set_index} of '{exercise}', only {} sets exist",
                sets.len()
            ));
            return;
        }
        let rpe = match rpe {
            Some(r) if !(1..=10).contains(&r) => {
                log::warn!("dropping out-of-range RPE {r} for '{exercise}'");
                None
            }
            other => other,
        };
        let owned = exercise.to_string();
        self.set_state(move |s| {
            if let Some(sets) = s.exercises.get_mut(&owned) {
                if let Some(set) = sets.get_mut(set_index) {
                    set.completed = true;
                    set.is_editing = false;
                    if rpe.is_some() {
                        set.rpe = rpe;
                    }
                }
            }
            s.last_completed_exercise = Some(owned.clone());
            s.last_completed_set_index = Some(set_index);
        });
        self.schedule(
            self.config.post_set_flow_delay,
            DeferredAction::EnterRatingFlow {
                exercise: exercise.to_string(),
                set_index,
            },
        );
    }

    /// Writes an RPE onto the last-completed set and moves the post-set flow
    /// to resting. Returns the rated set so the facade can ask the
    /// recommendation collaborator about the next one.
    pub fn submit_set_rating(&mut self, rpe: u8) -> Option<RatedSet> {
        if !(1..=10).contains(&rpe) {
            self.warn(format!("ignoring out-of-range RPE {rpe}"));
            return None;
        }
        let exercise = self.state.last_completed_exercise.clone()?;
        let set_index = self.state.last_completed_set_index?;
        let exists = self
            .state
            .exercises
            .get(&exercise)
            .is_some_and(|sets| set_index < sets.len());
        if !exists {
            log::debug!("last-completed set of '{exercise}' no longer exists, dropping rating");
            return None;
        }
        let owned = exercise.clone();
        self.set_state(move |s| {
            if let Some(sets) = s.exercises.get_mut(&owned) {
                if let Some(set) = sets.get_mut(set_index) {
                    set.rpe = Some(rpe);
                }
            }
            s.post_set_flow = PostSetFlow::Resting;
            s.rest_timer_active = true;
        });
        let set = self.state.exercises.get(&exercise)?.get(set_index)?.clone();
        Some(RatedSet {
            exercise,
            set_index,
            set,
        })
    }

    /// Queues a recommendation to be applied on a later pump, with an
    /// existence re-check at apply time.
    pub fn schedule_recommendation(
        &mut self,
        exercise: &str,
        set_index: usize,
        rec: SetRecommendation,
    ) {
        self.schedule(
            Duration::zero(),
            DeferredAction::ApplyRecommendation {
                exercise: exercise.to_string(),
                set_index,
                rec,
            },
        );
    }

    /// Writes recommended values onto a set, remembering the previous ones.
    /// Safely no-ops if the target has disappeared in the meantime.
    pub fn apply_set_recommendation(
        &mut self,
        exercise: &str,
        set_index: usize,
        rec: &SetRecommendation,
    ) -> bool {
        let Some(sets) = self.state.exercises.get(exercise) else {
            log::debug!("recommendation target '{exercise}' is gone, skipping");
            return false;
        };
        let Some(target) = sets.get(set_index) else {
            log::debug!("recommendation target set {set_index} of '{exercise}' is gone, skipping");
            return false;
        };
        if target.completed {
            log::debug!("set {set_index} of '{exercise}' already completed, not adjusting");
            return false;
        }
        let owned = exercise.to_string();
        let rec = rec.clone();
        self.set_state(move |s| {
            if let Some(sets) = s.exercises.get_mut(&owned) {
                if let Some(set) = sets.get_mut(set_index) {
                    set.metadata = Some(SetMetadata {
                        auto_adjusted: true,
                        previous_weight: Some(set.weight),
                        previous_reps: Some(set.reps),
                    });
                    set.weight = rec.weight;
                    set.reps = rec.reps;
                    set.rest_time_seconds = rec.rest_time_seconds;
                }
            }
        });
        self.events.push(SessionEvent::RecommendationApplied {
            exercise: exercise.to_string(),
            set_index,
        });
        true
    }

    // ---- lifecycle actions ----

    pub fn start_workout(&mut self) {
        if !self.check_transition(WorkoutStatus::Active) {
            return;
        }
        let now = self.clock.now();
        self.set_state(move |s| {
            s.workout_status = WorkoutStatus::Active;
            s.is_active = true;
            s.explicitly_ended = false;
            s.workout_id = Some(Uuid::new_v4().to_string());
            s.session_id = Uuid::new_v4().to_string();
            s.created_at = Some(now);
            s.start_time = Some(now);
            s.elapsed_time_seconds = 0;
            s.saving_errors.clear();
            s.post_set_flow = PostSetFlow::Idle;
        });
    }

    /// Deliberate end: back to idle, exercises preserved (unlike reset).
    pub fn end_workout(&mut self) {
        if !self.check_transition(WorkoutStatus::Idle) {
            return;
        }
        self.set_state(|s| {
            s.workout_status = WorkoutStatus::Idle;
            s.is_active = false;
            s.explicitly_ended = true;
            s.post_set_flow = PostSetFlow::Idle;
            s.rest_timer_active = false;
        });
    }

    /// Returns every field to defaults, cancels pending deferred work and
    /// erases the durable snapshot.
    pub fn reset_session(&mut self) {
        let now = self.clock.now();
        self.deferred.clear();
        self.end_offer_token += 1;
        self.state = WorkoutState::idle(now);
        if let Err(err) = self.persistence.clear() {
            log::warn!("failed to clear persisted snapshot: {err}");
        }
        for observer in &self.observers {
            observer(&self.state);
        }
    }

    pub fn set_workout_status(&mut self, to: WorkoutStatus) {
        if to == WorkoutStatus::Saved {
            self.transition_to_saved();
            return;
        }
        if self.check_transition(to) {
            self.set_state(|s| s.workout_status = to);
        }
    }

    pub fn transition_to_saving(&mut self) {
        self.set_workout_status(WorkoutStatus::Saving);
    }

    pub fn transition_to_failed(&mut self) {
        self.set_workout_status(WorkoutStatus::Failed);
    }

    pub fn transition_to_partial(&mut self) {
        self.set_workout_status(WorkoutStatus::Partial);
    }

    pub fn transition_to_recovering(&mut self) {
        self.set_workout_status(WorkoutStatus::Recovering);
    }

    /// Success terminal: deactivates the session and schedules the full
    /// reset shortly after, giving the UI a moment to show the saved state.
    pub fn transition_to_saved(&mut self) {
        if !self.check_transition(WorkoutStatus::Saved) {
            return;
        }
        self.set_state(|s| {
            s.workout_status = WorkoutStatus::Saved;
            s.is_active = false;
            s.explicitly_ended = true;
            s.post_set_flow = PostSetFlow::Idle;
            s.rest_timer_active = false;
        });
        self.schedule(self.config.saved_reset_delay, DeferredAction::ResetAfterSaved);
    }

    /// Swaps the provisional workout id for the durable one minted by the
    /// save pipeline.
    pub fn set_durable_workout_id(&mut self, id: String) {
        self.set_state(|s| s.workout_id = Some(id));
    }

    pub fn record_save_error(&mut self, error: SaveError) {
        self.set_state(|s| s.saving_errors.push(error));
    }

    // ---- misc field actions ----

    pub fn set_training_config(&mut self, config: Option<serde_json::Value>) {
        self.set_state(|s| s.training_config = config);
    }

    pub fn set_post_set_flow(&mut self, flow: PostSetFlow) {
        self.set_state(|s| s.post_set_flow = flow);
    }

    /// Asks the rest timer to restart from zero.
    pub fn trigger_rest_timer_reset(&mut self) {
        self.set_state(|s| {
            s.rest_timer_generation += 1;
            s.rest_timer_active = true;
        });
    }

    pub fn set_rest_timer_active(&mut self, active: bool) {
        self.set_state(|s| s.rest_timer_active = active);
    }

    pub fn set_elapsed_time(&mut self, seconds: u64) {
        self.set_state(|s| s.elapsed_time_seconds = seconds);
    }

    // ---- timers and deferred work ----

    /// Once-per-second heartbeat: advances elapsed time while active and
    /// drains due deferred tasks.
    pub fn tick(&mut self) {
        if self.state.is_active {
            self.set_state(|s| s.elapsed_time_seconds += 1);
        }
        self.pump_deferred();
    }

    /// Recomputes elapsed time from wall clock on tab re-focus; the ticker
    /// does not run while backgrounded, so the counter cannot be trusted.
    pub fn on_tab_visible(&mut self) {
        if self.state.is_active {
            if let Some(start) = self.state.start_time {
                let elapsed = self.clock.now().signed_duration_since(start);
                let seconds = elapsed.num_seconds().max(0) as u64;
                self.set_state(move |s| s.elapsed_time_seconds = seconds);
            }
        }
        self.pump_deferred();
    }

    /// Runs deferred tasks whose due time has passed. Tasks re-check
    /// existence before acting, so a reset or deletion in the meantime turns
    /// them into no-ops.
    pub fn pump_deferred(&mut self) {
        let now = self.clock.now();
        let pending = std::mem::take(&mut self.deferred);
        let (due, rest): (Vec<_>, Vec<_>) = pending.into_iter().partition(|d| d.due <= now);
        self.deferred = rest;
        for item in due {
            self.run_deferred(item.action);
        }
    }

    fn run_deferred(&mut self, action: DeferredAction) {
        match action {
            DeferredAction::EnterRatingFlow {
                exercise,
                set_index,
            } => {
                let still_last = self.state.last_completed_exercise.as_deref()
                    == Some(exercise.as_str())
                    && self.state.last_completed_set_index == Some(set_index);
                let exists = self
                    .state
                    .exercises
                    .get(&exercise)
                    .is_some_and(|sets| set_index < sets.len());
                // A rating submitted in the meantime has already advanced the
                // flow; the stale task must not drag it back.
                let flow_untouched = self.state.post_set_flow == PostSetFlow::Idle;
                if still_last && exists && flow_untouched {
                    self.set_state(|s| s.post_set_flow = PostSetFlow::Rating);
                }
            }
            DeferredAction::OfferEndWorkout { token } => {
                if token == self.end_offer_token
                    && self.state.exercises.is_empty()
                    && self.state.is_active
                {
                    self.events.push(SessionEvent::EndWorkoutOffered);
                }
            }
            DeferredAction::VerifyExerciseAdded { name } => {
                if !self.state.exercises.contains(&name) {
                    self.warn(format!("exercise '{name}' could not be added"));
                }
            }
            DeferredAction::ResetAfterSaved => {
                if self.state.workout_status == WorkoutStatus::Saved && !self.state.is_active {
                    self.reset_session();
                }
            }
            DeferredAction::ApplyRecommendation {
                exercise,
                set_index,
                rec,
            } => {
                self.apply_set_recommendation(&exercise, set_index, &rec);
            }
        }
    }

    // ---- validation and self-repair ----

    /// Validates the snapshot, repairing in place where possible. A zombie
    /// result escalates straight to a full reset; a repair that leaves no
    /// exercises while active does the same.
    pub fn run_workout_validation(&mut self, options: ValidationOptions) -> ValidationReport {
        let now = self.clock.now();
        let report = validate(&self.state, now, &self.config.validation);
        if report.is_valid {
            return report;
        }
        log::warn!("workout validation found issues: {:?}", report.issues);

        if report.is_zombie {
            if options.show_notifications {
                self.notifier.notify(
                    NoticeKind::Warning,
                    "your workout session was in an unrecoverable state and has been reset",
                );
            }
            self.reset_session();
            return report;
        }

        if report.needs_repair && options.attempt_repair {
            if self.state.exercises.is_empty() {
                // Nothing to rebuild, but pointers into the empty map still
                // have to go.
                self.set_state(clear_dangling_pointers);
                if options.show_notifications {
                    self.notifier
                        .notify(NoticeKind::Info, "workout data was repaired");
                }
                return report;
            }
            let repaired = repair_exercises(&self.state.exercises);
            if repaired.is_empty() && self.state.is_active {
                if options.show_notifications {
                    self.notifier.notify(
                        NoticeKind::Warning,
                        "no workout data could be recovered; the session has been reset",
                    );
                }
                self.reset_session();
                return report;
            }
            self.set_state(move |s| {
                s.exercises = repaired;
                clear_dangling_pointers(s);
            });
            if options.show_notifications {
                self.notifier
                    .notify(NoticeKind::Info, "workout data was repaired");
            }
        }
        report
    }

    /// Resets a zombie session outright. Returns whether a cleanup fired.
    pub fn detect_and_cleanup_zombie_workout(&mut self) -> bool {
        let now = self.clock.now();
        if !is_zombie(&self.state, now, &self.config.validation) {
            return false;
        }
        log::warn!("zombie workout session detected, resetting");
        self.notifier.notify(
            NoticeKind::Warning,
            "a stale workout session was found and cleared",
        );
        self.reset_session();
        true
    }
}
