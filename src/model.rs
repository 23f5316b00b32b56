use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Fallback reps used when a set carries no usable rep count.
pub const DEFAULT_REPS: u32 = 10;
/// Fallback rest period in seconds.
pub const DEFAULT_REST_SECS: u32 = 60;

/// Audit trail for values the engine wrote on the user's behalf.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SetMetadata {
    pub auto_adjusted: bool,
    pub previous_weight: Option<f64>,
    pub previous_reps: Option<u32>,
}

/// One planned or performed set of an exercise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExerciseSet {
    pub weight: f64,
    pub reps: u32,
    pub rest_time_seconds: u32,
    pub completed: bool,
    /// UI-only edit flag, never meaningful across restarts.
    #[serde(default)]
    pub is_editing: bool,
    /// 1-based position within the exercise; contiguous after repair.
    pub set_number: u32,
    /// Rate of Perceived Exertion (1-10), present once the user rates the set.
    pub rpe: Option<u8>,
    pub metadata: Option<SetMetadata>,
}

impl ExerciseSet {
    /// A guaranteed-valid set, used for new exercises and as the repair base.
    pub fn default_set(set_number: u32) -> Self {
        Self {
            weight: 0.0,
            reps: DEFAULT_REPS,
            rest_time_seconds: DEFAULT_REST_SECS,
            completed: false,
            is_editing: false,
            set_number,
            rpe: None,
            metadata: Some(SetMetadata {
                auto_adjusted: true,
                previous_weight: None,
                previous_reps: None,
            }),
        }
    }
}

/// Suggested values for an upcoming set, produced by a recommendation
/// collaborator after a rating is submitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetRecommendation {
    pub weight: f64,
    pub reps: u32,
    pub rest_time_seconds: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExerciseEntry {
    pub name: String,
    pub sets: Vec<ExerciseSet>,
}

/// Insertion-ordered mapping from exercise name to its sets.
///
/// Order is meaningful (drives "next exercise" navigation), so this is a
/// vector of entries with by-name lookup rather than a hash map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct WorkoutExercises {
    entries: Vec<ExerciseEntry>,
}

impl WorkoutExercises {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.name == name)
    }

    pub fn get(&self, name: &str) -> Option<&[ExerciseSet]> {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.sets.as_slice())
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Vec<ExerciseSet>> {
        self.entries
            .iter_mut()
            .find(|e| e.name == name)
            .map(|e| &mut e.sets)
    }

    /// Inserts a new exercise, keeping insertion order. Returns false and
    /// leaves the map untouched if the name is already present.
    pub fn insert(&mut self, name: impl Into<String>, sets: Vec<ExerciseSet>) -> bool {
        let name = name.into();
        if self.contains(&name) {
            return false;
        }
        self.entries.push(ExerciseEntry { name, sets });
        true
    }

    /// Replaces the sets of an existing exercise, or appends a new entry.
    pub fn upsert(&mut self, name: impl Into<String>, sets: Vec<ExerciseSet>) {
        let name = name.into();
        match self.entries.iter_mut().find(|e| e.name == name) {
            Some(entry) => entry.sets = sets,
            None => self.entries.push(ExerciseEntry { name, sets }),
        }
    }

    pub fn remove(&mut self, name: &str) -> bool {
        match self.position(name) {
            Some(idx) => {
                self.entries.remove(idx);
                true
            }
            None => false,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[ExerciseSet])> {
        self.entries
            .iter()
            .map(|e| (e.name.as_str(), e.sets.as_slice()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    /// Name of the entry immediately after `name` in insertion order.
    pub fn name_after(&self, name: &str) -> Option<&str> {
        let idx = self.position(name)?;
        self.entries.get(idx + 1).map(|e| e.name.as_str())
    }
}

/// Where the post-set UI sequence currently stands.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, strum_macros::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PostSetFlow {
    #[default]
    Idle,
    Rating,
    Resting,
    Preparing,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SaveErrorKind {
    Network,
    Database,
    Validation,
    Unknown,
}

/// One failed attempt to persist a finished workout to the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveError {
    pub kind: SaveErrorKind,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub recoverable: bool,
}

impl SaveError {
    pub fn new(
        kind: SaveErrorKind,
        message: impl Into<String>,
        timestamp: DateTime<Utc>,
        recoverable: bool,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            timestamp,
            recoverable,
        }
    }
}

/// The full session snapshot. Mutated only by whole-value replacement in the
/// store, so observers never see a half-updated state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkoutState {
    pub exercises: WorkoutExercises,
    pub active_exercise: Option<String>,
    pub focused_exercise: Option<String>,
    pub focused_set_index: Option<usize>,
    pub elapsed_time_seconds: u64,
    pub is_active: bool,
    pub workout_status: crate::lifecycle::WorkoutStatus,
    /// Assigned at workout start, replaced by the durable id on save.
    pub workout_id: Option<String>,
    /// Opaque, regenerated each session.
    pub session_id: String,
    pub start_time: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
    /// Distinguishes a deliberate end from an ambient timeout.
    pub explicitly_ended: bool,
    pub last_tab_activity: DateTime<Utc>,
    pub saving_errors: Vec<SaveError>,
    pub post_set_flow: PostSetFlow,
    pub last_completed_exercise: Option<String>,
    pub last_completed_set_index: Option<usize>,
    /// Externally supplied, not interpreted by the engine.
    pub training_config: Option<serde_json::Value>,
    pub rest_timer_active: bool,
    /// Bumped whenever the rest timer is asked to restart from zero.
    pub rest_timer_generation: u64,
}

impl WorkoutState {
    /// Fresh idle snapshot with a newly generated session id.
    pub fn idle(now: DateTime<Utc>) -> Self {
        Self {
            exercises: WorkoutExercises::new(),
            active_exercise: None,
            focused_exercise: None,
            focused_set_index: None,
            elapsed_time_seconds: 0,
            is_active: false,
            workout_status: crate::lifecycle::WorkoutStatus::Idle,
            workout_id: None,
            session_id: uuid::Uuid::new_v4().to_string(),
            start_time: None,
            created_at: None,
            explicitly_ended: false,
            last_tab_activity: now,
            saving_errors: Vec::new(),
            post_set_flow: PostSetFlow::Idle,
            last_completed_exercise: None,
            last_completed_set_index: None,
            training_config: None,
            rest_timer_active: false,
            rest_timer_generation: 0,
        }
    }
}
