// Workout session state engine: a persisted, self-repairing state container
// for one active workout. UI, charts and backend saves live elsewhere and
// talk to this crate through the store actions and the facade projections.
pub mod clock;
pub mod facade;
pub mod lifecycle;
pub mod model;
pub mod notify;
pub mod persist;
pub mod repair;
pub mod store;
pub mod validate;
