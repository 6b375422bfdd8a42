//! Core business logic for tally.
//!
//! Votes enter through [`VoteService`], which persists them and hands a
//! [`VoteEvent`] to the [`AggregationEngine`]. The engine debounces full
//! recounts and publishes snapshots through [`SnapshotHub`] for the
//! [`ResultsService`] and live subscribers.

pub mod clock;
pub mod services;

pub use clock::Clock;
pub use services::*;
