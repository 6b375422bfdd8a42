//! Business logic services.

pub mod admin;
pub mod aggregation;
pub mod ingest;
pub mod question;
pub mod results;
pub mod snapshot_publisher;
mod timeout;

pub use admin::AdminService;
pub use aggregation::{
    decide, AggregationEngine, Decision, EngineSettings, FireOutcome, RecountOutcome, Recovery,
    VoteEvent, VoteOutcome,
};
pub use ingest::VoteService;
pub use question::{QuestionService, UpdateQuestionInput};
pub use results::{ChoiceResult, QuestionResult, ResultsService, SnapshotHub};
pub use snapshot_publisher::{NoOpSnapshotPublisher, SnapshotPublisher};
