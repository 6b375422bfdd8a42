//! Database entities.

pub mod aggregate_snapshot;
pub mod aggregation_control;
pub mod choice_counter;
pub mod question;
pub mod response;

pub use aggregate_snapshot::Entity as AggregateSnapshot;
pub use aggregation_control::Entity as AggregationControl;
pub use choice_counter::Entity as ChoiceCounter;
pub use question::Entity as Question;
pub use response::Entity as Response;
