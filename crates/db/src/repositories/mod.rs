//! Database repositories.

mod control;
mod counter;
mod question;
mod response;
mod snapshot;

pub use control::ControlRepository;
pub use counter::CounterRepository;
pub use question::QuestionRepository;
pub use response::ResponseRepository;
pub use snapshot::SnapshotRepository;
