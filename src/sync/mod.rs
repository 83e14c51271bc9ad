mod engine;
mod queue;
mod remote;
#[cfg(test)]
pub(crate) mod testing;

pub use engine::{SubmitOutcome, SyncEngine};
pub use queue::{
    DeadLetterRetry, FilePersistence, QueueError, RetryPolicy, SyncQueue, WriteRequest,
};
pub use remote::writer_from_env;
