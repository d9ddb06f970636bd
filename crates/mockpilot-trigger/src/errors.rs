//! Trigger error types.

use mockpilot_core::ParseError;
use thiserror::Error;

/// Failures from the trigger engine and its service wrapper.
#[derive(Debug, Error)]
pub enum TriggerError {
    /// The event failed validation and was not buffered.
    #[error("malformed event: {0}")]
    Malformed(#[from] ParseError),
    /// The shard owning this session has stopped.
    #[error("trigger shard {0} is not running")]
    ShardStopped(usize),
}
