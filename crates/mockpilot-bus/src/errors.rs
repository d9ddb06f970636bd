//! Bus error types.

use thiserror::Error;

/// Failures surfaced by a [`crate::Bus`] implementation.
#[derive(Debug, Error)]
pub enum BusError {
    /// The broker cannot be reached right now.
    #[error("bus unavailable")]
    Unavailable,
    /// An established subscription was severed.
    #[error("bus connection lost")]
    ConnectionLost,
    /// The subscriber fell behind and missed messages.
    #[error("subscriber lagged, {0} messages skipped")]
    Lagged(u64),
    /// The broker shut down.
    #[error("bus closed")]
    Closed,
}

impl BusError {
    /// Whether reconnecting may help.
    #[must_use]
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Unavailable | Self::ConnectionLost)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display() {
        assert_eq!(BusError::Lagged(7).to_string(), "subscriber lagged, 7 messages skipped");
        assert_eq!(BusError::Unavailable.to_string(), "bus unavailable");
    }

    #[test]
    fn connectivity_classification() {
        assert!(BusError::Unavailable.is_connectivity());
        assert!(BusError::ConnectionLost.is_connectivity());
        assert!(!BusError::Lagged(1).is_connectivity());
        assert!(!BusError::Closed.is_connectivity());
    }
}
