//! Failure taxonomy of the driver.
//!
//! Nothing here crosses the public API as an error value: tick-driven
//! operations surface failures as booleans, counters and state transitions.
//! The enums exist so that the transmit pipeline and the bearer sequences
//! can say *why* a step failed on their way into those counters.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum GenericError {
    Clock,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// Transaction finished without an `OK`, or with an `ERROR` token.
    ErrorResponse,
    /// The `>` body prompt never appeared after a send command.
    Prompt,
    /// Handshake completed but no `+CMGS:` confirmation was observed.
    Unconfirmed,
    /// `AT+CSCA?` produced no service-center number.
    NoSmsc,
    /// The bearer never obtained a local IP address.
    NoIp,
    /// `AT+CIPSTART` did not report `CONNECT OK`.
    ConnectFailed,

    // Generic shared errors, e.g. from the host clock
    Generic(GenericError),
}

impl From<GenericError> for Error {
    fn from(e: GenericError) -> Self {
        Error::Generic(e)
    }
}

/// Map a host clock error into the shared taxonomy.
pub(crate) fn from_clock<E>(_: E) -> Error {
    Error::Generic(GenericError::Clock)
}
