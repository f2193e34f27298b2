// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

/// Represents errors that can occur in the native memory tracker.
///
/// Per §7, recording operations (`reserve`/`commit`/.../`set_tag`) are
/// strictly best-effort and never return a `Result`: allocation failure,
/// invariant violations, and tag overflow are reported through
/// [`crate::tracker::TrackerStatus`] and the `log` crate instead. This
/// type exists solely for the reporting path, which does real I/O and
/// (optionally) JSON encoding.
#[derive(Debug)]
pub enum Error {
    /// I/O error, e.g. while writing a report
    Io(std::io::Error),

    /// Serialization of a report to JSON failed
    #[cfg(feature = "json")]
    Encode(serde_json::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "NmtError: {self:?}")
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

#[cfg(feature = "json")]
impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Self::Encode(value)
    }
}

/// Tracker result
pub type Result<T> = std::result::Result<T, Error>;
