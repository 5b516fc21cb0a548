use core::fmt;

/// Errors reported by task management.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// No task has the requested id.
    NotFound,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => f.write_str("no such task"),
        }
    }
}
