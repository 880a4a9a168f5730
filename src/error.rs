use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// All errors the crate can surface to a user.
///
/// `InvalidArguments` is raised when a DSL function receives arguments of the
/// wrong arity or type. `Meson` is raised for semantic rule violations
/// (unknown language, unknown method on a typed object, object not callable).
/// `Internal` means a compiler invariant was violated and is always a bug.
#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    InvalidArguments(String),

    #[error("{0}")]
    Meson(String),

    #[error("{file}:{line}:{column}: {message}")]
    Parse {
        file: String,
        line: usize,
        column: usize,
        message: String,
    },

    #[error("internal invariant violated: {0}")]
    Internal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn invalid_arguments(message: impl Into<String>) -> Self {
        Self::InvalidArguments(message.into())
    }

    pub fn meson(message: impl Into<String>) -> Self {
        Self::Meson(message.into())
    }
}
