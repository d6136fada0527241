use std::fmt;
use std::io;

use thiserror::Error;

/// The errors produced by this crate.
///
/// Collapsers recover locally from lines they merely cannot make sense of
/// (those are skipped with a logged warning); only violations that would
/// desynchronize a parser's state machine surface as [`Error::MalformedInput`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A reader or writer failed.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// The input violated the structure of its format in a way the parser
    /// cannot recover from.
    #[error("{}", MalformedDisplay(.line, .msg))]
    MalformedInput {
        /// One-based line number of the offending input, when cheaply known.
        line: Option<usize>,
        /// What was wrong with it.
        msg: String,
    },

    /// No known profiler format matched the input.
    #[error("unable to find an applicable collapser for the input")]
    UnknownFormat,

    /// The folded input summed to zero samples, so there is nothing to draw.
    #[error("no stack counts found")]
    EmptyProfile,

    /// An invalid option or option combination was supplied.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

struct MalformedDisplay<'a>(&'a Option<usize>, &'a String);

impl fmt::Display for MalformedDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(line) => write!(f, "malformed input (line {}): {}", line, self.1),
            None => write!(f, "malformed input: {}", self.1),
        }
    }
}

impl From<quick_xml::Error> for Error {
    fn from(e: quick_xml::Error) -> Self {
        match e {
            quick_xml::Error::Io(io) => Error::Io(io),
            other => Error::MalformedInput {
                line: None,
                msg: other.to_string(),
            },
        }
    }
}

/// A `Result` alias where the `Err` case is [`enum@Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Builds an [`Error::MalformedInput`] from format arguments.
macro_rules! malformed {
    ($($arg:tt)*) => {
        crate::error::Error::MalformedInput {
            line: None,
            msg: format!($($arg)*),
        }
    };
}
pub(crate) use malformed;
