pub(crate) use anyhow::Error;
use std::fmt::Display;

pub type Result<T = (), E = Error> = core::result::Result<T, E>;

/// An error indicating that we attempted to initialise global state that can only be initialised
/// once.
#[derive(Debug, Clone, Copy)]
pub struct AlreadyInitialised;

/// Like debug_assert, but bails instead of panicking.
///
/// Returning an error often allows us to give more context as to what we were trying to do, e.g.
/// which section we were processing, whereas a panic just gives us a function backtrace, which is
/// less useful.
#[macro_export]
macro_rules! debug_assert_bail {
    ($e:expr, $($rest:tt)*) => {
        if cfg!(debug_assertions) && !$e {
            anyhow::bail!($($rest)*);
        }
    };
}

/// Prints the supplied error, then terminates the process with a failure status.
pub fn report_error_and_exit(error: &anyhow::Error) -> ! {
    eprintln!("riffle: error: {error:?}");
    std::process::exit(1);
}

impl Display for AlreadyInitialised {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Attempted to initialise global state more than once")
    }
}

impl core::error::Error for AlreadyInitialised {}
