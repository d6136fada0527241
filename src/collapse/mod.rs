pub(crate) mod common;

pub(crate) mod util;

/// Stack collapsing for the output of [`dtrace`](https://illumos.org/books/dtrace/).
pub mod dtrace;

/// Attempts to use whichever [`Collapse`] implementation is appropriate for a given input.
pub mod guess;

/// Stack collapsing for the output of [`perf script`](https://linux.die.net/man/1/perf-script).
pub mod perf;

/// Collapsing of already-folded stacks that contain directly recursive frames.
pub mod recursive;

/// Stack collapsing for the output of [`sample`](https://developer.apple.com/library/archive/documentation/Performance/Conceptual/ManagingMemory/Articles/VMPages.html) on macOS.
pub mod sample;

/// Stack collapsing for CSV reports exported by [`VTune`](https://www.intel.com/content/www/us/en/developer/tools/oneapi/vtune-profiler.html).
pub mod vtune;

/// Stack collapsing for XML traces exported by [`xctrace`](https://developer.apple.com/documentation/xcode/instruments) (Xcode Instruments).
pub mod xctrace;

use std::fs::File;
use std::io;
use std::path::Path;

use crate::error::Result;

use self::common::CAPACITY_READER;

/// The abstract behavior of stack collapsing.
///
/// Implementors take the stack traces produced by a particular profiler's
/// output (like `perf script`) and write lines in the folded stack format
/// consumed by [`crate::flamegraph`].
///
/// A collapser is a streaming, single-pass consumer: one call to
/// [`Collapse::collapse`] reads the provided reader to EOF and writes the
/// aggregated folded stacks. The collapser's internal state is reset on
/// completion, so an instance may be reused for further inputs.
pub trait Collapse {
    /// Collapses the contents of the provided `reader` and writes folded
    /// stack lines to the provided `writer`.
    fn collapse<R, W>(&mut self, reader: R, writer: W) -> Result<()>
    where
        R: io::BufRead,
        W: io::Write;

    /// Collapses the contents of the provided file (or of STDIN if `infile`
    /// is `None`) and writes folded stack lines to the provided `writer`.
    fn collapse_file<P, W>(&mut self, infile: Option<P>, writer: W) -> Result<()>
    where
        P: AsRef<Path>,
        W: io::Write,
    {
        match infile {
            Some(ref path) => {
                let file = File::open(path)?;
                let reader = io::BufReader::with_capacity(CAPACITY_READER, file);
                self.collapse(reader, writer)
            }
            None => {
                let stdio = io::stdin();
                let stdio_guard = stdio.lock();
                let reader = io::BufReader::with_capacity(CAPACITY_READER, stdio_guard);
                self.collapse(reader, writer)
            }
        }
    }

    /// Returns whether this implementation can parse the given input,
    /// judged from a prefix of it.
    ///
    /// The prefix handed over by the [`guess`] collapser is large enough
    /// (up to 64 KiB) to distinguish the supported formats from each other.
    fn is_applicable(&mut self, input: &str) -> bool;
}
