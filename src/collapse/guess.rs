use std::io::{self, BufRead, Read};

use log::info;

use super::{dtrace, perf, recursive, sample, vtune, xctrace, Collapse};
use crate::error::{Error, Result};

/// How much of the input is buffered for format sniffing.
const SNIFF_BYTES: usize = 64 * 1024;

/// `guess` folder configuration options.
///
/// There are none; the type exists so the constructors line up with the
/// other collapsers.
#[derive(Clone, Debug, Default)]
pub struct Options {}

/// A collapser that asks each supported format whether it recognizes the
/// input, then delegates to the first one that does.
///
/// When none does, [`Error::UnknownFormat`] is returned and nothing is
/// written.
#[derive(Default)]
pub struct Folder {
    #[allow(dead_code)]
    opt: Options,
}

impl From<Options> for Folder {
    fn from(opt: Options) -> Self {
        Self { opt }
    }
}

impl Collapse for Folder {
    fn collapse<R, W>(&mut self, mut reader: R, writer: W) -> Result<()>
    where
        R: io::BufRead,
        W: io::Write,
    {
        // Buffer a prefix large enough to tell the formats apart, then hand
        // `prefix ++ remainder` to whichever collapser claims it.
        let mut sniff = Vec::with_capacity(SNIFF_BYTES);
        while sniff.len() < SNIFF_BYTES {
            let n = reader.read_until(b'\n', &mut sniff)?;
            if n == 0 {
                break;
            }
        }
        let sample_str = String::from_utf8_lossy(&sniff);

        macro_rules! try_collapse_impl {
            ($module:ident) => {{
                let mut folder = $module::Folder::default();
                if folder.is_applicable(&sample_str) {
                    info!("Using {} collapser", stringify!($module));
                    drop(sample_str);
                    let chained = io::Cursor::new(sniff).chain(reader);
                    return folder.collapse(chained, writer);
                }
            }};
        }

        // Folded input is the most permissive sniff, so `recursive` is asked
        // last.
        try_collapse_impl!(perf);
        try_collapse_impl!(dtrace);
        try_collapse_impl!(sample);
        try_collapse_impl!(vtune);
        try_collapse_impl!(xctrace);
        try_collapse_impl!(recursive);

        Err(Error::UnknownFormat)
    }

    fn is_applicable(&mut self, _input: &str) -> bool {
        unreachable!("guess is never a guess candidate itself")
    }
}
