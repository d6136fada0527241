use std::io;

use log::warn;

use super::common::{Occurrences, CAPACITY_LINE};
use super::util;
use super::Collapse;
use crate::error::Result;

/// `recursive` folder configuration options.
///
/// There are none; the type exists so the constructors line up with the
/// other collapsers.
#[derive(Clone, Debug, Default)]
pub struct Options {}

/// A collapser for already-folded stacks that squashes directly recursive
/// calls.
///
/// Maximal runs of identical adjacent frames are collapsed into a single
/// occurrence, so `main;fib;fib;fib 42` becomes `main;fib 42`. Counts are
/// preserved; stacks that become identical after squashing are merged.
#[derive(Default)]
pub struct Folder {
    /// Number of times each call stack has been seen.
    occurrences: Occurrences,

    #[allow(dead_code)]
    opt: Options,
}

impl From<Options> for Folder {
    fn from(opt: Options) -> Self {
        Self {
            occurrences: Occurrences::new(),
            opt,
        }
    }
}

impl Collapse for Folder {
    fn collapse<R, W>(&mut self, mut reader: R, writer: W) -> Result<()>
    where
        R: io::BufRead,
        W: io::Write,
    {
        let mut line = String::with_capacity(CAPACITY_LINE);
        loop {
            line.clear();
            if reader.read_line(&mut line)? == 0 {
                break;
            }

            let line = util::trim_ascii(&line);
            if line.is_empty() {
                continue;
            }

            match parse_line(line) {
                Some((stack, count)) => {
                    let mut collapsed = String::with_capacity(stack.len());
                    let mut last = None;
                    for frame in stack.split(';') {
                        if last == Some(frame) {
                            continue;
                        }
                        if last.is_some() {
                            collapsed.push(';');
                        }
                        collapsed.push_str(frame);
                        last = Some(frame);
                    }
                    self.occurrences.add_owned(collapsed, count);
                }
                None => warn!("Unable to parse line: {}", line),
            }
        }

        self.occurrences.write_and_clear(writer)?;
        Ok(())
    }

    fn is_applicable(&mut self, input: &str) -> bool {
        let mut found_folded_line = false;
        for line in input.lines() {
            let line = util::trim_ascii(line);
            if line.is_empty() {
                continue;
            }
            if parse_line(line).is_none() {
                return false;
            }
            found_folded_line = true;
        }
        found_folded_line
    }
}

// Splits a folded line into its stack and count.
fn parse_line(line: &str) -> Option<(&str, u64)> {
    let sep = line.rfind(' ')?;
    let count = line[sep + 1..].parse::<u64>().ok()?;
    let stack = util::trim_ascii_end(&line[..sep]);
    if stack.is_empty() {
        return None;
    }
    Some((stack, count))
}
