use std::io;

use log::warn;

use super::common::{Occurrences, CAPACITY_LINE};
use super::util;
use super::Collapse;
use crate::error::{malformed, Result};

// The data rows are preceded by a header naming these columns.
const HEADER_STACK: &str = "Function Stack";
const HEADER_TIME: &str = "CPU Time";

/// `vtune` folder configuration options.
#[derive(Clone, Debug, Default)]
pub struct Options {
    /// Don't include modules with function names.
    ///
    /// Default is `false`.
    pub no_modules: bool,
}

/// A stack collapser for CSV reports exported by VTune (`vtune -report
/// top-down -format csv`).
///
/// To construct one, either use `vtune::Folder::default()` or create an
/// [`Options`] and use `vtune::Folder::from(options)`.
#[derive(Default)]
pub struct Folder {
    /// Function entries of the report path currently being walked.
    stack: Vec<String>,

    /// Number of times each call stack has been seen.
    occurrences: Occurrences,

    /// Whether a nonzero fractional self-time has been truncated yet.
    stripped_fractional_time: bool,

    opt: Options,
}

impl From<Options> for Folder {
    fn from(opt: Options) -> Self {
        Self {
            opt,
            ..Default::default()
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

        // The header row names the columns; everything before it is preamble.
        let mut line_num = 0;
        loop {
            line.clear();
            if reader.read_line(&mut line)? == 0 {
                warn!("File ended before header");
                return Ok(());
            }
            line_num += 1;
            if line.contains(HEADER_STACK) && line.contains(HEADER_TIME) {
                break;
            }
        }
        loop {
            line.clear();
            if reader.read_line(&mut line)? == 0 {
                break;
            }
            line_num += 1;

            let trimmed = util::trim_ascii_end(&line);
            if trimmed.is_empty() {
                continue;
            }
            self.on_line(trimmed).map_err(|e| match e {
                crate::error::Error::MalformedInput { line: None, msg } => {
                    crate::error::Error::MalformedInput {
                        line: Some(line_num),
                        msg,
                    }
                }
                other => other,
            })?;
        }

        self.stack.clear();
        self.occurrences.write_and_clear(writer)?;
        Ok(())
    }

    fn is_applicable(&mut self, input: &str) -> bool {
        for line in input.lines().take(16) {
            if line.contains(HEADER_STACK) && line.contains(HEADER_TIME) {
                return true;
            }
        }
        false
    }
}

impl Folder {
    // Data rows have a function-stack cell indented by one space per level,
    // a self-time cell, and optionally a module cell:
    //
    //     total,10.000000,
    //      grind,9.000000,app
    //       checksum,4.500000,libsum.so
    fn on_line(&mut self, line: &str) -> Result<()> {
        let cells = split_csv_row(line);
        if cells.len() < 2 || cells.len() > 3 {
            return Err(malformed!(
                "expected 2 or 3 CSV columns, found {}",
                cells.len()
            ));
        }

        let raw_name = &cells[0];
        let depth = raw_name.len() - raw_name.trim_start_matches(' ').len() + 1;
        let name = util::trim_ascii(raw_name);
        let module = cells.get(2).map(|m| util::trim_ascii(m)).unwrap_or("");

        let prev_depth = self.stack.len();
        if depth <= prev_depth {
            self.stack.truncate(depth - 1);
        } else if depth > prev_depth + 1 {
            return Err(malformed!("skipped indentation level"));
        }

        // The stack cell may itself be a pre-joined path.
        for (i, func) in name.split("->").enumerate() {
            let func = util::trim_ascii(func);
            if module.is_empty() || self.opt.no_modules || i > 0 {
                self.stack.push(func.to_string());
            } else {
                self.stack.push(format!("{}`{}", module, func));
            }
        }

        let time = util::trim_ascii(&cells[1]);
        let micros = self.parse_micros(time)?;
        if micros > 0 {
            let mut stack_str =
                String::with_capacity(self.stack.iter().map(|f| f.len() + 1).sum::<usize>());
            for (i, frame) in self.stack.iter().enumerate() {
                if i > 0 {
                    stack_str.push(';');
                }
                stack_str.push_str(frame);
            }
            self.occurrences.add_owned(stack_str, micros);
        }

        Ok(())
    }

    // Self-times are floating-point microseconds; the fractional part is
    // truncated, with a single warning if anything nonzero is dropped.
    fn parse_micros(&mut self, time: &str) -> Result<u64> {
        let micros: f64 = time
            .parse()
            .map_err(|_| malformed!("invalid self-time: {:?}", time))?;
        if micros < 0.0 {
            return Err(malformed!("negative self-time: {:?}", time));
        }
        if micros.fract() != 0.0 && !self.stripped_fractional_time {
            self.stripped_fractional_time = true;
            warn!(
                "The input data has fractional sample counts that will be truncated to integers."
            );
        }
        Ok(micros.trunc() as u64)
    }
}

// Splits one CSV row, honoring double-quoted cells (stack cells regularly
// contain commas from C++ template parameter lists).
fn split_csv_row(line: &str) -> Vec<String> {
    let mut cells = Vec::with_capacity(3);
    let mut cell = String::new();
    let mut in_quotes = false;
    for c in line.chars() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => cells.push(std::mem::take(&mut cell)),
            _ => cell.push(c),
        }
    }
    cells.push(cell);
    // a trailing comma produces an empty module cell; drop it
    if cells.len() == 3 && cells[2].is_empty() {
        cells.pop();
    }
    cells
}
