//! Producing the input for differential flame graphs.
//!
//! A differential flame graph pairs two profiles of the same workload, taken
//! before and after a change. The two folded profiles are joined on stack
//! identity into three-column lines (`stack before after`), which the
//! renderer colors by the per-frame delta.

use std::collections::HashMap;
use std::fs::File;
use std::io;
use std::io::prelude::*;
use std::path::Path;

use log::warn;

use crate::error::Result;

const READER_CAPACITY: usize = 128 * 1024;

#[derive(Clone, Copy, Default)]
struct Counts {
    first: u64,
    second: u64,
}

/// Configure the generated output.
///
/// All options default to off.
#[derive(Clone, Debug, Default)]
pub struct Options {
    /// Normalize the first profile's total count to match the second.
    ///
    /// This helps when the profiles were taken under different load: without
    /// it, everything looks red when the load increased (or blue when it
    /// decreased), drowning out the interesting shifts. With this flag the
    /// first profile is scaled so both columns sum to the same total.
    pub normalize: bool,

    /// Replace all hex address runs like `0x45ef2173` with `0x...` before
    /// joining, so addresses that differ between the runs do not split
    /// entries that are otherwise the same stack.
    pub strip_hex: bool,
}

/// Produce differential flame graph input from two folded profiles.
///
/// Both readers are expected to contain folded stack lines, i.e. a
/// semicolon-separated list of frame names followed by a sample count. The
/// output written to `writer` has the same shape with two count columns, one
/// per profile; a stack missing from one profile gets a zero in that column.
pub fn from_readers<R1, R2, W>(opt: &Options, reader1: R1, reader2: R2, writer: W) -> Result<()>
where
    R1: BufRead,
    R2: BufRead,
    W: Write,
{
    let mut stack_counts = HashMap::new();
    let mut stripped_fractional = false;
    let total1 = parse_stack_counts(opt, &mut stack_counts, reader1, true, &mut stripped_fractional)?;
    let total2 =
        parse_stack_counts(opt, &mut stack_counts, reader2, false, &mut stripped_fractional)?;

    if opt.normalize && total1 > 0 && total1 != total2 {
        for counts in stack_counts.values_mut() {
            // widen so the scaling product cannot overflow 64 bits
            counts.first = (counts.first as u128 * total2 as u128 / total1 as u128) as u64;
        }
    }

    write_stacks(&stack_counts, writer)
}

/// Produce differential flame graph input from two folded profile files.
///
/// See [`from_readers`] for the input and output formats.
pub fn from_files<P1, P2, W>(opt: &Options, filename1: P1, filename2: P2, writer: W) -> Result<()>
where
    P1: AsRef<Path>,
    P2: AsRef<Path>,
    W: Write,
{
    let file1 = File::open(filename1)?;
    let reader1 = io::BufReader::with_capacity(READER_CAPACITY, file1);
    let file2 = File::open(filename2)?;
    let reader2 = io::BufReader::with_capacity(READER_CAPACITY, file2);
    from_readers(opt, reader1, reader2, writer)
}

// Tallies one reader's folded lines into stack_counts and returns the sum of
// its sample counts.
fn parse_stack_counts<R>(
    opt: &Options,
    stack_counts: &mut HashMap<String, Counts>,
    mut reader: R,
    is_first: bool,
    stripped_fractional: &mut bool,
) -> Result<u64>
where
    R: BufRead,
{
    let mut total = 0u64;
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            break;
        }
        if line.trim().is_empty() {
            continue;
        }

        if let Some((stack, count)) = parse_line(&line, opt.strip_hex, stripped_fractional) {
            let counts = stack_counts.entry(stack).or_default();
            if is_first {
                counts.first += count;
            } else {
                counts.second += count;
            }
            total += count;
        } else {
            warn!("Unable to parse line: {}", line.trim_end());
        }
    }
    Ok(total)
}

// Writes `stack first second` lines, sorted by stack so identical inputs
// produce identical output.
fn write_stacks<W>(stack_counts: &HashMap<String, Counts>, mut writer: W) -> Result<()>
where
    W: Write,
{
    let mut entries: Vec<_> = stack_counts.iter().collect();
    entries.sort_unstable_by_key(|(stack, _)| stack.as_str());
    for (stack, &Counts { first, second }) in entries {
        writeln!(writer, "{} {} {}", stack, first, second)?;
    }
    Ok(())
}

// Parses the stack and sample count from a folded line. Fractional counts
// are truncated, with one warning for the whole run.
fn parse_line(line: &str, strip_hex: bool, stripped_fractional: &mut bool) -> Option<(String, u64)> {
    let samples_idx = line.rfind(' ')?;
    let mut count_str = line[samples_idx + 1..].trim_end();

    if let Some(dot) = count_str.find('.') {
        let (int, frac) = (&count_str[..dot], &count_str[dot + 1..]);
        if int.is_empty() || !frac.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        if !*stripped_fractional && frac.bytes().any(|b| b != b'0') {
            *stripped_fractional = true;
            warn!(
                "The input data has fractional sample counts that will be truncated to integers."
            );
        }
        count_str = int;
    }

    let count = count_str.parse::<u64>().ok()?;
    let stack = line[..samples_idx].trim_end();
    if stack.is_empty() {
        return None;
    }
    let stack = if strip_hex {
        strip_hex_addresses(stack)
    } else {
        stack.to_string()
    };
    Some((stack, count))
}

// Replaces every maximal hex run like "0x45ef2173" with "0x...".
fn strip_hex_addresses(stack: &str) -> String {
    let mut out = String::with_capacity(stack.len());
    let mut rest = stack;
    while let Some(idx) = rest.find("0x") {
        let digits = rest[idx + 2..]
            .bytes()
            .take_while(|b| b.is_ascii_hexdigit())
            .count();
        if digits > 0 {
            out.push_str(&rest[..idx]);
            out.push_str("0x...");
            rest = &rest[idx + 2 + digits..];
        } else {
            out.push_str(&rest[..idx + 2]);
            rest = &rest[idx + 2..];
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn diff(opt: &Options, before: &str, after: &str) -> String {
        let mut out = Vec::new();
        from_readers(opt, before.as_bytes(), after.as_bytes(), &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn joins_on_stack_identity() {
        let out = diff(&Options::default(), "a;b 3\nc 1\n", "a;b 5\nd 2\n");
        assert_eq!(out, "a;b 3 5\nc 1 0\nd 0 2\n");
    }

    #[test]
    fn swapping_inputs_swaps_columns() {
        let before = "a;b 3\nc 1\n";
        let after = "a;b 5\nd 2\n";
        let forward = diff(&Options::default(), before, after);
        let backward = diff(&Options::default(), after, before);

        let swap = |s: &str| {
            s.lines()
                .map(|line| {
                    let mut parts = line.rsplitn(3, ' ');
                    let second = parts.next().unwrap();
                    let first = parts.next().unwrap();
                    let stack = parts.next().unwrap();
                    format!("{} {} {}", stack, second, first)
                })
                .collect::<Vec<_>>()
                .join("\n")
                + "\n"
        };
        assert_eq!(swap(&forward), backward);
    }

    #[test]
    fn normalize_scales_the_first_column() {
        let opt = Options {
            normalize: true,
            ..Options::default()
        };
        let out = diff(&opt, "a 100\nb 50\n", "a 200\n");
        assert_eq!(out, "a 133 200\nb 66 0\n");
    }

    #[test]
    fn normalized_totals_match_up_to_rounding() {
        let opt = Options {
            normalize: true,
            ..Options::default()
        };
        let out = diff(&opt, "a 100\nb 50\nc 7\n", "a 220\nb 40\n");
        let (mut total1, mut total2) = (0i64, 0i64);
        let mut rows = 0;
        for line in out.lines() {
            let mut parts = line.rsplitn(3, ' ');
            total2 += parts.next().unwrap().parse::<i64>().unwrap();
            total1 += parts.next().unwrap().parse::<i64>().unwrap();
            rows += 1;
        }
        assert!((total2 - total1).unsigned_abs() <= rows);
    }

    #[test]
    fn strip_hex_merges_stacks_differing_only_in_addresses() {
        let opt = Options {
            strip_hex: true,
            ..Options::default()
        };
        let out = diff(&opt, "foo;0x7f00abcd 3\n", "foo;0x7f00ef12 5\n");
        assert_eq!(out, "foo;0x... 3 5\n");
    }

    #[test]
    fn fractional_counts_truncate() {
        let out = diff(&Options::default(), "a 3.7\n", "a 4.0\n");
        assert_eq!(out, "a 3 4\n");
    }

    #[test]
    fn hex_stripping_handles_multiple_runs() {
        assert_eq!(
            strip_hex_addresses("f 0x12ab bar 0xzz 0xCD"),
            "f 0x... bar 0xzz 0x..."
        );
    }
}
