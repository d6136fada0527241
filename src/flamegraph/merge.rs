use std::collections::HashMap;
use std::iter;

use log::warn;

use crate::error::{malformed, Result};

/// A frame identity: the function name at a given stack depth.
#[derive(Debug, PartialEq, Eq, Hash)]
pub(super) struct Frame<'a> {
    pub(super) function: &'a str,
    pub(super) depth: usize,
}

/// A frame with a horizontal extent on the sample timeline.
///
/// Because the input lines are sorted, identical stack prefixes are adjacent
/// and a frame's width is exactly the span of accumulated samples between
/// the first and last line it participates in. This builds the same
/// geometry as an explicit prefix tree, while visiting each line once.
#[derive(Debug, PartialEq)]
pub(super) struct TimedFrame<'a> {
    pub(super) location: Frame<'a>,
    pub(super) start_time: u64,
    pub(super) end_time: u64,
    pub(super) delta: Option<i64>,
}

impl TimedFrame<'_> {
    pub(super) fn width(&self) -> u64 {
        self.end_time - self.start_time
    }
}

/// Per-line sample information; the second column of a differential line
/// contributes the delta.
#[derive(Clone, Copy, Debug)]
struct LineCounts {
    samples: u64,
    delta: Option<i64>,
}

#[derive(Debug)]
struct OpenFrame {
    start_time: u64,
    delta: Option<i64>,
}

fn flow<'a, LI, TI>(
    open: &mut HashMap<Frame<'a>, OpenFrame>,
    closed: &mut Vec<TimedFrame<'a>>,
    last: LI,
    this: TI,
    time: u64,
    counts: Option<LineCounts>,
) where
    LI: IntoIterator<Item = &'a str>,
    TI: IntoIterator<Item = &'a str>,
{
    let mut this = this.into_iter().peekable();
    let mut last = last.into_iter().peekable();

    // the shared prefix stays open; it only absorbs this line's delta
    let mut shared_depth = 0;
    while last.peek() == this.peek() {
        if last.peek().is_none() {
            break;
        }

        if let Some(LineCounts {
            delta: Some(delta), ..
        }) = counts
        {
            let key = Frame {
                function: this.peek().unwrap(),
                depth: shared_depth,
            };
            if let Some(frame) = open.get_mut(&key) {
                *frame.delta.get_or_insert(0) += delta;
            }
        }

        last.next();
        this.next();
        shared_depth += 1;
    }

    // frames only present in the previous stack are now complete
    for (i, function) in last.enumerate() {
        let key = Frame {
            function,
            depth: shared_depth + i,
        };
        let open_frame = open.remove(&key).unwrap_or_else(|| {
            unreachable!("did not have start time for {:?}", key);
        });
        closed.push(TimedFrame {
            location: key,
            start_time: open_frame.start_time,
            end_time: time,
            delta: open_frame.delta,
        });
    }

    // frames new to this stack open at the current time
    for (i, function) in this.enumerate() {
        let key = Frame {
            function,
            depth: shared_depth + i,
        };
        let open_frame = OpenFrame {
            start_time: time,
            delta: counts.and_then(|c| c.delta),
        };
        if open.insert(key, open_frame).is_some() {
            unreachable!("start time already registered for frame");
        }
    }
}

/// Merges sorted folded lines into timed frames.
///
/// Returns the frames, the total sample count, the number of ignored
/// (unparseable) lines, and the largest absolute differential delta.
pub(super) fn frames<'a, I>(
    lines: I,
    suppress_sort_check: bool,
) -> Result<(Vec<TimedFrame<'a>>, u64, usize, u64)>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut time = 0u64;
    let mut ignored = 0;
    let mut last = "";
    let mut open = HashMap::new();
    let mut closed = Vec::new();
    let mut stripped_fractional_samples = false;
    let mut prev_line: Option<&str> = None;

    for line in lines {
        let mut line = line.trim();
        if line.is_empty() {
            continue;
        }

        // Usually one samples column ends the line; differential input has
        // two, in which case the second (after) column drives the widths.
        let Some(counts) = parse_counts(&mut line, &mut stripped_fractional_samples) else {
            ignored += 1;
            continue;
        };
        if line.is_empty() {
            ignored += 1;
            continue;
        }
        let stack = line;

        if !suppress_sort_check {
            if let Some(prev_line) = prev_line {
                if prev_line > stack {
                    return Err(malformed!("unsorted input lines detected"));
                }
            }
        }
        prev_line = Some(stack);

        // inject an empty root frame to capture "all"
        let this = iter::once("").chain(stack.split(';'));
        if last.is_empty() {
            // without the special case, chaining over "".split(';') would
            // produce a spurious ["", ""] prefix
            flow(&mut open, &mut closed, None, this, time, Some(counts));
        } else {
            flow(
                &mut open,
                &mut closed,
                iter::once("").chain(last.split(';')),
                this,
                time,
                Some(counts),
            );
        }

        last = stack;
        time += counts.samples;
    }

    // close everything still open at the end of the timeline
    if !last.is_empty() {
        flow(
            &mut open,
            &mut closed,
            iter::once("").chain(last.split(';')),
            None,
            time,
            None,
        );
    }
    debug_assert!(open.is_empty());

    let delta_max = closed
        .iter()
        .filter_map(|frame| frame.delta)
        .map(|delta| delta.unsigned_abs())
        .max()
        .unwrap_or(1);

    Ok((closed, time, ignored, delta_max))
}

// Parses and removes the trailing sample column(s) of a folded line.
fn parse_counts(line: &mut &str, stripped_fractional_samples: &mut bool) -> Option<LineCounts> {
    let after = parse_nsamples(line, stripped_fractional_samples)?;
    // A second parseable column means the line is differential; the column
    // just parsed was the "after" and the next one in is the "before".
    match parse_nsamples(line, stripped_fractional_samples) {
        Some(before) => Some(LineCounts {
            samples: after,
            delta: Some(after as i64 - before as i64),
        }),
        None => Some(LineCounts {
            samples: after,
            delta: None,
        }),
    }
}

// Parses and removes one trailing sample count. Fractional counts are
// truncated; the Perl version kept them, but cumulative floating point
// errors make integer truncation plus the `factor` option the safer
// arrangement.
fn parse_nsamples(line: &mut &str, stripped_fractional_samples: &mut bool) -> Option<u64> {
    let (samplesi, doti) = rfind_samples(line)?;
    let mut samples = &line[samplesi..];

    // warn if a nonzero fractional part is being dropped, but only once
    if !*stripped_fractional_samples
        && doti < samples.len() - 1
        && !samples[doti + 1..].bytes().all(|b| b == b'0')
    {
        *stripped_fractional_samples = true;
        warn!(
            "The input data has fractional sample counts that will be truncated to integers. \
             If you need to retain the extra precision you can scale up the sample data and \
             use the --factor option to scale it back down."
        );
    }

    samples = &samples[..doti];
    let nsamples = samples.parse::<u64>().ok()?;
    *line = line[..samplesi].trim_end();
    Some(nsamples)
}

// Finds a trailing sample count. On success returns the index of the count
// within the line and the offset of the dot (or the count's length when it
// is integral).
pub(super) fn rfind_samples(line: &str) -> Option<(usize, usize)> {
    let samplesi = line.rfind(' ')? + 1;
    let samples = &line[samplesi..];
    if let Some(doti) = samples.find('.') {
        if samples[..doti]
            .bytes()
            .chain(samples[doti + 1..].bytes())
            .all(|b| b.is_ascii_digit())
            && doti > 0
        {
            Some((samplesi, doti))
        } else {
            None
        }
    } else if samples.bytes().all(|b| b.is_ascii_digit()) && !samples.is_empty() {
        Some((samplesi, samples.len()))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn sorted_frames(input: &[&'static str]) -> (Vec<TimedFrame<'static>>, u64) {
        let (mut frames, time, ignored, _) = frames(input.iter().copied(), false).unwrap();
        assert_eq!(ignored, 0);
        frames.sort_by_key(|f| (f.location.depth, f.start_time));
        (frames, time)
    }

    #[test]
    fn single_stack_produces_one_frame_per_depth() {
        let (frames, time) = sorted_frames(&["main;a;b 4"]);
        assert_eq!(time, 4);
        let summary: Vec<_> = frames
            .iter()
            .map(|f| (f.location.function, f.location.depth, f.start_time, f.end_time))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("", 0, 0, 4),
                ("main", 1, 0, 4),
                ("a", 2, 0, 4),
                ("b", 3, 0, 4),
            ]
        );
    }

    #[test]
    fn shared_prefixes_merge() {
        let (frames, time) = sorted_frames(&["main;a 1", "main;b 2"]);
        assert_eq!(time, 3);
        let summary: Vec<_> = frames
            .iter()
            .map(|f| (f.location.function, f.location.depth, f.start_time, f.end_time))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("", 0, 0, 3),
                ("main", 1, 0, 3),
                ("a", 2, 0, 1),
                ("b", 2, 1, 3),
            ]
        );
    }

    #[test]
    fn sibling_widths_sum_to_parent_width() {
        let (frames, _) = sorted_frames(&["main;a 1", "main;b 2", "main;c 4"]);
        let parent = frames
            .iter()
            .find(|f| f.location.function == "main")
            .unwrap();
        let children: u64 = frames
            .iter()
            .filter(|f| f.location.depth == 2)
            .map(|f| f.width())
            .sum();
        assert_eq!(parent.width(), children);
    }

    #[test]
    fn differential_lines_accumulate_deltas() {
        let (frames, time, _, delta_max) =
            frames(["main;a 1 3", "main;b 2 2"].into_iter(), false).unwrap();
        assert_eq!(time, 5); // widths use the second column
        let a = frames
            .iter()
            .find(|f| f.location.function == "a")
            .unwrap();
        assert_eq!(a.delta, Some(2));
        let main = frames
            .iter()
            .find(|f| f.location.function == "main")
            .unwrap();
        assert_eq!(main.delta, Some(2));
        assert_eq!(delta_max, 2);
    }

    #[test]
    fn unsorted_input_is_rejected() {
        let err = frames(["b 1", "a 1"].into_iter(), false)
            .expect_err("unsorted lines should be rejected");
        assert!(matches!(
            err,
            crate::error::Error::MalformedInput { .. }
        ));
        // and accepted when the caller vouches for the order
        assert!(frames(["b 1", "a 1"].into_iter(), true).is_ok());
    }

    #[test]
    fn malformed_lines_are_counted_not_fatal() {
        let (_, time, ignored, _) = frames(["main 1", "nonsense", " 3"].into_iter(), true).unwrap();
        assert_eq!(time, 1);
        assert_eq!(ignored, 2);
    }

    #[test]
    fn fractional_samples_truncate() {
        let (_, time, ignored, _) = frames(["main 2.9"].into_iter(), false).unwrap();
        assert_eq!(time, 2);
        assert_eq!(ignored, 0);
    }

    #[test]
    fn rfind_samples_rejects_non_numeric_tails() {
        assert_eq!(rfind_samples("a;b 12"), Some((4, 2)));
        assert_eq!(rfind_samples("a;b 1.5"), Some((4, 1)));
        assert_eq!(rfind_samples("a;b x5"), None);
        assert_eq!(rfind_samples("absolutely-not"), None);
    }
}
