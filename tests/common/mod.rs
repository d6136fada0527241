use std::io::{self, BufRead, Cursor};

use pyrograph::collapse::Collapse;

/// Collapses `input` with the given collapser and returns the folded output.
pub fn collapse_to_string<C: Collapse>(collapser: &mut C, input: &str) -> pyrograph::Result<String> {
    let mut out = Vec::new();
    collapser.collapse(Cursor::new(input.as_bytes()), &mut out)?;
    Ok(String::from_utf8(out).expect("collapsers produce UTF-8"))
}

/// Sums the counts of a folded stream.
pub fn folded_total(folded: &str) -> u64 {
    folded
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            line.rsplit(' ')
                .next()
                .and_then(|count| count.parse::<u64>().ok())
                .unwrap_or_else(|| panic!("bad folded line: {:?}", line))
        })
        .sum()
}

/// Asserts two folded streams contain the same multiset of lines.
pub fn assert_same_folded(actual: &str, expected: &str) {
    let mut actual_lines: Vec<&str> = actual.lines().collect();
    let mut expected_lines: Vec<&str> = expected.lines().collect();
    actual_lines.sort_unstable();
    expected_lines.sort_unstable();
    assert_eq!(actual_lines, expected_lines);
}

/// Reads every `width="..."` of the frame rectangles out of an SVG,
/// grouped by their `y` coordinate (one bucket per stack depth).
pub fn rect_widths_by_row(svg: &str) -> Vec<(String, Vec<f64>)> {
    let mut rows: Vec<(String, Vec<f64>)> = Vec::new();
    for rect in svg.split("<rect ").skip(1) {
        let rect = &rect[..rect.find("/>").expect("unterminated rect")];
        // the background rect has no fractional width
        let Some(width) = attr(rect, "width").and_then(|w| w.parse::<f64>().ok()) else {
            continue;
        };
        let Some(y) = attr(rect, "y") else { continue };
        if attr(rect, "fill") == Some("url(#background)".to_string()) {
            continue;
        }
        match rows.iter_mut().find(|(row_y, _)| *row_y == y) {
            Some((_, widths)) => widths.push(width),
            None => rows.push((y, vec![width])),
        }
    }
    rows
}

fn attr(element: &str, name: &str) -> Option<String> {
    let marker = format!("{}=\"", name);
    let start = element.find(&marker)? + marker.len();
    let end = start + element[start..].find('"')?;
    Some(element[start..end].to_string())
}

/// Scratch path under the system temp directory, unique to this test run.
pub fn temp_path(name: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("pyrograph-test-{}-{}", std::process::id(), name))
}

/// Convenience for slurping a reader into lines.
#[allow(dead_code)]
pub fn lines_of<R: io::Read>(reader: R) -> Vec<String> {
    io::BufReader::new(reader)
        .lines()
        .collect::<Result<_, _>>()
        .unwrap()
}
