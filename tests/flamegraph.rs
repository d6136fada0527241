#[allow(dead_code)]
mod common;

use std::io::Write;
use std::process::{Command, Stdio};

use assert_cmd::cargo::CommandCargoExt;
use pretty_assertions::assert_eq;
use pyrograph::flamegraph::{self, Options};
use pyrograph::Error;

fn render(options: &mut Options, folded: &str) -> String {
    options.no_javascript = true;
    let mut out = Vec::new();
    flamegraph::from_reader(options, folded.as_bytes(), &mut out).unwrap();
    String::from_utf8(out).unwrap()
}

#[test]
fn empty_profile_is_an_error_with_no_output() {
    let mut out = Vec::new();
    let err = flamegraph::from_reader(&mut Options::default(), "".as_bytes(), &mut out)
        .expect_err("empty input must not render");
    assert!(matches!(err, Error::EmptyProfile));
    assert!(out.is_empty());
}

#[test]
fn geometry_row_totals_never_grow_with_depth() {
    let mut opt = Options::default();
    opt.image_width = Some(1200);
    let svg = render(&mut opt, "main;a 1\nmain;b;d 2\nmain;c 4\nidle 3\n");

    let mut rows = common::rect_widths_by_row(&svg);
    assert!(!rows.is_empty());
    // for the default (bottom-up) direction, deeper rows have smaller y
    rows.sort_by(|(y1, _), (y2, _)| {
        y1.parse::<f64>()
            .unwrap()
            .partial_cmp(&y2.parse::<f64>().unwrap())
            .unwrap()
    });
    let totals: Vec<f64> = rows
        .iter()
        .map(|(_, widths)| widths.iter().sum::<f64>())
        .collect();
    for pair in totals.windows(2) {
        assert!(
            pair[0] <= pair[1] + 0.01,
            "deeper row is wider than its parents: {:?}",
            totals
        );
    }

    // the root row is the full drawable width
    let root_total = totals.last().copied().unwrap();
    assert!((root_total - 1180.0).abs() < 0.01, "root: {}", root_total);
}

#[test]
fn min_width_never_adds_frames() {
    let folded = "main;tiny 1\nmain;mid 40\nmain;big 9959\n";

    let mut opt = Options::default();
    opt.min_width = 0.0;
    let all: Vec<String> = frame_names(&render(&mut opt, folded));

    let mut opt = Options::default();
    opt.min_width = 5.0;
    let some: Vec<String> = frame_names(&render(&mut opt, folded));

    let mut opt = Options::default();
    opt.min_width = 50.0;
    let fewer: Vec<String> = frame_names(&render(&mut opt, folded));

    assert!(some.iter().all(|name| all.contains(name)));
    assert!(fewer.iter().all(|name| some.contains(name)));
    assert!(all.len() >= some.len() && some.len() >= fewer.len());
}

fn frame_names(svg: &str) -> Vec<String> {
    svg.split("<title>")
        .skip(1)
        .map(|rest| {
            let title = &rest[..rest.find("</title>").unwrap()];
            title
                .rsplit_once(" (")
                .map(|(name, _)| name.to_string())
                .unwrap_or_else(|| title.to_string())
        })
        .collect()
}

#[test]
fn hash_colors_are_identical_across_runs() {
    let folded = "main;work;inner 10\nmain;other 5\n";
    let mut opt1 = Options::default();
    opt1.hash = true;
    let mut opt2 = Options::default();
    opt2.hash = true;
    assert_eq!(render(&mut opt1, folded), render(&mut opt2, folded));
}

#[test]
fn deterministic_colors_are_identical_across_runs() {
    let folded = "main;work;inner 10\nmain;other 5\n";
    let mut opt1 = Options::default();
    opt1.deterministic = true;
    let mut opt2 = Options::default();
    opt2.deterministic = true;
    assert_eq!(render(&mut opt1, folded), render(&mut opt2, folded));
}

#[test]
fn differential_input_renders_three_columns() {
    let svg = render(&mut Options::default(), "a 100 200\nb 100 50\n");
    assert!(svg.contains("+40.00%"));
    assert!(svg.contains("-20.00%"));
}

#[test]
fn flamegraph_cli_renders_folded_input() {
    let mut child = Command::cargo_bin("flamegraph")
        .unwrap()
        .args(["--format", "recursive", "--hash", "--width", "1200"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .spawn()
        .expect("failed to spawn flamegraph");
    child
        .stdin
        .as_mut()
        .unwrap()
        .write_all(b"main;work 10\nmain;idle 5\n")
        .unwrap();
    let output = child.wait_with_output().expect("failed to read stdout");
    assert!(output.status.success());
    let svg = String::from_utf8_lossy(&output.stdout);
    assert!(svg.starts_with("<?xml"));
    assert!(svg.contains(r#"id="frames""#));
    assert!(svg.contains("main"));
}

#[test]
fn flamegraph_cli_is_deterministic_with_hash_colors() {
    let render_once = || {
        let mut child = Command::cargo_bin("flamegraph")
            .unwrap()
            .args(["--format", "recursive", "--hash"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .expect("failed to spawn flamegraph");
        child
            .stdin
            .as_mut()
            .unwrap()
            .write_all(b"main;work 10\nmain;idle 5\n")
            .unwrap();
        child.wait_with_output().expect("failed to read stdout")
    };
    let first = render_once();
    let second = render_once();
    assert!(first.status.success());
    assert_eq!(first.stdout, second.stdout);
}

#[test]
fn flamegraph_cli_exits_1_on_empty_profile() {
    let mut child = Command::cargo_bin("flamegraph")
        .unwrap()
        .args(["--format", "recursive"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("failed to spawn flamegraph");
    // folded input with zero total weight
    child
        .stdin
        .as_mut()
        .unwrap()
        .write_all(b"main;work 0\n")
        .unwrap();
    let output = child.wait_with_output().expect("failed to wait");
    assert_eq!(output.status.code(), Some(1));
    assert!(output.stdout.is_empty(), "no partial SVG may be written");
}

#[test]
fn flamegraph_cli_exits_2_on_bad_arguments() {
    let output = Command::cargo_bin("flamegraph")
        .unwrap()
        .args(["--colors", "no-such-palette"])
        .output()
        .expect("failed to execute flamegraph");
    assert_eq!(output.status.code(), Some(2));
}
