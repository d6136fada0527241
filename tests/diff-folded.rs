#[allow(dead_code)]
mod common;

use std::fs;
use std::process::Command;

use assert_cmd::cargo::CommandCargoExt;
use pretty_assertions::assert_eq;
use pyrograph::differential::{self, Options};

fn diff(options: &Options, before: &str, after: &str) -> String {
    let mut out = Vec::new();
    differential::from_readers(options, before.as_bytes(), after.as_bytes(), &mut out).unwrap();
    String::from_utf8(out).unwrap()
}

#[test]
fn joins_profiles_with_zeros_for_missing_sides() {
    let out = diff(&Options::default(), "a;b 3\nc 1\n", "a;b 5\nd 2\n");
    assert_eq!(out, "a;b 3 5\nc 1 0\nd 0 2\n");
}

#[test]
fn diff_is_symmetric_up_to_column_swap() {
    let before = "a;b 3\nc 1\n";
    let after = "a;b 5\nd 2\n";
    let forward = diff(&Options::default(), before, after);
    let backward = diff(&Options::default(), after, before);

    let swapped: Vec<String> = forward
        .lines()
        .map(|line| {
            let mut cols = line.rsplitn(3, ' ');
            let second = cols.next().unwrap();
            let first = cols.next().unwrap();
            let stack = cols.next().unwrap();
            format!("{} {} {}", stack, second, first)
        })
        .collect();
    let backward: Vec<String> = backward.lines().map(str::to_string).collect();
    assert_eq!(swapped, backward);
}

#[test]
fn normalize_balances_totals() {
    let options = Options {
        normalize: true,
        ..Options::default()
    };
    let out = diff(&options, "a 100\nb 50\n", "a 200\n");
    assert_eq!(out, "a 133 200\nb 66 0\n");

    // after normalization the two columns sum to the same total, up to one
    // truncation per row
    let (mut total1, mut total2, mut rows) = (0i64, 0i64, 0i64);
    for line in out.lines() {
        let mut cols = line.rsplitn(3, ' ');
        total2 += cols.next().unwrap().parse::<i64>().unwrap();
        total1 += cols.next().unwrap().parse::<i64>().unwrap();
        rows += 1;
    }
    assert!((total2 - total1).abs() <= rows);
}

#[test]
fn strip_hex_merges_address_split_stacks() {
    let options = Options {
        strip_hex: true,
        ..Options::default()
    };
    let out = diff(&options, "foo;0x7f00abcd 3\n", "foo;0x7f00ef12 5\n");
    assert_eq!(out, "foo;0x... 3 5\n");
}

#[test]
fn diff_folded_cli_round_trip() {
    let before_path = common::temp_path("diff-before.folded");
    let after_path = common::temp_path("diff-after.folded");
    fs::write(&before_path, "a;b 3\nc 1\n").unwrap();
    fs::write(&after_path, "a;b 5\nd 2\n").unwrap();

    let output = Command::cargo_bin("diff-folded")
        .unwrap()
        .arg(&before_path)
        .arg(&after_path)
        .output()
        .expect("failed to execute diff-folded");
    assert!(output.status.success());
    assert_eq!(
        String::from_utf8_lossy(&output.stdout),
        "a;b 3 5\nc 1 0\nd 0 2\n"
    );

    fs::remove_file(before_path).ok();
    fs::remove_file(after_path).ok();
}

#[test]
fn diff_folded_cli_rejects_missing_arguments() {
    let output = Command::cargo_bin("diff-folded")
        .unwrap()
        .output()
        .expect("failed to execute diff-folded");
    assert_eq!(output.status.code(), Some(2));
}
