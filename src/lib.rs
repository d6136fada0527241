//! Pyrograph is a set of tools for producing [flame graphs] from the output
//! of sampling profilers. Like the original Perl [flamegraph toolkit] it
//! consists of two stages: stack collapsing and plotting. Collapsing is
//! available through the [`collapse`] module, plotting through the
//! [`flamegraph`] module, and both are wired together by the `flamegraph`
//! binary. A third piece, the [`differential`] module and its `diff-folded`
//! binary, joins two folded profiles into input for a [differential flame
//! graph].
//!
//! # Command-line use
//!
//! ## Producing a flame graph
//!
//! Most sampling profilers record a snapshot of the call stack at a fixed
//! interval or on hardware events. Given enough snapshots you can see where
//! a program spends its time by looking at which stacks recur. The
//! `flamegraph` tool reads raw profiler output, folds every sample into a
//! `frame1;frame2;...;frameN count` line, and plots the aggregate as an
//! interactive SVG:
//!
//! ```console
//! $ perf record --call-graph dwarf ./mybin
//! $ perf script | flamegraph > profile.svg
//! ```
//!
//! The input format is auto-detected by default; pass `--format` to pin it
//! to one of `perf`, `dtrace`, `sample`, `vtune`, `xctrace`, `recursive`, or
//! already-folded input.
//!
//! ## Differential flame graphs
//!
//! Take two profiles of the same workload, before and after a change, fold
//! them, and join them:
//!
//! ```console
//! $ diff-folded before.folded after.folded | flamegraph > diff.svg
//! ```
//!
//! Frames that got more expensive turn red, frames that got cheaper turn
//! blue.
//!
//! # Programmatic access
//!
//! Each collapser implements the [`collapse::Collapse`] trait;
//! [`flamegraph::from_lines`] and friends accept any folded input. The
//! renderer is configured through [`flamegraph::Options`].
//!
//!   [flame graphs]: http://www.brendangregg.com/flamegraphs.html
//!   [flamegraph toolkit]: https://github.com/brendangregg/FlameGraph
//!   [differential flame graph]: http://www.brendangregg.com/blog/2014-11-09/differential-flame-graphs.html

#![deny(missing_docs)]

/// The error type shared by all of the tools.
pub mod error;

/// Stack collapsing for various profiler output formats.
pub mod collapse;

/// Joining two folded profiles into differential flame graph input.
pub mod differential;

/// Producing flame graphs from folded stack traces.
pub mod flamegraph;

pub use error::{Error, Result};
