use std::io;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use env_logger::Env;
use is_terminal::IsTerminal;

use pyrograph::collapse::{dtrace, guess, perf, recursive, sample, vtune, xctrace, Collapse};
use pyrograph::flamegraph::color::PALETTE_NAMES;
use pyrograph::flamegraph::{self, defaults, BackgroundColor, Direction, Options, Palette};
use pyrograph::flamegraph::{SearchColor, StrokeColor, TextTruncateDirection, UiColor};

/// The profiler formats the `--format` flag accepts.
#[derive(Clone, Copy, Debug, PartialEq, ValueEnum)]
enum Format {
    /// Output of `perf script`.
    Perf,
    /// Output of DTrace `ustack()` aggregations.
    Dtrace,
    /// Output of macOS `sample`.
    Sample,
    /// CSV report exported by VTune.
    Vtune,
    /// XML trace exported by `xctrace export`.
    Xctrace,
    /// Already-folded stacks; collapses directly recursive frames.
    Recursive,
    /// Auto-detect one of the above.
    Guess,
}

#[derive(Debug, Parser)]
#[command(name = "flamegraph", about = "Render a flame graph from profiler output")]
struct Opt {
    /// Input format; 'guess' auto-detects from a prefix of the input
    #[arg(long = "format", value_enum, default_value_t = Format::Guess)]
    format: Format,

    /// Set color palette
    #[arg(
        short = 'c',
        long = "colors",
        default_value = defaults::COLORS,
        value_parser = parse_palette
    )]
    colors: Palette,

    /// Set background colors; gradient choices are yellow, blue, green,
    /// grey; flat colors use "#rrggbb"
    #[arg(long = "bgcolors", value_parser = parse_bgcolor)]
    bgcolors: Option<BackgroundColor>,

    /// Colors are keyed by function name hash
    #[arg(long = "hash")]
    hash: bool,

    /// Colors are deterministic per function name
    #[arg(long = "cp", conflicts_with = "hash")]
    cp: bool,

    /// Spread the palette across the graph instead of per-frame variance
    #[arg(long = "colordiffusion", conflicts_with_all = ["hash", "cp"])]
    color_diffusion: bool,

    /// Change the title text
    #[arg(long = "title")]
    title: Option<String>,

    /// Second level title (optional)
    #[arg(long = "subtitle")]
    subtitle: Option<String>,

    /// Add notes comment in SVG (for debugging)
    #[arg(long = "notes", default_value = "")]
    notes: String,

    /// Count type label
    #[arg(long = "countname", default_value = defaults::COUNT_NAME)]
    countname: String,

    /// Name type label
    #[arg(long = "nametype", default_value = defaults::NAME_TYPE)]
    nametype: String,

    /// Width of image; the default produces a fluid image filling the
    /// viewport
    #[arg(long = "width")]
    width: Option<usize>,

    /// Height of each frame
    #[arg(long = "height", default_value_t = defaults::FRAME_HEIGHT)]
    height: usize,

    /// Omit smaller functions below this pixel width
    #[arg(long = "minwidth", default_value_t = defaults::MIN_WIDTH)]
    minwidth: f64,

    /// Font type
    #[arg(long = "fonttype", default_value = defaults::FONT_TYPE)]
    fonttype: String,

    /// Font size
    #[arg(long = "fontsize", default_value_t = defaults::FONT_SIZE)]
    fontsize: usize,

    /// Font width
    #[arg(long = "fontwidth", default_value_t = defaults::FONT_WIDTH)]
    fontwidth: f64,

    /// Search color
    #[arg(long = "searchcolor", default_value = defaults::SEARCH_COLOR)]
    searchcolor: SearchColor,

    /// Color of UI text such as the title and details bar
    #[arg(long = "uicolor", default_value = "#000000")]
    uicolor: UiColor,

    /// Outline frame rectangles with this color
    #[arg(long = "strokecolor", default_value = "none")]
    strokecolor: StrokeColor,

    /// Search pattern to highlight as soon as the graph loads
    #[arg(long = "search")]
    search: Option<String>,

    /// Keep the left side of truncated frame labels instead of the right
    #[arg(long = "truncate-text-left")]
    truncate_text_left: bool,

    /// Generate stack-reversed flame graph
    #[arg(long = "reverse", conflicts_with = "flamechart")]
    reverse: bool,

    /// Plot the flame graph up-side-down
    #[arg(short = 'i', long = "inverted")]
    inverted: bool,

    /// Produce a flame chart (sort by time, do not merge stacks)
    #[arg(long = "flamechart")]
    flamechart: bool,

    /// Switch differential hues (green <-> red)
    #[arg(long = "negate")]
    negate: bool,

    /// Factor to scale sample counts by
    #[arg(long = "factor", default_value_t = defaults::FACTOR)]
    factor: f64,

    /// Pretty print XML with newlines and indentation
    #[arg(long = "pretty-xml")]
    pretty_xml: bool,

    /// Don't include static JavaScript in flame graph
    /// (only meant to be used in tests)
    #[arg(long = "no-javascript", hide = true)]
    no_javascript: bool,

    /// Silence all log output
    #[arg(short = 'q', long = "quiet")]
    quiet: bool,

    /// Verbose logging mode (-v, -vv, -vvv)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,

    /// Output file; defaults to standard output
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,

    /// Profiler output to read; with no INPUT, or INPUT is -, read STDIN
    #[arg(value_name = "INPUT")]
    infile: Option<PathBuf>,
}

fn parse_palette(name: &str) -> Result<Palette, String> {
    name.parse().map_err(|e: String| {
        format!("{} (expected one of: {})", e, PALETTE_NAMES.join(", "))
    })
}

fn parse_bgcolor(name: &str) -> Result<BackgroundColor, String> {
    name.parse()
}

impl Opt {
    fn into_parts(self) -> (Format, Option<PathBuf>, Option<PathBuf>, Options) {
        let mut options = Options::default();
        options.colors = self.colors;
        options.bgcolors = self.bgcolors;
        options.hash = self.hash;
        options.deterministic = self.cp;
        options.color_diffusion = self.color_diffusion;
        options.search_color = self.searchcolor;
        options.ui_color = self.uicolor;
        options.stroke_color = self.strokecolor;
        options.search_pattern = self.search;
        options.subtitle = self.subtitle;
        options.notes = self.notes;
        options.count_name = self.countname;
        options.name_type = self.nametype;
        options.image_width = self.width;
        options.frame_height = self.height;
        options.min_width = self.minwidth;
        options.font_type = self.fonttype;
        options.font_size = self.fontsize;
        options.font_width = self.fontwidth;
        options.negate_differentials = self.negate;
        options.factor = self.factor;
        options.pretty_xml = self.pretty_xml;
        options.reverse_stack_order = self.reverse;
        options.flame_chart = self.flamechart;
        options.no_javascript = self.no_javascript;
        if self.truncate_text_left {
            options.text_truncate_direction = TextTruncateDirection::Left;
        }

        options.title = match self.title {
            Some(title) => title,
            None if self.flamechart => defaults::CHART_TITLE.to_string(),
            None if self.inverted => "Icicle Graph".to_string(),
            None => defaults::TITLE.to_string(),
        };
        if self.inverted {
            options.direction = Direction::Inverted;
        }

        let infile = match self.infile {
            Some(ref path) if path.to_str() == Some("-") => None,
            infile => infile,
        };

        (self.format, infile, self.output, options)
    }
}

fn collapse_input(
    format: Format,
    infile: Option<&PathBuf>,
    folded: &mut Vec<u8>,
) -> pyrograph::Result<()> {
    match format {
        Format::Perf => perf::Folder::default().collapse_file(infile, folded),
        Format::Dtrace => dtrace::Folder::default().collapse_file(infile, folded),
        Format::Sample => sample::Folder::default().collapse_file(infile, folded),
        Format::Vtune => vtune::Folder::default().collapse_file(infile, folded),
        Format::Xctrace => xctrace::Folder::default().collapse_file(infile, folded),
        Format::Recursive => recursive::Folder::default().collapse_file(infile, folded),
        Format::Guess => guess::Folder::default().collapse_file(infile, folded),
    }
}

fn run(opt: Opt) -> pyrograph::Result<()> {
    let (format, infile, outfile, mut options) = opt.into_parts();

    if infile.is_none() && io::stdin().is_terminal() {
        eprintln!("flamegraph: waiting for profiler output on STDIN...");
    }

    // fold the raw profiler output first, then plot the folded stacks
    let mut folded = Vec::new();
    collapse_input(format, infile.as_ref(), &mut folded)?;

    match outfile {
        Some(path) => {
            let file = std::fs::File::create(path)?;
            let writer = io::BufWriter::new(file);
            flamegraph::from_reader(&mut options, &folded[..], writer)
        }
        None => {
            let stdout = io::stdout();
            let writer = stdout.lock();
            flamegraph::from_reader(&mut options, &folded[..], writer)
        }
    }
}

fn main() {
    let opt = Opt::parse();

    if !opt.quiet {
        env_logger::Builder::from_env(Env::default().default_filter_or(match opt.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }))
        .format_timestamp(None)
        .init();
    }

    if let Err(e) = run(opt) {
        eprintln!("flamegraph: {}", e);
        std::process::exit(1);
    }
}
