use std::io;
use std::path::PathBuf;

use clap::Parser;
use env_logger::Env;

use pyrograph::differential::{self, Options};

#[derive(Debug, Parser)]
#[command(
    name = "diff-folded",
    about = "Join two folded profiles into differential flame graph input"
)]
struct Opt {
    /// Normalize the first profile's total count to match the second
    #[arg(short = 'n', long = "normalize")]
    normalize: bool,

    /// Replace hex addresses with "0x..." before joining
    #[arg(short = 'x', long = "strip-hex")]
    strip_hex: bool,

    /// Silence all log output
    #[arg(short = 'q', long = "quiet")]
    quiet: bool,

    /// Verbose logging mode (-v, -vv, -vvv)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,

    /// Output file; defaults to standard output
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,

    /// Folded profile of the "before" run
    #[arg(value_name = "BEFORE_FILE")]
    infile1: PathBuf,

    /// Folded profile of the "after" run
    #[arg(value_name = "AFTER_FILE")]
    infile2: PathBuf,
}

impl Opt {
    fn into_parts(self) -> (PathBuf, PathBuf, Option<PathBuf>, Options) {
        let options = Options {
            normalize: self.normalize,
            strip_hex: self.strip_hex,
        };
        (self.infile1, self.infile2, self.output, options)
    }
}

fn run(opt: Opt) -> pyrograph::Result<()> {
    let (infile1, infile2, outfile, options) = opt.into_parts();
    match outfile {
        Some(path) => {
            let file = std::fs::File::create(path)?;
            let writer = io::BufWriter::new(file);
            differential::from_files(&options, infile1, infile2, writer)
        }
        None => {
            let stdout = io::stdout();
            let writer = stdout.lock();
            differential::from_files(&options, infile1, infile2, writer)
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
        eprintln!("diff-folded: {}", e);
        std::process::exit(1);
    }
}
