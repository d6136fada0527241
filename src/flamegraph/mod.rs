pub mod color;
mod merge;
mod svg;

use std::borrow::Cow;
use std::fs::File;
use std::io::prelude::*;
use std::io::{self, BufReader};
use std::iter;
use std::path::PathBuf;
use std::str::FromStr;

use log::warn;
use num_format::Locale;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use str_stack::StrStack;

pub use color::{BackgroundColor, Palette, SearchColor, StrokeColor, UiColor};

use crate::error::{Error, Result};
use color::{Color, VarianceMode, VarianceRng};
use svg::StyleOptions;

const XPAD: usize = 10; // pad left and right
const FRAMEPAD: usize = 1; // vertical padding for frames
const FRAMES_ID: &str = "frames";

/// Default values for [`Options`].
pub mod defaults {
    macro_rules! define {
        ($($(#[$attr:meta])* $name:ident : $t:ty = $val:expr),*) => {
            $(
                $(#[$attr])*
                pub const $name: $t = $val;
            )*
        }
    }

    define! {
        /// `hot`
        COLORS: &str = "hot",
        /// `#e600e6`
        SEARCH_COLOR: &str = "#e600e6",
        /// `Flame Graph`
        TITLE: &str = "Flame Graph",
        /// `Flame Chart` (when `--flamechart` is passed)
        CHART_TITLE: &str = "Flame Chart",
        /// 1200 (the layout width when the image width is fluid)
        IMAGE_WIDTH: usize = 1200,
        /// 16
        FRAME_HEIGHT: usize = 16,
        /// 0.1
        MIN_WIDTH: f64 = 0.1,
        /// `Verdana`
        FONT_TYPE: &str = "Verdana",
        /// 12
        FONT_SIZE: usize = 12,
        /// 0.59
        FONT_WIDTH: f64 = 0.59,
        /// `samples`
        COUNT_NAME: &str = "samples",
        /// `Function:`
        NAME_TYPE: &str = "Function:",
        /// 1.0
        FACTOR: f64 = 1.0
    }
}

/// The direction the plot grows.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Direction {
    /// Stacks grow from the bottom to the top; the `(all)` meta frame is at
    /// the bottom. This is the classic flame graph.
    #[default]
    Straight,

    /// Stacks grow from the top to the bottom; the `(all)` meta frame is at
    /// the top. Also called an icicle graph.
    Inverted,
}

/// Which side of a too-long frame label survives truncation.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum TextTruncateDirection {
    /// Keep the leftmost characters and truncate the tail.
    Left,

    /// Keep the rightmost characters (usually the interesting identifier)
    /// and truncate the head.
    #[default]
    Right,
}

/// Configure the flame graph.
#[derive(Debug, PartialEq)]
pub struct Options {
    /// The color palette to use when plotting.
    pub colors: Palette,

    /// The background color for the plot.
    ///
    /// If `None`, the background color is selected based on the value of
    /// `colors`.
    pub bgcolors: Option<BackgroundColor>,

    /// Derive frame colors from hashes of function names.
    ///
    /// Colors stay stable across runs and similar functions get similar
    /// colors.
    pub hash: bool,

    /// Derive frame colors from a single deterministic hash of the function
    /// name, so each name maps to exactly one color.
    ///
    /// Takes precedence over `hash`.
    pub deterministic: bool,

    /// Spread the palette across sibling frames by horizontal position
    /// instead of drawing color variance per frame.
    pub color_diffusion: bool,

    /// Whether the plot grows bottom-up (the default) or top-down.
    pub direction: Direction,

    /// The fill color for frames highlighted by a search.
    ///
    /// [Default value](SearchColor::default).
    pub search_color: SearchColor,

    /// The fill color for the UI text elements.
    ///
    /// [Default value](UiColor::default).
    pub ui_color: UiColor,

    /// The stroke drawn around every frame rectangle.
    ///
    /// [Default value](StrokeColor::default).
    pub stroke_color: StrokeColor,

    /// A search pattern applied as soon as the graph is loaded.
    pub search_pattern: Option<String>,

    /// The title for the flame graph.
    ///
    /// [Default value](defaults::TITLE).
    pub title: String,

    /// The subtitle for the flame graph.
    ///
    /// Defaults to `None`.
    pub subtitle: Option<String>,

    /// Free-form notes embedded as a comment in the generated SVG.
    pub notes: String,

    /// Width of the flame graph in pixels; `None` produces a fluid image
    /// that fills 100% of the viewport.
    ///
    /// Defaults to `None`.
    pub image_width: Option<usize>,

    /// Height of each frame in pixels.
    ///
    /// [Default value](defaults::FRAME_HEIGHT).
    pub frame_height: usize,

    /// Minimal pixel width below which a frame is elided from the output.
    ///
    /// [Default value](defaults::MIN_WIDTH).
    pub min_width: f64,

    /// The font type for the flame graph.
    ///
    /// [Default value](defaults::FONT_TYPE).
    pub font_type: String,

    /// Font size for the flame graph.
    ///
    /// [Default value](defaults::FONT_SIZE).
    pub font_size: usize,

    /// Average character width relative to the font size; scales the
    /// how-much-text-fits heuristic.
    ///
    /// [Default value](defaults::FONT_WIDTH).
    pub font_width: f64,

    /// Which side of a frame label survives truncation.
    pub text_truncate_direction: TextTruncateDirection,

    /// The unit word used in tooltips (e.g. "samples" or "bytes").
    ///
    /// [Default value](defaults::COUNT_NAME).
    pub count_name: String,

    /// The label prefix used in the details bar (e.g. "Function:").
    ///
    /// [Default value](defaults::NAME_TYPE).
    pub name_type: String,

    /// By default, differential input colors frames by `after - before`.
    /// When set, the differential is computed as `before - after` instead.
    pub negate_differentials: bool,

    /// Factor to scale all sample counts by.
    ///
    /// Useful when the sample data has fractional counts: scale them up to
    /// integers when folding, then set this to scale the displayed counts
    /// back down.
    ///
    /// [Default value](defaults::FACTOR).
    pub factor: f64,

    /// Pretty print the XML with newlines and indentation.
    pub pretty_xml: bool,

    /// Produce a flame chart: keep the input order (time on the x axis)
    /// instead of sorting and merging identical stacks alphabetically.
    pub flame_chart: bool,

    /// Reverse the semicolon-separated segments of every stack before
    /// building the graph, so the graph merges on leaves instead of roots.
    pub reverse_stack_order: bool,

    /// Don't include the interactive JavaScript in the flame graph.
    /// This is only meant to be used in tests.
    #[doc(hidden)]
    pub no_javascript: bool,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            colors: Palette::from_str(defaults::COLORS).unwrap(),
            search_color: SearchColor::from_str(defaults::SEARCH_COLOR).unwrap(),
            title: defaults::TITLE.to_string(),
            frame_height: defaults::FRAME_HEIGHT,
            min_width: defaults::MIN_WIDTH,
            font_type: defaults::FONT_TYPE.to_string(),
            font_size: defaults::FONT_SIZE,
            font_width: defaults::FONT_WIDTH,
            count_name: defaults::COUNT_NAME.to_string(),
            name_type: defaults::NAME_TYPE.to_string(),
            factor: defaults::FACTOR,
            image_width: Default::default(),
            bgcolors: Default::default(),
            hash: Default::default(),
            deterministic: Default::default(),
            color_diffusion: Default::default(),
            direction: Default::default(),
            ui_color: Default::default(),
            stroke_color: Default::default(),
            search_pattern: Default::default(),
            subtitle: Default::default(),
            notes: Default::default(),
            text_truncate_direction: Default::default(),
            negate_differentials: Default::default(),
            pretty_xml: Default::default(),
            flame_chart: Default::default(),
            reverse_stack_order: Default::default(),
            no_javascript: Default::default(),
        }
    }
}

impl Options {
    /// Pad top, including title (and subtitle, when present).
    pub(super) fn ypad_top(&self) -> usize {
        if self.subtitle.is_some() {
            self.font_size * 5
        } else {
            self.font_size * 3
        }
    }

    /// Pad bottom, including labels.
    pub(super) fn ypad_bottom(&self) -> usize {
        self.font_size * 2 + 10
    }

    /// The width of the layout coordinate system; for fluid images this is
    /// the `viewBox` width the viewport scales.
    pub(super) fn layout_width(&self) -> usize {
        self.image_width.unwrap_or(defaults::IMAGE_WIDTH)
    }

    fn validate(&self) -> Result<()> {
        if let Some(width) = self.image_width {
            if width <= 2 * XPAD {
                return Err(Error::InvalidConfig(
                    "image width must exceed the side padding".into(),
                ));
            }
        }
        if !(self.min_width >= 0.0) {
            return Err(Error::InvalidConfig(
                "minimum frame width cannot be negative".into(),
            ));
        }
        if !(self.factor > 0.0) {
            return Err(Error::InvalidConfig("factor must be positive".into()));
        }
        if self.frame_height == 0 {
            return Err(Error::InvalidConfig(
                "frame height must be positive".into(),
            ));
        }
        Ok(())
    }
}

struct Rectangle {
    x1: f64,
    y1: usize,
    x2: f64,
    y2: usize,
}

impl Rectangle {
    fn width(&self) -> f64 {
        self.x2 - self.x1
    }
    fn height(&self) -> usize {
        self.y2 - self.y1
    }
}

/// Produce a flame graph from an iterator over folded stack lines.
///
/// This function expects each folded stack to contain the following
/// whitespace-separated fields:
///
///  - A semicolon-separated list of frame names (e.g., `main;foo;bar;baz`).
///  - A sample count for the given stack.
///  - An optional second sample count.
///
/// If two sample counts are provided, a [differential flame graph] is
/// produced: the flame graph is laid out from the second count, and each
/// frame is colored by the difference between its counts.
///
/// The resulting flame graph is written to `writer` in SVG format.
///
/// [differential flame graph]: http://www.brendangregg.com/blog/2014-11-09/differential-flame-graphs.html
pub fn from_lines<'a, I, W>(opt: &mut Options, lines: I, writer: W) -> Result<()>
where
    I: IntoIterator<Item = &'a str>,
    W: Write,
{
    opt.validate()?;

    let mut reversed = StrStack::new();
    let (mut frames, time, ignored, delta_max) = if opt.reverse_stack_order {
        if opt.flame_chart {
            warn!(
                "Input lines are always sorted when `reverse_stack_order` is `true`. \
                 The `flame_chart` option is being ignored."
            );
        }
        // Reverse the stack segments of every line, then sort.
        let mut stack = String::new();
        for line in lines {
            stack.clear();
            let samples_idx = merge::rfind_samples(line)
                .map(|(i, _)| i)
                .unwrap_or_else(|| line.len());
            let samples_idx = merge::rfind_samples(line[..samples_idx].trim_end())
                .map(|(i, _)| i)
                .unwrap_or(samples_idx);
            for (i, func) in line[..samples_idx].trim().split(';').rev().enumerate() {
                if i != 0 {
                    stack.push(';');
                }
                stack.push_str(func);
            }
            stack.push(' ');
            stack.push_str(line[samples_idx..].trim());
            reversed.push(&stack);
        }
        let mut reversed: Vec<&str> = reversed.iter().collect();
        reversed.sort_unstable();
        merge::frames(reversed, false)?
    } else if opt.flame_chart {
        // In flame chart mode, just reverse the data so time moves from
        // left to right.
        let mut lines: Vec<&str> = lines.into_iter().collect();
        lines.reverse();
        merge::frames(lines, true)?
    } else {
        let mut lines: Vec<&str> = lines.into_iter().collect();
        lines.sort_unstable();
        merge::frames(lines, false)?
    };

    if ignored != 0 {
        warn!("Ignored {} lines with invalid format", ignored);
    }

    if time == 0 {
        // nothing to draw; no output at all is better than an empty image
        return Err(Error::EmptyProfile);
    }

    let mut svg = if opt.pretty_xml {
        Writer::new_with_indent(writer, b' ', 4)
    } else {
        Writer::new(writer)
    };

    let layout_width = opt.layout_width();
    let timemax = time;
    let widthpertime = (layout_width - 2 * XPAD) as f64 / timemax as f64;
    let minwidth_time = opt.min_width / widthpertime;

    // prune blocks that are too narrow
    let mut depthmax = 0;
    frames.retain(|frame| {
        if (frame.width() as f64) < minwidth_time {
            false
        } else {
            depthmax = std::cmp::max(depthmax, frame.location.depth);
            true
        }
    });

    // draw the canvas and embed the interactive script
    let imageheight = ((depthmax + 1) * opt.frame_height) + opt.ypad_top() + opt.ypad_bottom();
    svg::write_header(&mut svg, imageheight, opt)?;

    let (bgcolor1, bgcolor2) = color::bgcolor_for(opt.bgcolors, opt.colors);
    let style_options = StyleOptions {
        imageheight,
        bgcolor1,
        bgcolor2,
    };
    svg::write_prelude(&mut svg, &style_options, opt)?;

    let scaled_total = (timemax as f64 * opt.factor).round() as u64;
    svg::write_frames_start(&mut svg, scaled_total)?;

    let variance_mode = if opt.deterministic {
        VarianceMode::Deterministic
    } else if opt.hash {
        VarianceMode::NameHash
    } else {
        VarianceMode::Random
    };
    let mut rng = VarianceRng::new();

    let mut buffer = StrStack::new();
    let mut samples_txt_buffer = num_format::Buffer::default();

    for frame in frames {
        let x1 = XPAD as f64 + frame.start_time as f64 * widthpertime;
        let x2 = XPAD as f64 + frame.end_time as f64 * widthpertime;

        let (y1, y2) = match opt.direction {
            Direction::Straight => {
                let y1 = imageheight
                    - opt.ypad_bottom()
                    - (frame.location.depth + 1) * opt.frame_height
                    + FRAMEPAD;
                let y2 = imageheight - opt.ypad_bottom() - frame.location.depth * opt.frame_height;
                (y1, y2)
            }
            Direction::Inverted => {
                let y1 = opt.ypad_top() + frame.location.depth * opt.frame_height;
                let y2 = opt.ypad_top() + (frame.location.depth + 1) * opt.frame_height - FRAMEPAD;
                (y1, y2)
            }
        };
        let rect = Rectangle { x1, y1, x2, y2 };

        let samples = (frame.width() as f64 * opt.factor).round() as u64;
        let _ = samples_txt_buffer.write_formatted(&samples, &Locale::en);
        let samples_txt = samples_txt_buffer.as_str();

        let info = if frame.location.function.is_empty() && frame.location.depth == 0 {
            write!(buffer, "all ({} {}, 100%)", samples_txt, opt.count_name)
        } else {
            let pct = (100 * samples) as f64 / (timemax as f64 * opt.factor);
            let function = deannotate(frame.location.function);
            match frame.delta {
                None => write!(
                    buffer,
                    "{} ({} {}, {:.2}%)",
                    function, samples_txt, opt.count_name, pct
                ),
                // special-case zero so the percentage has no + sign
                Some(0) => write!(
                    buffer,
                    "{} ({} {}, {:.2}%; 0.00%)",
                    function, samples_txt, opt.count_name, pct
                ),
                Some(mut delta) => {
                    if opt.negate_differentials {
                        delta = -delta;
                    }
                    let delta_pct = (100 * delta) as f64 / (timemax as f64 * opt.factor);
                    write!(
                        buffer,
                        "{} ({} {}, {:.2}%; {:+.2}%)",
                        function, samples_txt, opt.count_name, pct, delta_pct
                    )
                }
            }
        };

        // the frame group carries its sample coordinates so the embedded
        // script can recompute pixel positions when zooming
        let fg_x = (frame.start_time as f64 * opt.factor).round() as u64;
        let fg_x = fg_x.to_string();
        let fg_w = samples.to_string();
        let mut group = BytesStart::new("g");
        group.push_attribute(("class", "func_g"));
        group.push_attribute(("onmouseover", "s(this)"));
        group.push_attribute(("onmouseout", "c()"));
        group.push_attribute(("onclick", "zoom(this)"));
        group.push_attribute(("fg:x", fg_x.as_str()));
        group.push_attribute(("fg:w", fg_w.as_str()));
        svg.write_event(Event::Start(group))?;

        svg.write_event(Event::Start(BytesStart::new("title")))?;
        svg.write_event(Event::Text(BytesText::new(&buffer[info])))?;
        svg.write_event(Event::End(BytesEnd::new("title")))?;

        // pick the rectangle's color
        let color = if frame.location.function == "--" {
            color::VDGREY
        } else if frame.location.function == "-" {
            color::DGREY
        } else if let Some(mut delta) = frame.delta {
            if opt.negate_differentials {
                delta = -delta;
            }
            color::color_scale(delta, delta_max)
        } else if opt.color_diffusion {
            // spread the palette horizontally across the graph
            let v = frame.start_time as f64 / timemax as f64;
            color::rgb_for(
                opt.colors,
                frame.location.function,
                v as f32,
                v as f32,
                v as f32,
            )
        } else {
            color::color(opt.colors, variance_mode, frame.location.function, &mut rng)
        };
        filled_rectangle(&mut svg, &mut buffer, &rect, color)?;

        let fitchars =
            (rect.width() / (opt.font_size as f64 * opt.font_width)).trunc() as usize;
        let text: Cow<'_, str> = if fitchars >= 3 {
            // room for one char plus two dots
            let f = deannotate(frame.location.function);
            if f.chars().count() < fitchars {
                f.into()
            } else {
                truncate_text(f, fitchars, opt.text_truncate_direction).into()
            }
        } else {
            // not room enough for any label
            "".into()
        };

        svg::write_str(
            &mut svg,
            svg::TextItem::new(rect.x1 + 3.0, 3.0 + (rect.y1 + rect.y2) as f64 / 2.0, text),
        )?;

        buffer.clear();
        svg.write_event(Event::End(BytesEnd::new("g")))?;
    }

    svg::write_frames_end(&mut svg)?;
    svg::finish(&mut svg)?;

    Ok(())
}

/// Produce a flame graph from a reader that contains folded stack lines.
///
/// See [`from_lines`] for the expected format of each line.
pub fn from_reader<R, W>(opt: &mut Options, reader: R, writer: W) -> Result<()>
where
    R: Read,
    W: Write,
{
    from_readers(opt, iter::once(reader), writer)
}

/// Produce a flame graph from a set of readers that contain folded stack
/// lines.
///
/// See [`from_lines`] for the expected format of each line.
pub fn from_readers<R, W>(opt: &mut Options, readers: R, writer: W) -> Result<()>
where
    R: IntoIterator,
    R::Item: Read,
    W: Write,
{
    let mut input = String::new();
    for mut reader in readers {
        reader.read_to_string(&mut input)?;
    }
    from_lines(opt, input.lines(), writer)
}

/// Produce a flame graph from files that contain folded stack lines and
/// write the result to the provided `writer`.
///
/// If `files` is empty, or contains only `-`, STDIN is used as input.
pub fn from_files<W: Write>(opt: &mut Options, files: &[PathBuf], writer: W) -> Result<()> {
    if files.is_empty() || files.len() == 1 && files[0].to_str() == Some("-") {
        let stdin = io::stdin();
        let r = BufReader::with_capacity(128 * 1024, stdin.lock());
        from_reader(opt, r, writer)
    } else if files.len() == 1 {
        let r = File::open(&files[0])?;
        from_reader(opt, r, writer)
    } else {
        let stdin = io::stdin();
        let mut stdin_added = false;
        let mut readers: Vec<Box<dyn Read>> = Vec::with_capacity(files.len());
        for infile in files.iter() {
            if infile.to_str() == Some("-") {
                if !stdin_added {
                    let r = BufReader::with_capacity(128 * 1024, stdin.lock());
                    readers.push(Box::new(r));
                    stdin_added = true;
                }
            } else {
                let r = File::open(infile)?;
                readers.push(Box::new(r));
            }
        }
        from_readers(opt, readers, writer)
    }
}

// Strips a trailing `_[k]`, `_[w]`, `_[i]` or `_[j]` annotation for display.
fn deannotate(f: &str) -> &str {
    if f.ends_with(']') {
        if let Some(ai) = f.rfind("_[") {
            if f[ai..].len() == 4 && "kwij".contains(&f[ai + 2..ai + 3]) {
                return &f[..ai];
            }
        }
    }
    f
}

fn truncate_text(text: &str, fitchars: usize, direction: TextTruncateDirection) -> String {
    let mut truncated = String::with_capacity(fitchars);
    match direction {
        TextTruncateDirection::Left => {
            for c in text.chars().take(fitchars - 2) {
                truncated.push(c);
            }
            truncated.push_str("..");
        }
        TextTruncateDirection::Right => {
            truncated.push_str("..");
            let skip = text.chars().count() - (fitchars - 2);
            for c in text.chars().skip(skip) {
                truncated.push(c);
            }
        }
    }
    truncated
}

fn filled_rectangle<W: Write>(
    svg: &mut Writer<W>,
    buffer: &mut StrStack,
    rect: &Rectangle,
    color: Color,
) -> Result<()> {
    let x = write!(buffer, "{:.2}", rect.x1);
    let y = write!(buffer, "{}", rect.y1);
    let width = write!(buffer, "{:.2}", rect.width());
    let height = write!(buffer, "{}", rect.height());
    let fill = write!(buffer, "rgb({},{},{})", color.r, color.g, color.b);

    let mut rect_event = BytesStart::new("rect");
    rect_event.push_attribute(("x", &buffer[x]));
    rect_event.push_attribute(("y", &buffer[y]));
    rect_event.push_attribute(("width", &buffer[width]));
    rect_event.push_attribute(("height", &buffer[height]));
    rect_event.push_attribute(("fill", &buffer[fill]));
    svg.write_event(Event::Empty(rect_event))?;
    Ok(())
}
