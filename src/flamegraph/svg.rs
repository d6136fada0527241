use std::borrow::Cow;
use std::io::prelude::*;

use quick_xml::events::{BytesCData, BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

use super::{Options, TextTruncateDirection, FRAMES_ID, XPAD};
use crate::error::Result;

pub(super) struct StyleOptions<'a> {
    pub(super) imageheight: usize,
    pub(super) bgcolor1: Cow<'a, str>,
    pub(super) bgcolor2: Cow<'a, str>,
}

pub(super) struct TextItem<'a> {
    pub(super) x: f64,
    pub(super) y: f64,
    pub(super) text: Cow<'a, str>,
    pub(super) location: Option<&'a str>,
    pub(super) extra: Vec<(&'a str, Cow<'a, str>)>,
}

impl<'a> TextItem<'a> {
    pub(super) fn new(x: f64, y: f64, text: impl Into<Cow<'a, str>>) -> Self {
        TextItem {
            x,
            y,
            text: text.into(),
            location: None,
            extra: Vec::new(),
        }
    }

    pub(super) fn anchored(mut self, location: &'a str) -> Self {
        self.location = Some(location);
        self
    }

    pub(super) fn with(mut self, key: &'a str, value: impl Into<Cow<'a, str>>) -> Self {
        self.extra.push((key, value.into()));
        self
    }
}

pub(super) fn write_header<W>(
    svg: &mut Writer<W>,
    imageheight: usize,
    opt: &Options,
) -> Result<()>
where
    W: Write,
{
    let layout_width = opt.layout_width();
    let width_attr = match opt.image_width {
        Some(width) => Cow::from(width.to_string()),
        // fluid layout: the viewBox scales to the viewport
        None => Cow::from("100%"),
    };

    svg.write_event(Event::Decl(BytesDecl::new("1.0", None, Some("no"))))?;
    svg.write_event(Event::DocType(BytesText::from_escaped(
        r#"svg PUBLIC "-//W3C//DTD SVG 1.1//EN" "http://www.w3.org/Graphics/SVG/1.1/DTD/svg11.dtd""#,
    )))?;
    svg.write_event(Event::Start(BytesStart::new("svg").with_attributes([
        ("version", "1.1"),
        ("width", &*width_attr),
        ("height", &*imageheight.to_string()),
        (
            "viewBox",
            &*format!("0 0 {} {}", layout_width, imageheight),
        ),
        ("onload", "init(evt)"),
        ("xmlns", "http://www.w3.org/2000/svg"),
        ("xmlns:xlink", "http://www.w3.org/1999/xlink"),
        ("xmlns:fg", "https://crates.io/crates/pyrograph"),
    ])))?;
    svg.write_event(Event::Comment(BytesText::new(
        "Flame graph stack visualization. \
         See https://github.com/brendangregg/FlameGraph for latest version, \
         and http://www.brendangregg.com/flamegraphs.html for examples.",
    )))?;
    if !opt.notes.is_empty() {
        svg.write_event(Event::Comment(BytesText::new(&format!(
            "NOTES: {}",
            opt.notes
        ))))?;
    }
    Ok(())
}

pub(super) fn write_prelude<W>(
    svg: &mut Writer<W>,
    style_options: &StyleOptions<'_>,
    opt: &Options,
) -> Result<()>
where
    W: Write,
{
    let layout_width = opt.layout_width();
    let imageheight = style_options.imageheight;

    svg.write_event(Event::Start(BytesStart::new("defs")))?;
    svg.write_event(Event::Start(BytesStart::new("linearGradient").with_attributes([
        ("id", "background"),
        ("y1", "0"),
        ("y2", "1"),
        ("x1", "0"),
        ("x2", "0"),
    ])))?;
    svg.write_event(Event::Empty(BytesStart::new("stop").with_attributes([
        ("stop-color", &*style_options.bgcolor1),
        ("offset", "5%"),
    ])))?;
    svg.write_event(Event::Empty(BytesStart::new("stop").with_attributes([
        ("stop-color", &*style_options.bgcolor2),
        ("offset", "95%"),
    ])))?;
    svg.write_event(Event::End(BytesEnd::new("linearGradient")))?;
    svg.write_event(Event::End(BytesEnd::new("defs")))?;

    svg.write_event(Event::Start(
        BytesStart::new("style").with_attributes([("type", "text/css")]),
    ))?;
    let stroke = match opt.stroke_color {
        super::color::StrokeColor::Color(c) => {
            format!(".func_g rect {{ stroke:rgb({},{},{}); stroke-width:1; }}\n", c.r, c.g, c.b)
        }
        super::color::StrokeColor::None => String::new(),
    };
    svg.write_event(Event::Text(BytesText::new(&format!(
        "\n\
         text {{ font-family:{}; font-size:{}px; fill:{}; }}\n\
         #title {{ text-anchor:middle; font-size:{}px; }}\n\
         #subtitle {{ text-anchor:middle; font-size:{}px; fill:rgb(160,160,160); }}\n\
         #details {{ }}\n\
         #matched {{ text-anchor:end; opacity:0.0; }}\n\
         #unzoom {{ cursor:pointer; opacity:0.0; }}\n\
         #search, #ignorecase {{ cursor:pointer; opacity:0.1; }}\n\
         #search:hover, #ignorecase:hover {{ opacity:1.0; }}\n\
         .func_g {{ cursor:pointer; }}\n\
         .func_g:hover {{ stroke:black; stroke-width:0.5; }}\n\
         .func_g text {{ pointer-events:none; }}\n\
         {}",
        opt.font_type,
        opt.font_size,
        opt.ui_color,
        opt.font_size + 5,
        opt.font_size,
        stroke,
    ))))?;
    svg.write_event(Event::End(BytesEnd::new("style")))?;

    if !opt.no_javascript {
        svg.write_event(Event::Start(
            BytesStart::new("script").with_attributes([("type", "text/ecmascript")]),
        ))?;
        let searchterm = match &opt.search_pattern {
            Some(term) => format!("'{}'", term.replace('\\', "\\\\").replace('\'', "\\'")),
            None => "null".to_string(),
        };
        svg.write_event(Event::CData(BytesCData::new(format!(
            "\
var nametype = '{}';
var fontsize = {};
var fontwidth = {};
var xpad = {};
var imagewidth = {};
var minwidth = {};
var truncate_right = {};
var fluiddrawing = {};
var searchcolor = '{}';
var searchterm = {};
",
            opt.name_type.replace('\\', "\\\\").replace('\'', "\\'"),
            opt.font_size,
            opt.font_width,
            XPAD,
            layout_width,
            opt.min_width,
            matches!(opt.text_truncate_direction, TextTruncateDirection::Right),
            opt.image_width.is_none(),
            opt.search_color,
            searchterm,
        ))))?;
        svg.write_event(Event::CData(BytesCData::new(include_str!(
            "flamegraph.js"
        ))))?;
        svg.write_event(Event::End(BytesEnd::new("script")))?;
    }

    svg.write_event(Event::Empty(BytesStart::new("rect").with_attributes([
        ("x", "0"),
        ("y", "0"),
        ("width", &*layout_width.to_string()),
        ("height", &*imageheight.to_string()),
        ("fill", "url(#background)"),
    ])))?;

    write_str(
        svg,
        TextItem::new(
            (layout_width / 2) as f64,
            (opt.font_size * 2) as f64,
            opt.title.as_str(),
        )
        .anchored("middle")
        .with("id", "title"),
    )?;

    if let Some(ref subtitle) = opt.subtitle {
        write_str(
            svg,
            TextItem::new(
                (layout_width / 2) as f64,
                (opt.font_size * 4) as f64,
                subtitle.as_str(),
            )
            .anchored("middle")
            .with("id", "subtitle"),
        )?;
    }

    write_str(
        svg,
        TextItem::new(
            XPAD as f64,
            (imageheight - opt.ypad_bottom() / 2) as f64,
            " ",
        )
        .with("id", "details"),
    )?;

    write_str(
        svg,
        TextItem::new(XPAD as f64, (opt.font_size * 2) as f64, "Reset Zoom")
            .with("id", "unzoom")
            .with("onclick", "unzoom()"),
    )?;

    write_str(
        svg,
        TextItem::new(
            (layout_width - XPAD - 100) as f64,
            (opt.font_size * 2) as f64,
            "Search",
        )
        .with("id", "search")
        .with("onmouseover", "searchover()")
        .with("onmouseout", "searchout()")
        .with("onclick", "search_prompt()"),
    )?;

    write_str(
        svg,
        TextItem::new(
            (layout_width - XPAD - 170) as f64,
            (opt.font_size * 2) as f64,
            "ic",
        )
        .with("id", "ignorecase")
        .with("onclick", "toggle_ignorecase()"),
    )?;

    write_str(
        svg,
        TextItem::new(
            (layout_width - XPAD) as f64,
            (imageheight - opt.ypad_bottom() / 2) as f64,
            " ",
        )
        .with("id", "matched"),
    )?;

    Ok(())
}

/// Opens the nested `<svg id="frames">` container that holds one group per
/// drawn frame; `total_samples` lets the embedded script map sample
/// coordinates back to pixels.
pub(super) fn write_frames_start<W>(svg: &mut Writer<W>, total_samples: u64) -> Result<()>
where
    W: Write,
{
    svg.write_event(Event::Start(BytesStart::new("svg").with_attributes([
        ("id", FRAMES_ID),
        ("total_samples", &*total_samples.to_string()),
    ])))?;
    Ok(())
}

pub(super) fn write_frames_end<W>(svg: &mut Writer<W>) -> Result<()>
where
    W: Write,
{
    svg.write_event(Event::End(BytesEnd::new("svg")))?;
    Ok(())
}

pub(super) fn write_str<W>(svg: &mut Writer<W>, item: TextItem<'_>) -> Result<()>
where
    W: Write,
{
    let x = format!("{:.2}", item.x);
    let y = format!("{:.2}", item.y);
    let mut text = BytesStart::new("text");
    for (key, value) in &item.extra {
        text.push_attribute((*key, &**value));
    }
    if let Some(location) = item.location {
        text.push_attribute(("text-anchor", location));
    }
    text.push_attribute(("x", x.as_str()));
    text.push_attribute(("y", y.as_str()));
    svg.write_event(Event::Start(text))?;
    svg.write_event(Event::Text(BytesText::new(&item.text)))?;
    svg.write_event(Event::End(BytesEnd::new("text")))?;
    Ok(())
}

pub(super) fn finish<W>(svg: &mut Writer<W>) -> Result<()>
where
    W: Write,
{
    svg.write_event(Event::End(BytesEnd::new("svg")))?;
    svg.write_event(Event::Eof)?;
    Ok(())
}
