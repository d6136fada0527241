//! Collapser of xctrace-exported XML files.
//!
//! A simplified `xctrace export` document looks like:
//!
//! ```xml
//! <?xml version="1.0"?>
//! <trace-query-result>
//! <node xpath='//trace-toc[1]/run[1]/data[1]/table[1]'>
//!     <row>
//!         <backtrace id="10">
//!             <frame id="11" name="leaf" addr="0x18d3df0f1"></frame>
//!             <frame id="13" name="start" addr="0x18d373904"></frame>
//!         </backtrace>
//!     </row>
//!     <row>
//!         <backtrace ref="10"/>
//!     </row>
//! </node>
//! </trace-query-result>
//! ```
//!
//! Frames are listed leaf first. Backtraces and frames are address-based and
//! deduplicated through `id`/`ref` attributes, so identical symbolized
//! stacks can hide behind distinct ids; the occurrence table merges them.

use std::collections::BTreeMap;
use std::io;

use quick_xml_28::events::attributes::Attributes;
use quick_xml_28::events::Event;
use quick_xml_28::reader::Reader;

use super::common::Occurrences;
use super::util;
use super::Collapse;
use crate::error::{malformed, Result};

// Tag names of interest.
const TRACE_QUERY_RESULT: &[u8] = b"trace-query-result";
const ROW: &[u8] = b"row";
const BACKTRACE: &[u8] = b"backtrace";
const FRAME: &[u8] = b"frame";

// Attribute names of interest.
const ID: &[u8] = b"id";
const REF: &[u8] = b"ref";
const NAME: &[u8] = b"name";
const SAMPLE_COUNT: &[u8] = b"sample-count";

/// A stack collapser for XML traces exported by `xctrace export`.
#[derive(Default)]
pub struct Folder {
    /// frame id -> symbolized name
    frames: BTreeMap<u64, Box<str>>,

    /// backtrace id -> frame ids, leaf first
    backtraces: BTreeMap<u64, Vec<u64>>,

    /// Weight of the row currently being read, when inside a `<row>`.
    row_weight: Option<u64>,

    /// Backtrace referenced by the current row, once seen.
    row_backtrace: Option<u64>,

    /// Frames of the backtrace currently being read, when inside a
    /// `<backtrace>`: (id, collected frame ids).
    open_backtrace: Option<(u64, Vec<u64>)>,

    /// Number of times each call stack has been seen.
    occurrences: Occurrences,
}

impl Collapse for Folder {
    fn collapse<R, W>(&mut self, reader: R, writer: W) -> Result<()>
    where
        R: io::BufRead,
        W: io::Write,
    {
        let mut reader = Reader::from_reader(reader);
        let mut buf = Vec::new();
        let mut seen_root = false;
        loop {
            let event = reader
                .read_event_into(&mut buf)
                .map_err(|e| malformed!("read xml event failed: {}", e))?;
            match event {
                Event::Start(ref start) => {
                    let name = start.name();
                    let attributes = start.attributes();
                    if name.into_inner() == TRACE_QUERY_RESULT {
                        seen_root = true;
                    }
                    self.on_tag_open(name.into_inner(), attributes, false)?;
                }
                Event::Empty(ref empty) => {
                    let name = empty.name();
                    let attributes = empty.attributes();
                    self.on_tag_open(name.into_inner(), attributes, true)?;
                }
                Event::End(ref end) => {
                    self.on_tag_close(end.name().into_inner())?;
                }
                Event::Eof => {
                    if !seen_root {
                        return Err(malformed!("no trace-query-result element found"));
                    }
                    break;
                }
                _ => {}
            }
            buf.clear();
        }

        self.occurrences.write_and_clear(writer)?;
        self.frames.clear();
        self.backtraces.clear();
        Ok(())
    }

    fn is_applicable(&mut self, input: &str) -> bool {
        let mut is_xml = false;
        for line in input.lines() {
            let trimmed = util::trim_ascii(line);
            if trimmed.is_empty() {
                continue;
            }
            is_xml = is_xml || trimmed.contains(r#"<?xml version="1.0""#);
            if is_xml && trimmed.contains("<trace-query-result") {
                return true;
            }
        }
        false
    }
}

impl Folder {
    fn on_tag_open(&mut self, tag: &[u8], attributes: Attributes<'_>, empty: bool) -> Result<()> {
        match tag {
            ROW => {
                self.row_weight =
                    Some(u64_attribute(&attributes, SAMPLE_COUNT)?.unwrap_or(1));
                self.row_backtrace = None;
            }
            BACKTRACE if self.row_weight.is_some() => {
                if let Some(id) = u64_attribute(&attributes, REF)? {
                    if !self.backtraces.contains_key(&id) {
                        return Err(malformed!("invalid backtrace ref id: {}", id));
                    }
                    self.row_backtrace = Some(id);
                } else {
                    let id = u64_attribute(&attributes, ID)?
                        .ok_or_else(|| malformed!("backtrace without id or ref"))?;
                    if self.backtraces.contains_key(&id) {
                        return Err(malformed!("repeated backtrace id: {}", id));
                    }
                    if empty {
                        self.backtraces.insert(id, Vec::new());
                        self.row_backtrace = Some(id);
                    } else {
                        self.open_backtrace = Some((id, Vec::new()));
                    }
                }
            }
            FRAME => {
                let open = match self.open_backtrace.as_mut() {
                    Some(open) => open,
                    // frames outside a backtrace belong to tables we do not read
                    None => return Ok(()),
                };
                let id = if let Some(id) = u64_attribute(&attributes, REF)? {
                    if !self.frames.contains_key(&id) {
                        return Err(malformed!("invalid frame ref id: {}", id));
                    }
                    id
                } else {
                    let id = u64_attribute(&attributes, ID)?
                        .ok_or_else(|| malformed!("frame without id or ref"))?;
                    if self.frames.contains_key(&id) {
                        return Err(malformed!("repeated frame id: {}", id));
                    }
                    let name = name_attribute(&attributes)?;
                    self.frames.insert(id, name);
                    id
                };
                open.1.push(id);
            }
            _ => {}
        }

        // Empty frame/backtrace elements have no matching end tag, but their
        // bookkeeping is already done above; an empty row has no backtrace
        // and is simply dropped.
        if empty && tag == ROW {
            self.row_weight = None;
            self.row_backtrace = None;
        }
        Ok(())
    }

    fn on_tag_close(&mut self, tag: &[u8]) -> Result<()> {
        match tag {
            BACKTRACE => {
                if let Some((id, frame_ids)) = self.open_backtrace.take() {
                    self.backtraces.insert(id, frame_ids);
                    self.row_backtrace = Some(id);
                }
            }
            ROW => {
                if let (Some(weight), Some(backtrace)) = (self.row_weight, self.row_backtrace) {
                    let folded = self.resolve(backtrace)?;
                    if !folded.is_empty() {
                        self.occurrences.add_owned(folded, weight);
                    }
                }
                self.row_weight = None;
                self.row_backtrace = None;
            }
            _ => {}
        }
        Ok(())
    }

    // Joins a backtrace's frame names root first.
    fn resolve(&self, backtrace: u64) -> Result<String> {
        let frame_ids = self
            .backtraces
            .get(&backtrace)
            .ok_or_else(|| malformed!("unregistered backtrace id: {}", backtrace))?;
        let mut folded = String::new();
        // frames are listed top (leaf) to bottom in xctrace's output
        for id in frame_ids.iter().rev() {
            let name = self
                .frames
                .get(id)
                .ok_or_else(|| malformed!("unregistered frame id: {}", id))?;
            if !folded.is_empty() {
                folded.push(';');
            }
            folded.push_str(&util::fix_partially_demangled_rust_symbol(name));
        }
        Ok(folded)
    }
}

fn u64_attribute(attributes: &Attributes<'_>, key: &[u8]) -> Result<Option<u64>> {
    let value = attributes
        .clone()
        .filter_map(|a| a.ok())
        .find_map(|a| (a.key.into_inner() == key).then_some(a.value));
    let value = match value {
        Some(v) => v,
        None => return Ok(None),
    };
    let value = String::from_utf8_lossy(&value);
    match value.parse() {
        Ok(v) => Ok(Some(v)),
        Err(e) => Err(malformed!(
            "unparseable {} attribute {:?}: {}",
            String::from_utf8_lossy(key),
            value,
            e
        )),
    }
}

fn name_attribute(attributes: &Attributes<'_>) -> Result<Box<str>> {
    let value = attributes
        .clone()
        .filter_map(|a| a.ok())
        .find_map(|a| (a.key.into_inner() == NAME).then_some(a.value));
    let value = match value {
        Some(v) => v,
        None => return Err(malformed!("frame without a name attribute")),
    };
    // entity references in names are decoded before use
    let raw = String::from_utf8_lossy(&value);
    match quick_xml_28::escape::unescape(&raw) {
        Ok(unescaped) => Ok(unescaped.into_owned().into_boxed_str()),
        Err(e) => Err(malformed!("invalid xml text in frame name: {:?}", e)),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn collapse_to_string(input: &str) -> String {
        let mut out = Vec::new();
        Folder::default()
            .collapse(input.as_bytes(), &mut out)
            .unwrap();
        String::from_utf8(out).unwrap()
    }

    const BASIC: &str = r#"<?xml version="1.0"?>
<trace-query-result>
<node xpath='//trace-toc[1]/run[1]/data[1]/table[1]'>
    <row>
        <backtrace id="10">
            <frame id="11" name="work" addr="0x18d3df0f1"></frame>
            <frame id="13" name="main" addr="0x18d373904"></frame>
            <frame id="14" name="start" addr="0x18d373905"></frame>
        </backtrace>
    </row>
    <row>
        <backtrace ref="10"/>
    </row>
    <row>
        <backtrace id="20">
            <frame id="21" name="other" addr="0x102af5d99"></frame>
            <frame ref="13"/>
            <frame ref="14"/>
        </backtrace>
    </row>
</node>
</trace-query-result>
"#;

    #[test]
    fn merges_referenced_backtraces() {
        let out = collapse_to_string(BASIC);
        assert_eq!(
            out,
            "\
start;main;other 1
start;main;work 2
"
        );
    }

    #[test]
    fn decodes_entity_references_in_names() {
        let input = r#"<?xml version="1.0"?>
<trace-query-result>
<node>
    <row>
        <backtrace id="1">
            <frame id="2" name="dyld4::prepare(dyld4::APIs&amp;)" addr="0x1"></frame>
        </backtrace>
    </row>
</node>
</trace-query-result>
"#;
        let out = collapse_to_string(input);
        assert_eq!(out, "dyld4::prepare(dyld4::APIs&) 1\n");
    }

    #[test]
    fn honors_row_sample_counts() {
        let input = r#"<?xml version="1.0"?>
<trace-query-result>
<node>
    <row sample-count="5">
        <backtrace id="1">
            <frame id="2" name="main" addr="0x1"></frame>
        </backtrace>
    </row>
</node>
</trace-query-result>
"#;
        let out = collapse_to_string(input);
        assert_eq!(out, "main 5\n");
    }

    #[test]
    fn repeated_ids_are_fatal() {
        let input = r#"<?xml version="1.0"?>
<trace-query-result>
<node>
    <row>
        <backtrace id="1">
            <frame id="2" name="main" addr="0x1"></frame>
            <frame id="2" name="main" addr="0x1"></frame>
        </backtrace>
    </row>
</node>
</trace-query-result>
"#;
        let err = Folder::default()
            .collapse(input.as_bytes(), io::sink())
            .expect_err("repeated frame id should error");
        assert!(matches!(
            err,
            crate::error::Error::MalformedInput { .. }
        ));
    }

    #[test]
    fn fixes_partially_demangled_rust_names() {
        let input = r#"<?xml version="1.0"?>
<trace-query-result>
<node>
    <row>
        <backtrace id="1">
            <frame id="2" name="rust_test::foo::ha31fba0d06a8a3eb" addr="0x1"></frame>
        </backtrace>
    </row>
</node>
</trace-query-result>
"#;
        let out = collapse_to_string(input);
        assert_eq!(out, "rust_test::foo 1\n");
    }

    #[test]
    fn sniffs_xctrace_output() {
        let mut folder = Folder::default();
        assert!(folder.is_applicable(BASIC));
        assert!(!folder.is_applicable("foo;bar 12\n"));
    }
}
