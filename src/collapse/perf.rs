use std::collections::VecDeque;
use std::io;

use log::{info, warn};

use super::common::{Occurrences, CAPACITY_LINE};
use super::util;
use super::Collapse;
use crate::error::Result;

const TIDY_GENERIC: bool = true;
const TIDY_JAVA: bool = true;

/// Module suffixes that indicate a JIT-compiled script frame.
const JIT_MODULE_SUFFIXES: &[&str] = &[".js", ".mjs", ".jsx", ".ts"];

/// `perf` folder configuration options.
#[derive(Clone, Debug)]
pub struct Options {
    /// Annotate JIT functions with a `_[j]` suffix.
    ///
    /// Default is `false`.
    pub annotate_jit: bool,

    /// Annotate kernel functions with a `_[k]` suffix.
    ///
    /// Default is `false`.
    pub annotate_kernel: bool,

    /// Only consider samples of the given event type (see `perf list`). If
    /// this option is set to `None`, the first encountered event type is
    /// adopted.
    ///
    /// Default is `None`.
    pub event_filter: Option<String>,

    /// Include raw addresses (e.g., `0xbfff0836`) where symbols can't be found.
    ///
    /// Default is `false`.
    pub include_addrs: bool,

    /// Include the process name as the root frame of every stack.
    ///
    /// Default is `true`.
    pub include_pname: bool,

    /// Include PID with the process name in the root frame. Implies
    /// `include_pname`.
    ///
    /// Default is `false`.
    pub include_pid: bool,

    /// Include TID and PID with the process name in the root frame. Implies
    /// `include_pid`.
    ///
    /// Default is `false`.
    pub include_tid: bool,

    /// Frame names after which all shallower frames are discarded.
    ///
    /// When a stack contains a frame whose name is in this list, only the
    /// frames strictly deeper than the (deepest) match are kept. Useful to
    /// cut off uninteresting runtime scaffolding below `main`.
    ///
    /// Default is empty.
    pub skip_after: Vec<String>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            annotate_jit: false,
            annotate_kernel: false,
            event_filter: None,
            include_addrs: false,
            include_pname: true,
            include_pid: false,
            include_tid: false,
            skip_after: Vec::new(),
        }
    }
}

/// A stack collapser for the output of `perf script`.
///
/// To construct one, either use `perf::Folder::default()` or create an
/// [`Options`] and use `perf::Folder::from(options)`.
pub struct Folder {
    /// Whether we are currently between an event header and its terminating
    /// blank line; all lines in that window are stack lines.
    in_event: bool,

    /// Skip all stack lines of the current event.
    skip_stack: bool,

    /// Discard frames shallower than an already-seen `skip_after` match.
    skip_shallower: bool,

    /// Function entries of the sample being assembled, root first.
    stack: VecDeque<String>,

    /// Number of times each call stack has been seen.
    occurrences: Occurrences,

    /// Event type adopted as filter; either the configured one or the first
    /// one encountered in the input.
    event_filter: Option<String>,

    /// Whether the adopted filter was defaulted (in which case a skipped
    /// event type is reported once).
    event_filter_defaulted: bool,
    event_filter_warned: bool,

    /// Current process name, from the last event header or a
    /// `# cmdline :` comment. Called pname after the original
    /// stackcollapse-perf source.
    pname: String,

    opt: Options,
}

impl From<Options> for Folder {
    fn from(mut opt: Options) -> Self {
        opt.include_pid = opt.include_pid || opt.include_tid;
        opt.include_pname = opt.include_pname || opt.include_pid;
        Self {
            in_event: false,
            skip_stack: false,
            skip_shallower: false,
            stack: VecDeque::default(),
            occurrences: Occurrences::new(),
            event_filter: opt.event_filter.clone(),
            event_filter_defaulted: false,
            event_filter_warned: false,
            pname: String::new(),
            opt,
        }
    }
}

impl Default for Folder {
    fn default() -> Self {
        Options::default().into()
    }
}

impl Collapse for Folder {
    fn collapse<R, W>(&mut self, mut reader: R, writer: W) -> Result<()>
    where
        R: io::BufRead,
        W: io::Write,
    {
        let mut line = String::with_capacity(CAPACITY_LINE);
        loop {
            line.clear();
            if reader.read_line(&mut line)? == 0 {
                break;
            }

            if let Some(comment) = line.strip_prefix('#') {
                self.on_comment_line(comment);
                continue;
            }

            let line = util::trim_ascii_end(&line);
            if line.is_empty() {
                self.after_event();
            } else {
                self.on_line(line);
            }
        }
        // perf output need not end in a blank line
        if self.in_event {
            self.after_event();
        }

        self.occurrences.write_and_clear(writer)?;
        self.reset();
        Ok(())
    }

    fn is_applicable(&mut self, input: &str) -> bool {
        // Perf event headers are the only non-indented lines; the first one
        // settles the matter.
        for line in input.lines() {
            if line.starts_with('#') {
                continue;
            }
            let line = util::trim_ascii_end(line);
            if line.is_empty() || line.starts_with(|c: char| c.is_ascii_whitespace()) {
                continue;
            }
            return event_line_parts(line).is_some() && line.ends_with(':');
        }
        false
    }
}

// Splits an event header into (comm, pid, tid), where comm may itself
// contain spaces (e.g. "V8 WorkerThread"). The pid/tid word is the first
// all-digit (optionally slash-separated) word, like:
//
//     java 25607 4794564.109216: cycles:
//     java 24636/25607 [000] 4794564.109216: cycles:
//     V8 WorkerThread 25607 4794564.109216: cycles:
fn event_line_parts(line: &str) -> Option<(&str, &str, &str)> {
    let mut word_start = 0;
    let mut all_digits = false;
    let mut last_was_space = false;
    let mut slash_at = None;
    for (idx, c) in line.char_indices() {
        if c == ' ' {
            if all_digits && !last_was_space {
                let (pid, tid) = match slash_at {
                    Some(slash) => (&line[word_start..slash], &line[slash + 1..idx]),
                    None => ("?", &line[word_start..idx]),
                };
                // trim in case multiple spaces separated comm from the ids
                let comm = line[..word_start - 1].trim();
                return Some((comm, pid, tid));
            }
            word_start = idx + 1;
            all_digits = true;
            slash_at = None;
        } else if c == '/' {
            if all_digits {
                slash_at = Some(idx);
            }
        } else if !c.is_ascii_digit() {
            all_digits = false;
            slash_at = None;
        }
        last_was_space = c == ' ';
    }
    None
}

// Splits a stack line into (pc, rawfunc, module):
//
//     ffffffff8103ce3b native_safe_halt ([kernel.kallsyms])
//     7f533952bc77 _dl_check_map_versions+0x597 (/usr/lib/ld-2.28.so)
//     7f53389994d0 [unknown] ([unknown])
fn stack_line_parts(line: &str) -> Option<(&str, &str, &str)> {
    let mut line = util::trim_ascii(line).splitn(2, ' ');
    let pc = line.next()?;
    let mut rest = line.next()?.rsplitn(2, ' ');
    let mut module = rest.next()?;
    if module.len() < 2 || !module.starts_with('(') || !module.ends_with(')') {
        return None;
    }
    module = &module[1..module.len() - 1];
    let rawfunc = match rest.next()?.trim() {
        // Sometimes there are two spaces between the pc and the module, like:
        //     7f1e2215d058  (/lib/x86_64-linux-gnu/libc-2.15.so)
        // The rawfunc is then a single space, matching the Perl original.
        "" => " ",
        s => s,
    };
    Some((pc, rawfunc, module))
}

impl Folder {
    fn reset(&mut self) {
        self.in_event = false;
        self.skip_stack = false;
        self.skip_shallower = false;
        self.stack.clear();
        self.event_filter = self.opt.event_filter.clone();
        self.event_filter_defaulted = false;
        self.event_filter_warned = false;
        self.pname.clear();
    }

    // Comment lines usually carry no stack information, but perf records the
    // profiled command in a `# cmdline : /path/to/cmd args...` header, which
    // names the process before the first event header does.
    fn on_comment_line(&mut self, comment: &str) {
        if let Some(cmdline) = comment.strip_prefix(" cmdline : ") {
            for word in cmdline.split(' ') {
                let word = util::trim_ascii(word);
                if word.is_empty() || word.starts_with('-') {
                    continue;
                }
                let basename = &word[word.rfind('/').map(|i| i + 1).unwrap_or(0)..];
                self.pname = basename.replace(' ', "_");
                break;
            }
        }
    }

    fn on_line(&mut self, line: &str) {
        if !self.in_event {
            self.on_event_line(line)
        } else {
            self.on_stack_line(line)
        }
    }

    fn on_event_line(&mut self, line: &str) {
        self.in_event = true;

        if let Some((comm, pid, tid)) = event_line_parts(line) {
            if let Some(event) = line.rsplit(' ').next() {
                if let Some(event) = event.strip_suffix(':') {
                    match &self.event_filter {
                        Some(filter) => {
                            if event != filter {
                                if self.event_filter_defaulted && !self.event_filter_warned {
                                    // only report when we defaulted and the
                                    // input turned out to be mixed
                                    info!("Filtering for events of type: {}", filter);
                                    self.event_filter_warned = true;
                                }
                                self.skip_stack = true;
                                return;
                            }
                        }
                        None => {
                            // By default only consider events of the first
                            // encountered type. Merging different types, such
                            // as instructions and cycles, produces misleading
                            // results.
                            self.event_filter = Some(event.to_string());
                            self.event_filter_defaulted = true;
                        }
                    }
                }
            }

            self.pname.clear();
            self.pname.push_str(comm);
            if self.pname.contains(' ') {
                self.pname = self.pname.replace(' ', "_");
            }
            if self.opt.include_tid {
                self.pname.push('-');
                self.pname.push_str(pid);
                self.pname.push('/');
                self.pname.push_str(tid);
            } else if self.opt.include_pid {
                self.pname.push('-');
                self.pname.push_str(pid);
            }
        } else {
            warn!("Weird event line: {}", line);
            self.in_event = false;
        }
    }

    fn on_stack_line(&mut self, line: &str) {
        if self.skip_stack || self.skip_shallower {
            return;
        }

        let (pc, mut rawfunc, module) = match stack_line_parts(line) {
            Some(parts) => parts,
            None => {
                warn!("Weird stack line: {}", line);
                return;
            }
        };

        // Strip symbol instruction offsets.
        rawfunc = util::strip_offset(rawfunc);

        // Skip process names; see the corresponding filter in
        // stackcollapse-perf.pl.
        if rawfunc.starts_with('(') && !rawfunc.starts_with("(anonymous namespace)") {
            return;
        }

        let mut func = self.with_module_fallback(module, rawfunc, pc);
        if TIDY_GENERIC {
            func = tidy_generic(func);
        }
        if TIDY_JAVA && self.pname == "java" {
            func = tidy_java(func);
        }

        if self.opt.skip_after.iter().any(|name| *name == func) {
            // Everything accumulated so far is deeper than this frame; keep
            // it and ignore the rest of the sample, this frame included.
            self.skip_shallower = true;
            return;
        }

        // Kernel and JIT annotations are judged from the module name; frames
        // we may see include:
        //
        //     ffffffff8103ce3b native_safe_halt ([kernel.kallsyms])
        //     7f722d142778 Ljava/io/PrintStream;::print (/tmp/perf-19982.map)
        if self.opt.annotate_kernel && is_kernel_module(module) {
            func.push_str("_[k]");
        }
        if self.opt.annotate_jit && is_jit_module(module) {
            func.push_str("_[j]");
        }

        // perf prints leaf to root, flame graph stacks go root to leaf.
        self.stack.push_front(func);
    }

    fn after_event(&mut self) {
        // End of a sample; emit the assembled stack.
        if !self.skip_stack && !self.stack.is_empty() {
            let capacity = self.pname.len()
                + self.stack.iter().map(|f| f.len() + 1).sum::<usize>()
                + 1;
            let mut stack_str = String::with_capacity(capacity);

            if self.opt.include_pname {
                stack_str.push_str(&self.pname);
            }
            for frame in self.stack.drain(..) {
                if !stack_str.is_empty() {
                    stack_str.push(';');
                }
                stack_str.push_str(&frame);
            }

            self.occurrences.add_owned(stack_str, 1);
        }

        // Reset for the next event.
        self.in_event = false;
        self.skip_stack = false;
        self.skip_shallower = false;
        self.stack.clear();
    }

    // Falls back to the module name (or the raw address) for frames perf
    // could not symbolicate.
    fn with_module_fallback(&self, module: &str, rawfunc: &str, pc: &str) -> String {
        if rawfunc != "[unknown]" {
            return rawfunc.to_string();
        }

        if self.opt.include_addrs {
            let mut res = String::with_capacity(pc.len() + 2);
            res.push_str("0x");
            res.push_str(pc);
            return res;
        }

        if module == "[unknown]" {
            return rawfunc.to_string();
        }

        // Use everything following the last '/' of the module as the
        // function name.
        let module = &module[module.rfind('/').map(|i| i + 1).unwrap_or(0)..];
        let mut res = String::with_capacity(module.len() + 2);
        res.push('[');
        res.push_str(module);
        res.push(']');
        res
    }
}

fn is_kernel_module(module: &str) -> bool {
    module.contains("[kernel") || module.contains("[unknown") || module.ends_with("vmlinux")
}

fn is_jit_module(module: &str) -> bool {
    if module.starts_with("/tmp/perf-") && module.ends_with(".map") {
        return true;
    }
    JIT_MODULE_SUFFIXES
        .iter()
        .any(|suffix| module.ends_with(suffix))
}

// Massage a function name to be nicer: drop the argument list (but keep Go
// method names like "net/http.(*Client).Do" intact), elide template bodies,
// and strip C++ anonymous namespace qualifiers.
fn tidy_generic(mut func: String) -> String {
    func = func.replace(';', ":");

    if let Some(stripped) = func.strip_prefix("(anonymous namespace)::") {
        func = stripped.to_string();
    }

    if let Some(first_paren) = func.find('(') {
        if func[first_paren..].starts_with("(anonymous namespace)") {
            // C++ anonymous namespace deeper in the name; leave it be
        } else {
            let is_go = first_paren > 0 && func.as_bytes()[first_paren - 1] == b'.';
            if !is_go {
                func.truncate(first_paren);
            }
        }
    }

    func = elide_template_body(func);
    func
}

// Removes matched top-level `<...>` groups, conservatively: an `operator`
// immediately before the bracket means it is a comparison or shift operator
// rather than a template parameter list, so nothing is removed from there on.
fn elide_template_body(func: String) -> String {
    if !func.contains('<') {
        return func;
    }

    let bytes = func.as_bytes();
    let mut out = String::with_capacity(func.len());
    let mut depth = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        match c {
            '<' if depth == 0 => {
                if out.ends_with("operator") {
                    // operator< or operator<<; keep the remainder verbatim
                    out.push_str(&func[i..]);
                    break;
                }
                depth = 1;
            }
            '<' => depth += 1,
            '>' if depth > 0 => depth -= 1,
            _ if depth == 0 => out.push(c),
            _ => {}
        }
        i += 1;
    }

    if depth > 0 {
        // Unbalanced brackets; play it safe and keep the original.
        return func;
    }
    out
}

fn tidy_java(mut func: String) -> String {
    // Along with tidy_generic, converts
    //     Lorg/mozilla/javascript/MemberBox;.<init>(Ljava/lang/reflect/Method;)V
    // into
    //     org/mozilla/javascript/MemberBox:.init
    if func.starts_with('L') && func.contains('/') {
        func.remove(0);
    }
    func
}
