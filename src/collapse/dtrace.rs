use std::collections::VecDeque;
use std::io;

use log::warn;

use super::common::{Occurrences, CAPACITY_LINE};
use super::util;
use super::Collapse;
use crate::error::{malformed, Result};

/// Kernel module names used by the DTrace platforms; a frame whose module is
/// one of these (or ends in `.ko`) runs in kernel context.
const KERNEL_MODULES: &[&str] = &["unix", "genunix", "ip", "tcp", "udp", "sockfs", "dtrace"];

/// `dtrace` folder configuration options.
#[derive(Clone, Debug, Default)]
pub struct Options {
    /// Annotate kernel functions with a `_[k]` suffix.
    ///
    /// Default is `false`.
    pub annotate_kernel: bool,

    /// Include function offsets (except for leaf frames).
    ///
    /// Default is `false`.
    pub includeoffset: bool,

    /// Include the process name as the root frame of every stack, when one
    /// is known from a `dtrace:::BEGIN` header line.
    ///
    /// Default is `false`.
    pub include_pname: bool,
}

/// A stack collapser for the output of dtrace `ustack()`.
///
/// To construct one, either use `dtrace::Folder::default()` or create an
/// [`Options`] and use `dtrace::Folder::from(options)`.
pub struct Folder {
    /// Function entries of the stack being assembled, root first.
    stack: VecDeque<String>,

    /// Scratch space for splitting `->`-joined inline frames.
    cache_inlines: Vec<String>,

    /// Running length estimate of the folded stack string.
    stack_str_size: usize,

    /// Number of times each call stack has been seen.
    occurrences: Occurrences,

    /// Process name announced by a `dtrace:::BEGIN` clause, if any.
    pname: Option<String>,

    opt: Options,
}

impl From<Options> for Folder {
    fn from(opt: Options) -> Self {
        Self {
            stack: VecDeque::default(),
            cache_inlines: Vec::new(),
            stack_str_size: 0,
            occurrences: Occurrences::new(),
            pname: None,
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

        // Header lines, if any, run until the first empty line.
        loop {
            line.clear();
            if reader.read_line(&mut line)? == 0 {
                warn!("File ended while skipping headers");
                return Ok(());
            }
            let trimmed = util::trim_ascii(&line);
            if trimmed.is_empty() {
                break;
            }
            self.on_header_line(trimmed);
        }

        loop {
            line.clear();
            if reader.read_line(&mut line)? == 0 {
                break;
            }

            let line = util::trim_ascii(&line);
            if line.is_empty() {
                continue;
            } else if let Ok(count) = line.parse::<u64>() {
                self.on_stack_end(count);
            } else if line.starts_with("dtrace:") {
                // dtrace's own diagnostics (drops, errors) are not stack data
                continue;
            } else {
                self.on_stack_line(line);
            }
        }

        if !self.stack.is_empty() {
            return Err(malformed!("stack block was not terminated by a count"));
        }

        self.occurrences.write_and_clear(writer)?;
        self.pname = None;
        Ok(())
    }

    fn is_applicable(&mut self, input: &str) -> bool {
        let mut found_empty_line = false;
        let mut found_stack_line = false;
        for line in input.lines() {
            let line = util::trim_ascii(line);
            if line.is_empty() {
                found_empty_line = true;
            } else if found_empty_line {
                if util::is_decimal_digits(line) {
                    return found_stack_line;
                } else if line.contains('`')
                    || (line.starts_with("0x") && util::is_hex_digits(&line[2..]))
                {
                    found_stack_line = true;
                } else {
                    // neither a stack nor a count line
                    return false;
                }
            }
        }
        false
    }
}

impl Folder {
    // A `dtrace:::BEGIN` clause is commonly used to announce the traced
    // command; remember its trailing word as the process name.
    fn on_header_line(&mut self, line: &str) {
        if let Some(rest) = line.strip_prefix("dtrace:::BEGIN") {
            let rest = util::trim_ascii(rest);
            if !rest.is_empty() {
                self.pname = Some(rest.replace(' ', "_"));
            }
        }
    }

    // This function approximates the Perl regex s/(::.*)[(<].*/$1/
    // from the original stackcollapse.pl.
    fn uncpp(probe: &str) -> &str {
        if let Some(scope) = probe.find("::") {
            if let Some(open) = probe[scope + 2..].rfind(|c| c == '(' || c == '<') {
                &probe[..scope + 2 + open]
            } else {
                probe
            }
        } else {
            probe
        }
    }

    fn remove_offset(line: &str) -> (bool, bool, bool, &str) {
        let mut has_inlines = false;
        let mut could_be_cpp = false;
        let mut has_semicolon = false;
        let mut last_offset = line.len();
        let bytes = line.as_bytes();
        for offset in 0..bytes.len() {
            match bytes[offset] {
                b'>' if offset > 0 && bytes[offset - 1] == b'-' => has_inlines = true,
                b':' if offset > 0 && bytes[offset - 1] == b':' => could_be_cpp = true,
                b';' => has_semicolon = true,
                b'+' => last_offset = offset,
                _ => (),
            }
        }
        (
            has_inlines,
            could_be_cpp,
            has_semicolon,
            &line[..last_offset],
        )
    }

    // A stack line is a single symbol, leaf first:
    //
    //     unix`tsc_gethrtimeunscaled+0x21
    //     genunix`gethrtime_unscaled+0xa
    //     genunix`syscall_mstate+0x5d
    //     unix`sys_syscall+0x10e
    //       1
    fn on_stack_line(&mut self, line: &str) {
        let (has_inlines, could_be_cpp, has_semicolon, mut frame) = if self.opt.includeoffset {
            (true, true, true, line)
        } else {
            Self::remove_offset(line)
        };

        if could_be_cpp {
            frame = Self::uncpp(frame);
        }

        if frame.is_empty() {
            frame = "-";
        }

        let is_kernel = self.opt.annotate_kernel && is_kernel_frame(frame);

        if has_inlines {
            // A frame like `a->b->c` is an inlining chain; expand it and mark
            // everything past the real symbol as inlined.
            let mut inline = false;
            for func in frame.split("->") {
                let mut func = if has_semicolon {
                    func.trim_start_matches('L').replace(';', ":")
                } else {
                    func.trim_start_matches('L').to_owned()
                };
                func = util::fix_partially_demangled_rust_symbol(&func).into_owned();
                if inline {
                    func.push_str("_[i]");
                } else if is_kernel {
                    func.push_str("_[k]");
                }
                inline = true;
                self.stack_str_size += func.len() + 1;
                self.cache_inlines.push(func);
            }
            while let Some(func) = self.cache_inlines.pop() {
                self.stack.push_front(func);
            }
        } else {
            let mut func = if has_semicolon {
                frame.trim_start_matches('L').replace(';', ":")
            } else {
                frame.trim_start_matches('L').to_owned()
            };
            func = util::fix_partially_demangled_rust_symbol(&func).into_owned();
            if is_kernel {
                func.push_str("_[k]");
            }
            self.stack_str_size += func.len() + 1;
            self.stack.push_front(func);
        }
    }

    fn on_stack_end(&mut self, count: u64) {
        if self.stack.is_empty() {
            // a count with no preceding stack carries no information
            return;
        }

        let pname = match (&self.pname, self.opt.include_pname) {
            (Some(pname), true) => pname.as_str(),
            _ => "",
        };
        let mut stack_str = String::with_capacity(self.stack_str_size + pname.len() + 1);
        if !pname.is_empty() {
            stack_str.push_str(pname);
        }

        let last = self.stack.len() - 1;
        for (i, frame) in self.stack.drain(..).enumerate() {
            if !stack_str.is_empty() {
                stack_str.push(';');
            }
            // trim the leaf offset if offsets were retained
            if self.opt.includeoffset && i == last {
                stack_str.push_str(Self::remove_offset(&frame).3);
                // the annotation sits after the offset, so re-attach it
                if frame.ends_with("_[k]") && !stack_str.ends_with("_[k]") {
                    stack_str.push_str("_[k]");
                }
            } else {
                stack_str.push_str(&frame);
            }
        }

        self.occurrences.add_owned(stack_str, count);

        self.stack_str_size = 0;
        self.stack.clear();
    }
}

fn is_kernel_frame(frame: &str) -> bool {
    match frame.find('`') {
        Some(tick) => {
            let module = &frame[..tick];
            KERNEL_MODULES.contains(&module) || module.ends_with(".ko")
        }
        None => false,
    }
}
