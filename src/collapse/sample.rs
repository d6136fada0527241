use std::io;

use log::{error, warn};

use super::common::{Occurrences, CAPACITY_LINE};
use super::util;
use super::Collapse;
use crate::error::Result;

// The call graph begins after this line.
const START_LINE: &str = "Call graph:";

// The section after the call graph begins with this; at that point we are done.
const END_LINE: &str = "Total number in stack";

// Leaf symbols of threads that are merely waiting. Suppressing their stacks
// keeps the graph focused on what was actually running during the sample.
const IGNORE_SYMBOLS: &[&str] = &[
    "__psynch_cvwait",
    "__select",
    "__semwait_signal",
    "__ulock_wait",
    "__wait4",
    "__workq_kernreturn",
    "kevent",
    "mach_msg_trap",
    "read",
    "semaphore_wait_trap",
];

/// `sample` folder configuration options.
#[derive(Clone, Debug, Default)]
pub struct Options {
    /// Don't include modules with function names.
    ///
    /// Default is `false`.
    pub no_modules: bool,
}

/// A stack collapser for the output of `sample` on macOS.
///
/// To construct one, either use `sample::Folder::default()` or create an
/// [`Options`] and use `sample::Folder::from(options)`.
#[derive(Default)]
pub struct Folder {
    /// Function entries of the call-graph path currently being walked.
    stack: Vec<String>,

    /// Sample count of the most recently pushed line.
    current_samples: u64,

    /// Number of times each call stack has been seen.
    occurrences: Occurrences,

    opt: Options,
}

impl From<Options> for Folder {
    fn from(opt: Options) -> Self {
        Self {
            opt,
            ..Default::default()
        }
    }
}

impl Collapse for Folder {
    fn collapse<R, W>(&mut self, mut reader: R, writer: W) -> Result<()>
    where
        R: io::BufRead,
        W: io::Write,
    {
        let mut line = String::with_capacity(CAPACITY_LINE);

        // Skip everything until the call graph starts.
        loop {
            line.clear();
            if reader.read_line(&mut line)? == 0 {
                warn!("File ended before start of call graph");
                return Ok(());
            }
            if line.starts_with(START_LINE) {
                break;
            }
        }

        loop {
            line.clear();
            if reader.read_line(&mut line)? == 0 {
                warn!("File ended before end of call graph");
                break;
            }

            let line = util::trim_ascii_end(&line);
            if line.is_empty() {
                continue;
            } else if line.starts_with("    ") {
                self.on_line(line);
            } else if line.starts_with(END_LINE) {
                break;
            } else {
                error!("Stack line doesn't start with 4 spaces:\n{}", line);
            }
        }

        self.flush_stack();
        self.stack.clear();
        self.occurrences.write_and_clear(writer)?;
        Ok(())
    }

    /// Looks for the start and end lines of a call graph.
    fn is_applicable(&mut self, input: &str) -> bool {
        let mut found_start = false;
        for line in input.lines() {
            if line.starts_with(START_LINE) {
                found_start = true;
            } else if line.starts_with(END_LINE) {
                return found_start;
            }
        }
        false
    }
}

impl Folder {
    fn line_parts<'a>(&self, line: &'a str) -> Option<(&'a str, &'a str, &'a str)> {
        let mut line = util::trim_ascii(line).splitn(2, ' ');
        let samples = line.next()?;
        let line = line.next()?;

        let func = match line.find('(') {
            Some(open) => &line[..open],
            None => line,
        }
        .trim_end();

        let mut module = "";
        if !self.opt.no_modules {
            // Modules are shown as "(in libfoo.dylib)" or "(in AppKit)".
            let mut line = line.rsplitn(2, "(in ");
            if let Some(line) = line.next() {
                if let Some(close) = line.find(')') {
                    module = &line[..close];
                }
                // ".dylib" adds no information
                if let Some(stem) = module.strip_suffix(".dylib") {
                    module = stem;
                }
            }
        }

        Some((samples, func, module))
    }

    fn is_indent_char(c: char) -> bool {
        c == ' ' || c == '+' || c == '|' || c == ':' || c == '!'
    }

    // Call graph lines look like:
    //
    //     5130 Thread_8749954
    //        + 5130 start_wqthread  (in libsystem_pthread.dylib) ...
    //        +   4282 _pthread_wqthread  (in libsystem_pthread.dylib) ...
    //        +   ! 4282 __doworkq_kernreturn  (in libsystem_kernel.dylib) ...
    //        +   848 _pthread_wqthread  (in libsystem_pthread.dylib) ...
    fn on_line(&mut self, line: &str) {
        let indent_chars = match line[4..].find(|c| !Self::is_indent_char(c)) {
            Some(n) => n,
            None => {
                error!("Found stack line with only indent characters:\n{}", line);
                return;
            }
        };

        // each level of the graph indents by two characters
        if indent_chars % 2 != 0 {
            error!("Odd number of indentation characters for line:\n{}", line);
        }
        let depth = indent_chars / 2 + 1;
        let prev_depth = self.stack.len();

        if depth <= prev_depth {
            // the previous line was a leaf of its path
            self.flush_stack();
            self.stack.truncate(depth - 1);
        } else if depth > prev_depth + 1 {
            error!("Skipped indentation level at line:\n{}", line);
        }

        match self.line_parts(&line[4 + indent_chars..]) {
            Some((samples, func, module)) => match samples.parse::<u64>() {
                Ok(samples) => {
                    self.current_samples = samples;
                    // sample does not demangle Rust symbols properly; fix those
                    let func = util::fix_partially_demangled_rust_symbol(func);
                    if module.is_empty() {
                        self.stack.push(func.into_owned());
                    } else {
                        self.stack.push(format!("{}`{}", module, func));
                    }
                }
                Err(_) => error!("Invalid samples field: {}", samples),
            },
            None => error!("Unable to parse stack line:\n{}", line),
        }
    }

    fn flush_stack(&mut self) {
        if let Some(leaf) = self.stack.last() {
            for symbol in IGNORE_SYMBOLS {
                if leaf.ends_with(symbol) {
                    return;
                }
            }
        } else {
            return;
        }

        let mut stack_str =
            String::with_capacity(self.stack.iter().map(|f| f.len() + 1).sum::<usize>());
        for (i, frame) in self.stack.iter().enumerate() {
            if i > 0 {
                stack_str.push(';');
            }
            stack_str.push_str(frame);
        }
        self.occurrences.add_owned(stack_str, self.current_samples);
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn collapse_to_string(folder: &mut Folder, input: &str) -> String {
        let mut out = Vec::new();
        folder.collapse(input.as_bytes(), &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    const BASIC: &str = "\
Analysis of sampling app (pid 1234) every 1 millisecond

Call graph:
    10 Thread_1234
    + 10 start  (in libdyld.dylib)
    +   7 main  (in app)
    +   ! 7 work  (in app)
    +   3 spare  (in app)

Total number in stack (recursive counted multiple, when >=5):
";

    #[test]
    fn collapses_indented_call_graph() {
        let out = collapse_to_string(&mut Folder::default(), BASIC);
        assert_eq!(
            out,
            "\
Thread_1234;libdyld`start;app`main;app`work 7
Thread_1234;libdyld`start;app`spare 3
"
        );
    }

    #[test]
    fn no_modules_drops_module_names() {
        let mut folder = Folder::from(Options { no_modules: true });
        let out = collapse_to_string(&mut folder, BASIC);
        assert_eq!(
            out,
            "\
Thread_1234;start;main;work 7
Thread_1234;start;spare 3
"
        );
    }

    #[test]
    fn suppresses_waiting_leaves() {
        let input = "\
Call graph:
    5 Thread_9
    + 5 start  (in libdyld.dylib)
    +   5 mach_msg_trap  (in libsystem_kernel.dylib)

Total number in stack (recursive counted multiple, when >=5):
";
        let out = collapse_to_string(&mut Folder::default(), input);
        assert_eq!(out, "");
    }

    #[test]
    fn supports_multiple_threads() {
        let input = "\
Call graph:
    4 Thread_1
    + 4 start  (in libdyld.dylib)
    2 Thread_2
    + 2 start_wqthread  (in libsystem_pthread.dylib)

Total number in stack (recursive counted multiple, when >=5):
";
        let out = collapse_to_string(&mut Folder::default(), input);
        assert_eq!(
            out,
            "\
Thread_1;libdyld`start 4
Thread_2;libsystem_pthread`start_wqthread 2
"
        );
    }

    #[test]
    fn sniffs_sample_output() {
        let mut folder = Folder::default();
        assert!(folder.is_applicable(BASIC));
        assert!(!folder.is_applicable("foo;bar 12\n"));
    }
}
