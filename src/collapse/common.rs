use std::collections::HashMap;
use std::io;

use ahash::RandomState;

/// Buffer capacity for readers opened by [`super::Collapse::collapse_file`].
pub(crate) const CAPACITY_READER: usize = 128 * 1024;

/// Initial capacity for a line buffer; realistic perf and DTrace lines fit.
pub(crate) const CAPACITY_LINE: usize = 8 * 1024;

/// Initial number of buckets for the stack table.
const CAPACITY_TABLE: usize = 512;

/// The number of times each canonical call stack has been seen.
///
/// Keys are complete folded stacks (`frame1;frame2;...;frameN`). Repeated
/// puts for the same stack sum their counts. A put for a stack that is
/// already present does not allocate; the key is copied exactly once, on
/// first insertion.
#[derive(Clone, Debug)]
pub struct Occurrences {
    map: HashMap<Box<str>, u64, RandomState>,
}

impl Default for Occurrences {
    fn default() -> Self {
        Self::new()
    }
}

impl Occurrences {
    pub(crate) fn new() -> Self {
        Self {
            map: HashMap::with_capacity_and_hasher(CAPACITY_TABLE, RandomState::new()),
        }
    }

    /// Adds `count` to the tally for `stack`, inserting it if new.
    pub(crate) fn add(&mut self, stack: &str, count: u64) {
        if let Some(counter) = self.map.get_mut(stack) {
            *counter += count;
        } else {
            self.map.insert(Box::from(stack), count);
        }
    }

    /// Like [`Occurrences::add`], but consumes an already-owned stack string.
    pub(crate) fn add_owned(&mut self, stack: String, count: u64) {
        if let Some(counter) = self.map.get_mut(stack.as_str()) {
            *counter += count;
        } else {
            self.map.insert(stack.into_boxed_str(), count);
        }
    }

    #[cfg(test)]
    pub(crate) fn get(&self, stack: &str) -> Option<u64> {
        self.map.get(stack).copied()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Writes `stack count` lines and resets the table for reuse.
    ///
    /// Entries are emitted in sorted key order so that identical input
    /// always produces identical output.
    pub(crate) fn write_and_clear<W>(&mut self, mut writer: W) -> io::Result<()>
    where
        W: io::Write,
    {
        let mut entries: Vec<_> = self.map.drain().collect();
        entries.sort_unstable_by(|(a, _), (b, _)| a.cmp(b));
        let mut count_buf = itoa::Buffer::new();
        for (stack, count) in entries {
            writer.write_all(stack.as_bytes())?;
            writer.write_all(b" ")?;
            writer.write_all(count_buf.format(count).as_bytes())?;
            writer.write_all(b"\n")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_or_add_sums_counts() {
        let mut occ = Occurrences::new();
        occ.add("main;foo", 1);
        occ.add("main;bar", 2);
        occ.add("main;foo", 3);
        assert_eq!(occ.get("main;foo"), Some(4));
        assert_eq!(occ.get("main;bar"), Some(2));
    }

    #[test]
    fn writes_sorted_lines() {
        let mut occ = Occurrences::new();
        occ.add_owned("b;c".to_string(), 2);
        occ.add("a", 1);
        let mut out = Vec::new();
        occ.write_and_clear(&mut out).unwrap();
        assert_eq!(std::str::from_utf8(&out).unwrap(), "a 1\nb;c 2\n");
        assert!(occ.is_empty());
    }
}
