//! Small shared lexing primitives for the line-oriented parsers.
//!
//! Input is assumed to be ASCII-compatible UTF-8 and handled as bytes; none
//! of these helpers perform any encoding normalization.

use std::borrow::Cow;

/// Length of the hash legacy rustc appends to mangled symbols (`::h` + 16 hex).
const RUST_HASH_LENGTH: usize = 17;

/// Trims ASCII whitespace from both ends of a string slice.
pub(crate) fn trim_ascii(s: &str) -> &str {
    s.trim_matches(|c: char| c.is_ascii_whitespace())
}

/// Trims trailing ASCII whitespace (including the line terminator).
pub(crate) fn trim_ascii_end(s: &str) -> &str {
    s.trim_end_matches(|c: char| c.is_ascii_whitespace())
}

/// Returns the index of the first occurrence of `needle`, if any.
pub(crate) fn find_byte(haystack: &[u8], needle: u8) -> Option<usize> {
    haystack.iter().position(|&b| b == needle)
}

/// Whether `s` is non-empty and consists solely of ASCII hex digits.
pub(crate) fn is_hex_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Whether `s` is non-empty and consists solely of ASCII decimal digits.
pub(crate) fn is_decimal_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// Strips a trailing `+0x<hex>` instruction offset from a symbol, if present.
pub(crate) fn strip_offset(symbol: &str) -> &str {
    if let Some(plus) = symbol.rfind("+0x") {
        if is_hex_digits(&symbol[plus + 3..]) {
            return &symbol[..plus];
        }
    }
    symbol
}

fn is_rust_hash(s: &str) -> bool {
    s.starts_with('h') && is_hex_digits(&s[1..])
}

/// Mangled-fragment replacements understood by [`fix_partially_demangled_rust_symbol`].
const RUST_FRAGMENTS: &[(&str, &str)] = &[
    ("$SP$", "@"),
    ("$BP$", "*"),
    ("$RF$", "&"),
    ("$LT$", "<"),
    ("$GT$", ">"),
    ("$LP$", "("),
    ("$RP$", ")"),
    ("$C$", ","),
    ("$u7e$", "~"),
    ("$u20$", " "),
    ("$u27$", "'"),
    ("$u3d$", "="),
    ("$u5b$", "["),
    ("$u5d$", "]"),
    ("$u7b$", "{"),
    ("$u7d$", "}"),
    ("$u3b$", ";"),
    ("$u2b$", "+"),
    ("$u21$", "!"),
    ("$u22$", "\""),
];

/// Repairs Rust symbols that a profiler half-demangled.
///
/// Profilers like `sample` and DTrace demangle the outer `_ZN...E` wrapper
/// but leave rustc's `$LT$`/`$u27$`-style escapes and the trailing hash in
/// place, e.g.
/// `_$LT$std..fs..ReadDir$u20$as$u20$Iterator$GT$::next::hc14f1750ca79129b`.
/// Symbols without a trailing Rust hash are returned unchanged.
pub(crate) fn fix_partially_demangled_rust_symbol(symbol: &str) -> Cow<'_, str> {
    if symbol.len() < RUST_HASH_LENGTH || !is_rust_hash(&symbol[symbol.len() - RUST_HASH_LENGTH..])
    {
        return Cow::Borrowed(symbol);
    }

    let mut rest = &symbol[..symbol.len() - RUST_HASH_LENGTH];
    if let Some(prefix) = rest.strip_suffix("::") {
        rest = prefix;
    }
    if rest.starts_with("_$") {
        rest = &rest[1..];
    }

    let mut fixed = String::with_capacity(rest.len());
    'outer: while !rest.is_empty() {
        if let Some(tail) = rest.strip_prefix("..") {
            fixed.push_str("::");
            rest = tail;
        } else if let Some(tail) = rest.strip_prefix('.') {
            fixed.push('.');
            rest = tail;
        } else if rest.starts_with('$') {
            for (fragment, replacement) in RUST_FRAGMENTS {
                if let Some(tail) = rest.strip_prefix(fragment) {
                    fixed.push_str(replacement);
                    rest = tail;
                    continue 'outer;
                }
            }
            // Unknown escape; give up on the remainder.
            fixed.push_str(rest);
            break;
        } else {
            let end = rest
                .find(|c| c == '$' || c == '.')
                .unwrap_or(rest.len());
            fixed.push_str(&rest[..end]);
            rest = &rest[end..];
        }
    }

    Cow::Owned(fixed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixes(mangled: &str, expected: &str) {
        assert_eq!(fix_partially_demangled_rust_symbol(mangled), expected);
    }

    fn unchanged(symbol: &str) {
        assert_eq!(fix_partially_demangled_rust_symbol(symbol), symbol);
    }

    #[test]
    fn primitives() {
        assert_eq!(trim_ascii("  a b\t\n"), "a b");
        assert_eq!(trim_ascii_end(" a \r\n"), " a");
        assert_eq!(find_byte(b"a;b", b';'), Some(1));
        assert_eq!(find_byte(b"ab", b';'), None);
        assert!(is_hex_digits("0fE9"));
        assert!(!is_hex_digits(""));
        assert!(!is_hex_digits("0x1"));
        assert_eq!(strip_offset("func+0x1a"), "func");
        assert_eq!(strip_offset("func+0xzz"), "func+0xzz");
        assert_eq!(strip_offset("func"), "func");
    }

    #[test]
    fn fixes_partially_demangled_symbols() {
        fixes(
            "std::sys::unix::fs::File::open::hb90e1c1c787080f0",
            "std::sys::unix::fs::File::open",
        );
        fixes(
            "_$LT$std..fs..ReadDir$u20$as$u20$core..iter..traits..iterator..Iterator$GT$::next::hc14f1750ca79129b",
            "<std::fs::ReadDir as core::iter::traits::iterator::Iterator>::next",
        );
        fixes(
            "rg::search_parallel::_$u7b$$u7b$closure$u7d$$u7d$::h6e849b55a66fcd85",
            "rg::search_parallel::_{{closure}}",
        );
        fixes(
            "_$LT$$RF$std..fs..File$u20$as$u20$std..io..Read$GT$::read::h5d84059cf335c8e6",
            "<&std::fs::File as std::io::Read>::read",
        );
        fixes(
            "std::sync::mpsc::shared::Packet$LT$T$GT$::recv::hfde2d9e28d13fd56",
            "std::sync::mpsc::shared::Packet<T>::recv",
        );
    }

    #[test]
    fn leaves_fully_mangled_symbols_alone() {
        unchanged("_ZN4testE");
        unchanged("_ZN3std2rt19lang_start_internal17h540c897fe52ba9c5E");
        unchanged("_ZN3std9panicking3try17h9c1cbc5599e1efbfE");
    }

    #[test]
    fn leaves_fully_demangled_symbols_alone() {
        unchanged("std::sys::unix::fs::File::open");
        unchanged("<F as alloc::boxed::FnBox<A>>::call_box");
        unchanged("<grep_searcher::searcher::glue::ReadByLine<'s, M, R, S>>::run");
    }
}
