//! Color palettes and options for flame graph generation.

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use rgb::RGB8;

mod palettes;

/// A re-export of `RGB8` from the [`rgb` crate](https://docs.rs/rgb).
pub type Color = RGB8;

pub(super) const VDGREY: Color = Color {
    r: 160,
    g: 160,
    b: 160,
};
pub(super) const DGREY: Color = Color {
    r: 200,
    g: 200,
    b: 200,
};

const YELLOW_GRADIENT: (&str, &str) = ("#eeeeee", "#eeeeb0");
const BLUE_GRADIENT: (&str, &str) = ("#eeeeee", "#e0e0ff");
const GREEN_GRADIENT: (&str, &str) = ("#eef2ee", "#e0ffe0");
const GRAY_GRADIENT: (&str, &str) = ("#f8f8f8", "#e8e8e8");

/// A flame graph background color.
///
/// The default background color depends on the color scheme:
///
///  - [`BasicPalette::Mem`] defaults to [`BackgroundColor::Green`].
///  - [`BasicPalette::Io`] and [`MultiPalette::Wakeup`] default to
///    [`BackgroundColor::Blue`].
///  - [`BasicPalette::Hot`] and the remaining [`MultiPalette`] variants
///    default to [`BackgroundColor::Yellow`].
///  - All other [`BasicPalette`] variants default to
///    [`BackgroundColor::Grey`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum BackgroundColor {
    /// A yellow gradient from `#EEEEEE` to `#EEEEB0`.
    Yellow,
    /// A blue gradient from `#EEEEEE` to `#E0E0FF`.
    Blue,
    /// A green gradient from `#EEF2EE` to `#E0FFE0`.
    Green,
    /// A grey gradient from `#F8F8F8` to `#E8E8E8`.
    Grey,
    /// A flat background color with the given RGB components.
    ///
    /// Expressed in string form as `#RRGGBB` with hexadecimal components.
    Flat(Color),
}

impl Default for BackgroundColor {
    fn default() -> Self {
        BackgroundColor::Yellow
    }
}

impl FromStr for BackgroundColor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "yellow" => Ok(BackgroundColor::Yellow),
            "blue" => Ok(BackgroundColor::Blue),
            "green" => Ok(BackgroundColor::Green),
            "grey" => Ok(BackgroundColor::Grey),
            flat => parse_flat_color(flat)
                .map(BackgroundColor::Flat)
                .ok_or_else(|| format!("unknown background color: {}", flat)),
        }
    }
}

/// A flame graph color palette.
///
/// Defaults to [`BasicPalette::Hot`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Palette {
    /// A plain color palette in which the color is not chosen based on
    /// function semantics.
    Basic(BasicPalette),
    /// A semantic color palette in which different hues signify semantic
    /// aspects of different function names (kernel functions, JIT functions,
    /// etc.).
    Multi(MultiPalette),
}

impl Default for Palette {
    fn default() -> Self {
        Palette::Basic(BasicPalette::Hot)
    }
}

/// A plain color palette in which the color is not chosen based on function
/// semantics.
///
/// Each palette is a base RGB centerpoint plus per-component scaling deltas
/// applied to the variance inputs.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum BasicPalette {
    /// Colors from a red-yellow spectrum.
    Hot,
    /// Colors from a green-blue spectrum.
    Mem,
    /// Colors from a wide blue spectrum.
    Io,
    /// Colors from a red spectrum.
    Red,
    /// Colors from a green spectrum.
    Green,
    /// Colors from a blue spectrum.
    Blue,
    /// Colors from an aqua-tinted spectrum.
    Aqua,
    /// Colors from a yellow spectrum.
    Yellow,
    /// Colors from a purple spectrum.
    Purple,
    /// Colors from an orange spectrum.
    Orange,
}

/// A semantic color palette in which different hues signify semantic aspects
/// of different function names.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MultiPalette {
    /// Use Java semantics to color frames.
    Java,
    /// Use JavaScript semantics to color frames.
    Js,
    /// Use Perl semantics to color frames.
    Perl,
    /// Use Python semantics to color frames.
    Python,
    /// Use Rust semantics to color frames.
    Rust,
    /// Equivalent to [`BasicPalette::Aqua`] with [`BackgroundColor::Blue`].
    Wakeup,
}

impl FromStr for Palette {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hot" => Ok(Palette::Basic(BasicPalette::Hot)),
            "mem" => Ok(Palette::Basic(BasicPalette::Mem)),
            "io" => Ok(Palette::Basic(BasicPalette::Io)),
            "red" => Ok(Palette::Basic(BasicPalette::Red)),
            "green" => Ok(Palette::Basic(BasicPalette::Green)),
            "blue" => Ok(Palette::Basic(BasicPalette::Blue)),
            "aqua" => Ok(Palette::Basic(BasicPalette::Aqua)),
            "yellow" => Ok(Palette::Basic(BasicPalette::Yellow)),
            "purple" => Ok(Palette::Basic(BasicPalette::Purple)),
            "orange" => Ok(Palette::Basic(BasicPalette::Orange)),
            "java" => Ok(Palette::Multi(MultiPalette::Java)),
            "js" => Ok(Palette::Multi(MultiPalette::Js)),
            "perl" => Ok(Palette::Multi(MultiPalette::Perl)),
            "python" => Ok(Palette::Multi(MultiPalette::Python)),
            "rust" => Ok(Palette::Multi(MultiPalette::Rust)),
            "wakeup" => Ok(Palette::Multi(MultiPalette::Wakeup)),
            unknown => Err(format!("unknown color palette: {}", unknown)),
        }
    }
}

/// The names accepted by [`Palette::from_str`], for CLI help text.
pub const PALETTE_NAMES: &[&str] = &[
    "hot", "mem", "io", "red", "green", "blue", "aqua", "yellow", "purple", "orange", "java",
    "js", "perl", "python", "rust", "wakeup",
];

macro_rules! u8_from_hex_iter {
    ($slice:expr) => {
        (($slice.next()?.to_digit(16)? as u8) << 4) | ($slice.next()?.to_digit(16)? as u8)
    };
}

fn parse_flat_color(s: &str) -> Option<Color> {
    if !s.starts_with('#') || s.len() != 7 {
        None
    } else {
        let mut s = s[1..].chars();
        let r = u8_from_hex_iter!(s);
        let g = u8_from_hex_iter!(s);
        let b = u8_from_hex_iter!(s);
        Some(Color { r, g, b })
    }
}

macro_rules! css_color {
    ($(#[$attr:meta])* $name:ident, $r:expr, $g:expr, $b:expr) => {
        $(#[$attr])*
        #[derive(Clone, Copy, Debug, PartialEq)]
        pub struct $name(pub Color);

        impl Default for $name {
            fn default() -> Self {
                $name(Color {
                    r: $r,
                    g: $g,
                    b: $b,
                })
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                parse_flat_color(s)
                    .map($name)
                    .ok_or_else(|| format!("unknown color: {}", s))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "rgb({},{},{})", self.0.r, self.0.g, self.0.b)
            }
        }
    };
}

css_color!(
    /// The fill used to highlight frames matched by a search.
    ///
    /// `SearchColor::default()` is `rgb(230,0,230)`.
    SearchColor,
    230,
    0,
    230
);

css_color!(
    /// The fill used for the UI text elements (title, details bar, buttons).
    ///
    /// `UiColor::default()` is `rgb(0,0,0)`.
    UiColor,
    0,
    0,
    0
);

/// The stroke drawn around every frame rectangle.
///
/// `StrokeColor::default()` is `StrokeColor::None` (no stroke).
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub enum StrokeColor {
    /// Outline frames with the given color.
    Color(Color),
    /// No outline.
    #[default]
    None,
}

impl FromStr for StrokeColor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "none" {
            return Ok(StrokeColor::None);
        }
        parse_flat_color(s)
            .map(StrokeColor::Color)
            .ok_or_else(|| format!("unknown color: {}", s))
    }
}

/// A 32-bit linear congruential generator, seeded once per render.
///
/// Color variance does not need random-number quality, it needs cheap,
/// self-contained numbers that make sibling frames distinguishable. A fixed
/// seed keeps renders of identical input identical.
pub(super) struct VarianceRng(u32);

impl VarianceRng {
    const SEED: u32 = 0x9e37_79b9;

    pub(super) fn new() -> Self {
        VarianceRng(Self::SEED)
    }

    pub(super) fn gen_f32(&mut self) -> f32 {
        self.0 = self.0.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        // use the upper bits; the low bits of an LCG cycle quickly
        (self.0 >> 8) as f32 / (1 << 24) as f32
    }
}

struct NamehashVariables {
    vector: f32,
    weight: f32,
    max: f32,
    modulo: u8,
}

impl NamehashVariables {
    fn init() -> Self {
        NamehashVariables {
            vector: 0.0,
            weight: 1.0,
            max: 1.0,
            modulo: 10,
        }
    }

    fn update(&mut self, character: u8) {
        let i = f32::from(character % self.modulo);
        self.vector += (i / f32::from(self.modulo - 1)) * self.weight;
        self.modulo += 1;
        self.max += self.weight;
        self.weight *= 0.70;
    }

    fn result(&self) -> f32 {
        1.0 - self.vector / self.max
    }
}

/// Generates a hash in `[0, 1]` for the name, weighting early characters
/// over later ones, so the same function gets the same color across flame
/// graphs.
///
/// A `module`\` prefix is skipped: the hash is computed from whatever
/// follows the first backtick (the Perl original does `$name =~ s/.(.*?)`//`,
/// removing everything before the first backtick past position one).
pub(super) fn namehash<I: Iterator<Item = u8>>(mut name: I) -> f32 {
    let mut namehash_variables = NamehashVariables::init();
    let mut module_name_found = false;

    match name.next() {
        None => return namehash_variables.result(),
        Some(first_char) => namehash_variables.update(first_char),
    }

    // The hash uses only the first three characters, so stop early unless a
    // backtick forces a restart after the module prefix.
    for character in name.by_ref().take(2) {
        if character == b'`' {
            module_name_found = true;
            break;
        }
        namehash_variables.update(character);
    }

    module_name_found = module_name_found || name.any(|c| c == b'`');

    if module_name_found {
        namehash_variables = NamehashVariables::init();
        for character in name.take(3) {
            namehash_variables.update(character);
        }
    }

    namehash_variables.result()
}

/// FNV-1a over the name, folded into `[0, 1]`.
///
/// Used by the deterministic color mode: a single 64-bit hash drives all
/// three variance inputs, so a name maps to exactly one color.
pub(super) fn fnv_value(name: &str) -> f32 {
    const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;

    let mut hash = OFFSET_BASIS;
    for byte in name.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(PRIME);
    }
    (hash as f64 / u64::MAX as f64) as f32
}

macro_rules! t {
    ($b:expr, $a:expr, $x:expr) => {
        $b + ($a as f32 * $x) as u8
    };
}

macro_rules! color {
    ($r:expr, $g:expr, $b:expr) => {
        Color {
            r: $r,
            g: $g,
            b: $b,
        }
    };
}

/// Computes the color for a frame from its palette and the three variance
/// inputs in `[0, 1]`.
pub(super) fn rgb_for(palette: Palette, name: &str, v1: f32, v2: f32, v3: f32) -> Color {
    let basic_palette = match palette {
        Palette::Basic(basic) => basic,
        Palette::Multi(MultiPalette::Java) => palettes::java::resolve(name),
        Palette::Multi(MultiPalette::Js) => palettes::js::resolve(name),
        Palette::Multi(MultiPalette::Perl) => palettes::perl::resolve(name),
        Palette::Multi(MultiPalette::Python) => palettes::python::resolve(name),
        Palette::Multi(MultiPalette::Rust) => palettes::rust::resolve(name),
        Palette::Multi(MultiPalette::Wakeup) => palettes::wakeup::resolve(name),
    };

    match basic_palette {
        BasicPalette::Hot => color!(t!(205, 50, v3), t!(0, 230, v1), t!(0, 55, v2)),
        BasicPalette::Mem => color!(t!(0, 0, v3), t!(190, 50, v2), t!(0, 210, v1)),
        BasicPalette::Io => color!(t!(80, 60, v1), t!(80, 60, v1), t!(190, 55, v2)),
        BasicPalette::Red => color!(t!(200, 55, v1), t!(50, 80, v1), t!(50, 80, v1)),
        BasicPalette::Green => color!(t!(50, 60, v1), t!(200, 55, v1), t!(50, 60, v1)),
        BasicPalette::Blue => color!(t!(80, 60, v1), t!(80, 60, v1), t!(205, 50, v1)),
        BasicPalette::Yellow => color!(t!(175, 55, v1), t!(175, 55, v1), t!(50, 20, v1)),
        BasicPalette::Purple => color!(t!(190, 65, v1), t!(80, 60, v1), t!(190, 65, v1)),
        BasicPalette::Aqua => color!(t!(50, 60, v1), t!(165, 55, v1), t!(165, 55, v1)),
        BasicPalette::Orange => color!(t!(190, 65, v1), t!(90, 65, v1), t!(0, 0, v1)),
    }
}

/// How the variance inputs for [`rgb_for`] are drawn.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(super) enum VarianceMode {
    /// Three fresh values from the render's RNG per frame.
    Random,
    /// `v1 = namehash(name)`, `v2 = v3 = namehash(reverse(name))`.
    NameHash,
    /// All three from one FNV-1a hash of the name.
    Deterministic,
}

pub(super) fn color(
    palette: Palette,
    mode: VarianceMode,
    name: &str,
    rng: &mut VarianceRng,
) -> Color {
    let (v1, v2, v3) = match mode {
        VarianceMode::Random => (rng.gen_f32(), rng.gen_f32(), rng.gen_f32()),
        VarianceMode::NameHash => {
            let name_hash = namehash(name.bytes());
            let reverse_name_hash = namehash(name.bytes().rev());
            (name_hash, reverse_name_hash, reverse_name_hash)
        }
        VarianceMode::Deterministic => {
            let v = fnv_value(name);
            (v, v, v)
        }
    };
    rgb_for(palette, name, v1, v2, v3)
}

/// The white-to-red/blue scale used for differential flame graphs.
pub(super) fn color_scale(value: i64, max: u64) -> Color {
    if value == 0 || max == 0 {
        Color {
            r: 255,
            g: 255,
            b: 255,
        }
    } else if value > 0 {
        // more samples than before, so more time spent: a red hue
        let c = (210 * (max as i64 - value) / max as i64) as u8;
        Color { r: 255, g: c, b: c }
    } else {
        // fewer samples, a speed-up: a blue hue
        let c = (210 * (max as i64 + value) / max as i64) as u8;
        Color { r: c, g: c, b: 255 }
    }
}

fn default_bg_color_for(palette: Palette) -> BackgroundColor {
    match palette {
        Palette::Basic(BasicPalette::Mem) => BackgroundColor::Green,
        Palette::Basic(BasicPalette::Io) | Palette::Multi(MultiPalette::Wakeup) => {
            BackgroundColor::Blue
        }
        Palette::Basic(BasicPalette::Red)
        | Palette::Basic(BasicPalette::Green)
        | Palette::Basic(BasicPalette::Blue)
        | Palette::Basic(BasicPalette::Aqua)
        | Palette::Basic(BasicPalette::Yellow)
        | Palette::Basic(BasicPalette::Purple)
        | Palette::Basic(BasicPalette::Orange) => BackgroundColor::Grey,
        _ => BackgroundColor::Yellow,
    }
}

/// Resolves the two gradient stops for the background.
pub(super) fn bgcolor_for<'a>(
    bgcolor: Option<BackgroundColor>,
    palette: Palette,
) -> (Cow<'a, str>, Cow<'a, str>) {
    let bgcolor = bgcolor.unwrap_or_else(|| default_bg_color_for(palette));

    macro_rules! cow {
        ($gradient:expr) => {
            (Cow::from($gradient.0), Cow::from($gradient.1))
        };
    }

    match bgcolor {
        BackgroundColor::Yellow => cow!(YELLOW_GRADIENT),
        BackgroundColor::Blue => cow!(BLUE_GRADIENT),
        BackgroundColor::Green => cow!(GREEN_GRADIENT),
        BackgroundColor::Grey => cow!(GRAY_GRADIENT),
        BackgroundColor::Flat(color) => {
            let color = format!("#{:02x}{:02x}{:02x}", color.r, color.g, color.b);
            let first = Cow::from(color);
            let second = first.clone();
            (first, second)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_bgcolor_parses() {
        assert_eq!(
            parse_flat_color("#ffffff"),
            Some(color!(0xff, 0xff, 0xff))
        );
        assert_eq!(
            parse_flat_color("#abcdef"),
            Some(color!(0xab, 0xcd, 0xef))
        );
        assert_eq!(parse_flat_color("ffffff"), None);
        assert_eq!(parse_flat_color("#fffffff"), None);
        assert_eq!(parse_flat_color("#xfffff"), None);
    }

    macro_rules! test_hash {
        ($name:expr, $expected:expr) => {
            assert!((namehash($name.bytes()) - $expected).abs() < f32::EPSILON);
        };
    }

    #[test]
    fn namehash_matches_reference_values() {
        test_hash!(
            "org/mozilla/javascript/NativeFunction:.initScriptFunction_[j]",
            0.779_646_04
        );
        test_hash!("genunix`kmem_cache_free", 0.466_926_34);
        test_hash!("eerf_ehcac_memk`xinuneg", 0.840_410_3);
        test_hash!("unix`0xfffffffffb8001d6", 0.418_131_17);
        test_hash!("un`0xfffffffffb8001d6", 0.418_131_17);
        test_hash!("``0xfffffffffb8001d6", 0.418_131_17);
        test_hash!("", 1.0);
    }

    #[test]
    fn hash_modes_are_deterministic() {
        let mut rng = VarianceRng::new();
        let a = color(
            Palette::default(),
            VarianceMode::NameHash,
            "do_work",
            &mut rng,
        );
        let b = color(
            Palette::default(),
            VarianceMode::NameHash,
            "do_work",
            &mut rng,
        );
        assert_eq!(a, b);

        let a = color(
            Palette::default(),
            VarianceMode::Deterministic,
            "do_work",
            &mut rng,
        );
        let b = color(
            Palette::default(),
            VarianceMode::Deterministic,
            "do_work",
            &mut rng,
        );
        assert_eq!(a, b);
    }

    #[test]
    fn fnv_value_is_in_unit_range() {
        for name in ["", "a", "main", "std::fs::read_to_string"] {
            let v = fnv_value(name);
            assert!((0.0..=1.0).contains(&v), "{} -> {}", name, v);
        }
    }

    #[test]
    fn variance_rng_is_seeded_deterministically() {
        let mut a = VarianceRng::new();
        let mut b = VarianceRng::new();
        for _ in 0..16 {
            let (x, y) = (a.gen_f32(), b.gen_f32());
            assert_eq!(x, y);
            assert!((0.0..1.0).contains(&x));
        }
    }

    #[test]
    fn color_scale_endpoints() {
        assert_eq!(color_scale(0, 10), color!(255, 255, 255));
        assert_eq!(color_scale(10, 10), color!(255, 0, 0));
        assert_eq!(color_scale(-10, 10), color!(0, 0, 255));
    }

    #[test]
    fn background_gradients_resolve() {
        let (a, _) = bgcolor_for(None, Palette::Basic(BasicPalette::Mem));
        assert_eq!(a, "#eef2ee");
        let (a, _) = bgcolor_for(None, Palette::Basic(BasicPalette::Io));
        assert_eq!(a, "#eeeeee");
        let (a, b) = bgcolor_for(
            Some(BackgroundColor::Flat(color!(0x10, 0x20, 0x30))),
            Palette::default(),
        );
        assert_eq!(a, "#102030");
        assert_eq!(b, "#102030");
    }
}
