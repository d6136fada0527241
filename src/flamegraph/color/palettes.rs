enum Annotation {
    Kernel,
    Inline,
    Jit,
}

// Recognizes the `_[k]`, `_[i]` and `_[j]` suffixes appended by the
// collapsers.
fn resolve_annotation(name: &str) -> Option<Annotation> {
    if name.ends_with(']') {
        if let Some(ai) = name.rfind("_[") {
            if name[ai..].len() == 4 {
                match &name[ai + 2..ai + 3] {
                    "k" => return Some(Annotation::Kernel),
                    "i" => return Some(Annotation::Inline),
                    "j" => return Some(Annotation::Jit),
                    _ => {}
                }
            }
        }
    }
    None
}

pub(super) mod java {
    use super::Annotation;
    use crate::flamegraph::color::BasicPalette;

    /// Handles annotations (`_[j]`, `_[i]`, ...; which are accurate), as
    /// well as input that lacks any annotations, as best as possible.
    pub fn resolve(name: &str) -> BasicPalette {
        if let Some(annotation) = super::resolve_annotation(name) {
            return match annotation {
                Annotation::Kernel => BasicPalette::Orange,
                Annotation::Inline => BasicPalette::Aqua,
                Annotation::Jit => BasicPalette::Green,
            };
        }

        let java_prefix = name.strip_prefix('L').unwrap_or(name);

        if name.contains("::") || name.starts_with("-[") || name.starts_with("+[") {
            // C++ or Objective C
            BasicPalette::Yellow
        } else if java_prefix.contains('/')
            || (java_prefix.contains('.') && !java_prefix.starts_with('['))
            || java_prefix
                .chars()
                .next()
                .map(|c| c.is_ascii_uppercase())
                .unwrap_or(false)
        {
            // Java
            BasicPalette::Green
        } else {
            // system
            BasicPalette::Red
        }
    }
}

pub(super) mod perl {
    use super::Annotation;
    use crate::flamegraph::color::BasicPalette;

    pub fn resolve(name: &str) -> BasicPalette {
        if let Some(Annotation::Kernel) = super::resolve_annotation(name) {
            BasicPalette::Orange
        } else if name.contains("Perl") || name.contains(".pl") {
            BasicPalette::Green
        } else if name.contains("::") {
            BasicPalette::Yellow
        } else {
            BasicPalette::Red
        }
    }
}

pub(super) mod js {
    use super::Annotation;
    use crate::flamegraph::color::BasicPalette;

    pub fn resolve(name: &str) -> BasicPalette {
        let annotation = super::resolve_annotation(name);

        if !name.is_empty() && name.trim().is_empty() {
            return BasicPalette::Green;
        } else if let Some(Annotation::Kernel) = annotation {
            return BasicPalette::Orange;
        } else if let Some(Annotation::Jit) = annotation {
            if name.contains('/') {
                return BasicPalette::Green;
            } else {
                return BasicPalette::Aqua;
            }
        } else if name.contains("::") {
            return BasicPalette::Yellow;
        } else if name.contains(':') {
            return BasicPalette::Aqua;
        } else if let Some(ai) = name.find('/') {
            if name[ai..].contains(".js") {
                return BasicPalette::Green;
            }
        }

        BasicPalette::Red
    }
}

pub(super) mod python {
    use crate::flamegraph::color::BasicPalette;

    pub fn resolve(name: &str) -> BasicPalette {
        if name.contains("site-packages") {
            // third-party library code
            BasicPalette::Aqua
        } else if name.contains("python")
            || name.contains("Python")
            || name.starts_with("<built-in")
            || name.starts_with("<method")
            || name.starts_with("<frozen")
        {
            BasicPalette::Yellow
        } else {
            BasicPalette::Red
        }
    }
}

pub(super) mod rust {
    use crate::flamegraph::color::BasicPalette;

    // The async transform wraps user code in GenFuture, so despite the
    // `core::` prefix its frames are user frames.
    const GEN_FUTURE: &str = "<core::future::from_generator::GenFuture<T>";

    pub fn resolve(name: &str) -> BasicPalette {
        // Skip any "module`" prefix a collapser may have kept.
        let name = match name.find('`') {
            Some(tick) => &name[tick + 1..],
            None => name,
        };

        let is_system = ["core::", "std::", "alloc::", "<core::", "<std::", "<alloc::"]
            .iter()
            .any(|prefix| name.starts_with(prefix))
            && !name.starts_with(GEN_FUTURE);

        if is_system {
            // Rust system code
            BasicPalette::Orange
        } else if name.contains("::") {
            // user Rust code
            BasicPalette::Aqua
        } else {
            // everything else
            BasicPalette::Yellow
        }
    }
}

pub(super) mod wakeup {
    use crate::flamegraph::color::BasicPalette;

    pub fn resolve(_name: &str) -> BasicPalette {
        BasicPalette::Aqua
    }
}

#[cfg(test)]
mod tests {
    use crate::flamegraph::color::BasicPalette;

    struct TestData {
        input: &'static str,
        output: BasicPalette,
    }

    fn run(cases: &[TestData], resolve: fn(&str) -> BasicPalette) {
        for case in cases {
            assert_eq!(
                resolve(case.input),
                case.output,
                "misclassified {:?}",
                case.input
            );
        }
    }

    #[test]
    fn java_resolves() {
        run(
            &[
                TestData {
                    input: "_[k]",
                    output: BasicPalette::Orange,
                },
                TestData {
                    input: "_[j]",
                    output: BasicPalette::Green,
                },
                TestData {
                    input: "_[i]",
                    output: BasicPalette::Aqua,
                },
                TestData {
                    input: "some::st_[jk]uff",
                    output: BasicPalette::Yellow,
                },
                TestData {
                    input: "-[test]",
                    output: BasicPalette::Yellow,
                },
                TestData {
                    input: "+[test]",
                    output: BasicPalette::Yellow,
                },
                TestData {
                    input: "org/mozilla/javascript/MemberBox",
                    output: BasicPalette::Green,
                },
                TestData {
                    input: "Lorg/mozilla/javascript/MemberBox",
                    output: BasicPalette::Green,
                },
                TestData {
                    input: "scala.tools.nsc.Global$Run.compile",
                    output: BasicPalette::Green,
                },
                TestData {
                    input: "Compile",
                    output: BasicPalette::Green,
                },
                TestData {
                    input: "[test.event]",
                    output: BasicPalette::Red,
                },
                TestData {
                    input: "something",
                    output: BasicPalette::Red,
                },
                TestData {
                    input: "",
                    output: BasicPalette::Red,
                },
            ],
            super::java::resolve,
        );
    }

    #[test]
    fn perl_resolves() {
        run(
            &[
                TestData {
                    input: "something_[k]",
                    output: BasicPalette::Orange,
                },
                TestData {
                    input: "somethingPerl",
                    output: BasicPalette::Green,
                },
                TestData {
                    input: "some/ai.pl",
                    output: BasicPalette::Green,
                },
                TestData {
                    input: "some::thing",
                    output: BasicPalette::Yellow,
                },
                TestData {
                    input: "something",
                    output: BasicPalette::Red,
                },
            ],
            super::perl::resolve,
        );
    }

    #[test]
    fn js_resolves() {
        run(
            &[
                TestData {
                    input: " ",
                    output: BasicPalette::Green,
                },
                TestData {
                    input: "something_[k]",
                    output: BasicPalette::Orange,
                },
                TestData {
                    input: "something/_[j]",
                    output: BasicPalette::Green,
                },
                TestData {
                    input: "something_[j]",
                    output: BasicPalette::Aqua,
                },
                TestData {
                    input: "some::thing",
                    output: BasicPalette::Yellow,
                },
                TestData {
                    input: "some:thing",
                    output: BasicPalette::Aqua,
                },
                TestData {
                    input: "some/ai.js",
                    output: BasicPalette::Green,
                },
                TestData {
                    input: "someai.js",
                    output: BasicPalette::Red,
                },
            ],
            super::js::resolve,
        );
    }

    #[test]
    fn python_resolves() {
        run(
            &[
                TestData {
                    input: "/venv/lib/python3.11/site-packages/requests/api.py:get",
                    output: BasicPalette::Aqua,
                },
                TestData {
                    input: "python3.11",
                    output: BasicPalette::Yellow,
                },
                TestData {
                    input: "<built-in method time.sleep>",
                    output: BasicPalette::Yellow,
                },
                TestData {
                    input: "<method 'append' of 'list' objects>",
                    output: BasicPalette::Yellow,
                },
                TestData {
                    input: "<frozen importlib._bootstrap>",
                    output: BasicPalette::Yellow,
                },
                TestData {
                    input: "libc_read",
                    output: BasicPalette::Red,
                },
            ],
            super::python::resolve,
        );
    }

    #[test]
    fn rust_resolves() {
        run(
            &[
                TestData {
                    input: "std::fs::read_to_string",
                    output: BasicPalette::Orange,
                },
                TestData {
                    input: "<alloc::vec::Vec<T> as Extend<T>>::extend",
                    output: BasicPalette::Orange,
                },
                TestData {
                    input: "myapp`core::iter::Iterator::fold",
                    output: BasicPalette::Orange,
                },
                TestData {
                    input: "<core::future::from_generator::GenFuture<T> as core::future::future::Future>::poll",
                    output: BasicPalette::Aqua,
                },
                TestData {
                    input: "myapp::engine::tick",
                    output: BasicPalette::Aqua,
                },
                TestData {
                    input: "memcpy",
                    output: BasicPalette::Yellow,
                },
            ],
            super::rust::resolve,
        );
    }

    #[test]
    fn wakeup_is_always_aqua() {
        assert_eq!(super::wakeup::resolve("anything"), BasicPalette::Aqua);
    }
}
