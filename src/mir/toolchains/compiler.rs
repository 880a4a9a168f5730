use std::fmt;
use std::path::Path;

use crate::mir::arguments::{Argument, IncludeType, Type};
use crate::mir::toolchains::Language;

/// Whether a compiler can consume a file, and how
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanCompile {
    /// A source file this compiler turns into an object
    Source,
    /// A file (a header) that compilations depend on but don't compile
    Depends,
    None,
}

pub trait Compiler: fmt::Debug + Send + Sync {
    fn id(&self) -> &'static str;

    fn language(&self) -> Language;

    /// The command used to invoke this compiler
    fn command(&self) -> &[String];

    /// Lower a compiler-specific argument into the agnostic form
    fn generalize_argument(&self, arg: &str) -> Argument;

    /// Turn an agnostic argument back into concrete flags for this compiler
    fn specialize_argument(
        &self,
        arg: &Argument,
        source_root: &Path,
        build_root: &Path,
    ) -> Vec<String>;

    fn always_args(&self) -> Vec<String>;

    fn supports_file(&self, name: &str) -> CanCompile;

    fn generate_depfile(&self, target: &str, depfile: &str) -> Vec<String>;

    fn output_command(&self, output: &str) -> Vec<String>;

    fn compile_only_command(&self) -> Vec<String>;
}

/// Behavior shared by every gcc-style driver.
mod gnulike {
    use super::*;

    pub fn generalize_argument(arg: &str) -> Argument {
        if let Some(value) = arg.strip_prefix("-isystem") {
            return Argument::new_include(value, IncludeType::System);
        }
        if let Some(value) = arg.strip_prefix("-L") {
            return Argument::new(value, Type::LinkSearch);
        }
        if let Some(value) = arg.strip_prefix("-D") {
            return Argument::new(value, Type::Define);
        }
        if let Some(value) = arg.strip_prefix("-l") {
            return Argument::new(value, Type::Link);
        }
        if let Some(value) = arg.strip_prefix("-I") {
            return Argument::new_include(value, IncludeType::Base);
        }
        if arg.ends_with(".a") || arg.ends_with(".so") {
            return Argument::new(arg, Type::Link);
        }
        Argument::new(arg, Type::Raw)
    }

    pub fn specialize_argument(
        arg: &Argument,
        source_root: &Path,
        build_root: &Path,
    ) -> Vec<String> {
        match arg.arg_type {
            Type::Define => vec![format!("-D{}", arg.value)],
            Type::Link => vec![format!("-l{}", arg.value)],
            Type::LinkSearch => vec![format!("-L{}", arg.value)],
            Type::Include => {
                let flag = match arg.include_type {
                    IncludeType::Base => "-I".to_owned(),
                    IncludeType::System => "-isystem".to_owned(),
                };

                // Includes are emitted against both trees so generated
                // headers resolve alongside static ones.
                let build_side = arg.value.clone();
                let build_side = if build_side.is_empty() {
                    ".".to_owned()
                } else {
                    build_side
                };
                let source_side = crate::util::relative_path(
                    &source_root.join(&arg.value),
                    build_root,
                );

                vec![
                    format!("{flag}{build_side}"),
                    format!("{flag}{}", source_side.display()),
                ]
            }
            Type::Raw => vec![arg.value.clone()],
        }
    }

    pub fn always_args() -> Vec<String> {
        vec!["-D_FILE_OFFSET_BITS=64".to_owned()]
    }

    pub fn supports_file(language: Language, name: &str) -> CanCompile {
        let extension = Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");

        match language {
            Language::C => match extension {
                "c" => CanCompile::Source,
                "h" => CanCompile::Depends,
                _ => CanCompile::None,
            },
            Language::Cpp => match extension {
                "cpp" | "cc" | "cxx" | "c++" => CanCompile::Source,
                "hpp" | "hh" | "hxx" | "h++" | "h" => CanCompile::Depends,
                _ => CanCompile::None,
            },
        }
    }

    pub fn generate_depfile(target: &str, depfile: &str) -> Vec<String> {
        vec![
            "-MD".to_owned(),
            "-MQ".to_owned(),
            target.to_owned(),
            "-MF".to_owned(),
            depfile.to_owned(),
        ]
    }
}

macro_rules! gnulike_compiler {
    ($(#[$attr:meta])* $name:ident, $id:literal) => {
        $(#[$attr])*
        #[derive(Debug)]
        pub struct $name {
            command: Vec<String>,
            language: Language,
        }

        impl $name {
            pub fn new(command: Vec<String>, language: Language) -> Self {
                Self { command, language }
            }
        }

        impl Compiler for $name {
            fn id(&self) -> &'static str {
                $id
            }

            fn language(&self) -> Language {
                self.language
            }

            fn command(&self) -> &[String] {
                &self.command
            }

            fn generalize_argument(&self, arg: &str) -> Argument {
                gnulike::generalize_argument(arg)
            }

            fn specialize_argument(
                &self,
                arg: &Argument,
                source_root: &Path,
                build_root: &Path,
            ) -> Vec<String> {
                gnulike::specialize_argument(arg, source_root, build_root)
            }

            fn always_args(&self) -> Vec<String> {
                gnulike::always_args()
            }

            fn supports_file(&self, name: &str) -> CanCompile {
                gnulike::supports_file(self.language, name)
            }

            fn generate_depfile(&self, target: &str, depfile: &str) -> Vec<String> {
                gnulike::generate_depfile(target, depfile)
            }

            fn output_command(&self, output: &str) -> Vec<String> {
                vec!["-o".to_owned(), output.to_owned()]
            }

            fn compile_only_command(&self) -> Vec<String> {
                vec!["-c".to_owned()]
            }
        }
    };
}

gnulike_compiler! {
    /// The GNU compiler collection
    Gnu, "gnu"
}

gnulike_compiler! {
    /// LLVM's clang, which is gcc-compatible on the command line
    Clang, "clang"
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clang() -> Clang {
        Clang::new(vec!["clang++".to_owned()], Language::Cpp)
    }

    #[test]
    fn generalize_classifies_flags() {
        let c = clang();
        assert_eq!(
            c.generalize_argument("-Dfoo"),
            Argument::new("foo", Type::Define)
        );
        assert_eq!(
            c.generalize_argument("-lm"),
            Argument::new("m", Type::Link)
        );
        assert_eq!(
            c.generalize_argument("-L/usr/lib"),
            Argument::new("/usr/lib", Type::LinkSearch)
        );
        assert_eq!(
            c.generalize_argument("-Iinclude"),
            Argument::new_include("include", IncludeType::Base)
        );
        assert_eq!(
            c.generalize_argument("-isystem/opt/inc"),
            Argument::new_include("/opt/inc", IncludeType::System)
        );
        assert_eq!(
            c.generalize_argument("libfoo.a"),
            Argument::new("libfoo.a", Type::Link)
        );
        assert_eq!(
            c.generalize_argument("-funroll-loops"),
            Argument::new("-funroll-loops", Type::Raw)
        );
    }

    #[test]
    fn specialize_round_trips_defines() {
        let c = clang();
        let arg = c.generalize_argument("-Dfoo");
        assert_eq!(
            c.specialize_argument(&arg, Path::new("/src"), Path::new("/build")),
            vec!["-Dfoo".to_owned()]
        );
    }

    #[test]
    fn supports_file_by_language() {
        let c = clang();
        assert_eq!(c.supports_file("main.cpp"), CanCompile::Source);
        assert_eq!(c.supports_file("main.h"), CanCompile::Depends);
        assert_eq!(c.supports_file("main.rs"), CanCompile::None);

        let cc = Gnu::new(vec!["cc".to_owned()], Language::C);
        assert_eq!(cc.supports_file("main.c"), CanCompile::Source);
        assert_eq!(cc.supports_file("main.cpp"), CanCompile::None);
    }
}
