//! Per-language toolchains: a compiler, a linker, and an archiver for one
//! language on one machine.

use std::fmt;

use crate::{Error, Result};

pub mod archiver;
pub mod compiler;
pub mod detect;
pub mod linker;

pub use archiver::Archiver;
pub use compiler::Compiler;
pub use linker::Linker;

use crate::mir::machines::Machine;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, strum::Display)]
pub enum Language {
    #[strum(serialize = "c")]
    C,
    #[strum(serialize = "cpp")]
    Cpp,
}

impl Language {
    pub fn from_string(value: &str) -> Result<Self> {
        match value {
            "c" => Ok(Self::C),
            "cpp" => Ok(Self::Cpp),
            _ => Err(Error::meson(format!("Unknown language: {value}"))),
        }
    }
}

/// The toolchain for one language on one machine
pub struct Toolchain {
    pub compiler: Box<dyn Compiler>,
    pub linker: Box<dyn Linker>,
    pub archiver: Box<dyn Archiver>,
}

impl fmt::Debug for Toolchain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Toolchain")
            .field("compiler", &self.compiler.id())
            .field("linker", &self.linker.id())
            .field("archiver", &self.archiver.id())
            .finish()
    }
}

/// Probe the machine for a working toolchain for one language.
pub fn get_toolchain(language: Language, machine: Machine) -> Result<Toolchain> {
    let compiler = detect::detect_compiler(language, machine, &[])?;
    let linker = detect::detect_linker(compiler.as_ref());
    let archiver = detect::detect_archiver(machine)?;

    Ok(Toolchain {
        compiler,
        linker,
        archiver,
    })
}
