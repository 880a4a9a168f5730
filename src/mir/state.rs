use std::path::PathBuf;
use std::sync::Arc;

use hashbrown::HashMap;

use crate::mir::machines::{detect_build, Info, PerMachine};
use crate::mir::toolchains::{Language, Toolchain};
use crate::mir::Dependency;

/// State that is set up once per configuration and threaded through every
/// pass. There are no ambient singletons; anything a pass needs to know about
/// the machine or the project travels in here.
#[derive(Debug)]
pub struct Persistent {
    /// A mapping of language -> machine -> toolchain. Append-only, written by
    /// `lower_project` (and `add_language`, when that exists).
    pub toolchains: HashMap<Language, PerMachine<Arc<Toolchain>>>,

    /// What we know about each machine. Only host == build is handled, as
    /// there is no machine file.
    pub machines: PerMachine<Info>,

    /// Absolute path to the source tree
    pub source_root: PathBuf,

    /// Absolute path to the build tree
    pub build_root: PathBuf,

    /// The project name, set exactly once by `lower_project`
    pub name: String,

    /// The project version, set by `lower_project`
    pub version: String,

    /// Programs found by `find_program`, cached across reconfigurations
    pub programs: PerMachine<HashMap<String, PathBuf>>,

    /// Results of external dependency discovery, keyed by dependency name
    pub dependencies: HashMap<String, Dependency>,
}

impl Persistent {
    pub fn new(source_root: impl Into<PathBuf>, build_root: impl Into<PathBuf>) -> Self {
        Self {
            toolchains: HashMap::new(),
            machines: PerMachine::new(detect_build()),
            source_root: source_root.into(),
            build_root: build_root.into(),
            name: String::new(),
            version: "unknown".to_owned(),
            programs: PerMachine::new(HashMap::new()),
            dependencies: HashMap::new(),
        }
    }
}
