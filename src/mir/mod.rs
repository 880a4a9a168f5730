//! Mid-level IR.
//!
//! This IR is lossy: it does not keep everything the AST knows, and it exists
//! to be rewritten. Lowering passes run over it repeatedly, replacing function
//! calls and variable references with concrete build-graph objects until the
//! backend can consume what is left.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use hashbrown::HashMap;
use itertools::Itertools;

use crate::mir::arguments::Argument;
use crate::mir::machines::Machine;
use crate::mir::toolchains::{Language, Toolchain};
use crate::simple_index;

pub mod arguments;
pub mod ast_to_mir;
pub mod lower;
pub mod machines;
pub mod passes;
pub mod state;
pub mod toolchains;
pub mod version;

simple_index! {
    /// Identifies a basic block within one control flow graph
    pub struct BlockId;
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "b{}", self.0)
    }
}

/// Information about an instruction when it is stored to a variable.
///
/// Assignments are recorded on the instruction itself, since many objects
/// have creation side effects (creating a build target, for example). The
/// version is assigned by value numbering; 0 means unset, and is reserved for
/// intermediate, unnamed instructions.
#[derive(Debug, Default, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Variable {
    pub name: String,
    pub version: u32,
}

impl Variable {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: 0,
        }
    }

    pub fn versioned(name: impl Into<String>, version: u32) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }

    pub fn is_set(&self) -> bool {
        !self.name.is_empty()
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.version)
    }
}

/// One MIR instruction: a value with the variable it defines (if any).
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub kind: InstructionKind,
    pub var: Variable,
}

impl Instruction {
    pub fn new(kind: InstructionKind) -> Self {
        Self {
            kind,
            var: Variable::default(),
        }
    }

    pub fn with_var(kind: InstructionKind, var: Variable) -> Self {
        Self { kind, var }
    }
}

impl From<InstructionKind> for Instruction {
    fn from(kind: InstructionKind) -> Self {
        Self::new(kind)
    }
}

/// The value vocabulary of the IR.
///
/// This is deliberately a single exhaustive sum type: every pass pattern
/// matches over it, so adding a variant makes the compiler point at every
/// place that needs updating.
#[derive(Debug, Clone, PartialEq)]
pub enum InstructionKind {
    String(String),
    Boolean(bool),
    Number(i64),
    Identifier(Identifier),
    Array(Vec<Instruction>),
    Dict(HashMap<String, Instruction>),
    FunctionCall(Box<FunctionCall>),
    Phi(Phi),
    Message(Message),
    File(File),
    Compiler(Compiler),
    Program(Program),
    Dependency(Dependency),
    IncludeDirectories(IncludeDirectories),
    Executable(Box<BuildTarget>),
    StaticLibrary(Box<BuildTarget>),
    CustomTarget(Box<CustomTarget>),
    AddArguments(AddArguments),
    Test(Box<Test>),
    Jump(Jump),
    Branch(Branch),
    Empty,
}

/// A use of a variable.
///
/// The version matters in a couple of situations, most notably when a phi has
/// been collapsed to an identifier and we need to be clear which version it
/// aliases:
///
/// ```text
///     x4 = x1
///     x5 = phi(x3, x4)
/// ```
///
/// Here x4 must be known to be x1 specifically; constant folding then cleans
/// the alias up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identifier {
    pub name: String,
    pub version: u32,
}

impl Identifier {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: 0,
        }
    }

    pub fn versioned(name: impl Into<String>, version: u32) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }
}

/// A call that no pass has lowered yet, or a method call awaiting its holder.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCall {
    pub name: String,

    /// Ordered positional argument instructions
    pub pos_args: Vec<Instruction>,

    /// Keyword arguments
    pub kw_args: HashMap<String, Instruction>,

    /// The receiver, if this is a method call
    pub holder: Option<Instruction>,

    /// The directory the call was made from. Functions that touch files
    /// (`files()`, the targets) need it to map sources between the source and
    /// build trees.
    pub source_dir: PathBuf,
}

impl FunctionCall {
    pub fn new(name: impl Into<String>, pos_args: Vec<Instruction>, source_dir: PathBuf) -> Self {
        Self {
            name: name.into(),
            pos_args,
            kw_args: HashMap::new(),
            holder: None,
            source_dir,
        }
    }
}

/// A synthetic instruction marking the convergence of two possible versions
/// of a variable. When one strictly dominates the other the phi collapses to
/// an identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Phi {
    pub left: u32,
    pub right: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, strum::Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum MessageLevel {
    Debug,
    Message,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub level: MessageLevel,
    pub message: String,
}

/// A source or built file, addressable relative to both trees.
#[derive(Debug, Clone, Eq)]
pub struct File {
    pub name: String,
    pub subdir: PathBuf,
    pub built: bool,
    pub source_root: PathBuf,
    pub build_root: PathBuf,
}

impl File {
    pub fn new(
        name: impl Into<String>,
        subdir: impl Into<PathBuf>,
        built: bool,
        source_root: impl Into<PathBuf>,
        build_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            subdir: subdir.into(),
            built,
            source_root: source_root.into(),
            build_root: build_root.into(),
        }
    }

    pub fn is_built(&self) -> bool {
        self.built
    }

    pub fn get_name(&self) -> &str {
        &self.name
    }

    /// Path for this file relative to the source tree
    pub fn relative_to_source_dir(&self) -> PathBuf {
        if self.built {
            crate::util::relative_path(
                &self.build_root.join(&self.subdir).join(&self.name),
                &self.source_root.join(&self.subdir),
            )
        } else {
            self.subdir.join(&self.name)
        }
    }

    /// Path for this file relative to the build tree
    pub fn relative_to_build_dir(&self) -> PathBuf {
        if self.built {
            self.subdir.join(&self.name)
        } else {
            crate::util::relative_path(
                &self.source_root.join(&self.subdir).join(&self.name),
                &self.build_root.join(&self.subdir),
            )
        }
    }
}

impl PartialEq for File {
    fn eq(&self, other: &Self) -> bool {
        self.subdir.join(&self.name) == other.subdir.join(&other.name)
            && self.built == other.built
    }
}

/// A compiler as the DSL sees one: a handle on a whole toolchain.
#[derive(Debug, Clone)]
pub struct Compiler {
    pub toolchain: Arc<Toolchain>,
}

impl PartialEq for Compiler {
    fn eq(&self, other: &Self) -> bool {
        self.toolchain.compiler.language() == other.toolchain.compiler.language()
            && self.toolchain.compiler.id() == other.toolchain.compiler.id()
    }
}

/// An external program, possibly not found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    pub name: String,
    pub for_machine: Machine,
    pub path: PathBuf,
}

impl Program {
    pub fn new(name: impl Into<String>, for_machine: Machine, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            for_machine,
            path: path.into(),
        }
    }

    pub fn found(&self) -> bool {
        !self.path.as_os_str().is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "UPPERCASE")]
pub enum DependencyType {
    Internal,
    PkgConfig,
}

/// Arguments and metadata to apply to build targets.
#[derive(Debug, Clone, PartialEq)]
pub struct Dependency {
    pub name: String,
    pub found: bool,
    pub version: String,
    pub arguments: Vec<Argument>,
    pub dep_type: DependencyType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncludeDirectories {
    pub directories: Vec<String>,
    pub is_system: bool,
}

/// Per-language argument table. Each compiled source only receives the
/// arguments of its own language.
pub type ArgMap = HashMap<Language, Vec<Argument>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaticLinkMode {
    Normal,
    Whole,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StaticLinkage {
    pub mode: StaticLinkMode,
    pub target: Box<BuildTarget>,
}

/// A compiled target. `executable()` and `static_library()` produce the same
/// shape; the instruction variant records which one it is.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildTarget {
    pub name: String,

    /// Sources: Files, or CustomTargets whose outputs are consumed
    pub sources: Vec<Instruction>,

    /// Which machine this target is built for
    pub machine: Machine,

    /// Where the target was defined
    pub subdir: PathBuf,

    pub arguments: ArgMap,

    /// Static targets to link with
    pub link_static: Vec<StaticLinkage>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CustomTarget {
    pub name: String,
    pub inputs: Vec<Instruction>,
    pub outputs: Vec<File>,
    pub command: Vec<String>,
    pub subdir: PathBuf,
}

/// Compiler or linker arguments hoisted out of
/// `add_project_arguments`/`add_global_arguments` calls.
#[derive(Debug, Clone, PartialEq)]
pub struct AddArguments {
    pub arguments: ArgMap,
    pub is_global: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TestExecutable {
    File(File),
    Executable(BuildTarget),
    Program(Program),
}

#[derive(Debug, Clone, PartialEq)]
pub enum TestArg {
    String(String),
    File(File),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Test {
    pub name: String,
    pub executable: TestExecutable,
    pub arguments: Vec<TestArg>,
    pub should_fail: bool,
}

/// An unconditional jump, or a jump predicated on a not-yet-folded boolean.
#[derive(Debug, Clone, PartialEq)]
pub struct Jump {
    pub target: BlockId,
    pub predicate: Option<Box<Instruction>>,
}

/// The conditional web of an `if`/`elif`/`else` chain: ordered
/// `(predicate, target)` entries, tried first to last. The translator always
/// appends a final constant-`true` arm, so every Branch covers all paths.
#[derive(Debug, Clone, PartialEq)]
pub struct Branch {
    pub branches: Vec<(Instruction, BlockId)>,
}

/// An ordered list of instructions plus the blocks that can reach it. The
/// outgoing edges live in the instruction list as trailing `Jump`/`Branch`
/// instructions; a block without one is terminal.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BasicBlock {
    pub id: BlockId,
    pub instructions: Vec<Instruction>,
    pub predecessors: BTreeSet<BlockId>,
}

impl BasicBlock {
    /// All blocks reachable in one hop, in instruction order, deduplicated.
    pub fn successors(&self) -> Vec<BlockId> {
        let mut out = Vec::new();
        for instruction in &self.instructions {
            match &instruction.kind {
                InstructionKind::Jump(jump) => out.push(jump.target),
                InstructionKind::Branch(branch) => {
                    out.extend(branch.branches.iter().map(|(_, target)| *target))
                }
                _ => {}
            }
        }
        out.dedup();
        let mut seen = BTreeSet::new();
        out.retain(|id| seen.insert(*id));
        out
    }
}

/// A whole function-like body: the block arena and its entry point.
#[derive(Debug, Clone)]
pub struct ControlFlowGraph {
    pub blocks: BTreeMap<BlockId, BasicBlock>,
    pub entry: BlockId,
    next_block_id: u32,
}

impl ControlFlowGraph {
    pub fn new() -> Self {
        let mut cfg = Self {
            blocks: BTreeMap::new(),
            entry: BlockId(0),
            next_block_id: 0,
        };
        cfg.entry = cfg.new_block();
        cfg
    }

    pub fn new_block(&mut self) -> BlockId {
        let id = BlockId(self.next_block_id);
        self.next_block_id += 1;
        self.blocks.insert(
            id,
            BasicBlock {
                id,
                instructions: Vec::new(),
                predecessors: BTreeSet::new(),
            },
        );
        id
    }

    pub fn entry_block(&self) -> &BasicBlock {
        &self.blocks[&self.entry]
    }

    pub fn entry_block_mut(&mut self) -> &mut BasicBlock {
        self.blocks.get_mut(&self.entry).expect("entry block exists")
    }

    /// Record an edge `from -> to` in the predecessor set. The matching
    /// terminator edit is the caller's; the two must always happen together.
    pub fn link_nodes(&mut self, from: BlockId, to: BlockId) {
        if let Some(block) = self.blocks.get_mut(&to) {
            block.predecessors.insert(from);
        }
    }

    /// Remove the edge `from -> to` from the predecessor set.
    pub fn unlink_nodes(&mut self, from: BlockId, to: BlockId) {
        if let Some(block) = self.blocks.get_mut(&to) {
            block.predecessors.remove(&from);
        }
    }

    /// Drop a block entirely, clearing it from every predecessor set.
    pub fn remove_block(&mut self, id: BlockId) -> Option<BasicBlock> {
        let removed = self.blocks.remove(&id);
        for block in self.blocks.values_mut() {
            block.predecessors.remove(&id);
        }
        removed
    }

    /// Drop every block no longer reachable from the entry, clearing the
    /// dropped blocks out of the surviving predecessor sets. Called by the
    /// structural passes after they cut edges.
    pub fn sweep_unreachable(&mut self) -> bool {
        let mut live = BTreeSet::new();
        let mut stack = vec![self.entry];
        while let Some(id) = stack.pop() {
            if !live.insert(id) {
                continue;
            }
            if let Some(block) = self.blocks.get(&id) {
                stack.extend(block.successors());
            }
        }

        let before = self.blocks.len();
        self.blocks.retain(|id, _| live.contains(id));
        for block in self.blocks.values_mut() {
            block.predecessors.retain(|p| live.contains(p));
        }
        before != self.blocks.len()
    }

    /// A human readable rendering of the whole graph, for debugging dumps.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        for block in self.blocks.values() {
            out.push_str(&format!(
                "{}: # preds: {}\n",
                block.id,
                block.predecessors.iter().map(|p| p.to_string()).join(", ")
            ));
            for instruction in &block.instructions {
                out.push_str(&format!("    {instruction}\n"));
            }
        }
        out
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.var.is_set() {
            write!(f, "{} = {}", self.var, self.kind)
        } else {
            write!(f, "{}", self.kind)
        }
    }
}

impl fmt::Display for InstructionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                InstructionKind::String(value) => write!(f, "'{value}'"),
                InstructionKind::Boolean(value) => write!(f, "{value}"),
                InstructionKind::Number(value) => write!(f, "{value}"),
                InstructionKind::Identifier(id) => write!(f, "{}:{}", id.name, id.version),
                InstructionKind::Array(values) => {
                    write!(f, "[{}]", values.iter().map(|v| v.to_string()).join(", "))
                }
                InstructionKind::Dict(values) => write!(
                    f,
                    "{{{}}}",
                    values
                        .iter()
                        .map(|(k, v)| format!("{k} : {v}"))
                        .join(", ")
                ),
                InstructionKind::FunctionCall(call) => {
                    if let Some(holder) = &call.holder {
                        write!(f, "{}.", holder.kind)?;
                    }
                    write!(
                        f,
                        "{}({})",
                        call.name,
                        call.pos_args
                            .iter()
                            .map(|a| a.to_string())
                            .chain(call.kw_args.iter().map(|(k, v)| format!("{k} : {v}")))
                            .join(", ")
                    )
                }
                InstructionKind::Phi(phi) => write!(f, "phi({}, {})", phi.left, phi.right),
                InstructionKind::Message(message) => {
                    write!(f, "{} {{ {} }}", message.level, message.message)
                }
                InstructionKind::File(file) => write!(
                    f,
                    "file {{ {} }}",
                    file.relative_to_source_dir().display()
                ),
                InstructionKind::Compiler(compiler) => write!(
                    f,
                    "compiler {{ language = {}; id = {} }}",
                    compiler.toolchain.compiler.language(),
                    compiler.toolchain.compiler.id()
                ),
                InstructionKind::Program(program) => write!(
                    f,
                    "program {{ name = {}; path = {} }}",
                    program.name,
                    program.path.display()
                ),
                InstructionKind::Dependency(dep) => write!(
                    f,
                    "dependency {{ name = {}; found = {}; version = {} }}",
                    dep.name, dep.found, dep.version
                ),
                InstructionKind::IncludeDirectories(inc) => write!(
                    f,
                    "include_directories {{ {}; is_system = {} }}",
                    inc.directories.join(", "),
                    inc.is_system
                ),
                InstructionKind::Executable(target) => {
                    write!(f, "executable {{ name = {} }}", target.name)
                }
                InstructionKind::StaticLibrary(target) => {
                    write!(f, "static_library {{ name = {} }}", target.name)
                }
                InstructionKind::CustomTarget(target) => {
                    write!(f, "custom_target {{ name = {} }}", target.name)
                }
                InstructionKind::AddArguments(args) => write!(
                    f,
                    "add_arguments {{ is_global = {} }}",
                    args.is_global
                ),
                InstructionKind::Test(test) => write!(f, "test {{ name = {} }}", test.name),
                InstructionKind::Jump(jump) => match &jump.predicate {
                    Some(predicate) => write!(f, "jump {} if {}", jump.target, predicate),
                    None => write!(f, "jump {}", jump.target),
                },
                InstructionKind::Branch(branch) => write!(
                    f,
                    "branch [{}]",
                    branch
                        .branches
                        .iter()
                        .map(|(predicate, target)| format!("{predicate} -> {target}"))
                        .join(", ")
                ),
                InstructionKind::Empty => write!(f, "empty"),
        }
    }
}
