//! boson implements a subset of the Meson build configuration language. Build
//! descriptions are parsed into an AST, translated into a mid-level IR (a CFG
//! of typed instructions), and repeatedly rewritten by structural, SSA,
//! dataflow, and semantic lowering passes until only concrete build-graph
//! objects remain. The resolved graph is handed to the ninja backend.

pub mod backend;
pub mod error;
pub mod frontend;
pub mod index;
pub mod mir;
pub mod util;

pub use error::{Error, Result};
