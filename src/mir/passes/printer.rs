//! Debugging pass that appends a text rendering of the IR to a file after
//! each pipeline iteration. Controlled by the BOSON_DEBUG_PRINT_MIR
//! environment variable, which names the dump file.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use crate::mir::ControlFlowGraph;
use crate::Result;

pub struct Printer {
    path: Option<PathBuf>,
    pass: u32,
}

impl Printer {
    pub fn from_env() -> Self {
        Self {
            path: std::env::var_os("BOSON_DEBUG_PRINT_MIR").map(PathBuf::from),
            pass: 0,
        }
    }

    pub fn increment(&mut self) {
        self.pass += 1;
    }

    pub fn run(&self, cfg: &ControlFlowGraph) -> Result<bool> {
        let Some(path) = &self.path else {
            return Ok(false);
        };

        let mut out = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(out, "== iteration {} ==", self.pass)?;
        write!(out, "{}", cfg.dump())?;
        writeln!(out)?;

        Ok(false)
    }
}
