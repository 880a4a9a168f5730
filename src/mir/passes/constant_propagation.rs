//! Constant propagation: push defined values out of assignments and into
//! their uses.

use std::collections::BTreeMap;

use crate::mir::passes::walkers::{function_walker, instruction_walker};
use crate::mir::{BlockId, ControlFlowGraph, Instruction, InstructionKind, Variable};
use crate::Result;

/// Values that are safe to duplicate into their use sites. Function calls,
/// phis, and identifiers are never propagated; neither are values that only
/// exist for their position in the block (messages, terminators).
fn duplicable(kind: &InstructionKind) -> bool {
    matches!(
        kind,
        InstructionKind::String(_)
            | InstructionKind::Boolean(_)
            | InstructionKind::Number(_)
            | InstructionKind::Array(_)
            | InstructionKind::Dict(_)
            | InstructionKind::File(_)
            | InstructionKind::Compiler(_)
            | InstructionKind::Program(_)
            | InstructionKind::Dependency(_)
            | InstructionKind::IncludeDirectories(_)
            | InstructionKind::Executable(_)
            | InstructionKind::StaticLibrary(_)
            | InstructionKind::CustomTarget(_)
    )
}

#[derive(Default)]
pub struct ConstantPropagation {
    defs: BTreeMap<Variable, Instruction>,
}

impl ConstantPropagation {
    pub fn run(&mut self, cfg: &mut ControlFlowGraph, id: BlockId) -> Result<bool> {
        let Some(block) = cfg.blocks.get_mut(&id) else {
            return Ok(false);
        };

        // First record every propagatable definition, then rewrite uses; two
        // walks, so a definition is visible to uses later in the same block.
        let defs = &mut self.defs;
        let mut record = |instruction: &mut Instruction| {
            if instruction.var.is_set() && duplicable(&instruction.kind) {
                defs.insert(instruction.var.clone(), instruction.clone());
            }
            Ok(false)
        };
        instruction_walker(block, &mut [&mut record], &mut [])?;

        let defs = &self.defs;
        function_walker(block, &mut |instruction: &Instruction| {
            let InstructionKind::Identifier(identifier) = &instruction.kind else {
                return Ok(None);
            };
            // Definitions (`x = y`) are aliases, which constant folding owns;
            // only bare uses are rewritten here.
            if instruction.var.is_set() {
                return Ok(None);
            }
            let key = Variable::versioned(identifier.name.clone(), identifier.version);
            Ok(defs.get(&key).map(|d| {
                let mut clone = d.clone();
                clone.var = Variable::default();
                clone
            }))
        })
    }
}
