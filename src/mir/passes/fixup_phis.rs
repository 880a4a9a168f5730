//! Collapse phis with a single live operand.
//!
//! After branch pruning and block joining have removed one of the incoming
//! paths, a phi whose other operand is no longer defined anywhere reachable
//! collapses to a plain identifier aliasing the surviving version.

use crate::mir::{BlockId, ControlFlowGraph, Identifier, Instruction, InstructionKind};
use crate::Result;

pub fn fixup_phis(cfg: &mut ControlFlowGraph, id: BlockId) -> Result<bool> {
    let Some(block) = cfg.blocks.get(&id) else {
        return Ok(false);
    };
    let preds: Vec<BlockId> = block.predecessors.iter().copied().collect();

    let mut instructions = std::mem::take(
        &mut cfg.blocks.get_mut(&id).expect("block exists").instructions,
    );
    let mut progress = false;

    for index in 0..instructions.len() {
        let InstructionKind::Phi(phi) = &instructions[index].kind else {
            continue;
        };
        let phi = *phi;
        let name = instructions[index].var.name.clone();

        let mut left = false;
        let mut right = false;
        'preds: for p in &preds {
            let Some(pred) = cfg.blocks.get(p) else {
                continue;
            };
            for candidate in &pred.instructions {
                if candidate.var.name == name {
                    if candidate.var.version == phi.left {
                        left = true;
                        break;
                    }
                    if candidate.var.version == phi.right {
                        right = true;
                        break;
                    }
                }
            }
            if left && right {
                break 'preds;
            }
        }

        if left ^ right {
            let var = instructions[index].var.clone();
            instructions[index] = Instruction::with_var(
                InstructionKind::Identifier(Identifier::versioned(
                    name,
                    if left { phi.left } else { phi.right },
                )),
                var,
            );
            progress = true;
            continue;
        }

        // When the operands live in this very block (after joining), the
        // later definition shadows the earlier one, so whichever version was
        // defined last is the truth.
        for candidate in instructions[..index].iter() {
            if candidate.var.name == name {
                left = candidate.var.version == phi.left;
                right = candidate.var.version == phi.right;
            }
        }

        if left ^ right {
            let var = instructions[index].var.clone();
            instructions[index] = Instruction::with_var(
                InstructionKind::Identifier(Identifier::versioned(
                    name,
                    if left { phi.left } else { phi.right },
                )),
                var,
            );
            progress = true;
        }
    }

    cfg.blocks.get_mut(&id).expect("block exists").instructions = instructions;
    Ok(progress)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mir::passes::test_support::lower;
    use crate::mir::passes::walkers::block_walker;
    use crate::mir::passes::{branch_pruning, join_blocks, GlobalValueNumbering};

    fn run(cfg: &mut ControlFlowGraph, pass: fn(&mut ControlFlowGraph, BlockId) -> Result<bool>) {
        block_walker(cfg, &mut [&mut |cfg, id| pass(cfg, id)]).unwrap();
    }

    #[test]
    fn pruned_phi_collapses_to_the_survivor() {
        let mut cfg = lower("if true\n x = 9\nelse\n x = 10\nendif\ny = x");
        let mut gvn = GlobalValueNumbering::default();
        block_walker(&mut cfg, &mut [&mut |cfg, id| gvn.run(cfg, id)]).unwrap();

        run(&mut cfg, branch_pruning);
        run(&mut cfg, join_blocks);
        run(&mut cfg, fixup_phis);

        let entry = cfg.entry_block();
        assert_eq!(entry.instructions.len(), 3);

        // x = 9 kept its version
        assert_eq!(entry.instructions[0].kind, InstructionKind::Number(9));
        assert_eq!(entry.instructions[0].var.version, 2);

        // The phi collapsed to an identifier aliasing the surviving version
        let InstructionKind::Identifier(alias) = &entry.instructions[1].kind else {
            panic!("expected the phi to collapse, got {:?}", entry.instructions[1]);
        };
        assert_eq!(alias.name, "x");
        assert_eq!(alias.version, 2);
        assert_eq!(entry.instructions[1].var.version, 3);
    }

    #[test]
    fn live_phis_are_left_alone() {
        let mut cfg = lower("if a\n x = 9\nelse\n x = 10\nendif\ny = x");
        let mut gvn = GlobalValueNumbering::default();
        block_walker(&mut cfg, &mut [&mut |cfg, id| gvn.run(cfg, id)]).unwrap();

        let progress =
            block_walker(&mut cfg, &mut [&mut |cfg, id| fixup_phis(cfg, id)]).unwrap();
        assert!(!progress);

        // Both operands still reachable; the phi survives
        let mut phis = 0;
        for block in cfg.blocks.values() {
            phis += block
                .instructions
                .iter()
                .filter(|i| matches!(i.kind, InstructionKind::Phi(_)))
                .count();
        }
        assert_eq!(phis, 1);
    }
}
