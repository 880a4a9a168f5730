//! Prune dead condition branches.
//!
//! Once condition expressions have been folded to constants we can trim away
//! the arms that will never run, so the blocks can later be joined into a
//! single flat list.

use crate::mir::{BlockId, ControlFlowGraph, InstructionKind, Jump};
use crate::Result;

fn constant_predicate(kind: &InstructionKind) -> Option<bool> {
    match kind {
        InstructionKind::Boolean(value) => Some(*value),
        _ => None,
    }
}

fn branch_pruning_impl(cfg: &mut ControlFlowGraph, id: BlockId) -> Result<bool> {
    let Some(block) = cfg.blocks.get(&id) else {
        return Ok(false);
    };

    // Find the first jump or branch decided by a constant
    let mut decided = None;
    for (index, instruction) in block.instructions.iter().enumerate() {
        match &instruction.kind {
            InstructionKind::Jump(jump) => {
                if let Some(value) = jump.predicate.as_ref().and_then(|p| constant_predicate(&p.kind)) {
                    decided = Some((index, value));
                    break;
                }
            }
            InstructionKind::Branch(branch) => {
                // A branch can change if an arm is constant false, or if any
                // arm follows a constant-true one.
                let mut settled = false;
                let mut can_change = false;
                for (predicate, _) in &branch.branches {
                    if settled {
                        can_change = true;
                        break;
                    }
                    match constant_predicate(&predicate.kind) {
                        Some(true) => settled = true,
                        Some(false) => {
                            can_change = true;
                            break;
                        }
                        None => {}
                    }
                }
                // A lone constant-true arm also rewrites to a plain jump
                if can_change || (settled && branch.branches.len() == 1) {
                    decided = Some((index, true));
                    break;
                }
            }
            _ => {}
        }
    }

    let Some((index, _)) = decided else {
        return Ok(false);
    };

    // Candidates whose edge from this block may now be dead
    let mut dropped: Vec<BlockId> = Vec::new();

    {
        let block = cfg.blocks.get_mut(&id).expect("block exists");
        match &mut block.instructions[index].kind {
            InstructionKind::Jump(jump) => {
                let taken = jump
                    .predicate
                    .as_ref()
                    .and_then(|p| constant_predicate(&p.kind))
                    .expect("scan only stops on constant predicates");

                if taken {
                    // The jump is now unconditional; everything after it is
                    // dead and every other outgoing edge goes away.
                    jump.predicate = None;
                    let erased = block.instructions.split_off(index + 1);
                    for instruction in &erased {
                        match &instruction.kind {
                            InstructionKind::Jump(j) => dropped.push(j.target),
                            InstructionKind::Branch(b) => {
                                dropped.extend(b.branches.iter().map(|(_, t)| *t))
                            }
                            _ => {}
                        }
                    }
                } else {
                    dropped.push(jump.target);
                    block.instructions.remove(index);
                }
            }
            InstructionKind::Branch(branch) => {
                let entries = std::mem::take(&mut branch.branches);
                let mut kept = Vec::with_capacity(entries.len());

                let mut settled = false;
                for (predicate, target) in entries {
                    if settled {
                        dropped.push(target);
                        continue;
                    }
                    match constant_predicate(&predicate.kind) {
                        Some(true) => {
                            // This arm always runs; everything after it
                            // never does
                            kept.push((predicate, target));
                            settled = true;
                        }
                        Some(false) => dropped.push(target),
                        None => kept.push((predicate, target)),
                    }
                }

                if kept.len() == 1 {
                    let target = kept[0].1;
                    block.instructions[index].kind = InstructionKind::Jump(Jump {
                        target,
                        predicate: None,
                    });
                } else if kept.is_empty() {
                    block.instructions.remove(index);
                } else {
                    branch.branches = kept;
                }
            }
            _ => unreachable!("decided index points at a terminator"),
        }
    }

    // Unlink the dead edges, unless some other instruction still provides
    // them, then sweep whatever became unreachable.
    let remaining = cfg.blocks[&id].successors();
    for target in dropped {
        if !remaining.contains(&target) {
            cfg.unlink_nodes(id, target);
        }
    }
    cfg.sweep_unreachable();

    Ok(true)
}

/// Run on the same block as long as it keeps making progress, so a newly
/// exposed constant branch is pruned in the same visit.
pub fn branch_pruning(cfg: &mut ControlFlowGraph, id: BlockId) -> Result<bool> {
    let mut progress = false;
    while branch_pruning_impl(cfg, id)? {
        progress = true;
    }
    Ok(progress)
}
