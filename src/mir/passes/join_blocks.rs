//! Join basic blocks together.
//!
//! Used after branch pruning, when two contiguous blocks have nothing to
//! decide between them any more.

use crate::mir::{BlockId, ControlFlowGraph, InstructionKind};
use crate::Result;

fn join_blocks_impl(cfg: &mut ControlFlowGraph, id: BlockId) -> Result<bool> {
    let Some(block) = cfg.blocks.get(&id) else {
        return Ok(false);
    };

    // The block must end in a single unconditional jump
    let Some(last) = block.instructions.last() else {
        return Ok(false);
    };
    let InstructionKind::Jump(jump) = &last.kind else {
        return Ok(false);
    };
    if jump.predicate.is_some() || block.successors().len() != 1 {
        return Ok(false);
    }

    let next_id = jump.target;
    if next_id == id {
        return Ok(false);
    }

    // If the next block has other predecessors we can't splice it in yet,
    // they would be left pointing at a dead block.
    if cfg.blocks[&next_id].predecessors.len() > 1 {
        return Ok(false);
    }

    let mut next = cfg.remove_block(next_id).expect("successor exists");
    let next_successors = next.successors();

    let block = cfg.blocks.get_mut(&id).expect("block exists");
    block.instructions.pop();
    block.instructions.append(&mut next.instructions);

    for target in next_successors {
        cfg.link_nodes(id, target);
    }

    Ok(true)
}

/// Run on the same block as long as it's making progress, so a chain of
/// joinable blocks collapses in one visit.
pub fn join_blocks(cfg: &mut ControlFlowGraph, id: BlockId) -> Result<bool> {
    let mut progress = false;
    while join_blocks_impl(cfg, id)? {
        progress = true;
    }
    Ok(progress)
}
