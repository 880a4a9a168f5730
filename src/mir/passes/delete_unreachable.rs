//! Delete code that an error makes unreachable.
//!
//! A `Message` at ERROR level never returns, so the rest of its block and
//! everything only reachable through it is dead. Anything after the error
//! may well be spurious, so it is discarded rather than diagnosed.

use crate::mir::{BlockId, ControlFlowGraph, InstructionKind, MessageLevel};
use crate::Result;

pub fn delete_unreachable(cfg: &mut ControlFlowGraph, id: BlockId) -> Result<bool> {
    let Some(block) = cfg.blocks.get(&id) else {
        return Ok(false);
    };

    let Some(index) = block.instructions.iter().position(|i| {
        matches!(
            &i.kind,
            InstructionKind::Message(m) if m.level == MessageLevel::Error
        )
    }) else {
        return Ok(false);
    };

    let successors = block.successors();
    let mut progress = false;

    let block = cfg.blocks.get_mut(&id).expect("block exists");
    if block.instructions.len() > index + 1 {
        block.instructions.truncate(index + 1);
        progress = true;
    }

    for target in successors {
        cfg.unlink_nodes(id, target);
        progress = true;
    }

    if progress {
        cfg.sweep_unreachable();
    }

    Ok(progress)
}
