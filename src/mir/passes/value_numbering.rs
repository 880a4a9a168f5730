//! Global value numbering and phi insertion.
//!
//! Definitions get versions from a per-name global counter, uses inherit the
//! version that is current where they appear, and blocks with several
//! incoming paths get phis for every name defined on more than one of them.

use std::collections::BTreeMap;

use hashbrown::HashMap;

use crate::mir::{BlockId, ControlFlowGraph, Instruction, InstructionKind, Phi, Variable};
use crate::Result;

#[derive(Default)]
pub struct GlobalValueNumbering {
    /// Per-block name -> latest version tables, merged down from predecessors
    data: HashMap<BlockId, BTreeMap<String, u32>>,

    /// The global per-name counter
    gvn: HashMap<String, u32>,
}

fn number(
    instruction: &mut Instruction,
    table: &mut BTreeMap<String, u32>,
    gvn: &mut HashMap<String, u32>,
) -> bool {
    let mut progress = false;

    match &mut instruction.kind {
        InstructionKind::Identifier(identifier) => {
            if identifier.version == 0 {
                // A name with no definition yet is left at version 0; the
                // passes that would consume it already tolerate unresolved
                // operands, and builtin namespaces (`meson`, the machines)
                // are never defined at all.
                if let Some(version) = table.get(&identifier.name) {
                    identifier.version = *version;
                    progress = true;
                }
            }
        }
        InstructionKind::Array(elements) => {
            for element in elements.iter_mut() {
                progress |= number(element, table, gvn);
            }
        }
        InstructionKind::Dict(entries) => {
            for value in entries.values_mut() {
                progress |= number(value, table, gvn);
            }
        }
        InstructionKind::FunctionCall(func) => {
            if let Some(holder) = &mut func.holder {
                progress |= number(holder, table, gvn);
            }
            for arg in func.pos_args.iter_mut() {
                progress |= number(arg, table, gvn);
            }
            for value in func.kw_args.values_mut() {
                progress |= number(value, table, gvn);
            }
        }
        InstructionKind::Jump(jump) => {
            if let Some(predicate) = &mut jump.predicate {
                progress |= number(predicate, table, gvn);
            }
        }
        InstructionKind::Branch(branch) => {
            for (predicate, _) in branch.branches.iter_mut() {
                progress |= number(predicate, table, gvn);
            }
        }
        _ => {}
    }

    // Definitions are numbered after their members, so a definition never
    // refers to itself.
    if instruction.var.is_set() && instruction.var.version == 0 {
        let counter = gvn.entry(instruction.var.name.clone()).or_insert(0);
        *counter += 1;
        instruction.var.version = *counter;
        table.insert(instruction.var.name.clone(), *counter);
        progress = true;
    }

    progress
}

impl GlobalValueNumbering {
    /// Insert phis for every name that converges here: a name defined on at
    /// least two incoming paths. Versions are walked in predecessor order;
    /// each additional version chains through a freshly numbered phi.
    fn insert_phis(
        &mut self,
        cfg: &mut ControlFlowGraph,
        id: BlockId,
        preds: &[BlockId],
        table: &mut BTreeMap<String, u32>,
    ) -> bool {
        let mut phis: Vec<Instruction> = Vec::new();

        let names: Vec<String> = table.keys().cloned().collect();
        for name in names {
            let versions: Vec<u32> = preds
                .iter()
                .filter_map(|p| self.data.get(p).and_then(|t| t.get(&name)).copied())
                .collect();
            if versions.len() < 2 {
                continue;
            }

            let mut prev = versions[0];
            for version in &versions[1..] {
                // An identical phi may already be present from an earlier
                // numbering of an equivalent join
                let existing = cfg.blocks[&id].instructions.iter().find_map(|i| {
                    match &i.kind {
                        InstructionKind::Phi(phi)
                            if i.var.name == name
                                && phi.left == prev
                                && phi.right == *version =>
                        {
                            Some(i.var.version)
                        }
                        _ => None,
                    }
                });
                if let Some(existing) = existing {
                    prev = existing;
                    table.insert(name.clone(), existing);
                    continue;
                }

                let counter = self.gvn.entry(name.clone()).or_insert(0);
                *counter += 1;
                let fresh = *counter;

                phis.push(Instruction::with_var(
                    InstructionKind::Phi(Phi {
                        left: prev,
                        right: *version,
                    }),
                    Variable::versioned(name.clone(), fresh),
                ));
                table.insert(name.clone(), fresh);
                prev = fresh;
            }
        }

        if phis.is_empty() {
            return false;
        }

        let block = cfg.blocks.get_mut(&id).expect("block exists");
        block.instructions.splice(0..0, phis);
        true
    }

    pub fn run(&mut self, cfg: &mut ControlFlowGraph, id: BlockId) -> Result<bool> {
        // Don't run this pass on the same data twice
        if self.data.contains_key(&id) {
            return Ok(false);
        }

        let Some(block) = cfg.blocks.get(&id) else {
            return Ok(false);
        };
        let preds: Vec<BlockId> = block.predecessors.iter().copied().collect();

        // Merge the predecessor tables down, even for strictly dominated
        // blocks, keeping the highest version on conflicts.
        let mut table: BTreeMap<String, u32> = BTreeMap::new();
        for p in &preds {
            if let Some(pred_table) = self.data.get(p) {
                for (name, version) in pred_table {
                    table
                        .entry(name.clone())
                        .and_modify(|v| *v = (*v).max(*version))
                        .or_insert(*version);
                }
            }
        }

        let mut progress = false;

        if preds.len() >= 2 {
            progress |= self.insert_phis(cfg, id, &preds, &mut table);
        }

        let block = cfg.blocks.get_mut(&id).expect("block exists");
        for instruction in block.instructions.iter_mut() {
            progress |= number(instruction, &mut table, &mut self.gvn);
        }

        self.data.insert(id, table);
        Ok(progress)
    }
}
