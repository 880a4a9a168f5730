//! Constant folding.
//!
//! Two jobs: canonicalize identifier aliases (`z = y` where `y = x` becomes
//! `z = x` directly), and evaluate pure arithmetic whose operands have been
//! reduced to constants. Everything else pure is evaluated by the semantic
//! lowering that owns it.

use std::collections::BTreeMap;

use crate::mir::passes::walkers::function_walker;
use crate::mir::{
    BlockId, ControlFlowGraph, FunctionCall, Identifier, Instruction, InstructionKind, Variable,
};
use crate::{Error, Result};

#[derive(Default)]
pub struct ConstantFolding {
    /// Maps a defined variable to the variable it is an alias of
    table: BTreeMap<Variable, Variable>,
}

fn fold_arithmetic(func: &FunctionCall) -> Result<Option<Instruction>> {
    if func.pos_args.len() != 2 {
        return Err(Error::invalid_arguments(format!(
            "{}: takes 2 arguments, got {}",
            func.name,
            func.pos_args.len()
        )));
    }

    if let (InstructionKind::Number(lhs), InstructionKind::Number(rhs)) =
        (&func.pos_args[0].kind, &func.pos_args[1].kind)
    {
        let value = match func.name.as_str() {
            "arith_add" => lhs.wrapping_add(*rhs),
            "arith_sub" => lhs.wrapping_sub(*rhs),
            "arith_mul" => lhs.wrapping_mul(*rhs),
            "arith_div" => {
                if *rhs == 0 {
                    return Err(Error::invalid_arguments("Division by zero"));
                }
                lhs.wrapping_div(*rhs)
            }
            "arith_mod" => {
                if *rhs == 0 {
                    return Err(Error::invalid_arguments("Division by zero"));
                }
                lhs.wrapping_rem(*rhs)
            }
            _ => return Ok(None),
        };
        return Ok(Some(Instruction::new(InstructionKind::Number(value))));
    }

    // `+` also concatenates strings
    if func.name == "arith_add" {
        if let (InstructionKind::String(lhs), InstructionKind::String(rhs)) =
            (&func.pos_args[0].kind, &func.pos_args[1].kind)
        {
            return Ok(Some(Instruction::new(InstructionKind::String(format!(
                "{lhs}{rhs}"
            )))));
        }
    }

    Ok(None)
}

impl ConstantFolding {
    fn fold(&mut self, instruction: &Instruction) -> Result<Option<Instruction>> {
        match &instruction.kind {
            InstructionKind::Identifier(identifier) => {
                let key = Variable::versioned(identifier.name.clone(), identifier.version);

                if let Some(canonical) = self.table.get(&key).cloned() {
                    /* The alias is itself an alias; map it through directly:
                     *
                     *     x1 = 7
                     *     y1 = x1
                     *     z1 = y1
                     *
                     * Here z1 is known to be x1, so just use that.
                     */
                    if instruction.var.is_set() {
                        self.table.insert(instruction.var.clone(), canonical.clone());
                    }
                    return Ok(Some(Instruction::with_var(
                        InstructionKind::Identifier(Identifier::versioned(
                            canonical.name,
                            canonical.version,
                        )),
                        instruction.var.clone(),
                    )));
                }

                if instruction.var.is_set() {
                    self.table.insert(instruction.var.clone(), key);
                }
                Ok(None)
            }
            InstructionKind::FunctionCall(func)
                if func.holder.is_none() && func.name.starts_with("arith_") =>
            {
                fold_arithmetic(func)
            }
            _ => Ok(None),
        }
    }

    pub fn run(&mut self, cfg: &mut ControlFlowGraph, id: BlockId) -> Result<bool> {
        let Some(block) = cfg.blocks.get_mut(&id) else {
            return Ok(false);
        };

        function_walker(block, &mut |instruction| self.fold(instruction))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mir::passes::test_support::lower;
    use crate::mir::passes::walkers::block_walker;
    use crate::mir::passes::GlobalValueNumbering;

    fn run(cfg: &mut ControlFlowGraph) -> bool {
        let mut gvn = GlobalValueNumbering::default();
        block_walker(cfg, &mut [&mut |cfg, id| gvn.run(cfg, id)]).unwrap();

        let mut folding = ConstantFolding::default();
        block_walker(cfg, &mut [&mut |cfg, id| folding.run(cfg, id)]).unwrap()
    }

    #[test]
    fn alias_chains_are_shortened() {
        let mut cfg = lower("x = 7\ny = x\nz = y");
        run(&mut cfg);

        let entry = cfg.entry_block();
        let InstructionKind::Identifier(z) = &entry.instructions[2].kind else {
            panic!("expected an identifier");
        };
        // z points straight at x, not at y
        assert_eq!(z.name, "x");
        assert_eq!(z.version, 1);
    }

    #[test]
    fn arithmetic_on_numbers_is_evaluated() {
        let mut cfg = lower("x = 1 + 2\ny = 3 * 4\nz = 10 % 3");
        run(&mut cfg);

        let entry = cfg.entry_block();
        assert_eq!(entry.instructions[0].kind, InstructionKind::Number(3));
        assert_eq!(entry.instructions[1].kind, InstructionKind::Number(12));
        assert_eq!(entry.instructions[2].kind, InstructionKind::Number(1));
        // Variables survive the fold
        assert_eq!(entry.instructions[0].var.name, "x");
    }

    #[test]
    fn string_concatenation() {
        let mut cfg = lower("x = 'a' + 'b'");
        run(&mut cfg);
        assert_eq!(
            cfg.entry_block().instructions[0].kind,
            InstructionKind::String("ab".to_owned())
        );
    }

    #[test]
    fn division_by_zero_is_an_error() {
        let mut cfg = lower("x = 1 / 0");
        let mut gvn = GlobalValueNumbering::default();
        block_walker(&mut cfg, &mut [&mut |cfg, id| gvn.run(cfg, id)]).unwrap();

        let mut folding = ConstantFolding::default();
        let result = block_walker(&mut cfg, &mut [&mut |cfg, id| folding.run(cfg, id)]);
        assert!(result.is_err());
    }

    #[test]
    fn unresolved_operands_are_left_for_later() {
        let mut cfg = lower("x = a + 2");
        let progress = run(&mut cfg);
        // Numbering made progress, but the call is untouched
        let entry = cfg.entry_block();
        assert!(matches!(
            entry.instructions[0].kind,
            InstructionKind::FunctionCall(_)
        ));
        let _ = progress;
    }

    #[test]
    fn second_run_reaches_a_fixed_point() {
        let mut cfg = lower("x = 7\ny = x\nz = y");
        run(&mut cfg);

        let mut folding = ConstantFolding::default();
        // A fresh table re-learns the aliases without changing anything
        block_walker(&mut cfg, &mut [&mut |cfg, id| folding.run(cfg, id)]).unwrap();
        let progress =
            block_walker(&mut cfg, &mut [&mut |cfg, id| folding.run(cfg, id)]).unwrap();
        assert!(!progress);
    }
}
