//! Methods of string objects.

use crate::mir::passes::walkers::function_walker;
use crate::mir::passes::{all_args_reduced, extractors};
use crate::mir::version::{self, Operator};
use crate::mir::{BlockId, ControlFlowGraph, FunctionCall, Instruction, InstructionKind};
use crate::{Error, Result};

fn lower_version_compare(func: &FunctionCall, holder: &str) -> Result<Instruction> {
    if !func.kw_args.is_empty() {
        return Err(Error::invalid_arguments(
            "string.version_compare() does not take any keyword arguments",
        ));
    }
    if func.pos_args.len() != 1 {
        return Err(Error::invalid_arguments(format!(
            "string.version_compare() takes exactly 1 positional argument, got: {}",
            func.pos_args.len()
        )));
    }

    let comparison: String = extractors::extract_positional(
        &func.pos_args[0],
        "string.version_compare: First argument was not a string",
    )?;
    let stripped: String = comparison.chars().filter(|c| !c.is_whitespace()).collect();

    let (op, value) = if let Some(rest) = stripped.strip_prefix("==") {
        (Operator::Eq, rest)
    } else if let Some(rest) = stripped.strip_prefix("!=") {
        (Operator::Ne, rest)
    } else if let Some(rest) = stripped.strip_prefix(">=") {
        (Operator::Ge, rest)
    } else if let Some(rest) = stripped.strip_prefix("<=") {
        (Operator::Le, rest)
    } else if let Some(rest) = stripped.strip_prefix('<') {
        (Operator::Lt, rest)
    } else if let Some(rest) = stripped.strip_prefix('>') {
        (Operator::Gt, rest)
    } else {
        return Err(Error::meson(format!(
            "Version string comparison does not start with a valid comparison operator: {comparison}"
        )));
    };

    Ok(Instruction::new(InstructionKind::Boolean(version::compare(
        holder, op, value,
    ))))
}

pub fn lower_string_objects(cfg: &mut ControlFlowGraph, id: BlockId) -> Result<bool> {
    let Some(block) = cfg.blocks.get_mut(&id) else {
        return Ok(false);
    };

    function_walker(block, &mut |instruction: &Instruction| {
        let InstructionKind::FunctionCall(func) = &instruction.kind else {
            return Ok(None);
        };
        let Some(holder) = &func.holder else {
            return Ok(None);
        };
        let InstructionKind::String(holder) = &holder.kind else {
            return Ok(None);
        };
        if !all_args_reduced(&func.pos_args, &func.kw_args) {
            return Ok(None);
        }

        match func.name.as_str() {
            "version_compare" => lower_version_compare(func, holder).map(Some),
            _ => Ok(None),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mir::passes::test_support::lower;

    fn result_of(source: &str) -> InstructionKind {
        let mut cfg = lower(source);
        let entry = cfg.entry;
        let progress = lower_string_objects(&mut cfg, entry).unwrap();
        assert!(progress);
        cfg.entry_block().instructions[0].kind.clone()
    }

    #[test]
    fn version_compare_less_than() {
        assert_eq!(
            result_of("x = '3.6'.version_compare('< 3.7')"),
            InstructionKind::Boolean(true)
        );
        assert_eq!(
            result_of("x = '3.8'.version_compare('< 3.7')"),
            InstructionKind::Boolean(false)
        );
    }

    #[test]
    fn version_compare_all_operators() {
        assert_eq!(
            result_of("x = '1.2.3'.version_compare('== 1.2.3')"),
            InstructionKind::Boolean(true)
        );
        assert_eq!(
            result_of("x = '1.2.3'.version_compare('!= 1.2.4')"),
            InstructionKind::Boolean(true)
        );
        assert_eq!(
            result_of("x = '2.0'.version_compare('>= 2')"),
            InstructionKind::Boolean(true)
        );
        assert_eq!(
            result_of("x = '2.0'.version_compare('<=1.9')"),
            InstructionKind::Boolean(false)
        );
        assert_eq!(
            result_of("x = '10.0'.version_compare('> 9.9')"),
            InstructionKind::Boolean(true)
        );
    }

    #[test]
    fn missing_operator_is_an_error() {
        let mut cfg = lower("x = '3.6'.version_compare('3.7')");
        let entry = cfg.entry;
        assert!(lower_string_objects(&mut cfg, entry).is_err());
    }

    #[test]
    fn unknown_methods_are_left_alone() {
        let mut cfg = lower("x = 'abc'.mystery()");
        let entry = cfg.entry;
        let progress = lower_string_objects(&mut cfg, entry).unwrap();
        assert!(!progress);
    }
}
