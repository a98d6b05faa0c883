//! Function inlining: eligibility filtering and call-site splicing.

use std::collections::{HashMap, HashSet};

use crate::function::Function;
use crate::quadruple::{Op, Quadruple};

/// Upper bound on the non-trivial instruction count of an implicitly
/// inlineable function. `always_inline` bypasses it.
const INLINE_SIZE_LIMIT: usize = 16;

/// A function may be spliced into its callers iff it is not `main`, carries
/// the `inline` attribute, and is either `always_inline` or small enough and
/// free of further calls.
pub fn should_inline(function: &Function) -> bool {
    if function.name == "main" {
        return false;
    }
    if !function.has_attribute("inline") {
        return false;
    }
    if function.has_attribute("always_inline") {
        return true;
    }
    let mut size = 0usize;
    for inst in &function.instructions {
        match inst.op {
            Op::FuncBegin | Op::FuncEnd | Op::Label => continue,
            Op::Call => return false,
            Op::Asm { .. } => size += inst.raw_instructions.len(),
            _ => size += 1,
        }
    }
    size <= INLINE_SIZE_LIMIT
}

pub fn filter_inlineable_functions(functions: Vec<Function>) -> (Vec<Function>, Vec<Function>) {
    let mut inline_functions = Vec::new();
    let mut common_functions = Vec::new();
    for function in functions {
        if should_inline(&function) {
            inline_functions.push(function);
        } else {
            common_functions.push(function);
        }
    }
    (inline_functions, common_functions)
}

/// Rewrite every occurrence of `from_var` in an instruction's operand
/// positions. Control-flow instructions and declarations carry labels or
/// function names, not variables, and are left alone.
pub fn redirect_variable(ir: &mut Quadruple, from_var: &str, to_var: &str) {
    if from_var == to_var || !ir.op.takes_variables() {
        return;
    }
    let mut sources_changed = false;
    if ir.src1 == from_var {
        ir.src1 = to_var.to_string();
        sources_changed = true;
    }
    if ir.src2 == from_var {
        ir.src2 = to_var.to_string();
        sources_changed = true;
    }
    if ir.dest == from_var {
        ir.dest = to_var.to_string();
    }
    for var in ir.input_vars.iter_mut().chain(ir.output_vars.iter_mut()) {
        if var == from_var {
            *var = to_var.to_string();
        }
    }
    if sources_changed {
        ir.update_kinds();
    }
}

/// Splice inlineable callee bodies into a caller body.
///
/// The body is walked in reverse so that, at each call site, the most recent
/// downstream `X := result@callee` assignment is known; the copied body then
/// writes straight into `X` and the superseded copy is dropped. Each call
/// gets a unique return-jump label replacing the callee's `__return`s.
pub fn inline_calls(
    common_function_name: &str,
    common_function_body: Vec<Quadruple>,
    inline_functions: &HashMap<String, &Function>,
) -> Vec<Quadruple> {
    let mut result_rev: Vec<Quadruple> = Vec::new();
    let mut eliminated: HashSet<usize> = HashSet::new();
    let mut ctr = 0usize;
    let mut last_result_assignment: HashMap<String, String> = HashMap::new();
    let mut last_assignment_index: HashMap<String, usize> = HashMap::new();

    for ir in common_function_body.into_iter().rev() {
        if let Op::Set(_) = ir.op {
            if ir.src1.starts_with("result@") {
                last_result_assignment.insert(ir.src1.clone(), ir.dest.clone());
                last_assignment_index.insert(ir.src1.clone(), result_rev.len());
                result_rev.push(ir);
                continue;
            }
        }
        if ir.op != Op::Call {
            result_rev.push(ir);
            continue;
        }
        let target = match inline_functions.get(&ir.src1) {
            Some(target) => *target,
            None => {
                result_rev.push(ir);
                continue;
            }
        };
        ctr += 1;
        let result_var = format!("result@{}", target.name);
        let assigned_to = last_result_assignment
            .get(&result_var)
            .cloned()
            .unwrap_or_else(|| result_var.clone());
        let return_jump = format!(
            "__MLOGEV_INLINE_CALL_{}_{}_{}__",
            target.name, common_function_name, ctr
        );
        let mut inlined_block: Vec<Quadruple> = Vec::new();
        for inst in &target.instructions {
            match inst.op {
                Op::FuncBegin | Op::FuncEnd => continue,
                Op::Return => {
                    inlined_block.push(Quadruple::i1(Op::Goto, return_jump.clone()));
                    continue;
                }
                _ => {}
            }
            let mut copy = inst.clone();
            redirect_variable(&mut copy, &result_var, &assigned_to);
            inlined_block.push(copy);
        }
        inlined_block.push(Quadruple::i1(Op::Label, return_jump));
        inlined_block.reverse();
        result_rev.extend(inlined_block);
        if assigned_to != result_var {
            if let Some(index) = last_assignment_index.remove(&result_var) {
                eliminated.insert(index);
            }
            last_result_assignment.remove(&result_var);
        }
    }

    result_rev
        .into_iter()
        .enumerate()
        .rev()
        .filter(|(index, _)| !eliminated.contains(index))
        .map(|(_, ir)| ir)
        .collect()
}
