//! Function-scoped cleanup passes.

use std::collections::HashSet;

use crate::function::Function;
use crate::quadruple::Op;

/// Drop every `label` no branch refers to.
pub fn remove_unused_labels(func: &mut Function) {
    let mut used_labels: HashSet<String> = HashSet::new();
    for inst in &func.instructions {
        match inst.op {
            Op::If | Op::IfNot => {
                used_labels.insert(inst.dest.clone());
            }
            Op::Goto => {
                used_labels.insert(inst.src1.clone());
            }
            _ => {}
        }
    }
    func.instructions
        .retain(|inst| inst.op != Op::Label || used_labels.contains(&inst.src1));
}

/// Collapse a run of `__return`s directly before `__funcend` into one.
pub fn deduplicate_tail_return(func: &mut Function) {
    let funcend = match func.instructions.last() {
        Some(inst) if inst.op == Op::FuncEnd => func.instructions.pop().unwrap(),
        _ => return,
    };
    let mut popped = 0usize;
    let mut last_return = None;
    while let Some(inst) = func.instructions.last() {
        if inst.op != Op::Return {
            break;
        }
        last_return = func.instructions.pop();
        popped += 1;
    }
    if popped > 0 {
        func.instructions.push(last_return.unwrap());
    }
    func.instructions.push(funcend);
}

/// Move all declarations to the head of the body, between `__funcbegin` and
/// the first real instruction, sorted by instruction tag.
pub fn reorder_decls(func: &mut Function) {
    if func.instructions.len() < 2 {
        return;
    }
    let mut body = std::mem::replace(&mut func.instructions, Vec::new());
    let end = body.pop().unwrap();
    let mut rest = body.split_off(1);
    let start = body.pop().unwrap();

    let mut decls = Vec::new();
    let mut others = Vec::new();
    for ir in rest.drain(..) {
        if ir.op.is_decl() {
            decls.push(ir);
        } else {
            others.push(ir);
        }
    }
    decls.sort_by_cached_key(|ir| ir.op.to_string());

    func.instructions.push(start);
    func.instructions.extend(decls);
    func.instructions.extend(others);
    func.instructions.push(end);
}

/// Drop declarations and assignments whose destination is a function-scoped
/// name never read anywhere in the function. The return slot and argument
/// slots of functions actually called are kept.
pub fn remove_unused_variables(func: &mut Function) {
    let mut referred: HashSet<String> = HashSet::new();
    let mut involved_functions: HashSet<String> = HashSet::new();
    involved_functions.insert(func.name.clone());

    for inst in &func.instructions {
        if inst.op.is_decl() {
            continue;
        }
        if inst.op == Op::Call {
            involved_functions.insert(inst.src1.clone());
        }
        referred.insert(inst.src1.clone());
        referred.insert(inst.src2.clone());
        for var in &inst.input_vars {
            referred.insert(var.clone());
        }
    }

    let function_name = func.name.clone();
    let should_remove = |name: &str| -> bool {
        if referred.contains(name) || !name.contains('@') || name.starts_with('@') {
            return false;
        }
        let function_scope = name.rsplit('@').next().unwrap_or("");
        if !involved_functions.contains(function_scope) {
            return true;
        }
        function_scope == function_name && !name.starts_with("result@")
    };

    func.instructions.retain(|inst| !should_remove(&inst.dest));
}
