use crate::function::Function;
use crate::optimizer::passes::{
    deduplicate_tail_return, remove_unused_labels, remove_unused_variables, reorder_decls,
};
use crate::quadruple::Op;
use crate::test::{dump_ir, parse_ir};

fn make_function(name: &str, body: &str) -> Function {
    let mut function = Function::new(name.to_string(), None, vec!["default".to_string()]);
    function.instructions = parse_ir(body);
    function
}

#[test]
fn unused_labels_are_dropped_and_referenced_ones_kept() {
    let mut f = make_function(
        "f",
        "__funcbegin f default\n\
         :USED_BY_GOTO\n\
         goto USED_BY_GOTO\n\
         :USED_BY_BRANCH\n\
         if a lt_i32 3 goto USED_BY_BRANCH\n\
         :NEVER_REFERENCED\n\
         __funcend f",
    );
    remove_unused_labels(&mut f);
    let labels: Vec<&str> = f
        .instructions
        .iter()
        .filter(|ir| ir.op == Op::Label)
        .map(|ir| ir.src1.as_str())
        .collect();
    assert_eq!(labels, vec!["USED_BY_GOTO", "USED_BY_BRANCH"]);
    // Every referenced label is still present.
    for ir in &f.instructions {
        let referenced = match ir.op {
            Op::Goto => Some(ir.src1.as_str()),
            Op::If | Op::IfNot => Some(ir.dest.as_str()),
            _ => None,
        };
        if let Some(label) = referenced {
            assert!(labels.contains(&label), "label {} lost", label);
        }
    }
}

#[test]
fn trailing_returns_collapse_to_one() {
    let mut f = make_function(
        "f",
        "__funcbegin f default\n\
         set_i32 1 result@f\n\
         __return f\n\
         __return f\n\
         __return f\n\
         __funcend f",
    );
    deduplicate_tail_return(&mut f);
    assert_eq!(
        dump_ir(&f.instructions),
        vec![
            "__funcbegin f default",
            "set_i32 1 result@f",
            "__return f",
            "__funcend f",
        ]
    );
}

#[test]
fn tail_return_pass_leaves_other_shapes_alone() {
    let original = "__funcbegin f default\n__return f\nset_i32 1 x\n__funcend f";
    let mut f = make_function("f", original);
    deduplicate_tail_return(&mut f);
    assert_eq!(dump_ir(&f.instructions), parse_ir(original).iter().map(|i| i.dump()).collect::<Vec<_>>());
}

#[test]
fn decls_move_to_function_head_sorted_by_tag() {
    let mut f = make_function(
        "f",
        "__funcbegin f default\n\
         set_i32 1 _a@f\n\
         decl_obj _msg@f\n\
         set_i32 2 _b@f\n\
         decl_i32 _a@f\n\
         decl_f64 _x@f\n\
         __funcend f",
    );
    reorder_decls(&mut f);
    assert_eq!(
        dump_ir(&f.instructions),
        vec![
            "__funcbegin f default",
            "decl_f64 _x@f",
            "decl_i32 _a@f",
            "decl_obj _msg@f",
            "set_i32 1 _a@f",
            "set_i32 2 _b@f",
            "__funcend f",
        ]
    );
}

#[test]
fn unread_locals_are_removed() {
    let mut f = make_function(
        "f",
        "__funcbegin f default\n\
         decl_i32 _unused@f\n\
         set_i32 1 _unused@f\n\
         decl_i32 _used@f\n\
         set_i32 2 _used@f\n\
         add_i32 _used@f 1 result@f\n\
         __return f\n\
         __funcend f",
    );
    remove_unused_variables(&mut f);
    assert_eq!(
        dump_ir(&f.instructions),
        vec![
            "__funcbegin f default",
            "decl_i32 _used@f",
            "set_i32 2 _used@f",
            "add_i32 _used@f 1 result@f",
            "__return f",
            "__funcend f",
        ]
    );
}

#[test]
fn result_slot_and_call_arguments_survive() {
    let mut f = make_function(
        "f",
        "__funcbegin f default\n\
         set_i32 1 result@f\n\
         set_i32 5 _x@callee\n\
         __call callee\n\
         __funcend f",
    );
    remove_unused_variables(&mut f);
    assert_eq!(
        dump_ir(&f.instructions),
        vec![
            "__funcbegin f default",
            "set_i32 1 result@f",
            "set_i32 5 _x@callee",
            "__call callee",
            "__funcend f",
        ]
    );
}

#[test]
fn slots_of_uncalled_functions_are_removed() {
    let mut f = make_function(
        "f",
        "__funcbegin f default\n\
         set_i32 5 _x@never_called\n\
         __funcend f",
    );
    remove_unused_variables(&mut f);
    assert_eq!(
        dump_ir(&f.instructions),
        vec!["__funcbegin f default", "__funcend f"]
    );
}

#[test]
fn globals_are_never_removed() {
    let mut f = make_function(
        "f",
        "__funcbegin f default\n\
         set_i32 1 some_global\n\
         __funcend f",
    );
    remove_unused_variables(&mut f);
    assert_eq!(f.instructions.len(), 3);
}
