use std::collections::HashMap;

use crate::function::Function;
use crate::inline::{filter_inlineable_functions, inline_calls, should_inline};
use crate::quadruple::Op;
use crate::test::{dump_ir, parse_ir};

fn make_function(name: &str, attributes: &[&str], body: &str) -> Function {
    let mut function = Function::new(
        name.to_string(),
        None,
        attributes.iter().map(|a| a.to_string()).collect(),
    );
    function.instructions = parse_ir(body);
    function
}

#[test]
fn main_is_never_inlined() {
    let main = make_function(
        "main",
        &["inline"],
        "__funcbegin main inline\n__funcend main",
    );
    assert!(!should_inline(&main));
}

#[test]
fn inline_attribute_is_required() {
    let f = make_function("f", &["default"], "__funcbegin f default\n__funcend f");
    assert!(!should_inline(&f));
}

#[test]
fn small_bodies_inline_large_ones_do_not() {
    let mut body = String::from("__funcbegin f inline\n");
    for i in 0..16 {
        body.push_str(&format!("add_i32 a {} a\n", i));
    }
    body.push_str("__funcend f");
    let small = make_function("f", &["inline"], &body);
    assert!(should_inline(&small));

    let mut body = String::from("__funcbegin f inline\n");
    for i in 0..17 {
        body.push_str(&format!("add_i32 a {} a\n", i));
    }
    body.push_str("__funcend f");
    let large = make_function("f", &["inline"], &body);
    assert!(!should_inline(&large));

    let forced = make_function("f", &["inline", "always_inline"], &body);
    assert!(should_inline(&forced));
}

#[test]
fn asm_raw_lines_count_toward_size() {
    let body = "__funcbegin f inline\n\
                __asmvbegin 0\n\
                print 1\nprint 2\nprint 3\nprint 4\nprint 5\nprint 6\n\
                print 7\nprint 8\nprint 9\nprint 10\nprint 11\nprint 12\n\
                print 13\nprint 14\nprint 15\nprint 16\nprint 17\n\
                __asmvend 0\n\
                __funcend f";
    let f = make_function("f", &["inline"], body);
    assert!(!should_inline(&f));
}

#[test]
fn callers_are_not_inlineable() {
    let f = make_function(
        "f",
        &["inline"],
        "__funcbegin f inline\n__call g\n__funcend f",
    );
    assert!(!should_inline(&f));
}

#[test]
fn splice_rewrites_result_variable() {
    let callee = make_function(
        "double_it",
        &["inline"],
        "__funcbegin double_it inline\n\
         decl_i32 result@double_it\n\
         mul_i32 _x@double_it 2 result@double_it\n\
         __return double_it\n\
         __funcend double_it",
    );
    let caller_body = parse_ir(
        "__funcbegin caller default\n\
         set_i32 5 _x@double_it\n\
         __call double_it\n\
         decl_i32 result@double_it\n\
         set_i32 result@double_it _y@caller\n\
         __funcend caller",
    );
    let mut inline_map: HashMap<String, &Function> = HashMap::new();
    inline_map.insert(callee.name.clone(), &callee);

    let result = inline_calls("caller", caller_body, &inline_map);

    assert!(result.iter().all(|ir| ir.op != Op::Call));
    assert_eq!(
        dump_ir(&result),
        vec![
            "__funcbegin caller default",
            "set_i32 5 _x@double_it",
            "decl_i32 result@double_it",
            "mul_i32 _x@double_it 2 _y@caller",
            "goto __MLOGEV_INLINE_CALL_double_it_caller_1__",
            ":__MLOGEV_INLINE_CALL_double_it_caller_1__",
            "decl_i32 result@double_it",
            "__funcend caller",
        ]
    );
}

#[test]
fn calls_to_common_functions_survive() {
    let caller_body = parse_ir("__funcbegin caller default\n__call g\n__funcend caller");
    let inline_map = HashMap::new();
    let result = inline_calls("caller", caller_body, &inline_map);
    assert!(result.iter().any(|ir| ir.op == Op::Call));
}

#[test]
fn unassigned_result_keeps_result_slot() {
    // The caller ignores the return value: the callee body keeps writing
    // result@f and no set is eliminated.
    let callee = make_function(
        "f",
        &["inline"],
        "__funcbegin f inline\n\
         set_i32 1 result@f\n\
         __return f\n\
         __funcend f",
    );
    let caller_body = parse_ir("__funcbegin caller default\n__call f\n__funcend caller");
    let mut inline_map: HashMap<String, &Function> = HashMap::new();
    inline_map.insert(callee.name.clone(), &callee);
    let result = inline_calls("caller", caller_body, &inline_map);
    assert_eq!(
        dump_ir(&result),
        vec![
            "__funcbegin caller default",
            "set_i32 1 result@f",
            "goto __MLOGEV_INLINE_CALL_f_caller_1__",
            ":__MLOGEV_INLINE_CALL_f_caller_1__",
            "__funcend caller",
        ]
    );
}

#[test]
fn filter_splits_by_eligibility() {
    let inlineable = make_function(
        "f",
        &["inline"],
        "__funcbegin f inline\n__return f\n__funcend f",
    );
    let common = make_function("main", &["default"], "__funcbegin main default\n__funcend main");
    let (inline_functions, common_functions) =
        filter_inlineable_functions(vec![inlineable, common]);
    assert_eq!(inline_functions.len(), 1);
    assert_eq!(inline_functions[0].name, "f");
    assert_eq!(common_functions.len(), 1);
    assert_eq!(common_functions[0].name, "main");
}
