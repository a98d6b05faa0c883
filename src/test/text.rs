use crate::quadruple::{classify_operand, Op, OperandKind};
use crate::test::{dump_ir, parse_ir};
use crate::text::extract_functions_from_ir;

fn round_trip(line: &str) {
    let parsed = parse_ir(line);
    assert_eq!(parsed.len(), 1, "expected one quadruple from {:?}", line);
    assert_eq!(parsed[0].dump(), line);
    // Parsing the dump again must reproduce the quadruple exactly.
    let reparsed = parse_ir(&parsed[0].dump());
    assert_eq!(reparsed, parsed);
}

#[test]
fn round_trip_every_kind() {
    round_trip("noop");
    round_trip(":__MLOGEV_LOOP_0_START_");
    round_trip("goto END");
    round_trip("__funcbegin f inline,always_inline");
    round_trip("__funcend f");
    round_trip("__call f");
    round_trip("__return f");
    round_trip("decl_i32 _x@f");
    round_trip("decl_obj message");
    round_trip("set_f64 1.5 _x@f");
    round_trip("minus_i32 _x@f ___vtmp_1@f");
    round_trip("not_i32 a b");
    round_trip("cvtf64_i32 _x@f _y@f");
    round_trip("cvti32_f64 _y@f _x@f");
    round_trip("add_i32 a b c");
    round_trip("rem_i32 a b c");
    round_trip("lteq_f64 a 1.5 c");
    round_trip("if _x@f lt_i32 3 goto START");
    round_trip("ifnot cond ne_i32 false goto END");
    round_trip("if cond goto END");
}

#[test]
fn round_trip_asm_block() {
    let text = "__asmbegin 2 obj _x@f\nsensor %0 %1 @copper\nprint %2\n__asmend 1 ___vtmp_1@f";
    let parsed = parse_ir(text);
    assert_eq!(parsed.len(), 1);
    let asm = &parsed[0];
    assert_eq!(asm.op, Op::Asm { volatile: false });
    assert_eq!(asm.input_vars, vec!["obj", "_x@f"]);
    assert_eq!(asm.output_vars, vec!["___vtmp_1@f"]);
    assert_eq!(asm.raw_instructions.len(), 2);
    assert_eq!(asm.dump(), text);
}

#[test]
fn round_trip_volatile_asm_block() {
    let text = "__asmvbegin 1 msg\nprint msg\n__asmvend 0";
    let parsed = parse_ir(text);
    assert_eq!(parsed.len(), 1);
    assert_eq!(parsed[0].op, Op::Asm { volatile: true });
    assert_eq!(parsed[0].dump(), text);
}

#[test]
fn unknown_lines_are_skipped() {
    let parsed = parse_ir("bogus_inst a b c\nset_i32 1 x");
    assert_eq!(dump_ir(&parsed), vec!["set_i32 1 x"]);
}

#[test]
fn operand_classification() {
    assert_eq!(classify_operand("x"), OperandKind::Variable);
    assert_eq!(classify_operand("_a@main"), OperandKind::Variable);
    assert_eq!(classify_operand("___vtmp_3@f"), OperandKind::Variable);
    assert_eq!(classify_operand("@this-x"), OperandKind::Variable);
    assert_eq!(classify_operand("false"), OperandKind::Variable);
    assert_eq!(classify_operand("42"), OperandKind::ImmediateInt);
    assert_eq!(classify_operand("-7"), OperandKind::ImmediateInt);
    assert_eq!(classify_operand("0x1F"), OperandKind::ImmediateInt);
    assert_eq!(classify_operand("1.5"), OperandKind::ImmediateFloat);
    assert_eq!(classify_operand("1e3"), OperandKind::ImmediateFloat);
    assert_eq!(classify_operand("\"hello\""), OperandKind::Invalid);
    assert_eq!(classify_operand(""), OperandKind::Invalid);
}

#[test]
fn tag_parsing_rejects_bad_suffixes() {
    assert!("rem_f64".parse::<Op>().is_err());
    assert!("not_f64".parse::<Op>().is_err());
    assert!("lsh_f64".parse::<Op>().is_err());
    assert!("frobnicate".parse::<Op>().is_err());
    assert_eq!("add_f64".parse::<Op>().ok().map(|op| op.to_string()), Some("add_f64".into()));
}

#[test]
fn extract_functions_splits_globals_and_bodies() {
    let ir = parse_ir(
        "decl_i32 g\n\
         set_i32 0 g\n\
         __funcbegin main default\n\
         __return main\n\
         __funcend main\n\
         __funcbegin helper inline,always_inline\n\
         __funcend helper",
    );
    let (inits, functions) = extract_functions_from_ir(ir);
    assert_eq!(inits.len(), 2);
    assert_eq!(functions.len(), 2);
    assert_eq!(functions[0].name, "main");
    assert_eq!(functions[0].attributes, vec!["default"]);
    assert_eq!(functions[0].instructions.len(), 3);
    assert_eq!(functions[1].name, "helper");
    assert_eq!(functions[1].attributes, vec!["inline", "always_inline"]);
}
