use crate::output::ir::IrDumper;
use crate::output::mlog::IrToMlogConverter;
use crate::output::IrConverter;
use crate::test::parse_ir;

fn to_mlog(source: &str) -> Vec<String> {
    let converter = IrToMlogConverter::new(false, true);
    convert_lines(&converter, source)
}

fn convert_lines(converter: &dyn IrConverter, source: &str) -> Vec<String> {
    converter
        .convert(&parse_ir(source))
        .lines()
        .map(|l| l.to_string())
        .collect()
}

#[test]
fn arithmetic_templates() {
    assert_eq!(to_mlog("add_i32 a b c"), vec!["op add c a b"]);
    assert_eq!(to_mlog("sub_f64 a b c"), vec!["op sub c a b"]);
    assert_eq!(to_mlog("mul_i32 a b c"), vec!["op mul c a b"]);
    assert_eq!(to_mlog("div_f64 a b c"), vec!["op div c a b"]);
    assert_eq!(to_mlog("div_i32 a b c"), vec!["op idiv c a b"]);
    assert_eq!(to_mlog("rem_i32 a b c"), vec!["op mod c a b"]);
    assert_eq!(to_mlog("lsh_i32 a b c"), vec!["op shl c a b"]);
    assert_eq!(to_mlog("rsh_i32 a b c"), vec!["op shr c a b"]);
}

#[test]
fn comparison_templates() {
    assert_eq!(to_mlog("lt_i32 a b c"), vec!["op lessThan c a b"]);
    assert_eq!(to_mlog("gteq_f64 a b c"), vec!["op greaterThanEq c a b"]);
    assert_eq!(to_mlog("eq_i32 a b c"), vec!["op equal c a b"]);
    assert_eq!(to_mlog("ne_i32 a b c"), vec!["op notEqual c a b"]);
}

#[test]
fn unary_and_conversion_templates() {
    assert_eq!(to_mlog("minus_f64 x y"), vec!["op sub y 0 x"]);
    assert_eq!(to_mlog("not_i32 x y"), vec!["op xor y x 0xFFFFFFFF"]);
    assert_eq!(to_mlog("cvtf64_i32 x y"), vec!["op floor y x 0"]);
    assert_eq!(to_mlog("cvti32_f64 x y"), vec!["set y x"]);
    assert_eq!(to_mlog("set_obj \"hello\" msg"), vec!["set msg \"hello\""]);
}

#[test]
fn declarations_emit_nothing() {
    assert_eq!(to_mlog("decl_i32 x"), Vec::<String>::new());
}

#[test]
fn branch_templates_invert_for_ifnot() {
    assert_eq!(
        to_mlog("if a lt_i32 b goto L"),
        vec!["jump L lessThan a b"]
    );
    assert_eq!(
        to_mlog("ifnot a lt_i32 b goto L"),
        vec!["jump L greaterThanEq a b"]
    );
    assert_eq!(
        to_mlog("ifnot cond ne_i32 false goto L"),
        vec!["jump L equal cond false"]
    );
    // A branch with no attached comparison tests truthiness.
    assert_eq!(to_mlog("if cond goto L"), vec!["jump L notEqual cond false"]);
}

#[test]
fn call_and_return_templates() {
    assert_eq!(
        to_mlog("__call f"),
        vec!["op add retaddr@f @counter 1", "jump f always 1 1"]
    );
    assert_eq!(to_mlog("__return f"), vec!["set @counter retaddr@f"]);
    assert_eq!(to_mlog("__funcend f"), vec!["set @counter retaddr@f"]);
    assert_eq!(to_mlog("goto L"), vec!["jump L always 0 0"]);
}

#[test]
fn labels_resolve_to_instruction_indexes() {
    let converter = IrToMlogConverter::new(false, false);
    let lines = convert_lines(
        &converter,
        "goto SKIP\n\
         set_i32 1 a\n\
         :SKIP\n\
         set_i32 2 b\n\
         __funcbegin f default\n\
         set_i32 3 c\n\
         goto SKIP",
    );
    assert_eq!(
        lines,
        vec![
            "jump 2 always 0 0",
            "set a 1",
            "set b 2",
            "set c 3",
            "jump 2 always 0 0",
        ]
    );
    // Every jump target is numeric and no label pseudo-line survives.
    for line in &lines {
        assert!(!line.ends_with(':'));
        if line.starts_with("jump ") {
            let target = line.split_whitespace().nth(1).unwrap();
            assert!(target.parse::<usize>().is_ok(), "unresolved {}", line);
        }
    }
}

#[test]
fn strict_32bit_clamps_arithmetic_but_not_copies() {
    let converter = IrToMlogConverter::new(true, true);
    assert_eq!(
        convert_lines(&converter, "add_i32 a b c"),
        vec!["op add c a b", "op and c c 4294967295"]
    );
    assert_eq!(
        convert_lines(&converter, "lt_i32 a b c"),
        vec!["op lessThan c a b", "op and c c 4294967295"]
    );
    assert_eq!(convert_lines(&converter, "set_i32 a c"), vec!["set c a"]);
}

#[test]
fn asm_blocks_pass_raw_lines_through() {
    let lines = to_mlog("__asmbegin 1 obj\nsensor t obj @health\n__asmend 1 t");
    assert_eq!(lines, vec!["sensor t obj @health"]);
}

#[test]
fn ir_dump_round_trips() {
    let source = "decl_i32 g\n\
                  set_i32 0 g\n\
                  __funcbegin main default\n\
                  add_i32 g 1 g\n\
                  if g lt_i32 10 goto END\n\
                  :END\n\
                  __return main\n\
                  __funcend main";
    let first = IrDumper.convert(&parse_ir(source));
    let second = IrDumper.convert(&parse_ir(&first));
    assert_eq!(first, second);
    assert_eq!(first, source);
}
