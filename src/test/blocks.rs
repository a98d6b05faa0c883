use crate::block::get_basic_blocks;
use crate::test::parse_ir;

#[test]
fn if_else_shape() {
    let ir = parse_ir(
        "__funcbegin main default\n\
         decl_i32 result@main\n\
         ifnot _x@main ne_i32 false goto ELSE\n\
         :THEN\n\
         set_i32 1 result@main\n\
         goto END\n\
         :ELSE\n\
         set_i32 2 result@main\n\
         :END\n\
         __return main\n\
         __funcend main",
    );
    let blocks = get_basic_blocks(ir);
    assert_eq!(blocks.len(), 5);

    // Entry block ends at the conditional branch, targeting the else block.
    assert_eq!(blocks[0].instructions.len(), 3);
    assert_eq!(blocks[0].jump_destination, Some(2));
    assert!(blocks[0].will_continue);

    // Then block ends with goto END and cannot fall through.
    assert_eq!(blocks[1].jump_destination, Some(3));
    assert!(!blocks[1].will_continue);

    // Else block has no tail jump.
    assert_eq!(blocks[2].jump_destination, None);
    assert!(blocks[2].will_continue);

    // __return ends a block but is still considered fall-through.
    assert_eq!(blocks[3].jump_destination, None);
    assert!(blocks[3].will_continue);

    assert!(!blocks[4].will_continue);
}

#[test]
fn consecutive_labels_coalesce() {
    let ir = parse_ir("goto A\n:A\n:B\nset_i32 1 x");
    let blocks = get_basic_blocks(ir);
    assert_eq!(blocks.len(), 2);
    // Both labels head the same block, and the goto resolves to it.
    assert_eq!(blocks[1].instructions.len(), 3);
    assert_eq!(blocks[0].jump_destination, Some(1));
}

#[test]
fn asm_ends_a_block() {
    let ir = parse_ir(
        "set_i32 1 x\n\
         __asmvbegin 1 x\n\
         print x\n\
         __asmvend 0\n\
         set_i32 2 y",
    );
    let blocks = get_basic_blocks(ir);
    assert_eq!(blocks.len(), 2);
    assert_eq!(blocks[0].instructions.len(), 2);
    assert!(blocks[0].will_continue);
}

#[test]
fn call_ends_a_block() {
    let ir = parse_ir("set_i32 1 _x@f\n__call f\ndecl_i32 result@f");
    let blocks = get_basic_blocks(ir);
    assert_eq!(blocks.len(), 2);
    assert_eq!(blocks[0].jump_destination, None);
}
