use crate::quadruple::{Op, Quadruple};
use crate::template::{expand_asm_template, expand_asm_templates};

fn asm_block(raw: &[&str], inputs: &[&str], outputs: &[&str]) -> Quadruple {
    let mut asm = Quadruple::new(Op::Asm { volatile: false });
    asm.raw_instructions = raw.iter().map(|s| s.to_string()).collect();
    asm.input_vars = inputs.iter().map(|s| s.to_string()).collect();
    asm.output_vars = outputs.iter().map(|s| s.to_string()).collect();
    asm
}

#[test]
fn outputs_come_before_inputs_in_numbering() {
    let asm = asm_block(&["sensor %0 %1 @copper"], &["conveyor1"], &["___vtmp_1@f"]);
    assert_eq!(
        expand_asm_template(&asm, 0),
        vec!["sensor ___vtmp_1@f conveyor1 @copper"]
    );
}

#[test]
fn unique_number_and_literal_percent() {
    let asm = asm_block(&["jump block%=_end%% always 0 0"], &[], &[]);
    assert_eq!(
        expand_asm_template(&asm, 7),
        vec!["jump block7_end% always 0 0"]
    );
}

#[test]
fn out_of_range_operands_are_left_alone() {
    let asm = asm_block(&["print %3"], &["a"], &[]);
    assert_eq!(expand_asm_template(&asm, 0), vec!["print %3"]);
}

#[test]
fn blocks_are_numbered_in_source_order() {
    let mut ir_list = vec![
        asm_block(&["print %="], &[], &[]),
        Quadruple::i1o1(Op::Set(crate::quadruple::VarType::I32), "1", "x"),
        asm_block(&["print %="], &[], &[]),
    ];
    expand_asm_templates(&mut ir_list);
    assert_eq!(ir_list[0].raw_instructions, vec!["print 0"]);
    assert_eq!(ir_list[2].raw_instructions, vec!["print 1"]);
}
