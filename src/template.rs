//! Inline-assembly template expansion.
//!
//! `%N` indexes the concatenation of outputs and inputs, `%=` is a number
//! unique to the asm block within the whole program, `%%` is a literal `%`.
//! Expansion runs after all optimization passes so renamed variables are
//! substituted under their final names.

use lazy_static::lazy_static;
use log::warn;
use regex::{Captures, Regex};

use crate::quadruple::{Op, Quadruple};

lazy_static! {
    static ref TEMPLATE_PATTERN: Regex = Regex::new(r"%([\w\d]+|%|=)").unwrap();
}

pub fn expand_asm_template(asm_inst: &Quadruple, unique_number: usize) -> Vec<String> {
    let variables: Vec<&String> = asm_inst
        .output_vars
        .iter()
        .chain(asm_inst.input_vars.iter())
        .collect();
    asm_inst
        .raw_instructions
        .iter()
        .map(|line| {
            TEMPLATE_PATTERN
                .replace_all(line, |caps: &Captures| {
                    let token = &caps[1];
                    if token == "=" {
                        return unique_number.to_string();
                    }
                    if token == "%" {
                        return "%".to_string();
                    }
                    match token.parse::<usize>() {
                        Ok(index) if index < variables.len() => variables[index].clone(),
                        _ => {
                            warn!("unresolvable asm template operand %{}", token);
                            caps[0].to_string()
                        }
                    }
                })
                .into_owned()
        })
        .collect()
}

/// Expand every asm block in the stream, numbering blocks in source order.
pub fn expand_asm_templates(ir_list: &mut [Quadruple]) {
    let mut asm_blocks = 0usize;
    for ir in ir_list.iter_mut() {
        if let Op::Asm { .. } = ir.op {
            let expanded = expand_asm_template(ir, asm_blocks);
            ir.raw_instructions = expanded;
            asm_blocks += 1;
        }
    }
}
