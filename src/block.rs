//! Partitioning of an instruction stream into basic blocks.

use std::collections::HashMap;
use std::io::Write;

use crate::quadruple::{Op, Quadruple};

/// A maximal single-entry single-exit run of instructions.
#[derive(Clone, Debug)]
pub struct BasicBlock {
    pub id: usize,
    pub instructions: Vec<Quadruple>,
    /// Block the tail jump targets, if its label belongs to a known block.
    pub jump_destination: Option<usize>,
    /// Whether control can fall through past the last instruction.
    pub will_continue: bool,
}

fn extract_destination_label(ir: &Quadruple) -> Option<&str> {
    match ir.op {
        Op::Goto => Some(&ir.src1),
        Op::If | Op::IfNot => Some(&ir.dest),
        _ => None,
    }
}

/// Build the block graph of an instruction list. A block ends after any exit
/// instruction and begins at every entrance; consecutive labels coalesce into
/// one block.
pub fn get_basic_blocks(ir_list: Vec<Quadruple>) -> Vec<BasicBlock> {
    let mut blocks: Vec<BasicBlock> = Vec::new();
    let mut current: Vec<Quadruple> = Vec::new();

    fn submit(blocks: &mut Vec<BasicBlock>, current: &mut Vec<Quadruple>) {
        let id = blocks.len();
        blocks.push(BasicBlock {
            id,
            instructions: std::mem::replace(current, Vec::new()),
            jump_destination: None,
            will_continue: true,
        });
    }

    for ir in ir_list {
        if ir.op.is_block_entrance() {
            let coalesce = match current.last() {
                None => true,
                Some(last) => last.op.is_block_entrance(),
            };
            if !coalesce {
                submit(&mut blocks, &mut current);
            }
            current.push(ir);
            continue;
        }
        let exits = ir.op.is_block_exit();
        current.push(ir);
        if exits {
            submit(&mut blocks, &mut current);
        }
    }
    if !current.is_empty() {
        submit(&mut blocks, &mut current);
    }

    let mut label_owner: HashMap<String, usize> = HashMap::new();
    for block in &blocks {
        for ir in &block.instructions {
            if ir.op != Op::Label {
                break;
            }
            label_owner.insert(ir.src1.clone(), block.id);
        }
    }

    for block in &mut blocks {
        let tail = match block.instructions.last() {
            Some(tail) => tail,
            None => continue,
        };
        if !tail.op.continues() {
            block.will_continue = false;
        }
        if !tail.op.is_block_exit() {
            continue;
        }
        block.jump_destination = extract_destination_label(tail)
            .and_then(|label| label_owner.get(label))
            .cloned();
    }

    blocks
}

/// Dump a function's block graph, one block per paragraph.
pub fn dump_basic_blocks<W: Write>(out: &mut W, name: &str, blocks: &[BasicBlock]) {
    let _ = writeln!(out, "Function {}", name);
    for block in blocks {
        let destination = match block.jump_destination {
            Some(id) => id as i64,
            None => -1,
        };
        let _ = writeln!(
            out,
            "BLK {}, may jump to {}{}",
            block.id,
            destination,
            if block.will_continue { ", may continue" } else { "" }
        );
        for ir in &block.instructions {
            let _ = writeln!(out, "{}", ir.dump());
        }
        let _ = writeln!(out);
    }
    let _ = writeln!(out);
}
