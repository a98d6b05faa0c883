//! The mlog emitter: per-instruction templates plus label resolution.

use std::collections::HashMap;

use log::warn;

use crate::output::IrConverter;
use crate::quadruple::{BinaryOp, NumType, Op, Quadruple};

fn condition_name(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Eq => "equal",
        BinaryOp::Ne => "notEqual",
        BinaryOp::Lt => "lessThan",
        BinaryOp::LtEq => "lessThanEq",
        BinaryOp::Gt => "greaterThan",
        BinaryOp::GtEq => "greaterThanEq",
        _ => unreachable!("relop is always a comparison"),
    }
}

fn inverted(op: BinaryOp) -> BinaryOp {
    match op {
        BinaryOp::Eq => BinaryOp::Ne,
        BinaryOp::Ne => BinaryOp::Eq,
        BinaryOp::Lt => BinaryOp::GtEq,
        BinaryOp::LtEq => BinaryOp::Gt,
        BinaryOp::Gt => BinaryOp::LtEq,
        BinaryOp::GtEq => BinaryOp::Lt,
        _ => unreachable!("relop is always a comparison"),
    }
}

fn binary_op_name(op: BinaryOp, num: NumType) -> &'static str {
    match op {
        BinaryOp::Add => "add",
        BinaryOp::Sub => "sub",
        BinaryOp::Mul => "mul",
        BinaryOp::Div => match num {
            NumType::I32 => "idiv",
            NumType::F64 => "div",
        },
        BinaryOp::Rem => "mod",
        BinaryOp::And => "and",
        BinaryOp::Or => "or",
        BinaryOp::Xor => "xor",
        BinaryOp::Lsh => "shl",
        BinaryOp::Rsh => "shr",
        BinaryOp::Lt => "lessThan",
        BinaryOp::Gt => "greaterThan",
        BinaryOp::LtEq => "lessThanEq",
        BinaryOp::GtEq => "greaterThanEq",
        BinaryOp::Eq => "equal",
        BinaryOp::Ne => "notEqual",
    }
}

/// Replace `L:` pseudo-lines with 0-based instruction indexes in every
/// `jump` line.
fn strip_labels(mlog_list: Vec<String>) -> Vec<String> {
    let mut labels: HashMap<String, usize> = HashMap::new();
    let mut results = Vec::with_capacity(mlog_list.len());
    let mut counter = 0usize;
    for inst in mlog_list {
        if inst.ends_with(':') {
            labels.insert(inst[..inst.len() - 1].to_string(), counter);
        } else if inst.split_whitespace().next().is_none() {
            // Blank line from an empty asm template, dropped.
        } else {
            counter += 1;
            results.push(inst);
        }
    }
    for line in results.iter_mut() {
        if !line.starts_with("jump ") {
            continue;
        }
        let mut tokens: Vec<String> = line.split_whitespace().map(|t| t.to_string()).collect();
        match labels.get(&tokens[1]) {
            Some(&index) => tokens[1] = index.to_string(),
            None => {
                warn!("jump to unknown label `{}` left unresolved", tokens[1]);
                continue;
            }
        }
        *line = tokens.join(" ");
    }
    results
}

pub struct IrToMlogConverter {
    strict_32bit: bool,
    keep_labels: bool,
}

impl IrToMlogConverter {
    pub fn new(strict_32bit: bool, keep_labels: bool) -> IrToMlogConverter {
        IrToMlogConverter {
            strict_32bit,
            keep_labels,
        }
    }

    fn convert_single_quadruple(&self, ir: &Quadruple) -> Vec<String> {
        let src1 = &ir.src1;
        let src2 = &ir.src2;
        let dest = &ir.dest;
        let mut result = match ir.op {
            Op::Asm { .. } => ir.raw_instructions.clone(),
            // Declarations need no code on mlog.
            Op::Decl(_) => Vec::new(),
            Op::Label | Op::FuncBegin => vec![format!("{}:", src1)],
            Op::Goto => vec![format!("jump {} always 0 0", src1)],
            Op::If | Op::IfNot => {
                let relop = match ir.relop {
                    Some((relop, _)) => relop,
                    // A branch without an attached comparison tests truthiness.
                    None => BinaryOp::Ne,
                };
                let relop = if ir.op == Op::IfNot {
                    inverted(relop)
                } else {
                    relop
                };
                let rhs = if src2.is_empty() { "false" } else { src2.as_str() };
                vec![format!(
                    "jump {} {} {} {}",
                    dest,
                    condition_name(relop),
                    src1,
                    rhs
                )]
            }
            Op::Call => vec![
                format!("op add retaddr@{} @counter 1", src1),
                format!("jump {} always 1 1", src1),
            ],
            Op::Return | Op::FuncEnd => vec![format!("set @counter retaddr@{}", src1)],
            Op::Noop => vec!["op xor __mlogev_nop __mlogev_nop 0".to_string()],
            Op::Set(_) => vec![format!("set {} {}", dest, src1)],
            // mlog numbers are doubles already, widening is a plain copy.
            Op::CvtI32F64 => vec![format!("set {} {}", dest, src1)],
            Op::CvtF64I32 => vec![format!("op floor {} {} 0", dest, src1)],
            Op::Minus(_) => vec![format!("op sub {} 0 {}", dest, src1)],
            Op::Not => vec![format!("op xor {} {} 0xFFFFFFFF", dest, src1)],
            Op::Bin(op, num) => vec![format!(
                "op {} {} {} {}",
                binary_op_name(op, num),
                dest,
                src1,
                src2
            )],
        };
        if self.strict_32bit {
            let clamps = match ir.op {
                Op::Bin(_, _) | Op::Minus(_) | Op::Not | Op::CvtF64I32 | Op::CvtI32F64 => true,
                _ => false,
            };
            if clamps {
                result.push(format!("op and {} {} 4294967295", dest, dest));
            }
        }
        result
    }
}

impl IrConverter for IrToMlogConverter {
    fn convert(&self, ir_list: &[Quadruple]) -> String {
        let mut results = Vec::new();
        for quadruple in ir_list {
            results.extend(self.convert_single_quadruple(quadruple));
        }
        if !self.keep_labels {
            results = strip_labels(results);
        }
        results.join("\n")
    }
}
