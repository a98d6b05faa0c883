//! Reparser for the textual IR dump produced by [`Quadruple::dump`].

use log::warn;

use crate::function::Function;
use crate::quadruple::{Arity, Op, Quadruple};

/// Parses the IR dump format back into quadruples. Asm blocks span several
/// lines, so the parser is stateful across lines.
pub struct TextQuadrupleParser {
    inside_asm_block: bool,
    current_asm: Quadruple,
}

impl Default for TextQuadrupleParser {
    fn default() -> TextQuadrupleParser {
        TextQuadrupleParser::new()
    }
}

impl TextQuadrupleParser {
    pub fn new() -> TextQuadrupleParser {
        TextQuadrupleParser {
            inside_asm_block: false,
            current_asm: Quadruple::new(Op::Asm { volatile: false }),
        }
    }

    pub fn parse<'a, I>(&mut self, lines: I) -> Vec<Quadruple>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut results = Vec::new();
        for line in lines {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            if tokens.is_empty() {
                continue;
            }
            let inst = tokens[0];

            if self.inside_asm_block && inst != "__asmend" && inst != "__asmvend" {
                self.current_asm.raw_instructions.push(line.trim().to_string());
                continue;
            }
            if (inst == "__asmbegin" || inst == "__asmvbegin") && !self.inside_asm_block {
                self.inside_asm_block = true;
                self.current_asm = Quadruple::new(Op::Asm {
                    volatile: inst == "__asmvbegin",
                });
                let start = tokens.len().min(2);
                self.current_asm.input_vars =
                    tokens[start..].iter().map(|s| s.to_string()).collect();
                continue;
            }
            if inst == "__asmend" || inst == "__asmvend" {
                self.inside_asm_block = false;
                let start = tokens.len().min(2);
                self.current_asm.output_vars =
                    tokens[start..].iter().map(|s| s.to_string()).collect();
                results.push(std::mem::replace(
                    &mut self.current_asm,
                    Quadruple::new(Op::Asm { volatile: false }),
                ));
                continue;
            }

            if let Some(label) = inst.strip_prefix(':') {
                results.push(Quadruple::i1(Op::Label, label));
                continue;
            }

            let op: Op = match inst.parse() {
                Ok(op) => op,
                Err(_) => {
                    warn!("skipping unrecognized IR line: {}", line.trim());
                    continue;
                }
            };
            let parsed = match op.arity() {
                Arity::NoArg => Some(Quadruple::new(op)),
                Arity::O1 => tokens.get(1).map(|d| Quadruple::o1(op, *d)),
                Arity::I1 => tokens.get(1).map(|s| Quadruple::i1(op, *s)),
                Arity::I1O1 => match (tokens.get(1), tokens.get(2)) {
                    (Some(s), Some(d)) => Some(Quadruple::i1o1(op, *s, *d)),
                    _ => None,
                },
                Arity::I2O1 => match (tokens.get(1), tokens.get(2), tokens.get(3)) {
                    (Some(a), Some(b), Some(d)) => Some(Quadruple::i2o1(op, *a, *b, *d)),
                    _ => None,
                },
                Arity::Branch => parse_branch(op, &tokens),
                // A bare `asm` tag never appears outside an __asmbegin block.
                Arity::Asm => None,
            };
            match parsed {
                Some(q) => results.push(q),
                None => warn!("skipping malformed IR line: {}", line.trim()),
            }
        }
        results
    }
}

// Branches come in two shapes:
//   if x relop y goto L     (6 tokens)
//   if x goto L             (4 tokens, no comparison attached)
fn parse_branch(op: Op, tokens: &[&str]) -> Option<Quadruple> {
    if tokens.len() == 6 {
        let relop = match tokens[2].parse::<Op>() {
            Ok(Op::Bin(bin, num)) if bin.is_comparison() => (bin, num),
            _ => return None,
        };
        return Some(Quadruple::branch(op, tokens[1], relop, tokens[3], tokens[5]));
    }
    if tokens.len() == 4 {
        let mut q = Quadruple::i1(op, tokens[1]);
        q.dest = tokens[3].to_string();
        return Some(q);
    }
    None
}

/// Split a flat instruction stream into global instructions and functions,
/// keyed by `__funcbegin`/`__funcend` markers. Attributes are recovered from
/// the `__funcbegin` dest field.
pub fn extract_functions_from_ir(ir_list: Vec<Quadruple>) -> (Vec<Quadruple>, Vec<Function>) {
    let mut init_irs = Vec::new();
    let mut functions: Vec<Function> = Vec::new();
    let mut current: Option<Function> = None;

    for ir in ir_list {
        match (&mut current, ir.op) {
            (None, Op::FuncBegin) => {
                let attributes = ir
                    .dest
                    .split(',')
                    .filter(|s| !s.is_empty())
                    .map(|s| s.to_string())
                    .collect();
                let mut function = Function::new(ir.src1.clone(), None, attributes);
                function.instructions.push(ir);
                current = Some(function);
            }
            (Some(function), op) => {
                function.instructions.push(ir);
                if op == Op::FuncEnd {
                    functions.push(current.take().unwrap());
                }
            }
            (None, _) => init_irs.push(ir),
        }
    }
    if let Some(unterminated) = current {
        warn!(
            "function `{}` has no __funcend, keeping it anyway",
            unterminated.name
        );
        functions.push(unterminated);
    }
    (init_irs, functions)
}
