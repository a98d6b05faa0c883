//! A small mlog emulator.
//!
//! Covers the instruction subset the compiler emits (`set`, `op`, `jump`,
//! `print`, `sensor`) plus label pseudo-lines for `keep-labels` output.
//! Values are doubles, strings, host objects or null; `@counter` reads as
//! the next instruction index and jumping it to null halts the program,
//! which is how compiled programs terminate.

use std::collections::HashMap;
use std::str::FromStr;

use log::warn;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ExitCode {
    /// Normal termination: the program ran off its end or jumped to null.
    Halted,
    /// The step limit was exhausted before the program stopped.
    StepLimit,
    /// A jump targeted an instruction outside the program.
    BadJump,
    /// Nothing was loaded.
    EmptyProgram,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Num(f64),
    Str(String),
    Obj(usize),
    Null,
}

#[derive(Clone, Debug, PartialEq)]
enum Operand {
    Num(f64),
    Str(String),
    Name(String),
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum MlogOp {
    Add,
    Sub,
    Mul,
    Div,
    Idiv,
    Mod,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Equal,
    NotEqual,
    LessThan,
    LessThanEq,
    GreaterThan,
    GreaterThanEq,
    Floor,
    Ceil,
}

impl FromStr for MlogOp {
    type Err = ();

    fn from_str(s: &str) -> Result<MlogOp, ()> {
        Ok(match s {
            "add" => MlogOp::Add,
            "sub" => MlogOp::Sub,
            "mul" => MlogOp::Mul,
            "div" => MlogOp::Div,
            "idiv" => MlogOp::Idiv,
            "mod" => MlogOp::Mod,
            "and" => MlogOp::And,
            "or" => MlogOp::Or,
            "xor" => MlogOp::Xor,
            "shl" => MlogOp::Shl,
            "shr" => MlogOp::Shr,
            "equal" => MlogOp::Equal,
            "notEqual" => MlogOp::NotEqual,
            "lessThan" => MlogOp::LessThan,
            "lessThanEq" => MlogOp::LessThanEq,
            "greaterThan" => MlogOp::GreaterThan,
            "greaterThanEq" => MlogOp::GreaterThanEq,
            "floor" => MlogOp::Floor,
            "ceil" => MlogOp::Ceil,
            _ => return Err(()),
        })
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Condition {
    Always,
    Equal,
    NotEqual,
    LessThan,
    LessThanEq,
    GreaterThan,
    GreaterThanEq,
}

impl FromStr for Condition {
    type Err = ();

    fn from_str(s: &str) -> Result<Condition, ()> {
        Ok(match s {
            "always" => Condition::Always,
            "equal" => Condition::Equal,
            "notEqual" => Condition::NotEqual,
            "lessThan" => Condition::LessThan,
            "lessThanEq" => Condition::LessThanEq,
            "greaterThan" => Condition::GreaterThan,
            "greaterThanEq" => Condition::GreaterThanEq,
            _ => return Err(()),
        })
    }
}

#[derive(Clone, Debug)]
enum Inst {
    Set {
        dest: String,
        src: Operand,
    },
    Op {
        op: MlogOp,
        dest: String,
        a: Operand,
        b: Operand,
    },
    Jump {
        target: usize,
        condition: Condition,
        a: Operand,
        b: Operand,
    },
    Print(Operand),
    Sensor {
        dest: String,
        object: Operand,
        property: String,
    },
    /// Anything the runner does not model.
    Noop,
}

enum TickResult {
    Next,
    Jump(usize),
    Stop(ExitCode),
}

#[derive(Clone, Debug, PartialEq)]
pub struct AssembleError {
    pub line: usize,
    pub reason: String,
}

impl std::fmt::Display for AssembleError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "line {}: {}", self.line, self.reason)
    }
}

impl std::error::Error for AssembleError {}

pub struct Processor {
    instructions: Vec<Inst>,
    variables: HashMap<String, Value>,
    objects: Vec<HashMap<String, f64>>,
    printed: String,
    program_counter: usize,
}

impl Default for Processor {
    fn default() -> Processor {
        Processor::new()
    }
}

impl Processor {
    pub fn new() -> Processor {
        let mut variables = HashMap::new();
        variables.insert("false".to_string(), Value::Num(0.0));
        variables.insert("true".to_string(), Value::Num(1.0));
        variables.insert("null".to_string(), Value::Null);
        Processor {
            instructions: Vec::new(),
            variables,
            objects: Vec::new(),
            printed: String::new(),
            program_counter: 0,
        }
    }

    /// Register a host object under a variable name; `sensor` reads its
    /// properties (keys without the leading `@`).
    pub fn define_object(&mut self, name: &str, properties: &[(&str, f64)]) {
        let index = self.objects.len();
        self.objects.push(
            properties
                .iter()
                .map(|(key, value)| (key.to_string(), *value))
                .collect(),
        );
        self.variables
            .insert(name.to_string(), Value::Obj(index));
    }

    /// Load an mlog program. Label pseudo-lines (`name:`) are resolved to
    /// instruction indexes so `keep-labels` output runs as well.
    pub fn assemble_code(&mut self, source: &str) -> Result<(), AssembleError> {
        let mut labels: HashMap<String, usize> = HashMap::new();
        let mut kept: Vec<(usize, &str)> = Vec::new();
        for (line_no, raw_line) in source.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() {
                continue;
            }
            if line.ends_with(':') && line.split_whitespace().count() == 1 {
                labels.insert(line[..line.len() - 1].to_string(), kept.len());
                continue;
            }
            kept.push((line_no + 1, line));
        }

        let mut instructions = Vec::with_capacity(kept.len());
        for (line_no, line) in kept {
            instructions.push(parse_instruction(line, line_no, &labels)?);
        }
        self.instructions = instructions;
        self.program_counter = 0;
        Ok(())
    }

    pub fn run_with_limit(&mut self, limit: u64) -> ExitCode {
        if self.instructions.is_empty() {
            return ExitCode::EmptyProgram;
        }
        let mut steps = 0u64;
        while steps < limit {
            if self.program_counter >= self.instructions.len() {
                return ExitCode::Halted;
            }
            match self.tick() {
                TickResult::Next => self.program_counter += 1,
                TickResult::Jump(target) => {
                    if target > self.instructions.len() {
                        return ExitCode::BadJump;
                    }
                    self.program_counter = target;
                }
                TickResult::Stop(code) => return code,
            }
            steps += 1;
        }
        ExitCode::StepLimit
    }

    pub fn get_variable(&self, name: &str) -> Option<f64> {
        match self.variables.get(name) {
            Some(Value::Num(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn value(&self, name: &str) -> Value {
        self.variables.get(name).cloned().unwrap_or(Value::Null)
    }

    /// Everything written by `print` so far.
    pub fn output(&self) -> &str {
        &self.printed
    }

    fn read(&self, operand: &Operand) -> Value {
        match operand {
            Operand::Num(value) => Value::Num(*value),
            Operand::Str(text) => Value::Str(text.clone()),
            Operand::Name(name) => {
                if name == "@counter" {
                    return Value::Num((self.program_counter + 1) as f64);
                }
                self.variables.get(name).cloned().unwrap_or(Value::Null)
            }
        }
    }

    fn read_num(&self, operand: &Operand) -> f64 {
        match self.read(operand) {
            Value::Num(value) => value,
            _ => 0.0,
        }
    }

    fn tick(&mut self) -> TickResult {
        let inst = self.instructions[self.program_counter].clone();
        match inst {
            Inst::Noop => TickResult::Next,
            Inst::Set { dest, src } => {
                let value = self.read(&src);
                if dest == "@counter" {
                    return match value {
                        Value::Num(target) => TickResult::Jump(target as usize),
                        _ => TickResult::Stop(ExitCode::Halted),
                    };
                }
                self.variables.insert(dest, value);
                TickResult::Next
            }
            Inst::Op { op, dest, a, b } => {
                let result = evaluate(op, self.read_num(&a), self.read_num(&b));
                if dest == "@counter" {
                    return TickResult::Jump(result as usize);
                }
                self.variables.insert(dest, Value::Num(result));
                TickResult::Next
            }
            Inst::Jump {
                target,
                condition,
                a,
                b,
            } => {
                let taken = match condition {
                    Condition::Always => true,
                    Condition::Equal => self.read_num(&a) == self.read_num(&b),
                    Condition::NotEqual => self.read_num(&a) != self.read_num(&b),
                    Condition::LessThan => self.read_num(&a) < self.read_num(&b),
                    Condition::LessThanEq => self.read_num(&a) <= self.read_num(&b),
                    Condition::GreaterThan => self.read_num(&a) > self.read_num(&b),
                    Condition::GreaterThanEq => self.read_num(&a) >= self.read_num(&b),
                };
                if taken {
                    TickResult::Jump(target)
                } else {
                    TickResult::Next
                }
            }
            Inst::Print(operand) => {
                let text = match self.read(&operand) {
                    Value::Num(value) => format_number(value),
                    Value::Str(text) => text,
                    Value::Obj(_) => "[object]".to_string(),
                    Value::Null => "null".to_string(),
                };
                self.printed.push_str(&text);
                TickResult::Next
            }
            Inst::Sensor {
                dest,
                object,
                property,
            } => {
                let value = match self.read(&object) {
                    Value::Obj(index) => self
                        .objects
                        .get(index)
                        .and_then(|props| props.get(property.trim_start_matches('@')))
                        .map(|v| Value::Num(*v))
                        .unwrap_or(Value::Null),
                    _ => Value::Null,
                };
                self.variables.insert(dest, value);
                TickResult::Next
            }
        }
    }
}

fn format_number(value: f64) -> String {
    if value.is_finite() && value == value.trunc() {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

fn evaluate(op: MlogOp, a: f64, b: f64) -> f64 {
    match op {
        MlogOp::Add => a + b,
        MlogOp::Sub => a - b,
        MlogOp::Mul => a * b,
        MlogOp::Div => a / b,
        // Integer division truncates toward zero on this runtime.
        MlogOp::Idiv => (a / b).trunc(),
        MlogOp::Mod => a % b,
        MlogOp::And => ((a as i64) & (b as i64)) as f64,
        MlogOp::Or => ((a as i64) | (b as i64)) as f64,
        MlogOp::Xor => ((a as i64) ^ (b as i64)) as f64,
        MlogOp::Shl => ((a as i64) << (b as i64)) as f64,
        MlogOp::Shr => ((a as i64) >> (b as i64)) as f64,
        MlogOp::Equal => bool_to_num(a == b),
        MlogOp::NotEqual => bool_to_num(a != b),
        MlogOp::LessThan => bool_to_num(a < b),
        MlogOp::LessThanEq => bool_to_num(a <= b),
        MlogOp::GreaterThan => bool_to_num(a > b),
        MlogOp::GreaterThanEq => bool_to_num(a >= b),
        MlogOp::Floor => a.floor(),
        MlogOp::Ceil => a.ceil(),
    }
}

fn bool_to_num(value: bool) -> f64 {
    if value {
        1.0
    } else {
        0.0
    }
}

fn parse_operand(token: &str) -> Operand {
    if token.starts_with('"') {
        return Operand::Str(token.trim_matches('"').to_string());
    }
    if let Ok(value) = token.parse::<f64>() {
        return Operand::Num(value);
    }
    if let Some(hex) = token.strip_prefix("0x").or_else(|| token.strip_prefix("0X")) {
        if let Ok(value) = i64::from_str_radix(hex, 16) {
            return Operand::Num(value as f64);
        }
    }
    Operand::Name(token.to_string())
}

fn parse_instruction(
    line: &str,
    line_no: usize,
    labels: &HashMap<String, usize>,
) -> Result<Inst, AssembleError> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let error = |reason: &str| AssembleError {
        line: line_no,
        reason: reason.to_string(),
    };
    match tokens[0] {
        "set" => {
            if tokens.len() < 3 {
                return Err(error("set needs a destination and a value"));
            }
            // The value may be a quoted string with spaces.
            let rest = line.splitn(3, char::is_whitespace).nth(2).unwrap_or("");
            Ok(Inst::Set {
                dest: tokens[1].to_string(),
                src: parse_operand(rest.trim()),
            })
        }
        "op" => {
            if tokens.len() < 5 {
                return Err(error("op needs an operation, a destination and two operands"));
            }
            let op = tokens[1]
                .parse::<MlogOp>()
                .map_err(|_| error("unknown op"))?;
            Ok(Inst::Op {
                op,
                dest: tokens[2].to_string(),
                a: parse_operand(tokens[3]),
                b: parse_operand(tokens[4]),
            })
        }
        "jump" => {
            if tokens.len() < 5 {
                return Err(error("jump needs a target, a condition and two operands"));
            }
            let target = match tokens[1].parse::<usize>() {
                Ok(index) => index,
                Err(_) => *labels
                    .get(tokens[1])
                    .ok_or_else(|| error("jump to unknown label"))?,
            };
            let condition = tokens[2]
                .parse::<Condition>()
                .map_err(|_| error("unknown jump condition"))?;
            Ok(Inst::Jump {
                target,
                condition,
                a: parse_operand(tokens[3]),
                b: parse_operand(tokens[4]),
            })
        }
        "print" => {
            let rest = line.splitn(2, char::is_whitespace).nth(1).unwrap_or("");
            Ok(Inst::Print(parse_operand(rest.trim())))
        }
        "sensor" => {
            if tokens.len() < 4 {
                return Err(error("sensor needs a destination, an object and a property"));
            }
            Ok(Inst::Sensor {
                dest: tokens[1].to_string(),
                object: parse_operand(tokens[2]),
                property: tokens[3].to_string(),
            })
        }
        other => {
            warn!("unsupported mlog instruction treated as no-op: {}", other);
            Ok(Inst::Noop)
        }
    }
}
