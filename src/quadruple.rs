use std::fmt;
use std::str::FromStr;

use lazy_static::lazy_static;
use regex::Regex;

/// Scalar type suffix carried by typed IR tags.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum VarType {
    I32,
    F64,
    Obj,
}

impl VarType {
    pub fn suffix(self) -> &'static str {
        match self {
            VarType::I32 => "i32",
            VarType::F64 => "f64",
            VarType::Obj => "obj",
        }
    }

    fn from_suffix(s: &str) -> Option<VarType> {
        match s {
            "i32" => Some(VarType::I32),
            "f64" => Some(VarType::F64),
            "obj" => Some(VarType::Obj),
            _ => None,
        }
    }
}

/// The arithmetic subset of [`VarType`]: object values take part in no
/// arithmetic instruction.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum NumType {
    I32,
    F64,
}

impl NumType {
    pub fn suffix(self) -> &'static str {
        match self {
            NumType::I32 => "i32",
            NumType::F64 => "f64",
        }
    }

    pub fn var_type(self) -> VarType {
        match self {
            NumType::I32 => VarType::I32,
            NumType::F64 => VarType::F64,
        }
    }

    fn from_suffix(s: &str) -> Option<NumType> {
        match s {
            "i32" => Some(NumType::I32),
            "f64" => Some(NumType::F64),
            _ => None,
        }
    }
}

/// Two-operand instruction cores. Comparisons are part of this set; the
/// bitwise, shift and remainder members only exist with an `i32` suffix.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    Lsh,
    Rsh,
    Lt,
    Gt,
    LtEq,
    GtEq,
    Eq,
    Ne,
}

impl BinaryOp {
    pub fn core_name(self) -> &'static str {
        match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::Div => "div",
            BinaryOp::Rem => "rem",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
            BinaryOp::Xor => "xor",
            BinaryOp::Lsh => "lsh",
            BinaryOp::Rsh => "rsh",
            BinaryOp::Lt => "lt",
            BinaryOp::Gt => "gt",
            BinaryOp::LtEq => "lteq",
            BinaryOp::GtEq => "gteq",
            BinaryOp::Eq => "eq",
            BinaryOp::Ne => "ne",
        }
    }

    fn from_core_name(s: &str) -> Option<BinaryOp> {
        Some(match s {
            "add" => BinaryOp::Add,
            "sub" => BinaryOp::Sub,
            "mul" => BinaryOp::Mul,
            "div" => BinaryOp::Div,
            "rem" => BinaryOp::Rem,
            "and" => BinaryOp::And,
            "or" => BinaryOp::Or,
            "xor" => BinaryOp::Xor,
            "lsh" => BinaryOp::Lsh,
            "rsh" => BinaryOp::Rsh,
            "lt" => BinaryOp::Lt,
            "gt" => BinaryOp::Gt,
            "lteq" => BinaryOp::LtEq,
            "gteq" => BinaryOp::GtEq,
            "eq" => BinaryOp::Eq,
            "ne" => BinaryOp::Ne,
            _ => return None,
        })
    }

    pub fn is_comparison(self) -> bool {
        match self {
            BinaryOp::Lt
            | BinaryOp::Gt
            | BinaryOp::LtEq
            | BinaryOp::GtEq
            | BinaryOp::Eq
            | BinaryOp::Ne => true,
            _ => false,
        }
    }

    pub fn i32_only(self) -> bool {
        match self {
            BinaryOp::Rem
            | BinaryOp::And
            | BinaryOp::Or
            | BinaryOp::Xor
            | BinaryOp::Lsh
            | BinaryOp::Rsh => true,
            _ => false,
        }
    }
}

/// Comparison tag attached to `if`/`ifnot` quadruples, e.g. `lt_i32`.
pub type Relop = (BinaryOp, NumType);

pub fn relop_tag(relop: Relop) -> String {
    format!("{}_{}", relop.0.core_name(), relop.1.suffix())
}

/// Operand shapes of the quadruple instruction set.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Arity {
    /// No operands at all (`noop`).
    NoArg,
    /// One input in `src1`, no destination (`goto`, `label`, `__funcend`,
    /// `__call`, `__return`).
    I1,
    /// A destination only (`decl_*`).
    O1,
    /// One input, one destination (`set_*`, `minus_*`, `not_i32`, `cvt*`,
    /// `__funcbegin` whose dest carries the attribute list).
    I1O1,
    /// Two inputs, one destination (arithmetic and comparisons).
    I2O1,
    /// `src1 relop src2 -> goto dest` (`if`, `ifnot`).
    Branch,
    /// Inline assembly block (`asm`, `asm_volatile`).
    Asm,
}

/// The closed IR instruction set.
///
/// | Tag | Arity | Meaning |
/// |-----|-------|---------|
/// | `noop` | NoArg | no effect |
/// | `goto L` | I1 | unconditional jump |
/// | `label L` | I1 | jump target |
/// | `__funcbegin F attrs` | I1O1 | function entry, dest = comma-joined attributes |
/// | `__funcend F` | I1 | function exit |
/// | `__call F` | I1 | call `F` |
/// | `__return F` | I1 | return from `F` |
/// | `decl_{i32,f64,obj} v` | O1 | declaration |
/// | `set_{i32,f64,obj} s d` | I1O1 | copy |
/// | `minus_{i32,f64} s d` | I1O1 | arithmetic negation |
/// | `not_i32 s d` | I1O1 | bitwise complement |
/// | `cvtf64_i32 s d` | I1O1 | float to int (floor) |
/// | `cvti32_f64 s d` | I1O1 | int to float |
/// | `add/sub/mul/div/..._{i32,f64} a b d` | I2O1 | arithmetic / comparison |
/// | `rem/and/or/xor/lsh/rsh_i32 a b d` | I2O1 | i32-only arithmetic |
/// | `if a relop b goto L` | Branch | conditional jump |
/// | `ifnot a relop b goto L` | Branch | inverted conditional jump |
/// | `asm` / `asm_volatile` | Asm | raw target instructions with operand lists |
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Op {
    Noop,
    Goto,
    Label,
    FuncBegin,
    FuncEnd,
    Call,
    Return,
    Decl(VarType),
    Set(VarType),
    Minus(NumType),
    Not,
    CvtF64I32,
    CvtI32F64,
    Bin(BinaryOp, NumType),
    If,
    IfNot,
    Asm { volatile: bool },
}

impl Op {
    pub fn arity(self) -> Arity {
        match self {
            Op::Noop => Arity::NoArg,
            Op::Goto | Op::Label | Op::FuncEnd | Op::Call | Op::Return => Arity::I1,
            Op::Decl(_) => Arity::O1,
            Op::Set(_)
            | Op::Minus(_)
            | Op::Not
            | Op::CvtF64I32
            | Op::CvtI32F64
            | Op::FuncBegin => Arity::I1O1,
            Op::Bin(_, _) => Arity::I2O1,
            Op::If | Op::IfNot => Arity::Branch,
            Op::Asm { .. } => Arity::Asm,
        }
    }

    /// Type suffix of the tag, used to recover variable types by scanning
    /// destinations.
    pub fn var_type(self) -> Option<VarType> {
        match self {
            Op::Decl(t) | Op::Set(t) => Some(t),
            Op::Minus(t) | Op::Bin(_, t) => Some(t.var_type()),
            Op::Not | Op::CvtF64I32 => Some(VarType::I32),
            Op::CvtI32F64 => Some(VarType::F64),
            _ => None,
        }
    }

    pub fn is_comparison(self) -> bool {
        match self {
            Op::Bin(op, _) => op.is_comparison(),
            _ => false,
        }
    }

    pub fn is_decl(self) -> bool {
        match self {
            Op::Decl(_) => true,
            _ => false,
        }
    }

    /// Instructions that open a basic block.
    pub fn is_block_entrance(self) -> bool {
        match self {
            Op::FuncBegin | Op::Label => true,
            _ => false,
        }
    }

    /// Instructions after which a basic block ends. Inline assembly is an
    /// exit so a block never splits an asm sequence.
    pub fn is_block_exit(self) -> bool {
        match self {
            Op::Goto
            | Op::If
            | Op::IfNot
            | Op::Return
            | Op::Call
            | Op::FuncEnd
            | Op::Asm { .. } => true,
            _ => false,
        }
    }

    /// Whether control can fall through after this instruction.
    pub fn continues(self) -> bool {
        match self {
            Op::Goto | Op::FuncEnd => false,
            _ => true,
        }
    }

    /// Instructions whose string operands are labels or function names
    /// rather than variables.
    pub fn takes_variables(self) -> bool {
        match self {
            Op::Noop
            | Op::Goto
            | Op::Label
            | Op::FuncBegin
            | Op::FuncEnd
            | Op::Call
            | Op::Return
            | Op::Decl(_) => false,
            _ => true,
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Op::Noop => f.write_str("noop"),
            Op::Goto => f.write_str("goto"),
            Op::Label => f.write_str("label"),
            Op::FuncBegin => f.write_str("__funcbegin"),
            Op::FuncEnd => f.write_str("__funcend"),
            Op::Call => f.write_str("__call"),
            Op::Return => f.write_str("__return"),
            Op::Decl(t) => write!(f, "decl_{}", t.suffix()),
            Op::Set(t) => write!(f, "set_{}", t.suffix()),
            Op::Minus(t) => write!(f, "minus_{}", t.suffix()),
            Op::Not => f.write_str("not_i32"),
            Op::CvtF64I32 => f.write_str("cvtf64_i32"),
            Op::CvtI32F64 => f.write_str("cvti32_f64"),
            Op::Bin(op, t) => write!(f, "{}_{}", op.core_name(), t.suffix()),
            Op::If => f.write_str("if"),
            Op::IfNot => f.write_str("ifnot"),
            Op::Asm { volatile: false } => f.write_str("asm"),
            Op::Asm { volatile: true } => f.write_str("asm_volatile"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParseOpError {
    pub value: String,
}

impl fmt::Display for ParseOpError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "unknown IR tag `{}`", self.value)
    }
}

impl std::error::Error for ParseOpError {}

impl FromStr for Op {
    type Err = ParseOpError;

    fn from_str(s: &str) -> Result<Op, ParseOpError> {
        let simple = match s {
            "noop" => Some(Op::Noop),
            "goto" => Some(Op::Goto),
            "label" => Some(Op::Label),
            "__funcbegin" => Some(Op::FuncBegin),
            "__funcend" => Some(Op::FuncEnd),
            "__call" => Some(Op::Call),
            "__return" => Some(Op::Return),
            "if" => Some(Op::If),
            "ifnot" => Some(Op::IfNot),
            "asm" => Some(Op::Asm { volatile: false }),
            "asm_volatile" => Some(Op::Asm { volatile: true }),
            _ => None,
        };
        if let Some(op) = simple {
            return Ok(op);
        }
        let err = || ParseOpError {
            value: s.to_string(),
        };
        let split = s.rfind('_').ok_or_else(err)?;
        let (core, suffix) = (&s[..split], &s[split + 1..]);
        if let Some(t) = VarType::from_suffix(suffix) {
            match core {
                "decl" => return Ok(Op::Decl(t)),
                "set" => return Ok(Op::Set(t)),
                _ => {}
            }
        }
        let num = NumType::from_suffix(suffix).ok_or_else(err)?;
        match core {
            "minus" => return Ok(Op::Minus(num)),
            "not" if num == NumType::I32 => return Ok(Op::Not),
            "cvtf64" if num == NumType::I32 => return Ok(Op::CvtF64I32),
            "cvti32" if num == NumType::F64 => return Ok(Op::CvtI32F64),
            _ => {}
        }
        let bin = BinaryOp::from_core_name(core).ok_or_else(err)?;
        if bin.i32_only() && num != NumType::I32 {
            return Err(err());
        }
        Ok(Op::Bin(bin, num))
    }
}

/// Classification of a `src1`/`src2` operand token.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum OperandKind {
    Variable,
    ImmediateInt,
    ImmediateFloat,
    Invalid,
}

lazy_static! {
    // Hyphens are admitted so sensor names such as `@this-x` classify as
    // variables; parentheses and brackets occur in mlog builtin names.
    static ref VARIABLE_PATTERN: Regex = Regex::new(r"^[A-Za-z_@][-_@()\[\]\w]*$").unwrap();
}

/// Decide whether an operand token is a variable, an integer or float
/// immediate, or something else (string literals, empty operands).
pub fn classify_operand(token: &str) -> OperandKind {
    if token.is_empty() {
        return OperandKind::Invalid;
    }
    if VARIABLE_PATTERN.is_match(token) {
        return OperandKind::Variable;
    }
    if token.parse::<i64>().is_ok() {
        return OperandKind::ImmediateInt;
    }
    let unsigned = token.strip_prefix('-').unwrap_or(token);
    if let Some(hex) = unsigned
        .strip_prefix("0x")
        .or_else(|| unsigned.strip_prefix("0X"))
    {
        if i64::from_str_radix(hex, 16).is_ok() {
            return OperandKind::ImmediateInt;
        }
    }
    if token.parse::<f64>().is_ok() {
        return OperandKind::ImmediateFloat;
    }
    OperandKind::Invalid
}

/// One IR instruction.
///
/// `src1`/`src2`/`dest` hold variable names, literals or label names
/// depending on the arity of `op`. The operand kinds are caches over
/// `src1`/`src2`; call [`Quadruple::update_kinds`] after editing the source
/// fields directly.
#[derive(Clone, Debug, PartialEq)]
pub struct Quadruple {
    pub op: Op,
    pub src1: String,
    pub src2: String,
    pub dest: String,
    pub relop: Option<Relop>,
    pub src1_kind: OperandKind,
    pub src2_kind: OperandKind,
    pub input_vars: Vec<String>,
    pub output_vars: Vec<String>,
    pub raw_instructions: Vec<String>,
}

impl Quadruple {
    pub fn new(op: Op) -> Quadruple {
        Quadruple {
            op,
            src1: String::new(),
            src2: String::new(),
            dest: String::new(),
            relop: None,
            src1_kind: OperandKind::Invalid,
            src2_kind: OperandKind::Invalid,
            input_vars: Vec::new(),
            output_vars: Vec::new(),
            raw_instructions: Vec::new(),
        }
    }

    pub fn i1<S: Into<String>>(op: Op, src1: S) -> Quadruple {
        let mut q = Quadruple::new(op);
        q.src1 = src1.into();
        q.update_kinds();
        q
    }

    pub fn o1<S: Into<String>>(op: Op, dest: S) -> Quadruple {
        let mut q = Quadruple::new(op);
        q.dest = dest.into();
        q
    }

    pub fn i1o1<S1: Into<String>, S2: Into<String>>(op: Op, src1: S1, dest: S2) -> Quadruple {
        let mut q = Quadruple::new(op);
        q.src1 = src1.into();
        q.dest = dest.into();
        q.update_kinds();
        q
    }

    pub fn i2o1<S1, S2, S3>(op: Op, src1: S1, src2: S2, dest: S3) -> Quadruple
    where
        S1: Into<String>,
        S2: Into<String>,
        S3: Into<String>,
    {
        let mut q = Quadruple::new(op);
        q.src1 = src1.into();
        q.src2 = src2.into();
        q.dest = dest.into();
        q.update_kinds();
        q
    }

    pub fn branch<S1, S2, S3>(op: Op, src1: S1, relop: Relop, src2: S2, dest: S3) -> Quadruple
    where
        S1: Into<String>,
        S2: Into<String>,
        S3: Into<String>,
    {
        let mut q = Quadruple::i2o1(op, src1, src2, dest);
        q.relop = Some(relop);
        q
    }

    pub fn update_kinds(&mut self) {
        self.src1_kind = classify_operand(&self.src1);
        self.src2_kind = classify_operand(&self.src2);
    }

    pub fn set_src1<S: Into<String>>(&mut self, src1: S) {
        self.src1 = src1.into();
        self.src1_kind = classify_operand(&self.src1);
    }

    pub fn set_src2<S: Into<String>>(&mut self, src2: S) {
        self.src2 = src2.into();
        self.src2_kind = classify_operand(&self.src2);
    }

    /// Canonical one-line (multi-line for asm) text form, accepted back by
    /// [`crate::text::TextQuadrupleParser`].
    pub fn dump(&self) -> String {
        match self.op.arity() {
            Arity::NoArg => self.op.to_string(),
            Arity::I1 => {
                if self.op == Op::Label {
                    format!(":{}", self.src1)
                } else {
                    format!("{} {}", self.op, self.src1)
                }
            }
            Arity::O1 => format!("{} {}", self.op, self.dest),
            Arity::I1O1 => format!("{} {} {}", self.op, self.src1, self.dest),
            Arity::I2O1 => format!("{} {} {} {}", self.op, self.src1, self.src2, self.dest),
            Arity::Branch => match self.relop {
                Some(relop) => format!(
                    "{} {} {} {} goto {}",
                    self.op,
                    self.src1,
                    relop_tag(relop),
                    self.src2,
                    self.dest
                ),
                None => format!("{} {} goto {}", self.op, self.src1, self.dest),
            },
            Arity::Asm => {
                let opt_v = if self.op == (Op::Asm { volatile: true }) {
                    "v"
                } else {
                    ""
                };
                let mut lines = Vec::with_capacity(self.raw_instructions.len() + 2);
                let mut begin = format!("__asm{}begin {}", opt_v, self.input_vars.len());
                for var in &self.input_vars {
                    begin.push(' ');
                    begin.push_str(var);
                }
                lines.push(begin);
                lines.extend(self.raw_instructions.iter().cloned());
                let mut end = format!("__asm{}end {}", opt_v, self.output_vars.len());
                for var in &self.output_vars {
                    end.push(' ');
                    end.push_str(var);
                }
                lines.push(end);
                lines.join("\n")
            }
        }
    }
}

impl fmt::Display for Quadruple {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.dump())
    }
}
