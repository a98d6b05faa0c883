//! Abstract syntax tree of the supported C dialect.
//!
//! Every node kind the lowering pass dispatches on is a variant of a tagged
//! enum; nodes that can raise diagnostics carry their source coordinate.

/// Line/column pair, 1-based, in the text handed to the parser.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct Coord {
    pub line: usize,
    pub column: usize,
}

/// Type syntax as written; resolution of typedef names happens at lowering.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum TypeName {
    Void,
    Bool,
    Char,
    Short,
    Int,
    Long,
    LongLong,
    Float,
    Double,
    Struct(String),
    Named(String),
}

#[derive(Clone, Debug)]
pub enum Item {
    Typedef {
        name: String,
        ty: TypeName,
    },
    StructDef {
        name: String,
        fields: Vec<(String, TypeName)>,
        coord: Coord,
    },
    Function {
        sig: FuncSig,
        body: Option<Stmt>,
        coord: Coord,
    },
    Declaration(Vec<Declarator>),
}

#[derive(Clone, Debug)]
pub struct FuncSig {
    pub name: String,
    pub result: TypeName,
    pub params: Vec<(Option<String>, TypeName)>,
    pub attributes: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct Declarator {
    pub name: String,
    pub ty: TypeName,
    pub pointer: bool,
    pub init: Option<Expr>,
    pub coord: Coord,
}

#[derive(Clone, Debug)]
pub struct Stmt {
    pub kind: StmtKind,
    pub coord: Coord,
}

#[derive(Clone, Debug)]
pub enum StmtKind {
    Block(Vec<BlockItem>),
    Expr(Expr),
    Empty,
    If {
        cond: Expr,
        then_branch: Box<Stmt>,
        else_branch: Option<Box<Stmt>>,
    },
    While {
        cond: Expr,
        body: Box<Stmt>,
    },
    DoWhile {
        body: Box<Stmt>,
        cond: Expr,
    },
    For {
        init: Option<ForInit>,
        cond: Option<Expr>,
        step: Option<Expr>,
        body: Box<Stmt>,
    },
    Break,
    Continue,
    Goto(String),
    Label(String, Box<Stmt>),
    Return(Option<Expr>),
    Asm(AsmBlock),
}

#[derive(Clone, Debug)]
pub enum ForInit {
    Decl(Vec<Declarator>),
    Expr(Expr),
}

#[derive(Clone, Debug)]
pub enum BlockItem {
    Decl(Vec<Declarator>),
    StructDef {
        name: String,
        fields: Vec<(String, TypeName)>,
        coord: Coord,
    },
    Stmt(Stmt),
}

/// Extended inline assembly, template already decoded into lines.
#[derive(Clone, Debug)]
pub struct AsmBlock {
    pub volatile: bool,
    pub template: Vec<String>,
    pub outputs: Vec<AsmOperand>,
    pub inputs: Vec<AsmOperand>,
}

#[derive(Clone, Debug)]
pub struct AsmOperand {
    pub constraint: String,
    pub expr: Expr,
}

#[derive(Clone, Debug)]
pub struct Expr {
    pub kind: ExprKind,
    pub coord: Coord,
}

#[derive(Clone, Debug)]
pub enum ExprKind {
    IntConst(String),
    FloatConst { text: String, single: bool },
    StringConst(String),
    Id(String),
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Assign {
        op: Option<BinaryOp>,
        lvalue: Box<Expr>,
        rvalue: Box<Expr>,
    },
    Cast {
        to: TypeName,
        expr: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    Member {
        base: Box<Expr>,
        field: String,
    },
    Comma(Vec<Expr>),
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum UnaryOp {
    Minus,
    Plus,
    BitNot,
    LogicalNot,
    PreInc,
    PreDec,
    PostInc,
    PostDec,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Lt,
    Gt,
    LtEq,
    GtEq,
    Eq,
    Ne,
    LogicalAnd,
    LogicalOr,
}
