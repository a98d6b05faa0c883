//! The closed type system of the dialect and IR instruction selection.

use mlogev::quadruple::{BinaryOp as IrBinaryOp, NumType, Op, VarType};

use crate::ast::{BinaryOp, UnaryOp};

/// Resolved C-level type. All integer ranks collapse to `i32` at IR level,
/// the floating ranks to `f64`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CType {
    Void,
    Bool,
    Char,
    Short,
    Int,
    Long,
    LongLong,
    Float,
    Double,
    MlogObject,
    MlogBuiltins,
}

impl CType {
    /// Usual-arithmetic-conversion rank. The host-object type ranks below
    /// everything: it is assignment-compatible with any arithmetic type in
    /// the target runtime.
    pub fn rank(self) -> Option<i32> {
        match self {
            CType::Bool => Some(1),
            CType::Char => Some(2),
            CType::Short => Some(3),
            CType::Int => Some(4),
            CType::Long => Some(5),
            CType::LongLong => Some(6),
            CType::Float => Some(7),
            CType::Double => Some(8),
            CType::MlogObject => Some(-1),
            CType::Void | CType::MlogBuiltins => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CType::Void => "void",
            CType::Bool => "_Bool",
            CType::Char => "char",
            CType::Short => "short",
            CType::Int => "int",
            CType::Long => "long",
            CType::LongLong => "long long",
            CType::Float => "float",
            CType::Double => "double",
            CType::MlogObject => "struct MlogObject",
            CType::MlogBuiltins => "struct MLOG_BUILTINS",
        }
    }

    /// IR storage class of a value of this type, if it has one.
    pub fn var_type(self) -> Option<VarType> {
        match self {
            CType::Bool
            | CType::Char
            | CType::Short
            | CType::Int
            | CType::Long
            | CType::LongLong => Some(VarType::I32),
            CType::Float | CType::Double => Some(VarType::F64),
            CType::MlogObject => Some(VarType::Obj),
            CType::Void | CType::MlogBuiltins => None,
        }
    }
}

pub fn choose_set_instruction(ty: CType) -> Option<Op> {
    ty.var_type().map(Op::Set)
}

pub fn choose_decl_instruction(ty: CType) -> Option<Op> {
    ty.var_type().map(Op::Decl)
}

fn num_type(rank: i32) -> NumType {
    if rank >= 7 {
        NumType::F64
    } else {
        NumType::I32
    }
}

fn ir_binary_op(op: BinaryOp) -> IrBinaryOp {
    match op {
        BinaryOp::Add => IrBinaryOp::Add,
        BinaryOp::Sub => IrBinaryOp::Sub,
        BinaryOp::Mul => IrBinaryOp::Mul,
        BinaryOp::Div => IrBinaryOp::Div,
        BinaryOp::Rem => IrBinaryOp::Rem,
        BinaryOp::BitAnd => IrBinaryOp::And,
        BinaryOp::BitOr => IrBinaryOp::Or,
        BinaryOp::BitXor => IrBinaryOp::Xor,
        BinaryOp::Shl => IrBinaryOp::Lsh,
        BinaryOp::Shr => IrBinaryOp::Rsh,
        BinaryOp::Lt => IrBinaryOp::Lt,
        BinaryOp::Gt => IrBinaryOp::Gt,
        BinaryOp::LtEq => IrBinaryOp::LtEq,
        BinaryOp::GtEq => IrBinaryOp::GtEq,
        BinaryOp::Eq => IrBinaryOp::Eq,
        BinaryOp::Ne => IrBinaryOp::Ne,
        BinaryOp::LogicalAnd | BinaryOp::LogicalOr => {
            unreachable!("short-circuit operators never select an instruction")
        }
    }
}

/// Result type of a binary expression: the higher-ranked operand wins.
pub fn arithmetic_result_type(lhs: CType, rhs: CType) -> Result<(CType, i32), String> {
    let rank_l = lhs
        .rank()
        .ok_or_else(|| format!("type {} takes part in no arithmetic", lhs.name()))?;
    let rank_r = rhs
        .rank()
        .ok_or_else(|| format!("type {} takes part in no arithmetic", rhs.name()))?;
    if rank_l < rank_r {
        Ok((rhs, rank_r))
    } else {
        Ok((lhs, rank_l))
    }
}

/// Pick the IR instruction of a binary operator applied to two operand
/// types, returning the result type as well. Comparisons always yield int.
pub fn choose_binaryop_instruction(
    op: BinaryOp,
    lhs: CType,
    rhs: CType,
) -> Result<(CType, Op), String> {
    let (result_type, result_rank) = arithmetic_result_type(lhs, rhs)?;
    let ir_op = ir_binary_op(op);
    if ir_op.is_comparison() {
        return Ok((CType::Int, Op::Bin(ir_op, num_type(result_rank))));
    }
    if result_rank > 6 && ir_op.i32_only() {
        return Err(format!(
            "type {} does not support operator {:?}",
            result_type.name(),
            op
        ));
    }
    Ok((result_type, Op::Bin(ir_op, num_type(result_rank))))
}

/// Unary `-` and `~`.
pub fn choose_unaryop_instruction(op: UnaryOp, operand: CType) -> Result<(CType, Op), String> {
    let rank = operand
        .rank()
        .ok_or_else(|| format!("type {} takes part in no arithmetic", operand.name()))?;
    match op {
        UnaryOp::Minus => Ok((operand, Op::Minus(num_type(rank)))),
        UnaryOp::BitNot => {
            if rank > 6 {
                Err(format!(
                    "type {} does not support operator ~",
                    operand.name()
                ))
            } else {
                Ok((operand, Op::Not))
            }
        }
        _ => unreachable!("not a value-producing unary operator"),
    }
}
