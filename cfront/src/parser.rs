//! pest-based parser for the supported C dialect, producing the AST.

use matches::debug_assert_matches;
use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser;

use crate::ast::*;

#[derive(Parser)]
#[grammar = "c.pest"]
pub struct CParser;

pub type ParseError = pest::error::Error<Rule>;

fn coord(pair: &Pair<Rule>) -> Coord {
    let (line, column) = pair.as_span().start_pos().line_col();
    Coord { line, column }
}

pub fn parse_program(input: &str) -> Result<Vec<Item>, Box<ParseError>> {
    let mut pairs = CParser::parse(Rule::program, input).map_err(Box::new)?;
    let program = pairs.next().unwrap();
    let mut items = Vec::new();
    for pair in program.into_inner() {
        match pair.as_rule() {
            Rule::external_item => {
                let inner = pair.into_inner().next().unwrap();
                match inner.as_rule() {
                    Rule::typedef_decl => items.push(parse_typedef(inner)),
                    Rule::struct_def => {
                        let (name, fields, coord) = parse_struct_def(inner);
                        items.push(Item::StructDef {
                            name,
                            fields,
                            coord,
                        });
                    }
                    Rule::function_item => items.push(parse_function(inner)),
                    Rule::declaration => {
                        items.push(Item::Declaration(parse_declarators(inner)))
                    }
                    Rule::stray_semi => {}
                    other => unreachable!("unexpected item rule {:?}", other),
                }
            }
            Rule::EOI => {}
            other => unreachable!("unexpected program rule {:?}", other),
        }
    }
    Ok(items)
}

fn parse_typedef(pair: Pair<Rule>) -> Item {
    let mut inner = pair.into_inner();
    inner.next(); // typedef keyword
    let ty = parse_type_spec(inner.next().unwrap());
    let name = inner.next().unwrap().as_str().to_string();
    Item::Typedef { name, ty }
}

fn parse_type_spec(pair: Pair<Rule>) -> TypeName {
    debug_assert_matches!(pair.as_rule(), Rule::type_spec | Rule::cast_type);
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::kw_const | Rule::pointer => continue,
            Rule::struct_type => {
                let name = inner.into_inner().last().unwrap().as_str();
                return TypeName::Struct(name.to_string());
            }
            Rule::prim_type => return parse_prim_type(inner),
            Rule::typedef_name => return TypeName::Named(inner.as_str().to_string()),
            other => unreachable!("unexpected type rule {:?}", other),
        }
    }
    unreachable!("empty type specifier")
}

fn parse_prim_type(pair: Pair<Rule>) -> TypeName {
    let kinds: Vec<Rule> = pair.into_inner().map(|p| p.as_rule()).collect();
    match kinds.as_slice() {
        [Rule::kw_long, Rule::kw_long] => TypeName::LongLong,
        [Rule::kw_long] => TypeName::Long,
        [Rule::kw_short] => TypeName::Short,
        [Rule::kw_int] => TypeName::Int,
        [Rule::kw_char] => TypeName::Char,
        [Rule::kw_bool] => TypeName::Bool,
        [Rule::kw_double] => TypeName::Double,
        [Rule::kw_float] => TypeName::Float,
        [Rule::kw_void] => TypeName::Void,
        other => unreachable!("unexpected primitive type {:?}", other),
    }
}

fn parse_struct_def(pair: Pair<Rule>) -> (String, Vec<(String, TypeName)>, Coord) {
    let struct_coord = coord(&pair);
    let mut inner = pair.into_inner();
    inner.next(); // struct keyword
    let name = inner.next().unwrap().as_str().to_string();
    let mut fields = Vec::new();
    for field in inner {
        debug_assert_matches!(field.as_rule(), Rule::struct_field);
        let mut parts = field.into_inner();
        let ty = parse_type_spec(parts.next().unwrap());
        let mut next = parts.next().unwrap();
        let pointer = next.as_rule() == Rule::pointer;
        if pointer {
            next = parts.next().unwrap();
        }
        let field_name = next.as_str().to_string();
        // A pointer field refers to another host object.
        let ty = if pointer {
            TypeName::Struct("MlogObject".to_string())
        } else {
            ty
        };
        fields.push((field_name, ty));
    }
    (name, fields, struct_coord)
}

fn parse_attribute(pair: Pair<Rule>) -> Vec<String> {
    debug_assert_matches!(pair.as_rule(), Rule::attribute);
    let mut attributes = Vec::new();
    for item in pair.into_inner() {
        if item.as_rule() != Rule::attr_item {
            continue;
        }
        if let Some(name) = item.into_inner().next() {
            attributes.push(name.as_str().to_string());
        }
    }
    attributes
}

fn parse_function(pair: Pair<Rule>) -> Item {
    let function_coord = coord(&pair);
    let mut attributes = Vec::new();
    let mut result = None;
    let mut name = String::new();
    let mut params = Vec::new();
    let mut body = None;
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::func_spec => {
                let spec = inner.into_inner().next().unwrap();
                match spec.as_rule() {
                    Rule::kw_inline => attributes.push("inline".to_string()),
                    // Storage class, irrelevant on this target.
                    Rule::kw_static => {}
                    Rule::attribute => attributes.extend(parse_attribute(spec)),
                    other => unreachable!("unexpected func_spec {:?}", other),
                }
            }
            Rule::attribute => attributes.extend(parse_attribute(inner)),
            Rule::type_spec => result = Some(parse_type_spec(inner)),
            Rule::ident => name = inner.as_str().to_string(),
            Rule::param_list => params = parse_params(inner),
            Rule::block => body = Some(parse_block(inner)),
            other => unreachable!("unexpected function part {:?}", other),
        }
    }
    Item::Function {
        sig: FuncSig {
            name,
            result: result.unwrap(),
            params,
            attributes,
        },
        body,
        coord: function_coord,
    }
}

fn parse_params(pair: Pair<Rule>) -> Vec<(Option<String>, TypeName)> {
    let mut params = Vec::new();
    for param in pair.into_inner() {
        debug_assert_matches!(param.as_rule(), Rule::param);
        let mut ty = None;
        let mut name = None;
        for part in param.into_inner() {
            match part.as_rule() {
                Rule::type_spec => ty = Some(parse_type_spec(part)),
                Rule::pointer => {}
                Rule::ident => name = Some(part.as_str().to_string()),
                other => unreachable!("unexpected param part {:?}", other),
            }
        }
        params.push((name, ty.unwrap()));
    }
    params
}

fn parse_declarators(pair: Pair<Rule>) -> Vec<Declarator> {
    debug_assert_matches!(pair.as_rule(), Rule::declaration | Rule::for_decl);
    let mut inner = pair.into_inner();
    let ty = parse_type_spec(inner.next().unwrap());
    let mut declarators = Vec::new();
    for decl in inner {
        debug_assert_matches!(decl.as_rule(), Rule::init_declarator);
        let decl_coord = coord(&decl);
        let mut pointer = false;
        let mut name = String::new();
        let mut init = None;
        for part in decl.into_inner() {
            match part.as_rule() {
                Rule::pointer => pointer = true,
                Rule::ident => name = part.as_str().to_string(),
                Rule::assignment => init = Some(parse_expr(part)),
                other => unreachable!("unexpected declarator part {:?}", other),
            }
        }
        declarators.push(Declarator {
            name,
            ty: ty.clone(),
            pointer,
            init,
            coord: decl_coord,
        });
    }
    declarators
}

fn parse_block(pair: Pair<Rule>) -> Stmt {
    debug_assert_matches!(pair.as_rule(), Rule::block);
    let block_coord = coord(&pair);
    let mut items = Vec::new();
    for item in pair.into_inner() {
        let inner = item.into_inner().next().unwrap();
        match inner.as_rule() {
            Rule::declaration => items.push(BlockItem::Decl(parse_declarators(inner))),
            Rule::struct_def => {
                let (name, fields, coord) = parse_struct_def(inner);
                items.push(BlockItem::StructDef {
                    name,
                    fields,
                    coord,
                });
            }
            Rule::statement => items.push(BlockItem::Stmt(parse_statement(inner))),
            other => unreachable!("unexpected block item {:?}", other),
        }
    }
    Stmt {
        kind: StmtKind::Block(items),
        coord: block_coord,
    }
}

fn parse_statement(pair: Pair<Rule>) -> Stmt {
    debug_assert_matches!(pair.as_rule(), Rule::statement);
    let inner = pair.into_inner().next().unwrap();
    let stmt_coord = coord(&inner);
    let kind = match inner.as_rule() {
        Rule::block => return parse_block(inner),
        Rule::if_stmt => {
            let mut parts = inner.into_inner();
            parts.next(); // if keyword
            let cond = parse_expr(parts.next().unwrap());
            let then_branch = Box::new(parse_statement(parts.next().unwrap()));
            let else_branch = match parts.next() {
                Some(_) => Some(Box::new(parse_statement(parts.next().unwrap()))),
                None => None,
            };
            StmtKind::If {
                cond,
                then_branch,
                else_branch,
            }
        }
        Rule::while_stmt => {
            let mut parts = inner.into_inner();
            parts.next(); // while keyword
            let cond = parse_expr(parts.next().unwrap());
            let body = Box::new(parse_statement(parts.next().unwrap()));
            StmtKind::While { cond, body }
        }
        Rule::do_stmt => {
            let mut parts = inner.into_inner();
            parts.next(); // do keyword
            let body = Box::new(parse_statement(parts.next().unwrap()));
            parts.next(); // while keyword
            let cond = parse_expr(parts.next().unwrap());
            StmtKind::DoWhile { body, cond }
        }
        Rule::for_stmt => {
            let mut init = None;
            let mut cond = None;
            let mut step = None;
            let mut body = None;
            for part in inner.into_inner() {
                match part.as_rule() {
                    Rule::kw_for => {}
                    Rule::for_init => {
                        let fi = part.into_inner().next().unwrap();
                        init = Some(match fi.as_rule() {
                            Rule::for_decl => ForInit::Decl(parse_declarators(fi)),
                            Rule::expression => ForInit::Expr(parse_expr(fi)),
                            other => unreachable!("unexpected for-init {:?}", other),
                        });
                    }
                    Rule::for_cond => {
                        cond = Some(parse_expr(part.into_inner().next().unwrap()))
                    }
                    Rule::for_step => {
                        step = Some(parse_expr(part.into_inner().next().unwrap()))
                    }
                    Rule::statement => body = Some(Box::new(parse_statement(part))),
                    other => unreachable!("unexpected for part {:?}", other),
                }
            }
            StmtKind::For {
                init,
                cond,
                step,
                body: body.unwrap(),
            }
        }
        Rule::break_stmt => StmtKind::Break,
        Rule::continue_stmt => StmtKind::Continue,
        Rule::goto_stmt => {
            let label = inner.into_inner().nth(1).unwrap().as_str().to_string();
            StmtKind::Goto(label)
        }
        Rule::return_stmt => {
            let expr = inner
                .into_inner()
                .find(|p| p.as_rule() == Rule::expression)
                .map(parse_expr);
            StmtKind::Return(expr)
        }
        Rule::labeled_stmt => {
            let mut parts = inner.into_inner();
            let label = parts.next().unwrap().as_str().to_string();
            let stmt = Box::new(parse_statement(parts.next().unwrap()));
            StmtKind::Label(label, stmt)
        }
        Rule::empty_stmt => StmtKind::Empty,
        Rule::expr_stmt => {
            StmtKind::Expr(parse_expr(inner.into_inner().next().unwrap()))
        }
        Rule::asm_stmt => StmtKind::Asm(parse_asm(inner)),
        other => unreachable!("unexpected statement rule {:?}", other),
    };
    Stmt {
        kind,
        coord: stmt_coord,
    }
}

fn parse_asm(pair: Pair<Rule>) -> AsmBlock {
    let mut volatile = false;
    let mut template = Vec::new();
    let mut outputs = Vec::new();
    let mut inputs = Vec::new();
    for part in pair.into_inner() {
        match part.as_rule() {
            Rule::kw_asm => {}
            Rule::kw_volatile => volatile = true,
            Rule::asm_template => {
                for lit in part.into_inner() {
                    let decoded = unescape_string(lit.as_str());
                    template.extend(decoded.lines().map(|line| line.to_string()));
                }
            }
            Rule::asm_outputs => outputs = parse_asm_operands(part),
            Rule::asm_inputs => inputs = parse_asm_operands(part),
            // Clobber lists are accepted and ignored on this target.
            Rule::asm_clobbers => {}
            other => unreachable!("unexpected asm part {:?}", other),
        }
    }
    AsmBlock {
        volatile,
        template,
        outputs,
        inputs,
    }
}

fn parse_asm_operands(pair: Pair<Rule>) -> Vec<AsmOperand> {
    let mut operands = Vec::new();
    for list in pair.into_inner() {
        debug_assert_matches!(list.as_rule(), Rule::asm_operand_list);
        for operand in list.into_inner() {
            let mut constraint = String::new();
            let mut expr = None;
            for part in operand.into_inner() {
                match part.as_rule() {
                    // Symbolic operand name, unused by the templates here.
                    Rule::ident => {}
                    Rule::string_lit => constraint = unescape_string(part.as_str()),
                    Rule::expression => expr = Some(parse_expr(part)),
                    other => unreachable!("unexpected asm operand part {:?}", other),
                }
            }
            operands.push(AsmOperand {
                constraint,
                expr: expr.unwrap(),
            });
        }
    }
    operands
}

fn binary_op_from(text: &str) -> BinaryOp {
    match text {
        "+" => BinaryOp::Add,
        "-" => BinaryOp::Sub,
        "*" => BinaryOp::Mul,
        "/" => BinaryOp::Div,
        "%" => BinaryOp::Rem,
        "&" => BinaryOp::BitAnd,
        "|" => BinaryOp::BitOr,
        "^" => BinaryOp::BitXor,
        "<<" => BinaryOp::Shl,
        ">>" => BinaryOp::Shr,
        "<" => BinaryOp::Lt,
        ">" => BinaryOp::Gt,
        "<=" => BinaryOp::LtEq,
        ">=" => BinaryOp::GtEq,
        "==" => BinaryOp::Eq,
        "!=" => BinaryOp::Ne,
        "&&" => BinaryOp::LogicalAnd,
        "||" => BinaryOp::LogicalOr,
        other => unreachable!("unexpected binary operator {:?}", other),
    }
}

pub fn parse_expr(pair: Pair<Rule>) -> Expr {
    let expr_coord = coord(&pair);
    match pair.as_rule() {
        Rule::expression => {
            let mut exprs: Vec<Expr> = pair.into_inner().map(parse_expr).collect();
            if exprs.len() == 1 {
                exprs.pop().unwrap()
            } else {
                Expr {
                    kind: ExprKind::Comma(exprs),
                    coord: expr_coord,
                }
            }
        }
        Rule::assignment | Rule::cast_expr => parse_expr(pair.into_inner().next().unwrap()),
        Rule::assign_expr => {
            let mut parts = pair.into_inner();
            let lvalue = parse_expr(parts.next().unwrap());
            let op = match parts.next().unwrap().as_str() {
                "=" => None,
                "+=" => Some(BinaryOp::Add),
                "-=" => Some(BinaryOp::Sub),
                "*=" => Some(BinaryOp::Mul),
                "/=" => Some(BinaryOp::Div),
                "%=" => Some(BinaryOp::Rem),
                "&=" => Some(BinaryOp::BitAnd),
                "|=" => Some(BinaryOp::BitOr),
                "^=" => Some(BinaryOp::BitXor),
                "<<=" => Some(BinaryOp::Shl),
                ">>=" => Some(BinaryOp::Shr),
                other => unreachable!("unexpected assignment operator {:?}", other),
            };
            let rvalue = parse_expr(parts.next().unwrap());
            Expr {
                kind: ExprKind::Assign {
                    op,
                    lvalue: Box::new(lvalue),
                    rvalue: Box::new(rvalue),
                },
                coord: expr_coord,
            }
        }
        Rule::logical_or
        | Rule::logical_and
        | Rule::bit_or
        | Rule::bit_xor
        | Rule::bit_and
        | Rule::equality
        | Rule::relational
        | Rule::shift
        | Rule::additive
        | Rule::multiplicative => {
            let mut parts = pair.into_inner();
            let mut lhs = parse_expr(parts.next().unwrap());
            while let Some(op_pair) = parts.next() {
                let op = binary_op_from(op_pair.as_str());
                let rhs = parse_expr(parts.next().unwrap());
                lhs = Expr {
                    kind: ExprKind::Binary {
                        op,
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                    },
                    coord: expr_coord,
                };
            }
            lhs
        }
        Rule::cast => {
            let mut parts = pair.into_inner();
            let to = parse_type_spec(parts.next().unwrap());
            let expr = parse_expr(parts.next().unwrap());
            Expr {
                kind: ExprKind::Cast {
                    to,
                    expr: Box::new(expr),
                },
                coord: expr_coord,
            }
        }
        Rule::unary => {
            let mut parts = pair.into_inner();
            let first = parts.next().unwrap();
            if first.as_rule() == Rule::prefix_op {
                let op = match first.as_str() {
                    "++" => UnaryOp::PreInc,
                    "--" => UnaryOp::PreDec,
                    "-" => UnaryOp::Minus,
                    "+" => UnaryOp::Plus,
                    "~" => UnaryOp::BitNot,
                    "!" => UnaryOp::LogicalNot,
                    other => unreachable!("unexpected prefix operator {:?}", other),
                };
                let expr = parse_expr(parts.next().unwrap());
                Expr {
                    kind: ExprKind::Unary {
                        op,
                        expr: Box::new(expr),
                    },
                    coord: expr_coord,
                }
            } else {
                parse_expr(first)
            }
        }
        Rule::postfix => {
            let mut parts = pair.into_inner();
            let mut expr = parse_expr(parts.next().unwrap());
            for suffix in parts {
                let suffix_coord = coord(&suffix);
                let inner = suffix.into_inner().next().unwrap();
                expr = match inner.as_rule() {
                    Rule::op_inc => Expr {
                        kind: ExprKind::Unary {
                            op: UnaryOp::PostInc,
                            expr: Box::new(expr),
                        },
                        coord: suffix_coord,
                    },
                    Rule::op_dec => Expr {
                        kind: ExprKind::Unary {
                            op: UnaryOp::PostDec,
                            expr: Box::new(expr),
                        },
                        coord: suffix_coord,
                    },
                    Rule::call_suffix => {
                        let args = inner
                            .into_inner()
                            .next()
                            .map(|list| list.into_inner().map(parse_expr).collect())
                            .unwrap_or_else(Vec::new);
                        Expr {
                            kind: ExprKind::Call {
                                callee: Box::new(expr),
                                args,
                            },
                            coord: suffix_coord,
                        }
                    }
                    Rule::member_suffix => {
                        let field = inner.into_inner().nth(1).unwrap().as_str().to_string();
                        Expr {
                            kind: ExprKind::Member {
                                base: Box::new(expr),
                                field,
                            },
                            coord: suffix_coord,
                        }
                    }
                    other => unreachable!("unexpected postfix suffix {:?}", other),
                };
            }
            expr
        }
        Rule::primary => {
            let inner = pair.into_inner().next().unwrap();
            match inner.as_rule() {
                Rule::float_lit => {
                    let text = inner.as_str();
                    let single = text.ends_with('f') || text.ends_with('F');
                    let text = text
                        .trim_end_matches(|c| c == 'f' || c == 'F' || c == 'l' || c == 'L')
                        .to_string();
                    Expr {
                        kind: ExprKind::FloatConst { text, single },
                        coord: expr_coord,
                    }
                }
                Rule::int_lit => {
                    let text = inner
                        .as_str()
                        .trim_end_matches(|c| {
                            c == 'u' || c == 'U' || c == 'l' || c == 'L'
                        })
                        .to_string();
                    Expr {
                        kind: ExprKind::IntConst(text),
                        coord: expr_coord,
                    }
                }
                Rule::string_lit => Expr {
                    kind: ExprKind::StringConst(inner.as_str().to_string()),
                    coord: expr_coord,
                },
                Rule::char_lit => {
                    let decoded = unescape_string(inner.as_str());
                    let value = decoded.chars().next().map(|c| c as u32).unwrap_or(0);
                    Expr {
                        kind: ExprKind::IntConst(value.to_string()),
                        coord: expr_coord,
                    }
                }
                Rule::ident => Expr {
                    kind: ExprKind::Id(inner.as_str().to_string()),
                    coord: expr_coord,
                },
                Rule::paren_expr => parse_expr(inner.into_inner().next().unwrap()),
                other => unreachable!("unexpected primary {:?}", other),
            }
        }
        other => unreachable!("unexpected expression rule {:?}", other),
    }
}

/// Decode a C string literal (still carrying its quotes) into its value.
pub fn unescape_string(literal: &str) -> String {
    let end = literal.len().saturating_sub(1);
    let body = if end > 0 { &literal[1..end] } else { "" };
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some('\\') => out.push('\\'),
            Some('"') => out.push('"'),
            Some('\'') => out.push('\''),
            Some('x') => {
                let mut value = 0u32;
                let mut digits = 0;
                while digits < 2 {
                    match chars.peek().and_then(|c| c.to_digit(16)) {
                        Some(digit) => {
                            value = value * 16 + digit;
                            chars.next();
                            digits += 1;
                        }
                        None => break,
                    }
                }
                if let Some(decoded) = std::char::from_u32(value) {
                    out.push(decoded);
                }
            }
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}
