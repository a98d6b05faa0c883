//! Stateful lowering from the C AST to quadruple IR.
//!
//! The walker keeps a current function (or none, meaning global scope), the
//! scope tables, counters for temporaries and control-flow labels, and a
//! stack of enclosing loops. Instructions emitted inside a function append to
//! that function, otherwise to the global initialization list.

use std::collections::{BTreeSet, HashMap};

use log::debug;
use mlogev::backend::FrontendResult;
use mlogev::function::Function;
use mlogev::quadruple::{BinaryOp as IrBinaryOp, NumType, Op, Quadruple, VarType};

use crate::ast::{
    AsmBlock, BinaryOp, BlockItem, Coord, Declarator, Expr, ExprKind, ForInit, FuncSig, Item,
    Stmt, StmtKind, TypeName, UnaryOp,
};
use crate::cpp::{self, LineMap};
use crate::error::CompilationError;
use crate::objects::convert_field_name;
use crate::parser;
use crate::types::{
    choose_binaryop_instruction, choose_decl_instruction, choose_set_instruction,
    choose_unaryop_instruction, CType,
};

const RELOP_NE_I32: (IrBinaryOp, NumType) = (IrBinaryOp::Ne, NumType::I32);

/// Identifier that resolves to the enclosing function's return slot inside
/// extended asm output operands.
const FUNCTION_RETURN_VALUE: &str = "__mlogev_function_return_value__";

fn is_mlogev_temp_var(name: &str) -> bool {
    name.starts_with("__vtmp_") || name.starts_with("___vtmp_")
}

#[derive(Clone)]
struct Signature {
    result: CType,
    params: Vec<(String, CType)>,
    attributes: Vec<String>,
}

struct CurrentFunction {
    name: String,
    result: CType,
    locals: HashMap<String, CType>,
    vtmp_count: u32,
    instructions: Vec<Quadruple>,
    attributes: Vec<String>,
    params: Vec<(String, CType)>,
}

/// Jump targets threaded through short-circuit lowering of a branch
/// condition.
struct BranchLabels {
    if_true: String,
    if_false: String,
}

pub struct Compiler {
    signatures: HashMap<String, Signature>,
    functions: Vec<Function>,
    current: Option<CurrentFunction>,
    globals: HashMap<String, CType>,
    instructions: Vec<Quadruple>,
    vtmp_count: u32,
    if_structure_count: u32,
    loop_structure_count: u32,
    short_circuit_count: u32,
    loop_stack: Vec<u32>,
    typedefs: HashMap<String, TypeName>,
    mlog_object_items: HashMap<String, CType>,
    mlog_builtins_items: HashMap<String, CType>,
    referred_builtins_items: BTreeSet<String>,
    line_map: LineMap,
}

impl Default for Compiler {
    fn default() -> Compiler {
        Compiler::new()
    }
}

impl Compiler {
    pub fn new() -> Compiler {
        Compiler {
            signatures: HashMap::new(),
            functions: Vec::new(),
            current: None,
            globals: HashMap::new(),
            instructions: Vec::new(),
            vtmp_count: 0,
            if_structure_count: 0,
            loop_structure_count: 0,
            short_circuit_count: 0,
            loop_stack: Vec::new(),
            typedefs: HashMap::new(),
            mlog_object_items: HashMap::new(),
            mlog_builtins_items: HashMap::new(),
            referred_builtins_items: BTreeSet::new(),
            line_map: LineMap::identity("<source>"),
        }
    }

    /// Compile one source file, optionally through the external C
    /// preprocessor. A `Compiler` is meant to be used for one compilation.
    pub fn compile_file(
        &mut self,
        filename: &str,
        use_cpp: bool,
        cpp_args: &[String],
    ) -> Result<FrontendResult, CompilationError> {
        if use_cpp {
            let text = cpp::preprocess(filename, cpp_args)?;
            self.line_map = LineMap::from_preprocessed(&text, filename);
            self.compile_text(&text)
        } else {
            let text = std::fs::read_to_string(filename).map_err(|err| {
                CompilationError::new(format!("cannot read {}: {}", filename, err))
            })?;
            self.line_map = LineMap::identity(filename);
            self.compile_text(&text)
        }
    }

    /// Compile already-preprocessed source text.
    pub fn compile_source(
        &mut self,
        source: &str,
        filename: &str,
    ) -> Result<FrontendResult, CompilationError> {
        self.line_map = LineMap::identity(filename);
        self.compile_text(source)
    }

    fn compile_text(&mut self, text: &str) -> Result<FrontendResult, CompilationError> {
        let items = parser::parse_program(text).map_err(|err| self.convert_parse_error(&err))?;
        for item in &items {
            self.lower_item(item)?;
        }
        debug!(
            "frontend: {} global instructions, {} functions",
            self.instructions.len(),
            self.functions.len()
        );

        // Builtins referred to anywhere become declared globals at the very
        // start of the output.
        let mut global_instructions = Vec::new();
        for field in &self.referred_builtins_items {
            let ty = self.mlog_builtins_items[field.as_str()];
            if let Some(op) = choose_decl_instruction(ty) {
                global_instructions.push(Quadruple::o1(op, convert_field_name(field)));
            }
        }
        global_instructions.append(&mut self.instructions);
        Ok(FrontendResult {
            global_instructions,
            functions: std::mem::replace(&mut self.functions, Vec::new()),
        })
    }

    fn convert_parse_error(&self, err: &parser::ParseError) -> CompilationError {
        let (line, column) = match err.line_col {
            pest::error::LineColLocation::Pos((line, column)) => (line, column),
            pest::error::LineColLocation::Span((line, column), _) => (line, column),
        };
        CompilationError::with_coord(
            format!("syntax error: {}", err.variant.message()),
            self.line_map.format_coord(line, column),
        )
    }

    // --- internal utilities ---

    fn err<S: Into<String>>(&self, reason: S, coord: Coord) -> CompilationError {
        CompilationError::with_coord(
            reason,
            self.line_map.format_coord(coord.line, coord.column),
        )
    }

    fn locate(&self, mut error: CompilationError, coord: Coord) -> CompilationError {
        if error.coord.is_none() {
            error.coord = Some(self.line_map.format_coord(coord.line, coord.column));
        }
        error
    }

    fn push(&mut self, instruction: Quadruple) {
        match &mut self.current {
            Some(function) => function.instructions.push(instruction),
            None => self.instructions.push(instruction),
        }
    }

    fn peek_mut(&mut self) -> Option<&mut Quadruple> {
        match &mut self.current {
            Some(function) => function.instructions.last_mut(),
            None => self.instructions.last_mut(),
        }
    }

    // Globals stay undecorated.
    fn decorate_variable(&self, variable_name: &str) -> String {
        match &self.current {
            Some(function) if function.locals.contains_key(variable_name) => {
                format!("_{}@{}", variable_name, function.name)
            }
            _ => variable_name.to_string(),
        }
    }

    fn declare_variable(&mut self, var_name: &str, var_type: CType) {
        match &mut self.current {
            Some(function) => {
                function.locals.insert(var_name.to_string(), var_type);
            }
            None => {
                self.globals.insert(var_name.to_string(), var_type);
            }
        }
    }

    fn create_temp_variable(&mut self, var_type: CType) -> String {
        let raw_name = match &mut self.current {
            None => {
                self.vtmp_count += 1;
                format!("__vtmp_{}", self.vtmp_count)
            }
            Some(function) => {
                function.vtmp_count += 1;
                format!("__vtmp_{}", function.vtmp_count)
            }
        };
        self.declare_variable(&raw_name, var_type);
        let decorated = self.decorate_variable(&raw_name);
        if let Some(op) = choose_decl_instruction(var_type) {
            self.push(Quadruple::o1(op, decorated.clone()));
        }
        decorated
    }

    fn remove_temp_variable(&mut self, decorated_name: &str) {
        if !decorated_name.contains("__vtmp_") {
            return;
        }
        match &mut self.current {
            None => {
                self.globals.remove(decorated_name);
            }
            Some(function) => match decorated_name.find('@') {
                Some(first_at) => {
                    function.locals.remove(&decorated_name[1..first_at]);
                }
                None => {
                    function.locals.remove(decorated_name);
                }
            },
        }
    }

    fn get_variable(
        &self,
        var_name: &str,
        coord: Coord,
    ) -> Result<(CType, String), CompilationError> {
        if let Some(function) = &self.current {
            if let Some(&ty) = function.locals.get(var_name) {
                return Ok((ty, format!("_{}@{}", var_name, function.name)));
            }
        }
        if let Some(&ty) = self.globals.get(var_name) {
            return Ok((ty, var_name.to_string()));
        }
        Err(self.err(
            format!(
                "Variable {} not found (or referred before declaration)",
                var_name
            ),
            coord,
        ))
    }

    fn resolve_type(&self, ty: &TypeName, coord: Coord) -> Result<CType, CompilationError> {
        match ty {
            TypeName::Void => Ok(CType::Void),
            TypeName::Bool => Ok(CType::Bool),
            TypeName::Char => Ok(CType::Char),
            TypeName::Short => Ok(CType::Short),
            TypeName::Int => Ok(CType::Int),
            TypeName::Long => Ok(CType::Long),
            TypeName::LongLong => Ok(CType::LongLong),
            TypeName::Float => Ok(CType::Float),
            TypeName::Double => Ok(CType::Double),
            TypeName::Struct(name) => match name.as_str() {
                "MlogObject" => Ok(CType::MlogObject),
                "MLOG_BUILTINS" => Ok(CType::MlogBuiltins),
                other => Err(self.err(
                    format!("struct support is not implemented yet (struct {})", other),
                    coord,
                )),
            },
            TypeName::Named(name) => match self.typedefs.get(name) {
                Some(target) => self.resolve_type(&target.clone(), coord),
                None => Err(self.err(format!("unknown type name `{}`", name), coord)),
            },
        }
    }

    /// Convert a value to the destination type where the IR requires it.
    /// Only the float-to-int narrowing emits an instruction.
    fn static_cast(&mut self, src_var: String, src_type: CType, dst_type: CType) -> String {
        if let (Some(src_rank), Some(dst_rank)) = (src_type.rank(), dst_type.rank()) {
            if src_rank >= 7 && (1..=6).contains(&dst_rank) {
                let tmp_var = self.create_temp_variable(dst_type);
                self.push(Quadruple::i1o1(Op::CvtF64I32, src_var, tmp_var.clone()));
                return tmp_var;
            }
        }
        src_var
    }

    /// If the previous instruction just produced `src_var` as a temporary,
    /// retarget it at the destination instead of emitting a copy.
    fn heuristic_assign(
        &mut self,
        src_var: &str,
        dest_var: &str,
        dest_type: CType,
    ) -> Result<(), CompilationError> {
        if is_mlogev_temp_var(src_var) {
            let mut retargeted = false;
            if let Some(last) = self.peek_mut() {
                if last.dest == src_var {
                    last.dest = dest_var.to_string();
                    retargeted = true;
                } else if last.output_vars.len() == 1 && last.output_vars[0] == src_var {
                    last.output_vars[0] = dest_var.to_string();
                    retargeted = true;
                }
            }
            if retargeted {
                self.remove_temp_variable(src_var);
                return Ok(());
            }
        }
        match choose_set_instruction(dest_type) {
            Some(op) => {
                self.push(Quadruple::i1o1(op, src_var, dest_var));
                Ok(())
            }
            None => Err(CompilationError::new(format!(
                "cannot assign a value of type {}",
                dest_type.name()
            ))),
        }
    }

    fn create_loop(&mut self) -> (u32, String, String, String) {
        let current_loop = self.loop_structure_count;
        self.loop_structure_count += 1;
        self.loop_stack.push(current_loop);
        let prefix = format!("__MLOGEV_LOOP_{}", current_loop);
        (
            current_loop,
            format!("{}_START_", prefix),
            format!("{}_CONT_", prefix),
            format!("{}_END_", prefix),
        )
    }

    /// Merge `<cmp> a b t; if t != false goto L` into `if a <cmp> b goto L`.
    fn get_faster_conditional_jump(&mut self) {
        let temp;
        {
            let function = match &mut self.current {
                Some(function) => function,
                None => return,
            };
            let len = function.instructions.len();
            if len < 2 {
                return;
            }
            {
                let jumper = &function.instructions[len - 1];
                let cond_ir = &function.instructions[len - 2];
                if jumper.op != Op::If && jumper.op != Op::IfNot {
                    return;
                }
                if !cond_ir.op.is_comparison() {
                    return;
                }
                if jumper.src1 != cond_ir.dest {
                    return;
                }
            }
            let jumper = function.instructions.pop().unwrap();
            let cond_ir = function.instructions.pop().unwrap();
            temp = cond_ir.dest.clone();
            let relop = match cond_ir.op {
                Op::Bin(op, num) => (op, num),
                _ => unreachable!("checked to be a comparison"),
            };
            function.instructions.push(Quadruple::branch(
                jumper.op,
                cond_ir.src1,
                relop,
                cond_ir.src2,
                jumper.dest,
            ));
        }
        self.remove_temp_variable(&temp);
    }

    // --- items ---

    fn lower_item(&mut self, item: &Item) -> Result<(), CompilationError> {
        match item {
            Item::Typedef { name, ty } => {
                let mut target = ty.clone();
                let mut steps = 0;
                loop {
                    let next = match &target {
                        TypeName::Named(alias) => match self.typedefs.get(alias) {
                            Some(next) if next != &target => next.clone(),
                            _ => break,
                        },
                        _ => break,
                    };
                    target = next;
                    steps += 1;
                    if steps > 64 {
                        break;
                    }
                }
                self.typedefs.insert(name.clone(), target);
                Ok(())
            }
            Item::StructDef {
                name,
                fields,
                coord,
            } => self.lower_struct_def(name, fields, *coord),
            Item::Function { sig, body, coord } => match body {
                Some(body) => self.lower_function(sig, body, *coord),
                None => self.register_signature(sig, *coord),
            },
            Item::Declaration(declarators) => {
                for declarator in declarators {
                    self.lower_declarator(declarator)?;
                }
                Ok(())
            }
        }
    }

    fn lower_struct_def(
        &mut self,
        name: &str,
        fields: &[(String, TypeName)],
        coord: Coord,
    ) -> Result<(), CompilationError> {
        let mut items = HashMap::new();
        for (field_name, field_type) in fields {
            items.insert(field_name.clone(), self.resolve_type(field_type, coord)?);
        }
        match name {
            "MlogObject" => {
                self.mlog_object_items = items;
                Ok(())
            }
            "MLOG_BUILTINS" => {
                self.mlog_builtins_items = items;
                Ok(())
            }
            _ => Err(self.err("struct support is not implemented yet", coord)),
        }
    }

    fn build_signature(
        &self,
        sig: &FuncSig,
        coord: Coord,
    ) -> Result<Signature, CompilationError> {
        let result = self.resolve_type(&sig.result, coord)?;
        let mut params = Vec::new();
        for (name, ty) in &sig.params {
            let ty = self.resolve_type(ty, coord)?;
            // `f(void)` declares no parameters.
            if ty == CType::Void && name.is_none() {
                continue;
            }
            params.push((name.clone().unwrap_or_default(), ty));
        }
        let mut attributes = sig.attributes.clone();
        if attributes.is_empty() {
            attributes.push("default".to_string());
        }
        Ok(Signature {
            result,
            params,
            attributes,
        })
    }

    fn register_signature(&mut self, sig: &FuncSig, coord: Coord) -> Result<(), CompilationError> {
        let signature = self.build_signature(sig, coord)?;
        self.signatures.insert(sig.name.clone(), signature);
        Ok(())
    }

    fn lower_function(
        &mut self,
        sig: &FuncSig,
        body: &Stmt,
        coord: Coord,
    ) -> Result<(), CompilationError> {
        let signature = self.build_signature(sig, coord)?;
        self.signatures.insert(sig.name.clone(), signature.clone());

        let locals: HashMap<String, CType> = signature.params.iter().cloned().collect();
        self.current = Some(CurrentFunction {
            name: sig.name.clone(),
            result: signature.result,
            locals,
            vtmp_count: 0,
            instructions: Vec::new(),
            attributes: signature.attributes.clone(),
            params: signature.params.clone(),
        });

        let ir_attributes = signature.attributes.join(",");
        self.push(Quadruple::i1o1(Op::FuncBegin, sig.name.clone(), ir_attributes));
        if let Some(op) = choose_decl_instruction(signature.result) {
            self.push(Quadruple::o1(op, format!("result@{}", sig.name)));
        }
        self.lower_stmt(body)?;
        self.push(Quadruple::i1(Op::FuncEnd, sig.name.clone()));

        let finished = self.current.take().unwrap();
        let mut function = Function::new(
            finished.name,
            finished.result.var_type(),
            finished.attributes,
        );
        function.params = finished
            .params
            .iter()
            .filter_map(|(name, ty)| ty.var_type().map(|vt| (name.clone(), vt)))
            .collect();
        function.local_vars = finished
            .locals
            .iter()
            .filter_map(|(name, ty)| ty.var_type().map(|vt| (name.clone(), vt)))
            .collect();
        function.instructions = finished.instructions;
        match self.functions.iter_mut().find(|f| f.name == function.name) {
            Some(existing) => *existing = function,
            None => self.functions.push(function),
        }
        Ok(())
    }

    fn lower_declarator(&mut self, decl: &Declarator) -> Result<(), CompilationError> {
        // Pointer declarations are accepted syntactically and otherwise
        // ignored on this target.
        if decl.pointer {
            return Ok(());
        }
        let var_type = self.resolve_type(&decl.ty, decl.coord)?;
        if var_type == CType::Void {
            return Err(self.err("cannot declare a variable of type void", decl.coord));
        }
        self.declare_variable(&decl.name, var_type);
        let decorated = self.decorate_variable(&decl.name);
        if let Some(op) = choose_decl_instruction(var_type) {
            self.push(Quadruple::o1(op, decorated.clone()));
        }
        if let Some(init) = &decl.init {
            let (rvalue_type, rvalue) = self.lower_expr(init, None)?;
            let rvalue_after_cast = self.static_cast(rvalue, rvalue_type, var_type);
            self.heuristic_assign(&rvalue_after_cast, &decorated, var_type)
                .map_err(|e| self.locate(e, decl.coord))?;
        }
        Ok(())
    }

    // --- statements ---

    fn lower_stmt(&mut self, stmt: &Stmt) -> Result<(), CompilationError> {
        match &stmt.kind {
            StmtKind::Block(items) => {
                for item in items {
                    match item {
                        BlockItem::Decl(declarators) => {
                            for declarator in declarators {
                                self.lower_declarator(declarator)?;
                            }
                        }
                        BlockItem::StructDef {
                            name,
                            fields,
                            coord,
                        } => self.lower_struct_def(name, fields, *coord)?,
                        BlockItem::Stmt(inner) => self.lower_stmt(inner)?,
                    }
                }
                Ok(())
            }
            StmtKind::Expr(expr) => {
                self.lower_expr(expr, None)?;
                Ok(())
            }
            StmtKind::Empty => Ok(()),
            StmtKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                let label_prefix = format!("__MLOGEV_IFELSE_{}", self.if_structure_count);
                self.if_structure_count += 1;
                let iftrue_label = format!("{}_IFTRUE_", label_prefix);
                let iffalse_label = format!("{}_IFFALSE_", label_prefix);
                let end_label = format!("{}_END_", label_prefix);

                let dest_label = if else_branch.is_some() {
                    iffalse_label.clone()
                } else {
                    end_label.clone()
                };
                let labels = BranchLabels {
                    if_true: iftrue_label.clone(),
                    if_false: dest_label.clone(),
                };
                let (_, cond_var) = self.lower_expr(cond, Some(&labels))?;

                // The optimizer folds this `cond != false` test away.
                self.push(Quadruple::branch(
                    Op::IfNot,
                    cond_var,
                    RELOP_NE_I32,
                    "false",
                    dest_label,
                ));
                self.get_faster_conditional_jump();

                self.push(Quadruple::i1(Op::Label, iftrue_label));
                self.lower_stmt(then_branch)?;
                if let Some(else_branch) = else_branch {
                    self.push(Quadruple::i1(Op::Goto, end_label.clone()));
                    self.push(Quadruple::i1(Op::Label, iffalse_label));
                    self.lower_stmt(else_branch)?;
                }
                self.push(Quadruple::i1(Op::Label, end_label));
                Ok(())
            }
            StmtKind::While { cond, body } => {
                let (_, start_label, cont_label, end_label) = self.create_loop();
                self.push(Quadruple::i1(Op::Goto, cont_label.clone()));
                self.push(Quadruple::i1(Op::Label, start_label.clone()));
                self.lower_stmt(body)?;
                self.push(Quadruple::i1(Op::Label, cont_label));
                let (_, cond_var) = self.lower_expr(cond, None)?;
                self.push(Quadruple::branch(
                    Op::If,
                    cond_var,
                    RELOP_NE_I32,
                    "false",
                    start_label,
                ));
                self.get_faster_conditional_jump();
                self.push(Quadruple::i1(Op::Label, end_label));
                self.loop_stack.pop();
                Ok(())
            }
            StmtKind::DoWhile { body, cond } => {
                let (_, start_label, cont_label, end_label) = self.create_loop();
                self.push(Quadruple::i1(Op::Label, start_label.clone()));
                self.lower_stmt(body)?;
                self.push(Quadruple::i1(Op::Label, cont_label));
                let (_, cond_var) = self.lower_expr(cond, None)?;
                self.push(Quadruple::branch(
                    Op::If,
                    cond_var,
                    RELOP_NE_I32,
                    "false",
                    start_label,
                ));
                self.get_faster_conditional_jump();
                self.push(Quadruple::i1(Op::Label, end_label));
                self.loop_stack.pop();
                Ok(())
            }
            StmtKind::For {
                init,
                cond,
                step,
                body,
            } => {
                let (current_loop, start_label, cont_label, end_label) = self.create_loop();
                let afterinit_label = format!("__MLOGEV_LOOP_{}_AFTERINIT_", current_loop);
                match init {
                    Some(ForInit::Decl(declarators)) => {
                        for declarator in declarators {
                            self.lower_declarator(declarator)?;
                        }
                    }
                    Some(ForInit::Expr(expr)) => {
                        self.lower_expr(expr, None)?;
                    }
                    None => {}
                }
                self.push(Quadruple::i1(Op::Goto, afterinit_label.clone()));
                self.push(Quadruple::i1(Op::Label, start_label.clone()));
                self.lower_stmt(body)?;
                self.push(Quadruple::i1(Op::Label, cont_label));
                if let Some(step) = step {
                    self.lower_expr(step, None)?;
                }
                self.push(Quadruple::i1(Op::Label, afterinit_label));
                let cond = cond.as_ref().ok_or_else(|| {
                    self.err("for loop without a condition is not supported", stmt.coord)
                })?;
                let (_, cond_var) = self.lower_expr(cond, None)?;
                self.push(Quadruple::branch(
                    Op::If,
                    cond_var,
                    RELOP_NE_I32,
                    "false",
                    start_label,
                ));
                self.get_faster_conditional_jump();
                self.push(Quadruple::i1(Op::Label, end_label));
                self.loop_stack.pop();
                Ok(())
            }
            StmtKind::Break => {
                // TODO: break currently shares the continue target; check
                // whether any shipped program relies on it before retargeting
                // to the loop end label.
                let current_loop = *self
                    .loop_stack
                    .last()
                    .ok_or_else(|| self.err("break outside of a loop", stmt.coord))?;
                self.push(Quadruple::i1(
                    Op::Goto,
                    format!("__MLOGEV_LOOP_{}_CONT_", current_loop),
                ));
                Ok(())
            }
            StmtKind::Continue => {
                let current_loop = *self
                    .loop_stack
                    .last()
                    .ok_or_else(|| self.err("continue outside of a loop", stmt.coord))?;
                self.push(Quadruple::i1(
                    Op::Goto,
                    format!("__MLOGEV_LOOP_{}_CONT_", current_loop),
                ));
                Ok(())
            }
            StmtKind::Goto(label) => {
                self.push(Quadruple::i1(Op::Goto, label.clone()));
                Ok(())
            }
            StmtKind::Label(label, inner) => {
                self.push(Quadruple::i1(Op::Label, label.clone()));
                self.lower_stmt(inner)
            }
            StmtKind::Return(expr) => {
                let (function_name, result_type) = match &self.current {
                    Some(function) => (function.name.clone(), function.result),
                    None => return Err(self.err("return outside of a function", stmt.coord)),
                };
                if let Some(expr) = expr {
                    let (r_type, r_var) = self.lower_expr(expr, None)?;
                    let result = self.static_cast(r_var, r_type, result_type);
                    let dest = format!("result@{}", function_name);
                    self.heuristic_assign(&result, &dest, result_type)
                        .map_err(|e| self.locate(e, stmt.coord))?;
                }
                self.push(Quadruple::i1(Op::Return, function_name));
                Ok(())
            }
            StmtKind::Asm(asm) => self.lower_asm(asm),
        }
    }

    fn lower_asm(&mut self, asm: &AsmBlock) -> Result<(), CompilationError> {
        let mut result_ir = Quadruple::new(Op::Asm {
            volatile: asm.volatile,
        });
        result_ir.raw_instructions = asm.template.clone();
        for operand in &asm.inputs {
            let (_, var_name) = self.lower_expr(&operand.expr, None)?;
            result_ir.input_vars.push(var_name);
        }
        for operand in &asm.outputs {
            let (_, var_name) = self.lower_expr(&operand.expr, None)?;
            // A leading `+` marks the operand as read-write.
            if operand.constraint.starts_with('+') {
                result_ir.input_vars.push(var_name.clone());
            }
            result_ir.output_vars.push(var_name);
        }
        self.push(result_ir);
        Ok(())
    }

    // --- expressions ---

    /// Lower one expression, returning its type and the name or literal
    /// holding its value. `branch` carries the enclosing branch-condition
    /// labels for short-circuit lowering.
    fn lower_expr(
        &mut self,
        expr: &Expr,
        branch: Option<&BranchLabels>,
    ) -> Result<(CType, String), CompilationError> {
        match &expr.kind {
            ExprKind::IntConst(text) => Ok((CType::Int, text.clone())),
            ExprKind::FloatConst { text, single } => {
                let ty = if *single { CType::Float } else { CType::Double };
                let value = text
                    .parse::<f64>()
                    .map(|v| format!("{:?}", v))
                    .unwrap_or_else(|_| text.clone());
                Ok((ty, value))
            }
            // Strings live in object slots of the target runtime.
            ExprKind::StringConst(text) => Ok((CType::MlogObject, text.clone())),
            ExprKind::Id(name) => {
                if self.current.is_some() && name == FUNCTION_RETURN_VALUE {
                    let function = self.current.as_ref().unwrap();
                    return Ok((function.result, format!("result@{}", function.name)));
                }
                self.get_variable(name, expr.coord)
            }
            ExprKind::Comma(exprs) => {
                let mut last = None;
                for inner in exprs {
                    last = Some(self.lower_expr(inner, None)?);
                }
                last.ok_or_else(|| self.err("empty expression list", expr.coord))
            }
            ExprKind::Cast { to, expr: inner } => {
                let (src_type, src_var) = self.lower_expr(inner, None)?;
                let dst_type = self.resolve_type(to, expr.coord)?;
                // Objects can hold any arithmetic value directly.
                if src_type == dst_type || dst_type == CType::MlogObject {
                    return Ok((src_type, src_var));
                }
                let result_var = self.static_cast(src_var, src_type, dst_type);
                Ok((dst_type, result_var))
            }
            ExprKind::Unary { op, expr: inner } => self.lower_unary(*op, inner, expr.coord),
            ExprKind::Binary { op, lhs, rhs } => match op {
                BinaryOp::LogicalAnd | BinaryOp::LogicalOr => {
                    self.lower_logical(*op, lhs, rhs, branch)
                }
                _ => {
                    let (l_type, l_var) = self.lower_expr(lhs, None)?;
                    let (r_type, r_var) = self.lower_expr(rhs, None)?;
                    let (result_type, inst) = choose_binaryop_instruction(*op, l_type, r_type)
                        .map_err(|reason| self.err(reason, expr.coord))?;
                    let result_var = self.create_temp_variable(result_type);
                    self.push(Quadruple::i2o1(inst, l_var, r_var, result_var.clone()));
                    Ok((result_type, result_var))
                }
            },
            ExprKind::Assign {
                op,
                lvalue,
                rvalue,
            } => self.lower_assignment(*op, lvalue, rvalue, expr.coord),
            ExprKind::Call { callee, args } => self.lower_call(callee, args, expr.coord),
            ExprKind::Member { base, field } => self.lower_member(base, field, expr.coord),
        }
    }

    fn lower_unary(
        &mut self,
        op: UnaryOp,
        inner: &Expr,
        coord: Coord,
    ) -> Result<(CType, String), CompilationError> {
        let (var_type, var_name) = self.lower_expr(inner, None)?;
        match op {
            UnaryOp::Minus | UnaryOp::BitNot => {
                let (result_type, inst) = choose_unaryop_instruction(op, var_type)
                    .map_err(|reason| self.err(reason, coord))?;
                let result_var = self.create_temp_variable(result_type);
                self.push(Quadruple::i1o1(inst, var_name, result_var.clone()));
                Ok((result_type, result_var))
            }
            UnaryOp::PreInc | UnaryOp::PreDec | UnaryOp::PostInc | UnaryOp::PostDec => {
                let mut result_var = var_name.clone();
                if op == UnaryOp::PostInc || op == UnaryOp::PostDec {
                    // Postincrement keeps the old value around.
                    let copy_var = self.create_temp_variable(var_type);
                    match choose_set_instruction(var_type) {
                        Some(set_op) => self.push(Quadruple::i1o1(
                            set_op,
                            var_name.clone(),
                            copy_var.clone(),
                        )),
                        None => {
                            return Err(self.err(
                                format!("type {} cannot be incremented", var_type.name()),
                                coord,
                            ))
                        }
                    }
                    result_var = copy_var;
                }
                let step = if op == UnaryOp::PreInc || op == UnaryOp::PostInc {
                    BinaryOp::Add
                } else {
                    BinaryOp::Sub
                };
                let (_, inst) = choose_binaryop_instruction(step, var_type, var_type)
                    .map_err(|reason| self.err(reason, coord))?;
                self.push(Quadruple::i2o1(inst, var_name.clone(), "1", var_name));
                Ok((var_type, result_var))
            }
            UnaryOp::LogicalNot => {
                let (_, inst) = choose_binaryop_instruction(BinaryOp::Eq, var_type, var_type)
                    .map_err(|reason| self.err(reason, coord))?;
                let result_var = self.create_temp_variable(CType::Int);
                self.push(Quadruple::i2o1(inst, var_name, "0", result_var.clone()));
                Ok((CType::Int, result_var))
            }
            UnaryOp::Plus => Ok((var_type, var_name)),
        }
    }

    /// Short-circuit `&&`/`||`. Inside a branch condition the operands jump
    /// straight at the branch labels; in value position the result is
    /// materialized through minted labels.
    fn lower_logical(
        &mut self,
        op: BinaryOp,
        lhs: &Expr,
        rhs: &Expr,
        branch: Option<&BranchLabels>,
    ) -> Result<(CType, String), CompilationError> {
        if let Some(labels) = branch {
            // The left operand may keep the branch context only across a
            // chain of the same operator; a mixed operator must produce a
            // value first.
            let chained = matches!(&lhs.kind, ExprKind::Binary { op: inner, .. } if *inner == op);
            let left_branch = if chained { Some(labels) } else { None };
            let (_, left_var) = self.lower_expr(lhs, left_branch)?;
            match op {
                BinaryOp::LogicalAnd => self.push(Quadruple::branch(
                    Op::IfNot,
                    left_var,
                    RELOP_NE_I32,
                    "false",
                    labels.if_false.clone(),
                )),
                _ => self.push(Quadruple::branch(
                    Op::If,
                    left_var,
                    RELOP_NE_I32,
                    "false",
                    labels.if_true.clone(),
                )),
            }
            return self.lower_expr(rhs, Some(labels));
        }

        self.short_circuit_count += 1;
        let prefix = format!("__MLOGEV_SCE_{}", self.short_circuit_count);
        let iftrue_label = format!("{}_IFTRUE_", prefix);
        let iffalse_label = format!("{}_IFFALSE_", prefix);
        let end_label = format!("{}_END_", prefix);
        let result_var = self.create_temp_variable(CType::Int);

        let (_, left_var) = self.lower_expr(lhs, None)?;
        match op {
            BinaryOp::LogicalAnd => {
                self.push(Quadruple::branch(
                    Op::IfNot,
                    left_var,
                    RELOP_NE_I32,
                    "false",
                    iffalse_label.clone(),
                ));
                let (_, right_var) = self.lower_expr(rhs, None)?;
                self.push(Quadruple::branch(
                    Op::IfNot,
                    right_var,
                    RELOP_NE_I32,
                    "false",
                    iffalse_label.clone(),
                ));
                self.push(Quadruple::i1(Op::Label, iftrue_label));
                self.push(Quadruple::i1o1(Op::Set(VarType::I32), "1", result_var.clone()));
                self.push(Quadruple::i1(Op::Goto, end_label.clone()));
                self.push(Quadruple::i1(Op::Label, iffalse_label));
                self.push(Quadruple::i1o1(Op::Set(VarType::I32), "0", result_var.clone()));
                self.push(Quadruple::i1(Op::Label, end_label));
            }
            _ => {
                self.push(Quadruple::branch(
                    Op::If,
                    left_var,
                    RELOP_NE_I32,
                    "false",
                    iftrue_label.clone(),
                ));
                let (_, right_var) = self.lower_expr(rhs, None)?;
                self.push(Quadruple::branch(
                    Op::If,
                    right_var,
                    RELOP_NE_I32,
                    "false",
                    iftrue_label.clone(),
                ));
                self.push(Quadruple::i1(Op::Label, iffalse_label));
                self.push(Quadruple::i1o1(Op::Set(VarType::I32), "0", result_var.clone()));
                self.push(Quadruple::i1(Op::Goto, end_label.clone()));
                self.push(Quadruple::i1(Op::Label, iftrue_label));
                self.push(Quadruple::i1o1(Op::Set(VarType::I32), "1", result_var.clone()));
                self.push(Quadruple::i1(Op::Label, end_label));
            }
        }
        Ok((CType::Int, result_var))
    }

    fn lower_assignment(
        &mut self,
        op: Option<BinaryOp>,
        lvalue: &Expr,
        rvalue: &Expr,
        coord: Coord,
    ) -> Result<(CType, String), CompilationError> {
        let lvalue_name = match &lvalue.kind {
            ExprKind::Id(name) => name.clone(),
            _ => {
                return Err(self.err("only plain variables can be assigned to", lvalue.coord))
            }
        };
        let (lvalue_type, lvalue_decorated) = self.get_variable(&lvalue_name, lvalue.coord)?;
        let (rvalue_type, rvalue_var) = self.lower_expr(rvalue, None)?;
        match op {
            None => {
                let rvalue_after_cast = self.static_cast(rvalue_var, rvalue_type, lvalue_type);
                self.heuristic_assign(&rvalue_after_cast, &lvalue_decorated, lvalue_type)
                    .map_err(|e| self.locate(e, coord))?;
                Ok((lvalue_type, lvalue_decorated))
            }
            Some(binary_op) => {
                let (result_type, inst) =
                    choose_binaryop_instruction(binary_op, lvalue_type, rvalue_type)
                        .map_err(|reason| self.err(reason, coord))?;
                if result_type == lvalue_type {
                    self.push(Quadruple::i2o1(
                        inst,
                        lvalue_decorated.clone(),
                        rvalue_var,
                        lvalue_decorated.clone(),
                    ));
                    return Ok((lvalue_type, lvalue_decorated));
                }
                let temp_var = self.create_temp_variable(result_type);
                self.push(Quadruple::i2o1(
                    inst,
                    lvalue_decorated.clone(),
                    rvalue_var,
                    temp_var.clone(),
                ));
                let temp_after_cast = self.static_cast(temp_var, result_type, lvalue_type);
                self.heuristic_assign(&temp_after_cast, &lvalue_decorated, lvalue_type)
                    .map_err(|e| self.locate(e, coord))?;
                Ok((lvalue_type, lvalue_decorated))
            }
        }
    }

    fn lower_call(
        &mut self,
        callee: &Expr,
        args: &[Expr],
        coord: Coord,
    ) -> Result<(CType, String), CompilationError> {
        let function_name = match &callee.kind {
            ExprKind::Id(name) => name.clone(),
            _ => return Err(self.err("called object is not a function name", callee.coord)),
        };

        // The print builtin turns into one volatile asm block, one print
        // line per argument.
        if function_name == "print" {
            let mut asm_ir = Quadruple::new(Op::Asm { volatile: true });
            for arg in args {
                let (_, arg_var) = self.lower_expr(arg, None)?;
                asm_ir.raw_instructions.push(format!("print {}", arg_var));
                asm_ir.input_vars.push(arg_var);
            }
            self.push(asm_ir);
            return Ok((CType::Void, String::new()));
        }

        let signature = match self.signatures.get(&function_name) {
            Some(signature) => signature.clone(),
            None => {
                return Err(self.err(
                    format!("{} is not a function (or not declared)", function_name),
                    coord,
                ))
            }
        };
        for ((param_name, param_type), arg) in signature.params.iter().zip(args) {
            let param_realname = format!("_{}@{}", param_name, function_name);
            let (arg_type, arg_var) = self.lower_expr(arg, None)?;
            let real_argument = if arg_type != *param_type {
                self.static_cast(arg_var, arg_type, *param_type)
            } else {
                arg_var
            };
            self.heuristic_assign(&real_argument, &param_realname, *param_type)
                .map_err(|e| self.locate(e, coord))?;
        }
        self.push(Quadruple::i1(Op::Call, function_name.clone()));
        if let Some(op) = choose_decl_instruction(signature.result) {
            self.push(Quadruple::o1(op, format!("result@{}", function_name)));
        }
        Ok((signature.result, format!("result@{}", function_name)))
    }

    fn lower_member(
        &mut self,
        base: &Expr,
        field: &str,
        coord: Coord,
    ) -> Result<(CType, String), CompilationError> {
        let (base_type, base_var) = self.lower_expr(base, None)?;
        match base_type {
            CType::MlogObject => {
                let result_type = match self.mlog_object_items.get(field) {
                    Some(&ty) => ty,
                    None => {
                        return Err(self.err(
                            format!("`struct MlogObject` does not have field `{}`", field),
                            coord,
                        ))
                    }
                };
                let result_var = self.create_temp_variable(result_type);
                let mut asm_ir = Quadruple::new(Op::Asm { volatile: false });
                asm_ir
                    .raw_instructions
                    .push(format!("sensor %0 %1 {}", convert_field_name(field)));
                asm_ir.input_vars.push(base_var);
                asm_ir.output_vars.push(result_var.clone());
                self.push(asm_ir);
                Ok((result_type, result_var))
            }
            CType::MlogBuiltins => {
                let result_type = match self.mlog_builtins_items.get(field) {
                    Some(&ty) => ty,
                    None => {
                        return Err(self.err(
                            format!("`struct MLOG_BUILTINS` does not have field `{}`", field),
                            coord,
                        ))
                    }
                };
                self.referred_builtins_items.insert(field.to_string());
                Ok((result_type, convert_field_name(field)))
            }
            _ => Err(self.err(
                "attempted to access a field of a non-struct value",
                coord,
            )),
        }
    }
}
