//! Backend driver: optimization dispatch, inlining, layout and emission.

use std::collections::HashMap;
use std::str::FromStr;

use crate::block::{dump_basic_blocks, get_basic_blocks};
use crate::function::Function;
use crate::inline::{filter_inlineable_functions, inline_calls};
use crate::optimizer::{select_passes, PassContext, PassDescriptor, PassRun};
use crate::output::ir::IrDumper;
use crate::output::mlog::IrToMlogConverter;
use crate::output::IrConverter;
use crate::quadruple::{Quadruple, VarType};
use crate::template::expand_asm_templates;

/// What the frontend hands to the backend: global initialization
/// instructions plus every function in definition order.
#[derive(Debug)]
pub struct FrontendResult {
    pub global_instructions: Vec<Quadruple>,
    pub functions: Vec<Function>,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Arch {
    Mlog,
}

impl Arch {
    /// Value of the `MLOGEV_ARCH` macro injected into the preprocessor run.
    pub fn id(self) -> u32 {
        match self {
            Arch::Mlog => 1,
        }
    }
}

impl FromStr for Arch {
    type Err = String;

    fn from_str(s: &str) -> Result<Arch, String> {
        match s {
            "mlog" => Ok(Arch::Mlog),
            _ => Err(format!("unknown architecture `{}`", s)),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Target {
    Mlog,
    MlogevIr,
}

impl FromStr for Target {
    type Err = String;

    fn from_str(s: &str) -> Result<Target, String> {
        match s {
            "mlog" => Ok(Target::Mlog),
            "mlogev_ir" => Ok(Target::MlogevIr),
            _ => Err(format!("unknown target `{}`", s)),
        }
    }
}

pub struct Backend {
    pub arch: Arch,
    pub target: Target,
    passes: Vec<&'static PassDescriptor>,
    output: Box<dyn IrConverter>,
}

impl Backend {
    /// Optimize, inline, lay out and emit one compiled translation unit.
    pub fn compile(&self, frontend_result: FrontendResult, dump_blocks: bool) -> String {
        let FrontendResult {
            global_instructions: inits,
            functions,
        } = frontend_result;

        let mut variable_types: HashMap<String, VarType> = HashMap::new();
        read_variable_types(&inits, &mut variable_types);
        for function in &functions {
            read_variable_types(&function.instructions, &mut variable_types);
        }

        let (mut inline_functions, mut common_functions) = filter_inlineable_functions(functions);
        for function in &mut inline_functions {
            self.run_optimize_passes(function, &variable_types, dump_blocks);
        }
        let inline_map: HashMap<String, &Function> = inline_functions
            .iter()
            .map(|function| (function.name.clone(), function))
            .collect();
        for function in &mut common_functions {
            let body = std::mem::replace(&mut function.instructions, Vec::new());
            function.instructions = inline_calls(&function.name, body, &inline_map);
            self.run_optimize_passes(function, &variable_types, dump_blocks);
        }

        // Layout: globals first, then main, then the rest in definition order.
        let mut ir_list = inits;
        if let Some(main) = common_functions.iter().find(|f| f.name == "main") {
            ir_list.extend(main.instructions.iter().cloned());
        }
        for function in &common_functions {
            if function.name == "main" {
                continue;
            }
            ir_list.extend(function.instructions.iter().cloned());
        }

        if self.target != Target::MlogevIr {
            expand_asm_templates(&mut ir_list);
        }
        self.output.convert(&ir_list)
    }

    fn run_optimize_passes(
        &self,
        function: &mut Function,
        variable_types: &HashMap<String, VarType>,
        dump_blocks: bool,
    ) {
        for pass in &self.passes {
            match pass.run {
                PassRun::Function(run) => run(function),
                PassRun::BasicBlock(run) => {
                    let body = std::mem::replace(&mut function.instructions, Vec::new());
                    let mut blocks = get_basic_blocks(body);
                    let context = PassContext {
                        function_name: &function.name,
                        variable_types,
                    };
                    for block in &mut blocks {
                        run(block, &context);
                    }
                    function.instructions = blocks
                        .into_iter()
                        .flat_map(|block| block.instructions)
                        .collect();
                }
            }
        }
        if dump_blocks {
            let blocks = get_basic_blocks(function.instructions.clone());
            let stderr = std::io::stderr();
            dump_basic_blocks(&mut stderr.lock(), &function.name, &blocks);
        }
    }
}

/// Every variable's IR type, recovered from the tag suffix of the
/// instructions writing it. Precomputed once so block passes can mint typed
/// copy instructions.
pub fn read_variable_types(ir_list: &[Quadruple], result: &mut HashMap<String, VarType>) {
    for ir in ir_list {
        if ir.dest.is_empty() {
            continue;
        }
        if let Some(var_type) = ir.op.var_type() {
            result.insert(ir.dest.clone(), var_type);
        }
    }
}

pub fn make_backend(
    arch: Arch,
    target: Target,
    machine_dependents: &[String],
    machine_independents: &[String],
    optimize_level: u32,
) -> Backend {
    let output: Box<dyn IrConverter> = match target {
        Target::Mlog => Box::new(IrToMlogConverter::new(
            machine_dependents.iter().any(|m| m == "strict-32bit"),
            machine_dependents.iter().any(|m| m == "keep-labels"),
        )),
        Target::MlogevIr => Box::new(IrDumper),
    };
    Backend {
        arch,
        target,
        passes: select_passes(machine_dependents, machine_independents, optimize_level),
        output,
    }
}
