//! Optimization pass registry.
//!
//! Passes are declared once in the [`OPTIMIZERS`] table and selected by the
//! backend builder from the optimize level and the `-f`/`-m` flag lists. A
//! lower rank runs earlier; a pass registered at optimize level `L` is
//! enabled by default at every level `>= L`.

pub mod lcse;
pub mod passes;

use std::collections::HashMap;

use crate::block::BasicBlock;
use crate::function::Function;
use crate::quadruple::VarType;

/// Read-only facts block-scoped passes need beside the block itself.
pub struct PassContext<'a> {
    pub function_name: &'a str,
    pub variable_types: &'a HashMap<String, VarType>,
}

/// Target scope of a pass, fused with its entry point.
#[derive(Clone, Copy)]
pub enum PassRun {
    Function(fn(&mut Function)),
    BasicBlock(fn(&mut BasicBlock, &PassContext)),
}

pub struct PassDescriptor {
    pub name: &'static str,
    pub machine_dependent: bool,
    pub rank: u32,
    pub optimize_level: u32,
    pub run: PassRun,
}

/// Level 4 is reserved for passes that are never enabled by default.
pub static OPTIMIZERS: &[PassDescriptor] = &[
    PassDescriptor {
        name: "remove-unused-labels",
        machine_dependent: false,
        rank: 1,
        optimize_level: 1,
        run: PassRun::Function(passes::remove_unused_labels),
    },
    PassDescriptor {
        name: "deduplicate-tail-return",
        machine_dependent: false,
        rank: 1,
        optimize_level: 1,
        run: PassRun::Function(passes::deduplicate_tail_return),
    },
    PassDescriptor {
        name: "reorder-decls",
        machine_dependent: false,
        rank: 2,
        optimize_level: 0,
        run: PassRun::Function(passes::reorder_decls),
    },
    PassDescriptor {
        name: "lcse",
        machine_dependent: false,
        rank: 10,
        optimize_level: 1,
        run: PassRun::BasicBlock(lcse::eliminate_local_common_subexpressions),
    },
    PassDescriptor {
        name: "remove-unused-variables",
        machine_dependent: false,
        rank: 20,
        optimize_level: 1,
        run: PassRun::Function(passes::remove_unused_variables),
    },
];

/// Resolve the enabled passes, in execution order. `-f name` enables a pass
/// below its default level, `-f no-name` disables it; machine-dependent
/// passes are toggled through the `-m` list instead.
pub fn select_passes(
    machine_dependents: &[String],
    machine_independents: &[String],
    optimize_level: u32,
) -> Vec<&'static PassDescriptor> {
    let mut selected: Vec<&'static PassDescriptor> = OPTIMIZERS
        .iter()
        .filter(|descriptor| {
            let options = if descriptor.machine_dependent {
                machine_dependents
            } else {
                machine_independents
            };
            let disabled = options
                .iter()
                .any(|option| option.strip_prefix("no-") == Some(descriptor.name));
            let enabled = descriptor.optimize_level <= optimize_level
                || options.iter().any(|option| option == descriptor.name);
            enabled && !disabled
        })
        .collect();
    selected.sort_by_key(|descriptor| descriptor.rank);
    selected
}
