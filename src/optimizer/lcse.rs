//! Local common-subexpression elimination.
//!
//! One basic block is converted into an expression DAG that tracks variable
//! versions and copy aliases, then regenerated in topological order with only
//! the reachable nodes surviving. Everything live out of the block (the
//! current version of each name, the terminator's operands, outgoing call
//! argument slots) keeps its observable value.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};

use log::debug;

use crate::block::BasicBlock;
use crate::optimizer::PassContext;
use crate::quadruple::{Arity, Op, OperandKind, Quadruple};

/// Safety valve for alias/set-chain walks. A longer walk means a cycle.
const MAX_TRAVERSAL_STEPS: usize = 1_000_000;

#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
struct VersionedVar {
    name: String,
    version: u32,
}

impl VersionedVar {
    fn new<S: Into<String>>(name: S, version: u32) -> VersionedVar {
        VersionedVar {
            name: name.into(),
            version,
        }
    }
}

struct DagNode {
    id: usize,
    /// `None` marks a value that exists before this block.
    op: Option<Op>,
    /// `(node id, output index)` per input, in operand order.
    depends: Vec<(usize, usize)>,
    rdepends: Vec<usize>,
    provides: Vec<VersionedVar>,
    /// For outside-source nodes: the versioned name the value lives in.
    origin: Option<VersionedVar>,
    /// Kept for asm blocks and the block terminator.
    original: Option<Quadruple>,
}

struct Lcse<'a> {
    ctx: &'a PassContext<'a>,
    callee: String,
    nodes: Vec<DagNode>,
    provider: HashMap<VersionedVar, (usize, usize)>,
    version: HashMap<String, u32>,
    aliases: HashMap<VersionedVar, VersionedVar>,
    op_cache: HashMap<(Op, VersionedVar, VersionedVar), usize>,
}

pub fn eliminate_local_common_subexpressions(block: &mut BasicBlock, ctx: &PassContext) {
    if block.instructions.is_empty() {
        return;
    }
    debug!(
        "lcse: block {} of `{}`, {} instructions",
        block.id,
        ctx.function_name,
        block.instructions.len()
    );

    let mut instructions = std::mem::replace(&mut block.instructions, Vec::new());
    let ending = match instructions.last() {
        Some(tail) if tail.op.is_block_exit() => instructions.pop(),
        _ => None,
    };
    let callee = match &ending {
        Some(tail) if tail.op == Op::Call => tail.src1.clone(),
        _ => String::new(),
    };

    let mut state = Lcse {
        ctx,
        callee,
        nodes: Vec::new(),
        provider: HashMap::new(),
        version: HashMap::new(),
        aliases: HashMap::new(),
        op_cache: HashMap::new(),
    };

    let mut head: Vec<Quadruple> = Vec::new();
    for ir in instructions {
        if ir.op.is_block_entrance() || ir.op.is_decl() || ir.op == Op::Noop {
            head.push(ir);
            continue;
        }
        match ir.op {
            Op::Asm { .. } => state.add_asm(ir),
            Op::Set(_) => state.add_set(ir),
            _ => state.add_operation(ir),
        }
    }
    let ending_id = ending.map(|tail| state.add_ending(tail));

    let groups = state.adjust_aliases();
    state.rewrite_provides();
    let alive = state.detect_alive_nodes(ending_id);
    let emitted = state.regenerate(&alive, ending_id, &groups);

    block.instructions = head;
    block.instructions.extend(emitted);
}

impl<'a> Lcse<'a> {
    fn current(&mut self, name: &str) -> VersionedVar {
        let version = *self.version.entry(name.to_string()).or_insert(0);
        VersionedVar::new(name, version)
    }

    fn next_version(&mut self, name: &str) -> VersionedVar {
        let version = *self.version.entry(name.to_string()).or_insert(0);
        VersionedVar::new(name, version + 1)
    }

    fn commit(&mut self, var: &VersionedVar) {
        self.version.insert(var.name.clone(), var.version);
    }

    /// Follow the alias chain to its root, compressing the path.
    fn resolve(&mut self, var: VersionedVar) -> VersionedVar {
        let mut chain = Vec::new();
        let mut cursor = var;
        while let Some(next) = self.aliases.get(&cursor) {
            if *next == cursor {
                break;
            }
            chain.push(cursor.clone());
            cursor = next.clone();
            if chain.len() > MAX_TRAVERSAL_STEPS {
                panic!("cycle detected in LCSE alias resolution at {:?}", cursor);
            }
        }
        for link in chain {
            self.aliases.insert(link, cursor.clone());
        }
        cursor
    }

    /// Node and output slot holding the value of `var`, creating an
    /// outside-source node for values this block never defines. Plain copy
    /// nodes are looked through so consumers reach the value's origin.
    fn find_node(&mut self, var: VersionedVar) -> (usize, usize) {
        let var = self.resolve(var);
        let mut slot = match self.provider.get(&var) {
            Some(&slot) => slot,
            None => {
                let id = self.nodes.len();
                self.nodes.push(DagNode {
                    id,
                    op: None,
                    depends: Vec::new(),
                    rdepends: Vec::new(),
                    provides: vec![var.clone()],
                    origin: Some(var.clone()),
                    original: None,
                });
                self.provider.insert(var, (id, 0));
                return (id, 0);
            }
        };
        let mut steps = 0usize;
        loop {
            let node = &self.nodes[slot.0];
            let is_copy = match node.op {
                Some(Op::Set(_)) => !node.depends.is_empty(),
                _ => false,
            };
            if !is_copy {
                return slot;
            }
            slot = node.depends[0];
            steps += 1;
            if steps > MAX_TRAVERSAL_STEPS {
                panic!("too many steps while walking copy chains in LCSE");
            }
        }
    }

    fn add_asm(&mut self, ir: Quadruple) {
        let mut depends = Vec::with_capacity(ir.input_vars.len());
        for input in &ir.input_vars {
            let current = self.current(input);
            depends.push(self.find_node(current));
        }
        let id = self.nodes.len();
        let mut provides = Vec::with_capacity(ir.output_vars.len());
        let op = ir.op;
        let output_vars = ir.output_vars.clone();
        self.nodes.push(DagNode {
            id,
            op: Some(op),
            depends,
            rdepends: Vec::new(),
            provides: Vec::new(),
            origin: None,
            original: Some(ir),
        });
        for (position, output) in output_vars.iter().enumerate() {
            let new_output = self.next_version(output);
            self.commit(&new_output);
            self.provider.insert(new_output.clone(), (id, position));
            provides.push(new_output);
        }
        self.nodes[id].provides = provides;
    }

    fn add_set(&mut self, ir: Quadruple) {
        let new_dest = self.next_version(&ir.dest);
        let call_sacred =
            !self.callee.is_empty() && ir.dest.ends_with(&format!("@{}", self.callee));
        if ir.src1_kind == OperandKind::Variable && !call_sacred {
            let source = self.current(&ir.src1);
            let slot = self.find_node(source.clone());
            let root = self.resolve(source);
            self.provider.insert(new_dest.clone(), slot);
            self.aliases.insert(new_dest.clone(), root);
            self.commit(&new_dest);
            return;
        }
        // An immediate source or an outgoing argument slot keeps a real copy.
        let source = if ir.src1_kind == OperandKind::Variable {
            self.current(&ir.src1)
        } else {
            VersionedVar::new(ir.src1.clone(), 0)
        };
        let slot = self.find_node(source);
        let id = self.nodes.len();
        self.nodes.push(DagNode {
            id,
            op: Some(ir.op),
            depends: vec![slot],
            rdepends: Vec::new(),
            provides: vec![new_dest.clone()],
            origin: None,
            original: None,
        });
        self.provider.insert(new_dest.clone(), (id, 0));
        self.commit(&new_dest);
    }

    fn add_operation(&mut self, ir: Quadruple) {
        let new_dest = self.next_version(&ir.dest);
        let src1 = {
            let current = self.current(&ir.src1);
            self.resolve(current)
        };
        let src2 = {
            let current = self.current(&ir.src2);
            self.resolve(current)
        };
        let key = (ir.op, src1.clone(), src2.clone());
        match self.op_cache.get(&key) {
            Some(&cached) => {
                debug!(
                    "lcse: reusing node {} for {} {:?} {:?}",
                    cached, ir.op, src1, src2
                );
                let target = self.nodes[cached].provides[0].clone();
                self.aliases.insert(new_dest.clone(), target);
                self.provider.insert(new_dest.clone(), (cached, 0));
            }
            None => {
                let mut depends = vec![self.find_node(src1)];
                if ir.op.arity() == Arity::I2O1 {
                    depends.push(self.find_node(src2));
                }
                let id = self.nodes.len();
                self.nodes.push(DagNode {
                    id,
                    op: Some(ir.op),
                    depends,
                    rdepends: Vec::new(),
                    provides: vec![new_dest.clone()],
                    origin: None,
                    original: None,
                });
                self.provider.insert(new_dest.clone(), (id, 0));
                self.op_cache.insert(key, id);
            }
        }
        self.commit(&new_dest);
    }

    /// The block terminator becomes the designated ending node; every other
    /// node later gains a reverse edge to it so it is regenerated last.
    fn add_ending(&mut self, ir: Quadruple) -> usize {
        let mut depends = Vec::new();
        match ir.op {
            Op::If | Op::IfNot => {
                if ir.src1_kind == OperandKind::Variable {
                    let current = self.current(&ir.src1);
                    depends.push(self.find_node(current));
                }
                if ir.src2_kind == OperandKind::Variable {
                    let current = self.current(&ir.src2);
                    depends.push(self.find_node(current));
                }
            }
            Op::Asm { .. } => {
                for input in ir.input_vars.clone() {
                    let current = self.current(&input);
                    depends.push(self.find_node(current));
                }
            }
            _ => {}
        }
        let id = self.nodes.len();
        let output_vars = ir.output_vars.clone();
        self.nodes.push(DagNode {
            id,
            op: Some(ir.op),
            depends,
            rdepends: Vec::new(),
            provides: Vec::new(),
            origin: None,
            original: Some(ir),
        });
        let mut provides = Vec::with_capacity(output_vars.len());
        for (position, output) in output_vars.iter().enumerate() {
            let new_output = self.next_version(output);
            self.commit(&new_output);
            self.provider.insert(new_output.clone(), (id, position));
            provides.push(new_output);
        }
        self.nodes[id].provides = provides;
        id
    }

    fn weight(&self, var: &VersionedVar) -> i32 {
        let mut weight = 0;
        let current = self.version.get(&var.name).cloned().unwrap_or(0);
        weight += if current == var.version { 8 } else { -8 };
        if !var.name.contains('@') {
            weight += 4;
        }
        if !self.callee.is_empty() && var.name.contains('@') {
            if var.name.rsplit('@').next() == Some(self.callee.as_str()) {
                weight += 2;
            }
        }
        if var.name.starts_with("__vtmp_") || var.name.starts_with("___vtmp_") {
            weight -= 1;
        }
        weight
    }

    fn group_aliases(&mut self) -> HashMap<VersionedVar, Vec<VersionedVar>> {
        let keys: Vec<VersionedVar> = self.aliases.keys().cloned().collect();
        for key in &keys {
            let _ = self.resolve(key.clone());
        }
        let mut groups: HashMap<VersionedVar, Vec<VersionedVar>> = HashMap::new();
        for key in keys {
            let base = self.aliases.get(&key).cloned().unwrap();
            groups.entry(base).or_insert_with(Vec::new).push(key);
        }
        for members in groups.values_mut() {
            members.sort();
            members.dedup();
        }
        groups
    }

    /// Repoint each alias group at its best-weighted member, so values end up
    /// living in named or outgoing-argument locations rather than temps.
    fn adjust_aliases(&mut self) -> HashMap<VersionedVar, Vec<VersionedVar>> {
        let groups = self.group_aliases();
        let mut bases: Vec<VersionedVar> = groups.keys().cloned().collect();
        bases.sort();
        for old_base in bases {
            let members = &groups[&old_base];
            let mut best = old_base.clone();
            let mut best_weight = self.weight(&old_base);
            for candidate in members {
                let candidate_weight = self.weight(candidate);
                if candidate_weight > best_weight {
                    best = candidate.clone();
                    best_weight = candidate_weight;
                }
            }
            if best == old_base {
                continue;
            }
            self.aliases.insert(old_base.clone(), best.clone());
            for candidate in members {
                self.aliases.insert(candidate.clone(), best.clone());
            }
            self.aliases.remove(&best);
        }
        self.group_aliases()
    }

    fn rewrite_provides(&mut self) {
        for index in 0..self.nodes.len() {
            let provides = self.nodes[index].provides.clone();
            let resolved: Vec<VersionedVar> = provides
                .into_iter()
                .map(|var| self.resolve(var))
                .collect();
            self.nodes[index].provides = resolved;
        }
    }

    /// The node directly providing `var`, without looking through copies.
    /// Liveness must root the copy node itself or the write would be lost.
    fn provider_node(&mut self, var: VersionedVar) -> usize {
        let var = self.resolve(var);
        if let Some(&(node, _)) = self.provider.get(&var) {
            return node;
        }
        let (node, _) = self.find_node(var);
        node
    }

    /// Reverse BFS from the ending node and from the provider of every
    /// name's most recent version.
    fn detect_alive_nodes(&mut self, ending_id: Option<usize>) -> HashSet<usize> {
        let mut alive: HashSet<usize> = HashSet::new();
        let mut queue: VecDeque<usize> = VecDeque::new();
        let mut names: Vec<String> = self.version.keys().cloned().collect();
        names.sort();
        for name in names {
            if name.is_empty() {
                continue;
            }
            let current = self.current(&name);
            let node = self.provider_node(current);
            if alive.insert(node) {
                queue.push_back(node);
            }
        }
        if let Some(id) = ending_id {
            if alive.insert(id) {
                queue.push_back(id);
            }
        }
        while let Some(id) = queue.pop_front() {
            for index in 0..self.nodes[id].depends.len() {
                let (dep, _) = self.nodes[id].depends[index];
                if alive.insert(dep) {
                    queue.push_back(dep);
                }
            }
        }
        alive
    }

    /// Kahn's algorithm over the reverse edges, preferring the smallest node
    /// id among ready nodes. Node ids follow original program order, so ties
    /// keep every anti-dependence of the source block intact.
    fn regenerate(
        &mut self,
        alive: &HashSet<usize>,
        ending_id: Option<usize>,
        groups: &HashMap<VersionedVar, Vec<VersionedVar>>,
    ) -> Vec<Quadruple> {
        let mut in_degree: HashMap<usize, usize> = HashMap::new();
        let mut edges: Vec<(usize, usize)> = Vec::new();
        for node in &self.nodes {
            if !alive.contains(&node.id) {
                continue;
            }
            in_degree.entry(node.id).or_insert(0);
            for &(dep, _) in &node.depends {
                if alive.contains(&dep) {
                    edges.push((dep, node.id));
                }
            }
            if let Some(ending) = ending_id {
                if node.id != ending {
                    edges.push((node.id, ending));
                }
            }
        }
        for &(from, to) in &edges {
            *in_degree.entry(to).or_insert(0) += 1;
            self.nodes[from].rdepends.push(to);
        }

        let mut ready: BinaryHeap<Reverse<usize>> = BinaryHeap::new();
        let mut ids: Vec<usize> = in_degree
            .iter()
            .filter(|(_, &degree)| degree == 0)
            .map(|(&id, _)| id)
            .collect();
        ids.sort();
        for id in ids {
            ready.push(Reverse(id));
        }

        let mut emitted = Vec::new();
        let mut visited = 0usize;
        while let Some(Reverse(id)) = ready.pop() {
            visited += 1;
            self.emit_node(id, &mut emitted, groups);
            let rdepends = self.nodes[id].rdepends.clone();
            for rdep in rdepends {
                let degree = in_degree.get_mut(&rdep).unwrap();
                *degree -= 1;
                if *degree == 0 {
                    ready.push(Reverse(rdep));
                }
            }
        }
        if visited != alive.len() {
            panic!("cycle detected in LCSE dependency graph");
        }
        emitted
    }

    fn emit_node(
        &mut self,
        id: usize,
        emitted: &mut Vec<Quadruple>,
        groups: &HashMap<VersionedVar, Vec<VersionedVar>>,
    ) {
        let op = self.nodes[id].op;
        match op {
            None => {
                // A value from outside the block. If aliasing moved it into a
                // different name, materialize the copy before anything
                // overwrites the original location.
                let provide = self.nodes[id].provides[0].clone();
                let origin = self.nodes[id].origin.clone();
                if let Some(origin) = origin {
                    if origin.name != provide.name {
                        self.emit_copy(&origin.name, &provide.name, emitted);
                    }
                }
            }
            Some(Op::Asm { .. }) => {
                let mut ir = self.nodes[id].original.clone().unwrap();
                let depends = self.nodes[id].depends.clone();
                for (position, slot) in depends.iter().enumerate() {
                    if position < ir.input_vars.len() {
                        ir.input_vars[position] = self.slot_name(*slot);
                    }
                }
                let provides = self.nodes[id].provides.clone();
                for (position, provide) in provides.iter().enumerate() {
                    if position < ir.output_vars.len() {
                        ir.output_vars[position] = provide.name.clone();
                    }
                }
                emitted.push(ir);
            }
            Some(Op::If) | Some(Op::IfNot) => {
                let mut ir = self.nodes[id].original.clone().unwrap();
                if ir.src1_kind == OperandKind::Variable {
                    let name = self.resolved_name(&ir.src1.clone());
                    ir.set_src1(name);
                }
                if ir.src2_kind == OperandKind::Variable {
                    let name = self.resolved_name(&ir.src2.clone());
                    ir.set_src2(name);
                }
                emitted.push(ir);
            }
            Some(other) if self.nodes[id].original.is_some() => {
                // Remaining terminators: __call, goto, __return, __funcend.
                debug_assert!(!other.takes_variables());
                emitted.push(self.nodes[id].original.clone().unwrap());
            }
            Some(op) => {
                let depends = self.nodes[id].depends.clone();
                let dest = self.nodes[id].provides[0].name.clone();
                let ir = match op.arity() {
                    Arity::I1O1 => {
                        Quadruple::i1o1(op, self.slot_name(depends[0]), dest)
                    }
                    Arity::I2O1 => Quadruple::i2o1(
                        op,
                        self.slot_name(depends[0]),
                        self.slot_name(depends[1]),
                        dest,
                    ),
                    _ => unreachable!("unexpected arity in LCSE regeneration"),
                };
                emitted.push(ir);
            }
        }
        self.emit_alias_fillers(id, emitted, groups);
    }

    /// Copies keeping every still-visible alias of this node's outputs
    /// readable under its own name downstream.
    fn emit_alias_fillers(
        &mut self,
        id: usize,
        emitted: &mut Vec<Quadruple>,
        groups: &HashMap<VersionedVar, Vec<VersionedVar>>,
    ) {
        let provides = self.nodes[id].provides.clone();
        for provide in provides {
            let members = match groups.get(&provide) {
                Some(members) => members.clone(),
                None => continue,
            };
            for member in members {
                if member == provide || member.name == provide.name {
                    continue;
                }
                let current = self.version.get(&member.name).cloned().unwrap_or(0);
                if current != member.version {
                    continue;
                }
                self.emit_copy(&provide.name, &member.name, emitted);
            }
        }
    }

    fn emit_copy(&self, src: &str, dest: &str, emitted: &mut Vec<Quadruple>) {
        match self.ctx.variable_types.get(dest) {
            Some(&var_type) => {
                emitted.push(Quadruple::i1o1(Op::Set(var_type), src, dest));
            }
            None => {
                // No recorded type: the variable is presumed pre-declared and
                // written elsewhere, so the copy is dropped.
                debug!("lcse: no type for `{}`, skipping alias copy", dest);
            }
        }
    }

    fn slot_name(&self, slot: (usize, usize)) -> String {
        self.nodes[slot.0].provides[slot.1].name.clone()
    }

    fn resolved_name(&mut self, name: &str) -> String {
        let current = self.current(name);
        let slot = self.find_node(current);
        self.slot_name(slot)
    }
}
