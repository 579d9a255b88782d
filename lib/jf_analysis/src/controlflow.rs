//! Control flow graph representation.

use crate::errors::{AnalysisError, AnalysisResult};
use crate::repo::Method;
use fixedbitset::FixedBitSet;
use jf_bytecode::code::{Code, LabeledInstr};
use jf_bytecode::instrs::{Constant, Instr};
use jf_bytecode::Addr;
use petgraph::dot::{Config, Dot};
use petgraph::graph::{DiGraph, EdgeIndex, NodeIndex};
use petgraph::visit::{Dfs, DfsPostOrder, EdgeRef, Reversed};
use petgraph::Direction;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fmt::Write;

pub type BlockId = NodeIndex;
pub type EdgeId = EdgeIndex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Entry,
    Exit,
    Body,
}

#[derive(Debug, Clone)]
pub struct Block {
    kind: BlockKind,
    instrs: Vec<LabeledInstr>,
    exception_handler: bool,
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.kind {
            BlockKind::Entry => return write!(f, "<ENTRY>"),
            BlockKind::Exit => return write!(f, "<EXIT>"),
            BlockKind::Body => (),
        }
        if self.instrs.is_empty() {
            return write!(f, "<END>");
        }
        for linstr in &self.instrs {
            writeln!(f, "{linstr}")?;
        }
        Ok(())
    }
}

impl Block {
    const fn synthetic(kind: BlockKind) -> Self {
        Self {
            kind,
            instrs: Vec::new(),
            exception_handler: false,
        }
    }

    #[inline]
    pub fn instructions(&self) -> impl DoubleEndedIterator<Item = &LabeledInstr> {
        self.instrs.iter()
    }

    #[inline]
    pub fn rev_instructions(&self) -> impl Iterator<Item = &LabeledInstr> {
        self.instrs.iter().rev()
    }

    #[must_use]
    pub fn start_addr(&self) -> Option<Addr> {
        self.instrs.first().map(LabeledInstr::addr)
    }

    #[must_use]
    pub fn last_instruction(&self) -> Option<&LabeledInstr> {
        self.instrs.last()
    }

    #[inline]
    #[must_use]
    pub const fn kind(&self) -> BlockKind {
        self.kind
    }

    #[inline]
    #[must_use]
    pub fn is_entry(&self) -> bool {
        self.kind == BlockKind::Entry
    }

    #[inline]
    #[must_use]
    pub fn is_exit(&self) -> bool {
        self.kind == BlockKind::Exit
    }

    /// Is this block the first block of an exception handler?
    #[inline]
    #[must_use]
    pub const fn is_exception_handler(&self) -> bool {
        self.exception_handler
    }

    /// Blocks holding a throwing instruction contain only this
    /// instruction.
    #[must_use]
    pub fn can_throw(&self) -> bool {
        self.instrs.first().map_or(false, |i| i.instr().can_throw())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Branch {
    Sequence,
    Jmp,
    IfTrue,
    IfFalse,
    Switch(i32),
    SwitchDefault,
    /// Handled exception of the given class.
    Catch(String),
    CatchAll,
    /// Exception leaving the method.
    UnhandledException,
    Return,
}

impl Branch {
    #[inline]
    #[must_use]
    pub const fn is_exception(&self) -> bool {
        matches!(
            self,
            Self::Catch(_) | Self::CatchAll | Self::UnhandledException
        )
    }
}

impl fmt::Display for Branch {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Sequence => write!(f, "<seq>"),
            Self::Jmp => write!(f, "<jmp>"),
            Self::IfTrue => write!(f, "<true>"),
            Self::IfFalse => write!(f, "<false>"),
            Self::Switch(key) => write!(f, "<switch {key}>"),
            Self::SwitchDefault => write!(f, "<switch _>"),
            Self::Catch(typ) => write!(f, "<catch {typ}>"),
            Self::CatchAll => write!(f, "<catch *>"),
            Self::UnhandledException => write!(f, "<throw>"),
            Self::Return => write!(f, "<return>"),
        }
    }
}

/// A CFG edge, as seen by the dataflow analyses.
#[derive(Debug, Clone, Copy)]
pub struct Edge<'g> {
    pub id: EdgeId,
    pub source: BlockId,
    pub target: BlockId,
    pub branch: &'g Branch,
}

impl<'g> Edge<'g> {
    #[inline]
    #[must_use]
    pub const fn is_exception(&self) -> bool {
        self.branch.is_exception()
    }
}

impl<'g> fmt::Display for Edge<'g> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} -{}-> {}",
            self.source.index(),
            self.branch,
            self.target.index()
        )
    }
}

#[derive(Debug)]
pub struct Cfg {
    pub(crate) inner: DiGraph<Block, Branch>,
    entry: BlockId,
    exit: BlockId,
    locations: BTreeMap<Addr, BlockId>,
}

impl Cfg {
    pub fn from_method(method: &Method) -> AnalysisResult<Self> {
        let code = method.code().ok_or(AnalysisError::NoCode)?;
        Self::build(code)
    }

    pub fn build(code: &Code) -> AnalysisResult<Self> {
        let mut cfgraph = DiGraph::new();
        let mut blocks_map = BTreeMap::new();

        let entry = cfgraph.add_node(Block::synthetic(BlockKind::Entry));
        let handlers: BTreeSet<Addr> = code.iter_handlers().map(|h| h.handler).collect();
        let leaders = compute_block_leaders(code);
        for block in split_into_blocks(code, leaders, &handlers) {
            if let Some(addr) = block.start_addr() {
                blocks_map.insert(addr, cfgraph.add_node(block));
            }
        }
        let exit = cfgraph.add_node(Block::synthetic(BlockKind::Exit));

        let first = *blocks_map
            .get(&Addr::entry())
            .ok_or(AnalysisError::InstructionNotFound(Addr::entry().to_string()))?;
        cfgraph.add_edge(entry, first, Branch::Sequence);

        let breakers: Vec<(BlockId, Option<LabeledInstr>, LabeledInstr)> = blocks_map
            .values()
            .filter_map(|id| {
                let block: &Block = &cfgraph[*id];
                let last = block.instrs.last()?.clone();
                let before = block
                    .instrs
                    .len()
                    .checked_sub(2)
                    .map(|i| block.instrs[i].clone());
                Some((*id, before, last))
            })
            .collect();
        for (src_id, before, linstr) in breakers {
            for (branch, dst) in instruction_branching(before.as_ref(), &linstr) {
                let dst_id = *blocks_map
                    .get(&dst)
                    .ok_or_else(|| AnalysisError::InstructionNotFound(dst.to_string()))?;
                cfgraph.add_edge(src_id, dst_id, branch);
            }
            if linstr.instr().is_return() {
                cfgraph.add_edge(src_id, exit, Branch::Return);
            }
            if linstr.instr().can_throw() {
                let mut caught_all = false;
                for handler in code.handlers_covering(linstr.addr()) {
                    let dst_id = *blocks_map
                        .get(&handler.handler)
                        .ok_or_else(|| AnalysisError::InstructionNotFound(handler.handler.to_string()))?;
                    let branch = match &handler.catch_type {
                        Some(typ) => Branch::Catch(typ.clone()),
                        None => {
                            caught_all = true;
                            Branch::CatchAll
                        }
                    };
                    cfgraph.add_edge(src_id, dst_id, branch);
                    if caught_all {
                        break;
                    }
                }
                if !caught_all {
                    cfgraph.add_edge(src_id, exit, Branch::UnhandledException);
                }
            }
        }

        Ok(Self::remove_unreachable_blocks(cfgraph, entry, exit))
    }

    // Dead blocks (including the ones made dead by constant conditions)
    // are dropped, EXIT is always kept.
    fn remove_unreachable_blocks(cfgraph: DiGraph<Block, Branch>, entry: BlockId, exit: BlockId) -> Self {
        let mut dfs: Dfs<NodeIndex, FixedBitSet> = Dfs::new(&cfgraph, entry);
        while dfs.next(&cfgraph).is_some() {}
        let mut reachable = dfs.discovered;
        reachable.insert(exit.index());

        let inner = cfgraph.filter_map(
            |id, block| reachable.contains(id.index()).then(|| block.clone()),
            |_, branch| Some(branch.clone()),
        );

        let mut entry = entry;
        let mut exit = exit;
        let mut locations = BTreeMap::new();
        for id in inner.node_indices() {
            let block = &inner[id];
            match block.kind {
                BlockKind::Entry => entry = id,
                BlockKind::Exit => exit = id,
                BlockKind::Body => {
                    for linstr in &block.instrs {
                        locations.insert(linstr.addr(), id);
                    }
                }
            }
        }
        Self {
            inner,
            entry,
            exit,
            locations,
        }
    }

    #[inline]
    #[must_use]
    pub const fn entry(&self) -> BlockId {
        self.entry
    }

    #[inline]
    #[must_use]
    pub const fn exit(&self) -> BlockId {
        self.exit
    }

    #[inline]
    #[must_use]
    pub fn block(&self, id: BlockId) -> &Block {
        &self.inner[id]
    }

    #[must_use]
    pub fn nb_blocks(&self) -> usize {
        self.inner.node_count()
    }

    pub fn iter_blocks(&self) -> impl Iterator<Item = (BlockId, &Block)> {
        self.inner.node_indices().map(move |id| (id, &self.inner[id]))
    }

    /// Block holding the instruction at the given address, if reachable.
    #[must_use]
    pub fn block_of(&self, addr: Addr) -> Option<BlockId> {
        self.locations.get(&addr).copied()
    }

    /// Addresses of all the reachable instructions.
    pub fn iter_locations(&self) -> impl Iterator<Item = Addr> + '_ {
        self.locations.keys().copied()
    }

    #[must_use]
    pub fn edge(&self, id: EdgeId) -> Option<Edge<'_>> {
        let (source, target) = self.inner.edge_endpoints(id)?;
        Some(Edge {
            id,
            source,
            target,
            branch: &self.inner[id],
        })
    }

    pub fn iter_edges(&self) -> impl Iterator<Item = Edge<'_>> {
        self.inner.edge_references().map(|e| Edge {
            id: e.id(),
            source: e.source(),
            target: e.target(),
            branch: e.weight(),
        })
    }

    fn edges_directed(&self, id: BlockId, dir: Direction) -> Vec<Edge<'_>> {
        let mut edges: Vec<Edge> = self
            .inner
            .edges_directed(id, dir)
            .map(|e| Edge {
                id: e.id(),
                source: e.source(),
                target: e.target(),
                branch: e.weight(),
            })
            .collect();
        edges.sort_by_key(|e| e.id);
        edges
    }

    /// Incoming edges, in creation order.
    #[must_use]
    pub fn incoming_edges(&self, id: BlockId) -> Vec<Edge<'_>> {
        self.edges_directed(id, Direction::Incoming)
    }

    /// Outgoing edges, in creation order.
    #[must_use]
    pub fn outgoing_edges(&self, id: BlockId) -> Vec<Edge<'_>> {
        self.edges_directed(id, Direction::Outgoing)
    }

    /// Reverse postorder from ENTRY, followed by the blocks it misses.
    #[must_use]
    pub fn forward_order(&self) -> Vec<BlockId> {
        let mut dfs: DfsPostOrder<NodeIndex, FixedBitSet> = DfsPostOrder::new(&self.inner, self.entry);
        let mut order = Vec::new();
        while let Some(id) = dfs.next(&self.inner) {
            order.push(id);
        }
        order.reverse();
        self.complete_order(order)
    }

    /// Reverse postorder of the reversed graph from EXIT, followed by the
    /// blocks that cannot reach EXIT.
    #[must_use]
    pub fn backward_order(&self) -> Vec<BlockId> {
        let reversed = Reversed(&self.inner);
        let mut dfs: DfsPostOrder<NodeIndex, FixedBitSet> = DfsPostOrder::new(reversed, self.exit);
        let mut order = Vec::new();
        while let Some(id) = dfs.next(reversed) {
            order.push(id);
        }
        order.reverse();
        self.complete_order(order)
    }

    fn complete_order(&self, mut order: Vec<BlockId>) -> Vec<BlockId> {
        if order.len() < self.inner.node_count() {
            let seen: BTreeSet<BlockId> = order.iter().copied().collect();
            order.extend(self.inner.node_indices().filter(|id| !seen.contains(id)));
        }
        order
    }

    #[must_use]
    pub fn to_dot(&self) -> String {
        let mut res = String::new();
        res.push_str("digraph {\n");
        res.push_str("  splines=ortho;\n");
        res.push_str("  nodesep=2;\n");
        // writing into a String cannot fail
        let _ = write!(
            res,
            "{}",
            Dot::with_attr_getters(
                &self.inner,
                &[Config::GraphContentOnly, Config::EdgeNoLabel],
                &|_, edge| {
                    let color = match edge.weight() {
                        Branch::IfTrue => "green",
                        Branch::IfFalse => "red",
                        Branch::Switch(_) | Branch::SwitchDefault => "purple",
                        Branch::Jmp => "blue",
                        Branch::Catch(_) | Branch::CatchAll | Branch::UnhandledException => {
                            "orchid"
                        }
                        Branch::Sequence | Branch::Return => "black",
                    };
                    format!("color={},xlabel=\"{}\"", color, edge.weight())
                },
                &|_, (_, block)| if block.can_throw() {
                    String::from("shape=box,color=blue")
                } else {
                    String::from("shape=box,color=black")
                }
            )
        );
        res.push('}');
        res
    }
}

// Block leaders are block first instructions addresses.
// Leaders can be caused by several cases:
//   - target address of a branching instruction is a leader
//   - address following a branching, returning or throwing instruction
//   - throwing instruction is a leader (state before the instruction is
//     the block start state)
//   - bounds of a protected range and start of a handler
fn compute_block_leaders(code: &Code) -> BTreeSet<Addr> {
    let mut leaders = BTreeSet::new();
    leaders.insert(Addr::entry());

    for linstr in code.iter_instructions() {
        let instr = linstr.instr();
        let targets = instr.branch_targets();
        if !targets.is_empty() || instr.is_return() || instr.can_throw() {
            leaders.insert(linstr.next_addr());
        }
        leaders.extend(targets);
        if instr.can_throw() {
            leaders.insert(linstr.addr());
        }
    }

    for handler in code.iter_handlers() {
        leaders.insert(handler.start);
        leaders.insert(handler.end);
        leaders.insert(handler.handler);
    }

    leaders
}

fn split_into_blocks(code: &Code, leaders: BTreeSet<Addr>, handlers: &BTreeSet<Addr>) -> Vec<Block> {
    let mut blocks = Vec::new();
    let mut instrs: Vec<LabeledInstr> = Vec::new();

    for linstr in code.iter_instructions() {
        if leaders.contains(&linstr.addr()) && !instrs.is_empty() {
            blocks.push(body_block(std::mem::take(&mut instrs), handlers));
        }
        instrs.push(linstr.clone());
    }
    if !instrs.is_empty() {
        blocks.push(body_block(instrs, handlers));
    }

    blocks
}

fn body_block(instrs: Vec<LabeledInstr>, handlers: &BTreeSet<Addr>) -> Block {
    let exception_handler = instrs
        .first()
        .map_or(false, |i| handlers.contains(&i.addr()));
    Block {
        kind: BlockKind::Body,
        instrs,
        exception_handler,
    }
}

// Normal successors of the last instruction of a block. `before` is the
// preceding instruction in the same block, used to prune conditional
// branches on constant operands.
fn instruction_branching(before: Option<&LabeledInstr>, linstr: &LabeledInstr) -> Vec<(Branch, Addr)> {
    let instr = linstr.instr();
    match instr {
        Instr::Goto(a) => vec![(Branch::Jmp, *a)],
        Instr::Switch(cases, default) => std::iter::once((Branch::SwitchDefault, *default))
            .chain(cases.iter().map(|(key, a)| (Branch::Switch(*key), *a)))
            .collect(),
        Instr::If(_, a)
        | Instr::IfCmp(_, a)
        | Instr::IfNull(a)
        | Instr::IfNonNull(a)
        | Instr::IfAcmpEq(a)
        | Instr::IfAcmpNe(a) => match constant_condition(before, instr) {
            Some(true) => vec![(Branch::IfTrue, *a)],
            Some(false) => vec![(Branch::IfFalse, linstr.next_addr())],
            None => vec![
                (Branch::IfTrue, *a),
                (Branch::IfFalse, linstr.next_addr()),
            ],
        },
        _ if instr.falls_through() && !instr.is_return() => {
            vec![(Branch::Sequence, linstr.next_addr())]
        }
        _ => vec![],
    }
}

fn constant_condition(before: Option<&LabeledInstr>, instr: &Instr) -> Option<bool> {
    match (before.map(LabeledInstr::instr), instr) {
        (Some(Instr::Const(Constant::Int(v))), Instr::If(cond, _)) => Some(cond.eval(*v, 0)),
        (Some(Instr::Const(Constant::Null)), Instr::IfNull(_)) => Some(true),
        (Some(Instr::Const(Constant::Null)), Instr::IfNonNull(_)) => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jf_bytecode::code::ExceptionHandler;
    use jf_bytecode::instrs::{Cond, InvokeKind, Kind};
    use jf_bytecode::refs::{FieldRef, MethodRef};

    fn call() -> Instr {
        Instr::Invoke(
            InvokeKind::Static,
            MethodRef::new("a/A", "f", "()V").unwrap(),
        )
    }

    #[test]
    fn blocks_and_edges() {
        let code = Code::new(
            2,
            vec![
                Instr::Load(Kind::Int, 1),
                Instr::If(Cond::Eq, Addr(4)),
                call(),
                Instr::Goto(Addr(5)),
                Instr::Nop,
                Instr::ReturnVoid,
            ],
            vec![],
        )
        .unwrap();
        let cfg = Cfg::build(&code).unwrap();
        // entry, [0,1], [2], [3], [4], [5], exit
        assert_eq!(cfg.nb_blocks(), 7);
        let b0 = cfg.block_of(Addr(0)).unwrap();
        assert_eq!(cfg.block_of(Addr(1)), Some(b0));
        let out: Vec<String> = cfg
            .outgoing_edges(b0)
            .iter()
            .map(|e| e.branch.to_string())
            .collect();
        assert_eq!(out, vec!["<true>", "<false>"]);

        let call_block = cfg.block_of(Addr(2)).unwrap();
        assert!(cfg.block(call_block).can_throw());
        let out = cfg.outgoing_edges(call_block);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].branch, &Branch::Sequence);
        assert_eq!(out[1].branch, &Branch::UnhandledException);
        assert_eq!(out[1].target, cfg.exit());

        let ret = cfg.block_of(Addr(5)).unwrap();
        let out = cfg.outgoing_edges(ret);
        assert_eq!(out[0].branch, &Branch::Return);

        let order = cfg.forward_order();
        assert_eq!(order[0], cfg.entry());
        assert_eq!(order.len(), cfg.nb_blocks());
        let order = cfg.backward_order();
        assert_eq!(order[0], cfg.exit());
        assert!(cfg.to_dot().starts_with("digraph"));
    }

    #[test]
    fn constant_condition_pruning() {
        let code = Code::new(
            1,
            vec![
                Instr::Const(Constant::Int(0)),
                Instr::If(Cond::Eq, Addr(3)),
                Instr::Nop,
                Instr::ReturnVoid,
            ],
            vec![],
        )
        .unwrap();
        let cfg = Cfg::build(&code).unwrap();
        assert!(cfg.block_of(Addr(2)).is_none());
        assert!(cfg.block_of(Addr(3)).is_some());
        let b0 = cfg.block_of(Addr(0)).unwrap();
        let out = cfg.outgoing_edges(b0);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].branch, &Branch::IfTrue);
    }

    #[test]
    fn exception_handlers() {
        let code = Code::new(
            1,
            vec![
                call(),
                Instr::ReturnVoid,
                Instr::Store(Kind::Ref, 0),
                Instr::ReturnVoid,
            ],
            vec![
                ExceptionHandler::new(Addr(0), Addr(1), Addr(2), Some("java/io/IOException")),
                ExceptionHandler::new(Addr(0), Addr(1), Addr(2), None),
            ],
        )
        .unwrap();
        let cfg = Cfg::build(&code).unwrap();
        let handler = cfg.block_of(Addr(2)).unwrap();
        assert!(cfg.block(handler).is_exception_handler());
        let out = cfg.outgoing_edges(cfg.block_of(Addr(0)).unwrap());
        let branches: Vec<&Branch> = out.iter().map(|e| e.branch).collect();
        assert_eq!(
            branches,
            vec![
                &Branch::Sequence,
                &Branch::Catch("java/io/IOException".to_string()),
                &Branch::CatchAll
            ]
        );
        assert!(out.iter().all(|e| e.target != cfg.exit()));
    }

    #[test]
    fn field_access_in_try_range() {
        // aload_0; getfield f; areturn; handler: astore_1; aconst_null; areturn
        let code = Code::new(
            2,
            vec![
                Instr::Load(Kind::Ref, 0),
                Instr::GetField(FieldRef::new("a/A", "f", "Ljava/lang/Object;").unwrap()),
                Instr::Return(Kind::Ref),
                Instr::Store(Kind::Ref, 1),
                Instr::Const(Constant::Null),
                Instr::Return(Kind::Ref),
            ],
            vec![ExceptionHandler::new(
                Addr(0),
                Addr(2),
                Addr(3),
                Some("java/lang/NullPointerException"),
            )],
        )
        .unwrap();
        let cfg = Cfg::build(&code).unwrap();
        let handler = cfg.block_of(Addr(3)).unwrap();
        assert!(cfg.block(handler).is_exception_handler());

        let get = cfg.block_of(Addr(1)).unwrap();
        assert_ne!(cfg.block_of(Addr(0)), Some(get));
        assert_ne!(cfg.block_of(Addr(2)), Some(get));
        let out = cfg.outgoing_edges(get);
        let branches: Vec<&Branch> = out.iter().map(|e| e.branch).collect();
        assert_eq!(
            branches,
            vec![
                &Branch::Sequence,
                &Branch::Catch("java/lang/NullPointerException".to_string()),
                &Branch::UnhandledException
            ]
        );
        assert_eq!(out[1].target, handler);
    }
}
