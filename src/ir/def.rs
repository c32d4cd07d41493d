use rustc_hash::FxHashMap;

pub type BlockId = usize;
pub type ValueId = usize;
pub type LclNum = u32;

/// Opaque identity of a runtime type, as handed out by the type system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeHandle(pub u64);

/// Opaque code address of a known call target (or of a slot holding one).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TargetAddr(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    /// Mirror the operator: `a op b` holds iff `b op.swapped() a` holds.
    pub fn swapped(self) -> CmpOp {
        match self {
            CmpOp::Eq => CmpOp::Eq,
            CmpOp::Ne => CmpOp::Ne,
            CmpOp::Lt => CmpOp::Gt,
            CmpOp::Le => CmpOp::Ge,
            CmpOp::Gt => CmpOp::Lt,
            CmpOp::Ge => CmpOp::Le,
        }
    }

    /// Whether the comparison holds when both operands are the same value.
    pub fn holds_on_equal(self) -> bool {
        matches!(self, CmpOp::Eq | CmpOp::Le | CmpOp::Ge)
    }

    pub fn apply_u64(self, a: u64, b: u64) -> bool {
        match self {
            CmpOp::Eq => a == b,
            CmpOp::Ne => a != b,
            CmpOp::Lt => a < b,
            CmpOp::Le => a <= b,
            CmpOp::Gt => a > b,
            CmpOp::Ge => a >= b,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Const(i64),
    LclRead(LclNum),
    // Load through a local plus a byte offset.
    IndirOfLcl { lcl: LclNum, offs: u32 },
    Null,
    TypeConst(TypeHandle),
    TargetConst(TargetAddr),
    // Load of the current target out of a known slot.
    TargetSlotLoad(TargetAddr),
    LenOf { base: ValueId },
    // Length of a multi-dimensional array at one dimension.
    MdLenOf { base: ValueId, dim: u32 },
    // Jagged element read `base[idx]`.
    Index { base: ValueId, idx: ValueId },
    // Multi-dimensional element address `base[i0, i1, ...]`.
    MdIndex { base: ValueId, inds: Vec<ValueId>, rank: u32 },
    // Runtime range check; faults when idx is outside [0, len).
    BoundsCheck { idx: ValueId, len: ValueId },
    Cmp { op: CmpOp, lhs: ValueId, rhs: ValueId, unsigned: bool },
    // Non-short-circuiting conjunction of comparison results.
    BitAnd { lhs: ValueId, rhs: ValueId },
}

#[derive(Debug, Clone)]
pub struct Value {
    pub id: ValueId,
    pub kind: ValueKind,
}

#[derive(Debug, Clone)]
pub enum Stmt {
    Assign { lcl: LclNum, src: ValueId },
    Eval { val: ValueId },
}

/// Stable reference to a statement position inside a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StmtRef {
    pub block: BlockId,
    pub index: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Terminator {
    Goto(BlockId),
    CondBranch {
        cond: ValueId,
        on_true: BlockId,
        on_false: BlockId,
    },
    Return(Option<ValueId>),
    Unreachable,
}

#[derive(Debug, Clone)]
pub struct Block {
    pub id: BlockId,
    pub stmts: Vec<Stmt>,
    pub term: Terminator,
    // Execution-frequency estimate used by the guard weight policy.
    pub weight: f64,
}

#[derive(Debug, Clone)]
pub struct FnBody {
    pub name: String,
    pub blocks: Vec<Block>, // indices are BlockIds
    pub values: Vec<Value>, // indices are ValueIds
    pub entry: BlockId,
}

impl FnBody {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            blocks: Vec::new(),
            values: Vec::new(),
            entry: 0,
        }
    }

    pub fn add_block(&mut self) -> BlockId {
        self.add_block_weighted(1.0)
    }

    pub fn add_block_weighted(&mut self, weight: f64) -> BlockId {
        let id = self.blocks.len();
        self.blocks.push(Block {
            id,
            stmts: Vec::new(),
            // Set to a real terminator when the block is finalized.
            term: Terminator::Unreachable,
            weight,
        });
        id
    }

    pub fn add_value(&mut self, kind: ValueKind) -> ValueId {
        let id = self.values.len();
        self.values.push(Value { id, kind });
        id
    }

    pub fn value(&self, vid: ValueId) -> &ValueKind {
        &self.values[vid].kind
    }

    pub fn successors(&self, bid: BlockId) -> Vec<BlockId> {
        match &self.blocks[bid].term {
            Terminator::Goto(t) => vec![*t],
            Terminator::CondBranch {
                on_true, on_false, ..
            } => vec![*on_true, *on_false],
            _ => vec![],
        }
    }

    pub fn pred_map(&self) -> FxHashMap<BlockId, Vec<BlockId>> {
        let mut map: FxHashMap<BlockId, Vec<BlockId>> = FxHashMap::default();
        for blk in &self.blocks {
            for t in self.successors(blk.id) {
                map.entry(t).or_default().push(blk.id);
            }
        }
        map
    }

    pub fn has_side_effects(&self, vid: ValueId) -> bool {
        match self.value(vid) {
            ValueKind::BoundsCheck { .. } => true,
            ValueKind::Const(_)
            | ValueKind::LclRead(_)
            | ValueKind::IndirOfLcl { .. }
            | ValueKind::Null
            | ValueKind::TypeConst(_)
            | ValueKind::TargetConst(_)
            | ValueKind::TargetSlotLoad(_) => false,
            ValueKind::LenOf { base } | ValueKind::MdLenOf { base, .. } => {
                self.has_side_effects(*base)
            }
            ValueKind::Index { base, idx } => {
                self.has_side_effects(*base) || self.has_side_effects(*idx)
            }
            ValueKind::MdIndex { base, inds, .. } => {
                self.has_side_effects(*base) || inds.iter().any(|i| self.has_side_effects(*i))
            }
            ValueKind::Cmp { lhs, rhs, .. } | ValueKind::BitAnd { lhs, rhs } => {
                self.has_side_effects(*lhs) || self.has_side_effects(*rhs)
            }
        }
    }

    /// Splice a new conditionally-branching block between `after` and its
    /// fall-through successor. The new block branches to that successor when
    /// `cond` holds and to `on_false` otherwise, inheriting `after`'s weight.
    pub fn insert_cond_block_after(
        &mut self,
        after: BlockId,
        cond: ValueId,
        on_false: BlockId,
    ) -> BlockId {
        let fall_through = match self.blocks[after].term {
            Terminator::Goto(t) => t,
            Terminator::CondBranch { on_true, .. } => on_true,
            Terminator::Return(_) | Terminator::Unreachable => {
                panic!("block {after} has no fall-through successor to splice after")
            }
        };
        let weight = self.blocks[after].weight;
        let new_bb = self.add_block_weighted(weight);
        match &mut self.blocks[after].term {
            Terminator::Goto(t) => *t = new_bb,
            Terminator::CondBranch { on_true, .. } => *on_true = new_bb,
            _ => unreachable!(),
        }
        self.blocks[new_bb].term = Terminator::CondBranch {
            cond,
            on_true: fall_through,
            on_false,
        };
        new_bb
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splice_keeps_pred_succ_bookkeeping() {
        let mut f = FnBody::new("splice");
        let pre = f.add_block();
        let head = f.add_block();
        let slow = f.add_block();
        f.entry = pre;
        f.blocks[pre].term = Terminator::Goto(head);
        f.blocks[head].term = Terminator::Return(None);
        f.blocks[slow].term = Terminator::Return(None);
        f.blocks[pre].weight = 8.0;

        let t = f.add_value(ValueKind::Const(1));
        let guard = f.insert_cond_block_after(pre, t, slow);

        assert_eq!(f.successors(pre), vec![guard]);
        assert_eq!(f.successors(guard), vec![head, slow]);
        assert_eq!(f.blocks[guard].weight, 8.0, "guard inherits the splice point's weight");

        let preds = f.pred_map();
        assert_eq!(preds[&guard], vec![pre]);
        assert!(preds[&head].contains(&guard));
        assert!(preds[&slow].contains(&guard));
    }

    #[test]
    fn bounds_check_is_the_only_side_effect() {
        let mut f = FnBody::new("fx");
        let a = f.add_value(ValueKind::LclRead(0));
        let i = f.add_value(ValueKind::LclRead(1));
        let len = f.add_value(ValueKind::LenOf { base: a });
        let cmp = f.add_value(ValueKind::Cmp {
            op: CmpOp::Lt,
            lhs: i,
            rhs: len,
            unsigned: false,
        });
        assert!(!f.has_side_effects(cmp));

        let chk = f.add_value(ValueKind::BoundsCheck { idx: i, len });
        let and = f.add_value(ValueKind::BitAnd { lhs: cmp, rhs: chk });
        assert!(f.has_side_effects(and), "faulting check must poison the whole tree");
    }
}
