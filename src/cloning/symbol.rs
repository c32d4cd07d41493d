//! Symbolic runtime values. Each is captured once from a discovered access
//! or analysis result, compared structurally, and only turned back into IR
//! when the guard is materialized. Anything with a side effect must have
//! been factored into a local by the caller before it gets a symbol here.

use std::fmt;

use super::access::{ArrAccess, SpanAccess};
use crate::ir::{FnBody, LclNum, TargetAddr, TypeHandle, ValueId, ValueKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayKind {
    Jagged,
    MultiDim,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LenOp {
    /// The array prefix itself (used for null checks).
    None,
    /// Its length.
    Len,
}

/// Symbolic array prefix `a[i0]..[i{d-1}]`, optionally with the length
/// operator applied. `dim` picks the prefix depth; -1 means the full rank.
#[derive(Debug, Clone)]
pub struct SymArray {
    pub kind: ArrayKind,
    pub arr_lcl: LclNum,
    pub ind_lcls: Vec<LclNum>,
    pub rank: u32,
    pub dim: i32,
    pub op: LenOp,
}

impl SymArray {
    pub fn new(kind: ArrayKind, access: &ArrAccess, dim: i32, op: LenOp) -> Self {
        Self {
            kind,
            arr_lcl: access.arr_lcl,
            ind_lcls: access.ind_lcls.clone(),
            rank: access.rank,
            dim,
            op,
        }
    }

    /// The whole-array form with no index prefix, e.g. `a` or `a.Length`.
    pub fn whole(kind: ArrayKind, arr_lcl: LclNum, op: LenOp) -> Self {
        Self {
            kind,
            arr_lcl,
            ind_lcls: Vec::new(),
            rank: 0,
            dim: -1,
            op,
        }
    }

    /// The dimension up to which two accesses must agree to denote the same
    /// symbolic expression.
    pub fn dim_rank(&self) -> u32 {
        if self.dim < 0 {
            self.rank
        } else {
            self.dim as u32
        }
    }

    pub fn to_value(&self, body: &mut FnBody) -> ValueId {
        let rank = self.dim_rank() as usize;
        match self.kind {
            ArrayKind::Jagged => {
                let mut arr = body.add_value(ValueKind::LclRead(self.arr_lcl));
                for d in 0..rank {
                    let idx = body.add_value(ValueKind::LclRead(self.ind_lcls[d]));
                    arr = body.add_value(ValueKind::Index { base: arr, idx });
                }
                match self.op {
                    LenOp::None => arr,
                    LenOp::Len => body.add_value(ValueKind::LenOf { base: arr }),
                }
            }
            ArrayKind::MultiDim => {
                let base = body.add_value(ValueKind::LclRead(self.arr_lcl));
                match self.op {
                    LenOp::None => base,
                    LenOp::Len => body.add_value(ValueKind::MdLenOf {
                        base,
                        dim: self.dim_rank(),
                    }),
                }
            }
        }
    }
}

impl PartialEq for SymArray {
    fn eq(&self, that: &SymArray) -> bool {
        if self.kind != that.kind || self.arr_lcl != that.arr_lcl || self.op != that.op {
            return false;
        }
        let rank = self.dim_rank();
        if rank != that.dim_rank() {
            return false;
        }
        self.ind_lcls[..rank as usize] == that.ind_lcls[..rank as usize]
    }
}

impl Eq for SymArray {}

impl fmt::Display for SymArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "V{:02}", self.arr_lcl)?;
        let rank = self.dim_rank() as usize;
        match self.kind {
            ArrayKind::Jagged => {
                for d in 0..rank {
                    write!(f, "[V{:02}]", self.ind_lcls[d])?;
                }
            }
            ArrayKind::MultiDim => {
                if rank > 0 {
                    write!(f, "[")?;
                    for d in 0..rank {
                        if d > 0 {
                            write!(f, ",")?;
                        }
                        write!(f, "V{:02}", self.ind_lcls[d])?;
                    }
                    write!(f, "]")?;
                }
            }
        }
        if self.op == LenOp::Len {
            write!(f, ".Length")?;
        }
        Ok(())
    }
}

/// Symbolic span length: the length local of a span indexed by `ind_lcl`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymSpan {
    pub len_lcl: LclNum,
    pub ind_lcl: LclNum,
}

impl SymSpan {
    pub fn new(access: &SpanAccess) -> Self {
        Self {
            len_lcl: access.len_lcl,
            ind_lcl: access.ind_lcl,
        }
    }

    pub fn to_value(&self, body: &mut FnBody) -> ValueId {
        body.add_value(ValueKind::LclRead(self.len_lcl))
    }
}

impl fmt::Display for SymSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "V{:02}", self.len_lcl)
    }
}

/// One symbolic runtime value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SymVal {
    Const(u32),
    Var(LclNum),
    IndirOfLcl { lcl: LclNum, offs: u32 },
    Array(SymArray),
    Span(SymSpan),
    Null,
    TypeHandle(TypeHandle),
    TargetAddr(TargetAddr),
    TargetSlot(TargetAddr),
}

impl SymVal {
    /// Classify a side-effect-free subtree as a symbolic value. Only
    /// constants, local reads, and length-of-local reads are recognized;
    /// everything else must be broken down by the caller first.
    pub fn classify(body: &FnBody, vid: ValueId) -> Option<SymVal> {
        match body.value(vid) {
            ValueKind::Const(n) if (0..=u32::MAX as i64).contains(n) => {
                Some(SymVal::Const(*n as u32))
            }
            ValueKind::LclRead(lcl) => Some(SymVal::Var(*lcl)),
            ValueKind::LenOf { base } => match body.value(*base) {
                ValueKind::LclRead(lcl) => Some(SymVal::Array(SymArray::whole(
                    ArrayKind::Jagged,
                    *lcl,
                    LenOp::Len,
                ))),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn to_value(&self, body: &mut FnBody) -> ValueId {
        match self {
            SymVal::Const(c) => body.add_value(ValueKind::Const(*c as i64)),
            SymVal::Var(lcl) => body.add_value(ValueKind::LclRead(*lcl)),
            SymVal::IndirOfLcl { lcl, offs } => body.add_value(ValueKind::IndirOfLcl {
                lcl: *lcl,
                offs: *offs,
            }),
            SymVal::Array(arr) => arr.to_value(body),
            SymVal::Span(span) => span.to_value(body),
            SymVal::Null => body.add_value(ValueKind::Null),
            SymVal::TypeHandle(h) => body.add_value(ValueKind::TypeConst(*h)),
            SymVal::TargetAddr(a) => body.add_value(ValueKind::TargetConst(*a)),
            SymVal::TargetSlot(a) => body.add_value(ValueKind::TargetSlotLoad(*a)),
        }
    }

    pub fn is_length(&self) -> bool {
        match self {
            SymVal::Array(arr) => arr.op == LenOp::Len,
            SymVal::Span(_) => true,
            _ => false,
        }
    }

    /// The local whose length this value reads, when that is the whole
    /// story (no index prefix). Prefixed lengths like `a[i].Length` depend
    /// on more than the base local and return None.
    pub(crate) fn len_root(&self) -> Option<LclNum> {
        match self {
            SymVal::Array(arr) if arr.op == LenOp::Len && arr.dim_rank() == 0 => Some(arr.arr_lcl),
            SymVal::Span(span) => Some(span.len_lcl),
            _ => None,
        }
    }

    /// The local being null-tested, when the value is a bare reference.
    pub(crate) fn null_root(&self) -> Option<LclNum> {
        match self {
            SymVal::Var(lcl) => Some(*lcl),
            SymVal::Array(arr) if arr.op == LenOp::None && arr.dim_rank() == 0 => {
                Some(arr.arr_lcl)
            }
            _ => None,
        }
    }
}

impl fmt::Display for SymVal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SymVal::Const(c) => write!(f, "{c}"),
            SymVal::Var(lcl) => write!(f, "V{lcl:02}"),
            SymVal::IndirOfLcl { lcl, offs } => {
                if *offs != 0 {
                    write!(f, "*(V{lcl:02} + {offs})")
                } else {
                    write!(f, "*V{lcl:02}")
                }
            }
            SymVal::Array(arr) => write!(f, "{arr}"),
            SymVal::Span(span) => write!(f, "{span}"),
            SymVal::Null => write!(f, "null"),
            SymVal::TypeHandle(h) => write!(f, "type:0x{:x}", h.0),
            SymVal::TargetAddr(a) => write!(f, "0x{:x}", a.0),
            SymVal::TargetSlot(a) => write!(f, "[0x{:x}]", a.0),
        }
    }
}

/// An expression over symbolic values. Every expression is a single value
/// today; arithmetic combinations would extend this type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymExpr {
    pub val: SymVal,
}

impl SymExpr {
    pub fn new(val: SymVal) -> Self {
        Self { val }
    }

    pub fn to_value(&self, body: &mut FnBody) -> ValueId {
        self.val.to_value(body)
    }
}

impl fmt::Display for SymExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.val)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn access(arr: LclNum, inds: &[LclNum]) -> ArrAccess {
        let mut acc = ArrAccess::new(arr, inds.len() as u32, 0);
        for &i in inds {
            acc.push_index(i);
        }
        acc
    }

    #[test]
    fn array_equality_is_prefix_structural() {
        let a_ij = access(0, &[1, 2]);
        let a_ik = access(0, &[1, 3]);
        let b_ij = access(9, &[1, 2]);

        let len_ij = SymArray::new(ArrayKind::Jagged, &a_ij, -1, LenOp::Len);
        let len_ij2 = SymArray::new(ArrayKind::Jagged, &a_ij, -1, LenOp::Len);
        assert_eq!(len_ij, len_ij2, "equality must be reflexive over copies");
        assert_eq!(len_ij2, len_ij, "and symmetric");

        // Same base, indices diverge past the shared prefix.
        let len_ik = SymArray::new(ArrayKind::Jagged, &a_ik, -1, LenOp::Len);
        assert_ne!(len_ij, len_ik);

        // Up to dim 1 the two accesses agree, so the dim-1 lengths match.
        let pre_ij = SymArray::new(ArrayKind::Jagged, &a_ij, 1, LenOp::Len);
        let pre_ik = SymArray::new(ArrayKind::Jagged, &a_ik, 1, LenOp::Len);
        assert_eq!(pre_ij, pre_ik);

        // Never equal across base locals, whatever the indices say.
        let len_b = SymArray::new(ArrayKind::Jagged, &b_ij, -1, LenOp::Len);
        assert_ne!(len_ij, len_b);

        // The reference and its length are different expressions.
        let ref_ij = SymArray::new(ArrayKind::Jagged, &a_ij, -1, LenOp::None);
        assert_ne!(len_ij, ref_ij);
    }

    #[test]
    fn rendering_is_deterministic() {
        let acc = access(0, &[1, 2]);
        let len = SymArray::new(ArrayKind::Jagged, &acc, -1, LenOp::Len);
        assert_eq!(len.to_string(), "V00[V01][V02].Length");
        let prefix = SymArray::new(ArrayKind::Jagged, &acc, 1, LenOp::None);
        assert_eq!(prefix.to_string(), "V00[V01]");

        let md = SymArray::new(ArrayKind::MultiDim, &acc, -1, LenOp::Len);
        assert_eq!(md.to_string(), "V00[V01,V02].Length");

        assert_eq!(SymVal::IndirOfLcl { lcl: 4, offs: 8 }.to_string(), "*(V04 + 8)");
        assert_eq!(SymVal::IndirOfLcl { lcl: 4, offs: 0 }.to_string(), "*V04");
        assert_eq!(SymVal::Null.to_string(), "null");
    }

    #[test]
    fn materialization_leaves_symbol_intact_and_pure() {
        let mut body = FnBody::new("mat");
        let acc = access(0, &[1]);
        let len = SymArray::new(ArrayKind::Jagged, &acc, -1, LenOp::Len);
        let before = len.clone();

        let v1 = len.to_value(&mut body);
        let v2 = len.to_value(&mut body);
        assert_eq!(len, before, "conversion must not mutate the symbolic form");
        assert!(!body.has_side_effects(v1));
        assert!(!body.has_side_effects(v2));
        assert!(matches!(body.value(v1), ValueKind::LenOf { .. }));
    }

    #[test]
    fn classify_accepts_only_simple_shapes() {
        let mut body = FnBody::new("cls");
        let c = body.add_value(ValueKind::Const(7));
        let v = body.add_value(ValueKind::LclRead(3));
        let len = body.add_value(ValueKind::LenOf { base: v });
        let neg = body.add_value(ValueKind::Const(-1));
        let chk = body.add_value(ValueKind::BoundsCheck { idx: c, len });

        assert_eq!(SymVal::classify(&body, c), Some(SymVal::Const(7)));
        assert_eq!(SymVal::classify(&body, v), Some(SymVal::Var(3)));
        assert!(matches!(
            SymVal::classify(&body, len),
            Some(SymVal::Array(ref a)) if a.arr_lcl == 3 && a.op == LenOp::Len
        ));
        assert_eq!(SymVal::classify(&body, neg), None);
        assert_eq!(SymVal::classify(&body, chk), None);
    }
}
