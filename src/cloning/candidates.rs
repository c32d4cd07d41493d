//! Optimization candidates: one record per runtime check discovered in a
//! loop body that cloning may let the fast path drop. Discovery happens
//! elsewhere; this is the data model the context owns.

use super::access::{ArrAccess, SpanAccess};
use crate::ir::{BlockId, FnBody, LclNum, StmtRef, TargetAddr, TypeHandle, ValueId, ValueKind};

/// Multi-dimensional array access `a[i, j, ...]`, optimized up to `dim`
/// dimensions of its rank. Keeps the discovered element-address node and
/// derives its access record on first request.
#[derive(Debug, Clone)]
pub struct MdArrayCand {
    pub elem: ValueId,
    pub dim: u32,
    pub block: BlockId,
    access: Option<ArrAccess>,
}

impl MdArrayCand {
    pub fn new(elem: ValueId, dim: u32, block: BlockId) -> Self {
        Self {
            elem,
            dim,
            block,
            access: None,
        }
    }

    /// The access record covering the first `dim` index slots. Built once
    /// from the element-address node; later calls return the cached record
    /// untouched.
    pub fn arr_access_for_dim(&mut self, body: &FnBody) -> &ArrAccess {
        if self.access.is_none() {
            let ValueKind::MdIndex { base, inds, rank } = body.value(self.elem) else {
                panic!(
                    "multi-dimensional candidate does not point at an element-address node"
                );
            };
            let ValueKind::LclRead(arr_lcl) = body.value(*base) else {
                panic!("multi-dimensional array base must be a local read");
            };
            let mut access = ArrAccess::new(*arr_lcl, *rank, self.block);
            for &ind in inds.iter().take(self.dim as usize) {
                let ValueKind::LclRead(ind_lcl) = body.value(ind) else {
                    panic!("multi-dimensional index must be a local read");
                };
                access.push_index(*ind_lcl);
            }
            self.access = Some(access);
        }
        self.access.as_ref().unwrap()
    }
}

/// Jagged array access `a[i][j]...`, optimized up to `dim` dimensions.
#[derive(Debug, Clone)]
pub struct JaggedArrayCand {
    pub access: ArrAccess,
    pub dim: u32,
    pub stmt: StmtRef,
}

/// Span access `s[i]` with the span length already in a local.
#[derive(Debug, Clone)]
pub struct SpanCand {
    pub access: SpanAccess,
    pub stmt: StmtRef,
}

/// Runtime type test: the type tag loaded out of `lcl` compared against an
/// expected type identity.
#[derive(Debug, Clone)]
pub struct TypeTestCand {
    pub block: BlockId,
    pub stmt: StmtRef,
    /// The discovered load of the runtime type tag.
    pub tag_indir: ValueId,
    pub lcl: LclNum,
    pub handle: TypeHandle,
}

/// Indirect-call target test: the target field loaded out of `lcl` compared
/// against a known code address, possibly through one more slot indirection.
#[derive(Debug, Clone)]
pub struct TargetTestCand {
    pub block: BlockId,
    pub stmt: StmtRef,
    /// The discovered load of the call-target field.
    pub target_indir: ValueId,
    pub lcl: LclNum,
    /// Byte offset of the target field within the object.
    pub field_offs: u32,
    pub addr: TargetAddr,
    pub through_slot: bool,
    /// Symbolic name of the expected target, for dumps only.
    pub target_name: Option<String>,
}

#[derive(Debug, Clone)]
pub enum OptCandidate {
    MdArray(MdArrayCand),
    JaggedArray(JaggedArrayCand),
    Span(SpanCand),
    TypeTest(TypeTestCand),
    TargetTest(TargetTestCand),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn md_access_is_built_once_over_the_leading_dims() {
        let mut body = FnBody::new("md");
        let base = body.add_value(ValueKind::LclRead(0));
        let i = body.add_value(ValueKind::LclRead(1));
        let j = body.add_value(ValueKind::LclRead(2));
        let k = body.add_value(ValueKind::LclRead(3));
        let elem = body.add_value(ValueKind::MdIndex {
            base,
            inds: vec![i, j, k],
            rank: 3,
        });

        let mut cand = MdArrayCand::new(elem, 2, 0);
        let access = cand.arr_access_for_dim(&body).clone();
        assert_eq!(access.arr_lcl, 0);
        assert_eq!(access.rank, 3);
        assert_eq!(access.ind_lcls, vec![1, 2], "only the first dim slots");

        // Second request returns the cached record unchanged.
        let again = cand.arr_access_for_dim(&body);
        assert_eq!(again.ind_lcls, access.ind_lcls);
        assert_eq!(again.rank, access.rank);
    }
}
