//! Condition derivation: turn a loop's candidates plus its iteration
//! metadata into the flat cloning conditions and the block-grouped
//! dereference prerequisites.

use super::cond::CloneCond;
use super::context::{dump_conds, max_cond_blocks, verbose, CloneContext};
use super::deref::DerefNode;
use super::symbol::{ArrayKind, LenOp, SymArray, SymSpan, SymVal};
use super::OptCandidate;
use crate::ir::{CmpOp, FnBody};
use crate::loops::{IterInit, IterLimit, LoopId};

impl CloneContext {
    /// Derive the flat cloning conditions and deref prerequisites for a
    /// loop from its collected candidates. Returns false when the loop
    /// shape disqualifies it; the caller is expected to cancel. Nothing is
    /// committed to the context on disqualification.
    pub fn derive_cloning_conditions(&mut self, loop_id: LoopId, body: &FnBody) -> bool {
        let Some(info) = self.try_active_mut(loop_id) else {
            return false;
        };
        let Some(iter) = info.iter_info.clone() else {
            return false;
        };
        if !iter.counted_do_while {
            return false;
        }
        // Only stride-one counted loops with a < or <= exit test.
        if iter.step != 1 || !matches!(iter.test_op, CmpOp::Lt | CmpOp::Le) {
            return false;
        }

        let mut conds: Vec<CloneCond> = Vec::new();
        let mut array_derefs: Vec<SymArray> = Vec::new();
        let mut obj_derefs: Vec<SymVal> = Vec::new();

        match iter.init {
            // The counter becomes an array index, so it must not start
            // negative. A constant initializer settles that here; anything
            // else gets a runtime check, even when the limit side looks
            // benign.
            IterInit::Const(c) if c < 0 => return false,
            IterInit::Const(_) => {}
            IterInit::Var(v) => {
                conds.push(CloneCond::new(CmpOp::Ge, SymVal::Var(v), SymVal::Const(0)))
            }
        }

        let limit = match iter.limit {
            IterLimit::Const(c) => {
                if !(0..=u32::MAX as i64).contains(&c) {
                    return false;
                }
                SymVal::Const(c as u32)
            }
            IterLimit::Var(v) => {
                conds.push(CloneCond::new(CmpOp::Ge, SymVal::Var(v), SymVal::Const(0)));
                SymVal::Var(v)
            }
            IterLimit::ArrLen(arr) => {
                // The limit array must itself be dereference-able before
                // its length is read in the guard.
                array_derefs.push(SymArray::whole(ArrayKind::Jagged, arr, LenOp::None));
                SymVal::Array(SymArray::whole(ArrayKind::Jagged, arr, LenOp::Len))
            }
        };

        // For `i < L` the fast path needs `L <= len`; for `i <= L` it
        // needs `L < len`.
        let limit_op = if iter.test_op == CmpOp::Le {
            CmpOp::Lt
        } else {
            CmpOp::Le
        };

        for cand in &mut info.candidates {
            match cand {
                OptCandidate::JaggedArray(jagged) => {
                    let len =
                        SymArray::new(ArrayKind::Jagged, &jagged.access, jagged.dim as i32, LenOp::Len);
                    conds.push(CloneCond::new(limit_op, limit.clone(), SymVal::Array(len)));
                    array_derefs.push(SymArray::new(
                        ArrayKind::Jagged,
                        &jagged.access,
                        jagged.dim as i32,
                        LenOp::None,
                    ));
                }
                OptCandidate::Span(span) => {
                    // The span length already lives in a local; no deref
                    // prerequisite.
                    conds.push(CloneCond::new(
                        limit_op,
                        limit.clone(),
                        SymVal::Span(SymSpan::new(&span.access)),
                    ));
                }
                OptCandidate::MdArray(md) => {
                    let dim = md.dim;
                    let access = md.arr_access_for_dim(body).clone();
                    let len = SymArray::new(ArrayKind::MultiDim, &access, dim as i32, LenOp::Len);
                    conds.push(CloneCond::new(limit_op, limit.clone(), SymVal::Array(len)));
                    obj_derefs.push(SymVal::Var(access.arr_lcl));
                }
                OptCandidate::TypeTest(tt) => {
                    // The runtime type tag sits at offset 0 of the object.
                    conds.push(CloneCond::new(
                        CmpOp::Eq,
                        SymVal::IndirOfLcl {
                            lcl: tt.lcl,
                            offs: 0,
                        },
                        SymVal::TypeHandle(tt.handle),
                    ));
                    obj_derefs.push(SymVal::Var(tt.lcl));
                }
                OptCandidate::TargetTest(tt) => {
                    let expected = if tt.through_slot {
                        SymVal::TargetSlot(tt.addr)
                    } else {
                        SymVal::TargetAddr(tt.addr)
                    };
                    conds.push(CloneCond::new(
                        CmpOp::Eq,
                        SymVal::IndirOfLcl {
                            lcl: tt.lcl,
                            offs: tt.field_offs,
                        },
                        expected,
                    ));
                    obj_derefs.push(SymVal::Var(tt.lcl));
                }
            }
        }

        if verbose() {
            dump_conds(loop_id, "derived", &conds);
        }
        info.conditions.extend(conds);
        info.array_derefs.extend(array_derefs);
        info.obj_derefs.extend(obj_derefs);
        true
    }

    /// Build the dereference tree from the loop's array-deref list and emit
    /// the level-grouped condition blocks, object null checks first.
    /// Returns false when the block budget would be exceeded; the caller is
    /// expected to cancel.
    pub fn compute_deref_conditions(&mut self, loop_id: LoopId) -> bool {
        let (derefs, objs) = match self.try_active(loop_id) {
            Some(info) => (info.array_derefs.clone(), info.obj_derefs.clone()),
            None => return false,
        };

        let mut roots: Vec<DerefNode> = Vec::new();
        let mut max_level: i64 = -1;
        for array in &derefs {
            let pos = match DerefNode::find(&roots, array.arr_lcl) {
                Some(pos) => pos,
                None => {
                    roots.push(DerefNode::new(array.clone(), 0));
                    roots.len() - 1
                }
            };
            let mut node = &mut roots[pos];
            for d in 0..array.dim_rank() as usize {
                let ind = array.ind_lcls[d];
                let cur = node;
                let pos = match DerefNode::find(&cur.children, ind) {
                    Some(pos) => pos,
                    None => {
                        let level = cur.level + 1;
                        cur.children.push(DerefNode::new(array.clone(), level));
                        cur.children.len() - 1
                    }
                };
                node = &mut cur.children[pos];
                max_level = max_level.max(node.level as i64);
            }
        }

        // Level 0 is one null-check block; every deeper level costs a
        // bounds block plus a null-check block.
        let cond_blocks = if max_level >= 0 {
            max_level as usize * 2 + 1
        } else if !roots.is_empty() || !objs.is_empty() {
            1
        } else {
            return true;
        };
        if cond_blocks > max_cond_blocks() {
            if verbose() {
                println!(
                    "L{loop_id:02}: too many condition blocks ({cond_blocks} > {})",
                    max_cond_blocks()
                );
            }
            return false;
        }

        let levels = self.ensure_block_conditions(loop_id, cond_blocks);
        for root in &roots {
            root.derive_level_conditions(levels);
        }
        // Object null checks carry no deeper structure; they all land in
        // the first block.
        for obj in &objs {
            levels[0].push(CloneCond::new(CmpOp::Ne, obj.clone(), SymVal::Null));
        }
        true
    }
}
