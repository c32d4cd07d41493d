use std::fmt;

use super::symbol::{SymExpr, SymVal};
use crate::analyze::LenFacts;
use crate::ir::{CmpOp, FnBody, ValueId, ValueKind};

/// One relational comparison between two symbolic expressions. A loop's
/// guard is the conjunction of all of its conditions, evaluated left to
/// right and short-circuiting only at block boundaries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloneCond {
    pub op: CmpOp,
    pub lhs: SymExpr,
    pub rhs: SymExpr,
    pub unsigned_cmp: bool,
}

impl CloneCond {
    pub fn new(op: CmpOp, lhs: SymVal, rhs: SymVal) -> Self {
        Self {
            op,
            lhs: SymExpr::new(lhs),
            rhs: SymExpr::new(rhs),
            unsigned_cmp: false,
        }
    }

    pub fn new_unsigned(op: CmpOp, lhs: SymVal, rhs: SymVal) -> Self {
        Self {
            unsigned_cmp: true,
            ..Self::new(op, lhs, rhs)
        }
    }

    /// Try to resolve the condition to a compile-time boolean. `None` means
    /// it has to be checked at runtime; callers must not read any more into
    /// that than "not evaluable".
    pub fn evaluates(&self, facts: &LenFacts) -> Option<bool> {
        // A comparison of an expression against itself needs no runtime state.
        if self.lhs == self.rhs {
            return Some(self.op.holds_on_equal());
        }
        match (&self.lhs.val, &self.rhs.val) {
            (SymVal::Const(a), SymVal::Const(b)) => {
                Some(self.op.apply_u64(*a as u64, *b as u64))
            }
            // Lengths are non-negative by construction.
            (lhs, SymVal::Const(0)) if lhs.is_length() && self.op == CmpOp::Ge => Some(true),
            (SymVal::Const(0), rhs) if rhs.is_length() && self.op == CmpOp::Le => Some(true),
            // A proven minimum length discharges a constant bound.
            (SymVal::Const(c), rhs) => {
                let min = rhs.len_root().and_then(|lcl| facts.min_len(lcl))?;
                match self.op {
                    CmpOp::Le if min >= *c as i64 => Some(true),
                    CmpOp::Lt if min > *c as i64 => Some(true),
                    _ => None,
                }
            }
            (lhs, SymVal::Const(c)) => {
                let min = lhs.len_root().and_then(|lcl| facts.min_len(lcl))?;
                match self.op {
                    CmpOp::Ge if min >= *c as i64 => Some(true),
                    CmpOp::Gt if min > *c as i64 => Some(true),
                    _ => None,
                }
            }
            // A reference with a proven length cannot be null.
            (lhs, SymVal::Null) if self.op == CmpOp::Ne => lhs
                .null_root()
                .filter(|lcl| facts.proves_non_null(*lcl))
                .map(|_| true),
            _ => None,
        }
    }

    /// Try to replace `self` and `other` with one condition at least as
    /// tight as both. Never yields a weaker condition; signedness must
    /// match exactly.
    pub fn combines(&self, other: &CloneCond) -> Option<CloneCond> {
        if self.unsigned_cmp != other.unsigned_cmp {
            return None;
        }
        // Rewrite the other condition into this operand order.
        let norm = if self.lhs == other.rhs && self.rhs == other.lhs {
            CloneCond {
                op: other.op.swapped(),
                lhs: other.rhs.clone(),
                rhs: other.lhs.clone(),
                unsigned_cmp: other.unsigned_cmp,
            }
        } else {
            other.clone()
        };

        if self.lhs == norm.lhs && self.rhs == norm.rhs {
            if self.op == norm.op {
                return Some(self.clone());
            }
            // Mixed strictness over the same operands: keep the strict form.
            let merged_op = match (self.op, norm.op) {
                (CmpOp::Lt, CmpOp::Le) | (CmpOp::Le, CmpOp::Lt) => CmpOp::Lt,
                (CmpOp::Gt, CmpOp::Ge) | (CmpOp::Ge, CmpOp::Gt) => CmpOp::Gt,
                (CmpOp::Eq, CmpOp::Le | CmpOp::Ge) | (CmpOp::Le | CmpOp::Ge, CmpOp::Eq) => {
                    CmpOp::Eq
                }
                _ => return None,
            };
            return Some(CloneCond {
                op: merged_op,
                ..self.clone()
            });
        }

        // Two constant bounds on the same operand in the same direction:
        // keep the tighter one.
        if self.lhs == norm.lhs {
            if let (SymVal::Const(a), SymVal::Const(b)) = (&self.rhs.val, &norm.rhs.val) {
                let upper = |op: CmpOp, c: u32| match op {
                    CmpOp::Lt => Some(c as i64 - 1),
                    CmpOp::Le => Some(c as i64),
                    _ => None,
                };
                let lower = |op: CmpOp, c: u32| match op {
                    CmpOp::Gt => Some(c as i64 + 1),
                    CmpOp::Ge => Some(c as i64),
                    _ => None,
                };
                if let (Some(u1), Some(u2)) = (upper(self.op, *a), upper(norm.op, *b)) {
                    return Some(if u1 <= u2 { self.clone() } else { norm });
                }
                if let (Some(l1), Some(l2)) = (lower(self.op, *a), lower(norm.op, *b)) {
                    return Some(if l1 >= l2 { self.clone() } else { norm });
                }
            }
        }
        None
    }

    pub fn to_value(&self, body: &mut FnBody) -> ValueId {
        let lhs = self.lhs.to_value(body);
        let rhs = self.rhs.to_value(body);
        body.add_value(ValueKind::Cmp {
            op: self.op,
            lhs,
            rhs,
            unsigned: self.unsigned_cmp,
        })
    }
}

impl fmt::Display for CloneCond {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}{} {}",
            self.lhs,
            self.op.label(),
            if self.unsigned_cmp { "u" } else { "" },
            self.rhs
        )
    }
}
