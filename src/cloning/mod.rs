pub mod access;
pub mod candidates;
pub mod cond;
pub mod context;
pub mod deref;
mod derive;
pub mod symbol;

pub use access::{ArrAccess, SpanAccess};
pub use candidates::OptCandidate;
pub use cond::CloneCond;
pub use context::{CloneContext, CloneDecision};
pub use symbol::{ArrayKind, LenOp, SymArray, SymExpr, SymSpan, SymVal};
