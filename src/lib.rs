//! Decision engine for loop cloning: given the candidates discovered in a
//! loop body, derive the symbolic runtime conditions under which every
//! redundant check can be dropped, prove as many of them as possible at
//! compile time, and hand the residue to the code duplicator as an ordered
//! guard sequence.

pub mod analyze;
pub mod cloning;
pub mod ir;
pub mod loops;

pub use cloning::context::{CloneContext, CloneDecision};
