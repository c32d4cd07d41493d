//! Per-compilation aggregate driving loop cloning decisions: candidate
//! lists, derived conditions, deref prerequisites, block-grouped conditions
//! and iteration metadata, one slot per loop.

use std::env;

use super::candidates::OptCandidate;
use super::cond::CloneCond;
use super::symbol::{SymArray, SymVal};
use crate::analyze::LenFacts;
use crate::ir::{BlockId, FnBody, ValueKind};
use crate::loops::{LoopId, LoopIterInfo};

pub(crate) fn env_bool(key: &str, default_v: bool) -> bool {
    match env::var(key) {
        Ok(v) => matches!(
            v.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => default_v,
    }
}

pub(crate) fn env_usize(key: &str, default_v: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(default_v)
}

pub(crate) fn verbose() -> bool {
    env_bool("LOOPCLONE_VERBOSE", false)
}

/// Every short-circuit level becomes its own compare-and-branch block, so
/// the count is capped to bound code growth. The default caps nesting at
/// two array dimensions.
pub(crate) fn max_cond_blocks() -> usize {
    env_usize("LOOPCLONE_MAX_COND_BLOCKS", 4)
}

/// Everything derived for one loop. The lists are only ever consistent
/// with each other: conditions come from exactly the candidates present.
#[derive(Debug, Clone, Default)]
pub struct LoopCloneInfo {
    pub candidates: Vec<OptCandidate>,
    /// Flat cloning conditions; the guard is their conjunction, left to
    /// right, short-circuiting only at block boundaries.
    pub conditions: Vec<CloneCond>,
    /// Array prefixes that must be null/bounds-checked before the flat
    /// conditions may read their lengths.
    pub array_derefs: Vec<SymArray>,
    /// Plain object references that must be non-null.
    pub obj_derefs: Vec<SymVal>,
    /// Conditions grouped per short-circuit block, in evaluation order.
    pub block_conditions: Vec<Vec<CloneCond>>,
    pub iter_info: Option<LoopIterInfo>,
}

#[derive(Debug, Clone, Default)]
pub enum LoopState {
    /// No optimization attempted yet.
    #[default]
    NotConsidered,
    /// Cloning called off; downstream consumers leave the loop untouched.
    Cancelled,
    Active(LoopCloneInfo),
}

/// What the code duplicator should do with a loop once conditions have been
/// derived and optimized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloneDecision {
    /// Every condition held statically: keep one loop, rewrite it in place.
    RewriteInPlace,
    /// Some condition is statically false, or cloning was cancelled.
    Abort,
    /// Residual runtime conditions remain: emit the guard, clone the loop.
    EmitGuard,
}

pub struct CloneContext {
    loops: Vec<LoopState>,
    facts: LenFacts,
}

impl CloneContext {
    /// Once the guard is in place the dynamic checks are expected to pass
    /// nearly always, so the fast copy carries almost all of the weight.
    pub const FAST_PATH_WEIGHT_SCALE: f64 = 0.99;
    pub const SLOW_PATH_WEIGHT_SCALE: f64 = 1.0 - Self::FAST_PATH_WEIGHT_SCALE;

    pub fn new(loop_count: usize) -> Self {
        Self::with_facts(loop_count, LenFacts::default())
    }

    pub fn with_facts(loop_count: usize, facts: LenFacts) -> Self {
        Self {
            loops: vec![LoopState::default(); loop_count],
            facts,
        }
    }

    pub fn len_facts(&self) -> &LenFacts {
        &self.facts
    }

    pub(crate) fn try_active(&self, loop_id: LoopId) -> Option<&LoopCloneInfo> {
        match &self.loops[loop_id] {
            LoopState::Active(info) => Some(info),
            _ => None,
        }
    }

    pub(crate) fn try_active_mut(&mut self, loop_id: LoopId) -> Option<&mut LoopCloneInfo> {
        match &mut self.loops[loop_id] {
            LoopState::Active(info) => Some(info),
            _ => None,
        }
    }

    fn active_mut(&mut self, loop_id: LoopId) -> &mut LoopCloneInfo {
        let slot = &mut self.loops[loop_id];
        if let LoopState::NotConsidered = slot {
            *slot = LoopState::Active(LoopCloneInfo::default());
        }
        match slot {
            LoopState::Active(info) => info,
            LoopState::Cancelled => {
                panic!("loop L{loop_id:02} was cancelled; nothing may be added to it")
            }
            LoopState::NotConsidered => unreachable!(),
        }
    }

    pub fn ensure_loop_opt_info(&mut self, loop_id: LoopId) -> &mut Vec<OptCandidate> {
        &mut self.active_mut(loop_id).candidates
    }

    pub fn get_loop_opt_info(&self, loop_id: LoopId) -> Option<&Vec<OptCandidate>> {
        self.try_active(loop_id).map(|info| &info.candidates)
    }

    /// The sole abort path: drop everything derived for the loop and mark
    /// it so no clone is attempted. Idempotent.
    pub fn cancel_loop_opt_info(&mut self, loop_id: LoopId) {
        if verbose() {
            println!("L{loop_id:02}: cloning cancelled");
        }
        self.loops[loop_id] = LoopState::Cancelled;
    }

    pub fn is_cancelled(&self, loop_id: LoopId) -> bool {
        matches!(self.loops[loop_id], LoopState::Cancelled)
    }

    pub fn ensure_conditions(&mut self, loop_id: LoopId) -> &mut Vec<CloneCond> {
        &mut self.active_mut(loop_id).conditions
    }

    pub fn get_conditions(&self, loop_id: LoopId) -> Option<&Vec<CloneCond>> {
        self.try_active(loop_id).map(|info| &info.conditions)
    }

    pub fn ensure_array_derefs(&mut self, loop_id: LoopId) -> &mut Vec<SymArray> {
        &mut self.active_mut(loop_id).array_derefs
    }

    pub fn ensure_obj_derefs(&mut self, loop_id: LoopId) -> &mut Vec<SymVal> {
        &mut self.active_mut(loop_id).obj_derefs
    }

    pub fn set_iter_info(&mut self, loop_id: LoopId, info: LoopIterInfo) {
        self.active_mut(loop_id).iter_info = Some(info);
    }

    pub fn get_iter_info(&self, loop_id: LoopId) -> Option<&LoopIterInfo> {
        self.try_active(loop_id).and_then(|info| info.iter_info.as_ref())
    }

    pub fn ensure_block_conditions(
        &mut self,
        loop_id: LoopId,
        total_blocks: usize,
    ) -> &mut Vec<Vec<CloneCond>> {
        let info = self.active_mut(loop_id);
        if info.block_conditions.len() < total_blocks {
            info.block_conditions.resize_with(total_blocks, Vec::new);
        }
        &mut info.block_conditions
    }

    pub fn get_block_conditions(&self, loop_id: LoopId) -> Option<&Vec<Vec<CloneCond>>> {
        self.try_active(loop_id).map(|info| &info.block_conditions)
    }

    pub fn has_block_conditions(&self, loop_id: LoopId) -> bool {
        self.try_active(loop_id)
            .map_or(false, |info| info.block_conditions.iter().any(|l| !l.is_empty()))
    }

    /// Remove redundant flat conditions and strip the ones provable true.
    /// A condition provable false cancels cloning for the loop outright.
    pub fn optimize_conditions(&mut self, loop_id: LoopId) {
        let CloneContext {
            ref mut loops,
            ref facts,
        } = *self;
        let LoopState::Active(info) = &mut loops[loop_id] else {
            return;
        };
        let ok = optimize_cond_list(&mut info.conditions, facts);
        if verbose() {
            dump_conds(loop_id, "optimized", &info.conditions);
        }
        if !ok {
            self.cancel_loop_opt_info(loop_id);
        }
    }

    /// Same optimization, applied within each block level independently.
    /// Levels are never merged across: the ordering is what makes a deeper
    /// condition safe to evaluate.
    pub fn optimize_block_conditions(&mut self, loop_id: LoopId) {
        let CloneContext {
            ref mut loops,
            ref facts,
        } = *self;
        let LoopState::Active(info) = &mut loops[loop_id] else {
            return;
        };
        let mut ok = true;
        for level in &mut info.block_conditions {
            ok &= optimize_cond_list(level, facts);
        }
        if !ok {
            self.cancel_loop_opt_info(loop_id);
        }
    }

    /// Aggregate the optimized flat list under AND semantics. Returns
    /// `(all_true, any_false)`; at most one of the two is set. Neither set
    /// means residual runtime conditions remain.
    pub fn evaluate_conditions(&self, loop_id: LoopId) -> (bool, bool) {
        let info = self
            .try_active(loop_id)
            .expect("conditions evaluated for a loop with no active context");
        let mut all_true = true;
        let mut any_false = false;
        for cond in &info.conditions {
            match cond.evaluates(&self.facts) {
                Some(true) => {}
                Some(false) => {
                    any_false = true;
                    all_true = false;
                    break;
                }
                None => all_true = false,
            }
        }
        if verbose() {
            println!("L{loop_id:02}: evaluate all_true={all_true} any_false={any_false}");
        }
        (all_true, any_false)
    }

    /// The signal for the code duplicator, computed from the optimized
    /// flat and block-grouped lists.
    pub fn decision(&self, loop_id: LoopId) -> CloneDecision {
        let Some(info) = self.try_active(loop_id) else {
            return CloneDecision::Abort;
        };
        let (all_true, any_false) = self.evaluate_conditions(loop_id);
        if any_false {
            return CloneDecision::Abort;
        }
        let residual_blocks = info.block_conditions.iter().any(|l| !l.is_empty());
        if all_true && !residual_blocks {
            CloneDecision::RewriteInPlace
        } else {
            CloneDecision::EmitGuard
        }
    }

    /// Full condition lifecycle for one loop: derive the flat conditions,
    /// group the deref prerequisites into blocks, optimize both, decide.
    /// Cancels and reports Abort at the first disqualification.
    pub fn derive_and_decide(&mut self, loop_id: LoopId, body: &FnBody) -> CloneDecision {
        if self.get_loop_opt_info(loop_id).map_or(true, |c| c.is_empty()) {
            self.cancel_loop_opt_info(loop_id);
            return CloneDecision::Abort;
        }
        if !self.derive_cloning_conditions(loop_id, body) {
            self.cancel_loop_opt_info(loop_id);
            return CloneDecision::Abort;
        }
        if !self.compute_deref_conditions(loop_id) {
            self.cancel_loop_opt_info(loop_id);
            return CloneDecision::Abort;
        }
        self.optimize_conditions(loop_id);
        self.optimize_block_conditions(loop_id);
        if self.is_cancelled(loop_id) {
            return CloneDecision::Abort;
        }
        self.decision(loop_id)
    }

    /// Materialize `conds` as one conjunctive, non-short-circuiting test in
    /// a new block spliced after `insert_after`. The block falls through to
    /// the old successor when the test holds and branches to `slow_head`
    /// otherwise.
    pub fn cond_to_stmt_in_block(
        &self,
        body: &mut FnBody,
        conds: &[CloneCond],
        slow_head: BlockId,
        insert_after: BlockId,
    ) -> BlockId {
        assert!(!conds.is_empty(), "a guard block needs at least one condition");
        let mut test = conds[0].to_value(body);
        for cond in &conds[1..] {
            let rhs = cond.to_value(body);
            test = body.add_value(ValueKind::BitAnd { lhs: test, rhs });
        }
        debug_assert!(
            !body.has_side_effects(test),
            "guard conditions must materialize side-effect-free"
        );
        body.insert_cond_block_after(insert_after, test, slow_head)
    }

    /// Chain every residual block-condition level, then the flat
    /// conditions, as successive short-circuit blocks after `insert_after`.
    /// Returns the last guard block; its fall-through edge enters the fast
    /// copy.
    pub fn insert_guard_blocks(
        &self,
        body: &mut FnBody,
        loop_id: LoopId,
        slow_head: BlockId,
        mut insert_after: BlockId,
    ) -> BlockId {
        let info = self
            .try_active(loop_id)
            .expect("guard emitted for a loop with no active context");
        for level in &info.block_conditions {
            if level.is_empty() {
                continue;
            }
            insert_after = self.cond_to_stmt_in_block(body, level, slow_head, insert_after);
        }
        if !info.conditions.is_empty() {
            insert_after = self.cond_to_stmt_in_block(body, &info.conditions, slow_head, insert_after);
        }
        insert_after
    }

    /// Split the original loop weight 99/1 between the two copies.
    pub fn scale_guard_weights(body: &mut FnBody, fast_head: BlockId, slow_head: BlockId) {
        let base = body.blocks[fast_head].weight;
        body.blocks[fast_head].weight = base * Self::FAST_PATH_WEIGHT_SCALE;
        body.blocks[slow_head].weight = base * Self::SLOW_PATH_WEIGHT_SCALE;
    }
}

/// Pairwise optimization of one condition list. Returns false when a
/// condition is statically false.
fn optimize_cond_list(conds: &mut Vec<CloneCond>, facts: &LenFacts) -> bool {
    let mut i = 0;
    while i < conds.len() {
        match conds[i].evaluates(facts) {
            Some(true) => {
                conds.remove(i);
                continue;
            }
            Some(false) => return false,
            None => {}
        }
        let mut combined = false;
        for j in (i + 1)..conds.len() {
            if let Some(merged) = conds[i].combines(&conds[j]) {
                conds.remove(j);
                conds[i] = merged;
                combined = true;
                break;
            }
        }
        // A merge can unlock merges with earlier entries; start over.
        if combined {
            i = 0;
        } else {
            i += 1;
        }
    }
    true
}

pub(crate) fn dump_conds(loop_id: LoopId, label: &str, conds: &[CloneCond]) {
    let rendered: Vec<String> = conds.iter().map(|c| c.to_string()).collect();
    println!("L{loop_id:02}: {label} conditions [{}]", rendered.join(", "));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::CmpOp;

    fn cond(op: CmpOp, lhs: SymVal, rhs: SymVal) -> CloneCond {
        CloneCond::new(op, lhs, rhs)
    }

    #[test]
    fn lifecycle_ensure_get_cancel() {
        let mut ctx = CloneContext::new(2);
        assert!(ctx.get_loop_opt_info(0).is_none());
        assert!(ctx.get_conditions(0).is_none());

        ctx.ensure_conditions(0)
            .push(cond(CmpOp::Ge, SymVal::Var(1), SymVal::Const(0)));
        assert_eq!(ctx.get_conditions(0).unwrap().len(), 1);
        assert!(ctx.get_loop_opt_info(0).is_some(), "slot is one record");

        ctx.cancel_loop_opt_info(0);
        assert!(ctx.is_cancelled(0));
        assert!(ctx.get_conditions(0).is_none(), "cancel drops derived state");
        ctx.cancel_loop_opt_info(0);
        assert!(ctx.is_cancelled(0), "cancel is idempotent");

        // The other loop's slot is untouched.
        assert!(!ctx.is_cancelled(1));
        assert!(ctx.get_conditions(1).is_none());
    }

    #[test]
    fn optimize_removes_true_and_merges_redundant() {
        let mut ctx = CloneContext::new(1);
        let conds = ctx.ensure_conditions(0);
        conds.push(cond(CmpOp::Ge, SymVal::Const(3), SymVal::Const(0)));
        conds.push(cond(CmpOp::Lt, SymVal::Var(1), SymVal::Const(7)));
        conds.push(cond(CmpOp::Lt, SymVal::Var(1), SymVal::Const(5)));
        conds.push(cond(CmpOp::Lt, SymVal::Var(1), SymVal::Const(5)));

        ctx.optimize_conditions(0);
        let out = ctx.get_conditions(0).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0], cond(CmpOp::Lt, SymVal::Var(1), SymVal::Const(5)));

        // Idempotent: a second run changes nothing.
        let snapshot = out.clone();
        ctx.optimize_conditions(0);
        assert_eq!(ctx.get_conditions(0).unwrap(), &snapshot);
    }

    #[test]
    fn statically_false_condition_cancels_the_loop() {
        let mut ctx = CloneContext::new(1);
        ctx.ensure_conditions(0)
            .push(cond(CmpOp::Lt, SymVal::Var(1), SymVal::Var(1)));
        ctx.optimize_conditions(0);
        assert!(ctx.is_cancelled(0));
        assert_eq!(ctx.decision(0), CloneDecision::Abort);
    }

    #[test]
    fn evaluate_flags_are_mutually_exclusive() {
        let mut ctx = CloneContext::new(3);

        ctx.ensure_conditions(0)
            .push(cond(CmpOp::Ge, SymVal::Const(3), SymVal::Const(0)));
        assert_eq!(ctx.evaluate_conditions(0), (true, false));

        ctx.ensure_conditions(1)
            .push(cond(CmpOp::Lt, SymVal::Var(1), SymVal::Var(1)));
        assert_eq!(ctx.evaluate_conditions(1), (false, true));

        ctx.ensure_conditions(2)
            .push(cond(CmpOp::Le, SymVal::Var(1), SymVal::Var(2)));
        assert_eq!(ctx.evaluate_conditions(2), (false, false));
    }

    #[test]
    fn empty_condition_list_is_vacuously_true() {
        let mut ctx = CloneContext::new(1);
        ctx.ensure_conditions(0);
        assert_eq!(ctx.evaluate_conditions(0), (true, false));
        assert_eq!(ctx.decision(0), CloneDecision::RewriteInPlace);
    }

    #[test]
    fn block_conditions_optimize_per_level_only() {
        let mut ctx = CloneContext::new(1);
        let levels = ctx.ensure_block_conditions(0, 2);
        // The same condition in two levels must stay in two levels.
        levels[0].push(cond(CmpOp::Ne, SymVal::Var(0), SymVal::Null));
        levels[1].push(cond(CmpOp::Ne, SymVal::Var(0), SymVal::Null));
        levels[1].push(cond(CmpOp::Ne, SymVal::Var(0), SymVal::Null));

        ctx.optimize_block_conditions(0);
        let levels = ctx.get_block_conditions(0).unwrap();
        assert_eq!(levels[0].len(), 1);
        assert_eq!(levels[1].len(), 1, "duplicates merge within a level");
        assert!(ctx.has_block_conditions(0));
    }

    #[test]
    #[should_panic(expected = "was cancelled")]
    fn ensure_after_cancel_is_a_bug() {
        let mut ctx = CloneContext::new(1);
        ctx.cancel_loop_opt_info(0);
        ctx.ensure_conditions(0);
    }
}
