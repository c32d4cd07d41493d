//! Facts imported from earlier analysis passes. A proven minimum length for
//! a length-carrying local lets static evaluation discharge constant bounds
//! and the matching null check without a runtime test.

use crate::ir::LclNum;
use rustc_hash::FxHashMap;

#[derive(Debug, Clone, Default)]
pub struct LenFacts {
    min_len: FxHashMap<LclNum, i64>,
}

impl LenFacts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `length(lcl) >= n`. Later calls only tighten the bound.
    pub fn set_min_len(&mut self, lcl: LclNum, n: i64) {
        let entry = self.min_len.entry(lcl).or_insert(n);
        if n > *entry {
            *entry = n;
        }
    }

    pub fn min_len(&self, lcl: LclNum) -> Option<i64> {
        self.min_len.get(&lcl).copied()
    }

    /// A local with any proven length cannot be null.
    pub fn proves_non_null(&self, lcl: LclNum) -> bool {
        self.min_len.contains_key(&lcl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn min_len_only_tightens() {
        let mut facts = LenFacts::new();
        facts.set_min_len(3, 10);
        facts.set_min_len(3, 4);
        assert_eq!(facts.min_len(3), Some(10));
        facts.set_min_len(3, 12);
        assert_eq!(facts.min_len(3), Some(12));
        assert!(facts.proves_non_null(3));
        assert!(!facts.proves_non_null(4));
    }
}
