//! Instruction-to-block memoization.

use rustc_hash::FxHashMap;

use crate::analysis::{
    function::{BasicBlock, IlFunction},
    il::InstrIndex,
};

/// Maps instruction indices to the position of their owning basic block.
///
/// A cache lives for exactly one resolution attempt. It never sees patches applied by
/// earlier attempts because each attempt starts from a new snapshot with a new cache.
#[derive(Debug, Default)]
pub struct BlockCache {
    owners: FxHashMap<InstrIndex, usize>,
}

impl BlockCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the basic block owning `index`, scanning the function's blocks on a miss.
    pub fn block_of<'f>(
        &mut self,
        function: &'f dyn IlFunction,
        index: InstrIndex,
    ) -> Option<&'f BasicBlock> {
        let blocks = function.basic_blocks();
        if let Some(&position) = self.owners.get(&index) {
            return blocks.get(position);
        }

        let position = blocks.iter().position(|block| block.contains(index))?;
        self.owners.insert(index, position);
        blocks.get(position)
    }

    /// Number of cached lookups.
    #[must_use]
    pub fn len(&self) -> usize {
        self.owners.len()
    }

    /// Returns true if nothing has been looked up yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}
