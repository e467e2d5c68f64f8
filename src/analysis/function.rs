//! The IR access facade.
//!
//! [`IlFunction`] is the seam between the engine and whatever lifts machine code into IL.
//! The engine only ever reads through it: instruction and SSA definition lookups, basic
//! blocks with their dominator sets, branch dependence, and the register/stack value
//! queries the return resolver needs.

use std::collections::BTreeMap;

use iced_x86::Register;

use crate::analysis::il::{FunctionId, InstrIndex, Instruction, SsaVariable};

/// Identity of a basic block inside one function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub usize);

/// A basic block of the IL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicBlock {
    /// Identity of the block.
    pub id: BlockId,
    /// First instruction of the block.
    pub start: InstrIndex,
    /// One past the last instruction of the block.
    pub end: InstrIndex,
    /// Blocks dominating this one, including the block itself.
    pub dominators: Vec<BlockId>,
}

impl BasicBlock {
    /// Returns true if `index` lies within `[start, end)`.
    #[inline]
    #[must_use]
    pub fn contains(&self, index: InstrIndex) -> bool {
        self.start <= index && index < self.end
    }

    /// Returns true if `block` dominates this block.
    #[must_use]
    pub fn is_dominated_by(&self, block: BlockId) -> bool {
        self.dominators.contains(&block)
    }
}

/// Outcome of a branch that an instruction's reachability depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BranchDirection {
    /// Reachable only when the branch is taken.
    TrueBranchDependent,
    /// Reachable only when the branch is not taken.
    FalseBranchDependent,
}

/// Branch dependence set of an instruction: every prior branch whose outcome decides
/// whether the instruction executes, with the outcome required.
///
/// An empty set means the instruction is reached unconditionally.
pub type BranchDependence = BTreeMap<InstrIndex, BranchDirection>;

/// A value provable at a given address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterValue {
    /// A known constant.
    Constant(u64),
    /// A known offset from the stack frame base.
    StackFrameOffset(i64),
    /// Nothing could be proven.
    Undetermined,
}

impl RegisterValue {
    /// Returns the constant, if the value is one.
    #[must_use]
    pub fn as_constant(self) -> Option<u64> {
        match self {
            RegisterValue::Constant(value) => Some(value),
            RegisterValue::StackFrameOffset(_) | RegisterValue::Undetermined => None,
        }
    }

    /// Returns the value as an offset into the stack frame.
    ///
    /// Constants are accepted as raw offsets; some value trackers report a stack pointer
    /// they fully resolved that way.
    #[must_use]
    pub fn as_stack_offset(self) -> Option<i64> {
        match self {
            RegisterValue::StackFrameOffset(offset) => Some(offset),
            #[allow(clippy::cast_possible_wrap)]
            RegisterValue::Constant(value) => Some(value as i64),
            RegisterValue::Undetermined => None,
        }
    }
}

/// Read access to a lifted function in SSA form.
///
/// Implementations must be consistent snapshots: the engine queries many of these
/// methods during one resolution attempt and assumes they describe the same IL.
pub trait IlFunction {
    /// Identity of the function.
    fn id(&self) -> FunctionId;

    /// Number of IL instructions.
    fn instruction_count(&self) -> usize;

    /// Returns the instruction at `index`, or `None` past the end.
    fn instruction(&self, index: InstrIndex) -> Option<&Instruction>;

    /// Returns the first IL instruction lifted from the native instruction at `address`.
    fn instruction_index_at(&self, address: u64) -> Option<InstrIndex>;

    /// All basic blocks of the IL.
    fn basic_blocks(&self) -> &[BasicBlock];

    /// Returns the instruction defining `var`.
    fn ssa_definition(&self, var: SsaVariable) -> Option<InstrIndex>;

    /// Branch dependence set of the instruction at `index`.
    fn branch_dependence(&self, index: InstrIndex) -> BranchDependence;

    /// The provable value of `register` right before the instruction at `address`.
    fn register_value_at(&self, address: u64, register: Register) -> RegisterValue;

    /// The provable value of the `size` bytes at stack frame `offset`, right before the
    /// instruction at `address`.
    fn stack_contents_at(&self, address: u64, offset: i64, size: usize) -> RegisterValue;
}
