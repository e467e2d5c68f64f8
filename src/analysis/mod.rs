//! Read-only view of lifted functions.
//!
//! The engine never lifts machine code itself. It consumes a function in SSA form through
//! the [`IlFunction`] facade and only reasons about what that facade exposes.
//!
//! # Architecture
//!
//! - [`il`] - Instruction and expression types of the IL
//! - [`function`] - The [`IlFunction`] facade, basic blocks and value queries
//! - [`blocks`] - Per-attempt instruction-to-block memoization
//! - [`condition`] - Canonical form of branch predicates and mirrored branch proofs
//! - [`memory`] - An in-memory [`IlFunction`] and its builder
//!
//! # Usage
//!
//! ```rust
//! use flowmend::analysis::{CmpKind, Expr, MemoryFunctionBuilder, SsaVariable, normalize};
//!
//! let mut f = MemoryFunctionBuilder::new(0x401000);
//! let eax = SsaVariable::new(f.variable(), 0);
//! let condition = Expr::compare(CmpKind::E, Expr::Var(eax), Expr::Const(5));
//! let mirrored = Expr::compare(CmpKind::Ne, Expr::Const(5), Expr::Var(eax));
//!
//! assert!(normalize(&condition)?.same_operands(&normalize(&mirrored)?));
//! # Ok::<(), flowmend::Error>(())
//! ```

pub mod blocks;
pub mod condition;
pub mod function;
pub mod il;
pub mod memory;

pub use blocks::BlockCache;
pub use condition::{normalize, ConditionNormalizer, ConditionOp, NormalizedCondition, Operand};
pub use function::{
    BasicBlock, BlockId, BranchDependence, BranchDirection, IlFunction, RegisterValue,
};
pub use il::{
    BinaryOp, CmpKind, Expr, FunctionId, InstrIndex, Instruction, Operation, SsaVariable,
    Variable,
};
pub use memory::{MemoryFunction, MemoryFunctionBuilder};
