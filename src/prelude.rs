//! # flowmend Prelude
//!
//! The types needed to describe a function, load a binary and run the engine, for glob
//! import.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all flowmend operations
pub use crate::Error;

/// The result type used throughout flowmend
pub use crate::Result;

// ================================================================================================
// Intermediate Language
// ================================================================================================

/// IL instructions and expressions
pub use crate::analysis::{
    BinaryOp, CmpKind, Expr, FunctionId, InstrIndex, Instruction, Operation, SsaVariable,
    Variable,
};

/// The IR facade and its value types
pub use crate::analysis::{
    BasicBlock, BlockId, BranchDependence, BranchDirection, IlFunction, RegisterValue,
};

/// In-memory functions
pub use crate::analysis::{MemoryFunction, MemoryFunctionBuilder};

// ================================================================================================
// Binary Access
// ================================================================================================

/// Byte storage, patch synthesis and transactions
pub use crate::binary::{
    Assembler, BinaryView, MemoryView, PatchRecord, PatchRequest, Transaction, X86Assembler,
};

// ================================================================================================
// Deobfuscation
// ================================================================================================

/// Engine, resolvers and configuration
pub use crate::deobfuscation::{
    BranchResolver, Engine, EngineConfig, Resolution, ResolveContext, Resolver, ReturnResolver,
};

/// Worklist scheduling
pub use crate::deobfuscation::{AnalysisHost, RunSummary, Scheduler, Settled, Step, TargetQueue};

/// Event logging
pub use crate::deobfuscation::{EventKind, EventLog};
