//! Resolver trait and the state shared by one resolution attempt.

use crate::{
    analysis::{BlockCache, IlFunction, Instruction},
    binary::{Assembler, BinaryView, PatchRequest},
    deobfuscation::{config::EngineConfig, events::EventKind},
    Result,
};

/// Everything a resolver may consult during one attempt.
///
/// All access is read-only. The context owns a fresh [`BlockCache`] that is dropped with
/// it, so lookups never outlive the IL snapshot they were made against.
pub struct ResolveContext<'a> {
    /// The function snapshot being analyzed.
    pub function: &'a dyn IlFunction,
    /// The binary's bytes, for instruction lengths and original bytes.
    pub view: &'a dyn BinaryView,
    /// Synthesis of the patch bytes.
    pub assembler: &'a dyn Assembler,
    /// Engine configuration.
    pub config: &'a EngineConfig,
    /// Instruction-to-block lookups for this attempt.
    pub blocks: BlockCache,
}

impl<'a> ResolveContext<'a> {
    /// Creates a context with an empty block cache.
    #[must_use]
    pub fn new(
        function: &'a dyn IlFunction,
        view: &'a dyn BinaryView,
        assembler: &'a dyn Assembler,
        config: &'a EngineConfig,
    ) -> Self {
        Self {
            function,
            view,
            assembler,
            config,
            blocks: BlockCache::new(),
        }
    }
}

/// Outcome of a successful resolution: the patch to apply and the address control now
/// flows to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// The patch that makes the recovered edge explicit.
    pub patch: PatchRequest,
    /// The recovered destination, to be analyzed next.
    pub target: u64,
}

/// Recognizes and resolves one obfuscation idiom.
///
/// Resolvers must be thread-safe (Send + Sync) and must not write anything: they return
/// a [`Resolution`] and the engine applies its patch inside a transaction.
pub trait Resolver: Send + Sync {
    /// Unique name for logging and debugging.
    fn name(&self) -> &'static str;

    /// Human-readable description of the idiom.
    fn description(&self) -> &'static str {
        ""
    }

    /// Event recorded when this resolver recovers an edge.
    fn event_kind(&self) -> EventKind;

    /// Is this resolver switched on by `config`?
    fn enabled(&self, _config: &EngineConfig) -> bool {
        true
    }

    /// Can this resolver handle `instruction` as its site?
    fn matches(&self, instruction: &Instruction) -> bool;

    /// Resolves the obfuscation at `site`.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first precondition that does not hold.
    fn resolve(&self, ctx: &mut ResolveContext<'_>, site: &Instruction) -> Result<Resolution>;
}
