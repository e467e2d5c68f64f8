//! Main deobfuscation engine.
//!
//! The [`Engine`] turns an address into at most one recovered edge:
//!
//! 1. **Classification**: find the first control-flow instruction at or after the address
//!    and the resolver that accepts it
//! 2. **Resolution**: run the resolver read-only against the IL snapshot
//! 3. **Patching**: apply the resolver's patch inside a [`Transaction`]
//! 4. **Recording**: log the outcome and append it to the [`EventLog`]
//!
//! It is shared by the [`Scheduler`](crate::deobfuscation::Scheduler), which chains
//! recovered targets, and by hosts that resolve a single address on demand.

use log::{debug, info, warn};

use crate::{
    analysis::{IlFunction, Instruction, Operation},
    binary::{Assembler, BinaryView, Transaction},
    deobfuscation::{
        branch::BranchResolver,
        config::EngineConfig,
        events::{EventKind, EventLog},
        resolver::{ResolveContext, Resolver},
        ret::ReturnResolver,
    },
    Result,
};

/// Classifies obfuscated sites and applies the matching resolver.
///
/// # Examples
///
/// ```rust
/// use flowmend::analysis::{Expr, MemoryFunctionBuilder, RegisterValue, SsaVariable};
/// use flowmend::binary::{BinaryView, MemoryView, X86Assembler};
/// use flowmend::deobfuscation::{Engine, EngineConfig};
/// use iced_x86::Register;
///
/// let mut f = MemoryFunctionBuilder::new(0x401000);
/// let v = SsaVariable::new(f.variable(), 0);
/// f.set_var(0x401000, v, Expr::ConstPtr(0x401050));
/// f.ret(0x401010, Some(Expr::Var(v)));
/// f.register_value(0x401010, Register::ESP, RegisterValue::StackFrameOffset(-4));
/// f.stack_value(0x401010, -4, 4, RegisterValue::Constant(0x401050));
/// let function = f.build();
///
/// let mut view = MemoryView::new(32).with_segment(0x401000, vec![0x90; 0x60]);
/// let engine = Engine::new(EngineConfig::x86());
///
/// let target = engine.resolve_at(&function, &mut view, &X86Assembler::new(32), 0x401000)?;
/// assert_eq!(target, 0x401050);
/// assert_eq!(view.read(0x401000, 2)?, vec![0xeb, 0x4e]);
/// # Ok::<(), flowmend::Error>(())
/// ```
pub struct Engine {
    config: EngineConfig,
    resolvers: Vec<Box<dyn Resolver>>,
    events: EventLog,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl Engine {
    /// Creates an engine with the return and branch resolvers.
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            resolvers: vec![Box::new(ReturnResolver::new()), Box::new(BranchResolver::new())],
            events: EventLog::new(),
        }
    }

    /// Adds a resolver, consulted after the built-in ones.
    #[must_use]
    pub fn with_resolver(mut self, resolver: Box<dyn Resolver>) -> Self {
        self.resolvers.push(resolver);
        self
    }

    /// The engine configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Everything the engine has recorded so far.
    #[must_use]
    pub fn events(&self) -> &EventLog {
        &self.events
    }

    /// Names of the registered resolvers.
    pub fn resolver_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.resolvers.iter().map(|resolver| resolver.name())
    }

    /// Finds the site to resolve for `address` and the resolver responsible for it.
    ///
    /// Walks forward from the first IL instruction lifted from `address`, skipping
    /// instructions that do not transfer control. The first control transfer decides:
    /// a return or conditional branch is handed to the enabled resolver accepting it,
    /// anything else means there is no obfuscated site.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::PatternMismatch`] if no resolver applies.
    pub fn classify<'f>(
        &self,
        function: &'f dyn IlFunction,
        address: u64,
    ) -> Result<(&'f Instruction, &dyn Resolver)> {
        if !self.config.any_enabled() {
            return Err(pattern_mismatch!("every resolver is disabled"));
        }
        let mut index = function
            .instruction_index_at(address)
            .ok_or_else(|| pattern_mismatch!("no IL instruction at 0x{:x}", address))?;

        while index.index() < function.instruction_count() {
            let Some(instruction) = function.instruction(index) else {
                break;
            };
            match instruction.operation {
                Operation::SetVar { .. } | Operation::Nop | Operation::Unsupported { .. } => {
                    index = index.next();
                }
                Operation::Return { .. } | Operation::ReturnHint { .. } | Operation::If { .. } => {
                    return self
                        .resolvers
                        .iter()
                        .find(|resolver| {
                            resolver.enabled(&self.config) && resolver.matches(instruction)
                        })
                        .map(|resolver| (instruction, resolver.as_ref()))
                        .ok_or_else(|| {
                            pattern_mismatch!("no enabled resolver for {}", instruction)
                        });
                }
                Operation::Goto { .. } | Operation::Undefined => {
                    return Err(pattern_mismatch!(
                        "0x{:x} reaches {} first",
                        address,
                        instruction.operation.name()
                    ));
                }
            }
        }

        Err(pattern_mismatch!(
            "no control transfer after 0x{:x}",
            address
        ))
    }

    /// Classifies `address`, resolves the site and applies the patch.
    ///
    /// On success the patch is committed and the recovered target returned. On failure
    /// nothing stays written and the failure is recorded. Inputs that are simply not an
    /// obfuscated site are logged at debug level, anything else as a warning.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidAddressSize`] for an unsupported configuration,
    /// otherwise the first error of classification, resolution or patching.
    pub fn resolve_at(
        &self,
        function: &dyn IlFunction,
        view: &mut dyn BinaryView,
        assembler: &dyn Assembler,
        address: u64,
    ) -> Result<u64> {
        let result = self.try_resolve_at(function, view, assembler, address);
        if let Err(error) = &result {
            if error.is_mismatch() {
                debug!("{} @0x{:x}: {}", function.id(), address, error);
            } else {
                warn!("{} @0x{:x}: {}", function.id(), address, error);
            }
            self.events
                .record(EventKind::ResolutionFailed)
                .at(function.id(), address)
                .message(error.to_string());
        }
        result
    }

    fn try_resolve_at(
        &self,
        function: &dyn IlFunction,
        view: &mut dyn BinaryView,
        assembler: &dyn Assembler,
        address: u64,
    ) -> Result<u64> {
        self.config.validate()?;
        let id = function.id();
        let (site, resolver) = self.classify(function, address)?;
        debug!("{} @0x{:x}: {} site {}", id, address, resolver.name(), site);
        self.events
            .record(EventKind::SiteClassified)
            .at(id, site.address)
            .resolver(resolver.name())
            .message(site.to_string());

        let resolution = {
            let mut ctx = ResolveContext::new(function, &*view, assembler, &self.config);
            resolver.resolve(&mut ctx, site)?
        };

        let mut transaction = Transaction::begin(view);
        let applied = transaction.apply(&resolution.patch).map(|_| ());
        if let Err(error) = applied {
            drop(transaction);
            self.events
                .record(EventKind::PatchReverted)
                .at(id, resolution.patch.address)
                .resolver(resolver.name());
            return Err(error);
        }
        transaction.commit();

        info!("{} patched {}", id, resolution.patch);
        self.events
            .record(EventKind::PatchApplied)
            .at(id, resolution.patch.address)
            .resolver(resolver.name())
            .message(resolution.patch.to_string());

        info!(
            "{} @0x{:x}: {} resolved to 0x{:x}",
            id,
            site.address,
            resolver.name(),
            resolution.target
        );
        self.events
            .record(resolver.event_kind())
            .at(id, site.address)
            .resolver(resolver.name())
            .message(format!("0x{:x} -> 0x{:x}", site.address, resolution.target));

        Ok(resolution.target)
    }
}
