//! Resolution of returns with computed targets.
//!
//! The protector replaces `jmp target` with a push of the target followed by `ret`,
//! routing the value through a chain of copies and arithmetic so it does not appear next
//! to the return. Once value tracking proves the stack slot the return consumes holds a
//! constant, the chain is followed back to the instruction that first materialized a
//! constant, and a direct jump is written over it.

use log::debug;

use crate::{
    analysis::{Expr, IlFunction, Instruction, Operation},
    binary::PatchRequest,
    deobfuscation::{
        config::EngineConfig,
        events::EventKind,
        resolver::{Resolution, ResolveContext, Resolver},
    },
    Error, Result,
};

/// Replaces an obfuscated return with a direct jump at the root of its value chain.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReturnResolver;

impl ReturnResolver {
    /// Creates the resolver.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Follows the definition chain of `source` back to the first definition whose
    /// source is a literal.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PatternMismatch`] if the chain breaks or is longer than the
    /// function.
    pub fn constant_root<'f>(
        function: &'f dyn IlFunction,
        source: &Expr,
    ) -> Result<&'f Instruction> {
        let mut var = source
            .leading_variable()
            .ok_or_else(|| pattern_mismatch!("jump source {} is not a variable", source))?;

        for _ in 0..=function.instruction_count() {
            let definition = function
                .ssa_definition(var)
                .and_then(|index| function.instruction(index))
                .ok_or_else(|| pattern_mismatch!("{} has no definition", var))?;

            let Operation::SetVar { src, .. } = &definition.operation else {
                return Err(pattern_mismatch!(
                    "{} is defined by {}",
                    var,
                    definition.operation.name()
                ));
            };

            if src.is_constant() {
                return Ok(definition);
            }

            var = src.leading_variable().ok_or_else(|| {
                pattern_mismatch!("cannot follow {} past {}", var, src.operation_name())
            })?;
        }

        Err(pattern_mismatch!(
            "definition chain longer than {} instructions",
            function.instruction_count()
        ))
    }
}

impl Resolver for ReturnResolver {
    fn name(&self) -> &'static str {
        "return"
    }

    fn description(&self) -> &'static str {
        "return to a constant pushed through a value chain"
    }

    fn event_kind(&self) -> EventKind {
        EventKind::ReturnResolved
    }

    fn enabled(&self, config: &EngineConfig) -> bool {
        config.enable_return_resolution
    }

    fn matches(&self, instruction: &Instruction) -> bool {
        instruction.operation.is_return()
    }

    fn resolve(&self, ctx: &mut ResolveContext<'_>, site: &Instruction) -> Result<Resolution> {
        let function = ctx.function;
        let register = ctx.config.stack_pointer;

        let stack_pointer = function.register_value_at(site.address, register);
        let offset = stack_pointer.as_stack_offset().ok_or_else(|| {
            Error::UnresolvableValue(format!(
                "{register:?} at 0x{:x} is {stack_pointer:?}",
                site.address
            ))
        })?;
        debug!("0x{:x}: {:?} = frame{:+}", site.address, register, offset);

        let slot = function.stack_contents_at(site.address, offset, ctx.config.address_size);
        let target = slot.as_constant().ok_or_else(|| {
            Error::UnresolvableValue(format!(
                "stack slot frame{offset:+} at 0x{:x} is {slot:?}",
                site.address
            ))
        })?;
        debug!("0x{:x}: returns to 0x{:x}", site.address, target);

        let source = site
            .operation
            .return_dest()
            .ok_or_else(|| pattern_mismatch!("return at 0x{:x} has no jump source", site.address))?;
        let root = Self::constant_root(function, source)?;
        debug!("0x{:x}: value chain rooted at {}", site.address, root);

        let bytes = ctx.assembler.jump(target, root.address)?;
        let available = usize::try_from(site.address.saturating_sub(root.address))
            .unwrap_or(usize::MAX);
        let patch = PatchRequest::new(root.address, bytes, available);
        patch.validate()?;

        Ok(Resolution { patch, target })
    }
}
