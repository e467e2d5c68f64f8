//! Resolution of mirrored conditional branches.
//!
//! The protector splits one conditional branch into two that test the same operands
//! with opposite predicates. Only one of the two outcomes of the first branch leads to
//! real code: the other meets the second branch, whose two outcomes in turn can only
//! reach a junk exit or rejoin the real path.
//!
//! The shape is found through branch dependence: after the first branch there is exactly
//! one exit reached unconditionally (the convergence point, dominated by the first
//! branch), and one exit that depends on both branches going the same way. Once
//! [`ConditionNormalizer`] proves the two predicates are opposites, the first branch is
//! rewritten to always go where real control flow goes.

use log::debug;

use crate::{
    analysis::{
        BranchDependence, BranchDirection, ConditionNormalizer, InstrIndex, Instruction,
        Operation,
    },
    binary::PatchRequest,
    deobfuscation::{
        config::EngineConfig,
        events::EventKind,
        resolver::{Resolution, ResolveContext, Resolver},
    },
    Result,
};

/// Collapses a mirrored branch pair into an unconditional edge.
#[derive(Debug, Default, Clone, Copy)]
pub struct BranchResolver;

impl BranchResolver {
    /// Creates the resolver.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// If `dependence` is the merge of `first` with one other branch taken the same way,
    /// returns that branch and the shared direction.
    #[must_use]
    pub fn mirrored_partner(
        dependence: &BranchDependence,
        first: InstrIndex,
    ) -> Option<(InstrIndex, BranchDirection)> {
        if dependence.len() != 2 {
            return None;
        }
        let mut entries = dependence.iter();
        let (&a, &a_direction) = entries.next()?;
        let (&b, &b_direction) = entries.next()?;
        if a_direction != b_direction {
            return None;
        }

        if a == first {
            Some((b, a_direction))
        } else if b == first {
            Some((a, a_direction))
        } else {
            None
        }
    }
}

impl Resolver for BranchResolver {
    fn name(&self) -> &'static str {
        "branch"
    }

    fn description(&self) -> &'static str {
        "conditional branch duplicated with a negated copy"
    }

    fn event_kind(&self) -> EventKind {
        EventKind::BranchResolved
    }

    fn enabled(&self, config: &EngineConfig) -> bool {
        config.enable_branch_resolution
    }

    fn matches(&self, instruction: &Instruction) -> bool {
        matches!(instruction.operation, Operation::If { .. })
    }

    fn resolve(&self, ctx: &mut ResolveContext<'_>, site: &Instruction) -> Result<Resolution> {
        let function = ctx.function;
        let Operation::If {
            true_target,
            false_target,
            ..
        } = &site.operation
        else {
            return Err(pattern_mismatch!("0x{:x} is not a conditional branch", site.address));
        };

        let first_block = ctx
            .blocks
            .block_of(function, site.index)
            .ok_or_else(|| pattern_mismatch!("{} has no basic block", site.index))?;

        let mut unconditional = Vec::new();
        let mut dependent = Vec::new();
        for raw in site.index.next().index()..function.instruction_count() {
            let Some(instruction) = function.instruction(InstrIndex(raw)) else {
                break;
            };
            if !instruction.operation.is_function_exit() {
                continue;
            }
            let dependence = function.branch_dependence(instruction.index);
            if dependence.is_empty() {
                unconditional.push(instruction);
            } else {
                dependent.push(dependence);
            }
        }

        let [merge] = unconditional.as_slice() else {
            return Err(pattern_mismatch!(
                "expected one unconditional exit after {}, found {}",
                site.index,
                unconditional.len()
            ));
        };
        let merge_block = ctx
            .blocks
            .block_of(function, merge.index)
            .ok_or_else(|| pattern_mismatch!("{} has no basic block", merge.index))?;
        if !merge_block.is_dominated_by(first_block.id) {
            return Err(pattern_mismatch!(
                "exit {} is not dominated by {}",
                merge.index,
                site.index
            ));
        }
        debug!("0x{:x}: converges at {}", site.address, merge);

        let (second_index, direction) = dependent
            .iter()
            .find_map(|dependence| Self::mirrored_partner(dependence, site.index))
            .ok_or_else(|| pattern_mismatch!("no exit depends on {} and a partner", site.index))?;
        let second = function
            .instruction(second_index)
            .filter(|instruction| matches!(instruction.operation, Operation::If { .. }))
            .ok_or_else(|| pattern_mismatch!("partner {} is not a branch", second_index))?;
        debug!("0x{:x}: partner {} ({:?})", site.address, second, direction);

        ConditionNormalizer::new(function).prove_mirrored(site, second)?;

        let surviving = match direction {
            BranchDirection::FalseBranchDependent => *true_target,
            BranchDirection::TrueBranchDependent => *false_target,
        };
        let target = function
            .instruction(surviving)
            .map(|instruction| instruction.address)
            .ok_or_else(|| pattern_mismatch!("branch target {} does not exist", surviving))?;

        let length = ctx.view.instruction_length(site.address)?;
        let original = ctx.view.read(site.address, length)?;
        let bytes = ctx.assembler.redirect_branch(&original, site.address, target)?;
        let patch = PatchRequest::new(site.address, bytes, length);
        patch.validate()?;

        Ok(Resolution { patch, target })
    }
}
