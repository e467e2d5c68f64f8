//! Branch condition normalization.
//!
//! A mirrored branch pair is two conditional branches that test the same operands with
//! opposite predicates. Proving that takes three pieces, all provided here:
//!
//! - [`ConditionOp`] classifies a predicate and knows its registered negation
//!   (`E`/`NE`, each ordering with its strict complement, `NOT`/bare variable).
//! - [`normalize`] reduces a predicate to a [`NormalizedCondition`]: the pair of compared
//!   operands, or the tested flag variable.
//! - [`ConditionNormalizer`] reads SSA definitions to look through a flag that merely
//!   holds the result of a comparison, and runs the whole proof for a branch pair.
//!
//! # Example
//!
//! ```text
//! if (eax == 5) ...          normalize → Operands(var eax, const 5)
//! if (5 != eax) ...          normalize → Operands(const 5, var eax)
//! ```
//!
//! The two predicates are `E`/`NE`, a registered pair, and each operand of one appears in
//! the other, so the branches mirror each other.

use crate::{
    analysis::{
        function::IlFunction,
        il::{CmpKind, Expr, Instruction, Operation, Variable},
    },
    Error, Result,
};

/// Predicate kinds that take part in the negation registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConditionOp {
    /// A comparison.
    Compare(CmpKind),
    /// A logical negation.
    Not,
    /// A bare flag variable.
    Var,
}

impl ConditionOp {
    /// Classifies the top-level operation of a predicate, or `None` for kinds outside
    /// the registry.
    #[must_use]
    pub fn of(expr: &Expr) -> Option<Self> {
        match expr {
            Expr::Compare { kind, .. } => Some(ConditionOp::Compare(*kind)),
            Expr::Not(_) => Some(ConditionOp::Not),
            Expr::Var(_) => Some(ConditionOp::Var),
            Expr::Const(_)
            | Expr::ConstPtr(_)
            | Expr::Binary { .. }
            | Expr::Unsupported { .. } => None,
        }
    }

    /// Returns the registered negation of this kind.
    #[must_use]
    pub fn negation(self) -> Self {
        match self {
            ConditionOp::Compare(kind) => ConditionOp::Compare(kind.negate()),
            ConditionOp::Not => ConditionOp::Var,
            ConditionOp::Var => ConditionOp::Not,
        }
    }

    /// Returns true if `self` and `other` are a registered negation pair.
    #[must_use]
    pub fn is_negation_of(self, other: Self) -> bool {
        self.negation() == other
    }

    /// Short name, for diagnostics.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            ConditionOp::Compare(kind) => kind.name(),
            ConditionOp::Not => "not",
            ConditionOp::Var => "var",
        }
    }
}

/// One side of a normalized comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    /// A variable, by non-SSA identity.
    Variable(Variable),
    /// A literal.
    Constant(u64),
    /// A nested predicate.
    Condition(Box<NormalizedCondition>),
}

/// Canonical form of a predicate, comparable for operand equivalence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NormalizedCondition {
    /// The two operands of a comparison, in source order.
    Operands(Operand, Operand),
    /// A flag variable tested on its own.
    Flag(Variable),
}

impl NormalizedCondition {
    /// Returns true if both forms test the same operands.
    ///
    /// Operand pairs match when every operand of `self` occurs in `other`, in any order.
    /// Flags match on identity. A pair never matches a flag.
    #[must_use]
    pub fn same_operands(&self, other: &NormalizedCondition) -> bool {
        match (self, other) {
            (
                NormalizedCondition::Operands(left, right),
                NormalizedCondition::Operands(other_left, other_right),
            ) => {
                let contains = |operand: &Operand| operand == other_left || operand == other_right;
                contains(left) && contains(right)
            }
            (NormalizedCondition::Flag(flag), NormalizedCondition::Flag(other_flag)) => {
                flag == other_flag
            }
            _ => false,
        }
    }
}

/// Reduces a predicate to its canonical form.
///
/// # Errors
///
/// Returns [`Error::UnrecognizedExpression`] for predicates that are neither a
/// comparison, a negation nor a bare variable, or that contain such operands.
pub fn normalize(expr: &Expr) -> Result<NormalizedCondition> {
    match expr {
        Expr::Compare { left, right, .. } => Ok(NormalizedCondition::Operands(
            operand(left)?,
            operand(right)?,
        )),
        Expr::Var(var) => Ok(NormalizedCondition::Flag(var.var)),
        Expr::Not(inner) => normalize(inner),
        Expr::Const(_) | Expr::ConstPtr(_) | Expr::Binary { .. } | Expr::Unsupported { .. } => {
            Err(Error::UnrecognizedExpression(format!(
                "{} as branch condition",
                expr.operation_name()
            )))
        }
    }
}

fn operand(expr: &Expr) -> Result<Operand> {
    match expr {
        Expr::Var(var) => Ok(Operand::Variable(var.var)),
        Expr::Const(value) | Expr::ConstPtr(value) => Ok(Operand::Constant(*value)),
        Expr::Not(inner) => operand(inner),
        Expr::Compare { .. } => Ok(Operand::Condition(Box::new(normalize(expr)?))),
        Expr::Binary { .. } | Expr::Unsupported { .. } => Err(Error::UnrecognizedExpression(
            format!("{} as comparison operand", expr.operation_name()),
        )),
    }
}

/// Proves that two conditional branches are mirrored.
pub struct ConditionNormalizer<'a> {
    function: &'a dyn IlFunction,
}

impl<'a> ConditionNormalizer<'a> {
    /// Creates a normalizer reading SSA definitions from `function`.
    #[must_use]
    pub fn new(function: &'a dyn IlFunction) -> Self {
        Self { function }
    }

    /// Returns the predicate to compare for `branch` when it is paired with `partner`.
    ///
    /// A bare flag is replaced by the comparison that defines it, so that `if (zf)` can
    /// be compared against `if (eax != 0)`. When the partner tests `!flag` the flag is
    /// kept as is and the pair is compared as `VAR`/`NOT`.
    #[must_use]
    pub fn effective_condition(&self, branch: &Expr, partner: &Expr) -> Expr {
        let Expr::Var(flag) = branch else {
            return branch.clone();
        };
        if matches!(partner, Expr::Not(_)) {
            return branch.clone();
        }

        let definition = self
            .function
            .ssa_definition(*flag)
            .and_then(|index| self.function.instruction(index));
        match definition.map(|instruction| &instruction.operation) {
            Some(Operation::SetVar { src, .. }) if matches!(src, Expr::Compare { .. }) => {
                src.clone()
            }
            _ => branch.clone(),
        }
    }

    /// Checks that `first` and `second` test the same operands with opposite predicates.
    ///
    /// # Errors
    ///
    /// - [`Error::PatternMismatch`] if either instruction is not a conditional branch
    /// - [`Error::UnrecognizedExpression`] if a predicate is outside the negation registry
    ///   or cannot be normalized
    /// - [`Error::NegationMismatch`] if the predicates are not a registered negation pair
    /// - [`Error::OperandMismatch`] if the operands differ
    pub fn prove_mirrored(&self, first: &Instruction, second: &Instruction) -> Result<()> {
        let (Some(first_raw), Some(second_raw)) = (first.condition(), second.condition()) else {
            return Err(pattern_mismatch!(
                "branch pair {} / {} is not two conditional branches",
                first.index,
                second.index
            ));
        };

        let first_condition = self.effective_condition(first_raw, second_raw);
        let second_condition = self.effective_condition(second_raw, first_raw);

        let first_op = ConditionOp::of(&first_condition).ok_or_else(|| {
            Error::UnrecognizedExpression(first_condition.operation_name().to_string())
        })?;
        let second_op = ConditionOp::of(&second_condition).ok_or_else(|| {
            Error::UnrecognizedExpression(second_condition.operation_name().to_string())
        })?;

        if !first_op.is_negation_of(second_op) {
            return Err(Error::NegationMismatch {
                first: first_op.name().to_string(),
                second: second_op.name().to_string(),
            });
        }

        let first_operands = normalize(&first_condition)?;
        let second_operands = normalize(&second_condition)?;
        if !first_operands.same_operands(&second_operands) {
            return Err(Error::OperandMismatch);
        }

        Ok(())
    }
}
