//! Intermediate-language instruction and expression types.
//!
//! These types are the view of a lifted function that the resolvers consume. They are
//! produced by the host's lifter (or by [`crate::analysis::MemoryFunctionBuilder`]) and
//! are never mutated by the engine.
//!
//! Statements are modeled by [`Operation`], operand sub-expressions by [`Expr`]. Both are
//! closed sum types: every kind the engine does not understand ends up in an explicit
//! `Unsupported` arm so that all matches over them are total.

use std::fmt;

use strum::{EnumIter, IntoStaticStr};

/// Position of an instruction inside its function's IL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstrIndex(pub usize);

impl InstrIndex {
    /// Returns the raw index.
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }

    /// Returns the index following this one.
    #[inline]
    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for InstrIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identity of a function, by convention its entry address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionId(pub u64);

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub_{:x}", self.0)
    }
}

/// A variable of the non-SSA form. Two references to the same register or stack slot
/// share one `Variable` regardless of their SSA version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Variable(pub u32);

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "var_{}", self.0)
    }
}

/// A versioned SSA variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SsaVariable {
    /// The underlying non-SSA variable.
    pub var: Variable,
    /// SSA version of the variable.
    pub version: u32,
}

impl SsaVariable {
    /// Creates a versioned reference to `var`.
    #[must_use]
    pub fn new(var: Variable, version: u32) -> Self {
        Self { var, version }
    }
}

impl fmt::Display for SsaVariable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.var, self.version)
    }
}

/// Comparison operators of the IL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum CmpKind {
    /// Equal
    E,
    /// Not equal
    Ne,
    /// Unsigned greater than
    Ugt,
    /// Unsigned less than or equal
    Ule,
    /// Unsigned greater than or equal
    Uge,
    /// Unsigned less than
    Ult,
    /// Signed greater than
    Sgt,
    /// Signed less than or equal
    Sle,
    /// Signed greater than or equal
    Sge,
    /// Signed less than
    Slt,
}

impl CmpKind {
    /// Returns the lowercase mnemonic of the comparison.
    #[must_use]
    pub fn name(self) -> &'static str {
        self.into()
    }

    /// Returns the comparison that holds exactly when this one does not.
    #[must_use]
    pub fn negate(self) -> Self {
        match self {
            CmpKind::E => CmpKind::Ne,
            CmpKind::Ne => CmpKind::E,
            CmpKind::Ugt => CmpKind::Ule,
            CmpKind::Ule => CmpKind::Ugt,
            CmpKind::Uge => CmpKind::Ult,
            CmpKind::Ult => CmpKind::Uge,
            CmpKind::Sge => CmpKind::Slt,
            CmpKind::Slt => CmpKind::Sge,
            CmpKind::Sgt => CmpKind::Sle,
            CmpKind::Sle => CmpKind::Sgt,
        }
    }
}

/// Arithmetic and bitwise operators the obfuscator uses to build jump values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum BinaryOp {
    /// Addition
    Add,
    /// Subtraction
    Sub,
    /// Multiplication
    Mul,
    /// Bitwise and
    And,
    /// Bitwise or
    Or,
    /// Bitwise exclusive or
    Xor,
    /// Logical shift left
    Lsl,
    /// Logical shift right
    Lsr,
}

impl BinaryOp {
    /// Returns the lowercase mnemonic of the operator.
    #[must_use]
    pub fn name(self) -> &'static str {
        self.into()
    }
}

/// An operand sub-expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    /// `left <kind> right`
    Compare {
        /// The comparison operator.
        kind: CmpKind,
        /// Left operand.
        left: Box<Expr>,
        /// Right operand.
        right: Box<Expr>,
    },
    /// Logical negation.
    Not(Box<Expr>),
    /// Integer literal.
    Const(u64),
    /// Literal that the lifter identified as a pointer.
    ConstPtr(u64),
    /// Read of an SSA variable.
    Var(SsaVariable),
    /// `left <op> right`
    Binary {
        /// The operator.
        op: BinaryOp,
        /// Left operand.
        left: Box<Expr>,
        /// Right operand.
        right: Box<Expr>,
    },
    /// An expression kind the engine does not model.
    Unsupported {
        /// Name of the lifter's operation.
        name: String,
    },
}

impl Expr {
    /// Builds `left <kind> right`.
    #[must_use]
    pub fn compare(kind: CmpKind, left: Expr, right: Expr) -> Self {
        Expr::Compare {
            kind,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Builds `!inner`.
    #[must_use]
    #[allow(clippy::should_implement_trait)]
    pub fn not(inner: Expr) -> Self {
        Expr::Not(Box::new(inner))
    }

    /// Builds `left <op> right`.
    #[must_use]
    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Self {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Returns true for integer and pointer literals.
    #[must_use]
    pub fn is_constant(&self) -> bool {
        matches!(self, Expr::Const(_) | Expr::ConstPtr(_))
    }

    /// Returns the literal value of a constant expression.
    #[must_use]
    pub fn constant_value(&self) -> Option<u64> {
        match self {
            Expr::Const(value) | Expr::ConstPtr(value) => Some(*value),
            _ => None,
        }
    }

    /// Returns the SSA variable read by a bare variable expression.
    #[must_use]
    pub fn as_var(&self) -> Option<SsaVariable> {
        match self {
            Expr::Var(var) => Some(*var),
            _ => None,
        }
    }

    /// Returns the variable a value flows through when following a definition chain
    /// backwards: the variable itself for a copy, the left operand's variable for a
    /// binary operation.
    #[must_use]
    pub fn leading_variable(&self) -> Option<SsaVariable> {
        match self {
            Expr::Var(var) => Some(*var),
            Expr::Binary { left, .. } => left.as_var(),
            Expr::Compare { .. }
            | Expr::Not(_)
            | Expr::Const(_)
            | Expr::ConstPtr(_)
            | Expr::Unsupported { .. } => None,
        }
    }

    /// Short name of the expression's operation, for diagnostics.
    #[must_use]
    pub fn operation_name(&self) -> &str {
        match self {
            Expr::Compare { kind, .. } => kind.name(),
            Expr::Not(_) => "not",
            Expr::Const(_) => "const",
            Expr::ConstPtr(_) => "const_ptr",
            Expr::Var(_) => "var",
            Expr::Binary { op, .. } => op.name(),
            Expr::Unsupported { name } => name,
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Compare { kind, left, right } => write!(f, "{left} {} {right}", kind.name()),
            Expr::Not(inner) => write!(f, "!({inner})"),
            Expr::Const(value) | Expr::ConstPtr(value) => write!(f, "0x{value:x}"),
            Expr::Var(var) => write!(f, "{var}"),
            Expr::Binary { op, left, right } => write!(f, "{}({left}, {right})", op.name()),
            Expr::Unsupported { name } => write!(f, "<{name}>"),
        }
    }
}

/// The statement an IL instruction performs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// `dest = src`
    SetVar {
        /// The SSA variable being defined.
        dest: SsaVariable,
        /// The defining expression.
        src: Expr,
    },
    /// Conditional branch to one of two IL instructions.
    If {
        /// The branch predicate.
        condition: Expr,
        /// Instruction executed when the predicate holds.
        true_target: InstrIndex,
        /// Instruction executed otherwise.
        false_target: InstrIndex,
    },
    /// Unconditional branch.
    Goto {
        /// Destination instruction.
        target: InstrIndex,
    },
    /// Function return.
    Return {
        /// The jump-source expression of the return, when the lifter tracks one.
        dest: Option<Expr>,
    },
    /// Return that the lifter derived from an indirect jump.
    ReturnHint {
        /// The computed jump destination.
        dest: Expr,
    },
    /// Undefined behaviour, typically a decode failure in the middle of junk bytes.
    Undefined,
    /// No operation.
    Nop,
    /// A statement kind the engine does not model.
    Unsupported {
        /// Name of the lifter's operation.
        name: String,
    },
}

impl Operation {
    /// Returns true for statements that end a function: returns and undefined behaviour.
    #[must_use]
    pub fn is_function_exit(&self) -> bool {
        matches!(
            self,
            Operation::Return { .. } | Operation::ReturnHint { .. } | Operation::Undefined
        )
    }

    /// Returns true for return statements.
    #[must_use]
    pub fn is_return(&self) -> bool {
        matches!(self, Operation::Return { .. } | Operation::ReturnHint { .. })
    }

    /// Returns the jump-source expression of a return.
    #[must_use]
    pub fn return_dest(&self) -> Option<&Expr> {
        match self {
            Operation::Return { dest } => dest.as_ref(),
            Operation::ReturnHint { dest } => Some(dest),
            _ => None,
        }
    }

    /// Short name of the statement, for diagnostics.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Operation::SetVar { .. } => "set_var",
            Operation::If { .. } => "if",
            Operation::Goto { .. } => "goto",
            Operation::Return { .. } => "ret",
            Operation::ReturnHint { .. } => "ret_hint",
            Operation::Undefined => "undef",
            Operation::Nop => "nop",
            Operation::Unsupported { name } => name,
        }
    }
}

/// An IL instruction: its position, the native address it was lifted from and what it does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    /// Index inside the owning function.
    pub index: InstrIndex,
    /// Native address the instruction was lifted from.
    pub address: u64,
    /// The statement.
    pub operation: Operation,
}

impl Instruction {
    /// Returns the condition of a conditional branch.
    #[must_use]
    pub fn condition(&self) -> Option<&Expr> {
        match &self.operation {
            Operation::If { condition, .. } => Some(condition),
            _ => None,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x} {} ", self.address, self.index)?;
        match &self.operation {
            Operation::SetVar { dest, src } => write!(f, "{dest} = {src}"),
            Operation::If {
                condition,
                true_target,
                false_target,
            } => write!(f, "if ({condition}) then {true_target} else {false_target}"),
            Operation::Goto { target } => write!(f, "goto {target}"),
            Operation::Return { dest: Some(dest) } => write!(f, "return {dest}"),
            Operation::Return { dest: None } => f.write_str("return"),
            Operation::ReturnHint { dest } => write!(f, "return_hint {dest}"),
            other => f.write_str(other.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;

    use super::*;

    fn v(id: u32, version: u32) -> SsaVariable {
        SsaVariable::new(Variable(id), version)
    }

    #[test]
    fn test_negate_is_involution() {
        for kind in CmpKind::iter() {
            assert_ne!(kind.negate(), kind);
            assert_eq!(kind.negate().negate(), kind);
        }
    }

    #[test]
    fn test_leading_variable() {
        assert_eq!(Expr::Var(v(1, 0)).leading_variable(), Some(v(1, 0)));

        let sum = Expr::binary(BinaryOp::Add, Expr::Var(v(2, 1)), Expr::Const(4));
        assert_eq!(sum.leading_variable(), Some(v(2, 1)));

        let swapped = Expr::binary(BinaryOp::Add, Expr::Const(4), Expr::Var(v(2, 1)));
        assert_eq!(swapped.leading_variable(), None);

        assert_eq!(Expr::Const(7).leading_variable(), None);
    }

    #[test]
    fn test_constant_value() {
        assert_eq!(Expr::Const(3).constant_value(), Some(3));
        assert_eq!(Expr::ConstPtr(0x401000).constant_value(), Some(0x401000));
        assert_eq!(Expr::Var(v(0, 0)).constant_value(), None);
        assert!(Expr::ConstPtr(1).is_constant());
    }

    #[test]
    fn test_display() {
        let cond = Expr::compare(CmpKind::Ne, Expr::Var(v(3, 2)), Expr::Const(0x10));
        assert_eq!(cond.to_string(), "var_3#2 ne 0x10");

        let instr = Instruction {
            index: InstrIndex(4),
            address: 0x401000,
            operation: Operation::If {
                condition: Expr::not(Expr::Var(v(1, 0))),
                true_target: InstrIndex(5),
                false_target: InstrIndex(9),
            },
        };
        assert_eq!(instr.to_string(), "00401000 #4 if (!(var_1#0)) then #5 else #9");
    }

    #[test]
    fn test_function_exit() {
        assert!(Operation::Undefined.is_function_exit());
        assert!(Operation::Return { dest: None }.is_function_exit());
        assert!(!Operation::Undefined.is_return());
        assert!(!Operation::Nop.is_function_exit());
    }
}
