//! In-memory implementation of the IR facade.
//!
//! [`MemoryFunction`] holds a fully materialized IL function: instructions, blocks with
//! their dominator sets, branch dependence sets and the values a register/stack tracker
//! proved. Hosts that run their own lifter can translate its output into a
//! [`MemoryFunctionBuilder`]; the crate's tests use the builder to describe protector
//! output by hand.
//!
//! # Examples
//!
//! ```rust
//! use flowmend::analysis::{Expr, IlFunction, MemoryFunctionBuilder, SsaVariable};
//!
//! let mut f = MemoryFunctionBuilder::new(0x401000);
//! let var = f.variable();
//! let v0 = SsaVariable::new(var, 0);
//! f.set_var(0x401000, v0, Expr::Const(0x401050));
//! f.ret(0x401005, Some(Expr::Var(v0)));
//! let function = f.build();
//!
//! assert_eq!(function.instruction_count(), 2);
//! assert!(function.ssa_definition(v0).is_some());
//! ```

use iced_x86::Register;
use rustc_hash::FxHashMap;

use crate::analysis::{
    function::{
        BasicBlock, BlockId, BranchDependence, BranchDirection, IlFunction, RegisterValue,
    },
    il::{Expr, FunctionId, InstrIndex, Instruction, Operation, SsaVariable, Variable},
};

/// A lifted function held entirely in memory.
#[derive(Debug, Clone)]
pub struct MemoryFunction {
    id: FunctionId,
    instructions: Vec<Instruction>,
    blocks: Vec<BasicBlock>,
    dependence: FxHashMap<InstrIndex, BranchDependence>,
    registers: FxHashMap<(u64, Register), RegisterValue>,
    stack: FxHashMap<(u64, i64, usize), RegisterValue>,
    definitions: FxHashMap<SsaVariable, InstrIndex>,
    by_address: FxHashMap<u64, InstrIndex>,
}

impl MemoryFunction {
    /// Replaces the operation of the instruction at `index`, as a host does when it
    /// re-lifts a patched site. Returns false if `index` is out of range.
    pub fn set_operation(&mut self, index: InstrIndex, operation: Operation) -> bool {
        let Some(instruction) = self.instructions.get_mut(index.index()) else {
            return false;
        };
        instruction.operation = operation;
        self.index_definitions();
        true
    }

    /// Iterates over all instructions in IL order.
    pub fn instructions(&self) -> impl Iterator<Item = &Instruction> + '_ {
        self.instructions.iter()
    }

    fn index_definitions(&mut self) {
        self.definitions.clear();
        self.by_address.clear();
        for instruction in &self.instructions {
            if let Operation::SetVar { dest, .. } = &instruction.operation {
                self.definitions.insert(*dest, instruction.index);
            }
            self.by_address
                .entry(instruction.address)
                .or_insert(instruction.index);
        }
    }
}

impl IlFunction for MemoryFunction {
    fn id(&self) -> FunctionId {
        self.id
    }

    fn instruction_count(&self) -> usize {
        self.instructions.len()
    }

    fn instruction(&self, index: InstrIndex) -> Option<&Instruction> {
        self.instructions.get(index.index())
    }

    fn instruction_index_at(&self, address: u64) -> Option<InstrIndex> {
        self.by_address.get(&address).copied()
    }

    fn basic_blocks(&self) -> &[BasicBlock] {
        &self.blocks
    }

    fn ssa_definition(&self, var: SsaVariable) -> Option<InstrIndex> {
        self.definitions.get(&var).copied()
    }

    fn branch_dependence(&self, index: InstrIndex) -> BranchDependence {
        self.dependence.get(&index).cloned().unwrap_or_default()
    }

    fn register_value_at(&self, address: u64, register: Register) -> RegisterValue {
        self.registers
            .get(&(address, register))
            .copied()
            .unwrap_or(RegisterValue::Undetermined)
    }

    fn stack_contents_at(&self, address: u64, offset: i64, size: usize) -> RegisterValue {
        self.stack
            .get(&(address, offset, size))
            .copied()
            .unwrap_or(RegisterValue::Undetermined)
    }
}

/// Builder for [`MemoryFunction`].
///
/// Instructions receive consecutive indices in the order they are pushed. Blocks start
/// out dominated only by themselves; add further dominators with
/// [`dominated_by`](Self::dominated_by).
#[derive(Debug)]
pub struct MemoryFunctionBuilder {
    id: FunctionId,
    instructions: Vec<Instruction>,
    blocks: Vec<BasicBlock>,
    dependence: FxHashMap<InstrIndex, BranchDependence>,
    registers: FxHashMap<(u64, Register), RegisterValue>,
    stack: FxHashMap<(u64, i64, usize), RegisterValue>,
    next_variable: u32,
}

impl MemoryFunctionBuilder {
    /// Creates a builder for the function starting at `entry`.
    #[must_use]
    pub fn new(entry: u64) -> Self {
        Self {
            id: FunctionId(entry),
            instructions: Vec::new(),
            blocks: Vec::new(),
            dependence: FxHashMap::default(),
            registers: FxHashMap::default(),
            stack: FxHashMap::default(),
            next_variable: 0,
        }
    }

    /// Allocates a fresh variable.
    pub fn variable(&mut self) -> Variable {
        let var = Variable(self.next_variable);
        self.next_variable += 1;
        var
    }

    /// Index the next pushed instruction will receive.
    #[must_use]
    pub fn next_index(&self) -> InstrIndex {
        InstrIndex(self.instructions.len())
    }

    /// Appends an instruction lifted from `address`.
    pub fn push(&mut self, address: u64, operation: Operation) -> InstrIndex {
        let index = self.next_index();
        self.instructions.push(Instruction {
            index,
            address,
            operation,
        });
        index
    }

    /// Appends `dest = src`.
    pub fn set_var(&mut self, address: u64, dest: SsaVariable, src: Expr) -> InstrIndex {
        self.push(address, Operation::SetVar { dest, src })
    }

    /// Appends a conditional branch.
    pub fn branch(
        &mut self,
        address: u64,
        condition: Expr,
        true_target: InstrIndex,
        false_target: InstrIndex,
    ) -> InstrIndex {
        self.push(
            address,
            Operation::If {
                condition,
                true_target,
                false_target,
            },
        )
    }

    /// Appends a return.
    pub fn ret(&mut self, address: u64, dest: Option<Expr>) -> InstrIndex {
        self.push(address, Operation::Return { dest })
    }

    /// Declares the basic block `[start, end)`.
    pub fn block(&mut self, start: InstrIndex, end: InstrIndex) -> BlockId {
        let id = BlockId(self.blocks.len());
        self.blocks.push(BasicBlock {
            id,
            start,
            end,
            dominators: vec![id],
        });
        id
    }

    /// Adds `dominators` to the dominator set of `block`.
    pub fn dominated_by(&mut self, block: BlockId, dominators: &[BlockId]) {
        if let Some(entry) = self.blocks.iter_mut().find(|b| b.id == block) {
            for dominator in dominators {
                if !entry.dominators.contains(dominator) {
                    entry.dominators.push(*dominator);
                }
            }
        }
    }

    /// Records that `index` is reachable only when `branch` goes in `direction`.
    pub fn depends_on(&mut self, index: InstrIndex, branch: InstrIndex, direction: BranchDirection) {
        self.dependence
            .entry(index)
            .or_default()
            .insert(branch, direction);
    }

    /// Records the provable value of `register` before the instruction at `address`.
    pub fn register_value(&mut self, address: u64, register: Register, value: RegisterValue) {
        self.registers.insert((address, register), value);
    }

    /// Records the provable value of `size` stack bytes at `offset` before the
    /// instruction at `address`.
    pub fn stack_value(&mut self, address: u64, offset: i64, size: usize, value: RegisterValue) {
        self.stack.insert((address, offset, size), value);
    }

    /// Finishes the function and indexes its SSA definitions and addresses.
    #[must_use]
    pub fn build(self) -> MemoryFunction {
        let mut function = MemoryFunction {
            id: self.id,
            instructions: self.instructions,
            blocks: self.blocks,
            dependence: self.dependence,
            registers: self.registers,
            stack: self.stack,
            definitions: FxHashMap::default(),
            by_address: FxHashMap::default(),
        };
        function.index_definitions();
        function
    }
}
