//! Access to the machine code being repaired.
//!
//! - [`view`] - The [`BinaryView`] storage seam and the journaled [`MemoryView`]
//! - [`assembler`] - The [`Assembler`] seam and the iced-x86 backed [`X86Assembler`]
//! - [`patch`] - Size-checked patch requests applied inside a reverting [`Transaction`]

pub mod assembler;
pub mod patch;
pub mod view;

pub use assembler::{Assembler, X86Assembler, NOP};
pub use patch::{PatchRecord, PatchRequest, Transaction};
pub use view::{BinaryView, MemoryView};
