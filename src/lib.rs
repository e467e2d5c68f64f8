// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
//#![deny(unsafe_code)]
// - 'binary/view.rs' uses mmap to map a file into memory

//! # flowmend
//!
//! Recovery of direct control flow from protector-obfuscated x86 code.
//!
//! Protectors hide a function's control flow behind two idioms that disassemblers and
//! decompilers cannot follow:
//!
//! - **Obfuscated returns** - `push target; ret` where `target` is computed through a
//!   chain of copies and arithmetic, in place of `jmp target`
//! - **Mirrored branches** - one conditional branch split into two testing the same
//!   operands with opposite predicates, one outcome of which only reaches junk
//!
//! `flowmend` recognizes both on a lifted SSA view of the function, proves the real
//! destination and patches the machine code to jump there directly. Every recovered
//! destination is queued and examined once the host has re-analyzed the patched code,
//! until nothing obfuscated is left.
//!
//! ## Architecture
//!
//! - [`analysis`] - The IL the engine reads, the [`analysis::IlFunction`] facade and
//!   branch condition normalization
//! - [`binary`] - Byte storage, x86 patch synthesis and transactional patching
//! - [`deobfuscation`] - The resolvers, the engine and the worklist scheduler
//!
//! The engine never lifts code. Hosts plug their lifter in through
//! [`analysis::IlFunction`] and their storage through [`binary::BinaryView`]; the crate
//! ships [`analysis::MemoryFunction`] and [`binary::MemoryView`] for self-contained use.
//!
//! ## Quick Start
//!
//! ```rust
//! use flowmend::prelude::*;
//! use iced_x86::Register;
//!
//! // ret at 0x401040 returns to the constant materialized at 0x401020
//! let mut f = MemoryFunctionBuilder::new(0x401000);
//! let v1 = SsaVariable::new(f.variable(), 0);
//! let v2 = SsaVariable::new(f.variable(), 0);
//! f.set_var(0x401020, v2, Expr::ConstPtr(0x401050));
//! f.set_var(0x401030, v1, Expr::Var(v2));
//! f.ret(0x401040, Some(Expr::Var(v1)));
//! f.register_value(0x401040, Register::ESP, RegisterValue::StackFrameOffset(-4));
//! f.stack_value(0x401040, -4, 4, RegisterValue::Constant(0x401050));
//! let function = f.build();
//!
//! let mut view = MemoryView::new(32).with_segment(0x401000, vec![0x90; 0x100]);
//! let engine = Engine::new(EngineConfig::x86());
//! let assembler = engine.config().assembler();
//!
//! let target = engine.resolve_at(&function, &mut view, &assembler, 0x401020)?;
//! assert_eq!(target, 0x401050);
//! assert_eq!(view.read(0x401020, 2)?, vec![0xeb, 0x2e]);
//! # Ok::<(), flowmend::Error>(())
//! ```
//!
//! ## Logging
//!
//! Diagnostics go through the [`log`](https://docs.rs/log) facade: `debug` for each
//! resolution step, `info` for applied patches and recovered targets, `warn` for failed
//! attempts. A queryable history is kept in [`deobfuscation::EventLog`].

#[macro_use]
pub(crate) mod error;

/// Convenient re-exports of the most commonly used types and traits.
///
/// ```rust
/// use flowmend::prelude::*;
///
/// let engine = Engine::new(EngineConfig::x64());
/// assert_eq!(engine.config().bitness(), 64);
/// ```
pub mod prelude;

pub mod analysis;
pub mod binary;
pub mod deobfuscation;

/// `flowmend` Result type
///
/// A type alias for `std::result::Result<T, Error>` where the error type is always
/// [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `flowmend` Error type
///
/// The main error type for all operations in this crate. Resolution failures are local
/// to one attempt and never leave anything written.
pub use error::Error;
