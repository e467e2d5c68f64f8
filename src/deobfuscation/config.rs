//! Configuration for the deobfuscation engine.

use iced_x86::Register;

use crate::{binary::X86Assembler, Error, Result};

/// Configuration for the deobfuscation engine.
///
/// Controls the target architecture conventions the resolvers assume and which
/// resolvers take part in classification.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Register holding the stack pointer (default: `ESP`).
    pub stack_pointer: Register,

    /// Width of a code address in bytes, 4 or 8 (default: 4).
    ///
    /// Also the size of the stack slot read when resolving a return target.
    pub address_size: usize,

    /// Enable resolution of returns with computed targets.
    pub enable_return_resolution: bool,

    /// Enable resolution of mirrored conditional branches.
    pub enable_branch_resolution: bool,

    /// Fill the bytes left over after a redirected branch with NOPs.
    pub nop_fill: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            stack_pointer: Register::ESP,
            address_size: 4,
            enable_return_resolution: true,
            enable_branch_resolution: true,
            nop_fill: true,
        }
    }
}

impl EngineConfig {
    /// Configuration for 32-bit x86 code.
    #[must_use]
    pub fn x86() -> Self {
        Self::default()
    }

    /// Configuration for 64-bit x86 code.
    #[must_use]
    pub fn x64() -> Self {
        Self {
            stack_pointer: Register::RSP,
            address_size: 8,
            ..Self::default()
        }
    }

    /// Code bitness implied by the address size.
    #[must_use]
    pub fn bitness(&self) -> u32 {
        if self.address_size == 8 {
            64
        } else {
            32
        }
    }

    /// Checks that the configuration describes a supported architecture.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidAddressSize`] unless the address size is 4 or 8.
    pub fn validate(&self) -> Result<()> {
        match self.address_size {
            4 | 8 => Ok(()),
            other => Err(Error::InvalidAddressSize(other)),
        }
    }

    /// Returns true if at least one resolver is enabled.
    #[must_use]
    pub fn any_enabled(&self) -> bool {
        self.enable_return_resolution || self.enable_branch_resolution
    }

    /// An assembler matching this configuration.
    #[must_use]
    pub fn assembler(&self) -> X86Assembler {
        X86Assembler::new(self.bitness()).with_nop_fill(self.nop_fill)
    }
}
