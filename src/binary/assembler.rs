//! Machine code synthesis for patches.
//!
//! The resolvers only ever need two things from an assembler: a direct jump to a constant
//! address, and a conditional branch rewritten so that it always reaches one of its
//! destinations. [`X86Assembler`] provides both for 32- and 64-bit x86 with iced-x86.

use iced_x86::{Code, Decoder, DecoderOptions, Encoder, FlowControl, Instruction};

use crate::{Error, Result};

/// NOP opcode used to fill the remainder of a rewritten instruction.
pub const NOP: u8 = 0x90;

/// Synthesis of patch bytes.
pub trait Assembler {
    /// Encodes an unconditional jump to `target` placed at `address`, as short as
    /// possible.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Assembly`] if the jump cannot be encoded.
    fn jump(&self, target: u64, address: u64) -> Result<Vec<u8>>;

    /// Rewrites the conditional branch `original` located at `address` so that control
    /// always reaches `target`. The result is exactly as long as `original`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidInstruction`] if `original` does not decode
    /// - [`Error::NotAConditionalBranch`] if it decodes to something else
    /// - [`Error::InsufficientSpace`] if the replacement does not fit
    fn redirect_branch(&self, original: &[u8], address: u64, target: u64) -> Result<Vec<u8>>;
}

/// iced-x86 backed [`Assembler`].
///
/// # Examples
///
/// ```rust
/// use flowmend::binary::{Assembler, X86Assembler};
///
/// let asm = X86Assembler::new(32);
/// assert_eq!(asm.jump(0x401050, 0x401020)?, vec![0xeb, 0x2e]);
///
/// // je 0x402030 at 0x402000, forced taken
/// assert_eq!(asm.redirect_branch(&[0x74, 0x2e], 0x402000, 0x402030)?, vec![0xeb, 0x2e]);
/// // forced not taken
/// assert_eq!(asm.redirect_branch(&[0x74, 0x2e], 0x402000, 0x402002)?, vec![0x90, 0x90]);
/// # Ok::<(), flowmend::Error>(())
/// ```
#[derive(Debug, Clone, Copy)]
pub struct X86Assembler {
    bitness: u32,
    nop_fill: bool,
}

impl X86Assembler {
    /// Creates an assembler for 32- or 64-bit code that pads rewritten branches with NOPs.
    #[must_use]
    pub fn new(bitness: u32) -> Self {
        Self {
            bitness,
            nop_fill: true,
        }
    }

    /// Controls whether bytes left over after a redirected jump are overwritten with NOPs.
    ///
    /// A branch redirected to its fall-through is always NOP-filled.
    #[must_use]
    pub fn with_nop_fill(mut self, nop_fill: bool) -> Self {
        self.nop_fill = nop_fill;
        self
    }

    /// Code bitness.
    #[must_use]
    pub fn bitness(&self) -> u32 {
        self.bitness
    }

    fn jump_codes(&self) -> [Code; 2] {
        if self.bitness == 64 {
            [Code::Jmp_rel8_64, Code::Jmp_rel32_64]
        } else {
            [Code::Jmp_rel8_32, Code::Jmp_rel32_32]
        }
    }

    fn encode(&self, code: Code, target: u64, address: u64) -> Result<Vec<u8>> {
        let instruction = Instruction::with_branch(code, target)?;
        let mut encoder = Encoder::try_new(self.bitness)?;
        encoder.encode(&instruction, address)?;
        Ok(encoder.take_buffer())
    }
}

impl Assembler for X86Assembler {
    fn jump(&self, target: u64, address: u64) -> Result<Vec<u8>> {
        let [short, near] = self.jump_codes();
        match self.encode(short, target, address) {
            Ok(bytes) => Ok(bytes),
            Err(_) => self.encode(near, target, address),
        }
    }

    fn redirect_branch(&self, original: &[u8], address: u64, target: u64) -> Result<Vec<u8>> {
        let mut decoder =
            Decoder::try_with_ip(self.bitness, original, address, DecoderOptions::NONE)?;
        let branch = decoder.decode();
        if branch.is_invalid() {
            return Err(Error::InvalidInstruction(address));
        }
        if branch.flow_control() != FlowControl::ConditionalBranch {
            return Err(Error::NotAConditionalBranch(address));
        }

        let available = branch.len();
        let mut bytes = if target == branch.next_ip() {
            Vec::new()
        } else {
            self.jump(target, address)?
        };

        if bytes.len() > available {
            return Err(Error::InsufficientSpace {
                address,
                needed: bytes.len(),
                available,
            });
        }

        if self.nop_fill || bytes.is_empty() {
            bytes.resize(available, NOP);
        } else {
            bytes.extend_from_slice(&original[bytes.len()..available]);
        }
        Ok(bytes)
    }
}
