//! Byte storage of the binary under analysis.
//!
//! [`BinaryView`] is the seam to the host's storage: reads, writes, native instruction
//! lengths and an undo journal. [`MemoryView`] is a self-contained implementation backed
//! by owned segments. It can be filled by hand, from a PE image (parsed with goblin) or
//! from a memory-mapped file on disk.

use std::{fs, path::Path};

use goblin::pe::PE;
use iced_x86::{Decoder, DecoderOptions};
use memmap2::Mmap;

use crate::{
    Error::{self, OutOfBounds},
    Result,
};

/// Longest possible x86 instruction.
const MAX_INSTRUCTION_LENGTH: usize = 15;

/// Mutable access to the bytes of a binary.
///
/// Writes made between [`begin_undo_actions`](Self::begin_undo_actions) and
/// [`commit_undo_actions`](Self::commit_undo_actions) can be rolled back as one unit with
/// [`revert_undo_actions`](Self::revert_undo_actions).
pub trait BinaryView {
    /// Reads `len` bytes at `address`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfBounds`] if any byte of the range is unmapped.
    fn read(&self, address: u64, len: usize) -> Result<Vec<u8>>;

    /// Overwrites the bytes at `address`, returning how many were written.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfBounds`] if any byte of the range is unmapped.
    fn write(&mut self, address: u64, bytes: &[u8]) -> Result<usize>;

    /// Length of the native instruction at `address`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInstruction`] if the bytes do not decode.
    fn instruction_length(&self, address: u64) -> Result<usize>;

    /// Opens an undo group.
    fn begin_undo_actions(&mut self);

    /// Closes the current undo group, keeping its writes.
    fn commit_undo_actions(&mut self);

    /// Closes the current undo group, restoring every byte it overwrote.
    ///
    /// # Errors
    ///
    /// Returns an error if a restore write fails.
    fn revert_undo_actions(&mut self) -> Result<()>;
}

#[derive(Debug, Clone)]
struct Segment {
    base: u64,
    data: Vec<u8>,
}

impl Segment {
    fn offset_of(&self, address: u64, len: usize) -> Option<usize> {
        let offset = usize::try_from(address.checked_sub(self.base)?).ok()?;
        let end = offset.checked_add(len)?;
        (end <= self.data.len()).then_some(offset)
    }
}

/// An owned, journaled [`BinaryView`].
///
/// # Examples
///
/// ```rust
/// use flowmend::binary::{BinaryView, MemoryView};
///
/// let mut view = MemoryView::new(32).with_segment(0x401000, vec![0x74, 0x2e, 0x90]);
/// assert_eq!(view.instruction_length(0x401000)?, 2);
///
/// view.begin_undo_actions();
/// view.write(0x401000, &[0xeb])?;
/// view.revert_undo_actions()?;
/// assert_eq!(view.read(0x401000, 2)?, vec![0x74, 0x2e]);
/// # Ok::<(), flowmend::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct MemoryView {
    segments: Vec<Segment>,
    bitness: u32,
    journal: Option<Vec<(u64, Vec<u8>)>>,
    writes: usize,
}

impl MemoryView {
    /// Creates an empty view decoding instructions with the given bitness (16, 32 or 64).
    #[must_use]
    pub fn new(bitness: u32) -> Self {
        Self {
            segments: Vec::new(),
            bitness,
            journal: None,
            writes: 0,
        }
    }

    /// Adds a segment mapped at `base`, builder style.
    #[must_use]
    pub fn with_segment(mut self, base: u64, data: Vec<u8>) -> Self {
        self.add_segment(base, data);
        self
    }

    /// Maps `data` at `base`.
    pub fn add_segment(&mut self, base: u64, data: Vec<u8>) {
        self.segments.push(Segment { base, data });
    }

    /// Maps the sections of a PE image at their virtual addresses.
    ///
    /// Sections are padded with zeroes up to their virtual size. The decoding bitness
    /// follows the optional header.
    ///
    /// # Errors
    ///
    /// Returns [`Error::GoblinErr`] if the image does not parse, or
    /// [`Error::OutOfBounds`] if a section's raw data lies outside the image or its
    /// virtual address overflows the address space.
    pub fn from_pe(image: &[u8]) -> Result<Self> {
        let pe = PE::parse(image)?;
        let mut view = MemoryView::new(if pe.is_64 { 64 } else { 32 });
        let image_base = pe.image_base as u64;

        for section in &pe.sections {
            let start = section.pointer_to_raw_data as usize;
            let len = section.size_of_raw_data as usize;
            let Some(raw) = start
                .checked_add(len)
                .and_then(|end| image.get(start..end))
            else {
                return Err(OutOfBounds {
                    address: u64::from(section.pointer_to_raw_data),
                    len,
                });
            };

            let mut data = raw.to_vec();
            let virtual_size = section.virtual_size as usize;
            if data.len() < virtual_size {
                data.resize(virtual_size, 0);
            }
            let Some(base) = image_base.checked_add(u64::from(section.virtual_address)) else {
                return Err(OutOfBounds {
                    address: image_base,
                    len: data.len(),
                });
            };
            view.add_segment(base, data);
        }

        Ok(view)
    }

    /// Memory-maps a PE image from disk and loads it like [`from_pe`](Self::from_pe).
    ///
    /// # Errors
    ///
    /// Returns [`Error::FileError`] if the file cannot be opened, [`Error::Error`] if
    /// mapping fails, or any error of [`from_pe`](Self::from_pe).
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let file = fs::File::open(path)?;
        let mmap = unsafe { Mmap::map(&file) }.map_err(|error| Error::Error(error.to_string()))?;
        Self::from_pe(&mmap)
    }

    /// Decoding bitness.
    #[must_use]
    pub fn bitness(&self) -> u32 {
        self.bitness
    }

    /// Number of successful writes since creation, restores included.
    #[must_use]
    pub fn writes(&self) -> usize {
        self.writes
    }

    fn locate(&self, address: u64, len: usize) -> Result<(usize, usize)> {
        self.segments
            .iter()
            .enumerate()
            .find_map(|(index, segment)| {
                segment
                    .offset_of(address, len)
                    .map(|offset| (index, offset))
            })
            .ok_or(OutOfBounds { address, len })
    }

    fn store(&mut self, address: u64, bytes: &[u8]) -> Result<usize> {
        let (segment, offset) = self.locate(address, bytes.len())?;
        self.segments[segment].data[offset..offset + bytes.len()].copy_from_slice(bytes);
        self.writes += 1;
        Ok(bytes.len())
    }
}

impl BinaryView for MemoryView {
    fn read(&self, address: u64, len: usize) -> Result<Vec<u8>> {
        let (segment, offset) = self.locate(address, len)?;
        Ok(self.segments[segment].data[offset..offset + len].to_vec())
    }

    fn write(&mut self, address: u64, bytes: &[u8]) -> Result<usize> {
        if self.journal.is_some() {
            let original = self.read(address, bytes.len())?;
            if let Some(journal) = self.journal.as_mut() {
                journal.push((address, original));
            }
        }
        self.store(address, bytes)
    }

    fn instruction_length(&self, address: u64) -> Result<usize> {
        let (segment, offset) = self.locate(address, 1)?;
        let data = &self.segments[segment].data;
        let end = data.len().min(offset + MAX_INSTRUCTION_LENGTH);

        let mut decoder =
            Decoder::try_with_ip(self.bitness, &data[offset..end], address, DecoderOptions::NONE)?;
        let instruction = decoder.decode();
        if instruction.is_invalid() {
            return Err(Error::InvalidInstruction(address));
        }
        Ok(instruction.len())
    }

    fn begin_undo_actions(&mut self) {
        if self.journal.is_none() {
            self.journal = Some(Vec::new());
        }
    }

    fn commit_undo_actions(&mut self) {
        self.journal = None;
    }

    fn revert_undo_actions(&mut self) -> Result<()> {
        let Some(journal) = self.journal.take() else {
            return Ok(());
        };
        for (address, original) in journal.into_iter().rev() {
            self.store(address, &original)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_write_bounds() -> Result<()> {
        let mut view = MemoryView::new(32).with_segment(0x1000, vec![0; 8]);

        assert_eq!(view.write(0x1004, &[1, 2, 3, 4])?, 4);
        assert_eq!(view.read(0x1003, 3)?, vec![0, 1, 2]);
        assert!(matches!(
            view.read(0x1006, 4),
            Err(Error::OutOfBounds { address: 0x1006, len: 4 })
        ));
        assert!(view.write(0xfff, &[1]).is_err());
        assert_eq!(view.writes(), 1);
        Ok(())
    }

    #[test]
    fn test_segments_are_independent() -> Result<()> {
        let view = MemoryView::new(32)
            .with_segment(0x1000, vec![0xaa; 4])
            .with_segment(0x2000, vec![0xbb; 4]);

        assert_eq!(view.read(0x2002, 2)?, vec![0xbb, 0xbb]);
        assert!(view.read(0x1002, 0x1000).is_err());
        Ok(())
    }

    #[test]
    fn test_journal_revert_and_commit() -> Result<()> {
        let mut view = MemoryView::new(32).with_segment(0x1000, vec![0x90; 4]);

        view.begin_undo_actions();
        view.write(0x1000, &[0xeb, 0x02])?;
        view.write(0x1001, &[0xcc])?;
        view.revert_undo_actions()?;
        assert_eq!(view.read(0x1000, 4)?, vec![0x90; 4]);

        view.begin_undo_actions();
        view.write(0x1000, &[0xc3])?;
        view.commit_undo_actions();
        view.revert_undo_actions()?;
        assert_eq!(view.read(0x1000, 1)?, vec![0xc3]);
        Ok(())
    }

    #[test]
    fn test_instruction_length() -> Result<()> {
        // je +0x2e; jmp rel32; ret
        let view = MemoryView::new(32).with_segment(
            0x401000,
            vec![0x74, 0x2e, 0xe9, 0x00, 0x00, 0x00, 0x00, 0xc3],
        );

        assert_eq!(view.instruction_length(0x401000)?, 2);
        assert_eq!(view.instruction_length(0x401002)?, 5);
        assert_eq!(view.instruction_length(0x401007)?, 1);
        assert!(view.instruction_length(0x402000).is_err());
        Ok(())
    }

    #[test]
    fn test_truncated_instruction_is_invalid() {
        let view = MemoryView::new(32).with_segment(0x1000, vec![0x0f]);
        assert!(matches!(
            view.instruction_length(0x1000),
            Err(Error::InvalidInstruction(0x1000))
        ));
    }

    /// Single-section image: headers at 0, section table after the optional header,
    /// raw data at 0x200. No data directories.
    fn pe_image(
        is_64: bool,
        image_base: u64,
        virtual_address: u32,
        raw: &[u8],
        virtual_size: u32,
    ) -> Vec<u8> {
        fn put(image: &mut [u8], offset: usize, bytes: &[u8]) {
            image[offset..offset + bytes.len()].copy_from_slice(bytes);
        }

        let mut image = vec![0u8; 0x200 + raw.len()];
        put(&mut image, 0x00, b"MZ");
        put(&mut image, 0x3c, &0x40u32.to_le_bytes());
        put(&mut image, 0x40, b"PE\0\0");

        let (machine, optional_size): (u16, u16) = if is_64 {
            (0x8664, 112)
        } else {
            (0x14c, 96)
        };
        put(&mut image, 0x44, &machine.to_le_bytes());
        put(&mut image, 0x46, &1u16.to_le_bytes());
        put(&mut image, 0x54, &optional_size.to_le_bytes());
        put(&mut image, 0x56, &0x0102u16.to_le_bytes());

        let optional = 0x58;
        if is_64 {
            put(&mut image, optional, &0x20bu16.to_le_bytes());
            put(&mut image, optional + 24, &image_base.to_le_bytes());
        } else {
            put(&mut image, optional, &0x10bu16.to_le_bytes());
            put(&mut image, optional + 28, &(image_base as u32).to_le_bytes());
        }
        put(&mut image, optional + 32, &0x1000u32.to_le_bytes());
        put(&mut image, optional + 36, &0x200u32.to_le_bytes());

        let section = optional + usize::from(optional_size);
        put(&mut image, section, b".text\0\0\0");
        put(&mut image, section + 8, &virtual_size.to_le_bytes());
        put(&mut image, section + 12, &virtual_address.to_le_bytes());
        put(&mut image, section + 16, &(raw.len() as u32).to_le_bytes());
        put(&mut image, section + 20, &0x200u32.to_le_bytes());
        put(&mut image, section + 36, &0x6000_0020u32.to_le_bytes());

        put(&mut image, 0x200, raw);
        image
    }

    #[test]
    fn test_from_pe_rejects_garbage() {
        assert!(MemoryView::from_pe(&[0u8; 64]).is_err());
    }

    #[test]
    fn test_from_pe_maps_pe32_section() -> Result<()> {
        let image = pe_image(false, 0x400000, 0x1000, &[0x74, 0x2e, 0xc3, 0xcc], 0x10);
        let view = MemoryView::from_pe(&image)?;

        assert_eq!(view.bitness(), 32);
        assert_eq!(view.read(0x401000, 4)?, vec![0x74, 0x2e, 0xc3, 0xcc]);
        assert_eq!(view.read(0x401004, 0xc)?, vec![0; 0xc]);
        assert!(view.read(0x401010, 1).is_err());
        assert!(view.read(0x400fff, 1).is_err());
        assert_eq!(view.instruction_length(0x401000)?, 2);
        Ok(())
    }

    #[test]
    fn test_from_pe_maps_pe32_plus_section() -> Result<()> {
        let image = pe_image(true, 0x1_4000_0000, 0x2000, &[0x48, 0x89, 0xc8], 0x8);
        let view = MemoryView::from_pe(&image)?;

        assert_eq!(view.bitness(), 64);
        assert_eq!(view.read(0x1_4000_2000, 3)?, vec![0x48, 0x89, 0xc8]);
        assert_eq!(view.read(0x1_4000_2003, 5)?, vec![0; 5]);
        assert!(view.read(0x1_4000_2008, 1).is_err());
        // mov rax, rcx only decodes as three bytes in long mode
        assert_eq!(view.instruction_length(0x1_4000_2000)?, 3);
        Ok(())
    }

    #[test]
    fn test_from_pe_rejects_wrapping_section() {
        let image = pe_image(true, u64::MAX - 0xfff, 0x2000, &[0xc3], 0x8);
        assert!(matches!(
            MemoryView::from_pe(&image),
            Err(Error::OutOfBounds { .. })
        ));
    }
}
