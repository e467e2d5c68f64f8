//! Size-checked, transactional patching.
//!
//! Every patch goes through a [`Transaction`]: the view's undo journal is opened when the
//! transaction begins and closed when it is committed. A transaction that is dropped
//! without being committed, for example because a write failed half-way, restores every
//! byte it touched.
//!
//! ```text
//! Transaction::begin(view)        begin_undo_actions
//!     .apply(&request)?           size check, read original, write
//!     .apply(&request)?           ...
//!     .commit()                   commit_undo_actions
//! ```

use std::fmt;

use log::warn;

use crate::{binary::view::BinaryView, Error, Result};

/// Bytes to be written at an address, together with the room that is available there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchRequest {
    /// Address of the first byte to overwrite.
    pub address: u64,
    /// The replacement bytes.
    pub bytes: Vec<u8>,
    /// Number of bytes that may be overwritten without clobbering live code.
    pub available: usize,
}

impl PatchRequest {
    /// Creates a request.
    #[must_use]
    pub fn new(address: u64, bytes: Vec<u8>, available: usize) -> Self {
        Self {
            address,
            bytes,
            available,
        }
    }

    /// Checks that the request writes something and fits its room.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InsufficientSpace`] if the bytes are longer than the room, or
    /// [`Error::Error`] for an empty request.
    pub fn validate(&self) -> Result<()> {
        if self.bytes.is_empty() {
            return Err(Error::Error(format!(
                "empty patch at 0x{:x}",
                self.address
            )));
        }
        if self.bytes.len() > self.available {
            return Err(Error::InsufficientSpace {
                address: self.address,
                needed: self.bytes.len(),
                available: self.available,
            });
        }
        Ok(())
    }
}

impl fmt::Display for PatchRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}:", self.address)?;
        for byte in &self.bytes {
            write!(f, " {byte:02x}")?;
        }
        Ok(())
    }
}

/// A write that was performed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchRecord {
    /// Address of the first overwritten byte.
    pub address: u64,
    /// The bytes that were replaced.
    pub original: Vec<u8>,
    /// The bytes that were written.
    pub written: Vec<u8>,
}

/// A scoped group of writes that is either committed as a whole or reverted.
pub struct Transaction<'v> {
    view: &'v mut dyn BinaryView,
    records: Vec<PatchRecord>,
    committed: bool,
}

impl<'v> Transaction<'v> {
    /// Opens an undo group on `view`.
    pub fn begin(view: &'v mut dyn BinaryView) -> Self {
        view.begin_undo_actions();
        Self {
            view,
            records: Vec::new(),
            committed: false,
        }
    }

    /// Validates `request` and writes it.
    ///
    /// # Errors
    ///
    /// Returns the validation error, or the view's error if reading the original bytes
    /// or writing fails. Nothing is written when validation fails.
    pub fn apply(&mut self, request: &PatchRequest) -> Result<&PatchRecord> {
        request.validate()?;
        let original = self.view.read(request.address, request.bytes.len())?;
        self.view.write(request.address, &request.bytes)?;

        self.records.push(PatchRecord {
            address: request.address,
            original,
            written: request.bytes.clone(),
        });
        self.records
            .last()
            .ok_or_else(|| Error::Error("patch record missing".to_string()))
    }

    /// Keeps every write and returns their records.
    pub fn commit(mut self) -> Vec<PatchRecord> {
        self.view.commit_undo_actions();
        self.committed = true;
        std::mem::take(&mut self.records)
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        if let Err(error) = self.view.revert_undo_actions() {
            warn!(
                "Failed to revert {} patch(es): {}",
                self.records.len(),
                error
            );
        }
    }
}
