//! Credential object storage in the Pico's internal flash.
//!
//! A [`FlashBlock`] owns one 4 KB flash sector and stores a single named object in it,
//! framed by [`crate::flash_record`]. Blocks are allocated from the end of flash
//! backwards; callers choose unique `block_id` values (0, 1, 2, ...).
//!
//! # Example
//!
//! ```rust,ignore
//! use embassy_rp::flash::{Blocking, Flash};
//! use wifi_portal::credential_store::{CredentialStore, CREDENTIALS_OBJECT};
//! use wifi_portal::flash_block::{FlashBlock, INTERNAL_FLASH_SIZE};
//!
//! let p = embassy_rp::init(Default::default());
//! let flash = Flash::<_, Blocking, INTERNAL_FLASH_SIZE>::new_blocking(p.FLASH);
//! let store = CredentialStore::new(FlashBlock::new(flash, 0, CREDENTIALS_OBJECT));
//! ```
#![cfg(any(feature = "pico1", feature = "pico2"))]

use embassy_rp::flash::{Blocking, ERASE_SIZE, Flash, Instance};

use crate::credential_store::ProfileStorage;
use crate::flash_record;
use crate::{Error, Result};

/// Internal flash size for Raspberry Pi Pico 2 W (4 MB).
#[cfg(feature = "pico2")]
pub const INTERNAL_FLASH_SIZE: usize = 4 * 1024 * 1024;

/// Internal flash size for Raspberry Pi Pico 1 W (2 MB).
#[cfg(all(not(feature = "pico2"), feature = "pico1"))]
pub const INTERNAL_FLASH_SIZE: usize = 2 * 1024 * 1024;

/// One flash sector holding one named object.
pub struct FlashBlock<'d, I: Instance, const N: usize = INTERNAL_FLASH_SIZE> {
    flash: Flash<'d, I, Blocking, N>,
    block_id: u32,
    name: &'static str,
}

impl<'d, I: Instance, const N: usize> FlashBlock<'d, I, N> {
    /// Create a block for object `name` in sector `block_id` (0-based from the end of flash).
    #[must_use]
    pub const fn new(flash: Flash<'d, I, Blocking, N>, block_id: u32, name: &'static str) -> Self {
        Self {
            flash,
            block_id,
            name,
        }
    }

    /// Erase the sector. Subsequent reads report no object.
    pub fn clear(&mut self) -> Result<()> {
        let offset = self.block_offset();
        self.flash
            .blocking_erase(offset, offset + ERASE_SIZE as u32)
            .map_err(Error::Flash)?;
        info!("FlashBlock: Cleared block {}", self.block_id);
        Ok(())
    }

    /// Blocks are allocated from the end of flash backwards.
    fn block_offset(&self) -> u32 {
        let capacity = self.flash.capacity() as u32;
        capacity - (self.block_id + 1) * ERASE_SIZE as u32
    }
}

impl<I: Instance, const N: usize> ProfileStorage for FlashBlock<'_, I, N> {
    fn read(&mut self, buf: &mut [u8]) -> Result<Option<usize>> {
        let offset = self.block_offset();
        let mut sector = [0u8; ERASE_SIZE];
        self.flash
            .blocking_read(offset, &mut sector)
            .map_err(Error::Flash)?;

        let Some(payload) = flash_record::decode(&sector, self.name)? else {
            info!("FlashBlock: No object at block {}", self.block_id);
            return Ok(None);
        };
        let target = buf.get_mut(..payload.len()).ok_or(Error::StorageFull)?;
        target.copy_from_slice(payload);
        Ok(Some(payload.len()))
    }

    /// Erases the sector before writing, so this is slow (typically 100-200ms).
    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.len() > flash_record::max_payload(ERASE_SIZE) {
            return Err(Error::StorageFull);
        }
        let mut sector = [0xFFu8; ERASE_SIZE];
        flash_record::encode(&mut sector, self.name, bytes)?;

        let offset = self.block_offset();
        self.flash
            .blocking_erase(offset, offset + ERASE_SIZE as u32)
            .map_err(Error::Flash)?;
        self.flash
            .blocking_write(offset, &sector)
            .map_err(Error::Flash)?;

        info!(
            "FlashBlock: Saved {} bytes to block {}",
            bytes.len(),
            self.block_id
        );
        Ok(())
    }
}
