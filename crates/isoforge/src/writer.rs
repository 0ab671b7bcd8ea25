use std::io::{Seek, SeekFrom, Write};

use crate::error::{BuildError, Result};

/// Size of one logical sector. Logical blocks equal logical sectors in
/// this builder; LBAs are sector indices.
pub const SECTOR_SIZE: u64 = 2048;

/// The first 16 sectors of an image are the system area and stay zero.
pub const SYSTEM_AREA_SECTORS: u64 = 16;

/// Scalar emission primitives and sector addressing over one exclusively
/// owned output stream. All multi-byte writes are explicit about byte
/// order; `*_both` writes the little-endian form immediately followed by
/// the big-endian form.
#[derive(Debug)]
pub struct ImageWriter<W: Write + Seek> {
    inner: W,
}

impl<W: Write + Seek> ImageWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }

    pub fn position(&mut self) -> Result<u64> {
        Ok(self.inner.stream_position()?)
    }

    /// Byte length of the underlying stream. Leaves the cursor where it was.
    pub fn stream_len(&mut self) -> Result<u64> {
        let pos = self.inner.stream_position()?;
        let end = self.inner.seek(SeekFrom::End(0))?;
        self.inner.seek(SeekFrom::Start(pos))?;
        Ok(end)
    }

    pub fn seek_to(&mut self, position: u64) -> Result<()> {
        self.inner.seek(SeekFrom::Start(position))?;
        Ok(())
    }

    pub fn current_sector(&mut self) -> Result<u32> {
        let sector = self.position()? / SECTOR_SIZE;
        u32::try_from(sector).map_err(|_| BuildError::SizeOverflow("sector index"))
    }

    pub fn at_sector_start(&mut self) -> Result<bool> {
        Ok(self.position()?.is_multiple_of(SECTOR_SIZE))
    }

    pub fn seek_to_sector(&mut self, sector: u32) -> Result<()> {
        self.seek_to(u64::from(sector) * SECTOR_SIZE)
    }

    /// Rounds the position up to the next sector boundary (a no-op when
    /// already on one) and returns the new position.
    pub fn seek_to_next_sector(&mut self) -> Result<u64> {
        let position = self.position()?;
        let aligned = position.next_multiple_of(SECTOR_SIZE);
        self.seek_to(aligned)?;
        Ok(aligned)
    }

    /// Runs `action`, then restores the saved position whether or not it
    /// succeeded.
    pub fn preserving_location<T>(
        &mut self,
        action: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        let saved = self.position()?;
        let outcome = action(self);
        self.seek_to(saved)?;
        outcome
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.inner.write_all(bytes)?;
        Ok(())
    }

    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        self.write_bytes(&[value])
    }

    pub fn write_i8(&mut self, value: i8) -> Result<()> {
        self.write_bytes(&[value as u8])
    }

    pub fn write_u16_le(&mut self, value: u16) -> Result<()> {
        self.write_bytes(&value.to_le_bytes())
    }

    pub fn write_u16_be(&mut self, value: u16) -> Result<()> {
        self.write_bytes(&value.to_be_bytes())
    }

    pub fn write_u16_both(&mut self, value: u16) -> Result<()> {
        self.write_u16_le(value)?;
        self.write_u16_be(value)
    }

    pub fn write_u32_le(&mut self, value: u32) -> Result<()> {
        self.write_bytes(&value.to_le_bytes())
    }

    pub fn write_u32_be(&mut self, value: u32) -> Result<()> {
        self.write_bytes(&value.to_be_bytes())
    }

    pub fn write_u32_both(&mut self, value: u32) -> Result<()> {
        self.write_u32_le(value)?;
        self.write_u32_be(value)
    }

    pub fn write_zeros(&mut self, count: usize) -> Result<()> {
        const ZEROS: [u8; 512] = [0; 512];
        let mut remaining = count;
        while remaining > 0 {
            let chunk = remaining.min(ZEROS.len());
            self.write_bytes(&ZEROS[..chunk])?;
            remaining -= chunk;
        }
        Ok(())
    }

    /// Writes a fixed-layout structure as raw bytes.
    pub fn write_struct<T: bytemuck::Pod>(&mut self, value: &T) -> Result<()> {
        self.write_bytes(bytemuck::bytes_of(value))
    }
}
