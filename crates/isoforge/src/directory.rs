use std::io::{Seek, Write};

use bitflags::bitflags;

use crate::error::{BuildError, Result};
use crate::model::FileAttributes;
use crate::types::{RecordingDateTime, U16LsbMsb, U32LsbMsb};
use crate::writer::{ImageWriter, SECTOR_SIZE};

bitflags! {
    /// Directory record file flags (ECMA-119 9.1.6). A set `HIDDEN` bit is
    /// the inverted "existence" meaning.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FileFlags: u8 {
        const HIDDEN = 0x01;
        const DIRECTORY = 0x02;
        const ASSOCIATED = 0x04;
        const RECORD = 0x08;
        const PROTECTION = 0x10;
        const MULTI_EXTENT = 0x80;
    }
}

impl FileFlags {
    /// Derives the flag byte from an entry's attributes and kind.
    pub fn for_entry(attributes: &FileAttributes, is_directory: bool) -> Self {
        let mut flags = Self::empty();
        flags.set(Self::HIDDEN, attributes.hidden);
        flags.set(Self::DIRECTORY, is_directory);
        flags.set(Self::ASSOCIATED, attributes.associated);
        flags.set(Self::RECORD, attributes.record);
        flags.set(Self::PROTECTION, attributes.protection);
        flags.set(Self::MULTI_EXTENT, attributes.multi_extent);
        flags
    }
}

/// The fixed 33-byte front of a directory record; the variable-length
/// identifier and its padding byte follow (ECMA-119 9.1).
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct DirectoryRecordHeader {
    pub len: u8,
    pub extended_attr_len: u8,
    /// First logical block of the extent.
    pub extent: U32LsbMsb,
    pub data_len: U32LsbMsb,
    pub recording_date_time: RecordingDateTime,
    pub flags: u8,
    pub file_unit_size: u8,
    pub interleave_gap_size: u8,
    pub volume_sequence_number: U16LsbMsb,
    pub identifier_len: u8,
}

pub const DIRECTORY_RECORD_BASE_SIZE: usize = size_of::<DirectoryRecordHeader>();

/// Total record length for an identifier: 33 bytes plus the identifier,
/// padded up to an even length.
pub fn record_length_for(identifier_len: usize) -> usize {
    (DIRECTORY_RECORD_BASE_SIZE + identifier_len).next_multiple_of(2)
}

/// One directory record ready for emission.
#[derive(Debug, Clone)]
pub struct DirectoryRecord {
    pub header: DirectoryRecordHeader,
    pub identifier: Vec<u8>,
}

/// Identifier of the "self" record of every directory extent.
pub const SELF_IDENTIFIER: &[u8] = &[0x00];
/// Identifier of the "parent" record; the root's parent points at itself.
pub const PARENT_IDENTIFIER: &[u8] = &[0x01];

impl DirectoryRecord {
    pub fn new(
        identifier: &[u8],
        extent_sector: u32,
        data_length: u32,
        flags: FileFlags,
        recording: RecordingDateTime,
        volume_sequence_number: u16,
    ) -> Result<Self> {
        let length = record_length_for(identifier.len());
        let len = u8::try_from(length)
            .map_err(|_| BuildError::SizeOverflow("directory record length"))?;
        Ok(Self {
            header: DirectoryRecordHeader {
                len,
                extended_attr_len: 0,
                extent: U32LsbMsb::new(extent_sector),
                data_len: U32LsbMsb::new(data_length),
                recording_date_time: recording,
                flags: flags.bits(),
                file_unit_size: 0,
                interleave_gap_size: 0,
                volume_sequence_number: U16LsbMsb::new(volume_sequence_number),
                identifier_len: identifier.len() as u8,
            },
            identifier: identifier.to_vec(),
        })
    }

    pub fn record_length(&self) -> usize {
        self.header.len as usize
    }

    /// Writes the record at the current position, first padding out the
    /// sector if the record would otherwise straddle a boundary. Every
    /// record ends in the sector it begins in.
    pub fn write_contained<W: Write + Seek>(&self, w: &mut ImageWriter<W>) -> Result<()> {
        let length = self.record_length() as u64;
        let remaining = SECTOR_SIZE - w.position()? % SECTOR_SIZE;
        if remaining < length {
            w.write_zeros(remaining as usize)?;
        }
        w.write_struct(&self.header)?;
        w.write_bytes(&self.identifier)?;
        let written = DIRECTORY_RECORD_BASE_SIZE + self.identifier.len();
        w.write_zeros(self.record_length() - written)?;
        Ok(())
    }
}

/// Byte size of a directory extent holding the self and parent records
/// plus one record per mapped child identifier, honoring the rule that a
/// record never crosses a sector boundary.
pub fn measure_extent<I>(child_identifier_lengths: I) -> Result<u32>
where
    I: IntoIterator<Item = usize>,
{
    let mut end: u64 = 2 * record_length_for(SELF_IDENTIFIER.len()) as u64;
    for len in child_identifier_lengths {
        let record = record_length_for(len) as u64;
        let remaining = SECTOR_SIZE - end % SECTOR_SIZE;
        if remaining < record {
            end += remaining;
        }
        end += record;
    }
    u32::try_from(end).map_err(|_| BuildError::SizeOverflow("directory extent size"))
}
