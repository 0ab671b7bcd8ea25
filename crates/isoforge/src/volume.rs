use std::fmt::Debug;

use chrono::{DateTime, FixedOffset};

use crate::directory::{DirectoryRecordHeader, FileFlags, SELF_IDENTIFIER, record_length_for};
use crate::error::{BuildError, Result};
use crate::layout::{ExtentLoc, VolumeLoc};
use crate::model::VolumeMetadata;
use crate::types::{
    IsoStrA, IsoStrD, IsoStrFile, LittleEndian, BigEndian, RecordingDateTime, U16LsbMsb, U32,
    U32LsbMsb, VolumeDateTime,
};
use crate::writer::SECTOR_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeDescriptorType {
    BootRecord,
    Primary,
    Supplementary,
    SetTerminator,
}

impl VolumeDescriptorType {
    pub fn to_u8(self) -> u8 {
        match self {
            Self::BootRecord => 0x00,
            Self::Primary => 0x01,
            Self::Supplementary => 0x02,
            Self::SetTerminator => 0xFF,
        }
    }
}

/// The 7 bytes opening every volume descriptor: type, `CD001`, version 1.
#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct VolumeDescriptorHeader {
    pub descriptor_type: u8,
    pub standard_identifier: IsoStrA<5>,
    pub version: u8,
}

impl VolumeDescriptorHeader {
    pub const STANDARD_IDENTIFIER: IsoStrA<5> = IsoStrA::from_bytes_exact(*b"CD001");

    pub fn new(ty: VolumeDescriptorType) -> Self {
        Self {
            descriptor_type: ty.to_u8(),
            standard_identifier: Self::STANDARD_IDENTIFIER,
            version: 1,
        }
    }
}

impl Debug for VolumeDescriptorHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VolumeDescriptorHeader")
            .field("descriptor_type", &self.descriptor_type)
            .field("standard_identifier", &self.standard_identifier)
            .field("version", &self.version)
            .finish()
    }
}

/// The root directory record embedded in a volume descriptor: a 34-byte
/// record whose identifier is the single byte 0x00.
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct RootDirectoryRecord {
    pub header: DirectoryRecordHeader,
    pub identifier: u8,
}

impl RootDirectoryRecord {
    pub fn new(
        root: &ExtentLoc,
        recording: RecordingDateTime,
        volume_sequence_number: u16,
    ) -> Self {
        Self {
            header: DirectoryRecordHeader {
                len: record_length_for(SELF_IDENTIFIER.len()) as u8,
                extended_attr_len: 0,
                extent: U32LsbMsb::new(root.sector),
                data_len: U32LsbMsb::new(root.data_length),
                recording_date_time: recording,
                flags: FileFlags::DIRECTORY.bits(),
                file_unit_size: 0,
                interleave_gap_size: 0,
                volume_sequence_number: U16LsbMsb::new(volume_sequence_number),
                identifier_len: 1,
            },
            identifier: 0x00,
        }
    }
}

/// A primary or supplementary volume descriptor (ECMA-119 8.4/8.5); the
/// two share one layout and differ in the type byte.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct VolumeDescriptor {
    pub header: VolumeDescriptorHeader,
    pub unused0: u8,
    pub system_identifier: IsoStrA<32>,
    pub volume_identifier: IsoStrD<32>,
    pub unused1: [u8; 8],
    pub volume_space_size: U32LsbMsb,
    pub unused2: [u8; 32],
    pub volume_set_size: U16LsbMsb,
    pub volume_sequence_number: U16LsbMsb,
    pub logical_block_size: U16LsbMsb,
    pub path_table_size: U32LsbMsb,
    pub type_l_path_table: U32<LittleEndian>,
    pub opt_type_l_path_table: U32<LittleEndian>,
    pub type_m_path_table: U32<BigEndian>,
    pub opt_type_m_path_table: U32<BigEndian>,
    pub root_directory_record: RootDirectoryRecord,
    pub volume_set_identifier: IsoStrD<128>,
    pub publisher_identifier: IsoStrA<128>,
    pub data_preparer_identifier: IsoStrA<128>,
    pub application_identifier: IsoStrA<128>,
    pub copyright_file_identifier: IsoStrFile<37>,
    pub abstract_file_identifier: IsoStrFile<37>,
    pub bibliographic_file_identifier: IsoStrFile<37>,
    pub creation_date: VolumeDateTime,
    pub modification_date: VolumeDateTime,
    pub expiration_date: VolumeDateTime,
    pub effective_date: VolumeDateTime,
    pub file_structure_version: u8,
    pub unused3: u8,
    pub application_data: [u8; 512],
    pub reserved: [u8; 653],
}

unsafe impl bytemuck::Zeroable for VolumeDescriptor {}
unsafe impl bytemuck::Pod for VolumeDescriptor {}

impl Debug for VolumeDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VolumeDescriptor")
            .field("header", &self.header)
            .field("volume_identifier", &self.volume_identifier)
            .field("volume_space_size", &self.volume_space_size)
            .field("path_table_size", &self.path_table_size)
            .field("root_directory_record", &self.root_directory_record)
            .finish_non_exhaustive()
    }
}

fn invalid(field: &'static str) -> impl FnOnce(&'static str) -> BuildError {
    move |reason| BuildError::InvalidArgument {
        name: field.to_string(),
        reason,
    }
}

impl VolumeDescriptor {
    /// Assembles a descriptor from the volume metadata and its allocated
    /// layout. `PathTableSize` is the per-table byte count rounded up to a
    /// whole number of sectors. Creation and modification dates fall back
    /// to the build clock when the model leaves them unset; expiration
    /// and effective dates stay absent.
    pub fn compose(
        ty: VolumeDescriptorType,
        metadata: &VolumeMetadata,
        loc: &VolumeLoc,
        root: &ExtentLoc,
        recording: RecordingDateTime,
        wall: &DateTime<FixedOffset>,
    ) -> Result<Self> {
        let type_l = loc
            .type_l_sector
            .ok_or(BuildError::BuilderState("path tables not allocated"))?;
        let type_m = loc
            .type_m_sector
            .ok_or(BuildError::BuilderState("path tables not allocated"))?;
        let path_table_size = u32::try_from(
            u64::from(loc.path_table_bytes).next_multiple_of(SECTOR_SIZE),
        )
        .map_err(|_| BuildError::SizeOverflow("path table size"))?;

        Ok(Self {
            header: VolumeDescriptorHeader::new(ty),
            unused0: 0,
            system_identifier: IsoStrA::from_str(&metadata.system_identifier)
                .map_err(invalid("system identifier"))?,
            volume_identifier: IsoStrD::from_str(&metadata.volume_identifier)
                .map_err(invalid("volume identifier"))?,
            unused1: [0; 8],
            volume_space_size: U32LsbMsb::new(loc.logical_block_count),
            unused2: [0; 32],
            volume_set_size: U16LsbMsb::new(metadata.volume_set_size),
            volume_sequence_number: U16LsbMsb::new(metadata.volume_sequence_number),
            logical_block_size: U16LsbMsb::new(metadata.logical_block_size),
            path_table_size: U32LsbMsb::new(path_table_size),
            type_l_path_table: U32::new(type_l),
            opt_type_l_path_table: U32::new(0),
            type_m_path_table: U32::new(type_m),
            opt_type_m_path_table: U32::new(0),
            root_directory_record: RootDirectoryRecord::new(
                root,
                recording,
                metadata.volume_sequence_number,
            ),
            volume_set_identifier: IsoStrD::from_str(&metadata.volume_set_identifier)
                .map_err(invalid("volume set identifier"))?,
            publisher_identifier: IsoStrA::from_str(&metadata.publisher_identifier)
                .map_err(invalid("publisher identifier"))?,
            data_preparer_identifier: IsoStrA::from_str(&metadata.data_preparer_identifier)
                .map_err(invalid("data preparer identifier"))?,
            application_identifier: IsoStrA::from_str(&metadata.application_identifier)
                .map_err(invalid("application identifier"))?,
            copyright_file_identifier: IsoStrFile::from_str(&metadata.copyright_file_identifier)
                .map_err(invalid("copyright file identifier"))?,
            abstract_file_identifier: IsoStrFile::from_str(&metadata.abstract_file_identifier)
                .map_err(invalid("abstract file identifier"))?,
            bibliographic_file_identifier: IsoStrFile::from_str(
                &metadata.bibliographic_file_identifier,
            )
            .map_err(invalid("bibliographic file identifier"))?,
            creation_date: VolumeDateTime::from_datetime(
                metadata.creation_date.as_ref().unwrap_or(wall),
            ),
            modification_date: VolumeDateTime::from_datetime(
                metadata.modification_date.as_ref().unwrap_or(wall),
            ),
            expiration_date: VolumeDateTime::from_optional(metadata.expiration_date.as_ref()),
            effective_date: VolumeDateTime::from_optional(metadata.effective_date.as_ref()),
            file_structure_version: 1,
            unused3: 0,
            application_data: [0; 512],
            reserved: [0; 653],
        })
    }
}

/// The El Torito boot record: a type-0 volume descriptor naming the boot
/// system and pointing at the boot catalog sector.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct BootRecordVolumeDescriptor {
    pub header: VolumeDescriptorHeader,
    pub boot_system_identifier: [u8; 32],
    pub boot_identifier: [u8; 32],
    pub catalog_sector: U32<LittleEndian>,
    pub unused: [u8; 1973],
}

unsafe impl bytemuck::Zeroable for BootRecordVolumeDescriptor {}
unsafe impl bytemuck::Pod for BootRecordVolumeDescriptor {}

impl BootRecordVolumeDescriptor {
    pub const BOOT_SYSTEM_IDENTIFIER: &'static [u8] = b"EL TORITO SPECIFICATION";

    pub fn new(catalog_sector: u32) -> Self {
        let mut boot_system_identifier = [0u8; 32];
        boot_system_identifier[..Self::BOOT_SYSTEM_IDENTIFIER.len()]
            .copy_from_slice(Self::BOOT_SYSTEM_IDENTIFIER);
        Self {
            header: VolumeDescriptorHeader::new(VolumeDescriptorType::BootRecord),
            boot_system_identifier,
            boot_identifier: [0; 32],
            catalog_sector: U32::new(catalog_sector),
            unused: [0; 1973],
        }
    }
}

impl Debug for BootRecordVolumeDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BootRecordVolumeDescriptor")
            .field("header", &self.header)
            .field("catalog_sector", &self.catalog_sector)
            .finish_non_exhaustive()
    }
}

/// Closes the volume descriptor set (type 0xFF).
#[repr(C)]
#[derive(Clone, Copy)]
pub struct VolumeDescriptorSetTerminator {
    pub header: VolumeDescriptorHeader,
    pub padding: [u8; 2041],
}

unsafe impl bytemuck::Zeroable for VolumeDescriptorSetTerminator {}
unsafe impl bytemuck::Pod for VolumeDescriptorSetTerminator {}

impl Default for VolumeDescriptorSetTerminator {
    fn default() -> Self {
        Self::new()
    }
}

impl VolumeDescriptorSetTerminator {
    pub fn new() -> Self {
        Self {
            header: VolumeDescriptorHeader::new(VolumeDescriptorType::SetTerminator),
            padding: [0; 2041],
        }
    }
}

impl Debug for VolumeDescriptorSetTerminator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VolumeDescriptorSetTerminator")
            .field("header", &self.header)
            .finish_non_exhaustive()
    }
}
