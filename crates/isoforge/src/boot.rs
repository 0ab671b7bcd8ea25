use std::fmt::Debug;
use std::io::{Seek, Write};

use crate::error::{BuildError, Result};
use crate::model::{BootCatalog, BootEntry, PlatformId};
use crate::types::{LittleEndian, U16, U32};
use crate::writer::{ImageWriter, SECTOR_SIZE};

/// Every boot catalog entry occupies 32 bytes; the catalog itself is one
/// reserved sector, zero-filled past the last entry.
pub const CATALOG_ENTRY_SIZE: usize = 32;

/// The validation entry opening the catalog. Its checksum makes the
/// sixteen little-endian words of the entry sum to zero modulo 2^16.
#[repr(C)]
#[derive(Clone, Copy, bytemuck::Zeroable, bytemuck::Pod)]
pub struct ValidationEntry {
    pub header_id: u8,
    pub platform_id: u8,
    pub reserved: [u8; 2],
    pub id_string: [u8; 24],
    pub checksum: U16<LittleEndian>,
    /// 0x55, 0xAA.
    pub key: [u8; 2],
}

impl ValidationEntry {
    pub fn new(platform: PlatformId, id_string: &str) -> Result<Self> {
        if id_string.len() > 24 {
            return Err(BuildError::InvalidArgument {
                name: id_string.to_string(),
                reason: "boot catalog id string exceeds 24 bytes",
            });
        }
        let mut id = [0u8; 24];
        id[..id_string.len()].copy_from_slice(id_string.as_bytes());
        let mut entry = Self {
            header_id: 0x01,
            platform_id: platform as u8,
            reserved: [0; 2],
            id_string: id,
            checksum: U16::new(0),
            key: [0x55, 0xAA],
        };
        entry.checksum.set(entry.compute_checksum());
        Ok(entry)
    }

    /// Two's complement of the word sum with the checksum field zeroed.
    fn compute_checksum(&self) -> u16 {
        let bytes = bytemuck::bytes_of(self);
        let mut sum = 0u16;
        for (i, pair) in bytes.chunks_exact(2).enumerate() {
            if i == 14 {
                continue;
            }
            sum = sum.wrapping_add(u16::from_le_bytes([pair[0], pair[1]]));
        }
        sum.wrapping_neg()
    }
}

impl Debug for ValidationEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidationEntry")
            .field("platform_id", &self.platform_id)
            .field("id_string", &String::from_utf8_lossy(&self.id_string))
            .field("checksum", &self.checksum)
            .finish_non_exhaustive()
    }
}

/// A section header introducing the entries of one platform. 0x90 marks a
/// header with more headers following, 0x91 the final header.
#[repr(C)]
#[derive(Clone, Copy, bytemuck::Zeroable, bytemuck::Pod)]
pub struct SectionHeaderEntry {
    pub header_type: u8,
    pub platform_id: u8,
    pub entry_count: U16<LittleEndian>,
    pub id_string: [u8; 28],
}

impl SectionHeaderEntry {
    pub fn new(last: bool, platform: PlatformId, entry_count: u16, id_string: &str) -> Result<Self> {
        if id_string.len() > 28 {
            return Err(BuildError::InvalidArgument {
                name: id_string.to_string(),
                reason: "boot section id string exceeds 28 bytes",
            });
        }
        let mut id = [0u8; 28];
        id[..id_string.len()].copy_from_slice(id_string.as_bytes());
        Ok(Self {
            header_type: if last { 0x91 } else { 0x90 },
            platform_id: platform as u8,
            entry_count: U16::new(entry_count),
            id_string: id,
        })
    }
}

impl Debug for SectionHeaderEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SectionHeaderEntry")
            .field("header_type", &self.header_type)
            .field("platform_id", &self.platform_id)
            .field("entry_count", &self.entry_count)
            .finish_non_exhaustive()
    }
}

/// The initial/default entry and every section entry share this layout;
/// section entries may carry selection criteria.
#[repr(C)]
#[derive(Clone, Copy, bytemuck::Zeroable, bytemuck::Pod)]
pub struct SectionEntry {
    /// 0x88 bootable, 0x00 not bootable.
    pub boot_indicator: u8,
    pub media_type: u8,
    /// 0 is interpreted by firmware as the traditional 0x07C0.
    pub load_segment: U16<LittleEndian>,
    pub system_type: u8,
    pub unused: u8,
    pub sector_count: U16<LittleEndian>,
    pub load_rba: U32<LittleEndian>,
    pub selection_criteria_type: u8,
    pub vendor_unique: [u8; 19],
}

impl SectionEntry {
    pub fn from_entry(entry: &BootEntry, load_rba: u32) -> Self {
        let (criteria_type, vendor_unique) = entry
            .selection_criteria
            .map_or((0, [0; 19]), |c| (c.criteria_type, c.vendor_unique));
        Self {
            boot_indicator: if entry.bootable { 0x88 } else { 0x00 },
            media_type: entry.media_type as u8,
            load_segment: U16::new(entry.load_segment),
            system_type: entry.system_type,
            unused: 0,
            sector_count: U16::new(entry.sector_count),
            load_rba: U32::new(load_rba),
            selection_criteria_type: criteria_type,
            vendor_unique,
        }
    }
}

impl Debug for SectionEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SectionEntry")
            .field("boot_indicator", &self.boot_indicator)
            .field("media_type", &self.media_type)
            .field("sector_count", &self.sector_count)
            .field("load_rba", &self.load_rba)
            .finish_non_exhaustive()
    }
}

/// The boot info table patched into a boot image at offset 8, telling
/// GRUB/LIMINE/SYSLINUX-style loaders where they live on the disc.
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Zeroable, bytemuck::Pod)]
pub struct BootInfoTable {
    pub iso_start: U32<LittleEndian>,
    pub boot_device_number: U16<LittleEndian>,
    pub boot_media_type: U16<LittleEndian>,
    pub boot_image_lba: U32<LittleEndian>,
    pub total_sectors: U32<LittleEndian>,
    pub boot_file_offset: U32<LittleEndian>,
    pub boot_file_size: U32<LittleEndian>,
}

/// Byte offset of the boot info table within a boot image.
pub const BOOT_INFO_TABLE_OFFSET: u64 = 8;

/// Writes the full catalog sector: validation entry, initial entry, then
/// each section's header and entries, zero-filled to the sector end.
/// `entry_rbas` carries one LBA per entry in catalog order, the initial
/// entry first.
pub fn write_catalog<W: Write + Seek>(
    w: &mut ImageWriter<W>,
    catalog: &BootCatalog,
    entry_rbas: &[u32],
) -> Result<()> {
    let entry_total = 2 + catalog
        .sections
        .iter()
        .map(|s| 1 + s.entries.len())
        .sum::<usize>();
    if entry_total * CATALOG_ENTRY_SIZE > SECTOR_SIZE as usize {
        return Err(BuildError::SizeOverflow("boot catalog exceeds one sector"));
    }

    let start = w.position()?;
    let mut rbas = entry_rbas.iter().copied();
    let mut next_rba =
        || -> Result<u32> { rbas.next().ok_or(BuildError::BuilderState("boot entry not allocated")) };

    w.write_struct(&ValidationEntry::new(catalog.platform_id, &catalog.id_string)?)?;
    w.write_struct(&SectionEntry::from_entry(&catalog.initial_entry, next_rba()?))?;
    for (index, section) in catalog.sections.iter().enumerate() {
        let entry_count = u16::try_from(section.entries.len())
            .map_err(|_| BuildError::SizeOverflow("boot section entry count"))?;
        let last = index + 1 == catalog.sections.len();
        w.write_struct(&SectionHeaderEntry::new(
            last,
            section.platform_id,
            entry_count,
            &section.id_string,
        )?)?;
        for entry in &section.entries {
            w.write_struct(&SectionEntry::from_entry(entry, next_rba()?))?;
        }
    }

    let written = w.position()? - start;
    w.write_zeros((SECTOR_SIZE - written) as usize)?;
    Ok(())
}
