//! Builds bootable ISO-9660 (ECMA-119) disk images with the El Torito
//! extension.
//!
//! The caller assembles a [`DiskImage`] model, then hands it to an
//! [`ImageBuilder`] together with a seekable output stream. The build
//! canonicalises host names into on-disk identifiers, lays the image out
//! sector by sector, and emits every structure bit-exactly: volume
//! descriptors at sector 16, the optional boot record and catalog, one
//! extent per directory and file, and both path tables.

use std::io::{Read, Seek, Write};

use bitflags::bitflags;
use chrono::{DateTime, FixedOffset, Local};

pub mod boot;
pub mod directory;
pub mod error;
pub mod layout;
pub mod model;
pub mod names;
pub mod path;
pub mod types;
pub mod volume;
pub mod writer;

pub use error::{BuildError, Result};
pub use model::{
    BootCatalog, BootEntry, BootMediaType, BootSection, DiskImage, FileAttributes, FileContent,
    NodeId, PlatformId, SelectionCriteria, Volume, VolumeMetadata,
};
pub use names::{CompatibilityFlags, CompatibilityLevel};
pub use writer::{SECTOR_SIZE, SYSTEM_AREA_SECTORS};

use boot::{BOOT_INFO_TABLE_OFFSET, BootInfoTable};
use directory::{DirectoryRecord, FileFlags, PARENT_IDENTIFIER, SELF_IDENTIFIER};
use layout::Layout;
use model::NodeKind;
use names::NameMapper;
use types::{LittleEndian, RecordingDateTime, U16, U32};
use volume::{
    BootRecordVolumeDescriptor, VolumeDescriptor, VolumeDescriptorSetTerminator,
    VolumeDescriptorType,
};
use writer::ImageWriter;

/// CD sector mode of the produced image. Only Mode 1 data sectors are
/// supported; the raw modes exist so callers get a deliberate error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectorMode {
    Mode1,
    Mode2Form1,
    Mode2Form2,
}

bitflags! {
    /// Requested format extensions. Only `EL_TORITO` is functional;
    /// `UDF` and `APPLE` are rejected at construction, the rest are
    /// accepted and ignored.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Extensions: u8 {
        const ROCK_RIDGE = 1 << 0;
        const JOLIET = 1 << 1;
        const UDF = 1 << 2;
        const EL_TORITO = 1 << 3;
        const APPLE = 1 << 4;
    }
}

/// Build configuration: interchange level, name-mapping relaxations,
/// sector mode, extensions, and an optional fixed recording timestamp
/// for reproducible output.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub level: CompatibilityLevel,
    pub flags: CompatibilityFlags,
    pub mode: SectorMode,
    pub extensions: Extensions,
    /// Stamp for directory records and unset volume dates. When `None`
    /// the wall clock is read once per build.
    pub recording_time: Option<DateTime<FixedOffset>>,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            level: CompatibilityLevel::Level1,
            flags: CompatibilityFlags::LIMIT_DIRECTORIES
                | CompatibilityFlags::TRUNCATE_FILE_NAMES
                | CompatibilityFlags::UPPER_CASE_FILE_NAMES
                | CompatibilityFlags::RESOLVE_NAME_CONFLICTS
                | CompatibilityFlags::STRIP_ILLEGAL_DOTS,
            mode: SectorMode::Mode1,
            extensions: Extensions::empty(),
            recording_time: None,
        }
    }
}

/// A deferred boot-info-table patch, applied once the image extent is
/// complete and the total sector count is known.
#[derive(Debug, Clone, Copy)]
struct BootInfoPatch {
    image_lba: u32,
    file_length: u32,
}

/// Drives the two-pass build: canonicalise, allocate, emit, then return
/// to every reserved sector and fill in the cross-references.
#[derive(Debug)]
pub struct ImageBuilder {
    options: BuildOptions,
}

impl ImageBuilder {
    pub fn new(options: BuildOptions) -> Result<Self> {
        match options.mode {
            SectorMode::Mode1 => {}
            SectorMode::Mode2Form1 | SectorMode::Mode2Form2 => {
                return Err(BuildError::Unsupported("only Mode 1 sectors are supported"));
            }
        }
        if options.extensions.intersects(Extensions::UDF | Extensions::APPLE) {
            return Err(BuildError::Unsupported(
                "the UDF and Apple extensions are not supported",
            ));
        }
        Ok(Self { options })
    }

    /// Writes `image` to `output`. The stream must be freshly truncated
    /// and is exclusively owned by the builder for the whole build; on
    /// error the partial image is left behind but is not valid.
    pub fn build<W: Write + Seek>(&self, image: &mut DiskImage, output: &mut W) -> Result<()> {
        let wall = self
            .options
            .recording_time
            .unwrap_or_else(|| Local::now().fixed_offset());
        let recording = RecordingDateTime::from_datetime(&wall);

        for volume in std::iter::once(&image.primary).chain(image.supplementary.iter()) {
            if volume.metadata.logical_block_size != SECTOR_SIZE as u16 {
                return Err(BuildError::Unsupported(
                    "logical block sizes other than 2048 are not supported",
                ));
            }
        }

        let mapper = NameMapper::new(self.options.level, self.options.flags);
        mapper.map_volume(&mut image.primary)?;
        for volume in &mut image.supplementary {
            mapper.map_volume(volume)?;
        }

        let volume_count = 1 + image.supplementary.len();
        let mut w = ImageWriter::new(output);
        let mut layout = Layout::new(volume_count);

        // The system area stays zero; layout begins at sector 16.
        w.seek_to_sector(SYSTEM_AREA_SECTORS as u32)?;
        layout.allocate_volume_descriptor(&mut w, 0)?;
        if image.boot_catalog.is_some() {
            layout.allocate_boot_record(&mut w)?;
        }
        for index in 1..volume_count {
            layout.allocate_volume_descriptor(&mut w, index)?;
        }
        w.write_struct(&VolumeDescriptorSetTerminator::new())?;

        let patches = match &image.boot_catalog {
            Some(catalog) => self.emit_boot_catalog(&mut w, &mut layout, catalog)?,
            None => Vec::new(),
        };

        self.emit_volume(&mut w, &mut layout, 0, &image.primary, recording, &wall)?;
        for (index, volume) in image.supplementary.iter().enumerate() {
            self.emit_volume(&mut w, &mut layout, index + 1, volume, recording, &wall)?;
        }

        let end = w.position()?;
        let total_sectors = u32::try_from(end / SECTOR_SIZE)
            .map_err(|_| BuildError::SizeOverflow("image sector count"))?;
        for patch in &patches {
            self.apply_boot_info_table(&mut w, patch, total_sectors)?;
        }

        // Round the image up to the final sector boundary.
        if w.stream_len()? < end {
            w.seek_to(end - 1)?;
            w.write_u8(0)?;
        }
        Ok(())
    }

    /// Reserves the catalog sector, copies every entry's image data into
    /// extents behind it, then backfills the boot record and the catalog.
    fn emit_boot_catalog<W: Write + Seek>(
        &self,
        w: &mut ImageWriter<W>,
        layout: &mut Layout,
        catalog: &BootCatalog,
    ) -> Result<Vec<BootInfoPatch>> {
        let catalog_sector = layout.allocate_boot_catalog(w)?;
        let boot_record_sector = layout
            .boot_record_sector
            .ok_or(BuildError::BuilderState("boot record not allocated"))?;

        let entries = std::iter::once(&catalog.initial_entry)
            .chain(catalog.sections.iter().flat_map(|s| s.entries.iter()));
        let mut entry_rbas = Vec::new();
        let mut patches = Vec::new();
        for entry in entries {
            let data_length = entry.data.measure()?;
            let sector_count = u64::from(data_length).div_ceil(SECTOR_SIZE);
            let rba = if sector_count == 0 {
                0
            } else {
                let sector = w.current_sector()?;
                copy_content(
                    w,
                    "boot image",
                    &entry.data,
                    data_length,
                    sector_count * SECTOR_SIZE,
                )?;
                w.seek_to_next_sector()?;
                sector
            };
            entry_rbas.push(rba);
            if entry.boot_info_table && rba != 0 {
                patches.push(BootInfoPatch {
                    image_lba: rba,
                    file_length: data_length,
                });
            }
        }

        w.preserving_location(|w| {
            w.seek_to_sector(boot_record_sector)?;
            w.write_struct(&BootRecordVolumeDescriptor::new(catalog_sector))?;
            w.seek_to_sector(catalog_sector)?;
            boot::write_catalog(w, catalog, &entry_rbas)
        })?;
        log::debug!(
            "boot catalog at sector {catalog_sector}, {} image(s)",
            entry_rbas.len()
        );
        Ok(patches)
    }

    /// Lays out and emits one volume: directory extents, the path-table
    /// area, file extents, and finally the descriptor back in its
    /// reserved sector.
    fn emit_volume<W: Write + Seek>(
        &self,
        w: &mut ImageWriter<W>,
        layout: &mut Layout,
        index: usize,
        volume: &Volume,
        recording: RecordingDateTime,
        wall: &DateTime<FixedOffset>,
    ) -> Result<()> {
        let start_sector = w.current_sector()?;
        // The primary volume's space size spans the whole image; each
        // supplementary volume counts from its own first sector.
        let space_origin = if index == 0 { 0 } else { start_sector };
        let root = volume.root();

        layout.allocate_directory_extents(w, index, volume, root)?;
        let records = path::build_records(volume, layout, index)?;
        let table_bytes = path::table_size(&records)?;
        layout.allocate_path_tables(w, index, table_bytes)?;
        layout.allocate_file_extents(w, index, volume, root)?;
        let end_sector = w.current_sector()?;

        self.emit_directory_tree(w, layout, index, volume, root, root, recording)?;

        let loc = *layout.volume(index);
        let l_sector = loc
            .type_l_sector
            .ok_or(BuildError::BuilderState("path tables not allocated"))?;
        w.seek_to_sector(l_sector)?;
        let l_len = path::write_table(w, &records, path::TableKind::TypeL)?;
        let m_len = path::write_table(w, &records, path::TableKind::TypeM)?;
        if l_len != m_len {
            return Err(BuildError::BuilderState("path table lengths diverge"));
        }
        log::debug!(
            "volume {index}: {} path table records, {l_len} bytes per table",
            records.len()
        );

        self.emit_file_tree(w, layout, index, volume, root)?;

        layout.volume_mut(index).logical_block_count = end_sector - space_origin;

        let descriptor_sector = loc
            .descriptor_sector
            .ok_or(BuildError::BuilderState("volume descriptor not allocated"))?;
        if loc.descriptor_written {
            return Err(BuildError::BuilderState("volume descriptor written twice"));
        }
        let ty = if index == 0 {
            VolumeDescriptorType::Primary
        } else {
            VolumeDescriptorType::Supplementary
        };
        let root_loc = layout.extent(index, root)?;
        let descriptor = VolumeDescriptor::compose(
            ty,
            &volume.metadata,
            layout.volume(index),
            &root_loc,
            recording,
            wall,
        )?;
        w.seek_to_sector(end_sector)?;
        w.preserving_location(|w| {
            w.seek_to_sector(descriptor_sector)?;
            w.write_struct(&descriptor)
        })?;
        layout.volume_mut(index).descriptor_written = true;
        Ok(())
    }

    /// Emits one directory extent, then its subdirectories depth-first.
    /// The walk supplies each child's parent location; the root's parent
    /// record points back at the root itself.
    #[allow(clippy::too_many_arguments)]
    fn emit_directory_tree<W: Write + Seek>(
        &self,
        w: &mut ImageWriter<W>,
        layout: &mut Layout,
        index: usize,
        volume: &Volume,
        dir: NodeId,
        parent: NodeId,
        recording: RecordingDateTime,
    ) -> Result<()> {
        let self_loc = layout.extent(index, dir)?;
        let parent_loc = layout.extent(index, parent)?;
        let sequence = volume.metadata.volume_sequence_number;

        w.seek_to_sector(self_loc.sector)?;
        let dir_flags = FileFlags::for_entry(&volume.node(dir).attributes, true);
        DirectoryRecord::new(
            SELF_IDENTIFIER,
            self_loc.sector,
            self_loc.data_length,
            dir_flags,
            recording,
            sequence,
        )?
        .write_contained(w)?;
        let parent_flags = FileFlags::for_entry(&volume.node(parent).attributes, true);
        DirectoryRecord::new(
            PARENT_IDENTIFIER,
            parent_loc.sector,
            parent_loc.data_length,
            parent_flags,
            recording,
            sequence,
        )?
        .write_contained(w)?;

        let children = volume.sorted_children(dir)?;
        for &child in &children {
            let node = volume.node(child);
            let loc = layout.extent(index, child)?;
            DirectoryRecord::new(
                &node.mapped()?.identifier,
                loc.sector,
                loc.data_length,
                FileFlags::for_entry(&node.attributes, node.is_directory()),
                recording,
                sequence,
            )?
            .write_contained(w)?;
        }
        layout.mark_extent_written(index, dir)?;

        for &child in &children {
            if volume.node(child).is_directory() {
                self.emit_directory_tree(w, layout, index, volume, child, dir, recording)?;
            }
        }
        Ok(())
    }

    /// Streams file contents into their reserved extents, matching the
    /// allocation order (subdirectories first, then this directory's
    /// files).
    fn emit_file_tree<W: Write + Seek>(
        &self,
        w: &mut ImageWriter<W>,
        layout: &mut Layout,
        index: usize,
        volume: &Volume,
        dir: NodeId,
    ) -> Result<()> {
        let children = volume.sorted_children(dir)?;
        for &child in &children {
            if volume.node(child).is_directory() {
                self.emit_file_tree(w, layout, index, volume, child)?;
            }
        }
        for &child in &children {
            let node = volume.node(child);
            let NodeKind::File {
                content,
                data_length,
            } = &node.kind
            else {
                continue;
            };
            let loc = layout.extent(index, child)?;
            if loc.sector_count == 0 {
                continue;
            }
            w.seek_to_sector(loc.sector)?;
            copy_content(
                w,
                &node.name,
                content,
                *data_length,
                u64::from(loc.sector_count) * SECTOR_SIZE,
            )?;
            layout.mark_extent_written(index, child)?;
        }
        Ok(())
    }

    fn apply_boot_info_table<W: Write + Seek>(
        &self,
        w: &mut ImageWriter<W>,
        patch: &BootInfoPatch,
        total_sectors: u32,
    ) -> Result<()> {
        let table = BootInfoTable {
            iso_start: U32::new(SYSTEM_AREA_SECTORS as u32),
            boot_device_number: U16::<LittleEndian>::new(0),
            boot_media_type: U16::<LittleEndian>::new(0),
            boot_image_lba: U32::new(patch.image_lba),
            total_sectors: U32::new(total_sectors),
            boot_file_offset: U32::new(
                patch
                    .image_lba
                    .checked_mul(SECTOR_SIZE as u32)
                    .ok_or(BuildError::SizeOverflow("boot image offset"))?,
            ),
            boot_file_size: U32::new(patch.file_length),
        };
        w.preserving_location(|w| {
            w.seek_to(u64::from(patch.image_lba) * SECTOR_SIZE + BOOT_INFO_TABLE_OFFSET)?;
            w.write_struct(&table)
        })
    }
}

/// Copies one content source into the image under a scoped-release
/// handle. A source yielding more than the reserved bytes aborts the
/// build: the extent it was measured for can no longer hold it.
fn copy_content<W: Write + Seek>(
    w: &mut ImageWriter<W>,
    name: &str,
    content: &FileContent,
    declared: u32,
    reserved: u64,
) -> Result<()> {
    match content {
        FileContent::Bytes(bytes) => w.write_bytes(bytes),
        FileContent::HostFile(path) => {
            let mut file = std::fs::File::open(path)?;
            let mut buffer = [0u8; 8192];
            let mut copied: u64 = 0;
            loop {
                let n = file.read(&mut buffer)?;
                if n == 0 {
                    return Ok(());
                }
                copied += n as u64;
                if copied > reserved {
                    return Err(BuildError::ContentRace {
                        name: name.to_string(),
                        declared,
                    });
                }
                w.write_bytes(&buffer[..n])?;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const S: usize = SECTOR_SIZE as usize;

    fn fixed_time() -> DateTime<FixedOffset> {
        use chrono::TimeZone;
        FixedOffset::east_opt(3600)
            .unwrap()
            .with_ymd_and_hms(2024, 5, 6, 7, 8, 9)
            .unwrap()
    }

    fn options() -> BuildOptions {
        BuildOptions {
            recording_time: Some(fixed_time()),
            ..BuildOptions::default()
        }
    }

    fn build(image: &mut DiskImage) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        ImageBuilder::new(options())
            .unwrap()
            .build(image, &mut cursor)
            .unwrap();
        cursor.into_inner()
    }

    fn test_volume() -> Volume {
        Volume::new(VolumeMetadata {
            volume_identifier: "TEST".to_string(),
            ..VolumeMetadata::default()
        })
    }

    /// Parses the (offset, identifier, extent, data_length) of every
    /// record in a directory extent.
    fn parse_records(extent: &[u8]) -> Vec<(usize, Vec<u8>, u32, u32)> {
        let mut records = Vec::new();
        let mut offset = 0;
        while offset < extent.len() && extent[offset] != 0 {
            let len = extent[offset] as usize;
            let id_len = extent[offset + 32] as usize;
            records.push((
                offset,
                extent[offset + 33..offset + 33 + id_len].to_vec(),
                u32::from_le_bytes(extent[offset + 2..offset + 6].try_into().unwrap()),
                u32::from_le_bytes(extent[offset + 10..offset + 14].try_into().unwrap()),
            ));
            offset += len;
        }
        records
    }

    #[test]
    fn empty_volume_layout() {
        let mut image = DiskImage::new(test_volume());
        let bytes = build(&mut image);

        // 16 system + PVD + terminator + root extent + path table area.
        assert_eq!(bytes.len(), 20 * S);
        assert!(bytes[..16 * S].iter().all(|&b| b == 0));
        assert_eq!(bytes[16 * S], 0x01);
        assert_eq!(&bytes[16 * S + 1..16 * S + 6], b"CD001");
        assert_eq!(bytes[17 * S], 0xFF);

        let records = parse_records(&bytes[18 * S..19 * S]);
        assert_eq!(records.len(), 2);
        let (_, self_id, self_extent, _) = &records[0];
        let (_, parent_id, parent_extent, _) = &records[1];
        assert_eq!(self_id.as_slice(), &[0x00]);
        assert_eq!(parent_id.as_slice(), &[0x01]);
        assert_eq!(self_extent, parent_extent);
        assert_eq!(*self_extent, 18);
    }

    #[test]
    fn empty_volume_descriptor_fields() {
        let mut image = DiskImage::new(test_volume());
        let bytes = build(&mut image);
        let pvd = &bytes[16 * S..17 * S];

        assert_eq!(&pvd[40..44], b"TEST");
        // Volume space size covers the whole 20-sector image, both-endian.
        assert_eq!(u32::from_le_bytes(pvd[80..84].try_into().unwrap()), 20);
        assert_eq!(u32::from_be_bytes(pvd[84..88].try_into().unwrap()), 20);
        // Both path tables live in the single area at sector 19.
        assert_eq!(u32::from_le_bytes(pvd[140..144].try_into().unwrap()), 19);
        assert_eq!(u32::from_be_bytes(pvd[148..152].try_into().unwrap()), 19);
        // Root record points at sector 18.
        assert_eq!(u32::from_le_bytes(pvd[158..162].try_into().unwrap()), 18);

        // The type-L root record: 10 bytes, extent 18, parent 1.
        let table = &bytes[19 * S..];
        assert_eq!(table[0], 1);
        assert_eq!(u32::from_le_bytes(table[2..6].try_into().unwrap()), 18);
        assert_eq!(u16::from_le_bytes(table[6..8].try_into().unwrap()), 1);
        // The type-M copy follows immediately.
        assert_eq!(table[10], 1);
        assert_eq!(u32::from_be_bytes(table[12..16].try_into().unwrap()), 18);
        assert_eq!(u16::from_be_bytes(table[16..18].try_into().unwrap()), 1);
    }

    #[test]
    fn single_file_layout() {
        let mut image = DiskImage::new(test_volume());
        let root = image.primary.root();
        image
            .primary
            .add_file(
                root,
                "HELLO.TXT;1",
                FileContent::Bytes(b"hi".to_vec()),
                FileAttributes::default(),
            )
            .unwrap();
        let bytes = build(&mut image);

        assert_eq!(bytes.len(), 21 * S);
        // The file extent begins two sectors after the root extent, past
        // the path table area.
        assert_eq!(&bytes[20 * S..20 * S + 2], &[0x68, 0x69]);
        assert!(bytes[20 * S + 2..21 * S].iter().all(|&b| b == 0));

        let records = parse_records(&bytes[18 * S..19 * S]);
        assert_eq!(records.len(), 3);
        let (_, id, extent, data_length) = &records[2];
        assert_eq!(id.as_slice(), b"HELLO.TXT;1");
        assert_eq!(*extent, 20);
        assert_eq!(*data_length, 2);
    }

    #[test]
    fn name_conflicts_resolve_to_unique_identifiers() {
        let mut image = DiskImage::new(test_volume());
        let root = image.primary.root();
        for name in ["Readme.txt", "README.TXT"] {
            image
                .primary
                .add_file(
                    root,
                    name,
                    FileContent::Bytes(vec![0; 10]),
                    FileAttributes::default(),
                )
                .unwrap();
        }
        let bytes = build(&mut image);
        let records = parse_records(&bytes[18 * S..19 * S]);
        let identifiers: Vec<&[u8]> = records[2..].iter().map(|(_, id, _, _)| id.as_slice()).collect();
        assert!(identifiers.contains(&b"README.TXT;1".as_slice()));
        assert!(identifiers.contains(&b"README~1.TXT;1".as_slice()));
        assert_eq!(identifiers.len(), 2);
    }

    #[test]
    fn nine_nested_directories_fail_the_depth_limit() {
        let mut image = DiskImage::new(test_volume());
        let mut parent = image.primary.root();
        for i in 0..9 {
            parent = image
                .primary
                .add_directory(parent, &format!("D{i}"), FileAttributes::default())
                .unwrap();
        }
        let mut cursor = Cursor::new(Vec::new());
        let err = ImageBuilder::new(options())
            .unwrap()
            .build(&mut image, &mut cursor)
            .unwrap_err();
        assert!(matches!(err, BuildError::DepthExceeded { .. }));
    }

    #[test]
    fn el_torito_no_emulation_boot() {
        let payload: Vec<u8> = (0..2048u32).map(|i| i as u8).collect();
        let mut image = DiskImage::new(test_volume());
        image.boot_catalog = Some(BootCatalog::new(
            PlatformId::X86,
            "ISOFORGE",
            BootEntry::no_emulation(FileContent::Bytes(payload.clone()), 4),
        ));
        let bytes = build(&mut image);

        // Boot record at sector 17.
        let record = &bytes[17 * S..18 * S];
        assert_eq!(record[0], 0x00);
        assert_eq!(&record[1..6], b"CD001");
        assert_eq!(record[6], 0x01);
        assert_eq!(&record[7..30], b"EL TORITO SPECIFICATION");
        assert!(record[30..71].iter().all(|&b| b == 0));
        let catalog_sector = u32::from_le_bytes(record[71..75].try_into().unwrap());
        assert_eq!(catalog_sector, 19);

        // Validation entry: 16-bit word sum zero, 0x55AA tail.
        let catalog = &bytes[19 * S..20 * S];
        let sum = catalog[..32]
            .chunks_exact(2)
            .fold(0u16, |s, p| s.wrapping_add(u16::from_le_bytes([p[0], p[1]])));
        assert_eq!(sum, 0);
        assert_eq!(&catalog[30..32], &[0x55, 0xAA]);

        // Initial entry: bootable, no emulation, LBA of the image.
        assert_eq!(catalog[32], 0x88);
        assert_eq!(catalog[33], 0x00);
        assert_eq!(u16::from_le_bytes(catalog[38..40].try_into().unwrap()), 4);
        let image_lba = u32::from_le_bytes(catalog[40..44].try_into().unwrap());
        assert_eq!(image_lba, 20);
        assert_eq!(&bytes[20 * S..21 * S], payload.as_slice());

        // The volume's own structures follow the boot data.
        let records = parse_records(&bytes[21 * S..22 * S]);
        assert_eq!(records[0].2, 21);
    }

    #[test]
    fn boot_info_table_is_patched_into_the_image() {
        let mut entry = BootEntry::no_emulation(FileContent::Bytes(vec![0; 4096]), 4);
        entry.boot_info_table = true;
        let mut image = DiskImage::new(test_volume());
        image.boot_catalog = Some(BootCatalog::new(PlatformId::X86, "ISOFORGE", entry));
        let bytes = build(&mut image);

        let table = &bytes[20 * S + 8..20 * S + 8 + 24];
        assert_eq!(u32::from_le_bytes(table[0..4].try_into().unwrap()), 16);
        assert_eq!(u32::from_le_bytes(table[8..12].try_into().unwrap()), 20);
        let total = u32::from_le_bytes(table[12..16].try_into().unwrap());
        assert_eq!(total as usize * S, bytes.len());
        assert_eq!(u32::from_le_bytes(table[20..24].try_into().unwrap()), 4096);
    }

    #[test]
    fn mode2_is_rejected_at_construction() {
        let err = ImageBuilder::new(BuildOptions {
            mode: SectorMode::Mode2Form1,
            ..BuildOptions::default()
        })
        .unwrap_err();
        assert!(matches!(err, BuildError::Unsupported(_)));

        let err = ImageBuilder::new(BuildOptions {
            extensions: Extensions::UDF,
            ..BuildOptions::default()
        })
        .unwrap_err();
        assert!(matches!(err, BuildError::Unsupported(_)));
    }

    #[test]
    fn supplementary_volume_gets_its_own_descriptor_and_tree() {
        let mut image = DiskImage::new(test_volume());
        let mut second = Volume::new(VolumeMetadata {
            volume_identifier: "EXTRA".to_string(),
            ..VolumeMetadata::default()
        });
        let root = second.root();
        second
            .add_file(
                root,
                "B.TXT",
                FileContent::Bytes(vec![0xBB; 3]),
                FileAttributes::default(),
            )
            .unwrap();
        image.supplementary.push(second);
        let bytes = build(&mut image);

        // PVD 16, SVD 17, terminator 18; primary tree at 19, the
        // supplementary tree after it.
        assert_eq!(bytes[16 * S], 0x01);
        assert_eq!(bytes[17 * S], 0x02);
        assert_eq!(&bytes[17 * S + 1..17 * S + 6], b"CD001");
        assert_eq!(bytes[18 * S], 0xFF);

        let svd = &bytes[17 * S..18 * S];
        assert_eq!(&svd[40..45], b"EXTRA");
        let root_extent = u32::from_le_bytes(svd[158..162].try_into().unwrap());
        // Primary tree: root 19, path area 20. Supplementary root at 21.
        assert_eq!(root_extent, 21);
        let records = parse_records(&bytes[21 * S..22 * S]);
        assert_eq!(records.len(), 3);
        assert_eq!(records[2].1, b"B.TXT;1".to_vec());
    }

    #[test]
    fn path_tables_decode_identically() {
        let mut image = DiskImage::new(test_volume());
        let root = image.primary.root();
        let a = image
            .primary
            .add_directory(root, "ALPHA", FileAttributes::default())
            .unwrap();
        image
            .primary
            .add_directory(a, "INNER", FileAttributes::default())
            .unwrap();
        image
            .primary
            .add_directory(root, "BETA", FileAttributes::default())
            .unwrap();
        let bytes = build(&mut image);

        let pvd = &bytes[16 * S..17 * S];
        let l_sector = u32::from_le_bytes(pvd[140..144].try_into().unwrap()) as usize;
        let table_area = &bytes[l_sector * S..];

        // The M table follows the L table with no separator, so decode
        // every record in the shared area and split the run in half.
        let mut all = Vec::new();
        let mut offset = 0;
        while table_area[offset] != 0 {
            let id_len = table_area[offset] as usize;
            all.push((
                offset,
                table_area[offset + 2..offset + 6].to_vec(),
                table_area[offset + 6..offset + 8].to_vec(),
                table_area[offset + 8..offset + 8 + id_len].to_vec(),
            ));
            offset += 8 + id_len + (id_len & 1);
        }
        assert_eq!(all.len(), 8);
        let (l, m) = all.split_at(4);
        // Both tables have identical byte length: the M table starts
        // exactly one table-length past the L table.
        assert_eq!(m[0].0, offset / 2);
        for ((_, l_extent, l_parent, l_id), (_, m_extent, m_parent, m_id)) in l.iter().zip(m) {
            let le = u32::from_le_bytes(l_extent.as_slice().try_into().unwrap());
            let be = u32::from_be_bytes(m_extent.as_slice().try_into().unwrap());
            assert_eq!(le, be);
            let lp = u16::from_le_bytes(l_parent.as_slice().try_into().unwrap());
            let bp = u16::from_be_bytes(m_parent.as_slice().try_into().unwrap());
            assert_eq!(lp, bp);
            assert_eq!(l_id, m_id);
        }
        let names: Vec<&[u8]> = l.iter().map(|(_, _, _, id)| id.as_slice()).collect();
        let expected: Vec<&[u8]> = vec![b"\x00", b"ALPHA", b"BETA", b"INNER"];
        assert_eq!(names, expected);
    }

    #[test]
    fn directory_records_never_straddle_sectors() {
        let mut image = DiskImage::new(test_volume());
        let root = image.primary.root();
        // Enough long names to spill the root extent into a second sector.
        for i in 0..60 {
            image
                .primary
                .add_file(
                    root,
                    &format!("FILE{i:02}.LONGEXT;1"),
                    FileContent::Bytes(vec![1]),
                    FileAttributes::default(),
                )
                .unwrap();
        }
        let mut cursor = Cursor::new(Vec::new());
        ImageBuilder::new(BuildOptions {
            level: CompatibilityLevel::Level2,
            ..options()
        })
        .unwrap()
        .build(&mut image, &mut cursor)
        .unwrap();
        let bytes = cursor.into_inner();

        let root_extent_sector = {
            let pvd = &bytes[16 * S..17 * S];
            u32::from_le_bytes(pvd[158..162].try_into().unwrap()) as usize
        };
        let root_len = {
            let pvd = &bytes[16 * S..17 * S];
            u32::from_le_bytes(pvd[166..170].try_into().unwrap()) as usize
        };
        assert!(root_len > S);
        let extent = &bytes[root_extent_sector * S..root_extent_sector * S + root_len];
        let mut offset = 0;
        let mut seen = 0;
        while offset < extent.len() {
            if extent[offset] == 0 {
                // Zero fill before a sector boundary; hop to the next sector.
                offset = (offset / S + 1) * S;
                continue;
            }
            let len = extent[offset] as usize;
            assert_eq!(offset / S, (offset + len - 1) / S, "record straddles a sector");
            offset += len;
            seen += 1;
        }
        assert_eq!(seen, 62);
    }

    #[test]
    fn builds_are_deterministic_with_a_fixed_timestamp() {
        let make = || {
            let mut image = DiskImage::new(test_volume());
            let root = image.primary.root();
            image
                .primary
                .add_file(
                    root,
                    "DATA.BIN",
                    FileContent::Bytes(vec![7; 5000]),
                    FileAttributes::default(),
                )
                .unwrap();
            image
        };
        let first = build(&mut make());
        let second = build(&mut make());
        assert_eq!(first, second);
    }

    #[test]
    fn host_file_contents_are_streamed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payload.bin");
        std::fs::write(&path, vec![0x5A; 3000]).unwrap();

        let mut image = DiskImage::new(test_volume());
        let root = image.primary.root();
        image
            .primary
            .add_file(
                root,
                "PAYLOAD.BIN",
                FileContent::HostFile(path),
                FileAttributes::default(),
            )
            .unwrap();
        let bytes = build(&mut image);
        assert!(bytes[20 * S..20 * S + 3000].iter().all(|&b| b == 0x5A));
    }

    #[test]
    fn growing_host_file_aborts_the_build() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grow.bin");
        std::fs::write(&path, vec![1u8; 2048]).unwrap();

        let mut image = DiskImage::new(test_volume());
        let root = image.primary.root();
        image
            .primary
            .add_file(
                root,
                "GROW.BIN",
                FileContent::HostFile(path.clone()),
                FileAttributes::default(),
            )
            .unwrap();
        // The source grows past its measured extent before emission.
        std::fs::write(&path, vec![1u8; 4096]).unwrap();

        let mut cursor = Cursor::new(Vec::new());
        let err = ImageBuilder::new(options())
            .unwrap()
            .build(&mut image, &mut cursor)
            .unwrap_err();
        assert!(matches!(err, BuildError::ContentRace { .. }));
    }

    #[test]
    fn associated_files_share_identifiers_in_the_extent() {
        let mut image = DiskImage::new(test_volume());
        let root = image.primary.root();
        image
            .primary
            .add_file(
                root,
                "twin.dat",
                FileContent::Bytes(vec![1; 10]),
                FileAttributes::default(),
            )
            .unwrap();
        image
            .primary
            .add_file(
                root,
                "twin.dat",
                FileContent::Bytes(vec![2; 10]),
                FileAttributes {
                    associated: true,
                    ..FileAttributes::default()
                },
            )
            .unwrap();
        let bytes = build(&mut image);
        let records = parse_records(&bytes[18 * S..19 * S]);
        assert_eq!(records.len(), 4);
        assert_eq!(records[2].1, records[3].1);
        // The associated record sorts first and carries the flag bit.
        let flags_offset = records[2].0 + 25;
        assert_eq!(bytes[18 * S + flags_offset] & 0x04, 0x04);
        // Two distinct extents hold the two payloads.
        assert_ne!(records[2].2, records[3].2);
    }
}
