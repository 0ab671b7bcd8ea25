use std::collections::HashMap;
use std::io::{Seek, Write};

use crate::directory;
use crate::error::{BuildError, Result};
use crate::model::{NodeId, Volume};
use crate::writer::{ImageWriter, SECTOR_SIZE};

/// A reserved run of sectors for one directory or file extent.
#[derive(Debug, Clone, Copy)]
pub struct ExtentLoc {
    /// First sector; 0 when no sector is reserved (empty file).
    pub sector: u32,
    pub sector_count: u32,
    /// Bytes recorded in the directory record: the exact length for
    /// files, whole sectors for directories.
    pub data_length: u32,
    pub written: bool,
}

/// Per-volume allocation results consumed by the descriptor emitter.
#[derive(Debug, Default, Clone, Copy)]
pub struct VolumeLoc {
    pub descriptor_sector: Option<u32>,
    pub type_l_sector: Option<u32>,
    pub type_m_sector: Option<u32>,
    /// Byte length of one path table, before sector rounding.
    pub path_table_bytes: u32,
    pub logical_block_count: u32,
    pub descriptor_written: bool,
}

/// Side tables of every allocated position, keyed by entity identity.
/// The image is laid out by appending whole sectors; every allocation
/// demands the cursor sit on a sector boundary.
#[derive(Debug)]
pub struct Layout {
    volumes: Vec<VolumeLoc>,
    extents: Vec<HashMap<NodeId, ExtentLoc>>,
    pub boot_record_sector: Option<u32>,
    pub boot_catalog_sector: Option<u32>,
}

fn sectors_for(bytes: u64) -> Result<u32> {
    u32::try_from(bytes.div_ceil(SECTOR_SIZE))
        .map_err(|_| BuildError::SizeOverflow("extent sector count"))
}

impl Layout {
    pub fn new(volume_count: usize) -> Self {
        Self {
            volumes: vec![VolumeLoc::default(); volume_count],
            extents: (0..volume_count).map(|_| HashMap::new()).collect(),
            boot_record_sector: None,
            boot_catalog_sector: None,
        }
    }

    fn at_sector_start<W: Write + Seek>(w: &mut ImageWriter<W>) -> Result<u32> {
        if !w.at_sector_start()? {
            return Err(BuildError::BuilderState(
                "allocation attempted away from a sector boundary",
            ));
        }
        w.current_sector()
    }

    pub fn volume(&self, index: usize) -> &VolumeLoc {
        &self.volumes[index]
    }

    pub fn volume_mut(&mut self, index: usize) -> &mut VolumeLoc {
        &mut self.volumes[index]
    }

    /// Reserves one sector for a volume descriptor.
    pub fn allocate_volume_descriptor<W: Write + Seek>(
        &mut self,
        w: &mut ImageWriter<W>,
        index: usize,
    ) -> Result<u32> {
        let sector = Self::at_sector_start(w)?;
        let loc = &mut self.volumes[index];
        if loc.descriptor_sector.is_some() {
            return Err(BuildError::BuilderState("volume descriptor allocated twice"));
        }
        loc.descriptor_sector = Some(sector);
        w.seek_to_sector(sector + 1)?;
        Ok(sector)
    }

    /// Reserves one sector for the El Torito boot record.
    pub fn allocate_boot_record<W: Write + Seek>(&mut self, w: &mut ImageWriter<W>) -> Result<u32> {
        let sector = Self::at_sector_start(w)?;
        if self.boot_record_sector.is_some() {
            return Err(BuildError::BuilderState("boot record allocated twice"));
        }
        self.boot_record_sector = Some(sector);
        w.seek_to_sector(sector + 1)?;
        Ok(sector)
    }

    /// Reserves one sector for the boot catalog.
    pub fn allocate_boot_catalog<W: Write + Seek>(&mut self, w: &mut ImageWriter<W>) -> Result<u32> {
        let sector = Self::at_sector_start(w)?;
        if self.boot_catalog_sector.is_some() {
            return Err(BuildError::BuilderState("boot catalog allocated twice"));
        }
        self.boot_catalog_sector = Some(sector);
        w.seek_to_sector(sector + 1)?;
        Ok(sector)
    }

    /// Reserves the extents of `dir` and, depth-first, of every descendant
    /// directory. A directory extent spans at least one sector.
    pub fn allocate_directory_extents<W: Write + Seek>(
        &mut self,
        w: &mut ImageWriter<W>,
        volume_index: usize,
        volume: &Volume,
        dir: NodeId,
    ) -> Result<()> {
        let sector = Self::at_sector_start(w)?;
        let children = volume.sorted_children(dir)?;
        let bytes = directory::measure_extent(
            children
                .iter()
                .map(|&c| volume.node(c).mapped.as_ref().unwrap().identifier.len()),
        )?;
        let sector_count = sectors_for(u64::from(bytes))?.max(1);
        let data_length = sector_count
            .checked_mul(SECTOR_SIZE as u32)
            .ok_or(BuildError::SizeOverflow("directory extent size"))?;
        self.record_extent(
            volume_index,
            dir,
            ExtentLoc {
                sector,
                sector_count,
                data_length,
                written: false,
            },
        )?;
        let next = sector
            .checked_add(sector_count)
            .ok_or(BuildError::SizeOverflow("image sector count"))?;
        w.seek_to_sector(next)?;

        for child in children {
            if volume.node(child).is_directory() {
                self.allocate_directory_extents(w, volume_index, volume, child)?;
            }
        }
        Ok(())
    }

    /// Reserves extents for every file in the subtree, child directories
    /// before each directory's own files. Empty files reserve nothing and
    /// record extent sector 0.
    pub fn allocate_file_extents<W: Write + Seek>(
        &mut self,
        w: &mut ImageWriter<W>,
        volume_index: usize,
        volume: &Volume,
        dir: NodeId,
    ) -> Result<()> {
        let children = volume.sorted_children(dir)?;
        for &child in &children {
            if volume.node(child).is_directory() {
                self.allocate_file_extents(w, volume_index, volume, child)?;
            }
        }
        for &child in &children {
            let node = volume.node(child);
            let crate::model::NodeKind::File { data_length, .. } = &node.kind else {
                continue;
            };
            let data_length = *data_length;
            let sector_count = sectors_for(u64::from(data_length))?;
            let loc = if sector_count == 0 {
                ExtentLoc {
                    sector: 0,
                    sector_count: 0,
                    data_length,
                    written: true,
                }
            } else {
                let sector = Self::at_sector_start(w)?;
                let next = sector
                    .checked_add(sector_count)
                    .ok_or(BuildError::SizeOverflow("image sector count"))?;
                w.seek_to_sector(next)?;
                ExtentLoc {
                    sector,
                    sector_count,
                    data_length,
                    written: false,
                }
            };
            self.record_extent(volume_index, child, loc)?;
        }
        Ok(())
    }

    /// Reserves the sector-aligned area holding the type-L table
    /// immediately followed by the type-M table.
    pub fn allocate_path_tables<W: Write + Seek>(
        &mut self,
        w: &mut ImageWriter<W>,
        volume_index: usize,
        table_bytes: u32,
    ) -> Result<()> {
        let l_sector = Self::at_sector_start(w)?;
        let loc = &mut self.volumes[volume_index];
        if loc.type_l_sector.is_some() {
            return Err(BuildError::BuilderState("path tables allocated twice"));
        }
        let l_start = u64::from(l_sector) * SECTOR_SIZE;
        let m_start = l_start + u64::from(table_bytes);
        let m_sector = u32::try_from(m_start / SECTOR_SIZE)
            .map_err(|_| BuildError::SizeOverflow("path table sector"))?;
        loc.type_l_sector = Some(l_sector);
        loc.type_m_sector = Some(m_sector);
        loc.path_table_bytes = table_bytes;
        w.seek_to(m_start + u64::from(table_bytes))?;
        w.seek_to_next_sector()?;
        Ok(())
    }

    fn record_extent(&mut self, volume_index: usize, id: NodeId, loc: ExtentLoc) -> Result<()> {
        if self.extents[volume_index].insert(id, loc).is_some() {
            return Err(BuildError::BuilderState("extent allocated twice"));
        }
        Ok(())
    }

    /// The reserved extent of a directory or file.
    pub fn extent(&self, volume_index: usize, id: NodeId) -> Result<ExtentLoc> {
        self.extents[volume_index]
            .get(&id)
            .copied()
            .ok_or(BuildError::BuilderState("extent referenced before allocation"))
    }

    pub fn mark_extent_written(&mut self, volume_index: usize, id: NodeId) -> Result<()> {
        let loc = self.extents[volume_index]
            .get_mut(&id)
            .ok_or(BuildError::BuilderState("extent referenced before allocation"))?;
        if loc.written {
            return Err(BuildError::BuilderState("extent written twice"));
        }
        loc.written = true;
        Ok(())
    }
}
