use std::collections::VecDeque;
use std::io::{Seek, Write};

use crate::error::{BuildError, Result};
use crate::layout::Layout;
use crate::model::{NodeId, Volume};
use crate::writer::ImageWriter;

/// One path-table record: the root is always record 1 (its own parent)
/// with the single-byte identifier `0x00`; descendants follow in
/// breadth-first order, siblings sorted by identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTableRecord {
    pub identifier: Vec<u8>,
    pub extent_sector: u32,
    pub parent_number: u16,
}

impl PathTableRecord {
    /// On-disk size: 8 fixed bytes, the identifier, and a pad byte when
    /// the identifier length is odd.
    pub fn size(&self) -> usize {
        8 + self.identifier.len().next_multiple_of(2)
    }
}

/// Table endianness: type L stores multi-byte fields little-endian,
/// type M big-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    TypeL,
    TypeM,
}

/// Builds the record list for one volume. Directory extents must already
/// be allocated.
pub fn build_records(
    volume: &Volume,
    layout: &Layout,
    volume_index: usize,
) -> Result<Vec<PathTableRecord>> {
    let root = volume.root();
    let root_loc = layout.extent(volume_index, root)?;
    let mut records = vec![PathTableRecord {
        identifier: vec![0x00],
        extent_sector: root_loc.sector,
        parent_number: 1,
    }];
    let mut queue: VecDeque<(NodeId, u16)> = VecDeque::from([(root, 1)]);

    while let Some((dir, number)) = queue.pop_front() {
        for child in volume.sorted_children(dir)? {
            if !volume.node(child).is_directory() {
                continue;
            }
            let loc = layout.extent(volume_index, child)?;
            let child_number = u16::try_from(records.len() + 1)
                .map_err(|_| BuildError::SizeOverflow("path table directory number"))?;
            records.push(PathTableRecord {
                identifier: volume.node(child).mapped()?.identifier.clone(),
                extent_sector: loc.sector,
                parent_number: number,
            });
            queue.push_back((child, child_number));
        }
    }
    Ok(records)
}

/// Byte length of one table.
pub fn table_size(records: &[PathTableRecord]) -> Result<u32> {
    let total: usize = records.iter().map(PathTableRecord::size).sum();
    u32::try_from(total).map_err(|_| BuildError::SizeOverflow("path table size"))
}

/// Emits one table at the current position and returns its byte length.
pub fn write_table<W: Write + Seek>(
    w: &mut ImageWriter<W>,
    records: &[PathTableRecord],
    kind: TableKind,
) -> Result<u64> {
    let start = w.position()?;
    for record in records {
        let identifier_len = u8::try_from(record.identifier.len())
            .map_err(|_| BuildError::SizeOverflow("path table identifier length"))?;
        w.write_u8(identifier_len)?;
        w.write_u8(0)?;
        match kind {
            TableKind::TypeL => {
                w.write_u32_le(record.extent_sector)?;
                w.write_u16_le(record.parent_number)?;
            }
            TableKind::TypeM => {
                w.write_u32_be(record.extent_sector)?;
                w.write_u16_be(record.parent_number)?;
            }
        }
        w.write_bytes(&record.identifier)?;
        if !record.identifier.len().is_multiple_of(2) {
            w.write_u8(0)?;
        }
    }
    Ok(w.position()? - start)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FileAttributes, VolumeMetadata};
    use crate::names::{CompatibilityFlags, CompatibilityLevel, NameMapper};
    use std::io::Cursor;

    fn sample() -> (Volume, Layout) {
        let mut volume = Volume::new(VolumeMetadata::default());
        let root = volume.root();
        let b = volume.add_directory(root, "BETA", FileAttributes::default()).unwrap();
        volume.add_directory(root, "ALPHA", FileAttributes::default()).unwrap();
        volume.add_directory(b, "NESTED", FileAttributes::default()).unwrap();
        NameMapper::new(CompatibilityLevel::Level1, CompatibilityFlags::all())
            .map_volume(&mut volume)
            .unwrap();
        let mut w = ImageWriter::new(Cursor::new(Vec::new()));
        let mut layout = Layout::new(1);
        layout
            .allocate_directory_extents(&mut w, 0, &volume, volume.root())
            .unwrap();
        (volume, layout)
    }

    #[test]
    fn records_are_breadth_first_with_sorted_siblings() {
        let (volume, layout) = sample();
        let records = build_records(&volume, &layout, 0).unwrap();
        let names: Vec<&[u8]> = records.iter().map(|r| r.identifier.as_slice()).collect();
        let expected: Vec<&[u8]> = vec![b"\x00", b"ALPHA", b"BETA", b"NESTED"];
        assert_eq!(names, expected);
        assert_eq!(records[0].parent_number, 1);
        assert_eq!(records[1].parent_number, 1);
        assert_eq!(records[2].parent_number, 1);
        // NESTED hangs off BETA, record number 3.
        assert_eq!(records[3].parent_number, 3);
    }

    #[test]
    fn both_tables_have_identical_length() {
        let (volume, layout) = sample();
        let records = build_records(&volume, &layout, 0).unwrap();
        let mut w = ImageWriter::new(Cursor::new(Vec::new()));
        let l = write_table(&mut w, &records, TableKind::TypeL).unwrap();
        let m = write_table(&mut w, &records, TableKind::TypeM).unwrap();
        assert_eq!(l, m);
        assert_eq!(l, u64::from(table_size(&records).unwrap()));
    }

    #[test]
    fn record_fields_swap_endianness_between_tables() {
        let record = PathTableRecord {
            identifier: b"DIR".to_vec(),
            extent_sector: 0x0102_0304,
            parent_number: 0x0506,
        };
        let mut w = ImageWriter::new(Cursor::new(Vec::new()));
        write_table(&mut w, std::slice::from_ref(&record), TableKind::TypeL).unwrap();
        write_table(&mut w, std::slice::from_ref(&record), TableKind::TypeM).unwrap();
        let bytes = w.into_inner().into_inner();
        let size = record.size();
        assert_eq!(size, 12);
        let (l, m) = bytes.split_at(size);
        assert_eq!(l[0], 3);
        assert_eq!(&l[2..6], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(&l[6..8], &[0x06, 0x05]);
        assert_eq!(&m[2..6], &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(&m[6..8], &[0x05, 0x06]);
        // Odd identifier padded to even length.
        assert_eq!(l[8..11], *b"DIR");
        assert_eq!(l[11], 0);
    }

    #[test]
    fn root_record_is_ten_bytes() {
        let record = PathTableRecord {
            identifier: vec![0x00],
            extent_sector: 18,
            parent_number: 1,
        };
        assert_eq!(record.size(), 10);
    }
}
