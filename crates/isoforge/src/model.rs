use std::path::PathBuf;

use chrono::{DateTime, FixedOffset};

use crate::error::{BuildError, Result};

/// The complete description of one disk image: a mandatory primary
/// volume, optional supplementary volumes, and an optional El Torito boot
/// catalog. The model is read-only during emission; only the mapped-name
/// fields are filled in by the builder.
#[derive(Debug)]
pub struct DiskImage {
    pub primary: Volume,
    pub supplementary: Vec<Volume>,
    pub boot_catalog: Option<BootCatalog>,
}

impl DiskImage {
    pub fn new(primary: Volume) -> Self {
        Self {
            primary,
            supplementary: Vec::new(),
            boot_catalog: None,
        }
    }
}

/// Volume-level metadata recorded in the volume descriptor.
#[derive(Debug, Clone)]
pub struct VolumeMetadata {
    pub system_identifier: String,
    pub volume_identifier: String,
    pub volume_set_identifier: String,
    pub publisher_identifier: String,
    pub data_preparer_identifier: String,
    pub application_identifier: String,
    pub copyright_file_identifier: String,
    pub abstract_file_identifier: String,
    pub bibliographic_file_identifier: String,
    pub creation_date: Option<DateTime<FixedOffset>>,
    pub modification_date: Option<DateTime<FixedOffset>>,
    pub expiration_date: Option<DateTime<FixedOffset>>,
    pub effective_date: Option<DateTime<FixedOffset>>,
    pub volume_set_size: u16,
    pub volume_sequence_number: u16,
    pub logical_block_size: u16,
}

impl Default for VolumeMetadata {
    fn default() -> Self {
        Self {
            system_identifier: String::new(),
            volume_identifier: "ISOIMAGE".to_string(),
            volume_set_identifier: String::new(),
            publisher_identifier: String::new(),
            data_preparer_identifier: String::new(),
            application_identifier: "ISOFORGE".to_string(),
            copyright_file_identifier: String::new(),
            abstract_file_identifier: String::new(),
            bibliographic_file_identifier: String::new(),
            creation_date: None,
            modification_date: None,
            expiration_date: None,
            effective_date: None,
            volume_set_size: 1,
            volume_sequence_number: 1,
            logical_block_size: 2048,
        }
    }
}

/// Identity of one entry within a volume's tree. Extent locations are
/// kept in side tables keyed by this id, never on the nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Attributes carried into the directory record's file flags.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileAttributes {
    /// Clears the ISO "existence" meaning: a set bit marks the entry hidden.
    pub hidden: bool,
    /// Parallel record sharing its name with a non-associated sibling.
    pub associated: bool,
    pub record: bool,
    pub protection: bool,
    pub multi_extent: bool,
}

/// Where a file's bytes come from at emission time.
#[derive(Debug, Clone)]
pub enum FileContent {
    Bytes(Vec<u8>),
    HostFile(PathBuf),
}

impl FileContent {
    /// The number of bytes the content will yield, measured up front. The
    /// build fails if a host file has grown past this by emission time.
    pub fn measure(&self) -> Result<u32> {
        let len = match self {
            Self::Bytes(bytes) => bytes.len() as u64,
            Self::HostFile(path) => std::fs::metadata(path)?.len(),
        };
        u32::try_from(len).map_err(|_| BuildError::SizeOverflow("file data length"))
    }
}

/// The canonicalised on-disk name: text form and the identical-length
/// ASCII byte form written into directory records.
#[derive(Debug, Clone)]
pub struct MappedName {
    pub name: String,
    pub identifier: Vec<u8>,
}

#[derive(Debug)]
pub(crate) enum NodeKind {
    Directory { children: Vec<NodeId> },
    File { content: FileContent, data_length: u32 },
}

#[derive(Debug)]
pub(crate) struct Node {
    pub(crate) name: String,
    pub(crate) attributes: FileAttributes,
    pub(crate) mapped: Option<MappedName>,
    pub(crate) kind: NodeKind,
}

impl Node {
    pub(crate) fn is_directory(&self) -> bool {
        matches!(self.kind, NodeKind::Directory { .. })
    }

    pub(crate) fn mapped(&self) -> Result<&MappedName> {
        self.mapped
            .as_ref()
            .ok_or(BuildError::BuilderState("name has not been canonicalised"))
    }
}

/// One volume: metadata plus an arena of directory/file nodes rooted at
/// an unnamed root directory.
#[derive(Debug)]
pub struct Volume {
    pub metadata: VolumeMetadata,
    nodes: Vec<Node>,
}

impl Volume {
    pub fn new(metadata: VolumeMetadata) -> Self {
        let root = Node {
            name: String::new(),
            attributes: FileAttributes::default(),
            mapped: Some(MappedName {
                name: String::new(),
                identifier: Vec::new(),
            }),
            kind: NodeKind::Directory {
                children: Vec::new(),
            },
        };
        Self {
            metadata,
            nodes: vec![root],
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// Adds a directory under `parent` and returns its id.
    pub fn add_directory(
        &mut self,
        parent: NodeId,
        name: &str,
        attributes: FileAttributes,
    ) -> Result<NodeId> {
        self.insert(
            parent,
            Node {
                name: name.to_string(),
                attributes,
                mapped: None,
                kind: NodeKind::Directory {
                    children: Vec::new(),
                },
            },
        )
    }

    /// Adds a file under `parent`, measuring its data length up front.
    pub fn add_file(
        &mut self,
        parent: NodeId,
        name: &str,
        content: FileContent,
        attributes: FileAttributes,
    ) -> Result<NodeId> {
        let data_length = content.measure()?;
        self.insert(
            parent,
            Node {
                name: name.to_string(),
                attributes,
                mapped: None,
                kind: NodeKind::File {
                    content,
                    data_length,
                },
            },
        )
    }

    fn insert(&mut self, parent: NodeId, node: Node) -> Result<NodeId> {
        if !self.nodes[parent.index()].is_directory() {
            return Err(BuildError::ModelInconsistent {
                name: node.name,
                reason: "parent is not a directory",
            });
        }
        let id = NodeId(
            u32::try_from(self.nodes.len())
                .map_err(|_| BuildError::SizeOverflow("node count"))?,
        );
        self.nodes.push(node);
        if let NodeKind::Directory { children } = &mut self.nodes[parent.index()].kind {
            children.push(id);
        }
        Ok(id)
    }

    pub(crate) fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    pub(crate) fn children(&self, id: NodeId) -> &[NodeId] {
        match &self.nodes[id.index()].kind {
            NodeKind::Directory { children } => children,
            NodeKind::File { .. } => &[],
        }
    }

    /// Children in emission order: byte-wise by mapped identifier, with an
    /// associated record sorting immediately before the sibling it shadows.
    /// Only meaningful after canonicalisation.
    pub(crate) fn sorted_children(&self, id: NodeId) -> Result<Vec<NodeId>> {
        let mut children = self.children(id).to_vec();
        for &child in &children {
            self.node(child).mapped()?;
        }
        children.sort_by(|&a, &b| {
            let na = self.node(a);
            let nb = self.node(b);
            let ids = (na.mapped.as_ref().unwrap().identifier.as_slice())
                .cmp(nb.mapped.as_ref().unwrap().identifier.as_slice());
            ids.then_with(|| nb.attributes.associated.cmp(&na.attributes.associated))
        });
        Ok(children)
    }

    /// The canonicalised name of an entry, once the builder has run.
    pub fn mapped_name(&self, id: NodeId) -> Option<&str> {
        self.nodes[id.index()]
            .mapped
            .as_ref()
            .map(|m| m.name.as_str())
    }
}

/// El Torito platform id of a validation entry or section header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PlatformId {
    X86 = 0x00,
    PowerPC = 0x01,
    Mac = 0x02,
}

/// El Torito boot media emulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BootMediaType {
    /// The image is loaded as-is, no device emulation.
    NoEmulation = 0x00,
    Floppy1_2M = 0x01,
    Floppy1_44M = 0x02,
    Floppy2_88M = 0x03,
    HardDisk = 0x04,
}

/// The boot catalog: a mandatory initial entry plus optional sections of
/// further bootable images.
#[derive(Debug)]
pub struct BootCatalog {
    pub platform_id: PlatformId,
    /// Manufacturer/developer identification, up to 24 bytes.
    pub id_string: String,
    pub initial_entry: BootEntry,
    pub sections: Vec<BootSection>,
}

impl BootCatalog {
    pub fn new(platform_id: PlatformId, id_string: &str, initial_entry: BootEntry) -> Self {
        Self {
            platform_id,
            id_string: id_string.to_string(),
            initial_entry,
            sections: Vec::new(),
        }
    }
}

/// A section of the boot catalog, introduced by a section header entry.
#[derive(Debug)]
pub struct BootSection {
    pub platform_id: PlatformId,
    /// Section identification, up to 28 bytes.
    pub id_string: String,
    pub entries: Vec<BootEntry>,
}

/// Vendor-unique selection criteria of a section entry.
#[derive(Debug, Clone, Copy)]
pub struct SelectionCriteria {
    pub criteria_type: u8,
    pub vendor_unique: [u8; 19],
}

/// One bootable image in the catalog.
#[derive(Debug)]
pub struct BootEntry {
    pub bootable: bool,
    pub media_type: BootMediaType,
    /// Load segment for x86; 0 is interpreted by firmware as 0x07C0.
    pub load_segment: u16,
    pub system_type: u8,
    /// Number of virtual/emulated sectors loaded at boot.
    pub sector_count: u16,
    pub data: FileContent,
    pub selection_criteria: Option<SelectionCriteria>,
    /// Patch a boot info table into the image data at offset 8, as
    /// GRUB/LIMINE/SYSLINUX-style loaders expect.
    pub boot_info_table: bool,
}

impl BootEntry {
    /// A bootable no-emulation entry with the conventional defaults.
    pub fn no_emulation(data: FileContent, sector_count: u16) -> Self {
        Self {
            bootable: true,
            media_type: BootMediaType::NoEmulation,
            load_segment: 0,
            system_type: 0,
            sector_count,
            data,
            selection_criteria: None,
            boot_info_table: false,
        }
    }
}
