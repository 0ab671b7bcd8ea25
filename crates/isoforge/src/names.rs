use std::collections::{HashMap, HashSet};

use bitflags::bitflags;

use crate::error::{BuildError, MAX_DIRECTORY_DEPTH, Result};
use crate::model::{MappedName, NodeId, Volume};
use crate::types::{Charset, CharsetD};

/// ISO-9660 interchange level. Level 1 enforces 8.3 d-character names;
/// levels 2 and 3 allow any ASCII up to 30 bytes (31 for directories).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompatibilityLevel {
    Level1,
    Level2,
    Level3,
}

bitflags! {
    /// Relaxations applied while canonicalising host names.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CompatibilityFlags: u8 {
        /// Cap directory nesting at eight levels.
        const LIMIT_DIRECTORIES = 1 << 0;
        /// Truncate over-long name portions instead of failing.
        const TRUNCATE_FILE_NAMES = 1 << 1;
        /// Fold lower-case letters at level 1 instead of dropping them.
        const UPPER_CASE_FILE_NAMES = 1 << 2;
        /// Disambiguate collisions with `~N` aliases.
        const RESOLVE_NAME_CONFLICTS = 1 << 3;
        /// Drop surplus `.` characters instead of failing.
        const STRIP_ILLEGAL_DOTS = 1 << 4;
    }
}

/// Longest full path, in bytes of mapped identifiers joined by one
/// separator each.
const MAX_PATH_LENGTH: usize = 255;

/// Level 2/3 caps: name+extension for files, identifier for directories.
const MAX_FILE_NAME_LENGTH: usize = 30;
const MAX_DIRECTORY_NAME_LENGTH: usize = 31;

const MAX_VERSION: u32 = 32767;

/// Derives on-disk identifiers for every entry of a volume, resolving
/// collisions and enforcing depth and path-length limits. Runs once per
/// volume before any allocation; the only model mutation of the build.
#[derive(Debug, Clone, Copy)]
pub struct NameMapper {
    level: CompatibilityLevel,
    flags: CompatibilityFlags,
}

impl NameMapper {
    pub fn new(level: CompatibilityLevel, flags: CompatibilityFlags) -> Self {
        Self { level, flags }
    }

    pub fn map_volume(&self, volume: &mut Volume) -> Result<()> {
        log::debug!(
            "canonicalising {:?} names; directory records and path tables \
             will be emitted in ISO 9660 9.3 sorted order",
            self.level
        );
        self.map_directory(volume, volume.root(), 1, 0)
    }

    fn map_directory(
        &self,
        volume: &mut Volume,
        dir: NodeId,
        depth: usize,
        parent_path_len: usize,
    ) -> Result<()> {
        let children = volume.children(dir).to_vec();
        let has_subdirectories = children.iter().any(|&c| volume.node(c).is_directory());
        if has_subdirectories
            && depth == MAX_DIRECTORY_DEPTH
            && self.flags.contains(CompatibilityFlags::LIMIT_DIRECTORIES)
        {
            return Err(BuildError::DepthExceeded {
                name: volume.node(dir).name.clone(),
            });
        }

        let mut taken: HashSet<String> = HashSet::new();
        let mut by_host: HashMap<String, MappedName> = HashMap::new();

        for &child in &children {
            let node = volume.node(child);
            if node.attributes.associated {
                continue;
            }
            let mapped = self.map_name(&node.name, node.is_directory(), &taken)?;
            if parent_path_len + mapped.name.len() > MAX_PATH_LENGTH {
                return Err(BuildError::InvalidArgument {
                    name: node.name.clone(),
                    reason: "full path exceeds 255 bytes",
                });
            }
            taken.insert(mapped.name.clone());
            by_host.insert(node.name.clone(), mapped.clone());
            volume.node_mut(child).mapped = Some(mapped);
        }

        // Associated records share the identifier of the non-associated
        // sibling carrying the same host name.
        for &child in &children {
            let node = volume.node(child);
            if !node.attributes.associated {
                continue;
            }
            if node.is_directory() {
                return Err(BuildError::ModelInconsistent {
                    name: node.name.clone(),
                    reason: "a directory cannot be an associated file",
                });
            }
            let mapped = by_host.get(&node.name).cloned().ok_or_else(|| {
                BuildError::ModelInconsistent {
                    name: node.name.clone(),
                    reason: "associated file has no non-associated sibling of the same name",
                }
            })?;
            volume.node_mut(child).mapped = Some(mapped);
        }

        for &child in &children {
            if volume.node(child).is_directory() {
                let identifier_len = volume.node(child).mapped()?.identifier.len();
                self.map_directory(volume, child, depth + 1, parent_path_len + identifier_len + 1)?;
            }
        }
        Ok(())
    }

    /// The per-name procedure: uppercase, filter, apply separator rules,
    /// cap lengths, then find an identifier no sibling already uses.
    fn map_name(&self, host: &str, is_directory: bool, taken: &HashSet<String>) -> Result<MappedName> {
        let fold_case = self.level == CompatibilityLevel::Level1
            && self.flags.contains(CompatibilityFlags::UPPER_CASE_FILE_NAMES);
        let source = if fold_case {
            host.to_ascii_uppercase()
        } else {
            host.to_string()
        };
        let strip_dots = self.flags.contains(CompatibilityFlags::STRIP_ILLEGAL_DOTS);

        let mut name = String::new();
        let mut extension = String::new();
        let mut version_digits = String::new();
        let mut seen_dot = false;
        let mut seen_semicolon = false;

        for ch in source.chars() {
            match ch {
                '.' if !seen_semicolon => {
                    if is_directory {
                        if !strip_dots {
                            return Err(BuildError::InvalidArgument {
                                name: host.to_string(),
                                reason: "directory name contains a dot",
                            });
                        }
                    } else if seen_dot {
                        if !strip_dots {
                            return Err(BuildError::InvalidArgument {
                                name: host.to_string(),
                                reason: "more than one dot in file name",
                            });
                        }
                        // Keep only the last dot as the separator: what was
                        // collected as the extension rejoins the name.
                        name.push_str(&extension);
                        extension.clear();
                    } else {
                        seen_dot = true;
                    }
                }
                ';' => {
                    if !seen_dot {
                        return Err(BuildError::InvalidArgument {
                            name: host.to_string(),
                            reason: "version separator without a preceding dot",
                        });
                    }
                    if seen_semicolon {
                        return Err(BuildError::InvalidArgument {
                            name: host.to_string(),
                            reason: "more than one version separator",
                        });
                    }
                    seen_semicolon = true;
                }
                _ if seen_semicolon => version_digits.push(ch),
                _ => {
                    let accepted = match self.level {
                        CompatibilityLevel::Level1 => {
                            ch.is_ascii() && CharsetD::contains(ch as u8)
                        }
                        CompatibilityLevel::Level2 | CompatibilityLevel::Level3 => ch.is_ascii(),
                    };
                    if accepted {
                        if seen_dot {
                            extension.push(ch);
                        } else {
                            name.push(ch);
                        }
                    }
                }
            }
        }

        let version = if seen_semicolon {
            let value: u32 = version_digits.parse().map_err(|_| BuildError::InvalidArgument {
                name: host.to_string(),
                reason: "version suffix is not an integer",
            })?;
            if !(1..=MAX_VERSION).contains(&value) {
                return Err(BuildError::InvalidArgument {
                    name: host.to_string(),
                    reason: "version suffix out of range 1..=32767",
                });
            }
            value
        } else {
            1
        };

        if name.is_empty() && extension.is_empty() {
            return Err(BuildError::InvalidArgument {
                name: host.to_string(),
                reason: "no allowed characters remain after filtering",
            });
        }

        self.cap_lengths(host, is_directory, &mut name, &mut extension)?;

        // The name portion capacity, which tilde aliases must also fit.
        let max_base = match (is_directory, self.level) {
            (_, CompatibilityLevel::Level1) => 8,
            (true, _) => MAX_DIRECTORY_NAME_LENGTH,
            (false, _) => MAX_FILE_NAME_LENGTH - extension.len(),
        };

        let suffix = if is_directory {
            String::new()
        } else {
            format!(".{extension};{version}")
        };
        let acceptable = |base: &str| !taken.contains(&format!("{base}{suffix}"));

        let base = if acceptable(&name) {
            name
        } else if !self.flags.contains(CompatibilityFlags::RESOLVE_NAME_CONFLICTS) {
            return Err(BuildError::ConflictUnresolvable {
                name: host.to_string(),
            });
        } else {
            self.resolve_conflict(host, &name, max_base, &acceptable)?
        };

        let mapped = format!("{base}{suffix}");
        Ok(MappedName {
            identifier: mapped.clone().into_bytes(),
            name: mapped,
        })
    }

    fn cap_lengths(
        &self,
        host: &str,
        is_directory: bool,
        name: &mut String,
        extension: &mut String,
    ) -> Result<()> {
        let truncate = self.flags.contains(CompatibilityFlags::TRUNCATE_FILE_NAMES);
        let too_long = |reason| BuildError::InvalidArgument {
            name: host.to_string(),
            reason,
        };

        if self.level == CompatibilityLevel::Level1 {
            if name.len() > 8 {
                if !truncate {
                    return Err(too_long("name portion exceeds 8 characters at level 1"));
                }
                name.truncate(8);
            }
            if extension.len() > 3 {
                if !truncate {
                    return Err(too_long("extension exceeds 3 characters at level 1"));
                }
                extension.truncate(3);
            }
        }

        if is_directory {
            if name.len() > MAX_DIRECTORY_NAME_LENGTH {
                if !truncate {
                    return Err(too_long("directory identifier exceeds 31 bytes"));
                }
                name.truncate(MAX_DIRECTORY_NAME_LENGTH);
            }
        } else if name.len() + extension.len() > MAX_FILE_NAME_LENGTH {
            if !truncate {
                return Err(too_long("file name and extension exceed 30 bytes"));
            }
            // The extension survives whole whenever it fits.
            if extension.len() < MAX_FILE_NAME_LENGTH {
                name.truncate(MAX_FILE_NAME_LENGTH - extension.len());
            } else {
                extension.truncate(MAX_FILE_NAME_LENGTH);
                name.truncate(0);
            }
        }
        Ok(())
    }

    /// Tilde aliases `BASE~1`..`BASE~4`, then the hash fallback
    /// `BASEhhhh~1`..`~9` built from a digest of the original name.
    fn resolve_conflict(
        &self,
        host: &str,
        name: &str,
        max_base: usize,
        acceptable: &dyn Fn(&str) -> bool,
    ) -> Result<String> {
        let stem = &name[..name.len().min(max_base.saturating_sub(2))];
        for n in 1..=4 {
            let candidate = format!("{stem}~{n}");
            if acceptable(&candidate) {
                log::trace!("mapped colliding name {host:?} to alias {candidate:?}");
                return Ok(candidate);
            }
        }

        let digest = format!("{:04X}", hash16(host));
        let keep = name.len().min(max_base.saturating_sub(6));
        let hashed = format!("{}{digest}", &name[..keep]);
        for n in 1..=9 {
            let candidate = format!("{hashed}~{n}");
            if acceptable(&candidate) {
                log::trace!("mapped colliding name {host:?} to hashed alias {candidate:?}");
                return Ok(candidate);
            }
        }

        Err(BuildError::ConflictUnresolvable {
            name: host.to_string(),
        })
    }
}

/// 16-bit digest of a host name (FNV-1a folded); two colliding names get
/// distinct digests with overwhelming probability.
fn hash16(name: &str) -> u16 {
    let mut hash: u32 = 0x811c_9dc5;
    for byte in name.bytes() {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    (hash ^ (hash >> 16)) as u16
}
