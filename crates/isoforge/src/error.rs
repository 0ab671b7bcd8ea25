use thiserror::Error;

/// Errors raised while canonicalising names, laying out the image, or
/// emitting structures. Every error aborts the build; the partially
/// written output is left behind for inspection but is not a valid image.
#[derive(Debug, Error)]
pub enum BuildError {
    /// A host name (or volume metadata field) cannot be expressed as an
    /// ISO-9660 identifier under the configured level and flags.
    #[error("invalid name {name:?}: {reason}")]
    InvalidArgument { name: String, reason: &'static str },

    /// A mapped name collides with a sibling and no tilde or hash alias
    /// is available (or conflict resolution is disabled).
    #[error("no unique identifier available for {name:?}")]
    ConflictUnresolvable { name: String },

    /// Directory nesting deeper than eight levels with `LIMIT_DIRECTORIES`.
    #[error("directory {name:?} exceeds the maximum nesting depth of 8")]
    DepthExceeded { name: String },

    /// A mode or extension this builder does not implement.
    #[error("unsupported: {0}")]
    Unsupported(&'static str),

    /// The image model violates a structural requirement.
    #[error("inconsistent image model: {reason} ({name:?})")]
    ModelInconsistent { name: String, reason: &'static str },

    /// An allocation or emission was attempted out of order, twice, or
    /// away from a sector boundary.
    #[error("builder state error: {0}")]
    BuilderState(&'static str),

    /// The underlying output stream failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A file's source grew past its pre-measured length while its
    /// contents were being copied into the image.
    #[error("contents of {name:?} grew past the declared {declared} bytes")]
    ContentRace { name: String, declared: u32 },

    /// A sector count, LBA, or record field does not fit its on-disk width.
    #[error("value does not fit on-disk field: {0}")]
    SizeOverflow(&'static str),
}

/// Maximum directory nesting depth enforced by `LIMIT_DIRECTORIES`.
pub const MAX_DIRECTORY_DEPTH: usize = 8;

pub type Result<T> = core::result::Result<T, BuildError>;
