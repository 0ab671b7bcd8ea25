use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use clap::Parser;
use isoforge::{
    BootCatalog, BootEntry, BuildOptions, CompatibilityFlags, CompatibilityLevel, DiskImage,
    FileAttributes, FileContent, ImageBuilder, NodeId, PlatformId, Volume, VolumeMetadata,
};

#[derive(Parser)]
#[command(name = "isoforge", about = "Build a bootable ISO-9660 image from a directory tree.")]
struct Args {
    /// Directory whose contents become the primary volume.
    input: PathBuf,

    /// Path of the image to write.
    #[arg(short, long, default_value = "image.iso")]
    output: PathBuf,

    /// Volume identifier (d-characters, up to 32).
    #[arg(long, default_value = "ISOIMAGE")]
    volume_id: String,

    /// ISO-9660 interchange level (1, 2 or 3).
    #[arg(long, default_value_t = 1)]
    level: u8,

    /// Host path of a no-emulation El Torito boot image.
    #[arg(long)]
    boot_image: Option<PathBuf>,

    /// Virtual sector count loaded from the boot image at boot.
    #[arg(long, default_value_t = 4)]
    boot_load_size: u16,

    /// Patch a boot info table into the boot image.
    #[arg(long)]
    boot_info_table: bool,

    /// Fail on name collisions instead of generating ~N aliases.
    #[arg(long)]
    strict_names: bool,

    /// Increase verbosity (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() {
    let args = Args::parse();
    let level = match args.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    simple_logger::SimpleLogger::new().with_level(level).init().unwrap();

    if let Err(err) = run(&args) {
        log::error!("{err}");
        // A failed build leaves a partial image behind; nobody should
        // mistake it for a valid one.
        let _ = std::fs::remove_file(&args.output);
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let level = match args.level {
        1 => CompatibilityLevel::Level1,
        2 => CompatibilityLevel::Level2,
        3 => CompatibilityLevel::Level3,
        other => return Err(format!("unsupported interchange level {other}").into()),
    };
    let mut flags = CompatibilityFlags::LIMIT_DIRECTORIES
        | CompatibilityFlags::TRUNCATE_FILE_NAMES
        | CompatibilityFlags::UPPER_CASE_FILE_NAMES
        | CompatibilityFlags::STRIP_ILLEGAL_DOTS;
    if !args.strict_names {
        flags |= CompatibilityFlags::RESOLVE_NAME_CONFLICTS;
    }

    let mut volume = Volume::new(VolumeMetadata {
        volume_identifier: args.volume_id.to_ascii_uppercase(),
        ..VolumeMetadata::default()
    });
    let root = volume.root();
    scan_directory(&mut volume, root, &args.input)?;

    let mut image = DiskImage::new(volume);
    if let Some(path) = &args.boot_image {
        let mut entry =
            BootEntry::no_emulation(FileContent::HostFile(path.clone()), args.boot_load_size);
        entry.boot_info_table = args.boot_info_table;
        image.boot_catalog = Some(BootCatalog::new(PlatformId::X86, "ISOFORGE", entry));
    }

    let builder = ImageBuilder::new(BuildOptions {
        level,
        flags,
        ..BuildOptions::default()
    })?;
    let mut output = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(&args.output)?;
    builder.build(&mut image, &mut output)?;
    log::info!("wrote {}", args.output.display());
    Ok(())
}

/// Scans a host directory into the volume tree. Entries are visited in
/// name order so the resulting image is deterministic.
fn scan_directory(
    volume: &mut Volume,
    parent: NodeId,
    path: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut entries: Vec<_> = std::fs::read_dir(path)?.collect::<Result<_, _>>()?;
    entries.sort_by_key(|entry| entry.file_name());
    for entry in entries {
        let name = entry.file_name().to_string_lossy().into_owned();
        if entry.file_type()?.is_dir() {
            let dir = volume.add_directory(parent, &name, FileAttributes::default())?;
            scan_directory(volume, dir, &entry.path())?;
        } else {
            volume.add_file(
                parent,
                &name,
                FileContent::HostFile(entry.path()),
                FileAttributes::default(),
            )?;
        }
    }
    Ok(())
}
