//! Linking of a single file from an extracted package into a prefix,
//! including placeholder rewriting.

use std::{
    borrow::Cow,
    fmt::{self, Formatter},
    io::{ErrorKind, Read, Seek, Write},
    path::{Path, PathBuf},
};

use memmap2::Mmap;

use krait_conda_types::{
    package::{FileMode, PathType, PathsEntry, PrefixPlaceholder},
    NoArchType, Platform,
};
use krait_digest::{HashingWriter, Sha256, Sha256Hash};

use super::python::PythonInfo;

/// How a file was materialized in the prefix.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum LinkMethod {
    /// A hard link into the package cache.
    Hardlink,

    /// A symbolic link, copied verbatim from the package.
    Softlink,

    /// A plain copy.
    Copy,

    /// A copy whose prefix placeholder was rewritten.
    Patched(FileMode),
}

impl fmt::Display for LinkMethod {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            LinkMethod::Hardlink => write!(f, "hardlink"),
            LinkMethod::Softlink => write!(f, "softlink"),
            LinkMethod::Copy => write!(f, "copy"),
            LinkMethod::Patched(FileMode::Binary) => write!(f, "binary patched"),
            LinkMethod::Patched(FileMode::Text) => write!(f, "text patched"),
        }
    }
}

/// Errors of [`link_file`].
#[derive(Debug, thiserror::Error)]
pub enum LinkFileError {
    /// An io error occurred.
    #[error(transparent)]
    IoError(#[from] std::io::Error),

    /// The parent directory could not be created.
    #[error("failed to create parent directory")]
    FailedToCreateParentDirectory(#[source] std::io::Error),

    /// The source file could not be opened.
    #[error("could not open source file for reading")]
    FailedToOpenSourceFile(#[source] std::io::Error),

    /// The symlink contents could not be read.
    #[error("could not read symlink")]
    FailedToReadSymlink(#[source] std::io::Error),

    /// Creating the link/copy failed.
    #[error("failed to {0} file to destination")]
    FailedToLink(LinkMethod, #[source] std::io::Error),

    /// The destination file could not be written.
    #[error("could not open destination file for writing")]
    FailedToOpenDestinationFile(#[source] std::io::Error),

    /// The permissions of the destination could not be set.
    #[error("could not update destination file permissions")]
    FailedToUpdateDestinationFilePermissions(#[source] std::io::Error),

    /// A noarch python package was linked without a python version.
    #[error("cannot install noarch python files because no python version is known")]
    MissingPythonInfo,
}

/// The result of linking one file.
pub struct LinkedFile {
    /// True if an existing file was replaced.
    pub clobbered: bool,

    /// The SHA256 digest of the file as it ended up in the prefix.
    pub sha256: Sha256Hash,

    /// The size of the installed file in bytes.
    pub file_size: u64,

    /// The path of the file relative to the prefix. For noarch python
    /// packages this differs from the path inside the package.
    pub relative_path: PathBuf,

    /// How the file was linked.
    pub method: LinkMethod,
}

/// Installs a single file from an extracted package into the prefix.
///
/// Files carrying a prefix placeholder are copied with the placeholder
/// replaced by `target_prefix`; for binary files the replacement is padded
/// with NUL bytes to preserve every byte offset. Other files are hard
/// linked, soft linked or copied depending on their path type and the
/// allowed capabilities. Permissions are preserved.
#[allow(clippy::too_many_arguments)]
pub fn link_file(
    noarch_type: NoArchType,
    entry: &PathsEntry,
    package_dir: &Path,
    target_dir: &Path,
    target_prefix: &str,
    allow_symbolic_links: bool,
    allow_hard_links: bool,
    target_platform: Platform,
    target_python: Option<&PythonInfo>,
) -> Result<LinkedFile, LinkFileError> {
    let source_path = package_dir.join(&entry.relative_path);

    let destination_relative_path = if noarch_type.is_python() {
        match target_python {
            Some(python_info) => python_info.get_python_noarch_target_path(&entry.relative_path),
            None => return Err(LinkFileError::MissingPythonInfo),
        }
    } else {
        Cow::Borrowed(entry.relative_path.as_path())
    };
    let destination_path = target_dir.join(destination_relative_path.as_ref());

    if let Some(parent) = destination_path.parent() {
        std::fs::create_dir_all(parent).map_err(LinkFileError::FailedToCreateParentDirectory)?;
    }

    // An existing file at the destination means another package already
    // wrote there; the caller decides what to do with that information.
    let clobbered = destination_path.is_file();

    let mut sha256 = None;
    let mut file_size = entry.size_in_bytes;

    let link_method = if let Some(PrefixPlaceholder {
        file_mode,
        placeholder,
    }) = entry.prefix_placeholder.as_ref()
    {
        let source = map_or_read_source_file(&source_path)?;

        let destination = std::fs::File::create(&destination_path)
            .map_err(LinkFileError::FailedToOpenDestinationFile)?;
        let mut destination_writer = HashingWriter::<_, Sha256>::new(destination);

        // Backslashes in a windows prefix would break escaping inside the
        // patched files, forward slashes work everywhere.
        let target_prefix = if target_platform.is_windows() {
            Cow::Owned(target_prefix.replace('\\', "/"))
        } else {
            Cow::Borrowed(target_prefix)
        };

        copy_and_replace_placeholder(
            source.as_ref(),
            &mut destination_writer,
            placeholder,
            &target_prefix,
            *file_mode,
        )?;

        let (mut file, hash) = destination_writer.finalize();
        sha256 = Some(hash);
        file_size = file.stream_position().ok();
        drop(file);

        // The patched copy keeps the permissions of the original.
        let metadata = std::fs::symlink_metadata(&source_path)?;
        std::fs::set_permissions(&destination_path, metadata.permissions())
            .map_err(LinkFileError::FailedToUpdateDestinationFilePermissions)?;

        LinkMethod::Patched(*file_mode)
    } else if entry.path_type == PathType::HardLink && allow_hard_links {
        hardlink_to_destination(&source_path, &destination_path)?;
        LinkMethod::Hardlink
    } else if entry.path_type == PathType::SoftLink && allow_symbolic_links {
        symlink_to_destination(&source_path, &destination_path)?;
        LinkMethod::Softlink
    } else {
        copy_to_destination(&source_path, &destination_path)?;
        LinkMethod::Copy
    };

    // Fill in digest and size if the fast paths above did not compute them.
    let sha256 = if let Some(sha256) = sha256 {
        sha256
    } else if let Some(sha256) = entry.sha256 {
        sha256
    } else {
        krait_digest::compute_file_digest::<Sha256>(&destination_path)
            .map_err(LinkFileError::FailedToOpenDestinationFile)?
    };

    let file_size = if let Some(file_size) = file_size {
        file_size
    } else {
        std::fs::symlink_metadata(&destination_path)?.len()
    };

    Ok(LinkedFile {
        clobbered,
        sha256,
        file_size,
        relative_path: destination_relative_path.into_owned(),
        method: link_method,
    })
}

/// The source file, either memory mapped or read into memory when mapping is
/// not possible (network mounts and the like).
enum MmapOrBytes {
    Mmap(Mmap),
    Bytes(Vec<u8>),
}

impl AsRef<[u8]> for MmapOrBytes {
    fn as_ref(&self) -> &[u8] {
        match self {
            MmapOrBytes::Mmap(mmap) => mmap.as_ref(),
            MmapOrBytes::Bytes(bytes) => bytes.as_slice(),
        }
    }
}

fn map_or_read_source_file(source_path: &Path) -> Result<MmapOrBytes, LinkFileError> {
    let mut file =
        std::fs::File::open(source_path).map_err(LinkFileError::FailedToOpenSourceFile)?;

    let mmap = unsafe { Mmap::map(&file) };
    Ok(match mmap {
        Ok(memory) => MmapOrBytes::Mmap(memory),
        Err(err) => {
            tracing::warn!(
                "failed to memory map {}: {err}; reading it instead",
                source_path.display()
            );
            let mut bytes = Vec::new();
            file.read_to_end(&mut bytes)?;
            MmapOrBytes::Bytes(bytes)
        }
    })
}

fn hardlink_to_destination(
    source_path: &Path,
    destination_path: &Path,
) -> Result<(), LinkFileError> {
    loop {
        match std::fs::hard_link(source_path, destination_path) {
            Ok(()) => return Ok(()),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                std::fs::remove_file(destination_path)?;
            }
            Err(e) => return Err(LinkFileError::FailedToLink(LinkMethod::Hardlink, e)),
        }
    }
}

fn symlink_to_destination(
    source_path: &Path,
    destination_path: &Path,
) -> Result<(), LinkFileError> {
    let linked_path = source_path
        .read_link()
        .map_err(LinkFileError::FailedToReadSymlink)?;

    loop {
        match symlink(&linked_path, destination_path) {
            Ok(()) => return Ok(()),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                std::fs::remove_file(destination_path)?;
            }
            Err(e) => return Err(LinkFileError::FailedToLink(LinkMethod::Softlink, e)),
        }
    }
}

fn copy_to_destination(source_path: &Path, destination_path: &Path) -> Result<(), LinkFileError> {
    loop {
        match std::fs::copy(source_path, destination_path) {
            Ok(_) => return Ok(()),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                std::fs::remove_file(destination_path)?;
            }
            Err(e) => return Err(LinkFileError::FailedToLink(LinkMethod::Copy, e)),
        }
    }
}

/// Copies `source_bytes` to `destination` replacing the placeholder with the
/// prefix, dispatching on the file mode.
pub fn copy_and_replace_placeholder(
    source_bytes: &[u8],
    destination: impl Write,
    prefix_placeholder: &str,
    target_prefix: &str,
    file_mode: FileMode,
) -> Result<(), std::io::Error> {
    match file_mode {
        FileMode::Text => copy_and_replace_textual_placeholder(
            source_bytes,
            destination,
            prefix_placeholder,
            target_prefix,
        ),
        FileMode::Binary => copy_and_replace_cstring_placeholder(
            source_bytes,
            destination,
            prefix_placeholder,
            target_prefix,
        ),
    }
}

/// Text replacement: every occurrence of the placeholder is replaced, the
/// file may change length.
pub fn copy_and_replace_textual_placeholder(
    mut source_bytes: &[u8],
    mut destination: impl Write,
    prefix_placeholder: &str,
    target_prefix: &str,
) -> Result<(), std::io::Error> {
    let old_prefix = prefix_placeholder.as_bytes();
    let new_prefix = target_prefix.as_bytes();

    loop {
        if let Some(index) = memchr::memmem::find(source_bytes, old_prefix) {
            destination.write_all(&source_bytes[..index])?;
            destination.write_all(new_prefix)?;
            source_bytes = &source_bytes[index + old_prefix.len()..];
        } else {
            destination.write_all(source_bytes)?;
            return Ok(());
        }
    }
}

/// Binary replacement: every c-string containing the placeholder is rewritten
/// in place, NUL padded to its original length so offsets stay valid.
pub fn copy_and_replace_cstring_placeholder(
    mut source_bytes: &[u8],
    mut destination: impl Write,
    prefix_placeholder: &str,
    target_prefix: &str,
) -> Result<(), std::io::Error> {
    let old_prefix = prefix_placeholder.as_bytes();
    let new_prefix = target_prefix.as_bytes();

    // Padding to fill the gap the (usually) shorter new prefix leaves,
    // keeping the string NUL terminated.
    let padding = vec![b'\0'; old_prefix.len().saturating_sub(new_prefix.len())];

    loop {
        if let Some(index) = memchr::memmem::find(source_bytes, old_prefix) {
            // The end of the c-string that contains the placeholder.
            let mut end = index + old_prefix.len();
            while end < source_bytes.len() && source_bytes[end] != b'\0' {
                end += 1;
            }

            let len = end - index;
            let suffix = &source_bytes[index + old_prefix.len()..end];

            destination.write_all(&source_bytes[..index])?;
            destination.write_all(&new_prefix[..len.min(new_prefix.len())])?;
            destination
                .write_all(&suffix[..len.saturating_sub(new_prefix.len()).min(suffix.len())])?;
            destination.write_all(&padding)?;

            source_bytes = &source_bytes[end..];
        } else {
            destination.write_all(source_bytes)?;
            return Ok(());
        }
    }
}

fn symlink(source_path: &Path, destination_path: &Path) -> std::io::Result<()> {
    #[cfg(windows)]
    return std::os::windows::fs::symlink_file(source_path, destination_path);
    #[cfg(unix)]
    return std::os::unix::fs::symlink(source_path, destination_path);
}

#[cfg(test)]
mod test {
    use std::io::Cursor;

    use rstest::rstest;

    #[rstest]
    #[case("Hello, cruel world!", "cruel", "fabulous", "Hello, fabulous world!")]
    #[case(
        "/opt/anaconda1anaconda2anaconda3/etc/config",
        "/opt/anaconda1anaconda2anaconda3",
        "/home/u/env",
        "/home/u/env/etc/config"
    )]
    #[case("no placeholder here", "/opt/placeholder", "/home/u/env", "no placeholder here")]
    fn textual_replacement(
        #[case] input: &str,
        #[case] placeholder: &str,
        #[case] target_prefix: &str,
        #[case] expected: &str,
    ) {
        let mut output = Cursor::new(Vec::new());
        super::copy_and_replace_textual_placeholder(
            input.as_bytes(),
            &mut output,
            placeholder,
            target_prefix,
        )
        .unwrap();
        assert_eq!(&String::from_utf8_lossy(&output.into_inner()), expected);
    }

    #[rstest]
    #[case(
        b"12345Hello, fabulous world!\x006789",
        "fabulous",
        "cruel",
        b"12345Hello, cruel world!\x00\x00\x00\x006789"
    )]
    #[case(b"short\x00", "short", "verylong", b"veryl\x00")]
    #[case(b"short1234\x00", "short", "verylong", b"verylong1\x00")]
    fn binary_replacement(
        #[case] input: &[u8],
        #[case] placeholder: &str,
        #[case] target_prefix: &str,
        #[case] expected: &[u8],
    ) {
        assert_eq!(
            expected.len(),
            input.len(),
            "binary replacement must preserve the length"
        );
        let mut output = Cursor::new(Vec::new());
        super::copy_and_replace_cstring_placeholder(
            input,
            &mut output,
            placeholder,
            target_prefix,
        )
        .unwrap();
        assert_eq!(&output.into_inner(), expected);
    }

    #[test]
    fn binary_replacement_pads_to_placeholder_length() {
        // A binary file containing the placeholder plus one trailing NUL:
        // after patching, the prefix is NUL padded to the placeholder's
        // original byte length.
        let placeholder = "/opt/anaconda1anaconda2anaconda3";
        let prefix = "/home/u/env";
        let input = format!("{placeholder}\0");
        let mut output = Cursor::new(Vec::new());
        super::copy_and_replace_cstring_placeholder(
            input.as_bytes(),
            &mut output,
            placeholder,
            prefix,
        )
        .unwrap();

        let output = output.into_inner();
        assert_eq!(output.len(), input.len());
        assert!(output.starts_with(prefix.as_bytes()));
        assert!(output[prefix.len()..].iter().all(|&b| b == 0));
    }
}
