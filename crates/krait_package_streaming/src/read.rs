//! Extraction of archives from readers implementing [`std::io::Read`].

use std::{ffi::OsStr, io::Read, path::Path};

use zip::read::read_zipfile_from_stream;

use krait_digest::{HashingReader, Md5, Sha256};

use crate::{ExtractError, ExtractResult};

/// Returns a `.tar.bz2` stream as a decompressed tar archive.
pub fn stream_tar_bz2(reader: impl Read) -> tar::Archive<impl Read + Sized> {
    tar::Archive::new(bzip2::read::BzDecoder::new(reader))
}

/// Returns a `.tar.zst` stream as a decompressed tar archive.
pub(crate) fn stream_tar_zst(
    reader: impl Read,
) -> Result<tar::Archive<impl Read + Sized>, ExtractError> {
    Ok(tar::Archive::new(zstd::stream::read::Decoder::new(reader)?))
}

/// Extracts a `.tar.bz2` archive to the destination directory, returning the
/// digests of the compressed stream.
pub fn extract_tar_bz2(
    reader: impl Read,
    destination: &Path,
) -> Result<ExtractResult, ExtractError> {
    std::fs::create_dir_all(destination).map_err(ExtractError::CouldNotCreateDestination)?;

    // Digest the raw archive bytes as they flow into the decompressor.
    let sha256_reader = HashingReader::<_, Sha256>::new(reader);
    let mut md5_reader = HashingReader::<_, Md5>::new(sha256_reader);

    stream_tar_bz2(&mut md5_reader).unpack(destination)?;

    // Drain whatever the tar reader did not consume (trailing padding) so
    // the digests cover the entire file.
    std::io::copy(&mut md5_reader, &mut std::io::sink())?;

    let (sha256_reader, md5) = md5_reader.finalize();
    let (_, sha256) = sha256_reader.finalize();
    Ok(ExtractResult { sha256, md5 })
}

/// Extracts a `.conda` archive to the destination directory, returning the
/// digests of the outer zip stream.
pub fn extract_conda(reader: impl Read, destination: &Path) -> Result<ExtractResult, ExtractError> {
    std::fs::create_dir_all(destination).map_err(ExtractError::CouldNotCreateDestination)?;

    let sha256_reader = HashingReader::<_, Sha256>::new(reader);
    let mut md5_reader = HashingReader::<_, Md5>::new(sha256_reader);

    // A `.conda` file is a zip container whose members are zstd compressed
    // tarballs (`pkg-*.tar.zst` and `info-*.tar.zst`) plus a metadata file.
    while let Some(file) = read_zipfile_from_stream(&mut md5_reader)
        .map_err(|e| ExtractError::IoError(std::io::Error::other(e)))?
    {
        if file
            .mangled_name()
            .file_name()
            .map(OsStr::to_string_lossy)
            .is_some_and(|file_name| file_name.ends_with(".tar.zst"))
        {
            stream_tar_zst(file)?.unpack(destination)?;
        }
    }

    std::io::copy(&mut md5_reader, &mut std::io::sink())?;

    let (sha256_reader, md5) = md5_reader.finalize();
    let (_, sha256) = sha256_reader.finalize();
    Ok(ExtractResult { sha256, md5 })
}

#[cfg(test)]
mod test {
    use krait_digest::compute_bytes_digest;

    use crate::test_utils::build_tar_bz2;

    use super::extract_tar_bz2;

    #[test]
    fn extracts_and_digests() {
        let archive = build_tar_bz2(&[
            ("info/index.json", br#"{"name": "x"}"#),
            ("lib/data.txt", b"hello"),
        ]);

        let dir = tempfile::tempdir().unwrap();
        let result = extract_tar_bz2(archive.as_slice(), dir.path()).unwrap();

        assert_eq!(
            std::fs::read_to_string(dir.path().join("lib/data.txt")).unwrap(),
            "hello"
        );
        assert_eq!(
            result.sha256,
            compute_bytes_digest::<krait_digest::Sha256>(&archive)
        );
        assert_eq!(
            result.md5,
            compute_bytes_digest::<krait_digest::Md5>(&archive)
        );
    }
}
