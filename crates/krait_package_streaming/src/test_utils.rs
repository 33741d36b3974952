//! Helpers shared by the tests of this crate.

use std::io::Write;

/// Builds a small `.tar.bz2` archive in memory.
pub(crate) fn build_tar_bz2(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut encoder = bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::default());
    {
        let mut builder = tar::Builder::new(&mut encoder);
        for (path, content) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, path, *content).unwrap();
        }
        builder.finish().unwrap();
    }
    encoder.flush().unwrap();
    encoder.finish().unwrap()
}
