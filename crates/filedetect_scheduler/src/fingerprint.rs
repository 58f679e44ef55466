//! Content fingerprints (hex MD5) and file metadata helpers.

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

const BLOCK_SIZE: usize = 8 * 1024;

/// Size of a regular file. Missing files, directories and unreadable
/// metadata are all errors.
pub fn file_size(path: &Path) -> io::Result<u64> {
    let metadata = std::fs::metadata(path)?;
    if !metadata.is_file() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} is not a regular file", path.display()),
        ));
    }
    Ok(metadata.len())
}

/// Hex MD5 of everything readable from `reader`, consumed in 8 KiB blocks.
pub fn md5_reader<R: Read>(mut reader: R) -> io::Result<String> {
    let mut context = md5::Context::new();
    let mut buf = [0u8; BLOCK_SIZE];
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        context.consume(&buf[..n]);
    }
    Ok(format!("{:x}", context.compute()))
}

pub fn md5_file(path: &Path) -> io::Result<String> {
    md5_reader(File::open(path)?)
}

/// [`md5_file`] on the blocking pool.
pub async fn md5_file_async(path: PathBuf) -> io::Result<String> {
    tokio::task::spawn_blocking(move || md5_file(&path))
        .await
        .map_err(io::Error::other)?
}
