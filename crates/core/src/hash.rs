use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::error::Result;

const CHUNK: usize = 1024 * 128;

pub fn blake3_file(path: &Path) -> Result<blake3::Hash> {
    let mut reader = BufReader::with_capacity(CHUNK, File::open(path)?);
    let mut hasher = blake3::Hasher::new();

    let mut buf = vec![0u8; CHUNK];
    loop {
        let read = reader.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }

    Ok(hasher.finalize())
}

/// True when both files have the same length and digest.
pub fn same_contents(a: &Path, b: &Path) -> Result<bool> {
    if a.metadata()?.len() != b.metadata()?.len() {
        return Ok(false);
    }
    Ok(blake3_file(a)? == blake3_file(b)?)
}
