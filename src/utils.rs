//! Utility functions

use crate::error::{BuildError, Result};
use md5::Digest;
use serde::de::DeserializeOwned;
use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
    time::SystemTime,
};

/// Extensions mapped to a source kind during detection.
pub const C_SOURCE_EXTENSION: &str = "c";
pub const CPP_SOURCE_EXTENSION: &str = "cpp";
pub const CPP_HEADER_EXTENSION: &str = "hpp";
pub const CPP_INTERFACE_EXTENSION: &str = "ixx";

/// Canonicalize the path, stripping Windows verbatim prefixes.
///
/// Falls back to joining onto the current directory when the path does not
/// exist yet.
pub fn canonicalize(path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();
    dunce::canonicalize(path).unwrap_or_else(|_| absolute(path))
}

/// Returns the path joined onto the current directory, without touching disk.
pub fn absolute(path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir().map(|cwd| cwd.join(path)).unwrap_or_else(|_| path.to_path_buf())
    }
}

/// Returns the file's last modification time, or `None` if it is unreadable.
pub fn mtime(path: impl AsRef<Path>) -> Option<SystemTime> {
    fs::metadata(path.as_ref()).and_then(|meta| meta.modified()).ok()
}

/// Reads the json file and deserializes it into the provided type.
pub fn read_json_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let file = fs::File::open(path).map_err(|err| BuildError::io(err, path))?;
    let file = std::io::BufReader::new(file);
    let val: T = serde_json::from_reader(file)?;
    Ok(val)
}

/// Creates the parent directory of the `file` and all its ancestors.
pub fn create_parent_dir_all(file: impl AsRef<Path>) -> Result<()> {
    let file = file.as_ref();
    if let Some(parent) = file.parent() {
        fs::create_dir_all(parent).map_err(|err| BuildError::io(err, parent))?;
    }
    Ok(())
}

/// Writes `content` to a temporary sibling and renames it into place, so that
/// concurrent readers never observe a half-written file.
pub fn write_atomic(path: impl AsRef<Path>, content: &[u8]) -> Result<()> {
    let path = path.as_ref();
    create_parent_dir_all(path)?;
    let tmp = path.with_extension("tmp");
    {
        let mut file = fs::File::create(&tmp).map_err(|err| BuildError::io(err, &tmp))?;
        file.write_all(content).map_err(|err| BuildError::io(err, &tmp))?;
    }
    fs::rename(&tmp, path).map_err(|err| BuildError::io(err, path))?;
    Ok(())
}

/// The first 64 bits of the MD5 digest of `bytes`.
///
/// Deterministic across platforms, which is what makes `unique_name` based
/// artifact sharing sound.
pub fn content_hash(bytes: &[u8]) -> u64 {
    let mut hasher = md5::Md5::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    u64::from_be_bytes(digest[..8].try_into().expect("md5 digest is 16 bytes"))
}

/// `"{filename}.{hash:016x}"` for the given path and content.
///
/// Two files with identical name and content deliberately collide so that
/// they share one artifact.
pub fn unique_name(path: &Path, bytes: &[u8]) -> String {
    let filename = path.file_name().map(|s| s.to_string_lossy()).unwrap_or_default();
    format!("{}.{}", filename, hex::encode(content_hash(bytes).to_be_bytes()))
}

/// Reads the file and derives its unique name from its content.
pub fn unique_name_of_file(path: &Path) -> Result<String> {
    let bytes = fs::read(path).map_err(|err| BuildError::io(err, path))?;
    Ok(unique_name(path, &bytes))
}
