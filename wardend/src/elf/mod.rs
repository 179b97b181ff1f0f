pub mod analysis;
pub mod path;

use sha2::{Digest, Sha256};
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Danger {
    Unknown,
    Benign,
    Dangerous,
}

impl Danger {
    pub fn as_i32(self) -> i32 {
        match self {
            Danger::Unknown => -1,
            Danger::Benign => 0,
            Danger::Dangerous => 1,
        }
    }

    pub fn from_i32(v: i32) -> Self {
        match v {
            0 => Danger::Benign,
            1 => Danger::Dangerous,
            _ => Danger::Unknown,
        }
    }
}

pub fn check_elf_magic(bytes: &[u8]) -> bool {
    bytes.len() >= 4 && bytes[0] == 0x7f && &bytes[1..4] == b"ELF"
}

pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex_encode(&hasher.finalize())
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

pub fn dev_inode(path: &Path) -> std::io::Result<(u64, u64)> {
    let meta = fs::metadata(path)?;
    Ok((meta.dev(), meta.ino()))
}

/// A snapshot copy of an executable opened for static analysis.
///
/// `new` requires an absolute path; it copies the file into `files_dir`
/// (skipped if an identically-named copy already exists) so analysis runs
/// against a stable snapshot even if the original is deleted mid-analysis
/// (the exact scenario `detectExecutableDeletion` watches for).
pub struct Elf {
    pub real_path: PathBuf,
    pub temp_path: PathBuf,
    pub bytes: Vec<u8>,
}

impl Elf {
    pub fn open(real_path: &Path, files_dir: &Path) -> std::io::Result<Self> {
        if !real_path.is_absolute() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "elf path must be absolute",
            ));
        }
        let bytes = fs::read(real_path)?;
        if !check_elf_magic(&bytes) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "missing ELF magic",
            ));
        }

        let basename = real_path
            .file_name()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "no basename"))?;
        let temp_path = files_dir.join(basename);
        if !temp_path.exists() {
            fs::create_dir_all(files_dir)?;
            fs::write(&temp_path, &bytes)?;
        }

        Ok(Self {
            real_path: real_path.to_path_buf(),
            temp_path,
            bytes,
        })
    }

    pub fn parse(&self) -> Result<goblin::elf::Elf<'_>, goblin::error::Error> {
        goblin::elf::Elf::parse(&self.bytes)
    }

    pub fn close(self) {
        let _ = fs::remove_file(&self.temp_path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magic_check_detects_elf_header() {
        assert!(check_elf_magic(&[0x7f, b'E', b'L', b'F', 0, 0]));
        assert!(!check_elf_magic(b"#!/bin/sh\n"));
    }

    #[test]
    fn danger_round_trips_through_i32() {
        assert_eq!(Danger::from_i32(Danger::Dangerous.as_i32()), Danger::Dangerous);
        assert_eq!(Danger::from_i32(-1), Danger::Unknown);
    }
}
