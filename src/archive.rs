//! ZIP bundling of multi-output results.
//!
//! When a request yields more than one output file, every output is also
//! written into a single ZIP container that is registered as its own
//! artifact. Entries come from memory ([`Entry::Bytes`]) or from a file on
//! disk ([`Entry::Path`]), which is streamed into the writer without being
//! read whole. Writing is blocking; async callers go through
//! `spawn_blocking`.
//!
//! Entries use [`CompressionMethod::Stored`]. The outputs are PDFs, PNGs and
//! JPEGs that are already compressed, and storing keeps every entry
//! byte-identical to the artifact it mirrors.

use crate::error::FileOpsError;
use std::collections::HashSet;
use std::fs::File;
use std::io::{Cursor, Write};
use std::path::Path;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Source of one bundle entry.
#[derive(Debug, Clone, Copy)]
pub enum Entry<'a> {
    Bytes(&'a [u8]),
    Path(&'a Path),
}

/// An in-progress ZIP container.
pub struct Bundle {
    writer: ZipWriter<Cursor<Vec<u8>>>,
    names: HashSet<String>,
}

impl Bundle {
    pub fn new() -> Self {
        Self {
            writer: ZipWriter::new(Cursor::new(Vec::new())),
            names: HashSet::new(),
        }
    }

    /// Append one entry from memory. Entry names must be unique within the
    /// bundle.
    pub fn add(&mut self, name: &str, bytes: &[u8]) -> Result<(), FileOpsError> {
        self.start(name, bytes.len() as u64)?;
        self.writer
            .write_all(bytes)
            .map_err(|e| FileOpsError::Archive(e.to_string()))
    }

    /// Append one entry by copying `path` into the container.
    pub fn add_path(&mut self, name: &str, path: &Path) -> Result<(), FileOpsError> {
        let mut file = File::open(path).map_err(|e| FileOpsError::io(path, e))?;
        let size = file
            .metadata()
            .map_err(|e| FileOpsError::io(path, e))?
            .len();
        self.start(name, size)?;
        std::io::copy(&mut file, &mut self.writer)
            .map_err(|e| FileOpsError::Archive(format!("{name}: {e}")))?;
        Ok(())
    }

    pub fn add_entry(&mut self, name: &str, entry: Entry<'_>) -> Result<(), FileOpsError> {
        match entry {
            Entry::Bytes(bytes) => self.add(name, bytes),
            Entry::Path(path) => self.add_path(name, path),
        }
    }

    fn start(&mut self, name: &str, size: u64) -> Result<(), FileOpsError> {
        if !self.names.insert(name.to_string()) {
            return Err(FileOpsError::Archive(format!("duplicate entry '{name}'")));
        }
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Stored)
            .large_file(size >= u32::MAX as u64);
        self.writer
            .start_file(name, options)
            .map_err(|e| FileOpsError::Archive(e.to_string()))
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Write the central directory and return the container bytes.
    pub fn finish(self) -> Result<Vec<u8>, FileOpsError> {
        let cursor = self
            .writer
            .finish()
            .map_err(|e| FileOpsError::Archive(e.to_string()))?;
        Ok(cursor.into_inner())
    }
}

impl Default for Bundle {
    fn default() -> Self {
        Self::new()
    }
}

/// Bundle a list of `(name, entry)` pairs in one call.
pub fn bundle<'a, I>(entries: I) -> Result<Vec<u8>, FileOpsError>
where
    I: IntoIterator<Item = (&'a str, Entry<'a>)>,
{
    let mut bundle = Bundle::new();
    for (name, entry) in entries {
        bundle.add_entry(name, entry)?;
    }
    bundle.finish()
}
