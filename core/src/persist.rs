use crate::{DocId, InvertedIndex, QueryCache};
use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, create_dir_all, File};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const SNAPSHOT_VERSION: u32 = 2;
pub const CACHE_VERSION: u32 = 2;
pub const VECTORS_VERSION: u32 = 1;

const SNAPSHOT_MAGIC: [u8; 4] = *b"TSIX";
const CACHE_MAGIC: [u8; 4] = *b"TSQC";
const VECTORS_MAGIC: [u8; 4] = *b"TSVX";

pub const SNAPSHOT_SUFFIX: &str = ".snapshot.bin";

/// Header problems detected before the body is decoded.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("{kind} file has unexpected magic bytes")]
    BadMagic { kind: &'static str },
    #[error("{kind} file has version {found}, this build reads version {expected}")]
    VersionMismatch { kind: &'static str, found: u32, expected: u32 },
}

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    magic: [u8; 4],
    version: u32,
}

#[derive(Serialize)]
struct Envelope<'a, T> {
    header: Header,
    body: &'a T,
}

#[derive(Deserialize)]
struct OwnedEnvelope<T> {
    #[allow(dead_code)]
    header: Header,
    body: T,
}

/// File locations for one named index under a data directory.
#[derive(Debug, Clone)]
pub struct IndexPaths {
    pub root: PathBuf,
    pub name: String,
}

impl IndexPaths {
    pub fn new<P: AsRef<Path>>(root: P, name: &str) -> Self {
        Self { root: root.as_ref().to_path_buf(), name: name.to_string() }
    }
    pub fn snapshot(&self) -> PathBuf { self.root.join(format!("{}{SNAPSHOT_SUFFIX}", self.name)) }
    pub fn cache(&self) -> PathBuf { self.root.join(format!("{}.cache.bin", self.name)) }
    pub fn vectors(&self) -> PathBuf { self.root.join(format!("{}.vectors.bin", self.name)) }

    /// Delete every file belonging to this index, including leftovers of
    /// interrupted writes. Missing files are fine.
    pub fn remove_all(&self) -> Result<()> {
        let files = [self.snapshot(), self.cache(), self.vectors()];
        let temps: Vec<PathBuf> = files.iter().map(|p| tmp_path(p)).collect();
        for path in files.into_iter().chain(temps) {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e).with_context(|| format!("removing {}", path.display())),
            }
        }
        Ok(())
    }
}

/// Index name for a snapshot file name, e.g. `products.snapshot.bin`.
pub fn index_name_from_snapshot(file_name: &str) -> Option<&str> {
    file_name.strip_suffix(SNAPSHOT_SUFFIX).filter(|name| !name.is_empty())
}

/// Scratch file a blob is written to before it replaces `path`.
fn tmp_path(path: &Path) -> PathBuf {
    path.with_extension("tmp")
}

fn write_blob<T: Serialize>(path: &Path, magic: [u8; 4], version: u32, body: &T) -> Result<()> {
    if let Some(dir) = path.parent() {
        create_dir_all(dir)?;
    }
    let bytes = bincode::serialize(&Envelope { header: Header { magic, version }, body })?;
    // whole-file rewrite via rename so readers never see a half-written blob
    let tmp = tmp_path(path);
    let mut f = File::create(&tmp).with_context(|| format!("creating {}", tmp.display()))?;
    f.write_all(&bytes)?;
    f.sync_all()?;
    fs::rename(&tmp, path).with_context(|| format!("replacing {}", path.display()))?;
    Ok(())
}

fn read_blob<T: DeserializeOwned>(path: &Path, kind: &'static str, magic: [u8; 4], version: u32) -> Result<Option<T>> {
    let mut f = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("opening {}", path.display())),
    };
    let mut buf = Vec::new();
    f.read_to_end(&mut buf)?;
    let header: Header = bincode::deserialize(&buf).with_context(|| format!("decoding {kind} header"))?;
    if header.magic != magic {
        return Err(PersistError::BadMagic { kind }.into());
    }
    if header.version != version {
        return Err(PersistError::VersionMismatch { kind, found: header.version, expected: version }.into());
    }
    let envelope: OwnedEnvelope<T> =
        bincode::deserialize(&buf).with_context(|| format!("decoding {kind} body"))?;
    Ok(Some(envelope.body))
}

pub fn save_snapshot(paths: &IndexPaths, index: &InvertedIndex) -> Result<()> {
    write_blob(&paths.snapshot(), SNAPSHOT_MAGIC, SNAPSHOT_VERSION, index)
}

/// `Ok(None)` when no snapshot has been written yet.
pub fn load_snapshot(paths: &IndexPaths) -> Result<Option<InvertedIndex>> {
    let Some(index) = read_blob::<InvertedIndex>(&paths.snapshot(), "snapshot", SNAPSHOT_MAGIC, SNAPSHOT_VERSION)? else {
        return Ok(None);
    };
    index.validate().map_err(|msg| anyhow::anyhow!("snapshot is inconsistent: {msg}"))?;
    Ok(Some(index))
}

pub fn save_cache(paths: &IndexPaths, cache: &QueryCache) -> Result<()> {
    write_blob(&paths.cache(), CACHE_MAGIC, CACHE_VERSION, cache)
}

pub fn load_cache(paths: &IndexPaths) -> Result<Option<QueryCache>> {
    read_blob(&paths.cache(), "query cache", CACHE_MAGIC, CACHE_VERSION)
}

pub fn save_vectors(path: &Path, vectors: &HashMap<DocId, Vec<f32>>) -> Result<()> {
    write_blob(path, VECTORS_MAGIC, VECTORS_VERSION, vectors)
}

pub fn load_vectors(path: &Path) -> Result<Option<HashMap<DocId, Vec<f32>>>> {
    read_blob(path, "vectors", VECTORS_MAGIC, VECTORS_VERSION)
}
