//! In-process file map handing out opaque keys for dependency sets.

use std::collections::BTreeMap;
use std::sync::RwLock;

use sha2::{Digest, Sha256};

use crate::error::BoxError;
use crate::models::Dependency;
use crate::url_keys::FileMapProvider;

const KEY_LENGTH: usize = 16;

/// Dependency set registered under an opaque key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMapEntry {
  /// Dependencies in request order.
  pub dependencies: Vec<Dependency>,
  /// Version the key was issued for.
  pub version: u32,
}

/// File map kept in memory for the lifetime of the process.
///
/// Keys are derived from a SHA-256 digest of the set, so the same dependencies at the same
/// version always receive the same key, across processes as well.
#[derive(Debug, Default)]
pub struct InMemoryFileMap {
  entries: RwLock<BTreeMap<String, FileMapEntry>>,
}

impl InMemoryFileMap {
  /// Create an empty map.
  pub fn new() -> Self {
    Self::default()
  }

  /// Look up the set registered under `key`.
  pub fn resolve(&self, key: &str) -> Option<FileMapEntry> {
    self
      .entries
      .read()
      .ok()
      .and_then(|entries| entries.get(key).cloned())
  }

  /// Number of registered sets.
  pub fn len(&self) -> usize {
    self.entries.read().map(|entries| entries.len()).unwrap_or(0)
  }

  /// Returns `true` when no set has been registered.
  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

impl FileMapProvider for InMemoryFileMap {
  fn create_key(&self, dependencies: &[Dependency], version: u32) -> Result<String, BoxError> {
    let key = digest_key(dependencies, version);
    let mut entries = self
      .entries
      .write()
      .map_err(|_| "file map lock poisoned")?;
    entries
      .entry(key.clone())
      .or_insert_with(|| FileMapEntry {
        dependencies: dependencies.to_vec(),
        version,
      });
    Ok(key)
  }
}

fn digest_key(dependencies: &[Dependency], version: u32) -> String {
  let mut hasher = Sha256::new();
  hasher.update(version.to_le_bytes());
  for dependency in dependencies {
    hasher.update(dependency.dependency_type.name().as_bytes());
    hasher.update([0u8]);
    hasher.update(dependency.path.as_bytes());
    hasher.update([0u8]);
  }
  let mut key = hex::encode(hasher.finalize());
  key.truncate(KEY_LENGTH);
  key
}
