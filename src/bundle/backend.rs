//! Pluggable persistence, combination and compression of composite files.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use anyhow::{Context, Result, anyhow};
use flate2::Compression;
use flate2::GzBuilder;
use flate2::write::DeflateEncoder;
use tracing::debug;

use crate::config::CompositeSettings;
use crate::models::DependencyType;

/// Content coding negotiated with the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ContentEncoding {
  /// gzip, the preferred coding.
  Gzip,
  /// Raw deflate.
  Deflate,
  /// No compression.
  Identity,
}

impl ContentEncoding {
  /// Pick the coding to use from an `Accept-Encoding` header.
  ///
  /// gzip wins over deflate when both are acceptable; codings with `q=0` are ignored.
  pub fn negotiate(accept_encoding: &str) -> Self {
    let accepted: Vec<String> = accept_encoding
      .split(',')
      .filter_map(|part| {
        let mut pieces = part.split(';');
        let name = pieces.next()?.trim().to_ascii_lowercase();
        let refused = pieces.any(|param| {
          param
            .trim()
            .strip_prefix("q=")
            .and_then(|q| q.trim().parse::<f32>().ok())
            .is_some_and(|q| q <= 0.0)
        });
        (!refused && !name.is_empty()).then_some(name)
      })
      .collect();

    let accepts = |coding: &str| accepted.iter().any(|name| name == coding || name == "*");
    if accepts("gzip") {
      Self::Gzip
    } else if accepts("deflate") {
      Self::Deflate
    } else {
      Self::Identity
    }
  }

  /// Value for the `Content-Encoding` response header, if any.
  pub fn header_value(self) -> Option<&'static str> {
    match self {
      Self::Gzip => Some("gzip"),
      Self::Deflate => Some("deflate"),
      Self::Identity => None,
    }
  }

  fn file_suffix(self) -> &'static str {
    match self {
      Self::Gzip => ".gz",
      Self::Deflate => ".deflate",
      Self::Identity => "",
    }
  }
}

/// Storage-specific handling of combined output.
///
/// `combine_files` and `compress_bytes` have shared defaults; backends usually only
/// decide where composite files end up.
pub trait CompositeBackend: Send + Sync {
  /// Short name the backend is registered under.
  fn name(&self) -> &str;

  /// Persist a finished composite file and return where it was stored.
  fn save_composite(&self, key: &str, encoding: ContentEncoding, bytes: &[u8]) -> Result<String>;

  /// Load a previously saved composite file.
  fn load_composite(&self, key: &str, encoding: ContentEncoding) -> Result<Option<Vec<u8>>>;

  /// Concatenate the individual files in order.
  fn combine_files(&self, dependency_type: DependencyType, parts: &[Vec<u8>]) -> Vec<u8> {
    combine_parts(dependency_type, parts)
  }

  /// Compress the combined bytes for the negotiated coding.
  fn compress_bytes(&self, encoding: ContentEncoding, bytes: &[u8]) -> Result<Vec<u8>> {
    compress(encoding, bytes)
  }
}

/// Join parts with a separator that cannot merge the tail of one file into the next.
pub fn combine_parts(dependency_type: DependencyType, parts: &[Vec<u8>]) -> Vec<u8> {
  let separator: &[u8] = match dependency_type {
    DependencyType::Css => b"\n",
    DependencyType::Javascript => b";\n",
  };

  let mut combined = Vec::with_capacity(parts.iter().map(Vec::len).sum::<usize>() + parts.len());
  for (index, part) in parts.iter().enumerate() {
    if index > 0 {
      combined.extend_from_slice(separator);
    }
    combined.extend_from_slice(part);
  }
  combined
}

/// Compress `bytes`. gzip output has its mtime fixed at zero so identical input always
/// produces identical bytes.
pub fn compress(encoding: ContentEncoding, bytes: &[u8]) -> Result<Vec<u8>> {
  match encoding {
    ContentEncoding::Identity => Ok(bytes.to_vec()),
    ContentEncoding::Gzip => {
      let mut out = Vec::new();
      let mut encoder = GzBuilder::new()
        .mtime(0)
        .write(&mut out, Compression::default());
      encoder.write_all(bytes).context("gzip write failed")?;
      encoder.finish().context("gzip finish failed")?;
      Ok(out)
    }
    ContentEncoding::Deflate => {
      let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
      encoder.write_all(bytes).context("deflate write failed")?;
      encoder.finish().context("deflate finish failed")
    }
  }
}

/// Keeps composite files below a root directory.
#[derive(Debug, Clone)]
pub struct FileSystemBackend {
  root: PathBuf,
}

impl FileSystemBackend {
  /// Registry name.
  pub const NAME: &'static str = "file-system";

  /// Store files below `root`, creating it on first save.
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  /// Root directory.
  pub fn root(&self) -> &Path {
    &self.root
  }

  fn file_path(&self, key: &str, encoding: ContentEncoding) -> Result<PathBuf> {
    if key.is_empty()
      || !key
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
      || key.starts_with('.')
    {
      return Err(anyhow!("composite key `{key}` is not a safe file name"));
    }
    Ok(self.root.join(format!("{key}{}", encoding.file_suffix())))
  }
}

impl CompositeBackend for FileSystemBackend {
  fn name(&self) -> &str {
    Self::NAME
  }

  fn save_composite(&self, key: &str, encoding: ContentEncoding, bytes: &[u8]) -> Result<String> {
    let path = self.file_path(key, encoding)?;
    fs::create_dir_all(&self.root)
      .with_context(|| format!("failed to create {}", self.root.display()))?;
    fs::write(&path, bytes).with_context(|| format!("failed to write {}", path.display()))?;
    debug!(path = %path.display(), size = bytes.len(), "saved composite file");
    Ok(path.display().to_string())
  }

  fn load_composite(&self, key: &str, encoding: ContentEncoding) -> Result<Option<Vec<u8>>> {
    let path = self.file_path(key, encoding)?;
    match fs::read(&path) {
      Ok(bytes) => Ok(Some(bytes)),
      Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
      Err(err) => Err(err).with_context(|| format!("failed to read {}", path.display())),
    }
  }
}

/// Keeps composite files in process memory.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
  files: RwLock<BTreeMap<(String, ContentEncoding), Vec<u8>>>,
}

impl InMemoryBackend {
  /// Registry name.
  pub const NAME: &'static str = "in-memory";

  /// Create an empty backend.
  pub fn new() -> Self {
    Self::default()
  }
}

impl CompositeBackend for InMemoryBackend {
  fn name(&self) -> &str {
    Self::NAME
  }

  fn save_composite(&self, key: &str, encoding: ContentEncoding, bytes: &[u8]) -> Result<String> {
    self
      .files
      .write()
      .map_err(|_| anyhow!("in-memory backend lock poisoned"))?
      .insert((key.to_string(), encoding), bytes.to_vec());
    Ok(format!("memory://{key}{}", encoding.file_suffix()))
  }

  fn load_composite(&self, key: &str, encoding: ContentEncoding) -> Result<Option<Vec<u8>>> {
    let files = self
      .files
      .read()
      .map_err(|_| anyhow!("in-memory backend lock poisoned"))?;
    Ok(files.get(&(key.to_string(), encoding)).cloned())
  }
}

/// Named set of backends with one marked as the default.
#[derive(Clone)]
pub struct BackendRegistry {
  backends: BTreeMap<String, Arc<dyn CompositeBackend>>,
  default: String,
}

impl BackendRegistry {
  /// Registry whose default is `backend`.
  pub fn new(backend: Arc<dyn CompositeBackend>) -> Self {
    let default = backend.name().to_string();
    let mut backends = BTreeMap::new();
    backends.insert(default.clone(), backend);
    Self { backends, default }
  }

  /// Registry selected by the settings: file-system when `persist_files` is on,
  /// in-memory otherwise. Both are registered.
  pub fn from_settings(settings: &CompositeSettings) -> Self {
    let file_system: Arc<dyn CompositeBackend> =
      Arc::new(FileSystemBackend::new(&settings.composite_file_path));
    let memory: Arc<dyn CompositeBackend> = Arc::new(InMemoryBackend::new());

    if settings.persist_files {
      let mut registry = Self::new(file_system);
      registry.register(memory);
      registry
    } else {
      let mut registry = Self::new(memory);
      registry.register(file_system);
      registry
    }
  }

  /// Add or replace a backend under its own name.
  pub fn register(&mut self, backend: Arc<dyn CompositeBackend>) {
    self.backends.insert(backend.name().to_string(), backend);
  }

  /// Backend registered under `name`.
  pub fn get(&self, name: &str) -> Option<Arc<dyn CompositeBackend>> {
    self.backends.get(name).cloned()
  }

  /// Make `name` the default. Fails when nothing is registered under it.
  pub fn set_default(&mut self, name: &str) -> Result<()> {
    if !self.backends.contains_key(name) {
      return Err(anyhow!("no composite backend named `{name}`"));
    }
    self.default = name.to_string();
    Ok(())
  }

  /// Default backend.
  pub fn default_backend(&self) -> Arc<dyn CompositeBackend> {
    Arc::clone(&self.backends[&self.default])
  }

  /// Registered names in sorted order.
  pub fn names(&self) -> impl Iterator<Item = &str> {
    self.backends.keys().map(String::as_str)
  }
}

impl fmt::Debug for BackendRegistry {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("BackendRegistry")
      .field("backends", &self.backends.keys().collect::<Vec<_>>())
      .field("default", &self.default)
      .finish()
  }
}
