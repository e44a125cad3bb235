//! Composite handler configuration and the validated settings derived from it.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::warn;

use crate::error::ConfigurationError;
use crate::models::UrlKeyStrategy;
use crate::url_keys::{CompositeUrlBuilder, DEFAULT_PATH_URL_FORMAT, PathFormatTemplate};
use crate::whitelist::DomainWhitelist;

const DEFAULT_CONFIG_FILE: &str = "composite.config.json";

/// Raw configuration as read from `composite.config.json`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CompositeConfig {
  /// Hand stylesheets to the CSS minifier before combining.
  pub enable_css_minify: bool,
  /// Hand scripts to the JavaScript minifier before combining.
  pub enable_js_minify: bool,
  /// Persist combined output through the file-system backend.
  pub persist_files: bool,
  /// Name of the URL key strategy. Unknown values fall back to the default.
  pub url_type: String,
  /// Template for path based composite URLs.
  pub path_url_format: String,
  /// Root directory for persisted composite files.
  pub composite_file_path: String,
  /// Comma separated list of domains whose resources may be bundled.
  pub bundle_domains: String,
  /// Base path of the handler serving composite files.
  pub handler_path: String,
  /// Upper bound for the length of generated URLs.
  pub max_url_length: usize,
  /// Cache-busting version appended to every composite URL.
  pub version: u32,
  /// Suffixes of server-rendered resources that must be executed rather than fetched.
  pub executable_extensions: Vec<String>,
}

impl Default for CompositeConfig {
  fn default() -> Self {
    Self {
      enable_css_minify: true,
      enable_js_minify: true,
      persist_files: true,
      url_type: "Base64QueryStrings".into(),
      path_url_format: DEFAULT_PATH_URL_FORMAT.into(),
      composite_file_path: "composite-files".into(),
      bundle_domains: String::new(),
      handler_path: "/DependencyHandler.axd".into(),
      max_url_length: 2048,
      version: 1,
      executable_extensions: vec![".aspx".into(), ".ashx".into()],
    }
  }
}

impl CompositeConfig {
  /// Attempt to load configuration from the provided directory.
  ///
  /// When the configuration file does not exist or fails to parse we fallback to default
  /// values so the handler can still run with sensible assumptions.
  pub fn discover(dir: &Path) -> Self {
    let candidate = dir.join(DEFAULT_CONFIG_FILE);
    match Self::load(&candidate) {
      Ok(config) => config,
      Err(ConfigurationError::Io { source, .. })
        if source.kind() == std::io::ErrorKind::NotFound =>
      {
        Self::default()
      }
      Err(err) => {
        warn!("{err}; using default composite configuration");
        Self::default()
      }
    }
  }

  /// Read configuration from a specific JSON file.
  pub fn load(path: &Path) -> Result<Self, ConfigurationError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigurationError::Io {
      path: path.to_path_buf(),
      source,
    })?;
    serde_json::from_str(&content).map_err(|source| ConfigurationError::Parse {
      path: path.to_path_buf(),
      source,
    })
  }

  /// Resolve the configured URL strategy, substituting the default for unknown names.
  pub fn strategy(&self) -> UrlKeyStrategy {
    UrlKeyStrategy::parse(&self.url_type).unwrap_or_else(|| {
      let fallback = UrlKeyStrategy::default();
      warn!(
        url_type = %self.url_type,
        ?fallback,
        "unrecognised urlType, using the default strategy"
      );
      fallback
    })
  }

  /// Validate the configuration into read-only settings.
  ///
  /// Fails when the path template is missing a token. Invalid bundle domains are logged
  /// and skipped.
  pub fn into_settings(self) -> Result<CompositeSettings, ConfigurationError> {
    let path_format = PathFormatTemplate::new(self.path_url_format.clone())?;
    let strategy = self.strategy();
    let whitelist = DomainWhitelist::from_list(&self.bundle_domains);
    let executable_extensions = self
      .executable_extensions
      .iter()
      .map(|value| value.trim().to_ascii_lowercase())
      .filter(|value| !value.is_empty())
      .collect();

    Ok(CompositeSettings {
      enable_css_minify: self.enable_css_minify,
      enable_js_minify: self.enable_js_minify,
      persist_files: self.persist_files,
      strategy,
      path_format,
      composite_file_path: PathBuf::from(self.composite_file_path),
      whitelist,
      handler_path: self.handler_path,
      max_url_length: self.max_url_length,
      version: self.version,
      executable_extensions,
    })
  }
}

/// Validated, read-only configuration shared by every request.
#[derive(Debug, Clone)]
pub struct CompositeSettings {
  /// Minify stylesheets before combining.
  pub enable_css_minify: bool,
  /// Minify scripts before combining.
  pub enable_js_minify: bool,
  /// Persist combined output to disk.
  pub persist_files: bool,
  /// URL key strategy for this deployment.
  pub strategy: UrlKeyStrategy,
  /// Template for path based URLs.
  pub path_format: PathFormatTemplate,
  /// Root directory for persisted composite files.
  pub composite_file_path: PathBuf,
  /// Domains approved for bundling.
  pub whitelist: DomainWhitelist,
  /// Base path of the composite handler.
  pub handler_path: String,
  /// Upper bound for generated URL length.
  pub max_url_length: usize,
  /// Cache-busting version.
  pub version: u32,
  /// Lower-cased suffixes of server-rendered resources.
  pub executable_extensions: Vec<String>,
}

impl CompositeSettings {
  /// URL builder using the configured template.
  pub fn url_builder(&self) -> CompositeUrlBuilder<'_> {
    CompositeUrlBuilder::new(&self.path_format)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::models::EncodedUrlForm;
  use tempfile::tempdir;

  #[test]
  fn defaults_validate() {
    let settings = CompositeConfig::default().into_settings().unwrap();
    assert_eq!(
      settings.strategy,
      UrlKeyStrategy::EncodedPathList(EncodedUrlForm::QueryString)
    );
    assert!(settings.whitelist.is_empty());
    assert_eq!(settings.executable_extensions, vec![".aspx", ".ashx"]);
  }

  #[test]
  fn unknown_url_type_falls_back_to_default() {
    let config = CompositeConfig {
      url_type: "Carrier Pigeon".into(),
      ..CompositeConfig::default()
    };
    assert_eq!(config.strategy(), UrlKeyStrategy::default());
  }

  #[test]
  fn invalid_template_fails_fast() {
    let config = CompositeConfig {
      path_url_format: "{dependencyId}/{type}".into(),
      ..CompositeConfig::default()
    };
    assert!(matches!(
      config.into_settings(),
      Err(ConfigurationError::MissingToken { .. })
    ));
  }

  #[test]
  fn discover_returns_default_for_missing_file() {
    let temp = tempdir().expect("failed to create temp dir");
    let config = CompositeConfig::discover(temp.path());
    assert_eq!(config.handler_path, "/DependencyHandler.axd");
  }

  #[test]
  fn discover_falls_back_on_parse_errors() {
    let temp = tempdir().expect("failed to create temp dir");
    fs::write(temp.path().join(DEFAULT_CONFIG_FILE), "{ not json").unwrap();

    let config = CompositeConfig::discover(temp.path());
    assert_eq!(config.max_url_length, 2048);
    assert!(matches!(
      CompositeConfig::load(&temp.path().join(DEFAULT_CONFIG_FILE)),
      Err(ConfigurationError::Parse { .. })
    ));
  }

  #[test]
  fn load_reads_camel_case_options() {
    let temp = tempdir().expect("failed to create temp dir");
    let path = temp.path().join(DEFAULT_CONFIG_FILE);
    fs::write(
      &path,
      r#"{
        "urlType": "Base64Paths",
        "pathUrlFormat": "{dependencyId}.{version}.{type}",
        "bundleDomains": "google.com, cdn.example.com:8080",
        "enableJsMinify": false,
        "version": 42
      }"#,
    )
    .unwrap();

    let settings = CompositeConfig::load(&path).unwrap().into_settings().unwrap();
    assert_eq!(
      settings.strategy,
      UrlKeyStrategy::EncodedPathList(EncodedUrlForm::PathSegments)
    );
    assert_eq!(settings.path_format.as_str(), "{dependencyId}.{version}.{type}");
    assert!(settings.whitelist.matches("maps.google.com", 80));
    assert!(settings.whitelist.matches("cdn.example.com", 8080));
    assert!(!settings.enable_js_minify);
    assert!(settings.enable_css_minify);
    assert_eq!(settings.version, 42);
  }
}
