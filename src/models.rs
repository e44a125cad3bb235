//! Data structures describing dependencies and composite URL requests.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::CompositeSettings;

/// Kind of asset a dependency refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
pub enum DependencyType {
  /// Stylesheet.
  Css,
  /// Script.
  Javascript,
}

impl DependencyType {
  /// Name used for the `t` query-string parameter.
  pub fn name(self) -> &'static str {
    match self {
      Self::Css => "Css",
      Self::Javascript => "Javascript",
    }
  }

  /// File extension used for the `{type}` token of path based URLs.
  pub fn extension(self) -> &'static str {
    match self {
      Self::Css => "css",
      Self::Javascript => "js",
    }
  }
}

impl fmt::Display for DependencyType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

impl FromStr for DependencyType {
  type Err = String;

  fn from_str(value: &str) -> Result<Self, Self::Err> {
    match value.trim().to_ascii_lowercase().as_str() {
      "css" => Ok(Self::Css),
      "js" | "javascript" => Ok(Self::Javascript),
      other => Err(format!("unknown dependency type `{other}`")),
    }
  }
}

/// Single CSS or JavaScript asset requested for bundling.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Dependency {
  /// Path of the asset as referenced by the page.
  pub path: String,
  /// Kind of asset.
  pub dependency_type: DependencyType,
}

impl Dependency {
  /// Create a dependency of the given type.
  pub fn new(path: impl Into<String>, dependency_type: DependencyType) -> Self {
    Self {
      path: path.into(),
      dependency_type,
    }
  }

  /// Stylesheet dependency.
  pub fn css(path: impl Into<String>) -> Self {
    Self::new(path, DependencyType::Css)
  }

  /// Script dependency.
  pub fn js(path: impl Into<String>) -> Self {
    Self::new(path, DependencyType::Javascript)
  }
}

/// Shape of an encoded path list inside the URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EncodedUrlForm {
  /// `<handler>?s=<token>&t=<type>&cdv=<version>`
  #[default]
  QueryString,
  /// `<handler>/<rendered path template>`
  PathSegments,
}

/// How a dependency set is turned into a URL key. Chosen once per deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlKeyStrategy {
  /// The set is replaced by a key issued by a file map.
  OpaqueId,
  /// The paths themselves are encoded into the URL.
  EncodedPathList(EncodedUrlForm),
}

impl Default for UrlKeyStrategy {
  fn default() -> Self {
    Self::EncodedPathList(EncodedUrlForm::QueryString)
  }
}

impl UrlKeyStrategy {
  /// Parse a configured `urlType` value.
  ///
  /// Accepts the historical names (`Base64QueryStrings`, `Base64Paths`, `MappedId`) as well
  /// as the descriptive ones, ignoring case.
  pub fn parse(value: &str) -> Option<Self> {
    match value.trim().to_ascii_lowercase().as_str() {
      "base64querystrings" | "querystring" => {
        Some(Self::EncodedPathList(EncodedUrlForm::QueryString))
      }
      "base64paths" | "pathsegments" => Some(Self::EncodedPathList(EncodedUrlForm::PathSegments)),
      "mappedid" | "opaqueid" => Some(Self::OpaqueId),
      _ => None,
    }
  }
}

/// Inputs for a single composite URL build. Created per render pass and consumed once.
#[derive(Debug, Clone)]
pub struct CompositeUrlRequest {
  /// Dependencies in the order they must be served.
  pub dependencies: Vec<Dependency>,
  /// Kind of assets in this request.
  pub dependency_type: DependencyType,
  /// Cache-busting version.
  pub version: u32,
  /// Base path of the handler that serves composite files.
  pub handler_base_path: String,
  /// Upper bound for the projected length of every produced URL.
  pub max_url_length: usize,
}

impl CompositeUrlRequest {
  /// Build a request using the handler path, version and length limit from the settings.
  pub fn from_settings(
    settings: &CompositeSettings,
    dependency_type: DependencyType,
    dependencies: Vec<Dependency>,
  ) -> Self {
    Self {
      dependencies,
      dependency_type,
      version: settings.version,
      handler_base_path: settings.handler_path.clone(),
      max_url_length: settings.max_url_length,
    }
  }
}
