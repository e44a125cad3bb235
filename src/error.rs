//! Error taxonomy shared by the URL builder, the whitelist and the fetch guard.

use std::path::PathBuf;

use thiserror::Error;

/// Boxed failure reported by external collaborators (file maps, executors, fetchers).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Invalid configuration detected while settings are being loaded.
#[derive(Debug, Error)]
pub enum ConfigurationError {
  /// The path template omits one of the required tokens.
  #[error("path url format `{template}` is missing the `{token}` token")]
  MissingToken {
    /// Template as supplied by the configuration.
    template: String,
    /// Token that could not be found.
    token: &'static str,
  },
  /// A bundle domain could not be normalised into a whitelist entry.
  #[error("invalid bundle domain `{raw}`: {reason}")]
  InvalidDomain {
    /// Raw value from the configuration.
    raw: String,
    /// Explanation of what is wrong with the value.
    reason: &'static str,
  },
  /// Failed to read the configuration file from disk.
  #[error("failed to read {}: {source}", .path.display())]
  Io {
    /// Path that caused the error.
    path: PathBuf,
    /// Source I/O error.
    source: std::io::Error,
  },
  /// Failed to parse the JSON configuration file.
  #[error("failed to parse {}: {source}", .path.display())]
  Parse {
    /// Path that caused the error.
    path: PathBuf,
    /// Source parse error.
    source: serde_json::Error,
  },
}

/// Failure to turn a transport token back into dependency paths.
#[derive(Debug, Error)]
pub enum DecodeError {
  /// Token is not valid URL-safe base64.
  #[error("token is not valid url-safe base64: {0}")]
  Base64(#[from] base64::DecodeError),
  /// Decoded bytes are not UTF-8.
  #[error("decoded token is not valid utf-8: {0}")]
  Utf8(#[from] std::string::FromUtf8Error),
}

/// Failure while building composite URLs.
#[derive(Debug, Error)]
pub enum BuildError {
  /// The opaque-id strategy was selected without a file map.
  #[error("the opaque id strategy requires a file map provider")]
  MissingMapProvider,
  /// The file map could not hand out a key.
  #[error("file map failed to create a key: {source}")]
  FileMap {
    /// Error reported by the provider.
    source: BoxError,
  },
}

/// Outcome of a rejected or failed sub-resource resolution.
///
/// None of these abort a batch; the caller skips the reference and carries on.
#[derive(Debug, Error)]
pub enum FetchError {
  /// The reference could not be parsed as a relative or absolute http(s) URL.
  #[error("malformed reference `{reference}`: {reason}")]
  Malformed {
    /// Reference as it appeared in the content.
    reference: String,
    /// Why parsing failed.
    reason: String,
  },
  /// Rendering a server-executable resource failed.
  #[error("executing `{reference}` failed: {source}")]
  ExecutionFailed {
    /// Reference as it appeared in the content.
    reference: String,
    /// Error reported by the executor.
    source: BoxError,
  },
  /// Transferring a trusted resource failed.
  #[error("fetching `{reference}` failed: {source}")]
  FetchFailed {
    /// Reference as it appeared in the content.
    reference: String,
    /// Error reported by the fetcher.
    source: BoxError,
  },
  /// The resource lives on a domain that is not approved for bundling.
  #[error("`{reference}` is not on a whitelisted domain ({authority})")]
  NotWhitelisted {
    /// Reference as it appeared in the content.
    reference: String,
    /// `host:port` that failed the whitelist check.
    authority: String,
  },
}

impl FetchError {
  /// Reference string the error was raised for.
  pub fn reference(&self) -> &str {
    match self {
      Self::Malformed { reference, .. }
      | Self::ExecutionFailed { reference, .. }
      | Self::FetchFailed { reference, .. }
      | Self::NotWhitelisted { reference, .. } => reference,
    }
  }
}
