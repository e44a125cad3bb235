#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

pub mod bundle;
pub mod config;
pub mod error;
pub mod file_map;
pub mod models;
pub mod url_keys;
pub mod whitelist;

pub use config::{CompositeConfig, CompositeSettings};
pub use error::{BoxError, BuildError, ConfigurationError, DecodeError, FetchError};
pub use file_map::InMemoryFileMap;
pub use models::{CompositeUrlRequest, Dependency, DependencyType, EncodedUrlForm, UrlKeyStrategy};
pub use url_keys::{CompositeUrlBuilder, FileMapProvider, PathFormatTemplate};
pub use whitelist::{DomainWhitelist, WhitelistEntry};
