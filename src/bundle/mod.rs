//! Helpers for pulling referenced resources into combined output and storing the result.

pub mod backend;
pub mod css;
pub mod fetch;

pub use backend::{
  BackendRegistry, CompositeBackend, ContentEncoding, FileSystemBackend, InMemoryBackend,
};
pub use css::{InlinedStylesheet, collect_url_references, inline_imports, rewrite_relative_urls};
pub use fetch::{
  FetchContext, HttpFetcher, RemoteFetcher, ResourceExecutor, ResourceFetchGuard,
  strip_byte_order_mark,
};
