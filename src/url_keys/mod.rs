//! Composite URL construction and parsing.
//!
//! The responsibilities are split into focused submodules so the token codec, the path
//! template, the bucket builder and the handler-side parser can be tested independently.
//! The builder and parser share the same template and parameter names, so a URL produced
//! on page render always parses back on the handler.

mod builder;
mod codec;
mod parse;
mod template;

pub use builder::{
    CompositeUrlBuilder, FileMapProvider, SOURCE_PARAM, TYPE_PARAM, URL_LENGTH_OVERHEAD,
    VERSION_PARAM, partition_dependencies,
};
pub use codec::{PATH_DELIMITER, decode_paths, encode_paths};
pub use parse::{CompositeKey, DependencyKey, ParseUrlError, parse_composite_url};
pub use template::{DEFAULT_PATH_URL_FORMAT, PathFormatTemplate, TemplateParts};
