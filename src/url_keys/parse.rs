use url::Url;

use crate::config::CompositeSettings;
use crate::error::DecodeError;
use crate::models::{DependencyType, UrlKeyStrategy};
use crate::url_keys::builder::{SOURCE_PARAM, TYPE_PARAM, VERSION_PARAM};
use crate::url_keys::codec::decode_paths;

/// How the dependency set is identified inside a composite URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencyKey {
    /// Paths decoded from the URL itself.
    Paths(Vec<String>),
    /// Key to look up in the file map.
    Opaque(String),
}

/// Everything the handler needs to locate or produce a composite file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositeKey {
    /// Dependency set identifier.
    pub dependencies: DependencyKey,
    /// Kind of assets being combined.
    pub dependency_type: DependencyType,
    /// Cache-busting version requested.
    pub version: u32,
}

/// Reasons a request URL does not describe a composite file.
#[derive(Debug, thiserror::Error)]
pub enum ParseUrlError {
    /// URL does not start with the configured handler path.
    #[error("url is not served by the composite handler")]
    NotHandled,
    /// A required query-string parameter or path component is absent or unreadable.
    #[error("missing or invalid `{0}` component")]
    InvalidComponent(&'static str),
    /// The encoded dependency list could not be decoded.
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// Recover the composite key from a URL produced by
/// [`CompositeUrlBuilder`](crate::url_keys::CompositeUrlBuilder).
///
/// Query-string URLs are recognised regardless of the configured strategy; path URLs are
/// matched against the configured template and interpreted according to the strategy.
pub fn parse_composite_url(
    settings: &CompositeSettings,
    url: &Url,
) -> Result<CompositeKey, ParseUrlError> {
    let handler = settings.handler_path.trim_end_matches('/');
    let remainder = url
        .path()
        .strip_prefix(handler)
        .ok_or(ParseUrlError::NotHandled)?;

    if remainder.is_empty() {
        return parse_query_form(url);
    }
    if !remainder.starts_with('/') {
        return Err(ParseUrlError::NotHandled);
    }

    let parts = settings
        .path_format
        .match_path(remainder)
        .ok_or(ParseUrlError::InvalidComponent("path"))?;
    let dependency_type = parts
        .type_token
        .parse::<DependencyType>()
        .map_err(|_| ParseUrlError::InvalidComponent("type"))?;
    let version = parts
        .version
        .parse::<u32>()
        .map_err(|_| ParseUrlError::InvalidComponent("version"))?;

    let dependencies = match settings.strategy {
        UrlKeyStrategy::OpaqueId => DependencyKey::Opaque(parts.dependency_id),
        UrlKeyStrategy::EncodedPathList(_) => {
            DependencyKey::Paths(decode_paths(&parts.dependency_id)?)
        }
    };

    Ok(CompositeKey {
        dependencies,
        dependency_type,
        version,
    })
}

fn parse_query_form(url: &Url) -> Result<CompositeKey, ParseUrlError> {
    let mut source = None;
    let mut dependency_type = None;
    let mut version = None;

    for (name, value) in url.query_pairs() {
        match &*name {
            SOURCE_PARAM => source = Some(value.into_owned()),
            TYPE_PARAM => dependency_type = value.parse::<DependencyType>().ok(),
            VERSION_PARAM => version = value.parse::<u32>().ok(),
            _ => {}
        }
    }

    let source = source.ok_or(ParseUrlError::InvalidComponent(SOURCE_PARAM))?;
    Ok(CompositeKey {
        dependencies: DependencyKey::Paths(decode_paths(&source)?),
        dependency_type: dependency_type.ok_or(ParseUrlError::InvalidComponent(TYPE_PARAM))?,
        version: version.ok_or(ParseUrlError::InvalidComponent(VERSION_PARAM))?,
    })
}
