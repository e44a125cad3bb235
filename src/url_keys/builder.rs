use tracing::{debug, warn};
use url::form_urlencoded::byte_serialize;

use crate::error::{BoxError, BuildError};
use crate::models::{CompositeUrlRequest, Dependency, DependencyType, EncodedUrlForm, UrlKeyStrategy};
use crate::url_keys::codec::encode_paths;
use crate::url_keys::template::PathFormatTemplate;

/// Fixed allowance for separators and parameter names in the projected URL length.
pub const URL_LENGTH_OVERHEAD: usize = 10;

/// Query-string parameter carrying the encoded paths or the opaque key.
pub const SOURCE_PARAM: &str = "s";
/// Query-string parameter carrying the dependency type.
pub const TYPE_PARAM: &str = "t";
/// Query-string parameter carrying the cache-busting version.
pub const VERSION_PARAM: &str = "cdv";

/// Store that replaces a dependency set with a short opaque key.
///
/// Identical sets should map to identical keys so the resulting URLs stay cacheable, but
/// the builder does not rely on it.
pub trait FileMapProvider: Send + Sync {
    /// Return the key for the dependency set at the given version.
    fn create_key(&self, dependencies: &[Dependency], version: u32) -> Result<String, BoxError>;
}

/// Turns a dependency list into one or more composite URLs.
#[derive(Clone, Copy)]
pub struct CompositeUrlBuilder<'a> {
    template: &'a PathFormatTemplate,
    map_provider: Option<&'a dyn FileMapProvider>,
}

impl<'a> CompositeUrlBuilder<'a> {
    /// Create a builder rendering path based URLs with the given template.
    pub fn new(template: &'a PathFormatTemplate) -> Self {
        Self {
            template,
            map_provider: None,
        }
    }

    /// Attach the file map used by [`UrlKeyStrategy::OpaqueId`].
    pub fn with_map_provider(mut self, provider: &'a dyn FileMapProvider) -> Self {
        self.map_provider = Some(provider);
        self
    }

    /// Produce the URLs for `request`, in dependency order.
    ///
    /// An empty dependency list yields no URLs.
    pub fn build(
        &self,
        request: &CompositeUrlRequest,
        strategy: UrlKeyStrategy,
    ) -> Result<Vec<String>, BuildError> {
        if request.dependencies.is_empty() {
            return Ok(Vec::new());
        }

        match strategy {
            UrlKeyStrategy::OpaqueId => self.build_opaque(request).map(|url| vec![url]),
            UrlKeyStrategy::EncodedPathList(form) => Ok(self.build_encoded(request, form)),
        }
    }

    fn build_opaque(&self, request: &CompositeUrlRequest) -> Result<String, BuildError> {
        let provider = self.map_provider.ok_or(BuildError::MissingMapProvider)?;
        let key = provider
            .create_key(&request.dependencies, request.version)
            .map_err(|source| BuildError::FileMap { source })?;

        Ok(self.path_url(
            &request.handler_base_path,
            &key,
            request.version,
            request.dependency_type,
        ))
    }

    fn build_encoded(&self, request: &CompositeUrlRequest, form: EncodedUrlForm) -> Vec<String> {
        partition_dependencies(request)
            .into_iter()
            .map(|bucket| {
                let token = encode_paths(&bucket);
                match form {
                    EncodedUrlForm::QueryString => query_string_url(
                        &request.handler_base_path,
                        &token,
                        request.version,
                        request.dependency_type,
                    ),
                    EncodedUrlForm::PathSegments => self.path_url(
                        &request.handler_base_path,
                        &token,
                        request.version,
                        request.dependency_type,
                    ),
                }
            })
            .collect()
    }

    fn path_url(
        &self,
        handler: &str,
        dependency_id: &str,
        version: u32,
        dependency_type: DependencyType,
    ) -> String {
        let rendered = self
            .template
            .render(dependency_id, version, dependency_type.extension());
        format!(
            "{}/{}",
            handler.trim_end_matches('/'),
            rendered.trim_start_matches('/')
        )
    }
}

fn query_string_url(
    handler: &str,
    token: &str,
    version: u32,
    dependency_type: DependencyType,
) -> String {
    let escaped: String = byte_serialize(token.as_bytes()).collect();
    format!(
        "{handler}?{SOURCE_PARAM}={escaped}&{TYPE_PARAM}={}&{VERSION_PARAM}={version}",
        dependency_type.name()
    )
}

/// Split the request into the fewest contiguous buckets whose projected URL length stays
/// below the limit.
///
/// Each dependency is tentatively appended to the current bucket; if that pushes the
/// projection to or past `max_url_length`, the bucket accumulated so far is closed and the
/// dependency opens the next one. A dependency too long to fit on its own still gets a
/// bucket of its own.
pub fn partition_dependencies(request: &CompositeUrlRequest) -> Vec<Vec<&str>> {
    let fixed = request.handler_base_path.len()
        + request.dependency_type.name().len()
        + digit_count(request.version)
        + URL_LENGTH_OVERHEAD;

    let mut buckets = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for dependency in &request.dependencies {
        current.push(dependency.path.as_str());
        let projected = fixed + encode_paths(&current).len();
        if projected < request.max_url_length {
            continue;
        }

        if current.len() == 1 {
            warn!(
                path = %dependency.path,
                projected,
                max_url_length = request.max_url_length,
                "dependency exceeds the maximum url length on its own"
            );
            buckets.push(std::mem::take(&mut current));
            continue;
        }

        current.pop();
        debug!(
            bucket = buckets.len(),
            size = current.len(),
            "closing composite url bucket"
        );
        buckets.push(std::mem::replace(&mut current, vec![dependency.path.as_str()]));

        let reopened = fixed + encode_paths(&current).len();
        if reopened >= request.max_url_length {
            warn!(
                path = %dependency.path,
                projected = reopened,
                max_url_length = request.max_url_length,
                "dependency exceeds the maximum url length on its own"
            );
            buckets.push(std::mem::take(&mut current));
        }
    }

    if !current.is_empty() {
        buckets.push(current);
    }

    buckets
}

fn digit_count(value: u32) -> usize {
    value.checked_ilog10().map_or(1, |digits| digits as usize + 1)
}
