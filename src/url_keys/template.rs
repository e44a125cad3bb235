use std::fmt;

use regex::Regex;

use crate::error::ConfigurationError;

/// Token replaced by the encoded path list or the opaque key.
pub const DEPENDENCY_ID_TOKEN: &str = "{dependencyId}";
/// Token replaced by the cache-busting version.
pub const VERSION_TOKEN: &str = "{version}";
/// Token replaced by the dependency type extension.
pub const TYPE_TOKEN: &str = "{type}";

/// Template used when the configuration does not provide one.
pub const DEFAULT_PATH_URL_FORMAT: &str = "{dependencyId}/{version}/{type}";

const REQUIRED_TOKENS: [&str; 3] = [DEPENDENCY_ID_TOKEN, VERSION_TOKEN, TYPE_TOKEN];

/// Validated template for path based composite URLs.
///
/// Validation happens once in [`PathFormatTemplate::new`]; rendering is plain substitution
/// and cannot fail. Tokens other than the three known ones are left in place.
#[derive(Clone)]
pub struct PathFormatTemplate {
    template: String,
    pattern: Regex,
}

/// Components recovered from a rendered template path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateParts {
    /// Value that was substituted for `{dependencyId}`.
    pub dependency_id: String,
    /// Value that was substituted for `{version}`.
    pub version: String,
    /// Value that was substituted for `{type}`.
    pub type_token: String,
}

impl PathFormatTemplate {
    /// Accept a template, failing when any required token is missing.
    pub fn new(template: impl Into<String>) -> Result<Self, ConfigurationError> {
        let template = template.into();
        if let Some(token) = REQUIRED_TOKENS
            .iter()
            .find(|token| !template.contains(**token))
        {
            return Err(ConfigurationError::MissingToken {
                template,
                token: *token,
            });
        }

        let pattern = compile_pattern(&template);
        Ok(Self { template, pattern })
    }

    /// Raw template string.
    pub fn as_str(&self) -> &str {
        &self.template
    }

    /// Substitute the three tokens.
    pub fn render(&self, dependency_id: &str, version: u32, type_token: &str) -> String {
        self.template
            .replace(DEPENDENCY_ID_TOKEN, dependency_id)
            .replace(VERSION_TOKEN, &version.to_string())
            .replace(TYPE_TOKEN, type_token)
    }

    /// Reverse [`render`](Self::render) for a path relative to the handler.
    pub fn match_path(&self, path: &str) -> Option<TemplateParts> {
        let captures = self.pattern.captures(path.trim_start_matches('/'))?;
        Some(TemplateParts {
            dependency_id: captures.name("dependency_id")?.as_str().to_string(),
            version: captures.name("version")?.as_str().to_string(),
            type_token: captures.name("type_token")?.as_str().to_string(),
        })
    }
}

impl Default for PathFormatTemplate {
    fn default() -> Self {
        Self {
            template: DEFAULT_PATH_URL_FORMAT.to_string(),
            pattern: compile_pattern(DEFAULT_PATH_URL_FORMAT),
        }
    }
}

impl fmt::Debug for PathFormatTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PathFormatTemplate")
            .field(&self.template)
            .finish()
    }
}

impl PartialEq for PathFormatTemplate {
    fn eq(&self, other: &Self) -> bool {
        self.template == other.template
    }
}

/// Build an anchored regex where each token becomes a named group and everything else is
/// matched literally. Repeated tokens match the same character class without capturing.
fn compile_pattern(template: &str) -> Regex {
    let token_pattern = Regex::new(r"\{dependencyId\}|\{version\}|\{type\}")
        .expect("invalid template token regex");

    let mut pattern = String::from("^");
    let mut seen = Vec::new();
    let mut last = 0;
    for token in token_pattern.find_iter(template) {
        pattern.push_str(&regex::escape(&template[last..token.start()]));
        let (group, class) = match token.as_str() {
            DEPENDENCY_ID_TOKEN => ("dependency_id", "[A-Za-z0-9_-]+"),
            VERSION_TOKEN => ("version", "[0-9]+"),
            _ => ("type_token", "[A-Za-z]+"),
        };
        if seen.contains(&group) {
            pattern.push_str(&format!("(?:{class})"));
        } else {
            pattern.push_str(&format!("(?P<{group}>{class})"));
            seen.push(group);
        }
        last = token.end();
    }
    pattern.push_str(&regex::escape(&template[last..]));
    pattern.push('$');

    Regex::new(&pattern).expect("escaped template always forms a valid regex")
}
