//! Stylesheet helpers for combining CSS served from a different path than its source.

use std::sync::OnceLock;

use regex::{Captures, Regex};
use tracing::debug;
use url::Url;

use crate::bundle::fetch::{FetchContext, ResourceFetchGuard};
use crate::error::FetchError;

fn url_pattern() -> &'static Regex {
  static PATTERN: OnceLock<Regex> = OnceLock::new();
  PATTERN.get_or_init(|| {
    Regex::new(r#"(?i)url\(\s*(?:"([^"]*)"|'([^']*)'|([^'")\s]*))\s*\)"#)
      .expect("invalid css url regex")
  })
}

fn import_pattern() -> &'static Regex {
  static PATTERN: OnceLock<Regex> = OnceLock::new();
  PATTERN.get_or_init(|| {
    Regex::new(
      r#"(?i)@import\s+(?:url\(\s*(?:"([^"]*)"|'([^']*)'|([^'")\s]*))\s*\)|"([^"]*)"|'([^']*)')\s*([^;]*);"#,
    )
    .expect("invalid css import regex")
  })
}

/// First non-empty capture among the alternatives of a quoted/unquoted value.
fn captured_value<'t>(captures: &Captures<'t>, groups: &[usize]) -> Option<&'t str> {
  groups
    .iter()
    .find_map(|index| captures.get(*index))
    .map(|value| value.as_str().trim())
    .filter(|value| !value.is_empty())
}

/// References that point at content rather than at a location.
fn is_inline_reference(value: &str) -> bool {
  let lower = value.to_ascii_lowercase();
  lower.starts_with("data:") || lower.starts_with('#') || lower.starts_with("about:")
}

/// Collect the targets of every `url(...)` in the stylesheet, in document order.
pub fn collect_url_references(css: &str) -> Vec<String> {
  url_pattern()
    .captures_iter(css)
    .filter_map(|captures| captured_value(&captures, &[1, 2, 3]))
    .map(str::to_string)
    .collect()
}

/// Rewrite relative `url(...)` references so they resolve from the combined file.
///
/// Once combined, a stylesheet is served from the handler path at `serving_url` instead of
/// its own location, so `url(img/a.png)` must become `url(/css/img/a.png)`. When the
/// stylesheet lives on another origin than `serving_url`, relative and root-relative
/// references are written out as full URLs on the stylesheet's origin. Absolute URLs,
/// scheme-relative references and inline data are left alone.
pub fn rewrite_relative_urls(css: &str, stylesheet_url: &Url, serving_url: &Url) -> String {
  let same_origin = stylesheet_url.origin() == serving_url.origin();

  url_pattern()
    .replace_all(css, |captures: &Captures| {
      let original = captures[0].to_string();
      let Some(value) = captured_value(captures, &[1, 2, 3]) else {
        return original;
      };
      let root_relative = value.starts_with('/') || value.starts_with('\\');
      if is_inline_reference(value)
        || Url::parse(value).is_ok()
        || value.starts_with("//")
        || (root_relative && same_origin)
      {
        return original;
      }

      match stylesheet_url.join(value) {
        Ok(resolved) if resolved.origin() != serving_url.origin() => format!("url({resolved})"),
        Ok(resolved) => {
          let mut rewritten = resolved.path().to_string();
          if let Some(query) = resolved.query() {
            rewritten.push('?');
            rewritten.push_str(query);
          }
          if let Some(fragment) = resolved.fragment() {
            rewritten.push('#');
            rewritten.push_str(fragment);
          }
          format!("url({rewritten})")
        }
        Err(err) => {
          debug!(reference = value, %err, "leaving unresolvable css url untouched");
          original
        }
      }
    })
    .into_owned()
}

/// Result of inlining `@import` statements.
#[derive(Debug)]
pub struct InlinedStylesheet {
  /// Stylesheet with every permitted import replaced by its content.
  pub css: String,
  /// References that were left in place, with the reason.
  pub skipped: Vec<FetchError>,
}

/// Replace `@import` statements with the content they point at.
///
/// Each import is resolved through the guard independently. Imports carrying a media query,
/// rejected by the whitelist or failing to transfer keep their original statement, and the
/// failure is reported in [`InlinedStylesheet::skipped`].
pub fn inline_imports(
  css: &str,
  guard: &ResourceFetchGuard<'_>,
  context: &FetchContext,
) -> InlinedStylesheet {
  let mut skipped = Vec::new();

  let inlined = import_pattern()
    .replace_all(css, |captures: &Captures| {
      let original = captures[0].to_string();
      let Some(reference) = captured_value(captures, &[1, 2, 3, 4, 5]) else {
        return original;
      };
      let media = captures.get(6).map_or("", |value| value.as_str().trim());
      if !media.is_empty() {
        debug!(reference, media, "keeping @import with media query");
        return original;
      }

      match guard.resolve(reference, context) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(err) => {
          skipped.push(err);
          original
        }
      }
    })
    .into_owned();

  InlinedStylesheet {
    css: inlined,
    skipped,
  }
}
