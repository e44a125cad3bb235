//! Approved domains for pulling remote resources into a bundle.

use std::collections::BTreeSet;
use std::fmt;

use tracing::{debug, warn};

use crate::error::ConfigurationError;

/// Port assumed when a configured domain does not name one.
pub const DEFAULT_PORT: u16 = 80;

/// Normalised domain suffix of the form `.<host>:<port>`.
///
/// The leading dot keeps suffix matching on label boundaries, so `.google.com:80` accepts
/// `maps.google.com` but not `roguegoogle.com`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WhitelistEntry(String);

impl WhitelistEntry {
  /// Normalise a raw configured domain.
  ///
  /// The value is trimmed and lower-cased, `:80` is appended when no port is given and a
  /// leading `.` is prepended when missing.
  pub fn normalize(raw: &str) -> Result<Self, ConfigurationError> {
    let invalid = |reason| ConfigurationError::InvalidDomain {
      raw: raw.to_string(),
      reason,
    };

    let mut value = raw.trim().to_ascii_lowercase();
    if value.trim_matches('.').is_empty() {
      return Err(invalid("domain is empty"));
    }

    match value.matches(':').count() {
      0 => value.push_str(&format!(":{DEFAULT_PORT}")),
      1 => {
        let (host, port) = value.split_once(':').unwrap_or_default();
        if host.trim_matches('.').is_empty() {
          return Err(invalid("domain is empty"));
        }
        if port.parse::<u16>().is_err() {
          return Err(invalid("port is not a number"));
        }
      }
      _ => return Err(invalid("domain contains more than one `:`")),
    }

    if !value.starts_with('.') {
      value.insert(0, '.');
    }

    Ok(Self(value))
  }

  /// Normalised representation.
  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for WhitelistEntry {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// Set of approved domain suffixes. Empty means every remote domain is denied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DomainWhitelist {
  entries: BTreeSet<WhitelistEntry>,
}

impl DomainWhitelist {
  /// Build a whitelist from already normalised entries.
  pub fn new(entries: impl IntoIterator<Item = WhitelistEntry>) -> Self {
    Self {
      entries: entries.into_iter().collect(),
    }
  }

  /// Parse a comma separated domain list, skipping blank and invalid values.
  pub fn from_list(raw: &str) -> Self {
    let entries = raw
      .split(',')
      .filter(|value| !value.trim().is_empty())
      .filter_map(|value| match WhitelistEntry::normalize(value) {
        Ok(entry) => Some(entry),
        Err(err) => {
          warn!(domain = value.trim(), "skipping bundle domain: {err}");
          None
        }
      });
    Self::new(entries)
  }

  /// Returns `true` when there are no approved domains.
  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  /// Approved entries in sorted order.
  pub fn entries(&self) -> impl Iterator<Item = &WhitelistEntry> {
    self.entries.iter()
  }

  /// Determine whether `host:port` falls under an approved domain.
  ///
  /// Matching is a plain string suffix test on `.<host>:<port>`. Hosts that are not plain
  /// DNS names (empty, trailing dot, characters outside letters, digits, `-` and `.`) are
  /// refused before the suffix test.
  pub fn matches(&self, host: &str, port: u16) -> bool {
    if self.entries.is_empty() {
      return false;
    }

    if !is_plain_host(host) {
      debug!(host, "refusing to match host with unexpected characters");
      return false;
    }

    let candidate = format!(".{}:{}", host.to_ascii_lowercase(), port);
    self
      .entries
      .iter()
      .any(|entry| candidate.ends_with(entry.as_str()))
  }
}

fn is_plain_host(host: &str) -> bool {
  !host.is_empty()
    && !host.ends_with('.')
    && host
      .chars()
      .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn normalises_bare_domains() {
    let entry = WhitelistEntry::normalize("  Google.com ").unwrap();
    assert_eq!(entry.as_str(), ".google.com:80");
  }

  #[test]
  fn keeps_explicit_ports_and_leading_dots() {
    assert_eq!(
      WhitelistEntry::normalize(".cdn.example.com:8080")
        .unwrap()
        .as_str(),
      ".cdn.example.com:8080"
    );
  }

  #[test]
  fn rejects_unusable_domains() {
    assert!(WhitelistEntry::normalize("").is_err());
    assert!(WhitelistEntry::normalize(" . ").is_err());
    assert!(WhitelistEntry::normalize(":443").is_err());
    assert!(WhitelistEntry::normalize("example.com:https").is_err());
    assert!(WhitelistEntry::normalize("[::1]:80").is_err());
  }

  #[test]
  fn every_entry_has_leading_dot_and_single_colon() {
    let whitelist = DomainWhitelist::from_list("a.com, .b.org:81 ,c.net:443,, bad:port:1");
    let entries: Vec<&str> = whitelist.entries().map(WhitelistEntry::as_str).collect();

    assert_eq!(entries, vec![".a.com:80", ".b.org:81", ".c.net:443"]);
    for entry in entries {
      assert!(entry.starts_with('.'));
      assert_eq!(entry.matches(':').count(), 1);
    }
  }

  #[test]
  fn matches_subdomains_only_on_label_boundaries() {
    let whitelist = DomainWhitelist::from_list("google.com");

    assert!(whitelist.matches("maps.google.com", 80));
    assert!(whitelist.matches("google.com", 80));
    assert!(whitelist.matches("MAPS.Google.com", 80));
    assert!(!whitelist.matches("roguegoogle.com", 80));
    assert!(!whitelist.matches("maps.google.com", 443));
  }

  #[test]
  fn empty_whitelist_denies_everything() {
    let whitelist = DomainWhitelist::default();
    assert!(whitelist.is_empty());
    assert!(!whitelist.matches("example.com", 80));
    assert!(!whitelist.matches("localhost", 8080));
  }

  #[test]
  fn refuses_crafted_hosts() {
    let whitelist = DomainWhitelist::from_list("google.com");
    assert!(!whitelist.matches("", 80));
    assert!(!whitelist.matches("evil.com/.google.com", 80));
    assert!(!whitelist.matches("maps.google.com.", 80));
    assert!(!whitelist.matches("evil.com:80@.google.com", 80));
  }
}
