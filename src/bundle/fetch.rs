//! Decide whether, and how, a referenced resource may be pulled into a bundle.

use std::io::Read;
use std::time::Duration;

use tracing::{debug, warn};
use url::{ParseError, Url};

use crate::config::CompositeSettings;
use crate::error::{BoxError, FetchError};
use crate::whitelist::DomainWhitelist;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Renders a server-executable resource in-process.
pub trait ResourceExecutor: Send + Sync {
  /// Execute the resource at `path` and return its output.
  fn execute(&self, path: &str) -> Result<Vec<u8>, BoxError>;
}

/// Retrieves the bytes behind an absolute URL.
pub trait RemoteFetcher: Send + Sync {
  /// Fetch `url`. Implementations are expected to bound their own latency.
  fn fetch(&self, url: &Url) -> Result<Vec<u8>, BoxError>;
}

/// Blocking HTTP fetcher with a per-request timeout and a response size cap.
///
/// Redirects are never followed. The guard only vets the URL it was asked for, so a
/// whitelisted host answering with a redirect is reported as a failed transfer instead of
/// pulling content from wherever the `Location` header points.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
  client: reqwest::blocking::Client,
  max_body_bytes: u64,
}

impl HttpFetcher {
  /// Timeout applied by [`HttpFetcher::new`].
  pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

  /// Largest response body accepted by default.
  pub const DEFAULT_MAX_BODY_BYTES: u64 = 8 * 1024 * 1024;

  /// Create a fetcher with the default timeout.
  pub fn new() -> Result<Self, BoxError> {
    Self::with_timeout(Self::DEFAULT_TIMEOUT)
  }

  /// Create a fetcher that gives up after `timeout`.
  pub fn with_timeout(timeout: Duration) -> Result<Self, BoxError> {
    let client = reqwest::blocking::Client::builder()
      .timeout(timeout)
      .redirect(reqwest::redirect::Policy::none())
      .build()?;
    Ok(Self {
      client,
      max_body_bytes: Self::DEFAULT_MAX_BODY_BYTES,
    })
  }

  /// Refuse response bodies larger than `limit` bytes.
  pub fn with_max_body_bytes(mut self, limit: u64) -> Self {
    self.max_body_bytes = limit;
    self
  }
}

impl RemoteFetcher for HttpFetcher {
  fn fetch(&self, url: &Url) -> Result<Vec<u8>, BoxError> {
    let response = self.client.get(url.as_str()).send()?;
    let status = response.status();
    if !status.is_success() {
      return Err(format!("unexpected status {status} from {url}").into());
    }
    if response
      .content_length()
      .is_some_and(|length| length > self.max_body_bytes)
    {
      return Err(body_too_large(self.max_body_bytes));
    }
    read_bounded(response, self.max_body_bytes)
  }
}

/// Read `reader` to the end, failing once more than `limit` bytes arrive.
fn read_bounded(reader: impl Read, limit: u64) -> Result<Vec<u8>, BoxError> {
  let mut body = Vec::new();
  reader.take(limit.saturating_add(1)).read_to_end(&mut body)?;
  if body.len() as u64 > limit {
    return Err(body_too_large(limit));
  }
  Ok(body)
}

fn body_too_large(limit: u64) -> BoxError {
  format!("response body exceeds {limit} bytes").into()
}

/// Request-scoped information used to resolve relative references.
#[derive(Debug, Clone)]
pub struct FetchContext {
  /// URL of the document the reference appeared in.
  pub base_url: Url,
}

impl FetchContext {
  /// Context for references found in the document at `base_url`.
  pub fn new(base_url: Url) -> Self {
    Self { base_url }
  }
}

/// Guards the retrieval of sub-resources referenced from bundled content.
///
/// Relative references to server-executable resources are rendered through the executor.
/// Relative references under the handler path are the system's own assets and always
/// trusted. Everything else is fetched only when its host passes the whitelist.
///
/// A reference only counts as relative when it carries no authority of its own and stays
/// on the origin of the document it came from. Scheme-relative forms such as
/// `//host/path` or `\\host\path` are treated as absolute.
#[derive(Clone, Copy)]
pub struct ResourceFetchGuard<'a> {
  whitelist: &'a DomainWhitelist,
  handler_path: &'a str,
  executable_extensions: &'a [String],
  executor: &'a dyn ResourceExecutor,
  fetcher: &'a dyn RemoteFetcher,
}

enum Classified {
  Relative(Url),
  Absolute(Url),
}

impl<'a> ResourceFetchGuard<'a> {
  /// Create a guard from the shared settings and the two I/O collaborators.
  pub fn new(
    settings: &'a CompositeSettings,
    executor: &'a dyn ResourceExecutor,
    fetcher: &'a dyn RemoteFetcher,
  ) -> Self {
    Self {
      whitelist: &settings.whitelist,
      handler_path: &settings.handler_path,
      executable_extensions: &settings.executable_extensions,
      executor,
      fetcher,
    }
  }

  /// Resolve `reference` into bytes suitable for inlining.
  ///
  /// Every failure is logged with the reference and returned; none of them should abort
  /// the surrounding batch.
  pub fn resolve(&self, reference: &str, context: &FetchContext) -> Result<Vec<u8>, FetchError> {
    let classified = match classify(reference, &context.base_url) {
      Ok(classified) => classified,
      Err(reason) => {
        warn!(reference, %reason, "skipping malformed reference");
        return Err(FetchError::Malformed {
          reference: reference.to_string(),
          reason,
        });
      }
    };

    let (absolute, trusted_locally) = match classified {
      Classified::Relative(absolute) => {
        if self.is_executable(absolute.path()) {
          return self.execute(reference);
        }
        let local = self.is_handler_path(absolute.path());
        (absolute, local)
      }
      Classified::Absolute(absolute) => (absolute, false),
    };

    let host = absolute.host_str().unwrap_or_default();
    let port = absolute.port_or_known_default().unwrap_or(80);
    if !trusted_locally && !self.whitelist.matches(host, port) {
      warn!(
        reference,
        host,
        port,
        "refusing to bundle resource from a domain that is not whitelisted"
      );
      return Err(FetchError::NotWhitelisted {
        reference: reference.to_string(),
        authority: format!("{host}:{port}"),
      });
    }

    debug!(reference, url = %absolute, trusted_locally, "fetching resource for bundling");
    match self.fetcher.fetch(&absolute) {
      Ok(bytes) => Ok(strip_byte_order_mark(bytes)),
      Err(source) => {
        warn!(reference, url = %absolute, error = %source, "failed to transfer resource");
        Err(FetchError::FetchFailed {
          reference: reference.to_string(),
          source,
        })
      }
    }
  }

  fn execute(&self, reference: &str) -> Result<Vec<u8>, FetchError> {
    debug!(reference, "executing server-rendered resource");
    self.executor.execute(reference).map_err(|source| {
      warn!(reference, error = %source, "failed to execute server-rendered resource");
      FetchError::ExecutionFailed {
        reference: reference.to_string(),
        source,
      }
    })
  }

  fn is_executable(&self, path: &str) -> bool {
    let path = path.to_ascii_lowercase();
    self
      .executable_extensions
      .iter()
      .any(|extension| path.ends_with(extension.as_str()))
  }

  fn is_handler_path(&self, path: &str) -> bool {
    let handler = self.handler_path.trim_end_matches('/');
    if handler.is_empty() {
      return false;
    }
    path
      .strip_prefix(handler)
      .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
  }
}

fn classify(reference: &str, base: &Url) -> Result<Classified, String> {
  let trimmed = reference.trim();
  if trimmed.is_empty() {
    return Err("reference is empty".into());
  }

  let url = match Url::parse(trimmed) {
    Ok(url) => url,
    Err(ParseError::RelativeUrlWithoutBase) => {
      let joined = base.join(trimmed).map_err(|err| err.to_string())?;
      if !names_authority(trimmed) && joined.origin() == base.origin() {
        return Ok(Classified::Relative(joined));
      }
      joined
    }
    Err(err) => return Err(err.to_string()),
  };

  if !matches!(url.scheme(), "http" | "https") {
    return Err(format!("unsupported scheme `{}`", url.scheme()));
  }
  if url.host_str().is_none_or(str::is_empty) {
    return Err("absolute url has no host".into());
  }
  Ok(Classified::Absolute(url))
}

/// `true` for scheme-relative references. URL parsing drops tabs and newlines and reads
/// `\\` as `/`, so both are folded the same way here.
fn names_authority(reference: &str) -> bool {
  let leading: Vec<char> = reference
    .chars()
    .filter(|c| !matches!(c, '\t' | '\n' | '\r'))
    .take(2)
    .collect();
  leading.len() == 2 && leading.iter().all(|c| matches!(c, '/' | '\\'))
}

/// Drop a leading UTF-8 byte-order mark so concatenated text does not carry one mid-stream.
pub fn strip_byte_order_mark(bytes: Vec<u8>) -> Vec<u8> {
  match bytes.strip_prefix(UTF8_BOM) {
    Some(rest) => rest.to_vec(),
    None => bytes,
  }
}

#[cfg(test)]
mod tests {
  use std::io::{Cursor, Read, Write};
  use std::net::TcpListener;
  use std::sync::Mutex;
  use std::thread;

  use super::*;
  use crate::config::CompositeConfig;

  #[derive(Default)]
  struct RecordingExecutor {
    calls: Mutex<Vec<String>>,
    fail: bool,
  }

  impl ResourceExecutor for RecordingExecutor {
    fn execute(&self, path: &str) -> Result<Vec<u8>, BoxError> {
      self.calls.lock().unwrap().push(path.to_string());
      if self.fail {
        Err("render crashed".into())
      } else {
        Ok(format!("/* rendered {path} */").into_bytes())
      }
    }
  }

  #[derive(Default)]
  struct RecordingFetcher {
    calls: Mutex<Vec<String>>,
    body: Vec<u8>,
    fail: bool,
  }

  impl RemoteFetcher for RecordingFetcher {
    fn fetch(&self, url: &Url) -> Result<Vec<u8>, BoxError> {
      self.calls.lock().unwrap().push(url.to_string());
      if self.fail {
        Err("connection reset".into())
      } else {
        Ok(self.body.clone())
      }
    }
  }

  fn settings(domains: &str) -> CompositeSettings {
    CompositeConfig {
      bundle_domains: domains.into(),
      ..CompositeConfig::default()
    }
    .into_settings()
    .unwrap()
  }

  fn context() -> FetchContext {
    FetchContext::new(Url::parse("http://www.mysite.com/css/site.css").unwrap())
  }

  #[test]
  fn executes_server_rendered_references_without_whitelist() {
    let settings = settings("");
    let executor = RecordingExecutor::default();
    let fetcher = RecordingFetcher::default();
    let guard = ResourceFetchGuard::new(&settings, &executor, &fetcher);

    let bytes = guard.resolve("dynamic/theme.ASPX?v=2", &context()).unwrap();

    assert_eq!(bytes, b"/* rendered dynamic/theme.ASPX?v=2 */");
    assert_eq!(*executor.calls.lock().unwrap(), vec!["dynamic/theme.ASPX?v=2"]);
    assert!(fetcher.calls.lock().unwrap().is_empty());
  }

  #[test]
  fn reports_execution_failures() {
    let settings = settings("mysite.com");
    let executor = RecordingExecutor {
      fail: true,
      ..Default::default()
    };
    let fetcher = RecordingFetcher::default();
    let guard = ResourceFetchGuard::new(&settings, &executor, &fetcher);

    let err = guard.resolve("theme.aspx", &context()).unwrap_err();
    assert!(matches!(err, FetchError::ExecutionFailed { .. }));
    assert_eq!(err.reference(), "theme.aspx");
  }

  #[test]
  fn absolute_executable_urls_are_not_executed() {
    let settings = settings("");
    let executor = RecordingExecutor::default();
    let fetcher = RecordingFetcher::default();
    let guard = ResourceFetchGuard::new(&settings, &executor, &fetcher);

    let err = guard
      .resolve("http://elsewhere.com/theme.aspx", &context())
      .unwrap_err();
    assert!(matches!(err, FetchError::NotWhitelisted { .. }));
    assert!(executor.calls.lock().unwrap().is_empty());
  }

  #[test]
  fn trusts_handler_paths_without_whitelist() {
    let settings = settings("");
    let executor = RecordingExecutor::default();
    let fetcher = RecordingFetcher {
      body: b"body{}".to_vec(),
      ..Default::default()
    };
    let guard = ResourceFetchGuard::new(&settings, &executor, &fetcher);

    let bytes = guard
      .resolve("/DependencyHandler.axd?s=L2EuY3Nz&t=Css&cdv=1", &context())
      .unwrap();

    assert_eq!(bytes, b"body{}");
    assert_eq!(*fetcher.calls.lock().unwrap(), vec![
      "http://www.mysite.com/DependencyHandler.axd?s=L2EuY3Nz&t=Css&cdv=1"
    ]);
  }

  #[test]
  fn fetches_whitelisted_domains_and_strips_bom() {
    let settings = settings("mysite.com, fonts.example.org:443");
    let executor = RecordingExecutor::default();
    let fetcher = RecordingFetcher {
      body: b"\xEF\xBB\xBF.a{color:red}".to_vec(),
      ..Default::default()
    };
    let guard = ResourceFetchGuard::new(&settings, &executor, &fetcher);

    assert_eq!(guard.resolve("print.css", &context()).unwrap(), b".a{color:red}");
    assert_eq!(
      guard
        .resolve("https://fonts.example.org/face.css", &context())
        .unwrap(),
      b".a{color:red}"
    );
    assert_eq!(*fetcher.calls.lock().unwrap(), vec![
      "http://www.mysite.com/css/print.css",
      "https://fonts.example.org/face.css",
    ]);
  }

  #[test]
  fn rejects_domains_outside_the_whitelist() {
    let settings = settings("google.com");
    let executor = RecordingExecutor::default();
    let fetcher = RecordingFetcher::default();
    let guard = ResourceFetchGuard::new(&settings, &executor, &fetcher);

    let err = guard
      .resolve("http://roguegoogle.com/evil.css", &context())
      .unwrap_err();
    match err {
      FetchError::NotWhitelisted { reference, authority } => {
        assert_eq!(reference, "http://roguegoogle.com/evil.css");
        assert_eq!(authority, "roguegoogle.com:80");
      }
      other => panic!("unexpected error: {other:?}"),
    }

    let err = guard.resolve("local.css", &context()).unwrap_err();
    assert!(matches!(err, FetchError::NotWhitelisted { .. }));
    assert!(fetcher.calls.lock().unwrap().is_empty());
  }

  #[test]
  fn reports_malformed_references() {
    let settings = settings("mysite.com");
    let executor = RecordingExecutor::default();
    let fetcher = RecordingFetcher::default();
    let guard = ResourceFetchGuard::new(&settings, &executor, &fetcher);

    for reference in ["", "http://", "data:image/png;base64,AAAA", "http://[::1"] {
      let err = guard.resolve(reference, &context()).unwrap_err();
      assert!(
        matches!(err, FetchError::Malformed { .. }),
        "{reference:?} gave {err:?}"
      );
    }
    assert!(fetcher.calls.lock().unwrap().is_empty());
  }

  #[test]
  fn transfer_failures_are_reported() {
    let settings = settings("mysite.com");
    let executor = RecordingExecutor::default();
    let fetcher = RecordingFetcher {
      fail: true,
      ..Default::default()
    };
    let guard = ResourceFetchGuard::new(&settings, &executor, &fetcher);

    let err = guard.resolve("print.css", &context()).unwrap_err();
    assert!(matches!(err, FetchError::FetchFailed { .. }));
    assert!(err.to_string().contains("connection reset"));
  }

  #[test]
  fn leaves_content_without_bom_untouched() {
    assert_eq!(strip_byte_order_mark(b"abc".to_vec()), b"abc");
    assert_eq!(strip_byte_order_mark(b"\xEF\xBB\xBFabc".to_vec()), b"abc");
    assert!(strip_byte_order_mark(Vec::new()).is_empty());
  }

  #[test]
  fn scheme_relative_handler_paths_are_checked_against_the_whitelist() {
    let settings = settings("");
    let executor = RecordingExecutor::default();
    let fetcher = RecordingFetcher::default();
    let guard = ResourceFetchGuard::new(&settings, &executor, &fetcher);

    for reference in [
      "//evil.com/DependencyHandler.axd/x",
      "\\\\evil.com\\DependencyHandler.axd",
      "/\\evil.com/DependencyHandler.axd",
      "/\t/evil.com/DependencyHandler.axd",
    ] {
      match guard.resolve(reference, &context()) {
        Err(FetchError::NotWhitelisted { authority, .. }) => {
          assert_eq!(authority, "evil.com:80", "{reference:?}");
        }
        other => panic!("{reference:?} gave {other:?}"),
      }
    }
    assert!(fetcher.calls.lock().unwrap().is_empty());
  }

  #[test]
  fn scheme_relative_executables_are_not_executed() {
    let settings = settings("");
    let executor = RecordingExecutor::default();
    let fetcher = RecordingFetcher::default();
    let guard = ResourceFetchGuard::new(&settings, &executor, &fetcher);

    let err = guard.resolve("//evil.com/page.aspx", &context()).unwrap_err();
    assert!(matches!(err, FetchError::NotWhitelisted { .. }));
    assert!(executor.calls.lock().unwrap().is_empty());
    assert!(fetcher.calls.lock().unwrap().is_empty());
  }

  #[test]
  fn scheme_relative_references_inherit_the_document_scheme() {
    let settings = settings("mysite.com, fonts.example.org:443");
    let executor = RecordingExecutor::default();
    let fetcher = RecordingFetcher {
      body: b"ok".to_vec(),
      ..Default::default()
    };
    let guard = ResourceFetchGuard::new(&settings, &executor, &fetcher);
    let secure = FetchContext::new(Url::parse("https://www.mysite.com/css/site.css").unwrap());

    guard.resolve("//www.mysite.com/css/print.css", &context()).unwrap();
    guard.resolve("//fonts.example.org/face.css", &secure).unwrap();

    assert_eq!(*fetcher.calls.lock().unwrap(), vec![
      "http://www.mysite.com/css/print.css",
      "https://fonts.example.org/face.css",
    ]);
  }

  /// Answer a single request on a loopback port with `response` and return its URL.
  fn serve_once(response: &'static str) -> Url {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let address = listener.local_addr().unwrap();
    thread::spawn(move || {
      let (mut stream, _) = listener.accept().unwrap();
      let mut request = Vec::new();
      let mut buffer = [0u8; 1024];
      while !request.windows(4).any(|window| window == b"\r\n\r\n") {
        let read = stream.read(&mut buffer).unwrap();
        if read == 0 {
          break;
        }
        request.extend_from_slice(&buffer[..read]);
      }
      stream.write_all(response.as_bytes()).unwrap();
    });
    Url::parse(&format!("http://{address}/style.css")).unwrap()
  }

  #[test]
  fn http_fetcher_returns_successful_bodies() {
    let url = serve_once(
      "HTTP/1.1 200 OK\r\nContent-Length: 6\r\nConnection: close\r\n\r\nbody{}",
    );
    let fetcher = HttpFetcher::new().unwrap();

    assert_eq!(fetcher.fetch(&url).unwrap(), b"body{}");
  }

  #[test]
  fn http_fetcher_reports_redirects_instead_of_following_them() {
    let url = serve_once(concat!(
      "HTTP/1.1 302 Found\r\n",
      "Location: http://127.0.0.1:1/elsewhere.css\r\n",
      "Content-Length: 0\r\n",
      "Connection: close\r\n\r\n",
    ));
    let fetcher = HttpFetcher::new().unwrap();

    let err = fetcher.fetch(&url).unwrap_err();
    assert!(err.to_string().contains("unexpected status 302"), "{err}");
  }

  #[test]
  fn http_fetcher_refuses_oversized_bodies() {
    let url = serve_once(concat!(
      "HTTP/1.1 200 OK\r\n",
      "Content-Length: 32\r\n",
      "Connection: close\r\n\r\n",
      "0123456789abcdef0123456789abcdef",
    ));
    let fetcher = HttpFetcher::new().unwrap().with_max_body_bytes(16);

    let err = fetcher.fetch(&url).unwrap_err();
    assert_eq!(err.to_string(), "response body exceeds 16 bytes");
  }

  #[test]
  fn bounded_reads_stop_after_the_limit() {
    assert_eq!(read_bounded(Cursor::new(b"0123456789"), 10).unwrap(), b"0123456789");
    assert!(read_bounded(Cursor::new(b"0123456789"), 9).is_err());
    assert!(read_bounded(Cursor::new(b""), 0).unwrap().is_empty());
  }
}
