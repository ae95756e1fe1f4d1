//! Shared HTTP plumbing for the node and index adapters.

use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use reqwest::{header, StatusCode, Url};
use serde::de::DeserializeOwned;
use tracing::{debug, trace};

use crate::error::{BackendError, CoreError};

use super::protocol::{parse_jsonrpc_error, JsonRpcRequest, JsonRpcResponse};

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Knobs shared by every HTTP-backed adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportOptions {
    /// Whole-request timeout, connect included.
    pub timeout: Duration,
    /// Outbound requests per second; `None` disables limiting.
    pub requests_per_second: Option<u32>,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            requests_per_second: None,
        }
    }
}

// ==============================================================================
// HttpTransport
// ==============================================================================

/// GET-oriented HTTP client bound to one base URL.
///
/// Status mapping: 404 becomes `NotFound`, any other non-2xx becomes
/// `BackendUnavailable(Status)`, and connection or body-read failures become
/// `BackendUnavailable(Transport)`. No retries.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    limiter: Option<DirectRateLimiter>,
}

impl HttpTransport {
    pub fn new(base_url: &str, options: &TransportOptions) -> Result<Self, CoreError> {
        let base_url = parse_base_url(base_url)?;

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10).min(options.timeout))
            .timeout(options.timeout)
            .pool_max_idle_per_host(32)
            .tcp_nodelay(true)
            .build()
            .map_err(BackendError::Transport)?;

        let limiter = match options.requests_per_second {
            None => None,
            Some(limit) => {
                let limit = NonZeroU32::new(limit).ok_or_else(|| {
                    CoreError::InvalidInput("requests_per_second must be at least 1".to_owned())
                })?;
                Some(RateLimiter::direct(Quota::per_second(limit)))
            }
        };

        Ok(Self {
            client,
            base_url,
            limiter,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn wait_for_rate_limit(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
    }

    fn url_for(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn get(&self, path: &str) -> Result<reqwest::Response, CoreError> {
        self.wait_for_rate_limit().await;
        let url = self.url_for(path);
        debug!(http.url = %url, "backend request");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(BackendError::Transport)?;
        let status = response.status();
        debug!(http.url = %url, %status, "backend response");

        if status == StatusCode::NOT_FOUND {
            return Err(CoreError::NotFound(path.to_owned()));
        }
        if !status.is_success() {
            return Err(BackendError::Status {
                status: status.as_u16(),
                url,
            }
            .into());
        }
        Ok(response)
    }

    /// Fetch a binary body.
    pub async fn get_bytes(&self, path: &str) -> Result<Vec<u8>, CoreError> {
        let response = self.get(path).await?;
        let body = response.bytes().await.map_err(BackendError::Transport)?;
        trace!(http.path = path, body_len = body.len(), "backend binary body");
        Ok(body.to_vec())
    }

    /// Fetch and decode a JSON body.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, CoreError> {
        let response = self.get(path).await?;
        let body = response.text().await.map_err(BackendError::Transport)?;
        trace!(http.path = path, body = %body, "backend json body");

        serde_json::from_str(&body).map_err(|e| {
            BackendError::InvalidResponse(format!("decode {path}: {e}; body={body}")).into()
        })
    }

    /// Issue one JSON-RPC call against `endpoint`. Shares this transport's
    /// connection pool and rate limiter.
    pub async fn rpc_call(
        &self,
        endpoint: &RpcEndpoint,
        method: &str,
        params: Vec<serde_json::Value>,
    ) -> Result<serde_json::Value, CoreError> {
        self.wait_for_rate_limit().await;
        let id = endpoint.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(
            rpc.id = id,
            rpc.method = method,
            rpc.params = params.len(),
            "rpc call"
        );
        let req = JsonRpcRequest {
            jsonrpc: "2.0",
            id,
            method,
            params,
        };

        let mut builder = self
            .client
            .post(&endpoint.url)
            .header(header::CONTENT_TYPE, "application/json")
            .json(&req);
        if let Some((user, pass)) = endpoint.auth.credentials()? {
            builder = builder.basic_auth(user, Some(pass));
        }

        let response = builder.send().await.map_err(BackendError::Transport)?;
        let status = response.status();

        let body = response.text().await.map_err(BackendError::Transport)?;
        debug!(rpc.id = id, rpc.method = method, %status, body_len = body.len(), "rpc response");
        trace!(rpc.id = id, rpc.method = method, body = %body, "rpc response body");

        // Bitcoin Core answers RPC-level failures with a non-2xx status and a
        // JSON-RPC error body, so the body is decoded before the status is
        // judged.
        let decoded: JsonRpcResponse = match serde_json::from_str(&body) {
            Ok(decoded) => decoded,
            Err(_) if !status.is_success() => {
                return Err(BackendError::Status {
                    status: status.as_u16(),
                    url: endpoint.url.clone(),
                }
                .into());
            }
            Err(e) => {
                return Err(BackendError::InvalidResponse(format!(
                    "decode JSON-RPC response: {e}; body={body}"
                ))
                .into());
            }
        };

        if let Some(err) = decoded.error.filter(|err| !err.is_null()) {
            return Err(parse_jsonrpc_error(err));
        }

        Ok(decoded.result.unwrap_or(serde_json::Value::Null))
    }
}

// ==============================================================================
// JSON-RPC endpoint
// ==============================================================================

/// How JSON-RPC calls authenticate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpcAuth {
    Anonymous,
    Basic { user: String, pass: String },
    /// The node's `.cookie` file, holding `user:password`. It is read again
    /// for every call because the node rewrites it on restart.
    Cookie(PathBuf),
}

impl RpcAuth {
    /// Explicit credentials win over a cookie file. A user without a
    /// password (or the reverse) is rejected.
    pub fn from_options(
        user: Option<&str>,
        pass: Option<&str>,
        cookie_file: Option<&Path>,
    ) -> Result<Self, CoreError> {
        match (user, pass, cookie_file) {
            (Some(user), Some(pass), _) => Ok(Self::Basic {
                user: user.to_owned(),
                pass: pass.to_owned(),
            }),
            (Some(_), None, _) | (None, Some(_), _) => Err(CoreError::InvalidInput(
                "rpc user and rpc pass must be given together".to_owned(),
            )),
            (None, None, Some(path)) => Ok(Self::Cookie(path.to_path_buf())),
            (None, None, None) => Ok(Self::Anonymous),
        }
    }

    pub(super) fn credentials(&self) -> Result<Option<(String, String)>, CoreError> {
        match self {
            Self::Anonymous => Ok(None),
            Self::Basic { user, pass } => Ok(Some((user.clone(), pass.clone()))),
            Self::Cookie(path) => read_cookie(path).map(Some),
        }
    }
}

fn read_cookie(path: &Path) -> Result<(String, String), CoreError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        CoreError::InvalidInput(format!("read rpc cookie file {}: {e}", path.display()))
    })?;
    content
        .lines()
        .next()
        .and_then(|line| line.trim().split_once(':'))
        .filter(|(user, pass)| !user.is_empty() && !pass.is_empty())
        .map(|(user, pass)| (user.to_owned(), pass.to_owned()))
        .ok_or_else(|| {
            CoreError::InvalidInput(format!(
                "rpc cookie file {} must hold `user:password`",
                path.display()
            ))
        })
}

/// Where and as whom JSON-RPC calls are sent.
pub struct RpcEndpoint {
    url: String,
    auth: RpcAuth,
    next_id: AtomicU64,
}

impl RpcEndpoint {
    /// Fails early when the credentials cannot be read now.
    pub fn new(url: &str, auth: RpcAuth) -> Result<Self, CoreError> {
        auth.credentials()?;
        Ok(Self {
            url: parse_base_url(url)?,
            auth,
            next_id: AtomicU64::new(initial_request_id()),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

/// Accept only http(s) URLs and drop a trailing slash so paths can be
/// appended as `{base}/{path}`.
fn parse_base_url(base: &str) -> Result<String, CoreError> {
    let parsed = Url::parse(base)
        .map_err(|e| CoreError::InvalidInput(format!("invalid backend url `{base}`: {e}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(base.trim_end_matches('/').to_owned()),
        other => Err(CoreError::InvalidInput(format!(
            "backend url `{base}` has scheme `{other}`; expected http or https"
        ))),
    }
}

fn initial_request_id() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_match_thirty_second_timeout() {
        let options = TransportOptions::default();
        assert_eq!(options.timeout, Duration::from_secs(30));
        assert_eq!(options.requests_per_second, None);
    }

    #[test]
    fn zero_rate_limit_is_rejected() {
        let options = TransportOptions {
            requests_per_second: Some(0),
            ..TransportOptions::default()
        };
        let err = HttpTransport::new("http://127.0.0.1:8332/rest", &options)
            .err()
            .expect("zero rps must fail");
        assert!(matches!(err, CoreError::InvalidInput(_)));
    }

    #[test]
    fn paths_are_joined_onto_the_base() {
        let transport = HttpTransport::new("http://127.0.0.1:8332/rest/", &TransportOptions::default())
            .expect("valid url");
        assert_eq!(transport.base_url(), "http://127.0.0.1:8332/rest");
        assert_eq!(
            transport.url_for("/chaininfo.json"),
            "http://127.0.0.1:8332/rest/chaininfo.json"
        );
        assert_eq!(
            transport.url_for("tx/ab.bin"),
            "http://127.0.0.1:8332/rest/tx/ab.bin"
        );
    }

    #[test]
    fn rpc_endpoint_requires_http_url() {
        assert!(RpcEndpoint::new("ftp://node", RpcAuth::Anonymous).is_err());
        assert!(RpcEndpoint::new("not a url", RpcAuth::Anonymous).is_err());
        let endpoint =
            RpcEndpoint::new("http://127.0.0.1:8332/", RpcAuth::Anonymous).expect("valid url");
        assert_eq!(endpoint.url(), "http://127.0.0.1:8332");
    }

    #[test]
    fn explicit_credentials_win_over_cookie() {
        let auth = RpcAuth::from_options(Some("alice"), Some("secret"), Some(Path::new("/nope")))
            .expect("user and pass");
        assert_eq!(
            auth.credentials().expect("basic auth"),
            Some(("alice".to_owned(), "secret".to_owned()))
        );
        assert_eq!(
            RpcAuth::from_options(None, None, None).expect("anonymous"),
            RpcAuth::Anonymous
        );
        assert!(matches!(
            RpcAuth::from_options(None, Some("secret"), None),
            Err(CoreError::InvalidInput(_))
        ));
    }

    fn temp_cookie(name: &str, content: &str) -> PathBuf {
        let unique = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("time must be after unix epoch")
            .as_nanos();
        let path = std::env::temp_dir().join(format!("seeker-{name}-{unique}.cookie"));
        std::fs::write(&path, content).expect("cookie file must be writable");
        path
    }

    #[test]
    fn cookie_is_reread_on_every_call() {
        let path = temp_cookie("rotating", "__cookie__:first\n");
        let auth = RpcAuth::Cookie(path.clone());
        assert_eq!(
            auth.credentials().expect("cookie"),
            Some(("__cookie__".to_owned(), "first".to_owned()))
        );

        std::fs::write(&path, "__cookie__:second\n").expect("cookie file must be writable");
        assert_eq!(
            auth.credentials().expect("rewritten cookie"),
            Some(("__cookie__".to_owned(), "second".to_owned()))
        );
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn malformed_or_missing_cookie_fails_endpoint_construction() {
        let path = temp_cookie("bad", "justatoken\n");
        let err = RpcEndpoint::new("http://127.0.0.1:8332", RpcAuth::Cookie(path.clone()))
            .err()
            .expect("cookie without separator");
        assert!(err.to_string().contains("user:password"), "{err}");
        let _ = std::fs::remove_file(&path);

        let missing = RpcEndpoint::new("http://127.0.0.1:8332", RpcAuth::Cookie(path));
        assert!(matches!(missing, Err(CoreError::InvalidInput(_))));
    }
}
