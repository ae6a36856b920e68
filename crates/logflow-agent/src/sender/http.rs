//! HTTP egress.
//!
//! Builds the outbound `reqwest` client (timeouts, pooling, keep-alive,
//! optional HTTPS/SOCKS proxy with fall-back-to-direct on bad proxy config,
//! client TLS material, interface binding, host resolution overrides) and
//! normalizes transport failures into the [`NetworkCode`] taxonomy the retry
//! policy consumes. HTTP status codes are reported verbatim; splitting them
//! into retryable and fatal is the send queue's concern.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use bytes::Bytes;
use reqwest::StatusCode;
use tracing::{debug, error};

use crate::sender::queue::SendOutcome;

/// Normalized transport-failure taxonomy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NetworkCode {
    Ok,
    ConnectionFailed,
    RemoteAccessDenied,
    Timeout,
    SslConnectError,
    SslCertError,
    SslOtherProblem,
    SendDataFailed,
    RecvDataFailed,
    Other,
}

impl NetworkCode {
    /// The subset the retry policy treats as worth another attempt.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            NetworkCode::ConnectionFailed
                | NetworkCode::Timeout
                | NetworkCode::SendDataFailed
                | NetworkCode::RecvDataFailed
                | NetworkCode::SslConnectError
        )
    }
}

/// Maps a transport error onto the normalized taxonomy.
#[must_use]
pub fn network_code(error: &reqwest::Error) -> NetworkCode {
    if error.is_timeout() {
        return NetworkCode::Timeout;
    }
    if error.is_connect() {
        let chain = source_chain(error);
        if chain.contains("certificate") {
            return NetworkCode::SslCertError;
        }
        if chain.contains("tls") || chain.contains("ssl") || chain.contains("handshake") {
            return NetworkCode::SslConnectError;
        }
        return NetworkCode::ConnectionFailed;
    }
    if error.is_body() || error.is_request() {
        return NetworkCode::SendDataFailed;
    }
    if error.is_decode() {
        return NetworkCode::RecvDataFailed;
    }
    NetworkCode::Other
}

fn source_chain(error: &reqwest::Error) -> String {
    let mut chain = String::new();
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(error);
    while let Some(err) = source {
        chain.push_str(&err.to_string().to_ascii_lowercase());
        chain.push(' ');
        source = err.source();
    }
    chain
}

/// Classifies one finished delivery for the send queue: HTTP 429 and 5xx are
/// retryable, any other non-2xx status is terminal, transport failures follow
/// the [`NetworkCode`] retryable subset.
#[must_use]
pub fn classify(code: NetworkCode, status: Option<StatusCode>) -> SendOutcome {
    match code {
        NetworkCode::Ok => match status {
            Some(status) if status.is_success() => SendOutcome::Ok,
            Some(StatusCode::TOO_MANY_REQUESTS) => SendOutcome::RetryableError,
            Some(status) if status.is_server_error() => SendOutcome::RetryableError,
            _ => SendOutcome::TerminalError,
        },
        code if code.is_retryable() => SendOutcome::RetryableError,
        _ => SendOutcome::TerminalError,
    }
}

/// Client TLS material for one sink.
#[derive(Clone, Debug, Default)]
pub struct TlsOptions {
    pub ca_file: Option<PathBuf>,
    pub cert_file: Option<PathBuf>,
    pub key_file: Option<PathBuf>,
    pub insecure_skip_verify: bool,
}

/// Connection-level options of the outbound client.
#[derive(Clone, Debug)]
pub struct HttpSenderConfig {
    pub timeout: Duration,
    pub proxy: Option<String>,
    pub bind_local_address: Option<IpAddr>,
    /// Host-to-address substitutions applied before connecting, fed from the
    /// resolver cache.
    pub resolve: Vec<(String, SocketAddr)>,
    pub tls: Option<TlsOptions>,
    pub follow_redirects: bool,
}

/// Redirect hop cap when redirects are enabled.
const MAX_REDIRECT_HOPS: usize = 5;

impl Default for HttpSenderConfig {
    fn default() -> Self {
        HttpSenderConfig {
            timeout: Duration::from_secs(15),
            proxy: None,
            bind_local_address: None,
            resolve: Vec::new(),
            tls: None,
            follow_redirects: false,
        }
    }
}

/// Errors constructing the HTTP sender.
#[derive(Debug, thiserror::Error)]
pub enum HttpSenderError {
    #[error("failed to read TLS material: {0}")]
    TlsIo(#[from] std::io::Error),
    #[error("invalid TLS material: {0}")]
    Tls(reqwest::Error),
    #[error("failed to build http client: {0}")]
    Build(reqwest::Error),
}

/// Result of one delivery (possibly several transport attempts).
#[derive(Debug)]
pub struct HttpResult {
    pub code: NetworkCode,
    pub status: Option<StatusCode>,
    pub body: Bytes,
    pub error: Option<String>,
    pub attempts: u32,
}

impl HttpResult {
    #[must_use]
    pub fn outcome(&self) -> SendOutcome {
        classify(self.code, self.status)
    }
}

/// An outbound request: custom methods and arbitrary headers are allowed.
#[derive(Clone, Debug)]
pub struct SendRequest {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

/// Shared outbound HTTP client for one sink family.
#[derive(Clone, Debug)]
pub struct HttpSender {
    client: reqwest::Client,
}

impl HttpSender {
    /// Builds the client. A broken proxy configuration degrades to a direct
    /// connection instead of refusing to start.
    pub fn new(config: &HttpSenderConfig) -> Result<Self, HttpSenderError> {
        let client = match build_client(config, true) {
            Ok(client) => client,
            Err(HttpSenderError::Build(e)) if config.proxy.is_some() => {
                error!(
                    "unable to apply proxy configuration: {}, falling back to direct connection",
                    e
                );
                build_client(config, false)?
            }
            Err(e) => return Err(e),
        };
        Ok(HttpSender { client })
    }

    /// Performs a single delivery attempt.
    pub async fn send(&self, request: &SendRequest) -> HttpResult {
        let method = match reqwest::Method::from_bytes(request.method.as_bytes()) {
            Ok(method) => method,
            Err(e) => {
                return HttpResult {
                    code: NetworkCode::Other,
                    status: None,
                    body: Bytes::new(),
                    error: Some(format!("invalid method {:?}: {e}", request.method)),
                    attempts: 1,
                };
            }
        };
        let mut builder = self
            .client
            .request(method, &request.url)
            .body(request.body.clone());
        for (key, value) in &request.headers {
            builder = builder.header(key, value);
        }

        match builder.send().await {
            Ok(response) => {
                let status = response.status();
                match response.bytes().await {
                    Ok(body) => HttpResult {
                        code: NetworkCode::Ok,
                        status: Some(status),
                        body,
                        error: None,
                        attempts: 1,
                    },
                    Err(e) => HttpResult {
                        code: NetworkCode::RecvDataFailed,
                        status: Some(status),
                        body: Bytes::new(),
                        error: Some(e.to_string()),
                        attempts: 1,
                    },
                }
            }
            Err(e) => HttpResult {
                code: network_code(&e),
                status: None,
                body: Bytes::new(),
                error: Some(e.to_string()),
                attempts: 1,
            },
        }
    }

    /// Delivers with immediate internal retries: any transport failure is
    /// retried up to `max_try` total attempts. An HTTP response, whatever
    /// its status, ends the loop and is reported verbatim.
    pub async fn send_with_retry(&self, request: &SendRequest, max_try: u32) -> HttpResult {
        let max_try = max_try.max(1);
        let mut attempt = 1;
        loop {
            let mut result = self.send(request).await;
            result.attempts = attempt;
            if result.code == NetworkCode::Ok || attempt >= max_try {
                return result;
            }
            debug!(
                "send to {} failed ({:?}), retrying immediately (attempt {}/{})",
                request.url, result.code, attempt, max_try
            );
            attempt += 1;
        }
    }
}

fn build_client(
    config: &HttpSenderConfig,
    allow_proxy: bool,
) -> Result<reqwest::Client, HttpSenderError> {
    let mut builder = reqwest::Client::builder()
        .timeout(config.timeout)
        .pool_idle_timeout(Some(Duration::from_secs(270)))
        .tcp_keepalive(Some(Duration::from_secs(120)));

    builder = if config.follow_redirects {
        builder.redirect(reqwest::redirect::Policy::limited(MAX_REDIRECT_HOPS))
    } else {
        builder.redirect(reqwest::redirect::Policy::none())
    };

    if let Some(addr) = config.bind_local_address {
        builder = builder.local_address(addr);
    }
    for (host, addr) in &config.resolve {
        builder = builder.resolve(host, *addr);
    }

    if allow_proxy {
        if let Some(proxy) = &config.proxy {
            let proxy = reqwest::Proxy::all(proxy.clone()).map_err(HttpSenderError::Build)?;
            builder = builder.proxy(proxy);
        }
    }

    if let Some(tls) = &config.tls {
        if let Some(ca) = &tls.ca_file {
            let pem = std::fs::read(ca)?;
            let cert = reqwest::Certificate::from_pem(&pem).map_err(HttpSenderError::Tls)?;
            builder = builder.add_root_certificate(cert);
        }
        if let (Some(cert), Some(key)) = (&tls.cert_file, &tls.key_file) {
            let mut pem = std::fs::read(cert)?;
            pem.extend_from_slice(&std::fs::read(key)?);
            let identity = reqwest::Identity::from_pem(&pem).map_err(HttpSenderError::Tls)?;
            builder = builder.identity(identity);
        }
        if tls.insecure_skip_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }
    }

    builder.build().map_err(HttpSenderError::Build)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_subset_matches_policy() {
        let retryable = [
            NetworkCode::ConnectionFailed,
            NetworkCode::Timeout,
            NetworkCode::SendDataFailed,
            NetworkCode::RecvDataFailed,
            NetworkCode::SslConnectError,
        ];
        for code in retryable {
            assert!(code.is_retryable(), "{code:?}");
        }
        let fatal = [
            NetworkCode::RemoteAccessDenied,
            NetworkCode::SslCertError,
            NetworkCode::SslOtherProblem,
            NetworkCode::Other,
        ];
        for code in fatal {
            assert!(!code.is_retryable(), "{code:?}");
        }
    }

    #[test]
    fn http_status_classification() {
        assert_eq!(
            classify(NetworkCode::Ok, Some(StatusCode::OK)),
            SendOutcome::Ok
        );
        assert_eq!(
            classify(NetworkCode::Ok, Some(StatusCode::TOO_MANY_REQUESTS)),
            SendOutcome::RetryableError
        );
        assert_eq!(
            classify(NetworkCode::Ok, Some(StatusCode::BAD_GATEWAY)),
            SendOutcome::RetryableError
        );
        assert_eq!(
            classify(NetworkCode::Ok, Some(StatusCode::FORBIDDEN)),
            SendOutcome::TerminalError
        );
        assert_eq!(
            classify(NetworkCode::Ok, Some(StatusCode::BAD_REQUEST)),
            SendOutcome::TerminalError
        );
    }

    #[test]
    fn transport_failure_classification() {
        assert_eq!(
            classify(NetworkCode::Timeout, None),
            SendOutcome::RetryableError
        );
        assert_eq!(
            classify(NetworkCode::SslCertError, None),
            SendOutcome::TerminalError
        );
    }

    #[test]
    fn sender_builds_with_defaults() {
        let sender = HttpSender::new(&HttpSenderConfig::default());
        assert!(sender.is_ok());
    }

    #[test]
    fn bad_proxy_falls_back_to_direct() {
        let config = HttpSenderConfig {
            proxy: Some("not a proxy url".to_string()),
            ..HttpSenderConfig::default()
        };
        let sender = HttpSender::new(&config);
        assert!(sender.is_ok());
    }
}
