//! First-line classification of accepted connections
//!
//! Until the request line has been read it is not known whether the peer is
//! an HTTP client, an Alien opening a control connection, or an Alien
//! answering an invite. The classifier reads that line (and, for HTTP, the
//! headers up to `Host:`) and decides.

use alien_core::config::ProxyConfig;
use alien_core::{AlienUri, ProxyError};
use alien_protocol::message::is_admin_request;
use alien_protocol::{ProtocolVersion, RegisterRequest, RsvpRequest};
use thiserror::Error;

use crate::admin::AdminAction;
use crate::connection::LineReader;

/// Protocol a connection turned out to speak, which decides how an error is
/// reported to it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Nothing recognizable yet; errors close the connection silently
    Unknown,
    /// HTTP client
    Http,
    /// Alien speaking CCCP
    Cccp(ProtocolVersion),
}

/// A connection rejected during classification
#[derive(Debug, Error)]
#[error("{error}")]
pub struct Rejection {
    pub role: Role,
    #[source]
    pub error: ProxyError,
}

impl Rejection {
    fn new(role: Role, error: impl Into<ProxyError>) -> Self {
        Self {
            role,
            error: error.into(),
        }
    }
}

/// Where an HTTP request goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpTarget {
    /// Served by the proxy itself
    Admin(AdminAction),
    /// Proxied to a registered Alien
    Alien(AlienUri),
}

/// The parts of an HTTP request the proxy looks at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: String,
    pub uri: String,
    pub version: (u8, u8),
    /// `Host` header value, trimmed, port removed
    pub host: String,
    pub target: HttpTarget,
}

/// A classified connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// HTTP request line and `Host`
    Http(HttpRequest),
    /// An Alien opening a control connection
    Register {
        uri: AlienUri,
        request: RegisterRequest,
    },
    /// An Alien answering an invite
    Rsvp { uri: AlienUri, request: RsvpRequest },
    /// `DROP please CCCP/x`
    Drop,
    /// `SHUTDOWN please CCCP/x`
    Shutdown,
}

/// Request line before any header has been read
enum RequestLine {
    Http {
        method: String,
        uri: String,
        version: (u8, u8),
    },
    Ready(Request),
}

/// Read and classify the start of a connection
pub async fn classify(lines: &mut LineReader, config: &ProxyConfig) -> Result<Request, Rejection> {
    let mut empty_lines = 0;
    let request_line = loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.is_empty() => {
                // Allowed before an HTTP request line, up to the header limit
                empty_lines += 1;
                if empty_lines > config.max_header_lines {
                    return Err(Rejection::new(
                        Role::Unknown,
                        ProxyError::NoRequest(format!("{} empty lines", empty_lines)),
                    ));
                }
                tracing::debug!("empty line before request line");
            }
            Ok(Some(line)) => break line,
            Ok(None) => {
                return Err(Rejection::new(Role::Unknown, ProxyError::NoRequest("eof".into())))
            }
            Err(e) => {
                return Err(Rejection::new(
                    Role::Unknown,
                    ProxyError::NoRequest(e.to_string()),
                ))
            }
        }
    };

    let (method, uri, version) = match parse_request_line(&request_line)? {
        RequestLine::Ready(request) => return Ok(request),
        RequestLine::Http {
            method,
            uri,
            version,
        } => (method, uri, version),
    };

    let host = read_host(lines, config.max_header_lines).await?;
    let target = route(&uri, &host, config).map_err(|e| Rejection::new(Role::Http, e))?;

    Ok(Request::Http(HttpRequest {
        method,
        uri,
        version,
        host,
        target,
    }))
}

fn parse_request_line(line: &str) -> Result<RequestLine, Rejection> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() < 3 {
        return Err(Rejection::new(
            Role::Unknown,
            ProxyError::NoRequest(line.to_string()),
        ));
    }
    let method = tokens[0];
    let params = &tokens[1..];
    let cccp = Role::Cccp(ProtocolVersion::DEFAULT);

    if method.eq_ignore_ascii_case("DROP") {
        return if is_admin_request(params) {
            Ok(RequestLine::Ready(Request::Drop))
        } else {
            Err(Rejection::new(cccp, malformed("400 Badly formed DROP request")))
        };
    }
    if method.eq_ignore_ascii_case("SHUTDOWN") {
        return if is_admin_request(params) {
            Ok(RequestLine::Ready(Request::Shutdown))
        } else {
            Err(Rejection::new(cccp, malformed("400 Badly formed SHUTDOWN request")))
        };
    }
    if method.eq_ignore_ascii_case("REGISTER") {
        let request = RegisterRequest::parse(params).map_err(|e| Rejection::new(cccp, e))?;
        let role = Role::Cccp(request.version);
        let uri = AlienUri::parse(&request.uri).map_err(|e| Rejection::new(role, e))?;
        return Ok(RequestLine::Ready(Request::Register { uri, request }));
    }
    if method.eq_ignore_ascii_case("RSVP") {
        let request = RsvpRequest::parse(params).map_err(|e| Rejection::new(cccp, e))?;
        let role = Role::Cccp(request.version);
        let uri = AlienUri::parse(&request.uri).map_err(|e| Rejection::new(role, e))?;
        return Ok(RequestLine::Ready(Request::Rsvp { uri, request }));
    }

    let version = parse_http_version(tokens[2])
        .ok_or_else(|| Rejection::new(Role::Http, malformed("400 Bad HTTP version syntax")))?;
    if version.0 < 1 {
        return Err(Rejection::new(Role::Http, ProxyError::UnsupportedVersion));
    }

    Ok(RequestLine::Http {
        method: method.to_string(),
        uri: tokens[1].to_string(),
        version,
    })
}

/// Parse `HTTP/<digit>.<digit>`
fn parse_http_version(token: &str) -> Option<(u8, u8)> {
    match token.strip_prefix("HTTP/")?.as_bytes() {
        [major, b'.', minor] if major.is_ascii_digit() && minor.is_ascii_digit() => {
            Some((major - b'0', minor - b'0'))
        }
        _ => None,
    }
}

/// Read header lines until `Host:` and return its value
async fn read_host(lines: &mut LineReader, max_header_lines: usize) -> Result<String, Rejection> {
    let reject = |status: &str| Rejection::new(Role::Http, malformed(status));

    for _ in 0..max_header_lines {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => return Err(reject("400 Premature end of headers")),
            Err(e) => return Err(Rejection::new(Role::Http, e)),
        };
        if line.is_empty() {
            return Err(reject("400 No Host Header"));
        }

        let mut fields = line.split(':').filter(|field| !field.is_empty());
        let Some(name) = fields.next() else {
            continue;
        };
        if name.eq_ignore_ascii_case("Host") {
            // Anything after a second ':' is the port
            return match fields.next() {
                Some(host) => Ok(host.trim().to_string()),
                None => Err(reject("400 Bad 'Host' header")),
            };
        }
    }
    Err(reject("400 Too many header lines in request"))
}

/// Decide who serves a request for `host`
fn route(uri: &str, host: &str, config: &ProxyConfig) -> Result<HttpTarget, ProxyError> {
    if host.eq_ignore_ascii_case(&config.public_host_name) {
        return Ok(HttpTarget::Admin(AdminAction::for_uri(uri, &config.test_uri)));
    }

    let labels = host.split('.').filter(|label| !label.is_empty()).count();
    if labels != config.alien_host_labels {
        return Err(ProxyError::UnknownHost(host.to_string()));
    }
    AlienUri::from_host(host).map(HttpTarget::Alien)
}

fn malformed(status: &str) -> ProxyError {
    ProxyError::MalformedRequest(status.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    async fn classify_bytes(input: &'static [u8]) -> Result<Request, Rejection> {
        let mut lines = LineReader::new(Box::new(input), 256);
        classify(&mut lines, &ProxyConfig::default()).await
    }

    fn status(rejection: &Rejection) -> Option<String> {
        rejection.error.status().map(|s| s.into_owned())
    }

    #[tokio::test]
    async fn test_http_request_for_alien() {
        let request = classify_bytes(
            b"\r\nGET /index.html HTTP/1.1\r\nAccept: */*\r\nHost: dev1.user.alien.opera.com:80 \r\n\r\n",
        )
        .await
        .unwrap();

        let Request::Http(http) = request else {
            panic!("Expected HTTP request");
        };
        assert_eq!(http.method, "GET");
        assert_eq!(http.uri, "/index.html");
        assert_eq!(http.version, (1, 1));
        assert_eq!(http.host, "dev1.user.alien.opera.com");
        assert_eq!(
            http.target,
            HttpTarget::Alien(AlienUri::parse("dev1@user.alien.opera.com").unwrap())
        );
    }

    #[tokio::test]
    async fn test_admin_routes() {
        let Request::Http(list) = classify_bytes(b"GET /list HTTP/1.0\r\nHost: ALIEN.opera.com\r\n\r\n")
            .await
            .unwrap()
        else {
            panic!("Expected HTTP request");
        };
        assert_eq!(list.target, HttpTarget::Admin(AdminAction::List));

        let Request::Http(test) =
            classify_bytes(b"GET /keepalive?foo7 HTTP/1.1\r\nHost: alien.opera.com\r\n\r\n")
                .await
                .unwrap()
        else {
            panic!("Expected HTTP request");
        };
        assert_eq!(
            test.target,
            HttpTarget::Admin(AdminAction::Test { connection: Some(7) })
        );

        let Request::Http(live) = classify_bytes(b"HEAD / HTTP/1.1\r\nHost: alien.opera.com\r\n\r\n")
            .await
            .unwrap()
        else {
            panic!("Expected HTTP request");
        };
        assert_eq!(live.target, HttpTarget::Admin(AdminAction::Liveness));
    }

    #[tokio::test]
    async fn test_http_errors() {
        let err = classify_bytes(b"GET / HTTP/0.9\r\nHost: x\r\n\r\n").await.unwrap_err();
        assert_eq!(err.role, Role::Http);
        assert_eq!(status(&err).as_deref(), Some("505 HTTP Version Not Supported"));

        let err = classify_bytes(b"GET / HTTP/1.10\r\n").await.unwrap_err();
        assert_eq!(status(&err).as_deref(), Some("400 Bad HTTP version syntax"));

        let err = classify_bytes(b"GET / HTTP/1.1\r\nAccept: */*\r\n\r\n").await.unwrap_err();
        assert_eq!(status(&err).as_deref(), Some("400 No Host Header"));

        let err = classify_bytes(b"GET / HTTP/1.1\r\nAccept: */*\r\n").await.unwrap_err();
        assert_eq!(status(&err).as_deref(), Some("400 Premature end of headers"));

        let err = classify_bytes(b"GET / HTTP/1.1\r\nHost:\r\n\r\n").await.unwrap_err();
        assert_eq!(status(&err).as_deref(), Some("400 Bad 'Host' header"));

        let err = classify_bytes(b"GET / HTTP/1.1\r\nHost: www.example.com\r\n\r\n")
            .await
            .unwrap_err();
        assert!(matches!(err.error, ProxyError::UnknownHost(_)));
        assert_eq!(status(&err).as_deref(), Some("404 Not Found"));
    }

    #[tokio::test]
    async fn test_too_many_header_lines() {
        let mut config = ProxyConfig::default();
        config.max_header_lines = 2;
        let input: &[u8] = b"GET / HTTP/1.1\r\nA: 1\r\nB: 2\r\nHost: a.b.c.d.e\r\n\r\n";
        let mut lines = LineReader::new(Box::new(input), 256);

        let err = classify(&mut lines, &config).await.unwrap_err();
        assert_eq!(status(&err).as_deref(), Some("400 Too many header lines in request"));
    }

    #[tokio::test]
    async fn test_leading_empty_lines_are_limited() {
        let mut config = ProxyConfig::default();
        config.max_header_lines = 2;

        let input: &[u8] = b"\r\n\r\nGET / HTTP/1.1\r\nHost: alien.opera.com\r\n\r\n";
        let mut lines = LineReader::new(Box::new(input), 256);
        assert!(classify(&mut lines, &config).await.is_ok());

        // A peer that keeps sending CRLFs without ever closing
        let (ours, mut theirs) = tokio::io::duplex(1024);
        theirs.write_all(&b"\r\n".repeat(10)).await.unwrap();
        let mut lines = LineReader::new(Box::new(ours), 256);
        let err = classify(&mut lines, &config).await.unwrap_err();
        assert_eq!(err.role, Role::Unknown);
        assert!(matches!(err.error, ProxyError::NoRequest(_)));
    }

    #[tokio::test]
    async fn test_no_request() {
        for input in [&b""[..], b"\r\n\r\n", b"GET /\r\n"] {
            let mut lines = LineReader::new(Box::new(input), 256);
            let err = classify(&mut lines, &ProxyConfig::default()).await.unwrap_err();
            assert_eq!(err.role, Role::Unknown);
            assert!(err.error.status().is_none());
        }
    }

    #[tokio::test]
    async fn test_cccp_requests() {
        let Request::Register { uri, request } =
            classify_bytes(b"REGISTER dev1@example.org s3cret CCCP/0.2\r\n\r\n")
                .await
                .unwrap()
        else {
            panic!("Expected REGISTER");
        };
        assert_eq!(uri.as_str(), "dev1@example.org");
        assert_eq!(request.version, ProtocolVersion::V02);

        let Request::Rsvp { request, .. } = classify_bytes(b"rsvp dev1@example.org 4 CCCP/0.1\r\n")
            .await
            .unwrap()
        else {
            panic!("Expected RSVP");
        };
        assert_eq!(request.key.as_u32(), 4);

        assert_eq!(
            classify_bytes(b"DROP please CCCP/0.3\r\n").await.unwrap(),
            Request::Drop
        );
        assert_eq!(
            classify_bytes(b"SHUTDOWN please CCCP/0.1\r\n").await.unwrap(),
            Request::Shutdown
        );
    }

    #[tokio::test]
    async fn test_cccp_errors() {
        let err = classify_bytes(b"DROP now CCCP/0.3\r\n").await.unwrap_err();
        assert_eq!(err.role, Role::Cccp(ProtocolVersion::V03));
        assert_eq!(status(&err).as_deref(), Some("400 Badly formed DROP request"));

        let err = classify_bytes(b"REGISTER nobody s3cret CCCP/0.2\r\n").await.unwrap_err();
        assert_eq!(err.role, Role::Cccp(ProtocolVersion::V02));
        assert_eq!(status(&err).as_deref(), Some("400 Bad URI"));

        let err = classify_bytes(b"REGISTER a@b s3cret\r\n").await.unwrap_err();
        assert_eq!(
            status(&err).as_deref(),
            Some("400 Not enough parameters in REGISTER request")
        );
    }
}
