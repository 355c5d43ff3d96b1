//! Minimal HTTP/1.1 responses sent by the proxy itself

use std::time::SystemTime;

use alien_core::time::http_date;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Value of the `Server` header
pub const SERVER_NAME: &str = concat!("alien-proxy/", env!("CARGO_PKG_VERSION"));

/// Version written on every status line
const HTTP_11: &str = "HTTP/1.1";

/// A response generated by the proxy (errors, liveness, listings)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    status: String,
    body: Option<String>,
    keep_alive: bool,
}

impl HttpResponse {
    /// Header-only response that closes the connection
    pub fn new(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            body: None,
            keep_alive: false,
        }
    }

    /// Error page: the status wrapped in `<html>`
    pub fn error(status: impl Into<String>) -> Self {
        let status = status.into();
        let body = format!("<html>{}</html>", status);
        Self::new(status).with_body(body)
    }

    /// Attach an HTML body
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Omit `Connection: close`; the caller keeps writing afterwards
    pub fn keep_alive(mut self) -> Self {
        self.keep_alive = true;
        self
    }

    /// Status code and reason
    pub fn status(&self) -> &str {
        &self.status
    }

    /// Render status line, headers and body
    pub fn render(&self, now: SystemTime) -> String {
        let mut out = format!("{} {}\r\n", HTTP_11, self.status);
        out.push_str(&format!("Date: {}\r\n", http_date(now)));
        out.push_str(&format!("Server: {}\r\n", SERVER_NAME));
        if !self.keep_alive {
            out.push_str("Connection: close\r\n");
        }
        out.push_str("Content-Type: text/html\r\n");
        if let Some(body) = &self.body {
            out.push_str(&format!("Content-Length: {}\r\n", body.len()));
        }
        out.push_str("\r\n");
        if let Some(body) = &self.body {
            out.push_str(body);
        }
        out
    }

    /// Write the response and flush
    pub async fn write_to<W>(&self, writer: &mut W) -> std::io::Result<()>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        log_status(HTTP_11, &self.status);
        writer
            .write_all(self.render(SystemTime::now()).as_bytes())
            .await?;
        writer.flush().await
    }
}

/// Log an outgoing status line: server errors loudly, Alien mistakes at
/// info, client mistakes at debug
pub fn log_status(protocol: &str, status: &str) {
    if status.starts_with("500") {
        tracing::error!("{} {}", protocol, status);
    } else if status.starts_with('2') {
        tracing::trace!("{} {}", protocol, status);
    } else if protocol.starts_with(alien_protocol::version::CCCP_PREFIX) {
        tracing::info!("{} {}", protocol, status);
    } else {
        tracing::debug!("{} {}", protocol, status);
    }
}
