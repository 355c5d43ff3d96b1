//! Endpoints served by the proxy itself when `Host` is its public name

use std::time::Duration;

use alien_core::config::LoadBalancerConfig;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::http::HttpResponse;
use crate::registry::AlienInfo;
use crate::state::ProxyState;

/// Interval between lines on the connection test endpoint
const TEST_INTERVAL: Duration = Duration::from_secs(1);

const LIST_PAGE_HEAD: &str = "<!DOCTYPE HTML PUBLIC \"-//W3C//DTD HTML 4.01 Transitional//EN\"\n\
\"http://www.w3.org/TR/html4/loose.dtd\">\n\
<html>\n\
<head>\n\
<META HTTP-EQUIV=\"Content-Type\" CONTENT=\"text/html; charset=utf-8\">\n\
<title>Currently running webservers</title>\n\
</head>\n\
<body>\n\
<h1>Currently running webservers</h1>\n";

/// What an admin request asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminAction {
    /// Anything else: an empty `200 OK` for health checks
    Liveness,
    /// `/list`: registered Aliens as links
    List,
    /// Test URI: a never-ending trickle of lines
    Test {
        /// Connection number from a `?foo<n>` suffix
        connection: Option<u32>,
    },
}

impl AdminAction {
    /// Pick the action for a request URI
    pub fn for_uri(uri: &str, test_uri: &str) -> Self {
        if uri == "/list" {
            AdminAction::List
        } else if uri.starts_with(test_uri) {
            AdminAction::Test {
                connection: test_connection_number(uri),
            }
        } else {
            AdminAction::Liveness
        }
    }
}

fn test_connection_number(uri: &str) -> Option<u32> {
    const MARKER: &str = "?foo";
    let index = uri.find(MARKER).filter(|&index| index > 0)?;
    uri[index + MARKER.len()..].parse().ok()
}

/// Serve `action` on `writer`
pub async fn serve<W>(action: AdminAction, state: &ProxyState, writer: &mut W) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    match action {
        AdminAction::Liveness => HttpResponse::new("200 OK").write_to(writer).await,
        AdminAction::List => {
            tracing::info!("listing webservers");
            let page = list_page(&state.registry.list(), &state.config.load_balancer);
            HttpResponse::new("200 OK").with_body(page).write_to(writer).await
        }
        AdminAction::Test { connection } => test_connection(connection, writer).await,
    }
}

/// HTML listing with one link per Alien
pub fn list_page(aliens: &[AlienInfo], load_balancer: &LoadBalancerConfig) -> String {
    let mut body = String::from(LIST_PAGE_HEAD);
    if !aliens.is_empty() {
        body.push_str("<ul>\n");
    }
    for alien in aliens {
        let mut url = format!("http://{}", alien.uri.to_host());
        if load_balancer.enabled && load_balancer.port != 80 {
            url.push_str(&format!(":{}", load_balancer.port));
        }
        body.push_str(&format!("<li><a href=\"{}\">{}</a></li>\n", url, url));
    }
    if !aliens.is_empty() {
        body.push_str("</ul>\n");
    }
    body.push_str("</body>\n</html>\n");
    body
}

/// Keep writing a greeting once per interval until the client goes away
async fn test_connection<W>(connection: Option<u32>, writer: &mut W) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    HttpResponse::new("200 OK").keep_alive().write_to(writer).await?;

    let line = match connection {
        Some(n) => format!("Hello this is connection {}<br>\n", n),
        None => "Hello <br>\n".to_string(),
    };
    let mut interval = tokio::time::interval(TEST_INTERVAL);
    loop {
        interval.tick().await;
        let written = match writer.write_all(line.as_bytes()).await {
            Ok(()) => writer.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            tracing::debug!("test connection ended: {}", e);
            return Ok(());
        }
    }
}
