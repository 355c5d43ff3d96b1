//! Self-registration with an upstream load balancer
//!
//! The load balancer only needs to know this proxy exists and which port
//! it serves on; each registration is a single request on a fresh
//! connection.

use std::time::Duration;

use alien_core::config::LoadBalancerConfig;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

/// The request sent on each registration
pub fn registration_request(name: &str, port: u16) -> String {
    format!("LBREGISTER {}?port={} HTTP/1.1\r\n\r\n", name, port)
}

/// Register every `config.period` until `cancel` fires
pub async fn run_registrar(config: LoadBalancerConfig, port: u16, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(config.period);
    let address = format!("{}:{}", config.host, config.port);

    tracing::info!(
        "Starting load balancer registration with {} as {} (every {:?})",
        address,
        config.name,
        config.period
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(e) = register_once(&address, &config.name, port).await {
                    tracing::info!("Load balancer registration with {} failed: {}", address, e);
                }
            }
            _ = cancel.cancelled() => {
                tracing::info!("Load balancer registrar shutting down");
                break;
            }
        }
    }
}

async fn register_once(address: &str, name: &str, port: u16) -> std::io::Result<()> {
    let connect = TcpStream::connect(address);
    let mut stream = tokio::time::timeout(Duration::from_secs(5), connect)
        .await
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out"))??;
    stream
        .write_all(registration_request(name, port).as_bytes())
        .await?;
    stream.shutdown().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[test]
    fn test_request_format() {
        assert_eq!(
            registration_request("alien1", 8080),
            "LBREGISTER alien1?port=8080 HTTP/1.1\r\n\r\n"
        );
    }

    #[tokio::test]
    async fn test_registrar_sends_request() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let lb_port = listener.local_addr().unwrap().port();
        let config = LoadBalancerConfig {
            enabled: true,
            host: "127.0.0.1".to_string(),
            port: lb_port,
            period: Duration::from_secs(60),
            name: "alien7".to_string(),
        };

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_registrar(config, 8081, cancel.clone()));

        let (mut socket, _) = listener.accept().await.unwrap();
        let mut received = String::new();
        socket.read_to_string(&mut received).await.unwrap();
        assert_eq!(received, "LBREGISTER alien7?port=8081 HTTP/1.1\r\n\r\n");

        cancel.cancel();
        task.await.unwrap();
    }
}
