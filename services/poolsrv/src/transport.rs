//! Bus link
//!
//! The engine only sees byte chunks, so any duplex byte stream will do:
//! a local RS-485 adapter through tokio-serial, or a TCP bridge.

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info};

use crate::config::SerialConfig;
use crate::error::{PoolSrvError, Result};

/// Duplex byte stream carrying the bus
pub trait BusStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> BusStream for T {}

/// Opens (and reopens) the bus link
#[async_trait]
pub trait BusConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn BusStream>>;

    fn describe(&self) -> String;
}

/// Local serial port or TCP bridge, per [`SerialConfig`]
#[derive(Debug, Clone)]
pub struct SerialConnector {
    config: SerialConfig,
}

impl SerialConnector {
    pub fn new(config: SerialConfig) -> Self {
        Self { config }
    }

    fn parse_data_bits(&self) -> tokio_serial::DataBits {
        match self.config.data_bits {
            5 => tokio_serial::DataBits::Five,
            6 => tokio_serial::DataBits::Six,
            7 => tokio_serial::DataBits::Seven,
            _ => tokio_serial::DataBits::Eight,
        }
    }

    fn parse_parity(&self) -> tokio_serial::Parity {
        match self.config.parity.to_lowercase().as_str() {
            "even" => tokio_serial::Parity::Even,
            "odd" => tokio_serial::Parity::Odd,
            _ => tokio_serial::Parity::None,
        }
    }

    fn parse_stop_bits(&self) -> tokio_serial::StopBits {
        match self.config.stop_bits {
            2 => tokio_serial::StopBits::Two,
            _ => tokio_serial::StopBits::One,
        }
    }

    async fn open_tcp(&self, addr: &str) -> Result<Box<dyn BusStream>> {
        debug!("Connecting to bus bridge {}", addr);
        let stream = tokio::time::timeout(self.config.timeout(), TcpStream::connect(addr))
            .await
            .map_err(|_| PoolSrvError::transport(format!("connect to {} timed out", addr)))??;
        stream.set_nodelay(true)?;
        info!("Connected to bus bridge {}", addr);
        Ok(Box::new(stream))
    }

    fn open_serial(&self) -> Result<Box<dyn BusStream>> {
        debug!("Opening serial port: {}", self.config.port);
        let port = tokio_serial::new(&self.config.port, self.config.baud_rate)
            .data_bits(self.parse_data_bits())
            .parity(self.parse_parity())
            .stop_bits(self.parse_stop_bits())
            .flow_control(tokio_serial::FlowControl::None)
            .timeout(self.config.timeout())
            .open_native_async()
            .map_err(|e| PoolSrvError::transport(format!("open {}: {}", self.config.port, e)))?;
        info!("Opened serial port: {}", self.config.describe());
        Ok(Box::new(port))
    }
}

#[async_trait]
impl BusConnector for SerialConnector {
    async fn connect(&self) -> Result<Box<dyn BusStream>> {
        match &self.config.net_connect {
            Some(addr) => self.open_tcp(addr).await,
            None => self.open_serial(),
        }
    }

    fn describe(&self) -> String {
        self.config.describe()
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn test_line_settings() {
        let connector = SerialConnector::new(SerialConfig {
            data_bits: 7,
            parity: "Even".to_string(),
            stop_bits: 2,
            ..Default::default()
        });
        assert_eq!(connector.parse_data_bits(), tokio_serial::DataBits::Seven);
        assert_eq!(connector.parse_parity(), tokio_serial::Parity::Even);
        assert_eq!(connector.parse_stop_bits(), tokio_serial::StopBits::Two);
    }

    #[tokio::test]
    async fn test_tcp_bridge() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connector = SerialConnector::new(SerialConfig {
            net_connect: Some(addr.to_string()),
            ..Default::default()
        });

        let (mut stream, accepted) = tokio::join!(
            async { connector.connect().await.unwrap() },
            async { listener.accept().await.unwrap().0 }
        );
        let mut peer = accepted;
        stream.write_all(&[0xFF, 0xA5]).await.unwrap();
        let mut buf = [0u8; 2];
        peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, [0xFF, 0xA5]);
    }

    #[tokio::test]
    async fn test_missing_serial_port() {
        let connector = SerialConnector::new(SerialConfig {
            port: "/dev/definitely-not-a-port".to_string(),
            ..Default::default()
        });
        assert!(matches!(connector.connect().await, Err(PoolSrvError::Transport(_))));
    }
}
