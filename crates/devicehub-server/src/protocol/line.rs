//! Newline-delimited JSON handshake.
//!
//! The device opens with a single hello line:
//!
//! ```text
//! {"core_id":"a1b2","product_id":6,"firmware_version":11}
//! ```
//!
//! The server answers `{"status":"online"}` and the session stays up until
//! the device closes the stream. A hello longer than [`MAX_HELLO_LEN`] bytes
//! ends the session. Later traffic is read and discarded.

use std::net::SocketAddr;
use std::time::Duration;

use serde::Deserialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::debug;

use super::{
    HandshakeInfo, ProtocolEngine, ProtocolError, SIGNAL_CAPACITY, SessionSignal, SessionSignals,
};
use crate::registry::CoreId;

const ACK: &[u8] = b"{\"status\":\"online\"}\n";

/// Longest accepted hello line, newline excluded.
pub const MAX_HELLO_LEN: usize = 1024;

/// Chunk size used to discard post-handshake traffic.
const DRAIN_CHUNK: usize = 1024;

/// The first line a device sends.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Hello {
    pub core_id: CoreId,
    #[serde(default)]
    pub product_id: Option<i64>,
    #[serde(default)]
    pub firmware_version: Option<i64>,
}

/// Engine speaking the hello-line handshake.
#[derive(Debug, Clone, Copy)]
pub struct LineHandshake {
    timeout: Duration,
}

impl LineHandshake {
    /// `timeout` bounds the wait for the hello line.
    pub const fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl ProtocolEngine for LineHandshake {
    fn start_protocol(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
    ) -> Result<SessionSignals, ProtocolError> {
        let (tx, rx) = mpsc::channel(SIGNAL_CAPACITY);
        tokio::spawn(drive(stream, peer, self.timeout, tx));
        Ok(rx)
    }
}

async fn drive(
    stream: TcpStream,
    peer: SocketAddr,
    timeout: Duration,
    tx: mpsc::Sender<SessionSignal>,
) {
    let reason = match run_session(stream, peer, timeout, &tx).await {
        Ok(()) => "closed by device".to_string(),
        Err(e) => e.to_string(),
    };
    debug!(peer = %peer, reason = %reason, "Session ended");
    if tx.send(SessionSignal::Disconnect { reason }).await.is_err() {
        debug!(peer = %peer, "Signal receiver gone before disconnect");
    }
}

async fn run_session(
    stream: TcpStream,
    peer: SocketAddr,
    timeout: Duration,
    tx: &mpsc::Sender<SessionSignal>,
) -> Result<(), ProtocolError> {
    let (read, mut write) = stream.into_split();
    let mut reader = BufReader::new(read);

    let line = tokio::time::timeout(timeout, read_hello(&mut reader))
        .await
        .map_err(|_| ProtocolError::Handshake(format!("no hello within {timeout:?}")))??;
    let hello: Hello = serde_json::from_slice(line.trim_ascii())
        .map_err(|e| ProtocolError::Handshake(format!("invalid hello: {e}")))?;

    let info = HandshakeInfo {
        core_id: hello.core_id,
        remote_ip: peer.ip(),
        product_id: hello.product_id,
        firmware_version: hello.firmware_version,
    };
    tx.send(SessionSignal::Ready(info))
        .await
        .map_err(|_| ProtocolError::Handshake("coordinator stopped listening".into()))?;
    write.write_all(ACK).await?;

    let mut scratch = [0u8; DRAIN_CHUNK];
    while reader.read(&mut scratch).await? > 0 {}
    Ok(())
}

/// Read one line of at most [`MAX_HELLO_LEN`] bytes. A final line without a
/// newline is accepted at EOF.
async fn read_hello<R>(reader: &mut R) -> Result<Vec<u8>, ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    let limit = (MAX_HELLO_LEN + 1) as u64;
    let read = reader.take(limit).read_until(b'\n', &mut line).await?;

    if read == 0 {
        return Err(ProtocolError::Handshake("stream closed before hello".into()));
    }
    if line.last() == Some(&b'\n') {
        line.pop();
    } else if line.len() > MAX_HELLO_LEN {
        return Err(ProtocolError::Handshake("hello too long".into()));
    }
    Ok(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn connect(engine: LineHandshake) -> (TcpStream, SessionSignals) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, peer) = listener.accept().await.unwrap();
        let signals = engine.start_protocol(server, peer).unwrap();
        (client, signals)
    }

    fn engine() -> LineHandshake {
        LineHandshake::new(Duration::from_secs(5))
    }

    #[tokio::test]
    async fn hello_then_eof() {
        let (mut client, mut signals) = connect(engine()).await;
        client
            .write_all(b"{\"core_id\":\"A1B2\",\"product_id\":6,\"firmware_version\":11}\n")
            .await
            .unwrap();

        let Some(SessionSignal::Ready(info)) = signals.recv().await else {
            panic!("expected ready");
        };
        assert_eq!(info.core_id.as_str(), "A1B2");
        assert_eq!(info.product_id, Some(6));
        assert_eq!(info.firmware_version, Some(11));
        assert!(info.remote_ip.is_loopback());

        let mut ack = String::new();
        BufReader::new(&mut client).read_line(&mut ack).await.unwrap();
        assert_eq!(ack.trim(), "{\"status\":\"online\"}");

        drop(client);
        assert!(matches!(
            signals.recv().await,
            Some(SessionSignal::Disconnect { .. })
        ));
        assert!(signals.recv().await.is_none());
    }

    #[tokio::test]
    async fn optional_fields_default_to_none() {
        let (mut client, mut signals) = connect(engine()).await;
        client.write_all(b"{\"core_id\":\"ff00\"}\n").await.unwrap();

        let Some(SessionSignal::Ready(info)) = signals.recv().await else {
            panic!("expected ready");
        };
        assert!(info.product_id.is_none());
        assert!(info.firmware_version.is_none());
    }

    #[tokio::test]
    async fn invalid_hello_disconnects_without_ready() {
        let (mut client, mut signals) = connect(engine()).await;
        client.write_all(b"{\"core_id\":\"not hex\"}\n").await.unwrap();

        let Some(SessionSignal::Disconnect { reason }) = signals.recv().await else {
            panic!("expected disconnect");
        };
        assert!(reason.contains("invalid hello"), "{reason}");
    }

    #[tokio::test]
    async fn silent_device_times_out() {
        let (_client, mut signals) = connect(LineHandshake::new(Duration::from_millis(50))).await;

        let Some(SessionSignal::Disconnect { reason }) = signals.recv().await else {
            panic!("expected disconnect");
        };
        assert!(reason.contains("no hello"), "{reason}");
    }

    #[tokio::test]
    async fn oversized_hello_is_rejected() {
        let (mut client, mut signals) = connect(engine()).await;
        let mut hello = br#"{"core_id":"a1b2"}"#.to_vec();
        hello.resize(MAX_HELLO_LEN * 4, b' ');
        hello.push(b'\n');
        client.write_all(&hello).await.unwrap();

        let Some(SessionSignal::Disconnect { reason }) = signals.recv().await else {
            panic!("expected disconnect without ready");
        };
        assert!(reason.contains("hello too long"), "{reason}");
    }

    #[tokio::test]
    async fn hello_at_the_limit_is_accepted() {
        let (mut client, mut signals) = connect(engine()).await;
        let mut hello = br#"{"core_id":"a1b2"}"#.to_vec();
        hello.resize(MAX_HELLO_LEN, b' ');
        hello.push(b'\n');
        client.write_all(&hello).await.unwrap();

        assert!(matches!(
            signals.recv().await,
            Some(SessionSignal::Ready(_))
        ));
    }

    #[tokio::test]
    async fn traffic_after_hello_is_discarded() {
        let (mut client, mut signals) = connect(engine()).await;
        client.write_all(b"{\"core_id\":\"a1b2\"}\n").await.unwrap();
        assert!(matches!(
            signals.recv().await,
            Some(SessionSignal::Ready(_))
        ));

        // No newline anywhere: nothing may accumulate waiting for one.
        client.write_all(&vec![b'x'; MAX_HELLO_LEN * 64]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(signals.try_recv().is_err());

        drop(client);
        assert!(matches!(
            signals.recv().await,
            Some(SessionSignal::Disconnect { .. })
        ));
    }

    #[tokio::test]
    async fn eof_before_hello_disconnects() {
        let (client, mut signals) = connect(engine()).await;
        drop(client);

        assert!(matches!(
            signals.recv().await,
            Some(SessionSignal::Disconnect { .. })
        ));
    }
}
