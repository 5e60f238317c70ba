//! Acquisition session tests against a mock serial port.
//!
//! The mock mirrors what an instrument does on the wire: it echoes
//! configuration commands while idle and streams binary words once started.

use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::timeout;

use dataq_stream::{
    AcquisitionSession, DaqError, DecoderOptions, ModelProfile, OutputRecord, ScanList,
    SessionCommand, SessionConfig, TransportError,
};

// =============================================================================
// Mock Serial Port Implementation
// =============================================================================

/// The session-facing side of the mock serial port.
#[derive(Debug)]
pub struct MockSerialPort {
    writes_tx: UnboundedSender<Vec<u8>>,
    reads_rx: UnboundedReceiver<Vec<u8>>,
    read_buffer: VecDeque<u8>,
}

/// The test-facing side, playing the instrument.
#[derive(Debug)]
pub struct MockDeviceHarness {
    writes_rx: UnboundedReceiver<Vec<u8>>,
    reads_tx: UnboundedSender<Vec<u8>>,
    write_buffer: Vec<u8>,
}

pub fn new_mock_serial() -> (MockSerialPort, MockDeviceHarness) {
    let (client_to_harness_tx, client_to_harness_rx) = mpsc::unbounded_channel();
    let (harness_to_client_tx, harness_to_client_rx) = mpsc::unbounded_channel();

    let port = MockSerialPort {
        writes_tx: client_to_harness_tx,
        reads_rx: harness_to_client_rx,
        read_buffer: VecDeque::new(),
    };
    let harness = MockDeviceHarness {
        writes_rx: client_to_harness_rx,
        reads_tx: harness_to_client_tx,
        write_buffer: Vec::new(),
    };
    (port, harness)
}

impl AsyncRead for MockSerialPort {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.read_buffer.is_empty() {
            match self.reads_rx.poll_recv(cx) {
                Poll::Ready(Some(chunk)) => self.read_buffer.extend(chunk),
                Poll::Ready(None) => return Poll::Ready(Ok(())), // EOF
                Poll::Pending => return Poll::Pending,
            }
        }
        let to_read = std::cmp::min(buf.remaining(), self.read_buffer.len());
        let chunk: Vec<u8> = self.read_buffer.drain(..to_read).collect();
        buf.put_slice(&chunk);
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for MockSerialPort {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.writes_tx.send(buf.to_vec()) {
            Ok(_) => Poll::Ready(Ok(buf.len())),
            Err(_) => Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "mock device harness disconnected",
            ))),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

impl MockDeviceHarness {
    /// Send bytes to the session.
    pub fn send_response(&self, data: &[u8]) {
        self.reads_tx
            .send(data.to_vec())
            .expect("session port disconnected");
    }

    /// Wait for the session to write `expected`.
    pub async fn expect_write(&mut self, expected: &[u8]) {
        while self.write_buffer.len() < expected.len() {
            match timeout(Duration::from_secs(2), self.writes_rx.recv()).await {
                Ok(Some(chunk)) => self.write_buffer.extend_from_slice(&chunk),
                Ok(None) => panic!("Session port closed while expecting a write."),
                Err(_) => panic!(
                    "Timeout waiting for write. Expected `{}`, got `{}`.",
                    String::from_utf8_lossy(expected),
                    String::from_utf8_lossy(&self.write_buffer)
                ),
            }
        }
        let actual = &self.write_buffer[..expected.len()];
        assert_eq!(
            actual,
            expected,
            "Expected `{}`, got `{}`.",
            String::from_utf8_lossy(expected),
            String::from_utf8_lossy(actual)
        );
        self.write_buffer.drain(..expected.len());
    }

    /// Expect a command and echo it back, as an idle instrument does.
    pub async fn expect_and_echo(&mut self, command: &str) {
        let line = format!("{command}\r");
        self.expect_write(line.as_bytes()).await;
        self.send_response(line.as_bytes());
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn words(values: &[i16]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn di2008_config() -> SessionConfig {
    let list = ScanList::build(&[0x0A00, 0x1303], ModelProfile::Di2008).unwrap();
    SessionConfig::new(list)
        .response_timeout(Duration::from_millis(500))
        .settle_ms(20)
}

async fn complete_di2008_handshake(harness: &mut MockDeviceHarness) {
    harness.expect_write(b"stop\r").await;
    for command in ["ps 0", "slist 0 2560", "slist 1 4867", "dec 20", "srate 4"] {
        harness.expect_and_echo(command).await;
    }
}

async fn next_record(rx: &mut mpsc::Receiver<OutputRecord>) -> OutputRecord {
    timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for a record")
        .expect("record channel closed")
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn handshake_start_stream_stop_quit() {
    let (port, mut harness) = new_mock_serial();
    let session = AcquisitionSession::new(port, di2008_config()).unwrap();
    let (command_tx, command_rx) = mpsc::channel(8);
    let (record_tx, mut record_rx) = mpsc::channel(8);
    let task = tokio::spawn(session.run(command_rx, record_tx));

    complete_di2008_handshake(&mut harness).await;

    command_tx.send(SessionCommand::Start).await.unwrap();
    harness.expect_write(b"start\r").await;

    // Two passes split mid-word, then half a pass that must never decode.
    let stream = words(&[16384, 1000, -16384, i16::MIN, 8192]);
    harness.send_response(&stream[..3]);
    harness.send_response(&stream[3..]);

    let first = next_record(&mut record_rx).await;
    assert_eq!(first.sequence, 0);
    assert_eq!(first.to_string(), "5.000, 609.987");
    let second = next_record(&mut record_rx).await;
    assert_eq!(second.to_string(), "-5.000, open");

    command_tx.send(SessionCommand::Stop).await.unwrap();
    harness.expect_write(b"stop\r").await;

    command_tx.send(SessionCommand::Quit).await.unwrap();
    let summary = task.await.unwrap().unwrap();
    assert_eq!(summary.acquisitions, 1);
    assert_eq!(summary.passes_decoded, 2);
    assert_eq!(summary.records_emitted, 2);
    assert_eq!(summary.bytes_discarded, 2);
    assert!(record_rx.recv().await.is_none());
}

#[tokio::test]
async fn reset_counter_while_idle_waits_for_echo() {
    let (port, mut harness) = new_mock_serial();
    let session = AcquisitionSession::new(port, di2008_config()).unwrap();
    let (command_tx, command_rx) = mpsc::channel(8);
    let (record_tx, _record_rx) = mpsc::channel(8);
    let task = tokio::spawn(session.run(command_rx, record_tx));

    complete_di2008_handshake(&mut harness).await;
    command_tx.send(SessionCommand::ResetCounter).await.unwrap();
    harness.expect_and_echo("reset 1").await;

    command_tx.send(SessionCommand::Quit).await.unwrap();
    let summary = task.await.unwrap().unwrap();
    assert_eq!(summary.acquisitions, 0);
    assert_eq!(summary.records_emitted, 0);
}

#[tokio::test]
async fn decimated_stream_and_restart() {
    let (port, mut harness) = new_mock_serial();
    let list = ScanList::build(&[0x0000], ModelProfile::Di1110).unwrap();
    let config = SessionConfig::new(list)
        .options(DecoderOptions::default().decimation(2))
        .response_timeout(Duration::from_millis(500))
        .settle_ms(20);
    let session = AcquisitionSession::new(port, config).unwrap();
    let (command_tx, command_rx) = mpsc::channel(8);
    let (record_tx, mut record_rx) = mpsc::channel(8);
    let task = tokio::spawn(session.run(command_rx, record_tx));

    harness.expect_write(b"stop\r").await;
    for command in ["encode 0", "ps 0", "slist 0 0", "srate 60000"] {
        harness.expect_and_echo(command).await;
    }

    command_tx.send(SessionCommand::Start).await.unwrap();
    harness.expect_write(b"start\r").await;
    // One full cycle plus one pass of the next
    harness.send_response(&words(&[16384, 0, 32767]));
    assert_eq!(next_record(&mut record_rx).await.to_string(), "2.500");

    command_tx.send(SessionCommand::Stop).await.unwrap();
    harness.expect_write(b"stop\r").await;

    // The abandoned pass must not leak into the next acquisition
    command_tx.send(SessionCommand::Start).await.unwrap();
    harness.expect_write(b"start\r").await;
    harness.send_response(&words(&[-16384, -16384]));
    let record = next_record(&mut record_rx).await;
    assert_eq!(record.to_string(), "-5.000");
    assert_eq!(record.sequence, 1);

    drop(command_tx);
    harness.expect_write(b"stop\r").await;
    let summary = task.await.unwrap().unwrap();
    assert_eq!(summary.acquisitions, 2);
    // the abandoned third pass was decoded, just never emitted
    assert_eq!(summary.passes_decoded, 5);
    assert_eq!(summary.records_emitted, 2);
}

#[tokio::test]
async fn instrument_disconnect_ends_session() {
    let (port, mut harness) = new_mock_serial();
    let session = AcquisitionSession::new(port, di2008_config()).unwrap();
    let (command_tx, command_rx) = mpsc::channel(8);
    let (record_tx, mut record_rx) = mpsc::channel(8);
    let task = tokio::spawn(session.run(command_rx, record_tx));

    complete_di2008_handshake(&mut harness).await;
    command_tx.send(SessionCommand::Start).await.unwrap();
    harness.expect_write(b"start\r").await;

    // Half a pass, then the cable is pulled
    harness.send_response(&words(&[100]));
    drop(harness);

    let result = task.await.unwrap();
    assert!(matches!(
        result,
        Err(DaqError::Transport(TransportError::Closed))
    ));
    assert!(record_rx.recv().await.is_none());
}

#[tokio::test]
async fn silent_instrument_times_out_during_handshake() {
    let (port, mut harness) = new_mock_serial();
    let config = di2008_config().response_timeout(Duration::from_millis(50));
    let session = AcquisitionSession::new(port, config).unwrap();
    let (_command_tx, command_rx) = mpsc::channel(8);
    let (record_tx, _record_rx) = mpsc::channel(8);
    let task = tokio::spawn(session.run(command_rx, record_tx));

    harness.expect_write(b"stop\r").await;
    harness.expect_write(b"ps 0\r").await;

    let result = task.await.unwrap();
    match result {
        Err(DaqError::Transport(TransportError::Timeout { command, timeout_ms })) => {
            assert_eq!(command, "ps 0");
            assert_eq!(timeout_ms, 50);
        }
        other => panic!("expected a timeout, got {other:?}"),
    }
}
