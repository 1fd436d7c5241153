mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{fast_policy, next_record, next_status, MockTransport};
use mcu_serial_term_lib::serial::unified::{PollPolicy, ReaderState, SerialSession, SerialSessionBuilder};
use mcu_serial_term_lib::serial::{ConnectionParams, Direction, RecordMode, SendRequest, SerialError, SerialInterface};
use mcu_serial_term_lib::sink::{ChannelSink, SinkEvent};
use tokio::sync::mpsc::UnboundedReceiver;

fn session_with(mock: MockTransport) -> (SerialSession<MockTransport>, UnboundedReceiver<SinkEvent>) {
    let (sink, rx) = ChannelSink::new();
    let session = SerialSessionBuilder::new(mock, Arc::new(sink)).policy(fast_policy()).build();
    (session, rx)
}

#[tokio::test]
async fn test_received_lines_reach_sink() {
    let mock = MockTransport::new();
    let (mut session, mut rx) = session_with(mock.clone());

    session.connect(ConnectionParams::new("mock0", 115200)).await.unwrap();
    assert_eq!(session.state(), ReaderState::Running);
    let (connected, message) = next_status(&mut rx).await;
    assert!(connected);
    assert!(message.contains("mock0"), "{}", message);

    mock.push_incoming(b"AT\n");
    mock.push_incoming(b"STA");
    mock.push_incoming(b"TUS\r\n");

    let first = next_record(&mut rx).await;
    assert_eq!((first.direction, first.mode, first.payload.as_str()), (Direction::Rx, RecordMode::Text, "AT"));
    assert_eq!(next_record(&mut rx).await.payload, "STATUS");

    session.stop().await.unwrap();
    let metrics = session.metrics();
    assert_eq!(metrics.text_lines, 2);
    assert_eq!(metrics.bytes_received, 11);
}

#[tokio::test]
async fn test_binary_chunk_reaches_sink_as_hex() {
    let mock = MockTransport::new();
    let (mut session, mut rx) = session_with(mock.clone());
    session.connect(ConnectionParams::new("mock0", 9600)).await.unwrap();

    mock.push_incoming(&[0xAA, 0x55, 0xFF]);
    let record = next_record(&mut rx).await;
    assert_eq!(record.mode, RecordMode::Hex);
    assert_eq!(record.payload, "AA 55 FF");

    session.stop().await.unwrap();
    assert_eq!(session.metrics().hex_records, 1);
}

#[tokio::test]
async fn test_stop_right_after_start_closes_transport() {
    let mock = MockTransport::opened("mock0");
    let (mut session, _rx) = session_with(mock.clone());

    let started = Instant::now();
    session.start().unwrap();
    session.stop().await.unwrap();

    assert!(started.elapsed() < fast_policy().stop_timeout);
    assert_eq!(session.state(), ReaderState::Stopped);
    assert!(!mock.is_open_shared());
    assert_eq!(mock.state.lock().unwrap().close_count, 1);
    assert!(session.transport().is_some());
}

#[tokio::test]
async fn test_stop_with_real_interface_and_no_port() {
    let (sink, _rx) = ChannelSink::new();
    let mut session = SerialSessionBuilder::new(SerialInterface::new(), Arc::new(sink)).build();
    session.start().unwrap();
    tokio::time::timeout(Duration::from_secs(4), session.stop()).await.expect("stop hung").unwrap();
    assert!(session.transport().map(|t| !mcu_serial_term_lib::serial::Transport::is_open(t)).unwrap_or(false));
}

#[tokio::test]
async fn test_stop_twice_and_restart() {
    let mock = MockTransport::new();
    let (mut session, mut rx) = session_with(mock.clone());

    session.stop().await.unwrap();
    session.start().unwrap();
    session.stop().await.unwrap();
    session.stop().await.unwrap();

    session.connect(ConnectionParams::new("mock1", 115200)).await.unwrap();
    mock.push_incoming(b"again\n");
    assert_eq!(next_record(&mut rx).await.payload, "again");
    session.stop().await.unwrap();
    assert!(!mock.is_open_shared());
}

#[tokio::test]
async fn test_read_failure_reported_and_retried() {
    let mock = MockTransport::new();
    let (mut session, mut rx) = session_with(mock.clone());
    session.connect(ConnectionParams::new("mock0", 115200)).await.unwrap();
    next_status(&mut rx).await;

    mock.state.lock().unwrap().fail_reads = 1;
    mock.push_incoming(b"OK\n");

    let (connected, message) = next_status(&mut rx).await;
    assert!(connected, "read errors must not tear the connection down");
    assert!(message.starts_with("Receive error"), "{}", message);
    assert_eq!(next_record(&mut rx).await.payload, "OK");

    assert!(mock.is_open_shared());
    let metrics = session.metrics();
    assert_eq!(metrics.read_errors, 1);
    assert!(metrics.last_error.unwrap().contains("framing error"));
    session.stop().await.unwrap();
}

#[tokio::test]
async fn test_send_writes_and_echoes() {
    let mock = MockTransport::new();
    let (mut session, mut rx) = session_with(mock.clone());
    session.connect(ConnectionParams::new("mock0", 115200)).await.unwrap();
    next_status(&mut rx).await;

    assert_eq!(session.send(SendRequest::text("AT", true, true)).await.unwrap(), 4);
    let echo = next_record(&mut rx).await;
    assert_eq!((echo.direction, echo.mode, echo.payload.as_str()), (Direction::Tx, RecordMode::Text, "AT\r\n"));

    session.send(SendRequest::hex("414")).await.unwrap();
    let echo = next_record(&mut rx).await;
    assert_eq!((echo.mode, echo.payload.as_str()), (RecordMode::Hex, "04 14"));

    let err = session.send(SendRequest::hex("4G")).await.unwrap_err();
    assert!(matches!(err, SerialError::InvalidHex(_)));

    assert_eq!(mock.written(), vec![b'A', b'T', b'\r', b'\n', 0x04, 0x14]);
    assert_eq!(session.metrics().bytes_sent, 6);
    session.stop().await.unwrap();
    // Nothing was echoed for the rejected hex
    while let Ok(event) = rx.try_recv() {
        assert!(!matches!(event, SinkEvent::Record(_)), "unexpected {:?}", event);
    }
}

#[tokio::test]
async fn test_send_without_connection() {
    let mock = MockTransport::new();
    let (mut session, mut rx) = session_with(mock.clone());

    // Reader not started yet
    assert!(matches!(session.send(SendRequest::text("AT", false, true)).await, Err(SerialError::NotConnected)));
    assert!(matches!(session.send(SendRequest::hex("zz")).await, Err(SerialError::InvalidHex(_))));

    session.start().unwrap();
    assert!(matches!(session.send(SendRequest::text("AT", false, true)).await, Err(SerialError::NotConnected)));
    session.stop().await.unwrap();

    assert!(mock.written().is_empty());
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_write_failure_keeps_connection() {
    let mock = MockTransport::new();
    let (mut session, mut rx) = session_with(mock.clone());
    session.connect(ConnectionParams::new("mock0", 115200)).await.unwrap();
    next_status(&mut rx).await;

    mock.state.lock().unwrap().fail_writes = true;
    let err = session.send(SendRequest::text("RST", false, true)).await.unwrap_err();
    assert!(matches!(err, SerialError::WriteFailure(_)));
    assert!(mock.is_open_shared());
    assert_eq!(session.metrics().connected_port.as_deref(), Some("mock0"));
    session.stop().await.unwrap();
}

#[tokio::test]
async fn test_reconnect_closes_previous_handle() {
    let mock = MockTransport::new();
    let (mut session, _rx) = session_with(mock.clone());

    session.connect(ConnectionParams::new("mock0", 115200)).await.unwrap();
    session.connect(ConnectionParams::new("mock1", 9600)).await.unwrap();
    {
        let state = mock.state.lock().unwrap();
        assert_eq!(state.open_count, 2);
        assert_eq!(state.close_count, 1);
        assert!(state.open);
    }
    assert_eq!(session.metrics().connected_port.as_deref(), Some("mock1"));

    session.disconnect().await.unwrap();
    session.disconnect().await.unwrap();
    assert!(!mock.is_open_shared());
    assert_eq!(mock.state.lock().unwrap().close_count, 2);
    session.stop().await.unwrap();
}

#[tokio::test]
async fn test_connect_failure_reported() {
    let mock = MockTransport::new();
    mock.state.lock().unwrap().fail_open = true;
    let (mut session, mut rx) = session_with(mock.clone());

    let err = session.connect(ConnectionParams::new("mock0", 115200)).await.unwrap_err();
    assert!(matches!(err, SerialError::PortUnavailable(_)));
    let (connected, message) = next_status(&mut rx).await;
    assert!(!connected);
    assert!(message.starts_with("Connection failed"), "{}", message);

    let err = session.connect(ConnectionParams::new("mock0", 0)).await.unwrap_err();
    assert!(matches!(err, SerialError::InvalidParameters(_)));
    session.stop().await.unwrap();
}

#[tokio::test]
async fn test_partial_line_discarded_on_disconnect() {
    let mock = MockTransport::new();
    let (mut session, mut rx) = session_with(mock.clone());
    session.connect(ConnectionParams::new("mock0", 115200)).await.unwrap();

    mock.push_incoming(b"half a li");
    tokio::time::sleep(Duration::from_millis(50)).await;
    session.disconnect().await.unwrap();
    session.connect(ConnectionParams::new("mock0", 115200)).await.unwrap();
    mock.push_incoming(b"ne\nwhole\n");

    assert_eq!(next_record(&mut rx).await.payload, "ne");
    assert_eq!(next_record(&mut rx).await.payload, "whole");
    session.stop().await.unwrap();
}

#[tokio::test]
async fn test_failed_reconnect_reports_actual_state() {
    let mock = MockTransport::new();
    let (mut session, mut rx) = session_with(mock.clone());
    session.connect(ConnectionParams::new("mock0", 115200)).await.unwrap();
    next_status(&mut rx).await;

    let err = session.connect(ConnectionParams::new("mock0", 0)).await.unwrap_err();
    assert!(matches!(err, SerialError::InvalidParameters(_)));

    // The old handle is closed first, so "disconnected" must be the truth
    let (connected, message) = next_status(&mut rx).await;
    assert!(!connected);
    assert!(message.starts_with("Connection failed"), "{}", message);
    assert!(!mock.is_open_shared());
    assert_eq!(session.metrics().connected_port, None);

    mock.push_incoming(b"still here\n");
    tokio::time::sleep(Duration::from_millis(50)).await;
    session.stop().await.unwrap();
    while let Ok(event) = rx.try_recv() {
        match event {
            SinkEvent::Record(record) => panic!("record after failed reconnect: {:?}", record),
            SinkEvent::Status { connected, .. } => assert!(!connected),
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stop_times_out_on_stalled_transport() {
    let mock = MockTransport::opened("mock0");
    mock.state.lock().unwrap().stall_reads = Some(Duration::from_millis(1500));
    let (sink, mut rx) = ChannelSink::new();
    let policy = PollPolicy { stop_timeout: Duration::from_millis(100), ..fast_policy() };
    let mut session = SerialSessionBuilder::new(mock.clone(), Arc::new(sink)).policy(policy).build();

    session.start().unwrap();
    // Let the reader enter its first poll
    tokio::time::sleep(Duration::from_millis(20)).await;

    let started = Instant::now();
    let result = session.stop().await;
    assert!(matches!(result, Err(SerialError::ReaderStopTimeout(bound)) if bound == Duration::from_millis(100)), "{:?}", result);
    assert!(started.elapsed() < Duration::from_millis(800), "stop took {:?}", started.elapsed());
    assert_eq!(session.state(), ReaderState::Stopped);

    let (connected, message) = next_status(&mut rx).await;
    assert!(!connected);
    assert!(message.contains("did not stop"), "{}", message);

    assert!(matches!(session.start(), Err(SerialError::TransportLost)));
}

#[tokio::test]
async fn test_panicking_transport_reported_on_stop() {
    let mock = MockTransport::new();
    let (mut session, mut rx) = session_with(mock.clone());
    session.connect(ConnectionParams::new("mock0", 115200)).await.unwrap();
    next_status(&mut rx).await;

    mock.state.lock().unwrap().panic_on_write = true;
    let err = session.send(SendRequest::text("AT", false, true)).await.unwrap_err();
    assert!(matches!(err, SerialError::ChannelClosed), "{:?}", err);

    assert!(matches!(session.stop().await, Err(SerialError::ReaderFailed(_))));
    assert_eq!(session.state(), ReaderState::Stopped);
    let (connected, message) = next_status(&mut rx).await;
    assert!(!connected);
    assert!(message.starts_with("Reader failed"), "{}", message);
}
