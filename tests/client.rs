use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Once;
use std::thread;
use std::time::Duration;

use asyncmc::{ClientConfig, McClient, McError};

/// Installs a subscriber once so `RUST_LOG` surfaces the pool's debug
/// events while the tests run.
fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// One parsed command as the mock server saw it.
struct Command {
    fields: Vec<Vec<u8>>,
    data: Option<Vec<u8>>,
}

/// Spawns a scripted memcached server that accepts one connection and
/// serves `expected_commands` commands on it.
fn spawn_server(
    expected_commands: usize,
    handler: fn(usize, &Command, &mut TcpStream),
) -> (String, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");

    thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("accept");
        let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));
        let mut reader = BufReader::new(stream.try_clone().expect("clone"));
        for idx in 0..expected_commands {
            let command = read_command(&mut reader).expect("read command");
            handler(idx, &command, &mut stream);
        }
    });

    (addr.ip().to_string(), addr.port())
}

fn read_command(reader: &mut BufReader<TcpStream>) -> std::io::Result<Command> {
    let mut line = Vec::new();
    read_line(reader, &mut line)?;
    let fields: Vec<Vec<u8>> = line
        .split(|b| *b == b' ')
        .filter(|f| !f.is_empty())
        .map(|f| f.to_vec())
        .collect();

    let is_storage = matches!(
        fields.first().map(|f| f.as_slice()),
        Some(b"set") | Some(b"add") | Some(b"replace")
    );
    let data = if is_storage {
        let len = parse_usize(fields.last().expect("bytes field"))?;
        let mut data = vec![0u8; len];
        reader.read_exact(&mut data)?;
        let mut crlf = [0u8; 2];
        reader.read_exact(&mut crlf)?;
        assert_eq!(&crlf, b"\r\n", "data block terminator");
        Some(data)
    } else {
        None
    };

    Ok(Command { fields, data })
}

fn read_line(reader: &mut BufReader<TcpStream>, buf: &mut Vec<u8>) -> std::io::Result<()> {
    buf.clear();
    let bytes = reader.read_until(b'\n', buf)?;
    if bytes == 0 {
        return Err(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof"));
    }
    if buf.len() < 2 || buf[buf.len() - 2] != b'\r' {
        return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "line"));
    }
    buf.truncate(buf.len() - 2);
    Ok(())
}

fn parse_usize(data: &[u8]) -> std::io::Result<usize> {
    std::str::from_utf8(data)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidData, "length"))
}

fn reply(stream: &mut TcpStream, bytes: &[u8]) {
    stream.write_all(bytes).expect("reply");
    stream.flush().expect("flush");
}

async fn connect(host: String, port: u16) -> McClient {
    init_tracing();
    McClient::connect(host, port).await.expect("client")
}

#[tokio::test]
async fn set_round_trip() {
    let (host, port) = spawn_server(1, |_, command, stream| {
        assert_eq!(command.fields[0], b"set");
        assert_eq!(command.fields[1], b"key");
        assert_eq!(command.fields[2], b"7");
        assert_eq!(command.fields[3], b"30");
        assert_eq!(command.fields[4], b"5");
        assert_eq!(command.data.as_deref(), Some(&b"hello"[..]));
        reply(stream, b"STORED\r\n");
    });

    let client = connect(host, port).await;
    client.set(b"key", b"hello", 7, 30).await.expect("set");
    assert_eq!(client.pool().idle_count(), 1);
}

#[tokio::test]
async fn unexpected_ack_is_protocol_error_and_connection_is_dropped() {
    let (host, port) = spawn_server(1, |_, _, stream| {
        reply(stream, b"NOT_STORED\r\n");
    });

    let client = connect(host, port).await;
    let err = client.set(b"key", b"hello", 0, 0).await.unwrap_err();
    match err {
        McError::Protocol { reply } => assert_eq!(reply, b"NOT_STORED"),
        other => panic!("unexpected error: {other:?}"),
    }
    // A desynced connection must not be recycled.
    assert_eq!(client.pool().idle_count(), 0);
    assert_eq!(client.pool().in_flight(), 0);
}

#[tokio::test]
async fn get_hit_returns_payload() {
    let (host, port) = spawn_server(1, |_, command, stream| {
        assert_eq!(command.fields[0], b"get");
        assert_eq!(command.fields[1], b"key");
        reply(stream, b"VALUE key 0 5\r\nhello\r\nEND\r\n");
    });

    let client = connect(host, port).await;
    let value = client.get(b"key").await.expect("get");
    assert_eq!(value.as_deref(), Some(&b"hello"[..]));
}

#[tokio::test]
async fn get_hit_survives_fragmented_reply() {
    let (host, port) = spawn_server(1, |_, _, stream| {
        reply(stream, b"VALUE key 0 5\r\nhe");
        thread::sleep(Duration::from_millis(20));
        reply(stream, b"llo\r\nEN");
        thread::sleep(Duration::from_millis(20));
        reply(stream, b"D\r\n");
    });

    let client = connect(host, port).await;
    let value = client.get(b"key").await.expect("get");
    assert_eq!(value.as_deref(), Some(&b"hello"[..]));
}

#[tokio::test]
async fn get_miss_returns_none() {
    let (host, port) = spawn_server(1, |_, _, stream| {
        reply(stream, b"END\r\n");
    });

    let client = connect(host, port).await;
    assert_eq!(client.get(b"missing").await.expect("get"), None);
}

#[tokio::test]
async fn corrupted_trailer_is_protocol_error() {
    let (host, port) = spawn_server(1, |_, _, stream| {
        reply(stream, b"VALUE key 0 5\r\nhello\r\nXXX\r\n");
    });

    let client = connect(host, port).await;
    let err = client.get(b"key").await.unwrap_err();
    assert!(matches!(err, McError::Protocol { .. }));
    assert_eq!(client.pool().idle_count(), 0);
}

#[tokio::test]
async fn numeric_reply_to_get_carries_the_server_line() {
    let (host, port) = spawn_server(1, |_, _, stream| {
        reply(stream, b"42\r\n");
    });

    let client = connect(host, port).await;
    let err = client.get(b"key").await.unwrap_err();
    match err {
        McError::Protocol { reply } => assert_eq!(reply, b"42"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn incr_returns_new_value() {
    let (host, port) = spawn_server(2, |idx, command, stream| {
        match idx {
            0 => {
                assert_eq!(command.fields[0], b"incr");
                assert_eq!(command.fields[1], b"counter");
                assert_eq!(command.fields[2], b"3");
                reply(stream, b"42\r\n");
            }
            _ => {
                assert_eq!(command.fields[0], b"decr");
                reply(stream, b"40\r\n");
            }
        }
    });

    let client = connect(host, port).await;
    assert_eq!(client.incr(b"counter", 3).await.expect("incr"), Some(42));
    assert_eq!(client.decr(b"counter", 2).await.expect("decr"), Some(40));
}

#[tokio::test]
async fn incr_on_missing_key_returns_none() {
    let (host, port) = spawn_server(1, |_, _, stream| {
        reply(stream, b"NOT_FOUND\r\n");
    });

    let client = connect(host, port).await;
    assert_eq!(client.incr(b"missing", 1).await.expect("incr"), None);
}

#[tokio::test]
async fn delete_expects_deleted() {
    let (host, port) = spawn_server(1, |_, command, stream| {
        assert_eq!(command.fields[0], b"delete");
        assert_eq!(command.fields[1], b"key");
        reply(stream, b"DELETED\r\n");
    });

    let client = connect(host, port).await;
    client.delete(b"key").await.expect("delete");
}

#[tokio::test]
async fn sequential_commands_reuse_one_connection() {
    let (host, port) = spawn_server(3, |idx, _, stream| match idx {
        0 => reply(stream, b"STORED\r\n"),
        1 => reply(stream, b"VALUE key 0 2\r\nhi\r\nEND\r\n"),
        _ => reply(stream, b"DELETED\r\n"),
    });

    let client = connect(host, port).await;
    client.set(b"key", b"hi", 0, 0).await.expect("set");
    let value = client.get(b"key").await.expect("get");
    assert_eq!(value.as_deref(), Some(&b"hi"[..]));
    client.delete(b"key").await.expect("delete");

    // All three exchanges ran on the single accepted stream; exactly one
    // connection exists and it is back in the cache.
    assert_eq!(client.pool().idle_count(), 1);
    assert_eq!(client.pool().in_flight(), 0);
}

#[tokio::test]
async fn peer_close_mid_request_fails_the_request() {
    let (host, port) = spawn_server(1, |_, _, stream| {
        let _ = stream.shutdown(std::net::Shutdown::Both);
    });

    let client = connect(host, port).await;
    let err = client.get(b"key").await.unwrap_err();
    assert!(matches!(err, McError::PeerClosed));
    assert_eq!(client.pool().idle_count(), 0);
    assert_eq!(client.pool().in_flight(), 0);
}

#[tokio::test]
async fn silent_server_times_out() {
    let (host, port) = spawn_server(1, |_, _, _| {
        thread::sleep(Duration::from_millis(500));
    });

    init_tracing();
    let config = ClientConfig {
        host,
        port,
        response_timeout: Some(Duration::from_millis(100)),
        ..ClientConfig::default()
    };
    let client = McClient::with_config(config).await.expect("client");

    let err = client.get(b"key").await.unwrap_err();
    assert!(matches!(err, McError::Timeout));
    assert_eq!(client.pool().idle_count(), 0);
    assert_eq!(client.pool().in_flight(), 0);
}

#[tokio::test]
async fn invalid_key_fails_before_any_io() {
    // No server at all; validation must reject the key first.
    let config = ClientConfig {
        host: "127.0.0.1".to_string(),
        port: 1,
        ..ClientConfig::default()
    };
    let client = McClient::with_config(config).await.expect("client");

    assert!(matches!(
        client.get(b"has space").await.unwrap_err(),
        McError::InvalidKey
    ));
    assert!(matches!(
        client.set(b"", b"v", 0, 0).await.unwrap_err(),
        McError::InvalidKey
    ));
}

#[tokio::test]
async fn shutdown_closes_idle_connections() {
    let (host, port) = spawn_server(1, |_, _, stream| {
        reply(stream, b"STORED\r\n");
    });

    let client = connect(host, port).await;
    client.set(b"key", b"v", 0, 0).await.expect("set");
    assert_eq!(client.pool().idle_count(), 1);

    client.shutdown();
    assert_eq!(client.pool().idle_count(), 0);
}
