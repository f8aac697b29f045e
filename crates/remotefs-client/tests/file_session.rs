//! File sessions driven end to end against the in-memory server.
//!
//! # Coverage
//!
//! - Binary and text round trips through the full codec
//! - Line reads: `readline`, `readlines`, `lines()` stream
//! - Positioning: `seek`/`tell`/`truncate`
//! - Open-time failures: missing file, lock conflict, exclusive create
//! - Session lifecycle: atomic commit, lock release, server disconnect, timeouts

use std::io::SeekFrom;
use std::time::Duration;

use futures::TryStreamExt;
use remotefs_client::{
    ErrorKind, FileState, MemoryServer, OpenOptions, Payload, RemoteFileServices, RemoteFsError,
    TransportError,
};

// ============================================================================
// Shared test setup
// ============================================================================

fn setup() -> (MemoryServer, RemoteFileServices) {
    let server = MemoryServer::new();
    let fs = server.services().unwrap();
    (server, fs)
}

fn mode(mode: &str) -> OpenOptions {
    OpenOptions::new(mode).unwrap()
}

// ============================================================================
// Reading and writing
// ============================================================================

#[tokio::test]
async fn test_binary_write_seek_read() {
    let (server, fs) = setup();
    server.insert_dir("/work");

    let mut file = fs.open("/work/blob.bin", mode("w+b")).await.unwrap();
    assert_eq!(file.write(b"\x00\x01").await.unwrap(), 2);
    assert_eq!(file.seek(SeekFrom::Start(0)).await.unwrap(), 0);
    assert_eq!(file.read(None).await.unwrap(), Payload::Bytes(vec![0, 1]));
    file.close().await.unwrap();

    assert_eq!(server.read_file("/work/blob.bin").unwrap(), b"\x00\x01");
}

#[tokio::test]
async fn test_text_round_trip_non_utf8_encoding() {
    let (server, fs) = setup();

    let options = mode("w").encoding("latin1");
    let mut file = fs.open("/notes.txt", options).await.unwrap();
    file.write("café\n").await.unwrap();
    file.close().await.unwrap();
    assert_eq!(server.read_file("/notes.txt").unwrap(), b"caf\xe9\n");

    let mut file = fs.open("/notes.txt", mode("r").encoding("latin1")).await.unwrap();
    assert_eq!(file.readall().await.unwrap(), Payload::Text("café\n".into()));
    // Nothing left.
    assert_eq!(file.read(Some(10)).await.unwrap(), Payload::Text(String::new()));
}

#[tokio::test]
async fn test_latin1_control_range_round_trip() {
    let (server, fs) = setup();
    server.insert_file("/c1.txt", b"\x80\x85\x9f");

    let mut file = fs.open("/c1.txt", mode("r+").encoding("latin1")).await.unwrap();
    assert_eq!(file.readall().await.unwrap(), Payload::Text("\u{80}\u{85}\u{9f}".into()));
    file.write("\u{80}").await.unwrap();
    file.close().await.unwrap();
    assert_eq!(server.read_file("/c1.txt").unwrap(), b"\x80\x85\x9f\x80");
}

#[tokio::test]
async fn test_lines_match_readline_sequence() {
    let (server, fs) = setup();
    server.insert_file("/poem.txt", b"one\ntwo\n\nfour");

    let mut file = fs.open("/poem.txt", mode("r")).await.unwrap();
    let mut explicit = Vec::new();
    loop {
        let line = file.readline(None).await.unwrap();
        if line.is_empty() {
            break;
        }
        explicit.push(line);
    }

    file.seek(SeekFrom::Start(0)).await.unwrap();
    let streamed: Vec<Payload> = file.lines().try_collect().await.unwrap();
    assert_eq!(streamed, explicit);
    assert_eq!(
        streamed,
        ["one\n", "two\n", "\n", "four"].map(Payload::from).to_vec()
    );
}

#[tokio::test]
async fn test_readlines_and_writelines() {
    let (server, fs) = setup();

    let mut file = fs.open("/list.txt", mode("w")).await.unwrap();
    file.writelines(["a\n", "bb\n", "ccc\n"]).await.unwrap();
    file.close().await.unwrap();
    assert_eq!(server.read_file("/list.txt").unwrap(), b"a\nbb\nccc\n");

    let mut file = fs.open("/list.txt", mode("r")).await.unwrap();
    let all = file.readlines(None).await.unwrap();
    assert_eq!(all.len(), 3);

    file.seek(SeekFrom::Start(0)).await.unwrap();
    // Stops once the hint is reached.
    let some = file.readlines(Some(3)).await.unwrap();
    assert_eq!(some, vec![Payload::from("a\n"), Payload::from("bb\n")]);
}

#[tokio::test]
async fn test_readline_size_limit() {
    let (server, fs) = setup();
    server.insert_file("/long.txt", b"abcdef\n");

    let mut file = fs.open("/long.txt", mode("rb")).await.unwrap();
    assert_eq!(file.readline(Some(4)).await.unwrap(), Payload::from(b"abcd"));
    assert_eq!(file.readline(None).await.unwrap(), Payload::from(b"ef\n"));
    assert!(file.readline(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_seek_tell_truncate() {
    let (server, fs) = setup();
    server.insert_file("/data.bin", b"0123456789");

    let mut file = fs.open("/data.bin", mode("r+b")).await.unwrap();
    assert_eq!(file.seek(SeekFrom::End(-3)).await.unwrap(), 7);
    assert_eq!(file.seek(SeekFrom::Current(-2)).await.unwrap(), 5);
    assert_eq!(file.tell().await.unwrap(), 5);
    assert_eq!(file.truncate(None).await.unwrap(), 5);
    assert_eq!(file.truncate(Some(2)).await.unwrap(), 2);
    file.flush().await.unwrap();
    assert_eq!(server.read_file("/data.bin").unwrap(), b"01");

    let err = file.seek(SeekFrom::Current(-100)).await.unwrap_err();
    assert_eq!(err.envelope().unwrap().kind(), ErrorKind::Service);
}

#[tokio::test]
async fn test_out_of_range_positions_are_refused() {
    let (server, fs) = setup();
    server.insert_file("/big.bin", b"abc");
    let mut file = fs.open("/big.bin", mode("r+b")).await.unwrap();

    file.seek(SeekFrom::Start(1)).await.unwrap();
    let err = file.seek(SeekFrom::Current(i64::MAX)).await.unwrap_err();
    assert_eq!(err.envelope().unwrap().errno(), Some(22));
    let err = file.seek(SeekFrom::Start(u64::MAX)).await.unwrap_err();
    assert_eq!(err.envelope().unwrap().errno(), Some(22));

    let err = file.truncate(Some(u64::MAX)).await.unwrap_err();
    assert_eq!(err.envelope().unwrap().kind(), ErrorKind::Os);
    assert_eq!(err.envelope().unwrap().errno(), Some(27));

    file.seek(SeekFrom::Start(i64::MAX as u64)).await.unwrap();
    let err = file.write(b"x").await.unwrap_err();
    assert_eq!(err.envelope().unwrap().errno(), Some(27));

    // The session and the file are untouched.
    assert_eq!(file.seek(SeekFrom::Start(0)).await.unwrap(), 0);
    assert_eq!(file.readall().await.unwrap(), Payload::from(b"abc"));
    file.close().await.unwrap();
    assert_eq!(server.read_file("/big.bin").unwrap(), b"abc");
}

#[tokio::test]
async fn test_append_mode_writes_at_end() {
    let (server, fs) = setup();
    server.insert_file("/log", b"first\n");

    let mut file = fs.open("/log", mode("a+b")).await.unwrap();
    file.seek(SeekFrom::Start(0)).await.unwrap();
    file.write(b"second\n").await.unwrap();
    file.close().await.unwrap();
    assert_eq!(server.read_file("/log").unwrap(), b"first\nsecond\n");
}

#[tokio::test]
async fn test_mode_queries() {
    let (server, fs) = setup();
    server.insert_file("/ro", b"x");

    let mut file = fs.open("/ro", mode("r")).await.unwrap();
    assert!(file.readable().await.unwrap());
    assert!(!file.writable().await.unwrap());
    assert!(!file.isatty().await.unwrap());
    assert!(file.fileno().await.unwrap() >= 0);

    let err = file.write("nope").await.unwrap_err();
    let envelope = err.envelope().unwrap();
    assert_eq!(envelope.kind(), ErrorKind::Service);
    assert_eq!(envelope.message(), "not writable");
}

// ============================================================================
// Open failures
// ============================================================================

#[tokio::test]
async fn test_open_missing_file_is_os_error() {
    let (_server, fs) = setup();
    let err = fs.open("/missing", mode("r")).await.unwrap_err();
    let envelope = err.envelope().unwrap();
    assert_eq!(envelope.kind(), ErrorKind::Os);
    assert_eq!(envelope.errno(), Some(2));
    assert!(envelope.url.starts_with("ws://"));
}

#[tokio::test]
async fn test_exclusive_create_on_existing_file() {
    let (server, fs) = setup();
    server.insert_file("/taken", b"");
    let err = fs.open("/taken", mode("x")).await.unwrap_err();
    assert_eq!(err.envelope().unwrap().errno(), Some(17));
}

#[tokio::test]
async fn test_lock_conflict_and_release() {
    let (server, fs) = setup();
    server.insert_file("/shared", b"");

    let mut holder = fs.open("/shared", mode("r").lock(true)).await.unwrap();
    assert!(server.is_locked("/shared"));

    let err = fs.open("/shared", mode("r").lock(true)).await.unwrap_err();
    assert_eq!(err.envelope().unwrap().kind(), ErrorKind::Os);

    holder.close().await.unwrap();
    assert!(!server.is_locked("/shared"));
    let mut second = fs.open("/shared", mode("r").lock(true)).await.unwrap();
    second.close().await.unwrap();
}

#[tokio::test]
async fn test_failed_handshake_can_be_retried() {
    let (server, fs) = setup();
    let mut file = remotefs_client::RemoteFile::new(
        fs.endpoint(),
        std::sync::Arc::new(server.clone()),
        "/later.txt",
        mode("r"),
    )
    .unwrap();

    assert!(file.connect().await.is_err());
    assert_eq!(file.state(), FileState::Unopened);

    server.insert_file("/later.txt", b"now");
    file.connect().await.unwrap();
    assert_eq!(file.readall().await.unwrap(), Payload::from("now"));
    assert_eq!(server.connections(), 2);
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn test_connect_twice_is_one_handshake() {
    let (server, fs) = setup();
    server.insert_file("/f", b"");
    let mut file = fs.open("/f", mode("r")).await.unwrap();
    file.connect().await.unwrap();
    assert_eq!(server.connections(), 1);
}

#[tokio::test]
async fn test_atomic_write_commits_on_close() {
    let (server, fs) = setup();
    server.insert_file("/config.ini", b"old");

    let mut file = fs.open("/config.ini", mode("w").atomic(true)).await.unwrap();
    file.write("new").await.unwrap();
    assert_eq!(server.read_file("/config.ini").unwrap(), b"old");
    file.close().await.unwrap();
    assert_eq!(server.read_file("/config.ini").unwrap(), b"new");
}

#[tokio::test]
async fn test_closed_file_rejects_operations() {
    let (server, fs) = setup();
    server.insert_file("/f", b"abc");
    let mut file = fs.open("/f", mode("rb")).await.unwrap();
    file.close().await.unwrap();
    file.close().await.unwrap();

    assert!(matches!(
        file.read(None).await,
        Err(RemoteFsError::NotOpen(FileState::Closed))
    ));
    let mut buf = [0u8; 3];
    assert!(matches!(
        file.readinto(&mut buf).await,
        Err(RemoteFsError::Unsupported("readinto"))
    ));
}

#[tokio::test]
async fn test_server_disconnect_closes_session() {
    let (server, fs) = setup();
    server.insert_file("/f", b"abc");
    let mut file = fs.open("/f", mode("rb").lock(true)).await.unwrap();

    server.disconnect_all();
    let err = file.tell().await.unwrap_err();
    assert!(err.is_transport());
    assert!(!server.is_locked("/f"));
}

#[tokio::test(start_paused = true)]
async fn test_read_timeout() {
    let (server, fs) = setup();
    server.insert_file("/slow", b"data");

    let options = mode("rb").read_timeout(Duration::from_secs(1));
    let mut file = fs.open("/slow", options).await.unwrap();
    server.set_response_delay(Some(Duration::from_secs(30)));

    assert!(matches!(
        file.read(None).await,
        Err(RemoteFsError::Transport(TransportError::Timeout))
    ));
}
