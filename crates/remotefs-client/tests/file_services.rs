//! Metadata operations against the in-memory server.

use remotefs_client::{
    ErrorDetail, ErrorKind, MemoryServer, OpenOptions, RemoteFileServices, RemoteFsError,
    TransportError,
};
use serde_json::json;

fn setup() -> (MemoryServer, RemoteFileServices) {
    let server = MemoryServer::new();
    let fs = server.services().unwrap();
    (server, fs)
}

#[tokio::test]
async fn test_directory_lifecycle() {
    let (server, fs) = setup();

    fs.mkdir("/a/b/c", true, false).await.unwrap();
    assert!(fs.is_dir("/a/b").await.unwrap());
    assert!(!fs.is_file("/a/b").await.unwrap());

    // Already there.
    let err = fs.mkdir("/a/b/c", false, false).await.unwrap_err();
    assert_eq!(err.envelope().unwrap().errno(), Some(17));
    fs.mkdir("/a/b/c", false, true).await.unwrap();

    // Not empty.
    let err = fs.rmdir("/a").await.unwrap_err();
    assert_eq!(err.envelope().unwrap().errno(), Some(39));

    fs.rmdir("/a/b/c").await.unwrap();
    assert!(!server.exists("/a/b/c"));
}

#[tokio::test]
async fn test_ls_detail_and_names() {
    let (server, fs) = setup();
    server.insert_file("/d/one.txt", b"1");
    server.insert_file("/d/two.txt", b"22");
    server.insert_dir("/d/sub");

    let names = fs.ls("/d", false).await.unwrap();
    assert_eq!(names, json!(["/d/one.txt", "/d/sub", "/d/two.txt"]));

    let detail = fs.ls("/d", true).await.unwrap();
    let entries = detail.as_array().unwrap();
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[2]["size"], 2);
    assert_eq!(entries[1]["type"], "directory");
}

#[tokio::test]
async fn test_info_missing_path() {
    let (_server, fs) = setup();
    let err = fs.info("/x").await.unwrap_err();
    let envelope = err.envelope().unwrap();
    assert_eq!(envelope.kind(), ErrorKind::Os);
    assert_eq!(envelope.errno(), Some(2));
    assert!(envelope.url.contains("/spyder-services/fsspec/info/file:///x"));
    assert!(!fs.exists("/x").await.unwrap());
}

#[tokio::test]
async fn test_unlink() {
    let (server, fs) = setup();
    server.insert_file("/f", b"");

    fs.unlink("/f", false).await.unwrap();
    assert!(!server.exists("/f"));

    let err = fs.unlink("/f", false).await.unwrap_err();
    assert_eq!(err.envelope().unwrap().errno(), Some(2));
    fs.unlink("/f", true).await.unwrap();
}

#[tokio::test]
async fn test_copy_and_replace() {
    let (server, fs) = setup();
    server.insert_file("/src.txt", b"payload");
    server.insert_dir("/backup");

    fs.copy("/src.txt", "/backup/copy.txt").await.unwrap();
    fs.copy_with_metadata("/src.txt", "/backup/meta.txt").await.unwrap();
    let original = fs.info("/src.txt").await.unwrap();
    let meta = fs.info("/backup/meta.txt").await.unwrap();
    assert_eq!(meta["mtime"], original["mtime"]);
    assert_eq!(server.read_file("/backup/copy.txt").unwrap(), b"payload");

    fs.replace("/src.txt", "/backup/moved.txt").await.unwrap();
    assert!(!server.exists("/src.txt"));
    assert_eq!(server.read_file("/backup/moved.txt").unwrap(), b"payload");

    let err = fs.copy("/nope", "/backup/x").await.unwrap_err();
    assert_eq!(err.envelope().unwrap().errno(), Some(2));
}

#[tokio::test]
async fn test_touch() {
    let (server, fs) = setup();
    fs.touch("/new", true).await.unwrap();
    assert_eq!(server.read_file("/new").unwrap(), b"");

    server.insert_file("/keep", b"abc");
    fs.touch("/keep", false).await.unwrap();
    assert_eq!(server.read_file("/keep").unwrap(), b"abc");
    fs.touch("/keep", true).await.unwrap();
    assert_eq!(server.read_file("/keep").unwrap(), b"");
}

#[tokio::test]
async fn test_malformed_500_body_uses_defaults() {
    let (server, fs) = setup();
    server.fail_next_request(500, "<html>Internal Server Error</html>");

    let err = fs.info("/whatever").await.unwrap_err();
    let envelope = err.envelope().unwrap();
    let ErrorDetail::Service(detail) = &envelope.detail else {
        panic!("expected a service error, got {envelope:?}");
    };
    assert_eq!(detail.error_type, "UnknownError");
    assert_eq!(detail.message, "Unknown error");
    assert!(detail.tracebacks.is_empty());
}

#[tokio::test]
async fn test_structured_500_body() {
    let (server, fs) = setup();
    server.fail_next_request(
        500,
        json!({"type": "PermissionError", "message": "denied", "tracebacks": ["tb"]}).to_string(),
    );
    let err = fs.ls("/", true).await.unwrap_err();
    let envelope = err.envelope().unwrap();
    assert_eq!(envelope.kind(), ErrorKind::Service);
    assert_eq!(envelope.message(), "denied");
}

#[tokio::test]
async fn test_other_status_is_transport_error() {
    let (server, fs) = setup();
    server.fail_next_request(403, "forbidden");
    let err = fs.info("/").await.unwrap_err();
    assert!(matches!(
        err,
        RemoteFsError::Transport(TransportError::Status { status: 403, .. })
    ));
}

#[tokio::test]
async fn test_open_through_services() {
    let (server, fs) = setup();
    server.insert_file("/hello.txt", b"hi\n");
    let mut file = fs.open("/hello.txt", OpenOptions::default()).await.unwrap();
    assert_eq!(file.readline(None).await.unwrap().into_text().unwrap(), "hi\n");
    file.close().await.unwrap();
}

#[tokio::test]
async fn test_paths_with_url_delimiters() {
    let (server, fs) = setup();
    server.insert_file("/tmp/a", b"plain");
    server.insert_file("/tmp/a#b", b"hash");
    server.insert_file("/tmp/what?.txt", b"query");

    let info = fs.info("/tmp/what?.txt").await.unwrap();
    assert_eq!(info["name"], "/tmp/what?.txt");
    assert_eq!(info["size"], 5);

    fs.unlink("/tmp/a#b", false).await.unwrap();
    assert!(!server.exists("/tmp/a#b"));
    assert!(server.exists("/tmp/a"));
}

#[tokio::test]
async fn test_metadata_calls_on_unusual_names() {
    let (server, fs) = setup();
    let dir = "/data/100% done/résumé #1";

    fs.mkdir(dir, true, false).await.unwrap();
    assert!(server.exists(dir));
    assert!(fs.is_dir(dir).await.unwrap());

    fs.touch(&format!("{dir}/a b?.txt"), true).await.unwrap();
    let names = fs.ls(dir, false).await.unwrap();
    assert_eq!(names, json!([format!("{dir}/a b?.txt")]));

    fs.replace(&format!("{dir}/a b?.txt"), "/data/%41.txt").await.unwrap();
    assert!(server.exists("/data/%41.txt"));
    assert!(!server.exists("/data/A.txt"));

    fs.unlink("/data/%41.txt", false).await.unwrap();
    fs.rmdir(dir).await.unwrap();
    assert!(!server.exists(dir));
}

#[tokio::test]
async fn test_open_path_with_url_delimiters() {
    let (server, fs) = setup();
    server.insert_file("/notes", b"wrong file");

    let mut file = fs.open("/notes#draft?v=2", OpenOptions::new("wb").unwrap()).await.unwrap();
    file.write(b"draft").await.unwrap();
    file.close().await.unwrap();

    assert_eq!(server.read_file("/notes#draft?v=2").unwrap(), b"draft");
    assert_eq!(server.read_file("/notes").unwrap(), b"wrong file");
}
