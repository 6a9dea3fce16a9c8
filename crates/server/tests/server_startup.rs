use std::io::Write;
use std::net::TcpListener;
use std::path::Path;
use std::time::Duration;

use reqwest::Client;
use tempfile::NamedTempFile;
use tokio::time::{sleep, timeout};

/// Find an available port
fn get_available_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

/// Create a minimal valid config
fn minimal_config(port: u16, helper: &Path) -> String {
    format!(
        r#"
[server]
host = "127.0.0.1"
port = {}

[helper]
program = "{}"

[relay]
termination_grace_ms = 200
"#,
        port,
        helper.display()
    )
}

fn write_config(content: &str) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(content.as_bytes()).unwrap();
    temp_file.flush().unwrap();
    temp_file
}

/// Spawn the server and return a handle
async fn spawn_server(config_path: &Path) -> tokio::process::Child {
    tokio::process::Command::new(env!("CARGO_BIN_EXE_magnetstream"))
        .env("MAGNETSTREAM_CONFIG", config_path)
        .env("RUST_LOG", "error") // Quiet logs during tests
        .kill_on_drop(true)
        .spawn()
        .expect("Failed to spawn server")
}

/// Wait for server to be ready
async fn wait_for_server(port: u16, max_attempts: u32) -> bool {
    let client = Client::new();
    for _ in 0..max_attempts {
        if client
            .get(format!("http://127.0.0.1:{}/api/v1/health", port))
            .send()
            .await
            .is_ok()
        {
            return true;
        }
        sleep(Duration::from_millis(50)).await;
    }
    false
}

/// Run the binary with the given config path and wait for it to exit.
async fn run_to_exit(config_path: &Path) -> std::process::Output {
    timeout(
        Duration::from_secs(5),
        tokio::process::Command::new(env!("CARGO_BIN_EXE_magnetstream"))
            .env("MAGNETSTREAM_CONFIG", config_path)
            .env("RUST_LOG", "error")
            .output(),
    )
    .await
    .expect("Command timed out")
    .expect("Failed to execute command")
}

#[tokio::test]
async fn test_health_endpoint() {
    let port = get_available_port();
    let temp_file = write_config(&minimal_config(port, Path::new("webtorrent")));

    // Start server
    let mut server = spawn_server(temp_file.path()).await;

    // Wait for server to be ready
    assert!(
        wait_for_server(port, 40).await,
        "Server did not start in time"
    );

    let client = Client::new();
    let response = client
        .get(format!("http://127.0.0.1:{}/api/v1/health", port))
        .send()
        .await
        .expect("Failed to send request");

    assert!(response.status().is_success());

    let json: serde_json::Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(json["status"], "ok");
    assert_eq!(json["active_streams"], 0);

    // Cleanup
    server.kill().await.ok();
}

#[tokio::test]
async fn test_config_endpoint_reflects_file() {
    let port = get_available_port();
    let temp_file = write_config(&minimal_config(port, Path::new("/opt/helper/webtorrent")));

    let mut server = spawn_server(temp_file.path()).await;
    assert!(
        wait_for_server(port, 40).await,
        "Server did not start in time"
    );

    let client = Client::new();
    let response = client
        .get(format!("http://127.0.0.1:{}/api/v1/config", port))
        .send()
        .await
        .expect("Failed to send request");

    assert!(response.status().is_success());

    let json: serde_json::Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(json["server"]["port"], port);
    assert_eq!(json["helper"]["program"], "/opt/helper/webtorrent");
    assert_eq!(json["relay"]["termination_grace_ms"], 200);

    server.kill().await.ok();
}

#[tokio::test]
async fn test_missing_helper_still_starts_and_fails_requests() {
    let port = get_available_port();
    let temp_file = write_config(&minimal_config(
        port,
        Path::new("/nonexistent/streaming-helper"),
    ));

    let mut server = spawn_server(temp_file.path()).await;
    assert!(
        wait_for_server(port, 40).await,
        "Server did not start in time"
    );

    let response = Client::new()
        .get(format!(
            "http://127.0.0.1:{}/stream?magnet={}",
            port,
            urlencoding::encode("magnet:?xt=urn:btih:abc")
        ))
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), 500);
    assert!(response.bytes().await.unwrap().is_empty());

    server.kill().await.ok();
}

#[tokio::test]
async fn test_missing_config_file_exits_with_error() {
    let result = run_to_exit(Path::new("/nonexistent/magnetstream.toml")).await;
    assert!(!result.status.success());
}

#[tokio::test]
async fn test_zero_port_exits_with_error() {
    let temp_file = write_config(
        r#"
[server]
port = 0
"#,
    );

    let result = run_to_exit(temp_file.path()).await;
    assert!(!result.status.success());
}

#[tokio::test]
async fn test_zero_stream_limit_exits_with_error() {
    let temp_file = write_config(
        r#"
[relay]
max_concurrent_streams = 0
"#,
    );

    let result = run_to_exit(temp_file.path()).await;
    assert!(!result.status.success());
}

#[tokio::test]
async fn test_malformed_config_exits_with_error() {
    let temp_file = write_config("[server\nport = ");

    let result = run_to_exit(temp_file.path()).await;
    assert!(!result.status.success());
}

#[cfg(unix)]
mod unix {
    use super::*;
    use futures::StreamExt;
    use magnetstream_core::testing::{process_alive, wait_until, FakeHelper};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_streams_helper_output_end_to_end() {
        let dir = TempDir::new().unwrap();
        let helper = FakeHelper::emitting(dir.path(), "webtorrent", b"hello-video-bytes").unwrap();
        let port = get_available_port();
        let temp_file = write_config(&minimal_config(port, helper.path()));

        let mut server = spawn_server(temp_file.path()).await;
        assert!(
            wait_for_server(port, 40).await,
            "Server did not start in time"
        );

        let response = Client::new()
            .get(format!(
                "http://127.0.0.1:{}/stream?magnet={}",
                port,
                urlencoding::encode("magnet:?xt=urn:btih:TESTHASH")
            ))
            .send()
            .await
            .expect("Failed to send request");

        assert_eq!(response.status(), 200);
        assert_eq!(response.headers()["content-type"], "video/mp4");
        assert_eq!(response.headers()["accept-ranges"], "bytes");
        assert_eq!(
            response.bytes().await.unwrap().as_ref(),
            b"hello-video-bytes"
        );

        // `--version` from the startup check, then the stream itself.
        let invocations = helper.invocations();
        assert_eq!(
            invocations.last().map(String::as_str),
            Some("magnet:?xt=urn:btih:TESTHASH --select 0 --stdout")
        );

        server.kill().await.ok();
    }

    #[tokio::test]
    async fn test_sigterm_terminates_active_helpers() {
        let dir = TempDir::new().unwrap();
        let helper = FakeHelper::streaming_forever(dir.path(), "webtorrent").unwrap();
        let port = get_available_port();
        let temp_file = write_config(&minimal_config(port, helper.path()));

        let mut server = spawn_server(temp_file.path()).await;
        assert!(
            wait_for_server(port, 40).await,
            "Server did not start in time"
        );

        let response = Client::new()
            .get(format!(
                "http://127.0.0.1:{}/stream?magnet={}",
                port,
                urlencoding::encode("magnet:?xt=urn:btih:abc")
            ))
            .send()
            .await
            .expect("Failed to send request");
        assert_eq!(response.status(), 200);

        let mut body = response.bytes_stream();
        let first = body.next().await.unwrap().unwrap();
        assert_eq!(first.as_ref(), b"first-chunk");

        let helper_pid = *helper.pids().last().unwrap();
        assert!(process_alive(helper_pid));

        let server_pid = server.id().unwrap();
        // SAFETY: signalling the child server we spawned.
        unsafe {
            libc::kill(server_pid as libc::pid_t, libc::SIGTERM);
        }

        let status = timeout(Duration::from_secs(5), server.wait())
            .await
            .expect("Server did not exit after SIGTERM")
            .unwrap();
        assert!(status.success());

        assert!(
            wait_until(Duration::from_secs(2), || !process_alive(helper_pid)).await,
            "helper survived server shutdown"
        );
    }
}
