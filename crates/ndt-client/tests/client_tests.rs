//! Client Library Tests (ndt-client)
//!
//! Full sessions against a mock NDT server over a real local WebSocket:
//! - Queue heartbeat, login and test negotiation
//! - META and throughput sub-tests
//! - Results and logout
//! - Busy servers, protocol violations and connection failures

use ndt_client::{ClientError, NdtClient, ProtocolError, SessionState};
use ndt_core::{MessageType, TestKind};
use ndt_test_utils::{find_available_port, MockNdtServer, DEFAULT_TIMEOUT};
use std::time::Duration;
use tokio::time::timeout;

fn client_for(server: &MockNdtServer) -> NdtClient {
    NdtClient::builder(server.host())
        .port(server.port())
        .connect_timeout(Duration::from_secs(5))
        .build()
}

// ============================================================================
// Complete sessions
// ============================================================================

#[tokio::test]
async fn test_full_session() {
    let server = MockNdtServer::bind().await;
    let client = client_for(&server);

    let server_task = tokio::spawn(async move {
        let mut conn = server.accept().await;

        let login = conn.expect(MessageType::ExtendedLogin).await;
        assert_eq!(login.text(), "v3.5.5");

        conn.send(MessageType::SrvQueue, "9990").await;
        conn.expect(MessageType::Waiting).await;
        conn.send(MessageType::SrvQueue, "0").await;
        conn.send(MessageType::Login, "v3.5.5").await;
        conn.send(MessageType::Login, "2 4 32").await;

        // C2S
        conn.send(MessageType::TestPrepare, "3002").await;
        conn.send(MessageType::TestStart, "").await;
        conn.send(MessageType::TestMsg, "9120.5").await;
        conn.send(MessageType::TestFinalize, "").await;

        // S2C
        conn.send(MessageType::TestPrepare, "3003").await;
        conn.send(MessageType::TestStart, "").await;
        conn.send(MessageType::TestMsg, "48000 0 60000000").await;
        let client_rate = conn.expect(MessageType::TestMsg).await;
        conn.send(MessageType::TestMsg, "CurMSS: 1448").await;
        conn.send(MessageType::TestFinalize, "").await;

        // META
        conn.send(MessageType::TestPrepare, "").await;
        conn.send(MessageType::TestStart, "").await;
        let mut meta = Vec::new();
        loop {
            let msg = conn.expect(MessageType::TestMsg).await;
            if msg.text().is_empty() {
                break;
            }
            meta.push(msg.text().to_string());
        }
        conn.send(MessageType::TestFinalize, "").await;

        conn.send(MessageType::Results, "CurMSS: 1448\nMinRTT: 9").await;
        conn.send(MessageType::Results, "avgrtt: 10.25").await;
        conn.send(MessageType::Logout, "").await;
        let closed = conn.wait_closed().await;

        (client_rate.text().to_string(), meta, closed)
    });

    let result = timeout(DEFAULT_TIMEOUT, client.run())
        .await
        .expect("session timed out")
        .expect("session failed");

    let (client_rate, meta, closed) = server_task.await.unwrap();
    assert_eq!(client_rate, "48000");
    assert_eq!(meta[0], "client.application:ndt-rs");
    assert!(meta[1].starts_with("client.version:"));
    assert!(closed, "client never closed the control channel");

    assert_eq!(result.server_version.as_deref(), Some("v3.5.5"));
    assert_eq!(result.tests_run, vec![TestKind::C2s, TestKind::S2c, TestKind::Meta]);
    assert_eq!(result.upload_rate, Some(9120.5));
    assert_eq!(result.download_rate, Some(48000.0));
    assert!(result.meta_accepted);
    assert_eq!(result.server_value("MinRTT"), Some("9"));
    assert_eq!(result.server_value("avgrtt"), Some("10.25"));
}

#[tokio::test]
async fn test_meta_only_session_with_custom_meta() {
    let server = MockNdtServer::bind().await;
    let client = NdtClient::builder(server.host())
        .port(server.port())
        .only(&[TestKind::Meta])
        .meta("client.os", "linux")
        .build();

    let server_task = tokio::spawn(async move {
        let mut conn = server.accept().await;
        let login = conn.recv_raw().await.expect("no login");
        conn.send(MessageType::Login, "v3.5.5").await;
        conn.send(MessageType::Login, "32").await;
        conn.send(MessageType::TestPrepare, "").await;
        conn.send(MessageType::TestStart, "").await;

        let mut meta = Vec::new();
        loop {
            let msg = conn.expect(MessageType::TestMsg).await;
            if msg.text().is_empty() {
                break;
            }
            meta.push(msg.text().to_string());
        }
        conn.send(MessageType::TestFinalize, "").await;
        conn.send(MessageType::Logout, "").await;
        conn.wait_closed().await;
        (login, meta)
    });

    let result = timeout(DEFAULT_TIMEOUT, client.run())
        .await
        .expect("session timed out")
        .expect("session failed");

    let (login, meta) = server_task.await.unwrap();
    assert_eq!(&login[3..], br#"{"msg":"v3.5.5","tests":"48"}"#);
    assert_eq!(meta.last().map(String::as_str), Some("client.os:linux"));
    assert_eq!(result.tests_run, vec![TestKind::Meta]);
    assert_eq!(result.upload_rate, None);
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test]
async fn test_busy_server() {
    let server = MockNdtServer::bind().await;
    let client = client_for(&server);

    tokio::spawn(async move {
        let mut conn = server.accept().await;
        conn.expect(MessageType::ExtendedLogin).await;
        conn.send(MessageType::SrvQueue, "9999").await;
        conn.wait_closed().await;
    });

    let err = timeout(DEFAULT_TIMEOUT, client.run())
        .await
        .expect("session timed out")
        .unwrap_err();

    assert!(err.is_recoverable());
    assert_eq!(err.retry_after(), Some(Duration::from_secs(60)));
}

#[tokio::test]
async fn test_unsupported_test_id() {
    let server = MockNdtServer::bind().await;
    let client = client_for(&server);

    tokio::spawn(async move {
        let mut conn = server.accept().await;
        conn.expect(MessageType::ExtendedLogin).await;
        conn.send(MessageType::Login, "v3.5.5").await;
        conn.send(MessageType::Login, "8").await;
        conn.wait_closed().await;
    });

    let err = timeout(DEFAULT_TIMEOUT, client.run())
        .await
        .expect("session timed out")
        .unwrap_err();

    assert_eq!(
        err,
        ClientError::Protocol(ProtocolError::UnsupportedTestId { id: "8".to_string() })
    );
}

#[tokio::test]
async fn test_server_drops_mid_session() {
    let server = MockNdtServer::bind().await;
    let client = client_for(&server);

    tokio::spawn(async move {
        let mut conn = server.accept().await;
        conn.expect(MessageType::ExtendedLogin).await;
        conn.send(MessageType::Login, "v3.5.5").await;
        conn.close().await;
    });

    let err = timeout(DEFAULT_TIMEOUT, client.run())
        .await
        .expect("session timed out")
        .unwrap_err();

    assert!(matches!(err, ClientError::Transport { .. }));
    assert_eq!(err.state(), Some(SessionState::WaitForTestIds));
}

#[tokio::test]
async fn test_malformed_frame() {
    let server = MockNdtServer::bind().await;
    let client = client_for(&server);

    tokio::spawn(async move {
        let mut conn = server.accept().await;
        conn.expect(MessageType::ExtendedLogin).await;
        // Declares 9 bytes, carries 2
        conn.send_raw(vec![1, 0, 9, b'{', b'}']).await;
        conn.wait_closed().await;
    });

    let err = timeout(DEFAULT_TIMEOUT, client.run())
        .await
        .expect("session timed out")
        .unwrap_err();

    assert!(matches!(err, ClientError::Frame { .. }));
    assert_eq!(err.state(), Some(SessionState::LoginSent));
}

#[tokio::test]
async fn test_connection_refused() {
    let port = find_available_port().await;
    let client = NdtClient::builder("127.0.0.1").port(port).build();

    let err = client.run().await.unwrap_err();
    assert!(matches!(err, ClientError::Transport { .. }));
    assert_eq!(err.state(), Some(SessionState::Idle));
}
