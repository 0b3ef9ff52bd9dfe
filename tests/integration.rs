//! End-to-end handshake: OPTIONS → DESCRIBE → SETUP → PLAY → TEARDOWN,
//! driven through [`rtsp::ClientSession`] against a real [`rtsp::Server`]
//! bound to an ephemeral port.

use std::time::Duration;

use rtsp::format::Format;
use rtsp::sdp::{MediaDescription, SessionDescription};
use rtsp::url::RtspUrl;
use rtsp::{ClientSession, Server};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

fn sample_description() -> SessionDescription {
    SessionDescription {
        username: "-".to_string(),
        session_id: "1".to_string(),
        session_version: "1".to_string(),
        origin_addr: "127.0.0.1".to_string(),
        session_name: "integration".to_string(),
        connection_addr: "127.0.0.1".to_string(),
        control: Some("*".to_string()),
        media: vec![MediaDescription {
            media_type: "video".to_string(),
            port: 0,
            proto: "RTP/AVP".to_string(),
            format: Format::H264 { payload_type: 96 },
            control: Some("trackID=0".to_string()),
            direction: None,
        }],
    }
}

async fn raw_roundtrip(stream: &mut TcpStream, request: &str) -> String {
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut buf = vec![0u8; 4096];
    let n = tokio::time::timeout(Duration::from_secs(2), stream.read(&mut buf))
        .await
        .expect("response within deadline")
        .unwrap();
    String::from_utf8_lossy(&buf[..n]).into_owned()
}

#[tokio::test]
async fn full_handshake_describe_setup_play_teardown() {
    let mut server = Server::new("127.0.0.1:0");
    server.add_stream("/stream", sample_description());
    server.start().await.expect("server start");
    let addr = server.local_addr().expect("bound address");

    // Raw OPTIONS check — verifies the Public header without going through
    // a session, since OPTIONS carries no session state.
    let mut raw = TcpStream::connect(addr).await.unwrap();
    let options_resp = raw_roundtrip(
        &mut raw,
        "OPTIONS rtsp://127.0.0.1/stream RTSP/1.0\r\nCSeq: 1\r\n\r\n",
    )
    .await;
    assert!(options_resp.starts_with("RTSP/1.0 200 OK"));
    assert!(options_resp.contains("Public:"));
    drop(raw);

    let url = RtspUrl::parse(&format!("rtsp://{addr}/stream")).unwrap();
    let mut client = ClientSession::connect(url.clone(), None)
        .await
        .expect("connect");

    let describe = client.describe().await.expect("DESCRIBE");
    assert!(describe.status.is_success());
    let sdp = String::from_utf8_lossy(&describe.body);
    assert!(sdp.contains("m=video"));
    assert!(sdp.contains("a=rtpmap:96 H264/90000"));

    let track_url = url.resolve_control("trackID=0").unwrap();
    let transport = rtsp::protocol::Transport::udp_unicast((5000, 5001)).format();
    let setup = client
        .setup(&track_url, transport)
        .await
        .expect("SETUP");
    assert!(setup.status.is_success());
    assert!(setup.get_header("Session").is_some());

    let play = client.play().await.expect("PLAY");
    assert!(play.status.is_success());

    let teardown = client.teardown().await.expect("TEARDOWN");
    assert!(teardown.status.is_success());

    server.stop();
}

#[tokio::test]
async fn describe_missing_stream_returns_404() {
    let mut server = Server::new("127.0.0.1:0");
    server.start().await.expect("server start");
    let addr = server.local_addr().expect("bound address");

    let url = RtspUrl::parse(&format!("rtsp://{addr}/nope")).unwrap();
    let mut client = ClientSession::connect(url, None).await.expect("connect");
    let describe = client.describe().await.expect("DESCRIBE");
    assert_eq!(describe.status.0, 404);

    server.stop();
}

#[tokio::test]
async fn play_before_setup_is_rejected() {
    let mut server = Server::new("127.0.0.1:0");
    server.add_stream("/stream", sample_description());
    server.start().await.expect("server start");
    let addr = server.local_addr().expect("bound address");

    let mut raw = TcpStream::connect(addr).await.unwrap();
    let resp = raw_roundtrip(
        &mut raw,
        "PLAY rtsp://127.0.0.1/stream RTSP/1.0\r\nCSeq: 1\r\nSession: deadbeef\r\n\r\n",
    )
    .await;
    assert!(resp.starts_with("RTSP/1.0 454"));

    server.stop();
}
