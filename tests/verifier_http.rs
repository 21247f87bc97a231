//! `HttpVerifier` against a one-shot HTTP server on localhost.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use voiceauth::attempt::{AttemptMode, AttemptRequest};
use voiceauth::audio::{encode_wav, AudioSample, CaptureFormat, SAMPLE_MIME_TYPE};
use voiceauth::identity::LocalKeypair;
use voiceauth::verifier::{HttpVerifier, Verifier, VerifierConfig, VerifyError};

const TEST_MNEMONIC: &str = "legal winner thank year wave sausage worth useful legal winner thank yellow";

/// Read one request: headers, then as much body as `Content-Length` announces.
async fn read_request(stream: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        let n = stream.read(&mut chunk).await.unwrap();
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);

        let Some(header_end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
            continue;
        };
        let headers = String::from_utf8_lossy(&buf[..header_end]).to_ascii_lowercase();
        if headers.contains("transfer-encoding: chunked") {
            if buf.ends_with(b"0\r\n\r\n") {
                break;
            }
            continue;
        }
        let content_length = headers
            .lines()
            .find_map(|line| line.strip_prefix("content-length:"))
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(0);
        if buf.len() >= header_end + 4 + content_length {
            break;
        }
    }

    String::from_utf8_lossy(&buf).into_owned()
}

/// Answer a single request with `status` and `body`. The handle yields the raw request.
async fn serve_once(status: &'static str, body: String) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let request = read_request(&mut stream).await;
        let response = format!(
            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        );
        stream.write_all(response.as_bytes()).await.unwrap();
        stream.shutdown().await.unwrap();
        request
    });

    (format!("http://{}", addr), handle)
}

fn verifier(base_url: impl Into<String>) -> HttpVerifier {
    HttpVerifier::new(VerifierConfig::new(base_url, Duration::from_secs(5))).unwrap()
}

fn attempt(mode: AttemptMode) -> AttemptRequest {
    let keypair = LocalKeypair::generate();
    let intent = mode.intent_message();
    let samples: Vec<i16> = (0..160).map(|i| (i * 100) as i16).collect();
    let wav = encode_wav(
        &samples,
        CaptureFormat {
            sample_rate: 16_000,
            channels: 1,
        },
    )
    .unwrap();

    AttemptRequest {
        mode,
        identity_address: keypair.address(),
        signature: bs58::encode(keypair.sign_bytes(intent.as_bytes())).into_string(),
        intent_message: intent.to_string(),
        phrase: "orbit velvet candle harbor".to_string(),
        audio: AudioSample::new(wav, SAMPLE_MIME_TYPE),
    }
}

#[tokio::test]
async fn verify_posts_multipart_form() {
    let (url, server) = serve_once(
        "200 OK",
        r#"{"verified": true, "score": 0.91, "threshold": 0.75}"#.to_string(),
    )
    .await;
    let request = attempt(AttemptMode::Verify);
    let address = request.identity_address.clone();
    let signature = request.signature.clone();

    let result = verifier(url).submit(request).await.unwrap();
    let raw = server.await.unwrap();

    assert!(raw.starts_with("POST /verify HTTP/1.1\r\n"));
    assert!(raw
        .to_ascii_lowercase()
        .contains("content-type: multipart/form-data; boundary="));
    assert!(raw.contains(&format!("name=\"wallet_address\"\r\n\r\n{}\r\n", address)));
    assert!(raw.contains(&format!("name=\"signature\"\r\n\r\n{}\r\n", signature)));
    assert!(raw.contains("name=\"message\"\r\n\r\nVoiceAuth Verify\r\n"));
    assert!(raw.contains("name=\"phrase\"\r\n\r\norbit velvet candle harbor\r\n"));
    assert!(raw.contains("name=\"audio\"; filename=\"voice.wav\""));
    assert!(raw.contains("Content-Type: audio/wav"));

    assert!(result.verified);
    assert_eq!(result.score, Some(0.91));
    assert_eq!(result.threshold, Some(0.75));
}

#[tokio::test]
async fn enroll_hits_enroll_endpoint_with_trailing_slash_base() {
    let (url, server) = serve_once("200 OK", "{}".to_string()).await;

    let result = verifier(format!("{}/", url))
        .submit(attempt(AttemptMode::Enroll))
        .await
        .unwrap();
    let raw = server.await.unwrap();

    assert!(raw.starts_with("POST /enroll HTTP/1.1\r\n"));
    assert!(raw.contains("name=\"message\"\r\n\r\nVoiceAuth Enroll\r\n"));
    assert!(result.verified);
}

#[tokio::test]
async fn error_status_surfaces_detail() {
    let (url, server) = serve_once(
        "401 Unauthorized",
        r#"{"detail": "Invalid signature"}"#.to_string(),
    )
    .await;

    let err = verifier(url)
        .submit(attempt(AttemptMode::Verify))
        .await
        .unwrap_err();
    server.await.unwrap();

    assert_eq!(
        err,
        VerifyError::Server {
            status: 401,
            detail: "Invalid signature".to_string()
        }
    );
}

#[tokio::test]
async fn refused_connection_is_network_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = verifier(format!("http://{}", addr))
        .submit(attempt(AttemptMode::Verify))
        .await
        .unwrap_err();

    assert!(matches!(err, VerifyError::Network(_)));
}

#[tokio::test]
async fn slow_verifier_times_out() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let _ = read_request(&mut stream).await;
        tokio::time::sleep(Duration::from_secs(3)).await;
    });

    let client = HttpVerifier::new(VerifierConfig::new(
        format!("http://{}", addr),
        Duration::from_millis(300),
    ))
    .unwrap();
    let err = client
        .submit(attempt(AttemptMode::Verify))
        .await
        .unwrap_err();
    server.abort();

    match err {
        VerifyError::Network(message) => assert!(message.starts_with("request timed out")),
        other => panic!("expected network error, got {:?}", other),
    }
}

#[tokio::test]
async fn create_wallet_rebuilds_keypair() {
    let keypair = LocalKeypair::from_mnemonic(TEST_MNEMONIC).unwrap();
    let body = serde_json::json!({
        "private_key": keypair.to_secret_base58(),
        "wallet_address": keypair.address(),
        "mnemonic": TEST_MNEMONIC,
    })
    .to_string();
    let (url, server) = serve_once("200 OK", body).await;

    let wallet = verifier(url).create_wallet().await.unwrap();
    let raw = server.await.unwrap();

    assert!(raw.starts_with("POST /create-wallet HTTP/1.1\r\n"));
    assert_eq!(wallet.wallet_address, keypair.address());
    assert_eq!(wallet.keypair.address(), keypair.address());
    assert_eq!(wallet.mnemonic.expose(), TEST_MNEMONIC);
    assert_eq!(
        LocalKeypair::from_mnemonic(wallet.mnemonic.expose())
            .unwrap()
            .address(),
        wallet.wallet_address
    );
}

#[tokio::test]
async fn create_wallet_rejects_mismatched_address() {
    let body = serde_json::json!({
        "private_key": LocalKeypair::generate().to_secret_base58(),
        "wallet_address": LocalKeypair::generate().address(),
        "mnemonic": "",
    })
    .to_string();
    let (url, server) = serve_once("200 OK", body).await;

    let err = verifier(url).create_wallet().await.unwrap_err();
    server.await.unwrap();

    assert!(matches!(err, VerifyError::MalformedResponse(_)));
}
