use super::*;
use crate::mcp::client::ClientSession;
use crate::mcp::server::{ServerIdentity, ServerSession};
use crate::mcp::transport::memory;
use crate::mcp::SessionState;
use crate::tools::{ToolInvocationRequest, ToolInvocationResult, ToolRegistry};
use serde_json::json;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::Mutex;

type CapturedRequests = Arc<Mutex<Vec<(String, Vec<(String, String)>)>>>;

fn clear_proxy_env() {
    std::env::remove_var("HTTP_PROXY");
    std::env::remove_var("http_proxy");
    std::env::remove_var("HTTPS_PROXY");
    std::env::remove_var("https_proxy");
    std::env::remove_var("ALL_PROXY");
    std::env::remove_var("all_proxy");
    std::env::set_var("NO_PROXY", "*");
    std::env::set_var("no_proxy", "*");
}

async fn read_request_head(
    stream: &mut tokio::net::TcpStream,
) -> Result<(String, Vec<(String, String)>), String> {
    let mut buffer = Vec::new();
    loop {
        let mut chunk = [0_u8; 1024];
        let read = stream
            .read(&mut chunk)
            .await
            .map_err(|err| err.to_string())?;
        if read == 0 {
            return Err("Unexpected EOF while reading HTTP headers".to_string());
        }
        buffer.extend_from_slice(&chunk[..read]);
        if buffer.windows(4).any(|window| window == b"\r\n\r\n") {
            break;
        }
    }

    let text = String::from_utf8_lossy(&buffer).to_string();
    let mut lines = text.split("\r\n").filter(|line| !line.is_empty());
    let request_line = lines
        .next()
        .ok_or_else(|| "Missing HTTP request line".to_string())?
        .to_string();
    let headers = lines
        .filter_map(|line| {
            let (name, value) = line.split_once(':')?;
            Some((name.to_ascii_lowercase(), value.trim().to_string()))
        })
        .collect();
    Ok((request_line, headers))
}

/// Answers each incoming request with `(status line, body)` from `responses`.
async fn spawn_mock_api(
    responses: Vec<(&'static str, String)>,
) -> (String, CapturedRequests, tokio::task::JoinHandle<Result<(), String>>) {
    clear_proxy_env();
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("listener should bind");
    let addr = listener.local_addr().expect("local addr should resolve");
    let captured: CapturedRequests = Arc::new(Mutex::new(Vec::new()));
    let captured_for_server = Arc::clone(&captured);

    let task = tokio::spawn(async move {
        for (status, body) in responses {
            let (mut stream, _) = listener.accept().await.map_err(|err| err.to_string())?;
            let (request_line, headers) = read_request_head(&mut stream).await?;
            captured_for_server
                .lock()
                .await
                .push((request_line, headers));
            let response = format!(
                "HTTP/1.1 {status}\r\ncontent-type: application/json\r\nconnection: close\r\ncontent-length: {}\r\n\r\n{}",
                body.len(),
                body
            );
            stream
                .write_all(response.as_bytes())
                .await
                .map_err(|err| err.to_string())?;
        }
        Ok::<(), String>(())
    });

    (format!("http://{addr}/v6"), captured, task)
}

fn settings(base_url: &str, timeout: Duration) -> ExchangeSettings {
    ExchangeSettings {
        base_url: base_url.to_string(),
        api_key: "test-key".to_string(),
        timeout,
        user_agent: "currency-exchange-app/1.0".to_string(),
    }
}

fn registry_for(base_url: &str, timeout: Duration) -> ToolRegistry {
    let client = ExchangeRateClient::new(settings(base_url, timeout)).expect("build client");
    let mut registry = ToolRegistry::new();
    register_tools(&mut registry, Arc::new(client)).expect("register currency tools");
    registry
}

async fn get_rate(registry: &ToolRegistry, from: &str, to: &str) -> ToolInvocationResult {
    registry
        .dispatch(ToolInvocationRequest::new(
            GET_EXCHANGE_RATE,
            json!({"from_currency": from, "to_currency": to}),
        ))
        .await
}

#[tokio::test]
async fn rate_lookup_uppercases_codes_and_formats_four_decimals() {
    let (base_url, captured, server) = spawn_mock_api(vec![(
        "200 OK",
        json!({"result": "success", "base_code": "INR", "target_code": "USD", "conversion_rate": 0.012})
            .to_string(),
    )])
    .await;
    let registry = registry_for(&base_url, Duration::from_secs(5));

    let result = get_rate(&registry, "inr", "usd").await;
    assert_eq!(result, ToolInvocationResult::text("💱 1 INR = 0.0120 USD"));

    server
        .await
        .expect("mock server task should join")
        .expect("mock server should succeed");
    let captured = captured.lock().await;
    let (request_line, headers) = &captured[0];
    assert_eq!(request_line, "GET /v6/test-key/pair/INR/USD HTTP/1.1");
    let header = |name: &str| {
        headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    };
    assert_eq!(header("user-agent"), Some("currency-exchange-app/1.0"));
    assert_eq!(header("accept"), Some("application/json"));
}

#[tokio::test]
async fn currency_codes_stay_inside_their_path_segment() {
    let (base_url, captured, server) = spawn_mock_api(vec![(
        "200 OK",
        json!({"result": "error", "error-type": "unsupported-code"}).to_string(),
    )])
    .await;
    let registry = registry_for(&base_url, Duration::from_secs(5));

    let result = get_rate(&registry, "usd/../../codes?x=", "eur").await;
    assert_eq!(result, ToolInvocationResult::text("Error: unsupported-code"));

    server
        .await
        .expect("mock server task should join")
        .expect("mock server should succeed");
    assert_eq!(
        captured.lock().await[0].0,
        "GET /v6/test-key/pair/USD%2F..%2F..%2FCODES%3FX=/EUR HTTP/1.1"
    );
}

#[tokio::test]
async fn dot_segment_codes_never_reach_the_api() {
    // Nothing listens here; a request would fail the same way but slower.
    let registry = registry_for("http://127.0.0.1:9/v6", Duration::from_secs(1));
    for code in ["..", "."] {
        assert_eq!(
            get_rate(&registry, code, "EUR").await,
            ToolInvocationResult::text(
                "Unable to fetch exchange rate. Please check if your API key is valid."
            )
        );
    }

    let client = ExchangeRateClient::new(settings("http://127.0.0.1:9/v6", Duration::from_secs(1)))
        .expect("build client");
    let err = client.pair_rate("..", "EUR").await.expect_err("dot segment");
    assert!(matches!(err, ExchangeError::InvalidUrl(_)));
    assert!(!err.to_string().contains("test-key"));
}

#[tokio::test]
async fn network_errors_do_not_reveal_the_key() {
    clear_proxy_env();
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("listener should bind");
    let addr = listener.local_addr().expect("local addr should resolve");
    drop(listener);
    let base_url = format!("http://{addr}/v6");
    let client = ExchangeRateClient::new(settings(&base_url, Duration::from_secs(5)))
        .expect("build client");

    let err = client.pair_rate("USD", "EUR").await.expect_err("nothing listens");
    assert!(matches!(err, ExchangeError::Network(_)));
    assert!(err.to_string().starts_with("HTTP error"));
    assert!(!err.to_string().contains("test-key"), "{err}");
    assert!(!format!("{err:?}").contains("test-key"), "{err:?}");

    let err = client.supported_codes().await.expect_err("nothing listens");
    assert!(!err.to_string().contains("test-key"), "{err}");
}

#[tokio::test]
async fn invalid_key_over_a_session_keeps_it_ready() {
    let (base_url, captured, api) = spawn_mock_api(vec![
        (
            "200 OK",
            json!({"result": "error", "error-type": "invalid-key"}).to_string(),
        ),
        (
            "200 OK",
            json!({"result": "success", "base_code": "USD", "target_code": "EUR", "conversion_rate": 0.9})
                .to_string(),
        ),
    ])
    .await;
    let registry = Arc::new(registry_for(&base_url, Duration::from_secs(5)));
    let (client_end, server_end) = memory::pair();
    let server = tokio::spawn(
        ServerSession::new(registry, ServerIdentity::new("currency-exchange"), "memory")
            .run(server_end),
    );
    let client = ClientSession::connect(client_end, "memory", Duration::from_secs(5));
    client.initialize().await.expect("handshake");

    let arguments = |from: &str, to: &str| match json!({"from_currency": from, "to_currency": to}) {
        Value::Object(map) => map,
        _ => unreachable!(),
    };

    let rejected = client
        .call_tool(GET_EXCHANGE_RATE, arguments("USD", "EUR"))
        .await
        .expect("an API error is still a tool result");
    assert!(!rejected.is_failure());
    assert_eq!(rejected, ToolInvocationResult::text("Error: invalid-key"));
    assert_eq!(client.state(), SessionState::Ready);

    let accepted = client
        .call_tool(GET_EXCHANGE_RATE, arguments("usd", "eur"))
        .await
        .expect("second call");
    assert_eq!(accepted, ToolInvocationResult::text("💱 1 USD = 0.9000 EUR"));
    assert_eq!(client.state(), SessionState::Ready);

    client.close().await;
    let state = tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("server session should end")
        .expect("server task should join");
    assert_eq!(state, SessionState::Closed);
    api.await
        .expect("mock server task should join")
        .expect("mock server should succeed");
    let captured = captured.lock().await;
    assert_eq!(captured.len(), 2);
    assert_eq!(captured[1].0, "GET /v6/test-key/pair/USD/EUR HTTP/1.1");
}

#[tokio::test]
async fn api_errors_are_reported_as_text() {
    let (base_url, _captured, server) = spawn_mock_api(vec![
        (
            "200 OK",
            json!({"result": "error", "error-type": "invalid-key"}).to_string(),
        ),
        (
            "403 Forbidden",
            json!({"result": "error", "error-type": "inactive-account"}).to_string(),
        ),
        ("200 OK", json!({"result": "error"}).to_string()),
    ])
    .await;
    let registry = registry_for(&base_url, Duration::from_secs(5));

    assert_eq!(
        get_rate(&registry, "USD", "EUR").await,
        ToolInvocationResult::text("Error: invalid-key")
    );
    assert_eq!(
        get_rate(&registry, "USD", "EUR").await,
        ToolInvocationResult::text("Error: inactive-account")
    );
    assert_eq!(
        get_rate(&registry, "USD", "EUR").await,
        ToolInvocationResult::text("Error: unknown")
    );
    server
        .await
        .expect("mock server task should join")
        .expect("mock server should succeed");
}

#[tokio::test]
async fn missing_rate_and_bad_bodies_have_fixed_messages() {
    let (base_url, _captured, server) = spawn_mock_api(vec![
        ("200 OK", json!({"result": "success"}).to_string()),
        ("200 OK", "<html>oops</html>".to_string()),
        ("500 Internal Server Error", "{}".to_string()),
    ])
    .await;
    let registry = registry_for(&base_url, Duration::from_secs(5));

    assert_eq!(
        get_rate(&registry, "USD", "EUR").await,
        ToolInvocationResult::text("Exchange rate not available.")
    );
    for _ in 0..2 {
        assert_eq!(
            get_rate(&registry, "USD", "EUR").await,
            ToolInvocationResult::text(
                "Unable to fetch exchange rate. Please check if your API key is valid."
            )
        );
    }
    server
        .await
        .expect("mock server task should join")
        .expect("mock server should succeed");
}

#[tokio::test]
async fn unreachable_service_is_an_ordinary_result() {
    clear_proxy_env();
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("listener should bind");
    let addr = listener.local_addr().expect("local addr should resolve");
    drop(listener);
    let registry = registry_for(&format!("http://{addr}/v6"), Duration::from_secs(5));

    assert_eq!(
        get_rate(&registry, "USD", "EUR").await,
        ToolInvocationResult::text(
            "Unable to fetch exchange rate. Please check if your API key is valid."
        )
    );
    let listing = registry
        .dispatch(ToolInvocationRequest::new(LIST_SUPPORTED_CURRENCIES, json!({})))
        .await;
    assert_eq!(
        listing,
        ToolInvocationResult::text(
            "Unable to fetch list of supported currencies. Please check if your API key is valid."
        )
    );
}

#[tokio::test]
async fn slow_service_times_out() {
    clear_proxy_env();
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("listener should bind");
    let addr = listener.local_addr().expect("local addr should resolve");
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept");
        tokio::time::sleep(Duration::from_secs(5)).await;
        drop(stream);
    });
    let registry = registry_for(&format!("http://{addr}/v6"), Duration::from_millis(200));

    let result = tokio::time::timeout(Duration::from_secs(3), get_rate(&registry, "USD", "EUR"))
        .await
        .expect("request should be bounded by the client timeout");
    assert_eq!(
        result,
        ToolInvocationResult::text(
            "Unable to fetch exchange rate. Please check if your API key is valid."
        )
    );
    server.abort();
}

#[tokio::test]
async fn currency_listing_is_sorted() {
    let (base_url, captured, server) = spawn_mock_api(vec![
        (
            "200 OK",
            json!({
                "result": "success",
                "supported_codes": [["USD", "United States Dollar"], ["AED", "UAE Dirham"], ["INR", "Indian Rupee"]]
            })
            .to_string(),
        ),
        (
            "200 OK",
            json!({"result": "success", "supported_codes": []}).to_string(),
        ),
    ])
    .await;
    let registry = registry_for(&base_url, Duration::from_secs(5));
    let list = || {
        registry.dispatch(ToolInvocationRequest::new(
            LIST_SUPPORTED_CURRENCIES,
            Value::Null,
        ))
    };

    assert_eq!(
        list().await,
        ToolInvocationResult::text(
            "AED - UAE Dirham\nINR - Indian Rupee\nUSD - United States Dollar"
        )
    );
    assert_eq!(
        list().await,
        ToolInvocationResult::text("No currency data available.")
    );

    server
        .await
        .expect("mock server task should join")
        .expect("mock server should succeed");
    assert_eq!(captured.lock().await[0].0, "GET /v6/test-key/codes HTTP/1.1");
}

#[tokio::test]
async fn missing_arguments_never_reach_the_api() {
    let registry = registry_for("http://127.0.0.1:9/v6", Duration::from_secs(1));
    let result = registry
        .dispatch(ToolInvocationRequest::new(
            GET_EXCHANGE_RATE,
            json!({"from_currency": "USD"}),
        ))
        .await;
    assert_eq!(
        result,
        ToolInvocationResult::failure("invalid arguments: missing required parameter 'to_currency'")
    );
}

#[test]
fn settings_debug_hides_the_key() {
    let rendered = format!("{:?}", settings("https://example.test", Duration::from_secs(30)));
    assert!(!rendered.contains("test-key"));
    assert!(rendered.contains("<redacted>"));
}

#[test]
fn placeholder_key_is_rejected() {
    let err = crate::core::config::io::secret_from_value(
        "EXCHANGE_RATE_API_KEY",
        Some("your_api_key_here".to_string()),
    )
    .expect_err("placeholder is not a key");
    assert!(err.to_string().starts_with("EXCHANGE_RATE_API_KEY is not set"));
}
