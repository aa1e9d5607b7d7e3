use super::planner::{extract_json, parse_directive, strip_think_blocks};
use super::*;
use crate::mcp::server::{ServerIdentity, ServerSession};
use crate::mcp::transport::memory;
use crate::tools::{
    ContentItem, ParameterKind, ParameterSpec, ToolDescriptor, ToolExecutionError, ToolHandler,
    ToolRegistry,
};
use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct CountingRate {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl ToolHandler for CountingRate {
    async fn call(
        &self,
        arguments: &Map<String, Value>,
    ) -> Result<Vec<ContentItem>, ToolExecutionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let from = crate::tools::string_argument(arguments, "from_currency")?.to_uppercase();
        let to = crate::tools::string_argument(arguments, "to_currency")?.to_uppercase();
        Ok(vec![ContentItem::Text(format!("💱 1 {from} = 0.0120 {to}"))])
    }
}

async fn ready_session() -> (ClientSession, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut registry = ToolRegistry::new();
    registry
        .register(
            ToolDescriptor::new(
                "get_exchange_rate",
                "Get the current exchange rate between two currencies.",
            )
            .with_parameter(ParameterSpec::required(
                "from_currency",
                ParameterKind::String,
                "The currency code to convert from (e.g., 'USD')",
            ))
            .with_parameter(ParameterSpec::required(
                "to_currency",
                ParameterKind::String,
                "The currency code to convert to (e.g., 'EUR')",
            )),
            CountingRate {
                calls: calls.clone(),
            },
        )
        .expect("register tool");

    let (client_end, server_end) = memory::pair();
    let server = ServerSession::new(
        Arc::new(registry),
        ServerIdentity::new("currency-exchange"),
        "agent-test",
    );
    tokio::spawn(server.run(server_end));
    let session = ClientSession::connect(client_end, "memory", Duration::from_secs(5));
    session.initialize().await.expect("handshake");
    (session, calls)
}

fn rate_arguments() -> Map<String, Value> {
    let mut arguments = Map::new();
    arguments.insert("from_currency".to_string(), json!("inr"));
    arguments.insert("to_currency".to_string(), json!("usd"));
    arguments
}

/// Always asks for another tool call.
struct AlwaysCall;

#[async_trait]
impl Planner for AlwaysCall {
    async fn decide(
        &self,
        _transcript: &[Turn],
        _tools: &[ToolSummary],
    ) -> Result<PlannerDecision, PlannerError> {
        Ok(PlannerDecision::CallTool {
            name: "get_exchange_rate".to_string(),
            arguments: rate_arguments(),
        })
    }
}

/// Replays decisions in order and records every transcript it was shown.
#[derive(Clone, Default)]
struct Scripted {
    decisions: Arc<Mutex<Vec<PlannerDecision>>>,
    seen: Arc<Mutex<Vec<Vec<Turn>>>>,
}

impl Scripted {
    fn new(decisions: Vec<PlannerDecision>) -> Self {
        Self {
            decisions: Arc::new(Mutex::new(decisions)),
            seen: Arc::default(),
        }
    }

    fn transcripts(&self) -> Vec<Vec<Turn>> {
        self.seen.lock().expect("lock").clone()
    }
}

#[async_trait]
impl Planner for Scripted {
    async fn decide(
        &self,
        transcript: &[Turn],
        _tools: &[ToolSummary],
    ) -> Result<PlannerDecision, PlannerError> {
        self.seen.lock().expect("lock").push(transcript.to_vec());
        let mut decisions = self.decisions.lock().expect("lock");
        if decisions.is_empty() {
            return Err(PlannerError::EmptyReply);
        }
        Ok(decisions.remove(0))
    }
}

fn final_answer(text: &str) -> PlannerDecision {
    PlannerDecision::Final {
        text: text.to_string(),
    }
}

fn call_rate() -> PlannerDecision {
    PlannerDecision::CallTool {
        name: "get_exchange_rate".to_string(),
        arguments: rate_arguments(),
    }
}

#[tokio::test]
async fn budget_of_one_makes_exactly_one_call_and_returns_partial() {
    let (session, calls) = ready_session().await;
    let options = AgentOptions {
        max_steps: 1,
        ..AgentOptions::default()
    };
    let mut agent = Agent::connect(session, AlwaysCall, options)
        .await
        .expect("agent connects");

    let outcome = agent.run_turn("INR to USD?").await.expect("turn completes");

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(outcome.partial);
    assert_eq!(outcome.steps.len(), 1);
    assert!(outcome.text.contains("maximum number of steps (1)"));
    assert!(outcome.text.contains("💱 1 INR = 0.0120 USD"));
}

#[tokio::test]
async fn tool_result_feeds_the_final_answer() {
    let (session, calls) = ready_session().await;
    let planner = Scripted::new(vec![call_rate(), final_answer("1 INR is about 0.012 USD.")]);
    let mut agent = Agent::connect(session, planner.clone(), AgentOptions::default())
        .await
        .expect("agent connects");
    assert_eq!(agent.tools()[0].name, "get_exchange_rate");

    let outcome = agent.run_turn("INR to USD?").await.expect("turn completes");

    assert_eq!(outcome.text, "1 INR is about 0.012 USD.");
    assert!(!outcome.partial);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(outcome.steps[0].success);

    let transcripts = planner.transcripts();
    let second = &transcripts[1];
    let observation = second.last().expect("observation present");
    assert_eq!(observation.role, TurnRole::Observation);
    assert_eq!(observation.content, "💱 1 INR = 0.0120 USD");

    let roles: Vec<TurnRole> = agent.memory().turns().iter().map(|turn| turn.role).collect();
    assert_eq!(
        roles,
        vec![
            TurnRole::User,
            TurnRole::Assistant,
            TurnRole::Observation,
            TurnRole::Assistant
        ]
    );
}

#[tokio::test]
async fn tool_failures_become_observations() {
    let (session, calls) = ready_session().await;
    let planner = Scripted::new(vec![
        PlannerDecision::CallTool {
            name: "convert_everything".to_string(),
            arguments: Map::new(),
        },
        final_answer("I cannot do that."),
    ]);
    let mut agent = Agent::connect(session, planner.clone(), AgentOptions::default())
        .await
        .expect("agent connects");

    let outcome = agent.run_turn("convert").await.expect("turn completes");

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(!outcome.steps[0].success);
    assert_eq!(
        outcome.steps[0].observation,
        "Tool error: unknown tool: convert_everything"
    );
}

#[tokio::test]
async fn memory_spans_turns_until_cleared() {
    let (session, _calls) = ready_session().await;
    let planner = Scripted::new(vec![final_answer("hi"), final_answer("still here")]);
    let mut agent = Agent::connect(session, planner.clone(), AgentOptions::default())
        .await
        .expect("agent connects");

    agent.run_turn("hello").await.expect("first turn");
    agent.run_turn("again").await.expect("second turn");
    let transcripts = planner.transcripts();
    let contents: Vec<_> = transcripts[1].iter().map(|turn| turn.content.as_str()).collect();
    assert_eq!(contents, vec!["hello", "hi", "again"]);

    agent.clear_memory();
    assert!(agent.memory().is_empty());
}

#[tokio::test]
async fn without_memory_each_turn_starts_fresh() {
    let (session, _calls) = ready_session().await;
    let planner = Scripted::new(vec![final_answer("one"), final_answer("two")]);
    let options = AgentOptions {
        memory_enabled: false,
        ..AgentOptions::default()
    };
    let mut agent = Agent::connect(session, planner.clone(), options)
        .await
        .expect("agent connects");

    agent.run_turn("first").await.expect("first turn");
    agent.run_turn("second").await.expect("second turn");

    let transcripts = planner.transcripts();
    assert_eq!(transcripts[1], vec![Turn::user("second")]);
    assert!(agent.memory().is_empty());
}

#[tokio::test]
async fn cumulative_budget_persists_until_reset() {
    let (session, calls) = ready_session().await;
    let options = AgentOptions {
        max_steps: 1,
        memory_enabled: false,
        budget_policy: BudgetPolicy::Cumulative,
    };
    let mut agent = Agent::connect(session, AlwaysCall, options)
        .await
        .expect("agent connects");

    agent.run_turn("first").await.expect("first turn");
    let second = agent.run_turn("second").await.expect("second turn");
    assert!(second.partial);
    assert!(second.steps.is_empty());
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    agent.reset_budget();
    agent.run_turn("third").await.expect("third turn");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn planner_errors_surface_to_the_caller() {
    let (session, _calls) = ready_session().await;
    let mut agent = Agent::connect(session, Scripted::new(Vec::new()), AgentOptions::default())
        .await
        .expect("agent connects");

    let err = agent.run_turn("hello").await.expect_err("planner has nothing");
    assert!(matches!(err, AgentError::Planner(PlannerError::EmptyReply)));
}

#[tokio::test]
async fn failed_turn_leaves_memory_untouched() {
    let (session, calls) = ready_session().await;
    let planner = Scripted::new(vec![final_answer("hi"), call_rate()]);
    let mut agent = Agent::connect(session, planner.clone(), AgentOptions::default())
        .await
        .expect("agent connects");

    agent.run_turn("hello").await.expect("first turn");
    let err = agent
        .run_turn("INR to USD?")
        .await
        .expect_err("planner runs dry after the call");
    assert!(matches!(err, AgentError::Planner(PlannerError::EmptyReply)));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let contents: Vec<_> = agent
        .memory()
        .turns()
        .iter()
        .map(|turn| turn.content.as_str())
        .collect();
    assert_eq!(contents, vec!["hello", "hi"]);

    planner
        .decisions
        .lock()
        .expect("lock")
        .push(final_answer("ok"));
    agent.run_turn("again").await.expect("third turn");
    let transcripts = planner.transcripts();
    let last: Vec<_> = transcripts
        .last()
        .expect("transcript recorded")
        .iter()
        .map(|turn| turn.content.as_str())
        .collect();
    assert_eq!(last, vec!["hello", "hi", "again"]);
    assert_eq!(agent.memory().len(), 4);
}

#[test]
fn directives_parse_from_bare_fenced_and_embedded_json() {
    assert_eq!(
        parse_directive(r#"{"action":"final","response":"done"}"#),
        Ok(final_answer("done"))
    );
    assert_eq!(
        parse_directive("```json\n{\"action\":\"call_tool\",\"tool\":\"list_supported_currencies\"}\n```"),
        Ok(PlannerDecision::CallTool {
            name: "list_supported_currencies".to_string(),
            arguments: Map::new(),
        })
    );
    assert_eq!(
        parse_directive(
            "Sure! {\"action\":\"call_tool\",\"tool\":\"get_exchange_rate\",\"input\":{\"from_currency\":\"inr\",\"to_currency\":\"usd\"}} thanks"
        ),
        Ok(call_rate())
    );
}

#[test]
fn think_blocks_are_stripped_before_parsing() {
    assert_eq!(
        strip_think_blocks("<think>Need the rate.</think>\n{\"action\":\"final\",\"response\":\"ok\"}"),
        "{\"action\":\"final\",\"response\":\"ok\"}"
    );
    assert_eq!(strip_think_blocks("answer <think>never closed"), "answer");
    assert_eq!(
        parse_directive("<think>{\"action\":\"call_tool\"}</think>The rate is 0.012."),
        Ok(final_answer("The rate is 0.012."))
    );
}

#[test]
fn unusable_directives_are_errors() {
    assert!(parse_directive(r#"{"action":"dance"}"#).is_err());
    assert!(parse_directive(r#"{"action":"call_tool"}"#).is_err());
    assert!(parse_directive(r#"{"action":"call_tool","tool":"x","input":[1]}"#).is_err());
    assert!(parse_directive(r#"{"response":"no action"}"#).is_err());
    assert!(parse_directive("{broken").is_err());
    assert!(parse_directive("<think>only thoughts</think>").is_err());
    assert_eq!(extract_json("no json here"), None);
}

async fn read_http_body(stream: &mut tokio::net::TcpStream) -> Result<(String, Value), String> {
    use tokio::io::AsyncReadExt;

    let mut buffer = Vec::new();
    let header_end = loop {
        let mut chunk = [0_u8; 1024];
        let read = stream
            .read(&mut chunk)
            .await
            .map_err(|err| err.to_string())?;
        if read == 0 {
            return Err("Unexpected EOF while reading HTTP headers".to_string());
        }
        buffer.extend_from_slice(&chunk[..read]);
        if let Some(index) = buffer.windows(4).position(|window| window == b"\r\n\r\n") {
            break index + 4;
        }
    };

    let head = String::from_utf8_lossy(&buffer[..header_end]).to_string();
    let content_length = head
        .split("\r\n")
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);
    let mut body = buffer[header_end..].to_vec();
    while body.len() < content_length {
        let mut chunk = vec![0_u8; content_length - body.len()];
        let read = stream
            .read(&mut chunk)
            .await
            .map_err(|err| err.to_string())?;
        if read == 0 {
            return Err("Unexpected EOF while reading HTTP body".to_string());
        }
        body.extend_from_slice(&chunk[..read]);
    }
    let body = serde_json::from_slice(&body).map_err(|err| err.to_string())?;
    Ok((head, body))
}

#[tokio::test]
async fn completion_planner_asks_for_a_correction() {
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    std::env::remove_var("HTTP_PROXY");
    std::env::remove_var("http_proxy");
    std::env::remove_var("HTTPS_PROXY");
    std::env::remove_var("https_proxy");
    std::env::remove_var("ALL_PROXY");
    std::env::remove_var("all_proxy");
    std::env::set_var("NO_PROXY", "*");
    std::env::set_var("no_proxy", "*");

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("listener should bind");
    let addr = listener.local_addr().expect("local addr should resolve");
    let replies = [
        "<think>hmm</think>{\"action\": \"call_tool\", \"tool\": ",
        "{\"action\":\"final\",\"response\":\"1 INR = 0.0120 USD\"}",
    ];
    let server = tokio::spawn(async move {
        let mut requests = Vec::new();
        for reply in replies {
            let (mut stream, _) = listener.accept().await.map_err(|err| err.to_string())?;
            let (head, body) = read_http_body(&mut stream).await?;
            requests.push((head, body));
            let payload = json!({
                "choices": [{"index": 0, "message": {"role": "assistant", "content": reply}, "finish_reason": "stop"}]
            })
            .to_string();
            let response = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\nconnection: close\r\ncontent-length: {}\r\n\r\n{}",
                payload.len(),
                payload
            );
            stream
                .write_all(response.as_bytes())
                .await
                .map_err(|err| err.to_string())?;
        }
        Ok::<_, String>(requests)
    });

    let planner = ChatCompletionPlanner::new(PlannerSettings {
        base_url: format!("http://{addr}/openai/v1/"),
        api_key: "gsk-test".to_string(),
        model: "qwen-qwq-32b".to_string(),
        temperature: None,
        timeout: Duration::from_secs(5),
    })
    .expect("build planner");
    let tools = vec![ToolSummary {
        name: "get_exchange_rate".to_string(),
        description: "Get the current exchange rate between two currencies.".to_string(),
        input_schema: json!({"type": "object"}),
    }];

    let decision = planner
        .decide(&[Turn::user("INR to USD?")], &tools)
        .await
        .expect("second reply is usable");
    assert_eq!(decision, final_answer("1 INR = 0.0120 USD"));

    let requests = server
        .await
        .expect("mock server task should join")
        .expect("mock server should succeed");
    let (head, first) = &requests[0];
    assert!(head.starts_with("POST /openai/v1/chat/completions HTTP/1.1"));
    assert!(head.to_ascii_lowercase().contains("authorization: bearer gsk-test"));
    assert_eq!(first["model"], "qwen-qwq-32b");
    assert_eq!(first["stream"], false);
    let system = first["messages"][0]["content"].as_str().expect("system prompt");
    assert!(system.contains("get_exchange_rate"));

    let retry = requests[1].1["messages"].as_array().expect("messages");
    assert_eq!(retry.len(), 4);
    assert_eq!(retry[2]["role"], "assistant");
    assert!(retry[3]["content"]
        .as_str()
        .expect("correction text")
        .contains("could not be used"));
}
