use serde_json::{json, Value};
use signet_core::chat::{ChatSession, MessageRole, SYSTEM_INSTRUCTION, TRANSCRIPT_LIMIT};
use signet_core::config::{AiRuntimeSettings, ConfigError, OpenAiSettings};
use signet_core::error::SessionError;
use signet_core::llm::{CompletionError, LlmDriver, LlmProviderKind};
use signet_core::sink::ViewEvent;
use signet_core::testing::RecordingSink;
use signet_tests::block_on;
use std::sync::Arc;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn chat_with(llm: LlmDriver) -> (ChatSession, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::default());
    (ChatSession::new(llm, sink.clone()), sink)
}

fn openai_driver(base_url: &str) -> LlmDriver {
    LlmDriver::with_settings(&AiRuntimeSettings {
        provider: LlmProviderKind::OpenAi,
        openai: Some(OpenAiSettings {
            api_key: "sk-test".into(),
            model: None,
            base_url: Url::parse(base_url).expect("base url"),
        }),
        azure: None,
        model: None,
    })
}

fn displayed(sink: &RecordingSink) -> Vec<(MessageRole, String)> {
    sink.events()
        .into_iter()
        .filter_map(|event| match event {
            ViewEvent::ChatMessage { message } => Some((message.role, message.content)),
            _ => None,
        })
        .collect()
}

#[test]
fn opening_greets_by_name_once() {
    let (chat, sink) = chat_with(LlmDriver::fake());

    chat.open(Some("Jane Doe")).expect("open");
    let events = sink.events();
    assert_eq!(events[0], ViewEvent::ClearError);
    assert_eq!(events[1], ViewEvent::ChatOpened);
    assert_eq!(
        displayed(&sink),
        vec![(
            MessageRole::Assistant,
            "Hello Jane Doe! I'm your TRUSTB contract mentor. How can I help you today?"
                .to_string()
        )]
    );
    assert!(chat.transcript().is_empty());

    block_on(chat.send("hello")).expect("send");
    sink.clear();
    chat.open(Some("Jane Doe")).expect("reopen");
    assert!(displayed(&sink).is_empty());
}

#[test]
fn unconfigured_chat_refuses_to_open() {
    let (chat, sink) = chat_with(LlmDriver::from_settings(&Err(ConfigError::Missing)));

    let err = chat.open(None).unwrap_err();
    assert!(matches!(
        err,
        SessionError::CompletionApi(CompletionError::NotConfigured(_))
    ));
    assert_eq!(
        sink.errors(),
        vec![
            "OpenAI API key not configured. Please update signet.yaml or set OPENAI_API_KEY."
                .to_string()
        ]
    );
    assert!(!sink.events().contains(&ViewEvent::ChatOpened));
}

#[test]
fn blank_input_is_ignored() {
    let (chat, sink) = chat_with(LlmDriver::fake());
    assert_eq!(block_on(chat.send("   \n")).expect("send"), None);
    assert!(sink.events().is_empty());
    assert!(chat.transcript().is_empty());
}

#[test]
fn reply_is_shown_and_recorded() {
    let (chat, sink) = chat_with(LlmDriver::fake());

    let reply = block_on(chat.send("  draft the parties section ")).expect("send");
    let reply = reply.expect("reply");
    assert_eq!(reply.role, MessageRole::Assistant);
    assert!(reply.content.contains("draft the parties section"));

    let transcript = chat.transcript();
    assert_eq!(transcript.len(), 2);
    assert_eq!(transcript.messages()[0].content, "draft the parties section");
    assert_eq!(transcript.messages()[1], reply);

    let shown = displayed(&sink);
    assert_eq!(shown.len(), 2);
    assert_eq!(shown[0].0, MessageRole::User);
    assert_eq!(shown[1].0, MessageRole::Assistant);
}

#[test]
fn transcript_keeps_only_recent_exchanges() {
    let (chat, _sink) = chat_with(LlmDriver::fake());
    block_on(async {
        for idx in 0..11 {
            chat.send(&format!("message {idx}")).await.expect("send");
        }
    });

    let transcript = chat.transcript();
    assert_eq!(transcript.len(), TRANSCRIPT_LIMIT);
    let first = &transcript.messages()[0];
    assert_eq!(first.role, MessageRole::User);
    assert_eq!(first.content, "message 1");
    let last = &transcript.messages()[TRANSCRIPT_LIMIT - 1];
    assert_eq!(last.role, MessageRole::Assistant);
    assert!(last.content.contains("message 10"));
}

#[test]
fn request_carries_instruction_and_history() {
    block_on(async {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{ "message": { "role": "assistant", "content": "{\"title\":\"Services\"}" } }]
            })))
            .mount(&server)
            .await;
        let (chat, _sink) = chat_with(openai_driver(&format!("{}/v1", server.uri())));

        chat.send("first").await.expect("first");
        chat.send("second").await.expect("second");

        let requests = server.received_requests().await.expect("recording enabled");
        assert_eq!(requests.len(), 2);
        let body: Value = requests[1].body_json().expect("json body");
        let messages = body["messages"].as_array().expect("messages");
        let roles: Vec<_> = messages.iter().map(|m| m["role"].as_str().unwrap()).collect();
        assert_eq!(roles, vec!["system", "user", "assistant", "user"]);
        assert_eq!(messages[0]["content"], SYSTEM_INSTRUCTION);
        assert_eq!(messages[3]["content"], "second");
        assert_eq!(body["model"], "gpt-3.5-turbo");
        assert_eq!(body["max_tokens"], 1000);
    });
}

#[test]
fn service_failure_apologizes_and_keeps_user_message() {
    block_on(async {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        let (chat, sink) = chat_with(openai_driver(&server.uri()));

        let err = chat.send("hello").await.unwrap_err();
        assert_eq!(err.status(), Some(500));
        assert_eq!(
            sink.errors(),
            vec!["Chat error: OpenAI API error: 500 Internal Server Error".to_string()]
        );
        let shown = displayed(&sink);
        assert!(shown
            .last()
            .expect("apology")
            .1
            .contains("issue connecting to the AI service"));
        assert_eq!(chat.transcript().len(), 1);
    });
}

#[test]
fn transport_failure_uses_generic_apology() {
    block_on(async {
        // Nothing listens on the discard port.
        let (chat, sink) = chat_with(openai_driver("http://127.0.0.1:9/v1"));

        let err = chat.send("hello").await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::CompletionApi(CompletionError::Transport(_))
        ));
        let shown = displayed(&sink);
        assert!(shown
            .last()
            .expect("apology")
            .1
            .contains("error while processing your message"));
    });
}

#[test]
fn clearing_resets_history_and_greets_again() {
    let (chat, sink) = chat_with(LlmDriver::fake());
    block_on(chat.send("hello")).expect("send");
    sink.clear();

    chat.clear(Some("Jane Doe"));
    assert!(chat.transcript().is_empty());
    assert_eq!(sink.events()[0], ViewEvent::ChatCleared);
    assert_eq!(
        displayed(&sink),
        vec![(
            MessageRole::Assistant,
            "Hello Jane Doe! I'm your AI assistant. How can I help you today?".to_string()
        )]
    );
}
