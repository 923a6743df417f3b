//! End-to-end orchestrator flow against the in-memory store: credential
//! activation, model configuration, chat lifecycle, and the completion
//! round-trip through a stub transport.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Mutex;

use relaychat_core::chat::{
    ChatService, CompletionRequest, CompletionTransport, MessageCreate, RawResponse,
};
use relaychat_core::credentials::{ActivateOptions, CredentialService, KeyProbe};
use relaychat_core::error::CoreError;
use relaychat_core::model_config::{ModelConfigService, ModelSettings, NewModelConfiguration};
use relaychat_core::provider::ProviderKey;
use relaychat_core::store::memory::MemoryStore;
use relaychat_core::vault::Vault;

struct AcceptingProbe;

#[async_trait]
impl KeyProbe for AcceptingProbe {
    async fn probe(&self, _: ProviderKey, _: &str, _: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Returns a canned response and records every request it saw.
struct StubTransport {
    status: u16,
    body: String,
    seen: Mutex<Vec<CompletionRequest>>,
}

impl StubTransport {
    fn new(status: u16, body: Value) -> Arc<Self> {
        Arc::new(Self {
            status,
            body: body.to_string(),
            seen: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl CompletionTransport for StubTransport {
    async fn execute(&self, request: CompletionRequest) -> anyhow::Result<RawResponse> {
        self.seen.lock().await.push(request);
        Ok(RawResponse {
            status: self.status,
            body: self.body.clone(),
        })
    }
}

struct Harness {
    chats: ChatService,
    credentials: CredentialService,
    models: ModelConfigService,
    transport: Arc<StubTransport>,
}

fn harness(transport: Arc<StubTransport>) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let vault = Arc::new(Vault::generate().0);
    let credentials = CredentialService::new(store.clone(), vault, Arc::new(AcceptingProbe));
    let models = ModelConfigService::new(store.clone());
    let chats = ChatService::new(
        store,
        credentials.clone(),
        models.clone(),
        HashMap::new(),
        transport.clone(),
    );
    Harness {
        chats,
        credentials,
        models,
        transport,
    }
}

fn ok_completion() -> Value {
    json!({
        "choices": [{
            "message": {"role": "assistant", "content": "Hello! How can I help?"},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 12, "completion_tokens": 7, "total_tokens": 19}
    })
}

async fn seed_openai(h: &Harness, system_prompt: Option<&str>) {
    h.credentials
        .activate(
            "u1",
            ProviderKey::OpenAi,
            "sk-live-integration",
            ActivateOptions::default(),
        )
        .await
        .unwrap();
    h.models
        .create(
            "u1",
            NewModelConfiguration {
                provider: ProviderKey::OpenAi,
                model: "gpt-4o".into(),
                name: "default".into(),
                display_name: None,
                description: None,
                provider_config_id: None,
                settings: ModelSettings {
                    temperature: 0.7,
                    system_prompt: system_prompt.map(Into::into),
                    ..Default::default()
                },
                is_default: true,
            },
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_send_message_round_trip() {
    let h = harness(StubTransport::new(200, ok_completion()));
    seed_openai(&h, Some("You are concise.")).await;
    let chat = h.chats.create_chat("u1", "First chat", None).await.unwrap();

    let outcome = h
        .chats
        .send_message("u1", &chat.id, MessageCreate::user("Hi there"))
        .await
        .unwrap();

    assert_eq!(outcome.user_message.role, "user");
    let assistant = outcome.assistant_message.unwrap();
    assert_eq!(assistant.role, "assistant");
    assert_eq!(assistant.content, "Hello! How can I help?");
    let metadata = assistant.metadata.unwrap();
    assert_eq!(metadata["provider"], "openai");
    assert_eq!(metadata["model"], "gpt-4o");
    assert_eq!(metadata["finish_reason"], "stop");
    assert_eq!(metadata["usage"]["total_tokens"], 19);

    // Both messages persisted in order.
    let messages = h.chats.list_messages("u1", &chat.id).await.unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, "user");
    assert_eq!(messages[1].role, "assistant");

    // The chat's activity timestamp moved and the model got pinned.
    let reloaded = h.chats.get_chat("u1", &chat.id).await.unwrap();
    assert!(reloaded.updated_at > chat.updated_at);
    assert!(reloaded.model_config_id.is_some());

    // The outbound request carried auth, the default endpoint, the system
    // prompt, and the user's message.
    let seen = h.transport.seen.lock().await;
    assert_eq!(seen.len(), 1);
    let request = &seen[0];
    assert_eq!(request.url, "https://api.openai.com/v1/chat/completions");
    assert!(request
        .headers
        .iter()
        .any(|(n, v)| n == "Authorization" && v == "Bearer sk-live-integration"));
    assert_eq!(request.body["model"], "gpt-4o");
    assert_eq!(request.body["temperature"], 0.7);
    let messages = request.body["messages"].as_array().unwrap();
    assert_eq!(messages[0]["role"], "system");
    assert_eq!(messages[0]["content"], "You are concise.");
    assert_eq!(messages[1]["role"], "user");
    assert_eq!(messages[1]["content"], "Hi there");
}

#[tokio::test]
async fn test_history_grows_across_turns() {
    let h = harness(StubTransport::new(200, ok_completion()));
    seed_openai(&h, None).await;
    let chat = h.chats.create_chat("u1", "Long chat", None).await.unwrap();

    h.chats
        .send_message("u1", &chat.id, MessageCreate::user("First"))
        .await
        .unwrap();
    h.chats
        .send_message("u1", &chat.id, MessageCreate::user("Second"))
        .await
        .unwrap();

    let seen = h.transport.seen.lock().await;
    // Second request carries the full history: user, assistant, user.
    let second = seen[1].body["messages"].as_array().unwrap();
    assert_eq!(second.len(), 3);
    assert_eq!(second[0]["content"], "First");
    assert_eq!(second[1]["role"], "assistant");
    assert_eq!(second[2]["content"], "Second");
}

#[tokio::test]
async fn test_upstream_error_keeps_user_message() {
    let h = harness(StubTransport::new(
        500,
        json!({"error": {"message": "internal"}}),
    ));
    seed_openai(&h, None).await;
    let chat = h.chats.create_chat("u1", "Flaky", None).await.unwrap();

    let err = h
        .chats
        .send_message("u1", &chat.id, MessageCreate::user("Hi"))
        .await
        .unwrap_err();
    match &err {
        CoreError::Upstream { status, .. } => assert_eq!(*status, Some(500)),
        other => panic!("expected upstream error, got {other:?}"),
    }
    assert_eq!(err.status_code(), 502);

    // The inbound message survives; no assistant row was written.
    let messages = h.chats.list_messages("u1", &chat.id).await.unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].role, "user");
}

#[tokio::test]
async fn test_stream_rejected_before_any_store_access() {
    let h = harness(StubTransport::new(200, ok_completion()));
    let create = MessageCreate {
        content: "Hi".into(),
        role: "user".into(),
        stream: true,
    };
    // The chat does not exist; streaming must be rejected before the lookup
    // would have produced a not-found.
    let err = h
        .chats
        .send_message("u1", "no-such-chat", create)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::NotImplemented(_)));
}

#[tokio::test]
async fn test_non_user_role_skips_completion() {
    let h = harness(StubTransport::new(200, ok_completion()));
    seed_openai(&h, None).await;
    let chat = h.chats.create_chat("u1", "Notes", None).await.unwrap();

    let outcome = h
        .chats
        .send_message(
            "u1",
            &chat.id,
            MessageCreate {
                content: "Context note".into(),
                role: "system".into(),
                stream: false,
            },
        )
        .await
        .unwrap();

    assert!(outcome.assistant_message.is_none());
    assert!(h.transport.seen.lock().await.is_empty());
    // The chat still counts as active.
    let reloaded = h.chats.get_chat("u1", &chat.id).await.unwrap();
    assert!(reloaded.updated_at > chat.updated_at);
}

#[tokio::test]
async fn test_missing_credential_is_actionable() {
    let h = harness(StubTransport::new(200, ok_completion()));
    // Model configuration exists, credential does not.
    h.models
        .create(
            "u1",
            NewModelConfiguration {
                provider: ProviderKey::Groq,
                model: "llama-3.3-70b".into(),
                name: "groq".into(),
                display_name: None,
                description: None,
                provider_config_id: None,
                settings: ModelSettings::default(),
                is_default: true,
            },
        )
        .await
        .unwrap();
    let chat = h.chats.create_chat("u1", "No key", None).await.unwrap();

    let err = h
        .chats
        .send_message("u1", &chat.id, MessageCreate::user("Hi"))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::ConfigurationMissing(_)));
    assert!(err.to_string().contains("groq"));
}

#[tokio::test]
async fn test_delete_chat_cascades_messages() {
    let h = harness(StubTransport::new(200, ok_completion()));
    seed_openai(&h, None).await;
    let chat = h.chats.create_chat("u1", "Temp", None).await.unwrap();
    h.chats
        .send_message("u1", &chat.id, MessageCreate::user("Hi"))
        .await
        .unwrap();

    h.chats.delete_chat("u1", &chat.id).await.unwrap();
    assert!(matches!(
        h.chats.get_chat("u1", &chat.id).await,
        Err(CoreError::NotFound { .. })
    ));
    // Messages are gone with the chat.
    assert!(matches!(
        h.chats.list_messages("u1", &chat.id).await,
        Err(CoreError::NotFound { .. })
    ));
}

#[tokio::test]
async fn test_chats_are_user_scoped() {
    let h = harness(StubTransport::new(200, ok_completion()));
    let chat = h.chats.create_chat("u1", "Mine", None).await.unwrap();

    assert!(matches!(
        h.chats.get_chat("u2", &chat.id).await,
        Err(CoreError::NotFound { .. })
    ));
    assert!(h.chats.list_chats("u2").await.unwrap().is_empty());
    assert!(matches!(
        h.chats.delete_chat("u2", &chat.id).await,
        Err(CoreError::NotFound { .. })
    ));
}
