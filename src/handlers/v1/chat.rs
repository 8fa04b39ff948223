//! Streaming chat endpoint.

use axum::Json;
use axum::extract::State;
use axum::response::sse::{KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use tracing::{info, warn};

use crate::api::ChatStreamRequest;
use crate::handlers::{internal_error, not_found};
use crate::llm::{ChatRequest, Message, Role};
use crate::persist::NewMessage;
use crate::relay::{MessageSink, RelayStream, error_stream};
use crate::server::AppState;

/// POST /chat/stream
///
/// Opens an SSE response relaying diversified fragments from the chat
/// upstream. Failures before the upstream stream exists surface as a
/// single error frame; persistence-service lookups that fail earlier
/// still get a regular problem response.
pub async fn chat_stream(
    State(state): State<AppState>,
    Json(request): Json<ChatStreamRequest>,
) -> Response {
    let character = match state.persist.get_character(request.character_id).await {
        Ok(character) => character,
        Err(e) if e.is_not_found() => {
            return not_found(format!("character {} not found", request.character_id));
        }
        Err(e) => {
            warn!(character_id = request.character_id, error = %e, "character lookup failed");
            return internal_error("failed to load character profile");
        }
    };

    let mut messages = Vec::with_capacity(request.messages.len() + 2);
    if !character.system_prompt.is_empty() {
        messages.push(Message::text(Role::System, character.system_prompt));
    }
    messages.extend(request.messages);
    messages.push(Message::text(Role::User, request.user_message.clone()));

    // A character's creativity setting overrides the request temperature.
    let temperature = character.creativity.unwrap_or(request.temperature);
    let chat_request = ChatRequest::new(
        state.chat_model.clone(),
        messages,
        Some(temperature),
        Some(request.max_tokens),
    );

    info!(
        conversation_id = request.conversation_id,
        character = %character.name,
        "starting chat stream"
    );

    let stream = match state.chat.stream(chat_request).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!(error = %e, "upstream rejected chat stream");
            return Sse::new(error_stream(e.to_string()))
                .keep_alive(KeepAlive::new().interval(state.keep_alive_interval))
                .into_response();
        }
    };

    // History is written only once the upstream accepts the request, so a
    // rejected stream leaves no trace in the conversation.
    if request.save_history {
        let user_turn = NewMessage {
            role: "user".into(),
            content: request.user_message,
            token_usage: None,
            model_version: None,
            metadata: None,
        };
        if let Err(e) = state
            .persist
            .save_message(request.conversation_id, &user_turn)
            .await
        {
            warn!(conversation_id = request.conversation_id, error = %e,
                "failed to persist user message");
        }
    }

    let mut relay = RelayStream::new(stream, state.idle_timeout);
    if request.save_history {
        relay = relay.persist_to(
            &state.background,
            state.persist.clone(),
            MessageSink {
                conversation_id: request.conversation_id,
                model_version: state.chat_model.clone(),
            },
        );
    }

    Sse::new(relay.into_sse())
        .keep_alive(KeepAlive::new().interval(state.keep_alive_interval))
        .into_response()
}
