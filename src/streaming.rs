use std::collections::VecDeque;

use actix_web::error::ErrorInternalServerError;
use bytes::Bytes;
use futures::Stream;
use futures::stream;

use crate::error::GatewayError;
use crate::invoker::SolverStream;
use crate::openai_api_types::{
    ChatChoice, ChatCompletionResponse, ChatCompletionStreamResponse, ChatMessage,
    ChatMessageDelta, ChatStreamChoice, Usage,
};
use crate::solver::{FailureKind, FinishReason, SolverEvent};

/// Per-request framing context, fixed once at dispatch time.
#[derive(Debug, Clone)]
pub struct FramerContext {
    /// Model string echoed back in every response object
    pub model: String,
    /// Project name, used for the batch response id
    pub project: String,
    /// Character count of the query, for the usage block
    pub prompt_chars: u32,
}

fn now() -> u64 {
    chrono::Utc::now().timestamp() as u64
}

fn failure_to_error(kind: FailureKind, message: String) -> GatewayError {
    match kind {
        FailureKind::Backend => GatewayError::Backend(message),
        FailureKind::Timeout => GatewayError::Timeout(message),
    }
}

/// Consume the whole event stream and assemble one complete response.
///
/// Delta content is concatenated in arrival order; a `Failure` surfaces as
/// an error with no partial body.
pub async fn collect_response(
    mut stream: SolverStream,
    ctx: &FramerContext,
) -> Result<ChatCompletionResponse, GatewayError> {
    let mut content = String::new();
    let mut finish = FinishReason::Stop;
    while let Some(event) = stream.next_event().await {
        match event {
            SolverEvent::TokenDelta(text) => content.push_str(&text),
            SolverEvent::ToolEvent(_) => {}
            SolverEvent::Failure(cause) => {
                return Err(failure_to_error(cause.kind, cause.message));
            }
            SolverEvent::Done(reason) => finish = reason,
        }
    }
    let completion_chars = content.chars().count() as u32;
    Ok(ChatCompletionResponse {
        id: format!("chatcmpl-{}", ctx.project),
        object: "chat.completion".to_string(),
        created: now(),
        model: ctx.model.clone(),
        choices: vec![ChatChoice {
            index: 0,
            message: ChatMessage::assistant(content),
            finish_reason: Some(finish.as_str().to_string()),
        }],
        usage: Some(Usage {
            prompt_tokens: ctx.prompt_chars,
            completion_tokens: completion_chars,
            total_tokens: ctx.prompt_chars + completion_chars,
        }),
    })
}

struct SseState {
    stream: SolverStream,
    ctx: FramerContext,
    seq: u64,
    queue: VecDeque<Bytes>,
    started: bool,
    terminated: bool,
}

impl SseState {
    fn push_chunk(
        &mut self,
        delta: ChatMessageDelta,
        finish_reason: Option<&str>,
    ) -> Result<(), serde_json::Error> {
        let chunk = ChatCompletionStreamResponse {
            id: format!("chatcmpl-{}", self.seq),
            object: "chat.completion.chunk".to_string(),
            created: now(),
            model: self.ctx.model.clone(),
            choices: vec![ChatStreamChoice {
                index: 0,
                delta,
                finish_reason: finish_reason.map(str::to_string),
            }],
        };
        self.seq += 1;
        let json = serde_json::to_string(&chunk)?;
        self.queue.push_back(Bytes::from(format!("data: {json}\n\n")));
        Ok(())
    }
}

/// Render the event stream as server-sent events.
///
/// Frame order: one role chunk, one chunk per delta (carrying only the
/// increment), a finish chunk, then the literal `data: [DONE]` sentinel.
/// A `Failure` collapses into a single error-shaped terminal chunk and the
/// sentinel is withheld, since the HTTP status is already committed.
pub fn sse_stream(
    solver_stream: SolverStream,
    ctx: FramerContext,
) -> impl Stream<Item = Result<Bytes, actix_web::Error>> {
    let state = SseState {
        stream: solver_stream,
        ctx,
        seq: 0,
        queue: VecDeque::new(),
        started: false,
        terminated: false,
    };

    stream::unfold(state, |mut s| async move {
        loop {
            if let Some(frame) = s.queue.pop_front() {
                return Some((Ok(frame), s));
            }
            if s.terminated {
                return None;
            }

            let pushed = if !s.started {
                s.started = true;
                s.push_chunk(
                    ChatMessageDelta {
                        role: Some("assistant".to_string()),
                        content: None,
                    },
                    None,
                )
            } else {
                match s.stream.next_event().await {
                    Some(SolverEvent::TokenDelta(text)) => s.push_chunk(
                        ChatMessageDelta {
                            role: None,
                            content: Some(text),
                        },
                        None,
                    ),
                    Some(SolverEvent::ToolEvent(_)) => {
                        // opaque backend events keep their slot in the
                        // chunk sequence but carry no delta content
                        s.push_chunk(ChatMessageDelta::default(), None)
                    }
                    Some(SolverEvent::Failure(cause)) => {
                        s.terminated = true;
                        s.push_chunk(
                            ChatMessageDelta {
                                role: None,
                                content: Some(format!("Error: {}", cause.message)),
                            },
                            Some("error"),
                        )
                    }
                    Some(SolverEvent::Done(reason)) => {
                        s.terminated = true;
                        let pushed = s.push_chunk(ChatMessageDelta::default(), Some(reason.as_str()));
                        if pushed.is_ok() {
                            s.queue.push_back(Bytes::from_static(b"data: [DONE]\n\n"));
                        }
                        pushed
                    }
                    None => {
                        // producer vanished without a terminal event; the
                        // client is gone or the execution was torn down
                        s.terminated = true;
                        Ok(())
                    }
                }
            };

            if let Err(e) = pushed {
                s.terminated = true;
                return Some((Err(ErrorInternalServerError(e)), s));
            }
        }
    })
}
