//! Streaming chat orchestrator (C13): as the single-shot orchestrator, but
//! assembling server-sent events with cancellation and mid-stream fallback
//! rules instead of a single JSON body.

use std::sync::Arc;

use async_stream::stream;
use axum::{
    extract::{Extension, State},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use chrono::Utc;
use futures_util::StreamExt;
use gateway_core::models::{RequestRecord, RequestStatus, UsageEvent};
use gateway_core::provider::estimate_tokens;
use gateway_core::routing::{self, PRIMARY_PROVIDER};
use gateway_core::schemas::{ChatUsage, StreamChunk, StreamErrorEvent};
use gateway_core::GatewayError;

use crate::auth::ResolvedTenant;
use crate::config::ProviderMode;
use crate::error_response::ApiError;
use crate::metrics::{COST_TOTAL, FALLBACK_TOTAL, TENANT_COST_TOTAL, TENANT_REQUESTS_TOTAL, TENANT_TOKENS_TOTAL, TOKENS_TOTAL};
use crate::state::AppState;

/// Marks the request row `canceled` if the stream is dropped (client
/// disconnect) before a terminal status was recorded. Disarmed once the
/// orchestrator itself reaches a terminal outcome.
struct CancelGuard {
    state: Arc<AppState>,
    record: Option<RequestRecord>,
}

impl CancelGuard {
    fn disarm(&mut self) {
        self.record = None;
    }
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        if let Some(mut record) = self.record.take() {
            record.status = RequestStatus::Canceled;
            record.completed_at = Some(Utc::now());
            let state = self.state.clone();
            tokio::spawn(async move {
                let _ = state.store.finalize_request(&record).await;
            });
        }
    }
}

pub async fn chat_stream_handler(
    State(state): State<Arc<AppState>>,
    Extension(resolved): Extension<ResolvedTenant>,
    Json(mut request): Json<gateway_core::schemas::ChatRequest>,
) -> Result<Response, ApiError> {
    request.validate()?;
    request.stream = true;

    let tenant = resolved.tenant;
    let decision = routing::choose(tenant.tier, &state.health, state.config.health_error_threshold);

    let model_name = if decision.provider == PRIMARY_PROVIDER && state.config.provider_mode == ProviderMode::Ollama {
        state.config.ollama_model.clone()
    } else {
        decision.model.clone()
    };

    let prompt_text: String = request.messages.iter().map(|m| m.content.as_str()).collect();

    let record = RequestRecord::new(
        tenant.id,
        model_name.clone(),
        serde_json::to_string(&request).unwrap_or_default(),
    );
    state.store.insert_request(&record).await?;

    let response_id = record.id.to_string();
    let created = record.created_at.timestamp();
    let tenant_name = tenant.name.clone();

    let events = stream! {
        let mut guard = CancelGuard { state: state.clone(), record: Some(record.clone()) };
        let started = std::time::Instant::now();

        let first_attempt = state.provider(&decision.provider);
        let Some(first_provider) = first_attempt else {
            guard.disarm();
            fail_request(&state, record.clone()).await;
            yield error_event("Stream failed");
            yield done_event();
            return;
        };

        if decision.reason == "primary_unhealthy" {
            FALLBACK_TOTAL
                .with_label_values(&["primary_unhealthy", PRIMARY_PROVIDER, &decision.provider])
                .inc();
        }

        let mut effective_request = request.clone();
        effective_request.model = model_name.clone();

        let mut active_provider_name = decision.provider.clone();
        let mut upstream = match first_provider.stream(&effective_request).await {
            Ok(s) => Some(s),
            Err(_) => None,
        };

        // Fall back before any content has left the wrapper, per the
        // mid-stream failure rule.
        if upstream.is_none() {
            state.health.record(&decision.provider, false);
            if let Some(fallback_name) = decision.fallback_provider.clone() {
                if decision.reason != "primary_unhealthy" {
                    FALLBACK_TOTAL
                        .with_label_values(&["primary_error", &decision.provider, &fallback_name])
                        .inc();
                }
                if let Some(fallback) = state.provider(&fallback_name) {
                    let mut fallback_request = request.clone();
                    fallback_request.model = decision.model.clone();
                    if let Ok(s) = fallback.stream(&fallback_request).await {
                        active_provider_name = fallback_name;
                        upstream = Some(s);
                    }
                }
            }
        }

        let Some(mut upstream) = upstream else {
            guard.disarm();
            fail_request(&state, record.clone()).await;
            yield error_event("Stream failed");
            yield done_event();
            return;
        };

        let mut yielded_any = false;
        let mut completion_text = String::new();
        let mut reported_prompt_tokens: Option<i64> = None;
        let mut reported_completion_tokens: Option<i64> = None;
        let mut saw_done = false;

        loop {
            let next = upstream.next().await;
            let Some(item) = next else { break };

            match item {
                Ok(chunk) => {
                    if chunk.done {
                        reported_prompt_tokens = chunk.prompt_tokens;
                        reported_completion_tokens = chunk.completion_tokens;
                        saw_done = true;
                        break;
                    }
                    if !chunk.content.is_empty() {
                        yielded_any = true;
                        completion_text.push_str(&chunk.content);
                        yield content_event(&response_id, &model_name, created, &chunk.content);
                    }
                }
                Err(_) => {
                    if yielded_any {
                        state.health.record(&active_provider_name, false);
                        guard.disarm();
                        fail_request(&state, record.clone()).await;
                        yield error_event("Stream failed");
                        yield done_event();
                        return;
                    }

                    // No content yet: same fallback rule applies to a
                    // mid-iteration failure as to an up-front one, but only
                    // once — the fallback provider itself is not retried.
                    state.health.record(&active_provider_name, false);
                    let already_on_fallback = decision
                        .fallback_provider
                        .as_deref()
                        .map(|f| f == active_provider_name)
                        .unwrap_or(true);

                    if already_on_fallback {
                        guard.disarm();
                        fail_request(&state, record.clone()).await;
                        yield error_event("Stream failed");
                        yield done_event();
                        return;
                    }

                    let fallback_name = decision.fallback_provider.clone().unwrap();
                    FALLBACK_TOTAL
                        .with_label_values(&["primary_error", &active_provider_name, &fallback_name])
                        .inc();

                    let Some(fallback) = state.provider(&fallback_name) else {
                        guard.disarm();
                        fail_request(&state, record.clone()).await;
                        yield error_event("Stream failed");
                        yield done_event();
                        return;
                    };

                    let mut fallback_request = request.clone();
                    fallback_request.model = decision.model.clone();
                    match fallback.stream(&fallback_request).await {
                        Ok(s) => {
                            active_provider_name = fallback_name;
                            upstream = s;
                        }
                        Err(_) => {
                            guard.disarm();
                            fail_request(&state, record.clone()).await;
                            yield error_event("Stream failed");
                            yield done_event();
                            return;
                        }
                    }
                }
            }
        }

        state.health.record(&active_provider_name, true);

        let total_text = format!("{prompt_text}{completion_text}");
        let (prompt_tokens, completion_tokens) = match (reported_prompt_tokens, reported_completion_tokens) {
            (Some(p), Some(c)) => (p, c),
            _ => {
                let total = estimate_tokens(&total_text);
                (total, total)
            }
        };
        let total_tokens = prompt_tokens + completion_tokens;

        let pricing = state.pricing.read().clone();
        let cost = gateway_core::pricing::cost_usd(&pricing, &model_name, prompt_tokens, completion_tokens, 0);

        let mut finalized = record.clone();
        finalized.status = RequestStatus::Completed;
        finalized.response_payload = Some(completion_text.clone());
        finalized.latency_ms = Some(started.elapsed().as_millis() as i64);
        finalized.prompt_tokens = Some(prompt_tokens);
        finalized.completion_tokens = Some(completion_tokens);
        finalized.total_tokens = Some(total_tokens);
        finalized.cost_usd = Some(cost);
        finalized.completed_at = Some(Utc::now());
        guard.disarm();
        let _ = state.store.finalize_request(&finalized).await;

        let usage_event = UsageEvent::new(tenant.id, record.id, &model_name, total_tokens, cost);
        let _ = state.store.insert_usage_event(&usage_event).await;

        TOKENS_TOTAL.with_label_values(&[&model_name]).inc_by(total_tokens as f64);
        COST_TOTAL.with_label_values(&[&model_name]).inc_by(cost);
        TENANT_REQUESTS_TOTAL.with_label_values(&[&tenant_name]).inc();
        TENANT_TOKENS_TOTAL.with_label_values(&[&tenant_name]).inc_by(total_tokens as f64);
        TENANT_COST_TOTAL.with_label_values(&[&tenant_name]).inc_by(cost);

        let _ = saw_done;
        yield terminal_event(
            &response_id,
            &model_name,
            created,
            prompt_tokens,
            completion_tokens,
            total_tokens,
            &active_provider_name,
        );
        yield done_event();
    };

    let mut response = Sse::new(events).keep_alive(KeepAlive::default()).into_response();
    let headers = response.headers_mut();
    headers.insert("cache-control", "no-cache".parse().unwrap());
    headers.insert("x-accel-buffering", "no".parse().unwrap());
    headers.insert("x-cache", "bypass".parse().unwrap());
    Ok(response)
}

async fn fail_request(state: &AppState, mut record: RequestRecord) {
    record.status = RequestStatus::Failed;
    record.completed_at = Some(Utc::now());
    let _ = state.store.finalize_request(&record).await;
}

fn content_event(id: &str, model: &str, created: i64, content: &str) -> Result<Event, std::convert::Infallible> {
    let chunk = StreamChunk {
        id: id.to_string(),
        model: model.to_string(),
        created,
        content: content.to_string(),
        done: false,
        usage: None,
        provider: None,
    };
    Ok(Event::default().data(serde_json::to_string(&chunk).unwrap_or_default()))
}

#[allow(clippy::too_many_arguments)]
fn terminal_event(
    id: &str,
    model: &str,
    created: i64,
    prompt_tokens: i64,
    completion_tokens: i64,
    total_tokens: i64,
    provider: &str,
) -> Result<Event, std::convert::Infallible> {
    let chunk = StreamChunk {
        id: id.to_string(),
        model: model.to_string(),
        created,
        content: String::new(),
        done: true,
        usage: Some(ChatUsage {
            prompt_tokens,
            completion_tokens,
            total_tokens,
        }),
        provider: Some(provider.to_string()),
    };
    Ok(Event::default().data(serde_json::to_string(&chunk).unwrap_or_default()))
}

fn error_event(message: &str) -> Result<Event, std::convert::Infallible> {
    let body = StreamErrorEvent {
        error: gateway_core::schemas::ErrorBody {
            code: GatewayError::StreamError.code().to_string(),
            message: message.to_string(),
        },
    };
    Ok(Event::default().data(serde_json::to_string(&body).unwrap_or_default()))
}

fn done_event() -> Result<Event, std::convert::Infallible> {
    Ok(Event::default().data("[DONE]"))
}
