use std::{pin::Pin, time::Duration};

use async_stream::stream;
use axum::{
    extract::State,
    http::HeaderMap,
    response::{
        sse::{Event, KeepAlive, KeepAliveStream},
        Sse,
    },
    Json,
};
use futures::Stream;
use tracing::error;

use crate::api_state::ApiState;

use super::query::{options_from_request, QueryRequest};

type EventStream = Pin<Box<dyn Stream<Item = Result<Event, axum::Error>> + Send>>;
type SseResponse = Sse<KeepAliveStream<EventStream>>;

/// Streamed variant of `/api/query`: one `stage` event per completed
/// pipeline stage, then a terminal `result` event with the full response.
pub async fn query_stream(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(request): Json<QueryRequest>,
) -> SseResponse {
    let options = options_from_request(request.options, &headers);
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

    let core = state.core;
    let handle = tokio::spawn(async move {
        core.process_with_events(&request.patient_id, &request.query_text, options, Some(tx))
            .await
    });

    let events: EventStream = Box::pin(stream! {
        while let Some(stage_event) = rx.recv().await {
            match Event::default().event("stage").json_data(&stage_event) {
                Ok(event) => yield Ok(event),
                Err(err) => {
                    error!(error = %err, "failed to serialize stage event");
                }
            }
        }

        match handle.await {
            Ok(response) => match Event::default().event("result").json_data(&response) {
                Ok(event) => yield Ok(event),
                Err(err) => yield Err(axum::Error::new(err)),
            },
            Err(err) => {
                error!(error = %err, "query task panicked");
                yield Ok(Event::default().event("error").data("query failed"));
            }
        }
    });

    Sse::new(events).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}
