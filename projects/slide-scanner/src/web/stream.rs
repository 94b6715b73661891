// Push transport for scan events: Server-Sent Events or newline-delimited JSON.

use crate::browser::BrowserLauncher;
use crate::error::ScanError;
use crate::pipeline::orchestrator::ScanOrchestrator;
use crate::pipeline::types::{ScanEvent, ScanMode, ScanRequest};
use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, HeaderValue},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
};
use futures::StreamExt;
use serde::Deserialize;
use std::convert::Infallible;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

pub const SCAN_ID_HEADER: &str = "x-scan-id";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamFormat {
    #[default]
    Sse,
    Ndjson,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanQuery {
    #[serde(alias = "videoUrl")]
    pub url: String,
    #[serde(default)]
    pub range_start: f64,
    #[serde(default)]
    pub range_end: f64,
    #[serde(default)]
    pub mode: ScanMode,
    pub workers: Option<usize>,
    #[serde(default)]
    pub format: StreamFormat,
}

impl From<ScanQuery> for ScanRequest {
    fn from(query: ScanQuery) -> Self {
        Self {
            url: query.url,
            range_start: query.range_start,
            range_end: query.range_end,
            mode: query.mode,
            workers: query.workers,
        }
    }
}

/// Starts a scan and streams its events. Invalid requests are rejected with
/// 400 before any browser is launched.
pub async fn scan<L: BrowserLauncher>(
    State(orchestrator): State<ScanOrchestrator<L>>,
    Query(query): Query<ScanQuery>,
) -> Result<Response, ScanError> {
    let format = query.format;
    let (state, rx) = orchestrator.start(query.into())?;
    tracing::info!("Streaming scan {} as {:?}", state.scan_id, format);

    let mut response = match format {
        StreamFormat::Sse => sse_response(rx).into_response(),
        StreamFormat::Ndjson => ndjson_response(rx),
    };
    if let Ok(value) = HeaderValue::from_str(&state.scan_id) {
        response.headers_mut().insert(SCAN_ID_HEADER, value);
    }
    Ok(response)
}

fn sse_response(
    mut rx: mpsc::Receiver<ScanEvent>,
) -> Sse<impl futures::Stream<Item = Result<Event, Infallible>>> {
    let stream = async_stream::stream! {
        while let Some(event) = rx.recv().await {
            match Event::default().json_data(&event) {
                Ok(sse_event) => yield Ok(sse_event),
                Err(e) => tracing::warn!("Dropping unserializable event: {}", e),
            }
        }
    };
    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn ndjson_response(rx: mpsc::Receiver<ScanEvent>) -> Response {
    let lines = ReceiverStream::new(rx).map(|event| {
        serde_json::to_vec(&event).map(|mut line| {
            line.push(b'\n');
            line
        })
    });
    (
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        Body::from_stream(lines),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::fake::{FakeFrame, FakeLauncher, FakeScript};
    use crate::pipeline::types::ScanSettings;
    use axum::http::StatusCode;
    use serde_json::Value;
    use std::sync::Arc;
    use std::time::Duration;

    fn orchestrator() -> ScanOrchestrator<FakeLauncher> {
        let script = FakeScript::new(10.0, |t| FakeFrame::Slide(1 + 2 * (t / 4.0) as u8));
        let settings = ScanSettings {
            settle_delay: Duration::ZERO,
            unacked_settle_delay: Duration::ZERO,
            spinner_timeout: Duration::ZERO,
            ..ScanSettings::default()
        };
        ScanOrchestrator::new(FakeLauncher::new(script), Arc::new(settings))
    }

    fn query(url: &str, format: StreamFormat) -> ScanQuery {
        ScanQuery {
            url: url.to_string(),
            range_start: 0.0,
            range_end: 0.0,
            mode: ScanMode::Seek,
            workers: None,
            format,
        }
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_ndjson_stream() {
        let response = scan(
            State(orchestrator()),
            Query(query("https://v.example/a", StreamFormat::Ndjson)),
        )
        .await
        .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let scan_id = response.headers()[SCAN_ID_HEADER]
            .to_str()
            .unwrap()
            .to_string();

        let events: Vec<Value> = body_text(response)
            .await
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(events[0]["type"], "meta");
        assert_eq!(events[0]["scanId"], scan_id.as_str());
        let images = events.iter().filter(|e| e["type"] == "image").count();
        assert_eq!(images, 3);
        assert_eq!(
            events.last().unwrap(),
            &serde_json::json!({ "type": "done", "totalSlides": 3 })
        );
        assert!(events
            .iter()
            .filter(|e| e["type"] == "image")
            .all(|e| e["imageUrl"]
                .as_str()
                .unwrap()
                .starts_with("data:image/jpeg;base64,")));
    }

    #[tokio::test]
    async fn test_sse_stream() {
        let response = scan(
            State(orchestrator()),
            Query(query("https://v.example/b", StreamFormat::Sse)),
        )
        .await
        .unwrap();
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/event-stream"
        );
        let text = body_text(response).await;
        let data: Vec<&str> = text
            .lines()
            .filter_map(|line| line.strip_prefix("data:").map(str::trim_start))
            .collect();
        assert!(data[0].contains(r#""type":"meta""#));
        assert!(data.last().unwrap().contains(r#""type":"done""#));
    }

    #[tokio::test]
    async fn test_invalid_input_is_rejected() {
        let result = scan(
            State(orchestrator()),
            Query(query("javascript:alert(1)", StreamFormat::Sse)),
        )
        .await;
        let Err(err) = result else {
            panic!("invalid URL was accepted");
        };
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_query_parsing() {
        let parsed: ScanQuery =
            serde_json::from_str(r#"{"url": "https://v", "mode": "live", "format": "ndjson"}"#)
                .unwrap();
        assert_eq!(parsed.mode, ScanMode::Live);
        assert_eq!(parsed.format, StreamFormat::Ndjson);
        let request: ScanRequest = parsed.into();
        assert_eq!(request.range_end, 0.0);
    }
}
