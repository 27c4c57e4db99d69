use super::*;
use chatbridge_models::{ResultPayload, StatusPayload};

#[derive(Default)]
struct RecordingHandlers {
    events: Vec<StreamEvent>,
}

impl StreamHandlers for RecordingHandlers {
    fn on_delta(&mut self, delta: &str) {
        self.events.push(StreamEvent::Delta(delta.to_string()));
    }

    fn on_status(&mut self, payload: StatusPayload) {
        self.events.push(StreamEvent::Status(payload));
    }

    fn on_result(&mut self, payload: ResultPayload) {
        self.events.push(StreamEvent::Result(payload));
    }

    fn on_done(&mut self) {
        self.events.push(StreamEvent::Done);
    }

    fn on_error(&mut self, error: StreamError) {
        self.events.push(StreamEvent::Error(error));
    }
}

async fn get(url: &str) -> reqwest::Response {
    reqwest::Client::new()
        .get(url)
        .send()
        .await
        .expect("request failed")
}

#[tokio::test]
async fn test_run_stream_dispatches_in_order() {
    let body = "event: status\ndata: {\"state\":\"thinking_start\"}\n\n\
                data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\n\
                event: result\ndata: {\"content\":\"Hi\"}\n\n\
                data: [DONE]\n\n";

    let mut server = mockito::Server::new_async().await;
    let handler = server
        .mock("GET", "/stream")
        .with_status(200)
        .with_body(body)
        .create_async()
        .await;

    let mut handlers = RecordingHandlers::default();
    let response = get(&format!("{}/stream", server.url())).await;
    run_stream(response, &mut handlers, CancellationToken::new()).await;
    handler.assert_async().await;

    assert_eq!(
        handlers.events,
        vec![
            StreamEvent::Status(StatusPayload {
                state: "thinking_start".to_string(),
                message: None,
            }),
            StreamEvent::Delta("Hi".to_string()),
            StreamEvent::Result(ResultPayload {
                content: Some("Hi".to_string()),
            }),
            StreamEvent::Done,
        ]
    );
}

#[tokio::test]
async fn test_run_stream_synthesizes_done_on_eof() {
    let body = "data: {\"choices\":[{\"delta\":{\"content\":\"partial\"}}]}\n\n";

    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/stream")
        .with_status(200)
        .with_body(body)
        .create_async()
        .await;

    let mut handlers = RecordingHandlers::default();
    let response = get(&format!("{}/stream", server.url())).await;
    run_stream(response, &mut handlers, CancellationToken::new()).await;

    assert_eq!(
        handlers.events,
        vec![
            StreamEvent::Delta("partial".to_string()),
            StreamEvent::Done,
        ]
    );
}

#[tokio::test]
async fn test_cancelled_stream_dispatches_nothing() {
    let body = "data: {\"choices\":[{\"delta\":{\"content\":\"ignored\"}}]}\n\n\
                data: [DONE]\n\n";

    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/stream")
        .with_status(200)
        .with_body(body)
        .create_async()
        .await;

    let cancel = CancellationToken::new();
    cancel.cancel();

    let mut handlers = RecordingHandlers::default();
    let response = get(&format!("{}/stream", server.url())).await;
    run_stream(response, &mut handlers, cancel).await;

    assert!(handlers.events.is_empty());
}

#[tokio::test]
async fn test_stream_stops_after_terminal_event() {
    // Events after [DONE] in the same body must never reach the handlers.
    let body = "data: [DONE]\n\n\
                data: {\"choices\":[{\"delta\":{\"content\":\"late\"}}]}\n\n";

    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/stream")
        .with_status(200)
        .with_body(body)
        .create_async()
        .await;

    let mut handlers = RecordingHandlers::default();
    let response = get(&format!("{}/stream", server.url())).await;
    run_stream(response, &mut handlers, CancellationToken::new()).await;

    assert_eq!(handlers.events, vec![StreamEvent::Done]);
}
