use acelink_communication::communication::frame::{decode_frame, encode_frame};
use acelink_communication::communication::{Completion, DispatcherConfig, FrameAssembler};
use acelink_communication::{Request, RequestDispatcher, Response};
use acelink_core::RequestError;
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

fn dispatcher(queue_size: usize) -> RequestDispatcher {
    RequestDispatcher::new(DispatcherConfig {
        queue_size,
        response_timeout: Duration::from_secs(2),
    })
}

#[tokio::test]
async fn test_overflow_sheds_full_queue() {
    let mut dispatcher = dispatcher(20);
    let shed = Arc::new(Mutex::new(Vec::new()));
    let observed = Arc::new(Mutex::new(None));

    let seen = observed.clone();
    dispatcher.set_overflow_observer(move |dropped| *seen.lock() = Some(dropped));

    for _ in 0..20 {
        let shed = shed.clone();
        dispatcher.submit(
            Request::new("get_status"),
            Completion::callback(move |result| shed.lock().push(result)),
        );
    }
    assert_eq!(dispatcher.queued_count(), 20);
    assert!(shed.lock().is_empty());

    let (_, mut last) = dispatcher.submit_reply(Request::new("get_info"));

    let shed = shed.lock();
    assert_eq!(shed.len(), 20);
    assert!(shed
        .iter()
        .all(|r| matches!(r, Err(RequestError::QueueOverflow))));
    assert_eq!(*observed.lock(), Some(20));
    assert_eq!(dispatcher.queued_count(), 1);
    assert!(last.try_recv().is_err());
}

#[tokio::test]
async fn test_request_reply_through_the_wire() {
    let mut dispatcher = dispatcher(20);
    let mut assembler = FrameAssembler::new();
    let (id, mut reply) =
        dispatcher.submit_reply(Request::new("get_filament_info").with_params(json!({"index": 1})));

    let mut written = Vec::new();
    let sent = dispatcher
        .tick(Instant::now(), |frame| {
            written.extend_from_slice(frame);
            Ok::<(), std::io::Error>(())
        })
        .unwrap();
    assert_eq!(sent, Some(id));
    assert!(dispatcher.is_pending(id));

    let request: Request = serde_json::from_slice(decode_frame(&written).unwrap()).unwrap();
    assert_eq!(request.method, "get_filament_info");
    assert_eq!(request.params, Some(json!({"index": 1})));

    let body = json!({"id": id, "code": 0, "msg": "success", "result": {"sku": "AHPLBK-101"}});
    let frame = encode_frame(&serde_json::to_vec(&body).unwrap()).unwrap();
    let mut responses = Vec::new();
    for chunk in frame.chunks(16) {
        responses.extend(assembler.push(chunk).responses);
    }
    assert_eq!(responses.len(), 1);
    assert!(dispatcher.resolve(&responses[0]));

    let response: Response = reply.try_recv().unwrap().unwrap();
    assert_eq!(response.result, Some(json!({"sku": "AHPLBK-101"})));
    assert_eq!(dispatcher.pending_count(), 0);
}

#[tokio::test]
async fn test_failed_write_keeps_order() {
    let mut dispatcher = dispatcher(20);
    let first = dispatcher.submit_detached(Request::new("get_info"));
    let second = dispatcher.submit_detached(Request::new("get_status"));

    let result = dispatcher.tick(Instant::now(), |_| Err("port closed"));
    assert_eq!(result, Err("port closed"));
    assert_eq!(dispatcher.queued_count(), 2);
    assert_eq!(dispatcher.pending_count(), 0);

    let sent = dispatcher
        .tick(Instant::now(), |_| Ok::<(), &str>(()))
        .unwrap();
    assert_eq!(sent, Some(first));
    let sent = dispatcher
        .tick(Instant::now(), |_| Ok::<(), &str>(()))
        .unwrap();
    assert_eq!(sent, Some(second));
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_request_times_out() {
    let mut dispatcher = dispatcher(20);
    let (id, mut reply) = dispatcher.submit_reply(Request::new("get_status"));
    dispatcher
        .tick(Instant::now(), |_| Ok::<(), &str>(()))
        .unwrap();

    tokio::time::advance(Duration::from_secs(2)).await;
    assert_eq!(dispatcher.expire(Instant::now()), 0);

    tokio::time::advance(Duration::from_millis(1)).await;
    assert_eq!(dispatcher.expire(Instant::now()), 1);
    assert_eq!(
        reply.try_recv().unwrap(),
        Err(RequestError::ResponseTimeout {
            id,
            timeout_ms: 2000
        })
    );

    // A late reply is ignored
    let late = Response {
        id: Some(id),
        code: 0,
        msg: None,
        result: None,
    };
    assert!(!dispatcher.resolve(&late));
}
