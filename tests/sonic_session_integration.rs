//! Session integration tests over the in-memory transport.
//!
//! The peer side of the memory transport plays the model: it observes every
//! wire event the session sends and injects server events.

use async_trait::async_trait;
use base64::Engine;
use base64::prelude::BASE64_STANDARD;
use bytes::Bytes;
use chrono::Local;
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;

use sonic_bridge::core::realtime::transport::memory::{MemoryConnector, MemoryPeer, memory_transport};
use sonic_bridge::core::realtime::{
    LifecycleState, PipeError, PlaybackSink, SessionConfig, SessionError, SessionOutput,
    SpeakerRole, StreamSession,
};
use sonic_bridge::core::stream_wav_file;
use sonic_bridge::core::tools::{
    ToolCallResult, ToolDispatcher, ToolError, ToolHandler, ToolSpec, track_order_on,
};

const WAIT: Duration = Duration::from_secs(2);

// =============================================================================
// Helpers
// =============================================================================

fn test_config() -> SessionConfig {
    SessionConfig {
        event_pacing: Duration::ZERO,
        playback_poll: Duration::from_millis(10),
        ..Default::default()
    }
}

fn new_session() -> (Arc<StreamSession>, MemoryPeer, UnboundedReceiver<SessionOutput>) {
    let (connector, peer) = memory_transport();
    let session = Arc::new(StreamSession::new(test_config(), Arc::new(connector)));
    let output = session.take_output_receiver().unwrap();
    (session, peer, output)
}

fn parse(text: &str) -> Value {
    serde_json::from_str(text).unwrap()
}

/// Name of the single key under `event`.
fn kind(text: &str) -> String {
    parse(text)["event"]
        .as_object()
        .and_then(|body| body.keys().next().cloned())
        .unwrap()
}

fn body(text: &str) -> Value {
    let value = parse(text);
    let kind = kind(text);
    value["event"][kind.as_str()].clone()
}

async fn next_sent(peer: &mut MemoryPeer) -> String {
    peer.next_sent(WAIT).await.expect("session sent nothing")
}

async fn next_output(output: &mut UnboundedReceiver<SessionOutput>) -> SessionOutput {
    tokio::time::timeout(WAIT, output.recv())
        .await
        .expect("timed out waiting for output")
        .expect("output channel closed")
}

/// Skip outputs until one matches.
async fn output_matching<F>(output: &mut UnboundedReceiver<SessionOutput>, f: F) -> SessionOutput
where
    F: Fn(&SessionOutput) -> bool,
{
    loop {
        let next = next_output(output).await;
        if f(&next) {
            return next;
        }
    }
}

async fn wait_until<F: Fn() -> bool>(f: F) {
    tokio::time::timeout(WAIT, async {
        while !f() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached");
}

fn inbound(event: Value) -> String {
    json!({ "event": event }).to_string()
}

#[derive(Clone, Default)]
struct RecordingSink {
    played: Arc<Mutex<Vec<Bytes>>>,
}

#[async_trait]
impl PlaybackSink for RecordingSink {
    async fn play(&mut self, chunk: Bytes) -> Result<(), PipeError> {
        self.played.lock().push(chunk);
        Ok(())
    }
}

// =============================================================================
// Lifecycle
// =============================================================================

#[tokio::test]
async fn test_initialize_sends_bootstrap_in_order() {
    let (session, mut peer, _output) = new_session();
    session.initialize().await.unwrap();
    assert_eq!(session.state(), LifecycleState::Active);
    assert_eq!(peer.open_count(), 1);

    let sent = peer.drain_sent();
    let kinds: Vec<String> = sent.iter().map(|s| kind(s)).collect();
    assert_eq!(
        kinds,
        vec!["sessionStart", "promptStart", "contentStart", "textInput", "contentEnd"]
    );

    assert_eq!(body(&sent[0])["inferenceConfiguration"]["maxTokens"], 1024);
    assert_eq!(body(&sent[1])["promptName"], session.prompt_name());
    assert_eq!(body(&sent[1])["audioOutputConfiguration"]["voiceId"], "matthew");

    let text_start = body(&sent[2]);
    assert_eq!(text_start["role"], "SYSTEM");
    assert_eq!(text_start["contentName"], session.content_name());

    let text_input = body(&sent[3]);
    assert_eq!(text_input["content"], session.config().system_prompt.as_str());
    assert_eq!(body(&sent[4])["contentName"], session.content_name());

    session.close().await.unwrap();
}

#[tokio::test]
async fn test_single_chunk_end_to_end() {
    let (session, mut peer, _output) = new_session();
    session.initialize().await.unwrap();
    session.start_audio_content().await.unwrap();
    session
        .enqueue_audio_chunk(Bytes::from_static(&[1, 2, 3, 4]))
        .unwrap();
    session.close().await.unwrap();

    let sent = peer.drain_sent();
    let audio: Vec<&String> = sent.iter().filter(|s| kind(s) == "audioInput").collect();
    assert_eq!(audio.len(), 1);
    let audio = body(audio[0]);
    assert_eq!(audio["contentName"], session.audio_content_name());
    assert_eq!(audio["promptName"], session.prompt_name());
    assert_eq!(audio["content"], BASE64_STANDARD.encode([1u8, 2, 3, 4]));

    let tail: Vec<String> = sent[sent.len() - 3..].iter().map(|s| kind(s)).collect();
    assert_eq!(tail, vec!["contentEnd", "promptEnd", "sessionEnd"]);
    assert_eq!(
        body(&sent[sent.len() - 3])["contentName"],
        session.audio_content_name()
    );

    assert_eq!(session.state(), LifecycleState::Closed);
    assert_eq!(peer.close_count(), 1);

    // A second close is a no-op
    session.close().await.unwrap();
    assert_eq!(peer.close_count(), 1);
    assert!(peer.drain_sent().is_empty());
}

#[tokio::test]
async fn test_audio_segment_start_precedes_audio_input() {
    let (session, mut peer, _output) = new_session();
    session.initialize().await.unwrap();
    peer.drain_sent();

    session.start_audio_content().await.unwrap();
    let start = next_sent(&mut peer).await;
    assert_eq!(kind(&start), "contentStart");
    let start = body(&start);
    assert_eq!(start["type"], "AUDIO");
    assert_eq!(start["role"], "USER");
    assert_eq!(start["contentName"], session.audio_content_name());
    assert_eq!(start["audioInputConfiguration"]["sampleRateHertz"], 16000);

    session
        .enqueue_audio_chunk(Bytes::from_static(&[0, 0]))
        .unwrap();
    assert_eq!(kind(&next_sent(&mut peer).await), "audioInput");

    session.close().await.unwrap();
}

#[tokio::test]
async fn test_end_audio_content_then_close_skips_audio_content_end() {
    let (session, mut peer, _output) = new_session();
    session.initialize().await.unwrap();
    session.start_audio_content().await.unwrap();
    session.end_audio_content().await.unwrap();
    peer.drain_sent();

    assert!(matches!(
        session.enqueue_audio_chunk(Bytes::from_static(&[0, 0])),
        Err(SessionError::Precondition(_))
    ));

    session.close().await.unwrap();
    let kinds: Vec<String> = peer.drain_sent().iter().map(|s| kind(s)).collect();
    assert_eq!(kinds, vec!["promptEnd", "sessionEnd"]);
}

#[tokio::test]
async fn test_explicit_termination_is_not_repeated_by_close() {
    let (session, mut peer, _output) = new_session();
    session.initialize().await.unwrap();
    session.start_audio_content().await.unwrap();
    peer.drain_sent();

    session.end_audio_content().await.unwrap();
    session.end_prompt().await.unwrap();
    session.end_session().await.unwrap();
    session.end_prompt().await.unwrap();
    session.close().await.unwrap();

    let kinds: Vec<String> = peer.drain_sent().iter().map(|s| kind(s)).collect();
    assert_eq!(kinds, vec!["contentEnd", "promptEnd", "sessionEnd"]);
    assert_eq!(peer.close_count(), 1);
}

#[tokio::test]
async fn test_close_sends_session_end_after_explicit_prompt_end() {
    let (session, mut peer, _output) = new_session();
    session.initialize().await.unwrap();
    peer.drain_sent();

    session.end_prompt().await.unwrap();
    session.close().await.unwrap();

    let kinds: Vec<String> = peer.drain_sent().iter().map(|s| kind(s)).collect();
    assert_eq!(kinds, vec!["promptEnd", "sessionEnd"]);
}

#[tokio::test]
async fn test_enqueue_is_rejected_outside_open_segment() {
    let (session, _peer, _output) = new_session();
    assert!(matches!(
        session.enqueue_audio_chunk(Bytes::from_static(&[0, 0])),
        Err(SessionError::NotActive(LifecycleState::Uninitialized))
    ));

    session.initialize().await.unwrap();
    assert!(matches!(
        session.enqueue_audio_chunk(Bytes::from_static(&[0, 0])),
        Err(SessionError::Precondition(_))
    ));

    session.close().await.unwrap();
    assert!(matches!(
        session.enqueue_audio_chunk(Bytes::from_static(&[0, 0])),
        Err(SessionError::NotActive(LifecycleState::Closed))
    ));
}

#[tokio::test]
async fn test_initialize_failure_leaves_session_uninitialized() {
    let session = StreamSession::new(
        test_config(),
        Arc::new(MemoryConnector::failing("connection refused")),
    );

    match session.initialize().await {
        Err(SessionError::Initialization(reason)) => {
            assert!(reason.contains("connection refused"));
        }
        other => panic!("Expected Initialization error, got {:?}", other),
    }
    assert_eq!(session.state(), LifecycleState::Uninitialized);
    assert!(!session.is_active());
}

#[tokio::test]
async fn test_close_reports_receiver_stop() {
    let (session, _peer, mut output) = new_session();
    session.initialize().await.unwrap();
    session.close().await.unwrap();

    match output_matching(&mut output, |o| matches!(o, SessionOutput::Stopped { .. })).await {
        SessionOutput::Stopped { reason } => assert_eq!(reason, "session closed"),
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn test_wav_capture_streams_paced_chunks() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("mic.wav");
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 16000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&path, spec).unwrap();
    for i in 0..3200i16 {
        writer.write_sample(i).unwrap();
    }
    writer.finalize().unwrap();

    let (session, mut peer, _output) = new_session();
    session.initialize().await.unwrap();
    session.start_audio_content().await.unwrap();

    let sent = stream_wav_file(&session, &path, 1024, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(sent, 4);

    session.close().await.unwrap();
    let audio: Vec<Value> = peer
        .drain_sent()
        .iter()
        .filter(|s| kind(s) == "audioInput")
        .map(|s| body(s))
        .collect();
    assert_eq!(audio.len(), 4);

    let last = BASE64_STANDARD
        .decode(audio[3]["content"].as_str().unwrap())
        .unwrap();
    // 3200 frames in 1024-frame chunks leaves 128 frames
    assert_eq!(last.len(), 256);
    assert_eq!(i16::from_le_bytes([last[0], last[1]]), 3072);
}

// =============================================================================
// Response handling
// =============================================================================

#[tokio::test]
async fn test_transcripts_follow_roles_and_speculative_stage() {
    let (session, peer, mut output) = new_session();
    session.initialize().await.unwrap();

    peer.push_inbound(inbound(json!({"contentStart": {"role": "USER", "type": "TEXT"}})));
    peer.push_inbound(inbound(json!({"textOutput": {"content": "what time is it"}})));

    peer.push_inbound(inbound(json!({"contentStart": {
        "role": "ASSISTANT",
        "type": "TEXT",
        "additionalModelFields": "{\"generationStage\":\"SPECULATIVE\"}"
    }})));
    peer.push_inbound(inbound(json!({"textOutput": {"content": "It is noon."}})));

    peer.push_inbound(inbound(json!({"contentStart": {
        "role": "ASSISTANT",
        "type": "TEXT",
        "additionalModelFields": "{\"generationStage\":\"FINAL\"}"
    }})));
    peer.push_inbound(inbound(json!({"textOutput": {"content": "It is noon."}})));
    peer.push_inbound(inbound(json!({"usageEvent": {"totalTokens": 12}})));

    let mut transcripts = Vec::new();
    loop {
        match next_output(&mut output).await {
            SessionOutput::Transcript { role, text } => transcripts.push((role, text)),
            SessionOutput::Event(raw) if raw["event"].get("usageEvent").is_some() => break,
            _ => {}
        }
    }

    assert_eq!(
        transcripts,
        vec![
            (SpeakerRole::User, "what time is it".to_string()),
            (SpeakerRole::Assistant, "It is noon.".to_string()),
        ]
    );
    assert_eq!(session.last_speaker_role(), Some(SpeakerRole::Assistant));
    assert!(!session.display_assistant_text());

    session.close().await.unwrap();
}

#[tokio::test]
async fn test_malformed_and_unrecognized_messages_are_forwarded() {
    let (session, peer, mut output) = new_session();
    session.initialize().await.unwrap();

    peer.push_inbound("this is not json");
    peer.push_inbound(r#"{"heartbeat": 1}"#);

    match next_output(&mut output).await {
        SessionOutput::Raw(text) => assert_eq!(text, "this is not json"),
        other => panic!("Expected Raw, got {:?}", other),
    }
    match next_output(&mut output).await {
        SessionOutput::Event(raw) => assert_eq!(raw["heartbeat"], 1),
        other => panic!("Expected Event, got {:?}", other),
    }
    assert!(session.is_active());

    session.close().await.unwrap();
}

#[tokio::test]
async fn test_barge_in_drops_queued_audio() {
    let (session, peer, mut output) = new_session();
    session.initialize().await.unwrap();

    for i in 0..3u8 {
        let audio = BASE64_STANDARD.encode([i, i]);
        peer.push_inbound(inbound(json!({"audioOutput": {"content": audio}})));
    }
    peer.push_inbound(inbound(
        json!({"textOutput": {"role": "ASSISTANT", "content": "{ \"interrupted\" : true }"}}),
    ));

    let flag = session.barge_in();
    wait_until(|| flag.is_raised()).await;

    let sink = RecordingSink::default();
    let played = sink.played.clone();
    let cancel = CancellationToken::new();
    let playback = session.spawn_playback(sink, cancel.clone()).unwrap();

    wait_until(|| !flag.is_raised()).await;

    // Audio after the barge-in plays normally
    let audio = BASE64_STANDARD.encode([9u8, 9]);
    peer.push_inbound(inbound(json!({"audioOutput": {"content": audio}})));
    wait_until(|| played.lock().len() == 1).await;
    assert_eq!(played.lock()[0], Bytes::from_static(&[9, 9]));

    // The interruption marker never surfaces as a transcript
    peer.push_inbound(inbound(json!({"completionEnd": {}})));
    loop {
        match next_output(&mut output).await {
            SessionOutput::Transcript { text, .. } => panic!("unexpected transcript {}", text),
            SessionOutput::Event(raw) if raw["event"].get("completionEnd").is_some() => break,
            _ => {}
        }
    }

    cancel.cancel();
    let stats = playback.await.unwrap();
    assert_eq!(stats.dropped, 3);
    assert_eq!(stats.played, 1);

    session.close().await.unwrap();
}

// =============================================================================
// Tools
// =============================================================================

#[tokio::test]
async fn test_track_order_tool_round_trip() {
    let (session, mut peer, _output) = new_session();
    session.initialize().await.unwrap();
    peer.drain_sent();

    peer.push_inbound(inbound(json!({"toolUse": {
        "toolName": "trackOrderTool",
        "toolUseId": "tool-1",
        "content": "{\"orderId\":\"1234\",\"requestNotifications\":true}"
    }})));
    peer.push_inbound(inbound(json!({"contentEnd": {"type": "TOOL"}})));

    let start = next_sent(&mut peer).await;
    let result = next_sent(&mut peer).await;
    let end = next_sent(&mut peer).await;
    assert_eq!(kind(&start), "contentStart");
    assert_eq!(kind(&result), "toolResult");
    assert_eq!(kind(&end), "contentEnd");

    let start = body(&start);
    assert_eq!(start["type"], "TOOL");
    assert_eq!(start["role"], "TOOL");
    assert_eq!(start["interactive"], false);
    assert_eq!(start["toolResultInputConfiguration"]["toolUseId"], "tool-1");

    let result = body(&result);
    let end = body(&end);
    assert_eq!(result["contentName"], start["contentName"]);
    assert_eq!(end["contentName"], start["contentName"]);
    assert_ne!(start["contentName"], session.content_name());
    assert_eq!(result["promptName"], session.prompt_name());

    let payload: Value = serde_json::from_str(result["content"].as_str().unwrap()).unwrap();
    let expected = track_order_on("1234", true, Local::now().date_naive()).unwrap();
    assert_eq!(payload["orderNumber"], "1234");
    assert_eq!(payload["orderStatus"], expected["orderStatus"]);
    assert_eq!(payload["notificationStatus"], expected["notificationStatus"]);

    assert!(session.is_active());
    session.close().await.unwrap();
}

#[tokio::test]
async fn test_date_tool_round_trip() {
    let (session, mut peer, _output) = new_session();
    session.initialize().await.unwrap();
    peer.drain_sent();

    peer.push_inbound(inbound(json!({"toolUse": {
        "toolName": "getDateAndTimeTool",
        "toolUseId": "tool-2",
        "content": ""
    }})));
    peer.push_inbound(inbound(json!({"contentEnd": {"type": "TOOL"}})));

    let _start = next_sent(&mut peer).await;
    let result = body(&next_sent(&mut peer).await);
    let payload: Value = serde_json::from_str(result["content"].as_str().unwrap()).unwrap();
    assert_eq!(payload["timezone"], "PST");
    assert!(payload["dayOfWeek"].is_string());

    session.close().await.unwrap();
}

#[tokio::test]
async fn test_unknown_tool_gets_error_result() {
    let (session, mut peer, _output) = new_session();
    session.initialize().await.unwrap();
    peer.drain_sent();

    peer.push_inbound(inbound(json!({"toolUse": {
        "toolName": "weatherTool",
        "toolUseId": "tool-3",
        "content": "{}"
    }})));
    peer.push_inbound(inbound(json!({"contentEnd": {"type": "TOOL"}})));

    let start = next_sent(&mut peer).await;
    let result = next_sent(&mut peer).await;
    let end = next_sent(&mut peer).await;
    assert_eq!(kind(&start), "contentStart");
    assert_eq!(kind(&result), "toolResult");
    assert_eq!(kind(&end), "contentEnd");
    assert_eq!(
        body(&start)["toolResultInputConfiguration"]["toolUseId"],
        "tool-3"
    );

    let payload: Value = serde_json::from_str(body(&result)["content"].as_str().unwrap()).unwrap();
    assert_eq!(payload, json!({"error": "Unknown tool: weatherTool"}));
    assert_eq!(session.state(), LifecycleState::Active);

    // The session keeps answering later calls
    peer.push_inbound(inbound(json!({"toolUse": {
        "toolName": "trackOrderTool",
        "toolUseId": "tool-4",
        "content": "{orderId: 12"
    }})));
    peer.push_inbound(inbound(json!({"contentEnd": {"type": "TOOL"}})));

    let _start = next_sent(&mut peer).await;
    let result = body(&next_sent(&mut peer).await);
    let payload: Value = serde_json::from_str(result["content"].as_str().unwrap()).unwrap();
    assert!(
        payload["error"]
            .as_str()
            .unwrap()
            .starts_with("Invalid tool arguments")
    );
    assert!(session.is_active());

    session.close().await.unwrap();
}

// =============================================================================
// Failures
// =============================================================================

async fn assert_fails(peer_action: impl FnOnce(&mut MemoryPeer), expected: &str) {
    let (session, mut peer, mut output) = new_session();
    session.initialize().await.unwrap();
    peer.drain_sent();

    peer_action(&mut peer);

    match output_matching(&mut output, |o| matches!(o, SessionOutput::Stopped { .. })).await {
        SessionOutput::Stopped { reason } => {
            assert!(reason.contains(expected), "reason was {}", reason)
        }
        _ => unreachable!(),
    }
    assert_eq!(session.state(), LifecycleState::Failed);
    assert!(!session.is_active());

    // Termination events still go out and the transport is closed once
    session.close().await.unwrap();
    let kinds: Vec<String> = peer.drain_sent().iter().map(|s| kind(s)).collect();
    assert_eq!(kinds, vec!["promptEnd", "sessionEnd"]);
    assert_eq!(peer.close_count(), 1);
    assert_eq!(session.state(), LifecycleState::Closed);
}

#[tokio::test]
async fn test_receive_error_stops_session() {
    assert_fails(|peer| assert!(peer.push_error("socket reset")), "socket reset").await;
}

#[tokio::test]
async fn test_end_of_stream_stops_session() {
    assert_fails(|peer| peer.end_stream(), "inbound stream ended").await;
}

#[tokio::test]
async fn test_tool_end_without_tool_use_is_fatal() {
    assert_fails(
        |peer| {
            peer.push_inbound(inbound(json!({"contentEnd": {"type": "TOOL"}})));
        },
        "without a pending toolUse",
    )
    .await;
}

#[tokio::test]
async fn test_invalid_known_event_is_fatal() {
    assert_fails(
        |peer| {
            peer.push_inbound(inbound(json!({"textOutput": {"role": "USER"}})));
        },
        "textOutput",
    )
    .await;
}

#[tokio::test]
async fn test_failing_tool_handler_is_fatal() {
    struct BrokenTool;

    #[async_trait]
    impl ToolHandler for BrokenTool {
        fn spec(&self) -> ToolSpec {
            ToolSpec {
                name: "brokenTool".to_string(),
                description: "always fails".to_string(),
                input_schema: json!({"type": "object"}),
            }
        }

        async fn invoke(&self, _arguments: Value) -> ToolCallResult<Value> {
            Err(ToolError::Execution("backend unavailable".to_string()))
        }
    }

    let mut dispatcher = ToolDispatcher::empty();
    dispatcher.register(Arc::new(BrokenTool));
    let (connector, mut peer) = memory_transport();
    let session = StreamSession::with_dispatcher(test_config(), Arc::new(connector), dispatcher);
    let mut output = session.take_output_receiver().unwrap();
    session.initialize().await.unwrap();
    peer.drain_sent();

    peer.push_inbound(inbound(json!({"toolUse": {
        "toolName": "brokenTool",
        "toolUseId": "tool-5",
        "content": "{}"
    }})));
    peer.push_inbound(inbound(json!({"contentEnd": {"type": "TOOL"}})));

    match output_matching(&mut output, |o| matches!(o, SessionOutput::Stopped { .. })).await {
        SessionOutput::Stopped { reason } => {
            assert!(reason.contains("backend unavailable"), "reason was {}", reason)
        }
        _ => unreachable!(),
    }
    assert_eq!(session.state(), LifecycleState::Failed);

    session.close().await.unwrap();
    let kinds: Vec<String> = peer.drain_sent().iter().map(|s| kind(s)).collect();
    assert_eq!(kinds, vec!["promptEnd", "sessionEnd"]);
}
