//! Streaming session manager for Nova Sonic.
//!
//! A [`StreamSession`] owns one conversational session over one duplex
//! channel. It sends the bootstrap sequence, runs two background tasks for
//! the session's lifetime, and shuts everything down in order on `close()`.
//!
//! - The ingress forwarder reads captured audio from the ingress pipe and
//!   sends each chunk as an `audioInput` event.
//! - The response receiver reads inbound events. It publishes transcripts,
//!   pushes synthesized audio onto the egress pipe, raises the barge-in flag,
//!   and answers tool calls.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use sonic_bridge::core::realtime::{SessionConfig, StreamSession, WebSocketConnector};
//!
//! let connector = Arc::new(WebSocketConnector::new("ws://127.0.0.1:9000")?);
//! let session = StreamSession::new(SessionConfig::default(), connector);
//! session.initialize().await?;
//! session.start_audio_content().await?;
//! session.enqueue_audio_chunk(pcm_bytes)?;
//! session.close().await?;
//! ```

use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::config::SessionConfig;
use super::messages::{
    CodecError, ContentType, InboundEvent, ToolUse, WireEvent, decode_inbound, encode,
};
use crate::core::realtime::base::{
    LifecycleState, SessionError, SessionOutput, SessionResult, SpeakerRole, StateCell,
};
use crate::core::realtime::pipe::{
    BargeInFlag, PipeReader, PipeWriter, PlaybackSink, PlaybackStats, audio_pipe, run_playback,
};
use crate::core::realtime::transport::{EventSink, EventSource, TransportConnector};
use crate::core::tools::{ToolDispatcher, ToolError};

/// Sent events longer than this are logged by kind only.
const MAX_LOGGED_EVENT_LEN: usize = 200;

/// State of the USER audio content segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AudioSegment {
    #[default]
    NotStarted,
    Starting,
    Open,
    Ended,
}

/// Conversation state tracked by the response receiver.
#[derive(Debug, Clone, Copy, Default)]
struct TurnState {
    last_role: Option<SpeakerRole>,
    display_assistant_text: bool,
}

#[derive(Default)]
struct Tasks {
    receiver: Option<JoinHandle<()>>,
    forwarder: Option<JoinHandle<()>>,
}

// =============================================================================
// Event Writer
// =============================================================================

/// Encodes and sends events. Failures are logged and the event is dropped.
#[derive(Clone)]
struct EventWriter {
    sink: Arc<dyn EventSink>,
}

impl EventWriter {
    async fn send(&self, event: &WireEvent) -> bool {
        let text = match encode(event) {
            Ok(text) => text,
            Err(e) => {
                error!("Failed to encode {} event: {}", event.kind(), e);
                return false;
            }
        };

        if text.len() <= MAX_LOGGED_EVENT_LEN {
            debug!("Sending {}", text);
        } else {
            debug!("Sending {} event ({} bytes)", event.kind(), text.len());
        }

        match self.sink.send(text).await {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to send {} event: {}", event.kind(), e);
                false
            }
        }
    }

    async fn close(&self) {
        if let Err(e) = self.sink.close().await {
            warn!("Failed to close transport: {}", e);
        }
    }
}

// =============================================================================
// Stream Session
// =============================================================================

/// One bidirectional speech session.
pub struct StreamSession {
    config: SessionConfig,
    connector: Arc<dyn TransportConnector>,
    dispatcher: Arc<ToolDispatcher>,

    prompt_name: String,
    content_name: String,
    audio_content_name: String,

    state: Arc<StateCell>,
    audio_segment: Mutex<AudioSegment>,
    prompt_ended: AtomicBool,
    session_ended: AtomicBool,
    turn: Arc<Mutex<TurnState>>,
    barge_in: BargeInFlag,

    writer: Mutex<Option<EventWriter>>,
    ingress_tx: PipeWriter,
    ingress_rx: Mutex<Option<PipeReader>>,
    egress_tx: PipeWriter,
    egress_rx: Mutex<Option<PipeReader>>,
    output_tx: mpsc::UnboundedSender<SessionOutput>,
    output_rx: Mutex<Option<mpsc::UnboundedReceiver<SessionOutput>>>,
    /// Set once the observation channel has been taken
    observed: Arc<AtomicBool>,

    /// Serializes `initialize` and `close`
    lifecycle_lock: tokio::sync::Mutex<()>,
    receiver_cancel: CancellationToken,
    forwarder_cancel: CancellationToken,
    tasks: Mutex<Tasks>,
}

impl StreamSession {
    /// Create a session with the built-in tools.
    pub fn new(config: SessionConfig, connector: Arc<dyn TransportConnector>) -> Self {
        Self::with_dispatcher(config, connector, ToolDispatcher::with_builtin_tools())
    }

    pub fn with_dispatcher(
        config: SessionConfig,
        connector: Arc<dyn TransportConnector>,
        dispatcher: ToolDispatcher,
    ) -> Self {
        let (ingress_tx, ingress_rx) = audio_pipe();
        let (egress_tx, egress_rx) = audio_pipe();
        let (output_tx, output_rx) = mpsc::unbounded_channel();

        Self {
            config,
            connector,
            dispatcher: Arc::new(dispatcher),
            prompt_name: Uuid::new_v4().to_string(),
            content_name: Uuid::new_v4().to_string(),
            audio_content_name: Uuid::new_v4().to_string(),
            state: Arc::new(StateCell::new()),
            audio_segment: Mutex::new(AudioSegment::NotStarted),
            prompt_ended: AtomicBool::new(false),
            session_ended: AtomicBool::new(false),
            turn: Arc::new(Mutex::new(TurnState::default())),
            barge_in: BargeInFlag::new(),
            writer: Mutex::new(None),
            ingress_tx,
            ingress_rx: Mutex::new(Some(ingress_rx)),
            egress_tx,
            egress_rx: Mutex::new(Some(egress_rx)),
            output_tx,
            output_rx: Mutex::new(Some(output_rx)),
            observed: Arc::new(AtomicBool::new(false)),
            lifecycle_lock: tokio::sync::Mutex::new(()),
            receiver_cancel: CancellationToken::new(),
            forwarder_cancel: CancellationToken::new(),
            tasks: Mutex::new(Tasks::default()),
        }
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    pub fn state(&self) -> LifecycleState {
        self.state.load()
    }

    pub fn is_active(&self) -> bool {
        self.state.load() == LifecycleState::Active
    }

    pub fn prompt_name(&self) -> &str {
        &self.prompt_name
    }

    /// Content name of the system prompt segment.
    pub fn content_name(&self) -> &str {
        &self.content_name
    }

    pub fn audio_content_name(&self) -> &str {
        &self.audio_content_name
    }

    pub fn audio_segment(&self) -> AudioSegment {
        *self.audio_segment.lock()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Role of the most recent inbound content segment.
    pub fn last_speaker_role(&self) -> Option<SpeakerRole> {
        self.turn.lock().last_role
    }

    /// Whether assistant text is currently surfaced.
    pub fn display_assistant_text(&self) -> bool {
        self.turn.lock().display_assistant_text
    }

    /// Handle to the barge-in flag shared with the playback consumer.
    pub fn barge_in(&self) -> BargeInFlag {
        self.barge_in.clone()
    }

    /// Take the egress reader. Only the first call returns it.
    pub fn take_egress_reader(&self) -> Option<PipeReader> {
        self.egress_rx.lock().take()
    }

    /// Take the observation channel. Only the first call returns it.
    ///
    /// Nothing is published until the channel is taken, so take it before
    /// `initialize` to see every event.
    pub fn take_output_receiver(&self) -> Option<mpsc::UnboundedReceiver<SessionOutput>> {
        let rx = self.output_rx.lock().take();
        if rx.is_some() {
            self.observed.store(true, Ordering::Release);
        }
        rx
    }

    /// Play egress audio into `sink` on a background task.
    pub fn spawn_playback<S>(
        &self,
        sink: S,
        cancel: CancellationToken,
    ) -> SessionResult<JoinHandle<PlaybackStats>>
    where
        S: PlaybackSink + 'static,
    {
        let reader = self.take_egress_reader().ok_or_else(|| {
            SessionError::Precondition("egress reader already taken".to_string())
        })?;
        Ok(tokio::spawn(run_playback(
            reader,
            self.barge_in.clone(),
            sink,
            self.config.playback_poll,
            cancel,
        )))
    }

    fn writer(&self) -> Option<EventWriter> {
        self.writer.lock().clone()
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Open the channel, send the bootstrap sequence and start the tasks.
    pub async fn initialize(&self) -> SessionResult<()> {
        let _guard = self.lifecycle_lock.lock().await;

        let found = self.state.load();
        if found != LifecycleState::Uninitialized {
            return Err(SessionError::InvalidState {
                expected: LifecycleState::Uninitialized,
                found,
            });
        }

        let started = Instant::now();
        info!(
            "Opening {} transport for session {}",
            self.connector.name(),
            self.prompt_name
        );
        let channel = self.connector.open().await.map_err(|e| {
            error!("Failed to open transport: {}", e);
            SessionError::Initialization(e.to_string())
        })?;

        // The lifecycle lock keeps `close` out, so this cannot be refused.
        self.state.advance(LifecycleState::Initializing);

        let writer = EventWriter { sink: channel.sink };
        *self.writer.lock() = Some(writer.clone());

        let tools = self.dispatcher.catalog();
        let bootstrap = [
            WireEvent::session_start(self.config.inference),
            WireEvent::prompt_start(
                &self.prompt_name,
                self.config.output_audio,
                &self.config.voice_id,
                &tools,
            ),
            WireEvent::text_content_start(&self.prompt_name, &self.content_name, SpeakerRole::System),
            WireEvent::text_input(&self.prompt_name, &self.content_name, &self.config.system_prompt),
            WireEvent::content_end(&self.prompt_name, &self.content_name),
        ];
        for (i, event) in bootstrap.iter().enumerate() {
            if i > 0 && !self.config.event_pacing.is_zero() {
                tokio::time::sleep(self.config.event_pacing).await;
            }
            writer.send(event).await;
        }

        self.state.advance(LifecycleState::Active);

        let receiver = ResponseReceiver {
            source: channel.source,
            writer: writer.clone(),
            prompt_name: self.prompt_name.clone(),
            dispatcher: self.dispatcher.clone(),
            state: self.state.clone(),
            turn: self.turn.clone(),
            barge_in: self.barge_in.clone(),
            egress: self.egress_tx.clone(),
            output: self.output_tx.clone(),
            observed: self.observed.clone(),
            pending_tool: None,
        };
        let receiver_handle = tokio::spawn(receiver.run(self.receiver_cancel.clone()));

        let forwarder_handle = self.ingress_rx.lock().take().map(|ingress| {
            tokio::spawn(forward_ingress(
                ingress,
                writer,
                self.prompt_name.clone(),
                self.audio_content_name.clone(),
                self.forwarder_cancel.clone(),
            ))
        });

        {
            let mut tasks = self.tasks.lock();
            tasks.receiver = Some(receiver_handle);
            tasks.forwarder = forwarder_handle;
        }

        info!(
            "Session {} initialized in {:.2?}",
            self.prompt_name,
            started.elapsed()
        );
        Ok(())
    }

    /// Open the USER audio segment.
    ///
    /// Calling it again while the segment is open is a no-op.
    pub async fn start_audio_content(&self) -> SessionResult<()> {
        let state = self.state.load();
        if state != LifecycleState::Active {
            return Err(SessionError::NotActive(state));
        }

        {
            let mut segment = self.audio_segment.lock();
            match *segment {
                AudioSegment::NotStarted => *segment = AudioSegment::Starting,
                AudioSegment::Starting | AudioSegment::Open => {
                    warn!("Audio content already started, ignoring");
                    return Ok(());
                }
                AudioSegment::Ended => {
                    return Err(SessionError::Precondition(
                        "audio content already ended".to_string(),
                    ));
                }
            }
        }

        if let Some(writer) = self.writer() {
            writer
                .send(&WireEvent::audio_content_start(
                    &self.prompt_name,
                    &self.audio_content_name,
                    self.config.input_audio,
                ))
                .await;
        }

        let mut segment = self.audio_segment.lock();
        if *segment == AudioSegment::Starting {
            *segment = AudioSegment::Open;
        }
        Ok(())
    }

    /// Queue one captured audio chunk without blocking.
    pub fn enqueue_audio_chunk(&self, chunk: impl Into<Bytes>) -> SessionResult<()> {
        let state = self.state.load();
        if state != LifecycleState::Active {
            return Err(SessionError::NotActive(state));
        }

        match *self.audio_segment.lock() {
            AudioSegment::Open => {}
            AudioSegment::NotStarted | AudioSegment::Starting => {
                return Err(SessionError::Precondition(
                    "start_audio_content must complete before audio is enqueued".to_string(),
                ));
            }
            AudioSegment::Ended => {
                return Err(SessionError::Precondition(
                    "audio content already ended".to_string(),
                ));
            }
        }

        if self.ingress_tx.push(chunk.into()) {
            Ok(())
        } else {
            Err(SessionError::NotActive(self.state.load()))
        }
    }

    /// Close the USER audio segment. No-op unless active with an open segment.
    pub async fn end_audio_content(&self) -> SessionResult<()> {
        if !self.is_active() {
            return Ok(());
        }
        {
            let mut segment = self.audio_segment.lock();
            if *segment != AudioSegment::Open {
                return Ok(());
            }
            *segment = AudioSegment::Ended;
        }
        self.send_if_connected(WireEvent::content_end(
            &self.prompt_name,
            &self.audio_content_name,
        ))
        .await;
        Ok(())
    }

    /// Send `promptEnd`. No-op unless active, and sent at most once.
    pub async fn end_prompt(&self) -> SessionResult<()> {
        if self.is_active() && !self.prompt_ended.swap(true, Ordering::AcqRel) {
            self.send_if_connected(WireEvent::prompt_end(&self.prompt_name))
                .await;
        }
        Ok(())
    }

    /// Send `sessionEnd`. No-op unless active, and sent at most once.
    pub async fn end_session(&self) -> SessionResult<()> {
        if self.is_active() && !self.session_ended.swap(true, Ordering::AcqRel) {
            self.send_if_connected(WireEvent::session_end()).await;
        }
        Ok(())
    }

    async fn send_if_connected(&self, event: WireEvent) {
        if let Some(writer) = self.writer() {
            writer.send(&event).await;
        }
    }

    /// Stop both tasks, send the termination events and close the transport.
    ///
    /// The termination events are sent regardless of whether the receiver
    /// already failed, skipping any the caller already sent. A second call
    /// is a no-op.
    pub async fn close(&self) -> SessionResult<()> {
        let _guard = self.lifecycle_lock.lock().await;

        match self.state.load() {
            LifecycleState::Closing | LifecycleState::Closed => return Ok(()),
            LifecycleState::Uninitialized => {
                self.state.advance(LifecycleState::Closed);
                info!("Session {} closed before initialization", self.prompt_name);
                return Ok(());
            }
            _ => {}
        }

        self.state.advance(LifecycleState::Closing);
        info!("Closing session {}", self.prompt_name);

        let (receiver, forwarder) = {
            let mut tasks = self.tasks.lock();
            (tasks.receiver.take(), tasks.forwarder.take())
        };

        self.receiver_cancel.cancel();
        if let Some(handle) = receiver
            && let Err(e) = handle.await
        {
            warn!("Response receiver task failed: {}", e);
        }

        // The forwarder flushes chunks that are already queued before exiting.
        self.forwarder_cancel.cancel();
        if let Some(handle) = forwarder
            && let Err(e) = handle.await
        {
            warn!("Ingress forwarder task failed: {}", e);
        }

        if let Some(writer) = self.writer() {
            let audio_open = {
                let mut segment = self.audio_segment.lock();
                let open = matches!(*segment, AudioSegment::Starting | AudioSegment::Open);
                if open {
                    *segment = AudioSegment::Ended;
                }
                open
            };
            if audio_open {
                writer
                    .send(&WireEvent::content_end(
                        &self.prompt_name,
                        &self.audio_content_name,
                    ))
                    .await;
            }
            if !self.prompt_ended.swap(true, Ordering::AcqRel) {
                writer.send(&WireEvent::prompt_end(&self.prompt_name)).await;
            }
            if !self.session_ended.swap(true, Ordering::AcqRel) {
                writer.send(&WireEvent::session_end()).await;
            }
            writer.close().await;
        }

        self.state.advance(LifecycleState::Closed);
        info!("Session {} closed", self.prompt_name);
        Ok(())
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.receiver_cancel.cancel();
        self.forwarder_cancel.cancel();
    }
}

// =============================================================================
// Ingress Forwarder
// =============================================================================

async fn forward_ingress(
    mut ingress: PipeReader,
    writer: EventWriter,
    prompt_name: String,
    content_name: String,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;

            chunk = ingress.recv() => match chunk {
                Some(chunk) => send_audio(&writer, &prompt_name, &content_name, &chunk).await,
                None => break,
            },

            _ = cancel.cancelled() => {
                let mut flushed = 0;
                while let Some(chunk) = ingress.try_recv() {
                    send_audio(&writer, &prompt_name, &content_name, &chunk).await;
                    flushed += 1;
                }
                debug!("Ingress forwarder stopping, flushed {} chunks", flushed);
                break;
            }
        }
    }
}

async fn send_audio(writer: &EventWriter, prompt_name: &str, content_name: &str, chunk: &[u8]) {
    if chunk.is_empty() {
        return;
    }
    writer
        .send(&WireEvent::audio_input(prompt_name, content_name, chunk))
        .await;
}

// =============================================================================
// Response Receiver
// =============================================================================

struct ResponseReceiver {
    source: Box<dyn EventSource>,
    writer: EventWriter,
    prompt_name: String,
    dispatcher: Arc<ToolDispatcher>,
    state: Arc<StateCell>,
    turn: Arc<Mutex<TurnState>>,
    barge_in: BargeInFlag,
    egress: PipeWriter,
    output: mpsc::UnboundedSender<SessionOutput>,
    observed: Arc<AtomicBool>,
    pending_tool: Option<ToolUse>,
}

impl ResponseReceiver {
    fn publish(&self, output: SessionOutput) {
        if self.observed.load(Ordering::Acquire) {
            let _ = self.output.send(output);
        }
    }

    async fn run(mut self, cancel: CancellationToken) {
        let failure = loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => break None,
                next = self.source.receive() => next,
            };

            match next {
                Ok(Some(text)) => {
                    if let Err(e) = self.handle(&text).await {
                        error!("Response receiver stopped: {}", e);
                        break Some(e.to_string());
                    }
                }
                Ok(None) => {
                    info!("Inbound stream ended");
                    break Some("inbound stream ended".to_string());
                }
                Err(e) => {
                    error!("Error receiving response: {}", e);
                    break Some(e.to_string());
                }
            }
        };

        let reason = match failure {
            Some(reason) => {
                self.state
                    .transition(LifecycleState::Active, LifecycleState::Failed);
                reason
            }
            None => {
                debug!("Response receiver cancelled");
                "session closed".to_string()
            }
        };
        self.publish(SessionOutput::Stopped { reason });
    }

    async fn handle(&mut self, text: &str) -> SessionResult<()> {
        let message = match decode_inbound(text) {
            Ok(message) => message,
            Err(CodecError::Malformed(e)) => {
                warn!("Forwarding undecodable payload: {}", e);
                self.publish(SessionOutput::Raw(text.to_string()));
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        match message.event {
            InboundEvent::ContentStart(start) => {
                let speculative = start.is_speculative().unwrap_or_else(|e| {
                    warn!("Error parsing additionalModelFields: {}", e);
                    false
                });
                if speculative {
                    debug!("Speculative content detected");
                }
                let mut turn = self.turn.lock();
                turn.last_role = Some(start.role);
                turn.display_assistant_text = speculative;
            }
            InboundEvent::TextOutput(output) => {
                if output.is_interruption() {
                    debug!("Barge-in detected, stopping audio output");
                    self.barge_in.raise();
                } else {
                    let (role, display_assistant) = {
                        let turn = self.turn.lock();
                        (
                            output.role.or(turn.last_role).unwrap_or(SpeakerRole::Other),
                            turn.display_assistant_text,
                        )
                    };
                    if role == SpeakerRole::Assistant && !display_assistant {
                        debug!("Suppressing final assistant text");
                    } else {
                        self.publish(SessionOutput::Transcript {
                            role,
                            text: output.content,
                        });
                    }
                }
            }
            InboundEvent::AudioOutput(audio) => {
                let bytes = audio.decode_audio().map_err(|e| {
                    SessionError::Protocol(format!("invalid audioOutput payload: {}", e))
                })?;
                if !bytes.is_empty() {
                    self.egress.push(Bytes::from(bytes));
                }
            }
            InboundEvent::ToolUse(tool) => {
                if let Some(pending) = &self.pending_tool {
                    return Err(SessionError::Protocol(format!(
                        "toolUse {} arrived before {} was answered",
                        tool.tool_use_id, pending.tool_use_id
                    )));
                }
                info!("Tool use detected: {}, ID: {}", tool.tool_name, tool.tool_use_id);
                self.pending_tool = Some(tool);
            }
            InboundEvent::ContentEnd(end) if end.content_type == Some(ContentType::Tool) => {
                let tool = self.pending_tool.take().ok_or_else(|| {
                    SessionError::Protocol("contentEnd(TOOL) without a pending toolUse".to_string())
                })?;
                self.answer_tool(tool).await?;
            }
            InboundEvent::ContentEnd(_) => {}
            InboundEvent::CompletionEnd => info!("End of response sequence"),
            InboundEvent::Unrecognized => debug!("Forwarding unrecognized event"),
        }

        self.publish(SessionOutput::Event(message.raw));
        Ok(())
    }

    /// Run the tool and send its result.
    ///
    /// Unknown tools and unparseable arguments are answered with an
    /// error-shaped result. A failing handler stops the receiver.
    async fn answer_tool(&mut self, tool: ToolUse) -> SessionResult<()> {
        let started = Instant::now();
        let result = match self.dispatcher.dispatch(&tool.tool_name, &tool.content).await {
            Ok(result) => result,
            Err(e @ (ToolError::UnknownTool(_) | ToolError::InvalidArguments(_))) => {
                warn!("Answering tool {} with an error: {}", tool.tool_name, e);
                json!({ "error": e.to_string() })
            }
            Err(e) => return Err(e.into()),
        };
        debug!("Tool {} finished in {:.2?}", tool.tool_name, started.elapsed());

        let content_name = Uuid::new_v4().to_string();
        self.writer
            .send(&WireEvent::tool_content_start(
                &self.prompt_name,
                &content_name,
                &tool.tool_use_id,
            ))
            .await;
        self.writer
            .send(&WireEvent::tool_result(&self.prompt_name, &content_name, &result))
            .await;
        self.writer
            .send(&WireEvent::content_end(&self.prompt_name, &content_name))
            .await;
        Ok(())
    }
}
