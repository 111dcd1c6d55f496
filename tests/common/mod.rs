//! Shared test utilities
#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use magi::assistant::api::{
    Assistant, AssistantSpec, FunctionDefinition, MessageRole, Run, ThreadMessage,
};
use magi::assistant::{
    AssistantsApi, ConversationSession, IdRegistry, RunStatus, SessionSettings, ToolCall,
    ToolHandler, ToolOutput, ToolRegistry,
};
use magi::voice::{
    AudioClip, AudioSink, FrameSource, ListenSettings, SpeechCapture, StopToken, Synthesizer,
    Transcriber, WakeControl, samples_to_wav,
};
use magi::{Cue, Error, Result, ShutdownSignal};

pub const SAMPLE_RATE: u32 = 16000;
pub const CHUNK: usize = 1024;

/// One chunk of constant-amplitude "speech", well above the default threshold
#[must_use]
pub fn loud_chunk() -> Vec<f32> {
    vec![0.5; CHUNK]
}

/// `n` consecutive speech chunks
#[must_use]
pub fn speech(n: usize) -> Vec<Vec<f32>> {
    (0..n).map(|_| loud_chunk()).collect()
}

/// In-memory Assistants service with a scripted run lifecycle
///
/// `create_run` takes the first scripted status and every `retrieve_run`
/// takes the next one; an exhausted script reads as completed. A
/// `requires_action` run asks for the weather in Boston.
pub struct FakeAssistantsApi {
    statuses: Mutex<VecDeque<RunStatus>>,
    reply: Option<String>,
    live: Mutex<HashSet<String>>,
    calls: Mutex<Vec<String>>,
    messages: Mutex<Vec<String>>,
    outputs: Mutex<Vec<ToolOutput>>,
    fail_deletes: AtomicBool,
    next_id: AtomicUsize,
}

impl FakeAssistantsApi {
    #[must_use]
    pub fn new(statuses: &[RunStatus], reply: &str) -> Self {
        Self {
            statuses: Mutex::new(statuses.iter().copied().collect()),
            reply: Some(reply.to_string()),
            live: Mutex::new(HashSet::new()),
            calls: Mutex::new(Vec::new()),
            messages: Mutex::new(Vec::new()),
            outputs: Mutex::new(Vec::new()),
            fail_deletes: AtomicBool::new(false),
            next_id: AtomicUsize::new(1),
        }
    }

    /// A service whose runs finish without the assistant saying anything
    #[must_use]
    pub fn without_reply(statuses: &[RunStatus]) -> Self {
        Self {
            reply: None,
            ..Self::new(statuses, "")
        }
    }

    /// Pretend `id` already exists remotely, e.g. left over from a crash
    pub fn adopt(&self, id: &str) {
        self.live.lock().unwrap().insert(id.to_string());
    }

    /// Make every deletion fail with a transport-style error
    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    /// Names of the remote calls made so far, in order
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    #[must_use]
    pub fn call_count(&self, name: &str) -> usize {
        self.calls().iter().filter(|c| *c == name).count()
    }

    /// Texts passed to `add_message`
    #[must_use]
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }

    /// Tool outputs submitted so far
    #[must_use]
    pub fn outputs(&self) -> Vec<ToolOutput> {
        self.outputs.lock().unwrap().clone()
    }

    /// Ids that exist remotely right now
    #[must_use]
    pub fn live_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.live.lock().unwrap().iter().cloned().collect();
        ids.sort();
        ids
    }

    fn log(&self, call: &str) {
        self.calls.lock().unwrap().push(call.to_string());
    }

    fn id(&self, prefix: &str) -> String {
        format!("{prefix}-{}", self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    fn next_run(&self, run_id: &str) -> Run {
        let status = self
            .statuses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(RunStatus::Completed);
        run(run_id, status)
    }

    fn delete(&self, id: &str) -> Result<()> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(Error::Assistant("service unavailable".to_string()));
        }
        if self.live.lock().unwrap().remove(id) {
            Ok(())
        } else {
            Err(Error::NotFound(id.to_string()))
        }
    }
}

fn run(id: &str, status: RunStatus) -> Run {
    let tool_calls = if status == RunStatus::RequiresAction {
        vec![ToolCall {
            id: "call-1".to_string(),
            name: "get_weather".to_string(),
            arguments: r#"{"location":"Boston"}"#.to_string(),
        }]
    } else {
        Vec::new()
    };
    Run {
        id: id.to_string(),
        status,
        tool_calls,
        last_error: status.is_failure().then(|| "scripted failure".to_string()),
    }
}

#[async_trait]
impl AssistantsApi for FakeAssistantsApi {
    async fn create_assistant(&self, spec: &AssistantSpec) -> Result<Assistant> {
        self.log("create_assistant");
        let id = self.id("asst");
        self.live.lock().unwrap().insert(id.clone());
        Ok(Assistant {
            id,
            tools: spec.tools.clone(),
        })
    }

    async fn delete_assistant(&self, assistant_id: &str) -> Result<()> {
        self.log("delete_assistant");
        self.delete(assistant_id)
    }

    async fn create_thread(&self) -> Result<String> {
        self.log("create_thread");
        let id = self.id("thread");
        self.live.lock().unwrap().insert(id.clone());
        Ok(id)
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<()> {
        self.log("delete_thread");
        self.delete(thread_id)
    }

    async fn add_message(&self, _thread_id: &str, text: &str) -> Result<()> {
        self.log("add_message");
        self.messages.lock().unwrap().push(text.to_string());
        Ok(())
    }

    async fn create_run(&self, _thread_id: &str, _assistant_id: &str) -> Result<Run> {
        self.log("create_run");
        let id = self.id("run");
        Ok(self.next_run(&id))
    }

    async fn retrieve_run(&self, _thread_id: &str, run_id: &str) -> Result<Run> {
        self.log("retrieve_run");
        Ok(self.next_run(run_id))
    }

    async fn submit_tool_outputs(
        &self,
        _thread_id: &str,
        run_id: &str,
        outputs: &[ToolOutput],
    ) -> Result<Run> {
        self.log("submit_tool_outputs");
        self.outputs.lock().unwrap().extend_from_slice(outputs);
        Ok(run(run_id, RunStatus::InProgress))
    }

    async fn cancel_run(&self, _thread_id: &str, _run_id: &str) -> Result<()> {
        self.log("cancel_run");
        Ok(())
    }

    /// Messages come back in no particular order; only `created_at` ranks them
    async fn list_messages(&self, _thread_id: &str) -> Result<Vec<ThreadMessage>> {
        self.log("list_messages");
        let message = |id: &str, role, created_at, text: &str| ThreadMessage {
            id: id.to_string(),
            role,
            created_at,
            text: vec![text.to_string()],
        };

        let question = message("msg-2", MessageRole::User, 250, "question");
        Ok(match &self.reply {
            Some(reply) => vec![
                message("msg-3", MessageRole::Assistant, 200, "An earlier answer."),
                message("msg-4", MessageRole::Assistant, 300, reply),
                message("msg-1", MessageRole::Assistant, 100, "The first answer."),
                question,
            ],
            None => vec![question],
        })
    }
}

/// Weather tool that answers locally and remembers its arguments
#[derive(Default)]
pub struct FakeWeather {
    arguments: Mutex<Vec<String>>,
}

impl FakeWeather {
    #[must_use]
    pub fn arguments(&self) -> Vec<String> {
        self.arguments.lock().unwrap().clone()
    }
}

#[async_trait]
impl ToolHandler for FakeWeather {
    fn definition(&self) -> FunctionDefinition {
        FunctionDefinition {
            name: "get_weather".to_string(),
            description: "Get the current weather".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": { "location": { "type": "string" } },
                "required": ["location"]
            }),
        }
    }

    async fn call(&self, arguments: &str) -> Result<String> {
        self.arguments.lock().unwrap().push(arguments.to_string());
        Ok("Weather in Boston: clear sky. Temperature: 70°F".to_string())
    }
}

/// Fast polling, short run limit
#[must_use]
pub fn fast_settings() -> SessionSettings {
    SessionSettings {
        poll_interval: Duration::from_millis(5),
        max_run: Duration::from_secs(5),
        ..SessionSettings::default()
    }
}

/// Conversation over `api` with registries under `dir`
#[must_use]
pub fn conversation(
    api: Arc<FakeAssistantsApi>,
    weather: Arc<FakeWeather>,
    dir: &Path,
    shutdown: ShutdownSignal,
) -> ConversationSession {
    conversation_with(api, weather, dir, shutdown, fast_settings())
}

/// Like [`conversation`], with explicit session settings
#[must_use]
pub fn conversation_with(
    api: Arc<FakeAssistantsApi>,
    weather: Arc<FakeWeather>,
    dir: &Path,
    shutdown: ShutdownSignal,
    settings: SessionSettings,
) -> ConversationSession {
    ConversationSession::new(
        api,
        ToolRegistry::new().with(weather),
        IdRegistry::new(dir.join("active.treg")),
        IdRegistry::new(dir.join("active.areg")),
        settings,
        shutdown,
    )
}

/// Sink that logs clip boundaries instead of touching a device
pub struct RecordingSink {
    events: Mutex<Vec<String>>,
    delay: Duration,
}

impl RecordingSink {
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            delay,
        }
    }

    /// `start:N` then `end:N` or `stopped:N`, N being the clip's frame count
    #[must_use]
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    /// Append a marker to the event log
    pub fn note(&self, event: &str) {
        self.events.lock().unwrap().push(event.to_string());
    }

    /// Wait until a clip has started playing
    pub async fn wait_for_start(&self) {
        for _ in 0..200 {
            if !self.played().is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("nothing started playing");
    }

    /// Frame counts of every clip played, in order
    #[must_use]
    pub fn played(&self) -> Vec<usize> {
        self.events()
            .iter()
            .filter_map(|e| e.strip_prefix("start:"))
            .filter_map(|n| n.parse().ok())
            .collect()
    }

    /// Frame counts of clips cut short by a stop
    #[must_use]
    pub fn stopped(&self) -> Vec<usize> {
        self.events()
            .iter()
            .filter_map(|e| e.strip_prefix("stopped:"))
            .filter_map(|n| n.parse().ok())
            .collect()
    }
}

impl AudioSink for RecordingSink {
    fn play(&self, clip: &AudioClip, stop: &StopToken) -> Result<()> {
        let frames = clip.frames();
        self.note(&format!("start:{frames}"));
        let deadline = std::time::Instant::now() + self.delay;
        while std::time::Instant::now() < deadline {
            if stop.is_stopped() {
                self.note(&format!("stopped:{frames}"));
                return Ok(());
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        self.note(&format!("end:{frames}"));
        Ok(())
    }
}

/// Wake detector stand-in that logs suspend and resume into a sink's events
pub struct FakeDetector {
    sink: Arc<RecordingSink>,
}

impl FakeDetector {
    #[must_use]
    pub fn new(sink: Arc<RecordingSink>) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl WakeControl for FakeDetector {
    async fn suspend(&self) {
        self.sink.note("suspend");
    }

    async fn resume(&self) -> Result<()> {
        self.sink.note("resume");
        Ok(())
    }

    async fn shutdown(&mut self) {
        self.sink.note("detector-shutdown");
    }
}

/// Frame count of the cue file written by [`write_cues`]
#[must_use]
pub fn cue_frames(cue: Cue) -> usize {
    let index = Cue::ALL.iter().position(|c| *c == cue).unwrap_or_default();
    (index + 1) * 100
}

/// Write every cue as a silent WAV with a distinct length
pub fn write_cues(dir: &Path) {
    for cue in Cue::ALL {
        let wav = samples_to_wav(&vec![0.0; cue_frames(cue)], SAMPLE_RATE).unwrap();
        std::fs::write(dir.join(cue.file_name()), wav).unwrap();
    }
}

/// Microphone stand-in that replays scripted chunks, then silence
pub struct FakeFrameSource {
    script: VecDeque<Vec<f32>>,
    closed: bool,
    running: bool,
    log: Option<Arc<RecordingSink>>,
}

impl FakeFrameSource {
    #[must_use]
    pub fn new(script: Vec<Vec<f32>>) -> Self {
        Self {
            script: script.into(),
            closed: false,
            running: false,
            log: None,
        }
    }

    /// A source whose stream ends immediately
    #[must_use]
    pub fn closed() -> Self {
        Self {
            closed: true,
            ..Self::new(Vec::new())
        }
    }

    /// Note `listen` in the sink's events each time the stream starts
    #[must_use]
    pub fn with_log(mut self, sink: Arc<RecordingSink>) -> Self {
        self.log = Some(sink);
        self
    }
}

#[async_trait]
impl FrameSource for FakeFrameSource {
    fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }

    async fn start(&mut self) -> Result<()> {
        if let Some(log) = &self.log {
            log.note("listen");
        }
        self.running = true;
        Ok(())
    }

    async fn next_chunk(&mut self) -> Option<Vec<f32>> {
        if self.closed || !self.running {
            return None;
        }
        tokio::task::yield_now().await;
        Some(self.script.pop_front().unwrap_or_else(|| vec![0.0; CHUNK]))
    }

    async fn stop(&mut self) {
        self.running = false;
    }
}

/// Transcriber with a fixed answer, or a fixed failure
pub struct FakeTranscriber {
    text: Option<String>,
    calls: AtomicUsize,
}

impl FakeTranscriber {
    #[must_use]
    pub fn new(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    /// A transcriber whose service always errors
    #[must_use]
    pub fn failing() -> Self {
        Self {
            text: None,
            calls: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transcriber for FakeTranscriber {
    async fn transcribe(&self, _wav: &[u8]) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.text
            .clone()
            .ok_or_else(|| Error::Stt("service unavailable".to_string()))
    }
}

/// Frame count of every reply produced by [`FakeSynthesizer`]
pub const REPLY_FRAMES: usize = 4000;

/// Synthesizer returning a fixed-length WAV
#[derive(Default)]
pub struct FakeSynthesizer {
    texts: Mutex<Vec<String>>,
}

impl FakeSynthesizer {
    #[must_use]
    pub fn texts(&self) -> Vec<String> {
        self.texts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Synthesizer for FakeSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        self.texts.lock().unwrap().push(text.to_string());
        samples_to_wav(&vec![0.1; REPLY_FRAMES], SAMPLE_RATE)
    }
}

/// Capture over a fake source with a fixed transcript
#[must_use]
pub fn capture(
    script: Vec<Vec<f32>>,
    transcript: &str,
    shutdown: ShutdownSignal,
) -> SpeechCapture {
    SpeechCapture::new(
        Box::new(FakeFrameSource::new(script)),
        Arc::new(FakeTranscriber::new(transcript)),
        ListenSettings::default(),
        shutdown,
    )
}
