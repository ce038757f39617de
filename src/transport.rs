use std::path::Path;
use std::pin::Pin;

use anyhow::Result;
use futures::Stream;
use serde_json::Value;

pub type EventStream = Pin<Box<dyn Stream<Item = Result<Value>> + Send>>;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReadyInfo {
    pub session_id: String,
    pub model: String,
    pub tools: u32,
}

/// Boundary to the assistant backend process.
///
/// The session layer drives this trait and never sees process plumbing;
/// implementations own spawning, stdin/stdout framing, and teardown. All
/// streams yield raw JSON values; normalization happens on the consumer
/// side so a transport never has to know the event vocabulary.
pub trait Transport: Send {
    fn start(
        &mut self,
        working_dir: &Path,
    ) -> impl std::future::Future<Output = Result<ReadyInfo>> + Send;

    fn send_message(
        &mut self,
        text: &str,
    ) -> impl std::future::Future<Output = Result<EventStream>> + Send;

    fn clear(&mut self) -> impl std::future::Future<Output = Result<()>> + Send;

    fn resume(
        &mut self,
        session_id: &str,
    ) -> impl std::future::Future<Output = Result<EventStream>> + Send;

    fn interrupt(&mut self) -> impl std::future::Future<Output = Result<()>> + Send;

    fn run_external_command(
        &mut self,
        command: &str,
    ) -> impl std::future::Future<Output = Result<EventStream>> + Send;

    fn poll_permission(&mut self) -> impl std::future::Future<Output = Result<Option<Value>>> + Send;

    /// Write a control message to the backend's stdin. Synchronous by
    /// contract: callers fire these from non-async arbitration paths.
    fn send_control(&mut self, message: &Value) -> Result<()>;
}

/// Scripted [`Transport`] double used by the test suites.
///
/// Each `send_message` call pops the next pre-recorded turn and replays it
/// as an event stream. Control messages and interrupts are recorded for
/// assertion.
pub struct ScriptedTransport {
    pub ready: ReadyInfo,
    turns: Vec<Vec<Value>>,
    permission_queue: Vec<Value>,
    pub sent_messages: Vec<String>,
    pub control_messages: Vec<Value>,
    pub interrupts: u32,
    pub clears: u32,
    pub resumed: Vec<String>,
    pub fail_start: bool,
}

impl ScriptedTransport {
    pub fn new(ready: ReadyInfo) -> Self {
        Self {
            ready,
            turns: Vec::new(),
            permission_queue: Vec::new(),
            sent_messages: Vec::new(),
            control_messages: Vec::new(),
            interrupts: 0,
            clears: 0,
            resumed: Vec::new(),
            fail_start: false,
        }
    }

    pub fn push_turn(&mut self, events: Vec<Value>) {
        self.turns.push(events);
    }

    pub fn push_permission(&mut self, raw: Value) {
        self.permission_queue.push(raw);
    }

    fn next_stream(&mut self) -> EventStream {
        let events = if self.turns.is_empty() {
            Vec::new()
        } else {
            self.turns.remove(0)
        };
        Box::pin(futures::stream::iter(events.into_iter().map(Ok)))
    }
}

impl Transport for ScriptedTransport {
    async fn start(&mut self, _working_dir: &Path) -> Result<ReadyInfo> {
        if self.fail_start {
            anyhow::bail!("backend failed to launch");
        }
        Ok(self.ready.clone())
    }

    async fn send_message(&mut self, text: &str) -> Result<EventStream> {
        self.sent_messages.push(text.to_string());
        Ok(self.next_stream())
    }

    async fn clear(&mut self) -> Result<()> {
        self.clears += 1;
        Ok(())
    }

    async fn resume(&mut self, session_id: &str) -> Result<EventStream> {
        self.resumed.push(session_id.to_string());
        Ok(self.next_stream())
    }

    async fn interrupt(&mut self) -> Result<()> {
        self.interrupts += 1;
        Ok(())
    }

    async fn run_external_command(&mut self, command: &str) -> Result<EventStream> {
        self.sent_messages.push(format!("!{command}"));
        Ok(self.next_stream())
    }

    async fn poll_permission(&mut self) -> Result<Option<Value>> {
        if self.permission_queue.is_empty() {
            Ok(None)
        } else {
            Ok(Some(self.permission_queue.remove(0)))
        }
    }

    fn send_control(&mut self, message: &Value) -> Result<()> {
        self.control_messages.push(message.clone());
        Ok(())
    }
}
