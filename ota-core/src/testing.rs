//! Test doubles for the transport, observer and restart seams

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use crate::error::TransportError;
use crate::lifecycle::OtaObserver;
use crate::restart::Restarter;
use crate::transport::Transport;

/// One scripted receive outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Data(Vec<u8>),
    Timeout,
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentResponse {
    pub status: u16,
    pub content_type: String,
    pub body: Vec<u8>,
}

impl SentResponse {
    pub fn body_str(&self) -> &str {
        std::str::from_utf8(&self.body).unwrap_or("")
    }
}

/// Transport that replays a fixed script. An exhausted script reads as a
/// closed connection.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    content_length: usize,
    steps: VecDeque<Step>,
    receives: usize,
    responses: Vec<SentResponse>,
}

impl ScriptedTransport {
    pub fn new(content_length: usize, steps: Vec<Step>) -> Self {
        Self { content_length, steps: steps.into(), ..Self::default() }
    }

    /// Deliver `body` in frames of `frame` bytes with its true length declared.
    pub fn chunked(body: &[u8], frame: usize) -> Self {
        Self::declared(body.len(), body, frame)
    }

    /// Deliver `body` in frames of `frame` bytes, declaring `content_length`.
    pub fn declared(content_length: usize, body: &[u8], frame: usize) -> Self {
        let steps = body.chunks(frame.max(1)).map(|c| Step::Data(c.to_vec())).collect();
        Self::new(content_length, steps)
    }

    /// Number of receive calls made.
    pub fn receives(&self) -> usize {
        self.receives
    }

    pub fn responses(&self) -> &[SentResponse] {
        &self.responses
    }

    /// The single terminal response, if exactly one was sent.
    pub fn response(&self) -> Option<&SentResponse> {
        match self.responses.as_slice() {
            [only] => Some(only),
            _ => None,
        }
    }
}

impl Transport for ScriptedTransport {
    fn content_length(&self) -> usize {
        self.content_length
    }

    fn receive(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        self.receives += 1;
        match self.steps.pop_front() {
            None => Ok(0),
            Some(Step::Timeout) => Err(TransportError::Timeout),
            Some(Step::Error(e)) => Err(TransportError::Io(e)),
            Some(Step::Data(mut data)) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                if n < data.len() {
                    // Transport framing is independent of the reader's buffer.
                    self.steps.push_front(Step::Data(data.split_off(n)));
                }
                Ok(n)
            }
        }
    }

    fn send_response(
        &mut self,
        status: u16,
        content_type: &str,
        body: &[u8],
    ) -> Result<(), TransportError> {
        self.responses.push(SentResponse {
            status,
            content_type: content_type.to_string(),
            body: body.to_vec(),
        });
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Start,
    Progress(usize, usize),
    Complete,
    Fail(String),
}

/// Observer that records every hook invocation in order.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<Event>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.events().iter().filter(|e| pred(e)).count()
    }

    pub fn failures(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Fail(reason) => Some(reason),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: Event) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

impl OtaObserver for RecordingObserver {
    fn on_start(&self) {
        self.push(Event::Start);
    }

    fn on_progress(&self, received: usize, total: usize) {
        self.push(Event::Progress(received, total));
    }

    fn on_complete(&self) {
        self.push(Event::Complete);
    }

    fn on_fail(&self, reason: &str) {
        self.push(Event::Fail(reason.to_string()));
    }
}

/// Restarter that records requested delays instead of restarting.
#[derive(Debug, Default)]
pub struct RecordingRestarter {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingRestarter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn restarts(&self) -> Vec<Duration> {
        self.delays.lock().map(|d| d.clone()).unwrap_or_default()
    }
}

impl Restarter for RecordingRestarter {
    fn restart_after(&self, delay: Duration) {
        if let Ok(mut delays) = self.delays.lock() {
            delays.push(delay);
        }
    }
}
