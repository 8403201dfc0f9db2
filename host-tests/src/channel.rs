//! A transport fed from another thread, for tests that need a session to
//! stay open while something else happens.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};

use ota_core::testing::{SentResponse, Step};
use ota_core::{Transport, TransportError};

/// Receiving end handed to the handler. Blocks until the feeder sends a step;
/// a dropped feeder reads as a closed connection.
pub struct ChannelTransport {
    content_length: usize,
    steps: Receiver<Step>,
    pending: Vec<u8>,
    responses: Arc<Mutex<Vec<SentResponse>>>,
}

/// Sending end kept by the test.
pub struct Feeder {
    steps: Sender<Step>,
    responses: Arc<Mutex<Vec<SentResponse>>>,
}

pub fn channel(content_length: usize) -> (Feeder, ChannelTransport) {
    let (tx, rx) = mpsc::channel();
    let responses = Arc::new(Mutex::new(Vec::new()));
    (
        Feeder { steps: tx, responses: responses.clone() },
        ChannelTransport { content_length, steps: rx, pending: Vec::new(), responses },
    )
}

impl Feeder {
    /// Queue `data` as one frame. Returns false once the transport is gone.
    pub fn send(&self, data: &[u8]) -> bool {
        self.steps.send(Step::Data(data.to_vec())).is_ok()
    }

    pub fn send_step(&self, step: Step) -> bool {
        self.steps.send(step).is_ok()
    }

    pub fn responses(&self) -> Vec<SentResponse> {
        self.responses.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl Transport for ChannelTransport {
    fn content_length(&self) -> usize {
        self.content_length
    }

    fn receive(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        if self.pending.is_empty() {
            match self.steps.recv() {
                Ok(Step::Data(data)) => self.pending = data,
                Ok(Step::Timeout) => return Err(TransportError::Timeout),
                Ok(Step::Error(e)) => return Err(TransportError::Io(e)),
                Err(_) => return Ok(0),
            }
        }
        let n = self.pending.len().min(buf.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(n)
    }

    fn send_response(
        &mut self,
        status: u16,
        content_type: &str,
        body: &[u8],
    ) -> Result<(), TransportError> {
        let mut responses = self
            .responses
            .lock()
            .map_err(|_| TransportError::Io("response log poisoned".into()))?;
        responses.push(SentResponse {
            status,
            content_type: content_type.to_string(),
            body: body.to_vec(),
        });
        Ok(())
    }
}
