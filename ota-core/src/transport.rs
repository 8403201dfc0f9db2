//! Byte-stream transport consumed by the handler, and the retrying receiver

use std::time::{Duration, Instant};

use log::{error, warn};

use crate::config::ReceivePolicy;
use crate::error::{OtaError, TransportError};

/// One inbound request as seen by the OTA handler.
pub trait Transport {
    /// Declared total payload size, known before the first receive.
    fn content_length(&self) -> usize;

    /// Blocking receive of at most `buf.len()` bytes.
    ///
    /// `Ok(0)` means the peer closed the connection.
    fn receive(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Send the single terminal response of the request.
    fn send_response(
        &mut self,
        status: u16,
        content_type: &str,
        body: &[u8],
    ) -> Result<(), TransportError>;
}

/// Wraps a transport and reissues timed-out receives within `policy`.
pub struct Receiver<'t, T: Transport + ?Sized> {
    transport: &'t mut T,
    policy: ReceivePolicy,
    started: Instant,
    timeouts: u32,
}

impl<'t, T: Transport + ?Sized> Receiver<'t, T> {
    pub fn new(transport: &'t mut T, policy: &ReceivePolicy) -> Self {
        Self { transport, policy: policy.clone(), started: Instant::now(), timeouts: 0 }
    }

    /// Total timeouts seen so far.
    pub fn timeouts(&self) -> u32 {
        self.timeouts
    }

    /// Receive at least one byte into `buf`.
    pub fn receive(&mut self, buf: &mut [u8]) -> Result<usize, OtaError> {
        let mut consecutive = 0u32;
        loop {
            if let Some(limit) = self.past_deadline() {
                error!("Transfer deadline of {:?} exceeded", limit);
                return Err(OtaError::ReceiveTimeout { retries: consecutive.saturating_sub(1) });
            }
            match self.transport.receive(buf) {
                Ok(0) => {
                    error!("Connection closed prematurely");
                    return Err(OtaError::Transport(TransportError::Closed));
                }
                Ok(n) => return Ok(n.min(buf.len())),
                Err(TransportError::Timeout) => {
                    consecutive += 1;
                    self.timeouts += 1;
                    if consecutive > self.policy.max_timeout_retries {
                        error!("Receive timed out {} times in a row, giving up", consecutive);
                        return Err(OtaError::ReceiveTimeout { retries: consecutive - 1 });
                    }
                    warn!("Receive timeout, retrying...");
                }
                Err(e) => {
                    error!("Receive error: {}", e);
                    return Err(OtaError::Transport(e));
                }
            }
        }
    }

    /// The overall deadline, once it has passed. Checked before every
    /// receive so a slow trickle cannot outlast it.
    fn past_deadline(&self) -> Option<Duration> {
        self.policy.transfer_timeout().filter(|limit| self.started.elapsed() >= *limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedTransport, Step};

    fn policy(retries: u32, deadline: Option<u64>) -> ReceivePolicy {
        ReceivePolicy { max_timeout_retries: retries, transfer_timeout_secs: deadline }
    }

    #[test]
    fn timeouts_are_retried() {
        let mut t = ScriptedTransport::new(
            4,
            vec![Step::Timeout, Step::Timeout, Step::Data(vec![1, 2, 3, 4])],
        );
        let mut rx = Receiver::new(&mut t, &policy(5, None));
        let mut buf = [0u8; 8];
        assert_eq!(rx.receive(&mut buf), Ok(4));
        assert_eq!(rx.timeouts(), 2);
    }

    #[test]
    fn retry_budget_is_bounded() {
        let mut t = ScriptedTransport::new(4, vec![Step::Timeout; 4]);
        let mut rx = Receiver::new(&mut t, &policy(3, None));
        let mut buf = [0u8; 8];
        assert_eq!(rx.receive(&mut buf), Err(OtaError::ReceiveTimeout { retries: 3 }));
    }

    #[test]
    fn deadline_stops_retries() {
        let mut t = ScriptedTransport::new(4, vec![Step::Timeout, Step::Data(vec![1])]);
        let mut rx = Receiver::new(&mut t, &policy(100, Some(0)));
        let mut buf = [0u8; 8];
        assert!(matches!(rx.receive(&mut buf), Err(OtaError::ReceiveTimeout { .. })));
    }

    #[test]
    fn deadline_applies_while_data_keeps_arriving() {
        let mut t = ScriptedTransport::new(4, vec![Step::Data(vec![1, 2]), Step::Data(vec![3, 4])]);
        let mut rx = Receiver::new(&mut t, &policy(100, Some(0)));
        let mut buf = [0u8; 8];
        assert_eq!(rx.receive(&mut buf), Err(OtaError::ReceiveTimeout { retries: 0 }));
        assert_eq!(rx.timeouts(), 0);
    }

    #[test]
    fn zero_read_is_premature_close() {
        let mut t = ScriptedTransport::new(4, vec![]);
        let mut rx = Receiver::new(&mut t, &policy(3, None));
        let mut buf = [0u8; 8];
        assert_eq!(rx.receive(&mut buf), Err(OtaError::Transport(TransportError::Closed)));
    }

    #[test]
    fn socket_errors_are_fatal() {
        let mut t = ScriptedTransport::new(4, vec![Step::Error("reset".into()), Step::Data(vec![1])]);
        let mut rx = Receiver::new(&mut t, &policy(3, None));
        let mut buf = [0u8; 8];
        assert_eq!(
            rx.receive(&mut buf),
            Err(OtaError::Transport(TransportError::Io("reset".into())))
        );
    }
}
