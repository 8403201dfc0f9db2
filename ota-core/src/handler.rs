//! The OTA request handler: admission, validation, streaming, commit

use std::sync::Arc;

use log::{error, info, warn};

use crate::api::{CONTENT_TYPE_JSON, CONTENT_TYPE_TEXT, SUCCESS_BODY};
use crate::config::{ConfigError, OtaConfig};
use crate::error::OtaError;
use crate::finalizer;
use crate::lifecycle::{NoopObserver, OtaObserver, ProgressLog};
use crate::partition::{PartitionDescriptor, PartitionTable};
use crate::restart::Restarter;
use crate::session::{SessionSlot, SessionState, UpdateSession};
use crate::transport::{Receiver, Transport};
use crate::validator::{self, HeaderCheck};
use crate::writer::{FlashWriter, StreamingWriter};

/// How a request ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The image was committed and a restart was requested.
    Committed { partition: PartitionDescriptor },
    Rejected(OtaError),
}

impl Outcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, Outcome::Committed { .. })
    }
}

/// Runs OTA sessions. Shared across request handlers; the admission slot
/// inside keeps sessions exclusive.
pub struct OtaHandler {
    config: OtaConfig,
    slot: SessionSlot,
    observer: Arc<dyn OtaObserver>,
}

impl OtaHandler {
    pub fn new(config: OtaConfig, observer: Arc<dyn OtaObserver>) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config, slot: SessionSlot::new(), observer })
    }

    pub fn without_observer(config: OtaConfig) -> Result<Self, ConfigError> {
        Self::new(config, Arc::new(NoopObserver))
    }

    pub fn config(&self) -> &OtaConfig {
        &self.config
    }

    pub fn slot(&self) -> &SessionSlot {
        &self.slot
    }

    /// Handle one upload: run the session, send exactly one response, and on
    /// success notify and restart. The session holds the admission slot until
    /// the restart has been requested.
    pub fn handle<B, T, R>(&self, backend: &mut B, transport: &mut T, restarter: &R) -> Outcome
    where
        B: PartitionTable + FlashWriter,
        T: Transport + ?Sized,
        R: Restarter + ?Sized,
    {
        let content_length = transport.content_length();
        info!("OTA request received, size: {} bytes", content_length);

        let mut session = match self.slot.try_admit(content_length) {
            Ok(session) => session,
            Err(err) => {
                send_error(transport, &err);
                return Outcome::Rejected(err);
            }
        };

        match self.drive(&mut session, backend, transport) {
            Ok(partition) => {
                info!("OTA successful! Preparing to reboot...");
                if let Err(e) = transport.send_response(200, CONTENT_TYPE_JSON, SUCCESS_BODY.as_bytes()) {
                    warn!("Failed to send OTA success response: {}", e);
                }
                self.observer.on_complete();
                restarter.restart_after(self.config.restart_delay());
                Outcome::Committed { partition }
            }
            Err(err) => {
                error!("OTA failed in state {}: {}", session.state().as_str(), err);
                session.terminate(&err);
                self.observer.on_fail(&err.to_string());
                send_error(transport, &err);
                Outcome::Rejected(err)
            }
        }
    }

    fn drive<B, T>(
        &self,
        session: &mut UpdateSession,
        backend: &mut B,
        transport: &mut T,
    ) -> Result<PartitionDescriptor, OtaError>
    where
        B: PartitionTable + FlashWriter,
        T: Transport + ?Sized,
    {
        let expected = session.bytes_expected();
        validator::validate_length(expected, self.config.min_firmware_size)?;

        let target = backend.select_target().inspect_err(|_| error!("No OTA partition found"))?;
        info!("Writing to partition: {}", target);
        if !target.fits(expected) {
            error!("Firmware too large: {} > {}", expected, target.capacity);
            return Err(OtaError::TooLarge { size: expected, capacity: target.capacity });
        }
        session.set_target(target.clone());

        let chunk_size = self.config.chunk_size;
        let mut buf = alloc_buffer(chunk_size)?;
        let mut rx = Receiver::new(transport, &self.config.receive);

        // Accumulate at least a full header before judging the format.
        let first_limit = expected.min(chunk_size);
        let mut filled = 0;
        let header = loop {
            match validator::validate_header(&buf[..filled])? {
                HeaderCheck::Valid(header) => break header,
                HeaderCheck::NeedMore(_) => {
                    filled += rx.receive(&mut buf[filled..first_limit])?;
                    if session.state() == SessionState::Idle {
                        session.advance(SessionState::Validating)?;
                    }
                }
            }
        };
        info!(
            "Image header ok: {} segment(s), entry 0x{:08x}",
            header.segment_count, header.entry_addr
        );

        self.observer.on_start();
        let mut writer = StreamingWriter::begin(backend, &target, expected)
            .inspect_err(|e| error!("{}", e))?;
        session.advance(SessionState::Writing)?;
        info!("OTA started, receiving firmware...");

        let mut progress = ProgressLog::new(self.config.progress_log_interval);
        let mut pending = filled;
        loop {
            let written = writer.write(&buf[..pending]).inspect_err(|e| error!("{}", e))?;
            session.record_progress(written)?;
            self.observer.on_progress(written, expected);
            progress.record(written, expected);

            if writer.remaining() == 0 {
                break;
            }
            let want = writer.remaining().min(chunk_size);
            pending = rx.receive(&mut buf[..want])?;
        }
        if rx.timeouts() > 0 {
            info!("Transfer finished after {} receive timeout(s)", rx.timeouts());
        }

        session.advance(SessionState::Finalizing)?;
        finalizer::finish(&mut writer)?;
        drop(writer);

        finalizer::commit(backend, &target)?;
        session.advance(SessionState::Committed)?;
        Ok(target)
    }
}

fn send_error<T: Transport + ?Sized>(transport: &mut T, err: &OtaError) {
    if let Err(e) = transport.send_response(err.status_code(), CONTENT_TYPE_TEXT, err.message().as_bytes()) {
        warn!("Failed to send OTA error response ({}): {}", err.status_code(), e);
    }
}

fn alloc_buffer(size: usize) -> Result<Vec<u8>, OtaError> {
    let mut buf = Vec::new();
    if buf.try_reserve_exact(size).is_err() {
        error!("Failed to allocate buffer");
        return Err(OtaError::OutOfMemory(size));
    }
    buf.resize(size, 0);
    Ok(buf)
}
