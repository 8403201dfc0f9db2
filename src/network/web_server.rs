use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Result};
use esp_idf_svc::http::server::EspHttpServer;
use esp_idf_svc::http::Method;
use esp_idf_svc::io::Write;
use ota_core::api::{self, OtaStatusReport, CONTENT_TYPE_JSON, HEALTH_BODY, NOT_FOUND_BODY};
use ota_core::{OtaConfig, OtaHandler, OtaObserver, PartitionTable};

use crate::network::http_config::create_http_config;
use crate::ota::{EspOtaBackend, EspRestarter, HttpTransport};

static RUNNING: AtomicBool = AtomicBool::new(false);

/// HTTP server exposing the OTA upload and query endpoints
pub struct OtaServer {
    server: Option<EspHttpServer<'static>>,
    handler: Arc<OtaHandler>,
}

impl OtaServer {
    /// Start the server. Only one instance may run at a time.
    pub fn start(config: OtaConfig, observer: Arc<dyn OtaObserver>) -> Result<Self> {
        if RUNNING.swap(true, Ordering::SeqCst) {
            bail!("OTA server already running");
        }
        Self::register(config, observer).inspect_err(|_| RUNNING.store(false, Ordering::SeqCst))
    }

    fn register(config: OtaConfig, observer: Arc<dyn OtaObserver>) -> Result<Self> {
        let handler = Arc::new(OtaHandler::new(config, observer)?);
        let port = handler.config().port;
        let mut server = EspHttpServer::new(&create_http_config(handler.config()))?;

        server.fn_handler("/health", Method::Get, |req| {
            let mut response = req.into_response(200, Some("OK"), &[("Content-Type", CONTENT_TYPE_JSON)])?;
            response.write_all(HEALTH_BODY.as_bytes())?;
            Ok::<(), anyhow::Error>(())
        })?;

        let idf_version = crate::version::idf_version();
        let version_body =
            api::version_json(&handler.config().firmware_version, idf_version.as_deref())?;
        server.fn_handler("/version", Method::Get, move |req| {
            let mut response = req.into_response(200, Some("OK"), &[("Content-Type", CONTENT_TYPE_JSON)])?;
            response.write_all(version_body.as_bytes())?;
            Ok::<(), anyhow::Error>(())
        })?;

        let ota = handler.clone();
        server.fn_handler("/ota", Method::Post, move |mut req| {
            // A missing header reads as an empty upload
            let content_length = req
                .header("Content-Length")
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(0);

            let mut transport = HttpTransport::new(req.connection(), content_length);
            let mut backend = EspOtaBackend::new();
            ota.handle(&mut backend, &mut transport, &EspRestarter);
            Ok::<(), anyhow::Error>(())
        })?;

        let slot = handler.slot().clone();
        server.fn_handler("/api/ota/status", Method::Get, move |req| {
            let backend = EspOtaBackend::new();
            let report =
                OtaStatusReport::new(slot.snapshot(), backend.running_label(), backend.update_label());
            let body = api::status_json(&report)?;
            let mut response = req.into_response(200, Some("OK"), &[("Content-Type", CONTENT_TYPE_JSON)])?;
            response.write_all(body.as_bytes())?;
            Ok::<(), anyhow::Error>(())
        })?;

        // Registered last so the routes above match first
        for method in [Method::Get, Method::Post] {
            server.fn_handler("/*", method, |req| {
                let mut response =
                    req.into_response(404, Some("Not Found"), &[("Content-Type", CONTENT_TYPE_JSON)])?;
                response.write_all(NOT_FOUND_BODY.as_bytes())?;
                Ok::<(), anyhow::Error>(())
            })?;
        }

        log::info!("OTA server started on port {}", port);
        Ok(Self { server: Some(server), handler })
    }

    pub fn is_running() -> bool {
        RUNNING.load(Ordering::SeqCst)
    }

    pub fn version(&self) -> &str {
        &self.handler.config().firmware_version
    }

    pub fn stop(&mut self) {
        if self.server.take().is_some() {
            RUNNING.store(false, Ordering::SeqCst);
            log::info!("OTA server stopped");
        }
    }
}

impl Drop for OtaServer {
    fn drop(&mut self) {
        self.stop();
    }
}
