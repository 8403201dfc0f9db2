// HTTP request body as an ota-core transport

use esp_idf_svc::http::server::EspHttpConnection;
use esp_idf_svc::io::{EspIOError, Write};
use esp_idf_sys::HTTPD_SOCK_ERR_TIMEOUT;
use ota_core::{Transport, TransportError};

pub struct HttpTransport<'a, 'c> {
    conn: &'a mut EspHttpConnection<'c>,
    content_length: usize,
}

impl<'a, 'c> HttpTransport<'a, 'c> {
    /// `content_length` is the parsed `Content-Length` header, 0 when absent.
    pub fn new(conn: &'a mut EspHttpConnection<'c>, content_length: usize) -> Self {
        Self { conn, content_length }
    }
}

fn io_error(e: EspIOError) -> TransportError {
    TransportError::Io(e.to_string())
}

impl Transport for HttpTransport<'_, '_> {
    fn content_length(&self) -> usize {
        self.content_length
    }

    fn receive(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        match self.conn.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.code() == HTTPD_SOCK_ERR_TIMEOUT as i32 => Err(TransportError::Timeout),
            Err(e) => Err(io_error(EspIOError(e))),
        }
    }

    fn send_response(
        &mut self,
        status: u16,
        content_type: &str,
        body: &[u8],
    ) -> Result<(), TransportError> {
        self.conn
            .initiate_response(status, None, &[("Content-Type", content_type)])
            .map_err(|e| io_error(EspIOError(e)))?;
        self.conn.write_all(body).map_err(io_error)
    }
}
