//! Restart trigger

use std::time::Duration;

/// Restarts the device after a successful update.
///
/// Implementations wait `delay` so the final response can leave the socket,
/// then restart without draining any other work. On hardware this does not
/// return.
pub trait Restarter {
    fn restart_after(&self, delay: Duration);
}
