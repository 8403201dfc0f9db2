//! Admission with two requests in flight

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use ota_core::image::ImageBuilder;
use ota_core::mem::InMemoryFlash;
use ota_core::testing::{RecordingObserver, RecordingRestarter, ScriptedTransport};
use ota_core::{OtaConfig, OtaError, OtaHandler, Outcome, SessionSlot, SessionState};

use crate::channel::channel;

fn wait_for(slot: &SessionSlot, what: impl Fn(&ota_core::SessionSnapshot) -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !what(&slot.snapshot()) {
        assert!(Instant::now() < deadline, "timed out waiting, last {:?}", slot.snapshot());
        thread::sleep(Duration::from_millis(2));
    }
}

#[test]
fn second_request_is_rejected_without_disturbing_the_first() {
    let observer = Arc::new(RecordingObserver::new());
    let ota = Arc::new(
        OtaHandler::new(OtaConfig::with_version("1.0.0"), observer.clone()).expect("config"),
    );
    let image = ImageBuilder::sized(12 * 1024, true).expect("image");
    let (feeder, mut transport) = channel(image.len());

    let first = {
        let ota = ota.clone();
        thread::spawn(move || {
            let mut flash = InMemoryFlash::dual_bank(64 * 1024);
            let outcome = ota.handle(&mut flash, &mut transport, &RecordingRestarter::new());
            (outcome, flash)
        })
    };

    assert!(feeder.send(&image[..4096]));
    wait_for(ota.slot(), |s| s.state == SessionState::Writing && s.bytes_received == 4096);

    // A concurrent request fails at admission, before reading anything.
    let mut other_flash = InMemoryFlash::dual_bank(64 * 1024);
    let mut other = ScriptedTransport::chunked(&image, 4096);
    let outcome = ota.handle(&mut other_flash, &mut other, &RecordingRestarter::new());
    assert_eq!(outcome, Outcome::Rejected(OtaError::Busy));
    assert_eq!(other.response().map(|r| r.status), Some(409));
    assert_eq!(other.receives(), 0);
    assert_eq!(other_flash.stats().begins, 0);

    let snapshot = ota.slot().snapshot();
    assert_eq!(snapshot.state, SessionState::Writing);
    assert_eq!(snapshot.bytes_received, 4096);
    assert!(observer.failures().is_empty());

    assert!(feeder.send(&image[4096..]));
    let (outcome, flash) = first.join().expect("session thread");
    assert!(outcome.is_committed(), "{outcome:?}");
    assert_eq!(flash.contents("ota_1"), Some(image.as_slice()));
    assert_eq!(feeder.responses().len(), 1);
    assert_eq!(feeder.responses()[0].status, 200);
    assert!(!ota.slot().is_active());
}

#[test]
fn dropped_connection_mid_session_frees_the_slot() {
    let ota = Arc::new(OtaHandler::without_observer(OtaConfig::with_version("1.0.0")).expect("config"));
    let image = ImageBuilder::sized(12 * 1024, true).expect("image");
    let (feeder, mut transport) = channel(image.len());

    let session = {
        let ota = ota.clone();
        thread::spawn(move || {
            let mut flash = InMemoryFlash::dual_bank(64 * 1024);
            let outcome = ota.handle(&mut flash, &mut transport, &RecordingRestarter::new());
            (outcome, flash.open_handles())
        })
    };

    assert!(feeder.send(&image[..4096]));
    wait_for(ota.slot(), |s| s.bytes_received == 4096);
    drop(feeder);

    let (outcome, open_handles) = session.join().expect("session thread");
    assert!(matches!(outcome, Outcome::Rejected(OtaError::Transport(_))));
    assert_eq!(open_handles, 0);
    assert_eq!(ota.slot().snapshot().state, SessionState::Aborted);
    assert!(ota.slot().try_admit(1024).is_ok());
}
