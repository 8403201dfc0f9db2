//! End-to-end request scenarios against the in-memory flash

use std::sync::Arc;

use ota_core::api::{CONTENT_TYPE_JSON, CONTENT_TYPE_TEXT, SUCCESS_BODY};
use ota_core::image::{ImageBuilder, ESP_IMAGE_HEADER_MAGIC};
use ota_core::mem::InMemoryFlash;
use ota_core::testing::{Event, RecordingObserver, RecordingRestarter, ScriptedTransport, Step};
use ota_core::{OtaConfig, OtaError, OtaHandler, Outcome, PartitionTable, SessionState};

const PARTITION_SIZE: usize = 64 * 1024;
const KB: usize = 1024;

struct Rig {
    ota: OtaHandler,
    observer: Arc<RecordingObserver>,
    restarter: RecordingRestarter,
}

impl Rig {
    fn new() -> Self {
        let observer = Arc::new(RecordingObserver::new());
        let ota = OtaHandler::new(OtaConfig::with_version("2.1.0"), observer.clone())
            .expect("default config is valid");
        Self { ota, observer, restarter: RecordingRestarter::new() }
    }

    fn run(&self, flash: &mut InMemoryFlash, transport: &mut ScriptedTransport) -> Outcome {
        self.ota.handle(flash, transport, &self.restarter)
    }
}

fn assert_response(transport: &ScriptedTransport, status: u16, body: &str) {
    let response = transport.response().expect("exactly one terminal response");
    assert_eq!(response.status, status);
    assert_eq!(response.body_str(), body);
}

#[test]
fn ten_kb_image_in_4kb_chunks_commits_and_restarts() {
    let rig = Rig::new();
    let image = ImageBuilder::sized(10 * KB, true).expect("image");
    let mut flash = InMemoryFlash::dual_bank(PARTITION_SIZE);
    let mut transport = ScriptedTransport::chunked(&image, 4 * KB);

    let outcome = rig.run(&mut flash, &mut transport);

    assert!(outcome.is_committed(), "{outcome:?}");
    let response = transport.response().expect("one response");
    assert_eq!(response.status, 200);
    assert_eq!(response.content_type, CONTENT_TYPE_JSON);
    assert_eq!(response.body_str(), SUCCESS_BODY);
    assert_eq!(flash.contents("ota_1"), Some(image.as_slice()));
    assert_eq!(rig.restarter.restarts().len(), 1);
    assert_eq!(rig.observer.count(|e| *e == Event::Complete), 1);
    assert_eq!(rig.ota.slot().snapshot().state, SessionState::Committed);
}

#[test]
fn zero_length_body_is_empty_firmware() {
    let rig = Rig::new();
    let mut flash = InMemoryFlash::dual_bank(PARTITION_SIZE);
    let mut transport = ScriptedTransport::new(0, vec![]);

    let outcome = rig.run(&mut flash, &mut transport);

    assert_eq!(outcome, Outcome::Rejected(OtaError::EmptyPayload));
    assert_response(&transport, 400, "Empty firmware");
    assert_eq!(transport.receives(), 0);
    assert_eq!(flash.stats().begins, 0);
}

#[test]
fn hundred_byte_body_is_too_small() {
    let rig = Rig::new();
    let mut flash = InMemoryFlash::dual_bank(PARTITION_SIZE);
    let mut transport = ScriptedTransport::chunked(&[ESP_IMAGE_HEADER_MAGIC; 100], 100);

    rig.run(&mut flash, &mut transport);

    assert_response(&transport, 400, "Firmware too small");
    assert_eq!(transport.response().map(|r| r.content_type.as_str()), Some(CONTENT_TYPE_TEXT));
}

#[test]
fn length_boundary_at_256_bytes() {
    let rig = Rig::new();
    let mut flash = InMemoryFlash::dual_bank(PARTITION_SIZE).without_image_checks();
    let mut transport = ScriptedTransport::declared(255, &[ESP_IMAGE_HEADER_MAGIC; 255], 255);
    assert_eq!(
        rig.run(&mut flash, &mut transport),
        Outcome::Rejected(OtaError::TooSmall { size: 255, min: 256 })
    );

    let image = ImageBuilder::sized(256, true).expect("image");
    let mut flash = InMemoryFlash::dual_bank(PARTITION_SIZE);
    let mut transport = ScriptedTransport::chunked(&image, 4 * KB);
    assert!(rig.run(&mut flash, &mut transport).is_committed());
}

#[test]
fn body_larger_than_partition_is_rejected_before_writing() {
    let rig = Rig::new();
    let image = ImageBuilder::sized(10 * KB, true).expect("image");
    let mut flash = InMemoryFlash::dual_bank(8 * KB);
    let mut transport = ScriptedTransport::chunked(&image, 4 * KB);

    let outcome = rig.run(&mut flash, &mut transport);

    assert!(matches!(outcome, Outcome::Rejected(OtaError::TooLarge { .. })));
    assert_response(&transport, 400, "Firmware too large for partition");
    assert_eq!(transport.receives(), 0);
    assert_eq!(flash.stats().begins, 0);
}

#[test]
fn corrupted_magic_never_opens_a_write_handle() {
    let rig = Rig::new();
    let mut body = ImageBuilder::sized(304, true).expect("image");
    body.truncate(300);
    body[..4].copy_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);
    let mut flash = InMemoryFlash::dual_bank(PARTITION_SIZE);
    let mut transport = ScriptedTransport::chunked(&body, 4 * KB);

    let outcome = rig.run(&mut flash, &mut transport);

    assert!(matches!(outcome, Outcome::Rejected(OtaError::InvalidFormat(_))));
    assert_response(&transport, 400, "Invalid firmware format");
    assert_eq!(flash.stats().begins, 0);
    assert_eq!(flash.stats().bytes_written, 0);
    assert_eq!(rig.observer.count(|e| *e == Event::Start), 0);
    assert_eq!(rig.observer.failures().len(), 1);
}

#[test]
fn write_failure_on_third_of_five_chunks_releases_handle() {
    let rig = Rig::new();
    let image = ImageBuilder::sized(20 * KB, true).expect("image");
    let mut flash = InMemoryFlash::dual_bank(PARTITION_SIZE).fail_write_on_call(3);
    let mut transport = ScriptedTransport::chunked(&image, 4 * KB);

    let outcome = rig.run(&mut flash, &mut transport);

    assert!(matches!(outcome, Outcome::Rejected(OtaError::FlashWriteFailed { offset: 8192, .. })));
    assert_response(&transport, 500, "Flash write failed");
    assert_eq!(flash.open_handles(), 0);
    assert_eq!(flash.stats().aborts, 1);
    let failures = rig.observer.failures();
    assert_eq!(failures.len(), 1);
    assert!(!failures[0].is_empty());
    assert!(rig.restarter.restarts().is_empty());
    assert_eq!(rig.ota.slot().snapshot().state, SessionState::Failed);

    // The slot and the flash are free for the next attempt.
    assert!(!rig.ota.slot().is_active());
    let mut flash = InMemoryFlash::dual_bank(PARTITION_SIZE);
    let mut transport = ScriptedTransport::chunked(&image, 4 * KB);
    assert!(rig.run(&mut flash, &mut transport).is_committed());
}

#[test]
fn no_inactive_partition_is_500() {
    let rig = Rig::new();
    let image = ImageBuilder::sized(1024, true).expect("image");
    let mut flash = InMemoryFlash::single_bank(PARTITION_SIZE);
    let mut transport = ScriptedTransport::chunked(&image, 4 * KB);

    rig.run(&mut flash, &mut transport);

    assert_response(&transport, 500, "No OTA partition");
}

#[test]
fn corrupt_body_fails_whole_image_validation() {
    let rig = Rig::new();
    let mut image = ImageBuilder::sized(8 * KB, true).expect("image");
    image[5000] ^= 0x5a;
    let mut flash = InMemoryFlash::dual_bank(PARTITION_SIZE);
    let mut transport = ScriptedTransport::chunked(&image, 4 * KB);

    rig.run(&mut flash, &mut transport);

    assert_response(&transport, 400, "Firmware validation failed");
    assert_eq!(flash.boot_label().as_deref(), Some("ota_0"));
    assert_eq!(flash.open_handles(), 0);
}

#[test]
fn boot_switch_failure_leaves_valid_inactive_image() {
    let rig = Rig::new();
    let image = ImageBuilder::sized(4 * KB, true).expect("image");
    let mut flash = InMemoryFlash::dual_bank(PARTITION_SIZE).fail_set_boot();
    let mut transport = ScriptedTransport::chunked(&image, 4 * KB);

    rig.run(&mut flash, &mut transport);

    assert_response(&transport, 500, "Set boot partition failed");
    assert!(flash.has_valid_image("ota_1"));
    assert_eq!(flash.boot_label().as_deref(), Some("ota_0"));
    assert!(rig.restarter.restarts().is_empty());
    assert_eq!(rig.ota.slot().snapshot().state, SessionState::Failed);
}

#[test]
fn commit_points_boot_at_previously_inactive_partition() {
    let rig = Rig::new();
    let image = ImageBuilder::sized(6 * KB, true).expect("image");
    let mut flash = InMemoryFlash::dual_bank(PARTITION_SIZE);
    let inactive = flash.select_target().expect("target");
    let mut transport = ScriptedTransport::chunked(&image, 1500);

    let outcome = rig.run(&mut flash, &mut transport);

    assert_eq!(outcome, Outcome::Committed { partition: inactive.clone() });
    assert_eq!(flash.boot_label(), Some(inactive.label.clone()));
    flash.reboot();
    assert_eq!(flash.running_label(), Some(inactive.label));
    // After the restart the other bank becomes the update target.
    assert_eq!(flash.select_target().expect("target").label.as_str(), "ota_0");
}

#[test]
fn timeouts_mid_transfer_are_retried() {
    let rig = Rig::new();
    let image = ImageBuilder::sized(8 * KB, true).expect("image");
    let mut flash = InMemoryFlash::dual_bank(PARTITION_SIZE);
    let mut transport = ScriptedTransport::new(
        image.len(),
        vec![
            Step::Data(image[..4 * KB].to_vec()),
            Step::Timeout,
            Step::Timeout,
            Step::Data(image[4 * KB..].to_vec()),
        ],
    );

    assert!(rig.run(&mut flash, &mut transport).is_committed());
}

#[test]
fn stalled_connection_gives_up_with_408() {
    let rig = Rig::new();
    let image = ImageBuilder::sized(8 * KB, true).expect("image");
    let retries = rig.ota.config().receive.max_timeout_retries as usize;
    let mut steps = vec![Step::Data(image[..4 * KB].to_vec())];
    steps.extend(std::iter::repeat(Step::Timeout).take(retries + 1));
    let mut flash = InMemoryFlash::dual_bank(PARTITION_SIZE);
    let mut transport = ScriptedTransport::new(image.len(), steps);

    rig.run(&mut flash, &mut transport);

    assert_response(&transport, 408, "Receive timeout");
    assert_eq!(rig.ota.slot().snapshot().state, SessionState::Aborted);
    assert_eq!(flash.open_handles(), 0);
}

#[test]
fn progress_is_observed_at_least_every_64kb() {
    let rig = Rig::new();
    let image = ImageBuilder::sized(200 * KB, true).expect("image");
    let mut flash = InMemoryFlash::dual_bank(256 * KB);
    let mut transport = ScriptedTransport::chunked(&image, 1460);

    assert!(rig.run(&mut flash, &mut transport).is_committed());

    let mut last = 0;
    for event in rig.observer.events() {
        if let Event::Progress(received, total) = event {
            assert_eq!(total, image.len());
            assert!(received - last <= 64 * KB);
            last = received;
        }
    }
    assert_eq!(last, image.len());
}

mod properties {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn bytes_received_matches_declared_length(
            blocks in 16usize..400,
            frame in 1usize..5000,
        ) {
            let rig = Rig::new();
            let image = ImageBuilder::sized(blocks * 16, true).expect("image");
            let mut flash = InMemoryFlash::dual_bank(PARTITION_SIZE);
            let mut transport = ScriptedTransport::chunked(&image, frame);

            let outcome = rig.run(&mut flash, &mut transport);

            prop_assert!(outcome.is_committed());
            let snapshot = rig.ota.slot().snapshot();
            prop_assert_eq!(snapshot.bytes_received, image.len());
            prop_assert_eq!(snapshot.progress, 100);
            prop_assert_eq!(flash.stats().bytes_written, image.len());
        }
    }
}
