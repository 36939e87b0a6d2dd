// SPDX-License-Identifier: Apache-2.0

//! End-to-end tests driving the three-thread pipeline with scripted byte
//! streams, from raw UART bytes to emitted radar scans.

use mmwave_radarpub::{
    MAGIC_WORD, RadarConfig, RadarPipeline, RadarScan, RadarSource, TestSource,
    pipeline::Connector,
};
use std::time::Duration;

const SDK_2_1: u32 = 0x02010000;
const PLATFORM_1642: u32 = 0x1642;
const PLATFORM_1443: u32 = 0x1443;

const RECV_TIMEOUT: Duration = Duration::from_secs(2);

fn test_config() -> RadarConfig {
    RadarConfig {
        num_range_bins: 256,
        num_doppler_bins: 16,
        range_idx_to_meters: 0.05,
        doppler_resolution_mps: 0.13,
        max_elevation_angle_deg: 90,
        max_azimuth_angle_deg: 90,
    }
}

/// Build a detected-objects TLV payload from i16 records of
/// (rangeIdx, dopplerIdx, peakVal, x, y, z).
fn objects_payload(xyz_q_format: u16, objects: &[[i16; 6]]) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend((objects.len() as u16).to_le_bytes());
    payload.extend(xyz_q_format.to_le_bytes());
    for obj in objects {
        for word in obj {
            payload.extend(word.to_le_bytes());
        }
    }
    payload
}

/// Build one frame body (header + TLVs, without magic words) with a
/// totalPacketLen consistent with the reader leaving the next frame's magic
/// word in the buffer.
fn frame_body(
    version: u32,
    platform: u32,
    frame_number: u32,
    num_detected: u32,
    tlvs: &[(u32, Vec<u8>)],
) -> Vec<u8> {
    let short_header = {
        let sdk_major = (version >> 24) & 0xFF;
        let sdk_minor = (version >> 16) & 0xFF;
        sdk_major < 1 || sdk_minor < 1 || (platform & 0xFFFF) == 0x1443
    };
    let hdr_size = if short_header { 28 } else { 32 };
    let body_len = hdr_size + tlvs.iter().map(|(_, p)| 8 + p.len()).sum::<usize>();
    let total_packet_len = (body_len + 4) as u32;

    let mut body = Vec::with_capacity(body_len);
    body.extend(version.to_le_bytes());
    body.extend(total_packet_len.to_le_bytes());
    body.extend(platform.to_le_bytes());
    body.extend(frame_number.to_le_bytes());
    body.extend(0u32.to_le_bytes()); // timeCpuCycles
    body.extend(num_detected.to_le_bytes());
    body.extend((tlvs.len() as u32).to_le_bytes());
    if !short_header {
        body.extend(0u32.to_le_bytes()); // subFrameNumber
    }
    for (tlv_type, payload) in tlvs {
        body.extend(tlv_type.to_le_bytes());
        body.extend((payload.len() as u32).to_le_bytes());
        body.extend(payload);
    }
    body
}

/// Assemble the UART byte stream: every frame body is preceded by the magic
/// word, and a final magic word closes the last frame.
fn stream(prefix: &[u8], bodies: &[Vec<u8>]) -> Vec<u8> {
    let mut data = prefix.to_vec();
    data.extend(MAGIC_WORD);
    for body in bodies {
        data.extend(body);
        data.extend(MAGIC_WORD);
    }
    data
}

fn start(config: RadarConfig, data: Vec<u8>) -> (RadarPipeline, kanal::Receiver<RadarScan>) {
    let (tx, rx) = kanal::bounded(100);
    let connector: Connector =
        Box::new(move || Ok(Box::new(TestSource::new(data)) as Box<dyn RadarSource>));
    let pipeline = RadarPipeline::start(config, connector, tx).unwrap();
    (pipeline, rx)
}

fn single_point_body(frame_number: u32) -> Vec<u8> {
    // rangeIdx=10, dopplerIdx=0, peakVal=99, sensor (x=0, y=256, z=0) at Q8.
    let payload = objects_payload(8, &[[10, 0, 99, 0, 256, 0]]);
    frame_body(SDK_2_1, PLATFORM_1642, frame_number, 1, &[(1, payload)])
}

#[test]
fn test_single_point_end_to_end() {
    let (pipeline, rx) = start(test_config(), stream(&[], &[single_point_body(1)]));

    let scan = rx.recv_timeout(RECV_TIMEOUT).unwrap();
    assert_eq!(scan.frame_number, 1);
    assert_eq!(scan.num_detected, 1);
    assert_eq!(scan.len(), 1);

    let point = scan.points[0];
    assert!((point.x - 1.0).abs() < 1e-6);
    assert!(point.y.abs() < 1e-6);
    assert_eq!(point.z, 0.0);
    assert!((point.intensity - 20.0).abs() < 1e-5);
    assert!((point.range - 0.5).abs() < 1e-6);
    assert_eq!(point.doppler, 0.0);
    assert!(scan.timestamp_ns > 0);

    pipeline.join();
}

#[test]
fn test_resync_ignores_garbage_prefix() {
    // Invariant: prepending garbage before the first magic word yields the
    // same output as the frame alone.
    let garbage = vec![0xFFu8; 100];
    let (pipeline, rx) = start(test_config(), stream(&garbage, &[single_point_body(1)]));

    let scan = rx.recv_timeout(RECV_TIMEOUT).unwrap();
    assert_eq!(scan.frame_number, 1);
    assert_eq!(scan.len(), 1);
    assert!((scan.points[0].x - 1.0).abs() < 1e-6);

    pipeline.join();
}

#[test]
fn test_frames_emitted_in_order() {
    let bodies: Vec<_> = (1..=5).map(single_point_body).collect();
    let (pipeline, rx) = start(test_config(), stream(&[], &bodies));

    for expected in 1..=5 {
        let scan = rx.recv_timeout(RECV_TIMEOUT).unwrap();
        assert_eq!(scan.frame_number, expected);
    }

    pipeline.join();
}

#[test]
fn test_negative_doppler_fold() {
    let payload = objects_payload(8, &[[10, 10, 99, 0, 256, 0]]);
    let body = frame_body(SDK_2_1, PLATFORM_1642, 1, 1, &[(1, payload)]);
    let (pipeline, rx) = start(test_config(), stream(&[], &[body]));

    let scan = rx.recv_timeout(RECV_TIMEOUT).unwrap();
    // dopplerIdx=10 with 16 bins aliases to -6 bins.
    assert!((scan.points[0].doppler - (-6.0 * 0.13)).abs() < 1e-5);

    pipeline.join();
}

#[test]
fn test_azimuth_filter_end_to_end() {
    let mut config = test_config();
    config.max_azimuth_angle_deg = 45;

    // Consumer-frame (x=2, y=-1) passes the 45 degree limit; (x=2, y=-3)
    // does not.
    let payload = objects_payload(0, &[[10, 0, 99, 1, 2, 0], [10, 0, 99, 3, 2, 0]]);
    let body = frame_body(SDK_2_1, PLATFORM_1642, 1, 2, &[(1, payload)]);
    let (pipeline, rx) = start(config, stream(&[], &[body]));

    let scan = rx.recv_timeout(RECV_TIMEOUT).unwrap();
    assert_eq!(scan.num_detected, 2);
    assert_eq!(scan.len(), 1);
    assert!((scan.points[0].x - 2.0).abs() < 1e-6);

    pipeline.join();
}

#[test]
fn test_length_mismatch_discards_then_recovers() {
    // A frame whose totalPacketLen is off by one is discarded; the stream
    // stays framed and the following frame parses normally.
    let mut bad = single_point_body(1);
    let broken_len = u32::from_le_bytes([bad[4], bad[5], bad[6], bad[7]]) + 1;
    bad[4..8].copy_from_slice(&broken_len.to_le_bytes());

    let (pipeline, rx) = start(test_config(), stream(&[], &[bad, single_point_body(2)]));

    let scan = rx.recv_timeout(RECV_TIMEOUT).unwrap();
    assert_eq!(scan.frame_number, 2);
    assert!(rx.try_recv().unwrap().is_none());

    pipeline.join();
}

#[test]
fn test_platform_header_variants() {
    // The same payload must decode identically through the 28-byte xWR1443
    // header and the 32-byte xWR1642 header.
    let payload = objects_payload(8, &[[10, 0, 99, 0, 256, 0]]);
    let body_1443 = frame_body(SDK_2_1, PLATFORM_1443, 1, 1, &[(1, payload.clone())]);
    let body_1642 = frame_body(SDK_2_1, PLATFORM_1642, 2, 1, &[(1, payload)]);
    assert_eq!(body_1642.len(), body_1443.len() + 4);

    let (pipeline, rx) = start(test_config(), stream(&[], &[body_1443, body_1642]));

    let scan = rx.recv_timeout(RECV_TIMEOUT).unwrap();
    assert_eq!(scan.frame_number, 1);
    assert!((scan.points[0].x - 1.0).abs() < 1e-6);

    let scan = rx.recv_timeout(RECV_TIMEOUT).unwrap();
    assert_eq!(scan.frame_number, 2);
    assert!((scan.points[0].x - 1.0).abs() < 1e-6);

    pipeline.join();
}

#[test]
fn test_skipped_tlvs_between_frames() {
    // Range and noise profiles riding along with the objects TLV are
    // skipped without disturbing the frame cadence.
    let profile = vec![0x55u8; 128];
    let noise = vec![0xAAu8; 32];
    let payload = objects_payload(8, &[[10, 0, 99, 0, 256, 0]]);
    let body = frame_body(
        SDK_2_1,
        PLATFORM_1642,
        1,
        1,
        &[(2, profile), (3, noise), (1, payload)],
    );
    let (pipeline, rx) = start(test_config(), stream(&[], &[body]));

    let scan = rx.recv_timeout(RECV_TIMEOUT).unwrap();
    assert_eq!(scan.len(), 1);

    pipeline.join();
}

#[test]
fn test_null_tlv_frame_emits_nothing() {
    let body = frame_body(SDK_2_1, PLATFORM_1642, 1, 0, &[(0, Vec::new())]);
    let (pipeline, rx) = start(test_config(), stream(&[], &[body, single_point_body(2)]));

    // The null-TLV frame is acknowledged without a scan; the next frame
    // proves the pipeline kept running.
    let scan = rx.recv_timeout(RECV_TIMEOUT).unwrap();
    assert_eq!(scan.frame_number, 2);

    pipeline.join();
}

#[test]
fn test_many_frames_stress() {
    // Push enough frames through that the reader and sorter interleave in
    // every combination the double buffer allows; every frame must come out
    // exactly once, in order, with its own payload.
    let bodies: Vec<_> = (1..=50)
        .map(|n| {
            let payload = objects_payload(8, &[[n as i16, 0, 99, 0, 256, 0]]);
            frame_body(SDK_2_1, PLATFORM_1642, n, 1, &[(1, payload)])
        })
        .collect();
    let (pipeline, rx) = start(test_config(), stream(&[], &bodies));

    for expected in 1..=50u32 {
        let scan = rx.recv_timeout(RECV_TIMEOUT).unwrap();
        assert_eq!(scan.frame_number, expected);
        assert_eq!(scan.len(), 1);
        assert!((scan.points[0].range - expected as f32 * 0.05).abs() < 1e-4);
    }

    pipeline.join();
}

#[test]
fn test_shutdown_is_prompt() {
    // Shutdown must interrupt a reader that is mid-frame with no more bytes
    // coming.
    let mut data = stream(&[], &[]);
    data.extend([0x42u8; 24]);
    let (pipeline, rx) = start(test_config(), data);

    std::thread::sleep(Duration::from_millis(50));
    pipeline.request_stop();
    pipeline.join();

    // Channel is closed once the sorter thread exits.
    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
}
