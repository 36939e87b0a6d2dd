// SPDX-License-Identifier: Apache-2.0

//! TI mmWave demo output format parser.
//!
//! The radar firmware streams frames over the data UART:
//!
//! ```text
//! [magic word: 8 bytes]
//! [frame header: 28 or 32 bytes, little-endian]
//! [numTLVs x { u32 type, u32 length, payload }]
//! ```
//!
//! The 28-byte header variant (no subFrameNumber) is used by xWR1443 devices
//! and firmware older than SDK 1.1; everything else uses 32 bytes.
//!
//! Only the detected-objects TLV (type 1) is decoded into points; range
//! profile, noise profile, heat maps and statistics are recognized and
//! skipped. Detected objects arrive in Q-format sensor coordinates and are
//! converted here to meters, remapped to the consumer axes (X forward,
//! Y left, Z up) and filtered against the configured elevation and azimuth
//! limits.

use crate::{
    config::RadarConfig,
    radar::{Error, RadarPoint, RadarScan, timestamp},
};
use tracing::{debug, trace, warn};

/// Frame synchronization prefix emitted before every frame.
pub const MAGIC_WORD: [u8; 8] = [0x02, 0x01, 0x04, 0x03, 0x06, 0x05, 0x08, 0x07];

/// Platform identifier for xWR1443 devices (low 16 bits of the header
/// platform field), which emit the short header.
const PLATFORM_XWR1443: u32 = 0x1443;

/// TLV payload kinds defined by the demo firmware.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TlvType {
    /// Padding entry, no payload
    #[default]
    Null,
    /// Detected objects (the only kind decoded into points)
    DetectedPoints,
    /// Range profile, skipped
    RangeProfile,
    /// Noise floor profile, skipped
    NoiseProfile,
    /// Azimuth static heat map, skipped
    AzimuthHeatMap,
    /// Range/Doppler heat map, skipped
    RangeDopplerHeatMap,
    /// Processing statistics, skipped
    Stats,
    /// Anything else; resets the sorter to the frame header
    Unknown(u32),
}

impl From<u32> for TlvType {
    fn from(value: u32) -> Self {
        match value {
            0 => TlvType::Null,
            1 => TlvType::DetectedPoints,
            2 => TlvType::RangeProfile,
            3 => TlvType::NoiseProfile,
            4 => TlvType::AzimuthHeatMap,
            5 => TlvType::RangeDopplerHeatMap,
            6 => TlvType::Stats,
            other => TlvType::Unknown(other),
        }
    }
}

/// Frame header fields, little-endian on the wire.
#[derive(Clone, Copy, Debug, Default)]
pub struct FrameHeader {
    pub version: u32,
    pub total_packet_len: u32,
    pub platform: u32,
    pub frame_number: u32,
    pub time_cpu_cycles: u32,
    pub num_detected_obj: u32,
    pub num_tlvs: u32,
    /// Absent on xWR1443 and firmware older than SDK 1.1.
    pub sub_frame_number: Option<u32>,
}

/// Expected header size in bytes for the given version and platform words.
///
/// SDK major and minor versions live in bits 24..31 and 16..23 of `version`.
pub fn header_size(version: u32, platform: u32) -> usize {
    let sdk_major = (version >> 24) & 0xFF;
    let sdk_minor = (version >> 16) & 0xFF;
    if sdk_major < 1 || sdk_minor < 1 || (platform & 0xFFFF) == PLATFORM_XWR1443 {
        28
    } else {
        32
    }
}

/// Bounds-checked little-endian reader over a frame buffer.
struct ByteCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], Error> {
        if self.remaining() < n {
            return Err(Error::UnexpectedEnd(self.pos));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn skip(&mut self, n: usize) -> Result<(), Error> {
        self.take(n).map(|_| ())
    }

    fn u16(&mut self) -> Result<u16, Error> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn i16(&mut self) -> Result<i16, Error> {
        let b = self.take(2)?;
        Ok(i16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, Error> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }
}

/// Sorter states; one frame is processed per pass from `ReadHeader` to
/// `SwapBuffers`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SorterState {
    ReadHeader,
    CheckTlvType,
    ReadObjStruct,
    ReadLogMagRange,
    ReadNoise,
    ReadAzimuth,
    ReadDoppler,
    ReadStats,
    SwapBuffers,
}

/// TLV state machine over completed frame buffers.
///
/// One instance lives on the sorter thread. [`FrameSorter::sort_frame`] runs
/// the machine over a single drained buffer and returns the scans to publish;
/// the buffer-swap handshake itself belongs to the pipeline.
pub struct FrameSorter {
    config: RadarConfig,
    header: FrameHeader,
    tlv_count: u32,
    tlv_type: TlvType,
    tlv_len: u32,
}

impl FrameSorter {
    pub fn new(config: RadarConfig) -> Self {
        Self {
            config,
            header: FrameHeader::default(),
            tlv_count: 0,
            tlv_type: TlvType::Null,
            tlv_len: 0,
        }
    }

    /// Sort one completed frame buffer into zero or more scans.
    ///
    /// The buffer holds the frame payload (leading magic word already
    /// consumed by the reader) plus the trailing magic word of the next
    /// frame. A frame whose `totalPacketLen` does not match the buffer is
    /// discarded without emitting anything; a truncated TLV discards the
    /// remainder of the frame but keeps scans from TLVs already completed.
    pub fn sort_frame(&mut self, buf: &[u8]) -> Vec<RadarScan> {
        self.tlv_count = 0;
        self.tlv_type = TlvType::Null;
        self.tlv_len = 0;

        let mut cursor = ByteCursor::new(buf);
        let mut scans = Vec::new();
        let mut state = SorterState::ReadHeader;

        while state != SorterState::SwapBuffers {
            let step = match state {
                SorterState::ReadHeader => self.read_header(&mut cursor),
                SorterState::CheckTlvType => self.check_tlv_type(&mut cursor),
                SorterState::ReadObjStruct => self.read_obj_struct(&mut cursor, &mut scans),
                SorterState::ReadLogMagRange
                | SorterState::ReadNoise
                | SorterState::ReadAzimuth
                | SorterState::ReadDoppler
                | SorterState::ReadStats => self.skip_tlv(&mut cursor),
                SorterState::SwapBuffers => unreachable!(),
            };

            state = match step {
                Ok(next) => next,
                Err(err) => {
                    debug!(frame = self.header.frame_number, "Discarding frame: {}", err);
                    SorterState::SwapBuffers
                }
            };
        }

        scans
    }

    fn read_header(&mut self, cursor: &mut ByteCursor) -> Result<SorterState, Error> {
        // The first three fields decide how large the header actually is.
        if cursor.remaining() < 12 {
            return Ok(SorterState::SwapBuffers);
        }

        let version = cursor.u32()?;
        let total_packet_len = cursor.u32()?;
        let platform = cursor.u32()?;

        let header_size = header_size(version, platform);
        if cursor.remaining() < header_size - 12 {
            return Ok(SorterState::SwapBuffers);
        }

        let frame_number = cursor.u32()?;
        let time_cpu_cycles = cursor.u32()?;
        let num_detected_obj = cursor.u32()?;
        let num_tlvs = cursor.u32()?;
        let sub_frame_number = if header_size == 32 {
            Some(cursor.u32()?)
        } else {
            None
        };

        self.header = FrameHeader {
            version,
            total_packet_len,
            platform,
            frame_number,
            time_cpu_cycles,
            num_detected_obj,
            num_tlvs,
            sub_frame_number,
        };

        // The buffer carries the payload plus the trailing magic word of the
        // next frame; a mismatch means bytes were lost at the port or the
        // stream is out of sync.
        if total_packet_len as usize != cursor.buf.len().saturating_sub(4) {
            trace!(
                total_packet_len,
                buffer_len = cursor.buf.len(),
                "Frame length mismatch"
            );
            return Ok(SorterState::SwapBuffers);
        }

        Ok(SorterState::CheckTlvType)
    }

    fn check_tlv_type(&mut self, cursor: &mut ByteCursor) -> Result<SorterState, Error> {
        if self.tlv_count >= self.header.num_tlvs {
            return Ok(SorterState::SwapBuffers);
        }
        self.tlv_count += 1;

        let raw_type = cursor.u32()?;
        self.tlv_type = TlvType::from(raw_type);
        self.tlv_len = cursor.u32()?;

        let next = match self.tlv_type {
            TlvType::Null => SorterState::CheckTlvType,
            TlvType::DetectedPoints => SorterState::ReadObjStruct,
            TlvType::RangeProfile => SorterState::ReadLogMagRange,
            TlvType::NoiseProfile => SorterState::ReadNoise,
            TlvType::AzimuthHeatMap => SorterState::ReadAzimuth,
            TlvType::RangeDopplerHeatMap => SorterState::ReadDoppler,
            TlvType::Stats => SorterState::ReadStats,
            TlvType::Unknown(value) => {
                warn!(tlv_type = value, "Unknown TLV type, resyncing on header");
                SorterState::ReadHeader
            }
        };

        Ok(next)
    }

    fn skip_tlv(&mut self, cursor: &mut ByteCursor) -> Result<SorterState, Error> {
        trace!(tlv_type = ?self.tlv_type, tlv_len = self.tlv_len, "Skipping TLV payload");
        cursor.skip(self.tlv_len as usize)?;
        Ok(SorterState::CheckTlvType)
    }

    fn read_obj_struct(
        &mut self,
        cursor: &mut ByteCursor,
        scans: &mut Vec<RadarScan>,
    ) -> Result<SorterState, Error> {
        let num_obj = cursor.u16()?;
        let xyz_q_format = cursor.u16()?;
        let scale = 2f32.powi(xyz_q_format as i32);

        let max_elevation_sq = angle_ratio(self.config.max_elevation_angle_deg).map(|r| r * r);
        let max_azimuth_ratio = angle_ratio(self.config.max_azimuth_angle_deg);

        let mut scan = RadarScan {
            frame_number: self.header.frame_number,
            timestamp_ns: timestamp().unwrap_or(0),
            num_detected: self.header.num_detected_obj,
            points: Vec::with_capacity(num_obj as usize),
        };

        for _ in 0..num_obj {
            let range_idx = cursor.i16()?;
            let doppler_idx = cursor.i16()?;
            let peak_val = cursor.i16()?;
            let x_q = cursor.i16()?;
            let y_q = cursor.i16()?;
            let z_q = cursor.i16()?;

            let range = range_idx as f32 * self.config.range_idx_to_meters;

            // Doppler indices above the midpoint are aliased negative
            // velocities.
            let mut doppler_bin = doppler_idx as i32;
            if doppler_bin > self.config.num_doppler_bins as i32 / 2 - 1 {
                doppler_bin -= self.config.num_doppler_bins as i32;
            }
            let doppler = doppler_bin as f32 * self.config.doppler_resolution_mps;

            let intensity = 10.0 * (peak_val as f32 + 1.0).log10();

            let x_m = x_q as f32 / scale;
            let y_m = y_q as f32 / scale;
            let z_m = z_q as f32 / scale;

            // Sensor Y is forward, sensor -X is left, sensor Z is up.
            let point = RadarPoint {
                x: y_m,
                y: -x_m,
                z: z_m,
                intensity,
                range,
                doppler,
            };

            if keep_point(&point, max_elevation_sq, max_azimuth_ratio) {
                scan.points.push(point);
            }
        }

        trace!(
            frame = scan.frame_number,
            detected = num_obj,
            kept = scan.len(),
            "Decoded detected objects"
        );
        scans.push(scan);

        Ok(SorterState::CheckTlvType)
    }
}

/// Tangent of the angle limit, or `None` when the limit disables the filter
/// (outside [0, 90) degrees).
fn angle_ratio(angle_deg: i32) -> Option<f32> {
    if (0..90).contains(&angle_deg) {
        Some((angle_deg as f32).to_radians().tan())
    } else {
        None
    }
}

/// Angle and validity filter, evaluated in consumer coordinates where X is
/// forward and Y is left.
fn keep_point(point: &RadarPoint, max_elevation_sq: Option<f32>, max_azimuth: Option<f32>) -> bool {
    if point.x == 0.0 {
        return false;
    }
    if let Some(limit) = max_elevation_sq
        && point.z * point.z / (point.x * point.x + point.y * point.y) >= limit
    {
        return false;
    }
    if let Some(limit) = max_azimuth
        && (point.y / point.x).abs() >= limit
    {
        return false;
    }
    true
}
