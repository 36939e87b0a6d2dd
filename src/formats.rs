// SPDX-License-Identifier: Apache-2.0

//! Point cloud formatting for ROS PointCloud2 messages.
//!
//! Radar scans are packed into a 24-byte-per-point layout:
//!
//! ```text
//! ┌───────┬───────┬───────┬───────────────┬───────────┬─────────────┐
//! │ x:f32 │ y:f32 │ z:f32 │ intensity:f32 │ range:f32 │ doppler:f32 │
//! │ 4B    │ 4B    │ 4B    │ 4B            │ 4B        │ 4B          │
//! └───────┴───────┴───────┴───────────────┴───────────┴─────────────┘
//! ```

use crate::radar::RadarScan;
use edgefirst_schemas::sensor_msgs::PointFieldView;

/// Bytes per packed radar point.
pub const POINT_STEP: usize = 24;

/// Point field data types for PointCloud2 messages.
///
/// These values correspond to the ROS sensor_msgs/PointField datatype field.
/// All variants are defined for completeness, even if not all are currently
/// used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
#[allow(dead_code)]
pub enum PointFieldType {
    INT8 = 1,
    UINT8 = 2,
    INT16 = 3,
    UINT16 = 4,
    INT32 = 5,
    UINT32 = 6,
    FLOAT32 = 7,
    FLOAT64 = 8,
}

/// Build the radar point fields (24-byte stride).
///
/// Returns PointField definitions for x, y, z, intensity, range and doppler,
/// all FLOAT32, at consecutive 4-byte offsets.
pub fn radar_point_fields() -> Vec<PointFieldView<'static>> {
    ["x", "y", "z", "intensity", "range", "doppler"]
        .iter()
        .enumerate()
        .map(|(index, name)| PointFieldView {
            name,
            offset: (index * 4) as u32,
            datatype: PointFieldType::FLOAT32 as u8,
            count: 1,
        })
        .collect()
}

/// Pack a radar scan into the 24-byte little-endian point format.
pub fn format_points_24byte(scan: &RadarScan) -> Vec<u8> {
    let mut data = Vec::with_capacity(POINT_STEP * scan.len());
    for point in &scan.points {
        for value in [
            point.x,
            point.y,
            point.z,
            point.intensity,
            point.range,
            point.doppler,
        ] {
            data.extend(value.to_le_bytes());
        }
    }
    data
}
