// SPDX-License-Identifier: Apache-2.0

//! Radar configuration derived from chirp parameters.
//!
//! The radar firmware is configured by an external manager which exposes the
//! chirp profile as a keyed set of numeric parameters. This module provides
//! the [`ParamSource`] lookup abstraction, a JSON-file-backed implementation,
//! and the [`RadarConfig`] values derived from the chirp profile that the
//! frame sorter needs to convert bin indices into physical units.

use crate::radar::Error;
use serde::Deserialize;
use std::{collections::HashMap, path::Path, thread::sleep, time::Duration};
use tracing::{info, warn};

/// Parameter keys published by the radar manager.
pub const NUM_TX_ANT: &str = "numTxAnt";
pub const NUM_ADC_SAMPLES: &str = "numAdcSamples";
pub const CHIRP_END_IDX: &str = "chirpEndIdx";
pub const CHIRP_START_IDX: &str = "chirpStartIdx";
pub const NUM_LOOPS: &str = "numLoops";
pub const DIG_OUT_SAMPLE_RATE: &str = "digOutSampleRate";
pub const FREQ_SLOPE_CONST: &str = "freqSlopeConst";
pub const START_FREQ: &str = "startFreq";
pub const IDLE_TIME: &str = "idleTime";
pub const RAMP_END_TIME: &str = "rampEndTime";

/// Keyed lookup of numeric radar parameters.
///
/// Implementations may be backed by a file, a remote registry, or a plain
/// map for tests. A missing key returns `None`; the caller decides whether
/// to wait or fail.
pub trait ParamSource {
    /// Look up a parameter by key.
    fn get(&self, key: &str) -> Option<f64>;
}

/// Chirp profile as produced by the radar manager, loadable from JSON.
#[derive(Clone, Debug, Deserialize)]
pub struct ChirpParams {
    #[serde(rename = "numTxAnt")]
    pub num_tx_ant: u32,
    #[serde(rename = "numAdcSamples")]
    pub num_adc_samples: u32,
    #[serde(rename = "chirpEndIdx")]
    pub chirp_end_idx: u32,
    #[serde(rename = "chirpStartIdx")]
    pub chirp_start_idx: u32,
    #[serde(rename = "numLoops")]
    pub num_loops: u32,
    #[serde(rename = "digOutSampleRate")]
    pub dig_out_sample_rate: f64,
    #[serde(rename = "freqSlopeConst")]
    pub freq_slope_const: f64,
    #[serde(rename = "startFreq")]
    pub start_freq: f64,
    #[serde(rename = "idleTime")]
    pub idle_time: f64,
    #[serde(rename = "rampEndTime")]
    pub ramp_end_time: f64,
}

impl ChirpParams {
    /// Load chirp parameters from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let data = std::fs::read_to_string(path)?;
        serde_json::from_str(&data).map_err(|e| Error::Config(e.to_string()))
    }
}

impl ParamSource for ChirpParams {
    fn get(&self, key: &str) -> Option<f64> {
        match key {
            NUM_TX_ANT => Some(self.num_tx_ant as f64),
            NUM_ADC_SAMPLES => Some(self.num_adc_samples as f64),
            CHIRP_END_IDX => Some(self.chirp_end_idx as f64),
            CHIRP_START_IDX => Some(self.chirp_start_idx as f64),
            NUM_LOOPS => Some(self.num_loops as f64),
            DIG_OUT_SAMPLE_RATE => Some(self.dig_out_sample_rate),
            FREQ_SLOPE_CONST => Some(self.freq_slope_const),
            START_FREQ => Some(self.start_freq),
            IDLE_TIME => Some(self.idle_time),
            RAMP_END_TIME => Some(self.ramp_end_time),
            _ => None,
        }
    }
}

/// Map-backed parameter source for tests and static configuration.
#[derive(Clone, Debug, Default)]
pub struct MapParams(pub HashMap<String, f64>);

impl ParamSource for MapParams {
    fn get(&self, key: &str) -> Option<f64> {
        self.0.get(key).copied()
    }
}

/// Derived radar configuration, immutable after construction.
///
/// The bin-to-unit scale factors come straight from the chirp profile; the
/// angle limits come from the command line. A limit outside [0, 90) disables
/// the corresponding filter.
#[derive(Clone, Copy, Debug)]
pub struct RadarConfig {
    /// Number of range FFT bins, next power of two above the ADC sample count.
    pub num_range_bins: u32,
    /// Number of Doppler FFT bins.
    pub num_doppler_bins: u32,
    /// Meters per range bin index.
    pub range_idx_to_meters: f32,
    /// Meters per second per Doppler bin index.
    pub doppler_resolution_mps: f32,
    /// Maximum allowed elevation angle in degrees, 90 disables the filter.
    pub max_elevation_angle_deg: i32,
    /// Maximum allowed azimuth angle in degrees, 90 disables the filter.
    pub max_azimuth_angle_deg: i32,
}

impl RadarConfig {
    /// Derive the radar configuration from a parameter source.
    ///
    /// Returns `Error::Config` when a required key is missing; use
    /// [`RadarConfig::wait_from`] at startup to block until the radar
    /// manager has published its parameters.
    pub fn from_params(
        params: &dyn ParamSource,
        max_elevation_angle_deg: i32,
        max_azimuth_angle_deg: i32,
    ) -> Result<Self, Error> {
        let get = |key: &str| {
            params
                .get(key)
                .ok_or_else(|| Error::Config(format!("missing radar parameter: {}", key)))
        };

        let num_tx_ant = get(NUM_TX_ANT)? as u32;
        let num_adc_samples = get(NUM_ADC_SAMPLES)? as u32;
        let chirp_end_idx = get(CHIRP_END_IDX)? as u32;
        let chirp_start_idx = get(CHIRP_START_IDX)? as u32;
        let num_loops = get(NUM_LOOPS)? as u32;
        let dig_out_sample_rate = get(DIG_OUT_SAMPLE_RATE)?;
        let freq_slope_const = get(FREQ_SLOPE_CONST)?;
        let start_freq = get(START_FREQ)?;
        let idle_time = get(IDLE_TIME)?;
        let ramp_end_time = get(RAMP_END_TIME)?;

        if num_tx_ant == 0 {
            return Err(Error::Config("numTxAnt must be non-zero".to_string()));
        }

        let num_chirps_per_frame = (chirp_end_idx - chirp_start_idx + 1) * num_loops;
        let num_range_bins = num_adc_samples.next_power_of_two();
        let num_doppler_bins = num_chirps_per_frame / num_tx_ant;

        let range_idx_to_meters =
            300.0 * dig_out_sample_rate / (2.0 * freq_slope_const * 1e3 * num_range_bins as f64);
        let doppler_resolution_mps = 3e8
            / (2.0
                * start_freq
                * 1e9
                * (idle_time + ramp_end_time)
                * 1e-6
                * num_chirps_per_frame as f64);

        let config = Self {
            num_range_bins,
            num_doppler_bins,
            range_idx_to_meters: range_idx_to_meters as f32,
            doppler_resolution_mps: doppler_resolution_mps as f32,
            max_elevation_angle_deg,
            max_azimuth_angle_deg,
        };

        info!(
            num_range_bins = config.num_range_bins,
            num_doppler_bins = config.num_doppler_bins,
            range_idx_to_meters = config.range_idx_to_meters,
            doppler_resolution_mps = config.doppler_resolution_mps,
            "Configured radar data handler"
        );

        Ok(config)
    }

    /// Block until the radar manager has published `numTxAnt`, then derive
    /// the configuration.
    ///
    /// The radar manager configures the sensor before the data handler
    /// starts; `numTxAnt` is the last parameter it publishes.
    pub fn wait_from(
        params: &dyn ParamSource,
        max_elevation_angle_deg: i32,
        max_azimuth_angle_deg: i32,
    ) -> Result<Self, Error> {
        let mut waited = 0u64;
        while params.get(NUM_TX_ANT).is_none() {
            sleep(Duration::from_millis(500));
            waited += 500;
            if waited.is_multiple_of(5000) {
                warn!("Waiting for radar manager to publish chirp parameters");
            }
        }

        Self::from_params(params, max_elevation_angle_deg, max_azimuth_angle_deg)
    }
}
