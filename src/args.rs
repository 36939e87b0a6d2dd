// SPDX-License-Identifier: Apache-2.0

use clap::Parser;
use serde_json::json;
use tracing::level_filters::LevelFilter;
use zenoh::Config;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Radar data serial port device path.
    #[arg(env, default_value = "/dev/ttyACM1")]
    pub port: String,

    /// Data serial port baud rate.
    #[arg(long, env, default_value = "921600")]
    pub baud: u32,

    /// Path to the chirp parameter file written by the radar manager.
    #[arg(long, env, default_value = "/etc/radar/chirp.json")]
    pub chirp_config: String,

    /// Maximum allowed elevation angle in degrees; 90 disables the filter.
    #[arg(long, env, default_value = "90")]
    pub max_elevation_angle: i32,

    /// Maximum allowed azimuth angle in degrees; 90 disables the filter.
    #[arg(long, env, default_value = "90")]
    pub max_azimuth_angle: i32,

    /// The name of the radar frame
    #[arg(long, env, default_value = "base_radar_link")]
    pub frame_id: String,

    /// radar base topic
    #[arg(long, env, default_value = "rt/radar")]
    pub radar_topic: String,

    /// Application log level
    #[arg(long, env, default_value = "info")]
    pub rust_log: LevelFilter,

    /// zenoh connection mode
    #[arg(long, env, default_value = "peer")]
    mode: zenoh::config::WhatAmI,

    /// connect to zenoh endpoints
    #[arg(long, env)]
    connect: Vec<String>,

    /// listen to zenoh endpoints
    #[arg(long, env)]
    listen: Vec<String>,

    /// disable zenoh multicast scouting
    #[arg(long, env)]
    no_multicast_scouting: bool,
}

impl From<Args> for Config {
    fn from(args: Args) -> Self {
        let mut config = Config::default();

        config
            .insert_json5("mode", &json!(args.mode).to_string())
            .unwrap();

        if !args.connect.is_empty() {
            config
                .insert_json5("connect/endpoints", &json!(args.connect).to_string())
                .unwrap();
        }

        if !args.listen.is_empty() {
            config
                .insert_json5("listen/endpoints", &json!(args.listen).to_string())
                .unwrap();
        }

        if args.no_multicast_scouting {
            config
                .insert_json5("scouting/multicast/enabled", &json!(false).to_string())
                .unwrap();
        }

        config
    }
}
