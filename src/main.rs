// SPDX-License-Identifier: Apache-2.0

//! TI mmWave radar point cloud publisher.
//!
//! Reads the radar's data UART, reassembles and parses the demo output
//! frames, and publishes the detected objects as ROS2-compatible
//! PointCloud2 messages over Zenoh.

use clap::Parser as _;
use edgefirst_schemas::{builtin_interfaces::Time, sensor_msgs::PointCloud2};
use mmwave_radarpub::{
    args::Args,
    config::{ChirpParams, RadarConfig},
    formats::{POINT_STEP, format_points_24byte, radar_point_fields},
    pipeline::{Connector, RadarPipeline},
    radar::RadarScan,
    serial::{RadarSource, SerialSource},
};
use tracing::{error, info, trace};
use tracing_subscriber::{Layer as _, Registry, layer::SubscriberExt as _};
use zenoh::{
    Session,
    bytes::{Encoding, ZBytes},
    qos::{CongestionControl, Priority},
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let stdout_log = tracing_subscriber::fmt::layer()
        .pretty()
        .with_filter(args.rust_log);

    let journald = match tracing_journald::layer() {
        Ok(journald) => Some(journald.with_filter(args.rust_log)),
        Err(_) => None,
    };

    let subscriber = Registry::default().with(stdout_log).with(journald);
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");
    tracing_log::LogTracer::init()?;

    let session = zenoh::open(zenoh::Config::from(args.clone())).await.unwrap();
    info!("Opened Zenoh session");

    // The radar manager configures the sensor and writes the chirp profile
    // before any data appears on the UART.
    let params = ChirpParams::load(&args.chirp_config)?;
    let config = tokio::task::block_in_place(|| {
        RadarConfig::wait_from(&params, args.max_elevation_angle, args.max_azimuth_angle)
    })?;

    let (tx, rx) = kanal::bounded(100);

    let port = args.port.clone();
    let baud = args.baud;
    let connector: Connector = Box::new(move || {
        SerialSource::connect(&port, baud).map(|s| Box::new(s) as Box<dyn RadarSource>)
    });

    let pipeline = RadarPipeline::start(config, connector, tx)?;

    let result = publish_loop(&session, &args, rx.to_async()).await;

    pipeline.request_stop();
    pipeline.join();
    session.close().await.unwrap();

    result
}

/// Receive scans from the sorter and publish them until the pipeline closes
/// the channel or the process is interrupted.
async fn publish_loop(
    session: &Session,
    args: &Args,
    rx: kanal::AsyncReceiver<RadarScan>,
) -> Result<(), Box<dyn std::error::Error>> {
    let publisher = session
        .declare_publisher(format!("{}/points", args.radar_topic))
        .priority(Priority::DataHigh)
        .congestion_control(CongestionControl::Drop)
        .await
        .unwrap();

    info!("Starting radar publishing loop");

    loop {
        let scan = tokio::select! {
            scan = rx.recv() => match scan {
                Ok(scan) => scan,
                Err(_) => {
                    error!("Radar pipeline stopped, shutting down");
                    return Err("radar pipeline stopped".into());
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                return Ok(());
            }
        };

        trace!(
            frame = scan.frame_number,
            detected = scan.num_detected,
            published = scan.len(),
            "publishing scan"
        );

        let (msg, enc) = format_scan(&scan, args.frame_id.clone())?;
        if let Err(e) = publisher.put(msg).encoding(enc).await {
            error!("publish points error: {:?}", e);
        }
    }
}

/// Format a radar scan into a PointCloud2 message.
#[allow(deprecated)]
fn format_scan(
    scan: &RadarScan,
    frame_id: String,
) -> Result<(ZBytes, Encoding), edgefirst_schemas::cdr::CdrError> {
    let n_points = scan.len();
    let data = format_points_24byte(scan);
    let fields = radar_point_fields();

    let msg = PointCloud2::new(
        Time::from_nanos(scan.timestamp_ns),
        &frame_id,
        1,
        n_points as u32,
        &fields,
        false,
        POINT_STEP as u32,
        (POINT_STEP * n_points) as u32,
        &data,
        true,
    )?;

    let msg = ZBytes::from(msg.into_cdr());
    let enc = Encoding::APPLICATION_CDR.with_schema("sensor_msgs/msg/PointCloud2");

    Ok((msg, enc))
}
