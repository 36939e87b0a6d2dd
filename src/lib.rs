// SPDX-License-Identifier: Apache-2.0

//! mmWave RadarPub Library
//!
//! This library provides core functionality for interfacing with TI mmWave
//! radar sensors over their data UART and publishing point clouds to the
//! EdgeFirst Perception Middleware via Zenoh.
//!
//! # Architecture
//!
//! The serial byte stream is reassembled into frames and parsed by a
//! double-buffered three-thread pipeline:
//!
//! ```text
//! ┌────────────┐     ┌──────────────┐     ┌─────────────┐
//! │ RadarSource│ ──► │ RadarPipeline│ ──► │  RadarScan  │
//! │ (UART/test)│     │ (read/sort/  │     │  (channel)  │
//! └────────────┘     │    swap)     │     └─────────────┘
//!                    └──────────────┘
//! ```
//!
//! The reader thread resynchronizes on the frame magic word and fills one of
//! two ping/pong buffers; the sorter thread walks the TLV payload of the
//! other buffer and converts detected objects into Cartesian points; a swap
//! barrier exchanges the buffer roles between frames. Completed scans are
//! handed to the publisher through a bounded channel.
//!
//! # Modules
//!
//! - [`config`]: chirp parameters and derived radar configuration
//! - [`formats`]: PointCloud2 field layout and packed point formatting
//! - [`mmwave`]: demo output wire format and the TLV frame sorter
//! - [`pipeline`]: the double-buffered reader/sorter/swap pipeline
//! - [`radar`]: common types, errors, and timestamps
//! - [`serial`]: serial port and test byte sources
//!
//! # Example
//!
//! ```ignore
//! use mmwave_radarpub::{
//!     config::{ChirpParams, RadarConfig},
//!     pipeline::RadarPipeline,
//!     serial::SerialSource,
//! };
//!
//! let params = ChirpParams::load("/etc/radar/chirp.json")?;
//! let config = RadarConfig::wait_from(&params, 90, 90)?;
//!
//! let (tx, rx) = kanal::bounded(100);
//! let connector = Box::new(|| {
//!     SerialSource::connect("/dev/ttyACM1", 921600)
//!         .map(|s| Box::new(s) as Box<dyn mmwave_radarpub::serial::RadarSource>)
//! });
//! let pipeline = RadarPipeline::start(config, connector, tx)?;
//!
//! while let Ok(scan) = rx.recv() {
//!     println!("frame {} with {} points", scan.frame_number, scan.len());
//! }
//! ```

pub mod args;
pub mod config;
pub mod formats;
pub mod mmwave;
pub mod pipeline;
pub mod radar;
pub mod serial;

// Re-exports for convenience
pub use config::{ChirpParams, ParamSource, RadarConfig};
pub use formats::PointFieldType;
pub use mmwave::{FrameSorter, MAGIC_WORD};
pub use pipeline::RadarPipeline;
pub use radar::{Error, RadarPoint, RadarScan};
pub use serial::{RadarSource, SerialSource, TestSource};
