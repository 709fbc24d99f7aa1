//! Simulated BLE Medium
//!
//! This crate provides an in-memory radio medium for exercising broadcasters
//! and observers without Bluetooth hardware. It includes:
//!
//! - **SimulatedAir**: the shared medium advertisements travel through
//! - **SimAdapter**: a virtual controller implementing both
//!   [`AdvertisingTransport`](pb_session::AdvertisingTransport) and
//!   [`ScanTransport`](pb_session::ScanTransport)
//!
//! Registered advertisements reach every other scanning adapter whose scan
//! request matches, on registration, on each payload change and when a
//! scanner starts late. An advertisement with a timeout is released by the
//! medium once it elapses.
//!
//! # Example
//!
//! ```rust,ignore
//! use pb_session::{VirtualBle, VirtualBleConfig};
//! use pb_sim::SimulatedAir;
//!
//! let air = SimulatedAir::new();
//! let hub_a = air.adapter("hci0");
//! let hub_b = air.adapter("hci1");
//!
//! let sender = VirtualBle::from_config(
//!     VirtualBleConfig { broadcast_channel: 1, ..Default::default() },
//!     hub_a.clone(),
//!     hub_a,
//! );
//! let receiver = VirtualBle::from_config(
//!     VirtualBleConfig { observe_channels: vec![1], ..Default::default() },
//!     hub_b.clone(),
//!     hub_b,
//! );
//! receiver.open().await?;
//! sender.broadcast(Some(vec![42.into(), 24.into()])).await?;
//! assert_eq!(receiver.observe(1), Some(vec![42.into(), 24.into()]));
//! ```

pub mod adapter;
pub mod air;

pub use adapter::{SimAdapter, SimAdapterConfig, DEFAULT_MAX_INSTANCES, DEFAULT_TX_RSSI};
pub use air::SimulatedAir;
