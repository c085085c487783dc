//! Passive ARP spoofing monitor.
//!
//! Frames from a [`sniff::FrameSource`] flow through the
//! [`detection::Detector`], which keeps the [`binding::BindingTable`], the
//! [`event_log::EventLog`] and the live alert set. The
//! [`monitor::Monitor`] owns the capture worker and serves snapshots to the
//! HTTP layer in [`server`].

pub mod binding;
pub mod claims;
pub mod cli;
pub mod config;
pub mod detection;
pub mod error;
pub mod event_log;
pub mod models;
pub mod monitor;
pub mod parser;
pub mod registry;
pub mod server;
pub mod sniff;

pub use error::{MonitorError, Result};
pub use models::domain::{ArpFrame, ArpOperation, Binding, Device, MacAddr, SpoofEvent};
pub use monitor::{Monitor, MonitorState, MonitorStatus};
