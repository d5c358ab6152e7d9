//! Flow control for light-client serving.
//!
//! Every admitted client owns a token buffer that requests are charged against.
//! Buffers recharge over time at a rate derived from a global
//! [`RechargeCurve`], never slower than the client's own minimum recharge.
//! All amounts are abstract cost units; rates are cost units per second.
//!
//! # Components
//!
//! - [`ClientManager`] - Client registry, buffer accounting and capacity limits
//! - [`RechargeCurve`] - Piecewise-linear total recharge curve
//! - [`CapacityLimits`] / [`FlowParams`] - Process-wide parameters, swapped as a snapshot
//! - [`Clock`] - Monotonic time source ([`SystemClock`], [`ManualClock`] for tests)

mod client;
mod clock;
pub mod constants;
mod curve;
mod error;
mod id;
mod limits;
mod manager;

pub use client::{ClientParams, ClientSnapshot};
pub use clock::{Clock, ManualClock, MonoTime, SystemClock};
pub use curve::{CurvePoint, RechargeCurve};
pub use error::FlowControlError;
pub use id::{ClientId, ClientTier};
pub use limits::{CapacityLimits, FlowParams};
pub use manager::ClientManager;
