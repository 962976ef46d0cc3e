//! Device Module
//!
//! Model cho một thiết bị USB đang cắm vào máy và registry của live set.
//!
//! ## Structure
//! - `types`: Device, DeviceClass, DeviceStatus
//! - `registry`: Concurrent live device set, keyed by raw PnP id
//!
//! A `Device` exists only while the physical unit is attached: created on
//! the OS insertion event, dropped from the registry on the removal event.
//! Only the authorization engine mutates it.

pub mod registry;
pub mod types;

pub use registry::DeviceRegistry;
pub use types::{Device, DeviceClass, DeviceStatus};
