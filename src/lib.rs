#![no_std]
//! JIIOV under-display fingerprint sensor control driver
//!
//! Binds the sensor described by the platform, exposes the reset and power
//! controls to the user-space fingerprint service through a control node and
//! write-only attributes, and forwards touch and display events to that
//! service over netlink.

/// Touch and display event forwarding.
#[cfg(feature = "netlink")]
pub mod bridge;

/// Control node ioctls and sysfs attributes.
pub mod control;

/// Load, bind, unbind and unload.
pub mod driver;

/// Services consumed from the host kernel.
pub mod platform;

pub use control::{Attribute, ControlFile, IoctlCommand};
pub use driver::{Device, LifecycleState, Module};
pub use drivers::Error;
pub use platform::Platform;

extern crate alloc;

#[cfg(test)]
extern crate std;

#[cfg(test)]
mod mock;
