#![no_std]
//! Fingerprint sensor hardware support
//!
//! Building blocks for the JIIOV fingerprint sensor control driver: power and
//! reset sequencing over embedded-hal pins and platform regulators, and the
//! netlink channel that forwards sensor events to user space.

/// Error type shared by every control path.
pub mod error;

/// Event codes, netlink frames and the notification channel.
pub mod netlink;

/// Pin-control and regulator sequencing.
pub mod sequencer;

pub use error::Error;

extern crate alloc;

#[cfg(test)]
extern crate std;

#[cfg(test)]
mod mock;
