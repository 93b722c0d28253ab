//! Services the driver consumes from its host.
//!
//! [`Platform`] bundles everything the driver needs from the surrounding
//! kernel: the device description, the character-device and sysfs
//! registries, wakeup sources, the display notifier chain, the touch event
//! dispatcher and the sensor identification query. Handles that own a
//! resource (pins, pin control, wakeup sources, sockets) release it when
//! dropped.

#[cfg(feature = "netlink")]
use alloc::sync::Arc;

use drivers::sequencer::{PinControl, Regulator, RegulatorSupply};
use drivers::Error;
use embassy_sync::blocking_mutex::raw::RawMutex;
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use num_enum::{IntoPrimitive, TryFromPrimitive};

#[cfg(feature = "netlink")]
use crate::bridge::{DisplayListener, TouchListener};
use crate::control::Attribute;
#[cfg(feature = "netlink")]
use drivers::netlink::channel::NetlinkFamily;

pub const ANC_DEVICE_NAME: &str = "jiiov_fp";
pub const ANC_COMPATIBLE_SW_FP: &str = "jiiov,fingerprint";
pub const WAKELOCK_NAME: &str = "anc_fp_wakelock";

/// Device description properties.
pub const PROP_ENABLE_VIA_GPIO: &str = "anc,enable-via-gpio";
pub const PROP_GPIO_RST: &str = "anc,gpio_rst";
pub const PROP_GPIO_PWR: &str = "anc,gpio_pwr";

/// Sensor variants this driver accepts, as reported by the identification
/// query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u32)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SensorVariant {
    Jiiov0301 = 0x0301,
    Jiiov0302 = 0x0302,
}

/// Character device number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DevNum {
    pub major: u32,
    pub minor: u32,
}

impl DevNum {
    pub const MINORBITS: u32 = 20;

    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// Packed `dev_t` value.
    pub const fn raw(self) -> u32 {
        (self.major << Self::MINORBITS) | self.minor
    }
}

/// A registered wakeup source. Unregistered on drop.
pub trait WakeupSource: Send + Sync + 'static {
    /// Keeps the system awake for `msecs`.
    fn wakeup_event(&self, msecs: u32);
}

pub trait Platform {
    /// Lock serialising sensor sequencing. Must be allowed to sleep.
    type RawMutex: RawMutex + Send + Sync;
    type Pin: OutputPin + Send;
    type PinState: Send;
    type Pinctrl: PinControl<State = Self::PinState> + Send;
    type Regulator: Regulator + Send;
    type Supply: RegulatorSupply<Regulator = Self::Regulator> + Send;
    type Delay: DelayNs + Send;
    type Wakelock: WakeupSource;
    #[cfg(feature = "netlink")]
    type Netlink: NetlinkFamily;

    /// Sensor identification code.
    fn fpsensor_type(&self) -> u32;

    fn driver_register(&mut self, name: &str, compatible: &str) -> Result<(), Error>;
    fn driver_unregister(&mut self, name: &str);

    // Device description
    fn has_of_node(&self) -> bool;
    fn read_bool(&self, property: &str) -> bool;
    fn request_named_gpio(&mut self, label: &str) -> Result<Self::Pin, Error>;
    fn pinctrl_get(&mut self) -> Result<Self::Pinctrl, Error>;
    fn regulator_supply(&mut self) -> Self::Supply;
    fn delay(&mut self) -> Self::Delay;

    // Character device
    fn class_create(&mut self, name: &str) -> Result<(), Error>;
    fn class_destroy(&mut self, name: &str);
    fn alloc_chrdev_region(&mut self, name: &str) -> Result<DevNum, Error>;
    fn register_chrdev_region(&mut self, devnum: DevNum, name: &str) -> Result<(), Error>;
    fn unregister_chrdev_region(&mut self, devnum: DevNum);
    fn device_create(&mut self, devnum: DevNum, name: &str) -> Result<(), Error>;
    fn device_destroy(&mut self, devnum: DevNum);
    fn cdev_add(&mut self, devnum: DevNum) -> Result<(), Error>;
    fn cdev_del(&mut self, devnum: DevNum);

    fn wakeup_source_register(&mut self, name: &str) -> Option<Self::Wakelock>;

    fn sysfs_create_group(&mut self, attrs: &[Attribute]) -> Result<(), Error>;
    fn sysfs_remove_group(&mut self, attrs: &[Attribute]);

    #[cfg(feature = "netlink")]
    fn netlink_family(&mut self) -> &mut Self::Netlink;

    #[cfg(feature = "netlink")]
    fn display_register_client(&mut self, client: Arc<dyn DisplayListener>) -> Result<(), Error>;
    #[cfg(feature = "netlink")]
    fn display_unregister_client(&mut self);

    /// The dispatcher holds a single handler system wide.
    #[cfg(feature = "netlink")]
    fn touch_handler_register(&mut self, handler: Arc<dyn TouchListener>) -> Result<(), Error>;
    #[cfg(feature = "netlink")]
    fn touch_handler_unregister(&mut self);
}
