//! Command surface for the user-space fingerprint service: the
//! `/dev/jiiov_fp` ioctls and the write-only sysfs attributes.

use alloc::sync::Arc;
use core::fmt::{self, Display, Formatter};

use bitflags::bitflags;
use drivers::Error;
use log::{error, info};

#[cfg(feature = "netlink")]
use drivers::netlink::EventCode;

use crate::driver::Device;
use crate::platform::Platform;

bitflags! {
    /// Data direction bits of an ioctl number.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct IocDir: u32 {
        const WRITE = 1;
        const READ = 2;
    }
}

pub const IOC_NRBITS: u32 = 8;
pub const IOC_TYPEBITS: u32 = 8;
pub const IOC_SIZEBITS: u32 = 14;

pub const IOC_NRSHIFT: u32 = 0;
pub const IOC_TYPESHIFT: u32 = IOC_NRSHIFT + IOC_NRBITS;
pub const IOC_SIZESHIFT: u32 = IOC_TYPESHIFT + IOC_TYPEBITS;
pub const IOC_DIRSHIFT: u32 = IOC_SIZESHIFT + IOC_SIZEBITS;

pub const fn ioc(dir: IocDir, ty: u8, nr: u8, size: u32) -> u32 {
    (dir.bits() << IOC_DIRSHIFT)
        | ((ty as u32) << IOC_TYPESHIFT)
        | ((nr as u32) << IOC_NRSHIFT)
        | (size << IOC_SIZESHIFT)
}

/// Command without argument.
pub const fn io(ty: u8, nr: u8) -> u32 {
    ioc(IocDir::empty(), ty, nr, 0)
}

pub const fn ioc_type(cmd: u32) -> u8 {
    ((cmd >> IOC_TYPESHIFT) & ((1 << IOC_TYPEBITS) - 1)) as u8
}

pub const fn ioc_nr(cmd: u32) -> u8 {
    ((cmd >> IOC_NRSHIFT) & ((1 << IOC_NRBITS) - 1)) as u8
}

pub fn ioc_dir(cmd: u32) -> IocDir {
    IocDir::from_bits_truncate(cmd >> IOC_DIRSHIFT)
}

pub const ANC_IOC_MAGIC: u8 = b'a';
pub const ANC_IOC_RESET: u32 = io(ANC_IOC_MAGIC, 0);
pub const ANC_IOC_ENABLE_POWER: u32 = io(ANC_IOC_MAGIC, 1);
pub const ANC_IOC_DISABLE_POWER: u32 = io(ANC_IOC_MAGIC, 2);
pub const ANC_IOC_CLEAR_FLAG: u32 = io(ANC_IOC_MAGIC, 3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum IoctlCommand {
    Reset,
    EnablePower,
    DisablePower,
    ClearTouchFlag,
}

impl IoctlCommand {
    pub fn number(self) -> u32 {
        match self {
            IoctlCommand::Reset => ANC_IOC_RESET,
            IoctlCommand::EnablePower => ANC_IOC_ENABLE_POWER,
            IoctlCommand::DisablePower => ANC_IOC_DISABLE_POWER,
            IoctlCommand::ClearTouchFlag => ANC_IOC_CLEAR_FLAG,
        }
    }

    /// Commands of another family are not ours to answer; unknown numbers
    /// within the family are rejected.
    pub fn decode(cmd: u32) -> Result<Self, Error> {
        if ioc_type(cmd) != ANC_IOC_MAGIC {
            return Err(Error::NotSupported);
        }
        match cmd {
            ANC_IOC_RESET => Ok(IoctlCommand::Reset),
            ANC_IOC_ENABLE_POWER => Ok(IoctlCommand::EnablePower),
            ANC_IOC_DISABLE_POWER => Ok(IoctlCommand::DisablePower),
            ANC_IOC_CLEAR_FLAG => Ok(IoctlCommand::ClearTouchFlag),
            _ => Err(Error::InvalidArgument),
        }
    }
}

/// Write-only sysfs attributes of the sensor device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Attribute {
    PinctlSet,
    DevicePower,
    HwReset,
    #[cfg(feature = "netlink")]
    NetlinkEvent,
}

impl Attribute {
    /// The attribute group published at bind time.
    pub const ALL: &'static [Attribute] = &[
        Attribute::PinctlSet,
        Attribute::DevicePower,
        Attribute::HwReset,
        #[cfg(feature = "netlink")]
        Attribute::NetlinkEvent,
    ];

    /// Owner write only.
    pub const MODE: u16 = 0o200;

    pub fn name(self) -> &'static str {
        match self {
            Attribute::PinctlSet => "pinctl_set",
            Attribute::DevicePower => "device_power",
            Attribute::HwReset => "hw_reset",
            #[cfg(feature = "netlink")]
            Attribute::NetlinkEvent => "netlink_event",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|attr| attr.name() == name)
    }
}

impl Display for Attribute {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Value written to `device_power`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerToken {
    On,
    Off,
}

impl PowerToken {
    pub fn parse(text: &str) -> Option<Self> {
        if text.starts_with("on") {
            Some(PowerToken::On)
        } else if text.starts_with("off") {
            Some(PowerToken::Off)
        } else {
            None
        }
    }
}

const RESET_TOKEN: &str = "reset";

impl<P: Platform> Device<P> {
    /// Runs one ioctl command.
    pub fn ioctl(&self, cmd: u32, _arg: usize) -> Result<(), Error> {
        let command = IoctlCommand::decode(cmd)?;
        if !self.is_bound() {
            error!("anc_ioctl: device unbound");
            return Err(Error::NotFound);
        }
        info!("anc_ioctl: cmd = {}", ioc_nr(cmd));

        match command {
            IoctlCommand::Reset => {
                info!("anc_ioctl: reset");
                self.sequencer().reset()
            }
            IoctlCommand::EnablePower => {
                info!("anc_ioctl: enable power");
                self.sequencer().power(true);
                Ok(())
            }
            IoctlCommand::DisablePower => {
                info!("anc_ioctl: disable power");
                self.sequencer().power(false);
                Ok(())
            }
            IoctlCommand::ClearTouchFlag => {
                #[cfg(feature = "netlink")]
                {
                    self.bridge().clear_touch_flag();
                    info!("anc_ioctl: clear tp flag");
                }
                Ok(())
            }
        }
    }

    /// Handles a write to `attr`. Returns the number of bytes consumed.
    pub fn store(&self, attr: Attribute, buf: &[u8]) -> Result<usize, Error> {
        let text = core::str::from_utf8(buf).map_err(|_| Error::InvalidArgument)?;
        if !self.is_bound() {
            error!("{}: device unbound", attr);
            return Err(Error::NotFound);
        }

        match attr {
            Attribute::PinctlSet => self.sequencer().select_pin(text)?,
            Attribute::DevicePower => match PowerToken::parse(text) {
                Some(PowerToken::On) => {
                    info!("device power on");
                    self.sequencer().power(true);
                }
                Some(PowerToken::Off) => {
                    info!("device power off");
                    self.sequencer().power(false);
                }
                None => return Err(Error::InvalidArgument),
            },
            Attribute::HwReset => {
                if !text.starts_with(RESET_TOKEN) {
                    return Err(Error::InvalidArgument);
                }
                info!("hw_reset");
                self.sequencer().reset()?;
            }
            #[cfg(feature = "netlink")]
            Attribute::NetlinkEvent => {
                info!("forward netlink event: {}", text.trim_end());
                let Some(code) = EventCode::from_name(text) else {
                    error!("unsupported netlink event: {}", text.trim_end());
                    return Err(Error::InvalidArgument);
                };
                self.bridge().channel().send(code)?;
            }
        }
        Ok(buf.len())
    }
}

/// An open handle on the control node.
///
/// Opening never fails and never excludes other openers; every handle
/// talks to the same bound device.
pub struct ControlFile<P: Platform> {
    device: Arc<Device<P>>,
}

impl<P: Platform> ControlFile<P> {
    pub fn open(device: &Arc<Device<P>>) -> Self {
        Self {
            device: device.clone(),
        }
    }

    pub fn ioctl(&self, cmd: u32, arg: usize) -> Result<(), Error> {
        self.device.ioctl(cmd, arg)
    }

    /// 32-bit callers use the same command numbers.
    pub fn compat_ioctl(&self, cmd: u32, arg: u32) -> Result<(), Error> {
        self.ioctl(cmd, arg as usize)
    }

    /// Errno-style result for the file operations table.
    pub fn unlocked_ioctl(&self, cmd: u32, arg: usize) -> i64 {
        match self.ioctl(cmd, arg) {
            Ok(()) => 0,
            Err(e) => i64::from(e.to_errno()),
        }
    }
}
