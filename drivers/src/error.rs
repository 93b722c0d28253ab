use core::fmt::{self, Display, Formatter};

/// Errors reported by the sensor control paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// Allocation, regulator, region or endpoint creation failed
    ResourceExhausted,
    /// Unknown pin-state name or attribute
    NotFound,
    /// Unknown ioctl command or text token
    InvalidArgument,
    /// Ioctl issued against another command family
    NotSupported,
    /// Underlying platform call failed
    HardwareError,
}

pub(crate) const ENOMEM: i32 = 12;
pub(crate) const EINVAL: i32 = 22;
pub(crate) const ENOTTY: i32 = 25;
pub(crate) const EIO: i32 = 5;

impl Error {
    /// Negative errno handed back through ioctl and attribute writes.
    ///
    /// Unknown names report `-EINVAL`, which is what user space has always
    /// seen from the pin-select attribute.
    pub fn to_errno(self) -> i32 {
        match self {
            Error::ResourceExhausted => -ENOMEM,
            Error::NotFound | Error::InvalidArgument => -EINVAL,
            Error::NotSupported => -ENOTTY,
            Error::HardwareError => -EIO,
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Error::ResourceExhausted => write!(f, "Resource exhausted"),
            Error::NotFound => write!(f, "Not found"),
            Error::InvalidArgument => write!(f, "Invalid argument"),
            Error::NotSupported => write!(f, "Not supported"),
            Error::HardwareError => write!(f, "Hardware error"),
        }
    }
}

/// Pin drivers only ever fail at the hardware level.
impl<E> From<E> for Error
where
    E: embedded_hal::digital::Error,
{
    fn from(_: E) -> Self {
        Error::HardwareError
    }
}
