//! Power and pin sequencing for the fingerprint sensor.
//!
//! The sensor has a reset line driven through two pin-control states and is
//! powered either from an LDO regulator or from a dedicated GPIO line. All
//! hardware access goes through [`blocking::Sequencer`], which serialises
//! every operation behind one lock.

use core::fmt::{self, Display, Formatter};

use crate::Error;

/// Settling time required after each reset pin transition.
pub const RESET_SETTLE_MS: u32 = 10;

/// Name of the LDO regulator powering the sensor.
pub const VREG_LDO_NAME: &str = "ldo";

/// Pin-control states resolved at bind time, in table order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PinState {
    /// Reset line asserted
    ResetReset,
    /// Reset line released, sensor running
    ResetActive,
}

impl PinState {
    /// Every state, in the order they are looked up and matched.
    pub const ALL: [PinState; 2] = [PinState::ResetReset, PinState::ResetActive];

    pub fn name(self) -> &'static str {
        match self {
            PinState::ResetReset => "anc_reset_reset",
            PinState::ResetActive => "anc_reset_active",
        }
    }

    /// Matches `name` against the table. A name matches when it starts with
    /// the state name, so trailing newlines from text writes are accepted.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|state| name.starts_with(state.name()))
    }

    pub(crate) fn index(self) -> usize {
        match self {
            PinState::ResetReset => 0,
            PinState::ResetActive => 1,
        }
    }
}

impl Display for PinState {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Static description of a required supply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct VregConfig {
    pub name: &'static str,
    pub min_uv: u32,
    pub max_uv: u32,
    pub ua_load: u32,
}

/// Regulators the sensor needs.
pub const VREG_CONF: [VregConfig; 1] = [VregConfig {
    name: VREG_LDO_NAME,
    min_uv: 3_300_000,
    max_uv: 3_300_000,
    ua_load: 150_000,
}];

/// Pin multiplexing controller of the sensor's pin group.
pub trait PinControl {
    /// Resolved state handle.
    type State;

    fn lookup_state(&mut self, name: &str) -> Result<Self::State, Error>;

    fn select_state(&mut self, state: &Self::State) -> Result<(), Error>;
}

/// An acquired regulator handle.
pub trait Regulator {
    /// Number of selectable voltages, zero or less for fixed supplies.
    fn count_voltages(&self) -> i32;

    fn set_voltage(&mut self, min_uv: u32, max_uv: u32) -> Result<(), Error>;

    fn set_load(&mut self, ua_load: u32) -> Result<(), Error>;

    fn enable(&mut self) -> Result<(), Error>;

    fn disable(&mut self) -> Result<(), Error>;

    fn is_enabled(&self) -> bool;
}

/// Source of regulator handles. Handles are taken with [`get`] and given
/// back with [`put`].
///
/// [`get`]: RegulatorSupply::get
/// [`put`]: RegulatorSupply::put
pub trait RegulatorSupply {
    type Regulator: Regulator;

    fn get(&mut self, name: &str) -> Result<Self::Regulator, Error>;

    fn put(&mut self, regulator: Self::Regulator);
}

/// How the sensor is powered, chosen at bind time.
#[derive(Debug)]
pub enum PowerSource<PIN> {
    /// Dedicated power GPIO, already configured as output low
    Gpio(PIN),
    /// The [`VREG_LDO_NAME`] regulator
    Regulator,
}

pub mod blocking;
