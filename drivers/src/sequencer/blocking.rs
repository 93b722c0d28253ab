use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use log::{debug, error, info};

use super::{
    PinControl, PinState, PowerSource, Regulator, RegulatorSupply, VregConfig, RESET_SETTLE_MS,
    VREG_CONF, VREG_LDO_NAME,
};
use crate::Error;

struct RegulatorSlot<R> {
    config: VregConfig,
    handle: Option<R>,
}

struct Hardware<PIN, CTL: PinControl, SUP: RegulatorSupply, DELAY> {
    pinctrl: CTL,
    states: [CTL::State; PinState::ALL.len()],
    supply: SUP,
    vregs: [RegulatorSlot<SUP::Regulator>; VREG_CONF.len()],
    power: PowerSource<PIN>,
    // Requested at bind time and held for the lifetime of the binding; the
    // line itself is driven through the pin-control states.
    _reset_pin: PIN,
    delay: DELAY,
}

/// Owner of the sensor's power and reset resources.
///
/// Pin selection, power and reset all run under the same lock `M`, so two
/// callers never interleave hardware transitions. After [`release`] every
/// operation fails with [`Error::NotFound`].
///
/// [`release`]: Sequencer::release
pub struct Sequencer<M, PIN, CTL, SUP, DELAY>
where
    M: RawMutex,
    CTL: PinControl,
    SUP: RegulatorSupply,
{
    hw: Mutex<M, RefCell<Option<Hardware<PIN, CTL, SUP, DELAY>>>>,
}

impl<M, PIN, CTL, SUP, DELAY> Sequencer<M, PIN, CTL, SUP, DELAY>
where
    M: RawMutex,
    PIN: OutputPin,
    CTL: PinControl,
    SUP: RegulatorSupply,
    DELAY: DelayNs,
{
    /// Resolves every entry of the pin-state table and takes ownership of
    /// the sensor's resources. Fails if any pin state is missing.
    pub fn new(
        reset_pin: PIN,
        power: PowerSource<PIN>,
        mut pinctrl: CTL,
        supply: SUP,
        delay: DELAY,
    ) -> Result<Self, Error> {
        let mut lookup = |state: PinState| {
            let resolved = pinctrl.lookup_state(state.name()).map_err(|_| {
                error!("Cannot find '{}'", state);
                Error::NotFound
            })?;
            info!("Found pin control {}", state);
            Ok::<_, Error>(resolved)
        };
        let states = [
            lookup(PinState::ResetReset)?,
            lookup(PinState::ResetActive)?,
        ];

        let vregs = VREG_CONF.map(|config| RegulatorSlot {
            config,
            handle: None,
        });

        Ok(Self {
            hw: Mutex::new(RefCell::new(Some(Hardware {
                pinctrl,
                states,
                supply,
                vregs,
                power,
                _reset_pin: reset_pin,
                delay,
            }))),
        })
    }

    fn with_hw<R>(
        &self,
        f: impl FnOnce(&mut Hardware<PIN, CTL, SUP, DELAY>) -> Result<R, Error>,
    ) -> Result<R, Error> {
        self.hw.lock(|hw| match hw.borrow_mut().as_mut() {
            Some(hw) => f(hw),
            None => {
                error!("sensor resources already released");
                Err(Error::NotFound)
            }
        })
    }

    /// Applies the pin-control state whose table name prefixes `name`.
    pub fn select_pin(&self, name: &str) -> Result<(), Error> {
        self.with_hw(|hw| hw.select_by_name(name))
    }

    /// Applies one pin-control state.
    pub fn select(&self, state: PinState) -> Result<(), Error> {
        self.with_hw(|hw| hw.select(state))
    }

    /// Switches sensor power. Failures are logged and otherwise ignored;
    /// the next power command retries from scratch.
    pub fn power(&self, on: bool) {
        if let Err(e) = self.try_power(on) {
            error!("power {} failed: {}", if on { "on" } else { "off" }, e);
        }
    }

    /// Switches sensor power and reports the outcome.
    pub fn try_power(&self, on: bool) -> Result<(), Error> {
        self.with_hw(|hw| hw.power(on))
    }

    /// Pulses the reset line: reset state, settle, active state, settle.
    ///
    /// Both transitions always run. The first error, if any, is returned.
    pub fn reset(&self) -> Result<(), Error> {
        info!("anc reset");
        self.with_hw(|hw| {
            let asserted = hw.select(PinState::ResetReset);
            hw.delay.delay_ms(RESET_SETTLE_MS);
            let released = hw.select(PinState::ResetActive);
            hw.delay.delay_ms(RESET_SETTLE_MS);
            asserted.and(released)
        })
    }

    /// Gives back every resource: held regulators are disabled and put,
    /// then the pin control and GPIO lines are dropped. Idempotent.
    pub fn release(&self) {
        let hw = self.hw.lock(|hw| hw.borrow_mut().take());
        if hw.is_some() {
            info!("releasing sensor resources");
        }
        drop(hw);
    }

    pub fn is_released(&self) -> bool {
        self.hw.lock(|hw| hw.borrow().is_none())
    }

    /// Whether a handle for the named regulator is currently held.
    pub fn regulator_held(&self, name: &str) -> bool {
        self.hw.lock(|hw| {
            hw.borrow().as_ref().is_some_and(|hw| {
                hw.vregs
                    .iter()
                    .any(|slot| name.starts_with(slot.config.name) && slot.handle.is_some())
            })
        })
    }

    /// Whether the sensor is powered from a GPIO line.
    pub fn gpio_powered(&self) -> bool {
        self.hw.lock(|hw| {
            hw.borrow()
                .as_ref()
                .is_some_and(|hw| matches!(hw.power, PowerSource::Gpio(_)))
        })
    }
}

impl<PIN, CTL, SUP, DELAY> Hardware<PIN, CTL, SUP, DELAY>
where
    PIN: OutputPin,
    CTL: PinControl,
    SUP: RegulatorSupply,
{
    fn select_by_name(&mut self, name: &str) -> Result<(), Error> {
        let name = name.trim_end();
        info!("select_pin_ctl: name is {}", name);
        let state = PinState::from_name(name).ok_or_else(|| {
            error!("select_pin_ctl: {} not found", name);
            Error::NotFound
        })?;
        self.select(state)
    }

    fn select(&mut self, state: PinState) -> Result<(), Error> {
        match self.pinctrl.select_state(&self.states[state.index()]) {
            Ok(()) => {
                info!("Selected {}", state);
                Ok(())
            }
            Err(_) => {
                error!("cannot select {}", state);
                Err(Error::HardwareError)
            }
        }
    }

    fn power(&mut self, on: bool) -> Result<(), Error> {
        info!("power_onoff = {}", on);
        match &mut self.power {
            PowerSource::Gpio(pin) => {
                if on {
                    pin.set_high()?;
                } else {
                    pin.set_low()?;
                }
                Ok(())
            }
            PowerSource::Regulator => self.vreg_setup(VREG_LDO_NAME, on),
        }
    }

    fn vreg_setup(&mut self, name: &str, enable: bool) -> Result<(), Error> {
        let Some(slot) = self
            .vregs
            .iter_mut()
            .find(|slot| name.starts_with(slot.config.name))
        else {
            error!("Regulator {} not found", name);
            return Err(Error::NotFound);
        };

        if !enable {
            release_slot(&mut self.supply, slot);
            return Ok(());
        }

        if slot.handle.as_ref().is_some_and(|vreg| vreg.is_enabled()) {
            debug!("{} already enabled", name);
            return Ok(());
        }

        let mut vreg = match slot.handle.take() {
            Some(vreg) => vreg,
            None => self.supply.get(name).map_err(|_| {
                error!("Unable to get {}", name);
                Error::ResourceExhausted
            })?,
        };

        match configure(&mut vreg, &slot.config) {
            Ok(()) => {
                slot.handle = Some(vreg);
                Ok(())
            }
            Err(e) => {
                self.supply.put(vreg);
                Err(e)
            }
        }
    }
}

impl<PIN, CTL, SUP, DELAY> Drop for Hardware<PIN, CTL, SUP, DELAY>
where
    CTL: PinControl,
    SUP: RegulatorSupply,
{
    fn drop(&mut self) {
        for slot in self.vregs.iter_mut() {
            release_slot(&mut self.supply, slot);
        }
    }
}

fn release_slot<SUP: RegulatorSupply>(supply: &mut SUP, slot: &mut RegulatorSlot<SUP::Regulator>) {
    let Some(mut vreg) = slot.handle.take() else {
        return;
    };
    let name = slot.config.name;
    if vreg.is_enabled() {
        match vreg.disable() {
            Ok(()) => info!("Disabled {}", name),
            Err(e) => error!("Error disabling {}: {}", name, e),
        }
    }
    supply.put(vreg);
}

fn configure<R: Regulator>(vreg: &mut R, config: &VregConfig) -> Result<(), Error> {
    if vreg.count_voltages() > 0 {
        vreg.set_voltage(config.min_uv, config.max_uv)
            .map_err(|e| {
                error!("Unable to set voltage on {}: {}", config.name, e);
                Error::HardwareError
            })?;
    }
    vreg.set_load(config.ua_load).map_err(|e| {
        error!("Unable to set current on {}: {}", config.name, e);
        Error::HardwareError
    })?;
    vreg.enable().map_err(|e| {
        error!("Error enabling {}: {}", config.name, e);
        Error::HardwareError
    })
}
