//! Recording fakes for the hardware collaborators.

use core::convert::Infallible;
use std::format;
use std::string::{String, ToString};
use std::sync::{Arc, Mutex};
use std::vec::Vec;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{ErrorType, OutputPin};

use crate::sequencer::{PinControl, Regulator, RegulatorSupply};
use crate::Error;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Fail {
    Lookup(&'static str),
    Select(&'static str),
    Get,
    Enable,
    SetVoltage,
    SetLoad,
    FixedVoltage,
}

#[derive(Default)]
struct LogInner {
    entries: Vec<String>,
    fails: Vec<Fail>,
}

/// Shared, ordered record of every hardware call.
#[derive(Clone, Default)]
pub struct HwLog {
    inner: Arc<Mutex<LogInner>>,
}

impl HwLog {
    pub fn push(&self, entry: impl Into<String>) {
        self.inner.lock().unwrap().entries.push(entry.into());
    }

    pub fn take(&self) -> Vec<String> {
        core::mem::take(&mut self.inner.lock().unwrap().entries)
    }

    pub fn fail(&self, fail: Fail) {
        self.inner.lock().unwrap().fails.push(fail);
    }

    pub fn fails(&self, fail: Fail) -> bool {
        self.fails_where(|f| *f == fail)
    }

    pub fn fails_where(&self, pred: impl Fn(&Fail) -> bool) -> bool {
        self.inner.lock().unwrap().fails.iter().any(pred)
    }
}

pub struct MockPin {
    name: &'static str,
    log: HwLog,
}

impl MockPin {
    pub fn new(name: &'static str, log: &HwLog) -> Self {
        Self {
            name,
            log: log.clone(),
        }
    }
}

impl ErrorType for MockPin {
    type Error = Infallible;
}

impl OutputPin for MockPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.log.push(format!("{} low", self.name));
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.log.push(format!("{} high", self.name));
        Ok(())
    }
}

pub struct MockPinctrl {
    log: HwLog,
}

impl MockPinctrl {
    pub fn new(log: &HwLog) -> Self {
        Self { log: log.clone() }
    }
}

impl PinControl for MockPinctrl {
    type State = String;

    fn lookup_state(&mut self, name: &str) -> Result<String, Error> {
        self.log.push(format!("lookup {name}"));
        if self.log.fails_where(|f| matches!(f, Fail::Lookup(n) if *n == name)) {
            return Err(Error::NotFound);
        }
        Ok(name.to_string())
    }

    fn select_state(&mut self, state: &String) -> Result<(), Error> {
        if self.log.fails_where(|f| matches!(f, Fail::Select(n) if *n == state.as_str())) {
            self.log.push(format!("select {state} failed"));
            return Err(Error::HardwareError);
        }
        self.log.push(format!("select {state}"));
        Ok(())
    }
}

pub struct MockRegulator {
    name: String,
    enabled: bool,
    log: HwLog,
}

impl Regulator for MockRegulator {
    fn count_voltages(&self) -> i32 {
        if self.log.fails(Fail::FixedVoltage) {
            0
        } else {
            1
        }
    }

    fn set_voltage(&mut self, min_uv: u32, max_uv: u32) -> Result<(), Error> {
        if self.log.fails(Fail::SetVoltage) {
            self.log.push(format!("set_voltage {min_uv}-{max_uv} failed"));
            return Err(Error::HardwareError);
        }
        self.log.push(format!("set_voltage {min_uv}-{max_uv}"));
        Ok(())
    }

    fn set_load(&mut self, ua_load: u32) -> Result<(), Error> {
        if self.log.fails(Fail::SetLoad) {
            self.log.push(format!("set_load {ua_load} failed"));
            return Err(Error::HardwareError);
        }
        self.log.push(format!("set_load {ua_load}"));
        Ok(())
    }

    fn enable(&mut self) -> Result<(), Error> {
        if self.log.fails(Fail::Enable) {
            self.log.push(format!("enable {} failed", self.name));
            return Err(Error::HardwareError);
        }
        self.enabled = true;
        self.log.push(format!("enable {}", self.name));
        Ok(())
    }

    fn disable(&mut self) -> Result<(), Error> {
        self.enabled = false;
        self.log.push(format!("disable {}", self.name));
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }
}

pub struct MockSupply {
    log: HwLog,
}

impl MockSupply {
    pub fn new(log: &HwLog) -> Self {
        Self { log: log.clone() }
    }
}

impl RegulatorSupply for MockSupply {
    type Regulator = MockRegulator;

    fn get(&mut self, name: &str) -> Result<MockRegulator, Error> {
        if self.log.fails(Fail::Get) {
            self.log.push(format!("get {name} failed"));
            return Err(Error::ResourceExhausted);
        }
        self.log.push(format!("get {name}"));
        Ok(MockRegulator {
            name: name.to_string(),
            enabled: false,
            log: self.log.clone(),
        })
    }

    fn put(&mut self, regulator: MockRegulator) {
        self.log.push(format!("put {}", regulator.name));
    }
}

pub struct MockDelay {
    log: HwLog,
}

impl MockDelay {
    pub fn new(log: &HwLog) -> Self {
        Self { log: log.clone() }
    }
}

impl DelayNs for MockDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.log.push(format!("delay {ns}ns"));
    }

    fn delay_ms(&mut self, ms: u32) {
        self.log.push(format!("delay {ms}ms"));
        std::thread::yield_now();
    }
}
