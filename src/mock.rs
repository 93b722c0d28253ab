//! Recording fakes for every platform service.
//!
//! All fakes share one [`Shared`] record: an ordered log of hardware calls,
//! the set of resources currently held (`+ name` / `- name` in the log),
//! injected failures, and whatever reached the listener socket.

use core::convert::Infallible;
use std::format;
use std::string::{String, ToString};
use std::sync::{Arc, Mutex, MutexGuard, Once};
use std::vec::Vec;

use drivers::netlink::channel::{InputFn, NetlinkFamily, NetlinkSocket};
use drivers::netlink::{EventCode, NLMSG_HDRLEN};
use drivers::sequencer::{PinControl, Regulator, RegulatorSupply};
use drivers::Error;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{ErrorType, OutputPin};
use log::{Level, LevelFilter, Log, Metadata, Record};

#[cfg(feature = "netlink")]
use crate::bridge::{DisplayEvent, DisplayListener, TouchListener, UnderscreenInfo};
use crate::control::Attribute;
use crate::driver::Module;
use crate::platform::{DevNum, Platform, WakeupSource, PROP_ENABLE_VIA_GPIO};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Fail {
    DriverRegister,
    Class,
    Region,
    Node,
    CharDev,
    Gpio(&'static str),
    Pinctrl,
    Lookup(&'static str),
    Select(&'static str),
    RegulatorGet,
    RegulatorEnable,
    Wakelock,
    Notifier,
    Sysfs,
    TouchRegister,
    NetlinkCreate,
}

struct Inner {
    log: Vec<String>,
    held: Vec<String>,
    fails: Vec<Fail>,
    frames: Vec<Vec<u8>>,
    listening: bool,
    wakeups: Vec<u32>,
    attributes: Vec<&'static str>,
    sensor: u32,
    of_node: bool,
    gpio_power: bool,
    #[cfg(feature = "netlink")]
    touch: Option<Arc<dyn TouchListener>>,
    #[cfg(feature = "netlink")]
    display: Option<Arc<dyn DisplayListener>>,
}

#[derive(Clone)]
pub struct Shared {
    inner: Arc<Mutex<Inner>>,
}

impl Default for Shared {
    fn default() -> Self {
        Self::with_listener(false)
    }
}

impl Shared {
    /// A platform whose user-space service is bound to the listener port.
    pub fn listening() -> Self {
        Self::with_listener(true)
    }

    fn with_listener(listening: bool) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                log: Vec::new(),
                held: Vec::new(),
                fails: Vec::new(),
                frames: Vec::new(),
                listening,
                wakeups: Vec::new(),
                attributes: Vec::new(),
                sensor: 0x0301,
                of_node: true,
                gpio_power: false,
                #[cfg(feature = "netlink")]
                touch: None,
                #[cfg(feature = "netlink")]
                display: None,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap()
    }

    pub fn push(&self, entry: impl Into<String>) {
        self.lock().log.push(entry.into());
    }

    pub fn take_log(&self) -> Vec<String> {
        core::mem::take(&mut self.lock().log)
    }

    fn acquire(&self, resource: &str) {
        let mut inner = self.lock();
        inner.log.push(format!("+ {resource}"));
        inner.held.push(resource.to_string());
    }

    fn release(&self, resource: &str) {
        let mut inner = self.lock();
        inner.log.push(format!("- {resource}"));
        let index = inner.held.iter().position(|held| held == resource);
        assert!(index.is_some(), "released {resource} twice");
        if let Some(index) = index {
            inner.held.remove(index);
        }
    }

    /// Resources acquired and not yet released.
    pub fn held(&self) -> Vec<String> {
        self.lock().held.clone()
    }

    pub fn fail(&self, fail: Fail) {
        self.lock().fails.push(fail);
    }

    pub fn clear_fails(&self) {
        self.lock().fails.clear();
    }

    fn fails_where(&self, pred: impl Fn(&Fail) -> bool) -> bool {
        self.lock().fails.iter().any(pred)
    }

    fn fails(&self, fail: Fail) -> bool {
        self.fails_where(|f| *f == fail)
    }

    pub fn set_sensor(&self, code: u32) {
        self.lock().sensor = code;
    }

    pub fn set_of_node(&self, present: bool) {
        self.lock().of_node = present;
    }

    pub fn set_gpio_power(&self, enabled: bool) {
        self.lock().gpio_power = enabled;
    }

    pub fn attributes(&self) -> Vec<&'static str> {
        self.lock().attributes.clone()
    }

    pub fn netlink(&self) -> MockNetlink {
        MockNetlink {
            shared: self.clone(),
        }
    }

    /// Event codes received by the listener, oldest first.
    pub fn events(&self) -> Vec<EventCode> {
        self.lock()
            .frames
            .iter()
            .filter_map(|frame| frame.get(NLMSG_HDRLEN).copied())
            .filter_map(|byte| EventCode::try_from(byte).ok())
            .collect()
    }

    pub fn wakeups(&self) -> Vec<u32> {
        self.lock().wakeups.clone()
    }

    /// Reports a touch through the registered touch handler.
    #[cfg(feature = "netlink")]
    pub fn touch(&self, touch_state: u32) {
        let handler = self.lock().touch.clone();
        if let Some(handler) = handler {
            handler.on_touch(&UnderscreenInfo {
                x: 540,
                y: 1800,
                touch_state,
                area_rate: 80,
            });
        }
    }

    /// Runs the display notifier chain.
    #[cfg(feature = "netlink")]
    pub fn display(&self, event: u64, data: &[u8]) {
        let client = self.lock().display.clone();
        if let Some(client) = client {
            client.on_display_event(DisplayEvent::decode(event, Some(data)));
        }
    }
}

pub struct MockPin {
    label: &'static str,
    shared: Shared,
}

impl ErrorType for MockPin {
    type Error = Infallible;
}

impl OutputPin for MockPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.shared.push(format!("{} low", self.label));
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.shared.push(format!("{} high", self.label));
        Ok(())
    }
}

impl Drop for MockPin {
    fn drop(&mut self) {
        self.shared.release(&format!("gpio:{}", self.label));
    }
}

pub struct MockPinctrl {
    shared: Shared,
}

impl PinControl for MockPinctrl {
    type State = String;

    fn lookup_state(&mut self, name: &str) -> Result<String, Error> {
        if self
            .shared
            .fails_where(|f| matches!(f, Fail::Lookup(n) if *n == name))
        {
            return Err(Error::NotFound);
        }
        Ok(name.to_string())
    }

    fn select_state(&mut self, state: &String) -> Result<(), Error> {
        if self
            .shared
            .fails_where(|f| matches!(f, Fail::Select(n) if *n == state.as_str()))
        {
            self.shared.push(format!("select {state} failed"));
            return Err(Error::HardwareError);
        }
        self.shared.push(format!("select {state}"));
        Ok(())
    }
}

impl Drop for MockPinctrl {
    fn drop(&mut self) {
        self.shared.release("pinctrl");
    }
}

pub struct MockRegulator {
    name: String,
    enabled: bool,
    shared: Shared,
}

impl Regulator for MockRegulator {
    fn count_voltages(&self) -> i32 {
        1
    }

    fn set_voltage(&mut self, min_uv: u32, max_uv: u32) -> Result<(), Error> {
        self.shared.push(format!("set_voltage {min_uv}-{max_uv}"));
        Ok(())
    }

    fn set_load(&mut self, ua_load: u32) -> Result<(), Error> {
        self.shared.push(format!("set_load {ua_load}"));
        Ok(())
    }

    fn enable(&mut self) -> Result<(), Error> {
        if self.shared.fails(Fail::RegulatorEnable) {
            return Err(Error::HardwareError);
        }
        self.enabled = true;
        self.shared.push(format!("enable {}", self.name));
        Ok(())
    }

    fn disable(&mut self) -> Result<(), Error> {
        self.enabled = false;
        self.shared.push(format!("disable {}", self.name));
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }
}

pub struct MockSupply {
    shared: Shared,
}

impl RegulatorSupply for MockSupply {
    type Regulator = MockRegulator;

    fn get(&mut self, name: &str) -> Result<MockRegulator, Error> {
        if self.shared.fails(Fail::RegulatorGet) {
            return Err(Error::ResourceExhausted);
        }
        self.shared.acquire(&format!("vreg:{name}"));
        Ok(MockRegulator {
            name: name.to_string(),
            enabled: false,
            shared: self.shared.clone(),
        })
    }

    fn put(&mut self, regulator: MockRegulator) {
        self.shared.release(&format!("vreg:{}", regulator.name));
    }
}

pub struct MockDelay {
    shared: Shared,
}

impl DelayNs for MockDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.shared.push(format!("delay {ns}ns"));
    }

    fn delay_ms(&mut self, ms: u32) {
        self.shared.push(format!("delay {ms}ms"));
        std::thread::yield_now();
    }
}

pub struct MockWakelock {
    shared: Shared,
}

impl MockWakelock {
    pub fn new(shared: &Shared) -> Self {
        shared.acquire("wakelock");
        Self {
            shared: shared.clone(),
        }
    }
}

impl WakeupSource for MockWakelock {
    fn wakeup_event(&self, msecs: u32) {
        self.shared.lock().wakeups.push(msecs);
    }
}

impl Drop for MockWakelock {
    fn drop(&mut self) {
        self.shared.release("wakelock");
    }
}

pub struct MockSocket {
    shared: Shared,
}

impl NetlinkSocket for MockSocket {
    fn unicast(&self, frame: Vec<u8>, _portid: u32, _nonblock: bool) -> Result<usize, Error> {
        let mut inner = self.shared.lock();
        if !inner.listening {
            return Err(Error::NotFound);
        }
        let len = frame.len();
        inner.frames.push(frame);
        Ok(len)
    }
}

impl Drop for MockSocket {
    fn drop(&mut self) {
        self.shared.release("socket");
    }
}

pub struct MockNetlink {
    shared: Shared,
}

impl NetlinkFamily for MockNetlink {
    type Socket = MockSocket;

    fn kernel_create(&mut self, _unit: i32, _input: InputFn<MockSocket>) -> Option<MockSocket> {
        if self.shared.fails(Fail::NetlinkCreate) {
            return None;
        }
        self.shared.acquire("socket");
        Some(MockSocket {
            shared: self.shared.clone(),
        })
    }
}

pub struct MockPlatform {
    shared: Shared,
    #[cfg_attr(not(feature = "netlink"), allow(dead_code))]
    netlink: MockNetlink,
}

impl MockPlatform {
    pub fn new(shared: &Shared) -> Self {
        Self {
            shared: shared.clone(),
            netlink: shared.netlink(),
        }
    }

    fn step(&self, fail: Fail, resource: &str, error: Error) -> Result<(), Error> {
        if self.shared.fails(fail) {
            return Err(error);
        }
        self.shared.acquire(resource);
        Ok(())
    }
}

impl Platform for MockPlatform {
    type RawMutex = CriticalSectionRawMutex;
    type Pin = MockPin;
    type PinState = String;
    type Pinctrl = MockPinctrl;
    type Regulator = MockRegulator;
    type Supply = MockSupply;
    type Delay = MockDelay;
    type Wakelock = MockWakelock;
    #[cfg(feature = "netlink")]
    type Netlink = MockNetlink;

    fn fpsensor_type(&self) -> u32 {
        self.shared.lock().sensor
    }

    fn driver_register(&mut self, _name: &str, _compatible: &str) -> Result<(), Error> {
        self.step(Fail::DriverRegister, "driver", Error::HardwareError)
    }

    fn driver_unregister(&mut self, _name: &str) {
        self.shared.release("driver");
    }

    fn has_of_node(&self) -> bool {
        self.shared.lock().of_node
    }

    fn read_bool(&self, property: &str) -> bool {
        property == PROP_ENABLE_VIA_GPIO && self.shared.lock().gpio_power
    }

    fn request_named_gpio(&mut self, label: &str) -> Result<MockPin, Error> {
        if self
            .shared
            .fails_where(|f| matches!(f, Fail::Gpio(l) if *l == label))
        {
            return Err(Error::NotFound);
        }
        let label = match label {
            crate::platform::PROP_GPIO_RST => crate::platform::PROP_GPIO_RST,
            crate::platform::PROP_GPIO_PWR => crate::platform::PROP_GPIO_PWR,
            _ => return Err(Error::NotFound),
        };
        self.shared.acquire(&format!("gpio:{label}"));
        Ok(MockPin {
            label,
            shared: self.shared.clone(),
        })
    }

    fn pinctrl_get(&mut self) -> Result<MockPinctrl, Error> {
        self.step(Fail::Pinctrl, "pinctrl", Error::InvalidArgument)?;
        Ok(MockPinctrl {
            shared: self.shared.clone(),
        })
    }

    fn regulator_supply(&mut self) -> MockSupply {
        MockSupply {
            shared: self.shared.clone(),
        }
    }

    fn delay(&mut self) -> MockDelay {
        MockDelay {
            shared: self.shared.clone(),
        }
    }

    fn class_create(&mut self, _name: &str) -> Result<(), Error> {
        self.step(Fail::Class, "class", Error::HardwareError)
    }

    fn class_destroy(&mut self, _name: &str) {
        self.shared.release("class");
    }

    fn alloc_chrdev_region(&mut self, _name: &str) -> Result<DevNum, Error> {
        self.shared.push("alloc region");
        self.step(Fail::Region, "region", Error::ResourceExhausted)?;
        Ok(DevNum::new(240, 0))
    }

    fn register_chrdev_region(&mut self, devnum: DevNum, _name: &str) -> Result<(), Error> {
        self.shared.push(format!("register region {}", devnum.major));
        self.step(Fail::Region, "region", Error::ResourceExhausted)
    }

    fn unregister_chrdev_region(&mut self, _devnum: DevNum) {
        self.shared.release("region");
    }

    fn device_create(&mut self, _devnum: DevNum, _name: &str) -> Result<(), Error> {
        self.step(Fail::Node, "node", Error::HardwareError)
    }

    fn device_destroy(&mut self, _devnum: DevNum) {
        self.shared.release("node");
    }

    fn cdev_add(&mut self, _devnum: DevNum) -> Result<(), Error> {
        self.step(Fail::CharDev, "cdev", Error::HardwareError)
    }

    fn cdev_del(&mut self, _devnum: DevNum) {
        self.shared.release("cdev");
    }

    fn wakeup_source_register(&mut self, _name: &str) -> Option<MockWakelock> {
        if self.shared.fails(Fail::Wakelock) {
            return None;
        }
        Some(MockWakelock::new(&self.shared))
    }

    fn sysfs_create_group(&mut self, attrs: &[Attribute]) -> Result<(), Error> {
        self.step(Fail::Sysfs, "sysfs", Error::ResourceExhausted)?;
        self.shared.lock().attributes = attrs.iter().map(|attr| attr.name()).collect();
        Ok(())
    }

    fn sysfs_remove_group(&mut self, _attrs: &[Attribute]) {
        self.shared.lock().attributes.clear();
        self.shared.release("sysfs");
    }

    #[cfg(feature = "netlink")]
    fn netlink_family(&mut self) -> &mut MockNetlink {
        &mut self.netlink
    }

    #[cfg(feature = "netlink")]
    fn display_register_client(&mut self, client: Arc<dyn DisplayListener>) -> Result<(), Error> {
        self.step(Fail::Notifier, "display-notifier", Error::HardwareError)?;
        self.shared.lock().display = Some(client);
        Ok(())
    }

    #[cfg(feature = "netlink")]
    fn display_unregister_client(&mut self) {
        let client = self.shared.lock().display.take();
        drop(client);
        self.shared.release("display-notifier");
    }

    #[cfg(feature = "netlink")]
    fn touch_handler_register(&mut self, handler: Arc<dyn TouchListener>) -> Result<(), Error> {
        if self.shared.lock().touch.is_some() {
            return Err(Error::ResourceExhausted);
        }
        self.step(Fail::TouchRegister, "touch-handler", Error::ResourceExhausted)?;
        self.shared.lock().touch = Some(handler);
        Ok(())
    }

    #[cfg(feature = "netlink")]
    fn touch_handler_unregister(&mut self) {
        let handler = self.shared.lock().touch.take();
        drop(handler);
        self.shared.release("touch-handler");
    }
}

/// Keeps every warning and error logged by the driver.
struct CaptureLogger;

static CAPTURED: Mutex<Vec<String>> = Mutex::new(Vec::new());
static LOGGER: CaptureLogger = CaptureLogger;
static INIT: Once = Once::new();

impl Log for CaptureLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Warn
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            CAPTURED
                .lock()
                .unwrap()
                .push(format!("{}: {}", record.level(), record.args()));
        }
    }

    fn flush(&self) {}
}

/// Routes warnings and errors from every test into [`captured_warnings`].
pub fn capture_warnings() {
    INIT.call_once(|| {
        if log::set_logger(&LOGGER).is_ok() {
            log::set_max_level(LevelFilter::Warn);
        }
    });
}

/// Warnings and errors logged by any test since [`capture_warnings`].
pub fn captured_warnings() -> Vec<String> {
    CAPTURED.lock().unwrap().clone()
}

/// A loaded module with its device bound.
pub fn bound_module(shared: &Shared) -> Module<MockPlatform> {
    let mut module = Module::load(MockPlatform::new(shared)).unwrap();
    module.probe().unwrap();
    module
}
