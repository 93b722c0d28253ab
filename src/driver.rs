//! Module load/unload and device bind/unbind.
//!
//! Binding walks a fixed sequence of steps. Every completed step is recorded
//! so that a failure, or a later unbind, can undo exactly what was done in
//! reverse order.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};

use drivers::sequencer::blocking::Sequencer;
use drivers::sequencer::PowerSource;
use drivers::Error;
use embedded_hal::digital::OutputPin;
use log::{error, info};
#[cfg(feature = "netlink")]
use log::warn;

#[cfg(feature = "netlink")]
use crate::bridge::{DisplayListener, EventBridge, TouchListener};
use crate::control::{Attribute, ControlFile};
use crate::platform::{
    DevNum, Platform, SensorVariant, ANC_COMPATIBLE_SW_FP, ANC_DEVICE_NAME, PROP_ENABLE_VIA_GPIO,
    PROP_GPIO_PWR, PROP_GPIO_RST, WAKELOCK_NAME,
};
#[cfg(feature = "netlink")]
use drivers::netlink::channel::NetlinkFamily;

pub type SequencerOf<P> = Sequencer<
    <P as Platform>::RawMutex,
    <P as Platform>::Pin,
    <P as Platform>::Pinctrl,
    <P as Platform>::Supply,
    <P as Platform>::Delay,
>;

#[cfg(feature = "netlink")]
pub type BridgeOf<P> = EventBridge<
    <<P as Platform>::Netlink as NetlinkFamily>::Socket,
    <P as Platform>::Wakelock,
>;

/// Major number requested at first bind. Zero asks for a dynamic one.
pub const ANC_MAJOR: u32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LifecycleState {
    Unbound,
    Probing,
    Bound,
    Unbinding,
}

/// A completed bind step, undone in reverse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BindStep {
    Class,
    Region(DevNum),
    Node(DevNum),
    CharDev(DevNum),
    Resources,
    PowerUp,
    Wakelock,
    #[cfg(feature = "netlink")]
    Notifier,
    Attributes,
}

/// A bound sensor. Handles opened on it stop working once it is unbound.
pub struct Device<P: Platform> {
    devnum: DevNum,
    bound: AtomicBool,
    steps: Vec<BindStep>,
    sequencer: SequencerOf<P>,
    #[cfg(feature = "netlink")]
    bridge: Arc<BridgeOf<P>>,
}

impl<P: Platform> Device<P> {
    pub fn devnum(&self) -> DevNum {
        self.devnum
    }

    pub fn is_bound(&self) -> bool {
        self.bound.load(Ordering::Acquire)
    }

    pub fn sequencer(&self) -> &SequencerOf<P> {
        &self.sequencer
    }

    #[cfg(feature = "netlink")]
    pub fn bridge(&self) -> &BridgeOf<P> {
        &self.bridge
    }
}

/// The loaded driver. There is one per system; it owns the platform
/// services and at most one bound device.
pub struct Module<P: Platform> {
    platform: P,
    major: u32,
    registered: bool,
    state: LifecycleState,
    device: Option<Arc<Device<P>>>,
    wakelock: Option<Arc<P::Wakelock>>,
    #[cfg(feature = "netlink")]
    bridge: Arc<BridgeOf<P>>,
    #[cfg(feature = "netlink")]
    touch_registered: bool,
}

impl<P: Platform> Module<P> {
    /// Loads the driver.
    ///
    /// Hardware that is not one of the accepted sensor variants leaves the
    /// module loaded but inert: nothing is registered and no platform
    /// resource is touched.
    pub fn load(mut platform: P) -> Result<Self, Error> {
        let code = platform.fpsensor_type();
        if SensorVariant::try_from(code).is_err() {
            error!("ancfp_init, found not jiiov sensor: {:#x}", code);
            return Ok(Self::new(platform));
        }

        platform
            .driver_register(ANC_DEVICE_NAME, ANC_COMPATIBLE_SW_FP)
            .inspect_err(|e| error!("ancfp_init {}", e))?;
        let mut module = Self::new(platform);
        module.registered = true;
        info!("ancfp_init OK");

        #[cfg(feature = "netlink")]
        {
            if let Err(e) = module.bridge.channel().init(module.platform.netlink_family()) {
                error!("netlink init failed: {}", e);
            }
            // The dispatcher takes a single handler system wide, so only a
            // matched sensor may claim it.
            let handler: Arc<dyn TouchListener> = module.bridge.clone();
            match module.platform.touch_handler_register(handler) {
                Ok(()) => {
                    module.touch_registered = true;
                    info!("register tp event handler");
                }
                Err(e) => warn!("tp event handler not registered: {}", e),
            }
        }

        Ok(module)
    }

    fn new(platform: P) -> Self {
        Self {
            platform,
            major: ANC_MAJOR,
            registered: false,
            state: LifecycleState::Unbound,
            device: None,
            wakelock: None,
            #[cfg(feature = "netlink")]
            bridge: Arc::new(BridgeOf::<P>::new()),
            #[cfg(feature = "netlink")]
            touch_registered: false,
        }
    }

    /// Unloads the driver and hands the platform back.
    pub fn unload(mut self) -> P {
        info!("ancfp_exit");
        #[cfg(feature = "netlink")]
        {
            self.bridge.channel().teardown();
            if self.touch_registered {
                self.platform.touch_handler_unregister();
                self.touch_registered = false;
            }
        }
        if self.device.is_some() {
            self.remove();
        }
        if self.registered {
            self.platform.driver_unregister(ANC_DEVICE_NAME);
            self.registered = false;
        }
        self.platform
    }

    pub fn is_registered(&self) -> bool {
        self.registered
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn device(&self) -> Option<&Arc<Device<P>>> {
        self.device.as_ref()
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn platform_mut(&mut self) -> &mut P {
        &mut self.platform
    }

    #[cfg(feature = "netlink")]
    pub fn bridge(&self) -> &Arc<BridgeOf<P>> {
        &self.bridge
    }

    /// Binds the sensor device. On failure every completed step is undone
    /// and the module is left unbound.
    pub fn probe(&mut self) -> Result<(), Error> {
        if !self.registered {
            return Err(Error::NotFound);
        }
        if self.device.is_some() || self.state != LifecycleState::Unbound {
            error!("anc_probe: device already bound");
            return Err(Error::ResourceExhausted);
        }

        info!("anc_probe");
        self.state = LifecycleState::Probing;
        let mut steps = Vec::new();
        let mut sequencer = None;

        match self.bind(&mut steps, &mut sequencer) {
            Ok(device) => {
                self.device = Some(Arc::new(device));
                self.state = LifecycleState::Bound;
                info!("anc_probe OK");
                Ok(())
            }
            Err(e) => {
                error!("anc_probe failed: {}", e);
                self.unwind(&steps, sequencer.as_ref());
                self.state = LifecycleState::Unbound;
                Err(e)
            }
        }
    }

    /// Unbinds the sensor device, undoing every bind step. Handles still
    /// open on the device fail from here on.
    pub fn remove(&mut self) {
        let Some(device) = self.device.take() else {
            return;
        };
        info!("anc_remove");
        self.state = LifecycleState::Unbinding;
        device.bound.store(false, Ordering::Release);
        self.unwind(&device.steps, Some(&device.sequencer));
        self.state = LifecycleState::Unbound;
    }

    /// Opens the control node of the bound device.
    pub fn open(&self) -> Result<ControlFile<P>, Error> {
        self.device
            .as_ref()
            .map(ControlFile::open)
            .ok_or(Error::NotFound)
    }

    /// Writes `buf` to the named attribute of the bound device.
    pub fn store(&self, name: &str, buf: &[u8]) -> Result<usize, Error> {
        let attr = Attribute::from_name(name).ok_or(Error::NotFound)?;
        let device = self.device.as_ref().ok_or(Error::NotFound)?;
        device.store(attr, buf)
    }

    fn bind(
        &mut self,
        steps: &mut Vec<BindStep>,
        sequencer: &mut Option<SequencerOf<P>>,
    ) -> Result<Device<P>, Error> {
        let platform = &mut self.platform;

        platform.class_create(ANC_DEVICE_NAME).inspect_err(|_| {
            error!("anc_probe: class_create failed");
        })?;
        steps.push(BindStep::Class);

        let devnum = if self.major == 0 {
            let devnum = platform.alloc_chrdev_region(ANC_DEVICE_NAME)?;
            self.major = devnum.major;
            devnum
        } else {
            let devnum = DevNum::new(self.major, 0);
            platform.register_chrdev_region(devnum, ANC_DEVICE_NAME)?;
            devnum
        };
        steps.push(BindStep::Region(devnum));
        info!("anc_probe: major {}", devnum.major);

        platform
            .device_create(devnum, ANC_DEVICE_NAME)
            .inspect_err(|_| error!("anc_probe: device_create failed"))?;
        steps.push(BindStep::Node(devnum));

        platform
            .cdev_add(devnum)
            .inspect_err(|_| error!("anc_probe: cdev_add failed"))?;
        steps.push(BindStep::CharDev(devnum));

        let seq = sequencer.insert(resolve_resources(platform)?);
        steps.push(BindStep::Resources);

        seq.try_power(true)?;
        steps.push(BindStep::PowerUp);

        let wakelock = platform
            .wakeup_source_register(WAKELOCK_NAME)
            .map(Arc::new)
            .ok_or_else(|| {
                error!("anc_probe: wakeup source register failed");
                Error::ResourceExhausted
            })?;
        #[cfg(feature = "netlink")]
        self.bridge.attach_wakelock(wakelock.clone());
        self.wakelock = Some(wakelock);
        steps.push(BindStep::Wakelock);

        #[cfg(feature = "netlink")]
        {
            let client: Arc<dyn DisplayListener> = self.bridge.clone();
            platform
                .display_register_client(client)
                .inspect_err(|_| error!("anc_probe: display notifier register failed"))?;
            steps.push(BindStep::Notifier);
        }

        platform
            .sysfs_create_group(Attribute::ALL)
            .inspect_err(|_| error!("anc_probe: could not create sysfs"))?;
        steps.push(BindStep::Attributes);

        let Some(sequencer) = sequencer.take() else {
            return Err(Error::HardwareError);
        };
        Ok(Device {
            devnum,
            bound: AtomicBool::new(true),
            steps: core::mem::take(steps),
            sequencer,
            #[cfg(feature = "netlink")]
            bridge: self.bridge.clone(),
        })
    }

    fn unwind(&mut self, steps: &[BindStep], sequencer: Option<&SequencerOf<P>>) {
        for step in steps.iter().rev() {
            match *step {
                BindStep::Attributes => self.platform.sysfs_remove_group(Attribute::ALL),
                #[cfg(feature = "netlink")]
                BindStep::Notifier => self.platform.display_unregister_client(),
                BindStep::Wakelock => {
                    #[cfg(feature = "netlink")]
                    drop(self.bridge.detach_wakelock());
                    self.wakelock = None;
                }
                BindStep::PowerUp => {
                    if let Some(sequencer) = sequencer {
                        sequencer.power(false);
                    }
                }
                BindStep::Resources => {
                    if let Some(sequencer) = sequencer {
                        sequencer.release();
                    }
                }
                BindStep::CharDev(devnum) => self.platform.cdev_del(devnum),
                BindStep::Node(devnum) => self.platform.device_destroy(devnum),
                BindStep::Region(devnum) => self.platform.unregister_chrdev_region(devnum),
                BindStep::Class => self.platform.class_destroy(ANC_DEVICE_NAME),
            }
        }
    }
}

/// Claims the GPIO lines and pin control described for the device and
/// builds the sequencer over them.
fn resolve_resources<P: Platform>(platform: &mut P) -> Result<SequencerOf<P>, Error> {
    if !platform.has_of_node() {
        error!("No OF node found");
        return Err(Error::InvalidArgument);
    }

    let gpio_power = platform.read_bool(PROP_ENABLE_VIA_GPIO);
    if gpio_power {
        info!("Using GPIO power");
    }

    let reset_pin = platform.request_named_gpio(PROP_GPIO_RST)?;
    let power = if gpio_power {
        let mut pin = platform.request_named_gpio(PROP_GPIO_PWR)?;
        pin.set_low()?;
        PowerSource::Gpio(pin)
    } else {
        PowerSource::Regulator
    };

    let pinctrl = platform.pinctrl_get().inspect_err(|_| {
        error!("Target does not use pinctrl");
    })?;
    let supply = platform.regulator_supply();
    let delay = platform.delay();

    Sequencer::new(reset_pin, power, pinctrl, supply, delay)
}
