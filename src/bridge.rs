//! Touch and display events forwarded to the fingerprint service.
//!
//! The touch dispatcher and the display notifier chain call in from their
//! own contexts, often atomic ones. Nothing here takes the sequencing lock:
//! the cached flags are atomics and the channel and wake-lock slots are
//! only held for the time it takes to clone a reference.

use alloc::sync::Arc;
use core::cell::RefCell;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use drivers::netlink::channel::{Delivery, NetlinkSocket, NotifyChannel};
use drivers::netlink::EventCode;
use embassy_sync::blocking_mutex::CriticalSectionMutex;
use log::{debug, error, warn};
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::platform::WakeupSource;

/// How long a touch transition keeps the system awake.
pub const WAKELOCK_HOLD_MS: u32 = 400;

/// `touch_state` value reported for a finger on the sensor area.
pub const TOUCH_STATE_DOWN: u32 = 1;

/// Display notifier event numbers.
pub const MSM_DRM_EVENT_BLANK: u64 = 0x01;
pub const MSM_DRM_EARLY_EVENT_BLANK: u64 = 0x02;
pub const MSM_DRM_ONSCREENFINGERPRINT_EVENT: u64 = 0x10;

/// Under-display fingerprint area report from the touch panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct UnderscreenInfo {
    pub x: u16,
    pub y: u16,
    pub touch_state: u32,
    pub area_rate: u8,
}

/// On-screen fingerprint UI mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OpMode {
    Disappear = 0,
    UiReady = 1,
}

/// Panel blank state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u32)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BlankCode {
    Unblank = 0,
    Powerdown = 4,
}

/// A display notifier call, decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DisplayEvent {
    /// Raw op-mode byte of an on-screen fingerprint event
    OnscreenFingerprint(u8),
    /// Raw blank code of an early blank event
    EarlyBlank(u32),
    /// Anything else, including events without data
    Other(u64),
}

impl DisplayEvent {
    /// Decodes the notifier's event number and its data block.
    pub fn decode(event: u64, data: Option<&[u8]>) -> Self {
        match (event, data) {
            (MSM_DRM_ONSCREENFINGERPRINT_EVENT, Some(&[mode, ..])) => {
                DisplayEvent::OnscreenFingerprint(mode)
            }
            (MSM_DRM_EARLY_EVENT_BLANK, Some(&[a, b, c, d, ..])) => {
                DisplayEvent::EarlyBlank(u32::from_ne_bytes([a, b, c, d]))
            }
            (MSM_DRM_ONSCREENFINGERPRINT_EVENT | MSM_DRM_EARLY_EVENT_BLANK, data) => {
                warn!(
                    "[anc] display event {:#x} with {} data bytes, ignored",
                    event,
                    data.map_or(0, <[u8]>::len)
                );
                DisplayEvent::Other(event)
            }
            _ => DisplayEvent::Other(event),
        }
    }
}

pub trait TouchListener: Send + Sync {
    fn on_touch(&self, info: &UnderscreenInfo);
}

pub trait DisplayListener: Send + Sync {
    fn on_display_event(&self, event: DisplayEvent);
}

/// Shared state behind both event entry points.
pub struct EventBridge<S, W> {
    channel: NotifyChannel<S>,
    last_touch: AtomicU32,
    fb_black: AtomicBool,
    wakelock: CriticalSectionMutex<RefCell<Option<Arc<W>>>>,
}

impl<S, W> Default for EventBridge<S, W>
where
    S: NetlinkSocket,
    W: WakeupSource,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<S, W> EventBridge<S, W>
where
    S: NetlinkSocket,
    W: WakeupSource,
{
    pub const fn new() -> Self {
        Self {
            channel: NotifyChannel::new(),
            last_touch: AtomicU32::new(0),
            fb_black: AtomicBool::new(false),
            wakelock: CriticalSectionMutex::new(RefCell::new(None)),
        }
    }

    pub fn channel(&self) -> &NotifyChannel<S> {
        &self.channel
    }

    pub fn attach_wakelock(&self, wakelock: Arc<W>) {
        self.wakelock
            .lock(|slot| slot.borrow_mut().replace(wakelock));
    }

    pub fn detach_wakelock(&self) -> Option<Arc<W>> {
        self.wakelock.lock(|slot| slot.borrow_mut().take())
    }

    /// Forgets the last touch state so the next report is always sent.
    pub fn clear_touch_flag(&self) {
        self.last_touch.store(0, Ordering::Relaxed);
    }

    pub fn last_touch_state(&self) -> u32 {
        self.last_touch.load(Ordering::Relaxed)
    }

    pub fn display_blanked(&self) -> bool {
        self.fb_black.load(Ordering::Relaxed)
    }

    /// Forwards a touch transition. Repeats of the current state are
    /// dropped. Returns the event sent, if any.
    pub fn touch(&self, info: &UnderscreenInfo) -> Option<EventCode> {
        let state = info.touch_state;
        if state == self.last_touch.load(Ordering::Relaxed) {
            return None;
        }

        let code = if state == TOUCH_STATE_DOWN {
            EventCode::TouchDown
        } else {
            EventCode::TouchUp
        };

        match self.wakelock.lock(|slot| slot.borrow().clone()) {
            Some(wakelock) => wakelock.wakeup_event(WAKELOCK_HOLD_MS),
            None => debug!("no wakelock, sending {} unguarded", code),
        }
        self.forward(code);
        self.last_touch.store(state, Ordering::Relaxed);
        Some(code)
    }

    /// Forwards display power and fingerprint UI changes. Returns the event
    /// sent, if any.
    pub fn display(&self, event: DisplayEvent) -> Option<EventCode> {
        match event {
            DisplayEvent::OnscreenFingerprint(mode) => match OpMode::try_from(mode) {
                Ok(OpMode::UiReady) => Some(self.forward(EventCode::UiReady)),
                Ok(OpMode::Disappear) => None,
                Err(_) => {
                    error!("[anc] Unknown MSM_DRM_ONSCREENFINGERPRINT_EVENT: {}", mode);
                    None
                }
            },
            DisplayEvent::EarlyBlank(blank) => match BlankCode::try_from(blank) {
                Ok(BlankCode::Powerdown) => {
                    self.fb_black.store(true, Ordering::Relaxed);
                    Some(self.forward(EventCode::ScreenOff))
                }
                Ok(BlankCode::Unblank) => {
                    self.fb_black.store(false, Ordering::Relaxed);
                    Some(self.forward(EventCode::ScreenOn))
                }
                Err(_) => {
                    error!("[anc] Unknown screen state: {}", blank);
                    None
                }
            },
            DisplayEvent::Other(_) => None,
        }
    }

    fn forward(&self, code: EventCode) -> EventCode {
        match self.channel.send(code) {
            Ok(Delivery::Sent(_)) => debug!("sent {}", code),
            Ok(Delivery::NoListener) => debug!("{} dropped, no listener", code),
            Ok(Delivery::Closed) => debug!("{} dropped, channel closed", code),
            Err(e) => warn!("failed to send {}: {}", code, e),
        }
        code
    }
}

impl<S, W> TouchListener for EventBridge<S, W>
where
    S: NetlinkSocket,
    W: WakeupSource,
{
    fn on_touch(&self, info: &UnderscreenInfo) {
        self.touch(info);
    }
}

impl<S, W> DisplayListener for EventBridge<S, W>
where
    S: NetlinkSocket,
    W: WakeupSource,
{
    fn on_display_event(&self, event: DisplayEvent) {
        self.display(event);
    }
}
