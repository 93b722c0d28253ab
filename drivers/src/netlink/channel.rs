use alloc::sync::Arc;
use alloc::vec::Vec;
use core::cell::RefCell;

use embassy_sync::blocking_mutex::CriticalSectionMutex;
use log::debug;

use super::{build_frame, frame_text, EventCode, NETLINK_ANC, USER_PORT};
use crate::Error;

/// A kernel netlink socket. Dropping it releases the socket.
pub trait NetlinkSocket: Send + Sync + 'static {
    /// Queues `frame` for `portid`. An error means nobody received it.
    fn unicast(&self, frame: Vec<u8>, portid: u32, nonblock: bool) -> Result<usize, Error>;
}

/// Callback run for every frame user space sends to the socket.
pub type InputFn<S> = fn(&S, &[u8]);

/// Creates kernel sockets for a netlink protocol unit.
pub trait NetlinkFamily {
    type Socket: NetlinkSocket;

    fn kernel_create(&mut self, unit: i32, input: InputFn<Self::Socket>) -> Option<Self::Socket>;
}

/// What happened to a message handed to the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Delivery {
    /// Queued to the listener, with the frame size
    Sent(usize),
    /// No listener bound to the port, message dropped
    NoListener,
    /// Channel not created or already torn down
    Closed,
}

/// Single-consumer channel to the user-space fingerprint service.
///
/// The socket lives in a slot that senders clone out under a short
/// critical section. Teardown empties the slot first; a send that already
/// cloned the socket finishes on its own reference and the socket is
/// released when the last reference drops.
pub struct NotifyChannel<S> {
    sock: CriticalSectionMutex<RefCell<Option<Arc<S>>>>,
}

impl<S: NetlinkSocket> Default for NotifyChannel<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: NetlinkSocket> NotifyChannel<S> {
    pub const fn new() -> Self {
        Self {
            sock: CriticalSectionMutex::new(RefCell::new(None)),
        }
    }

    /// Creates the kernel endpoint. Inbound frames are echoed back to the
    /// listener as a handshake.
    pub fn init<F>(&self, family: &mut F) -> Result<(), Error>
    where
        F: NetlinkFamily<Socket = S>,
    {
        let Some(sock) = family.kernel_create(NETLINK_ANC, Self::receive) else {
            debug!("netlink_kernel_create error!");
            return Err(Error::ResourceExhausted);
        };
        let previous = self
            .sock
            .lock(|slot| slot.borrow_mut().replace(Arc::new(sock)));
        drop(previous);
        debug!("anc_netlink_init");
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.sock.lock(|slot| slot.borrow().is_some())
    }

    pub fn send(&self, code: EventCode) -> Result<Delivery, Error> {
        self.send_bytes(&[code.into()])
    }

    /// Unicasts `payload` to the listener without blocking.
    pub fn send_bytes(&self, payload: &[u8]) -> Result<Delivery, Error> {
        if payload.is_empty() {
            return Err(Error::InvalidArgument);
        }
        let Some(sock) = self.sock.lock(|slot| slot.borrow().clone()) else {
            debug!("netlink closed, dropping message {}", payload[0]);
            return Ok(Delivery::Closed);
        };
        unicast_to_user(sock.as_ref(), payload)
    }

    /// Releases the endpoint. Later sends report [`Delivery::Closed`].
    pub fn teardown(&self) {
        let sock = self.sock.lock(|slot| slot.borrow_mut().take());
        drop(sock);
        debug!("anc_netlink_exit!");
    }

    fn receive(sock: &S, frame: &[u8]) {
        let Some(text) = frame_text(frame) else {
            return;
        };
        if text.is_empty() {
            return;
        }
        debug!("received message, length: {}", text.len());
        if let Err(e) = unicast_to_user(sock, text) {
            debug!("echo failed: {}", e);
        }
    }
}

fn unicast_to_user<S: NetlinkSocket>(sock: &S, payload: &[u8]) -> Result<Delivery, Error> {
    debug!("send message to user: {}", payload[0]);
    let frame = build_frame(payload)?;
    match sock.unicast(frame, USER_PORT, true) {
        Ok(len) => Ok(Delivery::Sent(len)),
        Err(e) => {
            debug!("no listener on port {}: {}", USER_PORT, e);
            Ok(Delivery::NoListener)
        }
    }
}
