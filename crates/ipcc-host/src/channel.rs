//! Exclusive ownership of the IPCC channel.
//!
//! The channel starts in [`Mode::Cooperative`], where only one logical
//! execution context exists (early boot) and acquisition is a lock-free flag
//! flip. Once real threads exist the owner calls
//! [`Channel::enter_concurrent_mode`], after which acquirers block until the
//! holder releases. The transition is one-way, with the sole exception of
//! [`Channel::acquire_forced`].

use std::cell::UnsafeCell;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, ThreadId};
use std::time::Duration;

use ipcc_frame::{MAX_MESSAGE_SIZE, MAX_PACKET_SIZE};
use serde::Serialize;
use tracing::{debug, warn};

use crate::engine::next_sequence;
use crate::error::{HostError, Result};

/// Upper bound on how long a blocked acquirer goes without checking its
/// cancellation token.
const CANCEL_CHECK_INTERVAL: Duration = Duration::from_millis(10);

static GLOBAL: Channel = Channel::new();

/// How acquisition is arbitrated.
///
/// A channel starts cooperative and moves to concurrent at most once; only
/// [`Channel::acquire_forced`] moves it back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Mode {
    Cooperative = 0,
    Concurrent = 1,
}

impl Mode {
    /// Inverse of `mode as u8`. Only values written by [`Channel`] are ever
    /// read back, so anything else is unreachable.
    const fn from_repr(raw: u8) -> Self {
        match raw {
            1 => Mode::Concurrent,
            _ => Mode::Cooperative,
        }
    }
}

/// Cloneable cancellation flag for blocked acquirers.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Buffers and counters shared by every transaction on a channel.
///
/// Only reachable through a [`ChannelGuard`].
pub struct Resources {
    pub(crate) msg: [u8; MAX_MESSAGE_SIZE],
    pub(crate) pkt: [u8; MAX_PACKET_SIZE],
    sequence: u64,
}

impl Resources {
    const fn new() -> Self {
        Self {
            msg: [0; MAX_MESSAGE_SIZE],
            pkt: [0; MAX_PACKET_SIZE],
            sequence: 0,
        }
    }

    /// Last sequence number handed out.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub(crate) fn advance_sequence(&mut self) -> u64 {
        self.sequence = next_sequence(self.sequence);
        self.sequence
    }

    #[cfg(test)]
    pub(crate) fn set_sequence(&mut self, sequence: u64) {
        self.sequence = sequence;
    }
}

/// Arbitrates access to one IPCC link and owns its buffers.
pub struct Channel {
    /// A [`Mode`] discriminant; atomic so `acquire` can read it without
    /// taking the owner lock.
    mode: AtomicU8,
    active: AtomicBool,
    owner: Mutex<Option<ThreadId>>,
    released: Condvar,
    resources: UnsafeCell<Resources>,
}

// SAFETY: `resources` is only handed out through a `ChannelGuard`, and the
// `active` flag guarantees at most one guard exists at a time.
unsafe impl Sync for Channel {}

impl Default for Channel {
    fn default() -> Self {
        Self::new()
    }
}

impl Channel {
    pub const fn new() -> Self {
        Self {
            mode: AtomicU8::new(Mode::Cooperative as u8),
            active: AtomicBool::new(false),
            owner: Mutex::new(None),
            released: Condvar::new(),
            resources: UnsafeCell::new(Resources::new()),
        }
    }

    /// The process-wide channel used by [`IpccClient::new`](crate::IpccClient::new).
    pub fn global() -> &'static Channel {
        &GLOBAL
    }

    pub fn mode(&self) -> Mode {
        Mode::from_repr(self.mode.load(Ordering::SeqCst))
    }

    /// Switches to concurrent arbitration. Returns `false` if the channel
    /// was already concurrent.
    pub fn enter_concurrent_mode(&self) -> bool {
        let switched = self
            .mode
            .compare_exchange(
                Mode::Cooperative as u8,
                Mode::Concurrent as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok();
        if switched {
            debug!("ipcc channel entering concurrent mode");
        }
        switched
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Thread currently holding the channel in concurrent mode.
    pub fn owner(&self) -> Option<ThreadId> {
        *self.owner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Takes exclusive ownership of the channel.
    ///
    /// In cooperative mode this fails with [`HostError::ChannelBusy`] if the
    /// channel is already held. In concurrent mode it blocks until the holder
    /// releases, or fails with [`HostError::Interrupted`] once `cancel` fires.
    pub fn acquire(&self, cancel: Option<&CancelToken>) -> Result<ChannelGuard<'_>> {
        match self.mode() {
            Mode::Cooperative => self.acquire_cooperative(),
            Mode::Concurrent => self.acquire_concurrent(cancel),
        }
    }

    fn acquire_cooperative(&self) -> Result<ChannelGuard<'_>> {
        if self.active.swap(true, Ordering::AcqRel) {
            return Err(HostError::ChannelBusy);
        }
        Ok(ChannelGuard::new(self, Mode::Cooperative))
    }

    fn acquire_concurrent(&self, cancel: Option<&CancelToken>) -> Result<ChannelGuard<'_>> {
        let mut owner = self.owner.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if !self.active.swap(true, Ordering::AcqRel) {
                *owner = Some(thread::current().id());
                return Ok(ChannelGuard::new(self, Mode::Concurrent));
            }
            if cancel.is_some_and(CancelToken::is_cancelled) {
                return Err(HostError::Interrupted);
            }
            owner = self
                .released
                .wait_timeout(owner, CANCEL_CHECK_INTERVAL)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Seizes the channel regardless of its current holder.
    ///
    /// Forces cooperative mode and clears the active flag before acquiring.
    ///
    /// # Safety
    ///
    /// Only for emergency paths (reboot, panic notification) where the
    /// system is about to stop. Any existing guard keeps aliasing the same
    /// buffers, so the caller must guarantee no other holder is running
    /// concurrently.
    pub unsafe fn acquire_forced(&self) -> ChannelGuard<'_> {
        warn!("ipcc channel forcibly acquired");
        self.mode.store(Mode::Cooperative as u8, Ordering::SeqCst);
        self.active.store(false, Ordering::SeqCst);
        self.active.store(true, Ordering::SeqCst);
        ChannelGuard::new(self, Mode::Cooperative)
    }

    fn release(&self, held: Mode) {
        match held {
            Mode::Cooperative => {
                self.active.store(false, Ordering::Release);
                // A cooperative holder may outlive the switch to concurrent
                // mode; waiters must still hear about the release.
                if self.mode() == Mode::Concurrent {
                    let _owner = self.owner.lock().unwrap_or_else(PoisonError::into_inner);
                    self.released.notify_all();
                }
            }
            Mode::Concurrent => {
                let mut owner = self.owner.lock().unwrap_or_else(PoisonError::into_inner);
                *owner = None;
                self.active.store(false, Ordering::Release);
                drop(owner);
                self.released.notify_all();
            }
        }
    }
}

/// Proof of exclusive channel ownership. Releases on drop.
pub struct ChannelGuard<'a> {
    channel: &'a Channel,
    held: Mode,
    // Ownership is tracked per thread.
    _not_send: PhantomData<*const ()>,
}

impl<'a> ChannelGuard<'a> {
    fn new(channel: &'a Channel, held: Mode) -> Self {
        Self {
            channel,
            held,
            _not_send: PhantomData,
        }
    }

    /// Mode the channel was in when this guard was taken.
    pub fn mode(&self) -> Mode {
        self.held
    }

    pub fn resources(&mut self) -> &mut Resources {
        // SAFETY: the guard is the only live handle to the resources and the
        // returned borrow is tied to `&mut self`.
        unsafe { &mut *self.channel.resources.get() }
    }
}

impl Drop for ChannelGuard<'_> {
    fn drop(&mut self) {
        self.channel.release(self.held);
    }
}
