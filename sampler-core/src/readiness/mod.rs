//! Link/session readiness flags with wait-for-all semantics.
//!
//! Notification handlers (Wi-Fi events, MQTT session events) flip individual
//! flags from whatever context they run in. The sampler task parks on
//! [`ReadinessTracker::wait_all_ready`] until both flags are set at the same
//! time.
//!
//! Every transition into the all-ready state bumps an epoch counter. A waiter
//! snapshots the epoch when it is created, so a brief all-ready pulse that is
//! cleared again before the waiter gets polled still releases it.

use core::cell::RefCell;
use core::fmt;
use core::future::{Future, poll_fn};
use core::task::Poll;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::waitqueue::MultiWakerRegistration;
use embassy_time::{Duration, with_timeout};

/// Default number of tasks that may wait on the tracker concurrently.
pub const DEFAULT_WAITERS: usize = 4;

/// Individual readiness conditions gating the sampler.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ReadinessFlag {
    /// Network link is associated and has an address.
    Link,
    /// Publish session with the broker is established.
    Session,
}

impl ReadinessFlag {
    pub const ALL: [ReadinessFlag; 2] = [ReadinessFlag::Link, ReadinessFlag::Session];

    const fn bit(self) -> u8 {
        match self {
            ReadinessFlag::Link => 1 << 0,
            ReadinessFlag::Session => 1 << 1,
        }
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            ReadinessFlag::Link => "link",
            ReadinessFlag::Session => "session",
        }
    }
}

impl fmt::Display for ReadinessFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Snapshot of the readiness bitmask.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct ReadinessFlags(u8);

impl ReadinessFlags {
    const ALL_BITS: u8 = ReadinessFlag::Link.bit() | ReadinessFlag::Session.bit();

    pub const NONE: Self = Self(0);
    pub const ALL: Self = Self(Self::ALL_BITS);

    #[must_use]
    pub const fn contains(self, flag: ReadinessFlag) -> bool {
        self.0 & flag.bit() != 0
    }

    #[must_use]
    pub const fn with(self, flag: ReadinessFlag) -> Self {
        Self(self.0 | flag.bit())
    }

    #[must_use]
    pub const fn without(self, flag: ReadinessFlag) -> Self {
        Self(self.0 & !flag.bit())
    }

    #[must_use]
    pub const fn link_up(self) -> bool {
        self.contains(ReadinessFlag::Link)
    }

    #[must_use]
    pub const fn session_up(self) -> bool {
        self.contains(ReadinessFlag::Session)
    }

    /// Returns `true` when every flag is set.
    #[must_use]
    pub const fn all_ready(self) -> bool {
        self.0 & Self::ALL_BITS == Self::ALL_BITS
    }
}

impl fmt::Display for ReadinessFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = |up: bool| if up { "up" } else { "down" };
        write!(
            f,
            "link={} session={}",
            state(self.link_up()),
            state(self.session_up())
        )
    }
}

/// Returned when a bounded wait expires before both flags were set.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct NotReady {
    /// Flags observed when the wait gave up.
    pub flags: ReadinessFlags,
}

impl fmt::Display for NotReady {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "not ready ({})", self.flags)
    }
}

struct TrackerState<const WAITERS: usize> {
    flags: ReadinessFlags,
    ready_epoch: u32,
    waiters: MultiWakerRegistration<WAITERS>,
}

/// Shared readiness flag set.
///
/// `M` selects the critical section: `CriticalSectionRawMutex` when handlers run
/// in interrupt or thread contexts, `NoopRawMutex` for single-task hosts.
pub struct ReadinessTracker<M: RawMutex, const WAITERS: usize = DEFAULT_WAITERS> {
    state: Mutex<M, RefCell<TrackerState<WAITERS>>>,
}

impl<M: RawMutex, const WAITERS: usize> ReadinessTracker<M, WAITERS> {
    /// Creates a tracker with every flag cleared.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(RefCell::new(TrackerState {
                flags: ReadinessFlags::NONE,
                ready_epoch: 0,
                waiters: MultiWakerRegistration::new(),
            })),
        }
    }

    /// Sets `flag`, returning `true` when it was previously clear.
    pub fn set(&self, flag: ReadinessFlag) -> bool {
        self.update(flag, true)
    }

    /// Clears `flag`, returning `true` when it was previously set.
    pub fn clear(&self, flag: ReadinessFlag) -> bool {
        self.update(flag, false)
    }

    /// Applies a notification for `flag`; idempotent.
    pub fn update(&self, flag: ReadinessFlag, up: bool) -> bool {
        self.state.lock(|cell| {
            let mut state = cell.borrow_mut();
            let before = state.flags;
            let after = if up {
                before.with(flag)
            } else {
                before.without(flag)
            };
            if before == after {
                return false;
            }

            state.flags = after;
            if after.all_ready() && !before.all_ready() {
                state.ready_epoch = state.ready_epoch.wrapping_add(1);
                state.waiters.wake();
            }
            true
        })
    }

    /// Current flag snapshot.
    pub fn flags(&self) -> ReadinessFlags {
        self.state.lock(|cell| cell.borrow().flags)
    }

    /// Returns `true` when link and session are both up right now.
    pub fn is_all_ready(&self) -> bool {
        self.flags().all_ready()
    }

    fn ready_epoch(&self) -> u32 {
        self.state.lock(|cell| cell.borrow().ready_epoch)
    }

    /// Resolves once both flags have been simultaneously set at some point
    /// after this call; immediately when they already are.
    pub fn wait_all_ready(&self) -> impl Future<Output = ()> + '_ {
        let epoch = self.ready_epoch();
        poll_fn(move |cx| {
            self.state.lock(|cell| {
                let mut state = cell.borrow_mut();
                if state.flags.all_ready() || state.ready_epoch != epoch {
                    Poll::Ready(())
                } else {
                    state.waiters.register(cx.waker());
                    Poll::Pending
                }
            })
        })
    }

    /// Bounded variant of [`wait_all_ready`](Self::wait_all_ready).
    ///
    /// # Errors
    ///
    /// Returns [`NotReady`] with the flags observed at expiry when `timeout`
    /// elapses first.
    pub async fn wait_all_ready_for(&self, timeout: Duration) -> Result<(), NotReady> {
        with_timeout(timeout, self.wait_all_ready())
            .await
            .map_err(|_| NotReady {
                flags: self.flags(),
            })
    }
}

impl<M: RawMutex, const WAITERS: usize> Default for ReadinessTracker<M, WAITERS> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::pin::pin;
    use core::task::{Context, Waker};
    use embassy_sync::blocking_mutex::raw::NoopRawMutex;

    type Tracker = ReadinessTracker<NoopRawMutex>;

    fn poll_once<F: Future>(future: core::pin::Pin<&mut F>) -> Poll<F::Output> {
        let mut cx = Context::from_waker(Waker::noop());
        future.poll(&mut cx)
    }

    #[test]
    fn flags_start_cleared_and_toggle_independently() {
        let tracker = Tracker::new();
        assert_eq!(tracker.flags(), ReadinessFlags::NONE);

        assert!(tracker.set(ReadinessFlag::Link));
        assert!(!tracker.set(ReadinessFlag::Link));
        assert!(tracker.flags().link_up());
        assert!(!tracker.flags().session_up());

        assert!(tracker.set(ReadinessFlag::Session));
        assert!(tracker.is_all_ready());

        assert!(tracker.clear(ReadinessFlag::Link));
        assert!(!tracker.clear(ReadinessFlag::Link));
        assert!(tracker.flags().session_up());
        assert!(!tracker.is_all_ready());
    }

    #[test]
    fn wait_resolves_immediately_when_ready() {
        let tracker = Tracker::new();
        tracker.set(ReadinessFlag::Link);
        tracker.set(ReadinessFlag::Session);

        let mut wait = pin!(tracker.wait_all_ready());
        assert_eq!(poll_once(wait.as_mut()), Poll::Ready(()));
    }

    #[test]
    fn wait_stays_pending_with_one_flag() {
        let tracker = Tracker::new();
        let mut wait = pin!(tracker.wait_all_ready());
        assert_eq!(poll_once(wait.as_mut()), Poll::Pending);

        tracker.set(ReadinessFlag::Session);
        assert_eq!(poll_once(wait.as_mut()), Poll::Pending);

        tracker.set(ReadinessFlag::Link);
        assert_eq!(poll_once(wait.as_mut()), Poll::Ready(()));
    }

    #[test]
    fn transient_all_ready_pulse_releases_waiter() {
        let tracker = Tracker::new();
        let mut wait = pin!(tracker.wait_all_ready());
        assert_eq!(poll_once(wait.as_mut()), Poll::Pending);

        tracker.set(ReadinessFlag::Link);
        tracker.set(ReadinessFlag::Session);
        tracker.clear(ReadinessFlag::Session);

        assert_eq!(poll_once(wait.as_mut()), Poll::Ready(()));
    }

    #[test]
    fn pulse_before_the_call_does_not_count() {
        let tracker = Tracker::new();
        tracker.set(ReadinessFlag::Link);
        tracker.set(ReadinessFlag::Session);
        tracker.clear(ReadinessFlag::Link);

        let mut wait = pin!(tracker.wait_all_ready());
        assert_eq!(poll_once(wait.as_mut()), Poll::Pending);
    }

    #[test]
    fn flags_render_for_logs() {
        let flags = ReadinessFlags::NONE.with(ReadinessFlag::Link);
        let mut text: heapless::String<32> = heapless::String::new();
        core::fmt::write(&mut text, format_args!("{flags}")).expect("fits");
        assert_eq!(text.as_str(), "link=up session=down");
    }
}
