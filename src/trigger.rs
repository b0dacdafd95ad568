use intmap::IntMap;
use serde::Serialize;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll, Waker};

/// The two independent clock domains of the FIFO.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum ClockDomain {
    Write,
    Read,
}

impl ClockDomain {
    #[inline]
    pub(crate) fn key(self) -> u64 {
        match self {
            ClockDomain::Write => 0,
            ClockDomain::Read => 1,
        }
    }
}

impl fmt::Display for ClockDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClockDomain::Write => write!(f, "clk_wr"),
            ClockDomain::Read => write!(f, "clk_rd"),
        }
    }
}

#[derive(Debug)]
struct TrigShared {
    waker: RefCell<Option<Waker>>,
    fired: Cell<bool>,
}

// Key is the clock domain. Entries are removed as soon as the edge fires, the
// clock source keeps running regardless of who listens.
#[derive(Default)]
pub(crate) struct EdgeWaiters {
    map: IntMap<VecDeque<Rc<TrigShared>>>,
}

impl EdgeWaiters {
    fn register(&mut self, domain: ClockDomain, shared: Rc<TrigShared>) {
        if let Some(waiters) = self.map.get_mut(domain.key()) {
            waiters.push_back(shared);
        } else {
            let mut waiters = VecDeque::new();
            waiters.push_back(shared);
            self.map.insert(domain.key(), waiters);
        }
    }

    /// Wake every trigger waiting on `domain`. Returns how many were woken.
    pub(crate) fn react(&mut self, domain: ClockDomain) -> usize {
        let Some(waiters) = self.map.remove(domain.key()) else {
            return 0;
        };
        let n = waiters.len();
        for shared in waiters {
            shared.fired.set(true);
            if let Some(waker) = shared.waker.borrow_mut().take() {
                waker.wake();
            }
        }
        n
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn pending(&self, domain: ClockDomain) -> usize {
        self.map.get(domain.key()).map_or(0, |w| w.len())
    }
}

/// Awaitable rising edge of a clock domain.
///
/// Registers itself on first poll and completes once the runtime has seen the
/// next edge. Spurious polls in between stay pending.
pub struct Trigger {
    domain: ClockDomain,
    waiters: Weak<RefCell<EdgeWaiters>>,
    shared: Option<Rc<TrigShared>>,
}

impl Trigger {
    pub(crate) fn rising_edge(domain: ClockDomain, waiters: &Rc<RefCell<EdgeWaiters>>) -> Self {
        Trigger {
            domain,
            waiters: Rc::downgrade(waiters),
            shared: None,
        }
    }
}

impl Future for Trigger {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some(shared) = &self.shared {
            if shared.fired.get() {
                return Poll::Ready(());
            }
            shared.waker.borrow_mut().replace(cx.waker().clone());
            return Poll::Pending;
        }

        let Some(waiters) = self.waiters.upgrade() else {
            // runtime is gone, nothing will ever fire
            return Poll::Pending;
        };
        let shared = Rc::new(TrigShared {
            waker: RefCell::new(Some(cx.waker().clone())),
            fired: Cell::new(false),
        });
        waiters.borrow_mut().register(self.domain, shared.clone());
        self.shared = Some(shared);
        Poll::Pending
    }
}
