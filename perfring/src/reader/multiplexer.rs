//! # Readiness Multiplexing
//!
//! A single epoll instance watches every ring plus one control eventfd. Each
//! registration carries a tag: the CPU index for rings, [`CONTROL_TAG`] for the
//! control descriptor. Writing to the control descriptor wakes a blocked
//! [`Multiplexer::wait`] so that close can interrupt a read.

use std::os::fd::{AsFd, BorrowedFd};

use log::trace;
use nix::errno::Errno;
use nix::sys::epoll::{Epoll, EpollCreateFlags, EpollEvent, EpollFlags, EpollTimeout};
use nix::sys::eventfd::{EfdFlags, EventFd};

use crate::domain::ReaderError;

/// Tag of the control descriptor, never a valid CPU index
pub const CONTROL_TAG: u64 = u64::MAX;

pub struct Multiplexer {
    epoll: Epoll,
    events: Vec<EpollEvent>,
    registered: usize,
}

impl Multiplexer {
    /// Create a multiplexer able to report `capacity` descriptors per wake
    ///
    /// # Errors
    /// Returns `Setup` if the epoll instance cannot be created
    pub fn new(capacity: usize) -> Result<Self, ReaderError> {
        let epoll = Epoll::new(EpollCreateFlags::EPOLL_CLOEXEC)
            .map_err(|e| ReaderError::setup("epoll instance", e))?;
        Ok(Self { epoll, events: vec![EpollEvent::empty(); capacity.max(1)], registered: 0 })
    }

    /// Watch `fd` for readability, reporting it as `tag`
    ///
    /// # Errors
    /// Returns `Setup` if the descriptor cannot be added (including when it is
    /// already registered)
    pub fn register<F: AsFd>(&mut self, fd: F, tag: u64) -> Result<(), ReaderError> {
        self.epoll
            .add(fd, EpollEvent::new(EpollFlags::EPOLLIN, tag))
            .map_err(|e| ReaderError::setup(format!("epoll registration for tag {tag}"), e))?;
        self.registered += 1;
        if self.events.len() < self.registered {
            self.events.resize(self.registered, EpollEvent::empty());
        }
        Ok(())
    }

    #[must_use]
    pub fn registered(&self) -> usize {
        self.registered
    }

    /// Block until at least one descriptor is readable and return the ready tags
    ///
    /// Interrupted waits are retried.
    ///
    /// # Errors
    /// Returns `Wait` for any other epoll failure
    pub fn wait(&mut self) -> Result<impl Iterator<Item = u64> + '_, ReaderError> {
        let ready = loop {
            match self.epoll.wait(&mut self.events, EpollTimeout::NONE) {
                Ok(n) => break n,
                Err(Errno::EINTR) => {
                    trace!("epoll wait interrupted, retrying");
                }
                Err(e) => return Err(ReaderError::Wait(e)),
            }
        };
        Ok(self.events[..ready].iter().map(EpollEvent::data))
    }
}

/// Eventfd used to wake the multiplexer on shutdown
pub struct ControlSignal {
    eventfd: EventFd,
}

impl ControlSignal {
    /// # Errors
    /// Returns `Setup` if the eventfd cannot be created
    pub fn new() -> Result<Self, ReaderError> {
        let flags = EfdFlags::EFD_CLOEXEC | EfdFlags::EFD_NONBLOCK;
        let eventfd = EventFd::from_value_and_flags(0, flags)
            .map_err(|e| ReaderError::setup("control eventfd", e))?;
        Ok(Self { eventfd })
    }

    /// Make the control descriptor readable; it stays readable until closed
    ///
    /// # Errors
    /// Returns the OS error if the counter cannot be written
    pub fn signal(&self) -> Result<(), ReaderError> {
        self.eventfd.write(1).map_err(|e| ReaderError::Io(e.into()))?;
        Ok(())
    }
}

impl AsFd for ControlSignal {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.eventfd.as_fd()
    }
}
