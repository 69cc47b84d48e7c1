//! Shutdown notification
//!
//! An eventfd that, once armed, wakes every blocking wait in the server.
//! Arming it is a single `write(2)`, so a signal handler may do it through
//! [`ShutdownNotifier::raw_fd`].

use std::os::fd::{AsFd, AsRawFd, BorrowedFd, RawFd};

use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::eventfd::{EfdFlags, EventFd};

use crate::error::Result;

#[derive(Debug)]
pub struct ShutdownNotifier {
    fd: EventFd,
}

impl ShutdownNotifier {
    pub fn new() -> Result<Self> {
        let fd = EventFd::from_value_and_flags(0, EfdFlags::EFD_NONBLOCK | EfdFlags::EFD_CLOEXEC)?;
        Ok(Self { fd })
    }

    /// Request shutdown; stays armed
    pub fn notify(&self) -> Result<()> {
        self.fd.arm()?;
        Ok(())
    }

    pub fn is_notified(&self) -> bool {
        let mut fds = [PollFd::new(self.fd.as_fd(), PollFlags::POLLIN)];
        matches!(poll(&mut fds, PollTimeout::ZERO), Ok(n) if n > 0)
    }

    /// Descriptor to write an 8-byte counter increment to from a signal handler
    pub fn raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl AsFd for ShutdownNotifier {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notification_is_sticky() {
        let notifier = ShutdownNotifier::new().unwrap();
        assert!(!notifier.is_notified());
        notifier.notify().unwrap();
        assert!(notifier.is_notified());
        assert!(notifier.is_notified());
    }
}
