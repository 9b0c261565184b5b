//! Dev-server port pool.
//!
//! Ports are handed out from a fixed inclusive range. Free ports sit in a FIFO
//! queue seeded in ascending order, so allocation cycles round-robin through
//! the range and a released port goes to the back of the line.

use std::collections::VecDeque;

use previewd_common::ConfigError;

use crate::domain::error::InstanceError;

#[derive(Debug, Clone)]
pub struct PortPool {
    start: u16,
    free: VecDeque<u16>,
    /// Indexed by `port - start`.
    in_use: Vec<bool>,
}

impl PortPool {
    /// Build a pool over `start..=end`.
    ///
    /// # Errors
    ///
    /// Returns an error if the range is empty.
    pub fn new(start: u16, end: u16) -> Result<Self, ConfigError> {
        if start > end {
            return Err(ConfigError::EmptyPortRange { start, end });
        }
        let free: VecDeque<u16> = (start..=end).collect();
        let in_use = vec![false; free.len()];
        Ok(Self {
            start,
            free,
            in_use,
        })
    }

    /// Take the next free port.
    ///
    /// # Errors
    ///
    /// Returns [`InstanceError::PortPoolExhausted`] when every port is in use.
    pub fn acquire(&mut self) -> Result<u16, InstanceError> {
        let port = self.free.pop_front().ok_or(InstanceError::PortPoolExhausted {
            capacity: self.capacity(),
        })?;
        let slot = self.slot(port);
        self.in_use[slot] = true;
        Ok(port)
    }

    /// Return `port` to the pool.
    ///
    /// Returns `false` (and changes nothing) for ports outside the range or
    /// ports that are already free.
    pub fn release(&mut self, port: u16) -> bool {
        if !self.contains(port) {
            return false;
        }
        let slot = self.slot(port);
        if !self.in_use[slot] {
            return false;
        }
        self.in_use[slot] = false;
        self.free.push_back(port);
        true
    }

    #[must_use]
    pub fn is_in_use(&self, port: u16) -> bool {
        self.contains(port) && self.in_use[self.slot(port)]
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.in_use.len()
    }

    #[must_use]
    pub fn in_use_count(&self) -> usize {
        self.capacity() - self.free.len()
    }

    fn contains(&self, port: u16) -> bool {
        port >= self.start && usize::from(port - self.start) < self.in_use.len()
    }

    fn slot(&self, port: u16) -> usize {
        usize::from(port - self.start)
    }
}
