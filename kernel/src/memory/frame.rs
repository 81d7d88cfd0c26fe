//! Physical frame and virtual page numbers.
//!
//! Frames and pages are 4 KiB units identified by their index rather than
//! their address; shifting by `PAGE_SHIFT` converts between the two.

use core::ops::{Add, AddAssign};

use x86_64::{PhysAddr, VirtAddr};

use crate::constants::memory::{PAGE_SHIFT, PAGE_SIZE};

/// Index of a physical frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Frame(pub u64);

impl Frame {
    /// Sentinel distinguishable from every addressable frame.
    pub const INVALID: Frame = Frame(u64::MAX);

    /// The frame containing `addr`.
    pub fn containing(addr: PhysAddr) -> Frame {
        Frame(addr.as_u64() >> PAGE_SHIFT)
    }

    /// Physical address of the first byte of the frame.
    pub fn address(self) -> PhysAddr {
        PhysAddr::new(self.0 << PAGE_SHIFT)
    }

    pub fn number(self) -> u64 {
        self.0
    }
}

impl Add<u64> for Frame {
    type Output = Frame;

    fn add(self, rhs: u64) -> Frame {
        Frame(self.0 + rhs)
    }
}

impl AddAssign<u64> for Frame {
    fn add_assign(&mut self, rhs: u64) {
        self.0 += rhs;
    }
}

/// Index of a virtual page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Page(pub u64);

impl Page {
    /// The page containing `addr`.
    pub fn containing(addr: VirtAddr) -> Page {
        Page(addr.as_u64() >> PAGE_SHIFT)
    }

    /// Virtual address of the first byte of the page.
    pub fn address(self) -> VirtAddr {
        VirtAddr::new(self.0 << PAGE_SHIFT)
    }

    pub fn number(self) -> u64 {
        self.0
    }
}

impl Add<u64> for Page {
    type Output = Page;

    fn add(self, rhs: u64) -> Page {
        Page(self.0 + rhs)
    }
}

impl AddAssign<u64> for Page {
    fn add_assign(&mut self, rhs: u64) {
        self.0 += rhs;
    }
}

/// Rounds `size` up to a whole number of pages.
pub fn round_to_pages(size: u64) -> u64 {
    (size + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
}
