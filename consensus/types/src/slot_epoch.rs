//! The `Slot` and `Epoch` types are defined as new types over u64 to enforce
//! type-safety between the two such that it is not possible to accidentally
//! use an epoch where a slot is expected, or vice versa.
//!
//! Arithmetic with plain `u64` values is supported on both types. Subtraction
//! saturates at zero, since slots and epochs before genesis do not exist.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Rem, Sub, SubAssign};

#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Slot(u64);

#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Epoch(u64);

impl Slot {
    pub const fn new(slot: u64) -> Slot {
        Slot(slot)
    }

    /// The epoch this slot belongs to.
    pub const fn epoch(self, slots_per_epoch: u64) -> Epoch {
        Epoch(self.0 / slots_per_epoch)
    }

    /// True if this slot is the first slot of its epoch.
    pub const fn is_epoch_start(self, slots_per_epoch: u64) -> bool {
        self.0 % slots_per_epoch == 0
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }

    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    pub const fn saturating_sub(self, other: Slot) -> Slot {
        Slot(self.0.saturating_sub(other.0))
    }

    pub const fn max(self, other: Slot) -> Slot {
        if self.0 >= other.0 { self } else { other }
    }
}

impl Epoch {
    pub const fn new(epoch: u64) -> Epoch {
        Epoch(epoch)
    }

    /// The first slot of this epoch.
    pub const fn start_slot(self, slots_per_epoch: u64) -> Slot {
        Slot(self.0 * slots_per_epoch)
    }

    /// The last slot of this epoch.
    pub const fn end_slot(self, slots_per_epoch: u64) -> Slot {
        Slot(self.0 * slots_per_epoch + slots_per_epoch - 1)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }

    pub const fn saturating_sub(self, other: u64) -> Epoch {
        Epoch(self.0.saturating_sub(other))
    }
}

macro_rules! impl_common {
    ($type:ident) => {
        impl From<u64> for $type {
            fn from(value: u64) -> $type {
                $type(value)
            }
        }

        impl From<$type> for u64 {
            fn from(value: $type) -> u64 {
                value.0
            }
        }

        impl Add<u64> for $type {
            type Output = $type;

            fn add(self, other: u64) -> $type {
                $type(self.0 + other)
            }
        }

        impl AddAssign<u64> for $type {
            fn add_assign(&mut self, other: u64) {
                self.0 += other;
            }
        }

        impl Sub<u64> for $type {
            type Output = $type;

            fn sub(self, other: u64) -> $type {
                $type(self.0.saturating_sub(other))
            }
        }

        impl SubAssign<u64> for $type {
            fn sub_assign(&mut self, other: u64) {
                self.0 = self.0.saturating_sub(other);
            }
        }

        impl Rem<u64> for $type {
            type Output = u64;

            fn rem(self, modulus: u64) -> u64 {
                self.0 % modulus
            }
        }

        impl PartialEq<u64> for $type {
            fn eq(&self, other: &u64) -> bool {
                self.0 == *other
            }
        }

        impl fmt::Display for $type {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl fmt::Debug for $type {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, "{}({})", stringify!($type), self.0)
            }
        }
    };
}

impl_common!(Slot);
impl_common!(Epoch);
