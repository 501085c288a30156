use crate::{Epoch, Hash256};
use serde::{Deserialize, Serialize};
use std::fmt;

/// An `(epoch, block_root)` pair identifying an epoch-boundary anchor on some
/// chain of blocks.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Checkpoint {
    pub epoch: Epoch,
    pub root: Hash256,
}

impl fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.epoch, self.root)
    }
}
