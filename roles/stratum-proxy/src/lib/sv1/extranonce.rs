//! Splits the pool's extranonce2 space between push miners.
//!
//! Each miner gets a distinct tail appended to the pool's extranonce1, so no two miners, and no
//! miner and the getwork work units, ever build the same coinbase.
use std::{collections::HashSet, sync::Arc};

use crate::{
    error::{ProxyError, ProxyResult},
    utils::Mutex,
};

#[derive(Debug, Default)]
struct TailState {
    used: HashSet<u32>,
    next: u32,
}

#[derive(Debug, Clone, Default)]
pub struct TailAllocator {
    state: Arc<Mutex<TailState>>,
}

impl TailAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves a tail of `width` bytes. Value 0 is never handed out, it belongs to getwork.
    pub fn allocate(&self, width: usize) -> ProxyResult<ExtranonceTail> {
        if width == 0 || width > 3 {
            return Err(ProxyError::ExtranonceSpaceExhausted);
        }
        let capacity = 1u32 << (8 * width);
        let value = self.state.super_safe_lock(|state| {
            for _ in 1..capacity {
                state.next = state.next % (capacity - 1) + 1;
                if state.used.insert(state.next) {
                    return Some(state.next);
                }
            }
            None
        });
        let value = value.ok_or(ProxyError::ExtranonceSpaceExhausted)?;
        let bytes = value.to_be_bytes()[4 - width..].to_vec();
        Ok(ExtranonceTail {
            value,
            bytes,
            state: self.state.clone(),
        })
    }

    pub fn in_use(&self) -> usize {
        self.state.super_safe_lock(|state| state.used.len())
    }
}

/// A reserved tail, released when dropped.
#[derive(Debug)]
pub struct ExtranonceTail {
    value: u32,
    bytes: Vec<u8>,
    state: Arc<Mutex<TailState>>,
}

impl ExtranonceTail {
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl Drop for ExtranonceTail {
    fn drop(&mut self) {
        let value = self.value;
        self.state.super_safe_lock(|state| state.used.remove(&value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tails_are_unique_and_skip_zero() {
        let allocator = TailAllocator::new();
        let tails: Vec<_> = (0..255).map(|_| allocator.allocate(1).unwrap()).collect();
        let values: HashSet<u32> = tails.iter().map(|t| t.value).collect();
        assert_eq!(values.len(), 255);
        assert!(!values.contains(&0));
        assert!(matches!(
            allocator.allocate(1),
            Err(ProxyError::ExtranonceSpaceExhausted)
        ));
    }

    #[test]
    fn dropped_tail_is_reused() {
        let allocator = TailAllocator::new();
        let a = allocator.allocate(2).unwrap();
        assert_eq!(a.bytes(), &[0, 1]);
        assert_eq!(allocator.in_use(), 1);
        drop(a);
        assert_eq!(allocator.in_use(), 0);
        let b = allocator.allocate(2).unwrap();
        assert_eq!(b.bytes().len(), 2);
    }

    #[test]
    fn zero_width_has_no_room() {
        assert!(TailAllocator::new().allocate(0).is_err());
    }
}
