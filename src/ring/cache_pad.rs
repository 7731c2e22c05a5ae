//! Cache-line padding to keep independently-written cursors (producer head,
//! consumer tails, slot payload) from sharing a cache line. Without this,
//! every producer publish would invalidate the cache line backing a
//! consumer's tail on another core, and vice versa.

use std::ops::{Deref, DerefMut};

#[repr(align(64))]
pub struct CacheAligned<T>(pub T);

impl<T> CacheAligned<T> {
    pub const fn new(inner: T) -> Self {
        Self(inner)
    }
}

impl<T> Deref for CacheAligned<T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T> DerefMut for CacheAligned<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.0
    }
}
