#![deny(unsafe_code)]
//! One hardware RNG, several users
//!
//! The TLS handshake and the API server (reminder ids) both draw from the
//! RNG peripheral. Both run in the network task, and each draw is a
//! synchronous call, so a `RefCell` is enough.

use core::cell::RefCell;

use rand_core::{CryptoRng, RngCore};

pub struct SharedRng<'a, R> {
    inner: &'a RefCell<R>,
}

impl<'a, R> SharedRng<'a, R> {
    pub fn new(inner: &'a RefCell<R>) -> Self {
        Self { inner }
    }
}

impl<R: RngCore> RngCore for SharedRng<'_, R> {
    fn next_u32(&mut self) -> u32 {
        self.inner.borrow_mut().next_u32()
    }

    fn next_u64(&mut self) -> u64 {
        self.inner.borrow_mut().next_u64()
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.inner.borrow_mut().fill_bytes(dest)
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand_core::Error> {
        self.inner.borrow_mut().try_fill_bytes(dest)
    }
}

impl<R: CryptoRng> CryptoRng for SharedRng<'_, R> {}
