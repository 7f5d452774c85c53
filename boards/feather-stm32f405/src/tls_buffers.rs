//! TLS record buffers in main SRAM
//!
//! **Read buffer (18 KB)**: largest TLS 1.3 record (16384 bytes) plus the
//! 5 byte header, 16 byte AES-128-GCM tag and padding.
//!
//! **Write buffer (16 KB)**: we control outgoing record sizes.
//!
//! The buffers are handed out once, at startup, to the one HTTPS client that
//! owns them for the rest of the program.

#![deny(unsafe_code)]

use static_cell::ConstStaticCell;

const TLS_READ_BUF_SIZE: usize = 18 * 1024;
const TLS_WRITE_BUF_SIZE: usize = 16 * 1024;

static TLS_READ_BUF: ConstStaticCell<[u8; TLS_READ_BUF_SIZE]> =
    ConstStaticCell::new([0; TLS_READ_BUF_SIZE]);
static TLS_WRITE_BUF: ConstStaticCell<[u8; TLS_WRITE_BUF_SIZE]> =
    ConstStaticCell::new([0; TLS_WRITE_BUF_SIZE]);

/// Read and write buffers for one TLS connection at a time
pub struct TlsBuffers {
    pub read: &'static mut [u8],
    pub write: &'static mut [u8],
}

/// Take the buffers. Panics on a second call.
pub fn take() -> TlsBuffers {
    TlsBuffers {
        read: TLS_READ_BUF.take(),
        write: TLS_WRITE_BUF.take(),
    }
}
