//! ESC/POS framing for the thermal printer

use alloc::vec::Vec;

const ESC: u8 = 0x1b;
const GS: u8 = 0x1d;

/// `ESC @`
pub const INITIALIZE: [u8; 2] = [ESC, b'@'];
/// `ESC t 0`, code page CP437
pub const CODE_PAGE_CP437: [u8; 3] = [ESC, b't', 0];
/// `ESC 2`
pub const DEFAULT_LINE_SPACE: [u8; 2] = [ESC, b'2'];
/// `ESC d 3`
pub const FEED_LINES: [u8; 3] = [ESC, b'd', 3];
/// `GS V 0`
pub const FULL_CUT: [u8; 3] = [GS, b'V', 0];

/// Bytes for one receipt: reset, `text`, feed and cut.
///
/// Characters outside ASCII are replaced with `?`; the printer runs CP437.
pub fn encode(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len() + 16);
    out.extend_from_slice(&INITIALIZE);
    out.extend_from_slice(&CODE_PAGE_CP437);
    out.extend_from_slice(&DEFAULT_LINE_SPACE);
    for c in text.chars() {
        match c {
            '\n' => out.push(b'\n'),
            c if c.is_ascii() && !c.is_ascii_control() => out.push(c as u8),
            '°' => out.push(0xf8),
            _ => out.push(b'?'),
        }
    }
    if !text.ends_with('\n') {
        out.push(b'\n');
    }
    out.extend_from_slice(&FEED_LINES);
    out.extend_from_slice(&FULL_CUT);
    out
}
