//! Little-endian byte parsers shared by every on-disk format in the
//! engine. All slice arguments must be long enough; callers validate
//! lengths before decoding.

use std::convert::TryInto;

macro_rules! impl_codec {
    (for $(($get:ident, $put:ident, $t:ty)),+) => {
        $(
            pub fn $get(buf: &[u8]) -> $t {
                <$t>::from_le_bytes(buf[..std::mem::size_of::<$t>()].try_into().unwrap())
            }

            pub fn $put(buf: &mut [u8], v: $t) {
                buf[..std::mem::size_of::<$t>()].copy_from_slice(&v.to_le_bytes());
            }
        )*
    }
}

impl_codec!(for
    (get_u16, put_u16, u16),
    (get_u32, put_u32, u32),
    (get_u64, put_u64, u64),
    (get_i32, put_i32, i32),
    (get_i64, put_i64, i64)
);

/// Decode a `[len:4][utf8]` string starting at `buf`, returning the
/// string and the number of bytes consumed.
pub fn read_string(buf: &[u8]) -> (String, usize) {
    let len = get_u32(buf) as usize;
    let s = String::from_utf8_lossy(&buf[4..4 + len]).into_owned();
    (s, 4 + len)
}

/// Append a `[len:4][utf8]` string to `out`.
pub fn write_string(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(&(s.len() as u32).to_le_bytes());
    out.extend_from_slice(s.as_bytes());
}
