use anyhow::{anyhow, bail};
use bytes::{Buf, BufMut, Bytes};
use std::mem::size_of;


macro_rules! get_checked_impl {
    ($checked_getter: ident, $ty:ty, $getter: ident) => {
        fn $checked_getter(&mut self) -> anyhow::Result<$ty> {
            if self.remaining() < size_of::<$ty>() {
                return Err(anyhow!("buffer underflow reading {}", stringify!($ty)));
            }
            Ok(self.$getter())
        }
    }
}

/// Bounds-checked reads for the datagram layout: everything is fixed width and big endian, and
///  running out of buffer is an error rather than a panic.
pub trait WireBuf: Buf {
    get_checked_impl!(checked_u8, u8, get_u8);
    get_checked_impl!(checked_u16, u16, get_u16);
    get_checked_impl!(checked_i32, i32, get_i32);
    get_checked_impl!(checked_i64, i64, get_i64);
    get_checked_impl!(checked_f32, f32, get_f32);
    get_checked_impl!(checked_f64, f64, get_f64);

    fn checked_bool(&mut self) -> anyhow::Result<bool> {
        Ok(self.checked_u8()? != 0)
    }

    fn checked_bytes(&mut self, len: usize) -> anyhow::Result<Bytes> {
        if self.remaining() < len {
            bail!("buffer underflow: {} bytes announced, {} remaining", len, self.remaining());
        }
        Ok(self.copy_to_bytes(len))
    }

    fn checked_string(&mut self) -> anyhow::Result<String> {
        let len = self.checked_u16()? as usize;
        let raw = self.checked_bytes(len)?;
        Ok(String::from_utf8(raw.to_vec())?)
    }

    /// a byte block with an i32 length prefix
    fn checked_block(&mut self) -> anyhow::Result<Bytes> {
        let len = self.checked_i32()?;
        if len < 0 {
            bail!("negative block length {}", len);
        }
        self.checked_bytes(len as usize)
    }

    /// Reads an i32 element count, rejecting counts that can not possibly be satisfied by the
    ///  remaining buffer. This keeps a corrupt count from triggering a huge allocation.
    fn checked_count(&mut self, min_element_size: usize) -> anyhow::Result<usize> {
        let count = self.checked_i32()?;
        if count < 0 {
            bail!("negative element count {}", count);
        }
        let count = count as usize;
        if count.saturating_mul(min_element_size) > self.remaining() {
            bail!("element count {} exceeds remaining buffer of {} bytes", count, self.remaining());
        }
        Ok(count)
    }
}

impl <T: Buf> WireBuf for T {
}

pub trait WireBufMut: BufMut {
    fn put_bool(&mut self, value: bool) {
        self.put_u8(value as u8);
    }

    fn put_string(&mut self, s: &str) -> anyhow::Result<()> {
        let len: u16 = s.len().try_into()
            .map_err(|_| anyhow!("string of {} bytes does not fit a u16 length prefix", s.len()))?;
        self.put_u16(len);
        self.put_slice(s.as_bytes());
        Ok(())
    }

    fn put_block(&mut self, data: &[u8]) -> anyhow::Result<()> {
        let len: i32 = data.len().try_into()
            .map_err(|_| anyhow!("block of {} bytes is too long", data.len()))?;
        self.put_i32(len);
        self.put_slice(data);
        Ok(())
    }

    fn put_count(&mut self, count: usize) -> anyhow::Result<()> {
        let count: i32 = count.try_into()
            .map_err(|_| anyhow!("collection of {} elements is too long", count))?;
        self.put_i32(count);
        Ok(())
    }
}

impl <T: BufMut> WireBufMut for T {
}
