// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Random-access, bounds-checked, endian-aware view over a payload.

use crate::error::{DlError, DlResult};
use crate::registry::{Endian, Format, PtrSize};

/// Generate endian-aware positional read methods for primitive types.
macro_rules! impl_read_at {
    ($name:ident, $type:ty, $size:expr) => {
        pub(crate) fn $name(&self, offset: usize) -> DlResult<$type> {
            let mut bytes = [0u8; $size];
            bytes.copy_from_slice(self.bytes_at(offset, $size)?);
            Ok(match self.format.endian {
                Endian::Little => <$type>::from_le_bytes(bytes),
                Endian::Big => <$type>::from_be_bytes(bytes),
            })
        }
    };
}

#[derive(Clone, Copy)]
pub(crate) struct BinaryReader<'a> {
    data: &'a [u8],
    format: Format,
}

impl<'a> BinaryReader<'a> {
    pub(crate) fn new(data: &'a [u8], format: Format) -> Self {
        Self { data, format }
    }

    pub(crate) fn format(&self) -> Format {
        self.format
    }

    pub(crate) fn ptr_size(&self) -> PtrSize {
        self.format.ptr_size
    }

    pub(crate) fn bytes_at(&self, offset: usize, len: usize) -> DlResult<&'a [u8]> {
        offset
            .checked_add(len)
            .and_then(|end| self.data.get(offset..end))
            .ok_or_else(|| {
                DlError::malformed(format!(
                    "read of {} bytes at offset {} past end of {}-byte payload",
                    len,
                    offset,
                    self.data.len()
                ))
            })
    }

    pub(crate) fn read_u8_at(&self, offset: usize) -> DlResult<u8> {
        Ok(self.bytes_at(offset, 1)?[0])
    }

    impl_read_at!(read_u16_at, u16, 2);
    impl_read_at!(read_u32_at, u32, 4);
    impl_read_at!(read_u64_at, u64, 8);

    pub(crate) fn read_f32_at(&self, offset: usize) -> DlResult<f32> {
        Ok(f32::from_bits(self.read_u32_at(offset)?))
    }

    pub(crate) fn read_f64_at(&self, offset: usize) -> DlResult<f64> {
        Ok(f64::from_bits(self.read_u64_at(offset)?))
    }

    /// Read an unsigned integer of `size` bytes (1, 2, 4 or 8).
    pub(crate) fn read_uint_at(&self, offset: usize, size: u32) -> DlResult<u64> {
        Ok(match size {
            1 => u64::from(self.read_u8_at(offset)?),
            2 => u64::from(self.read_u16_at(offset)?),
            4 => u64::from(self.read_u32_at(offset)?),
            _ => self.read_u64_at(offset)?,
        })
    }

    /// Read an offset slot. Returns `None` for the null offset.
    pub(crate) fn read_ptr_at(&self, offset: usize) -> DlResult<Option<u64>> {
        let raw = match self.format.ptr_size {
            PtrSize::Ptr32 => u64::from(self.read_u32_at(offset)?),
            PtrSize::Ptr64 => self.read_u64_at(offset)?,
        };
        Ok((raw != self.format.ptr_size.null_offset()).then_some(raw))
    }

    /// Read an array slot: data offset (`None` when null) and element count.
    pub(crate) fn read_array_slot(&self, offset: usize) -> DlResult<(Option<u64>, u32)> {
        let data = self.read_ptr_at(offset)?;
        let count = self.read_u32_at(offset + self.format.ptr_size.bytes() as usize)?;
        Ok((data, count))
    }

    /// NUL-terminated UTF-8 string starting at `offset`.
    pub(crate) fn read_cstr_at(&self, offset: usize) -> DlResult<&'a str> {
        let tail = self.data.get(offset..).ok_or_else(|| {
            DlError::malformed(format!("string offset {} past end of payload", offset))
        })?;
        let len = tail.iter().position(|&b| b == 0).ok_or_else(|| {
            DlError::malformed(format!("string at offset {} is not terminated", offset))
        })?;
        std::str::from_utf8(&tail[..len]).map_err(|_| {
            DlError::malformed(format!("string at offset {} is not valid utf-8", offset))
        })
    }
}

/// Convert a stored offset to an index into the payload.
pub(crate) fn to_index(offset: u64) -> DlResult<usize> {
    usize::try_from(offset)
        .map_err(|_| DlError::malformed(format!("offset {} does not fit in memory", offset)))
}
