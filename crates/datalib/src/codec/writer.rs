// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Growable, seekable, endian-aware output buffer.
//!
//! Writes land at the current position; seeking past the end and aligning
//! zero-fill the gap. A dummy writer tracks positions and the high-water
//! mark without touching memory, which is how sizes are calculated.

use crate::registry::{Endian, Format, PtrSize};

/// Generate endian-aware write methods for primitive types.
macro_rules! impl_write_endian {
    ($name:ident, $type:ty) => {
        pub(crate) fn $name(&mut self, value: $type) {
            match self.format.endian {
                Endian::Little => self.write_bytes(&value.to_le_bytes()),
                Endian::Big => self.write_bytes(&value.to_be_bytes()),
            }
        }
    };
}

pub(crate) struct BinaryWriter {
    buffer: Vec<u8>,
    dummy: bool,
    pos: usize,
    /// One past the furthest byte written or reserved.
    end: usize,
    format: Format,
}

impl BinaryWriter {
    pub(crate) fn new(format: Format) -> Self {
        Self {
            buffer: Vec::new(),
            dummy: false,
            pos: 0,
            end: 0,
            format,
        }
    }

    /// Writer that only measures.
    pub(crate) fn dummy(format: Format) -> Self {
        Self {
            dummy: true,
            ..Self::new(format)
        }
    }

    pub(crate) fn format(&self) -> Format {
        self.format
    }

    pub(crate) fn ptr_size(&self) -> PtrSize {
        self.format.ptr_size
    }

    pub(crate) fn pos(&self) -> usize {
        self.pos
    }

    pub(crate) fn len(&self) -> usize {
        self.end
    }

    pub(crate) fn seek(&mut self, pos: usize) {
        self.pos = pos;
    }

    pub(crate) fn seek_end(&mut self) {
        self.pos = self.end;
    }

    fn grow_to(&mut self, end: usize) {
        if end > self.end {
            self.end = end;
        }
        if !self.dummy && self.buffer.len() < self.end {
            self.buffer.resize(self.end, 0);
        }
    }

    /// Claim `len` zeroed bytes at the current position without moving.
    pub(crate) fn reserve(&mut self, len: usize) {
        self.grow_to(self.pos + len);
    }

    /// Advance the position to a multiple of `alignment`.
    pub(crate) fn align(&mut self, alignment: usize) {
        if alignment > 1 {
            self.pos = self.pos.div_ceil(alignment) * alignment;
            self.grow_to(self.pos);
        }
    }

    pub(crate) fn write_bytes(&mut self, data: &[u8]) {
        let end = self.pos + data.len();
        self.grow_to(end);
        if !self.dummy {
            self.buffer[self.pos..end].copy_from_slice(data);
        }
        self.pos = end;
    }

    pub(crate) fn write_u8(&mut self, value: u8) {
        self.write_bytes(&[value]);
    }

    impl_write_endian!(write_u16, u16);
    impl_write_endian!(write_u32, u32);
    impl_write_endian!(write_u64, u64);

    pub(crate) fn write_f32(&mut self, value: f32) {
        self.write_u32(value.to_bits());
    }

    pub(crate) fn write_f64(&mut self, value: f64) {
        self.write_u64(value.to_bits());
    }

    /// Write the low `size` bytes of `value` (1, 2, 4 or 8).
    pub(crate) fn write_uint(&mut self, size: u32, value: u64) {
        match size {
            1 => self.write_u8(value as u8),
            2 => self.write_u16(value as u16),
            4 => self.write_u32(value as u32),
            _ => self.write_u64(value),
        }
    }

    /// Write an offset slot of the target pointer width.
    pub(crate) fn write_ptr(&mut self, offset: u64) {
        match self.format.ptr_size {
            PtrSize::Ptr32 => self.write_u32(offset as u32),
            PtrSize::Ptr64 => self.write_u64(offset),
        }
    }

    pub(crate) fn write_null_ptr(&mut self) {
        self.write_ptr(self.format.ptr_size.null_offset());
    }

    /// Array slot: offset, `u32` count, padded to the slot size.
    pub(crate) fn write_array_slot(&mut self, offset: u64, count: u32) {
        let start = self.pos;
        self.write_ptr(offset);
        self.write_u32(count);
        let slot = 2 * self.format.ptr_size.bytes() as usize;
        let written = self.pos - start;
        if written < slot {
            self.write_bytes(&[0u8; 8][..slot - written]);
        }
    }

    pub(crate) fn into_bytes(mut self) -> Vec<u8> {
        self.buffer.truncate(self.end);
        self.buffer
    }
}
