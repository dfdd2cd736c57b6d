// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Instance header: `id`, `version`, `root_type`, `instance_size`,
//! `is_64_bit_ptr` and three bytes of padding.

use super::reader::BinaryReader;
use super::writer::BinaryWriter;
use crate::config::{INSTANCE_HEADER_SIZE, INSTANCE_ID, INSTANCE_ID_SWAPPED, INSTANCE_VERSION};
use crate::error::{DlError, DlResult, FormatError};
use crate::registry::{Endian, Format, PtrSize, TypeId};

/// Decoded instance header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DataHeader {
    pub root_type: TypeId,
    /// Payload size, excluding the header.
    pub instance_size: u32,
    pub format: Format,
}

impl DataHeader {
    /// Total bytes of header plus payload.
    pub(crate) fn total_size(&self) -> usize {
        INSTANCE_HEADER_SIZE + self.instance_size as usize
    }

    pub(crate) fn write(&self, w: &mut BinaryWriter) {
        w.write_u32(INSTANCE_ID);
        w.write_u32(INSTANCE_VERSION);
        w.write_u32(self.root_type);
        w.write_u32(self.instance_size);
        w.write_u8(u8::from(self.format.ptr_size == PtrSize::Ptr64));
        w.write_bytes(&[0u8; 3]);
    }

    /// Encode into a fresh 20-byte buffer.
    pub(crate) fn to_bytes(&self) -> Vec<u8> {
        let mut w = BinaryWriter::new(self.format);
        self.write(&mut w);
        w.into_bytes()
    }
}

/// Parse and validate the header at the start of `bytes`. The byte order is
/// taken from the magic; the payload must be fully present.
pub(crate) fn read_header(bytes: &[u8]) -> DlResult<DataHeader> {
    if bytes.len() < INSTANCE_HEADER_SIZE {
        return Err(DlError::malformed(format!(
            "{} bytes is too short for an instance header",
            bytes.len()
        )));
    }
    let magic = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let endian = match magic {
        INSTANCE_ID => Endian::Little,
        INSTANCE_ID_SWAPPED => Endian::Big,
        found => return Err(FormatError::BadMagic { found }.into()),
    };
    let ptr_size = if bytes[16] != 0 {
        PtrSize::Ptr64
    } else {
        PtrSize::Ptr32
    };
    let format = Format::new(endian, ptr_size);
    let r = BinaryReader::new(bytes, format);

    let version = r.read_u32_at(4)?;
    if version != INSTANCE_VERSION {
        return Err(FormatError::VersionMismatch {
            expected: INSTANCE_VERSION,
            found: version,
        }
        .into());
    }

    let header = DataHeader {
        root_type: r.read_u32_at(8)?,
        instance_size: r.read_u32_at(12)?,
        format,
    };
    if header.total_size() > bytes.len() {
        return Err(DlError::buffer_too_small(header.total_size(), bytes.len()));
    }
    Ok(header)
}

/// Summary of an instance buffer, readable without a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct InstanceInfo {
    pub root_type: TypeId,
    pub ptr_size: PtrSize,
    pub endian: Endian,
    /// Bytes needed to hold header and payload.
    pub load_size: usize,
}

/// Inspect an instance header.
pub fn instance_info(bytes: &[u8]) -> DlResult<InstanceInfo> {
    let header = read_header(bytes)?;
    Ok(InstanceInfo {
        root_type: header.root_type,
        ptr_size: header.format.ptr_size,
        endian: header.format.endian,
        load_size: header.total_size(),
    })
}

/// True when `bytes` starts with the instance magic in either byte order.
pub fn is_instance(bytes: &[u8]) -> bool {
    bytes.len() >= 4
        && matches!(
            u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            INSTANCE_ID | INSTANCE_ID_SWAPPED
        )
}
