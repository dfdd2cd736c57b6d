// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! File helpers over the codecs.

use crate::codec;
use crate::config::{TYPELIB_ID, TYPELIB_ID_SWAPPED};
use crate::error::{DlError, DlResult, FormatError};
use crate::instance::Instance;
use crate::registry::{Endian, Format, Registry, TypeId};
use crate::text;
use std::path::Path;

/// On-disk representation of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FileType {
    Binary,
    Text,
    /// Binary when the file starts with the instance magic, text otherwise.
    /// Stores as binary.
    #[default]
    Auto,
}

fn read(path: &Path) -> DlResult<Vec<u8>> {
    std::fs::read(path).map_err(|e| DlError::Io(format!("{}: {}", path.display(), e)))
}

fn utf8(path: &Path, bytes: Vec<u8>) -> DlResult<String> {
    String::from_utf8(bytes)
        .map_err(|_| DlError::malformed(format!("{} is not valid utf-8 text", path.display())))
}

/// Read an instance of `expected_type` from `path`.
///
/// Binary files in the other byte order are converted before loading.
pub fn load_from_file(
    registry: &Registry,
    expected_type: TypeId,
    path: impl AsRef<Path>,
    file_type: FileType,
) -> DlResult<Instance> {
    let path = path.as_ref();
    let bytes = read(path)?;
    let binary = match file_type {
        FileType::Binary => true,
        FileType::Text => false,
        FileType::Auto => codec::is_instance(&bytes),
    };
    log::debug!(
        "[util::load_from_file] {} ({} bytes, {})",
        path.display(),
        bytes.len(),
        if binary { "binary" } else { "text" }
    );

    if binary {
        let info = codec::instance_info(&bytes)?;
        if info.endian != Endian::host() {
            let host = Format::new(Endian::host(), info.ptr_size);
            let converted = codec::convert(registry, expected_type, &bytes, host)?;
            return codec::load(registry, expected_type, &converted);
        }
        return codec::load(registry, expected_type, &bytes);
    }

    let (type_id, instance) = text::parse(registry, &utf8(path, bytes)?)?;
    if type_id != expected_type {
        return Err(FormatError::TypeMismatch {
            expected: expected_type,
            found: type_id,
        }
        .into());
    }
    Ok(instance)
}

/// Write `instance` to `path` as binary in `format`, or as text.
pub fn store_to_file(
    registry: &Registry,
    type_id: TypeId,
    path: impl AsRef<Path>,
    file_type: FileType,
    format: Format,
    instance: &Instance,
) -> DlResult<()> {
    let path = path.as_ref();
    let bytes = match file_type {
        FileType::Text => text::write_text(registry, instance)?.into_bytes(),
        FileType::Binary | FileType::Auto => codec::store(registry, type_id, instance, format)?,
    };
    std::fs::write(path, &bytes).map_err(|e| DlError::Io(format!("{}: {}", path.display(), e)))?;
    log::debug!(
        "[util::store_to_file] wrote {} bytes to {}",
        bytes.len(),
        path.display()
    );
    Ok(())
}

/// True when `bytes` starts with the type library magic in either order.
pub fn is_typelib(bytes: &[u8]) -> bool {
    bytes.len() >= 4
        && matches!(
            u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            TYPELIB_ID | TYPELIB_ID_SWAPPED
        )
}

/// Merge the binary or text type library at `path` into `registry`.
pub fn load_typelib_file(registry: &mut Registry, path: impl AsRef<Path>) -> DlResult<()> {
    let path = path.as_ref();
    let bytes = read(path)?;
    if is_typelib(&bytes) {
        registry.load_binary(&bytes)
    } else {
        registry.load_text(&utf8(path, bytes)?)
    }
}
