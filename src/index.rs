// Arcvet columnar archive validator.

// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

//! Persisted index validation.
//!
//! An index stores keys in sorted order; the persisted key sequence must be
//! monotonically non-decreasing. The MD5 of index backing files is covered by
//! the per-directory manifest check in the walker.

use tracing::debug;

use crate::archive::{read_json, IdxMeta, IDX_META, KEYS_FILE};
use crate::checksum::decompress_and_crc;
use crate::transport::Transport;
use crate::*;

/// Index kind whose keys are little-endian i64 in sorted order.
pub const KIND_I64_SORTED: &str = "i64-sorted";

/// True iff `values[i] <= values[i+1]` for every adjacent pair.
///
/// Vacuously true for empty and single-element slices.
pub fn is_sorted<T: PartialOrd>(values: &[T]) -> bool {
    values.windows(2).all(|pair| pair[0] <= pair[1])
}

/// Position of the first order violation, for reporting.
fn first_unsorted_at<T: PartialOrd>(values: &[T]) -> Option<usize> {
    values.windows(2).position(|pair| pair[0] > pair[1])
}

/// Validate the internal invariants of one persisted index.
pub fn check_index(transport: &dyn Transport, index_name: &str) -> Result<u64> {
    let meta: IdxMeta = read_json(transport, IDX_META)?;
    if meta.kind != KIND_I64_SORTED {
        return Err(Error::IndexDamaged {
            index: index_name.to_string(),
            reason: format!("unknown index kind {:?}", meta.kind),
        });
    }
    let compressed = transport.read_file(KEYS_FILE)?;
    let (raw, _crc) = decompress_and_crc(&compressed)?;
    if raw.len() % 8 != 0 {
        return Err(Error::IndexDamaged {
            index: index_name.to_string(),
            reason: format!("key file length {} is not a multiple of 8", raw.len()),
        });
    }
    let keys: Vec<i64> = raw
        .chunks_exact(8)
        .map(|chunk| i64::from_le_bytes(chunk.try_into().unwrap()))
        .collect();
    if let Some(position) = first_unsorted_at(&keys) {
        return Err(Error::IndexUnsorted {
            index: index_name.to_string(),
            position,
        });
    }
    debug!(index = index_name, keys = keys.len(), "index is sorted");
    Ok(keys.len() as u64)
}
