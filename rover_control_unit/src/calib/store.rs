//! Persistence layout for calibration records.
//!
//! Six records per wheel namespace:
//!
//! | key            | encoding                      |
//! |----------------|-------------------------------|
//! | `{ns}.use_fwd` | 1 byte, 0/1                   |
//! | `{ns}.use_rev` | 1 byte, 0/1                   |
//! | `{ns}.off_fwd` | u16 little-endian             |
//! | `{ns}.off_rev` | u16 little-endian             |
//! | `{ns}.lut_fwd` | PPR × f32 LE, contiguous      |
//! | `{ns}.lut_rev` | PPR × f32 LE, contiguous      |
//!
//! A legacy single-LUT layout (`{ns}.lut` + `{ns}.use_lut`) is recognized
//! on read for migration only: when neither direction LUT exists but the
//! legacy one does, it becomes the forward LUT, reverse stays neutral and
//! both use flags inherit the legacy flag. Legacy records are never
//! written back.
//!
//! Missing or wrong-sized records degrade to defaults with a warning;
//! the boot path never fails on store contents.

use rover_common::state::StepDirection;
use rover_hal::store::{KvStore, StoreError};
use tracing::{debug, warn};

use super::table::CorrectionTable;

fn key(ns: &str, record: &str) -> String {
    format!("{ns}.{record}")
}

fn read_bool(store: &dyn KvStore, ns: &str, record: &str) -> Option<bool> {
    let bytes = store.get(&key(ns, record))?;
    match bytes.as_slice() {
        [b] => Some(*b != 0),
        _ => {
            warn!(ns, record, len = bytes.len(), "flag record has wrong size, ignoring");
            None
        }
    }
}

fn read_u16(store: &dyn KvStore, ns: &str, record: &str) -> Option<u16> {
    let bytes = store.get(&key(ns, record))?;
    match bytes.as_slice() {
        [a, b] => Some(u16::from_le_bytes([*a, *b])),
        _ => {
            warn!(ns, record, len = bytes.len(), "offset record has wrong size, ignoring");
            None
        }
    }
}

fn read_lut(store: &dyn KvStore, ns: &str, record: &str, ppr: usize) -> Option<Vec<f32>> {
    let bytes = store.get(&key(ns, record))?;
    if bytes.len() != ppr * 4 {
        warn!(
            ns,
            record,
            len = bytes.len(),
            expected = ppr * 4,
            "LUT record has wrong size, ignoring"
        );
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    )
}

fn encode_lut(lut: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(lut.len() * 4);
    for v in lut {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

/// Populate a table from the store. Absent records keep the table's
/// current (neutral/default) values. Always leaves patterns rebuilt.
pub fn load_table(store: &dyn KvStore, ns: &str, table: &mut CorrectionTable) {
    use StepDirection::{Forward, Reverse};
    let ppr = table.ppr();

    let lut_fwd = read_lut(store, ns, "lut_fwd", ppr);
    let lut_rev = read_lut(store, ns, "lut_rev", ppr);

    if lut_fwd.is_none() && lut_rev.is_none() {
        if let Some(legacy) = read_lut(store, ns, "lut", ppr) {
            // Single-LUT layout from older firmware: forward inherits the
            // learned factors, reverse stays neutral.
            table.set_lut(Forward, &legacy);
            table.set_lut(Reverse, &vec![1.0; ppr]);
            if let Some(use_legacy) = read_bool(store, ns, "use_lut") {
                table.set_enabled(Forward, use_legacy);
                table.set_enabled(Reverse, use_legacy);
            }
            table.set_offset(Forward, 0);
            table.set_offset(Reverse, 0);
            warn!(ns, "migrated legacy single-LUT records");
            return;
        }
    }

    if let Some(lut) = lut_fwd {
        table.set_lut(Forward, &lut);
    }
    if let Some(lut) = lut_rev {
        table.set_lut(Reverse, &lut);
    }
    if let Some(f) = read_bool(store, ns, "use_fwd") {
        table.set_enabled(Forward, f);
    }
    if let Some(f) = read_bool(store, ns, "use_rev") {
        table.set_enabled(Reverse, f);
    }
    if let Some(off) = read_u16(store, ns, "off_fwd") {
        table.set_offset(Forward, off);
    }
    if let Some(off) = read_u16(store, ns, "off_rev") {
        table.set_offset(Reverse, off);
    }
    debug!(ns, "calibration records loaded");
}

/// Persist LUTs, use flags and offsets. Legacy records are not written.
pub fn save_table(
    store: &mut dyn KvStore,
    ns: &str,
    table: &CorrectionTable,
) -> Result<(), StoreError> {
    use StepDirection::{Forward, Reverse};

    store.put(&key(ns, "lut_fwd"), &encode_lut(table.lut(Forward)))?;
    store.put(&key(ns, "lut_rev"), &encode_lut(table.lut(Reverse)))?;
    store.put(&key(ns, "use_fwd"), &[table.enabled(Forward) as u8])?;
    store.put(&key(ns, "use_rev"), &[table.enabled(Reverse) as u8])?;
    store.put(&key(ns, "off_fwd"), &table.offset(Forward).to_le_bytes())?;
    store.put(&key(ns, "off_rev"), &table.offset(Reverse).to_le_bytes())?;
    debug!(ns, "calibration records saved");
    Ok(())
}

// ─── Tests ──────────────────────────────────────────────────────────
