//! Multi-hop pointer chain resolution.
//!
//! A chain is re-resolved in full on every sampling tick. Intermediate
//! pointers can change between ticks (the target reallocates freely), so
//! nothing here is cached.

use crate::memory::ProcessMemory;
use crate::{Result, TelemetryError};

/// Walk a pointer chain to the address of the scalar value itself.
///
/// The first offset is added to `module_base`. Each interior offset is
/// applied after dereferencing a pointer-sized value at the running address.
/// The last offset is the scalar's displacement inside the final structure
/// and is added without a dereference, so a chain of `n >= 2` offsets
/// performs exactly `n - 2` dereferences. A single-offset chain degenerates
/// to `module_base + offsets[0]` with no reads at all.
///
/// Address arithmetic wraps rather than panics: a garbage intermediate
/// pointer must surface as a failed read, never take down the sampling
/// thread.
pub fn resolve_chain<P: ProcessMemory>(
    process: &P,
    module_base: u64,
    offsets: &[u64],
) -> Result<u64> {
    let (first, rest) = offsets
        .split_first()
        .ok_or_else(|| TelemetryError::config_error("pointer chain needs at least one offset"))?;

    let mut address = module_base.wrapping_add(*first);
    if let Some((last, interior)) = rest.split_last() {
        for &hop in interior {
            address = process.read_u64(address)?.wrapping_add(hop);
        }
        address = address.wrapping_add(*last);
    }
    Ok(address)
}
