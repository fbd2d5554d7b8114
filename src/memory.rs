//! Remote process memory access seam.
//!
//! The poller and resolver are written against the [`ProcessMemory`] and
//! [`MemoryBackend`] traits rather than Win32 directly, so the whole sampling
//! pipeline runs against an in-memory fake in tests on any platform. The
//! Windows implementation lives in [`crate::windows`].

use std::collections::HashMap;

use tracing::trace;

use crate::config::ScalarWidth;
use crate::{Result, TelemetryError};

/// One loaded module of an attached process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleInfo {
    /// Base address of the module within the target's address space.
    pub base: u64,
    /// Module file name, e.g. `Wow.exe`.
    pub name: String,
    /// Size of the mapped image in bytes.
    pub size: u64,
}

/// Case-insensitive module name to base address mapping.
///
/// Populated once per attachment and cleared on any failure that triggers
/// re-attachment. A missing module is a hard failure for that attachment
/// cycle, never a silent default.
#[derive(Debug, Default, Clone)]
pub struct ModuleTable {
    bases: HashMap<String, u64>,
}

impl ModuleTable {
    /// Build a table from an enumeration result. Names are folded to
    /// lowercase so lookups tolerate case differences.
    pub fn from_modules(modules: &[ModuleInfo]) -> Self {
        let bases = modules
            .iter()
            .map(|module| (module.name.to_lowercase(), module.base))
            .collect();
        Self { bases }
    }

    /// Base address of the named module.
    pub fn base_of(&self, name: &str) -> Result<u64> {
        self.bases
            .get(&name.to_lowercase())
            .copied()
            .ok_or_else(|| TelemetryError::module_not_found(name))
    }

    pub fn is_empty(&self) -> bool {
        self.bases.is_empty()
    }

    pub fn len(&self) -> usize {
        self.bases.len()
    }
}

/// Bounds-checked reads inside an attached process.
///
/// A read either returns the exact requested byte count or fails with
/// [`TelemetryError::ReadOutOfRange`]; there are no partial results. All
/// multi-byte values are little-endian, matching the x86-64 targets this
/// crate attaches to.
pub trait ProcessMemory {
    /// Identifier of the attached process.
    fn pid(&self) -> u32;

    /// Enumerate loaded modules with base addresses.
    fn modules(&self) -> Result<Vec<ModuleInfo>>;

    /// Fill `buf` from `address`, failing unless every byte was read.
    fn read_exact(&self, address: u64, buf: &mut [u8]) -> Result<()>;

    /// Read a pointer-sized (8-byte) value.
    fn read_u64(&self, address: u64) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.read_exact(address, &mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    /// Read a 4-byte float.
    fn read_f32(&self, address: u64) -> Result<f32> {
        let mut buf = [0u8; 4];
        self.read_exact(address, &mut buf)?;
        Ok(f32::from_le_bytes(buf))
    }

    /// Read an 8-byte double.
    fn read_f64(&self, address: u64) -> Result<f64> {
        let mut buf = [0u8; 8];
        self.read_exact(address, &mut buf)?;
        Ok(f64::from_le_bytes(buf))
    }

    /// Read a scalar of the configured width, widened to `f64`.
    fn read_scalar(&self, address: u64, width: ScalarWidth) -> Result<f64> {
        let value = match width {
            ScalarWidth::Float => f64::from(self.read_f32(address)?),
            ScalarWidth::Double => self.read_f64(address)?,
        };
        trace!(address = format_args!("{address:#x}"), value, "scalar read");
        Ok(value)
    }
}

/// Outcome of one fixed-capacity enumeration attempt.
pub enum Enumeration<T> {
    /// Everything fit; these are the results.
    Complete(Vec<T>),
    /// The target reported more entries than the buffer held.
    Truncated { needed: usize },
}

/// Drive a sizing-sensitive enumeration: one attempt at `initial_capacity`
/// entries, one retry with a doubled buffer if the target reported more,
/// then [`TelemetryError::EnumerationFailed`].
///
/// The target can load modules between the sizing call and the filling call,
/// so a single growth step is allowed; a buffer that is still too small
/// afterwards means something is churning too fast to trust.
pub fn enumerate_with_retry<T, F>(initial_capacity: usize, mut fill: F) -> Result<Vec<T>>
where
    F: FnMut(usize) -> Result<Enumeration<T>>,
{
    let mut capacity = initial_capacity;
    let mut retried = false;
    loop {
        match fill(capacity)? {
            Enumeration::Complete(items) => return Ok(items),
            Enumeration::Truncated { needed } => {
                if retried {
                    return Err(TelemetryError::EnumerationFailed { needed, capacity });
                }
                trace!(capacity, needed, "enumeration buffer too small, doubling");
                capacity *= 2;
                retried = true;
            }
        }
    }
}

/// Attachment factory the poller re-invokes on every attachment cycle.
pub trait MemoryBackend: Send + 'static {
    type Process: ProcessMemory;

    /// Find a process by exact case-insensitive name and open a read handle.
    ///
    /// Fails with [`TelemetryError::ProcessNotFound`] when nothing matches
    /// and [`TelemetryError::ProcessNotAccessible`] when the OS denies the
    /// open request. The returned handle is released exactly once, on drop.
    fn attach_by_name(&mut self, process_name: &str) -> Result<Self::Process>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> ModuleTable {
        ModuleTable::from_modules(&[
            ModuleInfo { base: 0x0040_0000, name: "Wow.exe".into(), size: 0x100000 },
            ModuleInfo { base: 0x7ff8_0000, name: "ntdll.dll".into(), size: 0x40000 },
        ])
    }

    #[test]
    fn module_lookup_is_case_insensitive() {
        let table = table();
        assert_eq!(table.base_of("wow.exe").unwrap(), 0x0040_0000);
        assert_eq!(table.base_of("WOW.EXE").unwrap(), 0x0040_0000);
        assert_eq!(table.base_of("NtDll.DLL").unwrap(), 0x7ff8_0000);
    }

    #[test]
    fn missing_module_is_a_hard_failure() {
        let table = table();
        match table.base_of("missing.dll") {
            Err(TelemetryError::ModuleNotFound { module }) => assert_eq!(module, "missing.dll"),
            other => panic!("expected ModuleNotFound, got {other:?}"),
        }
    }

    #[test]
    fn enumeration_succeeding_within_capacity_never_retries() {
        let mut attempts = Vec::new();
        let items = enumerate_with_retry(512, |capacity| {
            attempts.push(capacity);
            Ok(Enumeration::Complete(vec![1, 2, 3]))
        })
        .unwrap();
        assert_eq!(items, vec![1, 2, 3]);
        assert_eq!(attempts, vec![512]);
    }

    #[test]
    fn enumeration_doubles_the_buffer_once() {
        let mut attempts = Vec::new();
        let items = enumerate_with_retry(512, |capacity| {
            attempts.push(capacity);
            if capacity < 700 {
                Ok(Enumeration::Truncated { needed: 700 })
            } else {
                Ok(Enumeration::Complete((0..700).collect()))
            }
        })
        .unwrap();
        assert_eq!(items.len(), 700);
        assert_eq!(attempts, vec![512, 1024]);
    }

    #[test]
    fn enumeration_still_truncated_after_doubling_fails() {
        let mut attempts = Vec::new();
        let result: Result<Vec<u64>> = enumerate_with_retry(512, |capacity| {
            attempts.push(capacity);
            Ok(Enumeration::Truncated { needed: 5000 })
        });
        match result {
            Err(TelemetryError::EnumerationFailed { needed, capacity }) => {
                assert_eq!(needed, 5000);
                assert_eq!(capacity, 1024);
            }
            other => panic!("expected EnumerationFailed, got {other:?}"),
        }
        // Exactly two attempts, never a third.
        assert_eq!(attempts, vec![512, 1024]);
    }

    #[test]
    fn enumeration_fill_errors_propagate_immediately() {
        let result: Result<Vec<u64>> =
            enumerate_with_retry(512, |_| Err(TelemetryError::process_not_accessible(7)));
        assert!(matches!(result, Err(TelemetryError::ProcessNotAccessible { pid: 7, .. })));
    }

    #[test]
    fn fake_process_round_trips_scalars() {
        use crate::test_utils::FakeProcess;

        let mut process = FakeProcess::new(1234);
        process.write_f32(0x1000, 42.5);
        process.write_f64(0x2000, -1.25);
        process.write_u64(0x3000, 0xdead_beef);

        assert_eq!(process.read_scalar(0x1000, ScalarWidth::Float).unwrap(), 42.5);
        assert_eq!(process.read_scalar(0x2000, ScalarWidth::Double).unwrap(), -1.25);
        assert_eq!(process.read_u64(0x3000).unwrap(), 0xdead_beef);
    }

    #[test]
    fn short_read_reports_exact_counts() {
        use crate::test_utils::FakeProcess;

        let mut process = FakeProcess::new(1234);
        process.write_f32(0x1000, 1.0);

        // 8-byte read over a 4-byte mapping stops at the gap.
        match process.read_u64(0x1000) {
            Err(TelemetryError::ReadOutOfRange { address, expected, got }) => {
                assert_eq!(address, 0x1000);
                assert_eq!(expected, 8);
                assert_eq!(got, 4);
            }
            other => panic!("expected ReadOutOfRange, got {other:?}"),
        }
    }
}
