//! Test doubles for the process memory seam.
//!
//! [`FakeProcess`] is a byte-addressable fake target whose memory can be
//! mutated from a test thread while a poller reads it, which is how the
//! attachment and coherence paths are exercised without a live process.

#![cfg(test)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::memory::{MemoryBackend, ModuleInfo, ProcessMemory};
use crate::{Result, TelemetryError};

#[derive(Debug, Default)]
struct FakeInner {
    memory: HashMap<u64, u8>,
    modules: Vec<ModuleInfo>,
    fail_enumeration: bool,
}

/// In-memory stand-in for an attached process. Clones share storage.
#[derive(Debug, Clone)]
pub struct FakeProcess {
    pid: u32,
    inner: Arc<Mutex<FakeInner>>,
}

impl FakeProcess {
    pub fn new(pid: u32) -> Self {
        Self { pid, inner: Arc::new(Mutex::new(FakeInner::default())) }
    }

    pub fn add_module(&mut self, name: &str, base: u64, size: u64) {
        self.inner.lock().unwrap().modules.push(ModuleInfo {
            base,
            name: name.to_string(),
            size,
        });
    }

    pub fn write_bytes(&mut self, address: u64, bytes: &[u8]) {
        let mut inner = self.inner.lock().unwrap();
        for (i, byte) in bytes.iter().enumerate() {
            inner.memory.insert(address + i as u64, *byte);
        }
    }

    pub fn write_u64(&mut self, address: u64, value: u64) {
        self.write_bytes(address, &value.to_le_bytes());
    }

    pub fn write_f32(&mut self, address: u64, value: f32) {
        self.write_bytes(address, &value.to_le_bytes());
    }

    pub fn write_f64(&mut self, address: u64, value: f64) {
        self.write_bytes(address, &value.to_le_bytes());
    }

    /// Remove a mapping so subsequent reads there fail short.
    pub fn unmap(&mut self, address: u64, len: u64) {
        let mut inner = self.inner.lock().unwrap();
        for offset in 0..len {
            inner.memory.remove(&(address + offset));
        }
    }

    pub fn set_fail_enumeration(&mut self, fail: bool) {
        self.inner.lock().unwrap().fail_enumeration = fail;
    }
}

impl ProcessMemory for FakeProcess {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn modules(&self) -> Result<Vec<ModuleInfo>> {
        let inner = self.inner.lock().unwrap();
        if inner.fail_enumeration {
            return Err(TelemetryError::EnumerationFailed { needed: 8192, capacity: 4096 });
        }
        Ok(inner.modules.clone())
    }

    fn read_exact(&self, address: u64, buf: &mut [u8]) -> Result<()> {
        let inner = self.inner.lock().unwrap();
        for (i, slot) in buf.iter_mut().enumerate() {
            match inner.memory.get(&(address + i as u64)) {
                Some(byte) => *slot = *byte,
                None => return Err(TelemetryError::read_out_of_range(address, buf.len(), i)),
            }
        }
        Ok(())
    }
}

/// Backend whose attachment behavior tests can steer at run time.
#[derive(Clone)]
pub struct FakeBackend {
    pub process: FakeProcess,
    pub process_name: String,
    pub attach_count: Arc<AtomicUsize>,
    pub deny_attach: Arc<AtomicBool>,
}

impl FakeBackend {
    pub fn new(process_name: &str, process: FakeProcess) -> Self {
        Self {
            process,
            process_name: process_name.to_string(),
            attach_count: Arc::new(AtomicUsize::new(0)),
            deny_attach: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn attaches(&self) -> usize {
        self.attach_count.load(Ordering::SeqCst)
    }
}

impl MemoryBackend for FakeBackend {
    type Process = FakeProcess;

    fn attach_by_name(&mut self, process_name: &str) -> Result<Self::Process> {
        self.attach_count.fetch_add(1, Ordering::SeqCst);
        if self.deny_attach.load(Ordering::SeqCst) {
            return Err(TelemetryError::process_not_accessible(self.process.pid()));
        }
        if !process_name.eq_ignore_ascii_case(&self.process_name) {
            return Err(TelemetryError::process_not_found(process_name));
        }
        Ok(self.process.clone())
    }
}
