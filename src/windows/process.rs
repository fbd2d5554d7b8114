//! Win32 implementation of the process memory seam.

use std::ffi::c_void;

use tracing::{debug, trace};
use windows::Win32::Foundation::{CloseHandle, HANDLE, HMODULE};
use windows::Win32::System::Diagnostics::Debug::ReadProcessMemory;
use windows::Win32::System::Diagnostics::ToolHelp::{
    CreateToolhelp32Snapshot, PROCESSENTRY32W, Process32FirstW, Process32NextW,
    TH32CS_SNAPPROCESS,
};
use windows::Win32::System::ProcessStatus::{
    EnumProcessModulesEx, GetModuleBaseNameW, GetModuleInformation, LIST_MODULES_ALL, MODULEINFO,
};
use windows::Win32::System::Threading::{
    OpenProcess, PROCESS_QUERY_INFORMATION, PROCESS_VM_READ,
};

use crate::memory::{
    Enumeration, MemoryBackend, ModuleInfo, ProcessMemory, enumerate_with_retry,
};
use crate::{Result, TelemetryError};

/// Initial module handle buffer size. Doubled once if enumeration reports a
/// larger requirement, then the enumeration fails.
const INITIAL_MODULE_CAPACITY: usize = 512;

/// Attaches to processes by name through the Toolhelp snapshot API.
#[derive(Debug, Default, Clone, Copy)]
pub struct Win32Backend;

impl Win32Backend {
    pub fn new() -> Self {
        Self
    }
}

impl MemoryBackend for Win32Backend {
    type Process = Win32Process;

    fn attach_by_name(&mut self, process_name: &str) -> Result<Win32Process> {
        let pid = find_pid_by_name(process_name)?
            .ok_or_else(|| TelemetryError::process_not_found(process_name))?;
        debug!(pid, process = process_name, "matched target process");
        Win32Process::open(pid)
    }
}

/// An open read handle to another process.
pub struct Win32Process {
    handle: HANDLE,
    pid: u32,
}

impl Win32Process {
    /// Open `pid` for memory reads.
    pub fn open(pid: u32) -> Result<Self> {
        let handle = unsafe { OpenProcess(PROCESS_QUERY_INFORMATION | PROCESS_VM_READ, false, pid) }
            .map_err(|e| TelemetryError::ProcessNotAccessible { pid, source: Some(Box::new(e)) })?;
        trace!(pid, "opened process handle");
        Ok(Self { handle, pid })
    }
}

impl ProcessMemory for Win32Process {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn modules(&self) -> Result<Vec<ModuleInfo>> {
        let handles = enumerate_with_retry(INITIAL_MODULE_CAPACITY, |capacity| {
            let mut handles = vec![HMODULE::default(); capacity];
            let buffer_bytes = (capacity * size_of::<HMODULE>()) as u32;
            let mut needed_bytes = 0u32;

            unsafe {
                EnumProcessModulesEx(
                    self.handle,
                    handles.as_mut_ptr(),
                    buffer_bytes,
                    &mut needed_bytes,
                    LIST_MODULES_ALL,
                )
            }
            .map_err(|e| TelemetryError::windows_api_error("EnumProcessModulesEx", e))?;

            let needed = needed_bytes as usize / size_of::<HMODULE>();
            if needed > capacity {
                Ok(Enumeration::Truncated { needed })
            } else {
                handles.truncate(needed);
                Ok(Enumeration::Complete(handles))
            }
        })?;

        let mut modules = Vec::with_capacity(handles.len());
        for module in handles {
            modules.push(self.describe_module(module)?);
        }
        debug!(pid = self.pid, count = modules.len(), "enumerated target modules");
        Ok(modules)
    }

    fn read_exact(&self, address: u64, buf: &mut [u8]) -> Result<()> {
        let mut bytes_read = 0usize;
        let ok = unsafe {
            ReadProcessMemory(
                self.handle,
                address as usize as *const c_void,
                buf.as_mut_ptr() as *mut c_void,
                buf.len(),
                Some(&mut bytes_read),
            )
        };
        if ok.is_err() || bytes_read != buf.len() {
            return Err(TelemetryError::read_out_of_range(address, buf.len(), bytes_read));
        }
        Ok(())
    }
}

impl Win32Process {
    fn describe_module(&self, module: HMODULE) -> Result<ModuleInfo> {
        let mut name_buf = [0u16; 260];
        let name_len = unsafe { GetModuleBaseNameW(self.handle, Some(module), &mut name_buf) };
        if name_len == 0 {
            let win_err = windows::core::Error::from_thread();
            return Err(TelemetryError::windows_api_error("GetModuleBaseNameW", win_err));
        }
        let name = String::from_utf16_lossy(&name_buf[..name_len as usize]);

        let mut info = MODULEINFO::default();
        unsafe {
            GetModuleInformation(
                self.handle,
                module,
                &mut info,
                size_of::<MODULEINFO>() as u32,
            )
        }
        .map_err(|e| TelemetryError::windows_api_error("GetModuleInformation", e))?;

        Ok(ModuleInfo {
            base: info.lpBaseOfDll as u64,
            name,
            size: u64::from(info.SizeOfImage),
        })
    }
}

impl Drop for Win32Process {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseHandle(self.handle);
        }
        trace!(pid = self.pid, "released process handle");
    }
}

// SAFETY: the struct only holds a kernel handle opened for read access;
// Windows process handles are thread-safe kernel objects.
unsafe impl Send for Win32Process {}

/// Snapshot handle that closes itself.
struct Snapshot(HANDLE);

impl Drop for Snapshot {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseHandle(self.0);
        }
    }
}

/// Find a process id by exact case-insensitive executable name.
fn find_pid_by_name(process_name: &str) -> Result<Option<u32>> {
    let snapshot = Snapshot(
        unsafe { CreateToolhelp32Snapshot(TH32CS_SNAPPROCESS, 0) }
            .map_err(|e| TelemetryError::windows_api_error("CreateToolhelp32Snapshot", e))?,
    );

    let mut entry = PROCESSENTRY32W {
        dwSize: size_of::<PROCESSENTRY32W>() as u32,
        ..Default::default()
    };

    let mut more = unsafe { Process32FirstW(snapshot.0, &mut entry) }.is_ok();
    while more {
        let exe_name = utf16_until_nul(&entry.szExeFile);
        if exe_name.eq_ignore_ascii_case(process_name) {
            return Ok(Some(entry.th32ProcessID));
        }
        more = unsafe { Process32NextW(snapshot.0, &mut entry) }.is_ok();
    }
    Ok(None)
}

/// Decode a fixed UTF-16 buffer up to its first nul.
fn utf16_until_nul(buf: &[u16]) -> String {
    let end = buf.iter().position(|&c| c == 0).unwrap_or(buf.len());
    String::from_utf16_lossy(&buf[..end])
}
