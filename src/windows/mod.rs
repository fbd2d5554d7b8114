//! Win32 process memory access
//!
//! Read-only access to another process's address space, no injection: the
//! target is opened with `PROCESS_QUERY_INFORMATION | PROCESS_VM_READ` only.
//! Cross-session reads require administrator rights.
//!
//! # Design Philosophy
//!
//! - **Read-only attachment**: never request write or control rights on the
//!   target process
//! - **Exact reads**: `ReadProcessMemory` either returns every requested
//!   byte or the operation fails; partial reads are never surfaced
//! - **One handle, released once**: the kernel handle is closed in `Drop`,
//!   on detach or replacement, never twice
//!
//! # Usage
//!
//! ```rust,ignore
//! use helmsman::memory::{MemoryBackend, ProcessMemory};
//! use helmsman::windows::Win32Backend;
//!
//! let mut backend = Win32Backend::new();
//! let process = backend.attach_by_name("Wow.exe")?;
//! let value = process.read_f32(0x0040_0000 + 0xC72E50)?;
//! ```

mod process;

pub use process::{Win32Backend, Win32Process};
