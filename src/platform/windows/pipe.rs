//! Local-only named pipe server for the control channel.
//!
//! Every handle is opened for overlapped I/O so that `accept` can honour a
//! timeout; reads and writes wait on a per-stream event.

use std::io;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::Context;
use windows::Win32::Foundation::{
    BOOL, ERROR_BROKEN_PIPE, ERROR_IO_PENDING, ERROR_PIPE_CONNECTED, HANDLE, WAIT_OBJECT_0,
    WAIT_TIMEOUT,
};
use windows::Win32::Storage::FileSystem::{
    FILE_FLAG_OVERLAPPED, PIPE_ACCESS_DUPLEX, ReadFile, WriteFile,
};
use windows::Win32::System::IO::{CancelIoEx, GetOverlappedResult, OVERLAPPED};
use windows::Win32::System::LibraryLoader::{GetModuleHandleW, GetProcAddress};
use windows::Win32::System::Pipes::{
    ConnectNamedPipe, CreateNamedPipeW, DisconnectNamedPipe, PIPE_READMODE_BYTE,
    PIPE_REJECT_REMOTE_CLIENTS, PIPE_TYPE_BYTE, PIPE_UNLIMITED_INSTANCES, PIPE_WAIT,
};
use windows::Win32::System::Threading::{
    CreateEventW, GetCurrentProcess, OpenProcess, PROCESS_NAME_WIN32,
    PROCESS_QUERY_LIMITED_INFORMATION, QueryFullProcessImageNameW, WaitForSingleObject,
};
use windows::core::{HSTRING, PCWSTR, PWSTR, s, w};

use tracing::{debug, info};

use crate::control::{ControlListener, ControlStream, PeerIdentityCheck, PeerInspector, verify_peer};
use crate::error::{RenderError, RenderResult};

use super::handle::OwnedHandle;

const DEFAULT_BUFFER_SIZE: u32 = 64 * 1024;
const MAX_IMAGE_PATH: usize = 32_768;

type GetNamedPipeClientProcessId = unsafe extern "system" fn(HANDLE, *mut u32) -> BOOL;

static PEER_CHECK: OnceLock<PeerIdentityCheck<GetNamedPipeClientProcessId>> = OnceLock::new();

fn peer_check() -> PeerIdentityCheck<GetNamedPipeClientProcessId> {
    *PEER_CHECK.get_or_init(|| {
        PeerIdentityCheck::resolve(|| {
            let kernel32 = unsafe { GetModuleHandleW(w!("kernel32.dll")) }.ok()?;
            let entry = unsafe { GetProcAddress(kernel32, s!("GetNamedPipeClientProcessId")) }?;
            // SAFETY: the exported symbol has this signature.
            Some(unsafe {
                std::mem::transmute::<
                    unsafe extern "system" fn() -> isize,
                    GetNamedPipeClientProcessId,
                >(entry)
            })
        })
    })
}

fn new_event() -> RenderResult<OwnedHandle> {
    let event = unsafe { CreateEventW(None, true, false, PCWSTR::null()) }
        .context("CreateEventW failed")
        .map_err(RenderError::Platform)?;
    OwnedHandle::new(event)
        .ok_or_else(|| RenderError::Platform(anyhow::anyhow!("CreateEventW returned no handle")))
}

fn wait_millis(timeout: Duration) -> u32 {
    u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX - 1)
}

/// Server end of `\\.\pipe\<name>`, rejecting remote clients.
pub struct NamedPipeListener {
    path: HSTRING,
    buffer_size: u32,
    instance: Option<OwnedHandle>,
}

impl NamedPipeListener {
    pub fn bind(name: &str) -> RenderResult<Self> {
        Self::with_buffer_size(name, DEFAULT_BUFFER_SIZE)
    }

    pub fn with_buffer_size(name: &str, buffer_size: u32) -> RenderResult<Self> {
        if name.is_empty() || name.contains('\\') {
            return Err(RenderError::InvalidConfig(format!(
                "invalid pipe name {name:?}"
            )));
        }
        let mut listener = Self {
            path: HSTRING::from(format!(r"\\.\pipe\{name}")),
            buffer_size,
            instance: None,
        };
        listener.instance = Some(listener.create_instance()?);
        info!(pipe = %listener.path, "control pipe listening");
        Ok(listener)
    }

    fn create_instance(&self) -> RenderResult<OwnedHandle> {
        let handle = unsafe {
            CreateNamedPipeW(
                &self.path,
                PIPE_ACCESS_DUPLEX | FILE_FLAG_OVERLAPPED,
                PIPE_TYPE_BYTE | PIPE_READMODE_BYTE | PIPE_WAIT | PIPE_REJECT_REMOTE_CLIENTS,
                PIPE_UNLIMITED_INSTANCES,
                self.buffer_size,
                self.buffer_size,
                0,
                None,
            )
        };
        OwnedHandle::new(handle).ok_or_else(|| {
            RenderError::Platform(anyhow::anyhow!(
                "CreateNamedPipeW failed for {}: {}",
                self.path,
                windows::core::Error::from_win32()
            ))
        })
    }

    fn connect(&self, pipe: &OwnedHandle, timeout: Duration) -> RenderResult<()> {
        let event = new_event()?;
        let mut overlapped = OVERLAPPED {
            hEvent: event.raw(),
            ..Default::default()
        };

        match unsafe { ConnectNamedPipe(pipe.raw(), Some(&mut overlapped as *mut OVERLAPPED)) } {
            Ok(()) => return Ok(()),
            Err(err) if err.code() == ERROR_PIPE_CONNECTED.to_hresult() => return Ok(()),
            Err(err) if err.code() == ERROR_IO_PENDING.to_hresult() => {}
            Err(err) => {
                return Err(RenderError::Platform(
                    anyhow::Error::new(err).context("ConnectNamedPipe failed"),
                ));
            }
        }

        let waited = unsafe { WaitForSingleObject(event.raw(), wait_millis(timeout)) };
        if waited == WAIT_TIMEOUT {
            unsafe {
                let _ = CancelIoEx(pipe.raw(), Some(&overlapped as *const OVERLAPPED));
                // The cancelled operation still owns `overlapped` until it
                // completes.
                let mut ignored = 0u32;
                let _ = GetOverlappedResult(pipe.raw(), &overlapped, &mut ignored, true);
            }
            return Err(RenderError::Timeout);
        }
        if waited != WAIT_OBJECT_0 {
            return Err(RenderError::Platform(anyhow::anyhow!(
                "waiting for a pipe client failed: {}",
                windows::core::Error::from_win32()
            )));
        }

        let mut transferred = 0u32;
        unsafe { GetOverlappedResult(pipe.raw(), &overlapped, &mut transferred, false) }
            .context("GetOverlappedResult failed after ConnectNamedPipe")
            .map_err(RenderError::Platform)
    }
}

impl ControlListener for NamedPipeListener {
    fn accept(&mut self, timeout: Duration) -> RenderResult<Box<dyn ControlStream>> {
        let pipe = match self.instance.take() {
            Some(pipe) => pipe,
            None => self.create_instance()?,
        };
        // A timed-out or failed instance is dropped; the next call starts
        // with a fresh one.
        self.connect(&pipe, timeout)?;

        if let Err(err) = verify_peer(&PipePeer { pipe: pipe.raw() }) {
            unsafe {
                let _ = DisconnectNamedPipe(pipe.raw());
            }
            return Err(err);
        }
        debug!(pipe = %self.path, "control client connected");
        Ok(Box::new(PipeStream::new(pipe)?))
    }
}

struct PipePeer {
    pipe: HANDLE,
}

impl PeerInspector for PipePeer {
    fn check_available(&self) -> bool {
        peer_check().is_available()
    }

    fn peer_image(&self) -> Option<PathBuf> {
        let client_pid = peer_check().entry()?;
        let mut pid = 0u32;
        if !unsafe { client_pid(self.pipe, &mut pid) }.as_bool() {
            return None;
        }
        let process =
            unsafe { OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, false, pid) }.ok()?;
        let process = OwnedHandle::new(process)?;
        image_path(process.raw())
    }

    fn own_image(&self) -> Option<PathBuf> {
        image_path(unsafe { GetCurrentProcess() })
    }
}

fn image_path(process: HANDLE) -> Option<PathBuf> {
    let mut buffer = vec![0u16; MAX_IMAGE_PATH];
    let mut len = buffer.len() as u32;
    unsafe {
        QueryFullProcessImageNameW(
            process,
            PROCESS_NAME_WIN32,
            PWSTR(buffer.as_mut_ptr()),
            &mut len,
        )
    }
    .ok()?;
    buffer.truncate(len as usize);
    Some(PathBuf::from(String::from_utf16_lossy(&buffer)))
}

fn io_error(err: windows::core::Error) -> io::Error {
    let code = err.code().0 as u32;
    // HRESULT_FROM_WIN32 puts the Win32 code in the low word of facility 7.
    if code & 0xFFFF_0000 == 0x8007_0000 {
        io::Error::from_raw_os_error((code & 0xFFFF) as i32)
    } else {
        io::Error::other(err.message())
    }
}

/// Connected pipe instance.
struct PipeStream {
    pipe: OwnedHandle,
    event: OwnedHandle,
}

impl PipeStream {
    fn new(pipe: OwnedHandle) -> RenderResult<Self> {
        Ok(Self {
            pipe,
            event: new_event()?,
        })
    }

    fn overlapped(&self) -> OVERLAPPED {
        OVERLAPPED {
            hEvent: self.event.raw(),
            ..Default::default()
        }
    }

    fn finish(
        &self,
        overlapped: &OVERLAPPED,
        started: windows::core::Result<()>,
    ) -> io::Result<usize> {
        if let Err(err) = started {
            if err.code() != ERROR_IO_PENDING.to_hresult() {
                return Err(io_error(err));
            }
        }
        let mut transferred = 0u32;
        unsafe { GetOverlappedResult(self.pipe.raw(), overlapped, &mut transferred, true) }
            .map_err(io_error)?;
        Ok(transferred as usize)
    }
}

impl io::Read for PipeStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut overlapped = self.overlapped();
        let started = unsafe {
            ReadFile(
                self.pipe.raw(),
                Some(buf),
                None,
                Some(&mut overlapped as *mut OVERLAPPED),
            )
        };
        match self.finish(&overlapped, started) {
            Err(err) if err.raw_os_error() == Some(ERROR_BROKEN_PIPE.0 as i32) => Ok(0),
            other => other,
        }
    }
}

impl io::Write for PipeStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut overlapped = self.overlapped();
        let started = unsafe {
            WriteFile(
                self.pipe.raw(),
                Some(buf),
                None,
                Some(&mut overlapped as *mut OVERLAPPED),
            )
        };
        self.finish(&overlapped, started)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for PipeStream {
    fn drop(&mut self) {
        unsafe {
            let _ = DisconnectNamedPipe(self.pipe.raw());
        }
    }
}
