//! Minimal binding to the `\Device\Afd` poll interface, the kernel surface
//! behind readiness notification for sockets on Windows. One device handle
//! is opened per selector and associated with its completion port; each
//! armed socket keeps a single outstanding `IOCTL_AFD_POLL` whose completion
//! is delivered through the port.

use std::io;
use std::mem::size_of;
use std::os::windows::io::RawHandle;
use std::ptr::null_mut;

use windows_sys::Wdk::Foundation::OBJECT_ATTRIBUTES;
use windows_sys::Wdk::Storage::FileSystem::{NtCancelIoFileEx, NtCreateFile, FILE_OPEN};
use windows_sys::Wdk::System::IO::NtDeviceIoControlFile;
use windows_sys::Win32::Foundation::{
    RtlNtStatusToDosError, HANDLE, NTSTATUS, STATUS_NOT_FOUND, STATUS_PENDING, STATUS_SUCCESS,
    UNICODE_STRING,
};
use windows_sys::Win32::Storage::FileSystem::{FILE_SHARE_READ, FILE_SHARE_WRITE, SYNCHRONIZE};
use windows_sys::Win32::System::IO::IO_STATUS_BLOCK;

const IOCTL_AFD_POLL: u32 = 0x0001_2024;

pub(crate) const AFD_POLL_RECEIVE: u32 = 0x0001;
pub(crate) const AFD_POLL_RECEIVE_EXPEDITED: u32 = 0x0002;
pub(crate) const AFD_POLL_SEND: u32 = 0x0004;
pub(crate) const AFD_POLL_DISCONNECT: u32 = 0x0008;
pub(crate) const AFD_POLL_ABORT: u32 = 0x0010;
pub(crate) const AFD_POLL_LOCAL_CLOSE: u32 = 0x0020;
pub(crate) const AFD_POLL_ACCEPT: u32 = 0x0080;
pub(crate) const AFD_POLL_CONNECT_FAIL: u32 = 0x0100;

#[repr(C)]
#[derive(Copy, Clone)]
pub(crate) struct AfdPollHandleInfo {
    pub(crate) handle: HANDLE,
    pub(crate) events: u32,
    pub(crate) status: NTSTATUS,
}

#[repr(C)]
#[derive(Copy, Clone)]
pub(crate) struct AfdPollInfo {
    pub(crate) timeout: i64,
    pub(crate) number_of_handles: u32,
    pub(crate) exclusive: u32,
    pub(crate) handles: [AfdPollHandleInfo; 1],
}

pub(crate) struct Afd {
    handle: HANDLE,
}

// The device name, UTF-16: "\Device\Afd\Evio".
static AFD_NAME: &[u16] = &[
    b'\\' as u16,
    b'D' as u16,
    b'e' as u16,
    b'v' as u16,
    b'i' as u16,
    b'c' as u16,
    b'e' as u16,
    b'\\' as u16,
    b'A' as u16,
    b'f' as u16,
    b'd' as u16,
    b'\\' as u16,
    b'E' as u16,
    b'v' as u16,
    b'i' as u16,
    b'o' as u16,
];

impl Afd {
    pub(crate) fn new() -> io::Result<Afd> {
        let mut name = UNICODE_STRING {
            Length: (AFD_NAME.len() * size_of::<u16>()) as u16,
            MaximumLength: (AFD_NAME.len() * size_of::<u16>()) as u16,
            Buffer: AFD_NAME.as_ptr() as *mut u16,
        };
        let attributes = OBJECT_ATTRIBUTES {
            Length: size_of::<OBJECT_ATTRIBUTES>() as u32,
            RootDirectory: null_mut(),
            ObjectName: &mut name,
            Attributes: 0,
            SecurityDescriptor: null_mut(),
            SecurityQualityOfService: null_mut(),
        };

        let mut handle: HANDLE = null_mut();
        let mut iosb: IO_STATUS_BLOCK = unsafe { std::mem::zeroed() };
        let status = unsafe {
            NtCreateFile(
                &mut handle,
                SYNCHRONIZE,
                &attributes,
                &mut iosb,
                null_mut(),
                0,
                FILE_SHARE_READ | FILE_SHARE_WRITE,
                FILE_OPEN,
                0,
                null_mut(),
                0,
            )
        };
        if status != STATUS_SUCCESS {
            return Err(nt_error(status));
        }
        Ok(Afd { handle })
    }

    pub(crate) fn raw_handle(&self) -> RawHandle {
        self.handle as RawHandle
    }

    /// Issue a single-handle poll. `info` and `iosb` must stay pinned until
    /// the matching completion has been consumed from the port.
    ///
    /// Returns `Ok(true)` when the poll completed synchronously (a
    /// completion packet is still queued) and `Ok(false)` when it is
    /// pending.
    pub(crate) unsafe fn poll(
        &self,
        info: &mut AfdPollInfo,
        iosb: *mut IO_STATUS_BLOCK,
    ) -> io::Result<bool> {
        (*iosb).Anonymous.Status = STATUS_PENDING;

        let status = NtDeviceIoControlFile(
            self.handle,
            null_mut(),
            None,
            iosb as *mut _,
            iosb,
            IOCTL_AFD_POLL,
            info as *mut _ as *mut _,
            size_of::<AfdPollInfo>() as u32,
            info as *mut _ as *mut _,
            size_of::<AfdPollInfo>() as u32,
        );
        match status {
            STATUS_SUCCESS => Ok(true),
            STATUS_PENDING => Ok(false),
            _ => Err(nt_error(status)),
        }
    }

    /// Cancel an outstanding poll identified by its status block. The
    /// completion (with `STATUS_CANCELLED`) is still delivered through the
    /// port.
    pub(crate) unsafe fn cancel(&self, iosb: *mut IO_STATUS_BLOCK) -> io::Result<()> {
        if (*iosb).Anonymous.Status != STATUS_PENDING {
            return Ok(());
        }
        let mut cancel_iosb: IO_STATUS_BLOCK = std::mem::zeroed();
        let status = NtCancelIoFileEx(self.handle, iosb, &mut cancel_iosb);
        if status == STATUS_SUCCESS || status == STATUS_NOT_FOUND {
            Ok(())
        } else {
            Err(nt_error(status))
        }
    }
}

impl Drop for Afd {
    fn drop(&mut self) {
        unsafe {
            windows_sys::Win32::Foundation::CloseHandle(self.handle);
        }
    }
}

pub(crate) fn nt_error(status: NTSTATUS) -> io::Error {
    io::Error::from_raw_os_error(unsafe { RtlNtStatusToDosError(status) } as i32)
}
