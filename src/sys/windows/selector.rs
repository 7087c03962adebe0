use std::collections::HashMap;
use std::io;
use std::ptr::null_mut;

use windows_sys::Win32::Foundation::{
    CloseHandle, HANDLE, INVALID_HANDLE_VALUE, STATUS_CANCELLED, WAIT_TIMEOUT,
};
use windows_sys::Win32::Networking::WinSock::{
    WSAIoctl, INVALID_SOCKET, SIO_BASE_HANDLE, SOCKET, SOCKET_ERROR,
};
use windows_sys::Win32::System::IO::{
    CreateIoCompletionPort, GetQueuedCompletionStatusEx, IO_STATUS_BLOCK, OVERLAPPED_ENTRY,
};

use super::afd::{
    Afd, AfdPollInfo, AFD_POLL_ABORT, AFD_POLL_ACCEPT, AFD_POLL_CONNECT_FAIL, AFD_POLL_DISCONNECT,
    AFD_POLL_LOCAL_CLOSE, AFD_POLL_RECEIVE, AFD_POLL_RECEIVE_EXPEDITED, AFD_POLL_SEND,
};
use crate::token::Token;
use crate::{Interest, Ready};

pub(crate) const NEVENTS: usize = 1024;

#[derive(Debug)]
pub(crate) struct Event {
    pub(crate) token: Token,
    pub(crate) ready: Ready,
}

// One armed socket. The status block and poll info are handed to the kernel
// by address, so the box holding a `SockState` must not move or die while a
// poll is outstanding; `zombies` below enforces the latter.
#[repr(C)]
struct SockState {
    // Must stay first: completion packets carry the iosb address and we cast
    // back to the containing state.
    iosb: IO_STATUS_BLOCK,
    poll_info: AfdPollInfo,
    token: Token,
    base: SOCKET,
    interest: Option<Interest>,
    pending: bool,
    deleted: bool,
}

/// Completion backend: an I/O completion port fed by per-socket AFD polls.
///
/// `select` drains completion packets and converts each into the same
/// `{token, ready}` event the readiness backend produces; the loop cannot
/// tell the two models apart. Wake packets are posted directly to the port
/// with a null status block.
pub(crate) struct Selector {
    port: HANDLE,
    afd: Afd,
    sockets: HashMap<usize, Box<SockState>>,
    /// Tokens whose interest changed since the last `select`.
    update_queue: Vec<usize>,
    /// Deregistered states with a poll still in flight. The kernel owns
    /// their memory until the cancellation completion arrives; then they are
    /// dropped silently.
    zombies: Vec<Box<SockState>>,
}

impl Selector {
    pub(crate) fn new() -> io::Result<Selector> {
        let port = unsafe { CreateIoCompletionPort(INVALID_HANDLE_VALUE, null_mut(), 0, 0) };
        if port.is_null() {
            return Err(io::Error::last_os_error());
        }
        let afd = Afd::new()?;
        let assoc = unsafe { CreateIoCompletionPort(afd.raw_handle() as HANDLE, port, 0, 0) };
        if assoc.is_null() {
            let err = io::Error::last_os_error();
            unsafe { CloseHandle(port) };
            return Err(err);
        }
        Ok(Selector {
            port,
            afd,
            sockets: HashMap::new(),
            update_queue: Vec::new(),
            zombies: Vec::new(),
        })
    }

    pub(crate) fn port(&self) -> HANDLE {
        self.port
    }

    pub(crate) fn register(
        &mut self,
        socket: crate::handle::OsSource,
        token: Token,
        interests: Interest,
    ) -> io::Result<()> {
        let base = base_socket(socket as SOCKET)?;
        let state = Box::new(SockState {
            iosb: unsafe { std::mem::zeroed() },
            poll_info: unsafe { std::mem::zeroed() },
            token,
            base,
            interest: Some(interests),
            pending: false,
            deleted: false,
        });
        self.sockets.insert(token.0, state);
        self.update_queue.push(token.0);
        Ok(())
    }

    pub(crate) fn reregister(
        &mut self,
        _socket: crate::handle::OsSource,
        token: Token,
        interests: Interest,
    ) -> io::Result<()> {
        let state = self
            .sockets
            .get_mut(&token.0)
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))?;
        state.interest = Some(interests);
        if state.pending {
            // A poll armed with the old mask is in flight; replace it.
            unsafe { self.afd.cancel(&mut state.iosb)? };
        }
        self.update_queue.push(token.0);
        Ok(())
    }

    pub(crate) fn deregister(&mut self, _source: crate::handle::OsSource, token: Token) -> io::Result<()> {
        let Some(mut state) = self.sockets.remove(&token.0) else {
            return Err(io::Error::from(io::ErrorKind::NotFound));
        };
        state.deleted = true;
        if state.pending {
            unsafe { self.afd.cancel(&mut state.iosb)? };
            self.zombies.push(state);
        }
        self.update_queue.retain(|t| *t != token.0);
        Ok(())
    }

    pub(crate) fn select(&mut self, events: &mut Vec<Event>, timeout: i32) -> io::Result<usize> {
        self.arm_pending_updates()?;

        let mut statuses: [OVERLAPPED_ENTRY; NEVENTS] = unsafe { std::mem::zeroed() };
        let mut n: u32 = 0;
        let timeout = if timeout < 0 { u32::MAX } else { timeout as u32 };

        let ret = unsafe {
            GetQueuedCompletionStatusEx(
                self.port,
                statuses.as_mut_ptr(),
                NEVENTS as u32,
                &mut n,
                timeout,
                0,
            )
        };
        if ret == 0 {
            let err = io::Error::last_os_error();
            return if err.raw_os_error() == Some(WAIT_TIMEOUT as i32) {
                Ok(0)
            } else {
                Err(err)
            };
        }

        let n = n as usize;
        for status in statuses.iter().take(n) {
            if status.lpOverlapped.is_null() {
                // Posted wake packet; the key is the token.
                events.push(Event {
                    token: Token(status.lpCompletionKey),
                    ready: Ready::READABLE,
                });
                continue;
            }
            self.complete_poll(status.lpOverlapped as *mut IO_STATUS_BLOCK, events);
        }

        Ok(n)
    }

    // Convert one AFD completion into an event and retire the poll. A
    // completion for a deregistered socket only releases its zombie record.
    fn complete_poll(&mut self, iosb: *mut IO_STATUS_BLOCK, events: &mut Vec<Event>) {
        if let Some(pos) = self
            .zombies
            .iter()
            .position(|z| &z.iosb as *const _ as usize == iosb as usize)
        {
            self.zombies.swap_remove(pos);
            return;
        }

        // SAFETY: the iosb is the first field of a pinned, live SockState.
        let state = unsafe { &mut *(iosb as *mut SockState) };
        state.pending = false;

        let status = unsafe { state.iosb.Anonymous.Status };
        if status == STATUS_CANCELLED || state.deleted {
            return;
        }
        let Some(interest) = state.interest else {
            return;
        };

        let observed = if state.poll_info.number_of_handles == 1 {
            state.poll_info.handles[0].events
        } else {
            0
        };
        let ready = afd_to_ready(observed, interest);

        // Level-triggered contract: keep reporting while interest remains.
        self.update_queue.push(state.token.0);

        if !ready.is_empty() {
            events.push(Event {
                token: state.token,
                ready,
            });
        }
    }

    fn arm_pending_updates(&mut self) -> io::Result<()> {
        let tokens = std::mem::take(&mut self.update_queue);
        for raw_token in tokens {
            let Some(state) = self.sockets.get_mut(&raw_token) else {
                continue;
            };
            if state.pending || state.deleted {
                continue;
            }
            let Some(interest) = state.interest else {
                continue;
            };

            state.poll_info = AfdPollInfo {
                timeout: i64::MAX,
                number_of_handles: 1,
                exclusive: 0,
                handles: [super::afd::AfdPollHandleInfo {
                    handle: state.base as HANDLE,
                    events: interest_to_afd(interest),
                    status: 0,
                }],
            };

            let iosb = &mut state.iosb as *mut IO_STATUS_BLOCK;
            let poll_info = &mut state.poll_info as *mut AfdPollInfo;
            // SAFETY: state is boxed and outlives the poll (zombies keep
            // deregistered states alive until their completion).
            match unsafe { self.afd.poll(&mut *poll_info, iosb) } {
                Ok(_) => state.pending = true,
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }
}

impl Drop for Selector {
    fn drop(&mut self) {
        for (_, state) in self.sockets.iter_mut() {
            if state.pending {
                unsafe {
                    let _ = self.afd.cancel(&mut state.iosb);
                }
            }
        }
        unsafe { CloseHandle(self.port) };
    }
}

fn interest_to_afd(interest: Interest) -> u32 {
    let mut events = AFD_POLL_LOCAL_CLOSE | AFD_POLL_ABORT | AFD_POLL_CONNECT_FAIL;
    if interest.is_readable() {
        events |= AFD_POLL_RECEIVE | AFD_POLL_ACCEPT | AFD_POLL_DISCONNECT;
    }
    if interest.is_writable() {
        events |= AFD_POLL_SEND;
    }
    if interest.is_priority() {
        events |= AFD_POLL_RECEIVE_EXPEDITED;
    }
    if interest.is_disconnect() {
        events |= AFD_POLL_DISCONNECT;
    }
    events
}

fn afd_to_ready(observed: u32, interest: Interest) -> Ready {
    let mut ready = Ready::EMPTY;
    if observed & (AFD_POLL_RECEIVE | AFD_POLL_ACCEPT) != 0 {
        ready |= Ready::READABLE;
    }
    if observed & AFD_POLL_SEND != 0 {
        ready |= Ready::WRITABLE;
    }
    if observed & AFD_POLL_RECEIVE_EXPEDITED != 0 {
        ready |= Ready::PRIORITY;
    }
    if observed & AFD_POLL_DISCONNECT != 0 {
        ready |= Ready::DISCONNECT;
        if interest.is_readable() {
            ready |= Ready::READABLE;
        }
    }
    if observed & (AFD_POLL_ABORT | AFD_POLL_CONNECT_FAIL) != 0 {
        ready |= Ready::ERROR;
    }
    if observed & AFD_POLL_LOCAL_CLOSE != 0 {
        ready |= Ready::HUP;
    }
    ready
}

fn base_socket(raw: SOCKET) -> io::Result<SOCKET> {
    let mut base: SOCKET = INVALID_SOCKET;
    let mut bytes: u32 = 0;
    let ret = unsafe {
        WSAIoctl(
            raw,
            SIO_BASE_HANDLE,
            null_mut(),
            0,
            &mut base as *mut _ as *mut _,
            std::mem::size_of::<SOCKET>() as u32,
            &mut bytes,
            null_mut(),
            None,
        )
    };
    if ret == SOCKET_ERROR {
        return Err(io::Error::last_os_error());
    }
    Ok(base)
}
