//! Child processes attached to a pseudo-terminal.

use std::ffi::CString;
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::AsFd;
use std::sync::Arc;
use std::time::Duration;

use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use nix::pty::{ForkptyResult, Winsize, forkpty};
use nix::sys::signal::{Signal, kill};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::{Pid, chdir, execve};
use rustix::fs::{OFlags, fcntl_getfl, fcntl_setfl};
use rustix::io::{FdFlags, fcntl_getfd, fcntl_setfd};
use tracing::{debug, info};

use crate::error::{MultiplexError, Result};

/// Exit code of a child whose `execve` failed.
const EXEC_FAILED: i32 = 127;

/// How often a full pty input queue is waited on before giving up.
const WRITE_RETRIES: u32 = 10;
const WRITE_RETRY_WAIT: Duration = Duration::from_millis(10);

/// Result of one nonblocking read from the master side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    Data(usize),
    WouldBlock,
    /// The child closed its side (EOF, or `EIO` on Linux).
    Eof,
}

/// A forked child and the master end of its pty.
#[derive(Debug)]
pub struct PtyChild {
    master: Arc<File>,
    pid: Pid,
}

impl PtyChild {
    /// Fork a child on a new pty of `height` x `width` and exec `argv`
    /// with exactly `env` as its environment.
    ///
    /// The child changes to `home` first when given. The master is put in
    /// nonblocking mode and is closed on exec, so later children never
    /// hold it open.
    pub fn spawn(
        argv: &[String],
        env: &[(String, String)],
        home: Option<&str>,
        height: u16,
        width: u16,
    ) -> Result<Self> {
        let command = argv.join(" ");
        let spawn_error = |err: io::Error| MultiplexError::spawn(command.clone(), err);

        let Some(program) = argv.first() else {
            return Err(spawn_error(io::Error::new(
                io::ErrorKind::InvalidInput,
                "empty command",
            )));
        };
        // Everything the child touches is allocated before the fork.
        let path = c_string(program).map_err(spawn_error)?;
        let args = argv
            .iter()
            .map(|arg| c_string(arg))
            .collect::<io::Result<Vec<_>>>()
            .map_err(spawn_error)?;
        let env = env
            .iter()
            .map(|(key, value)| c_string(&format!("{key}={value}")))
            .collect::<io::Result<Vec<_>>>()
            .map_err(spawn_error)?;
        let home = home.map(c_string).transpose().map_err(spawn_error)?;

        let winsize = Winsize {
            ws_row: height,
            ws_col: width,
            ws_xpixel: 0,
            ws_ypixel: 0,
        };

        // SAFETY: after the fork the child only calls chdir, execve and
        // _exit, none of which allocate or take locks.
        let forked = unsafe { forkpty(Some(&winsize), None) }
            .map_err(|errno| spawn_error(errno.into()))?;

        match forked {
            ForkptyResult::Parent { child, master } => {
                let child = Self {
                    master: Arc::new(File::from(master)),
                    pid: child,
                };
                child.set_close_on_exec().map_err(spawn_error)?;
                child.set_nonblocking().map_err(spawn_error)?;
                info!(pid = %child.pid, command = %command, "spawned pty child");
                Ok(child)
            }
            ForkptyResult::Child => {
                if let Some(home) = &home {
                    let _ = chdir(home.as_c_str());
                }
                let _ = execve(&path, &args, &env);
                // SAFETY: _exit is async-signal-safe and skips atexit handlers
                // inherited from the parent.
                unsafe { nix::libc::_exit(EXEC_FAILED) }
            }
        }
    }

    #[must_use]
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Shared handle on the master end, for polling outside the registry.
    #[must_use]
    pub fn master(&self) -> Arc<File> {
        Arc::clone(&self.master)
    }

    /// Read whatever the child has written without blocking.
    pub fn read(&self, buf: &mut [u8]) -> io::Result<ReadOutcome> {
        match (&*self.master).read(buf) {
            Ok(0) => Ok(ReadOutcome::Eof),
            Ok(count) => Ok(ReadOutcome::Data(count)),
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) =>
            {
                Ok(ReadOutcome::WouldBlock)
            }
            Err(err) if err.raw_os_error() == Some(Errno::EIO as i32) => Ok(ReadOutcome::Eof),
            Err(err) => Err(err),
        }
    }

    /// Write all of `data`, waiting briefly whenever the pty input queue is
    /// full.
    pub fn write_all(&self, mut data: &[u8]) -> io::Result<()> {
        let mut retries = 0;
        while !data.is_empty() {
            match (&*self.master).write(data) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(count) => {
                    data = &data[count..];
                    retries = 0;
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    retries += 1;
                    if retries > WRITE_RETRIES {
                        return Err(err);
                    }
                    self.wait_writable(WRITE_RETRY_WAIT)?;
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// Set the pty window size.
    pub fn resize(&self, height: u16, width: u16) -> io::Result<()> {
        let winsize = rustix::termios::Winsize {
            ws_row: height,
            ws_col: width,
            ws_xpixel: 0,
            ws_ypixel: 0,
        };
        rustix::termios::tcsetwinsize(&*self.master, winsize).map_err(io::Error::from)
    }

    /// Send SIGTERM. A child that is already gone is not an error.
    pub fn terminate(&self) -> io::Result<()> {
        match kill(self.pid, Signal::SIGTERM) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(errno) => Err(errno.into()),
        }
    }

    /// The child's working directory, where the platform exposes it.
    #[must_use]
    pub fn cwd(&self) -> Option<String> {
        std::fs::read_link(format!("/proc/{}/cwd", self.pid))
            .ok()
            .and_then(|path| path.to_str().map(str::to_string))
    }

    fn set_close_on_exec(&self) -> io::Result<()> {
        let flags = fcntl_getfd(&*self.master)?;
        fcntl_setfd(&*self.master, flags | FdFlags::CLOEXEC)?;
        Ok(())
    }

    fn set_nonblocking(&self) -> io::Result<()> {
        let flags = fcntl_getfl(&*self.master)?;
        fcntl_setfl(&*self.master, flags | OFlags::NONBLOCK)?;
        Ok(())
    }

    fn wait_writable(&self, timeout: Duration) -> io::Result<()> {
        let mut fds = [PollFd::new(self.master.as_fd(), PollFlags::POLLOUT)];
        match poll(&mut fds, poll_timeout(timeout)) {
            Ok(_) | Err(Errno::EINTR) => Ok(()),
            Err(errno) => Err(errno.into()),
        }
    }
}

/// Collect `pid` if it has exited. Returns `true` once the pid is gone.
pub fn try_reap(pid: Pid) -> bool {
    match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
        Ok(WaitStatus::StillAlive) => false,
        Ok(status) => {
            debug!(%pid, ?status, "reaped child");
            true
        }
        Err(Errno::ECHILD) => true,
        Err(_) => false,
    }
}

/// Clamp a duration to what `poll` accepts.
pub(crate) fn poll_timeout(timeout: Duration) -> PollTimeout {
    let millis = u16::try_from(timeout.as_millis()).unwrap_or(u16::MAX);
    PollTimeout::from(millis)
}

fn c_string(value: &str) -> io::Result<CString> {
    CString::new(value).map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))
}
