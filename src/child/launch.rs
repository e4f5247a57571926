//! Launching and reaping captive children.
//!
//! Exec failure is detected synchronously with the self-pipe trick: the
//! child holds the close-on-exec write end of a status pipe. A successful
//! exec closes it, so the parent reads end-of-stream; a failed exec writes
//! `errno` into it first.

use std::ffi::{CString, OsStr};
use std::io::{self, Read};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::{AsRawFd, RawFd};
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::sys::wait::{WaitPidFlag, waitpid};
use nix::unistd::{ForkResult, Pid, fork};
use tracing::{debug, trace};

use super::ipc::PipeFd;
use super::signals::{TerminationReason, analyze_wait_status};
use crate::error::{CaptiveError, Result};

/// Exit status of a forked child whose exec failed.
const EXEC_FAILED_STATUS: libc::c_int = 127;

/// A running child whose stdin and stdout belong to the parent.
///
/// Dropping an un-reaped child terminates and reaps it.
pub struct ChildProcess {
    pid: Pid,
    program: String,
    stdin: Option<PipeFd>,
    stdout: Option<PipeFd>,
    exit: Option<TerminationReason>,
}

impl ChildProcess {
    /// Fork and exec `argv[0]` (searched in `PATH`) with `argv` as its arguments.
    ///
    /// Returns only after the exec has either succeeded or failed, so a
    /// missing program surfaces here as [`CaptiveError::Launch`].
    ///
    /// On Linux the child receives SIGTERM when the *calling thread* exits,
    /// not only when the whole process does. Launch from a thread that
    /// outlives the child, such as the one that will wait for it.
    pub fn launch<S: AsRef<OsStr>>(argv: &[S]) -> Result<Self> {
        let program = argv
            .first()
            .map(|arg| arg.as_ref().to_string_lossy().into_owned())
            .ok_or_else(|| CaptiveError::InvalidArgument("empty command line".into()))?;

        // Everything the child touches is allocated before fork.
        let c_args = argv
            .iter()
            .map(|arg| CString::new(arg.as_ref().as_bytes()))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| CaptiveError::Launch {
                program: program.clone(),
                source: io::Error::new(io::ErrorKind::InvalidInput, e),
            })?;
        let mut c_argv: Vec<*const libc::c_char> = c_args.iter().map(|arg| arg.as_ptr()).collect();
        c_argv.push(std::ptr::null());

        let (child_stdin, parent_stdin) = PipeFd::pipe()?;
        let (parent_stdout, child_stdout) = PipeFd::pipe()?;
        let (status_read, status_write) = PipeFd::pipe()?;

        // SAFETY: the child branch only makes async-signal-safe calls before
        // it execs or exits.
        match unsafe { fork() }? {
            ForkResult::Child => unsafe {
                exec_child(
                    child_stdin.as_raw_fd(),
                    child_stdout.as_raw_fd(),
                    status_write.as_raw_fd(),
                    &c_argv,
                )
            },
            ForkResult::Parent { child } => {
                drop(child_stdin);
                drop(child_stdout);
                drop(status_write);

                let mut launched = Self {
                    pid: child,
                    program,
                    stdin: Some(parent_stdin),
                    stdout: Some(parent_stdout),
                    exit: None,
                };

                if let Some(errno) = read_exec_status(status_read)? {
                    // Reap the failed child so it does not linger as a zombie.
                    let _ = launched.wait();
                    return Err(CaptiveError::Launch {
                        program: launched.program.clone(),
                        source: io::Error::from_raw_os_error(errno),
                    });
                }

                debug!(
                    pid = child.as_raw(),
                    program = %launched.program,
                    "Launched captive child"
                );
                Ok(launched)
            }
        }
    }

    /// Get the process ID.
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Name of the launched program (`argv[0]`).
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Take the write end of the child's stdin. Can only be taken once.
    pub fn take_stdin(&mut self) -> Option<PipeFd> {
        self.stdin.take()
    }

    /// Take the read end of the child's stdout. Can only be taken once.
    pub fn take_stdout(&mut self) -> Option<PipeFd> {
        self.stdout.take()
    }

    /// Block until the child exits.
    ///
    /// Waiting again after the child was reaped returns the same reason.
    pub fn wait(&mut self) -> Result<TerminationReason> {
        if let Some(reason) = self.exit {
            return Ok(reason);
        }
        loop {
            match waitpid(self.pid, None) {
                Ok(status) => {
                    if let Some(reason) = analyze_wait_status(status) {
                        trace!(pid = self.pid.as_raw(), %reason, "Reaped captive child");
                        self.exit = Some(reason);
                        return Ok(reason);
                    }
                }
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Reap the child if it has already exited (non-blocking).
    pub fn try_wait(&mut self) -> Result<Option<TerminationReason>> {
        if let Some(reason) = self.exit {
            return Ok(Some(reason));
        }
        let status = waitpid(self.pid, Some(WaitPidFlag::WNOHANG))?;
        let reason = analyze_wait_status(status);
        if reason.is_some() {
            self.exit = reason;
        }
        Ok(reason)
    }

    /// Send SIGTERM to the child.
    pub fn terminate(&self) -> Result<()> {
        if self.exit.is_some() {
            return Ok(());
        }
        signal::kill(self.pid, Signal::SIGTERM)?;
        Ok(())
    }

    /// Send SIGKILL to the child and reap it.
    pub fn kill(&mut self) -> Result<TerminationReason> {
        if self.exit.is_none() {
            signal::kill(self.pid, Signal::SIGKILL)?;
        }
        self.wait()
    }
}

impl Drop for ChildProcess {
    fn drop(&mut self) {
        if self.exit.is_some() {
            return;
        }
        // Close our pipe ends first so a child blocked on them can finish.
        self.stdin.take();
        self.stdout.take();

        let _ = self.terminate();
        std::thread::sleep(Duration::from_millis(10));
        if let Ok(Some(_)) = self.try_wait() {
            return;
        }
        let _ = self.kill();
    }
}

/// Read the exec status pipe: `None` when exec succeeded, the child's errno otherwise.
fn read_exec_status(mut status: PipeFd) -> io::Result<Option<i32>> {
    let mut buf = [0u8; std::mem::size_of::<libc::c_int>()];
    let mut filled = 0;
    while filled < buf.len() {
        let n = status.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(match filled {
        0 => None,
        n if n == buf.len() => Some(libc::c_int::from_ne_bytes(buf)),
        _ => Some(libc::EIO),
    })
}

/// Child side of the fork: install the pipes on fds 0 and 1 and exec.
///
/// Every pipe end was created close-on-exec, so exec drops all of them
/// except the duplicates on 0 and 1.
unsafe fn exec_child(
    stdin: RawFd,
    stdout: RawFd,
    status: RawFd,
    argv: &[*const libc::c_char],
) -> ! {
    unsafe {
        // Fires when the forking thread exits, not the whole parent process.
        #[cfg(target_os = "linux")]
        libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM as libc::c_ulong);

        // The Rust runtime ignores SIGPIPE and ignored signals survive exec.
        libc::signal(libc::SIGPIPE, libc::SIG_DFL);

        if install_fd(stdin, libc::STDIN_FILENO) && install_fd(stdout, libc::STDOUT_FILENO) {
            libc::execvp(argv[0], argv.as_ptr());
        }

        let errno: libc::c_int = io::Error::last_os_error()
            .raw_os_error()
            .unwrap_or(libc::EINVAL);
        libc::write(
            status,
            (&errno as *const libc::c_int).cast(),
            std::mem::size_of::<libc::c_int>(),
        );
        libc::_exit(EXEC_FAILED_STATUS)
    }
}

/// Make `from` available as `to` without close-on-exec.
unsafe fn install_fd(from: RawFd, to: RawFd) -> bool {
    unsafe {
        if from == to {
            libc::fcntl(to, libc::F_SETFD, 0) != -1
        } else {
            libc::dup2(from, to) != -1
        }
    }
}
