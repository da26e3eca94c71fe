//! Process creation for pipeline stages.
//!
//! [`ForkExec`] is the real thing. The [`Launcher`] trait is the seam the
//! orchestrator goes through, which lets callers observe or replace how
//! stages come to life.

use nix::errno::Errno;
use nix::sys::signal::{self, SigHandler, Signal};
use nix::unistd::{self, ForkResult, Pid};
use std::ffi::{CString, c_char};
use std::os::fd::RawFd;
use std::ptr;

/// Everything a child needs, computed by the parent before `fork`.
///
/// The child side runs between `fork` and `exec` and must not allocate, so
/// every vector here is built up front.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedStage {
    pub index: usize,
    pub argv: Vec<CString>,
    /// Descriptor to install as standard input, if redirected.
    pub stdin: Option<RawFd>,
    /// Descriptor to install as standard output, if redirected.
    pub stdout: Option<RawFd>,
    /// Every channel descriptor the parent holds at launch time. All of them
    /// are closed in the child once the standard streams are in place.
    pub close: Vec<RawFd>,
}

/// Creates the process for one stage.
pub trait Launcher {
    /// Start `stage` and return its pid. An error means no process was created.
    fn launch(&mut self, stage: &PreparedStage) -> nix::Result<Pid>;
}

/// Launcher based on `fork` + `execvp`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ForkExec;

impl Launcher for ForkExec {
    fn launch(&mut self, stage: &PreparedStage) -> nix::Result<Pid> {
        let exec_argv = exec_argv(&stage.argv);
        // SAFETY: the child only performs async-signal-safe calls before exec or _exit.
        match unsafe { unistd::fork() }? {
            ForkResult::Parent { child } => Ok(child),
            ForkResult::Child => enter_stage(stage, &exec_argv),
        }
    }
}

/// NULL-terminated pointer array over `argv`, as `execvp(3)` takes it.
/// Borrows the strings; valid as long as `argv` is.
fn exec_argv(argv: &[CString]) -> Vec<*const c_char> {
    argv.iter()
        .map(|arg| arg.as_ptr())
        .chain(std::iter::once(ptr::null()))
        .collect()
}

/// Why a child gave up before running its program. Encoded in its exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildFailure {
    /// A standard stream could not be redirected.
    Descriptor(Errno),
    /// The program does not exist anywhere on the search path.
    NotFound,
    /// The program exists but could not be executed.
    CannotExecute(Errno),
}

impl ChildFailure {
    pub const DESCRIPTOR_EXIT_CODE: i32 = 125;
    pub const CANNOT_EXECUTE_EXIT_CODE: i32 = 126;
    pub const NOT_FOUND_EXIT_CODE: i32 = 127;

    fn from_exec(errno: Errno) -> Self {
        match errno {
            Errno::ENOENT => ChildFailure::NotFound,
            e => ChildFailure::CannotExecute(e),
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            ChildFailure::Descriptor(_) => Self::DESCRIPTOR_EXIT_CODE,
            ChildFailure::NotFound => Self::NOT_FOUND_EXIT_CODE,
            ChildFailure::CannotExecute(_) => Self::CANNOT_EXECUTE_EXIT_CODE,
        }
    }

    /// Static description, usable without allocating.
    pub fn describe(&self) -> &'static str {
        match self {
            ChildFailure::Descriptor(_) => "could not redirect standard stream",
            ChildFailure::NotFound => "command not found",
            ChildFailure::CannotExecute(e) => e.desc(),
        }
    }
}

/// Retry a system call interrupted by a signal.
pub(crate) fn retry_eintr<T>(f: impl Fn() -> nix::Result<T>) -> nix::Result<T> {
    loop {
        match f() {
            Err(Errno::EINTR) => (),
            result => return result,
        }
    }
}

/// Child side of a launch: wire the standard streams, drop every channel
/// descriptor, then become the program.
///
/// `exec_argv` comes from [`exec_argv`] in the parent: nothing here allocates.
fn enter_stage(stage: &PreparedStage, exec_argv: &[*const c_char]) -> ! {
    // the Rust runtime ignores SIGPIPE, and ignored signals survive exec
    // SAFETY: restoring the default disposition installs no handler.
    let _ = unsafe { signal::signal(Signal::SIGPIPE, SigHandler::SigDfl) };

    if let Err(e) = install(stage.stdin, libc::STDIN_FILENO)
        .and_then(|_| install(stage.stdout, libc::STDOUT_FILENO))
    {
        child_exit(stage, ChildFailure::Descriptor(e));
    }

    for &fd in &stage.close {
        let _ = unistd::close(fd);
    }

    // SAFETY: exec_argv is NULL-terminated and points into stage.argv, which
    // outlives this call; execvp only returns on failure.
    unsafe { libc::execvp(exec_argv[0], exec_argv.as_ptr()) };
    child_exit(stage, ChildFailure::from_exec(Errno::last()))
}

/// Make `fd` the descriptor `target`. Channel ends never sit on 0..=2, so the
/// copy is always a new descriptor, and dup2 leaves it open across exec.
fn install(fd: Option<RawFd>, target: RawFd) -> nix::Result<()> {
    match fd {
        None => Ok(()),
        Some(fd) => retry_eintr(|| unistd::dup2(fd, target)).map(drop),
    }
}

fn child_exit(stage: &PreparedStage, failure: ChildFailure) -> ! {
    let program = stage.argv.first().map(|s| s.to_bytes()).unwrap_or_default();
    for part in [
        b"pipesh: ".as_slice(),
        program,
        b": ".as_slice(),
        failure.describe().as_bytes(),
        b"\n".as_slice(),
    ] {
        // SAFETY: plain write(2) of a live buffer to stderr.
        unsafe {
            libc::write(libc::STDERR_FILENO, part.as_ptr().cast(), part.len());
        }
    }
    // SAFETY: leaves the forked child without running the parent's atexit
    // handlers or destructors.
    unsafe { libc::_exit(failure.exit_code()) }
}
