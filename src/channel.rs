//! The orchestrator's copies of the pipes between stages.

use crate::stage::{ChannelEnd, Side};
use nix::errno::Errno;
use nix::fcntl::{FcntlArg, fcntl};
use nix::unistd;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use tracing::debug;

/// Both ends of one pipe, as long as the orchestrator still holds them.
#[derive(Debug)]
struct Channel {
    read: Option<OwnedFd>,
    write: Option<OwnedFd>,
}

impl Channel {
    fn open() -> nix::Result<Self> {
        let (read, write) = open_cloexec_pipe()?;
        Ok(Self {
            read: Some(above_stdio(read)?),
            write: Some(above_stdio(write)?),
        })
    }

    fn end(&self, side: Side) -> Option<&OwnedFd> {
        match side {
            Side::Read => self.read.as_ref(),
            Side::Write => self.write.as_ref(),
        }
    }

    fn end_mut(&mut self, side: Side) -> &mut Option<OwnedFd> {
        match side {
            Side::Read => &mut self.read,
            Side::Write => &mut self.write,
        }
    }
}

#[cfg(any(
    target_os = "linux",
    target_os = "android",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly"
))]
fn open_cloexec_pipe() -> nix::Result<(OwnedFd, OwnedFd)> {
    unistd::pipe2(nix::fcntl::OFlag::O_CLOEXEC)
}

#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly"
)))]
fn open_cloexec_pipe() -> nix::Result<(OwnedFd, OwnedFd)> {
    use nix::fcntl::FdFlag;
    let (read, write) = unistd::pipe()?;
    for fd in [&read, &write] {
        fcntl(fd.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))?;
    }
    Ok((read, write))
}

/// Move `fd` out of the standard stream range. When the orchestrator runs with
/// a closed stdin or stdout, `pipe` may hand out 0 or 1, and a child would
/// clobber its own channel end while redirecting the other stream.
fn above_stdio(fd: OwnedFd) -> nix::Result<OwnedFd> {
    if fd.as_raw_fd() > libc::STDERR_FILENO {
        return Ok(fd);
    }
    let moved = fcntl(fd.as_raw_fd(), FcntlArg::F_DUPFD_CLOEXEC(libc::STDERR_FILENO + 1))?;
    // SAFETY: F_DUPFD_CLOEXEC returned a fresh descriptor nobody else owns.
    Ok(unsafe { OwnedFd::from_raw_fd(moved) })
}

/// All channels of one pipeline.
///
/// Ends are close-on-exec, so a stage only keeps what it duplicates onto its
/// standard streams. Releasing an end closes the orchestrator's copy; each end
/// is released at most once.
#[derive(Debug, Default)]
pub struct ChannelSet {
    channels: Vec<Channel>,
}

impl ChannelSet {
    /// Create `count` channels. On failure the channels created so far are
    /// closed and the index of the failing channel is returned with the error.
    pub fn open(count: usize) -> Result<Self, (usize, Errno)> {
        let mut channels = Vec::with_capacity(count);
        for index in 0..count {
            let channel = Channel::open().map_err(|e| (index, e))?;
            debug!(
                channel = index,
                read = channel.read.as_ref().map(AsRawFd::as_raw_fd),
                write = channel.write.as_ref().map(AsRawFd::as_raw_fd),
                "opened pipe"
            );
            channels.push(channel);
        }
        Ok(Self { channels })
    }

    /// Raw descriptor of `end`, or `None` once it has been released.
    pub fn raw(&self, end: ChannelEnd) -> Option<RawFd> {
        self.channels
            .get(end.channel)
            .and_then(|c| c.end(end.side))
            .map(AsRawFd::as_raw_fd)
    }

    /// Every descriptor still held, in channel order.
    pub fn held(&self) -> Vec<RawFd> {
        self.channels
            .iter()
            .flat_map(|c| [c.read.as_ref(), c.write.as_ref()])
            .flatten()
            .map(AsRawFd::as_raw_fd)
            .collect()
    }

    /// Close the orchestrator's copy of `end`. Returns false if it was already closed.
    pub fn release(&mut self, end: ChannelEnd) -> bool {
        match self.channels.get_mut(end.channel).and_then(|c| c.end_mut(end.side).take()) {
            Some(fd) => {
                debug!(fd = fd.as_raw_fd(), "released {}", end);
                drop(fd);
                true
            }
            None => false,
        }
    }

    /// Close everything still held.
    pub fn release_all(&mut self) {
        for index in 0..self.channels.len() {
            self.release(ChannelEnd::read(index));
            self.release(ChannelEnd::write(index));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::fcntl::FdFlag;
    use std::fs::File;
    use std::io::{Read, Write};
    use std::mem::ManuallyDrop;

    #[test]
    fn ends_are_close_on_exec() {
        let set = ChannelSet::open(2).unwrap();
        assert_eq!(set.held().len(), 4);
        for fd in set.held() {
            let flags = FdFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFD).unwrap());
            assert!(flags.contains(FdFlag::FD_CLOEXEC), "fd {} lacks FD_CLOEXEC", fd);
            assert!(fd > 2, "fd {} overlaps a standard stream", fd);
        }
    }

    #[test]
    fn release_is_once_per_end() {
        let mut set = ChannelSet::open(3).unwrap();
        assert_eq!(set.held().len(), 6);

        assert!(set.release(ChannelEnd::write(1)));
        assert!(!set.release(ChannelEnd::write(1)));
        assert_eq!(set.raw(ChannelEnd::write(1)), None);
        assert!(set.raw(ChannelEnd::read(1)).is_some());
        assert_eq!(set.held().len(), 5);

        set.release_all();
        assert!(set.held().is_empty());
        assert!(!set.release(ChannelEnd::read(0)));
        assert!(!set.release(ChannelEnd::read(7)));
    }

    #[test]
    fn closing_the_writer_ends_the_stream() {
        let mut set = ChannelSet::open(1).unwrap();
        let read_fd = set.raw(ChannelEnd::read(0)).unwrap();
        let write_fd = set.raw(ChannelEnd::write(0)).unwrap();

        // borrowed views; the set stays the owner of both descriptors
        let mut writer = ManuallyDrop::new(unsafe { File::from_raw_fd(write_fd) });
        writer.write_all(b"abc").unwrap();
        set.release(ChannelEnd::write(0));

        let mut reader = ManuallyDrop::new(unsafe { File::from_raw_fd(read_fd) });
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).unwrap();
        assert_eq!(buf, b"abc");
    }

    #[test]
    fn zero_channels_for_single_stage() {
        let set = ChannelSet::open(0).unwrap();
        assert!(set.held().is_empty());
        assert_eq!(set.raw(ChannelEnd::read(0)), None);
    }
}
