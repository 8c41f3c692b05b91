//! Thin syscall wrappers shared by every engine.
//!
//! All data-path I/O goes through `read_fd`/`write_fd` so the engines
//! and the generator agree on how a short transfer is reported.

use fdmon_core::error::{FdmonError, Result};

use std::io;
use std::os::unix::io::RawFd;

/// `read(2)` into `buf`. `Ok(n)` may be short.
#[inline]
pub fn read_fd(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    let ret = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret as usize)
    }
}

/// `write(2)` from `buf`. `Ok(n)` may be short.
#[inline]
pub fn write_fd(fd: RawFd, buf: &[u8]) -> io::Result<usize> {
    let ret = unsafe { libc::write(fd, buf.as_ptr() as *const libc::c_void, buf.len()) };
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret as usize)
    }
}

/// Switch `O_NONBLOCK` on or off, keeping the other status flags.
pub fn set_nonblocking(fd: RawFd, nonblocking: bool) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL, 0) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    let flags = if nonblocking {
        flags | libc::O_NONBLOCK
    } else {
        flags & !libc::O_NONBLOCK
    };
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Is `O_NONBLOCK` set on `fd`?
pub fn is_nonblocking(fd: RawFd) -> io::Result<bool> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL, 0) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(flags & libc::O_NONBLOCK != 0)
}

/// Allocate a zeroed message buffer, reporting allocation failure
/// instead of aborting.
pub fn message_buffer(len: usize) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len)
        .map_err(|_| FdmonError::OutOfMemory)?;
    buf.resize(len, 0);
    Ok(buf)
}

/// Result of servicing one ready data descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Echo {
    /// A full message was read and written back.
    Done,
    /// Nothing (or only part of a message) was there; another engine
    /// instance probably got to it first.
    Spurious,
}

/// Read exactly one message from `fd` and write it back.
///
/// Short or failed transfers are not errors: with several engine
/// instances watching the same descriptor, all but one of them lose the
/// race for each message.
#[inline]
pub fn echo(fd: RawFd, buf: &mut [u8]) -> Echo {
    match read_fd(fd, buf) {
        Ok(n) if n == buf.len() => {}
        _ => return Echo::Spurious,
    }
    match write_fd(fd, buf) {
        Ok(n) if n == buf.len() => Echo::Done,
        _ => Echo::Spurious,
    }
}

/// Kernel thread id of the caller.
pub fn gettid() -> u64 {
    unsafe { libc::gettid() as u64 }
}

/// User + system CPU time consumed by the whole process so far.
pub fn process_cpu_time() -> io::Result<std::time::Duration> {
    let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
    if unsafe { libc::getrusage(libc::RUSAGE_SELF, &mut usage) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(timeval_to_duration(usage.ru_utime) + timeval_to_duration(usage.ru_stime))
}

fn timeval_to_duration(tv: libc::timeval) -> std::time::Duration {
    std::time::Duration::from_secs(tv.tv_sec as u64)
        + std::time::Duration::from_micros(tv.tv_usec as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::os::unix::io::AsRawFd;
    use std::os::unix::net::UnixStream;

    #[test]
    #[serial]
    fn test_echo_full_message() {
        let (engine, client) = UnixStream::pair().unwrap();
        set_nonblocking(engine.as_raw_fd(), true).unwrap();

        assert_eq!(write_fd(client.as_raw_fd(), b"ping").unwrap(), 4);

        let mut buf = [0u8; 4];
        assert_eq!(echo(engine.as_raw_fd(), &mut buf), Echo::Done);

        let mut back = [0u8; 4];
        assert_eq!(read_fd(client.as_raw_fd(), &mut back).unwrap(), 4);
        assert_eq!(&back, b"ping");
    }

    #[test]
    #[serial]
    fn test_echo_nothing_ready_is_spurious() {
        let (engine, _client) = UnixStream::pair().unwrap();
        set_nonblocking(engine.as_raw_fd(), true).unwrap();

        let mut buf = [0u8; 8];
        assert_eq!(echo(engine.as_raw_fd(), &mut buf), Echo::Spurious);
    }

    #[test]
    #[serial]
    fn test_echo_short_read_is_spurious() {
        let (engine, client) = UnixStream::pair().unwrap();
        set_nonblocking(engine.as_raw_fd(), true).unwrap();
        write_fd(client.as_raw_fd(), b"ab").unwrap();

        let mut buf = [0u8; 4];
        assert_eq!(echo(engine.as_raw_fd(), &mut buf), Echo::Spurious);

        // Nothing was written back.
        set_nonblocking(client.as_raw_fd(), true).unwrap();
        let err = read_fd(client.as_raw_fd(), &mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }

    #[test]
    #[serial]
    fn test_set_nonblocking_toggles() {
        let (a, _b) = UnixStream::pair().unwrap();
        let fd = a.as_raw_fd();
        assert!(!is_nonblocking(fd).unwrap());

        set_nonblocking(fd, true).unwrap();
        assert!(is_nonblocking(fd).unwrap());

        set_nonblocking(fd, false).unwrap();
        assert!(!is_nonblocking(fd).unwrap());
    }

    #[test]
    #[serial]
    fn test_message_buffer_zeroed() {
        let buf = message_buffer(4096).unwrap();
        assert_eq!(buf.len(), 4096);
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    #[serial]
    fn test_cpu_time_monotonic() {
        let before = process_cpu_time().unwrap();
        let mut x = 0u64;
        for i in 0..1_000_000u64 {
            x = x.wrapping_add(i.wrapping_mul(i));
        }
        std::hint::black_box(x);
        assert!(process_cpu_time().unwrap() >= before);
    }
}
