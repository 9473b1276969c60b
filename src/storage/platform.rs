//! Platform-specific file and process helpers
//!
//! Positional reads (so concurrent readers never share a file cursor),
//! directory fsync, out-of-space detection and process liveness probing.

use std::fs::File;
use std::io;
use std::path::Path;

/// Read into `buf` starting at `pos` until `buf` is full or EOF is hit.
///
/// Returns the number of bytes read; a value below `buf.len()` means the
/// file ended early. Does not move any shared cursor on unix.
pub fn read_at_most(file: &File, buf: &mut [u8], pos: u64) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match read_at(file, &mut buf[filled..], pos + filled as u64) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(unix)]
fn read_at(file: &File, buf: &mut [u8], pos: u64) -> io::Result<usize> {
    use std::os::unix::fs::FileExt;
    file.read_at(buf, pos)
}

#[cfg(windows)]
fn read_at(file: &File, buf: &mut [u8], pos: u64) -> io::Result<usize> {
    use std::os::windows::fs::FileExt;
    file.seek_read(buf, pos)
}

/// fsync a directory so that renames and unlinks inside it are durable.
///
/// A no-op where directories cannot be opened as files (Windows).
pub fn sync_dir(dir: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        File::open(dir)?.sync_all()
    }

    #[cfg(not(unix))]
    {
        let _ = dir;
        Ok(())
    }
}

/// Whether a write error means the device ran out of space
pub fn is_disk_full(err: &io::Error) -> bool {
    #[cfg(unix)]
    {
        err.raw_os_error() == Some(libc::ENOSPC)
    }

    #[cfg(not(unix))]
    {
        // ERROR_DISK_FULL (112) / ERROR_HANDLE_DISK_FULL (39)
        matches!(err.raw_os_error(), Some(112) | Some(39))
    }
}

/// Whether a process with this id is currently running.
///
/// On unix this is `kill(pid, 0)`: success or `EPERM` both mean the process
/// exists. Elsewhere every recorded owner is assumed alive.
pub fn process_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        if pid == 0 || pid > i32::MAX as u32 {
            return false;
        }
        // SAFETY: signal 0 performs only the existence and permission check,
        // nothing is delivered to the target process.
        let rc = unsafe { libc::kill(pid as libc::pid_t, 0) };
        rc == 0 || io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
    }

    #[cfg(not(unix))]
    {
        let _ = pid;
        true
    }
}
