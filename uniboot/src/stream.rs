/*
 * SPDX-FileCopyrightText: 2026 Andrew Gunnerson
 * SPDX-License-Identifier: GPL-3.0-only
 */

use std::{
    io::{self, Read, Write},
    sync::atomic::{AtomicBool, Ordering},
};

/// Returns an I/O error with the [`io::ErrorKind::Interrupted`] type if
/// `cancel_signal` is true. This should be called frequently in I/O loops for
/// cancellation to be responsive.
#[inline]
pub fn check_cancel(cancel_signal: &AtomicBool) -> io::Result<()> {
    if cancel_signal.load(Ordering::SeqCst) {
        return Err(io::Error::new(
            io::ErrorKind::Interrupted,
            "Received cancel signal",
        ));
    }

    Ok(())
}

/// Copy data from `reader` to `writer` until `reader` reaches EOF. If `writer`
/// reaches EOF before `reader` does, an error is returned. The operation is
/// cancelled on the next loop iteration if `cancel_signal` is set to `true`.
pub fn copy(
    mut reader: impl Read,
    mut writer: impl Write,
    cancel_signal: &AtomicBool,
) -> io::Result<u64> {
    let mut buf = [0u8; 16384];
    let mut copied = 0;

    loop {
        check_cancel(cancel_signal)?;

        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            // A pipe read can be interrupted by a signal handler.
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };

        writer.write_all(&buf[..n])?;

        copied += n as u64;
    }

    Ok(copied)
}

/// Read all of `reader` into memory, failing with
/// [`io::ErrorKind::FileTooLarge`] if there is more than `limit` bytes.
pub fn read_limited(
    reader: impl Read,
    limit: u64,
    cancel_signal: &AtomicBool,
) -> io::Result<Vec<u8>> {
    let mut data = vec![];
    copy(reader.take(limit.saturating_add(1)), &mut data, cancel_signal)?;

    if data.len() as u64 > limit {
        return Err(io::Error::new(
            io::ErrorKind::FileTooLarge,
            format!("Data exceeds {limit} byte limit"),
        ));
    }

    Ok(data)
}

#[cfg(test)]
mod tests {
    use std::{
        io::{self, Cursor, Seek, SeekFrom},
        sync::atomic::{AtomicBool, Ordering},
    };

    use super::*;

    #[test]
    fn copy_function() {
        let cancel_signal = AtomicBool::new(false);
        let mut reader = Cursor::new(b"foobar");
        let mut writer = Cursor::new([0u8; 6]);

        let n = copy(&mut reader, &mut writer, &cancel_signal).unwrap();
        assert_eq!(n, 6);
        assert_eq!(writer.get_ref(), b"foobar");

        // Writer early EOF.
        reader.rewind().unwrap();
        writer.seek(SeekFrom::Start(3)).unwrap();
        let err = copy(&mut reader, &mut writer, &cancel_signal).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WriteZero);

        reader.rewind().unwrap();
        writer.rewind().unwrap();
        cancel_signal.store(true, Ordering::SeqCst);
        let err = copy(&mut reader, &mut writer, &cancel_signal).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Interrupted);
    }

    #[test]
    fn read_limited_bounds() {
        let cancel_signal = AtomicBool::new(false);

        let data = read_limited(Cursor::new(b"foobar"), 6, &cancel_signal).unwrap();
        assert_eq!(data, b"foobar");

        let err = read_limited(Cursor::new(b"foobar"), 5, &cancel_signal).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::FileTooLarge);
    }
}
