// Copyright 2017, 2018 Pit Kleyersburg <pitkley@googlemail.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified or distributed
// except according to those terms.

//! Transactional file writer: atomically replace a file using a temp file
//! in the same directory followed by rename (spec section 4.6). On
//! dry-run, writes go to a discard sink instead.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::errors::Result;

/// A handle returned by [`open_for_write`](fn.open_for_write.html).
pub enum WriteTransaction {
    /// Writes go to a real temp file; `commit` renames it over `target`.
    Real { target: PathBuf, tmp_path: PathBuf, file: File },
    /// Writes are discarded; used on dry-run (spec section 4.2, 4.6).
    DryRun { target: PathBuf },
}

impl WriteTransaction {
    pub fn target(&self) -> &Path {
        match *self {
            WriteTransaction::Real { ref target, .. } => target,
            WriteTransaction::DryRun { ref target } => target,
        }
    }
}

impl Write for WriteTransaction {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match *self {
            WriteTransaction::Real { ref mut file, .. } => file.write(buf),
            WriteTransaction::DryRun { .. } => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match *self {
            WriteTransaction::Real { ref mut file, .. } => file.flush(),
            WriteTransaction::DryRun { .. } => Ok(()),
        }
    }
}

/// Open a temp file in the same directory as `path` for writing. In
/// dry-run mode no file is created; writes are silently discarded.
pub fn open_for_write<P: AsRef<Path>>(path: P, dry_run: bool) -> Result<WriteTransaction> {
    let target = path.as_ref().to_path_buf();

    if dry_run {
        return Ok(WriteTransaction::DryRun { target });
    }

    let dir = target.parent().unwrap_or_else(|| Path::new("."));
    let file_name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "rules".to_owned());

    // Timestamp suffix avoids collisions across repeated runs without a
    // pidfile (see SPEC_FULL.md section J).
    let ts = time::get_time().sec;
    let tmp_path = dir.join(format!("{}.{}.tmp", file_name, ts));

    let file = File::create(&tmp_path)?;

    Ok(WriteTransaction::Real {
        target,
        tmp_path,
        file,
    })
}

/// Atomically rename the temp file over the target. No-op on dry-run.
pub fn commit(txn: WriteTransaction) -> Result<()> {
    match txn {
        WriteTransaction::Real {
            target, tmp_path, ..
        } => {
            fs::rename(&tmp_path, &target)?;
            Ok(())
        }
        WriteTransaction::DryRun { .. } => Ok(()),
    }
}

/// Delete the temp file without committing it. No-op on dry-run.
pub fn abort(txn: WriteTransaction) -> Result<()> {
    match txn {
        WriteTransaction::Real { tmp_path, .. } => {
            if tmp_path.exists() {
                fs::remove_file(&tmp_path)?;
            }
            Ok(())
        }
        WriteTransaction::DryRun { .. } => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn write_then_commit_replaces_target() {
        let dir = std::env::temp_dir().join(format!("ufwrs-fs-test-{}", time::get_time().nsec));
        fs::create_dir_all(&dir).unwrap();
        let target = dir.join("user.rules");
        fs::write(&target, "old\n").unwrap();

        let mut txn = open_for_write(&target, false).unwrap();
        txn.write_all(b"new\n").unwrap();
        commit(txn).unwrap();

        let mut contents = String::new();
        File::open(&target).unwrap().read_to_string(&mut contents).unwrap();
        assert_eq!(contents, "new\n");

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn dry_run_does_not_touch_target() {
        let dir = std::env::temp_dir().join(format!("ufwrs-fs-test-dry-{}", time::get_time().nsec));
        fs::create_dir_all(&dir).unwrap();
        let target = dir.join("user.rules");
        fs::write(&target, "old\n").unwrap();

        let mut txn = open_for_write(&target, true).unwrap();
        txn.write_all(b"new\n").unwrap();
        commit(txn).unwrap();

        let mut contents = String::new();
        File::open(&target).unwrap().read_to_string(&mut contents).unwrap();
        assert_eq!(contents, "old\n");

        fs::remove_dir_all(&dir).unwrap();
    }
}
