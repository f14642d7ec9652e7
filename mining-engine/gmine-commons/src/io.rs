// Copyright 2022 The Gmine Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Positional reads and appending writes over raw file handles. All
//! transfers are byte-granular; alignment is the caller's business.

use std::fs::File;
use std::io::Write;
use std::os::unix::fs::FileExt;

use crate::error::Result;

pub fn file_size(file: &File) -> Result<u64> {
    Ok(file.metadata()?.len())
}

/// Read up to `buf.len()` bytes starting at `offset`, paging through preads
/// of at most `io_size` bytes. Returns the number of bytes actually read;
/// the result is short only when end-of-file is reached.
pub fn read_at(file: &File, buf: &mut [u8], offset: u64, io_size: usize) -> Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        let end = (total + io_size).min(buf.len());
        let n = file.read_at(&mut buf[total..end], offset + total as u64)?;
        if n == 0 {
            break;
        }
        total += n;
    }
    Ok(total)
}

/// Append the whole slice to a file opened in append mode.
pub fn append(mut file: &File, bytes: &[u8]) -> Result<()> {
    file.write_all(bytes)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;

    #[test]
    fn read_at_pages_through_small_windows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data");
        let payload: Vec<u8> = (0..=255).collect();
        std::fs::write(&path, &payload).unwrap();

        let file = File::open(&path).unwrap();
        let mut buf = vec![0u8; 200];
        let n = read_at(&file, &mut buf, 16, 7).unwrap();
        assert_eq!(n, 200);
        assert_eq!(&buf[..], &payload[16..216]);
    }

    #[test]
    fn read_at_is_short_at_end_of_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data");
        std::fs::write(&path, [1u8; 10]).unwrap();

        let file = File::open(&path).unwrap();
        let mut buf = vec![0u8; 64];
        let n = read_at(&file, &mut buf, 4, 64).unwrap();
        assert_eq!(n, 6);
    }

    #[test]
    fn append_accumulates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out");
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .unwrap();
        append(&file, b"abc").unwrap();
        append(&file, b"def").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"abcdef");
    }
}
