//! Segment tail inspection.

use std::io::{Seek, SeekFrom};
use std::path::PathBuf;

use anyhow::{Context, Result};
use strata_io::{FileName, OpenFlags, StorageDir, is_at_eof, is_filled_with_trailing_zeros};

/// Report size and tail state of `file` in `dir`, treating `offset` as the
/// end of real data.
pub fn run(dir: PathBuf, file: &str, offset: u64) -> Result<()> {
    let dir = StorageDir::new(dir)?;
    let name = FileName::new(file)?;

    let size = dir.stat_file(&name)?.len();
    let empty = dir.is_empty_file(&name)?;

    let mut handle = dir.open_file(&name, OpenFlags::read_only())?;
    handle
        .seek(SeekFrom::Start(offset))
        .with_context(|| format!("Failed to seek to {offset}"))?;
    let at_eof = is_at_eof(&mut handle);
    let zero_tail = is_filled_with_trailing_zeros(&mut handle)?;

    tracing::debug!(file, size, offset, zero_tail, "inspected file");

    println!("File:        {}", dir.join(&name).display());
    println!("Size:        {size} bytes");
    println!("Empty:       {}", if empty { "yes" } else { "no" });
    println!("At EOF:      {}", if at_eof { "yes" } else { "no" });
    println!(
        "Zero tail:   {} (from offset {offset})",
        if zero_tail { "yes" } else { "no" }
    );
    Ok(())
}
