//! Gzip codec for dump files. The work runs on the blocking pool so large
//! dumps never stall the runtime.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

/// Gzip `src` into `dst`, then delete `src`.
///
/// `src` is left in place if anything fails.
pub async fn compress(src: &Path, dst: &Path) -> io::Result<()> {
    let (src, dst) = (src.to_path_buf(), dst.to_path_buf());
    tokio::task::spawn_blocking(move || compress_blocking(&src, &dst))
        .await
        .map_err(io::Error::other)?
}

/// Gunzip `gz` next to itself (trailing `.gz` stripped) and return that path.
pub async fn decompress(gz: &Path) -> io::Result<PathBuf> {
    let dst = strip_gz(gz).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} has no .gz extension", gz.display()),
        )
    })?;
    decompress_to(gz, &dst).await?;
    Ok(dst)
}

/// Gunzip `gz` into `dst`, overwriting it.
pub async fn decompress_to(gz: &Path, dst: &Path) -> io::Result<()> {
    let (gz, dst) = (gz.to_path_buf(), dst.to_path_buf());
    tokio::task::spawn_blocking(move || decompress_blocking(&gz, &dst))
        .await
        .map_err(io::Error::other)?
}

fn compress_blocking(src: &Path, dst: &Path) -> io::Result<()> {
    let mut input = BufReader::new(File::open(src)?);
    let output = BufWriter::new(File::create(dst)?);
    let mut encoder = GzEncoder::new(output, Compression::default());
    io::copy(&mut input, &mut encoder)?;
    encoder.finish()?.flush()?;
    drop(input);
    fs::remove_file(src)
}

fn decompress_blocking(gz: &Path, dst: &Path) -> io::Result<()> {
    let mut decoder = GzDecoder::new(BufReader::new(File::open(gz)?));
    let mut output = BufWriter::new(File::create(dst)?);
    io::copy(&mut decoder, &mut output)?;
    output.flush()
}

fn strip_gz(path: &Path) -> Option<PathBuf> {
    let name = path.file_name()?.to_str()?;
    let stem = name.strip_suffix(".gz").filter(|s| !s.is_empty())?;
    Some(path.with_file_name(stem))
}
