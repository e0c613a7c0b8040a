//! Reads the entry list of a layer tarball (plain or gzipped).

use flate2::read::GzDecoder;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Component, Path, PathBuf};
use tar_rs as tar;

use crate::context::Context;
use crate::error::ComparisonError;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xb5, 0x2f, 0xfd];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TarFormat {
    V7,
    Ustar,
    Gnu,
    Pax,
}

impl TarFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            TarFormat::V7 => "v7",
            TarFormat::Ustar => "ustar",
            TarFormat::Gnu => "gnu",
            TarFormat::Pax => "pax",
        }
    }
}

/// Header fields and content digest of one tar entry.
#[derive(Debug, Clone, PartialEq)]
pub struct TarEntry {
    pub path: String,
    /// Tar type flag; the old-style regular file flag `\0` is stored as `0`.
    pub kind: char,
    pub link: Option<String>,
    pub uid: u64,
    pub gid: u64,
    pub mode: u32,
    pub size: u64,
    pub mtime: String,
    pub atime: Option<String>,
    pub ctime: Option<String>,
    /// `sha256:<hex>` of the content, regular files only.
    pub digest: Option<String>,
    pub format: TarFormat,
}

/// Strips the leading `./` and `/` and the trailing `/` so `./etc/`, `/etc`
/// and `etc` compare equal.
pub fn canonical_path(path: &str) -> String {
    let mut p = path;
    loop {
        if let Some(rest) = p.strip_prefix("./") {
            p = rest;
        } else if let Some(rest) = p.strip_prefix('/') {
            p = rest;
        } else {
            break;
        }
    }
    if p == "." {
        return String::new();
    }
    p.trim_end_matches('/').to_string()
}

/// Reads every entry of a layer. Cancellation is checked between entries.
pub fn read_layer<'a, R: Read + 'a>(
    ctx: &Context,
    reader: R,
    digest: &str,
) -> Result<Vec<TarEntry>, ComparisonError> {
    read_entries(ctx, reader).map_err(|source| layer_error(ctx, digest, source))
}

/// Writes the regular files of a layer whose path is in `wanted` below
/// `dest`, keeping their layer paths. Returns the number of files written.
///
/// Paths are matched in canonical form when `canonical` is set. Entries
/// whose path would leave `dest` are skipped.
pub fn extract_files<'a, R: Read + 'a>(
    ctx: &Context,
    reader: R,
    digest: &str,
    dest: &Path,
    wanted: &BTreeSet<String>,
    canonical: bool,
) -> Result<usize, ComparisonError> {
    extract_matching(ctx, reader, dest, wanted, canonical)
        .map_err(|source| layer_error(ctx, digest, source))
}

fn extract_matching<'a, R: Read + 'a>(
    ctx: &Context,
    reader: R,
    dest: &Path,
    wanted: &BTreeSet<String>,
    canonical: bool,
) -> io::Result<usize> {
    let mut archive = tar::Archive::new(decompress(reader)?);
    let mut written = 0;

    for entry_result in archive.entries()? {
        if ctx.is_cancelled() {
            return Err(io::Error::new(io::ErrorKind::Interrupted, "cancelled"));
        }
        let mut entry = entry_result?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let path = entry.path()?.to_string_lossy().into_owned();
        let key = if canonical { canonical_path(&path) } else { path };
        if !wanted.contains(&key) {
            continue;
        }
        let Some(relative) = contained_path(&key) else {
            continue;
        };

        let target = dest.join(relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = File::create(&target)?;
        io::copy(&mut entry, &mut file)?;
        written += 1;
    }

    Ok(written)
}

/// The layer path as a relative path made of plain components only.
fn contained_path(path: &str) -> Option<PathBuf> {
    let relative = PathBuf::from(canonical_path(path));
    let plain = relative
        .components()
        .all(|c| matches!(c, Component::Normal(_)));
    (plain && relative.components().next().is_some()).then_some(relative)
}

fn layer_error(ctx: &Context, digest: &str, source: io::Error) -> ComparisonError {
    if ctx.is_cancelled() {
        ComparisonError::Cancelled
    } else if source.kind() == io::ErrorKind::Unsupported {
        ComparisonError::UnsupportedMediaType(format!("zstd-compressed layer {}", digest))
    } else {
        ComparisonError::Layer {
            digest: digest.to_string(),
            source,
        }
    }
}

/// Wraps `reader` in a gzip decoder when the stream starts with the gzip
/// magic. Zstd streams are refused.
fn decompress<'a, R: Read + 'a>(reader: R) -> io::Result<Box<dyn Read + 'a>> {
    let mut buf_reader = BufReader::new(reader);
    let magic = buf_reader.fill_buf()?;
    let is_gzip = magic.starts_with(&GZIP_MAGIC);
    let is_zstd = magic.starts_with(&ZSTD_MAGIC);

    if is_gzip {
        Ok(Box::new(GzDecoder::new(buf_reader)))
    } else if is_zstd {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "zstd compression is not supported",
        ))
    } else {
        Ok(Box::new(buf_reader))
    }
}

fn read_entries<'a, R: Read + 'a>(ctx: &Context, reader: R) -> io::Result<Vec<TarEntry>> {
    let mut archive = tar::Archive::new(decompress(reader)?);
    let mut entries = Vec::new();

    for entry_result in archive.entries()? {
        if ctx.is_cancelled() {
            return Err(io::Error::new(io::ErrorKind::Interrupted, "cancelled"));
        }
        let mut entry = entry_result?;

        let mut pax_mtime = None;
        let mut pax_atime = None;
        let mut pax_ctime = None;
        let has_pax = match entry.pax_extensions()? {
            Some(extensions) => {
                for extension in extensions {
                    let extension = extension?;
                    let (Ok(key), Ok(value)) = (extension.key(), extension.value()) else {
                        continue;
                    };
                    match key {
                        "mtime" => pax_mtime = Some(value.to_string()),
                        "atime" => pax_atime = Some(value.to_string()),
                        "ctime" => pax_ctime = Some(value.to_string()),
                        _ => {}
                    }
                }
                true
            }
            None => false,
        };

        let header = entry.header();
        let format = if has_pax {
            TarFormat::Pax
        } else if header.as_gnu().is_some() {
            TarFormat::Gnu
        } else if header.as_ustar().is_some() {
            TarFormat::Ustar
        } else {
            TarFormat::V7
        };

        let gnu_time = |f: fn(&tar::GnuHeader) -> io::Result<u64>| {
            header
                .as_gnu()
                .and_then(|gnu| f(gnu).ok())
                .filter(|t| *t != 0)
                .map(|t| t.to_string())
        };
        let atime = pax_atime.or_else(|| gnu_time(tar::GnuHeader::atime));
        let ctime = pax_ctime.or_else(|| gnu_time(tar::GnuHeader::ctime));
        let mtime = match pax_mtime {
            Some(mtime) => mtime,
            None => header.mtime()?.to_string(),
        };

        let entry_type = header.entry_type();
        let kind = match entry_type.as_byte() {
            b'\0' => '0',
            byte => byte as char,
        };
        let uid = header.uid()?;
        let gid = header.gid()?;
        let mode = header.mode()?;

        let path = entry.path()?.to_string_lossy().into_owned();
        let link = entry
            .link_name()?
            .map(|target| target.to_string_lossy().into_owned());
        let size = entry.size();

        let digest = if entry_type.is_file() {
            let mut hasher = Sha256::new();
            io::copy(&mut entry, &mut hasher)?;
            Some(format!("sha256:{}", hex::encode(hasher.finalize())))
        } else {
            None
        };

        entries.push(TarEntry {
            path,
            kind,
            link,
            uid,
            gid,
            mode,
            size,
            mtime,
            atime,
            ctime,
            digest,
            format,
        });
    }

    Ok(entries)
}
