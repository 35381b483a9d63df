//! Read-only sequential decoder for the on-disk snapshot image.
//!
//! Serves `GET`/`KEYS *` misses against the in-memory keyspace by streaming
//! through `<dir>/<filename>` each call. There is no retained index — a
//! failure to open the file is not propagated as an error, it is simply
//! treated as "no snapshot" (§4.D).

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, LittleEndian, ReadBytesExt};

use crate::store::now_ms;

const MAGIC: &[u8; 5] = b"REDIS";

const OP_AUX: u8 = 0xFA;
const OP_SELECTDB: u8 = 0xFE;
const OP_RESIZEDB: u8 = 0xFB;
const OP_EXPIRE_SECONDS: u8 = 0xFD;
const OP_EXPIRE_MS: u8 = 0xFC;
const OP_EOF: u8 = 0xFF;
const VALUE_TYPE_STRING: u8 = 0x00;

/// A decoded length, or a specially-encoded integer masquerading as a
/// string (RDB's `0xC0`/`0xC1`/`0xC2` forms).
enum Length {
    Len(usize),
    Int(i64),
}

fn read_length(r: &mut impl Read) -> io::Result<Length> {
    let first = r.read_u8()?;
    match first >> 6 {
        0b00 => Ok(Length::Len((first & 0x3F) as usize)),
        0b01 => {
            let second = r.read_u8()?;
            Ok(Length::Len((((first & 0x3F) as usize) << 8) | second as usize))
        }
        0b10 => {
            let n = r.read_u32::<BigEndian>()?;
            Ok(Length::Len(n as usize))
        }
        0b11 => match first & 0x3F {
            0 => Ok(Length::Int(r.read_i8()? as i64)),
            1 => Ok(Length::Int(r.read_i16::<BigEndian>()? as i64)),
            2 => Ok(Length::Int(r.read_i32::<BigEndian>()? as i64)),
            _ => Err(io::Error::new(io::ErrorKind::InvalidData, "unsupported RDB special encoding (LZF)")),
        },
        _ => unreachable!(),
    }
}

fn read_string(r: &mut impl Read) -> io::Result<Vec<u8>> {
    match read_length(r)? {
        Length::Len(n) => {
            let mut buf = vec![0u8; n];
            r.read_exact(&mut buf)?;
            Ok(buf)
        }
        Length::Int(v) => Ok(v.to_string().into_bytes()),
    }
}

/// One decoded record: its key, string value, and optional absolute expiry.
struct Record {
    key: Vec<u8>,
    value: Vec<u8>,
    expiry_ms: Option<u64>,
}

fn validate_header(r: &mut impl Read) -> io::Result<()> {
    let mut magic = [0u8; 5];
    r.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "bad snapshot magic"));
    }
    let mut version = [0u8; 4];
    r.read_exact(&mut version)?;
    if !version.iter().all(u8::is_ascii_digit) {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "bad snapshot version"));
    }
    Ok(())
}

/// Streams every string-valued record in the file, invoking `visit` for
/// each. Stops at the `0xFF` terminator or the first I/O error — a
/// truncated or malformed file is simply treated as "nothing more here"
/// rather than propagated to the client.
fn scan_records(r: &mut impl Read, mut visit: impl FnMut(Record) -> bool) -> io::Result<()> {
    validate_header(r)?;
    let mut pending_expiry: Option<u64> = None;
    loop {
        let opcode = match r.read_u8() {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(e),
        };
        match opcode {
            OP_EOF => return Ok(()),
            OP_AUX => {
                read_string(r)?;
                read_string(r)?;
            }
            OP_SELECTDB => {
                read_length(r)?;
            }
            OP_RESIZEDB => {
                read_length(r)?;
                read_length(r)?;
            }
            OP_EXPIRE_SECONDS => {
                let secs = r.read_u32::<LittleEndian>()?;
                pending_expiry = Some(secs as u64 * 1000);
            }
            OP_EXPIRE_MS => {
                let ms = r.read_u64::<LittleEndian>()?;
                pending_expiry = Some(ms);
            }
            VALUE_TYPE_STRING => {
                let key = read_string(r)?;
                let value = read_string(r)?;
                let expiry_ms = pending_expiry.take();
                if !visit(Record { key, value, expiry_ms }) {
                    return Ok(());
                }
            }
            other => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("unsupported RDB value type {other:#04x}"),
                ));
            }
        }
    }
}

/// A read-only cursor over `<dir>/<filename>`, reopened on every call.
pub struct SnapshotReader {
    dir: PathBuf,
    filename: String,
}

impl SnapshotReader {
    pub fn new(dir: impl Into<PathBuf>, filename: impl Into<String>) -> Self {
        Self { dir: dir.into(), filename: filename.into() }
    }

    fn path(&self) -> PathBuf {
        Path::new(&self.dir).join(&self.filename)
    }

    /// The string value for `target_key`, or `None` if absent, expired, or
    /// the snapshot cannot be read at all.
    pub fn get_value(&self, target_key: &[u8]) -> Option<Vec<u8>> {
        let mut file = match File::open(self.path()) {
            Ok(file) => file,
            Err(e) => {
                tracing::warn!(path = %self.path().display(), error = %e, "snapshot open failed");
                return None;
            }
        };
        let now = now_ms();
        let mut found = None;
        let _ = scan_records(&mut file, |record| {
            if record.key == target_key {
                let expired = matches!(record.expiry_ms, Some(exp) if exp <= now);
                found = if expired { None } else { Some(record.value) };
                return false;
            }
            true
        });
        found
    }

    /// Every non-expired key in the snapshot, or an empty list if it cannot
    /// be read.
    pub fn get_keys(&self) -> Vec<Vec<u8>> {
        let mut file = match File::open(self.path()) {
            Ok(file) => file,
            Err(e) => {
                tracing::warn!(path = %self.path().display(), error = %e, "snapshot open failed");
                return Vec::new();
            }
        };
        let now = now_ms();
        let mut keys = Vec::new();
        let _ = scan_records(&mut file, |record| {
            let expired = matches!(record.expiry_ms, Some(exp) if exp <= now);
            if !expired {
                keys.push(record.key);
            }
            true
        });
        keys
    }
}
