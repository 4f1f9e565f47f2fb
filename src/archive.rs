//! Archives and input streams
//!
//! ## File formats
//! Every file this crate writes is a strict, versioned archive: an 8-byte
//! magic, a big-endian `u16` format version, then a bincode payload.
//!
//! - Secret key:  `b"HEDFAsk\0"` + [`SecretKey`]
//! - Boot key:    `b"HEDFAbk\0"` + [`BootKey`] (gate + LUT material)
//! - Ciphertext blob: `b"HEDFAct\0"` + the parameter record + `u64` record
//!   count + records, each a `u64` byte length followed by one bincode
//!   FFT-domain TRGSW.
//!
//! The per-byte extraction convention is contractual: each plaintext byte
//! yields 8 AP-bits, least-significant bit first, and a `k`-proposition
//! symbol occupies `k` consecutive bits.
//!
//! ## Streams
//! [`ForwardStream`] and [`ReversedStream`] wrap the same blob with the same
//! single-pass contract: `size()` is the number of AP-bits not yet yielded,
//! `next()` yields one and decrements it. Neither is restartable or thread
//! safe; an evaluator owns its stream while evaluating. The reversed adapter
//! pre-scans record offsets and seeks from the end — it never buffers the
//! blob.
#![forbid(unsafe_code)]

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::fhe::{ApBit, BootKey, Client, SecretKey};
use crate::Error;

const SECRET_KEY_MAGIC: &[u8; 8] = b"HEDFAsk\0";
const BOOT_KEY_MAGIC: &[u8; 8] = b"HEDFAbk\0";
const BLOB_MAGIC: &[u8; 8] = b"HEDFAct\0";
const ACCEPTANCE_MAGIC: &[u8; 8] = b"HEDFAab\0";
const FORMAT_VERSION: u16 = 1;

/// Cap on a single serialized record, to fail fast on corrupt length fields.
const MAX_RECORD_BYTES: u64 = 1 << 31;

// ============================================================================
// Generic magic + version + bincode archives
// ============================================================================

fn write_archive<T: Serialize>(path: &Path, magic: &[u8; 8], value: &T) -> Result<(), Error> {
    let file = File::create(path)
        .map_err(|e| Error::BadInput(format!("create {}: {e}", path.display())))?;
    let mut out = BufWriter::new(file);
    out.write_all(magic)
        .and_then(|_| out.write_all(&FORMAT_VERSION.to_be_bytes()))
        .map_err(|e| Error::BadInput(format!("write {}: {e}", path.display())))?;
    bincode::serialize_into(&mut out, value)
        .map_err(|e| Error::BadInput(format!("serialize {}: {e}", path.display())))?;
    out.flush()
        .map_err(|e| Error::BadInput(format!("flush {}: {e}", path.display())))
}

fn open_archive(path: &Path, magic: &[u8; 8]) -> Result<BufReader<File>, Error> {
    let file =
        File::open(path).map_err(|e| Error::BadInput(format!("open {}: {e}", path.display())))?;
    let mut reader = BufReader::new(file);
    let mut header = [0u8; 10];
    reader
        .read_exact(&mut header)
        .map_err(|e| Error::BadInput(format!("read header of {}: {e}", path.display())))?;
    if &header[..8] != magic {
        return Err(Error::BadInput(format!(
            "{} is not a {} archive",
            path.display(),
            String::from_utf8_lossy(&magic[..7])
        )));
    }
    let version = u16::from_be_bytes([header[8], header[9]]);
    if version != FORMAT_VERSION {
        return Err(Error::BadInput(format!(
            "{}: unsupported format version {version} (expected {FORMAT_VERSION})",
            path.display()
        )));
    }
    Ok(reader)
}

fn read_archive<T: DeserializeOwned>(path: &Path, magic: &[u8; 8]) -> Result<T, Error> {
    let mut reader = open_archive(path, magic)?;
    bincode::deserialize_from(&mut reader)
        .map_err(|e| Error::BadInput(format!("deserialize {}: {e}", path.display())))
}

/// Blake3 digest of a file, surfaced in diagnostics so operators can verify
/// that the encryptor and evaluator share key material.
pub fn file_digest(path: &Path) -> Result<[u8; 32], Error> {
    let mut file =
        File::open(path).map_err(|e| Error::BadInput(format!("open {}: {e}", path.display())))?;
    let mut hasher = blake3::Hasher::new();
    std::io::copy(&mut file, &mut hasher)
        .map_err(|e| Error::BadInput(format!("read {}: {e}", path.display())))?;
    Ok(*hasher.finalize().as_bytes())
}

// ============================================================================
// Key archives
// ============================================================================

/// Write a secret key archive.
pub fn write_secret_key(path: &Path, key: &SecretKey) -> Result<(), Error> {
    write_archive(path, SECRET_KEY_MAGIC, key)
}

/// Read a secret key archive.
pub fn read_secret_key(path: &Path) -> Result<SecretKey, Error> {
    read_archive(path, SECRET_KEY_MAGIC).map_err(|e| Error::BadKey(e.to_string()))
}

/// Write the composite bootstrapping-key archive.
pub fn write_boot_key(path: &Path, key: &BootKey) -> Result<(), Error> {
    write_archive(path, BOOT_KEY_MAGIC, key)
}

/// Read the composite bootstrapping-key archive.
pub fn read_boot_key(path: &Path) -> Result<BootKey, Error> {
    read_archive(path, BOOT_KEY_MAGIC).map_err(|e| Error::BadKey(e.to_string()))
}

/// Write an acceptance ciphertext archive.
pub fn write_acceptance(path: &Path, bit: &crate::fhe::Tlwe) -> Result<(), Error> {
    write_archive(path, ACCEPTANCE_MAGIC, bit)
}

/// Read an acceptance ciphertext archive.
pub fn read_acceptance(path: &Path) -> Result<crate::fhe::Tlwe, Error> {
    read_archive(path, ACCEPTANCE_MAGIC)
}

// ============================================================================
// Ciphertext blob
// ============================================================================

/// Expand bytes into the contractual bit order: LSB first, 8 bits per byte.
pub fn bits_from_bytes(bytes: &[u8]) -> Vec<bool> {
    bytes
        .iter()
        .flat_map(|&byte| (0..8).map(move |i| (byte >> i) & 1 == 1))
        .collect()
}

/// Write a ciphertext blob from AP-bits in stream order. The parameter set
/// is embedded so evaluators can size their weights and detect mismatched
/// key material.
pub fn write_blob(path: &Path, params: &crate::fhe::Params, bits: &[ApBit]) -> Result<(), Error> {
    let file = File::create(path)
        .map_err(|e| Error::BadInput(format!("create {}: {e}", path.display())))?;
    let mut out = BufWriter::new(file);
    out.write_all(BLOB_MAGIC)
        .and_then(|_| out.write_all(&FORMAT_VERSION.to_be_bytes()))
        .map_err(|e| Error::BadInput(format!("write {}: {e}", path.display())))?;
    bincode::serialize_into(&mut out, params)
        .map_err(|e| Error::BadInput(format!("serialize {}: {e}", path.display())))?;
    out.write_all(&(bits.len() as u64).to_be_bytes())
        .map_err(|e| Error::BadInput(format!("write {}: {e}", path.display())))?;
    for bit in bits {
        let payload = bincode::serialize(bit)
            .map_err(|e| Error::BadInput(format!("serialize record: {e}")))?;
        out.write_all(&(payload.len() as u64).to_be_bytes())
            .and_then(|_| out.write_all(&payload))
            .map_err(|e| Error::BadInput(format!("write {}: {e}", path.display())))?;
    }
    out.flush()
        .map_err(|e| Error::BadInput(format!("flush {}: {e}", path.display())))
}

/// Encrypt a plaintext file into a ciphertext blob: every byte becomes eight
/// TRGSW records, LSB first.
pub fn encrypt_file(
    client: &mut Client,
    key: &SecretKey,
    input: &Path,
    output: &Path,
) -> Result<usize, Error> {
    let bytes = std::fs::read(input)
        .map_err(|e| Error::BadInput(format!("read {}: {e}", input.display())))?;
    let bits = bits_from_bytes(&bytes);
    let encrypted: Vec<ApBit> = bits.iter().map(|&b| client.encrypt_ap_bit(key, b)).collect();
    write_blob(output, key.params(), &encrypted)?;
    Ok(encrypted.len())
}

fn read_record(reader: &mut BufReader<File>, path: &Path) -> Result<ApBit, Error> {
    let mut len = [0u8; 8];
    reader
        .read_exact(&mut len)
        .map_err(|e| Error::BadInput(format!("truncated blob {}: {e}", path.display())))?;
    let len = u64::from_be_bytes(len);
    if len == 0 || len > MAX_RECORD_BYTES {
        return Err(Error::BadInput(format!(
            "corrupt record length {len} in {}",
            path.display()
        )));
    }
    let mut payload = vec![0u8; len as usize];
    reader
        .read_exact(&mut payload)
        .map_err(|e| Error::BadInput(format!("truncated blob {}: {e}", path.display())))?;
    bincode::deserialize(&payload)
        .map_err(|e| Error::BadInput(format!("corrupt record in {}: {e}", path.display())))
}

fn read_blob_header(path: &Path) -> Result<(BufReader<File>, crate::fhe::Params, u64), Error> {
    let mut reader = open_archive(path, BLOB_MAGIC)?;
    let params: crate::fhe::Params = bincode::deserialize_from(&mut reader)
        .map_err(|e| Error::BadInput(format!("truncated blob {}: {e}", path.display())))?;
    let mut count = [0u8; 8];
    reader
        .read_exact(&mut count)
        .map_err(|e| Error::BadInput(format!("truncated blob {}: {e}", path.display())))?;
    Ok((reader, params, u64::from_be_bytes(count)))
}

/// Forward (first-to-last) view over a ciphertext blob.
pub struct ForwardStream {
    reader: BufReader<File>,
    path: std::path::PathBuf,
    params: crate::fhe::Params,
    remaining: usize,
}

impl ForwardStream {
    /// Open a blob for forward streaming.
    pub fn open(path: &Path) -> Result<Self, Error> {
        let (reader, params, count) = read_blob_header(path)?;
        Ok(Self {
            reader,
            path: path.to_path_buf(),
            params,
            remaining: count as usize,
        })
    }

    /// The parameter set the blob was encrypted under.
    pub fn params(&self) -> &crate::fhe::Params {
        &self.params
    }

    /// AP-bits not yet yielded.
    pub fn size(&self) -> usize {
        self.remaining
    }

    /// Yield the next AP-bit, or `None` at end of stream.
    pub fn next(&mut self) -> Result<Option<ApBit>, Error> {
        if self.remaining == 0 {
            return Ok(None);
        }
        let bit = read_record(&mut self.reader, &self.path)?;
        self.remaining -= 1;
        Ok(Some(bit))
    }
}

/// Reversed (last-to-first) view over a ciphertext blob. Record offsets are
/// scanned once at open; records are then read back-to-front with seeks.
pub struct ReversedStream {
    reader: BufReader<File>,
    path: std::path::PathBuf,
    params: crate::fhe::Params,
    offsets: Vec<u64>,
}

impl ReversedStream {
    /// Open a blob for reversed streaming.
    pub fn open(path: &Path) -> Result<Self, Error> {
        let (mut reader, params, count) = read_blob_header(path)?;
        let mut offsets = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let at = reader
                .stream_position()
                .map_err(|e| Error::BadInput(format!("seek {}: {e}", path.display())))?;
            let mut len = [0u8; 8];
            reader
                .read_exact(&mut len)
                .map_err(|e| Error::BadInput(format!("truncated blob {}: {e}", path.display())))?;
            let len = u64::from_be_bytes(len);
            if len == 0 || len > MAX_RECORD_BYTES {
                return Err(Error::BadInput(format!(
                    "corrupt record length {len} in {}",
                    path.display()
                )));
            }
            offsets.push(at);
            reader
                .seek(SeekFrom::Current(len as i64))
                .map_err(|e| Error::BadInput(format!("truncated blob {}: {e}", path.display())))?;
        }
        Ok(Self {
            reader,
            path: path.to_path_buf(),
            params,
            offsets,
        })
    }

    /// The parameter set the blob was encrypted under.
    pub fn params(&self) -> &crate::fhe::Params {
        &self.params
    }

    /// AP-bits not yet yielded.
    pub fn size(&self) -> usize {
        self.offsets.len()
    }

    /// Yield the next AP-bit counting from the blob's end, or `None` once the
    /// front is reached.
    pub fn next(&mut self) -> Result<Option<ApBit>, Error> {
        let Some(at) = self.offsets.pop() else {
            return Ok(None);
        };
        self.reader
            .seek(SeekFrom::Start(at))
            .map_err(|e| Error::BadInput(format!("seek {}: {e}", self.path.display())))?;
        read_record(&mut self.reader, &self.path).map(Some)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fhe::{trivial_ap_bit, Params};

    fn tmp(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("hedfa-{}-{name}", std::process::id()))
    }

    fn selector_bit(bit: &ApBit) -> bool {
        // Trivial selectors are distinguishable by their serialized form.
        bincode::serialize(bit).unwrap() != bincode::serialize(&trivial_ap_bit(&Params::unit_test(), false)).unwrap()
    }

    #[test]
    fn byte_extraction_is_lsb_first() {
        assert_eq!(
            bits_from_bytes(&[0b0000_1011]),
            vec![true, true, false, true, false, false, false, false]
        );
        assert_eq!(bits_from_bytes(&[]), Vec::<bool>::new());
        assert_eq!(bits_from_bytes(&[0xff]).len(), 8);
    }

    #[test]
    fn blob_roundtrips_in_both_directions() {
        let p = Params::unit_test();
        let pattern = [true, false, false, true, true];
        let bits: Vec<ApBit> = pattern.iter().map(|&b| trivial_ap_bit(&p, b)).collect();
        let path = tmp("blob-roundtrip");
        write_blob(&path, &p, &bits).unwrap();

        let mut fwd = ForwardStream::open(&path).unwrap();
        assert_eq!(fwd.size(), 5);
        let mut got = Vec::new();
        while let Some(bit) = fwd.next().unwrap() {
            got.push(selector_bit(&bit));
        }
        assert_eq!(got, pattern);
        assert_eq!(fwd.size(), 0);

        let mut rev = ReversedStream::open(&path).unwrap();
        assert_eq!(rev.size(), 5);
        let mut got = Vec::new();
        while let Some(bit) = rev.next().unwrap() {
            got.push(selector_bit(&bit));
        }
        let mirrored: Vec<bool> = pattern.iter().rev().copied().collect();
        assert_eq!(got, mirrored);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn truncated_blob_is_bad_input() {
        let p = Params::unit_test();
        let bits = vec![trivial_ap_bit(&p, true); 3];
        let path = tmp("blob-truncated");
        write_blob(&path, &p, &bits).unwrap();
        let full = std::fs::read(&path).unwrap();
        std::fs::write(&path, &full[..full.len() / 2]).unwrap();

        let mut fwd = ForwardStream::open(&path).unwrap();
        let mut result = Ok(());
        while result.is_ok() {
            match fwd.next() {
                Ok(Some(_)) => {}
                Ok(None) => break,
                Err(e) => result = Err(e),
            }
        }
        assert!(matches!(result, Err(Error::BadInput(_))));
        assert!(matches!(
            ReversedStream::open(&path),
            Err(Error::BadInput(_))
        ));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn wrong_magic_is_rejected() {
        let path = tmp("blob-magic");
        std::fs::write(&path, b"NOTHEDFA\x00\x01rest").unwrap();
        assert!(matches!(ForwardStream::open(&path), Err(Error::BadInput(_))));
        assert!(matches!(read_secret_key(&path), Err(Error::BadKey(_))));
        std::fs::remove_file(&path).ok();
    }
}
