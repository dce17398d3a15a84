use std::fs::File;
use std::io::Read as _;
use std::path::Path;

use sha2::{Digest as _, Sha256};

use crate::manifest::HashAlgorithm;

/// Bytes read per chunk while streaming a file through a digest, so large
/// files never materialize in memory (spec §9, "Digest streaming").
const CHUNK_SIZE: usize = 1024 * 1024;

/// The outcome of attempting to digest a file on disk.
#[derive(Debug)]
pub enum DigestOutcome {
    Ok { digest_hex: String, size_bytes: u64 },
    Missing,
    Unreadable(std::io::Error),
}

/// Streams `path` through `algorithm` in 1 MiB chunks, classifying the
/// failure mode the way the verifier needs to (spec §4.9): a file that
/// doesn't exist is `Missing`, any other I/O failure is `Unreadable`.
pub fn digest_file(path: &Path, algorithm: HashAlgorithm) -> DigestOutcome {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return DigestOutcome::Missing,
        Err(err) => return DigestOutcome::Unreadable(err),
    };

    match algorithm {
        HashAlgorithm::Sha256 => {
            let mut hasher = Sha256::new();
            let mut buf = vec![0_u8; CHUNK_SIZE];
            let mut total: u64 = 0;
            loop {
                let n = match file.read(&mut buf) {
                    Ok(n) => n,
                    Err(err) => return DigestOutcome::Unreadable(err),
                };
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
                total = total.saturating_add(n as u64);
            }
            DigestOutcome::Ok {
                digest_hex: hex::encode(hasher.finalize()),
                size_bytes: total,
            }
        }
    }
}

/// Computes a SHA-256 digest over raw bytes already in memory, used to
/// fingerprint a source manifest for the restore plan audit trail (spec
/// §4.10).
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_file_reports_missing_for_absent_path() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = digest_file(&dir.path().join("absent.txt"), HashAlgorithm::Sha256);
        assert!(matches!(outcome, DigestOutcome::Missing));
    }

    #[test]
    fn digest_file_computes_sha256_and_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, b"alpha").unwrap();

        let outcome = digest_file(&path, HashAlgorithm::Sha256);
        match outcome {
            DigestOutcome::Ok { digest_hex, size_bytes } => {
                assert_eq!(size_bytes, 5);
                assert_eq!(digest_hex.len(), 64);
                assert_eq!(digest_hex, sha256_hex(b"alpha"));
            }
            other => panic!("expected Ok, got {other:?}"),
        }
    }

    #[test]
    fn sha256_hex_is_deterministic() {
        assert_eq!(sha256_hex(b"alpha"), sha256_hex(b"alpha"));
        assert_ne!(sha256_hex(b"alpha"), sha256_hex(b"bravo"));
    }
}
