//! Checksum verification for downloaded files.

use sha2::{Digest, Sha512};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};

use crate::{AssetError, Result};

/// Stream a reader through SHA-512 and return the lowercase hex digest.
pub fn compute_sha512<R: Read>(reader: &mut R) -> io::Result<String> {
    let mut hasher = Sha512::new();
    io::copy(reader, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

/// Verify that `file` hashes to `expected`.
///
/// The file is rewound before and after hashing, so on success the next
/// stage reads it from offset 0.
pub fn verify_checksum(file: &mut File, expected: &str) -> Result<()> {
    file.seek(SeekFrom::Start(0))?;
    let actual = compute_sha512(file)?;
    file.seek(SeekFrom::Start(0))?;

    let expected = expected.to_ascii_lowercase();
    if actual != expected {
        return Err(AssetError::Verify { expected, actual });
    }

    log::trace!("Checksum verified: {}", actual);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempfile;

    // SHA-512 of "hello world"
    const HELLO_SHA512: &str = "309ecc489c12d6eb4cc40f50c902f2b4d0ed77ee511a7c7a9bcd3ca86d4cd86f989dd35bc5ff499670da34255b45b0cfd830e81f605dcf7dc5542e93ae9cd76f";

    fn file_with(content: &[u8]) -> File {
        let mut file = tempfile().unwrap();
        file.write_all(content).unwrap();
        file
    }

    #[test]
    fn test_compute_sha512() {
        let mut reader: &[u8] = b"hello world";
        assert_eq!(compute_sha512(&mut reader).unwrap(), HELLO_SHA512);
    }

    #[test]
    fn test_verify_leaves_file_rewound() {
        let mut file = file_with(b"hello world");
        verify_checksum(&mut file, HELLO_SHA512).unwrap();

        let mut content = String::new();
        file.read_to_string(&mut content).unwrap();
        assert_eq!(content, "hello world");
    }

    #[test]
    fn test_verify_accepts_uppercase_expected() {
        let mut file = file_with(b"hello world");
        assert!(verify_checksum(&mut file, &HELLO_SHA512.to_uppercase()).is_ok());
    }

    #[test]
    fn test_verify_mismatch() {
        let mut file = file_with(b"hello world");
        let wrong = "0".repeat(128);

        match verify_checksum(&mut file, &wrong) {
            Err(AssetError::Verify { expected, actual }) => {
                assert_eq!(expected, wrong);
                assert_eq!(actual, HELLO_SHA512);
            }
            other => panic!("expected checksum mismatch, got {:?}", other),
        }
    }
}
