use std::{
    fmt,
    fs::File,
    io::{self, Read},
    path::Path,
};

/// Number of leading bytes needed to tell the two RAR versions apart
pub const SIGNATURE_LEN: usize = 7;

/// "Rar!\x1a\x07" followed by a version byte
const RAR_PREFIX: [u8; 6] = [0x52, 0x61, 0x72, 0x21, 0x1A, 0x07];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveSignature {
    /// RAR 1.5 - 4.x
    Rar4,
    Rar5,
    Unknown,
}

impl fmt::Display for ArchiveSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArchiveSignature::Rar4 => write!(f, "RAR 4.x"),
            ArchiveSignature::Rar5 => write!(f, "RAR 5.x"),
            ArchiveSignature::Unknown => write!(f, "unknown"),
        }
    }
}

/// Classify the first bytes of a file. Anything shorter than [`SIGNATURE_LEN`] is `Unknown`.
pub fn classify(first_bytes: &[u8]) -> ArchiveSignature {
    if first_bytes.len() < SIGNATURE_LEN || first_bytes[..6] != RAR_PREFIX {
        return ArchiveSignature::Unknown;
    }

    match first_bytes[6] {
        0x00 => ArchiveSignature::Rar4,
        0x01 => ArchiveSignature::Rar5,
        _ => ArchiveSignature::Unknown,
    }
}

/// Read up to 8 leading bytes of a file
pub fn read_signature(path: impl AsRef<Path>) -> io::Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(8);
    File::open(path)?.take(8).read_to_end(&mut buf)?;
    Ok(buf)
}

/// Format bytes the way they show up in the status log, e.g. `0x52 0x61`
pub fn hex_dump(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("0x{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod test {
    use std::fs;

    use super::{classify, hex_dump, read_signature, ArchiveSignature};

    const RAR4: &[u8] = b"Rar!\x1a\x07\x00";
    const RAR5: &[u8] = b"Rar!\x1a\x07\x01\x00";

    #[test]
    fn short_input_is_unknown() {
        for len in 0..7 {
            assert_eq!(classify(&RAR5[..len]), ArchiveSignature::Unknown);
        }
    }

    #[test]
    fn known_signatures() {
        assert_eq!(classify(RAR4), ArchiveSignature::Rar4);
        assert_eq!(classify(RAR5), ArchiveSignature::Rar5);
        assert_eq!(classify(&RAR5[..7]), ArchiveSignature::Rar5);
    }

    #[test]
    fn other_prefixes_are_unknown() {
        assert_eq!(classify(b"Rar!\x1a\x07\x02"), ArchiveSignature::Unknown);
        assert_eq!(classify(b"PK\x03\x04\x14\x00\x00"), ArchiveSignature::Unknown);
        assert_eq!(classify(b"rar!\x1a\x07\x00"), ArchiveSignature::Unknown);
        assert_eq!(classify(b"<!DOCTYPE html>"), ArchiveSignature::Unknown);
    }

    #[test]
    fn reads_leading_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Modpack.rar");
        fs::write(&path, b"Rar!\x1a\x07\x01\x00 and the rest of the archive").unwrap();

        let sig = read_signature(&path).unwrap();
        assert_eq!(sig.len(), 8);
        assert_eq!(classify(&sig), ArchiveSignature::Rar5);

        fs::write(&path, b"Rar").unwrap();
        assert_eq!(read_signature(&path).unwrap(), b"Rar");
    }

    #[test]
    fn hex_format() {
        assert_eq!(hex_dump(&[0x52, 0x61, 0x1A]), "0x52 0x61 0x1A");
        assert_eq!(hex_dump(&[]), "");
    }
}
