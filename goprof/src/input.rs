//! Loading profiles from disk.
//!
//! Compression is sniffed from magic bytes; the encoding comes from the file
//! extension unless the caller names one.

use crate::error::{AnalysisError, Result};
use goprof_parse::Profile;
use std::io::Read;
use std::path::Path;

/// Extension of the compact binary profile form.
pub const POSTCARD_EXTENSION: &str = "gpb";

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xb5, 0x2f, 0xfd];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// Newline-delimited JSON records.
    Ndjson,
    /// `postcard` serialization of [`Profile`].
    Postcard,
}

impl Encoding {
    /// `.gpb` (optionally followed by `.gz` or `.zst`) is postcard,
    /// anything else NDJSON.
    pub fn from_path(path: &Path) -> Self {
        let mut path = path.to_path_buf();
        if matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("gz" | "zst")
        ) {
            path.set_extension("");
        }
        match path.extension().and_then(|e| e.to_str()) {
            Some(POSTCARD_EXTENSION) => Encoding::Postcard,
            _ => Encoding::Ndjson,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip,
    Zstd,
}

pub fn detect_compression(bytes: &[u8]) -> Compression {
    if bytes.starts_with(&GZIP_MAGIC) {
        Compression::Gzip
    } else if bytes.starts_with(&ZSTD_MAGIC) {
        Compression::Zstd
    } else {
        Compression::None
    }
}

/// Undo whatever compression `bytes` carries.
pub fn decompress(bytes: Vec<u8>) -> Result<Vec<u8>> {
    match detect_compression(&bytes) {
        Compression::None => Ok(bytes),
        Compression::Gzip => {
            let mut out = Vec::new();
            flate2::read::GzDecoder::new(&bytes[..]).read_to_end(&mut out)?;
            Ok(out)
        }
        Compression::Zstd => Ok(zstd::decode_all(&bytes[..])?),
    }
}

/// Decode uncompressed bytes. Both encodings are checked for dangling
/// dictionary references.
pub fn decode(bytes: &[u8], encoding: Encoding) -> Result<Profile> {
    let profile = match encoding {
        Encoding::Ndjson => Profile::parse(bytes)?,
        Encoding::Postcard => {
            let profile: Profile = postcard::from_bytes(bytes)?;
            profile.validate()?;
            profile
        }
    };
    Ok(profile)
}

pub fn encode_postcard(profile: &Profile) -> Result<Vec<u8>> {
    Ok(postcard::to_allocvec(profile)?)
}

/// Load a profile, choosing the encoding from the file name.
pub fn load_profile(path: &Path) -> Result<Profile> {
    load_profile_as(path, Encoding::from_path(path))
}

pub fn load_profile_as(path: &Path, encoding: Encoding) -> Result<Profile> {
    if path.as_os_str().is_empty() {
        return Err(AnalysisError::InvalidInput(
            "profile path is empty".to_string(),
        ));
    }
    let raw = std::fs::read(path)?;
    let compression = detect_compression(&raw);
    let bytes = decompress(raw)?;
    let profile = decode(&bytes, encoding)?;

    tracing::debug!(
        path = %path.display(),
        ?compression,
        ?encoding,
        samples = profile.samples.len(),
        functions = profile.functions.len(),
        "loaded profile"
    );
    Ok(profile)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression as GzLevel;
    use flate2::write::GzEncoder;
    use goprof_parse::ProfileBuilder;
    use std::io::Write;
    use std::path::PathBuf;

    fn profile() -> Profile {
        ProfileBuilder::new()
            .sample_types(&[("samples", "count"), ("cpu", "nanoseconds")])
            .comment("go1.22.1")
            .sample(&["main.work", "main.main"], &[3, 30_000_000])
            .build()
    }

    fn ndjson(profile: &Profile) -> Vec<u8> {
        let mut out = Vec::new();
        profile.write(&mut out).unwrap();
        out
    }

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("goprof-input-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir.join(name)
    }

    #[test]
    fn encoding_from_extension() {
        assert_eq!(Encoding::from_path(Path::new("cpu.gpb")), Encoding::Postcard);
        assert_eq!(Encoding::from_path(Path::new("cpu.gpb.zst")), Encoding::Postcard);
        assert_eq!(Encoding::from_path(Path::new("cpu.ndjson.gz")), Encoding::Ndjson);
        assert_eq!(Encoding::from_path(Path::new("cpu")), Encoding::Ndjson);
    }

    #[test]
    fn sniffs_compression() {
        assert_eq!(detect_compression(&[0x1f, 0x8b, 0x08]), Compression::Gzip);
        assert_eq!(detect_compression(&ZSTD_MAGIC), Compression::Zstd);
        assert_eq!(detect_compression(b"{\"type\""), Compression::None);
        assert_eq!(detect_compression(&[]), Compression::None);
    }

    #[test]
    fn loads_gzipped_ndjson() {
        let original = profile();
        let mut encoder = GzEncoder::new(Vec::new(), GzLevel::default());
        encoder.write_all(&ndjson(&original)).unwrap();
        let path = scratch("cpu.ndjson.gz");
        std::fs::write(&path, encoder.finish().unwrap()).unwrap();

        assert_eq!(load_profile(&path).unwrap(), original);
    }

    #[test]
    fn loads_zstd_postcard() {
        let original = profile();
        let packed = zstd::encode_all(&encode_postcard(&original).unwrap()[..], 0).unwrap();
        let path = scratch("cpu.gpb.zst");
        std::fs::write(&path, packed).unwrap();

        assert_eq!(load_profile(&path).unwrap(), original);
    }

    #[test]
    fn explicit_encoding_wins() {
        let original = profile();
        let path = scratch("cpu.bin");
        std::fs::write(&path, encode_postcard(&original).unwrap()).unwrap();

        assert!(load_profile(&path).is_err());
        assert_eq!(load_profile_as(&path, Encoding::Postcard).unwrap(), original);
    }

    #[test]
    fn empty_path_is_invalid_input() {
        assert!(matches!(
            load_profile(Path::new("")),
            Err(AnalysisError::InvalidInput(_))
        ));
    }

    #[test]
    fn missing_file_is_io_error() {
        assert!(matches!(
            load_profile(&scratch("does-not-exist.ndjson")),
            Err(AnalysisError::Io(_))
        ));
    }
}
