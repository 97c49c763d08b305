use crate::error::{ComposeError, ComposeResult};
use base64::Engine;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;

/// Where the bytes of an image (or a source document) come from.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinarySource {
    Path(PathBuf),
    DataUri(String),
    #[serde(skip)]
    Bytes(Arc<[u8]>),
}

impl BinarySource {
    pub fn bytes(data: impl Into<Arc<[u8]>>) -> Self {
        BinarySource::Bytes(data.into())
    }

    /// MIME type carried by the source itself, if any.
    pub fn embedded_mime(&self) -> Option<String> {
        match self {
            BinarySource::DataUri(uri) => data_uri_mime(uri),
            BinarySource::Path(_) | BinarySource::Bytes(_) => None,
        }
    }
}

/// Turns a [`BinarySource`] into a byte buffer.
pub trait BinaryLoader: Send + Sync {
    fn load(&self, source: &BinarySource) -> ComposeResult<Vec<u8>>;
}

/// Reads paths from the local filesystem and decodes data URIs in memory.
#[derive(Debug, Clone, Default)]
pub struct FsLoader {
    root: Option<PathBuf>,
}

impl FsLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Relative paths are resolved against `root`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }
}

impl BinaryLoader for FsLoader {
    fn load(&self, source: &BinarySource) -> ComposeResult<Vec<u8>> {
        match source {
            BinarySource::Path(path) => {
                let resolved = match &self.root {
                    Some(root) if path.is_relative() => root.join(path),
                    _ => path.clone(),
                };
                Ok(std::fs::read(resolved)?)
            }
            BinarySource::DataUri(uri) => decode_data_uri(uri).map(|(_, data)| data),
            BinarySource::Bytes(data) => Ok(data.to_vec()),
        }
    }
}

pub const PDF_MIME: &str = "application/pdf";

pub fn encode_data_uri(mime: &str, data: &[u8]) -> String {
    let encoded = base64::engine::general_purpose::STANDARD.encode(data);
    format!("data:{mime};base64,{encoded}")
}

/// Splits a data URI into its MIME type and payload.
pub fn decode_data_uri(uri: &str) -> ComposeResult<(String, Vec<u8>)> {
    let Some(rest) = uri.strip_prefix("data:") else {
        return Err(ComposeError::asset("not a data uri"));
    };
    let Some((header, payload)) = rest.split_once(',') else {
        return Err(ComposeError::asset("data uri has no payload separator"));
    };
    let mime = header
        .split(';')
        .next()
        .filter(|m| !m.is_empty())
        .unwrap_or("application/octet-stream")
        .to_string();
    let data = if header.split(';').any(|part| part == "base64") {
        base64::engine::general_purpose::STANDARD
            .decode(payload.trim())
            .map_err(|err| ComposeError::asset(format!("invalid base64 payload: {err}")))?
    } else {
        payload.as_bytes().to_vec()
    };
    Ok((mime, data))
}

fn data_uri_mime(uri: &str) -> Option<String> {
    let header = uri.strip_prefix("data:")?.split_once(',')?.0;
    header
        .split(';')
        .next()
        .filter(|m| !m.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_uri_round_trip_reproduces_bytes() {
        let payload: Vec<u8> = (0u8..=255).collect();
        let uri = encode_data_uri(PDF_MIME, &payload);
        assert!(uri.starts_with("data:application/pdf;base64,"));
        let (mime, decoded) = decode_data_uri(&uri).expect("decode");
        assert_eq!(mime, PDF_MIME);
        assert_eq!(decoded, payload);
    }

    #[test]
    fn plain_data_uri_is_taken_verbatim() {
        let (mime, data) = decode_data_uri("data:text/plain,hello").expect("decode");
        assert_eq!(mime, "text/plain");
        assert_eq!(data, b"hello");
    }

    #[test]
    fn rejects_non_data_uri_and_bad_base64() {
        assert!(decode_data_uri("http://example.com/a.png").is_err());
        assert!(decode_data_uri("data:image/png;base64").is_err());
        assert!(decode_data_uri("data:image/png;base64,@@@").is_err());
    }

    #[test]
    fn embedded_mime_comes_from_data_uri_header() {
        let source = BinarySource::DataUri("data:image/jpeg;base64,AAAA".to_string());
        assert_eq!(source.embedded_mime().as_deref(), Some("image/jpeg"));
        assert_eq!(BinarySource::Path("a.png".into()).embedded_mime(), None);
    }

    #[test]
    fn fs_loader_reads_relative_paths_under_root() {
        let dir = std::env::temp_dir().join(format!("pagestamp_loader_{}", std::process::id()));
        std::fs::create_dir_all(&dir).expect("mkdir");
        std::fs::write(dir.join("blob.bin"), b"abc").expect("write");
        let loader = FsLoader::with_root(&dir);
        let data = loader
            .load(&BinarySource::Path("blob.bin".into()))
            .expect("load");
        assert_eq!(data, b"abc");
        assert!(loader.load(&BinarySource::Path("missing.bin".into())).is_err());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn inline_bytes_are_copied() {
        let loader = FsLoader::new();
        let data = loader
            .load(&BinarySource::bytes(vec![1u8, 2, 3]))
            .expect("load");
        assert_eq!(data, vec![1, 2, 3]);
    }
}
