use crate::error::{ComposeError, ComposeResult};
use crate::font::{BuiltinFont, EmbeddedFont, ResolvedFont, normalize_name};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

#[derive(Debug, Clone)]
pub enum FontSource {
    Builtin(BuiltinFont),
    File(PathBuf),
    Bytes(Arc<[u8]>),
}

impl FontSource {
    fn describe(&self) -> String {
        match self {
            FontSource::Builtin(font) => font.base_font().to_string(),
            FontSource::File(path) => path.display().to_string(),
            FontSource::Bytes(_) => "in-memory font".to_string(),
        }
    }
}

#[derive(Debug)]
struct FontEntry {
    family: String,
    source: FontSource,
    cell: OnceLock<Result<Arc<ResolvedFont>, String>>,
}

/// Font families known to a composer. Each family is loaded on first use and
/// kept for the lifetime of the cache, so a failed load is not retried.
#[derive(Debug)]
pub struct AssetCache {
    fonts: HashMap<String, FontEntry>,
    loads: AtomicUsize,
}

impl Default for AssetCache {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl AssetCache {
    pub fn empty() -> Self {
        Self {
            fonts: HashMap::new(),
            loads: AtomicUsize::new(0),
        }
    }

    pub fn with_builtins() -> Self {
        let mut cache = Self::empty();
        for font in BuiltinFont::ALL {
            cache.register(font.base_font(), FontSource::Builtin(font));
        }
        cache
    }

    /// Registers (or replaces) a family.
    pub fn register(&mut self, family: impl Into<String>, source: FontSource) {
        let family = family.into();
        self.fonts.insert(
            normalize_name(&family),
            FontEntry {
                family,
                source,
                cell: OnceLock::new(),
            },
        );
    }

    pub fn register_font_file(&mut self, family: impl Into<String>, path: impl Into<PathBuf>) {
        self.register(family, FontSource::File(path.into()));
    }

    pub fn register_font_bytes(&mut self, family: impl Into<String>, data: impl Into<Arc<[u8]>>) {
        self.register(family, FontSource::Bytes(data.into()));
    }

    pub fn contains(&self, family: &str) -> bool {
        self.fonts.contains_key(&normalize_name(family))
    }

    pub fn families(&self) -> Vec<&str> {
        let mut out: Vec<&str> = self.fonts.values().map(|e| e.family.as_str()).collect();
        out.sort_unstable();
        out
    }

    /// Number of font loads performed so far.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::Relaxed)
    }

    pub fn resolve(&self, family: &str) -> ComposeResult<Arc<ResolvedFont>> {
        let Some(entry) = self.fonts.get(&normalize_name(family)) else {
            return Err(ComposeError::asset(format!("unknown font family: {family}")));
        };
        let resolved = entry.cell.get_or_init(|| {
            self.loads.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(family = %entry.family, source = %entry.source.describe(), "loading font");
            load_font(&entry.family, &entry.source)
                .map(Arc::new)
                .map_err(|err| match err {
                    ComposeError::Asset(message) => message,
                    other => other.to_string(),
                })
        });
        resolved.clone().map_err(ComposeError::Asset)
    }
}

fn load_font(family: &str, source: &FontSource) -> ComposeResult<ResolvedFont> {
    match source {
        FontSource::Builtin(font) => Ok(ResolvedFont::builtin(*font)),
        FontSource::File(path) => {
            let data = std::fs::read(path).map_err(|err| {
                ComposeError::asset(format!("failed to read font {}: {err}", path.display()))
            })?;
            let font = EmbeddedFont::parse(data, &path.to_string_lossy())?;
            Ok(ResolvedFont::embedded(family, font))
        }
        FontSource::Bytes(data) => {
            let font = EmbeddedFont::parse(data.to_vec(), family)?;
            Ok(ResolvedFont::embedded(family, font))
        }
    }
}
