use crate::error::{ComposeError, ComposeResult};
use std::path::Path;
use std::sync::Arc;

/// The standard PDF fonts a text fragment can reference without embedding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinFont {
    Helvetica,
    TimesRoman,
    Courier,
}

impl BuiltinFont {
    pub const ALL: [BuiltinFont; 3] = [
        BuiltinFont::Helvetica,
        BuiltinFont::TimesRoman,
        BuiltinFont::Courier,
    ];

    pub fn base_font(&self) -> &'static str {
        match self {
            BuiltinFont::Helvetica => "Helvetica",
            BuiltinFont::TimesRoman => "Times-Roman",
            BuiltinFont::Courier => "Courier",
        }
    }

    pub fn correction(&self) -> BaselineCorrection {
        match self {
            BuiltinFont::Helvetica => BaselineCorrection::HalfLeadingPlus(10.0),
            BuiltinFont::TimesRoman => BaselineCorrection::HalfLeadingPlus(7.0),
            BuiltinFont::Courier => BaselineCorrection::HalfLeadingPlus(6.0),
        }
    }
}

/// Rise of a line's baseline above the bottom of its line box.
///
/// Half of the leading (`size * line_height - size`) centers the em box in the
/// line box; the builtin faces add a per-face fraction of the size so their
/// descenders land inside it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BaselineCorrection {
    HalfLeading,
    /// Half leading plus `size / divisor`.
    HalfLeadingPlus(f32),
}

impl BaselineCorrection {
    pub fn offset(&self, size: f32, line_height: f32) -> f32 {
        let half_leading = (size * line_height - size) / 2.0;
        match self {
            BaselineCorrection::HalfLeading => half_leading,
            BaselineCorrection::HalfLeadingPlus(divisor) => half_leading + size / divisor,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FontProgramKind {
    TrueType,
    OpenTypeCff,
}

/// Descriptor metrics in 1000-unit glyph space.
#[derive(Debug, Clone)]
pub struct FontMetrics {
    pub units_per_em: u16,
    pub ascent: i16,
    pub descent: i16,
    pub cap_height: i16,
    pub italic_angle: i16,
    pub stem_v: i16,
    pub bbox: (i16, i16, i16, i16),
    pub missing_width: u16,
    pub is_fixed_pitch: bool,
}

/// A parsed font program ready to be embedded into a fragment.
#[derive(Debug)]
pub struct EmbeddedFont {
    pub name: String,
    pub data: Vec<u8>,
    pub metrics: FontMetrics,
    pub program_kind: FontProgramKind,
}

impl EmbeddedFont {
    pub fn parse(data: Vec<u8>, source_name: &str) -> ComposeResult<Self> {
        let face = ttf_parser::Face::parse(&data, 0)
            .map_err(|err| ComposeError::asset(format!("invalid font data for {source_name}: {err}")))?;
        let name = font_name(&face, Path::new(source_name));
        let (metrics, program_kind) = FontMetrics::from_face(&face);
        Ok(Self {
            name,
            data,
            metrics,
            program_kind,
        })
    }

    /// Maps every char of `text` to a glyph id plus its advance in 1000-unit
    /// space. Unmapped chars become glyph 0.
    pub fn glyphs_for(&self, text: &str) -> Vec<(char, u16, u16)> {
        let Ok(face) = ttf_parser::Face::parse(&self.data, 0) else {
            return Vec::new();
        };
        let scale = 1000.0 / face.units_per_em().max(1) as f32;
        text.chars()
            .map(|ch| {
                let gid = face.glyph_index(ch).map(|g| g.0).unwrap_or(0);
                let advance = face
                    .glyph_hor_advance(ttf_parser::GlyphId(gid))
                    .map(|adv| (adv as f32 * scale).round() as u16)
                    .unwrap_or(self.metrics.missing_width);
                (ch, gid, advance)
            })
            .collect()
    }
}

impl FontMetrics {
    fn from_face(face: &ttf_parser::Face<'_>) -> (Self, FontProgramKind) {
        let units_per_em = face.units_per_em().max(1);
        let scale = 1000.0 / units_per_em as f32;

        let ascent = scale_i16(face.ascender(), scale);
        let descent = scale_i16(face.descender(), scale);
        let cap_height = face
            .capital_height()
            .map(|value| scale_i16(value, scale))
            .unwrap_or(ascent);
        let bbox = face.global_bounding_box();
        let bbox = (
            scale_i16(bbox.x_min, scale),
            scale_i16(bbox.y_min, scale),
            scale_i16(bbox.x_max, scale),
            scale_i16(bbox.y_max, scale),
        );
        let italic_angle = face
            .italic_angle()
            .map(|value| value.round() as i16)
            .unwrap_or(0);
        let missing_width = face
            .glyph_index(' ')
            .and_then(|gid| face.glyph_hor_advance(gid))
            .map(|adv| (adv as f32 * scale).round() as u16)
            .unwrap_or(500);

        let program_kind = if face.tables().cff.is_some() {
            FontProgramKind::OpenTypeCff
        } else {
            FontProgramKind::TrueType
        };

        (
            Self {
                units_per_em,
                ascent,
                descent,
                cap_height,
                italic_angle,
                stem_v: 80,
                bbox,
                missing_width,
                is_fixed_pitch: face.is_monospaced(),
            },
            program_kind,
        )
    }
}

#[derive(Debug, Clone)]
pub enum FontProgram {
    Builtin(BuiltinFont),
    Embedded(Arc<EmbeddedFont>),
}

/// A font family resolved by the asset cache.
#[derive(Debug, Clone)]
pub struct ResolvedFont {
    pub family: String,
    pub program: FontProgram,
    pub correction: BaselineCorrection,
}

impl ResolvedFont {
    pub fn builtin(font: BuiltinFont) -> Self {
        Self {
            family: font.base_font().to_string(),
            program: FontProgram::Builtin(font),
            correction: font.correction(),
        }
    }

    pub fn embedded(family: impl Into<String>, font: EmbeddedFont) -> Self {
        Self {
            family: family.into(),
            program: FontProgram::Embedded(Arc::new(font)),
            correction: BaselineCorrection::HalfLeading,
        }
    }

    pub fn dy(&self, size: f32, line_height: f32) -> f32 {
        self.correction.offset(size, line_height)
    }
}

fn scale_i16(value: i16, scale: f32) -> i16 {
    let scaled = (value as f32 * scale).round() as i32;
    scaled.clamp(i16::MIN as i32, i16::MAX as i32) as i16
}

fn font_name(face: &ttf_parser::Face<'_>, path: &Path) -> String {
    use ttf_parser::name::name_id;

    let mut family = None;
    let mut post = None;
    for entry in face.names() {
        let Some(name) = entry.to_string() else {
            continue;
        };
        match entry.name_id {
            name_id::TYPOGRAPHIC_FAMILY | name_id::FAMILY => {
                if family.is_none() {
                    family = Some(name);
                }
            }
            name_id::POST_SCRIPT_NAME => {
                if post.is_none() {
                    post = Some(name);
                }
            }
            _ => {}
        }
    }

    let stem = path
        .file_stem()
        .and_then(|v| v.to_str())
        .map(|v| v.to_string());
    post.or(family)
        .or(stem)
        .unwrap_or_else(|| "EmbeddedFont".to_string())
}

pub(crate) fn normalize_name(name: &str) -> String {
    name.trim()
        .trim_matches('"')
        .trim_matches('\'')
        .to_ascii_lowercase()
}

/// PostScript names may not contain whitespace or delimiters.
pub(crate) fn sanitize_font_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|ch| ch.is_ascii_graphic() && !"()<>[]{}/%#".contains(*ch))
        .collect();
    if cleaned.is_empty() {
        "EmbeddedFont".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::path::PathBuf;

    /// A TrueType font from the host, when one is installed.
    pub(crate) fn system_font_path() -> Option<PathBuf> {
        [
            "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
            "/usr/share/fonts/TTF/DejaVuSans.ttf",
            "/usr/share/fonts/dejavu/DejaVuSans.ttf",
            "/Library/Fonts/Arial.ttf",
            "C:\\Windows\\Fonts\\arial.ttf",
        ]
        .iter()
        .map(PathBuf::from)
        .find(|path| path.is_file())
    }

    #[test]
    fn builtin_corrections_follow_face_fractions() {
        let helvetica = ResolvedFont::builtin(BuiltinFont::Helvetica);
        let times = ResolvedFont::builtin(BuiltinFont::TimesRoman);
        let courier = ResolvedFont::builtin(BuiltinFont::Courier);
        // half leading for size 10, line height 1.2 is 1.0
        assert!((helvetica.dy(10.0, 1.2) - 2.0).abs() < 1e-4);
        assert!((times.dy(14.0, 1.0) - 2.0).abs() < 1e-4);
        assert!((courier.dy(12.0, 1.0) - 2.0).abs() < 1e-4);
        assert_eq!(helvetica.family, "Helvetica");
        assert_eq!(times.family, "Times-Roman");
    }

    #[test]
    fn half_leading_has_no_face_term() {
        assert_eq!(BaselineCorrection::HalfLeading.offset(10.0, 2.0), 5.0);
        assert_eq!(BaselineCorrection::HalfLeading.offset(10.0, 1.0), 0.0);
    }

    #[test]
    fn invalid_font_bytes_are_an_asset_error() {
        let err = EmbeddedFont::parse(vec![0, 1, 2, 3], "broken.ttf").unwrap_err();
        assert!(matches!(err, ComposeError::Asset(_)));
        assert!(err.to_string().contains("broken.ttf"));
    }

    #[test]
    fn sanitize_font_name_strips_delimiters() {
        assert_eq!(sanitize_font_name("My Font (Bold)"), "MyFontBold");
        assert_eq!(sanitize_font_name("  "), "EmbeddedFont");
    }

    #[test]
    fn system_font_parses_and_maps_glyphs() {
        let Some(path) = system_font_path() else {
            return;
        };
        let data = std::fs::read(&path).expect("font bytes");
        let font = EmbeddedFont::parse(data, &path.to_string_lossy()).expect("parse");
        assert!(!font.name.is_empty());
        let glyphs = font.glyphs_for("Ab");
        assert_eq!(glyphs.len(), 2);
        assert!(glyphs.iter().all(|(_, gid, adv)| *gid != 0 && *adv > 0));
    }
}
