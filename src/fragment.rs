use crate::error::{ComposeError, ComposeResult, lopdf_err};
use crate::font::{EmbeddedFont, FontProgram, FontProgramKind, ResolvedFont, sanitize_font_name};
use crate::session::{page_box, resolved_page_attribute};
use crate::types::fmt;
use lopdf::{Document as LoDocument, Object as LoObject, Stream as LoStream, dictionary};
use std::collections::BTreeMap;

/// Everything needed to lay a text block out as a standalone page.
#[derive(Debug, Clone, Copy)]
pub struct FragmentRequest<'a> {
    pub lines: &'a [String],
    pub font_size: f32,
    pub line_height: f32,
    pub width: f32,
    pub height: f32,
    pub font: &'a ResolvedFont,
    /// Baseline rise above the bottom of each line box.
    pub dy: f32,
}

/// Builds the standalone page a text object is drawn from.
pub trait TextFragmentBuilder: Send + Sync {
    fn build(&self, request: &FragmentRequest<'_>) -> ComposeResult<TextFragment>;
}

/// The first page of a standalone document, reshaped into a Form XObject.
///
/// The fragment owns its objects until it is imported into a session; the
/// trailer's `/Root` points at the form.
#[derive(Debug)]
pub struct TextFragment {
    pub(crate) doc: LoDocument,
    pub width: f32,
    pub height: f32,
}

impl TextFragment {
    pub fn from_pdf_bytes(bytes: &[u8]) -> ComposeResult<Self> {
        let doc = LoDocument::load_mem(bytes).map_err(lopdf_err)?;
        Self::from_document(doc)
    }

    pub fn from_document(mut doc: LoDocument) -> ComposeResult<Self> {
        if doc.is_encrypted() {
            return Err(ComposeError::Pdf("fragment pdf is encrypted".to_string()));
        }
        let Some(page_id) = doc.get_pages().values().next().copied() else {
            return Err(ComposeError::Pdf("fragment pdf has no pages".to_string()));
        };
        let bbox = page_box(&doc, page_id);
        let content = doc.get_page_content(page_id).map_err(lopdf_err)?;
        let resources = resolved_page_attribute(&doc, page_id, b"Resources")
            .unwrap_or_else(|| LoObject::Dictionary(lopdf::Dictionary::new()));

        let form_id = doc.add_object(LoStream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Form",
                "FormType" => 1,
                "BBox" => bbox.to_vec().into_iter().map(LoObject::Real).collect::<Vec<_>>(),
                "Resources" => resources,
            },
            content,
        ));
        doc.trailer = lopdf::Dictionary::new();
        doc.trailer.set("Root", LoObject::Reference(form_id));
        // Drops the catalog, page tree and original content streams.
        doc.prune_objects();

        Ok(Self {
            doc,
            width: bbox[2] - bbox[0],
            height: bbox[3] - bbox[1],
        })
    }

    pub fn object_count(&self) -> usize {
        self.doc.objects.len()
    }
}

/// Lays lines out top to bottom with a builtin or embedded font.
#[derive(Debug, Clone, Copy, Default)]
pub struct PdfFragmentBuilder;

impl TextFragmentBuilder for PdfFragmentBuilder {
    fn build(&self, request: &FragmentRequest<'_>) -> ComposeResult<TextFragment> {
        if !(request.width.is_finite() && request.height.is_finite()) {
            return Err(ComposeError::InvalidConfiguration(
                "text block dimensions must be finite".to_string(),
            ));
        }
        let mut doc = LoDocument::with_version("1.7");
        let pages_id = doc.new_object_id();

        let (font_id, encoder) = match &request.font.program {
            FontProgram::Builtin(font) => {
                let id = doc.add_object(dictionary! {
                    "Type" => "Font",
                    "Subtype" => "Type1",
                    "BaseFont" => font.base_font(),
                    "Encoding" => "WinAnsiEncoding",
                });
                (id, TextEncoder::WinAnsi)
            }
            FontProgram::Embedded(font) => {
                let glyphs = collect_glyphs(font, request.lines);
                let id = add_cid_font(&mut doc, font, &glyphs);
                (id, TextEncoder::Identity(glyphs))
            }
        };

        let content = text_content(request, &encoder);
        let content_id = doc.add_object(LoStream::new(dictionary! {}, content));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![
                0.into(),
                0.into(),
                LoObject::Real(request.width),
                LoObject::Real(request.height),
            ],
            "Contents" => content_id,
            "Resources" => dictionary! {
                "Font" => dictionary! { "F1" => font_id },
            },
        });
        doc.objects.insert(
            pages_id,
            LoObject::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        TextFragment::from_document(doc)
    }
}

enum TextEncoder {
    WinAnsi,
    /// Glyph id and width (1000-unit space) per char.
    Identity(BTreeMap<char, (u16, u16)>),
}

impl TextEncoder {
    fn encode(&self, text: &str) -> Vec<u8> {
        match self {
            TextEncoder::WinAnsi => {
                let mut out = vec![b'('];
                for ch in text.chars() {
                    let byte = winansi_byte(ch).unwrap_or(b'?');
                    if matches!(byte, b'(' | b')' | b'\\') {
                        out.push(b'\\');
                    }
                    out.push(byte);
                }
                out.push(b')');
                out
            }
            TextEncoder::Identity(glyphs) => {
                let mut out = String::from("<");
                for ch in text.chars() {
                    let gid = glyphs.get(&ch).map(|(gid, _)| *gid).unwrap_or(0);
                    out.push_str(&format!("{:04X}", gid));
                }
                out.push('>');
                out.into_bytes()
            }
        }
    }
}

fn text_content(request: &FragmentRequest<'_>, encoder: &TextEncoder) -> Vec<u8> {
    let line_box = request.font_size * request.line_height;
    let mut out = Vec::new();
    out.extend_from_slice(b"BT\n");
    out.extend_from_slice(format!("/F1 {} Tf\n", fmt(request.font_size)).as_bytes());
    for (idx, line) in request.lines.iter().enumerate() {
        let baseline = request.height - (idx as f32 + 1.0) * line_box + request.dy;
        out.extend_from_slice(format!("1 0 0 1 0 {} Tm\n", fmt(baseline)).as_bytes());
        out.extend_from_slice(&encoder.encode(line));
        out.extend_from_slice(b" Tj\n");
    }
    out.extend_from_slice(b"ET\n");
    out
}

fn collect_glyphs(font: &EmbeddedFont, lines: &[String]) -> BTreeMap<char, (u16, u16)> {
    let mut glyphs = BTreeMap::new();
    for line in lines {
        for (ch, gid, advance) in font.glyphs_for(line) {
            glyphs.entry(ch).or_insert((gid, advance));
        }
    }
    glyphs
}

fn add_cid_font(
    doc: &mut LoDocument,
    font: &EmbeddedFont,
    glyphs: &BTreeMap<char, (u16, u16)>,
) -> lopdf::ObjectId {
    let base = sanitize_font_name(&font.name);
    let metrics = &font.metrics;

    let (file_key, cid_subtype) = match font.program_kind {
        FontProgramKind::TrueType => ("FontFile2", "CIDFontType2"),
        FontProgramKind::OpenTypeCff => ("FontFile3", "CIDFontType0"),
    };
    let mut file_dict = dictionary! { "Length1" => font.data.len() as i64 };
    if font.program_kind == FontProgramKind::OpenTypeCff {
        file_dict.set("Subtype", "OpenType");
    }
    let file_id = doc.add_object(LoStream::new(file_dict, font.data.clone()));

    let mut flags = 32;
    if metrics.is_fixed_pitch {
        flags |= 1;
    }
    let descriptor_id = doc.add_object(dictionary! {
        "Type" => "FontDescriptor",
        "FontName" => base.as_str(),
        "Flags" => flags,
        "FontBBox" => vec![
            (metrics.bbox.0 as i64).into(),
            (metrics.bbox.1 as i64).into(),
            (metrics.bbox.2 as i64).into(),
            (metrics.bbox.3 as i64).into(),
        ],
        "ItalicAngle" => metrics.italic_angle as i64,
        "Ascent" => metrics.ascent as i64,
        "Descent" => metrics.descent as i64,
        "CapHeight" => metrics.cap_height as i64,
        "StemV" => metrics.stem_v as i64,
        "MissingWidth" => metrics.missing_width as i64,
        file_key => file_id,
    });

    let mut by_gid: BTreeMap<u16, (char, u16)> = BTreeMap::new();
    for (ch, (gid, advance)) in glyphs {
        if *gid != 0 {
            by_gid.entry(*gid).or_insert((*ch, *advance));
        }
    }
    let mut widths: Vec<LoObject> = Vec::with_capacity(by_gid.len() * 2);
    for (gid, (_, advance)) in &by_gid {
        widths.push((*gid as i64).into());
        widths.push(LoObject::Array(vec![(*advance as i64).into()]));
    }

    let mut cid_font = dictionary! {
        "Type" => "Font",
        "Subtype" => cid_subtype,
        "BaseFont" => base.as_str(),
        "CIDSystemInfo" => dictionary! {
            "Registry" => LoObject::string_literal("Adobe"),
            "Ordering" => LoObject::string_literal("Identity"),
            "Supplement" => 0,
        },
        "FontDescriptor" => descriptor_id,
        "W" => widths,
    };
    if font.program_kind == FontProgramKind::TrueType {
        cid_font.set("CIDToGIDMap", "Identity");
    }
    let cid_font_id = doc.add_object(cid_font);

    let cmap = to_unicode_cmap(&by_gid);
    let to_unicode_id = doc.add_object(LoStream::new(dictionary! {}, cmap.into_bytes()));

    doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type0",
        "BaseFont" => base.as_str(),
        "Encoding" => "Identity-H",
        "DescendantFonts" => vec![cid_font_id.into()],
        "ToUnicode" => to_unicode_id,
    })
}

fn to_unicode_cmap(by_gid: &BTreeMap<u16, (char, u16)>) -> String {
    let entries: Vec<(u16, char)> = by_gid.iter().map(|(g, (ch, _))| (*g, *ch)).collect();

    let mut out = String::new();
    out.push_str("/CIDInit /ProcSet findresource begin\n");
    out.push_str("12 dict begin\n");
    out.push_str("begincmap\n");
    out.push_str("/CIDSystemInfo << /Registry (Adobe) /Ordering (UCS) /Supplement 0 >> def\n");
    out.push_str("/CMapName /Adobe-Identity-UCS def\n");
    out.push_str("/CMapType 2 def\n");
    out.push_str("1 begincodespacerange\n<0000> <FFFF>\nendcodespacerange\n");

    for chunk in entries.chunks(100) {
        out.push_str(&format!("{} beginbfchar\n", chunk.len()));
        for (gid, ch) in chunk {
            let mut units = [0u16; 2];
            let uni: String = ch
                .encode_utf16(&mut units)
                .iter()
                .map(|unit| format!("{:04X}", unit))
                .collect();
            out.push_str(&format!("<{:04X}> <{}>\n", gid, uni));
        }
        out.push_str("endbfchar\n");
    }

    out.push_str("endcmap\n");
    out.push_str("CMapName currentdict /CMap defineresource pop\n");
    out.push_str("end\nend\n");
    out
}

fn winansi_byte(ch: char) -> Option<u8> {
    let code = ch as u32;
    match code {
        0x20..=0x7E => Some(code as u8),
        0xA0..=0xFF => Some(code as u8),
        _ => match ch {
            '\u{20AC}' => Some(0x80),
            '\u{201A}' => Some(0x82),
            '\u{0192}' => Some(0x83),
            '\u{201E}' => Some(0x84),
            '\u{2026}' => Some(0x85),
            '\u{2020}' => Some(0x86),
            '\u{2021}' => Some(0x87),
            '\u{02C6}' => Some(0x88),
            '\u{2030}' => Some(0x89),
            '\u{0160}' => Some(0x8A),
            '\u{2039}' => Some(0x8B),
            '\u{0152}' => Some(0x8C),
            '\u{017D}' => Some(0x8E),
            '\u{2018}' => Some(0x91),
            '\u{2019}' => Some(0x92),
            '\u{201C}' => Some(0x93),
            '\u{201D}' => Some(0x94),
            '\u{2022}' => Some(0x95),
            '\u{2013}' => Some(0x96),
            '\u{2014}' => Some(0x97),
            '\u{02DC}' => Some(0x98),
            '\u{2122}' => Some(0x99),
            '\u{0161}' => Some(0x9A),
            '\u{203A}' => Some(0x9B),
            '\u{0153}' => Some(0x9C),
            '\u{017E}' => Some(0x9E),
            '\u{0178}' => Some(0x9F),
            '\t' => Some(b' '),
            _ => None,
        },
    }
}
