use crate::loader::BinarySource;
use serde::Deserialize;
use std::fmt;

/// A user-placed object, positioned in top-left-origin page coordinates.
#[derive(Debug, Clone, Deserialize)]
pub struct AnnotationObject {
    pub page: usize,
    pub x: f32,
    pub y: f32,
    #[serde(flatten)]
    pub kind: ObjectKind,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ObjectKind {
    Image(ImageSpec),
    Text(TextSpec),
    Drawing(DrawingSpec),
    /// Any `type` tag this crate does not know how to paint.
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageSpec {
    pub source: BinarySource,
    #[serde(default)]
    pub mime_type: Option<String>,
    pub width: f32,
    pub height: f32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextSpec {
    pub lines: Vec<String>,
    pub line_height: f32,
    pub size: f32,
    pub font_family: String,
    pub width: f32,
}

impl TextSpec {
    pub fn block_height(&self) -> f32 {
        self.size * self.line_height * self.lines.len() as f32
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DrawingSpec {
    pub path: String,
    #[serde(default = "default_scale")]
    pub scale: f32,
}

fn default_scale() -> f32 {
    1.0
}

/// Field-free discriminant of [`ObjectKind`], used for policies and reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObjectKindTag {
    Image,
    Text,
    Drawing,
    Unsupported,
}

impl ObjectKindTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKindTag::Image => "image",
            ObjectKindTag::Text => "text",
            ObjectKindTag::Drawing => "drawing",
            ObjectKindTag::Unsupported => "unsupported",
        }
    }
}

impl fmt::Display for ObjectKindTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ObjectKind {
    pub fn tag(&self) -> ObjectKindTag {
        match self {
            ObjectKind::Image(_) => ObjectKindTag::Image,
            ObjectKind::Text(_) => ObjectKindTag::Text,
            ObjectKind::Drawing(_) => ObjectKindTag::Drawing,
            ObjectKind::Unsupported => ObjectKindTag::Unsupported,
        }
    }
}

impl AnnotationObject {
    pub fn image(page: usize, x: f32, y: f32, spec: ImageSpec) -> Self {
        Self {
            page,
            x,
            y,
            kind: ObjectKind::Image(spec),
        }
    }

    pub fn text(page: usize, x: f32, y: f32, spec: TextSpec) -> Self {
        Self {
            page,
            x,
            y,
            kind: ObjectKind::Text(spec),
        }
    }

    pub fn drawing(page: usize, x: f32, y: f32, path: impl Into<String>, scale: f32) -> Self {
        Self {
            page,
            x,
            y,
            kind: ObjectKind::Drawing(DrawingSpec {
                path: path.into(),
                scale,
            }),
        }
    }
}

/// Objects for one page, in their original relative order.
#[derive(Debug, Clone, Default)]
pub struct PageJob<'a> {
    pub page_index: usize,
    pub objects: Vec<&'a AnnotationObject>,
}

/// Splits `objects` into one job per page. Objects pointing past the last page
/// are dropped.
pub fn partition_by_page(objects: &[AnnotationObject], page_count: usize) -> Vec<PageJob<'_>> {
    let mut jobs: Vec<PageJob<'_>> = (0..page_count)
        .map(|page_index| PageJob {
            page_index,
            objects: Vec::new(),
        })
        .collect();
    for object in objects {
        match jobs.get_mut(object.page) {
            Some(job) => job.objects.push(object),
            None => tracing::debug!(
                page = object.page,
                page_count,
                "object references a missing page; skipped"
            ),
        }
    }
    jobs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_tagged_objects() {
        let json = r#"[
            {"type": "image", "page": 0, "x": 10, "y": 20, "width": 100, "height": 50,
             "mimeType": "image/png", "source": {"path": "a.png"}},
            {"type": "text", "page": 1, "x": 5, "y": 6, "lines": ["a", "b"],
             "lineHeight": 1.2, "size": 12, "fontFamily": "Helvetica", "width": 80},
            {"type": "drawing", "page": 0, "x": 0, "y": 0, "path": "M 0 0 L 10 10", "scale": 2},
            {"type": "sticker", "page": 0, "x": 0, "y": 0, "emoji": "x"}
        ]"#;
        let objects: Vec<AnnotationObject> = serde_json::from_str(json).expect("objects");
        let tags: Vec<ObjectKindTag> = objects.iter().map(|o| o.kind.tag()).collect();
        assert_eq!(
            tags,
            vec![
                ObjectKindTag::Image,
                ObjectKindTag::Text,
                ObjectKindTag::Drawing,
                ObjectKindTag::Unsupported
            ]
        );
        assert_eq!(objects[1].page, 1);
        let ObjectKind::Image(image) = &objects[0].kind else {
            panic!("expected image");
        };
        assert_eq!(image.mime_type.as_deref(), Some("image/png"));
        assert_eq!(image.height, 50.0);
    }

    #[test]
    fn drawing_scale_defaults_to_one() {
        let json = r#"{"type": "drawing", "page": 0, "x": 1, "y": 2, "path": "M0 0"}"#;
        let object: AnnotationObject = serde_json::from_str(json).expect("object");
        let ObjectKind::Drawing(drawing) = object.kind else {
            panic!("expected drawing");
        };
        assert_eq!(drawing.scale, 1.0);
    }

    #[test]
    fn text_block_height_is_size_times_line_height_times_lines() {
        let spec = TextSpec {
            lines: vec!["one".into(), "two".into()],
            line_height: 1.5,
            size: 10.0,
            font_family: "Helvetica".into(),
            width: 50.0,
        };
        assert_eq!(spec.block_height(), 30.0);
    }

    #[test]
    fn partition_keeps_relative_order_and_empty_pages() {
        let objects = vec![
            AnnotationObject::drawing(1, 0.0, 0.0, "M0 0", 1.0),
            AnnotationObject::drawing(0, 1.0, 0.0, "M0 0", 1.0),
            AnnotationObject::drawing(1, 2.0, 0.0, "M0 0", 1.0),
            AnnotationObject::drawing(7, 3.0, 0.0, "M0 0", 1.0),
        ];
        let jobs = partition_by_page(&objects, 3);
        assert_eq!(jobs.len(), 3);
        assert_eq!(jobs[0].objects.len(), 1);
        let xs: Vec<f32> = jobs[1].objects.iter().map(|o| o.x).collect();
        assert_eq!(xs, vec![0.0, 2.0]);
        assert!(jobs[2].objects.is_empty());
    }
}
