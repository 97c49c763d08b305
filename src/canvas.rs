use crate::embed::ImageResource;
use crate::fragment::TextFragment;
use crate::path::PathData;
use crate::types::{Rect, fmt};
use std::collections::BTreeSet;

/// A prepared annotation, ready to be applied to its page.
///
/// Preparation produces these without touching the document; applying one only
/// records commands and resources on a [`PageCanvas`].
#[derive(Debug)]
pub enum DrawOperation {
    Image {
        image: ImageResource,
        rect: Rect,
        opacity: f32,
    },
    Fragment {
        fragment: TextFragment,
        rect: Rect,
    },
    /// `x`/`y` place the path origin in PDF user space; the path itself is
    /// y-down and is flipped by a negative vertical scale.
    Path {
        path: PathData,
        x: f32,
        y: f32,
        scale: f32,
        border_width: f32,
    },
    Noop,
}

impl DrawOperation {
    pub fn is_noop(&self) -> bool {
        matches!(self, DrawOperation::Noop)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SaveState,
    RestoreState,
    ConcatMatrix {
        a: f32,
        b: f32,
        c: f32,
        d: f32,
        e: f32,
        f: f32,
    },
    SetGraphicsState(String),
    SetStrokeGray(f32),
    SetLineWidth(f32),
    SetLineCap(u8),
    SetLineJoin(u8),
    // Raw path construction operators (m/l/c/h).
    AppendPath(String),
    Stroke,
    DrawXObject(String),
}

#[derive(Debug)]
pub enum ResourceKind {
    Image(ImageResource),
    Form(TextFragment),
    // ca/CA
    GraphicsState { alpha: f32 },
}

impl ResourceKind {
    /// The resource subdictionary the name is registered in.
    pub fn category(&self) -> &'static str {
        match self {
            ResourceKind::Image(_) | ResourceKind::Form(_) => "XObject",
            ResourceKind::GraphicsState { .. } => "ExtGState",
        }
    }
}

#[derive(Debug)]
pub struct PendingResource {
    pub name: String,
    pub kind: ResourceKind,
}

/// Per-page drawing surface. Operations are applied strictly in call order;
/// the session turns the result into a content stream plus resources.
#[derive(Debug, Default)]
pub struct PageCanvas {
    commands: Vec<Command>,
    resources: Vec<PendingResource>,
    reserved: BTreeSet<String>,
    next_id: usize,
    applied: usize,
}

impl PageCanvas {
    pub fn new() -> Self {
        Self::default()
    }

    /// A canvas that never hands out any of `reserved` as a resource name.
    pub fn with_reserved_names(reserved: BTreeSet<String>) -> Self {
        Self {
            reserved,
            ..Self::default()
        }
    }

    pub fn apply(&mut self, op: DrawOperation) {
        match op {
            DrawOperation::Image {
                image,
                rect,
                opacity,
            } => {
                let gs = self.graphics_state(opacity);
                let name = self.add_resource("AnnImg", ResourceKind::Image(image));
                self.commands.push(Command::SaveState);
                if let Some(gs) = gs {
                    self.commands.push(Command::SetGraphicsState(gs));
                }
                self.commands.push(Command::ConcatMatrix {
                    a: rect.width,
                    b: 0.0,
                    c: 0.0,
                    d: rect.height,
                    e: rect.x,
                    f: rect.y,
                });
                self.commands.push(Command::DrawXObject(name));
                self.commands.push(Command::RestoreState);
            }
            DrawOperation::Fragment { fragment, rect } => {
                let sx = ratio(rect.width, fragment.width);
                let sy = ratio(rect.height, fragment.height);
                let name = self.add_resource("AnnFrag", ResourceKind::Form(fragment));
                self.commands.push(Command::SaveState);
                self.commands.push(Command::ConcatMatrix {
                    a: sx,
                    b: 0.0,
                    c: 0.0,
                    d: sy,
                    e: rect.x,
                    f: rect.y,
                });
                self.commands.push(Command::DrawXObject(name));
                self.commands.push(Command::RestoreState);
            }
            DrawOperation::Path {
                path,
                x,
                y,
                scale,
                border_width,
            } => {
                if path.is_empty() {
                    self.applied += 1;
                    return;
                }
                self.commands.extend([
                    Command::SaveState,
                    Command::SetLineCap(1),
                    Command::SetLineJoin(1),
                    Command::ConcatMatrix {
                        a: 1.0,
                        b: 0.0,
                        c: 0.0,
                        d: 1.0,
                        e: x,
                        f: y,
                    },
                    Command::ConcatMatrix {
                        a: scale,
                        b: 0.0,
                        c: 0.0,
                        d: -scale,
                        e: 0.0,
                        f: 0.0,
                    },
                    Command::SetStrokeGray(0.0),
                    Command::SetLineWidth(border_width),
                    Command::AppendPath(path.to_pdf_operators()),
                    Command::Stroke,
                    Command::RestoreState,
                ]);
            }
            DrawOperation::Noop => {}
        }
        self.applied += 1;
    }

    /// Operations applied so far, no-ops included.
    pub fn applied(&self) -> usize {
        self.applied
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn resources(&self) -> &[PendingResource] {
        &self.resources
    }

    pub fn into_parts(self) -> (Vec<Command>, Vec<PendingResource>) {
        (self.commands, self.resources)
    }

    fn graphics_state(&mut self, alpha: f32) -> Option<String> {
        let alpha = alpha.clamp(0.0, 1.0);
        if alpha >= 1.0 {
            return None;
        }
        let existing = self.resources.iter().find_map(|res| match res.kind {
            ResourceKind::GraphicsState { alpha: a } if a == alpha => Some(res.name.clone()),
            _ => None,
        });
        if existing.is_some() {
            return existing;
        }
        Some(self.add_resource("AnnGs", ResourceKind::GraphicsState { alpha }))
    }

    fn add_resource(&mut self, prefix: &str, kind: ResourceKind) -> String {
        let name = loop {
            self.next_id += 1;
            let candidate = format!("{prefix}{}", self.next_id);
            if !self.reserved.contains(&candidate) {
                break candidate;
            }
        };
        self.resources.push(PendingResource {
            name: name.clone(),
            kind,
        });
        name
    }
}

fn ratio(target: f32, natural: f32) -> f32 {
    if natural.abs() <= f32::EPSILON {
        1.0
    } else {
        target / natural
    }
}

/// Serializes commands into content stream operators.
pub fn render_content(commands: &[Command]) -> Vec<u8> {
    let mut out = String::new();
    for cmd in commands {
        match cmd {
            Command::SaveState => out.push_str("q\n"),
            Command::RestoreState => out.push_str("Q\n"),
            Command::ConcatMatrix { a, b, c, d, e, f } => {
                out.push_str(&format!(
                    "{} {} {} {} {} {} cm\n",
                    fmt(*a),
                    fmt(*b),
                    fmt(*c),
                    fmt(*d),
                    fmt(*e),
                    fmt(*f)
                ));
            }
            Command::SetGraphicsState(name) => out.push_str(&format!("/{} gs\n", name)),
            Command::SetStrokeGray(gray) => out.push_str(&format!("{} G\n", fmt(*gray))),
            Command::SetLineWidth(width) => out.push_str(&format!("{} w\n", fmt(*width))),
            Command::SetLineCap(cap) => out.push_str(&format!("{} J\n", cap)),
            Command::SetLineJoin(join) => out.push_str(&format!("{} j\n", join)),
            Command::AppendPath(ops) => out.push_str(ops),
            Command::Stroke => out.push_str("S\n"),
            Command::DrawXObject(name) => out.push_str(&format!("/{} Do\n", name)),
        }
    }
    out.into_bytes()
}
