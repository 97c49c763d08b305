use crate::error::{ComposeError, ComposeResult};
use crate::types::fmt;
use kurbo::{BezPath, PathEl, Point};

/// Parsed SVG path data, kept in SVG (y-down) coordinates.
#[derive(Debug, Clone)]
pub struct PathData {
    path: BezPath,
}

impl PathData {
    pub fn parse(d: &str) -> ComposeResult<Self> {
        let path = BezPath::from_svg(d)
            .map_err(|err| ComposeError::Path(format!("invalid svg path data: {err}")))?;
        Ok(Self { path })
    }

    pub fn is_empty(&self) -> bool {
        self.path.elements().is_empty()
    }

    /// PDF path construction operators (`m`, `l`, `c`, `h`). Quadratic
    /// segments are raised to cubics.
    pub fn to_pdf_operators(&self) -> String {
        let mut out = String::new();
        let mut current = Point::ZERO;
        let mut subpath_start = Point::ZERO;
        for el in self.path.elements() {
            match *el {
                PathEl::MoveTo(p) => {
                    out.push_str(&format!("{} {} m\n", num(p.x), num(p.y)));
                    current = p;
                    subpath_start = p;
                }
                PathEl::LineTo(p) => {
                    out.push_str(&format!("{} {} l\n", num(p.x), num(p.y)));
                    current = p;
                }
                PathEl::QuadTo(p1, p2) => {
                    let c1 = current + (p1 - current) * (2.0 / 3.0);
                    let c2 = p2 + (p1 - p2) * (2.0 / 3.0);
                    out.push_str(&curve(c1, c2, p2));
                    current = p2;
                }
                PathEl::CurveTo(p1, p2, p3) => {
                    out.push_str(&curve(p1, p2, p3));
                    current = p3;
                }
                PathEl::ClosePath => {
                    out.push_str("h\n");
                    current = subpath_start;
                }
            }
        }
        out
    }
}

fn curve(p1: Point, p2: Point, p3: Point) -> String {
    format!(
        "{} {} {} {} {} {} c\n",
        num(p1.x),
        num(p1.y),
        num(p2.x),
        num(p2.y),
        num(p3.x),
        num(p3.y)
    )
}

fn num(value: f64) -> String {
    fmt(value as f32)
}
