use crate::font::Base14Font;
use crate::types::{Color, Pt, Size};

/// Drawing command in top-left page space (y grows downwards). The PDF
/// writer flips coordinates when it serializes a page.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SaveState,
    RestoreState,
    SetFillColor(Color),
    SetStrokeColor(Color),
    SetLineWidth(Pt),
    SetDash {
        pattern: Vec<Pt>,
        phase: Pt,
    },
    SetFont {
        font: Base14Font,
        size: Pt,
    },
    MoveTo {
        x: Pt,
        y: Pt,
    },
    LineTo {
        x: Pt,
        y: Pt,
    },
    CurveTo {
        x1: Pt,
        y1: Pt,
        x2: Pt,
        y2: Pt,
        x: Pt,
        y: Pt,
    },
    ClosePath,
    DrawRect {
        x: Pt,
        y: Pt,
        width: Pt,
        height: Pt,
    },
    Fill,
    Stroke,
    /// `y` is the baseline.
    DrawString {
        x: Pt,
        y: Pt,
        text: String,
        word_spacing: Pt,
    },
    /// Outline entry anchored at `y` on the current page. Not painted.
    Bookmark {
        level: u8,
        title: String,
        y: Pt,
    },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub commands: Vec<Command>,
}

impl Page {
    pub fn is_blank(&self) -> bool {
        self.commands
            .iter()
            .all(|cmd| matches!(cmd, Command::Bookmark { .. }))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub page_size: Size,
    pub pages: Vec<Page>,
}

impl Document {
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// All painted text on page `index`, in drawing order.
    pub fn page_text(&self, index: usize) -> Vec<&str> {
        self.pages
            .get(index)
            .map(|page| {
                page.commands
                    .iter()
                    .filter_map(|cmd| match cmd {
                        Command::DrawString { text, .. } => Some(text.as_str()),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq)]
struct GraphicsState {
    fill_color: Color,
    stroke_color: Color,
    line_width: Pt,
    font: Option<(Base14Font, Pt)>,
}

impl Default for GraphicsState {
    fn default() -> Self {
        Self {
            fill_color: Color::BLACK,
            stroke_color: Color::BLACK,
            line_width: Pt::from_i32(1),
            font: None,
        }
    }
}

/// Records drawing commands page by page. Redundant state changes are
/// dropped so content streams stay small.
pub struct Canvas {
    page_size: Size,
    pages: Vec<Page>,
    current: Page,
    state_stack: Vec<GraphicsState>,
    current_state: GraphicsState,
}

impl Canvas {
    pub fn new(page_size: Size) -> Self {
        Self {
            page_size,
            pages: Vec::new(),
            current: Page::default(),
            state_stack: Vec::new(),
            current_state: GraphicsState::default(),
        }
    }

    pub fn page_size(&self) -> Size {
        self.page_size
    }

    pub fn save_state(&mut self) {
        self.state_stack.push(self.current_state.clone());
        self.current.commands.push(Command::SaveState);
    }

    pub fn restore_state(&mut self) {
        if let Some(state) = self.state_stack.pop() {
            self.current_state = state;
            self.current.commands.push(Command::RestoreState);
        }
    }

    pub fn set_fill_color(&mut self, color: Color) {
        if self.current_state.fill_color == color {
            return;
        }
        self.current_state.fill_color = color;
        self.current.commands.push(Command::SetFillColor(color));
    }

    pub fn set_stroke_color(&mut self, color: Color) {
        if self.current_state.stroke_color == color {
            return;
        }
        self.current_state.stroke_color = color;
        self.current.commands.push(Command::SetStrokeColor(color));
    }

    pub fn set_line_width(&mut self, width: Pt) {
        let width = width.clamp_non_negative();
        if self.current_state.line_width == width {
            return;
        }
        self.current_state.line_width = width;
        self.current.commands.push(Command::SetLineWidth(width));
    }

    pub fn set_dash(&mut self, pattern: Vec<Pt>, phase: Pt) {
        self.current
            .commands
            .push(Command::SetDash { pattern, phase });
    }

    pub fn set_font(&mut self, font: Base14Font, size: Pt) {
        if self.current_state.font == Some((font, size)) {
            return;
        }
        self.current_state.font = Some((font, size));
        self.current.commands.push(Command::SetFont { font, size });
    }

    pub fn move_to(&mut self, x: Pt, y: Pt) {
        self.current.commands.push(Command::MoveTo { x, y });
    }

    pub fn line_to(&mut self, x: Pt, y: Pt) {
        self.current.commands.push(Command::LineTo { x, y });
    }

    pub fn curve_to(&mut self, x1: Pt, y1: Pt, x2: Pt, y2: Pt, x: Pt, y: Pt) {
        self.current.commands.push(Command::CurveTo {
            x1,
            y1,
            x2,
            y2,
            x,
            y,
        });
    }

    pub fn close_path(&mut self) {
        self.current.commands.push(Command::ClosePath);
    }

    pub fn fill(&mut self) {
        self.current.commands.push(Command::Fill);
    }

    pub fn stroke(&mut self) {
        self.current.commands.push(Command::Stroke);
    }

    pub fn draw_rect(&mut self, x: Pt, y: Pt, width: Pt, height: Pt) {
        self.current.commands.push(Command::DrawRect {
            x,
            y,
            width,
            height,
        });
    }

    pub fn fill_rect(&mut self, x: Pt, y: Pt, width: Pt, height: Pt, color: Color) {
        if width <= Pt::ZERO || height <= Pt::ZERO {
            return;
        }
        self.set_fill_color(color);
        self.draw_rect(x, y, width, height);
        self.fill();
    }

    pub fn stroke_line(&mut self, x1: Pt, y1: Pt, x2: Pt, y2: Pt) {
        self.move_to(x1, y1);
        self.line_to(x2, y2);
        self.stroke();
    }

    /// Filled circle approximated by four Bezier arcs.
    pub fn fill_circle(&mut self, cx: Pt, cy: Pt, r: Pt) {
        self.circle_path(cx, cy, r);
        self.fill();
    }

    pub fn stroke_circle(&mut self, cx: Pt, cy: Pt, r: Pt) {
        self.circle_path(cx, cy, r);
        self.stroke();
    }

    fn circle_path(&mut self, cx: Pt, cy: Pt, r: Pt) {
        let k = r.mul_ratio(5523, 10000);
        self.move_to(cx + r, cy);
        self.curve_to(cx + r, cy + k, cx + k, cy + r, cx, cy + r);
        self.curve_to(cx - k, cy + r, cx - r, cy + k, cx - r, cy);
        self.curve_to(cx - r, cy - k, cx - k, cy - r, cx, cy - r);
        self.curve_to(cx + k, cy - r, cx + r, cy - k, cx + r, cy);
        self.close_path();
    }

    pub fn draw_string(&mut self, x: Pt, baseline: Pt, text: impl Into<String>) {
        self.draw_string_spaced(x, baseline, text, Pt::ZERO);
    }

    pub fn draw_string_spaced(
        &mut self,
        x: Pt,
        baseline: Pt,
        text: impl Into<String>,
        word_spacing: Pt,
    ) {
        let text = text.into();
        if text.is_empty() {
            return;
        }
        self.current.commands.push(Command::DrawString {
            x,
            y: baseline,
            text,
            word_spacing,
        });
    }

    pub fn bookmark(&mut self, level: u8, title: impl Into<String>, y: Pt) {
        self.current.commands.push(Command::Bookmark {
            level,
            title: title.into(),
            y,
        });
    }

    pub fn current_command_count(&self) -> usize {
        self.current.commands.len()
    }

    pub fn is_current_empty(&self) -> bool {
        self.current.commands.is_empty()
    }

    pub fn show_page(&mut self) {
        let current = std::mem::take(&mut self.current);
        self.pages.push(current);
        self.state_stack.clear();
        self.current_state = GraphicsState::default();
    }

    pub fn finish(mut self) -> Document {
        if !self.current.commands.is_empty() || self.pages.is_empty() {
            self.show_page();
        }
        Document {
            page_size: self.page_size,
            pages: self.pages,
        }
    }
}
