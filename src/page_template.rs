use crate::frame::Frame;
use crate::types::{Margins, Rect, Size};

#[derive(Debug, Clone, Copy)]
pub struct FrameSpec {
    pub rect: Rect,
}

#[derive(Debug, Clone)]
pub struct PageTemplate {
    pub name: String,
    pub page_size: Size,
    frames: Vec<FrameSpec>,
}

impl PageTemplate {
    pub fn new(name: impl Into<String>, page_size: Size) -> Self {
        Self {
            name: name.into(),
            page_size,
            frames: Vec::new(),
        }
    }

    /// Template with one frame filling the page inside `margins`.
    pub fn with_margins(name: impl Into<String>, page_size: Size, margins: Margins) -> Self {
        let rect = Rect {
            x: margins.left,
            y: margins.top,
            width: (page_size.width - margins.horizontal()).clamp_non_negative(),
            height: (page_size.height - margins.vertical()).clamp_non_negative(),
        };
        Self::new(name, page_size).with_frame(rect)
    }

    pub fn with_frame(mut self, rect: Rect) -> Self {
        self.frames.push(FrameSpec { rect });
        self
    }

    pub fn frame_specs(&self) -> &[FrameSpec] {
        &self.frames
    }

    pub fn instantiate_frames(&self, first_page: bool) -> Vec<Frame> {
        self.frames
            .iter()
            .enumerate()
            .map(|(index, spec)| Frame::new(spec.rect).with_leading_margin(first_page && index == 0))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Pt;

    #[test]
    fn margins_define_the_content_frame() {
        let template = PageTemplate::with_margins(
            "body",
            Size::a4(),
            Margins::symmetric(Pt::from_i32(50), Pt::from_i32(40)),
        );
        let rect = template.frame_specs()[0].rect;
        assert_eq!(rect.x, Pt::from_i32(40));
        assert_eq!(rect.y, Pt::from_i32(50));
        assert_eq!(rect.right(), Size::a4().width - Pt::from_i32(40));
        assert_eq!(rect.bottom(), Size::a4().height - Pt::from_i32(50));
        assert_eq!(template.instantiate_frames(true).len(), 1);
    }
}
