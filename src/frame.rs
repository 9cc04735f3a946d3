use crate::canvas::Canvas;
use crate::flowable::Flowable;
use crate::style::BreakMode;
use crate::types::{Pt, Rect};

pub enum AddResult {
    Placed,
    Split(Box<dyn Flowable>),
    Overflow(Box<dyn Flowable>),
}

/// A rectangle on the page that flowables stack into from the top.
pub struct Frame {
    rect: Rect,
    cursor_y: Pt,
    prev_margin: Option<Pt>,
    keep_leading_margin: bool,
}

impl Frame {
    pub fn new(rect: Rect) -> Self {
        Self {
            rect,
            cursor_y: Pt::ZERO,
            prev_margin: None,
            keep_leading_margin: false,
        }
    }

    /// Keep the top margin of the first flowable instead of truncating it
    /// at the frame edge. Used for the first page of a document.
    pub fn with_leading_margin(mut self, keep: bool) -> Self {
        self.keep_leading_margin = keep;
        self
    }

    pub fn remaining_height(&self) -> Pt {
        (self.rect.height - self.cursor_y).max(Pt::ZERO)
    }

    pub fn rect(&self) -> Rect {
        self.rect
    }

    pub fn is_empty(&self) -> bool {
        self.prev_margin.is_none()
    }

    fn leading_gap(&self, top_margin: Pt) -> Pt {
        match self.prev_margin {
            Some(prev) => prev.max(top_margin),
            None if self.keep_leading_margin => top_margin,
            None => Pt::ZERO,
        }
    }

    fn place(&mut self, flowable: &dyn Flowable, canvas: &mut Canvas, gap: Pt, height: Pt) {
        let avail_width = self.rect.width;
        let y = self.rect.y + self.cursor_y + gap;
        flowable.draw(canvas, self.rect.x, y, avail_width, height);
        self.cursor_y = self.cursor_y + gap + height;
        self.prev_margin = Some(flowable.vertical_margins().1);
    }

    pub fn add(&mut self, flowable: Box<dyn Flowable>, canvas: &mut Canvas) -> AddResult {
        let avail_width = self.rect.width;
        let (top_margin, _) = flowable.vertical_margins();
        let gap = self.leading_gap(top_margin);
        let avail_height = self.remaining_height() - gap;
        if avail_height <= Pt::ZERO && !self.is_empty() {
            return AddResult::Overflow(flowable);
        }

        let pagination = flowable.pagination();
        let size = flowable.wrap(avail_width, avail_height);
        if pagination.break_inside == BreakMode::Avoid
            && size.height > avail_height
            && size.height <= self.rect.height
            && !self.is_empty()
        {
            return AddResult::Overflow(flowable);
        }

        if size.height <= avail_height {
            self.place(flowable.as_ref(), canvas, gap, size.height);
            return AddResult::Placed;
        }

        let split = if self.is_empty() {
            flowable.split_forced(avail_width, avail_height)
        } else {
            flowable.split(avail_width, avail_height)
        };
        if let Some((first, second)) = split {
            let first_size = first.wrap(avail_width, avail_height);
            if first_size.height > Pt::ZERO && (first_size.height <= avail_height || self.is_empty()) {
                self.place(first.as_ref(), canvas, gap, first_size.height);
                return AddResult::Split(second);
            }
        }

        // Taller than a whole frame and indivisible: place it anyway so
        // pagination keeps moving.
        if self.is_empty() {
            log::warn!(
                "{} overflows its frame ({} > {} pt)",
                flowable.debug_name(),
                size.height.to_f32(),
                avail_height.to_f32()
            );
            self.place(flowable.as_ref(), canvas, gap, size.height);
            self.cursor_y = self.rect.height;
            return AddResult::Placed;
        }

        AddResult::Overflow(flowable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flowable::{BlockBox, InlineItem, Paragraph, TextRun, TextStyle};
    use crate::font::{Base14Font, FontMetrics};
    use crate::types::{Margins, Size};
    use std::sync::Arc;

    fn block(text: &str, top: i32, bottom: i32) -> Box<dyn Flowable> {
        let metrics = Arc::new(FontMetrics::default());
        let style = TextStyle {
            font: Base14Font::Courier,
            font_size: Pt::from_i32(10),
            line_height: Pt::from_i32(12),
            ..TextStyle::default()
        };
        let para = Paragraph::new(
            vec![InlineItem::Text(TextRun {
                text: text.to_string(),
                style: style.clone(),
            })],
            style,
            metrics.clone(),
        );
        Box::new(BlockBox::new(vec![Box::new(para)], metrics).with_margin(Margins {
            top: Pt::from_i32(top),
            bottom: Pt::from_i32(bottom),
            ..Margins::default()
        }))
    }

    fn rect(height: i32) -> Rect {
        Rect {
            x: Pt::ZERO,
            y: Pt::ZERO,
            width: Pt::from_i32(200),
            height: Pt::from_i32(height),
        }
    }

    #[test]
    fn leading_margin_is_truncated_unless_kept() {
        let mut canvas = Canvas::new(Size::a4());
        let mut frame = Frame::new(rect(100));
        assert!(matches!(frame.add(block("a", 20, 0), &mut canvas), AddResult::Placed));
        assert_eq!(frame.remaining_height(), Pt::from_i32(88));

        let mut first_page = Frame::new(rect(100)).with_leading_margin(true);
        assert!(matches!(first_page.add(block("a", 20, 0), &mut canvas), AddResult::Placed));
        assert_eq!(first_page.remaining_height(), Pt::from_i32(68));
    }

    #[test]
    fn sibling_margins_collapse() {
        let mut canvas = Canvas::new(Size::a4());
        let mut frame = Frame::new(rect(100));
        frame.add(block("a", 0, 10), &mut canvas);
        frame.add(block("b", 6, 0), &mut canvas);
        assert_eq!(frame.remaining_height(), Pt::from_i32(100 - 12 - 10 - 12));
    }

    #[test]
    fn full_frame_overflows_and_empty_frame_forces_placement() {
        let mut canvas = Canvas::new(Size::a4());
        let mut frame = Frame::new(rect(20));
        assert!(matches!(frame.add(block("a", 0, 0), &mut canvas), AddResult::Placed));
        assert!(matches!(frame.add(block("b", 0, 0), &mut canvas), AddResult::Overflow(_)));

        let mut tiny = Frame::new(rect(5));
        assert!(matches!(tiny.add(block("a", 0, 0), &mut canvas), AddResult::Placed));
        assert_eq!(tiny.remaining_height(), Pt::ZERO);
    }
}
