use crate::canvas::{Canvas, Document};
use crate::error::{MarkpageError, Result};
use crate::flowable::Flowable;
use crate::frame::{AddResult, Frame};
use crate::metrics::{DocumentMetrics, PageMetrics};
use crate::page_template::PageTemplate;
use crate::style::BreakMode;
use std::collections::VecDeque;
use std::time::Instant;

/// Drives a story of flowables through page templates into a [`Document`].
pub struct DocTemplate {
    page_templates: Vec<PageTemplate>,
    story: Vec<Box<dyn Flowable>>,
}

struct PageState {
    canvas: Canvas,
    page_number: usize,
    frames: Vec<Frame>,
    frame_index: usize,
    placed_on_page: bool,
    page_flowables: usize,
    page_start: Instant,
    metrics: DocumentMetrics,
}

fn select_template(page_templates: &[PageTemplate], page_number: usize) -> &PageTemplate {
    // Page n uses template n-1; the last template repeats.
    let idx = page_number.saturating_sub(1).min(page_templates.len() - 1);
    &page_templates[idx]
}

impl PageState {
    fn finish_page(&mut self) {
        let elapsed = self.page_start.elapsed().as_secs_f64() * 1000.0;
        self.metrics.total_layout_ms += elapsed;
        self.metrics.pages.push(PageMetrics {
            page_number: self.page_number,
            layout_ms: elapsed,
            command_count: self.canvas.current_command_count(),
            flowable_count: self.page_flowables,
        });
        self.canvas.show_page();
        self.page_flowables = 0;
        self.page_start = Instant::now();
    }

    fn next_page(&mut self, templates: &[PageTemplate], reason: &str, flowable: &str) {
        log::debug!(
            "page break {} -> {} ({reason}, {flowable})",
            self.page_number,
            self.page_number + 1
        );
        self.finish_page();
        self.page_number += 1;
        let template = select_template(templates, self.page_number);
        self.frames = template.instantiate_frames(false);
        self.frame_index = 0;
        self.placed_on_page = false;
    }
}

impl DocTemplate {
    pub fn new(page_templates: Vec<PageTemplate>) -> Self {
        Self {
            page_templates,
            story: Vec::new(),
        }
    }

    pub fn add_flowable(&mut self, flowable: Box<dyn Flowable>) {
        self.story.push(flowable);
    }

    pub fn build(self) -> Result<Document> {
        Ok(self.build_with_metrics()?.0)
    }

    pub fn build_with_metrics(self) -> Result<(Document, DocumentMetrics)> {
        if self.page_templates.is_empty() {
            return Err(MarkpageError::MissingPageTemplate);
        }
        let templates = self.page_templates;
        let first = select_template(&templates, 1);
        let mut state = PageState {
            canvas: Canvas::new(first.page_size),
            page_number: 1,
            frames: first.instantiate_frames(true),
            frame_index: 0,
            placed_on_page: false,
            page_flowables: 0,
            page_start: Instant::now(),
            metrics: DocumentMetrics::default(),
        };

        let mut story: VecDeque<Box<dyn Flowable>> = self.story.into_iter().collect();
        while let Some(flowable) = story.pop_front() {
            let mut current = flowable;
            let mut suppress_break_before = false;
            loop {
                let name = current.debug_name();
                let pagination = current.pagination();
                if !suppress_break_before
                    && pagination.break_before == BreakMode::Always
                    && (state.placed_on_page || state.frame_index > 0)
                {
                    state.next_page(&templates, "break_before", name);
                }
                if state.frame_index >= state.frames.len() {
                    state.next_page(&templates, "frames_exhausted", name);
                }
                if state.frames.is_empty() {
                    return Err(MarkpageError::MissingPageTemplate);
                }

                let is_last_frame = state.frame_index + 1 >= state.frames.len();
                let frame_rect = state.frames[state.frame_index].rect();
                let details = (!state.placed_on_page && is_last_frame).then(|| {
                    let size = current.wrap(frame_rect.width, frame_rect.height);
                    format!(
                        "{name} size={}x{}pt frame={}x{}pt",
                        size.width.to_f32(),
                        size.height.to_f32(),
                        frame_rect.width.to_f32(),
                        frame_rect.height.to_f32(),
                    )
                });

                let frame = &mut state.frames[state.frame_index];
                match frame.add(current, &mut state.canvas) {
                    AddResult::Placed => {
                        state.placed_on_page = true;
                        state.page_flowables += 1;
                        if pagination.break_after == BreakMode::Always && !story.is_empty() {
                            state.next_page(&templates, "break_after", name);
                        }
                        break;
                    }
                    AddResult::Split(remaining) => {
                        state.placed_on_page = true;
                        state.page_flowables += 1;
                        log::trace!("{name} split at page {}", state.page_number);
                        suppress_break_before = true;
                        current = remaining;
                        state.frame_index += 1;
                    }
                    AddResult::Overflow(remaining) => {
                        if !state.placed_on_page && is_last_frame {
                            let details = details.unwrap_or_else(|| name.to_string());
                            return Err(MarkpageError::UnplaceableFlowable(details));
                        }
                        current = remaining;
                        state.frame_index += 1;
                    }
                }
            }
        }

        if !state.canvas.is_current_empty() || state.metrics.pages.is_empty() {
            state.finish_page();
        }
        log::debug!(
            "layout finished: {} page(s) in {:.1} ms",
            state.metrics.page_count(),
            state.metrics.total_layout_ms
        );
        let metrics = state.metrics;
        Ok((state.canvas.finish(), metrics))
    }
}
