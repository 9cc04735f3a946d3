use crate::canvas::Canvas;
use crate::font::{Base14Font, FontMetrics};
use crate::style::{BorderEdges, BorderLineStyle, BreakMode, ListStyleKind, TextAlignMode, WidthSpec};
use crate::types::{Color, Margins, Pt, Size};
use std::ops::Range;
use std::sync::{Arc, Mutex};

/// Height used when measuring content without a page limit.
const UNBOUNDED: i32 = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub break_before: BreakMode,
    pub break_after: BreakMode,
    pub break_inside: BreakMode,
    pub orphans: usize,
    pub widows: usize,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            break_before: BreakMode::Auto,
            break_after: BreakMode::Auto,
            break_inside: BreakMode::Auto,
            orphans: 2,
            widows: 2,
        }
    }
}

impl Pagination {
    fn resolved_orphans(self) -> usize {
        self.orphans.max(1)
    }

    fn resolved_widows(self) -> usize {
        self.widows.max(1)
    }
}

/// A unit of content the frame can measure, split across pages and paint.
///
/// Heights reported by `wrap` cover the border box only. Vertical margins
/// are reported separately so the stacking context can collapse them.
pub trait Flowable: FlowableClone + Send + Sync {
    fn wrap(&self, avail_width: Pt, avail_height: Pt) -> Size;
    fn split(
        &self,
        avail_width: Pt,
        avail_height: Pt,
    ) -> Option<(Box<dyn Flowable>, Box<dyn Flowable>)>;
    fn draw(&self, canvas: &mut Canvas, x: Pt, y: Pt, avail_width: Pt, avail_height: Pt);

    /// Split for a frame that has nothing on it yet. Must place something
    /// whenever the flowable has more than one piece.
    fn split_forced(
        &self,
        avail_width: Pt,
        avail_height: Pt,
    ) -> Option<(Box<dyn Flowable>, Box<dyn Flowable>)> {
        self.split(avail_width, avail_height)
    }

    /// (top, bottom) margins after collapsing with first/last children.
    fn vertical_margins(&self) -> (Pt, Pt) {
        (Pt::ZERO, Pt::ZERO)
    }

    /// (min-content, max-content) widths, margins included.
    fn content_widths(&self) -> (Pt, Pt) {
        (Pt::ZERO, Pt::ZERO)
    }

    /// Offset of the first baseline from the top of the border box.
    fn first_baseline(&self, _avail_width: Pt) -> Option<Pt> {
        None
    }

    fn pagination(&self) -> Pagination {
        Pagination::default()
    }

    fn debug_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

pub trait FlowableClone {
    fn clone_box(&self) -> Box<dyn Flowable>;
}

impl<T> FlowableClone for T
where
    T: 'static + Flowable + Clone,
{
    fn clone_box(&self) -> Box<dyn Flowable> {
        Box::new(self.clone())
    }
}

impl Clone for Box<dyn Flowable> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// Box painted behind an inline run, as for `code` spans.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InlineHighlight {
    pub background: Option<Color>,
    pub pad_x: Pt,
    pub pad_y: Pt,
    pub border: Option<(Pt, Color)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextStyle {
    pub font: Base14Font,
    pub font_size: Pt,
    pub line_height: Pt,
    pub color: Color,
    pub underline: bool,
    pub line_through: bool,
    pub highlight: Option<InlineHighlight>,
}

impl Default for TextStyle {
    fn default() -> Self {
        Self {
            font: Base14Font::Helvetica,
            font_size: Pt::from_i32(12),
            line_height: Pt::from_f32(13.8),
            color: Color::BLACK,
            underline: false,
            line_through: false,
            highlight: None,
        }
    }
}

impl TextStyle {
    fn ascent(&self) -> Pt {
        self.font_size.mul_ratio(self.font.ascent(), 1000)
    }

    fn descent(&self) -> Pt {
        self.font_size.mul_ratio(-self.font.descent(), 1000)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextRun {
    pub text: String,
    pub style: TextStyle,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InlineItem {
    Text(TextRun),
    LineBreak,
}

#[derive(Debug, Clone, PartialEq)]
struct Fragment {
    text: String,
    run: usize,
    run_start: bool,
    run_end: bool,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(Vec<Fragment>),
    Space(usize),
    Break,
}

#[derive(Debug, Clone, PartialEq)]
struct Segment {
    text: String,
    run: usize,
    /// Offset of the first glyph from the line start, before justification.
    x: Pt,
    width: Pt,
    gaps_before: usize,
    inner_spaces: usize,
    pad_before: Pt,
    pad_after: Pt,
}

#[derive(Debug, Clone, PartialEq)]
struct LineLayout {
    segments: Vec<Segment>,
    width: Pt,
    height: Pt,
    baseline: Pt,
    gaps: usize,
    justify: bool,
}

#[derive(Debug, Default)]
struct ParagraphLayoutCache {
    width: Option<Pt>,
    lines: Option<Arc<Vec<LineLayout>>>,
}

struct LineBuilder<'a> {
    runs: &'a [TextRun],
    metrics: &'a FontMetrics,
    segments: Vec<Segment>,
    width: Pt,
    gaps: usize,
    pending_gap: Option<usize>,
}

impl<'a> LineBuilder<'a> {
    fn new(runs: &'a [TextRun], metrics: &'a FontMetrics) -> Self {
        Self {
            runs,
            metrics,
            segments: Vec::new(),
            width: Pt::ZERO,
            gaps: 0,
            pending_gap: None,
        }
    }

    fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    fn measure(&self, run: usize, text: &str) -> Pt {
        let style = &self.runs[run].style;
        self.metrics.measure(style.font, style.font_size, text)
    }

    fn pads(&self, frag: &Fragment) -> (Pt, Pt) {
        let pad = self.runs[frag.run]
            .style
            .highlight
            .map(|h| h.pad_x)
            .unwrap_or(Pt::ZERO);
        (
            if frag.run_start { pad } else { Pt::ZERO },
            if frag.run_end { pad } else { Pt::ZERO },
        )
    }

    fn fragment_advance(&self, frag: &Fragment) -> Pt {
        let (before, after) = self.pads(frag);
        before + self.measure(frag.run, &frag.text) + after
    }

    fn gap_width(&self) -> Pt {
        match self.pending_gap {
            Some(run) if !self.is_empty() => self.measure(run, " "),
            _ => Pt::ZERO,
        }
    }

    fn push_fragment(&mut self, frag: &Fragment) {
        let (pad_before, pad_after) = self.pads(frag);
        let text_width = self.measure(frag.run, &frag.text);
        let gap = if self.is_empty() { None } else { self.pending_gap.take() };
        self.pending_gap = None;

        let mergeable = self.segments.last().is_some_and(|last| {
            last.pad_after == Pt::ZERO
                && pad_before == Pt::ZERO
                && self.runs[last.run].style.highlight.is_none()
                && self.runs[last.run].style == self.runs[frag.run].style
                && gap.is_none_or(|gap_run| self.runs[gap_run].style == self.runs[frag.run].style)
        });

        if mergeable {
            let space = gap.map(|run| self.measure(run, " ")).unwrap_or(Pt::ZERO);
            if let Some(last) = self.segments.last_mut() {
                if gap.is_some() {
                    last.text.push(' ');
                    last.inner_spaces += 1;
                }
                last.text.push_str(&frag.text);
                last.width += space + text_width;
                last.pad_after = pad_after;
            }
            if gap.is_some() {
                self.gaps += 1;
            }
            self.width += space + text_width + pad_after;
            return;
        }

        if let Some(run) = gap {
            self.width += self.measure(run, " ");
            self.gaps += 1;
        }
        self.segments.push(Segment {
            text: frag.text.clone(),
            run: frag.run,
            x: self.width + pad_before,
            width: text_width,
            gaps_before: self.gaps,
            inner_spaces: 0,
            pad_before,
            pad_after,
        });
        self.width += pad_before + text_width + pad_after;
    }

    fn finish(self, default_style: &TextStyle, justify: bool) -> LineLayout {
        let mut height = default_style.line_height;
        let mut ascent = default_style.ascent();
        let mut descent = default_style.descent();
        for segment in &self.segments {
            let style = &self.runs[segment.run].style;
            height = height.max(style.line_height);
            ascent = ascent.max(style.ascent());
            descent = descent.max(style.descent());
        }
        let half_leading = (height - ascent - descent).mul_ratio(1, 2);
        LineLayout {
            segments: self.segments,
            width: self.width,
            height,
            baseline: half_leading + ascent,
            gaps: self.gaps,
            justify,
        }
    }
}

/// A block of inline runs laid out into lines.
#[derive(Clone)]
pub struct Paragraph {
    runs: Arc<Vec<TextRun>>,
    breaks: Arc<Vec<usize>>,
    default_style: TextStyle,
    align: TextAlignMode,
    preserve_whitespace: bool,
    pagination: Pagination,
    metrics: Arc<FontMetrics>,
    fixed_lines: Option<Arc<Vec<LineLayout>>>,
    layout_cache: Arc<Mutex<ParagraphLayoutCache>>,
}

impl Paragraph {
    pub fn new(items: Vec<InlineItem>, default_style: TextStyle, metrics: Arc<FontMetrics>) -> Self {
        let mut runs = Vec::new();
        let mut breaks = Vec::new();
        for item in items {
            match item {
                InlineItem::Text(run) => {
                    if !run.text.is_empty() {
                        runs.push(run);
                    }
                }
                InlineItem::LineBreak => breaks.push(runs.len()),
            }
        }
        Self {
            runs: Arc::new(runs),
            breaks: Arc::new(breaks),
            default_style,
            align: TextAlignMode::Left,
            preserve_whitespace: false,
            pagination: Pagination::default(),
            metrics,
            fixed_lines: None,
            layout_cache: Arc::new(Mutex::new(ParagraphLayoutCache::default())),
        }
    }

    pub fn with_align(mut self, align: TextAlignMode) -> Self {
        self.align = align;
        self
    }

    pub fn with_whitespace(mut self, preserve_whitespace: bool) -> Self {
        self.preserve_whitespace = preserve_whitespace;
        self
    }

    pub fn with_pagination(mut self, pagination: Pagination) -> Self {
        self.pagination = pagination;
        self
    }

    /// Concatenated text of every run.
    pub fn text(&self) -> String {
        self.runs.iter().map(|run| run.text.as_str()).collect()
    }

    /// True when the paragraph would paint nothing.
    pub fn is_blank(&self) -> bool {
        self.breaks.is_empty()
            && !self.preserve_whitespace
            && self
                .runs
                .iter()
                .all(|run| run.style.highlight.is_none() && run.text.trim().is_empty())
    }

    fn tokens(&self) -> Vec<Token> {
        let mut tokens = Vec::new();
        let mut current: Vec<Fragment> = Vec::new();
        let mut pending_space: Option<usize> = None;
        let mut break_iter = self.breaks.iter().peekable();

        let flush = |current: &mut Vec<Fragment>, tokens: &mut Vec<Token>| {
            if !current.is_empty() {
                tokens.push(Token::Word(std::mem::take(current)));
            }
        };

        for (idx, run) in self.runs.iter().enumerate() {
            while break_iter.peek().is_some_and(|at| **at == idx) {
                break_iter.next();
                flush(&mut current, &mut tokens);
                tokens.push(Token::Break);
                pending_space = None;
            }
            let mut run_started = false;
            for ch in run.text.chars() {
                if self.preserve_whitespace && ch == '\n' {
                    flush(&mut current, &mut tokens);
                    tokens.push(Token::Break);
                    continue;
                }
                if !self.preserve_whitespace && ch.is_whitespace() {
                    flush(&mut current, &mut tokens);
                    pending_space = Some(idx);
                    continue;
                }
                if current.is_empty() {
                    if let Some(space_run) = pending_space.take() {
                        if matches!(tokens.last(), Some(Token::Word(_))) {
                            tokens.push(Token::Space(space_run));
                        }
                    }
                }
                let text = if ch == '\t' { "    ".to_string() } else { ch.to_string() };
                match current.last_mut() {
                    Some(last) if last.run == idx => last.text.push_str(&text),
                    _ => {
                        current.push(Fragment {
                            text,
                            run: idx,
                            run_start: !run_started,
                            run_end: false,
                        });
                    }
                }
                run_started = true;
            }
            if run_started {
                mark_run_end(&mut current, &mut tokens, idx);
            }
        }
        flush(&mut current, &mut tokens);
        for _ in break_iter {
            tokens.push(Token::Break);
        }
        if self.preserve_whitespace && matches!(tokens.last(), Some(Token::Break)) {
            tokens.pop();
        }
        tokens
    }

    fn layout_lines(&self, avail_width: Pt) -> Arc<Vec<LineLayout>> {
        if let Some(fixed) = &self.fixed_lines {
            return fixed.clone();
        }
        if let Ok(cache) = self.layout_cache.lock() {
            if cache.width == Some(avail_width) {
                if let Some(lines) = &cache.lines {
                    return lines.clone();
                }
            }
        }
        let lines = Arc::new(if self.preserve_whitespace {
            self.layout_preformatted(avail_width)
        } else {
            self.layout_flow(avail_width)
        });
        if let Ok(mut cache) = self.layout_cache.lock() {
            cache.width = Some(avail_width);
            cache.lines = Some(lines.clone());
        }
        lines
    }

    fn layout_flow(&self, avail_width: Pt) -> Vec<LineLayout> {
        let metrics = self.metrics.as_ref();
        let mut lines = Vec::new();
        let mut line = LineBuilder::new(&self.runs, metrics);
        for token in self.tokens() {
            match token {
                Token::Space(run) => line.pending_gap = Some(run),
                Token::Break => {
                    let finished = std::mem::replace(&mut line, LineBuilder::new(&self.runs, metrics));
                    lines.push(finished.finish(&self.default_style, false));
                }
                Token::Word(frags) => {
                    let word_width: Pt = frags.iter().map(|f| line.fragment_advance(f)).sum();
                    if !line.is_empty() && line.width + line.gap_width() + word_width > avail_width {
                        let finished = std::mem::replace(&mut line, LineBuilder::new(&self.runs, metrics));
                        lines.push(finished.finish(&self.default_style, true));
                    }
                    if line.is_empty() && word_width > avail_width {
                        for frag in &frags {
                            self.place_breaking(&mut line, &mut lines, frag, avail_width, true);
                        }
                        continue;
                    }
                    for frag in &frags {
                        line.push_fragment(frag);
                    }
                }
            }
        }
        if !line.is_empty() {
            lines.push(line.finish(&self.default_style, false));
        }
        lines
    }

    fn layout_preformatted(&self, avail_width: Pt) -> Vec<LineLayout> {
        let metrics = self.metrics.as_ref();
        let mut lines = Vec::new();
        let mut line = LineBuilder::new(&self.runs, metrics);
        let mut line_open = false;
        for token in self.tokens() {
            match token {
                Token::Break => {
                    let finished = std::mem::replace(&mut line, LineBuilder::new(&self.runs, metrics));
                    lines.push(finished.finish(&self.default_style, false));
                    line_open = false;
                }
                Token::Space(_) => {}
                Token::Word(frags) => {
                    line_open = true;
                    for frag in &frags {
                        self.place_breaking(&mut line, &mut lines, frag, avail_width, false);
                    }
                }
            }
        }
        if line_open {
            lines.push(line.finish(&self.default_style, false));
        }
        lines
    }

    /// Places `frag`, breaking it between characters wherever the line fills up.
    fn place_breaking<'a>(
        &'a self,
        line: &mut LineBuilder<'a>,
        lines: &mut Vec<LineLayout>,
        frag: &Fragment,
        avail_width: Pt,
        justify: bool,
    ) {
        let mut pending = Some(frag.clone());
        while let Some(piece) = pending.take() {
            let (head, tail) = take_prefix(line, &piece, avail_width - line.width);
            if !line.is_empty() && line.width + line.fragment_advance(&head) > avail_width {
                let finished = std::mem::replace(line, LineBuilder::new(&self.runs, &self.metrics));
                lines.push(finished.finish(&self.default_style, justify));
                pending = Some(piece);
                continue;
            }
            line.push_fragment(&head);
            pending = tail;
        }
    }

    fn with_lines(&self, lines: Vec<LineLayout>, pagination: Pagination) -> Paragraph {
        Paragraph {
            runs: self.runs.clone(),
            breaks: self.breaks.clone(),
            default_style: self.default_style.clone(),
            align: self.align,
            preserve_whitespace: self.preserve_whitespace,
            pagination,
            metrics: self.metrics.clone(),
            fixed_lines: Some(Arc::new(lines)),
            layout_cache: Arc::new(Mutex::new(ParagraphLayoutCache::default())),
        }
    }

    fn split_lines(
        &self,
        avail_width: Pt,
        avail_height: Pt,
        forced: bool,
    ) -> Option<(Box<dyn Flowable>, Box<dyn Flowable>)> {
        let lines = self.layout_lines(avail_width);
        let total_lines = lines.len();
        if total_lines < 2 {
            return None;
        }
        let mut used = Pt::ZERO;
        let mut max_lines = 0usize;
        for line in lines.iter() {
            if used + line.height > avail_height {
                break;
            }
            used += line.height;
            max_lines += 1;
        }
        if max_lines >= total_lines {
            return None;
        }

        let orphans = self.pagination.resolved_orphans();
        let widows = self.pagination.resolved_widows();
        let mut split_at = max_lines;
        if total_lines - split_at < widows {
            split_at = total_lines.saturating_sub(widows);
        }
        if split_at < orphans || self.pagination.break_inside == BreakMode::Avoid {
            split_at = 0;
        }
        if split_at == 0 {
            if !forced {
                return None;
            }
            split_at = max_lines.max(1);
        }
        if split_at >= total_lines {
            return None;
        }

        let first = self.with_lines(
            lines[..split_at].to_vec(),
            Pagination {
                break_after: BreakMode::Auto,
                ..self.pagination
            },
        );
        let second = self.with_lines(
            lines[split_at..].to_vec(),
            Pagination {
                break_before: BreakMode::Auto,
                ..self.pagination
            },
        );
        Some((Box::new(first), Box::new(second)))
    }
}

fn mark_run_end(current: &mut [Fragment], tokens: &mut [Token], run: usize) {
    if let Some(last) = current.last_mut() {
        if last.run == run {
            last.run_end = true;
        }
        return;
    }
    for token in tokens.iter_mut().rev() {
        match token {
            Token::Word(frags) => {
                if let Some(last) = frags.last_mut() {
                    if last.run == run {
                        last.run_end = true;
                    }
                }
                return;
            }
            Token::Break => return,
            Token::Space(_) => {}
        }
    }
}

/// Splits off the longest prefix of `frag` that fits in `room`. The prefix
/// always holds at least one char.
fn take_prefix(line: &LineBuilder<'_>, frag: &Fragment, room: Pt) -> (Fragment, Option<Fragment>) {
    if line.fragment_advance(frag) <= room {
        return (frag.clone(), None);
    }
    let (pad_before, _) = line.pads(frag);
    let mut used = pad_before;
    let mut split_at = 0usize;
    let mut buf = [0u8; 4];
    for (idx, ch) in frag.text.char_indices() {
        let width = line.measure(frag.run, ch.encode_utf8(&mut buf));
        if split_at > 0 && used + width > room {
            break;
        }
        used += width;
        split_at = idx + ch.len_utf8();
    }
    if split_at >= frag.text.len() {
        return (frag.clone(), None);
    }
    let head = Fragment {
        text: frag.text[..split_at].to_string(),
        run: frag.run,
        run_start: frag.run_start,
        run_end: false,
    };
    let tail = Fragment {
        text: frag.text[split_at..].to_string(),
        run: frag.run,
        run_start: false,
        run_end: frag.run_end,
    };
    (head, Some(tail))
}

impl Flowable for Paragraph {
    fn wrap(&self, avail_width: Pt, _avail_height: Pt) -> Size {
        let lines = self.layout_lines(avail_width);
        let height = lines.iter().map(|line| line.height).sum();
        Size {
            width: avail_width,
            height,
        }
    }

    fn split(
        &self,
        avail_width: Pt,
        avail_height: Pt,
    ) -> Option<(Box<dyn Flowable>, Box<dyn Flowable>)> {
        self.split_lines(avail_width, avail_height, false)
    }

    fn split_forced(
        &self,
        avail_width: Pt,
        avail_height: Pt,
    ) -> Option<(Box<dyn Flowable>, Box<dyn Flowable>)> {
        self.split_lines(avail_width, avail_height, true)
    }

    fn content_widths(&self) -> (Pt, Pt) {
        let line = LineBuilder::new(&self.runs, &self.metrics);
        let mut min = Pt::ZERO;
        let mut max = Pt::ZERO;
        let mut current = Pt::ZERO;
        let mut gap = Pt::ZERO;
        for token in self.tokens() {
            match token {
                Token::Word(frags) => {
                    let width: Pt = frags.iter().map(|f| line.fragment_advance(f)).sum();
                    min = min.max(width);
                    current += gap + width;
                    gap = Pt::ZERO;
                }
                Token::Space(run) => gap = line.measure(run, " "),
                Token::Break => {
                    max = max.max(current);
                    current = Pt::ZERO;
                    gap = Pt::ZERO;
                }
            }
        }
        max = max.max(current);
        if self.preserve_whitespace {
            min = max;
        }
        (min, max)
    }

    fn first_baseline(&self, avail_width: Pt) -> Option<Pt> {
        self.layout_lines(avail_width).first().map(|line| line.baseline)
    }

    fn draw(&self, canvas: &mut Canvas, x: Pt, y: Pt, avail_width: Pt, _avail_height: Pt) {
        let lines = self.layout_lines(avail_width);
        let mut top = y;
        for line in lines.iter() {
            let extra = (avail_width - line.width).max(Pt::ZERO);
            let (offset, word_spacing) = match self.align {
                TextAlignMode::Left => (Pt::ZERO, Pt::ZERO),
                TextAlignMode::Center => (extra.mul_ratio(1, 2), Pt::ZERO),
                TextAlignMode::Right => (extra, Pt::ZERO),
                TextAlignMode::Justify => {
                    if line.justify && line.gaps > 0 {
                        (Pt::ZERO, extra / line.gaps as i32)
                    } else {
                        (Pt::ZERO, Pt::ZERO)
                    }
                }
            };
            let baseline = top + line.baseline;
            for segment in &line.segments {
                let style = &self.runs[segment.run].style;
                let seg_x = x + offset + segment.x + word_spacing * segment.gaps_before as i32;
                let seg_width = segment.width + word_spacing * segment.inner_spaces as i32;
                if let Some(highlight) = style.highlight {
                    let box_x = seg_x - segment.pad_before;
                    let box_y = baseline - style.ascent() - highlight.pad_y;
                    let box_w = segment.pad_before + seg_width + segment.pad_after;
                    let box_h = style.ascent() + style.descent() + highlight.pad_y * 2;
                    if let Some(background) = highlight.background {
                        canvas.fill_rect(box_x, box_y, box_w, box_h, background);
                    }
                    if let Some((width, color)) = highlight.border {
                        canvas.set_stroke_color(color);
                        canvas.set_line_width(width);
                        canvas.draw_rect(box_x, box_y, box_w, box_h);
                        canvas.stroke();
                    }
                }
                canvas.set_fill_color(style.color);
                canvas.set_font(style.font, style.font_size);
                canvas.draw_string_spaced(seg_x, baseline, segment.text.clone(), word_spacing);
                draw_text_decorations(canvas, style, seg_x, baseline, seg_width);
            }
            top += line.height;
        }
    }

    fn pagination(&self) -> Pagination {
        self.pagination
    }
}

fn draw_text_decorations(canvas: &mut Canvas, style: &TextStyle, x: Pt, baseline: Pt, width: Pt) {
    if !style.underline && !style.line_through {
        return;
    }
    canvas.set_stroke_color(style.color);
    canvas.set_line_width(style.font_size.mul_ratio(1, 18));
    if style.underline {
        let y = baseline + style.font_size.mul_ratio(1, 10);
        canvas.stroke_line(x, y, x + width, y);
    }
    if style.line_through {
        let y = baseline - style.font_size.mul_ratio(3, 10);
        canvas.stroke_line(x, y, x + width, y);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ListMarker {
    Bullet {
        kind: ListStyleKind,
        color: Color,
        font_size: Pt,
    },
    Text(TextRun),
}

#[derive(Debug, Clone, Default, PartialEq)]
struct BlockLayout {
    avail_width: Pt,
    content_width: Pt,
    offsets: Vec<Pt>,
    heights: Vec<Pt>,
    content_height: Pt,
}

/// Children of one block fragment: an optional leftover piece of a child split
/// on the previous page, a window onto the list shared by every fragment of
/// the block, and an optional first piece of a child split at the page end.
#[derive(Clone)]
struct ChildList {
    lead: Option<Box<dyn Flowable>>,
    shared: Arc<Vec<Box<dyn Flowable>>>,
    range: Range<usize>,
    trail: Option<Box<dyn Flowable>>,
}

impl Default for ChildList {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl ChildList {
    fn new(children: Vec<Box<dyn Flowable>>) -> Self {
        Self {
            lead: None,
            range: 0..children.len(),
            shared: Arc::new(children),
            trail: None,
        }
    }

    fn len(&self) -> usize {
        usize::from(self.lead.is_some()) + self.range.len() + usize::from(self.trail.is_some())
    }

    fn get(&self, index: usize) -> Option<&dyn Flowable> {
        let mut index = index;
        if let Some(lead) = &self.lead {
            if index == 0 {
                return Some(&**lead);
            }
            index -= 1;
        }
        if index < self.range.len() {
            return self.shared.get(self.range.start + index).map(|child| &**child);
        }
        if index == self.range.len() {
            return self.trail.as_deref();
        }
        None
    }

    fn first(&self) -> Option<&dyn Flowable> {
        self.get(0)
    }

    fn last(&self) -> Option<&dyn Flowable> {
        self.len().checked_sub(1).and_then(|index| self.get(index))
    }

    fn iter(&self) -> impl Iterator<Item = &(dyn Flowable + 'static)> + '_ {
        self.lead
            .as_deref()
            .into_iter()
            .chain(self.shared[self.range.clone()].iter().map(|child| &**child))
            .chain(self.trail.as_deref())
    }

    fn collect_boxed(&self, count: usize) -> Vec<Box<dyn Flowable>> {
        self.iter().take(count).map(|child| child.clone_box()).collect()
    }

    /// Children `[0, count)` followed by `trail`.
    fn prefix(&self, count: usize, trail: Option<Box<dyn Flowable>>) -> ChildList {
        let keeps_trail = self.trail.is_some() && count >= self.len();
        if keeps_trail && trail.is_some() {
            let mut items = self.collect_boxed(count);
            items.extend(trail);
            return ChildList::new(items);
        }
        let lead_len = usize::from(self.lead.is_some());
        let shared_count = count.saturating_sub(lead_len).min(self.range.len());
        ChildList {
            lead: if count > 0 { self.lead.clone() } else { None },
            shared: self.shared.clone(),
            range: self.range.start..self.range.start + shared_count,
            trail: if keeps_trail { self.trail.clone() } else { trail },
        }
    }

    /// `lead` followed by children `[from, len)`.
    fn suffix(&self, from: usize, lead: Option<Box<dyn Flowable>>) -> ChildList {
        let keeps_lead = self.lead.is_some() && from == 0;
        if keeps_lead && lead.is_some() {
            let mut items: Vec<Box<dyn Flowable>> = lead.into_iter().collect();
            items.extend(self.collect_boxed(self.len()));
            return ChildList::new(items);
        }
        let lead_len = usize::from(self.lead.is_some());
        let skip = from.saturating_sub(lead_len).min(self.range.len());
        let keeps_trail = self.trail.is_some() && from < self.len();
        ChildList {
            lead: if keeps_lead { self.lead.clone() } else { lead },
            shared: self.shared.clone(),
            range: self.range.start + skip..self.range.end,
            trail: if keeps_trail { self.trail.clone() } else { None },
        }
    }
}

/// Block-level box: margins, borders, padding and background around stacked
/// children. List items carry their marker; headings carry an outline entry.
#[derive(Clone)]
pub struct BlockBox {
    children: ChildList,
    margin: Margins,
    padding: Margins,
    border: BorderEdges,
    color: Color,
    background: Option<Color>,
    width: WidthSpec,
    marker: Option<ListMarker>,
    bookmark: Option<(u8, String)>,
    pagination: Pagination,
    metrics: Arc<FontMetrics>,
    layout_cache: Arc<Mutex<Option<Arc<BlockLayout>>>>,
}

impl BlockBox {
    pub fn new(children: Vec<Box<dyn Flowable>>, metrics: Arc<FontMetrics>) -> Self {
        Self {
            children: ChildList::new(children),
            margin: Margins::default(),
            padding: Margins::default(),
            border: BorderEdges::default(),
            color: Color::BLACK,
            background: None,
            width: WidthSpec::Auto,
            marker: None,
            bookmark: None,
            pagination: Pagination::default(),
            metrics,
            layout_cache: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_margin(mut self, margin: Margins) -> Self {
        self.margin = margin;
        self
    }

    pub fn with_padding(mut self, padding: Margins) -> Self {
        self.padding = padding;
        self
    }

    /// `color` resolves `currentColor` borders.
    pub fn with_border(mut self, border: BorderEdges, color: Color) -> Self {
        self.border = border;
        self.color = color;
        self
    }

    pub fn with_background(mut self, background: Option<Color>) -> Self {
        self.background = background;
        self
    }

    pub fn with_width(mut self, width: WidthSpec) -> Self {
        self.width = width;
        self
    }

    pub fn with_marker(mut self, marker: Option<ListMarker>) -> Self {
        self.marker = marker;
        self
    }

    pub fn with_bookmark(mut self, level: u8, title: impl Into<String>) -> Self {
        self.bookmark = Some((level, title.into()));
        self
    }

    pub fn with_pagination(mut self, pagination: Pagination) -> Self {
        self.pagination = pagination;
        self
    }

    fn border_widths(&self) -> Margins {
        self.border.widths()
    }

    fn collapses_top(&self) -> bool {
        self.border_widths().top == Pt::ZERO && self.padding.top == Pt::ZERO
    }

    fn collapses_bottom(&self) -> bool {
        self.border_widths().bottom == Pt::ZERO && self.padding.bottom == Pt::ZERO
    }

    fn box_width(&self, avail_width: Pt) -> Pt {
        let width = match self.width {
            WidthSpec::Auto => avail_width - self.margin.left - self.margin.right,
            WidthSpec::Percent(pct) => avail_width.scale(pct / 100.0),
            WidthSpec::Absolute(width) => width.min(avail_width),
        };
        width.clamp_non_negative()
    }

    fn content_width(&self, avail_width: Pt) -> Pt {
        let border = self.border_widths();
        (self.box_width(avail_width) - border.left - border.right - self.padding.left - self.padding.right)
            .clamp_non_negative()
    }

    fn layout(&self, avail_width: Pt) -> Arc<BlockLayout> {
        if let Ok(cache) = self.layout_cache.lock() {
            if let Some(layout) = cache.as_ref() {
                if layout.avail_width == avail_width {
                    return layout.clone();
                }
            }
        }
        let content_width = self.content_width(avail_width);
        let mut offsets = Vec::with_capacity(self.children.len());
        let mut heights = Vec::with_capacity(self.children.len());
        let mut y = Pt::ZERO;
        let mut prev_bottom: Option<Pt> = None;
        for child in self.children.iter() {
            let (top, bottom) = child.vertical_margins();
            y += match prev_bottom {
                None if self.collapses_top() => Pt::ZERO,
                None => top,
                Some(prev) => prev.max(top),
            };
            let height = child.wrap(content_width, Pt::from_i32(UNBOUNDED)).height;
            offsets.push(y);
            heights.push(height);
            y += height;
            prev_bottom = Some(bottom);
        }
        if !self.collapses_bottom() {
            y += prev_bottom.unwrap_or(Pt::ZERO);
        }
        let layout = Arc::new(BlockLayout {
            avail_width,
            content_width,
            offsets,
            heights,
            content_height: y,
        });
        if let Ok(mut cache) = self.layout_cache.lock() {
            *cache = Some(layout.clone());
        }
        layout
    }

    fn border_box_height(&self, layout: &BlockLayout) -> Pt {
        let border = self.border_widths();
        border.top + self.padding.top + layout.content_height + self.padding.bottom + border.bottom
    }

    fn fragment(&self, children: ChildList, first: bool) -> BlockBox {
        let mut margin = self.margin;
        let mut padding = self.padding;
        let mut border = self.border;
        let mut pagination = self.pagination;
        if first {
            margin.bottom = Pt::ZERO;
            padding.bottom = Pt::ZERO;
            border.bottom.width = Pt::ZERO;
            pagination.break_after = BreakMode::Auto;
        } else {
            margin.top = Pt::ZERO;
            padding.top = Pt::ZERO;
            border.top.width = Pt::ZERO;
            pagination.break_before = BreakMode::Auto;
        }
        BlockBox {
            children,
            margin,
            padding,
            border,
            color: self.color,
            background: self.background,
            width: self.width,
            marker: if first { self.marker.clone() } else { None },
            bookmark: if first { self.bookmark.clone() } else { None },
            pagination,
            metrics: self.metrics.clone(),
            layout_cache: Arc::new(Mutex::new(None)),
        }
    }

    fn split_block(&self, avail_width: Pt, avail_height: Pt, forced: bool) -> Option<(BlockBox, BlockBox)> {
        let layout = self.layout(avail_width);
        let border = self.border_widths();
        let content_avail = avail_height - border.top - self.padding.top;
        if content_avail <= Pt::ZERO && !forced {
            return None;
        }
        if self.pagination.break_inside == BreakMode::Avoid && !forced {
            return None;
        }

        // Children `[0, placed)` go first, `[resume, count)` follow; `pieces`
        // holds the halves of a child divided between the two.
        let count = self.children.len();
        let mut placed = count;
        let mut resume = count;
        let mut pieces: Option<(Box<dyn Flowable>, Box<dyn Flowable>)> = None;
        let mut last_whole = false;
        for (index, child) in self.children.iter().enumerate() {
            let pagination = child.pagination();
            if index > 0 && pagination.break_before == BreakMode::Always {
                placed = index;
                resume = index;
                break;
            }
            let offset = layout.offsets[index];
            let height = layout.heights[index];
            if offset + height <= content_avail {
                last_whole = true;
                if pagination.break_after == BreakMode::Always && index + 1 < count {
                    placed = index + 1;
                    resume = index + 1;
                    break;
                }
                continue;
            }

            let child_avail = content_avail - offset;
            let must_progress = forced && index == 0;
            let child_split = if must_progress {
                child.split_forced(layout.content_width, child_avail)
            } else if pagination.break_inside != BreakMode::Avoid && child_avail > Pt::ZERO {
                child.split(layout.content_width, child_avail)
            } else {
                None
            };
            placed = index;
            resume = index + 1;
            match child_split {
                Some(pair) => {
                    pieces = Some(pair);
                    last_whole = false;
                }
                None if must_progress => {
                    placed = index + 1;
                    last_whole = true;
                }
                None => resume = index,
            }
            break;
        }

        // Keep a heading with whatever follows it.
        while last_whole
            && pieces.is_none()
            && placed > 1
            && resume < count
            && self
                .children
                .get(placed - 1)
                .is_some_and(|child| child.pagination().break_after == BreakMode::Avoid)
        {
            placed -= 1;
            resume = placed;
        }

        let (head, tail) = match pieces {
            Some((head, tail)) => (Some(head), Some(tail)),
            None => (None, None),
        };
        if (placed == 0 && head.is_none()) || (resume >= count && tail.is_none()) {
            return None;
        }
        let tail_height = tail
            .as_ref()
            .map(|piece| (placed, piece.wrap(layout.content_width, Pt::from_i32(UNBOUNDED)).height));
        let first = self.fragment(self.children.prefix(placed, head), true);
        let second = self.fragment(self.children.suffix(resume, tail), false);
        let carried = remainder_layout(&layout, resume, tail_height);
        if let Ok(mut cache) = second.layout_cache.lock() {
            *cache = Some(Arc::new(carried));
        }
        Some((first, second))
    }

    /// Paints the box with its border box stretched to `min_height` (table cells).
    pub fn draw_box(&self, canvas: &mut Canvas, x: Pt, y: Pt, avail_width: Pt, min_height: Option<Pt>) {
        let layout = self.layout(avail_width);
        let border = self.border_widths();
        let box_x = x + self.margin.left;
        let box_w = self.box_width(avail_width);
        let box_h = self
            .border_box_height(&layout)
            .max(min_height.unwrap_or(Pt::ZERO));

        if let Some((level, title)) = &self.bookmark {
            canvas.bookmark(*level, title.clone(), y);
        }
        if let Some(background) = self.background {
            canvas.fill_rect(box_x, y, box_w, box_h, background);
        }
        self.draw_borders(canvas, box_x, y, box_w, box_h);

        let content_x = box_x + border.left + self.padding.left;
        let content_y = y + border.top + self.padding.top;
        if let Some(marker) = &self.marker {
            let baseline = content_y
                + self
                    .first_child_baseline(&layout)
                    .unwrap_or_else(|| marker_font_size(marker));
            draw_marker(canvas, marker, box_x, baseline, &self.metrics);
        }
        for (index, child) in self.children.iter().enumerate() {
            child.draw(
                canvas,
                content_x,
                content_y + layout.offsets[index],
                layout.content_width,
                layout.heights[index],
            );
        }
    }

    fn first_child_baseline(&self, layout: &BlockLayout) -> Option<Pt> {
        let child = self.children.first()?;
        Some(layout.offsets[0] + child.first_baseline(layout.content_width)?)
    }

    fn draw_borders(&self, canvas: &mut Canvas, x: Pt, y: Pt, width: Pt, height: Pt) {
        let widths = self.border_widths();
        let sides = [
            (&self.border.top, x, y, width, widths.top),
            (&self.border.bottom, x, y + height - widths.bottom, width, widths.bottom),
        ];
        for (side, sx, sy, sw, thickness) in sides {
            if thickness <= Pt::ZERO {
                continue;
            }
            let color = side.color.unwrap_or(self.color);
            match side.style {
                BorderLineStyle::Solid | BorderLineStyle::None => {
                    canvas.fill_rect(sx, sy, sw, thickness, color)
                }
                BorderLineStyle::Dashed | BorderLineStyle::Dotted => {
                    let mid = sy + thickness.mul_ratio(1, 2);
                    stroke_patterned(canvas, side.style, color, thickness, (sx, mid), (sx + sw, mid));
                }
            }
        }
        let verticals = [
            (&self.border.left, x, widths.left),
            (&self.border.right, x + width - widths.right, widths.right),
        ];
        for (side, sx, thickness) in verticals {
            if thickness <= Pt::ZERO {
                continue;
            }
            let color = side.color.unwrap_or(self.color);
            match side.style {
                BorderLineStyle::Solid | BorderLineStyle::None => {
                    canvas.fill_rect(sx, y, thickness, height, color)
                }
                BorderLineStyle::Dashed | BorderLineStyle::Dotted => {
                    let mid = sx + thickness.mul_ratio(1, 2);
                    stroke_patterned(canvas, side.style, color, thickness, (mid, y), (mid, y + height));
                }
            }
        }
    }
}

/// Layout of the second fragment of a split, derived from the parent's so the
/// remainder is never measured again. `lead` is the index of a divided child
/// and the height of its leftover piece.
fn remainder_layout(layout: &BlockLayout, resume: usize, lead: Option<(usize, Pt)>) -> BlockLayout {
    let rest = resume.min(layout.offsets.len());
    let mut offsets = Vec::with_capacity(layout.offsets.len() - rest + 1);
    let mut heights = Vec::with_capacity(offsets.capacity());
    let (shift, base) = match lead {
        Some((index, height)) => {
            offsets.push(Pt::ZERO);
            heights.push(height);
            (height, layout.offsets[index] + layout.heights[index])
        }
        None => (
            Pt::ZERO,
            layout.offsets.get(rest).copied().unwrap_or(layout.content_height),
        ),
    };
    for index in rest..layout.offsets.len() {
        offsets.push(shift + layout.offsets[index] - base);
        heights.push(layout.heights[index]);
    }
    BlockLayout {
        avail_width: layout.avail_width,
        content_width: layout.content_width,
        offsets,
        heights,
        content_height: shift + layout.content_height - base,
    }
}

fn stroke_patterned(
    canvas: &mut Canvas,
    style: BorderLineStyle,
    color: Color,
    thickness: Pt,
    from: (Pt, Pt),
    to: (Pt, Pt),
) {
    let dash = match style {
        BorderLineStyle::Dotted => thickness,
        _ => thickness * 3,
    };
    canvas.save_state();
    canvas.set_stroke_color(color);
    canvas.set_line_width(thickness);
    canvas.set_dash(vec![dash, dash], Pt::ZERO);
    canvas.stroke_line(from.0, from.1, to.0, to.1);
    canvas.restore_state();
}

fn marker_font_size(marker: &ListMarker) -> Pt {
    match marker {
        ListMarker::Bullet { font_size, .. } => *font_size,
        ListMarker::Text(run) => run.style.font_size,
    }
}

fn draw_marker(canvas: &mut Canvas, marker: &ListMarker, box_x: Pt, baseline: Pt, metrics: &FontMetrics) {
    match marker {
        ListMarker::Bullet {
            kind,
            color,
            font_size,
        } => {
            let radius = font_size.mul_ratio(1, 6);
            let cx = box_x - font_size.mul_ratio(3, 4);
            let cy = baseline - font_size.mul_ratio(1, 3);
            match kind {
                ListStyleKind::Disc => {
                    canvas.set_fill_color(*color);
                    canvas.fill_circle(cx, cy, radius);
                }
                ListStyleKind::Circle => {
                    canvas.set_stroke_color(*color);
                    canvas.set_line_width(font_size.mul_ratio(1, 16));
                    canvas.stroke_circle(cx, cy, radius);
                }
                ListStyleKind::Square => {
                    canvas.fill_rect(cx - radius, cy - radius, radius * 2, radius * 2, *color);
                }
                ListStyleKind::Decimal | ListStyleKind::None => {}
            }
        }
        ListMarker::Text(run) => {
            let width = metrics.measure(run.style.font, run.style.font_size, &run.text);
            let x = box_x - run.style.font_size.mul_ratio(1, 2) - width;
            canvas.set_fill_color(run.style.color);
            canvas.set_font(run.style.font, run.style.font_size);
            canvas.draw_string(x, baseline, run.text.clone());
        }
    }
}

impl Flowable for BlockBox {
    fn wrap(&self, avail_width: Pt, _avail_height: Pt) -> Size {
        let layout = self.layout(avail_width);
        Size {
            width: self.box_width(avail_width) + self.margin.left + self.margin.right,
            height: self.border_box_height(&layout),
        }
    }

    fn split(
        &self,
        avail_width: Pt,
        avail_height: Pt,
    ) -> Option<(Box<dyn Flowable>, Box<dyn Flowable>)> {
        let (first, second) = self.split_block(avail_width, avail_height, false)?;
        Some((Box::new(first), Box::new(second)))
    }

    fn split_forced(
        &self,
        avail_width: Pt,
        avail_height: Pt,
    ) -> Option<(Box<dyn Flowable>, Box<dyn Flowable>)> {
        let (first, second) = self.split_block(avail_width, avail_height, true)?;
        Some((Box::new(first), Box::new(second)))
    }

    fn vertical_margins(&self) -> (Pt, Pt) {
        let mut top = self.margin.top;
        let mut bottom = self.margin.bottom;
        if self.collapses_top() {
            if let Some(first) = self.children.first() {
                top = top.max(first.vertical_margins().0);
            }
        }
        if self.collapses_bottom() {
            if let Some(last) = self.children.last() {
                bottom = bottom.max(last.vertical_margins().1);
            }
        }
        (top, bottom)
    }

    fn content_widths(&self) -> (Pt, Pt) {
        let border = self.border_widths();
        let extra = self.margin.left
            + self.margin.right
            + border.left
            + border.right
            + self.padding.left
            + self.padding.right;
        if let WidthSpec::Absolute(width) = self.width {
            return (width + self.margin.left + self.margin.right, width + self.margin.left + self.margin.right);
        }
        let (min, max) = self
            .children
            .iter()
            .map(|child| child.content_widths())
            .fold((Pt::ZERO, Pt::ZERO), |(min, max), (cmin, cmax)| {
                (min.max(cmin), max.max(cmax))
            });
        (min + extra, max + extra)
    }

    fn first_baseline(&self, avail_width: Pt) -> Option<Pt> {
        let layout = self.layout(avail_width);
        let border = self.border_widths();
        Some(border.top + self.padding.top + self.first_child_baseline(&layout)?)
    }

    fn draw(&self, canvas: &mut Canvas, x: Pt, y: Pt, avail_width: Pt, _avail_height: Pt) {
        self.draw_box(canvas, x, y, avail_width, None);
    }

    fn pagination(&self) -> Pagination {
        let mut pagination = self.pagination;
        if pagination.break_before == BreakMode::Auto {
            if let Some(first) = self.children.first() {
                pagination.break_before = first.pagination().break_before;
            }
        }
        if pagination.break_after == BreakMode::Auto {
            if let Some(last) = self.children.last() {
                pagination.break_after = last.pagination().break_after;
            }
        }
        pagination
    }
}

#[derive(Clone)]
pub struct TableRow {
    pub cells: Vec<BlockBox>,
    pub background: Option<Color>,
}

impl TableRow {
    pub fn new(cells: Vec<BlockBox>, background: Option<Color>) -> Self {
        Self { cells, background }
    }
}

/// Min/max content widths per column over every row of the table.
#[derive(Debug)]
struct ColumnExtents {
    mins: Vec<Pt>,
    maxs: Vec<Pt>,
}

/// Row heights at one available width. `prefix[i]` is the height of rows
/// `[0, i)` of the shared body.
#[derive(Debug)]
struct RowHeights {
    avail_width: Pt,
    header: Pt,
    prefix: Vec<Pt>,
}

impl RowHeights {
    fn span(&self, range: &Range<usize>) -> Pt {
        self.prefix[range.end] - self.prefix[range.start]
    }
}

/// Table with content-sized columns. Splits between rows and repeats the
/// header rows on every continuation page. A row taller than a page is
/// divided cell by cell.
///
/// Fragments share the row lists, the column extents and the row heights
/// with the table they were split from, so columns line up across pages.
#[derive(Clone)]
pub struct TableFlowable {
    header: Arc<Vec<TableRow>>,
    rows: Arc<Vec<TableRow>>,
    range: Range<usize>,
    lead: Option<TableRow>,
    margin: Margins,
    width: WidthSpec,
    pagination: Pagination,
    extents: Arc<Mutex<Option<Arc<ColumnExtents>>>>,
    heights: Arc<Mutex<Option<Arc<RowHeights>>>>,
}

impl TableFlowable {
    pub fn new(header: Vec<TableRow>, body: Vec<TableRow>) -> Self {
        Self {
            header: Arc::new(header),
            range: 0..body.len(),
            rows: Arc::new(body),
            lead: None,
            margin: Margins::default(),
            width: WidthSpec::Auto,
            pagination: Pagination::default(),
            extents: Arc::new(Mutex::new(None)),
            heights: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_margin(mut self, margin: Margins) -> Self {
        self.margin = margin;
        self
    }

    pub fn with_width(mut self, width: WidthSpec) -> Self {
        self.width = width;
        self
    }

    pub fn with_pagination(mut self, pagination: Pagination) -> Self {
        self.pagination = pagination;
        self
    }

    /// Body rows carried by this fragment, a partially placed row included.
    pub fn body_rows(&self) -> usize {
        usize::from(self.lead.is_some()) + self.range.len()
    }

    fn body(&self) -> impl Iterator<Item = &TableRow> + '_ {
        self.lead.iter().chain(self.rows[self.range.clone()].iter())
    }

    fn extents(&self) -> Arc<ColumnExtents> {
        if let Ok(cache) = self.extents.lock() {
            if let Some(extents) = cache.as_ref() {
                return extents.clone();
            }
        }
        let columns = self
            .header
            .iter()
            .chain(self.rows.iter())
            .map(|row| row.cells.len())
            .max()
            .unwrap_or(0);
        let mut mins = vec![Pt::ZERO; columns];
        let mut maxs = vec![Pt::ZERO; columns];
        for row in self.header.iter().chain(self.rows.iter()) {
            for (index, cell) in row.cells.iter().enumerate() {
                let (min, max) = cell.content_widths();
                mins[index] = mins[index].max(min);
                maxs[index] = maxs[index].max(max);
            }
        }
        let extents = Arc::new(ColumnExtents { mins, maxs });
        if let Ok(mut cache) = self.extents.lock() {
            *cache = Some(extents.clone());
        }
        extents
    }

    fn table_width(&self, avail_width: Pt) -> Pt {
        let avail = (avail_width - self.margin.left - self.margin.right).clamp_non_negative();
        match self.width {
            WidthSpec::Percent(pct) => avail_width.scale(pct / 100.0).min(avail),
            WidthSpec::Absolute(width) => width.min(avail),
            WidthSpec::Auto => avail,
        }
    }

    fn column_widths(&self, avail_width: Pt) -> Vec<Pt> {
        let extents = self.extents();
        let target = self.table_width(avail_width);
        let fill = !matches!(self.width, WidthSpec::Auto);
        distribute_columns(&extents.mins, &extents.maxs, target, fill)
    }

    fn row_heights(&self, avail_width: Pt, widths: &[Pt]) -> Arc<RowHeights> {
        if let Ok(cache) = self.heights.lock() {
            if let Some(heights) = cache.as_ref() {
                if heights.avail_width == avail_width {
                    return heights.clone();
                }
            }
        }
        let mut prefix = Vec::with_capacity(self.rows.len() + 1);
        let mut total = Pt::ZERO;
        prefix.push(total);
        for row in self.rows.iter() {
            total += Self::row_height(row, widths);
            prefix.push(total);
        }
        let heights = Arc::new(RowHeights {
            avail_width,
            header: Self::rows_height(&self.header, widths),
            prefix,
        });
        if let Ok(mut cache) = self.heights.lock() {
            *cache = Some(heights.clone());
        }
        heights
    }

    fn row_height(row: &TableRow, widths: &[Pt]) -> Pt {
        row.cells
            .iter()
            .zip(widths.iter())
            .map(|(cell, width)| cell.wrap(*width, Pt::from_i32(UNBOUNDED)).height)
            .fold(Pt::ZERO, Pt::max)
    }

    fn rows_height(rows: &[TableRow], widths: &[Pt]) -> Pt {
        rows.iter().map(|row| Self::row_height(row, widths)).sum()
    }

    fn lead_height(&self, widths: &[Pt]) -> Pt {
        self.lead
            .as_ref()
            .map_or(Pt::ZERO, |row| Self::row_height(row, widths))
    }

    fn window(&self, lead: Option<TableRow>, range: Range<usize>, first: bool) -> TableFlowable {
        let mut margin = self.margin;
        let mut pagination = self.pagination;
        if first {
            margin.bottom = Pt::ZERO;
            pagination.break_after = BreakMode::Auto;
        } else {
            margin.top = Pt::ZERO;
            pagination.break_before = BreakMode::Auto;
        }
        TableFlowable {
            header: self.header.clone(),
            rows: self.rows.clone(),
            range,
            lead,
            margin,
            width: self.width,
            pagination,
            extents: self.extents.clone(),
            heights: self.heights.clone(),
        }
    }

    /// Divides the first body row at `room`: cells that fit go whole into the
    /// first half and leave an empty cell behind.
    fn split_leading_row(&self, row: &TableRow, widths: &[Pt], room: Pt) -> Option<(TableRow, TableRow)> {
        if room <= Pt::ZERO {
            return None;
        }
        let mut divided = false;
        let mut firsts = Vec::with_capacity(row.cells.len());
        let mut rests = Vec::with_capacity(row.cells.len());
        for (cell, width) in row.cells.iter().zip(widths.iter()) {
            let fits = cell.wrap(*width, Pt::from_i32(UNBOUNDED)).height <= room;
            let pieces = if fits { None } else { cell.split_block(*width, room, true) };
            match pieces {
                Some((head, tail)) => {
                    divided = true;
                    firsts.push(head);
                    rests.push(tail);
                }
                None => {
                    firsts.push(cell.fragment(cell.children.clone(), true));
                    rests.push(cell.fragment(ChildList::default(), false));
                }
            }
        }
        if !divided {
            return None;
        }
        Some((
            TableRow::new(firsts, row.background),
            TableRow::new(rests, row.background),
        ))
    }

    fn split_rows(
        &self,
        avail_width: Pt,
        avail_height: Pt,
        forced: bool,
    ) -> Option<(TableFlowable, TableFlowable)> {
        let widths = self.column_widths(avail_width);
        let heights = self.row_heights(avail_width, &widths);
        let total = self.body_rows();
        let lead_len = usize::from(self.lead.is_some());
        let lead_height = self.lead_height(&widths);
        // Height of the header plus the first `count` body rows.
        let height_at = |count: usize| {
            let lead = if count > 0 { lead_height } else { Pt::ZERO };
            let shared = count.saturating_sub(lead_len).min(self.range.len());
            heights.header + lead + heights.span(&(self.range.start..self.range.start + shared))
        };

        let mut fit = 0usize;
        while fit < total && height_at(fit + 1) <= avail_height {
            fit += 1;
        }
        if fit >= total {
            return None;
        }
        if fit == 0 {
            if !forced {
                return None;
            }
            let row = self.body().next()?;
            if let Some((head, tail)) = self.split_leading_row(row, &widths, avail_height - heights.header) {
                let rest_start = if self.lead.is_some() { self.range.start } else { self.range.start + 1 };
                let first = self.window(Some(head), self.range.start..self.range.start, true);
                let second = self.window(Some(tail), rest_start..self.range.end, false);
                return Some((first, second));
            }
            if total < 2 {
                return None;
            }
            fit = 1;
        }

        let shared_fit = fit - lead_len;
        let split_at = self.range.start + shared_fit;
        let first = self.window(self.lead.clone(), self.range.start..split_at, true);
        let second = self.window(None, split_at..self.range.end, false);
        Some((first, second))
    }
}

/// Column widths: every column gets its min-content width, leftover space
/// goes out in proportion to how much each column wants beyond that.
fn distribute_columns(mins: &[Pt], maxs: &[Pt], target: Pt, fill: bool) -> Vec<Pt> {
    let count = mins.len();
    if count == 0 {
        return Vec::new();
    }
    let min_total: Pt = mins.iter().copied().sum();
    let max_total: Pt = maxs.iter().copied().sum();
    if max_total <= target {
        if !fill || max_total <= Pt::ZERO {
            if fill {
                return vec![target / count as i32; count];
            }
            return maxs.to_vec();
        }
        let extra = target - max_total;
        let max_milli = max_total.to_milli().max(1);
        return maxs
            .iter()
            .map(|max| *max + Pt::from_milli(extra.to_milli() * max.to_milli() / max_milli))
            .collect();
    }
    if min_total >= target {
        let min_milli = min_total.to_milli().max(1);
        return mins
            .iter()
            .map(|min| Pt::from_milli(target.to_milli() * min.to_milli() / min_milli))
            .collect();
    }
    let spare = target - min_total;
    let want: i64 = mins
        .iter()
        .zip(maxs.iter())
        .map(|(min, max)| (*max - *min).max(Pt::ZERO).to_milli())
        .sum::<i64>()
        .max(1);
    mins.iter()
        .zip(maxs.iter())
        .map(|(min, max)| {
            let wish = (*max - *min).max(Pt::ZERO).to_milli();
            *min + Pt::from_milli(spare.to_milli() * wish / want)
        })
        .collect()
}

impl Flowable for TableFlowable {
    fn wrap(&self, avail_width: Pt, _avail_height: Pt) -> Size {
        let widths = self.column_widths(avail_width);
        let heights = self.row_heights(avail_width, &widths);
        let height = heights.header + self.lead_height(&widths) + heights.span(&self.range);
        Size {
            width: widths.iter().copied().sum::<Pt>() + self.margin.left + self.margin.right,
            height,
        }
    }

    fn split(
        &self,
        avail_width: Pt,
        avail_height: Pt,
    ) -> Option<(Box<dyn Flowable>, Box<dyn Flowable>)> {
        let (first, second) = self.split_rows(avail_width, avail_height, false)?;
        Some((Box::new(first), Box::new(second)))
    }

    fn split_forced(
        &self,
        avail_width: Pt,
        avail_height: Pt,
    ) -> Option<(Box<dyn Flowable>, Box<dyn Flowable>)> {
        let (first, second) = self.split_rows(avail_width, avail_height, true)?;
        Some((Box::new(first), Box::new(second)))
    }

    fn vertical_margins(&self) -> (Pt, Pt) {
        (self.margin.top, self.margin.bottom)
    }

    fn content_widths(&self) -> (Pt, Pt) {
        let extents = self.extents();
        let horizontal = self.margin.left + self.margin.right;
        (
            extents.mins.iter().copied().sum::<Pt>() + horizontal,
            extents.maxs.iter().copied().sum::<Pt>() + horizontal,
        )
    }

    fn first_baseline(&self, avail_width: Pt) -> Option<Pt> {
        let widths = self.column_widths(avail_width);
        let row = self.header.first().or_else(|| self.body().next())?;
        row.cells
            .iter()
            .zip(widths.iter())
            .filter_map(|(cell, width)| cell.first_baseline(*width))
            .next()
    }

    fn draw(&self, canvas: &mut Canvas, x: Pt, y: Pt, avail_width: Pt, _avail_height: Pt) {
        let widths = self.column_widths(avail_width);
        let heights = self.row_heights(avail_width, &widths);
        let table_width: Pt = widths.iter().copied().sum();
        let left = x + self.margin.left;
        let mut top = y;
        let header = self.header.iter().map(|row| (row, Self::row_height(row, &widths)));
        let lead = self.lead.iter().map(|row| (row, Self::row_height(row, &widths)));
        let shared = self.range.clone().map(|index| {
            (&self.rows[index], heights.prefix[index + 1] - heights.prefix[index])
        });
        for (row, height) in header.chain(lead).chain(shared) {
            if let Some(background) = row.background {
                canvas.fill_rect(left, top, table_width, height, background);
            }
            let mut cell_x = left;
            for (cell, width) in row.cells.iter().zip(widths.iter()) {
                cell.draw_box(canvas, cell_x, top, *width, Some(height));
                cell_x += *width;
            }
            top += height;
        }
    }

    fn pagination(&self) -> Pagination {
        self.pagination
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::style::BorderSide;

    fn metrics() -> Arc<FontMetrics> {
        Arc::new(FontMetrics::default())
    }

    fn style(size: i32) -> TextStyle {
        TextStyle {
            font: Base14Font::Courier,
            font_size: Pt::from_i32(size),
            line_height: Pt::from_i32(size + 2),
            ..TextStyle::default()
        }
    }

    fn text(value: &str, size: i32) -> InlineItem {
        InlineItem::Text(TextRun {
            text: value.to_string(),
            style: style(size),
        })
    }

    fn paragraph(value: &str) -> Paragraph {
        Paragraph::new(vec![text(value, 10)], style(10), metrics())
    }

    #[test]
    fn whitespace_collapses_between_runs() {
        let para = Paragraph::new(
            vec![text("  alpha   ", 10), text("  beta", 10)],
            style(10),
            metrics(),
        );
        let lines = para.layout_lines(Pt::from_i32(500));
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].segments.len(), 1);
        assert_eq!(lines[0].segments[0].text, "alpha beta");
        // Courier: ten glyphs at 6pt each.
        assert_eq!(lines[0].width, Pt::from_i32(60));
    }

    #[test]
    fn words_wrap_at_available_width() {
        let para = paragraph("aaaa bbbb cccc");
        // Each word is 24pt wide, a space 6pt.
        let lines = para.layout_lines(Pt::from_i32(60));
        let texts: Vec<&str> = lines.iter().map(|l| l.segments[0].text.as_str()).collect();
        assert_eq!(texts, vec!["aaaa bbbb", "cccc"]);
        assert!(lines[0].justify);
        assert!(!lines[1].justify);
        assert_eq!(para.wrap(Pt::from_i32(60), Pt::from_i32(100)).height, Pt::from_i32(24));
    }

    #[test]
    fn overlong_word_breaks_by_character() {
        let para = paragraph("abcdefghij");
        let lines = para.layout_lines(Pt::from_i32(30));
        let texts: Vec<&str> = lines.iter().map(|l| l.segments[0].text.as_str()).collect();
        assert_eq!(texts, vec!["abcde", "fghij"]);
    }

    #[test]
    fn line_break_items_force_new_lines() {
        let para = Paragraph::new(
            vec![text("one", 10), InlineItem::LineBreak, text("two", 10)],
            style(10),
            metrics(),
        );
        assert_eq!(para.layout_lines(Pt::from_i32(500)).len(), 2);
    }

    #[test]
    fn preformatted_keeps_spaces_and_drops_final_newline() {
        let para = paragraph("a  b\n  c\n").with_whitespace(true);
        let lines = para.layout_lines(Pt::from_i32(500));
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].segments[0].text, "a  b");
        assert_eq!(lines[1].segments[0].text, "  c");
    }

    #[test]
    fn paragraph_split_respects_orphans_and_widows() {
        let para = paragraph("aaaa bbbb cccc dddd eeee");
        let width = Pt::from_i32(30);
        assert_eq!(para.layout_lines(width).len(), 5);
        // Room for one line only: orphans forbid the split.
        assert!(para.split(width, Pt::from_i32(12)).is_none());
        // Room for four lines: one widow would remain, so only three go first.
        let (first, second) = para.split(width, Pt::from_i32(48)).expect("split");
        assert_eq!(first.wrap(width, Pt::ZERO).height, Pt::from_i32(36));
        assert_eq!(second.wrap(width, Pt::ZERO).height, Pt::from_i32(24));
        // A forced split always makes progress.
        let (first, _) = para.split_forced(width, Pt::from_i32(12)).expect("forced");
        assert_eq!(first.wrap(width, Pt::ZERO).height, Pt::from_i32(12));
    }

    #[test]
    fn justified_lines_spread_word_spacing() {
        let para = paragraph("aa bb cc dd").with_align(TextAlignMode::Justify);
        let mut canvas = Canvas::new(Size::a4());
        para.draw(&mut canvas, Pt::ZERO, Pt::ZERO, Pt::from_i32(54), Pt::from_i32(100));
        let doc = canvas.finish();
        let spacing: Vec<Pt> = doc.pages[0]
            .commands
            .iter()
            .filter_map(|cmd| match cmd {
                crate::canvas::Command::DrawString { word_spacing, .. } => Some(*word_spacing),
                _ => None,
            })
            .collect();
        // "aa bb cc" is 48pt on a 54pt line with two gaps; the last line is not stretched.
        assert_eq!(spacing, vec![Pt::from_i32(3), Pt::ZERO]);
    }

    #[test]
    fn highlighted_runs_get_padding() {
        let mut code = style(10);
        code.highlight = Some(InlineHighlight {
            background: Some(Color::WHITE),
            pad_x: Pt::from_i32(2),
            pad_y: Pt::from_i32(1),
            border: None,
        });
        let para = Paragraph::new(
            vec![
                text("x ", 10),
                InlineItem::Text(TextRun {
                    text: "code".to_string(),
                    style: code,
                }),
            ],
            style(10),
            metrics(),
        );
        let lines = para.layout_lines(Pt::from_i32(500));
        // 6 (x) + 6 (space) + 2 + 24 + 2
        assert_eq!(lines[0].width, Pt::from_i32(40));
        assert_eq!(lines[0].segments[1].x, Pt::from_i32(14));
    }

    #[test]
    fn block_margins_collapse_between_siblings_and_through_parent() {
        let child = |top: i32, bottom: i32| -> Box<dyn Flowable> {
            Box::new(
                BlockBox::new(vec![Box::new(paragraph("abc"))], metrics()).with_margin(Margins {
                    top: Pt::from_i32(top),
                    bottom: Pt::from_i32(bottom),
                    ..Margins::default()
                }),
            )
        };
        let parent = BlockBox::new(vec![child(10, 8), child(5, 3)], metrics());
        assert_eq!(parent.vertical_margins(), (Pt::from_i32(10), Pt::from_i32(3)));
        // 12 + max(8, 5) + 12
        assert_eq!(parent.wrap(Pt::from_i32(200), Pt::ZERO).height, Pt::from_i32(32));

        let bordered = BlockBox::new(vec![child(10, 8)], metrics()).with_border(
            BorderEdges {
                top: BorderSide {
                    width: Pt::from_i32(1),
                    style: BorderLineStyle::Solid,
                    color: None,
                },
                ..BorderEdges::default()
            },
            Color::BLACK,
        );
        assert_eq!(bordered.vertical_margins(), (Pt::ZERO, Pt::from_i32(8)));
        assert_eq!(bordered.wrap(Pt::from_i32(200), Pt::ZERO).height, Pt::from_i32(23));
    }

    #[test]
    fn block_split_keeps_heading_with_next_block() {
        let heading = paragraph("head").with_pagination(Pagination {
            break_after: BreakMode::Avoid,
            ..Pagination::default()
        });
        let parent = BlockBox::new(
            vec![
                Box::new(paragraph("one")),
                Box::new(heading),
                Box::new(paragraph("two")),
            ],
            metrics(),
        );
        let (first, second) = parent.split(Pt::from_i32(200), Pt::from_i32(30)).expect("split");
        assert_eq!(first.wrap(Pt::from_i32(200), Pt::ZERO).height, Pt::from_i32(12));
        assert_eq!(second.wrap(Pt::from_i32(200), Pt::ZERO).height, Pt::from_i32(24));
    }

    #[test]
    fn forced_break_before_splits_block() {
        let breaking = paragraph("two").with_pagination(Pagination {
            break_before: BreakMode::Always,
            ..Pagination::default()
        });
        let parent = BlockBox::new(vec![Box::new(paragraph("one")), Box::new(breaking)], metrics());
        let (first, second) = parent.split(Pt::from_i32(200), Pt::from_i32(500)).expect("split");
        assert_eq!(first.wrap(Pt::from_i32(200), Pt::ZERO).height, Pt::from_i32(12));
        assert_eq!(second.wrap(Pt::from_i32(200), Pt::ZERO).height, Pt::from_i32(12));
    }

    #[test]
    fn columns_share_space_by_content() {
        let widths = distribute_columns(
            &[Pt::from_i32(10), Pt::from_i32(10)],
            &[Pt::from_i32(30), Pt::from_i32(90)],
            Pt::from_i32(60),
            false,
        );
        assert_eq!(widths, vec![Pt::from_i32(18), Pt::from_i32(42)]);
        let filled = distribute_columns(
            &[Pt::from_i32(10), Pt::from_i32(10)],
            &[Pt::from_i32(20), Pt::from_i32(20)],
            Pt::from_i32(100),
            true,
        );
        assert_eq!(filled, vec![Pt::from_i32(50), Pt::from_i32(50)]);
    }

    #[test]
    fn table_split_repeats_header() {
        let cell = |value: &str| BlockBox::new(vec![Box::new(paragraph(value))], metrics());
        let row = |value: &str| TableRow::new(vec![cell(value), cell(value)], None);
        let table = TableFlowable::new(vec![row("h")], vec![row("a"), row("b"), row("c")])
            .with_width(WidthSpec::Percent(100.0));
        let width = Pt::from_i32(200);
        assert_eq!(table.wrap(width, Pt::ZERO).height, Pt::from_i32(48));
        let (first, second) = table.split(width, Pt::from_i32(30)).expect("split");
        assert_eq!(first.wrap(width, Pt::ZERO).height, Pt::from_i32(24));
        assert_eq!(second.wrap(width, Pt::ZERO).height, Pt::from_i32(36));
        assert!(table.split(width, Pt::from_i32(20)).is_none());
    }

    fn lines_of(count: usize) -> Vec<Box<dyn Flowable>> {
        (0..count)
            .map(|i| Box::new(paragraph(&format!("linha {i}"))) as Box<dyn Flowable>)
            .collect()
    }

    fn fresh_layout(block: &BlockBox, width: Pt) -> Arc<BlockLayout> {
        BlockBox {
            layout_cache: Arc::new(Mutex::new(None)),
            ..block.clone()
        }
        .layout(width)
    }

    #[test]
    fn block_fragments_share_children() {
        let parent = BlockBox::new(lines_of(50), metrics());
        let width = Pt::from_i32(200);
        let (first, second) = parent.split_block(width, Pt::from_i32(120), false).expect("split");
        assert!(Arc::ptr_eq(&first.children.shared, &parent.children.shared));
        assert!(Arc::ptr_eq(&second.children.shared, &parent.children.shared));
        assert_eq!(first.children.len(), 10);
        assert_eq!(second.children.len(), 40);
        assert_eq!(*second.layout(width), *fresh_layout(&second, width));

        let (third, fourth) = second.split_block(width, Pt::from_i32(120), false).expect("split");
        assert!(Arc::ptr_eq(&fourth.children.shared, &parent.children.shared));
        assert_eq!(third.children.len(), 10);
        assert_eq!(fourth.wrap(width, Pt::ZERO).height, Pt::from_i32(360));
    }

    #[test]
    fn carried_layout_matches_remeasured_remainder() {
        let loose = Pagination {
            orphans: 1,
            widows: 1,
            ..Pagination::default()
        };
        let long = paragraph("aaaa bbbb cccc dddd eeee").with_pagination(loose);
        let parent = BlockBox::new(
            vec![Box::new(paragraph("a")), Box::new(long), Box::new(paragraph("z"))],
            metrics(),
        );
        let width = Pt::from_i32(60);
        assert_eq!(parent.wrap(width, Pt::ZERO).height, Pt::from_i32(60));
        let (first, second) = parent.split_block(width, Pt::from_i32(30), false).expect("split");
        assert_eq!(first.wrap(width, Pt::ZERO).height, Pt::from_i32(24));
        let carried = second.layout(width);
        assert_eq!(carried.offsets, vec![Pt::ZERO, Pt::from_i32(24)]);
        assert_eq!(carried.content_height, Pt::from_i32(36));
        assert_eq!(*carried, *fresh_layout(&second, width));
    }

    fn single_column_table(body: Vec<&str>) -> TableFlowable {
        let row = |value: &str| {
            TableRow::new(
                vec![BlockBox::new(vec![Box::new(paragraph(value))], metrics())],
                None,
            )
        };
        TableFlowable::new(vec![row("h")], body.into_iter().map(row).collect())
            .with_width(WidthSpec::Percent(100.0))
    }

    #[test]
    fn table_fragments_share_rows_and_measurements() {
        let table = single_column_table(vec!["r"; 20]);
        let width = Pt::from_i32(200);
        let (first, second) = table.split_rows(width, Pt::from_i32(60), false).expect("split");
        assert_eq!(first.body_rows(), 4);
        assert_eq!(second.body_rows(), 16);
        let (third, fourth) = second.split_rows(width, Pt::from_i32(60), false).expect("split");
        assert_eq!(third.body_rows(), 4);
        assert_eq!(fourth.wrap(width, Pt::ZERO).height, Pt::from_i32(12 + 12 * 12));
        for fragment in [&first, &second, &third, &fourth] {
            assert!(Arc::ptr_eq(&fragment.rows, &table.rows));
            assert!(Arc::ptr_eq(&fragment.heights, &table.heights));
            assert!(Arc::ptr_eq(&fragment.extents, &table.extents));
        }
    }

    #[test]
    fn tall_row_divides_its_cells() {
        let words = "abcd ".repeat(40);
        let table = single_column_table(vec![words.as_str()]);
        let width = Pt::from_i32(200);
        // Six words per line, seven lines.
        assert_eq!(table.wrap(width, Pt::ZERO).height, Pt::from_i32(12 + 84));
        assert!(table.split(width, Pt::from_i32(60)).is_none());

        let (first, second) = table.split_rows(width, Pt::from_i32(60), true).expect("split");
        assert_eq!(first.wrap(width, Pt::ZERO).height, Pt::from_i32(60));
        assert_eq!(second.wrap(width, Pt::ZERO).height, Pt::from_i32(48));
        assert_eq!(first.body_rows(), 1);
        assert_eq!(second.body_rows(), 1);
        assert_eq!(first.column_widths(width), second.column_widths(width));
    }
}
