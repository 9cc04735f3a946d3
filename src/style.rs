use crate::error::{MarkpageError, Result};
use crate::font::{FontFamily, resolve_family};
use crate::types::{Color, Margins, Pt, Size};
use lightningcss::declaration::DeclarationBlock;
use lightningcss::rules::page::{PageMarginBox, PageRule};
use lightningcss::rules::{CssRule, CssRuleList};
use lightningcss::stylesheet::{ParserOptions, PrinterOptions, StyleAttribute, StyleSheet};
use lightningcss::traits::ToCss;
use std::collections::BTreeMap;

const UA_CSS: &str = include_str!("stylesheets/ua.css");

/// Font size of the root element, used for `rem` and `medium`.
const ROOT_FONT_SIZE_PT: f32 = 12.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Specificity(u32, u32, u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Origin {
    UserAgent,
    Author,
}

#[derive(Debug, Clone, PartialEq)]
enum PseudoClass {
    NthChild { a: i32, b: i32 },
    FirstChild,
    LastChild,
    // Interactive and unsupported pseudo-classes never match on paper.
    Never,
}

impl PseudoClass {
    fn matches(&self, element: &ElementInfo) -> bool {
        match self {
            PseudoClass::NthChild { a, b } => nth_matches(*a, *b, element.sibling_index as i32),
            PseudoClass::FirstChild => element.sibling_index == 1,
            PseudoClass::LastChild => element.sibling_index == element.sibling_count,
            PseudoClass::Never => false,
        }
    }
}

fn nth_matches(a: i32, b: i32, index: i32) -> bool {
    if a == 0 {
        return index == b;
    }
    let diff = index - b;
    diff % a == 0 && diff / a >= 0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PseudoElement {
    Before,
    After,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Combinator {
    Descendant,
    Child,
}

#[derive(Debug, Clone, PartialEq, Default)]
struct CompoundSelector {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
    pseudos: Vec<PseudoClass>,
}

impl CompoundSelector {
    fn matches(&self, element: &ElementInfo) -> bool {
        if let Some(tag) = &self.tag {
            if tag != &element.tag {
                return false;
            }
        }
        if let Some(id) = &self.id {
            if element.id.as_deref() != Some(id.as_str()) {
                return false;
            }
        }
        self.classes
            .iter()
            .all(|class| element.classes.iter().any(|c| c == class))
            && self.pseudos.iter().all(|pseudo| pseudo.matches(element))
    }

    fn specificity(&self) -> Specificity {
        Specificity(
            u32::from(self.id.is_some()),
            (self.classes.len() + self.pseudos.len()) as u32,
            u32::from(self.tag.is_some()),
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Selector {
    parts: Vec<CompoundSelector>,
    combinators: Vec<Combinator>,
    pseudo_element: Option<PseudoElement>,
}

impl Selector {
    fn specificity(&self) -> Specificity {
        let mut spec = Specificity(0, 0, u32::from(self.pseudo_element.is_some()));
        for part in &self.parts {
            let part_spec = part.specificity();
            spec.0 += part_spec.0;
            spec.1 += part_spec.1;
            spec.2 += part_spec.2;
        }
        spec
    }

    /// `path` runs from the root element down to the subject element.
    fn matches(&self, path: &[ElementInfo]) -> bool {
        if path.is_empty() || self.parts.is_empty() {
            return false;
        }
        self.match_at(self.parts.len() - 1, path, path.len() - 1)
    }

    fn match_at(&self, part: usize, path: &[ElementInfo], pos: usize) -> bool {
        if !self.parts[part].matches(&path[pos]) {
            return false;
        }
        if part == 0 {
            return true;
        }
        match self.combinators[part - 1] {
            Combinator::Child => pos > 0 && self.match_at(part - 1, path, pos - 1),
            Combinator::Descendant => (0..pos).rev().any(|p| self.match_at(part - 1, path, p)),
        }
    }
}

fn parse_selector(raw: &str) -> Option<Selector> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let mut parts = Vec::new();
    let mut combinators = Vec::new();
    let mut pending: Option<Combinator> = None;
    let mut pseudo_element = None;
    let mut buf = String::new();
    let mut depth = 0usize;

    let mut flush = |buf: &mut String,
                     pending: &mut Option<Combinator>,
                     pseudo_element: &mut Option<PseudoElement>|
     -> Option<()> {
        let text = buf.trim();
        if text.is_empty() {
            buf.clear();
            return Some(());
        }
        // A pseudo-element may only sit on the subject compound.
        if pseudo_element.is_some() {
            return None;
        }
        let (compound, element) = parse_compound(text)?;
        if !parts.is_empty() {
            combinators.push(pending.take().unwrap_or(Combinator::Descendant));
        }
        parts.push(compound);
        *pseudo_element = element;
        buf.clear();
        Some(())
    };

    for ch in raw.chars() {
        match ch {
            '(' => {
                depth += 1;
                buf.push(ch);
            }
            ')' => {
                depth = depth.saturating_sub(1);
                buf.push(ch);
            }
            '>' if depth == 0 => {
                flush(&mut buf, &mut pending, &mut pseudo_element)?;
                pending = Some(Combinator::Child);
            }
            '+' | '~' if depth == 0 => return None,
            c if c.is_whitespace() && depth == 0 => {
                if !buf.trim().is_empty() {
                    flush(&mut buf, &mut pending, &mut pseudo_element)?;
                    if pending.is_none() {
                        pending = Some(Combinator::Descendant);
                    }
                }
            }
            c => buf.push(c),
        }
    }
    flush(&mut buf, &mut pending, &mut pseudo_element)?;
    if parts.is_empty() {
        return None;
    }
    Some(Selector {
        parts,
        combinators,
        pseudo_element,
    })
}

enum CompoundMode {
    Tag,
    Id,
    Class,
}

fn parse_compound(raw: &str) -> Option<(CompoundSelector, Option<PseudoElement>)> {
    let (base, pseudo_raw) = match raw.find(':') {
        Some(idx) => (&raw[..idx], Some(&raw[idx..])),
        None => (raw, None),
    };

    let mut compound = CompoundSelector::default();
    let mut mode = CompoundMode::Tag;
    let mut buffer = String::new();
    let flush = |mode: &CompoundMode, buffer: &mut String, compound: &mut CompoundSelector| {
        if buffer.is_empty() {
            return;
        }
        let value = std::mem::take(buffer);
        match mode {
            CompoundMode::Tag => {
                if value != "*" {
                    compound.tag = Some(value.to_ascii_lowercase());
                }
            }
            CompoundMode::Id => compound.id = Some(value),
            CompoundMode::Class => compound.classes.push(value),
        }
    };
    for ch in base.chars() {
        match ch {
            '#' => {
                flush(&mode, &mut buffer, &mut compound);
                mode = CompoundMode::Id;
            }
            '.' => {
                flush(&mode, &mut buffer, &mut compound);
                mode = CompoundMode::Class;
            }
            '[' | ']' => return None,
            _ => buffer.push(ch),
        }
    }
    flush(&mode, &mut buffer, &mut compound);

    let mut pseudo_element = None;
    if let Some(pseudo_raw) = pseudo_raw {
        for token in split_pseudos(pseudo_raw) {
            let name = token.trim_start_matches(':').to_ascii_lowercase();
            match name.as_str() {
                "before" => pseudo_element = Some(PseudoElement::Before),
                "after" => pseudo_element = Some(PseudoElement::After),
                "first-child" => compound.pseudos.push(PseudoClass::FirstChild),
                "last-child" => compound.pseudos.push(PseudoClass::LastChild),
                _ => {
                    if let Some(args) = name
                        .strip_prefix("nth-child(")
                        .and_then(|rest| rest.strip_suffix(')'))
                    {
                        let (a, b) = parse_nth_formula(args)?;
                        compound.pseudos.push(PseudoClass::NthChild { a, b });
                    } else {
                        compound.pseudos.push(PseudoClass::Never);
                    }
                }
            }
        }
    }
    Some((compound, pseudo_element))
}

fn split_pseudos(raw: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    for ch in raw.chars() {
        match ch {
            ':' if depth == 0 => {
                if !current.trim_start_matches(':').is_empty() {
                    out.push(std::mem::take(&mut current));
                }
                current.push(ch);
            }
            '(' => {
                depth += 1;
                current.push(ch);
            }
            ')' => {
                depth = depth.saturating_sub(1);
                current.push(ch);
            }
            _ => current.push(ch),
        }
    }
    if !current.trim_start_matches(':').is_empty() {
        out.push(current);
    }
    out
}

fn parse_nth_formula(raw: &str) -> Option<(i32, i32)> {
    let s: String = raw
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_ascii_lowercase();
    match s.as_str() {
        "even" => return Some((2, 0)),
        "odd" => return Some((2, 1)),
        "" => return None,
        _ => {}
    }
    let Some(n_pos) = s.find('n') else {
        return Some((0, s.parse().ok()?));
    };
    let (a_str, b_str) = s.split_at(n_pos);
    let a = match a_str {
        "" | "+" => 1,
        "-" => -1,
        other => other.parse().ok()?,
    };
    let b_str = &b_str[1..];
    let b = if b_str.is_empty() {
        0
    } else {
        b_str.trim_start_matches('+').parse().ok()?
    };
    Some((a, b))
}

/// What the matcher needs to know about one element.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ElementInfo {
    pub tag: String,
    pub id: Option<String>,
    pub classes: Vec<String>,
    /// 1-based position among element siblings.
    pub sibling_index: usize,
    pub sibling_count: usize,
}

#[derive(Debug, Clone, PartialEq)]
struct Declaration {
    name: String,
    value: String,
    important: bool,
}

#[derive(Debug, Clone)]
struct RuleEntry {
    selector: Selector,
    specificity: Specificity,
    origin: Origin,
    order: usize,
    declarations: Vec<Declaration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayMode {
    Block,
    Inline,
    InlineBlock,
    ListItem,
    Table,
    TableHeaderGroup,
    TableRowGroup,
    TableFooterGroup,
    TableRow,
    TableCell,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextAlignMode {
    Left,
    Center,
    Right,
    Justify,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListStyleKind {
    Disc,
    Circle,
    Square,
    Decimal,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BorderLineStyle {
    None,
    Solid,
    Dashed,
    Dotted,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BorderSide {
    pub width: Pt,
    pub style: BorderLineStyle,
    pub color: Option<Color>,
}

impl Default for BorderSide {
    fn default() -> Self {
        Self {
            width: Pt::from_f32(2.25),
            style: BorderLineStyle::None,
            color: None,
        }
    }
}

impl BorderSide {
    pub fn used_width(&self) -> Pt {
        if self.style == BorderLineStyle::None {
            Pt::ZERO
        } else {
            self.width
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BorderEdges {
    pub top: BorderSide,
    pub right: BorderSide,
    pub bottom: BorderSide,
    pub left: BorderSide,
}

impl BorderEdges {
    pub fn widths(&self) -> Margins {
        Margins {
            top: self.top.used_width(),
            right: self.right.used_width(),
            bottom: self.bottom.used_width(),
            left: self.left.used_width(),
        }
    }

    fn side_mut(&mut self, side: &str) -> Option<&mut BorderSide> {
        match side {
            "top" => Some(&mut self.top),
            "right" => Some(&mut self.right),
            "bottom" => Some(&mut self.bottom),
            "left" => Some(&mut self.left),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LineHeight {
    Normal,
    Factor(f32),
    Absolute(Pt),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakMode {
    Auto,
    Always,
    Avoid,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WidthSpec {
    Auto,
    Percent(f32),
    Absolute(Pt),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentItem {
    Text(String),
    Counter(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComputedStyle {
    pub font_size: Pt,
    pub bold: bool,
    pub italic: bool,
    pub family: FontFamily,
    pub line_height: LineHeight,
    pub color: Color,
    pub text_align: TextAlignMode,
    pub underline: bool,
    pub line_through: bool,
    pub preserve_whitespace: bool,
    pub list_style: ListStyleKind,

    pub display: DisplayMode,
    pub margin: Margins,
    pub padding: Margins,
    pub border: BorderEdges,
    pub background: Option<Color>,
    pub width: WidthSpec,
    pub break_before: BreakMode,
    pub break_after: BreakMode,
    pub break_inside: BreakMode,
    pub content: Option<Vec<ContentItem>>,
    pub counter_reset: Vec<(String, i32)>,
    pub counter_increment: Vec<(String, i32)>,
}

impl Default for ComputedStyle {
    fn default() -> Self {
        Self {
            font_size: Pt::from_f32(ROOT_FONT_SIZE_PT),
            bold: false,
            italic: false,
            family: FontFamily::SansSerif,
            line_height: LineHeight::Normal,
            color: Color::BLACK,
            text_align: TextAlignMode::Left,
            underline: false,
            line_through: false,
            preserve_whitespace: false,
            list_style: ListStyleKind::Disc,
            display: DisplayMode::Inline,
            margin: Margins::default(),
            padding: Margins::default(),
            border: BorderEdges::default(),
            background: None,
            width: WidthSpec::Auto,
            break_before: BreakMode::Auto,
            break_after: BreakMode::Auto,
            break_inside: BreakMode::Auto,
            content: None,
            counter_reset: Vec::new(),
            counter_increment: Vec::new(),
        }
    }
}

impl ComputedStyle {
    /// Starting point for a child: inherited properties copied, the rest reset.
    pub fn inherit(parent: &ComputedStyle) -> ComputedStyle {
        ComputedStyle {
            font_size: parent.font_size,
            bold: parent.bold,
            italic: parent.italic,
            family: parent.family,
            line_height: parent.line_height,
            color: parent.color,
            text_align: parent.text_align,
            underline: parent.underline,
            line_through: parent.line_through,
            preserve_whitespace: parent.preserve_whitespace,
            list_style: parent.list_style,
            ..ComputedStyle::default()
        }
    }

    pub fn resolved_line_height(&self) -> Pt {
        match self.line_height {
            LineHeight::Normal => self.font_size.mul_ratio(115, 100),
            LineHeight::Factor(factor) => self.font_size.scale(factor),
            LineHeight::Absolute(value) => value,
        }
    }

    pub fn border_color(&self, side: &BorderSide) -> Color {
        side.color.unwrap_or(self.color)
    }

    pub fn is_block_level(&self) -> bool {
        !matches!(
            self.display,
            DisplayMode::Inline | DisplayMode::InlineBlock | DisplayMode::None
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MarginBoxPosition {
    TopLeft,
    TopCenter,
    TopRight,
    BottomLeft,
    BottomCenter,
    BottomRight,
}

impl MarginBoxPosition {
    pub fn is_top(self) -> bool {
        matches!(
            self,
            MarginBoxPosition::TopLeft | MarginBoxPosition::TopCenter | MarginBoxPosition::TopRight
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MarginBoxSpec {
    pub position: MarginBoxPosition,
    pub content: Vec<ContentItem>,
    pub style: ComputedStyle,
}

/// Page geometry and running content declared by `@page`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageSetup {
    pub size: Option<Size>,
    pub margins: Option<Margins>,
    pub margin_boxes: Vec<MarginBoxSpec>,
}

#[derive(Debug, Clone)]
pub struct StyleResolver {
    rules: Vec<RuleEntry>,
    page: PageSetup,
}

impl StyleResolver {
    pub fn new(author_css: &str) -> Result<Self> {
        let mut rules = Vec::new();
        let mut order = 0usize;
        let mut page = PageSetup::default();

        let ua = StyleSheet::parse(UA_CSS, ParserOptions::default())
            .map_err(|err| MarkpageError::InvalidConfiguration(format!("ua stylesheet: {err}")))?;
        collect_rules(&ua.rules, Origin::UserAgent, &mut rules, &mut order, &mut page);

        if !author_css.trim().is_empty() {
            let sheet = StyleSheet::parse(author_css, ParserOptions::default())
                .map_err(|err| MarkpageError::InvalidConfiguration(format!("stylesheet: {err}")))?;
            collect_rules(&sheet.rules, Origin::Author, &mut rules, &mut order, &mut page);
        }
        log::debug!(
            "stylesheet loaded: {} rules, {} margin boxes",
            rules.len(),
            page.margin_boxes.len()
        );
        Ok(Self { rules, page })
    }

    pub fn page_setup(&self) -> &PageSetup {
        &self.page
    }

    pub fn compute(
        &self,
        path: &[ElementInfo],
        parent: &ComputedStyle,
        inline_style: Option<&str>,
    ) -> ComputedStyle {
        let mut matched: Vec<(&RuleEntry, &Declaration)> = Vec::new();
        for rule in &self.rules {
            if rule.selector.pseudo_element.is_none() && rule.selector.matches(path) {
                matched.extend(rule.declarations.iter().map(|decl| (rule, decl)));
            }
        }
        let inline = inline_style.map(parse_inline_declarations).unwrap_or_default();
        let values = cascade(matched, &inline);
        compute_from_values(&values, parent)
    }

    /// Style of a `::before`/`::after` box, or `None` when no rule gives it content.
    pub fn compute_pseudo(
        &self,
        path: &[ElementInfo],
        pseudo: PseudoElement,
        element_style: &ComputedStyle,
    ) -> Option<ComputedStyle> {
        let mut matched: Vec<(&RuleEntry, &Declaration)> = Vec::new();
        for rule in &self.rules {
            if rule.selector.pseudo_element == Some(pseudo) && rule.selector.matches(path) {
                matched.extend(rule.declarations.iter().map(|decl| (rule, decl)));
            }
        }
        if matched.is_empty() {
            return None;
        }
        let values = cascade(matched, &[]);
        let mut style = compute_from_values(&values, element_style);
        if !values.contains_key("display") {
            style.display = DisplayMode::Inline;
        }
        match &style.content {
            Some(items) if !items.is_empty() => Some(style),
            _ => None,
        }
    }
}

fn cascade<'a>(
    mut matched: Vec<(&'a RuleEntry, &'a Declaration)>,
    inline: &'a [Declaration],
) -> BTreeMap<String, String> {
    matched.sort_by_key(|(rule, decl)| (decl.important, rule.origin, rule.specificity, rule.order));
    let mut values = BTreeMap::new();
    for (_, decl) in matched.iter().filter(|(_, decl)| !decl.important) {
        values.insert(decl.name.clone(), decl.value.clone());
    }
    for decl in inline.iter().filter(|decl| !decl.important) {
        values.insert(decl.name.clone(), decl.value.clone());
    }
    for (_, decl) in matched.iter().filter(|(_, decl)| decl.important) {
        values.insert(decl.name.clone(), decl.value.clone());
    }
    for decl in inline.iter().filter(|decl| decl.important) {
        values.insert(decl.name.clone(), decl.value.clone());
    }
    values
}

fn collect_rules(
    rules: &CssRuleList,
    origin: Origin,
    out: &mut Vec<RuleEntry>,
    order: &mut usize,
    page: &mut PageSetup,
) {
    for rule in &rules.0 {
        match rule {
            CssRule::Style(style) => {
                let declarations = declarations_from_block(&style.declarations);
                let selectors = style
                    .selectors
                    .to_css_string(PrinterOptions::default())
                    .unwrap_or_default();
                for raw in split_selector_list(&selectors) {
                    let Some(selector) = parse_selector(&raw) else {
                        log::debug!("ignoring unsupported selector {raw:?}");
                        continue;
                    };
                    out.push(RuleEntry {
                        specificity: selector.specificity(),
                        selector,
                        origin,
                        order: *order,
                        declarations: declarations.clone(),
                    });
                }
                *order += 1;
            }
            CssRule::Media(media) => {
                let query = media
                    .query
                    .to_css_string(PrinterOptions::default())
                    .unwrap_or_default();
                if media_applies_to_print(&query) {
                    collect_rules(&media.rules, origin, out, order, page);
                }
            }
            CssRule::Page(page_rule) => apply_page_rule(page_rule, page),
            _ => {}
        }
    }
}

fn split_selector_list(list: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    for ch in list.chars() {
        match ch {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                out.push(std::mem::take(&mut current));
                continue;
            }
            _ => {}
        }
        current.push(ch);
    }
    out.push(current);
    out.into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn media_applies_to_print(query: &str) -> bool {
    let query = query.trim().to_ascii_lowercase();
    if query.is_empty() {
        return true;
    }
    query.split(',').any(|part| {
        let part = part.trim();
        !part.starts_with("not") && (part.contains("print") || part.contains("all"))
    })
}

fn apply_page_rule(rule: &PageRule, page: &mut PageSetup) {
    let named = rule
        .selectors
        .iter()
        .any(|selector| selector.name.is_some() || !selector.pseudo_classes.is_empty());
    if named {
        log::debug!("ignoring @page rule with a page selector");
        return;
    }
    let base = ComputedStyle::default();
    let values: BTreeMap<String, String> = declarations_from_block(&rule.declarations)
        .into_iter()
        .map(|decl| (decl.name, decl.value))
        .collect();
    if let Some(size) = values.get("size").and_then(|raw| parse_page_size(raw)) {
        page.size = Some(size);
    }
    let edge = |name: &str| {
        values
            .get(name)
            .and_then(|raw| parse_length(raw))
            .map(|len| len.resolve(base.font_size, Pt::ZERO))
    };
    let sides = [
        edge("margin-top"),
        edge("margin-right"),
        edge("margin-bottom"),
        edge("margin-left"),
    ];
    if sides.iter().any(Option::is_some) {
        let current = page.margins.unwrap_or_default();
        page.margins = Some(Margins {
            top: sides[0].unwrap_or(current.top),
            right: sides[1].unwrap_or(current.right),
            bottom: sides[2].unwrap_or(current.bottom),
            left: sides[3].unwrap_or(current.left),
        });
    }

    for margin_rule in &rule.rules {
        let position = match margin_rule.margin_box {
            PageMarginBox::TopLeft => MarginBoxPosition::TopLeft,
            PageMarginBox::TopCenter => MarginBoxPosition::TopCenter,
            PageMarginBox::TopRight => MarginBoxPosition::TopRight,
            PageMarginBox::BottomLeft => MarginBoxPosition::BottomLeft,
            PageMarginBox::BottomCenter => MarginBoxPosition::BottomCenter,
            PageMarginBox::BottomRight => MarginBoxPosition::BottomRight,
            _ => {
                log::warn!("unsupported page margin box ignored");
                continue;
            }
        };
        let values: BTreeMap<String, String> = declarations_from_block(&margin_rule.declarations)
            .into_iter()
            .map(|decl| (decl.name, decl.value))
            .collect();
        let style = compute_from_values(&values, &base);
        let content = style.content.clone().unwrap_or_default();
        page.margin_boxes.retain(|existing| existing.position != position);
        page.margin_boxes.push(MarginBoxSpec {
            position,
            content,
            style,
        });
    }
    page.margin_boxes.sort_by_key(|spec| spec.position);
}

fn parse_page_size(raw: &str) -> Option<Size> {
    let tokens: Vec<String> = split_value_tokens(raw)
        .into_iter()
        .map(|t| t.to_ascii_lowercase())
        .collect();
    let mut size = None;
    let mut landscape = false;
    let mut lengths = Vec::new();
    for token in &tokens {
        match token.as_str() {
            "a3" => size = Some(Size::from_mm(297.0, 420.0)),
            "a4" => size = Some(Size::a4()),
            "a5" => size = Some(Size::from_mm(148.0, 210.0)),
            "letter" => size = Some(Size::letter()),
            "legal" => size = Some(Size::new(Pt::from_i32(612), Pt::from_i32(1008))),
            "landscape" => landscape = true,
            "portrait" | "auto" => {}
            other => {
                if let Some(len) = parse_length(other) {
                    lengths.push(len.resolve(Pt::from_f32(ROOT_FONT_SIZE_PT), Pt::ZERO));
                }
            }
        }
    }
    let size = match (size, lengths.as_slice()) {
        (Some(size), _) => size,
        (None, [side]) => Size::new(*side, *side),
        (None, [w, h, ..]) => Size::new(*w, *h),
        (None, []) => return None,
    };
    Some(if landscape { size.landscape() } else { size })
}

fn declarations_from_block(block: &DeclarationBlock) -> Vec<Declaration> {
    let mut out = Vec::new();
    for (properties, important) in [
        (&block.declarations, false),
        (&block.important_declarations, true),
    ] {
        for property in properties {
            let name = property.property_id().name().to_ascii_lowercase();
            let Ok(value) = property.value_to_css_string(PrinterOptions::default()) else {
                continue;
            };
            expand_declaration(&name, value.trim(), important, &mut out);
        }
    }
    out
}

fn parse_inline_declarations(raw: &str) -> Vec<Declaration> {
    match StyleAttribute::parse(raw, ParserOptions::default()) {
        Ok(attr) => declarations_from_block(&attr.declarations),
        Err(err) => {
            log::warn!("ignoring unparsable inline style {raw:?}: {err}");
            Vec::new()
        }
    }
}

const SIDES: [&str; 4] = ["top", "right", "bottom", "left"];

/// Rewrites shorthands into longhands so later declarations override earlier
/// ones property by property.
fn expand_declaration(name: &str, value: &str, important: bool, out: &mut Vec<Declaration>) {
    let mut push = |name: String, value: String| {
        out.push(Declaration {
            name,
            value,
            important,
        })
    };
    match name {
        "margin" | "padding" => {
            if let Some(values) = expand_box_values(value) {
                for (side, v) in SIDES.iter().zip(values) {
                    push(format!("{name}-{side}"), v);
                }
            }
        }
        "border" => {
            let (width, style, color) = split_border_value(value);
            for side in SIDES {
                push(format!("border-{side}-width"), width.clone());
                push(format!("border-{side}-style"), style.clone());
                push(format!("border-{side}-color"), color.clone());
            }
        }
        "border-top" | "border-right" | "border-bottom" | "border-left" => {
            let (width, style, color) = split_border_value(value);
            push(format!("{name}-width"), width);
            push(format!("{name}-style"), style);
            push(format!("{name}-color"), color);
        }
        "border-width" | "border-style" | "border-color" => {
            let suffix = &name["border-".len()..];
            if let Some(values) = expand_box_values(value) {
                for (side, v) in SIDES.iter().zip(values) {
                    push(format!("border-{side}-{suffix}"), v);
                }
            }
        }
        "background" => push("background-color".to_string(), background_color_token(value)),
        "list-style" => {
            let kind = split_value_tokens(value)
                .into_iter()
                .find(|token| parse_list_style(token).is_some())
                .unwrap_or_else(|| "disc".to_string());
            push("list-style-type".to_string(), kind);
        }
        "break-before" | "break-after" | "break-inside" => {
            push(format!("page-{name}"), value.to_string());
        }
        _ => push(name.to_string(), value.to_string()),
    }
}

fn expand_box_values(value: &str) -> Option<[String; 4]> {
    let tokens = split_value_tokens(value);
    let out = match tokens.as_slice() {
        [a] => [a.clone(), a.clone(), a.clone(), a.clone()],
        [a, b] => [a.clone(), b.clone(), a.clone(), b.clone()],
        [a, b, c] => [a.clone(), b.clone(), c.clone(), b.clone()],
        [a, b, c, d] => [a.clone(), b.clone(), c.clone(), d.clone()],
        _ => return None,
    };
    Some(out)
}

fn split_border_value(value: &str) -> (String, String, String) {
    let mut width = "medium".to_string();
    let mut style = "none".to_string();
    let mut color = "currentcolor".to_string();
    for token in split_value_tokens(value) {
        let lower = token.to_ascii_lowercase();
        if parse_border_style(&lower).is_some() {
            style = lower;
        } else if parse_border_width(&lower).is_some() {
            width = lower;
        } else {
            color = token;
        }
    }
    (width, style, color)
}

fn background_color_token(value: &str) -> String {
    let lower = value.to_ascii_lowercase();
    if let Some(start) = lower.find("gradient(") {
        let inner = &value[start + "gradient(".len()..];
        let inner = inner.strip_suffix(')').unwrap_or(inner);
        for arg in split_top_level_commas(inner) {
            for token in split_value_tokens(&arg) {
                if parse_color(&token).is_some() {
                    return token;
                }
            }
        }
        return "transparent".to_string();
    }
    split_value_tokens(value)
        .into_iter()
        .find(|token| parse_color(token).is_some() || token.eq_ignore_ascii_case("transparent"))
        .unwrap_or_else(|| "transparent".to_string())
}

fn split_top_level_commas(raw: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    for ch in raw.chars() {
        match ch {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                out.push(std::mem::take(&mut current));
                continue;
            }
            _ => {}
        }
        current.push(ch);
    }
    out.push(current);
    out
}

/// Splits a declaration value on whitespace, keeping parenthesised groups and
/// quoted strings intact.
fn split_value_tokens(value: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    for ch in value.chars() {
        if let Some(q) = quote {
            current.push(ch);
            if ch == q {
                quote = None;
            }
            continue;
        }
        match ch {
            '"' | '\'' => {
                quote = Some(ch);
                current.push(ch);
            }
            '(' => {
                depth += 1;
                current.push(ch);
            }
            ')' => {
                depth = depth.saturating_sub(1);
                current.push(ch);
            }
            c if c.is_whitespace() && depth == 0 => {
                if !current.is_empty() {
                    out.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Length {
    Absolute(Pt),
    Em(f32),
    Rem(f32),
    Percent(f32),
    Auto,
}

impl Length {
    fn resolve(self, font_size: Pt, percent_base: Pt) -> Pt {
        match self {
            Length::Absolute(value) => value,
            Length::Em(factor) => font_size.scale(factor),
            Length::Rem(factor) => Pt::from_f32(ROOT_FONT_SIZE_PT * factor),
            Length::Percent(pct) => percent_base.scale(pct / 100.0),
            Length::Auto => Pt::ZERO,
        }
    }
}

fn parse_length(raw: &str) -> Option<Length> {
    let raw = raw.trim().to_ascii_lowercase();
    if raw == "auto" {
        return Some(Length::Auto);
    }
    let split = raw
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '-' || c == '+'))
        .unwrap_or(raw.len());
    let (number, unit) = raw.split_at(split);
    let number: f32 = number.parse().ok()?;
    let length = match unit {
        "" if number == 0.0 => Length::Absolute(Pt::ZERO),
        "pt" => Length::Absolute(Pt::from_f32(number)),
        "px" => Length::Absolute(Pt::from_f32(number * 0.75)),
        "cm" => Length::Absolute(Pt::from_f32(number * 72.0 / 2.54)),
        "mm" => Length::Absolute(Pt::from_f32(number * 72.0 / 25.4)),
        "in" => Length::Absolute(Pt::from_f32(number * 72.0)),
        "pc" => Length::Absolute(Pt::from_f32(number * 12.0)),
        "em" => Length::Em(number),
        "rem" => Length::Rem(number),
        "%" => Length::Percent(number),
        _ => return None,
    };
    Some(length)
}

fn parse_border_width(raw: &str) -> Option<Pt> {
    match raw {
        "thin" => Some(Pt::from_f32(0.75)),
        "medium" => Some(Pt::from_f32(2.25)),
        "thick" => Some(Pt::from_f32(3.75)),
        other => match parse_length(other)? {
            Length::Absolute(value) => Some(value),
            Length::Em(factor) => Some(Pt::from_f32(ROOT_FONT_SIZE_PT * factor)),
            _ => None,
        },
    }
}

fn parse_border_style(raw: &str) -> Option<BorderLineStyle> {
    match raw {
        "none" | "hidden" => Some(BorderLineStyle::None),
        "solid" | "double" | "groove" | "ridge" | "inset" | "outset" => {
            Some(BorderLineStyle::Solid)
        }
        "dashed" => Some(BorderLineStyle::Dashed),
        "dotted" => Some(BorderLineStyle::Dotted),
        _ => None,
    }
}

fn parse_list_style(raw: &str) -> Option<ListStyleKind> {
    match raw.to_ascii_lowercase().as_str() {
        "disc" => Some(ListStyleKind::Disc),
        "circle" => Some(ListStyleKind::Circle),
        "square" => Some(ListStyleKind::Square),
        "decimal" | "decimal-leading-zero" => Some(ListStyleKind::Decimal),
        "none" => Some(ListStyleKind::None),
        _ => None,
    }
}

/// Parses a CSS colour. `transparent` and fully transparent colours yield `None`.
pub fn parse_color(raw: &str) -> Option<Color> {
    let raw = raw.trim().to_ascii_lowercase();
    if let Some(hex) = raw.strip_prefix('#') {
        return parse_hex_color(hex);
    }
    if let Some(args) = raw
        .strip_prefix("rgba(")
        .or_else(|| raw.strip_prefix("rgb("))
        .and_then(|rest| rest.strip_suffix(')'))
    {
        let parts: Vec<&str> = args
            .split(|c: char| c == ',' || c == '/' || c.is_whitespace())
            .filter(|p| !p.is_empty())
            .collect();
        if parts.len() < 3 {
            return None;
        }
        let channel = |p: &str| -> Option<f32> {
            if let Some(pct) = p.strip_suffix('%') {
                Some((pct.parse::<f32>().ok()? / 100.0).clamp(0.0, 1.0))
            } else {
                Some((p.parse::<f32>().ok()? / 255.0).clamp(0.0, 1.0))
            }
        };
        if let Some(alpha) = parts.get(3) {
            let alpha = match alpha.strip_suffix('%') {
                Some(pct) => pct.parse::<f32>().ok()? / 100.0,
                None => alpha.parse::<f32>().ok()?,
            };
            if alpha <= 0.0 {
                return None;
            }
        }
        return Some(Color::rgb(
            channel(parts[0])?,
            channel(parts[1])?,
            channel(parts[2])?,
        ));
    }
    let rgb = match raw.as_str() {
        "black" => (0, 0, 0),
        "white" => (255, 255, 255),
        "red" => (255, 0, 0),
        "green" => (0, 128, 0),
        "blue" => (0, 0, 255),
        "gray" | "grey" => (128, 128, 128),
        "silver" => (192, 192, 192),
        "maroon" => (128, 0, 0),
        "navy" => (0, 0, 128),
        "teal" => (0, 128, 128),
        "purple" => (128, 0, 128),
        "orange" => (255, 165, 0),
        "yellow" => (255, 255, 0),
        "lightgray" | "lightgrey" => (211, 211, 211),
        "darkgray" | "darkgrey" => (169, 169, 169),
        _ => return None,
    };
    Some(Color::from_rgb8(rgb.0, rgb.1, rgb.2))
}

fn parse_hex_color(hex: &str) -> Option<Color> {
    let nibble = |c: char| c.to_digit(16).map(|d| (d * 17) as u8);
    let chars: Vec<char> = hex.chars().collect();
    match chars.len() {
        3 | 4 => {
            if chars.len() == 4 && nibble(chars[3])? == 0 {
                return None;
            }
            Some(Color::from_rgb8(
                nibble(chars[0])?,
                nibble(chars[1])?,
                nibble(chars[2])?,
            ))
        }
        6 | 8 => {
            let byte = |i: usize| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok();
            if chars.len() == 8 && byte(6)? == 0 {
                return None;
            }
            Some(Color::from_rgb8(byte(0)?, byte(2)?, byte(4)?))
        }
        _ => None,
    }
}

/// Parses generated `content`: quoted strings and `counter(name)` calls.
pub fn parse_content(raw: &str) -> Vec<ContentItem> {
    let mut items = Vec::new();
    let chars: Vec<char> = raw.chars().collect();
    let mut i = 0usize;
    while i < chars.len() {
        let ch = chars[i];
        if ch == '"' || ch == '\'' {
            let (text, next) = read_css_string(&chars, i + 1, ch);
            items.push(ContentItem::Text(text));
            i = next;
        } else if ch.is_ascii_alphabetic() {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '-') {
                i += 1;
            }
            let ident: String = chars[start..i].iter().collect::<String>().to_ascii_lowercase();
            if i < chars.len() && chars[i] == '(' {
                let arg_start = i + 1;
                while i < chars.len() && chars[i] != ')' {
                    i += 1;
                }
                let args: String = chars[arg_start..i.min(chars.len())].iter().collect();
                i += 1;
                if ident == "counter" {
                    let name = args.split(',').next().unwrap_or("").trim().to_string();
                    if !name.is_empty() {
                        items.push(ContentItem::Counter(name));
                    }
                }
            }
        } else {
            i += 1;
        }
    }
    items
}

fn read_css_string(chars: &[char], mut i: usize, quote: char) -> (String, usize) {
    let mut out = String::new();
    while i < chars.len() {
        let ch = chars[i];
        if ch == quote {
            return (out, i + 1);
        }
        if ch == '\\' && i + 1 < chars.len() {
            let mut j = i + 1;
            let mut hex = String::new();
            while j < chars.len() && hex.len() < 6 && chars[j].is_ascii_hexdigit() {
                hex.push(chars[j]);
                j += 1;
            }
            if hex.is_empty() {
                out.push(chars[i + 1]);
                i += 2;
            } else {
                if let Some(decoded) = u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                    out.push(decoded);
                }
                if j < chars.len() && chars[j] == ' ' {
                    j += 1;
                }
                i = j;
            }
            continue;
        }
        out.push(ch);
        i += 1;
    }
    (out, i)
}

fn parse_counter_list(raw: &str, default_value: i32) -> Vec<(String, i32)> {
    let tokens = split_value_tokens(raw);
    let mut out: Vec<(String, i32)> = Vec::new();
    for token in tokens {
        if token.eq_ignore_ascii_case("none") {
            return Vec::new();
        }
        if let Ok(value) = token.parse::<i32>() {
            if let Some(last) = out.last_mut() {
                last.1 = value;
            }
            continue;
        }
        out.push((token, default_value));
    }
    out
}

fn parse_break(raw: &str) -> BreakMode {
    match raw.trim().to_ascii_lowercase().as_str() {
        "always" | "page" | "left" | "right" | "recto" | "verso" => BreakMode::Always,
        "avoid" | "avoid-page" => BreakMode::Avoid,
        _ => BreakMode::Auto,
    }
}

fn compute_from_values(values: &BTreeMap<String, String>, parent: &ComputedStyle) -> ComputedStyle {
    let mut style = ComputedStyle::inherit(parent);
    let root = Pt::from_f32(ROOT_FONT_SIZE_PT);

    if let Some(raw) = values.get("font-size") {
        let lower = raw.to_ascii_lowercase();
        style.font_size = match lower.as_str() {
            "medium" => root,
            "small" => root.mul_ratio(8, 9),
            "x-small" => root.mul_ratio(3, 4),
            "large" => root.mul_ratio(6, 5),
            "x-large" => root.mul_ratio(3, 2),
            "smaller" => parent.font_size.mul_ratio(5, 6),
            "larger" => parent.font_size.mul_ratio(6, 5),
            other => parse_length(other)
                .map(|len| len.resolve(parent.font_size, parent.font_size))
                .unwrap_or(parent.font_size),
        };
    }
    if let Some(raw) = values.get("font-family") {
        style.family = resolve_family(raw);
    }
    if let Some(raw) = values.get("font-weight") {
        style.bold = match raw.to_ascii_lowercase().as_str() {
            "bold" | "bolder" => true,
            "normal" | "lighter" => false,
            other => other.parse::<u16>().map(|w| w >= 600).unwrap_or(style.bold),
        };
    }
    if let Some(raw) = values.get("font-style") {
        style.italic = matches!(raw.to_ascii_lowercase().as_str(), "italic" | "oblique");
    }
    if let Some(raw) = values.get("line-height") {
        let lower = raw.to_ascii_lowercase();
        style.line_height = if lower == "normal" {
            LineHeight::Normal
        } else if let Ok(factor) = lower.parse::<f32>() {
            LineHeight::Factor(factor)
        } else if let Some(len) = parse_length(&lower) {
            LineHeight::Absolute(len.resolve(style.font_size, style.font_size))
        } else {
            style.line_height
        };
    }
    if let Some(raw) = values.get("color") {
        if let Some(color) = parse_color(raw) {
            style.color = color;
        }
    }
    if let Some(raw) = values.get("text-align") {
        style.text_align = match raw.to_ascii_lowercase().as_str() {
            "center" => TextAlignMode::Center,
            "right" | "end" => TextAlignMode::Right,
            "justify" => TextAlignMode::Justify,
            _ => TextAlignMode::Left,
        };
    }
    if let Some(raw) = values.get("text-decoration") {
        let lower = raw.to_ascii_lowercase();
        style.underline = lower.contains("underline");
        style.line_through = lower.contains("line-through");
    }
    if let Some(raw) = values.get("white-space") {
        style.preserve_whitespace = matches!(
            raw.to_ascii_lowercase().as_str(),
            "pre" | "pre-wrap" | "break-spaces"
        );
    }
    if let Some(kind) = values.get("list-style-type").and_then(|raw| parse_list_style(raw)) {
        style.list_style = kind;
    }
    if let Some(raw) = values.get("display") {
        style.display = match raw.to_ascii_lowercase().as_str() {
            "block" | "flow-root" | "flex" | "grid" => DisplayMode::Block,
            "inline-block" | "inline-flex" => DisplayMode::InlineBlock,
            "list-item" => DisplayMode::ListItem,
            "table" => DisplayMode::Table,
            "table-header-group" => DisplayMode::TableHeaderGroup,
            "table-row-group" => DisplayMode::TableRowGroup,
            "table-footer-group" => DisplayMode::TableFooterGroup,
            "table-row" => DisplayMode::TableRow,
            "table-cell" => DisplayMode::TableCell,
            "none" => DisplayMode::None,
            _ => DisplayMode::Inline,
        };
    }

    let font_size = style.font_size;
    let edge = |prefix: &str, side: &str| -> Option<Pt> {
        values
            .get(&format!("{prefix}-{side}"))
            .and_then(|raw| parse_length(raw))
            .map(|len| len.resolve(font_size, Pt::ZERO))
    };
    for (side, slot_margin, slot_padding) in [
        ("top", &mut style.margin.top, &mut style.padding.top),
        ("right", &mut style.margin.right, &mut style.padding.right),
        ("bottom", &mut style.margin.bottom, &mut style.padding.bottom),
        ("left", &mut style.margin.left, &mut style.padding.left),
    ] {
        if let Some(value) = edge("margin", side) {
            *slot_margin = value;
        }
        if let Some(value) = edge("padding", side) {
            *slot_padding = value.clamp_non_negative();
        }
    }

    for side in SIDES {
        let width = values
            .get(&format!("border-{side}-width"))
            .and_then(|raw| parse_border_width(&raw.to_ascii_lowercase()));
        let line_style = values
            .get(&format!("border-{side}-style"))
            .and_then(|raw| parse_border_style(&raw.to_ascii_lowercase()));
        let color = values.get(&format!("border-{side}-color")).map(|raw| {
            if raw.eq_ignore_ascii_case("currentcolor") {
                None
            } else {
                parse_color(raw)
            }
        });
        if let Some(border) = style.border.side_mut(side) {
            if let Some(width) = width {
                border.width = width;
            }
            if let Some(line_style) = line_style {
                border.style = line_style;
            }
            if let Some(color) = color {
                border.color = color;
            }
        }
    }

    if let Some(raw) = values.get("background-color") {
        style.background = parse_color(raw);
    }
    if let Some(raw) = values.get("width") {
        style.width = match parse_length(raw) {
            Some(Length::Percent(pct)) => WidthSpec::Percent(pct),
            Some(Length::Auto) | None => WidthSpec::Auto,
            Some(len) => WidthSpec::Absolute(len.resolve(font_size, Pt::ZERO)),
        };
    }
    if let Some(raw) = values.get("page-break-before") {
        style.break_before = parse_break(raw);
    }
    if let Some(raw) = values.get("page-break-after") {
        style.break_after = parse_break(raw);
    }
    if let Some(raw) = values.get("page-break-inside") {
        style.break_inside = parse_break(raw);
    }
    if let Some(raw) = values.get("content") {
        let lower = raw.trim().to_ascii_lowercase();
        style.content = if lower == "none" || lower == "normal" {
            None
        } else {
            Some(parse_content(raw))
        };
    }
    if let Some(raw) = values.get("counter-reset") {
        style.counter_reset = parse_counter_list(raw, 0);
    }
    if let Some(raw) = values.get("counter-increment") {
        style.counter_increment = parse_counter_list(raw, 1);
    }
    style
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element(tag: &str, classes: &[&str], index: usize, count: usize) -> ElementInfo {
        ElementInfo {
            tag: tag.to_string(),
            id: None,
            classes: classes.iter().map(|c| c.to_string()).collect(),
            sibling_index: index,
            sibling_count: count,
        }
    }

    #[test]
    fn selector_specificity_counts_ids_classes_and_tags() {
        let sel = parse_selector("ol li::before").expect("selector");
        assert_eq!(sel.specificity(), Specificity(0, 0, 3));
        let sel = parse_selector(".toc li").expect("selector");
        assert_eq!(sel.specificity(), Specificity(0, 1, 1));
        let sel = parse_selector("tbody tr:nth-child(2n)").expect("selector");
        assert_eq!(sel.specificity(), Specificity(0, 1, 2));
    }

    #[test]
    fn descendant_and_child_combinators_match() {
        let path = vec![
            element("body", &[], 1, 1),
            element("div", &["toc"], 1, 1),
            element("ul", &[], 1, 1),
            element("li", &[], 2, 3),
        ];
        assert!(parse_selector(".toc li").expect("sel").matches(&path));
        assert!(parse_selector("ul > li").expect("sel").matches(&path));
        assert!(!parse_selector("div > li").expect("sel").matches(&path));
        assert!(!parse_selector("ol li").expect("sel").matches(&path));
        assert!(parse_selector("*").expect("sel").matches(&path));
    }

    #[test]
    fn nth_child_even_and_odd() {
        let even = parse_selector("tr:nth-child(even)").expect("sel");
        let odd = parse_selector("tr:nth-child(2n+1)").expect("sel");
        let second = vec![element("tr", &[], 2, 4)];
        let third = vec![element("tr", &[], 3, 4)];
        assert!(even.matches(&second));
        assert!(!even.matches(&third));
        assert!(odd.matches(&third));
    }

    #[test]
    fn hover_never_matches() {
        let sel = parse_selector("a:hover").expect("sel");
        assert!(!sel.matches(&[element("a", &[], 1, 1)]));
    }

    #[test]
    fn colors_parse_hex_rgb_and_names() {
        assert_eq!(parse_color("#fff"), Some(Color::WHITE));
        assert_eq!(parse_color("#1a5490"), Some(Color::from_rgb8(0x1a, 0x54, 0x90)));
        assert_eq!(parse_color("rgb(255, 0, 0)"), Some(Color::rgb(1.0, 0.0, 0.0)));
        assert_eq!(parse_color("white"), Some(Color::WHITE));
        assert_eq!(parse_color("transparent"), None);
        assert_eq!(parse_color("#00000000"), None);
    }

    #[test]
    fn gradient_background_uses_first_stop() {
        assert_eq!(
            background_color_token("linear-gradient(135deg, #1a5490 0%, #2874a6 100%)"),
            "#1a5490"
        );
        assert_eq!(background_color_token("white"), "white");
    }

    #[test]
    fn content_parses_strings_and_counters() {
        let items = parse_content(r#""Página " counter(page) " de " counter(pages)"#);
        assert_eq!(
            items,
            vec![
                ContentItem::Text("Página ".to_string()),
                ContentItem::Counter("page".to_string()),
                ContentItem::Text(" de ".to_string()),
                ContentItem::Counter("pages".to_string()),
            ]
        );
        assert_eq!(
            parse_content(r#""\25B8  ""#),
            vec![ContentItem::Text("\u{25B8} ".to_string())]
        );
    }

    #[test]
    fn author_rules_beat_user_agent_defaults() {
        let resolver = StyleResolver::new("* { margin: 0; } p { margin-bottom: 10pt; }")
            .expect("resolver");
        let body = ComputedStyle::default();
        let style = resolver.compute(&[element("p", &[], 1, 1)], &body, None);
        assert_eq!(style.display, DisplayMode::Block);
        assert_eq!(style.margin.top, Pt::ZERO);
        assert_eq!(style.margin.bottom, Pt::from_i32(10));
    }

    #[test]
    fn longhand_after_shorthand_wins() {
        let resolver = StyleResolver::new(
            "pre { border: 1px solid #ddd; border-left: 4px solid #2874a6; padding: 12pt; }",
        )
        .expect("resolver");
        let style = resolver.compute(&[element("pre", &[], 1, 1)], &ComputedStyle::default(), None);
        assert_eq!(style.border.top.used_width(), Pt::from_f32(0.75));
        assert_eq!(style.border.left.used_width(), Pt::from_i32(3));
        assert_eq!(style.border.left.color, Some(Color::from_rgb8(0x28, 0x74, 0xa6)));
        assert_eq!(style.padding.left, Pt::from_i32(12));
        assert!(style.preserve_whitespace);
    }

    #[test]
    fn inline_style_overrides_sheet() {
        let resolver = StyleResolver::new(".x { font-size: 14pt; }").expect("resolver");
        let style = resolver.compute(
            &[element("div", &["x"], 1, 1)],
            &ComputedStyle::default(),
            Some("font-size: 11pt; margin-top: 10pt"),
        );
        assert_eq!(style.font_size, Pt::from_i32(11));
        assert_eq!(style.margin.top, Pt::from_i32(10));
    }

    #[test]
    fn em_lengths_follow_own_font_size() {
        let resolver = StyleResolver::new("h1 { font-size: 20pt; }").expect("resolver");
        let style = resolver.compute(&[element("h1", &[], 1, 1)], &ComputedStyle::default(), None);
        // UA margin is 0.67em.
        assert_eq!(style.margin.top, Pt::from_f32(13.4));
        assert!(style.bold);
    }

    #[test]
    fn pseudo_before_needs_content() {
        let resolver = StyleResolver::new(
            "ol li:before { content: counter(item) \". \"; counter-increment: item; font-weight: bold; }",
        )
        .expect("resolver");
        let path = vec![element("ol", &[], 1, 1), element("li", &[], 1, 1)];
        let li_style = resolver.compute(&path, &ComputedStyle::default(), None);
        let before = resolver
            .compute_pseudo(&path, PseudoElement::Before, &li_style)
            .expect("before");
        assert!(before.bold);
        assert_eq!(before.counter_increment, vec![("item".to_string(), 1)]);
        assert_eq!(
            before.content,
            Some(vec![
                ContentItem::Counter("item".to_string()),
                ContentItem::Text(". ".to_string())
            ])
        );
        let ul_path = vec![element("ul", &[], 1, 1), element("li", &[], 1, 1)];
        assert!(
            resolver
                .compute_pseudo(&ul_path, PseudoElement::Before, &li_style)
                .is_none()
        );
    }

    #[test]
    fn page_rule_yields_size_margins_and_margin_boxes() {
        let css = r#"
            @page {
                size: A4;
                margin: 2cm 1.5cm;
                @top-right {
                    content: "Página " counter(page) " de " counter(pages);
                    font-size: 9pt;
                    color: #666;
                }
                @bottom-center { content: "rodapé"; font-size: 8pt; }
            }
        "#;
        let resolver = StyleResolver::new(css).expect("resolver");
        let page = resolver.page_setup();
        assert_eq!(page.size, Some(Size::a4()));
        let margins = page.margins.expect("margins");
        assert_eq!(margins.top, Pt::from_f32(2.0 * 72.0 / 2.54));
        assert_eq!(margins.left, Pt::from_f32(1.5 * 72.0 / 2.54));
        assert_eq!(page.margin_boxes.len(), 2);
        let top_right = &page.margin_boxes[0];
        assert_eq!(top_right.position, MarginBoxPosition::TopRight);
        assert_eq!(top_right.style.font_size, Pt::from_i32(9));
        assert_eq!(top_right.content.len(), 4);
        assert_eq!(page.margin_boxes[1].position, MarginBoxPosition::BottomCenter);
    }

    #[test]
    fn print_media_rules_apply_and_screen_rules_do_not() {
        let resolver = StyleResolver::new(
            "@media print { p { color: red; } } @media screen { p { font-size: 30pt; } }",
        )
        .expect("resolver");
        let style = resolver.compute(&[element("p", &[], 1, 1)], &ComputedStyle::default(), None);
        assert_eq!(style.color, Color::rgb(1.0, 0.0, 0.0));
        assert_eq!(style.font_size, Pt::from_i32(12));
    }
}
