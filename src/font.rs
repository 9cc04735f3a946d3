use crate::types::Pt;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use unicode_normalization::UnicodeNormalization;

/// The base-14 faces the engine draws with. Widths come from the Adobe AFM
/// tables, so no font program is ever embedded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Base14Font {
    Helvetica,
    HelveticaBold,
    HelveticaOblique,
    HelveticaBoldOblique,
    Courier,
    CourierBold,
    CourierOblique,
    CourierBoldOblique,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FontFamily {
    SansSerif,
    Monospace,
}

impl Base14Font {
    pub fn select(family: FontFamily, bold: bool, italic: bool) -> Self {
        match (family, bold, italic) {
            (FontFamily::SansSerif, false, false) => Base14Font::Helvetica,
            (FontFamily::SansSerif, true, false) => Base14Font::HelveticaBold,
            (FontFamily::SansSerif, false, true) => Base14Font::HelveticaOblique,
            (FontFamily::SansSerif, true, true) => Base14Font::HelveticaBoldOblique,
            (FontFamily::Monospace, false, false) => Base14Font::Courier,
            (FontFamily::Monospace, true, false) => Base14Font::CourierBold,
            (FontFamily::Monospace, false, true) => Base14Font::CourierOblique,
            (FontFamily::Monospace, true, true) => Base14Font::CourierBoldOblique,
        }
    }

    pub fn base_font_name(self) -> &'static str {
        match self {
            Base14Font::Helvetica => "Helvetica",
            Base14Font::HelveticaBold => "Helvetica-Bold",
            Base14Font::HelveticaOblique => "Helvetica-Oblique",
            Base14Font::HelveticaBoldOblique => "Helvetica-BoldOblique",
            Base14Font::Courier => "Courier",
            Base14Font::CourierBold => "Courier-Bold",
            Base14Font::CourierOblique => "Courier-Oblique",
            Base14Font::CourierBoldOblique => "Courier-BoldOblique",
        }
    }

    pub fn is_bold(self) -> bool {
        matches!(
            self,
            Base14Font::HelveticaBold
                | Base14Font::HelveticaBoldOblique
                | Base14Font::CourierBold
                | Base14Font::CourierBoldOblique
        )
    }

    fn is_monospace(self) -> bool {
        matches!(
            self,
            Base14Font::Courier
                | Base14Font::CourierBold
                | Base14Font::CourierOblique
                | Base14Font::CourierBoldOblique
        )
    }

    /// Ascender in 1/1000 em, used to place the baseline inside a line box.
    pub fn ascent(self) -> i32 {
        if self.is_monospace() { 629 } else { 718 }
    }

    pub fn descent(self) -> i32 {
        if self.is_monospace() { -157 } else { -207 }
    }

    /// Advance width of `ch` in 1/1000 em.
    pub fn char_width(self, ch: char) -> u16 {
        if self.is_monospace() {
            return 600;
        }
        let table = if self.is_bold() {
            &HELVETICA_BOLD_ASCII
        } else {
            &HELVETICA_ASCII
        };
        if (' '..='~').contains(&ch) {
            return table[ch as usize - 32];
        }
        if let Some(width) = latin1_extra_width(ch, self.is_bold()) {
            return width;
        }
        // Accented letters share the advance of their base letter.
        if let Some(base) = ch.nfd().next() {
            if base != ch && (' '..='~').contains(&base) {
                return table[base as usize - 32];
            }
        }
        556
    }
}

/// Maps a CSS `font-family` list onto the two families the engine carries.
pub fn resolve_family(family_list: &str) -> FontFamily {
    for raw in family_list.split(',') {
        let name = raw.trim().trim_matches('"').trim_matches('\'').to_ascii_lowercase();
        match name.as_str() {
            "courier" | "courier new" | "monospace" | "consolas" | "menlo" | "monaco" => {
                return FontFamily::Monospace;
            }
            "arial" | "helvetica" | "sans-serif" | "verdana" | "segoe ui" => {
                return FontFamily::SansSerif;
            }
            _ => {}
        }
    }
    FontFamily::SansSerif
}

const HELVETICA_ASCII: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278, // ' '../
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, 278, 278, 584, 584, 584, 556, // 0..?
    1015, 667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, 722, 778, // @..O
    667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, 278, 278, 278, 469, 556, // P.._
    333, 556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, 556, 556, // `..o
    556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, 334, 260, 334, 584, // p..~
];

const HELVETICA_BOLD_ASCII: [u16; 95] = [
    278, 333, 474, 556, 556, 889, 722, 238, 333, 333, 389, 584, 278, 333, 278, 278, // ' '../
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, 333, 333, 584, 584, 584, 611, // 0..?
    975, 722, 722, 722, 722, 667, 611, 778, 722, 278, 556, 722, 611, 833, 722, 778, // @..O
    667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, 333, 278, 333, 584, 556, // P.._
    333, 556, 611, 556, 611, 556, 333, 611, 611, 278, 278, 556, 278, 889, 611, 611, // `..o
    611, 611, 389, 556, 333, 611, 556, 778, 556, 556, 500, 389, 280, 389, 584, // p..~
];

fn latin1_extra_width(ch: char, bold: bool) -> Option<u16> {
    let width = match ch {
        '\u{00A0}' => 278,
        '\u{00A9}' | '\u{00AE}' => 737,
        '\u{00B0}' => 400,
        '\u{00B7}' => 278,
        '\u{00AB}' | '\u{00BB}' => 556,
        '\u{00AA}' => 370,
        '\u{00BA}' => 365,
        '\u{00A7}' => 556,
        '\u{00D7}' => 584,
        '\u{00DF}' => 611,
        '\u{00E6}' => 889,
        '\u{00C6}' => 1000,
        '\u{00F8}' => 611,
        '\u{00D8}' => 778,
        '\u{2013}' => 556,
        '\u{2014}' | '\u{2026}' | '\u{2030}' => 1000,
        '\u{2022}' => 350,
        '\u{20AC}' => 556,
        '\u{2122}' => 1000,
        '\u{2018}' | '\u{2019}' | '\u{201A}' => {
            if bold {
                278
            } else {
                222
            }
        }
        '\u{201C}' | '\u{201D}' | '\u{201E}' => {
            if bold {
                500
            } else {
                333
            }
        }
        _ => return None,
    };
    Some(width)
}

/// Single-byte WinAnsi code for `ch`, if the encoding has one.
pub fn winansi_byte(ch: char) -> Option<u8> {
    let byte = match ch {
        '\u{0020}'..='\u{007E}' => ch as u8,
        '\u{00A0}'..='\u{00FF}' => ch as u8,
        '\u{20AC}' => 0x80,
        '\u{201A}' => 0x82,
        '\u{0192}' => 0x83,
        '\u{201E}' => 0x84,
        '\u{2026}' => 0x85,
        '\u{2020}' => 0x86,
        '\u{2021}' => 0x87,
        '\u{02C6}' => 0x88,
        '\u{2030}' => 0x89,
        '\u{0160}' => 0x8A,
        '\u{2039}' => 0x8B,
        '\u{0152}' => 0x8C,
        '\u{017D}' => 0x8E,
        '\u{2018}' => 0x91,
        '\u{2019}' => 0x92,
        '\u{201C}' => 0x93,
        '\u{201D}' => 0x94,
        '\u{2022}' => 0x95,
        '\u{2013}' => 0x96,
        '\u{2014}' => 0x97,
        '\u{02DC}' => 0x98,
        '\u{2122}' => 0x99,
        '\u{0161}' => 0x9A,
        '\u{203A}' => 0x9B,
        '\u{0153}' => 0x9C,
        '\u{017E}' => 0x9E,
        '\u{0178}' => 0x9F,
        _ => return None,
    };
    Some(byte)
}

fn ascii_fallback(ch: char) -> Option<&'static str> {
    let replacement = match ch {
        '\u{2192}' | '\u{27A1}' | '\u{25B6}' | '\u{25B8}' | '\u{25BA}' => ">",
        '\u{2190}' | '\u{25C0}' | '\u{25C2}' => "<",
        '\u{2193}' | '\u{25BC}' | '\u{25BE}' => "v",
        '\u{2191}' | '\u{25B2}' | '\u{25B4}' => "^",
        '\u{2194}' => "<->",
        '\u{21D2}' => "=>",
        '\u{2502}' | '\u{2503}' | '\u{2551}' => "|",
        '\u{2500}' | '\u{2501}' => "-",
        '\u{2550}' => "=",
        '\u{250C}' | '\u{2510}' | '\u{2514}' | '\u{2518}' | '\u{251C}' | '\u{2524}'
        | '\u{252C}' | '\u{2534}' | '\u{253C}' | '\u{2554}' | '\u{2557}' | '\u{255A}'
        | '\u{255D}' | '\u{2560}' | '\u{2563}' | '\u{2566}' | '\u{2569}' | '\u{256C}' => "+",
        '\u{2265}' => ">=",
        '\u{2264}' => "<=",
        '\u{2260}' => "!=",
        '\u{2713}' | '\u{2714}' | '\u{2705}' => "[x]",
        '\u{2717}' | '\u{2718}' | '\u{274C}' => "[ ]",
        '\u{25CF}' | '\u{25E6}' => "\u{2022}",
        '\u{2212}' => "-",
        '\u{2009}' | '\u{200A}' | '\u{2002}' | '\u{2003}' => " ",
        _ => return None,
    };
    Some(replacement)
}

fn is_invisible_format_char(ch: char) -> bool {
    matches!(
        ch,
        '\u{FE0E}' | '\u{FE0F}' | '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{2060}' | '\u{FEFF}'
    )
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SanitizedText {
    pub text: String,
    pub substituted: usize,
    pub dropped: usize,
}

/// Rewrites `input` so every char is WinAnsi-encodable. Known symbols get an
/// ASCII stand-in, composed sequences are recomposed (NFC), and anything left
/// (emoji, pictographs) is dropped.
pub fn sanitize_for_winansi(input: &str) -> SanitizedText {
    let mut out = SanitizedText::default();
    for ch in input.nfc() {
        if winansi_byte(ch).is_some() || ch == '\n' || ch == '\t' {
            out.text.push(ch);
        } else if is_invisible_format_char(ch) {
            continue;
        } else if let Some(replacement) = ascii_fallback(ch) {
            out.text.push_str(replacement);
            out.substituted += 1;
        } else {
            out.dropped += 1;
        }
    }
    if out.dropped > 0 {
        log::warn!(
            "dropped {} character(s) with no WinAnsi glyph from {:?}",
            out.dropped,
            truncate_preview(input, 40)
        );
    }
    out
}

fn truncate_preview(input: &str, max_chars: usize) -> String {
    let mut preview: String = input.chars().take(max_chars).collect();
    if input.chars().count() > max_chars {
        preview.push_str("...");
    }
    preview
}

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct TextWidthKey {
    font: Base14Font,
    size_milli: i64,
    text: String,
}

#[derive(Debug)]
struct TextWidthCache {
    map: HashMap<TextWidthKey, Pt>,
    order: VecDeque<TextWidthKey>,
    max_entries: usize,
}

impl TextWidthCache {
    fn new(max_entries: usize) -> Self {
        Self {
            map: HashMap::new(),
            order: VecDeque::new(),
            max_entries,
        }
    }

    fn insert(&mut self, key: TextWidthKey, value: Pt) {
        if self.map.insert(key.clone(), value).is_some() {
            return;
        }
        self.order.push_back(key);
        while self.map.len() > self.max_entries {
            let Some(old) = self.order.pop_front() else {
                break;
            };
            self.map.remove(&old);
        }
    }
}

/// Text measurement shared by every flowable of one render.
#[derive(Debug)]
pub struct FontMetrics {
    cache: Mutex<TextWidthCache>,
}

impl Default for FontMetrics {
    fn default() -> Self {
        Self {
            cache: Mutex::new(TextWidthCache::new(16_384)),
        }
    }
}

impl FontMetrics {
    pub fn measure(&self, font: Base14Font, font_size: Pt, text: &str) -> Pt {
        if text.is_empty() {
            return Pt::ZERO;
        }
        let key = TextWidthKey {
            font,
            size_milli: font_size.to_milli(),
            text: text.to_string(),
        };
        if let Ok(cache) = self.cache.lock() {
            if let Some(width) = cache.map.get(&key) {
                return *width;
            }
        }
        let units: i64 = text.chars().map(|ch| font.char_width(ch) as i64).sum();
        let width = Pt::from_milli(key.size_milli * units / 1000);
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(key, width);
        }
        width
    }
}
