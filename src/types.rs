use fixed::types::I32F32;

/// Typographic point (1/72 in) stored as 32.32 fixed point.
///
/// Every value is kept on a 1/1000 pt grid so layout arithmetic is exact and
/// repeatable across runs and platforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Pt(I32F32);

impl Pt {
    pub const ZERO: Pt = Pt(I32F32::ZERO);

    pub fn from_f32(value: f32) -> Pt {
        if !value.is_finite() {
            return Pt::ZERO;
        }
        Pt::from_milli((value as f64 * 1000.0).round() as i64)
    }

    pub fn from_i32(value: i32) -> Pt {
        Pt::from_milli(value as i64 * 1000)
    }

    pub fn from_milli(milli: i64) -> Pt {
        let clamped = milli.clamp(-1_000_000_000_000, 1_000_000_000_000) as i128;
        Pt(I32F32::from_bits(milli_to_bits(clamped)))
    }

    pub fn to_f32(self) -> f32 {
        self.0.to_num()
    }

    pub fn to_milli(self) -> i64 {
        bits_to_milli(self.0.to_bits()) as i64
    }

    pub fn max(self, other: Pt) -> Pt {
        if self >= other { self } else { other }
    }

    pub fn min(self, other: Pt) -> Pt {
        if self <= other { self } else { other }
    }

    pub fn clamp_non_negative(self) -> Pt {
        self.max(Pt::ZERO)
    }

    /// `self * num / denom` rounded to the milli grid.
    pub fn mul_ratio(self, num: i32, denom: i32) -> Pt {
        if denom == 0 {
            return Pt::ZERO;
        }
        let milli = self.to_milli() as i128 * num as i128;
        let denom = denom as i128;
        let half = denom.abs() / 2;
        let rounded = if (milli >= 0) == (denom > 0) {
            (milli + half * denom.signum()) / denom
        } else {
            (milli - half * denom.signum()) / denom
        };
        Pt::from_milli(rounded.clamp(i64::MIN as i128, i64::MAX as i128) as i64)
    }

    pub fn scale(self, factor: f32) -> Pt {
        if !factor.is_finite() {
            return Pt::ZERO;
        }
        Pt::from_f32(self.to_f32() * factor)
    }
}

const FRAC_ONE: i128 = 1 << 32;

fn bits_to_milli(bits: i64) -> i128 {
    let scaled = bits as i128 * 1000;
    let half = if scaled >= 0 { FRAC_ONE / 2 } else { -FRAC_ONE / 2 };
    (scaled + half) / FRAC_ONE
}

fn milli_to_bits(milli: i128) -> i64 {
    let scaled = milli * FRAC_ONE;
    let half = if scaled >= 0 { 500 } else { -500 };
    ((scaled + half) / 1000).clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

fn snap(value: I32F32) -> I32F32 {
    I32F32::from_bits(milli_to_bits(bits_to_milli(value.to_bits())))
}

impl std::ops::Add for Pt {
    type Output = Pt;
    fn add(self, rhs: Pt) -> Pt {
        Pt(snap(self.0.saturating_add(rhs.0)))
    }
}

impl std::ops::AddAssign for Pt {
    fn add_assign(&mut self, rhs: Pt) {
        *self = *self + rhs;
    }
}

impl std::ops::Sub for Pt {
    type Output = Pt;
    fn sub(self, rhs: Pt) -> Pt {
        Pt(snap(self.0.saturating_sub(rhs.0)))
    }
}

impl std::ops::SubAssign for Pt {
    fn sub_assign(&mut self, rhs: Pt) {
        *self = *self - rhs;
    }
}

impl std::ops::Mul<i32> for Pt {
    type Output = Pt;
    fn mul(self, rhs: i32) -> Pt {
        Pt(snap(self.0.saturating_mul_int(rhs as i64)))
    }
}

impl std::ops::Div<i32> for Pt {
    type Output = Pt;
    fn div(self, rhs: i32) -> Pt {
        self.mul_ratio(1, rhs)
    }
}

impl std::ops::Neg for Pt {
    type Output = Pt;
    fn neg(self) -> Pt {
        Pt(self.0.saturating_neg())
    }
}

impl std::iter::Sum for Pt {
    fn sum<I: Iterator<Item = Pt>>(iter: I) -> Pt {
        iter.fold(Pt::ZERO, |acc, v| acc + v)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Size {
    pub width: Pt,
    pub height: Pt,
}

impl Size {
    pub fn new(width: Pt, height: Pt) -> Self {
        Self { width, height }
    }

    pub fn a4() -> Self {
        Self::from_mm(210.0, 297.0)
    }

    pub fn letter() -> Self {
        Self {
            width: Pt::from_i32(612),
            height: Pt::from_i32(792),
        }
    }

    pub fn from_mm(width_mm: f32, height_mm: f32) -> Self {
        Self {
            width: Pt::from_f32(width_mm * 72.0 / 25.4),
            height: Pt::from_f32(height_mm * 72.0 / 25.4),
        }
    }

    pub fn landscape(self) -> Self {
        Self {
            width: self.height,
            height: self.width,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: Pt,
    pub y: Pt,
    pub width: Pt,
    pub height: Pt,
}

impl Rect {
    pub fn bottom(&self) -> Pt {
        self.y + self.height
    }

    pub fn right(&self) -> Pt {
        self.x + self.width
    }
}

/// Four edge lengths, used for page margins, box margins and paddings.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Margins {
    pub top: Pt,
    pub right: Pt,
    pub bottom: Pt,
    pub left: Pt,
}

impl Margins {
    pub fn all(value: f32) -> Self {
        let v = Pt::from_f32(value);
        Self {
            top: v,
            right: v,
            bottom: v,
            left: v,
        }
    }

    pub fn symmetric(vertical: Pt, horizontal: Pt) -> Self {
        Self {
            top: vertical,
            right: horizontal,
            bottom: vertical,
            left: horizontal,
        }
    }

    pub fn horizontal(&self) -> Pt {
        self.left + self.right
    }

    pub fn vertical(&self) -> Pt {
        self.top + self.bottom
    }

    pub fn is_zero(&self) -> bool {
        self.top == Pt::ZERO
            && self.right == Pt::ZERO
            && self.bottom == Pt::ZERO
            && self.left == Pt::ZERO
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl Color {
    pub const BLACK: Color = Color {
        r: 0.0,
        g: 0.0,
        b: 0.0,
    };

    pub const WHITE: Color = Color {
        r: 1.0,
        g: 1.0,
        b: 1.0,
    };

    pub fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b }
    }

    pub fn from_rgb8(r: u8, g: u8, b: u8) -> Self {
        Self {
            r: r as f32 / 255.0,
            g: g as f32 / 255.0,
            b: b as f32 / 255.0,
        }
    }
}
