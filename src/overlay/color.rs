use serde::{Deserialize, Serialize};

/// Straight-alpha color with normalized `0..=1` channels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ColorDef {
    pub r: f64,
    pub g: f64,
    pub b: f64,
    pub a: f64,
}

impl ColorDef {
    pub const WHITE: Self = Self::rgba(1.0, 1.0, 1.0, 1.0);
    pub const BLACK: Self = Self::rgba(0.0, 0.0, 0.0, 1.0);

    pub const fn rgba(r: f64, g: f64, b: f64, a: f64) -> Self {
        Self { r, g, b, a }
    }

    pub fn from_rgba8(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self::rgba(
            f64::from(r) / 255.0,
            f64::from(g) / 255.0,
            f64::from(b) / 255.0,
            f64::from(a) / 255.0,
        )
    }

    /// Parse a CSS-ish color string; unknown input falls back to white.
    pub fn parse_or_white(s: &str) -> Self {
        match parse_color(s) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(color = s, error = %e, "invalid color, using white");
                Self::WHITE
            }
        }
    }

    /// Return a copy with alpha multiplied by `opacity`.
    pub fn with_opacity(self, opacity: f64) -> Self {
        Self {
            a: (self.a * opacity.clamp(0.0, 1.0)).clamp(0.0, 1.0),
            ..self
        }
    }

    /// Straight-alpha RGBA8, the representation `vello_cpu` paints take.
    pub fn to_rgba8(self) -> [u8; 4] {
        [
            to_u8(self.r),
            to_u8(self.g),
            to_u8(self.b),
            to_u8(self.a),
        ]
    }

    pub(crate) fn to_paint(self) -> vello_cpu::peniko::Color {
        let [r, g, b, a] = self.to_rgba8();
        vello_cpu::peniko::Color::from_rgba8(r, g, b, a)
    }

    /// `#RRGGBBAA` form, used in diagnostics.
    pub fn to_hex(self) -> String {
        let [r, g, b, a] = self.to_rgba8();
        format!("#{r:02X}{g:02X}{b:02X}{a:02X}")
    }
}

fn to_u8(x: f64) -> u8 {
    (x.clamp(0.0, 1.0) * 255.0).round() as u8
}

impl<'de> Deserialize<'de> for ColorDef {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Str(String),
            RgbaObj {
                r: f64,
                g: f64,
                b: f64,
                #[serde(default = "one")]
                a: f64,
            },
            Arr(Vec<f64>),
        }

        fn one() -> f64 {
            1.0
        }

        match Repr::deserialize(deserializer)? {
            Repr::Str(s) => parse_color(&s).map_err(serde::de::Error::custom),
            Repr::RgbaObj { r, g, b, a } => Ok(Self::rgba(r, g, b, a)),
            Repr::Arr(v) => match v.as_slice() {
                [r, g, b] => Ok(Self::rgba(*r, *g, *b, 1.0)),
                [r, g, b, a] => Ok(Self::rgba(*r, *g, *b, *a)),
                _ => Err(serde::de::Error::custom(
                    "rgba array must have len 3 ([r,g,b]) or 4 ([r,g,b,a])",
                )),
            },
        }
    }
}

/// Parse `#RGB`, `#RRGGBB`, `#RRGGBBAA`, `rgb(..)`, `rgba(..)`, `transparent` or a basic
/// color name.
pub fn parse_color(s: &str) -> Result<ColorDef, String> {
    let s = s.trim();
    if s.starts_with('#') {
        return parse_hex(s);
    }
    let lower = s.to_ascii_lowercase();
    if let Some(args) = lower
        .strip_prefix("rgba(")
        .or_else(|| lower.strip_prefix("rgb("))
    {
        return parse_rgb_fn(args);
    }
    named(&lower).ok_or_else(|| format!("unrecognized color \"{s}\""))
}

fn named(name: &str) -> Option<ColorDef> {
    let c = match name {
        "transparent" => ColorDef::rgba(0.0, 0.0, 0.0, 0.0),
        "white" => ColorDef::WHITE,
        "black" => ColorDef::BLACK,
        "red" => ColorDef::rgba(1.0, 0.0, 0.0, 1.0),
        "green" => ColorDef::rgba(0.0, 1.0, 0.0, 1.0),
        "blue" => ColorDef::rgba(0.0, 0.0, 1.0, 1.0),
        "yellow" => ColorDef::rgba(1.0, 1.0, 0.0, 1.0),
        "cyan" => ColorDef::rgba(0.0, 1.0, 1.0, 1.0),
        "magenta" => ColorDef::rgba(1.0, 0.0, 1.0, 1.0),
        "gray" | "grey" => ColorDef::from_rgba8(0x88, 0x88, 0x88, 0xFF),
        _ => return None,
    };
    Some(c)
}

fn parse_hex(s: &str) -> Result<ColorDef, String> {
    let s = s.strip_prefix('#').unwrap_or(s);
    if !s.is_ascii() {
        return Err("hex color must be ascii".to_owned());
    }

    fn hex_byte(pair: &str) -> Result<u8, String> {
        u8::from_str_radix(pair, 16).map_err(|_| format!("invalid hex byte \"{pair}\""))
    }
    fn hex_nibble(c: &str) -> Result<u8, String> {
        let v = u8::from_str_radix(c, 16).map_err(|_| format!("invalid hex digit \"{c}\""))?;
        Ok(v * 17)
    }

    let (r, g, b, a) = match s.len() {
        3 => (
            hex_nibble(&s[0..1])?,
            hex_nibble(&s[1..2])?,
            hex_nibble(&s[2..3])?,
            255,
        ),
        6 => (
            hex_byte(&s[0..2])?,
            hex_byte(&s[2..4])?,
            hex_byte(&s[4..6])?,
            255,
        ),
        8 => (
            hex_byte(&s[0..2])?,
            hex_byte(&s[2..4])?,
            hex_byte(&s[4..6])?,
            hex_byte(&s[6..8])?,
        ),
        _ => {
            return Err("hex color must be #RGB, #RRGGBB or #RRGGBBAA".to_owned());
        }
    };

    Ok(ColorDef::from_rgba8(r, g, b, a))
}

fn parse_rgb_fn(args: &str) -> Result<ColorDef, String> {
    let inner = args
        .strip_suffix(')')
        .ok_or_else(|| "rgb()/rgba() is missing ')'".to_owned())?;
    let parts: Vec<&str> = inner.split(',').map(str::trim).collect();

    fn channel(p: &str) -> Result<f64, String> {
        let v: f64 = p
            .parse()
            .map_err(|_| format!("invalid rgb channel \"{p}\""))?;
        Ok((v / 255.0).clamp(0.0, 1.0))
    }

    match parts.as_slice() {
        [r, g, b] => Ok(ColorDef::rgba(channel(r)?, channel(g)?, channel(b)?, 1.0)),
        [r, g, b, a] => {
            let a: f64 = a.parse().map_err(|_| format!("invalid alpha \"{a}\""))?;
            Ok(ColorDef::rgba(
                channel(r)?,
                channel(g)?,
                channel(b)?,
                a.clamp(0.0, 1.0),
            ))
        }
        _ => Err("rgb() takes 3 channels, rgba() takes 4".to_owned()),
    }
}

#[cfg(test)]
#[path = "../../tests/unit/overlay/color.rs"]
mod tests;
