//! Element struct types for the template model.
//!
//! All types derive `Serialize + Deserialize` so the same types work for
//! both Rust API construction and JSON deserialization.
//!
//! Each element variant carries a common [`Placement`] (position, size,
//! rotation, opacity, visibility, z-index) flattened into its JSON object,
//! plus variant-specific fields.

use serde::{Deserialize, Serialize};

// ============================================================================
// COLORS
// ============================================================================

/// An RGBA color.
///
/// Serialized as a hex string: `#RRGGBB` or `#RRGGBBAA`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const BLACK: Color = Color::rgb(0, 0, 0);
    pub const WHITE: Color = Color::rgb(255, 255, 255);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    /// Parse `#RRGGBB` or `#RRGGBBAA` (case-insensitive).
    pub fn from_hex(s: &str) -> Option<Self> {
        let hex = s.strip_prefix('#')?;
        let byte = |i: usize| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok();
        match hex.len() {
            6 => Some(Color::rgb(byte(0)?, byte(2)?, byte(4)?)),
            8 => Some(Color::rgba(byte(0)?, byte(2)?, byte(4)?, byte(6)?)),
            _ => None,
        }
    }

    pub fn to_hex(self) -> String {
        if self.a == 255 {
            format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
        } else {
            format!("#{:02x}{:02x}{:02x}{:02x}", self.r, self.g, self.b, self.a)
        }
    }
}

impl Serialize for Color {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Color {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Color::from_hex(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid color '{s}'")))
    }
}

/// A color reference: either a literal hex color or a brand token (`$primary`).
///
/// Tokens resolve against the template's brand color map at render time;
/// validation rejects tokens the template does not declare.
#[derive(Debug, Clone, PartialEq)]
pub enum ColorSpec {
    Hex(Color),
    Token(String),
}

impl ColorSpec {
    /// Resolve to a concrete color, looking tokens up in the brand map.
    pub fn resolve(&self, brand: &std::collections::HashMap<String, Color>) -> Option<Color> {
        match self {
            ColorSpec::Hex(c) => Some(*c),
            ColorSpec::Token(name) => brand.get(name).copied(),
        }
    }
}

impl Default for ColorSpec {
    fn default() -> Self {
        ColorSpec::Hex(Color::BLACK)
    }
}

impl Serialize for ColorSpec {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ColorSpec::Hex(c) => serializer.serialize_str(&c.to_hex()),
            ColorSpec::Token(name) => serializer.serialize_str(&format!("${name}")),
        }
    }
}

impl<'de> Deserialize<'de> for ColorSpec {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        if let Some(token) = s.strip_prefix('$') {
            return Ok(ColorSpec::Token(token.to_string()));
        }
        Color::from_hex(&s)
            .map(ColorSpec::Hex)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid color '{s}'")))
    }
}

// ============================================================================
// COMMON PLACEMENT
// ============================================================================

fn default_opacity() -> f32 {
    1.0
}

fn default_true() -> bool {
    true
}

/// Common positioning and compositing attributes shared by every element.
///
/// Flattened into each element's JSON object:
/// `{"type": "text", "id": "t1", "x": 10, "y": 20, "z_index": 3, ...}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Placement {
    #[serde(default)]
    pub x: f32,
    #[serde(default)]
    pub y: f32,
    /// Explicit width. When absent the element sizes to its content.
    #[serde(default)]
    pub width: Option<f32>,
    #[serde(default)]
    pub height: Option<f32>,
    /// Rotation in degrees, clockwise around the element center.
    #[serde(default)]
    pub rotation: f32,
    /// Opacity (0.0 = transparent, 1.0 = fully opaque).
    #[serde(default = "default_opacity")]
    pub opacity: f32,
    /// Baseline visibility. A falsy record visibility-field can hide the
    /// element for one record, but never un-hides an explicit `false` here.
    #[serde(default = "default_true")]
    pub visible: bool,
    /// Locked in the editor; has no effect on rendering.
    #[serde(default)]
    pub locked: bool,
    /// Composite order: ascending, ties broken by declaration order.
    #[serde(default)]
    pub z_index: i32,
}

impl Default for Placement {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: None,
            height: None,
            rotation: 0.0,
            opacity: 1.0,
            visible: true,
            locked: false,
            z_index: 0,
        }
    }
}

impl Placement {
    pub fn at(x: f32, y: f32) -> Self {
        Self {
            x,
            y,
            ..Default::default()
        }
    }
}

// ============================================================================
// TEXT ELEMENT
// ============================================================================

/// Font weight. Maps to the regular/bold faces of the configured family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FontWeight {
    #[default]
    Normal,
    Bold,
}

/// Font style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FontStyle {
    #[default]
    Normal,
    Italic,
}

fn default_font_family() -> String {
    "default".to_string()
}

fn default_font_size() -> f32 {
    24.0
}

/// Font selection for a text element.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FontSpec {
    #[serde(default = "default_font_family")]
    pub family: String,
    #[serde(default = "default_font_size")]
    pub size: f32,
    #[serde(default)]
    pub weight: FontWeight,
    #[serde(default)]
    pub style: FontStyle,
}

impl Default for FontSpec {
    fn default() -> Self {
        Self {
            family: default_font_family(),
            size: default_font_size(),
            weight: FontWeight::Normal,
            style: FontStyle::Normal,
        }
    }
}

/// Auto-fit: shrink font size from `max_size` toward `min_size` until the
/// content fits the element's width/line constraints. If the content still
/// overflows at `min_size` it is clipped, never shrunk further.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoFit {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub min_size: f32,
    pub max_size: f32,
    /// Disallow wrapping: the whole content must fit on one line.
    #[serde(default)]
    pub single_line: bool,
}

/// How a style rule's `pattern` selector matches a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternMode {
    #[default]
    Substring,
    Regex,
}

/// Which tokens a style rule selects.
///
/// Unit variants serialize as bare strings, `{"word_index": 1}` and
/// `{"pattern": "VIP"}` as single-key objects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleSelector {
    FirstWord,
    LastWord,
    WordIndex(usize),
    Pattern(String),
}

/// A per-word style override.
///
/// Rules apply in declaration order; for each token the *last* matching rule
/// wins, and a winning rule's style carries through subsequent unmatched
/// tokens to the end of the content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StyleRule {
    pub selector: RuleSelector,
    /// Matching semantics for `pattern` selectors (substring or regex).
    #[serde(default, rename = "match")]
    pub match_mode: PatternMode,
    #[serde(default)]
    pub color: Option<ColorSpec>,
    #[serde(default)]
    pub weight: Option<FontWeight>,
    #[serde(default)]
    pub size: Option<f32>,
}

/// Text element: a bound data field or literal content with styling.
///
/// Exactly one of `field` / `content` is normally set; when both are present
/// the bound field wins and `content` is the fallback for records that lack
/// the field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextElement {
    pub id: String,
    #[serde(flatten)]
    pub placement: Placement,
    /// Bound data key (dotted path into the record).
    #[serde(default)]
    pub field: Option<String>,
    /// Literal content, or fallback when `field` is unresolvable.
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub font: FontSpec,
    #[serde(default)]
    pub color: ColorSpec,
    /// Width budget for auto-fit and wrapping. Defaults to `placement.width`.
    #[serde(default)]
    pub max_width: Option<f32>,
    /// Line budget when wrapping.
    #[serde(default)]
    pub max_lines: Option<usize>,
    #[serde(default)]
    pub auto_fit: Option<AutoFit>,
    #[serde(default)]
    pub style_rules: Vec<StyleRule>,
}

impl TextElement {
    pub fn literal(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            placement: Placement::default(),
            field: None,
            content: Some(content.into()),
            font: FontSpec::default(),
            color: ColorSpec::default(),
            max_width: None,
            max_lines: None,
            auto_fit: None,
            style_rules: Vec::new(),
        }
    }

    pub fn bound(id: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            field: Some(field.into()),
            content: None,
            ..Self::literal(id, "")
        }
    }
}

// ============================================================================
// IMAGE ELEMENT
// ============================================================================

/// How an image is resampled into its target box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleMode {
    /// Cover the box, cropping overflow. Preserves aspect ratio.
    #[default]
    Fill,
    /// Contain within the box, letterboxing. Preserves aspect ratio.
    Fit,
    /// Distort to exactly the box dimensions.
    Stretch,
}

/// Dynamic position: per-axis field references and/or arithmetic formulas
/// evaluated against the record. A formula wins over a field reference for
/// the same axis; an axis with neither falls back to the static placement.
///
/// Formulas are small infix expressions over record fields and numeric
/// literals, e.g. `"badge_x + 12"` or `"slot * 40 - 8"`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DynamicPosition {
    #[serde(default)]
    pub x_field: Option<String>,
    #[serde(default)]
    pub y_field: Option<String>,
    #[serde(default)]
    pub x_formula: Option<String>,
    #[serde(default)]
    pub y_formula: Option<String>,
}

impl DynamicPosition {
    pub fn is_empty(&self) -> bool {
        self.x_field.is_none()
            && self.y_field.is_none()
            && self.x_formula.is_none()
            && self.y_formula.is_none()
    }
}

/// Image element: a stored asset placed into the card.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageElement {
    pub id: String,
    #[serde(flatten)]
    pub placement: Placement,
    /// Asset reference, resolved through the object store
    /// (`file ref`, or an `http(s)://` URL).
    pub asset: String,
    /// Record field controlling visibility for this record only.
    #[serde(default)]
    pub visible_field: Option<String>,
    #[serde(default)]
    pub dynamic_position: Option<DynamicPosition>,
    #[serde(default)]
    pub scale_mode: ScaleMode,
}

impl ImageElement {
    pub fn new(id: impl Into<String>, asset: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            placement: Placement::default(),
            asset: asset.into(),
            visible_field: None,
            dynamic_position: None,
            scale_mode: ScaleMode::Fill,
        }
    }
}

// ============================================================================
// QR ELEMENT
// ============================================================================

/// QR payload kind: how the bound field value becomes the encoded string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QrPayloadKind {
    #[default]
    Url,
    Text,
    Vcard,
    Email,
    Phone,
}

/// QR error correction level, trading payload density for damage tolerance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EcLevel {
    L,
    #[default]
    M,
    Q,
    H,
}

fn default_qr_margin() -> u32 {
    4
}

fn default_dark() -> ColorSpec {
    ColorSpec::Hex(Color::BLACK)
}

fn default_light() -> ColorSpec {
    ColorSpec::Hex(Color::WHITE)
}

/// Centered logo overlay on a QR code.
///
/// The logo area eats into the error-correction budget; keeping it within
/// the level's damage tolerance is the template author's responsibility.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QrLogo {
    pub asset: String,
    /// Logo edge length in pixels (square, centered).
    pub size: u32,
}

/// QR code element bound to a record field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QrElement {
    pub id: String,
    #[serde(flatten)]
    pub placement: Placement,
    #[serde(default)]
    pub payload: QrPayloadKind,
    /// Record field supplying the payload value.
    pub field: String,
    /// Rendered edge length in pixels (square).
    pub size: u32,
    /// Quiet-zone margin in modules.
    #[serde(default = "default_qr_margin")]
    pub margin: u32,
    #[serde(default = "default_dark")]
    pub dark: ColorSpec,
    #[serde(default = "default_light")]
    pub light: ColorSpec,
    #[serde(default)]
    pub error_correction: EcLevel,
    #[serde(default)]
    pub logo: Option<QrLogo>,
}

impl QrElement {
    pub fn new(id: impl Into<String>, field: impl Into<String>, size: u32) -> Self {
        Self {
            id: id.into(),
            placement: Placement::default(),
            payload: QrPayloadKind::Url,
            field: field.into(),
            size,
            margin: default_qr_margin(),
            dark: default_dark(),
            light: default_light(),
            error_correction: EcLevel::M,
            logo: None,
        }
    }
}

// ============================================================================
// TABLE ELEMENT
// ============================================================================

fn default_border_width() -> f32 {
    1.0
}

/// Table border styling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableBorder {
    #[serde(default)]
    pub color: ColorSpec,
    #[serde(default = "default_border_width")]
    pub width: f32,
}

impl Default for TableBorder {
    fn default() -> Self {
        Self {
            color: ColorSpec::default(),
            width: default_border_width(),
        }
    }
}

/// One sparse table cell: a grid address plus an optional nested element.
///
/// The nested element's placement is interpreted relative to the cell origin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableCell {
    pub row: usize,
    pub column: usize,
    #[serde(default)]
    pub element: Option<super::Element>,
}

/// Table element: a rows × columns grid of fixed-size cells, each optionally
/// holding a nested element.
///
/// With `auto_collapse`, rows and columns whose every cell is empty or
/// hidden for the current record are dropped before geometry is assigned;
/// remaining cells are remapped to the contracted grid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableElement {
    pub id: String,
    #[serde(flatten)]
    pub placement: Placement,
    pub rows: usize,
    pub columns: usize,
    pub cell_width: f32,
    pub cell_height: f32,
    #[serde(default)]
    pub border: Option<TableBorder>,
    #[serde(default)]
    pub background: Option<ColorSpec>,
    #[serde(default)]
    pub auto_collapse: bool,
    #[serde(default)]
    pub cells: Vec<TableCell>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn color_hex_roundtrip() {
        let c = Color::from_hex("#1a2B3c").unwrap();
        assert_eq!(c, Color::rgb(0x1a, 0x2b, 0x3c));
        assert_eq!(c.to_hex(), "#1a2b3c");

        let c = Color::from_hex("#1a2b3c80").unwrap();
        assert_eq!(c.a, 0x80);
        assert_eq!(c.to_hex(), "#1a2b3c80");
    }

    #[test]
    fn color_hex_rejects_garbage() {
        assert!(Color::from_hex("1a2b3c").is_none()); // missing '#'
        assert!(Color::from_hex("#12345").is_none());
        assert!(Color::from_hex("#zzzzzz").is_none());
    }

    #[test]
    fn color_spec_token_parsing() {
        let spec: ColorSpec = serde_json::from_str(r#""$primary""#).unwrap();
        assert_eq!(spec, ColorSpec::Token("primary".into()));

        let spec: ColorSpec = serde_json::from_str(r##""#ff0000""##).unwrap();
        assert_eq!(spec, ColorSpec::Hex(Color::rgb(255, 0, 0)));
    }

    #[test]
    fn color_spec_resolves_tokens() {
        let mut brand = std::collections::HashMap::new();
        brand.insert("primary".to_string(), Color::rgb(10, 20, 30));

        assert_eq!(
            ColorSpec::Token("primary".into()).resolve(&brand),
            Some(Color::rgb(10, 20, 30))
        );
        assert_eq!(ColorSpec::Token("missing".into()).resolve(&brand), None);
    }

    #[test]
    fn rule_selector_json_shapes() {
        let s: RuleSelector = serde_json::from_str(r#""first_word""#).unwrap();
        assert_eq!(s, RuleSelector::FirstWord);

        let s: RuleSelector = serde_json::from_str(r#"{"word_index": 2}"#).unwrap();
        assert_eq!(s, RuleSelector::WordIndex(2));

        let s: RuleSelector = serde_json::from_str(r#"{"pattern": "VIP"}"#).unwrap();
        assert_eq!(s, RuleSelector::Pattern("VIP".into()));
    }

    #[test]
    fn placement_defaults() {
        let p: Placement = serde_json::from_str("{}").unwrap();
        assert!(p.visible);
        assert_eq!(p.opacity, 1.0);
        assert_eq!(p.z_index, 0);
        assert_eq!(p.rotation, 0.0);
    }
}
