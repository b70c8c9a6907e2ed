//! Text layout: auto-fit sizing, per-word style segmentation, wrapping.

use regex::Regex;

use crate::render::backend::{TextShaper, TextStyle};
use crate::resolve::{ResolvedStyleRule, ResolvedText};
use crate::template::{Color, PatternMode, RuleSelector};

/// Fixed step for the auto-fit size search.
const AUTO_FIT_STEP: f32 = 1.0;

/// One styled run within a line. `x` is relative to the element origin.
#[derive(Debug, Clone)]
pub struct TextSpan {
    pub x: f32,
    pub text: String,
    pub style: TextStyle,
    pub color: Color,
}

/// One laid-out line. `baseline` is the baseline offset from the element top.
#[derive(Debug, Clone)]
pub struct TextLine {
    pub baseline: f32,
    pub spans: Vec<TextSpan>,
}

/// Final text geometry for one element.
#[derive(Debug, Clone)]
pub struct TextLayout {
    pub lines: Vec<TextLine>,
    /// Content extent in pixels.
    pub width: f32,
    pub height: f32,
    /// Base font size after auto-fit.
    pub size: f32,
    /// True when content still overflowed at the minimum size and was cut.
    pub clipped: bool,
}

/// Per-token effective style after rule application.
#[derive(Debug, Clone, Copy)]
struct TokenStyle<'a> {
    rule: Option<&'a ResolvedStyleRule>,
}

/// Lay out a resolved text element.
///
/// Auto-fit starts at `max_size` and decrements by a fixed step while the
/// content exceeds `max_width` (or, when `max_lines` is set, while the
/// wrapped line count exceeds it), stopping at the first fit or at
/// `min_size`. Content still overflowing at `min_size` is clipped, never
/// shrunk further.
pub fn layout_text(shaper: &dyn TextShaper, text: &ResolvedText) -> TextLayout {
    let tokens: Vec<&str> = text.content.split_whitespace().collect();
    if tokens.is_empty() {
        return TextLayout {
            lines: Vec::new(),
            width: 0.0,
            height: 0.0,
            size: text.font.size,
            clipped: false,
        };
    }

    let token_styles = assign_rules(&tokens, &text.style_rules);

    let fit = text.auto_fit.as_ref().filter(|f| f.enabled);
    let single_line = fit.is_some_and(|f| f.single_line);

    let mut size = fit.map_or(text.font.size, |f| f.max_size);
    let min_size = fit.map_or(text.font.size, |f| f.min_size);

    let mut wrapped = wrap(shaper, text, &tokens, &token_styles, size, single_line);
    while fit.is_some() && size > min_size && !fits(text, &wrapped, single_line) {
        size = (size - AUTO_FIT_STEP).max(min_size);
        wrapped = wrap(shaper, text, &tokens, &token_styles, size, single_line);
    }

    finish(shaper, text, wrapped, size, single_line)
}

/// Walk tokens left to right assigning the last matching rule; a matched
/// rule carries through subsequent unmatched tokens to end of content.
fn assign_rules<'a>(tokens: &[&str], rules: &'a [ResolvedStyleRule]) -> Vec<TokenStyle<'a>> {
    // Compile regex patterns once per layout pass. Validation already
    // checked them, so a failure here just disables the rule.
    let compiled: Vec<Option<Regex>> = rules
        .iter()
        .map(|rule| match (&rule.selector, rule.match_mode) {
            (RuleSelector::Pattern(p), PatternMode::Regex) => Regex::new(p).ok(),
            _ => None,
        })
        .collect();

    let mut current: Option<&ResolvedStyleRule> = None;
    tokens
        .iter()
        .enumerate()
        .map(|(index, token)| {
            let matched = rules
                .iter()
                .zip(&compiled)
                .filter(|(rule, regex)| {
                    matches_token(rule, regex.as_ref(), index, tokens.len(), token)
                })
                .map(|(rule, _)| rule)
                .next_back();
            if matched.is_some() {
                current = matched;
            }
            TokenStyle { rule: current }
        })
        .collect()
}

fn matches_token(
    rule: &ResolvedStyleRule,
    regex: Option<&Regex>,
    index: usize,
    count: usize,
    token: &str,
) -> bool {
    match &rule.selector {
        RuleSelector::FirstWord => index == 0,
        RuleSelector::LastWord => index + 1 == count,
        RuleSelector::WordIndex(n) => index == *n,
        RuleSelector::Pattern(pattern) => match rule.match_mode {
            PatternMode::Substring => token.contains(pattern.as_str()),
            PatternMode::Regex => regex.is_some_and(|re| re.is_match(token)),
        },
    }
}

fn token_text_style(text: &ResolvedText, style: TokenStyle, base_size: f32) -> TextStyle {
    TextStyle {
        family: text.font.family.clone(),
        // A rule's size override is absolute; auto-fit only moves the base.
        size: style.rule.and_then(|r| r.size).unwrap_or(base_size),
        weight: style
            .rule
            .and_then(|r| r.weight)
            .unwrap_or(text.font.weight),
        style: text.font.style,
    }
}

fn token_color(text: &ResolvedText, style: TokenStyle) -> Color {
    style.rule.and_then(|r| r.color).unwrap_or(text.color)
}

/// A wrapped token: which line it landed on and its measured advance.
struct WrappedToken {
    line: usize,
    width: f32,
    space_before: f32,
}

struct Wrapped {
    tokens: Vec<WrappedToken>,
    line_widths: Vec<f32>,
}

fn wrap(
    shaper: &dyn TextShaper,
    text: &ResolvedText,
    tokens: &[&str],
    styles: &[TokenStyle],
    base_size: f32,
    single_line: bool,
) -> Wrapped {
    let max_width = text.max_width.filter(|_| !single_line);

    let mut out = Vec::with_capacity(tokens.len());
    let mut line_widths = vec![0.0f32];
    let mut line = 0usize;
    let mut cursor = 0.0f32;

    for (token, style) in tokens.iter().zip(styles) {
        let text_style = token_text_style(text, *style, base_size);
        let width = shaper.measure_text(token, &text_style).width;
        let space = if cursor > 0.0 {
            shaper.measure_text(" ", &text_style).width
        } else {
            0.0
        };

        let overflows = max_width.is_some_and(|mw| cursor > 0.0 && cursor + space + width > mw);
        if overflows {
            line += 1;
            line_widths.push(0.0);
            cursor = 0.0;
            out.push(WrappedToken {
                line,
                width,
                space_before: 0.0,
            });
            cursor += width;
        } else {
            out.push(WrappedToken {
                line,
                width,
                space_before: space,
            });
            cursor += space + width;
        }
        line_widths[line] = cursor;
    }

    Wrapped {
        tokens: out,
        line_widths,
    }
}

fn fits(text: &ResolvedText, wrapped: &Wrapped, single_line: bool) -> bool {
    if let Some(max_width) = text.max_width
        && wrapped.line_widths.iter().any(|w| *w > max_width)
    {
        return false;
    }
    if single_line && wrapped.line_widths.len() > 1 {
        return false;
    }
    if let Some(max_lines) = text.max_lines
        && wrapped.line_widths.len() > max_lines
    {
        return false;
    }
    true
}

/// Assemble final spans and geometry from a wrap result.
fn finish(
    shaper: &dyn TextShaper,
    text: &ResolvedText,
    wrapped: Wrapped,
    size: f32,
    single_line: bool,
) -> TextLayout {
    let tokens: Vec<&str> = text.content.split_whitespace().collect();
    let styles = assign_rules(&tokens, &text.style_rules);

    // Line budget: single_line keeps the first line; max_lines truncates.
    let mut line_budget = wrapped.line_widths.len();
    if single_line {
        line_budget = line_budget.min(1);
    }
    if let Some(max_lines) = text.max_lines {
        line_budget = line_budget.min(max_lines);
    }
    let clipped = line_budget < wrapped.line_widths.len()
        || text
            .max_width
            .is_some_and(|mw| wrapped.line_widths.iter().take(line_budget).any(|w| *w > mw));

    let mut lines: Vec<TextLine> = Vec::with_capacity(line_budget);
    let mut line_heights = vec![0.0f32; line_budget];
    let mut line_ascents = vec![0.0f32; line_budget];

    for _ in 0..line_budget {
        lines.push(TextLine {
            baseline: 0.0,
            spans: Vec::new(),
        });
    }

    let mut cursor = 0.0f32;
    let mut current_line = usize::MAX;
    for ((token, style), placed) in tokens.iter().zip(&styles).zip(&wrapped.tokens) {
        if placed.line >= line_budget {
            break;
        }
        if placed.line != current_line {
            current_line = placed.line;
            cursor = 0.0;
        }
        let text_style = token_text_style(text, *style, size);
        let metrics = shaper.measure_text(token, &text_style);
        line_heights[placed.line] = line_heights[placed.line].max(metrics.height);
        line_ascents[placed.line] = line_ascents[placed.line].max(metrics.ascent);

        cursor += placed.space_before;
        lines[placed.line].spans.push(TextSpan {
            x: cursor,
            text: (*token).to_string(),
            style: text_style,
            color: token_color(text, *style),
        });
        cursor += placed.width;
    }

    let mut y = 0.0f32;
    for (i, line) in lines.iter_mut().enumerate() {
        line.baseline = y + line_ascents[i];
        y += line_heights[i];
    }

    let width = wrapped
        .line_widths
        .iter()
        .take(line_budget)
        .fold(0.0f32, |acc, w| acc.max(*w));

    TextLayout {
        lines,
        width,
        height: y,
        size,
        clipped,
    }
}
