//! Number decorators
//!
//! A decorator turns an allocated number into its display form. Decorators
//! nest: every wrapping decorator owns an explicit inner decorator that is
//! applied first, so `Prefix("D") over Pad(5)` renders `7` as `D00007`.
//! Prefixes are joined to the number without a separator unless one is
//! configured.
//!
//! [`Decorator::render`] and [`Decorator::decorate`] agree: decorating
//! numeric text is rendering its value, so `"007"` and `7` come out alike.

use std::fmt;
use std::sync::Arc;

use docnum_core::{Clock, NumberingError, NumberingResult, SystemClock};
use serde::{Deserialize, Serialize};

/// Separator placed between a prefix and the decorated number
pub const DEFAULT_SEPARATOR: &str = "";

/// Date pattern used when none is configured
pub const DEFAULT_DATE_PATTERN: &str = "yyyy-MM-dd";

/// Formats allocated numbers
pub trait Decorator: Send + Sync + fmt::Debug {
    /// Decorate number text
    ///
    /// Text that parses as an integer is taken by value, so leading zeros
    /// or a `+` sign do not survive. Other text is decorated as given.
    fn decorate(&self, text: &str) -> String;

    /// Render a number
    fn render(&self, number: i64) -> String {
        self.decorate(&number.to_string())
    }
}

// ============================================================================
// Pad
// ============================================================================

/// Left-pads with zeros to a minimum width
///
/// The width counts the sign: `-5` padded to 3 is `-05`. Text already at
/// least `width` characters long is returned unchanged, never truncated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Pad {
    width: i32,
}

impl Pad {
    /// Pad to `width`; zero or negative disables padding
    pub fn new(width: i32) -> Self {
        Self { width }
    }

    /// Configured width
    pub fn width(&self) -> i32 {
        self.width
    }
}

impl Decorator for Pad {
    fn decorate(&self, text: &str) -> String {
        let canonical = text.trim().parse::<i64>().map(|n| n.to_string());
        let text = canonical.as_deref().unwrap_or(text);
        let width = usize::try_from(self.width).unwrap_or(0);
        let len = text.chars().count();
        if len >= width {
            return text.to_string();
        }

        let (sign, digits) = match text.strip_prefix('-') {
            Some(rest) => ("-", rest),
            None => ("", text),
        };
        let mut out = String::with_capacity(width);
        out.push_str(sign);
        out.extend(std::iter::repeat('0').take(width - len));
        out.push_str(digits);
        out
    }
}

// ============================================================================
// Prefix
// ============================================================================

/// Prepends a fixed prefix and separator
#[derive(Debug)]
pub struct Prefix {
    prefix: String,
    separator: String,
    inner: Box<dyn Decorator>,
}

impl Prefix {
    /// Prefix with the default separator over an unpadded number
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            separator: DEFAULT_SEPARATOR.to_string(),
            inner: Box::new(Pad::new(0)),
        }
    }

    /// Replace the separator
    pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }

    /// Replace the inner decorator
    pub fn with_inner(mut self, inner: Box<dyn Decorator>) -> Self {
        self.inner = inner;
        self
    }
}

impl Decorator for Prefix {
    fn decorate(&self, text: &str) -> String {
        format!("{}{}{}", self.prefix, self.separator, self.inner.decorate(text))
    }
}

// ============================================================================
// DatePrefix
// ============================================================================

/// Prepends the current date
///
/// The date is read from the clock on every call, so numbers allocated on
/// either side of midnight (or New Year) carry different prefixes.
pub struct DatePrefix {
    pattern: String,
    format: String,
    separator: String,
    inner: Box<dyn Decorator>,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for DatePrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatePrefix")
            .field("pattern", &self.pattern)
            .field("separator", &self.separator)
            .field("inner", &self.inner)
            .finish()
    }
}

impl DatePrefix {
    /// Date prefix in `pattern`, read from the system clock
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the pattern uses an unsupported field.
    pub fn new(pattern: impl Into<String>) -> NumberingResult<Self> {
        let pattern = pattern.into();
        let format = translate_date_pattern(&pattern)?;
        Ok(Self {
            pattern,
            format,
            separator: DEFAULT_SEPARATOR.to_string(),
            inner: Box::new(Pad::new(0)),
            clock: Arc::new(SystemClock),
        })
    }

    /// Replace the separator
    pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }

    /// Replace the inner decorator
    pub fn with_inner(mut self, inner: Box<dyn Decorator>) -> Self {
        self.inner = inner;
        self
    }

    /// Replace the clock
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Configured date pattern
    pub fn pattern(&self) -> &str {
        &self.pattern
    }
}

impl Decorator for DatePrefix {
    fn decorate(&self, text: &str) -> String {
        let date = self.clock.now().format(&self.format);
        format!("{}{}{}", date, self.separator, self.inner.decorate(text))
    }
}

/// Translate a `yyyy-MM-dd` style date pattern into a chrono format string
///
/// Supported fields: `y` (year, `yy` for two digits), `M` (month, `MMM` and
/// `MMMM` for names), `d` (day), `H` (hour 0-23), `h` (hour 1-12), `m`
/// (minute), `s` (second), `E` (weekday name) and `a` (AM/PM). Text in single
/// quotes is literal and `''` is a quote. Every other non-letter is literal.
///
/// # Errors
///
/// Returns `Configuration` for unsupported letters or an unterminated quote.
pub fn translate_date_pattern(pattern: &str) -> NumberingResult<String> {
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if c == '\'' {
            if chars.get(i + 1) == Some(&'\'') {
                out.push('\'');
                i += 2;
                continue;
            }
            i += 1;
            let mut closed = false;
            while i < chars.len() {
                if chars[i] == '\'' {
                    if chars.get(i + 1) == Some(&'\'') {
                        out.push('\'');
                        i += 2;
                        continue;
                    }
                    closed = true;
                    i += 1;
                    break;
                }
                push_literal(&mut out, chars[i]);
                i += 1;
            }
            if !closed {
                return Err(NumberingError::configuration(format!(
                    "unterminated quote in date pattern '{}'",
                    pattern
                )));
            }
            continue;
        }

        if !c.is_ascii_alphabetic() {
            push_literal(&mut out, c);
            i += 1;
            continue;
        }

        let run = chars[i..].iter().take_while(|&&next| next == c).count();
        let spec = match (c, run) {
            ('y', 2) => "%y",
            ('y', _) => "%Y",
            ('M', 1) => "%-m",
            ('M', 2) => "%m",
            ('M', 3) => "%b",
            ('M', _) => "%B",
            ('d', 1) => "%-d",
            ('d', _) => "%d",
            ('H', 1) => "%-H",
            ('H', _) => "%H",
            ('h', 1) => "%-I",
            ('h', _) => "%I",
            ('m', 1) => "%-M",
            ('m', _) => "%M",
            ('s', 1) => "%-S",
            ('s', _) => "%S",
            ('E', 1..=3) => "%a",
            ('E', _) => "%A",
            ('a', _) => "%p",
            _ => {
                return Err(NumberingError::configuration(format!(
                    "unsupported field '{}' in date pattern '{}'",
                    c, pattern
                )))
            }
        };
        out.push_str(spec);
        i += run;
    }

    Ok(out)
}

fn push_literal(out: &mut String, c: char) {
    if c == '%' {
        out.push_str("%%");
    } else {
        out.push(c);
    }
}

// ============================================================================
// Chain specification
// ============================================================================

/// Declarative decorator chain
///
/// Built innermost first: `Pad(pad_width)`, wrapped by `Prefix` when
/// `prefix` is set, wrapped by `DatePrefix` when `date_pattern` is set.
/// Both prefixes use `separator`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoratorSpec {
    /// Zero-padding width; 0 disables padding
    pub pad_width: i32,
    /// Fixed prefix text
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    /// Separator after each prefix
    pub separator: String,
    /// Date pattern for a leading date prefix
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_pattern: Option<String>,
}

impl Default for DecoratorSpec {
    fn default() -> Self {
        Self {
            pad_width: 0,
            prefix: None,
            separator: DEFAULT_SEPARATOR.to_string(),
            date_pattern: None,
        }
    }
}

impl DecoratorSpec {
    /// Build the chain, reading dates from `clock`
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the date pattern is invalid.
    pub fn build(&self, clock: Arc<dyn Clock>) -> NumberingResult<Box<dyn Decorator>> {
        let mut chain: Box<dyn Decorator> = Box::new(Pad::new(self.pad_width));
        if let Some(prefix) = &self.prefix {
            chain = Box::new(
                Prefix::new(prefix.as_str())
                    .with_separator(self.separator.as_str())
                    .with_inner(chain),
            );
        }
        if let Some(pattern) = &self.date_pattern {
            chain = Box::new(
                DatePrefix::new(pattern.as_str())?
                    .with_separator(self.separator.as_str())
                    .with_inner(chain)
                    .with_clock(clock),
            );
        }
        Ok(chain)
    }
}
