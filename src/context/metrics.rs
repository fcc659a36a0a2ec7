//! Text measurement fill-in and memoisation.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::Result;

pub const DEFAULT_FONT: &str = "16px sans-serif";
const DEFAULT_PX: f64 = 16.0;

/// The `TextMetrics` fields pages fingerprint. `None` means the host did
/// not report the field.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TextMetrics {
    pub width: Option<f64>,
    pub actual_bounding_box_left: Option<f64>,
    pub actual_bounding_box_right: Option<f64>,
    pub actual_bounding_box_ascent: Option<f64>,
    pub actual_bounding_box_descent: Option<f64>,
}

impl TextMetrics {
    /// Every field filled with a finite value.
    pub fn is_complete(&self) -> bool {
        [
            self.width,
            self.actual_bounding_box_left,
            self.actual_bounding_box_right,
            self.actual_bounding_box_ascent,
            self.actual_bounding_box_descent,
        ]
        .iter()
        .all(|v| v.is_some_and(f64::is_finite))
    }

    /// Replace missing or non-finite fields with those of `fallback`.
    pub fn filled_from(&self, fallback: &TextMetrics) -> TextMetrics {
        fn pick(v: Option<f64>, alt: Option<f64>) -> Option<f64> {
            match v {
                Some(x) if x.is_finite() => Some(x),
                _ => alt,
            }
        }
        TextMetrics {
            width: pick(self.width, fallback.width),
            actual_bounding_box_left: pick(self.actual_bounding_box_left, fallback.actual_bounding_box_left),
            actual_bounding_box_right: pick(self.actual_bounding_box_right, fallback.actual_bounding_box_right),
            actual_bounding_box_ascent: pick(self.actual_bounding_box_ascent, fallback.actual_bounding_box_ascent),
            actual_bounding_box_descent: pick(
                self.actual_bounding_box_descent,
                fallback.actual_bounding_box_descent,
            ),
        }
    }
}

static PX_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d+(?:\.\d+)?)px").unwrap());

/// Font size in CSS pixels from a `font` shorthand. 16 when absent.
pub fn font_px(font: &str) -> f64 {
    PX_REGEX
        .captures(font)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .filter(|v| v.is_finite() && *v > 0.0)
        .unwrap_or(DEFAULT_PX)
}

pub fn normalize_font(font: &str) -> String {
    let trimmed = font.trim();
    if trimmed.is_empty() {
        DEFAULT_FONT.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Size-and-length estimate used where the host reports nothing usable.
pub fn approximate(font: &str, text: &str) -> TextMetrics {
    let px = font_px(font);
    let width = (0.6 * px * text.chars().count() as f64).max(1.0);
    TextMetrics {
        width: Some(width),
        actual_bounding_box_left: Some(0.0),
        actual_bounding_box_right: Some(width),
        actual_bounding_box_ascent: Some(0.8 * px),
        actual_bounding_box_descent: Some(0.2 * px),
    }
}

pub fn cache_key(font: &str, text: &str, dpr: f64) -> String {
    format!("{font}\u{241F}{text}\u{241F}{dpr}")
}

/// Completed metrics per `(font, text, dpr)`. The first answer sticks.
#[derive(Debug, Default)]
pub struct MetricsCache {
    entries: RefCell<HashMap<String, TextMetrics>>,
}

impl MetricsCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    /// Cached metrics, or `native` completed with the approximation. A
    /// failed native measurement falls back to the approximation alone.
    pub fn measure(
        &self,
        font: &str,
        text: &str,
        dpr: f64,
        native: impl FnOnce() -> Result<TextMetrics>,
    ) -> TextMetrics {
        let key = cache_key(font, text, dpr);
        if let Some(hit) = self.entries.borrow().get(&key) {
            return *hit;
        }
        let approx = approximate(font, text);
        let metrics = match native() {
            Ok(m) => m.filled_from(&approx),
            Err(err) => {
                log::debug!("[metrics] native measureText failed: {}", err);
                approx
            }
        };
        self.entries.borrow_mut().insert(key, metrics);
        metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SpoofError;
    use std::cell::Cell;

    #[test]
    fn test_font_px() {
        assert_eq!(font_px("bold 24px Arial"), 24.0);
        assert_eq!(font_px("italic 10.5px serif"), 10.5);
        assert_eq!(font_px("1em serif"), 16.0);
        assert_eq!(font_px(""), 16.0);
    }

    #[test]
    fn test_approximation() {
        let m = approximate("20px serif", "abcd");
        assert_eq!(m.width, Some(48.0));
        assert_eq!(m.actual_bounding_box_right, Some(48.0));
        assert_eq!(m.actual_bounding_box_ascent, Some(16.0));
        assert_eq!(m.actual_bounding_box_descent, Some(4.0));
        assert_eq!(approximate("20px serif", "").width, Some(1.0));
    }

    #[test]
    fn test_fill_keeps_native_values() {
        let native = TextMetrics {
            width: Some(31.5),
            actual_bounding_box_left: Some(f64::NAN),
            ..Default::default()
        };
        let m = native.filled_from(&approximate(DEFAULT_FONT, "hi"));
        assert_eq!(m.width, Some(31.5));
        assert_eq!(m.actual_bounding_box_left, Some(0.0));
        assert!(m.is_complete());
    }

    #[test]
    fn test_cache_is_stable() {
        let cache = MetricsCache::new();
        let calls = Cell::new(0);
        let native = || {
            calls.set(calls.get() + 1);
            Ok(TextMetrics { width: Some(10.0 + calls.get() as f64), ..Default::default() })
        };
        let a = cache.measure(DEFAULT_FONT, "hello", 1.0, native);
        let b = cache.measure(DEFAULT_FONT, "hello", 1.0, || Ok(TextMetrics::default()));
        assert_eq!(a, b);
        assert_eq!(calls.get(), 1);
        assert_eq!(cache.len(), 1);

        let c = cache.measure(DEFAULT_FONT, "hello", 2.0, || Err(SpoofError::host("gone")));
        assert_eq!(c, approximate(DEFAULT_FONT, "hello"));
        assert_eq!(cache.len(), 2);
    }
}
