//! Filename templates such as `captureXXXXXX`.
//!
//! The first run of `X` characters is the counter placeholder. Text before it
//! is the prefix, text after it the suffix.

use super::SessionError;

/// Widest counter that still fits a `u64` without overflow.
const MAX_WIDTH: usize = 18;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilenamePattern {
    raw: String,
    prefix: String,
    suffix: String,
    width: usize,
}

impl FilenamePattern {
    pub fn parse(raw: &str) -> Result<Self, SessionError> {
        let start = raw
            .find('X')
            .ok_or_else(|| SessionError::InvalidPattern(raw.to_string()))?;
        let width = raw[start..].chars().take_while(|&c| c == 'X').count();
        if width > MAX_WIDTH {
            return Err(SessionError::InvalidPattern(raw.to_string()));
        }

        Ok(Self {
            raw: raw.to_string(),
            prefix: raw[..start].to_string(),
            suffix: raw[start + width..].to_string(),
            width,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Number of distinct counter values, `10^width`.
    pub fn capacity(&self) -> u64 {
        10u64.pow(self.width as u32)
    }

    /// `prefix + zero-padded n + suffix + "." + extension`.
    pub fn render(&self, n: u64, extension: &str) -> String {
        format!(
            "{}{:0width$}{}.{}",
            self.prefix,
            n,
            self.suffix,
            extension,
            width = self.width
        )
    }

    /// Counter value encoded in `name`, if `name` follows this pattern.
    ///
    /// The name must be exactly prefix, `width` ASCII digits and suffix,
    /// optionally followed by an extension.
    pub fn counter_of(&self, name: &str) -> Option<u64> {
        let rest = name.strip_prefix(self.prefix.as_str())?;
        let digits = rest.get(..self.width)?;
        if !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let tail = rest[self.width..].strip_prefix(self.suffix.as_str())?;
        if !tail.is_empty() && !tail.starts_with('.') {
            return None;
        }
        digits.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_prefix_and_width() {
        let pattern = FilenamePattern::parse("captureXXXXXX").unwrap();
        assert_eq!(pattern.width(), 6);
        assert_eq!(pattern.capacity(), 1_000_000);
        assert_eq!(pattern.render(41, "jpeg"), "capture000041.jpeg");
    }

    #[test]
    fn test_parse_with_suffix() {
        let pattern = FilenamePattern::parse("shoot-XXX-raw").unwrap();
        assert_eq!(pattern.render(7, "nef"), "shoot-007-raw.nef");
        assert_eq!(pattern.counter_of("shoot-012-raw.nef"), Some(12));
        assert_eq!(pattern.counter_of("shoot-012-rawx.nef"), None);
    }

    #[test]
    fn test_pattern_without_placeholder_is_rejected() {
        assert!(matches!(
            FilenamePattern::parse("capture"),
            Err(SessionError::InvalidPattern(_))
        ));
        assert!(FilenamePattern::parse(&"X".repeat(19)).is_err());
    }

    #[test]
    fn test_counter_of() {
        let pattern = FilenamePattern::parse("IMG_XXXX").unwrap();
        assert_eq!(pattern.counter_of("IMG_0041.jpg"), Some(41));
        assert_eq!(pattern.counter_of("IMG_0041"), Some(41));
        assert_eq!(pattern.counter_of("IMG_0041.tar.gz"), Some(41));
        assert_eq!(pattern.counter_of("IMG_00410.jpg"), None);
        assert_eq!(pattern.counter_of("IMG_041.jpg"), None);
        assert_eq!(pattern.counter_of("IMG_00a1.jpg"), None);
        assert_eq!(pattern.counter_of("DSC_0041.jpg"), None);
    }
}
