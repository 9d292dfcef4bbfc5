//! Contention detection from service diagnostics.
//!
//! The service signals a locked position only through free text such as
//! `"bloqueo en la posición 42"`. All parsing of that text lives here.

/// Marker phrases that announce a locked position, lowercase.
const DEFAULT_MARKERS: &[&str] = &["bloqueo en la posición", "bloqueo en la posicion"];

/// Result of classifying a failure message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Position is locked; retryable. `None` when the position token is not
    /// an integer.
    Contention { position: Option<i64> },
    /// Any other failure.
    Terminal,
}

impl Classification {
    pub fn is_contention(&self) -> bool {
        matches!(self, Classification::Contention { .. })
    }
}

/// Pure classifier over diagnostic messages.
#[derive(Debug, Clone)]
pub struct ContentionClassifier {
    markers: Vec<String>,
}

impl Default for ContentionClassifier {
    fn default() -> Self {
        Self {
            markers: DEFAULT_MARKERS.iter().map(|m| m.to_string()).collect(),
        }
    }
}

impl ContentionClassifier {
    /// Classifier with custom marker phrases. Matching is case-insensitive.
    pub fn with_markers<I, S>(markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            markers: markers
                .into_iter()
                .map(|m| m.as_ref().to_lowercase())
                .filter(|m| !m.is_empty())
                .collect(),
        }
    }

    pub fn classify(&self, message: &str) -> Classification {
        let lowered = message.to_lowercase();
        for marker in &self.markers {
            if let Some(idx) = lowered.find(marker.as_str()) {
                let rest = &lowered[idx + marker.len()..];
                return Classification::Contention {
                    position: parse_position(rest),
                };
            }
        }
        Classification::Terminal
    }
}

/// Parses the integer token right after the marker, skipping whitespace and
/// an optional `:`.
fn parse_position(rest: &str) -> Option<i64> {
    let rest = rest.trim_start();
    let rest = rest.strip_prefix(':').unwrap_or(rest).trim_start();
    let end = rest
        .char_indices()
        .find(|&(i, c)| !(c.is_ascii_digit() || (i == 0 && c == '-')))
        .map(|(i, _)| i)
        .unwrap_or(rest.len());
    rest[..end].parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_position_after_marker() {
        let classifier = ContentionClassifier::default();
        assert_eq!(
            classifier.classify("bloqueo en la posición 42 intente de nuevo"),
            Classification::Contention { position: Some(42) }
        );
    }

    #[test]
    fn plain_error_is_terminal() {
        let classifier = ContentionClassifier::default();
        assert_eq!(classifier.classify("invalid key"), Classification::Terminal);
        assert_eq!(classifier.classify(""), Classification::Terminal);
    }

    #[test]
    fn unparsable_position_is_unknown_contention() {
        let classifier = ContentionClassifier::default();
        assert_eq!(
            classifier.classify("bloqueo en la posición abc"),
            Classification::Contention { position: None }
        );
        assert_eq!(
            classifier.classify("bloqueo en la posición"),
            Classification::Contention { position: None }
        );
    }

    #[test]
    fn marker_inside_wrapped_message() {
        let classifier = ContentionClassifier::default();
        let message = "failed after 5 retries, last message: Error: Bloqueo en la posición: 1024, retry";
        assert_eq!(
            classifier.classify(message),
            Classification::Contention {
                position: Some(1024)
            }
        );
    }

    #[test]
    fn unaccented_marker_and_trailing_punctuation() {
        let classifier = ContentionClassifier::default();
        assert_eq!(
            classifier.classify("bloqueo en la posicion 9."),
            Classification::Contention { position: Some(9) }
        );
    }

    #[test]
    fn lone_minus_is_unknown() {
        assert_eq!(parse_position(" - 3"), None);
        assert_eq!(parse_position("-3 x"), Some(-3));
    }

    #[test]
    fn custom_markers() {
        let classifier = ContentionClassifier::with_markers(["Slot Locked"]);
        assert_eq!(
            classifier.classify("slot locked 3"),
            Classification::Contention { position: Some(3) }
        );
        assert_eq!(
            classifier.classify("bloqueo en la posición 3"),
            Classification::Terminal
        );
    }
}
