//! Sample decoding
//!
//! Turns one datagram payload into zero or more [`MetricSample`]s.
//!
//! Wire format: `name:value|type(|@rate)?` where `type` is `c`, `ms` or `g`.
//! Several encodings may share one payload. Bytes outside
//! `[A-Za-z0-9-_.:|@+]` are stripped before matching, which also removes
//! whatever separator the sender placed between encodings.
//!
//! Decoding is best effort and never fails:
//! - fragments that do not match the pattern are skipped
//! - a timer value that is not a number is recorded as `0`
//! - a missing, unparsable or non-positive rate becomes `1.0`

use std::sync::OnceLock;

use regex::Regex;

use super::types::{MetricKind, MetricSample, DEFAULT_SAMPLE_RATE};

const SAMPLE_PATTERN: &str = r"([a-zA-Z0-9_.]+):([+-]?[0-9.]+)\|(c|ms|g)(\|@([0-9.]+))?";

fn sample_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(SAMPLE_PATTERN).expect("sample pattern is valid"))
}

#[inline]
fn is_wire_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b':' | b'|' | b'@' | b'+')
}

/// Remove every byte outside the wire alphabet
///
/// The result is pure ASCII.
pub fn sanitize(buf: &[u8]) -> String {
    let kept: Vec<u8> = buf.iter().copied().filter(|b| is_wire_byte(*b)).collect();
    // Only ASCII bytes survive the filter.
    String::from_utf8(kept).unwrap_or_default()
}

/// Decode a datagram payload into a lazy sequence of samples
pub fn decode(buf: &[u8]) -> DecodedSamples {
    DecodedSamples {
        text: sanitize(buf),
        pos: 0,
    }
}

/// One-pass iterator over the samples found in a sanitized payload
#[derive(Debug)]
pub struct DecodedSamples {
    text: String,
    pos: usize,
}

impl DecodedSamples {
    /// The sanitized payload being matched
    pub fn sanitized(&self) -> &str {
        &self.text
    }
}

impl Iterator for DecodedSamples {
    type Item = MetricSample;

    fn next(&mut self) -> Option<MetricSample> {
        if self.pos >= self.text.len() {
            return None;
        }

        let caps = sample_regex().captures_at(&self.text, self.pos)?;
        let whole = caps.get(0)?;
        self.pos = if whole.end() > self.pos {
            whole.end()
        } else {
            self.pos + 1
        };

        let bucket = caps.get(1)?.as_str();
        let raw_value = caps.get(2)?.as_str();
        let kind = MetricKind::from_type_code(caps.get(3)?.as_str())?;

        let value = if kind == MetricKind::Timer && raw_value.parse::<f64>().is_err() {
            "0".to_string()
        } else {
            raw_value.to_string()
        };

        let sample_rate = caps
            .get(5)
            .and_then(|m| m.as_str().parse::<f64>().ok())
            .filter(|rate| rate.is_finite() && *rate > 0.0)
            .unwrap_or(DEFAULT_SAMPLE_RATE);

        Some(MetricSample {
            bucket: bucket.to_string(),
            value,
            kind,
            sample_rate,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(buf: &str) -> Vec<MetricSample> {
        decode(buf.as_bytes()).collect()
    }

    #[test]
    fn test_decode_counter() {
        let samples = decode_all("hits:1|c");
        assert_eq!(samples, vec![MetricSample::counter("hits", "1", 1.0)]);
    }

    #[test]
    fn test_decode_sample_rate() {
        let samples = decode_all("hits:1|c|@0.1");
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].sample_rate, 0.1);
    }

    #[test]
    fn test_decode_bad_sample_rate_defaults() {
        assert_eq!(decode_all("hits:1|c|@0.1.2")[0].sample_rate, 1.0);
        assert_eq!(decode_all("hits:1|c|@0")[0].sample_rate, 1.0);
        assert_eq!(decode_all("hits:1|c|@")[0].sample_rate, 1.0);
    }

    #[test]
    fn test_decode_timer_and_gauge() {
        let samples = decode_all("db.query:320|ms\ntemp:-4|g");
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0], MetricSample::timer("db.query", "320"));
        assert_eq!(samples[1], MetricSample::gauge("temp", "-4"));
    }

    #[test]
    fn test_decode_gauge_plus_delta() {
        let samples = decode_all("temp:+3|g");
        assert_eq!(samples, vec![MetricSample::gauge("temp", "+3")]);
    }

    #[test]
    fn test_unparsable_timer_value_becomes_zero() {
        let samples = decode_all("lat:1.2.3|ms");
        assert_eq!(samples, vec![MetricSample::timer("lat", "0")]);
    }

    #[test]
    fn test_unparsable_counter_value_is_kept_raw() {
        let samples = decode_all("hits:1.2.3|c");
        assert_eq!(samples[0].value, "1.2.3");
    }

    #[test]
    fn test_separator_is_stripped_before_matching() {
        let samples = decode_all("a:1|c b:2|c");
        assert_eq!(
            samples,
            vec![
                MetricSample::counter("a", "1", 1.0),
                MetricSample::counter("b", "2", 1.0),
            ]
        );
    }

    #[test]
    fn test_trailing_garbage_does_not_suppress_valid_match() {
        let samples = decode_all("a:1|c\nbroken:|x\n:5|");
        assert_eq!(samples, vec![MetricSample::counter("a", "1", 1.0)]);
    }

    #[test]
    fn test_leading_garbage_does_not_suppress_valid_match() {
        let samples = decode_all("nonsense|||@@ x:2|ms");
        assert_eq!(samples, vec![MetricSample::timer("x", "2")]);
    }

    #[test]
    fn test_sanitize_strips_non_wire_bytes() {
        assert_eq!(sanitize(b"a b\tc\xff:1|c#"), "abc:1|c");
        assert_eq!(decode(b"a b:1|c").sanitized(), "ab:1|c");
    }

    #[test]
    fn test_empty_and_garbage_buffers_yield_nothing() {
        assert!(decode_all("").is_empty());
        assert!(decode_all("hello world").is_empty());
        assert!(decode(&[0xff, 0xfe, 0x00]).next().is_none());
    }

    #[test]
    fn test_unknown_type_is_dropped() {
        assert!(decode_all("users:12|s").is_empty());
    }
}
