use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Line terminator used by every description the harness relays.
pub const CRLF: &str = "\r\n";
/// Delimiter that starts a new media section.
pub const SECTION_DELIMITER: &str = "\r\nm=";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SdpError {
    #[error("description is empty")]
    Empty,
    #[error("description must start with a `v=` line")]
    MissingVersion,
    #[error("line {line} is not terminated by CRLF")]
    MissingTerminator { line: usize },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

impl SdpType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SdpType::Offer => "offer",
            SdpType::Answer => "answer",
        }
    }
}

impl fmt::Display for SdpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A description as handed to `setRemoteDescription`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }

    /// Same type, new body.
    pub fn with_sdp(&self, sdp: String) -> Self {
        Self {
            sdp_type: self.sdp_type,
            sdp,
        }
    }
}

/// One `m=` block. The first line is always the `m=` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaSection {
    lines: Vec<String>,
}

impl MediaSection {
    /// Rebuild a section from the fragment that followed a `\r\nm=` split.
    fn from_fragment(fragment: &str) -> Self {
        let section = format!("m={}", fragment.trim());
        Self {
            lines: section.split(CRLF).map(str::to_owned).collect(),
        }
    }

    /// Media kind from the `m=` line, e.g. `audio` or `video`.
    pub fn kind(&self) -> &str {
        self.lines
            .first()
            .and_then(|line| line.strip_prefix("m="))
            .and_then(|rest| rest.split(' ').next())
            .unwrap_or_default()
    }

    pub fn media_line(&self) -> &str {
        self.lines.first().map(String::as_str).unwrap_or_default()
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn push_line(&mut self, line: String) {
        self.lines.push(line);
    }
}

impl fmt::Display for MediaSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.lines.join(CRLF).trim())
    }
}

/// Session header plus media sections, split the same way browsers emit them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedDescription {
    pub header: String,
    pub sections: Vec<MediaSection>,
}

impl ParsedDescription {
    /// Permissive split. Text without CRLF terminators ends up entirely in the
    /// header and passes through untouched.
    pub fn parse(sdp: &str) -> Self {
        let mut fragments = sdp.split(SECTION_DELIMITER);
        let header = fragments.next().unwrap_or_default().trim().to_owned();
        let sections = fragments.map(MediaSection::from_fragment).collect();
        Self { header, sections }
    }

    /// Rejects text the permissive parser would silently pass through.
    pub fn parse_strict(sdp: &str) -> Result<Self, SdpError> {
        validate(sdp)?;
        Ok(Self::parse(sdp))
    }
}

impl fmt::Display for ParsedDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::with_capacity(self.header.len() + 64 * self.sections.len());
        out.push_str(&self.header);
        out.push_str(CRLF);
        let body = self
            .sections
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(CRLF);
        out.push_str(&body);
        write!(f, "{}{CRLF}", out.trim())
    }
}

fn validate(sdp: &str) -> Result<(), SdpError> {
    if sdp.trim().is_empty() {
        return Err(SdpError::Empty);
    }
    if !sdp.starts_with("v=") {
        return Err(SdpError::MissingVersion);
    }

    let bytes = sdp.as_bytes();
    let mut line = 1;
    for (idx, byte) in bytes.iter().enumerate() {
        if *byte == b'\n' {
            if idx == 0 || bytes[idx - 1] != b'\r' {
                return Err(SdpError::MissingTerminator { line });
            }
            line += 1;
        }
    }
    if !sdp.ends_with(CRLF) {
        return Err(SdpError::MissingTerminator { line });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_SECTIONS: &str = "v=0\r\no=- 1 1 IN IP4 0.0.0.0\r\ns=-\r\nt=0 0\r\n\
m=audio 9 UDP/TLS/RTP/SAVPF 111\r\na=mid:0\r\n\
m=video 9 UDP/TLS/RTP/SAVPF 96\r\na=mid:1\r\n";

    #[test]
    fn splits_header_and_sections() {
        let parsed = ParsedDescription::parse(TWO_SECTIONS);
        assert_eq!(parsed.header, "v=0\r\no=- 1 1 IN IP4 0.0.0.0\r\ns=-\r\nt=0 0");
        assert_eq!(parsed.sections.len(), 2);
        assert_eq!(parsed.sections[0].kind(), "audio");
        assert_eq!(parsed.sections[1].kind(), "video");
        assert_eq!(parsed.sections[1].media_line(), "m=video 9 UDP/TLS/RTP/SAVPF 96");
    }

    #[test]
    fn reassembles_to_the_original_text() {
        let parsed = ParsedDescription::parse(TWO_SECTIONS);
        assert_eq!(parsed.to_string(), TWO_SECTIONS);
    }

    #[test]
    fn header_only_description_keeps_single_terminator() {
        let parsed = ParsedDescription::parse("v=0\r\ns=-\r\n\r\n");
        assert!(parsed.sections.is_empty());
        assert_eq!(parsed.to_string(), "v=0\r\ns=-\r\n");
    }

    #[test]
    fn lf_only_text_passes_through_permissive_parse() {
        let parsed = ParsedDescription::parse("v=0\nm=audio 9 RTP/AVP 0\n");
        assert!(parsed.sections.is_empty());
        assert_eq!(parsed.to_string(), "v=0\nm=audio 9 RTP/AVP 0\r\n");
    }

    #[test]
    fn strict_parse_rejects_bare_newlines() {
        let err = ParsedDescription::parse_strict("v=0\r\ns=-\nt=0 0\r\n").unwrap_err();
        assert_eq!(err, SdpError::MissingTerminator { line: 2 });
    }

    #[test]
    fn strict_parse_rejects_missing_version_and_empty_input() {
        assert_eq!(
            ParsedDescription::parse_strict("s=-\r\n").unwrap_err(),
            SdpError::MissingVersion
        );
        assert_eq!(
            ParsedDescription::parse_strict("  \r\n").unwrap_err(),
            SdpError::Empty
        );
    }

    #[test]
    fn strict_parse_requires_trailing_terminator() {
        assert!(matches!(
            ParsedDescription::parse_strict("v=0\r\ns=-"),
            Err(SdpError::MissingTerminator { .. })
        ));
    }

    #[test]
    fn session_description_uses_browser_json_shape() {
        let desc = SessionDescription::answer("v=0\r\n");
        let value = serde_json::to_value(&desc).expect("serializes");
        assert_eq!(value, serde_json::json!({ "type": "answer", "sdp": "v=0\r\n" }));

        let back: SessionDescription = serde_json::from_value(value).expect("deserializes");
        assert_eq!(back, desc);
    }
}
