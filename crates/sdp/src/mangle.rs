//! Bridges the two msid dialects browsers use to tie an SSRC to a
//! stream/track pair.
//!
//! The ssrc dialect carries the association on a source attribute:
//!
//! ```text
//! a=ssrc:12345 msid:stream track
//! ```
//!
//! while the media-level dialect uses a standalone attribute next to a
//! `cname`-only source line:
//!
//! ```text
//! a=ssrc:12345 cname:something
//! a=msid:stream track
//! ```
//!
//! A browser that only understands one form cannot map the tracks added during
//! renegotiation to the right stream, so every relayed description gets the
//! missing form appended to each media section.

use tracing::debug;

use crate::description::{MediaSection, ParsedDescription, SdpError};

const SSRC_PREFIX: &str = "a=ssrc:";
const MSID_PREFIX: &str = "a=msid:";

/// Rewrite `sdp` so every media section carries both association forms.
///
/// Input without CRLF terminators is passed through (with a single trailing
/// CRLF), so this never fails. Use [`mangle_strict`] to reject it instead.
pub fn mangle(sdp: &str) -> String {
    mangle_parsed(ParsedDescription::parse(sdp))
}

/// Like [`mangle`] but rejects descriptions that are not CRLF terminated or do
/// not start with a version line.
pub fn mangle_strict(sdp: &str) -> Result<String, SdpError> {
    ParsedDescription::parse_strict(sdp).map(mangle_parsed)
}

fn mangle_parsed(mut parsed: ParsedDescription) -> String {
    for section in parsed.sections.iter_mut() {
        let synthesized = [synthesize_msid(section), synthesize_ssrc_msid(section)];
        for line in synthesized.into_iter().flatten() {
            debug!(kind = section.kind(), %line, "synthesized msid association");
            section.push_line(line);
        }
    }
    parsed.to_string()
}

/// `a=ssrc:<id> msid:<stream> <track>` to `a=msid:<stream> <track>`.
///
/// Returns `None` when the section already has an `a=msid:` line or carries no
/// ssrc-level msid. Only the first ssrc-level msid is used; later ones belong
/// to FID or simulcast groups of the same track.
pub fn synthesize_msid(section: &MediaSection) -> Option<String> {
    let mut source = None;
    let mut has_target = false;
    for line in section.lines() {
        if source.is_none() && line.starts_with(SSRC_PREFIX) && line.contains(" msid:") {
            source = Some(line);
        }
        if line.starts_with(MSID_PREFIX) {
            has_target = true;
        }
    }

    if has_target {
        return None;
    }
    let (_, association) = source?.split_once(' ')?;
    Some(format!("a={association}"))
}

/// `a=msid:<stream> <track>` plus `a=ssrc:<id> cname:<c>` to
/// `a=ssrc:<id> msid:<stream> <track>`.
///
/// Returns `None` when either piece of evidence is missing or the section
/// already has an ssrc-level msid.
pub fn synthesize_ssrc_msid(section: &MediaSection) -> Option<String> {
    let mut msid = None;
    let mut cname = None;
    let mut has_target = false;
    for line in section.lines() {
        if line.starts_with(MSID_PREFIX) {
            msid = Some(line);
        }
        if line.starts_with(SSRC_PREFIX) {
            if cname.is_none() && line.contains(" cname:") {
                cname = Some(line);
            }
            if line.contains(" msid:") {
                has_target = true;
            }
        }
    }

    if has_target {
        return None;
    }
    let ssrc = cname?.split(' ').next()?;
    let association = msid?.strip_prefix("a=")?;
    Some(format!("{ssrc} {association}"))
}

/// Replace the first occurrence of stream id `from` with `to`.
///
/// Used on re-offers from endpoints that could only attach the new track to a
/// fresh stream, so the remote keeps seeing a single stream.
pub fn replace_stream_id(sdp: &str, from: &str, to: &str) -> String {
    if from.is_empty() {
        return sdp.to_owned();
    }
    sdp.replacen(from, to, 1)
}
