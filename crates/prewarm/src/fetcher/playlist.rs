// HLS manifest model and parsing.

use std::time::Duration;

use m3u8_rs::{MediaPlaylist, parse_playlist_res};
use tracing::{trace, warn};
use url::Url;

use crate::error::{PrebufferError, Result};

/// Sub-range of a resource, as listed by `#EXT-X-BYTERANGE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub offset: u64,
    pub length: u64,
}

impl ByteRange {
    pub fn end(&self) -> u64 {
        self.offset.saturating_add(self.length)
    }

    /// Value of the HTTP `Range` header selecting this range.
    pub fn header_value(&self) -> String {
        let last = self.end().saturating_sub(1).max(self.offset);
        format!("bytes={}-{}", self.offset, last)
    }
}

/// One retrievable media segment.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentDescriptor {
    pub sequence: u64,
    pub duration: Duration,
    pub byte_range: Option<ByteRange>,
    pub url: Url,
}

impl SegmentDescriptor {
    /// Identifier used for the segment inside a channel buffer.
    pub fn id(&self) -> String {
        self.sequence.to_string()
    }
}

/// A parsed media playlist with absolute segment URLs.
#[derive(Debug, Clone, PartialEq)]
pub struct Playlist {
    pub url: Url,
    pub media_sequence: u64,
    pub target_duration: Duration,
    pub end_list: bool,
    pub segments: Vec<SegmentDescriptor>,
}

impl Playlist {
    pub fn last_sequence(&self) -> Option<u64> {
        self.segments.last().map(|s| s.sequence)
    }

    /// Segments whose sequence number is greater than `last`, in playlist order.
    pub fn segments_after(&self, last: Option<u64>) -> impl Iterator<Item = &SegmentDescriptor> {
        self.segments
            .iter()
            .filter(move |s| last.is_none_or(|last| s.sequence > last))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variant {
    pub url: Url,
    pub bandwidth: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlaylistDocument {
    Master(Vec<Variant>),
    Media(Playlist),
}

impl PlaylistDocument {
    /// The variant with the highest advertised bandwidth.
    pub fn best_variant(&self) -> Option<&Variant> {
        match self {
            Self::Master(variants) => variants.iter().max_by_key(|v| v.bandwidth),
            Self::Media(_) => None,
        }
    }
}

fn to_duration(seconds: f64) -> Duration {
    if seconds.is_finite() && seconds > 0.0 {
        Duration::from_secs_f64(seconds)
    } else {
        Duration::ZERO
    }
}

/// Parses a manifest fetched from `url`. Relative URIs are resolved against `url`.
pub fn parse_playlist(bytes: &[u8], url: &Url) -> Result<PlaylistDocument> {
    match parse_playlist_res(bytes) {
        Ok(m3u8_rs::Playlist::MasterPlaylist(master)) => {
            let variants = master
                .variants
                .iter()
                .filter(|v| !v.is_i_frame)
                .filter_map(|v| match url.join(&v.uri) {
                    Ok(variant_url) => Some(Variant {
                        url: variant_url,
                        bandwidth: v.bandwidth,
                    }),
                    Err(e) => {
                        warn!(uri = %v.uri, error = %e, "Skipping variant with unresolvable URI");
                        None
                    }
                })
                .collect();
            Ok(PlaylistDocument::Master(variants))
        }
        Ok(m3u8_rs::Playlist::MediaPlaylist(media)) => {
            Ok(PlaylistDocument::Media(media_playlist(&media, url)))
        }
        Err(e) => Err(PrebufferError::playlist(format!(
            "Failed to parse playlist {url}: {e}"
        ))),
    }
}

fn media_playlist(media: &MediaPlaylist, url: &Url) -> Playlist {
    let mut segments = Vec::with_capacity(media.segments.len());
    let mut last_non_empty_uri: Option<&str> = None;
    let mut last_range: Option<(&str, u64)> = None;

    for (idx, segment) in media.segments.iter().enumerate() {
        let sequence = media.media_sequence + idx as u64;

        let uri = if segment.uri.trim().is_empty() {
            match (segment.byte_range.as_ref(), last_non_empty_uri) {
                (Some(_), Some(previous)) => previous,
                _ => {
                    warn!(sequence, "Skipping segment with empty URI");
                    continue;
                }
            }
        } else {
            last_non_empty_uri = Some(segment.uri.as_str());
            segment.uri.as_str()
        };

        let byte_range = match segment.byte_range.as_ref() {
            Some(range) => {
                // A missing offset continues where the previous range of the same resource ended.
                let offset = range.offset.or_else(|| match last_range {
                    Some((previous_uri, end)) if previous_uri == uri => Some(end),
                    _ => None,
                });
                let Some(offset) = offset else {
                    warn!(
                        sequence,
                        uri, "Skipping segment with BYTERANGE missing offset and no prior range"
                    );
                    last_range = None;
                    continue;
                };
                let range = ByteRange {
                    offset,
                    length: range.length,
                };
                last_range = Some((uri, range.end()));
                Some(range)
            }
            None => {
                last_range = None;
                None
            }
        };

        let segment_url = match url.join(uri) {
            Ok(resolved) => resolved,
            Err(e) => {
                warn!(sequence, uri, error = %e, "Skipping segment with unresolvable URI");
                continue;
            }
        };
        trace!(sequence, url = %segment_url, "Parsed segment");

        segments.push(SegmentDescriptor {
            sequence,
            duration: to_duration(segment.duration as f64),
            byte_range,
            url: segment_url,
        });
    }

    Playlist {
        url: url.clone(),
        media_sequence: media.media_sequence,
        target_duration: to_duration(media.target_duration as f64),
        end_list: media.end_list,
        segments,
    }
}
