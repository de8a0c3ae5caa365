//! m3u8 text → [`Manifest`], with every URI made absolute against the playlist URL.

use m3u8_rs::{parse_playlist_res, Playlist};
use url::Url;

use super::{Manifest, ManifestError, Rendition, Resolution, SegmentDescriptor};

fn absolute(base: &Url, uri: &str) -> Result<String, ManifestError> {
    base.join(uri)
        .map(String::from)
        .map_err(|source| ManifestError::InvalidUrl {
            url: uri.to_string(),
            source,
        })
}

/// Parse playlist bytes fetched from `base`.
///
/// I-frame-only variants are not renditions of the content and are skipped.
/// Segment indices follow playlist order, so the same playlist always yields
/// the same numbering.
pub fn parse_manifest(bytes: &[u8], base: &Url) -> Result<Manifest, ManifestError> {
    let playlist = parse_playlist_res(bytes).map_err(|e| ManifestError::Parse {
        url: base.to_string(),
        reason: e.to_string(),
    })?;

    match playlist {
        Playlist::MasterPlaylist(master) => {
            let renditions = master
                .variants
                .iter()
                .filter(|v| !v.is_i_frame)
                .map(|v| {
                    let uri = if v.uri.trim().is_empty() {
                        String::new()
                    } else {
                        absolute(base, v.uri.trim())?
                    };
                    Ok(Rendition {
                        uri,
                        resolution: v.resolution.map(|r| Resolution {
                            width: r.width,
                            height: r.height,
                        }),
                        bandwidth: v.bandwidth,
                    })
                })
                .collect::<Result<Vec<_>, ManifestError>>()?;
            Ok(Manifest::VariantIndex(renditions))
        }
        Playlist::MediaPlaylist(media) => {
            let segments = media
                .segments
                .iter()
                .enumerate()
                .map(|(index, s)| {
                    Ok(SegmentDescriptor {
                        index,
                        url: absolute(base, s.uri.trim())?,
                        duration: s.duration,
                    })
                })
                .collect::<Result<Vec<_>, ManifestError>>()?;
            Ok(Manifest::SegmentList(segments))
        }
    }
}
