use super::{ManifestError, Rendition};

/// Width used for ranking; renditions without a resolution always lose.
fn rank_width(r: &Rendition) -> i64 {
    r.resolution
        .map(|res| i64::try_from(res.width).unwrap_or(i64::MAX))
        .unwrap_or(-1)
}

/// Pick the rendition with the greatest resolution width. Ties keep the
/// earliest rendition, so an index without any resolutions yields its first entry.
pub fn select_highest_quality(renditions: &[Rendition]) -> Result<&Rendition, ManifestError> {
    let first = renditions.first().ok_or(ManifestError::NoVariants)?;
    let best = renditions[1..].iter().fold(first, |best, r| {
        if rank_width(r) > rank_width(best) {
            r
        } else {
            best
        }
    });
    if best.uri.is_empty() {
        return Err(ManifestError::MissingUri);
    }
    Ok(best)
}
