//! Manifest resolution: fetch an HLS playlist, tell a variant index from a
//! segment list, pick a rendition and enumerate its segments.

mod parse;
mod select;

pub use parse::parse_manifest;
pub use select::select_highest_quality;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use url::Url;

use crate::transport::{ByteTransport, TransportError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub width: u64,
    pub height: u64,
}

/// One quality variant listed by a variant index.
#[derive(Debug, Clone, PartialEq)]
pub struct Rendition {
    /// Absolute URL of the rendition's segment list; empty if the manifest gave none.
    pub uri: String,
    pub resolution: Option<Resolution>,
    pub bandwidth: u64,
}

/// One downloadable chunk. `index` is the position in the segment list and
/// is the reassembly order.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentDescriptor {
    pub index: usize,
    pub url: String,
    pub duration: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Manifest {
    VariantIndex(Vec<Rendition>),
    SegmentList(Vec<SegmentDescriptor>),
}

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("invalid URL {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("failed to fetch manifest {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: TransportError,
    },
    #[error("failed to fetch manifest {url}: HTTP {status}")]
    Http { url: String, status: u32 },
    #[error("malformed manifest {url}: {reason}")]
    Parse { url: String, reason: String },
    #[error("variant index lists no renditions")]
    NoVariants,
    #[error("selected rendition has no URI")]
    MissingUri,
    #[error("expected a segment list at {url}, got a variant index")]
    UnexpectedManifestType { url: String },
    #[error("{url} is a segment list; a variant index URL is required")]
    NotAMasterManifest { url: String },
    #[error("manifest fetch cancelled")]
    Cancelled,
}

/// Fetches and parses manifests through a [`ByteTransport`].
#[derive(Clone)]
pub struct ManifestResolver {
    transport: Arc<dyn ByteTransport>,
}

impl ManifestResolver {
    pub fn new(transport: Arc<dyn ByteTransport>) -> Self {
        Self { transport }
    }

    /// Fetch and parse the manifest at `url`.
    pub async fn resolve(
        &self,
        url: &str,
        token: &CancellationToken,
    ) -> Result<Manifest, ManifestError> {
        let base = Url::parse(url).map_err(|source| ManifestError::InvalidUrl {
            url: url.to_string(),
            source,
        })?;
        let fetched = match self.transport.fetch(url, token).await {
            Ok(f) => f,
            Err(TransportError::Cancelled) => return Err(ManifestError::Cancelled),
            Err(source) => {
                return Err(ManifestError::Fetch {
                    url: url.to_string(),
                    source,
                })
            }
        };
        if !fetched.is_success() {
            return Err(ManifestError::Http {
                url: url.to_string(),
                status: fetched.status,
            });
        }
        let manifest = parse_manifest(&fetched.body, &base)?;
        match &manifest {
            Manifest::VariantIndex(r) => {
                tracing::debug!(url, renditions = r.len(), "resolved variant index")
            }
            Manifest::SegmentList(s) => {
                tracing::debug!(url, segments = s.len(), "resolved segment list")
            }
        }
        Ok(manifest)
    }

    /// Resolve a rendition's own manifest, which must be a segment list.
    pub async fn segment_list(
        &self,
        rendition_url: &str,
        token: &CancellationToken,
    ) -> Result<Vec<SegmentDescriptor>, ManifestError> {
        match self.resolve(rendition_url, token).await? {
            Manifest::SegmentList(segments) => Ok(segments),
            Manifest::VariantIndex(_) => Err(ManifestError::UnexpectedManifestType {
                url: rendition_url.to_string(),
            }),
        }
    }
}
