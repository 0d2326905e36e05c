//! Image and package reference resolution.
//!
//! Users may name an image by exact identifier, by `name`, by
//! `name@version`, or by the leading segment of its identifier (a short id in
//! the style of abbreviated Git hashes). Resolution turns any of these into
//! exactly one exact identifier or fails with a typed error carrying the
//! original reference.

use chrono::{DateTime, FixedOffset};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::compute::{ApiError, ComputeApi, ImageCatalogEntry, ImageFilter, PackageInfo};
use crate::types::ImageId;

/// Errors raised while resolving image or package references.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ResolutionError {
    /// No image matched the reference by identifier, name, or short id.
    #[error("image '{reference}' not found")]
    ImageNotFound {
        /// Reference supplied by the user.
        reference: String,
    },
    /// Several images share the short id and none matched by name.
    #[error("image '{reference}' is an ambiguous short id matching {candidates} images")]
    AmbiguousShortId {
        /// Reference supplied by the user.
        reference: String,
        /// Number of images whose short id matched.
        candidates: usize,
    },
    /// A publication timestamp could not be parsed during the tie-break.
    #[error(
        "image '{reference}': cannot parse publication time '{published_at}' of {image_id}: {message}"
    )]
    Timestamp {
        /// Reference supplied by the user.
        reference: String,
        /// Identifier of the entry with the bad timestamp.
        image_id: String,
        /// Raw timestamp value.
        published_at: String,
        /// Parser error message.
        message: String,
    },
    /// The catalog search itself failed.
    #[error("image catalog search for '{reference}' failed: {source}")]
    Catalog {
        /// Reference supplied by the user.
        reference: String,
        /// Error returned by the compute API.
        #[source]
        source: ApiError,
    },
    /// The package does not exist.
    #[error("package '{reference}' not found")]
    PackageNotFound {
        /// Reference supplied by the user.
        reference: String,
    },
    /// The package lookup failed for a reason other than absence.
    #[error("package lookup for '{reference}' failed: {source}")]
    PackageLookup {
        /// Reference supplied by the user.
        reference: String,
        /// Error returned by the compute API.
        #[source]
        source: ApiError,
    },
}

/// Rule that selected the resolved image.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MatchRule {
    /// The reference was already an exact identifier.
    ExactId,
    /// Exactly one entry carried the requested name.
    Name,
    /// Several entries carried the name; the newest publication won.
    NewestName {
        /// Number of entries that matched by name.
        candidates: usize,
    },
    /// Exactly one entry's short id matched.
    ShortId,
}

/// Outcome of a successful image resolution.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Resolution {
    /// Exact identifier to use for machine creation.
    pub image_id: ImageId,
    /// Rule that selected it.
    pub rule: MatchRule,
}

/// Splits `reference` on the first `@` into `(name, version)`. The version
/// is empty when no `@` is present.
#[must_use]
pub fn split_reference(reference: &str) -> (&str, &str) {
    reference.split_once('@').unwrap_or((reference, ""))
}

/// Returns the leading segment of an identifier up to its first `-`.
#[must_use]
pub fn short_id(id: &str) -> &str {
    id.split_once('-').map_or(id, |(head, _)| head)
}

/// Resolves an image reference to an exact identifier.
///
/// An exact-identifier lookup is attempted first and wins whenever it
/// succeeds. Otherwise the catalog is searched and the candidates are
/// selected by [`select_image`].
///
/// # Errors
///
/// Returns [`ResolutionError`] when the catalog search fails or when no
/// single image can be determined.
pub async fn resolve_image<A>(api: &A, reference: &str) -> Result<Resolution, ResolutionError>
where
    A: ComputeApi + ?Sized,
{
    match api.get_image(reference).await {
        Ok(entry) => {
            debug!(reference, "image reference is an exact identifier");
            return Ok(Resolution {
                image_id: ImageId::new(entry.id),
                rule: MatchRule::ExactId,
            });
        }
        Err(err) => debug!(reference, error = %err, "exact image lookup failed; searching catalog"),
    }

    let (name, version) = split_reference(reference);
    let mut filter = ImageFilter::all_states();
    if !version.is_empty() {
        filter = filter.name_and_version(name, version);
    }

    let images = api
        .list_images(&filter)
        .await
        .map_err(|source| ResolutionError::Catalog {
            reference: reference.to_owned(),
            source,
        })?;

    let resolution = select_image(reference, &images)?;
    match resolution.rule {
        MatchRule::NewestName { candidates } => info!(
            "resolved image {reference:?} to {:?} (most recent of {candidates} name matches)",
            resolution.image_id.as_str()
        ),
        MatchRule::Name => info!(
            "resolved image {reference:?} to {:?} (exact name match)",
            resolution.image_id.as_str()
        ),
        MatchRule::ShortId => info!(
            "resolved image {reference:?} to {:?} (exact short id match)",
            resolution.image_id.as_str()
        ),
        MatchRule::ExactId => {}
    }
    Ok(resolution)
}

/// Picks one image from a catalog snapshot.
///
/// Priority: a single name match, then the most recently published of
/// several name matches (first encountered wins on equal timestamps), then a
/// single short-id match. The name is the part of `reference` before `@`.
///
/// # Errors
///
/// Returns [`ResolutionError::Timestamp`] when a name match carries an
/// unparsable publication time, [`ResolutionError::AmbiguousShortId`] when
/// several short ids match and no name does, and
/// [`ResolutionError::ImageNotFound`] when nothing matches.
pub fn select_image(
    reference: &str,
    images: &[ImageCatalogEntry],
) -> Result<Resolution, ResolutionError> {
    let (name, _) = split_reference(reference);
    let name_matches: Vec<&ImageCatalogEntry> =
        images.iter().filter(|image| image.name == name).collect();
    let short_id_matches: Vec<&ImageCatalogEntry> = images
        .iter()
        .filter(|image| short_id(&image.id) == name)
        .collect();

    match name_matches.as_slice() {
        [only] => {
            return Ok(Resolution {
                image_id: ImageId::new(only.id.clone()),
                rule: MatchRule::Name,
            });
        }
        [] => {}
        several => {
            let latest = newest(reference, several)?;
            return Ok(Resolution {
                image_id: ImageId::new(latest.id.clone()),
                rule: MatchRule::NewestName {
                    candidates: several.len(),
                },
            });
        }
    }

    match short_id_matches.as_slice() {
        [only] => Ok(Resolution {
            image_id: ImageId::new(only.id.clone()),
            rule: MatchRule::ShortId,
        }),
        [] => Err(ResolutionError::ImageNotFound {
            reference: reference.to_owned(),
        }),
        several => {
            warn!("image {reference:?} is an ambiguous short id");
            Err(ResolutionError::AmbiguousShortId {
                reference: reference.to_owned(),
                candidates: several.len(),
            })
        }
    }
}

fn newest<'a>(
    reference: &str,
    candidates: &[&'a ImageCatalogEntry],
) -> Result<&'a ImageCatalogEntry, ResolutionError> {
    let mut best: Option<(&ImageCatalogEntry, DateTime<FixedOffset>)> = None;
    for &candidate in candidates {
        let published = parse_published(reference, candidate)?;
        if best.is_none_or(|(_, current)| current < published) {
            best = Some((candidate, published));
        }
    }
    best.map(|(entry, _)| entry)
        .ok_or_else(|| ResolutionError::ImageNotFound {
            reference: reference.to_owned(),
        })
}

fn parse_published(
    reference: &str,
    entry: &ImageCatalogEntry,
) -> Result<DateTime<FixedOffset>, ResolutionError> {
    DateTime::parse_from_rfc3339(&entry.published_at).map_err(|err| ResolutionError::Timestamp {
        reference: reference.to_owned(),
        image_id: entry.id.clone(),
        published_at: entry.published_at.clone(),
        message: err.to_string(),
    })
}

/// Confirms that a package exists. CloudAPI accepts package names and
/// identifiers interchangeably, so no disambiguation is attempted.
///
/// # Errors
///
/// Returns [`ResolutionError::PackageNotFound`] when the lookup reports the
/// package missing, or [`ResolutionError::PackageLookup`] for other failures.
pub async fn validate_package<A>(api: &A, reference: &str) -> Result<PackageInfo, ResolutionError>
where
    A: ComputeApi + ?Sized,
{
    api.get_package(reference).await.map_err(|source| {
        if source.is_not_found() {
            ResolutionError::PackageNotFound {
                reference: reference.to_owned(),
            }
        } else {
            ResolutionError::PackageLookup {
                reference: reference.to_owned(),
                source,
            }
        }
    })
}
