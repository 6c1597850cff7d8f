//! Mapping detail payloads onto output rows
//!
//! Pure functions only: no network, no state.

use crate::types::{CatalogRecord, MovieDetails, NamedEntity};

/// Separator used for every flattened list column
pub const LIST_DELIMITER: &str = ", ";

/// Crew role tag that marks the primary contributor
pub const DIRECTOR_JOB: &str = "Director";

/// Number of cast members kept by [`to_record`]
pub const DEFAULT_CAST_LIMIT: usize = 10;

/// Flatten a detail payload into a [`CatalogRecord`]
///
/// Returns `None` when there is no payload.
pub fn to_record(details: Option<&MovieDetails>) -> Option<CatalogRecord> {
    to_record_with_cast_limit(details, DEFAULT_CAST_LIMIT)
}

/// Same as [`to_record`] with a configurable number of cast members
pub fn to_record_with_cast_limit(
    details: Option<&MovieDetails>,
    cast_limit: usize,
) -> Option<CatalogRecord> {
    let details = details?;
    let release_date = details.release_date.clone().unwrap_or_default();

    Some(CatalogRecord {
        id: details.id,
        title: details.title.clone().unwrap_or_default(),
        year: release_year(details.release_date.as_deref()),
        release_date,
        runtime: details.runtime,
        overview: single_line(details.overview.as_deref()),
        genres: join_names(&details.genres),
        director: director(details),
        cast: top_cast(details, cast_limit),
        vote_average: details.vote_average,
        vote_count: details.vote_count,
        popularity: details.popularity,
        budget: details.budget,
        revenue: details.revenue,
        original_language: details.original_language.clone().unwrap_or_default(),
        production_companies: join_names(&details.production_companies),
        tagline: single_line(details.tagline.as_deref()),
    })
}

/// First four characters of the release date, empty when absent
pub fn release_year(release_date: Option<&str>) -> String {
    release_date
        .map(|date| date.chars().take(4).collect())
        .unwrap_or_default()
}

/// Replace line breaks with spaces so a record stays on one CSV row
pub fn single_line(text: Option<&str>) -> String {
    text.unwrap_or_default().replace(['\n', '\r'], " ")
}

fn director(details: &MovieDetails) -> String {
    details
        .credits
        .as_ref()
        .and_then(|credits| {
            credits
                .crew
                .iter()
                .find(|member| member.job.as_deref() == Some(DIRECTOR_JOB))
        })
        .and_then(|member| member.name.clone())
        .unwrap_or_default()
}

fn top_cast(details: &MovieDetails, limit: usize) -> String {
    let Some(credits) = details.credits.as_ref() else {
        return String::new();
    };
    credits
        .cast
        .iter()
        .take(limit)
        .map(|member| member.name.as_deref().unwrap_or_default())
        .collect::<Vec<_>>()
        .join(LIST_DELIMITER)
}

fn join_names(entities: &[NamedEntity]) -> String {
    entities
        .iter()
        .map(|entity| entity.name.as_deref().unwrap_or_default())
        .collect::<Vec<_>>()
        .join(LIST_DELIMITER)
}
