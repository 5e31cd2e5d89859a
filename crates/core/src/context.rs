use serde::Serialize;

/// Centers resolved for a single request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CenterContext {
    /// Center whose stores are counted and which the summary names.
    pub effective_center_id: i64,
    /// Center whose order control record drives the business date and lock flag.
    pub control_center_id: i64,
}

/// Normalizes a caller supplied identifier; zero and negative ids mean "not supplied".
pub fn supplied_id(value: Option<i64>) -> Option<i64> {
    value.filter(|id| *id > 0)
}

/// Resolves the effective and control centers.
///
/// The control center is the explicit center, else the center owning the
/// request's location, else `fallback_center_id`. The effective center is the
/// explicit center, else `fallback_center_id`.
///
/// `location_center_id` is the owning center of the supplied location, or
/// `None` when no location was given or it could not be found. Callers only
/// need to look it up when `center_id` is absent.
pub fn resolve_context(
    center_id: Option<i64>,
    location_center_id: Option<i64>,
    fallback_center_id: i64,
) -> CenterContext {
    let explicit = supplied_id(center_id);
    let control_center_id = explicit
        .or(supplied_id(location_center_id))
        .unwrap_or(fallback_center_id);

    CenterContext {
        effective_center_id: explicit.unwrap_or(fallback_center_id),
        control_center_id,
    }
}

/// Returns `true` when resolving the control center requires a location lookup.
pub fn needs_location_lookup(center_id: Option<i64>, location_id: Option<i64>) -> bool {
    supplied_id(center_id).is_none() && location_id.is_some()
}
