use crate::forge::{Release, ReleaseAsset};

use super::ResolveError;

/// Picks the asset to download from a release.
///
/// An explicit `asset_name` must match exactly. Otherwise a lone `.zip`
/// asset wins, then a lone asset of any kind.
pub fn pick_asset<'a>(
    release: &'a Release,
    asset_name: Option<&str>,
) -> Result<&'a ReleaseAsset, ResolveError> {
    if release.assets.is_empty() {
        return Err(ResolveError::Resolution("release has no assets".into()));
    }

    if let Some(wanted) = asset_name.filter(|n| !n.is_empty()) {
        return release
            .assets
            .iter()
            .find(|a| a.name == wanted)
            .ok_or_else(|| ResolveError::Resolution(format!("asset not found: {}", wanted)));
    }

    let zips: Vec<&ReleaseAsset> = release
        .assets
        .iter()
        .filter(|a| a.name.to_lowercase().ends_with(".zip"))
        .collect();
    if let [only] = zips.as_slice() {
        return Ok(only);
    }

    if let [only] = release.assets.as_slice() {
        return Ok(only);
    }

    let names: Vec<&str> = release.assets.iter().map(|a| a.name.as_str()).collect();
    Err(ResolveError::Resolution(format!(
        "multiple assets, specify one of: {}",
        names.join(", ")
    )))
}
