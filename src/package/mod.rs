//! Package data model
//!
//! Tracked package records, their enumerations and the derived package key.

mod record;

pub use record::{InstallMode, NewPackage, PackageRecord, PackageSource, PackageType};

/// Derives the ledger key of a package.
///
/// `owner + "_" + repo`, lowercased, with `-` replaced by `_`.
pub fn package_id(owner: &str, repo: &str) -> String {
    format!("{}_{}", owner, repo).to_lowercase().replace('-', "_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_package_id_normalizes() {
        assert_eq!(package_id("OnOff", "My-Integration"), "onoff_my_integration");
        assert_eq!(package_id("a-b", "c"), "a_b_c");
    }

    #[test]
    fn test_package_id_is_stable() {
        let first = package_id("Owner", "repo-name");
        for _ in 0..3 {
            assert_eq!(package_id("Owner", "repo-name"), first);
        }
    }

    #[test]
    fn test_package_id_collides_on_hyphen_and_underscore() {
        // Both spellings refer to the same tracked package.
        assert_eq!(package_id("o", "my-repo"), package_id("o", "my_repo"));
    }
}
