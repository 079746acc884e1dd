use std::path::{Path, PathBuf};

/// Resolves `desired` to a path that does not yet exist on disk, appending
/// `_N` before the extension on collision (§4.5, §6).
///
/// `foo.txt` becomes `foo_1.txt`, then `foo_2.txt`, and so on, until a free
/// name is found. The check-then-use is inherently racy against a
/// concurrent writer targeting the same stem; transfer sessions are keyed
/// per `fileId` so two sessions never contend for the same desired path in
/// practice.
#[must_use]
pub fn resolve_collision_free(desired: &Path) -> PathBuf {
    if !desired.exists() {
        return desired.to_path_buf();
    }

    let parent = desired.parent().unwrap_or_else(|| Path::new(""));
    let stem = desired
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = desired.extension().map(|e| e.to_string_lossy().into_owned());

    let mut attempt = 1u32;
    loop {
        let candidate_name = match &extension {
            Some(ext) => format!("{stem}_{attempt}.{ext}"),
            None => format!("{stem}_{attempt}"),
        };
        let candidate = parent.join(candidate_name);
        if !candidate.exists() {
            return candidate;
        }
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn returns_the_desired_path_when_it_does_not_exist() {
        let dir = tempdir().unwrap();
        let desired = dir.path().join("report.pdf");
        assert_eq!(resolve_collision_free(&desired), desired);
    }

    #[test]
    fn appends_an_incrementing_suffix_before_the_extension_on_collision() {
        let dir = tempdir().unwrap();
        let desired = dir.path().join("report.pdf");
        std::fs::write(&desired, b"existing").unwrap();

        let resolved = resolve_collision_free(&desired);
        assert_eq!(resolved, dir.path().join("report_1.pdf"));

        std::fs::write(&resolved, b"also existing").unwrap();
        let resolved_again = resolve_collision_free(&desired);
        assert_eq!(resolved_again, dir.path().join("report_2.pdf"));
    }

    #[test]
    fn handles_extensionless_names() {
        let dir = tempdir().unwrap();
        let desired = dir.path().join("README");
        std::fs::write(&desired, b"existing").unwrap();
        assert_eq!(resolve_collision_free(&desired), dir.path().join("README_1"));
    }
}
