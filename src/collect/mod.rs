//! Detection of the well-known plot artifact in an output directory.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

pub const PLOT_FILE: &str = "plot.png";

pub fn plot_path(output_dir: &Path) -> PathBuf {
    output_dir.join(PLOT_FILE)
}

/// Delete a plot left behind by an earlier run. Returns whether one was removed.
pub fn clear_stale(output_dir: &Path) -> io::Result<bool> {
    match fs::remove_file(plot_path(output_dir)) {
        Ok(()) => {
            tracing::debug!(dir = %output_dir.display(), "removed stale plot");
            Ok(true)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Path of the plot if this run produced one. Existence only; contents are not checked.
pub fn collect(output_dir: &Path) -> Option<PathBuf> {
    let path = plot_path(output_dir);
    path.is_file().then_some(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clear_then_collect() {
        let tmp = tempfile::tempdir().unwrap();
        assert_eq!(collect(tmp.path()), None);
        assert!(!clear_stale(tmp.path()).unwrap());

        fs::write(plot_path(tmp.path()), b"not really a png").unwrap();
        assert_eq!(collect(tmp.path()), Some(tmp.path().join("plot.png")));

        assert!(clear_stale(tmp.path()).unwrap());
        assert_eq!(collect(tmp.path()), None);
    }

    #[test]
    fn missing_directory_is_not_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("never-created");
        assert!(!clear_stale(&dir).unwrap());
        assert_eq!(collect(&dir), None);
    }
}
