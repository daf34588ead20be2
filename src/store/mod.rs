//! Versioned persistence of generated source and staging of input files.

use std::{
    fs::{self, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
};

use crate::{
    config::Settings,
    error::{PipelineError, Result},
};

/// Writes each generated program to `<base><n>.<ext>` without ever overwriting.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    codes_dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(codes_dir: impl Into<PathBuf>) -> Self {
        Self {
            codes_dir: codes_dir.into(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(&settings.codes_dir)
    }

    pub fn dir(&self) -> &Path {
        &self.codes_dir
    }

    /// Like [`try_persist`](Self::try_persist), but logs failures and returns `None`.
    pub fn persist(&self, source: &str, base_name: &str, ext: &str) -> Option<PathBuf> {
        match self.try_persist(source, base_name, ext) {
            Ok(path) => Some(path),
            Err(e) => {
                tracing::error!("Error saving code: {e}");
                None
            }
        }
    }

    /// Probe suffixes 1, 2, … and write `source` to the first unused name.
    ///
    /// Existence test and creation are a single `create_new` open, so a name
    /// taken by another writer between probes is skipped rather than clobbered.
    pub fn try_persist(&self, source: &str, base_name: &str, ext: &str) -> Result<PathBuf> {
        fs::create_dir_all(&self.codes_dir)
            .map_err(|e| PipelineError::persist(self.codes_dir.display().to_string(), e))?;
        let ext = ext.trim_start_matches('.');

        let mut count: u64 = 1;
        loop {
            let path = self.codes_dir.join(format!("{base_name}{count}.{ext}"));
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    if let Err(e) = file.write_all(source.as_bytes()).and_then(|_| file.flush()) {
                        drop(file);
                        let _ = fs::remove_file(&path);
                        return Err(PipelineError::persist(path.display().to_string(), e));
                    }
                    tracing::info!(path = %path.display(), "saved generated code");
                    return Ok(path);
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => count += 1,
                Err(e) => return Err(PipelineError::persist(path.display().to_string(), e)),
            }
        }
    }
}

/// Copy attachments into `input_dir` under their original file names.
pub fn stage_inputs(attachments: &[PathBuf], input_dir: &Path) -> Result<Vec<PathBuf>> {
    if attachments.is_empty() {
        return Ok(Vec::new());
    }
    fs::create_dir_all(input_dir)
        .map_err(|e| PipelineError::persist(input_dir.display().to_string(), e))?;

    let mut staged = Vec::with_capacity(attachments.len());
    for src in attachments {
        let name = src.file_name().ok_or_else(|| {
            PipelineError::persist(
                src.display().to_string(),
                io::Error::new(io::ErrorKind::InvalidInput, "attachment has no file name"),
            )
        })?;
        let dest = input_dir.join(name);
        fs::copy(src, &dest).map_err(|e| PipelineError::persist(src.display().to_string(), e))?;
        tracing::debug!(from = %src.display(), to = %dest.display(), "staged input file");
        staged.push(dest);
    }
    Ok(staged)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequential_persists_are_numbered_without_gaps() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(tmp.path().join("codes"));
        let paths: Vec<PathBuf> = (0..5)
            .map(|i| store.persist(&format!("print({i})"), "code", "py").unwrap())
            .collect();
        for (i, p) in paths.iter().enumerate() {
            assert_eq!(
                p.file_name().unwrap().to_str().unwrap(),
                format!("code{}.py", i + 1)
            );
            assert_eq!(fs::read_to_string(p).unwrap(), format!("print({i})"));
        }
    }

    #[test]
    fn existing_files_are_skipped_not_overwritten() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("code1.py"), "old").unwrap();
        fs::write(tmp.path().join("code2.py"), "older").unwrap();
        let store = ArtifactStore::new(tmp.path());
        let p = store.persist("new", "code", ".py").unwrap();
        assert_eq!(p, tmp.path().join("code3.py"));
        assert_eq!(fs::read_to_string(tmp.path().join("code1.py")).unwrap(), "old");
    }

    #[test]
    fn unwritable_directory_yields_none() {
        let tmp = tempfile::tempdir().unwrap();
        let blocker = tmp.path().join("not_a_dir");
        fs::write(&blocker, "file").unwrap();
        let store = ArtifactStore::new(blocker.join("codes"));
        assert!(store.persist("x", "code", "py").is_none());
        let err = store.try_persist("x", "code", "py").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::PersistFailed);
    }

    #[test]
    fn inputs_keep_their_names() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("sales.csv");
        fs::write(&src, "a,b\n1,2\n").unwrap();
        let staged = stage_inputs(&[src], &tmp.path().join("inputs")).unwrap();
        assert_eq!(staged, vec![tmp.path().join("inputs").join("sales.csv")]);
        assert_eq!(fs::read_to_string(&staged[0]).unwrap(), "a,b\n1,2\n");
    }

    #[test]
    fn missing_attachment_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let err = stage_inputs(&[tmp.path().join("nope.csv")], &tmp.path().join("inputs"))
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::PersistFailed);
    }
}
