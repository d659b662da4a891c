//! File-backed implementation of [`JobStore`].
//!
//! One pretty-printed JSON file per job under the state directory. Saves go
//! through write-to-temp-then-rename so a crash mid-write leaves either the
//! previous committed record or a stray temp file, never a torn record.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use siteferry_types::job::{JobId, JobState};

use crate::error::{self, StateError};
use crate::store::JobStore;

/// File-backed job store.
pub struct FileJobStore {
    dir: PathBuf,
}

impl FileJobStore {
    /// Open (creating if needed) a store rooted at `dir`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Io`] if the directory cannot be created.
    pub fn open(dir: &Path) -> error::Result<Self> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    fn record_path(&self, job_id: &JobId) -> PathBuf {
        self.dir.join(format!("{}.json", job_id.as_str()))
    }
}

impl JobStore for FileJobStore {
    fn load(&self, job_id: &JobId) -> error::Result<Option<JobState>> {
        let path = self.record_path(job_id);
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_slice(&raw)?))
    }

    fn save(&self, job: &JobState) -> error::Result<()> {
        let encoded = serde_json::to_vec_pretty(job)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(&encoded)?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.record_path(&job.job_id))
            .map_err(|e| StateError::Replace(e.to_string()))?;
        Ok(())
    }

    fn delete(&self, job_id: &JobId) -> error::Result<bool> {
        match fs::remove_file(self.record_path(job_id)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self) -> error::Result<Vec<JobId>> {
        let mut entries: Vec<(std::time::SystemTime, JobId)> = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let modified = entry
                .metadata()?
                .modified()
                .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
            entries.push((modified, JobId::new(stem)));
        }
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(entries.into_iter().map(|(_, id)| id).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use siteferry_types::job::{JobStatus, StageName, StageStatus};
    use siteferry_types::plan::{
        ComputeSpec, FormRouting, FunctionSpec, MigrationPlan, ProcessingOptions, SourceRef,
        StorageSpec, TargetImage,
    };

    fn plan() -> MigrationPlan {
        MigrationPlan {
            name: "store-test".into(),
            source: SourceRef {
                base_url: "https://t.example".into(),
                project_id: None,
            },
            compute: ComputeSpec {
                name: "t-web".into(),
                machine_type: "e2-small".into(),
                disk_gb: 10,
                image: TargetImage::DebianFamily,
            },
            storage: StorageSpec {
                bucket: "t-content".into(),
                location: "us-central1".into(),
            },
            dns: None,
            function: FunctionSpec {
                name: "t-forms".into(),
                runtime: "python312".into(),
                region: "us-central1".into(),
            },
            forms: FormRouting {
                endpoint_path: "/api/forms".into(),
                notify_email: "t@t.example".into(),
            },
            processing: ProcessingOptions::default(),
            host: siteferry_types::plan::HostOptions::default(),
            tls_email: None,
            dry_run: false,
        }
    }

    fn job(id: &str) -> JobState {
        JobState::new(JobId::new(id), plan(), chrono::Utc::now().to_rfc3339())
    }

    #[test]
    fn save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileJobStore::open(dir.path()).unwrap();

        let mut job = job("store-test-1");
        job.stage_mut(StageName::Extract)
            .transition(StageStatus::Running, false)
            .unwrap();
        store.save(&job).unwrap();

        let loaded = store.load(&job.job_id).unwrap().unwrap();
        assert_eq!(loaded, job);
        assert_eq!(loaded.stage(StageName::Extract).status, StageStatus::Running);
    }

    #[test]
    fn load_missing_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileJobStore::open(dir.path()).unwrap();
        assert!(store.load(&JobId::new("nope")).unwrap().is_none());
    }

    #[test]
    fn save_replaces_whole_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileJobStore::open(dir.path()).unwrap();

        let mut job = job("store-test-2");
        store.save(&job).unwrap();

        job.status = JobStatus::Failed;
        store.save(&job).unwrap();

        let loaded = store.load(&job.job_id).unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Failed);
    }

    #[test]
    fn delete_reports_existence() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileJobStore::open(dir.path()).unwrap();

        let job = job("store-test-3");
        store.save(&job).unwrap();
        assert!(store.delete(&job.job_id).unwrap());
        assert!(!store.delete(&job.job_id).unwrap());
        assert!(store.load(&job.job_id).unwrap().is_none());
    }

    #[test]
    fn list_returns_saved_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileJobStore::open(dir.path()).unwrap();

        store.save(&job("a-job")).unwrap();
        store.save(&job("b-job")).unwrap();

        let ids = store.list().unwrap();
        let names: Vec<&str> = ids.iter().map(JobId::as_str).collect();
        assert_eq!(ids.len(), 2);
        assert!(names.contains(&"a-job"));
        assert!(names.contains(&"b-job"));
    }

    #[test]
    fn corrupt_record_surfaces_encoding_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileJobStore::open(dir.path()).unwrap();
        std::fs::write(dir.path().join("broken.json"), b"{ not json").unwrap();

        let err = store.load(&JobId::new("broken")).unwrap_err();
        assert!(matches!(err, StateError::Encoding(_)));
    }
}
