//! In-memory implementation of [`JobStore`] (for testing).

use std::collections::HashMap;
use std::sync::Mutex;

use siteferry_types::job::{JobId, JobState};

use crate::error::{self, StateError};
use crate::store::JobStore;

/// In-memory job store backed by a mutex-guarded map.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<String, JobState>>,
}

impl MemoryJobStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::LockPoisoned`] if a writer panicked.
    pub fn len(&self) -> error::Result<usize> {
        Ok(self.jobs.lock().map_err(|_| StateError::LockPoisoned)?.len())
    }

    /// Whether the store holds no records.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::LockPoisoned`] if a writer panicked.
    pub fn is_empty(&self) -> error::Result<bool> {
        Ok(self.len()? == 0)
    }
}

impl JobStore for MemoryJobStore {
    fn load(&self, job_id: &JobId) -> error::Result<Option<JobState>> {
        let jobs = self.jobs.lock().map_err(|_| StateError::LockPoisoned)?;
        Ok(jobs.get(job_id.as_str()).cloned())
    }

    fn save(&self, job: &JobState) -> error::Result<()> {
        let mut jobs = self.jobs.lock().map_err(|_| StateError::LockPoisoned)?;
        jobs.insert(job.job_id.as_str().to_string(), job.clone());
        Ok(())
    }

    fn delete(&self, job_id: &JobId) -> error::Result<bool> {
        let mut jobs = self.jobs.lock().map_err(|_| StateError::LockPoisoned)?;
        Ok(jobs.remove(job_id.as_str()).is_some())
    }

    fn list(&self) -> error::Result<Vec<JobId>> {
        let jobs = self.jobs.lock().map_err(|_| StateError::LockPoisoned)?;
        let mut ids: Vec<String> = jobs.keys().cloned().collect();
        ids.sort_unstable();
        Ok(ids.into_iter().map(JobId::new).collect())
    }
}
