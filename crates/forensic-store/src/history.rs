use forensic_core::{BuildCommitRecord, BuildId};

use crate::{KeyFilter, SqliteStore, Store, StoreError};

/// Lazy newest-first walk over the builds of one job. Each step issues one
/// query for the next build number and one for its commit record, so callers
/// that stop early never touch older builds.
pub struct BuildHistory<'s> {
    store: &'s SqliteStore,
    job: String,
    before: Option<u64>,
    completed_only: bool,
    filter: KeyFilter<'s>,
    finished: bool,
}

impl<'s> BuildHistory<'s> {
    pub(crate) fn new(
        store: &'s SqliteStore,
        job: &str,
        before: Option<u64>,
        completed_only: bool,
        filter: KeyFilter<'s>,
    ) -> Self {
        Self {
            store,
            job: job.to_owned(),
            before,
            completed_only,
            filter,
            finished: false,
        }
    }

    pub fn job(&self) -> &str {
        &self.job
    }

    fn step(&mut self) -> Result<Option<(BuildId, Option<BuildCommitRecord>)>, StoreError> {
        let Some(build) = self
            .store
            .build_before(&self.job, self.before, self.completed_only)?
        else {
            return Ok(None);
        };

        self.before = Some(build.number);
        let record = self.store.commit_record(&build, self.filter)?;
        Ok(Some((build, record)))
    }
}

impl Iterator for BuildHistory<'_> {
    type Item = Result<(BuildId, Option<BuildCommitRecord>), StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        match self.step() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(err) => {
                self.finished = true;
                Some(Err(err))
            }
        }
    }
}
