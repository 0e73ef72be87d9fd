//! Local enrolment records written by down-sync.

use crate::error::SyncResult;
use fieldsync_events::Subject;
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// A change to the local subject database.
#[derive(Debug, Clone, PartialEq)]
pub enum SubjectAction {
    /// Insert or replace a subject.
    Creation(Subject),
    /// Remove a subject by id.
    Deletion(String),
}

/// The local subject database.
pub trait SubjectRepository: Send + Sync {
    /// Applies actions in order, all or nothing.
    fn perform_actions(&self, actions: &[SubjectAction]) -> SyncResult<()>;

    /// Loads a subject.
    fn load(&self, subject_id: &str) -> SyncResult<Option<Subject>>;

    /// Counts subjects, optionally of one project.
    fn count(&self, project_id: Option<&str>) -> SyncResult<usize>;

    /// Removes every subject.
    fn delete_all(&self) -> SyncResult<()>;
}

/// An in-memory [`SubjectRepository`].
#[derive(Debug, Default)]
pub struct MemorySubjectRepository {
    subjects: RwLock<BTreeMap<String, Subject>>,
}

impl MemorySubjectRepository {
    /// Creates an empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every subject id, sorted.
    pub fn subject_ids(&self) -> Vec<String> {
        self.subjects.read().keys().cloned().collect()
    }
}

impl SubjectRepository for MemorySubjectRepository {
    fn perform_actions(&self, actions: &[SubjectAction]) -> SyncResult<()> {
        let mut subjects = self.subjects.write();
        for action in actions {
            match action {
                SubjectAction::Creation(subject) => {
                    subjects.insert(subject.subject_id.clone(), subject.clone());
                }
                SubjectAction::Deletion(subject_id) => {
                    subjects.remove(subject_id);
                }
            }
        }
        Ok(())
    }

    fn load(&self, subject_id: &str) -> SyncResult<Option<Subject>> {
        Ok(self.subjects.read().get(subject_id).cloned())
    }

    fn count(&self, project_id: Option<&str>) -> SyncResult<usize> {
        let subjects = self.subjects.read();
        Ok(match project_id {
            Some(project_id) => subjects
                .values()
                .filter(|s| s.project_id == project_id)
                .count(),
            None => subjects.len(),
        })
    }

    fn delete_all(&self) -> SyncResult<()> {
        self.subjects.write().clear();
        Ok(())
    }
}
