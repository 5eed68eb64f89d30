use chrono::Utc;
use redb::{ReadableTable, Table};

use super::db::{Database, DatabaseError};
use super::models::{FileRecord, FileStatus, NewFile, StatusChange};
use super::tables::*;
use crate::state_machine::{self, Step, Transition};

type FilesTable<'txn> = Table<'txn, &'static str, &'static [u8]>;

fn load<T>(table: &T, id: &str) -> Result<Option<FileRecord>, DatabaseError>
where
    T: ReadableTable<&'static str, &'static [u8]>,
{
    let file = match table.get(id)? {
        Some(data) => Some(rmp_serde::from_slice(data.value())?),
        None => None,
    };
    Ok(file)
}

fn store(table: &mut FilesTable<'_>, file: &FileRecord) -> Result<(), DatabaseError> {
    let data = rmp_serde::to_vec_named(file)?;
    table.insert(file.id.as_str(), data.as_slice())?;
    Ok(())
}

fn require_non_empty(field: &str, value: &str) -> Result<(), DatabaseError> {
    if value.trim().is_empty() {
        return Err(DatabaseError::Validation(format!("{field} must not be empty")));
    }
    Ok(())
}

impl Database {
    // ========================================================================
    // File operations
    // ========================================================================

    /// Insert a new file in `PENDING` and register its owner and object key.
    pub fn create_file(&self, new: &NewFile) -> Result<FileRecord, DatabaseError> {
        require_non_empty("id", &new.id)?;
        require_non_empty("owner_id", &new.owner_id)?;
        require_non_empty("original_name", &new.original_name)?;
        require_non_empty("content_type", &new.content_type)?;
        require_non_empty("object_key", &new.object_key)?;
        let size_bytes = u64::try_from(new.size_bytes).map_err(|_| {
            DatabaseError::Validation("size_bytes must not be negative".to_string())
        })?;

        let now = Utc::now();
        let file = FileRecord {
            id: new.id.clone(),
            owner_id: new.owner_id.clone(),
            original_name: new.original_name.clone(),
            content_type: new.content_type.clone(),
            size_bytes,
            object_key: new.object_key.clone(),
            created_at: now,
            status: FileStatus::Pending,
            project_id: None,
            updated_at: now,
        };

        let write_txn = self.begin_write()?;
        {
            let mut key_table = write_txn.open_table(OBJECT_KEYS)?;
            if key_table.get(file.object_key.as_str())?.is_some() {
                return Err(DatabaseError::DuplicateObjectKey(file.object_key));
            }

            let mut table = write_txn.open_table(FILES)?;
            if table.get(file.id.as_str())?.is_some() {
                return Err(DatabaseError::Validation(format!(
                    "file id '{}' already exists",
                    file.id
                )));
            }
            store(&mut table, &file)?;
            key_table.insert(file.object_key.as_str(), file.id.as_str())?;

            // Maintain owner index
            let mut owner_table = write_txn.open_table(OWNER_FILES)?;
            let mut file_ids: Vec<String> = match owner_table.get(file.owner_id.as_str())? {
                Some(data) => rmp_serde::from_slice(data.value())?,
                None => Vec::new(),
            };
            file_ids.push(file.id.clone());
            let index_data = rmp_serde::to_vec_named(&file_ids)?;
            owner_table.insert(file.owner_id.as_str(), index_data.as_slice())?;
        }
        write_txn.commit()?;
        Ok(file)
    }

    /// Get a file by its UUID, whatever its status
    pub fn get_file(&self, id: &str) -> Result<Option<FileRecord>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(FILES)?;
        load(&table, id)
    }

    /// Move a file from `PENDING` to `READY`. Already-ready files are returned
    /// unchanged.
    pub fn mark_ready(&self, id: &str) -> Result<Option<StatusChange>, DatabaseError> {
        self.apply_transition(id, Transition::Complete)
    }

    /// Move a live file to `DELETED`.
    pub fn mark_deleted(&self, id: &str) -> Result<Option<StatusChange>, DatabaseError> {
        self.apply_transition(id, Transition::Delete)
    }

    fn apply_transition(
        &self,
        id: &str,
        transition: Transition,
    ) -> Result<Option<StatusChange>, DatabaseError> {
        let write_txn = self.begin_write()?;
        let change = {
            let mut table = write_txn.open_table(FILES)?;
            match load(&table, id)? {
                Some(mut file) => match state_machine::step(file.status, transition)? {
                    Step::Moved(status) => {
                        file.status = status;
                        file.updated_at = Utc::now();
                        store(&mut table, &file)?;
                        Some(StatusChange {
                            file,
                            changed: true,
                        })
                    }
                    Step::Unchanged => Some(StatusChange {
                        file,
                        changed: false,
                    }),
                },
                None => None,
            }
        };
        write_txn.commit()?;
        Ok(change)
    }

    /// Link a file to a project, clearing the project from whichever file
    /// held it before. The eviction, the assignment and the index update
    /// commit in one write transaction.
    pub fn reassign_project(
        &self,
        id: &str,
        project_id: i64,
    ) -> Result<Option<FileRecord>, DatabaseError> {
        let write_txn = self.begin_write()?;
        let updated = {
            let mut table = write_txn.open_table(FILES)?;
            let mut project_table = write_txn.open_table(PROJECT_FILES)?;

            match load(&table, id)? {
                Some(mut file) => {
                    // Re-checked here so a concurrent delete cannot slip in
                    // between the caller's read and this write.
                    state_machine::step(file.status, Transition::Attach)?;

                    let holder: Option<String> = project_table
                        .get(project_id)?
                        .map(|data| data.value().to_string());

                    if let Some(holder_id) = holder.filter(|h| h.as_str() != id) {
                        if let Some(mut previous) = load(&table, &holder_id)? {
                            previous.project_id = None;
                            previous.updated_at = Utc::now();
                            store(&mut table, &previous)?;
                            tracing::debug!(
                                file_id = %holder_id,
                                project_id,
                                "Evicted previous project attachment"
                            );
                        }
                    }

                    // Release the project this file held before, if any
                    if let Some(old_project) = file.project_id.filter(|p| *p != project_id) {
                        let owned_by_file = project_table
                            .get(old_project)?
                            .map(|data| data.value() == id)
                            .unwrap_or(false);
                        if owned_by_file {
                            project_table.remove(old_project)?;
                        }
                    }

                    file.project_id = Some(project_id);
                    file.updated_at = Utc::now();
                    store(&mut table, &file)?;
                    project_table.insert(project_id, id)?;
                    Some(file)
                }
                None => None,
            }
        };
        write_txn.commit()?;
        Ok(updated)
    }

    /// The `READY` file attached to a project, if any
    pub fn get_ready_file_for_project(
        &self,
        project_id: i64,
    ) -> Result<Option<FileRecord>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let project_table = read_txn.open_table(PROJECT_FILES)?;

        let id = match project_table.get(project_id)? {
            Some(data) => data.value().to_string(),
            None => return Ok(None),
        };

        let files_table = read_txn.open_table(FILES)?;
        Ok(load(&files_table, &id)?.filter(|file| file.is_ready()))
    }

    /// Live files uploaded by an owner, oldest first. `DELETED` files are
    /// never returned, whatever the status filter.
    pub fn list_files_by_owner(
        &self,
        owner_id: &str,
        status: Option<FileStatus>,
    ) -> Result<Vec<FileRecord>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let owner_table = read_txn.open_table(OWNER_FILES)?;
        let files_table = read_txn.open_table(FILES)?;

        let file_ids: Vec<String> = match owner_table.get(owner_id)? {
            Some(data) => rmp_serde::from_slice(data.value())?,
            None => return Ok(Vec::new()),
        };

        let mut files = Vec::new();
        for file_id in file_ids {
            if let Some(file) = load(&files_table, &file_id)? {
                if !file.is_deleted() && status.map_or(true, |s| file.status == s) {
                    files.push(file);
                }
            }
        }

        files.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(files)
    }
}
