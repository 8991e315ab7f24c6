use std::fs;
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};

use crate::domain::{Alias, BoxId, ObjectType, Status, SubmissionRecord};
use crate::error::HelixError;

/// Narrow CRUD surface over the per-object records. One record per
/// (object-type table, box, alias); updates are guarded by the expected
/// (status, version) pair so a stale cycle can never double-apply a
/// transition.
pub trait ObjectStore: Send + Sync {
    fn create_table_if_absent(
        &self,
        object_type: ObjectType,
        box_id: &BoxId,
    ) -> Result<(), HelixError>;

    /// Aliases currently in `status`, in stable iteration order.
    fn list_eligible(
        &self,
        object_type: ObjectType,
        box_id: &BoxId,
        status: Status,
    ) -> Result<Vec<Alias>, HelixError>;

    fn get(
        &self,
        object_type: ObjectType,
        box_id: &BoxId,
        alias: &Alias,
    ) -> Result<SubmissionRecord, HelixError>;

    fn create(&self, record: &SubmissionRecord) -> Result<(), HelixError>;

    /// Persists `record` only if the stored row still carries
    /// (`expected_status`, `expected_version`); bumps the version on write
    /// and returns the new one.
    fn update(
        &self,
        record: &SubmissionRecord,
        expected_status: Status,
        expected_version: u64,
    ) -> Result<u64, HelixError>;

    /// Looks an alias up across every object-type table of the box and
    /// returns its accession, if one has been assigned.
    fn find_accession(&self, box_id: &BoxId, alias: &str) -> Result<Option<String>, HelixError>;

    /// Whether the accession itself is recorded anywhere in the box.
    fn accession_exists(&self, box_id: &BoxId, accession: &str) -> Result<bool, HelixError>;
}

const ALL_OBJECT_TYPES: [ObjectType; 8] = [
    ObjectType::Sample,
    ObjectType::Experiment,
    ObjectType::Run,
    ObjectType::Analysis,
    ObjectType::Dataset,
    ObjectType::Study,
    ObjectType::Policy,
    ObjectType::Dac,
];

/// File-backed store: one JSON blob per record under
/// `{root}/{table}/{box}/{alias}.json`, written atomically.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: Utf8PathBuf,
}

impl FileStore {
    pub fn new(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    fn table_dir(&self, object_type: ObjectType, box_id: &BoxId) -> Utf8PathBuf {
        self.root
            .join(object_type.table_name())
            .join(box_id.as_str())
    }

    fn record_path(&self, object_type: ObjectType, box_id: &BoxId, alias: &Alias) -> Utf8PathBuf {
        self.table_dir(object_type, box_id)
            .join(format!("{alias}.json"))
    }

    fn read_record(&self, path: &Utf8Path) -> Result<SubmissionRecord, HelixError> {
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|err| HelixError::Store(format!("read {path}: {err}")))?;
        serde_json::from_str(&content)
            .map_err(|err| HelixError::Store(format!("decode {path}: {err}")))
    }

    fn write_record(&self, path: &Utf8Path, record: &SubmissionRecord) -> Result<(), HelixError> {
        let parent = path
            .parent()
            .ok_or_else(|| HelixError::Store(format!("invalid record path {path}")))?;
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| HelixError::Store(err.to_string()))?;
        let content = serde_json::to_vec_pretty(record)
            .map_err(|err| HelixError::Store(err.to_string()))?;
        let mut temp = tempfile::Builder::new()
            .prefix("helix-record")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| HelixError::Store(err.to_string()))?;
        temp.write_all(&content)
            .map_err(|err| HelixError::Store(err.to_string()))?;
        temp.persist(path.as_std_path())
            .map_err(|err| HelixError::Store(err.to_string()))?;
        Ok(())
    }
}

impl ObjectStore for FileStore {
    fn create_table_if_absent(
        &self,
        object_type: ObjectType,
        box_id: &BoxId,
    ) -> Result<(), HelixError> {
        fs::create_dir_all(self.table_dir(object_type, box_id).as_std_path())
            .map_err(|err| HelixError::Store(err.to_string()))
    }

    fn list_eligible(
        &self,
        object_type: ObjectType,
        box_id: &BoxId,
        status: Status,
    ) -> Result<Vec<Alias>, HelixError> {
        let dir = self.table_dir(object_type, box_id);
        if !dir.as_std_path().exists() {
            return Ok(Vec::new());
        }
        let mut aliases = Vec::new();
        let entries = fs::read_dir(dir.as_std_path())
            .map_err(|err| HelixError::Store(err.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|err| HelixError::Store(err.to_string()))?;
            let path = entry.path();
            if path.extension().map(|ext| ext == "json").unwrap_or(false) {
                let utf8 = Utf8PathBuf::from_path_buf(path)
                    .map_err(|path| HelixError::Store(format!("non-utf8 path {path:?}")))?;
                let record = self.read_record(&utf8)?;
                if record.status == status {
                    aliases.push(record.alias);
                }
            }
        }
        aliases.sort();
        Ok(aliases)
    }

    fn get(
        &self,
        object_type: ObjectType,
        box_id: &BoxId,
        alias: &Alias,
    ) -> Result<SubmissionRecord, HelixError> {
        let path = self.record_path(object_type, box_id, alias);
        if !path.as_std_path().exists() {
            return Err(HelixError::RecordNotFound(alias.to_string()));
        }
        self.read_record(&path)
    }

    fn create(&self, record: &SubmissionRecord) -> Result<(), HelixError> {
        let path = self.record_path(record.object_type, &record.box_id, &record.alias);
        if path.as_std_path().exists() {
            return Err(HelixError::Store(format!(
                "record already exists: {}",
                record.alias
            )));
        }
        self.write_record(&path, record)
    }

    fn update(
        &self,
        record: &SubmissionRecord,
        expected_status: Status,
        expected_version: u64,
    ) -> Result<u64, HelixError> {
        let path = self.record_path(record.object_type, &record.box_id, &record.alias);
        let current = self.read_record(&path)?;
        if current.status != expected_status || current.version != expected_version {
            return Err(HelixError::StaleRecord(format!(
                "{}: expected {expected_status} v{expected_version}, found {} v{}",
                record.alias, current.status, current.version
            )));
        }
        let mut next = record.clone();
        next.version = expected_version + 1;
        self.write_record(&path, &next)?;
        Ok(next.version)
    }

    fn find_accession(&self, box_id: &BoxId, alias: &str) -> Result<Option<String>, HelixError> {
        let parsed: Alias = match alias.parse() {
            Ok(parsed) => parsed,
            Err(_) => return Ok(None),
        };
        for object_type in ALL_OBJECT_TYPES {
            let path = self.record_path(object_type, box_id, &parsed);
            if !path.as_std_path().exists() {
                continue;
            }
            let record = self.read_record(&path)?;
            if let Some(accession) = record.accession_id {
                return Ok(Some(accession));
            }
        }
        Ok(None)
    }

    fn accession_exists(&self, box_id: &BoxId, accession: &str) -> Result<bool, HelixError> {
        for object_type in ALL_OBJECT_TYPES {
            let dir = self.table_dir(object_type, box_id);
            if !dir.as_std_path().exists() {
                continue;
            }
            let entries = fs::read_dir(dir.as_std_path())
                .map_err(|err| HelixError::Store(err.to_string()))?;
            for entry in entries {
                let entry = entry.map_err(|err| HelixError::Store(err.to_string()))?;
                let path = entry.path();
                if !path.extension().map(|ext| ext == "json").unwrap_or(false) {
                    continue;
                }
                let utf8 = Utf8PathBuf::from_path_buf(path)
                    .map_err(|path| HelixError::Store(format!("non-utf8 path {path:?}")))?;
                let record = self.read_record(&utf8)?;
                if record.accession_id.as_deref() == Some(accession) {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::domain::SubmissionRecord;

    fn store() -> (tempfile::TempDir, FileStore) {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().join("store")).unwrap();
        (temp, FileStore::new(root))
    }

    fn record(alias: &str) -> SubmissionRecord {
        SubmissionRecord::new(
            alias.parse().unwrap(),
            "box-001".parse().unwrap(),
            ObjectType::Analysis,
        )
    }

    #[test]
    fn create_get_roundtrip() {
        let (_temp, store) = store();
        let record = record("an_001");
        store.create(&record).unwrap();
        let loaded = store
            .get(ObjectType::Analysis, &record.box_id, &record.alias)
            .unwrap();
        assert_eq!(loaded.status, Status::Start);
        assert_eq!(loaded.version, 0);
    }

    #[test]
    fn update_guards_status_and_version() {
        let (_temp, store) = store();
        let mut record = record("an_002");
        store.create(&record).unwrap();

        record.status = Status::Clean;
        store.update(&record, Status::Start, 0).unwrap();

        // A second writer holding the old snapshot must be rejected.
        let err = store.update(&record, Status::Start, 0).unwrap_err();
        assert_matches!(err, HelixError::StaleRecord(_));

        let loaded = store
            .get(ObjectType::Analysis, &record.box_id, &record.alias)
            .unwrap();
        assert_eq!(loaded.status, Status::Clean);
        assert_eq!(loaded.version, 1);
    }

    #[test]
    fn list_eligible_filters_by_status_and_sorts() {
        let (_temp, store) = store();
        for alias in ["an_b", "an_a", "an_c"] {
            store.create(&record(alias)).unwrap();
        }
        let mut advanced = record("an_c");
        advanced.status = Status::Clean;
        store.update(&advanced, Status::Start, 0).unwrap();

        let box_id: BoxId = "box-001".parse().unwrap();
        let eligible = store
            .list_eligible(ObjectType::Analysis, &box_id, Status::Start)
            .unwrap();
        let names: Vec<_> = eligible.iter().map(|a| a.as_str().to_string()).collect();
        assert_eq!(names, vec!["an_a", "an_b"]);
    }

    #[test]
    fn find_accession_searches_all_tables() {
        let (_temp, store) = store();
        let mut sample = SubmissionRecord::new(
            "smp_001".parse().unwrap(),
            "box-001".parse().unwrap(),
            ObjectType::Sample,
        );
        sample.accession_id = Some("EGAN00001".to_string());
        store.create(&sample).unwrap();

        let box_id: BoxId = "box-001".parse().unwrap();
        let found = store.find_accession(&box_id, "smp_001").unwrap();
        assert_eq!(found.as_deref(), Some("EGAN00001"));
        let missing = store.find_accession(&box_id, "smp_404").unwrap();
        assert!(missing.is_none());
    }
}
