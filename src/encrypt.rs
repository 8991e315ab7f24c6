use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, info, warn};

use crate::domain::{Alias, BoxId, EncryptedArtifact, ObjectType, SubmissionRecord};
use crate::error::HelixError;
use crate::footprint::{DiskMonitor, ReservationLedger, declared_size};
use crate::scheduler::{JobId, JobLedger, JobRef, JobScheduler, JobSpec, JobStep, JobOutcome};
use crate::store::ObjectStore;

/// Outcome of the out-of-band encryption check for one alias.
#[derive(Debug)]
pub enum EncryptionVerdict {
    /// Every chain job succeeded and all artifacts verified.
    Complete(Vec<EncryptedArtifact>),
    /// At least one chain job is still queued or running; check again later.
    InFlight(String),
    /// Jobs or artifacts are missing or failed; roll back and retry.
    Incomplete(String),
    /// The scheduler could not be consulted at all.
    CouldNotCheck(String),
}

pub struct EncryptionPipeline<'a> {
    scheduler: &'a dyn JobScheduler,
    monitor: &'a dyn DiskMonitor,
    scratch_root: &'a Utf8Path,
    recipients: &'a [String],
    reserved_floor: u64,
}

impl<'a> EncryptionPipeline<'a> {
    pub fn new(
        scheduler: &'a dyn JobScheduler,
        monitor: &'a dyn DiskMonitor,
        scratch_root: &'a Utf8Path,
        recipients: &'a [String],
        reserved_floor: u64,
    ) -> Self {
        Self {
            scheduler,
            monitor,
            scratch_root,
            recipients,
            reserved_floor,
        }
    }

    pub fn working_dir(&self, record: &SubmissionRecord) -> Option<Utf8PathBuf> {
        record
            .working_directory
            .as_deref()
            .map(|dir| self.scratch_root.join(dir))
    }

    /// Greedy quota-bound admission from the encrypt queue, in store listing
    /// order. In-flight aliases charge their declared sizes against the
    /// balance before anything new is admitted. An alias that does not fit
    /// is simply skipped this cycle; no error is recorded.
    pub fn select_for_encryption(
        &self,
        store: &dyn ObjectStore,
        object_type: ObjectType,
        box_id: &BoxId,
    ) -> Result<Vec<Alias>, HelixError> {
        let free = self.monitor.free_bytes(self.scratch_root)?;

        let mut in_flight = 0u64;
        for alias in store.list_eligible(object_type, box_id, crate::domain::Status::Encrypting)? {
            let record = store.get(object_type, box_id, &alias)?;
            let paths: Vec<&str> = record.files.keys().map(String::as_str).collect();
            in_flight = in_flight.saturating_add(declared_size(&paths));
        }

        let mut ledger =
            ReservationLedger::new(free.saturating_sub(in_flight), self.reserved_floor);
        let mut admitted = Vec::new();
        for alias in store.list_eligible(object_type, box_id, crate::domain::Status::Encrypt)? {
            let record = store.get(object_type, box_id, &alias)?;
            let paths: Vec<&str> = record.files.keys().map(String::as_str).collect();
            let size = declared_size(&paths);
            if ledger.try_reserve(size) {
                admitted.push(alias);
            } else {
                debug!(alias = %alias, bytes = size, "scratch quota reached, deferring");
            }
        }
        Ok(admitted)
    }

    /// Submits the per-file checksum/encrypt/checksum chains plus the final
    /// completion checker. Any launch failure is returned immediately; the
    /// caller rolls the alias back so no half-submitted chain lingers.
    pub fn launch_jobs(
        &self,
        record: &SubmissionRecord,
        job_ledger: &mut JobLedger,
    ) -> Result<(), HelixError> {
        let workdir = self
            .working_dir(record)
            .ok_or_else(|| HelixError::Filesystem("record has no working directory".to_string()))?;
        fs::create_dir_all(workdir.as_std_path())
            .map_err(|err| HelixError::Filesystem(err.to_string()))?;
        remove_stale_artifacts(&workdir)?;

        let recipients = self
            .recipients
            .iter()
            .map(|key| format!("-r {key}"))
            .collect::<Vec<_>>()
            .join(" ");

        let mut last_link: Option<JobId> = None;
        for (index, (source_path, entry)) in record.files.iter().enumerate() {
            let encrypted = workdir.join(format!("{}.gpg", entry.destination_name));
            let original_sum = workdir.join(format!("{}.md5", entry.destination_name));
            let encrypted_sum = workdir.join(format!("{}.gpg.md5", entry.destination_name));

            // Wrapped commands go through a shell; paths are quoted so a
            // source file with spaces cannot split into extra arguments.
            let checksum_original = self.scheduler.submit(&JobSpec {
                name: format!("cs.{}.{index}", record.alias),
                command: format!("md5sum '{source_path}' > '{original_sum}'"),
                depends_on: last_link.clone(),
            })?;
            job_ledger.record(
                checksum_original.clone(),
                job_ref(record, JobStep::ChecksumOriginal, Some(source_path)),
            );

            let encrypt = self.scheduler.submit(&JobSpec {
                name: format!("enc.{}.{index}", record.alias),
                command: format!(
                    "gpg --batch --yes --trust-model always {recipients} -o '{encrypted}' --encrypt '{source_path}'"
                ),
                depends_on: Some(checksum_original),
            })?;
            job_ledger.record(
                encrypt.clone(),
                job_ref(record, JobStep::Encrypt, Some(source_path)),
            );

            let checksum_encrypted = self.scheduler.submit(&JobSpec {
                name: format!("cse.{}.{index}", record.alias),
                command: format!("md5sum '{encrypted}' > '{encrypted_sum}'"),
                depends_on: Some(encrypt),
            })?;
            job_ledger.record(
                checksum_encrypted.clone(),
                job_ref(record, JobStep::ChecksumEncrypted, Some(source_path)),
            );
            last_link = Some(checksum_encrypted);
        }

        // The checker re-invokes the orchestrator once the whole chain has
        // drained, so completion is discovered without any polling loop.
        let checker = self.scheduler.submit(&JobSpec {
            name: format!("check.{}", record.alias),
            command: format!(
                "helix-sub check-encryption --object-type {} --box {} --alias {}",
                record.object_type, record.box_id, record.alias
            ),
            depends_on: last_link,
        })?;
        job_ledger.record(checker, job_ref(record, JobStep::EncryptionChecker, None));

        info!(alias = %record.alias, files = record.files.len(), "encryption chains launched");
        Ok(())
    }

    /// Artifact-driven verification: every chain job must have succeeded AND
    /// all three artifacts per file must exist with non-empty checksums.
    /// Job accounting alone is never trusted.
    pub fn verify(&self, record: &SubmissionRecord, job_ledger: &JobLedger) -> EncryptionVerdict {
        let Some(workdir) = self.working_dir(record) else {
            return EncryptionVerdict::Incomplete("record has no working directory".to_string());
        };

        let chain_jobs: Vec<_> = job_ledger
            .jobs_for_alias(&record.alias)
            .into_iter()
            .filter(|(_, reference)| {
                matches!(
                    reference.step,
                    JobStep::ChecksumOriginal | JobStep::Encrypt | JobStep::ChecksumEncrypted
                )
            })
            .collect();
        if chain_jobs.is_empty() {
            return EncryptionVerdict::CouldNotCheck(
                "no encryption jobs recorded for alias".to_string(),
            );
        }

        for (id, reference) in &chain_jobs {
            match self.scheduler.poll(id) {
                Ok(JobOutcome::Succeeded) => {}
                Ok(JobOutcome::Failed(code)) => {
                    return EncryptionVerdict::Incomplete(format!(
                        "job {id} ({:?}) exited with {code}",
                        reference.step
                    ));
                }
                Ok(JobOutcome::Unknown) => {
                    return EncryptionVerdict::InFlight(format!(
                        "job {id} ({:?}) has not finished",
                        reference.step
                    ));
                }
                Err(err) => {
                    return EncryptionVerdict::CouldNotCheck(err.to_string());
                }
            }
        }

        let mut artifacts = Vec::new();
        for (source_path, entry) in &record.files {
            let encrypted = workdir.join(format!("{}.gpg", entry.destination_name));
            let original_sum = workdir.join(format!("{}.md5", entry.destination_name));
            let encrypted_sum = workdir.join(format!("{}.gpg.md5", entry.destination_name));

            if !encrypted.as_std_path().exists() {
                return EncryptionVerdict::Incomplete(format!(
                    "encrypted artifact missing for {source_path}"
                ));
            }
            let Some(unencrypted_checksum) = read_checksum(&original_sum) else {
                return EncryptionVerdict::Incomplete(format!(
                    "original checksum missing or empty for {source_path}"
                ));
            };
            let Some(encrypted_checksum) = read_checksum(&encrypted_sum) else {
                return EncryptionVerdict::Incomplete(format!(
                    "encrypted checksum missing or empty for {source_path}"
                ));
            };
            artifacts.push(EncryptedArtifact {
                source_path: source_path.clone(),
                unencrypted_checksum,
                encrypted_checksum,
                encrypted_name: format!("{}.gpg", entry.destination_name),
            });
        }

        EncryptionVerdict::Complete(artifacts)
    }
}

fn job_ref(record: &SubmissionRecord, step: JobStep, source_path: Option<&str>) -> JobRef {
    JobRef {
        alias: record.alias.clone(),
        box_id: record.box_id.clone(),
        step,
        source_path: source_path.map(str::to_string),
    }
}

/// Leftover `.gpg` artifacts from a failed attempt would make the encryption
/// tool refuse to overwrite; clear them before relaunching.
fn remove_stale_artifacts(workdir: &Utf8Path) -> Result<(), HelixError> {
    let entries = match fs::read_dir(workdir.as_std_path()) {
        Ok(entries) => entries,
        Err(_) => return Ok(()),
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let is_artifact = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext == "gpg" || ext == "md5")
            .unwrap_or(false);
        if is_artifact {
            warn!(path = %path.display(), "removing stale artifact");
            fs::remove_file(&path).map_err(|err| HelixError::Filesystem(err.to_string()))?;
        }
    }
    Ok(())
}

/// First token of a checksum file, or `None` when missing or empty.
pub fn read_checksum(path: &Utf8Path) -> Option<String> {
    let content = fs::read_to_string(path.as_std_path()).ok()?;
    let token = content.split_whitespace().next()?;
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_read_takes_first_token() {
        let temp = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(temp.path().join("a.md5")).unwrap();
        fs::write(path.as_std_path(), "d41d8cd98f00b204e9800998ecf8427e  a.vcf.gz\n").unwrap();
        assert_eq!(
            read_checksum(&path).as_deref(),
            Some("d41d8cd98f00b204e9800998ecf8427e")
        );
    }

    #[test]
    fn checksum_read_rejects_empty_file() {
        let temp = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(temp.path().join("empty.md5")).unwrap();
        fs::write(path.as_std_path(), "").unwrap();
        assert_eq!(read_checksum(&path), None);
        let missing = Utf8PathBuf::from_path_buf(temp.path().join("missing.md5")).unwrap();
        assert_eq!(read_checksum(&missing), None);
    }

    #[test]
    fn stale_artifacts_are_cleared() {
        let temp = tempfile::tempdir().unwrap();
        let workdir = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        fs::write(temp.path().join("old.gpg"), b"x").unwrap();
        fs::write(temp.path().join("old.md5"), b"x").unwrap();
        fs::write(temp.path().join("keep.txt"), b"x").unwrap();
        remove_stale_artifacts(&workdir).unwrap();
        assert!(!temp.path().join("old.gpg").exists());
        assert!(!temp.path().join("old.md5").exists());
        assert!(temp.path().join("keep.txt").exists());
    }
}
