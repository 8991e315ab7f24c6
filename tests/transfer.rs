use std::collections::BTreeSet;
use std::sync::Arc;

use assert_matches::assert_matches;
use camino::{Utf8Path, Utf8PathBuf};

use helix_submitter::domain::{FileEntry, FileType, ObjectType, Status, SubmissionRecord};
use helix_submitter::error::HelixError;
use helix_submitter::scheduler::{
    JobId, JobLedger, JobOutcome, JobRef, JobScheduler, JobSpec, JobStep,
};
use helix_submitter::store::{FileStore, ObjectStore};
use helix_submitter::transfer::{RemoteEntry, TransferClient, TransferPipeline, UploadVerdict};

const BOX: &str = "box-001";

struct StubScheduler {
    outcome: JobOutcome,
}

impl JobScheduler for StubScheduler {
    fn submit(&self, _spec: &JobSpec) -> Result<JobId, HelixError> {
        Ok(JobId::new("1"))
    }

    fn poll(&self, _id: &JobId) -> Result<JobOutcome, HelixError> {
        Ok(self.outcome)
    }
}

struct StaticTransfer {
    entries: Vec<RemoteEntry>,
}

impl StaticTransfer {
    fn with_names(names: &[(&str, u64)]) -> Self {
        Self {
            entries: names
                .iter()
                .map(|(name, size)| RemoteEntry {
                    name: name.to_string(),
                    size: *size,
                })
                .collect(),
        }
    }
}

impl TransferClient for StaticTransfer {
    fn mkdirp(&self, _remote_path: &Utf8Path) -> Result<(), HelixError> {
        Ok(())
    }

    fn put(&self, _local_files: &[Utf8PathBuf], _remote_path: &Utf8Path) -> Result<(), HelixError> {
        Ok(())
    }

    fn list(&self, _remote_path: &Utf8Path) -> Result<Vec<RemoteEntry>, HelixError> {
        Ok(self.entries.clone())
    }
}

fn pipeline(
    transfer: StaticTransfer,
    outcome: JobOutcome,
    staging_ceiling: u64,
    max_concurrent: usize,
) -> TransferPipeline {
    TransferPipeline::new(
        Arc::new(transfer),
        Arc::new(StubScheduler { outcome }),
        Utf8PathBuf::from("/scratch"),
        staging_ceiling,
        max_concurrent,
        2,
    )
}

/// An analysis whose single file already carries verified checksums and an
/// encrypted artifact name.
fn encrypted_record(alias: &str, status: Status) -> SubmissionRecord {
    let mut record = SubmissionRecord::new(
        alias.parse().unwrap(),
        BOX.parse().unwrap(),
        ObjectType::Analysis,
    );
    record.status = status;
    let mut entry = FileEntry::declared("data.vcf.gz", FileType::Vcf).unwrap();
    entry.unencrypted_checksum = Some("aaa111".to_string());
    entry.encrypted_checksum = Some("bbb222".to_string());
    entry.encrypted_name = Some("data.vcf.gz.gpg".to_string());
    record.files.insert("/data/data.vcf.gz".to_string(), entry);
    record
}

fn upload_ledger(record: &SubmissionRecord) -> JobLedger {
    let mut ledger = JobLedger::default();
    ledger.record(
        JobId::new("1"),
        JobRef {
            alias: record.alias.clone(),
            box_id: record.box_id.clone(),
            step: JobStep::Upload,
            source_path: None,
        },
    );
    ledger
}

fn store_with(records: &[&SubmissionRecord]) -> (tempfile::TempDir, FileStore) {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().join("store")).unwrap();
    let store = FileStore::new(root);
    for record in records {
        store.create(record).unwrap();
    }
    (temp, store)
}

#[test]
fn zero_exit_with_missing_staging_entry_fails_verification() {
    let record = encrypted_record("an_miss", Status::Uploading);
    let ledger = upload_ledger(&record);
    let pipeline = pipeline(
        StaticTransfer::with_names(&[]),
        JobOutcome::Succeeded,
        u64::MAX,
        10,
    );

    // The unencrypted-checksum sidecar never arrived.
    let listing: BTreeSet<String> = ["data.vcf.gz.gpg", "data.vcf.gz.gpg.md5"]
        .iter()
        .map(|name| name.to_string())
        .collect();
    let verdict = pipeline.verify_upload(&record, &ledger, &listing);
    assert_matches!(
        verdict,
        UploadVerdict::Failed(detail) if detail.contains("data.vcf.gz.md5")
    );
}

#[test]
fn failed_upload_job_fails_verification() {
    let record = encrypted_record("an_exit", Status::Uploading);
    let ledger = upload_ledger(&record);
    let pipeline = pipeline(
        StaticTransfer::with_names(&[]),
        JobOutcome::Failed(3),
        u64::MAX,
        10,
    );

    let listing: BTreeSet<String> = ["data.vcf.gz.gpg", "data.vcf.gz.gpg.md5", "data.vcf.gz.md5"]
        .iter()
        .map(|name| name.to_string())
        .collect();
    let verdict = pipeline.verify_upload(&record, &ledger, &listing);
    assert_matches!(verdict, UploadVerdict::Failed(detail) if detail.contains("3"));
}

#[test]
fn pending_upload_jobs_are_left_in_flight() {
    let record = encrypted_record("an_wait", Status::Uploading);
    let ledger = upload_ledger(&record);
    let pipeline = pipeline(
        StaticTransfer::with_names(&[]),
        JobOutcome::Unknown,
        u64::MAX,
        10,
    );

    let verdict = pipeline.verify_upload(&record, &ledger, &BTreeSet::new());
    assert_matches!(verdict, UploadVerdict::InFlight(_));
}

#[test]
fn staging_footprint_over_ceiling_admits_nothing() {
    let record = encrypted_record("an_ready", Status::Upload);
    let (_temp, store) = store_with(&[&record]);

    // 5000 unregistered bytes already staged against a 1000-byte ceiling.
    let pipeline = pipeline(
        StaticTransfer::with_names(&[("stranger.bam.gpg", 5000)]),
        JobOutcome::Succeeded,
        1000,
        10,
    );
    let admitted = pipeline
        .admit(
            &store,
            &JobLedger::default(),
            ObjectType::Analysis,
            &BOX.parse().unwrap(),
            Utf8Path::new("/staging"),
        )
        .unwrap();
    assert!(admitted.is_empty());
}

#[test]
fn registered_artifacts_do_not_count_against_the_ceiling() {
    let mut archived = encrypted_record("an_done", Status::Submitted);
    archived.accession_id = Some("EGAZ00001".to_string());
    let waiting = encrypted_record("an_ready", Status::Upload);
    let (_temp, store) = store_with(&[&archived, &waiting]);

    // Everything staged belongs to the accessioned object.
    let pipeline = pipeline(
        StaticTransfer::with_names(&[
            ("data.vcf.gz.gpg", 5000),
            ("data.vcf.gz.gpg.md5", 64),
            ("data.vcf.gz.md5", 64),
        ]),
        JobOutcome::Succeeded,
        1000,
        10,
    );
    let admitted = pipeline
        .admit(
            &store,
            &JobLedger::default(),
            ObjectType::Analysis,
            &BOX.parse().unwrap(),
            Utf8Path::new("/staging"),
        )
        .unwrap();
    assert_eq!(admitted.len(), 1);
    assert_eq!(admitted[0].as_str(), "an_ready");
}

#[test]
fn in_flight_job_cap_limits_admissions() {
    let first = encrypted_record("an_a", Status::Upload);
    let second = encrypted_record("an_b", Status::Upload);
    let (_temp, store) = store_with(&[&first, &second]);

    let running = encrypted_record("an_busy", Status::Uploading);
    let ledger = upload_ledger(&running);

    // Cap of two with one job running leaves a single slot.
    let pipeline = pipeline(
        StaticTransfer::with_names(&[]),
        JobOutcome::Succeeded,
        u64::MAX,
        2,
    );
    let admitted = pipeline
        .admit(
            &store,
            &ledger,
            ObjectType::Analysis,
            &BOX.parse().unwrap(),
            Utf8Path::new("/staging"),
        )
        .unwrap();
    assert_eq!(admitted.len(), 1);
    assert_eq!(admitted[0].as_str(), "an_a");
}
