use std::fs;
use std::sync::Mutex;

use assert_matches::assert_matches;
use camino::{Utf8Path, Utf8PathBuf};

use helix_submitter::domain::{FileEntry, FileType, ObjectType, Status, SubmissionRecord};
use helix_submitter::encrypt::{EncryptionPipeline, EncryptionVerdict};
use helix_submitter::error::HelixError;
use helix_submitter::footprint::DiskMonitor;
use helix_submitter::scheduler::{JobId, JobLedger, JobOutcome, JobScheduler, JobSpec};
use helix_submitter::store::{FileStore, ObjectStore};

const BOX: &str = "box-001";

struct FixedDisk {
    free: u64,
}

impl DiskMonitor for FixedDisk {
    fn free_bytes(&self, _path: &Utf8Path) -> Result<u64, HelixError> {
        Ok(self.free)
    }
}

#[derive(Default)]
struct CountingScheduler {
    next_id: Mutex<u64>,
    specs: Mutex<Vec<JobSpec>>,
}

impl JobScheduler for CountingScheduler {
    fn submit(&self, spec: &JobSpec) -> Result<JobId, HelixError> {
        let mut next = self.next_id.lock().unwrap();
        *next += 1;
        self.specs.lock().unwrap().push(spec.clone());
        Ok(JobId::new(next.to_string()))
    }

    fn poll(&self, _id: &JobId) -> Result<JobOutcome, HelixError> {
        Ok(JobOutcome::Succeeded)
    }
}

struct RejectingScheduler;

impl JobScheduler for RejectingScheduler {
    fn submit(&self, spec: &JobSpec) -> Result<JobId, HelixError> {
        Err(HelixError::JobLaunch {
            job: spec.name.clone(),
            message: "queue is closed".to_string(),
        })
    }

    fn poll(&self, _id: &JobId) -> Result<JobOutcome, HelixError> {
        Ok(JobOutcome::Unknown)
    }
}

struct Fixture {
    _temp: tempfile::TempDir,
    root: Utf8PathBuf,
    store: FileStore,
}

impl Fixture {
    fn new() -> Self {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let store = FileStore::new(root.join("store"));
        Self {
            _temp: temp,
            root,
            store,
        }
    }

    /// An analysis in `status` whose single declared file really exists on
    /// disk with `size` bytes, so admission sees its true footprint.
    fn record_with_file(&self, alias: &str, status: Status, size: usize) -> SubmissionRecord {
        let source = self.root.join(format!("{alias}.vcf.gz"));
        fs::write(source.as_std_path(), vec![0u8; size]).unwrap();

        let mut record = SubmissionRecord::new(
            alias.parse().unwrap(),
            BOX.parse().unwrap(),
            ObjectType::Analysis,
        );
        record.status = status;
        record.files.insert(
            source.to_string(),
            FileEntry::declared(&format!("{alias}.vcf.gz"), FileType::Vcf).unwrap(),
        );
        self.store.create(&record).unwrap();
        record
    }
}

#[test]
fn admission_respects_reserved_floor() {
    let fixture = Fixture::new();
    fixture.record_with_file("an_a", Status::Encrypt, 600);
    fixture.record_with_file("an_b", Status::Encrypt, 600);

    let scheduler = CountingScheduler::default();
    let monitor = FixedDisk { free: 2000 };
    let recipients = vec!["key-1".to_string()];
    let scratch = fixture.root.join("scratch");
    let pipeline = EncryptionPipeline::new(&scheduler, &monitor, &scratch, &recipients, 1000);

    // 2000 - 600 = 1400 > 1000 admits the first; 1400 - 600 = 800 would
    // breach the floor, so the second waits.
    let admitted = pipeline
        .select_for_encryption(&fixture.store, ObjectType::Analysis, &BOX.parse().unwrap())
        .unwrap();
    let names: Vec<_> = admitted.iter().map(|a| a.as_str().to_string()).collect();
    assert_eq!(names, vec!["an_a"]);
}

#[test]
fn in_flight_aliases_charge_the_balance_first() {
    let fixture = Fixture::new();
    fixture.record_with_file("an_busy", Status::Encrypting, 600);
    fixture.record_with_file("an_wait", Status::Encrypt, 600);

    let scheduler = CountingScheduler::default();
    let monitor = FixedDisk { free: 2000 };
    let recipients = vec!["key-1".to_string()];
    let scratch = fixture.root.join("scratch");
    let pipeline = EncryptionPipeline::new(&scheduler, &monitor, &scratch, &recipients, 1000);
    // 2000 minus the 600 already encrypting leaves 1400; admitting 600 more
    // would land on 800, under the floor.
    let admitted = pipeline
        .select_for_encryption(&fixture.store, ObjectType::Analysis, &BOX.parse().unwrap())
        .unwrap();
    assert!(admitted.is_empty());
}

#[test]
fn oversized_alias_is_skipped_but_queue_continues() {
    let fixture = Fixture::new();
    fixture.record_with_file("an_big", Status::Encrypt, 5000);
    fixture.record_with_file("an_small", Status::Encrypt, 100);

    let scheduler = CountingScheduler::default();
    let monitor = FixedDisk { free: 2000 };
    let recipients = vec!["key-1".to_string()];
    let scratch = fixture.root.join("scratch");
    let pipeline = EncryptionPipeline::new(&scheduler, &monitor, &scratch, &recipients, 1000);

    let admitted = pipeline
        .select_for_encryption(&fixture.store, ObjectType::Analysis, &BOX.parse().unwrap())
        .unwrap();
    let names: Vec<_> = admitted.iter().map(|a| a.as_str().to_string()).collect();
    assert_eq!(names, vec!["an_small"]);
}

#[test]
fn launch_rejection_leaves_no_jobs_recorded() {
    let fixture = Fixture::new();
    let mut record = fixture.record_with_file("an_fail", Status::Encrypt, 10);
    record.working_directory = Some("wd_fail".to_string());

    let scheduler = RejectingScheduler;
    let monitor = FixedDisk { free: 1_000_000 };
    let recipients = vec!["key-1".to_string()];
    let scratch = fixture.root.join("scratch");
    let pipeline = EncryptionPipeline::new(&scheduler, &monitor, &scratch, &recipients, 1000);

    let mut ledger = JobLedger::default();
    let err = pipeline.launch_jobs(&record, &mut ledger).unwrap_err();
    assert_matches!(err, HelixError::JobLaunch { .. });
    assert!(ledger.is_empty(), "a rejected chain must not leave ledger entries");
}

#[test]
fn job_commands_quote_paths_with_spaces() {
    let fixture = Fixture::new();
    let mut record = SubmissionRecord::new(
        "an_space".parse().unwrap(),
        BOX.parse().unwrap(),
        ObjectType::Analysis,
    );
    record.status = Status::Encrypt;
    record.working_directory = Some("wd_space".to_string());
    record.files.insert(
        "/data/my calls.vcf.gz".to_string(),
        FileEntry::declared("my-calls.vcf.gz", FileType::Vcf).unwrap(),
    );

    let scheduler = CountingScheduler::default();
    let monitor = FixedDisk { free: 1_000_000 };
    let recipients = vec!["key-1".to_string()];
    let scratch = fixture.root.join("scratch");
    let pipeline = EncryptionPipeline::new(&scheduler, &monitor, &scratch, &recipients, 1000);

    let mut ledger = JobLedger::default();
    pipeline.launch_jobs(&record, &mut ledger).unwrap();

    let specs = scheduler.specs.lock().unwrap();
    let checksum = specs
        .iter()
        .find(|spec| spec.name.starts_with("cs."))
        .unwrap();
    assert!(
        checksum.command.contains("'/data/my calls.vcf.gz'"),
        "path with spaces must stay one argument: {}",
        checksum.command
    );
    let encrypt = specs
        .iter()
        .find(|spec| spec.name.starts_with("enc."))
        .unwrap();
    assert!(encrypt.command.contains("--encrypt '/data/my calls.vcf.gz'"));
}

#[test]
fn verify_without_recorded_jobs_cannot_check() {
    let fixture = Fixture::new();
    let mut record = fixture.record_with_file("an_nojobs", Status::Encrypting, 10);
    record.working_directory = Some("wd_nojobs".to_string());

    let scheduler = CountingScheduler::default();
    let monitor = FixedDisk { free: 1_000_000 };
    let recipients = vec!["key-1".to_string()];
    let scratch = fixture.root.join("scratch");
    let pipeline = EncryptionPipeline::new(&scheduler, &monitor, &scratch, &recipients, 1000);

    let verdict = pipeline.verify(&record, &JobLedger::default());
    assert_matches!(verdict, EncryptionVerdict::CouldNotCheck(_));
}
