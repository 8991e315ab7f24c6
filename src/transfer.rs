use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::process::Command;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use crossbeam_channel::unbounded;
use threadpool::ThreadPool;
use tracing::{debug, info, warn};

use crate::domain::{Alias, BoxId, ObjectType, Status, SubmissionRecord};
use crate::error::HelixError;
use crate::scheduler::{JobId, JobLedger, JobRef, JobScheduler, JobSpec, JobStep, JobOutcome};
use crate::store::ObjectStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub name: String,
    pub size: u64,
}

/// Remote staging-area operations. Only the success/failure contract
/// matters here; the wire protocol lives in the configured transfer tool.
pub trait TransferClient: Send + Sync {
    fn mkdirp(&self, remote_path: &Utf8Path) -> Result<(), HelixError>;
    fn put(&self, local_files: &[Utf8PathBuf], remote_path: &Utf8Path) -> Result<(), HelixError>;
    fn list(&self, remote_path: &Utf8Path) -> Result<Vec<RemoteEntry>, HelixError>;
}

/// Shells out to the configured transfer binary; with no remote host the
/// staging area is treated as a mounted path.
pub struct SystemTransferClient {
    binary: String,
    remote_host: Option<String>,
}

impl SystemTransferClient {
    pub fn new(binary: &str, remote_host: Option<String>) -> Self {
        Self {
            binary: binary.to_string(),
            remote_host,
        }
    }

    fn run(&self, program: &str, args: &[String]) -> Result<String, HelixError> {
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|err| HelixError::Transfer(format!("{program}: {err}")))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let message = if stderr.is_empty() {
                format!("{program} exited with {}", output.status)
            } else {
                stderr
            };
            return Err(HelixError::Transfer(message));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

impl TransferClient for SystemTransferClient {
    fn mkdirp(&self, remote_path: &Utf8Path) -> Result<(), HelixError> {
        let result = match &self.remote_host {
            Some(host) => self
                .run(
                    "ssh",
                    &[host.clone(), format!("mkdir -p {remote_path}")],
                )
                .map(|_| ()),
            None => fs::create_dir_all(remote_path.as_std_path())
                .map_err(|err| HelixError::Transfer(err.to_string())),
        };
        // A pre-existing directory is fine.
        match result {
            Err(HelixError::Transfer(message)) if message.contains("File exists") => Ok(()),
            other => other,
        }
    }

    fn put(&self, local_files: &[Utf8PathBuf], remote_path: &Utf8Path) -> Result<(), HelixError> {
        let mut args: Vec<String> = local_files.iter().map(|path| path.to_string()).collect();
        let destination = match &self.remote_host {
            Some(host) => format!("{host}:{remote_path}"),
            None => remote_path.to_string(),
        };
        args.push(destination);
        self.run(&self.binary, &args).map(|_| ())
    }

    fn list(&self, remote_path: &Utf8Path) -> Result<Vec<RemoteEntry>, HelixError> {
        match &self.remote_host {
            Some(host) => {
                let stdout = self.run(
                    "ssh",
                    &[host.clone(), format!("ls -l --block-size=1 {remote_path}")],
                )?;
                Ok(parse_listing(&stdout))
            }
            None => {
                let mut entries = Vec::new();
                let dir = fs::read_dir(remote_path.as_std_path())
                    .map_err(|err| HelixError::Transfer(err.to_string()))?;
                for entry in dir {
                    let entry = entry.map_err(|err| HelixError::Transfer(err.to_string()))?;
                    let metadata = entry
                        .metadata()
                        .map_err(|err| HelixError::Transfer(err.to_string()))?;
                    if metadata.is_file() {
                        entries.push(RemoteEntry {
                            name: entry.file_name().to_string_lossy().to_string(),
                            size: metadata.len(),
                        });
                    }
                }
                Ok(entries)
            }
        }
    }
}

fn parse_listing(stdout: &str) -> Vec<RemoteEntry> {
    let mut entries = Vec::new();
    for line in stdout.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        // `ls -l` rows: mode links owner group size date... name
        if fields.len() < 9 || !fields[0].starts_with('-') {
            continue;
        }
        let Ok(size) = fields[4].parse::<u64>() else {
            continue;
        };
        entries.push(RemoteEntry {
            name: fields[8..].join(" "),
            size,
        });
    }
    entries
}

#[derive(Debug)]
pub enum UploadVerdict {
    Uploaded,
    /// At least one upload job is still queued or running.
    InFlight(String),
    Failed(String),
    CouldNotCheck(String),
}

/// Result of one worker's launch attempt for one alias.
pub struct LaunchResult {
    pub alias: Alias,
    pub outcome: Result<Vec<(JobId, String)>, HelixError>,
}

pub struct TransferPipeline {
    client: Arc<dyn TransferClient>,
    scheduler: Arc<dyn JobScheduler>,
    scratch_root: Utf8PathBuf,
    staging_ceiling: u64,
    max_concurrent: usize,
    workers: usize,
}

impl TransferPipeline {
    pub fn new(
        client: Arc<dyn TransferClient>,
        scheduler: Arc<dyn JobScheduler>,
        scratch_root: Utf8PathBuf,
        staging_ceiling: u64,
        max_concurrent: usize,
        workers: usize,
    ) -> Self {
        Self {
            client,
            scheduler,
            scratch_root,
            staging_ceiling,
            max_concurrent,
            workers,
        }
    }

    /// Bytes in the staging area not yet claimed by any accessioned record.
    pub fn unregistered_footprint(
        &self,
        store: &dyn ObjectStore,
        box_id: &BoxId,
        staging_path: &Utf8Path,
    ) -> Result<u64, HelixError> {
        let listing = self.client.list(staging_path)?;

        let mut registered = BTreeSet::new();
        for object_type in [ObjectType::Run, ObjectType::Analysis] {
            for alias in store.list_eligible(object_type, box_id, Status::Submitted)? {
                let record = store.get(object_type, box_id, &alias)?;
                if record.accession_id.is_none() {
                    continue;
                }
                for entry in record.files.values() {
                    if let Some(name) = &entry.encrypted_name {
                        registered.insert(name.clone());
                        registered.insert(format!("{name}.md5"));
                        registered.insert(format!("{}.md5", entry.destination_name));
                    }
                }
            }
        }

        Ok(listing
            .iter()
            .filter(|entry| !registered.contains(&entry.name))
            .map(|entry| entry.size)
            .sum())
    }

    /// Global backpressure plus the in-flight job cap. Returns the aliases
    /// to launch this cycle, possibly none.
    pub fn admit(
        &self,
        store: &dyn ObjectStore,
        job_ledger: &JobLedger,
        object_type: ObjectType,
        box_id: &BoxId,
        staging_path: &Utf8Path,
    ) -> Result<Vec<Alias>, HelixError> {
        let footprint = self.unregistered_footprint(store, box_id, staging_path)?;
        if footprint > self.staging_ceiling {
            debug!(
                footprint,
                ceiling = self.staging_ceiling,
                "staging footprint over ceiling, no uploads this cycle"
            );
            return Ok(Vec::new());
        }

        let running = job_ledger.count_step(box_id, JobStep::Upload);
        let slots = self.max_concurrent.saturating_sub(running);
        if slots == 0 {
            debug!(running, "upload job cap reached");
            return Ok(Vec::new());
        }

        let mut eligible = store.list_eligible(object_type, box_id, Status::Upload)?;
        eligible.truncate(slots);
        Ok(eligible)
    }

    /// Launches uploads for the admitted aliases on a fixed-width pool.
    /// Workers share nothing mutable; results are funneled back over a
    /// channel so the caller can commit each alias's state independently.
    /// Success here means "upload launched", never "uploaded".
    pub fn launch_uploads(
        &self,
        records: Vec<SubmissionRecord>,
        staging_path: &Utf8Path,
    ) -> Vec<LaunchResult> {
        let pool = ThreadPool::new(self.workers.max(1));
        let (sender, receiver) = unbounded();
        let expected = records.len();

        for record in records {
            let sender = sender.clone();
            let client = Arc::clone(&self.client);
            let scheduler = Arc::clone(&self.scheduler);
            let scratch_root = self.scratch_root.clone();
            let staging = staging_path.to_owned();
            pool.execute(move || {
                let outcome = launch_one(
                    &record,
                    client.as_ref(),
                    scheduler.as_ref(),
                    &scratch_root,
                    &staging,
                );
                let _ = sender.send(LaunchResult {
                    alias: record.alias.clone(),
                    outcome,
                });
            });
        }
        drop(sender);

        let mut results = Vec::with_capacity(expected);
        while let Ok(result) = receiver.recv() {
            results.push(result);
        }
        pool.join();
        results
    }

    /// Verifies one alias: every upload job exited zero AND every expected
    /// artifact name appears in the staging listing. The listing is taken
    /// once per distinct staging path by the caller and passed in.
    pub fn verify_upload(
        &self,
        record: &SubmissionRecord,
        job_ledger: &JobLedger,
        listing: &BTreeSet<String>,
    ) -> UploadVerdict {
        let upload_jobs: Vec<_> = job_ledger
            .jobs_for_alias(&record.alias)
            .into_iter()
            .filter(|(_, reference)| reference.step == JobStep::Upload)
            .collect();
        if upload_jobs.is_empty() {
            return UploadVerdict::CouldNotCheck("no upload jobs recorded for alias".to_string());
        }

        for (id, _) in &upload_jobs {
            match self.scheduler.poll(id) {
                Ok(JobOutcome::Succeeded) => {}
                Ok(JobOutcome::Failed(code)) => {
                    return UploadVerdict::Failed(format!("upload job {id} exited with {code}"));
                }
                Ok(JobOutcome::Unknown) => {
                    return UploadVerdict::InFlight(format!("upload job {id} has not finished"));
                }
                Err(err) => return UploadVerdict::CouldNotCheck(err.to_string()),
            }
        }

        for entry in record.files.values() {
            let Some(encrypted_name) = &entry.encrypted_name else {
                return UploadVerdict::Failed(format!(
                    "{} has no encrypted artifact recorded",
                    entry.destination_name
                ));
            };
            for expected in [
                encrypted_name.clone(),
                format!("{encrypted_name}.md5"),
                format!("{}.md5", entry.destination_name),
            ] {
                if !listing.contains(&expected) {
                    return UploadVerdict::Failed(format!("{expected} missing from staging area"));
                }
            }
        }

        UploadVerdict::Uploaded
    }

    /// Deletes local artifacts after confirmed registration. Only ever
    /// touches files under the alias's own working directory.
    pub fn cleanup_local(&self, record: &SubmissionRecord) -> Result<(), HelixError> {
        let Some(workdir) = record.working_directory.as_deref() else {
            return Ok(());
        };
        let workdir = self.scratch_root.join(workdir);
        if !workdir.starts_with(&self.scratch_root) {
            return Err(HelixError::CleanupOutsideWorkdir(workdir));
        }
        if workdir.as_std_path().exists() {
            info!(alias = %record.alias, dir = %workdir, "removing local artifacts");
            fs::remove_dir_all(workdir.as_std_path())
                .map_err(|err| HelixError::Filesystem(err.to_string()))?;
        }
        Ok(())
    }
}

/// Per-alias launch work executed on the pool: destination directory,
/// artifact presence check, then one transfer job per file carrying all
/// three artifacts together. The job re-enters the CLI (`put-artifacts`),
/// which routes through the transfer client.
fn launch_one(
    record: &SubmissionRecord,
    client: &dyn TransferClient,
    scheduler: &dyn JobScheduler,
    scratch_root: &Utf8Path,
    staging_path: &Utf8Path,
) -> Result<Vec<(JobId, String)>, HelixError> {
    let workdir = record
        .working_directory
        .as_deref()
        .map(|dir| scratch_root.join(dir))
        .ok_or_else(|| HelixError::Filesystem("record has no working directory".to_string()))?;

    // Best effort; a pre-existing directory must not fail the alias.
    if let Err(err) = client.mkdirp(staging_path) {
        warn!(alias = %record.alias, error = %err, "mkdirp failed, continuing");
    }

    // All artifacts must be present before anything is sent; a partial
    // upload is worse than a deferred one.
    let mut batches = Vec::new();
    for entry in record.files.values() {
        let encrypted_name = entry.encrypted_name.as_deref().ok_or_else(|| {
            HelixError::MissingArtifact {
                alias: record.alias.to_string(),
                artifact: format!("{} (no encrypted name)", entry.destination_name),
            }
        })?;
        let files = [
            workdir.join(encrypted_name),
            workdir.join(format!("{encrypted_name}.md5")),
            workdir.join(format!("{}.md5", entry.destination_name)),
        ];
        for file in &files {
            if !file.as_std_path().exists() {
                return Err(HelixError::MissingArtifact {
                    alias: record.alias.to_string(),
                    artifact: file.to_string(),
                });
            }
        }
        batches.push((entry.destination_name.clone(), files));
    }

    let mut launched = Vec::new();
    for (index, (destination_name, files)) in batches.iter().enumerate() {
        let file_args = files
            .iter()
            .map(|file| format!("'{file}'"))
            .collect::<Vec<_>>()
            .join(" ");
        let id = scheduler.submit(&JobSpec {
            name: format!("up.{}.{index}", record.alias),
            command: format!(
                "helix-sub put-artifacts --box {} {file_args}",
                record.box_id
            ),
            depends_on: None,
        })?;
        launched.push((id, destination_name.clone()));
    }
    info!(alias = %record.alias, jobs = launched.len(), "uploads launched");
    Ok(launched)
}

pub fn job_ref_for_upload(record: &SubmissionRecord) -> JobRef {
    JobRef {
        alias: record.alias.clone(),
        box_id: record.box_id.clone(),
        step: JobStep::Upload,
        source_path: None,
    }
}

/// One listing per distinct staging path, shared across all aliases that
/// stage there.
pub fn collect_listings(
    client: &dyn TransferClient,
    staging_paths: &BTreeSet<Utf8PathBuf>,
) -> BTreeMap<Utf8PathBuf, Result<BTreeSet<String>, HelixError>> {
    let mut listings = BTreeMap::new();
    for path in staging_paths {
        let listing = client
            .list(path)
            .map(|entries| entries.into_iter().map(|entry| entry.name).collect());
        listings.insert(path.clone(), listing);
    }
    listings
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listing_parser_skips_directories_and_noise() {
        let stdout = "\
total 16
drwxr-xr-x 2 ega ega 4096 Jan  5 10:00 archive
-rw-r--r-- 1 ega ega 1048576 Jan  5 10:00 a.vcf.gz.gpg
-rw-r--r-- 1 ega ega 64 Jan  5 10:00 a.vcf.gz.gpg.md5
garbage line
";
        let entries = parse_listing(stdout);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "a.vcf.gz.gpg");
        assert_eq!(entries[0].size, 1048576);
    }
}
