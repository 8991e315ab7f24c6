use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::process::Command;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::domain::{Alias, BoxId};
use crate::error::HelixError;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(String);

impl JobId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Terminal set for an external job. `Unknown` covers pending, running and
/// unlocatable jobs alike and is never treated as success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded,
    Failed(i32),
    Unknown,
}

#[derive(Debug, Clone)]
pub struct JobSpec {
    pub name: String,
    pub command: String,
    pub depends_on: Option<JobId>,
}

pub trait JobScheduler: Send + Sync {
    /// Fire-and-forget launch; a non-zero launch code surfaces as an error.
    fn submit(&self, spec: &JobSpec) -> Result<JobId, HelixError>;

    /// Polls accounting data once; no waiting.
    fn poll(&self, id: &JobId) -> Result<JobOutcome, HelixError>;
}

#[derive(Clone)]
pub struct SystemScheduler {
    submit_binary: Option<PathBuf>,
    accounting_binary: Option<PathBuf>,
}

impl SystemScheduler {
    pub fn new(submit_binary: &str, accounting_binary: &str) -> Self {
        Self {
            submit_binary: find_in_path(submit_binary),
            accounting_binary: find_in_path(accounting_binary),
        }
    }

    fn require_submit(&self) -> Result<&PathBuf, HelixError> {
        self.submit_binary
            .as_ref()
            .ok_or_else(|| HelixError::Scheduler("submit binary not found in PATH".to_string()))
    }

    fn require_accounting(&self) -> Result<&PathBuf, HelixError> {
        self.accounting_binary
            .as_ref()
            .ok_or_else(|| HelixError::JobLookup("accounting binary not found in PATH".to_string()))
    }
}

impl JobScheduler for SystemScheduler {
    fn submit(&self, spec: &JobSpec) -> Result<JobId, HelixError> {
        let binary = self.require_submit()?;
        let mut cmd = Command::new(binary);
        cmd.arg("--parsable").arg("--job-name").arg(&spec.name);
        if let Some(dep) = &spec.depends_on {
            cmd.arg(format!("--dependency=afterok:{dep}"));
        }
        cmd.arg("--wrap").arg(&spec.command);

        let output = cmd.output().map_err(|err| HelixError::JobLaunch {
            job: spec.name.clone(),
            message: err.to_string(),
        })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let message = if stderr.is_empty() {
                format!("launch exited with {}", output.status)
            } else {
                stderr
            };
            return Err(HelixError::JobLaunch {
                job: spec.name.clone(),
                message,
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        // --parsable prints `jobid` or `jobid;cluster`.
        let id = stdout.split(';').next().unwrap_or_default().to_string();
        if id.is_empty() {
            return Err(HelixError::JobLaunch {
                job: spec.name.clone(),
                message: "scheduler did not report a job id".to_string(),
            });
        }
        Ok(JobId(id))
    }

    fn poll(&self, id: &JobId) -> Result<JobOutcome, HelixError> {
        let binary = self.require_accounting()?;
        let output = Command::new(binary)
            .arg("-j")
            .arg(id.as_str())
            .arg("--format=State,ExitCode")
            .arg("--noheader")
            .arg("--parsable2")
            .output()
            .map_err(|err| HelixError::JobLookup(err.to_string()))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(HelixError::JobLookup(stderr));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(parse_accounting_line(stdout.lines().next().unwrap_or("")))
    }
}

pub fn parse_accounting_line(line: &str) -> JobOutcome {
    let mut fields = line.trim().split('|');
    let state = fields.next().unwrap_or("").trim();
    let exit = fields.next().unwrap_or("").trim();
    match state {
        "COMPLETED" => {
            let code = exit
                .split(':')
                .next()
                .and_then(|value| value.parse::<i32>().ok())
                .unwrap_or(0);
            if code == 0 {
                JobOutcome::Succeeded
            } else {
                JobOutcome::Failed(code)
            }
        }
        "FAILED" | "CANCELLED" | "TIMEOUT" | "OUT_OF_MEMORY" | "NODE_FAIL" => {
            let code = exit
                .split(':')
                .next()
                .and_then(|value| value.parse::<i32>().ok())
                .unwrap_or(1);
            JobOutcome::Failed(if code == 0 { 1 } else { code })
        }
        _ => JobOutcome::Unknown,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStep {
    ChecksumOriginal,
    Encrypt,
    ChecksumEncrypted,
    EncryptionChecker,
    Upload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRef {
    pub alias: Alias,
    pub box_id: BoxId,
    pub step: JobStep,
    #[serde(default)]
    pub source_path: Option<String>,
}

/// Explicit job-id to (alias, file, step) map. Job names never need to be
/// parsed back apart, so aliases carry no reserved-delimiter burden at
/// lookup time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobLedger {
    entries: BTreeMap<String, JobRef>,
}

impl JobLedger {
    pub fn load(path: &Utf8Path) -> Result<Self, HelixError> {
        if !path.as_std_path().exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|err| HelixError::Filesystem(format!("read ledger {path}: {err}")))?;
        serde_json::from_str(&content)
            .map_err(|err| HelixError::Filesystem(format!("decode ledger {path}: {err}")))
    }

    pub fn save(&self, path: &Utf8Path) -> Result<(), HelixError> {
        let parent = path
            .parent()
            .ok_or_else(|| HelixError::Filesystem(format!("invalid ledger path {path}")))?;
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| HelixError::Filesystem(err.to_string()))?;
        let content =
            serde_json::to_vec_pretty(self).map_err(|err| HelixError::Filesystem(err.to_string()))?;
        let mut temp = tempfile::Builder::new()
            .prefix("helix-ledger")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| HelixError::Filesystem(err.to_string()))?;
        temp.write_all(&content)
            .map_err(|err| HelixError::Filesystem(err.to_string()))?;
        temp.persist(path.as_std_path())
            .map_err(|err| HelixError::Filesystem(err.to_string()))?;
        Ok(())
    }

    pub fn record(&mut self, id: JobId, reference: JobRef) {
        self.entries.insert(id.0, reference);
    }

    pub fn jobs_for_alias(&self, alias: &Alias) -> Vec<(JobId, &JobRef)> {
        self.entries
            .iter()
            .filter(|(_, reference)| &reference.alias == alias)
            .map(|(id, reference)| (JobId(id.clone()), reference))
            .collect()
    }

    pub fn clear_alias(&mut self, alias: &Alias) {
        self.entries.retain(|_, reference| &reference.alias != alias);
    }

    pub fn count_step(&self, box_id: &BoxId, step: JobStep) -> usize {
        self.entries
            .values()
            .filter(|reference| &reference.box_id == box_id && reference.step == step)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub fn ledger_path(scratch_root: &Utf8Path, box_id: &BoxId) -> Utf8PathBuf {
    scratch_root
        .join("jobs")
        .join(format!("{}.json", box_id.as_str()))
}

fn find_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for path in std::env::split_paths(&path_var) {
        let candidate = path.join(name);
        if candidate.exists() {
            return Some(candidate);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accounting_completed_zero_exit() {
        assert_eq!(parse_accounting_line("COMPLETED|0:0"), JobOutcome::Succeeded);
    }

    #[test]
    fn accounting_completed_nonzero_exit_is_failure() {
        assert_eq!(parse_accounting_line("COMPLETED|2:0"), JobOutcome::Failed(2));
    }

    #[test]
    fn accounting_failed_states() {
        assert_eq!(parse_accounting_line("FAILED|1:0"), JobOutcome::Failed(1));
        assert_eq!(parse_accounting_line("CANCELLED|0:0"), JobOutcome::Failed(1));
        assert_eq!(parse_accounting_line("TIMEOUT|0:15"), JobOutcome::Failed(1));
    }

    #[test]
    fn accounting_pending_is_unknown() {
        assert_eq!(parse_accounting_line("RUNNING|0:0"), JobOutcome::Unknown);
        assert_eq!(parse_accounting_line("PENDING|0:0"), JobOutcome::Unknown);
        assert_eq!(parse_accounting_line(""), JobOutcome::Unknown);
    }

    #[test]
    fn ledger_tracks_and_clears_aliases() {
        let mut ledger = JobLedger::default();
        let alias: Alias = "an_001".parse().unwrap();
        let box_id: BoxId = "box-001".parse().unwrap();
        ledger.record(
            JobId::new("101"),
            JobRef {
                alias: alias.clone(),
                box_id: box_id.clone(),
                step: JobStep::Encrypt,
                source_path: Some("/data/a.vcf.gz".to_string()),
            },
        );
        ledger.record(
            JobId::new("102"),
            JobRef {
                alias: alias.clone(),
                box_id: box_id.clone(),
                step: JobStep::Upload,
                source_path: None,
            },
        );

        assert_eq!(ledger.jobs_for_alias(&alias).len(), 2);
        assert_eq!(ledger.count_step(&box_id, JobStep::Upload), 1);

        ledger.clear_alias(&alias);
        assert!(ledger.is_empty());
    }

    #[test]
    fn ledger_roundtrip() {
        let temp = tempfile::tempdir().unwrap();
        let path =
            camino::Utf8PathBuf::from_path_buf(temp.path().join("jobs").join("box.json")).unwrap();
        let mut ledger = JobLedger::default();
        ledger.record(
            JobId::new("7"),
            JobRef {
                alias: "an_x".parse().unwrap(),
                box_id: "box-001".parse().unwrap(),
                step: JobStep::ChecksumOriginal,
                source_path: None,
            },
        );
        ledger.save(&path).unwrap();
        let loaded = JobLedger::load(&path).unwrap();
        assert_eq!(loaded.jobs_for_alias(&"an_x".parse().unwrap()).len(), 1);
    }
}
