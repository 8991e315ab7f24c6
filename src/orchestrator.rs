use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::assemble::{Assembler, sentinel_payload};
use crate::config::ResolvedConfig;
use crate::domain::{Alias, BoxId, ObjectType, Status, SubmissionRecord};
use crate::encrypt::{EncryptionPipeline, EncryptionVerdict};
use crate::enums::EnumClient;
use crate::error::HelixError;
use crate::footprint::DiskMonitor;
use crate::registry::{RegisterOutcome, RegistrationClient, RegistryApi};
use crate::scheduler::{JobLedger, JobScheduler, ledger_path};
use crate::store::ObjectStore;
use crate::transfer::{TransferClient, TransferPipeline, UploadVerdict, job_ref_for_upload};

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Delete local artifacts after confirmed registration. Off unless the
    /// operator asks for it.
    pub cleanup: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub stage: String,
    pub advanced: Vec<String>,
    pub held: Vec<AliasDiagnostic>,
    pub rolled_back: Vec<AliasDiagnostic>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AliasDiagnostic {
    pub alias: String,
    pub error: String,
}

impl StageReport {
    fn new(stage: &str) -> Self {
        Self {
            stage: stage.to_string(),
            advanced: Vec::new(),
            held: Vec::new(),
            rolled_back: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub object_type: String,
    pub box_id: String,
    pub stages: Vec<StageReport>,
}

/// The driver. Sole advancer of persisted lifecycle state: pipelines and
/// clients compute verdicts, the orchestrator commits them, one alias at a
/// time. Every handler is safe to re-run; an alias already past a handler's
/// input state is simply not eligible for it.
pub struct Orchestrator {
    store: Arc<dyn ObjectStore>,
    scheduler: Arc<dyn JobScheduler>,
    monitor: Arc<dyn DiskMonitor>,
    transfer: Arc<dyn TransferClient>,
    enums: Arc<dyn EnumClient>,
    registry: Arc<dyn RegistryApi>,
    config: ResolvedConfig,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        scheduler: Arc<dyn JobScheduler>,
        monitor: Arc<dyn DiskMonitor>,
        transfer: Arc<dyn TransferClient>,
        enums: Arc<dyn EnumClient>,
        registry: Arc<dyn RegistryApi>,
        config: ResolvedConfig,
    ) -> Self {
        Self {
            store,
            scheduler,
            monitor,
            transfer,
            enums,
            registry,
            config,
        }
    }

    /// One full pass for one (object type, box): every handler once, in
    /// state order. Handler-level failures are logged and skipped; the next
    /// invocation retries.
    pub fn run_pipeline(
        &self,
        object_type: ObjectType,
        box_id: &BoxId,
        options: &RunOptions,
    ) -> Result<RunReport, HelixError> {
        self.config.box_config(box_id)?;
        self.store.create_table_if_absent(object_type, box_id)?;

        let mut stages = Vec::new();
        stages.push(self.check_fields(object_type, box_id));
        stages.push(self.resolve_references(object_type, box_id));
        stages.push(self.confirm_accessions(object_type, box_id));
        if object_type.is_file_bearing() {
            stages.push(self.queue_encryption(object_type, box_id));
            stages.push(self.launch_encryption(object_type, box_id));
            stages.push(self.check_encryption_batch(object_type, box_id));
            stages.push(self.launch_uploads(object_type, box_id));
            stages.push(self.check_uploads(object_type, box_id));
        }
        stages.push(self.assemble_payloads(object_type, box_id));
        stages.push(self.register(object_type, box_id, options));

        Ok(RunReport {
            object_type: object_type.to_string(),
            box_id: box_id.to_string(),
            stages,
        })
    }

    /// Listing failures degrade to an empty batch; the cycle must never die
    /// because one table is missing or malformed.
    fn eligible(&self, object_type: ObjectType, box_id: &BoxId, status: Status) -> Vec<Alias> {
        match self.store.list_eligible(object_type, box_id, status) {
            Ok(aliases) => aliases,
            Err(err) => {
                warn!(%object_type, %box_id, %status, error = %err, "listing failed, skipping batch");
                Vec::new()
            }
        }
    }

    fn advance(&self, record: &mut SubmissionRecord) -> Result<Status, HelixError> {
        let from = record.status;
        let to = from
            .next(record.object_type)
            .ok_or_else(|| HelixError::Store(format!("{} is terminal", record.alias)))?;
        record.status = to;
        record.error_messages = None;
        record.version = self.store.update(record, from, record.version)?;
        info!(alias = %record.alias, %from, %to, "advanced");
        Ok(to)
    }

    fn hold(&self, record: &mut SubmissionRecord, error: String) {
        record.error_messages = Some(error.clone());
        match self.store.update(record, record.status, record.version) {
            Ok(version) => record.version = version,
            Err(err) => warn!(alias = %record.alias, error = %err, "could not persist diagnostic"),
        }
        info!(alias = %record.alias, status = %record.status, error, "held");
    }

    fn roll_back(&self, record: &mut SubmissionRecord, error: String) {
        let from = record.status;
        let Some(to) = from.rollback() else {
            self.hold(record, error);
            return;
        };
        record.status = to;
        record.error_messages = Some(error.clone());
        match self.store.update(record, from, record.version) {
            Ok(version) => record.version = version,
            Err(err) => warn!(alias = %record.alias, error = %err, "could not persist rollback"),
        }
        info!(alias = %record.alias, %from, %to, error, "rolled back");
    }

    fn get(
        &self,
        object_type: ObjectType,
        box_id: &BoxId,
        alias: &Alias,
    ) -> Option<SubmissionRecord> {
        match self.store.get(object_type, box_id, alias) {
            Ok(record) => Some(record),
            Err(err) => {
                warn!(%alias, error = %err, "could not load record");
                None
            }
        }
    }

    /// start -> clean: required fields and tag validation.
    fn check_fields(&self, object_type: ObjectType, box_id: &BoxId) -> StageReport {
        let mut report = StageReport::new("check_fields");
        for alias in self.eligible(object_type, box_id, Status::Start) {
            let Some(mut record) = self.get(object_type, box_id, &alias) else {
                continue;
            };
            match crate::assemble::validate_record(&record) {
                Ok(()) => match self.advance(&mut record) {
                    Ok(_) => report.advanced.push(alias.to_string()),
                    Err(err) => warn!(%alias, error = %err, "advance failed"),
                },
                Err(err) => {
                    let message = err.to_string();
                    self.hold(&mut record, message.clone());
                    report.held.push(AliasDiagnostic {
                        alias: alias.to_string(),
                        error: message,
                    });
                }
            }
        }
        report
    }

    /// clean -> ready: dependent-object aliases replaced with accessions,
    /// all or nothing.
    fn resolve_references(&self, object_type: ObjectType, box_id: &BoxId) -> StageReport {
        let mut report = StageReport::new("resolve_references");
        for alias in self.eligible(object_type, box_id, Status::Clean) {
            let Some(mut record) = self.get(object_type, box_id, &alias) else {
                continue;
            };
            let mut resolved = Vec::with_capacity(record.references.len());
            let mut missing = Vec::new();
            for reference in &record.references {
                match self.store.find_accession(box_id, reference) {
                    Ok(Some(accession)) => resolved.push(accession),
                    Ok(None) => missing.push(reference.clone()),
                    Err(err) => {
                        warn!(%alias, error = %err, "accession lookup failed");
                        missing.push(reference.clone());
                    }
                }
            }
            if missing.is_empty() {
                record.references = resolved;
                match self.advance(&mut record) {
                    Ok(_) => report.advanced.push(alias.to_string()),
                    Err(err) => warn!(%alias, error = %err, "advance failed"),
                }
            } else {
                let message = HelixError::UnresolvedReferences {
                    alias: alias.to_string(),
                    missing: missing.join(", "),
                }
                .to_string();
                self.hold(&mut record, message.clone());
                report.held.push(AliasDiagnostic {
                    alias: alias.to_string(),
                    error: message,
                });
            }
        }
        report
    }

    /// ready -> valid: independent re-check that every accession the record
    /// carries is actually present in the store.
    fn confirm_accessions(&self, object_type: ObjectType, box_id: &BoxId) -> StageReport {
        let mut report = StageReport::new("confirm_accessions");
        for alias in self.eligible(object_type, box_id, Status::Ready) {
            let Some(mut record) = self.get(object_type, box_id, &alias) else {
                continue;
            };
            let mut unknown = Vec::new();
            for accession in &record.references {
                match self.store.accession_exists(box_id, accession) {
                    Ok(true) => {}
                    Ok(false) => unknown.push(accession.clone()),
                    Err(err) => {
                        warn!(%alias, error = %err, "accession check failed");
                        unknown.push(accession.clone());
                    }
                }
            }
            if unknown.is_empty() {
                match self.advance(&mut record) {
                    Ok(_) => report.advanced.push(alias.to_string()),
                    Err(err) => warn!(%alias, error = %err, "advance failed"),
                }
            } else {
                let message = format!("accessions not yet visible: {}", unknown.join(", "));
                self.hold(&mut record, message.clone());
                report.held.push(AliasDiagnostic {
                    alias: alias.to_string(),
                    error: message,
                });
            }
        }
        report
    }

    /// valid -> encrypt: confirmed file objects join the encryption queue.
    /// There is no work to do here; the queue state exists so admission can
    /// distinguish waiting aliases from ones still under validation.
    fn queue_encryption(&self, object_type: ObjectType, box_id: &BoxId) -> StageReport {
        let mut report = StageReport::new("queue_encryption");
        for alias in self.eligible(object_type, box_id, Status::Valid) {
            let Some(mut record) = self.get(object_type, box_id, &alias) else {
                continue;
            };
            match self.advance(&mut record) {
                Ok(_) => report.advanced.push(alias.to_string()),
                Err(err) => warn!(%alias, error = %err, "advance failed"),
            }
        }
        report
    }

    fn encryption_pipeline(&self) -> EncryptionPipeline<'_> {
        EncryptionPipeline::new(
            self.scheduler.as_ref(),
            self.monitor.as_ref(),
            &self.config.scratch_root,
            &self.config.encryption_recipients,
            self.config.quotas.reserved_floor_bytes,
        )
    }

    fn transfer_pipeline(&self) -> TransferPipeline {
        TransferPipeline::new(
            Arc::clone(&self.transfer),
            Arc::clone(&self.scheduler),
            self.config.scratch_root.clone(),
            self.config.quotas.staging_ceiling_bytes,
            self.config.quotas.max_concurrent_uploads,
            self.config.quotas.upload_workers,
        )
    }

    fn load_ledger(&self, box_id: &BoxId) -> JobLedger {
        let path = ledger_path(&self.config.scratch_root, box_id);
        match JobLedger::load(&path) {
            Ok(ledger) => ledger,
            Err(err) => {
                warn!(%box_id, error = %err, "job ledger unreadable, starting empty");
                JobLedger::default()
            }
        }
    }

    fn save_ledger(&self, box_id: &BoxId, ledger: &JobLedger) {
        let path = ledger_path(&self.config.scratch_root, box_id);
        if let Err(err) = ledger.save(&path) {
            warn!(%box_id, error = %err, "could not persist job ledger");
        }
    }

    /// encrypt -> encrypting: quota-bound admission, then chain launch.
    /// A launch failure rolls straight back so no half-submitted chain
    /// lingers.
    fn launch_encryption(&self, object_type: ObjectType, box_id: &BoxId) -> StageReport {
        let mut report = StageReport::new("launch_encryption");
        let pipeline = self.encryption_pipeline();
        let admitted = match pipeline.select_for_encryption(self.store.as_ref(), object_type, box_id)
        {
            Ok(admitted) => admitted,
            Err(err) => {
                warn!(%box_id, error = %err, "encryption admission failed");
                return report;
            }
        };

        let mut ledger = self.load_ledger(box_id);
        for alias in admitted {
            let Some(mut record) = self.get(object_type, box_id, &alias) else {
                continue;
            };
            record.ensure_working_directory();
            if let Err(err) = self.advance(&mut record) {
                warn!(%alias, error = %err, "advance failed");
                continue;
            }
            match pipeline.launch_jobs(&record, &mut ledger) {
                Ok(()) => report.advanced.push(alias.to_string()),
                Err(err) => {
                    ledger.clear_alias(&alias);
                    let message = err.to_string();
                    self.roll_back(&mut record, message.clone());
                    report.rolled_back.push(AliasDiagnostic {
                        alias: alias.to_string(),
                        error: message,
                    });
                }
            }
        }
        self.save_ledger(box_id, &ledger);
        report
    }

    /// encrypting -> upload | encrypt: artifact-driven verification for one
    /// alias, normally invoked by the chain's completion-checker job.
    pub fn check_encryption(
        &self,
        object_type: ObjectType,
        box_id: &BoxId,
        alias: &Alias,
    ) -> Result<Status, HelixError> {
        let mut record = self.store.get(object_type, box_id, alias)?;
        if record.status != Status::Encrypting {
            info!(%alias, status = %record.status, "not encrypting, nothing to check");
            return Ok(record.status);
        }

        let pipeline = self.encryption_pipeline();
        let mut ledger = self.load_ledger(box_id);

        // The ledger is only cleared on a terminal verdict; a chain that is
        // still running keeps its entries so the next check polls the same
        // jobs instead of resubmitting anything.
        let status = match pipeline.verify(&record, &ledger) {
            EncryptionVerdict::Complete(artifacts) => {
                ledger.clear_alias(alias);
                self.save_ledger(box_id, &ledger);
                record.merge_encrypted_artifacts(&artifacts);
                self.advance(&mut record)?
            }
            EncryptionVerdict::InFlight(detail) => {
                info!(%alias, detail, "encryption still in flight");
                record.status
            }
            EncryptionVerdict::Incomplete(detail) => {
                ledger.clear_alias(alias);
                self.save_ledger(box_id, &ledger);
                self.roll_back(
                    &mut record,
                    format!("encryption or checksum did not complete: {detail}"),
                );
                record.status
            }
            EncryptionVerdict::CouldNotCheck(detail) => {
                ledger.clear_alias(alias);
                self.save_ledger(box_id, &ledger);
                self.roll_back(&mut record, format!("could not check encryption: {detail}"));
                record.status
            }
        };
        Ok(status)
    }

    fn check_encryption_batch(&self, object_type: ObjectType, box_id: &BoxId) -> StageReport {
        let mut report = StageReport::new("check_encryption");
        for alias in self.eligible(object_type, box_id, Status::Encrypting) {
            match self.check_encryption(object_type, box_id, &alias) {
                Ok(Status::Upload) => report.advanced.push(alias.to_string()),
                // Still encrypting means the chain is in flight; not a
                // rollback, nothing to report.
                Ok(Status::Encrypting) => {}
                Ok(_) => {
                    if let Some(record) = self.get(object_type, box_id, &alias) {
                        report.rolled_back.push(AliasDiagnostic {
                            alias: alias.to_string(),
                            error: record.error_messages.unwrap_or_default(),
                        });
                    }
                }
                Err(err) => warn!(%alias, error = %err, "encryption check failed"),
            }
        }
        report
    }

    /// upload -> uploading: staging-footprint backpressure, in-flight cap,
    /// then pooled launch. Success means "upload launched" only.
    fn launch_uploads(&self, object_type: ObjectType, box_id: &BoxId) -> StageReport {
        let mut report = StageReport::new("launch_uploads");
        let Ok(box_config) = self.config.box_config(box_id) else {
            return report;
        };
        let pipeline = self.transfer_pipeline();
        let mut ledger = self.load_ledger(box_id);

        let admitted = match pipeline.admit(
            self.store.as_ref(),
            &ledger,
            object_type,
            box_id,
            &box_config.staging_path,
        ) {
            Ok(admitted) => admitted,
            Err(err) => {
                warn!(%box_id, error = %err, "upload admission failed");
                return report;
            }
        };

        let mut launched_records = Vec::new();
        for alias in admitted {
            let Some(mut record) = self.get(object_type, box_id, &alias) else {
                continue;
            };
            if let Err(err) = self.advance(&mut record) {
                warn!(%alias, error = %err, "advance failed");
                continue;
            }
            launched_records.push(record);
        }

        let results = pipeline.launch_uploads(launched_records.clone(), &box_config.staging_path);
        for result in results {
            let Some(mut record) = launched_records
                .iter()
                .find(|record| record.alias == result.alias)
                .cloned()
            else {
                continue;
            };
            match result.outcome {
                Ok(jobs) => {
                    for (id, _) in jobs {
                        ledger.record(id, job_ref_for_upload(&record));
                    }
                    report.advanced.push(result.alias.to_string());
                }
                Err(err) => {
                    let message = err.to_string();
                    self.roll_back(&mut record, message.clone());
                    report.rolled_back.push(AliasDiagnostic {
                        alias: result.alias.to_string(),
                        error: message,
                    });
                }
            }
        }
        self.save_ledger(box_id, &ledger);
        report
    }

    /// uploading -> uploaded | upload: one staging listing per path, plus
    /// per-job exit codes. Either signal alone is not enough.
    fn check_uploads(&self, object_type: ObjectType, box_id: &BoxId) -> StageReport {
        let mut report = StageReport::new("check_uploads");
        let Ok(box_config) = self.config.box_config(box_id) else {
            return report;
        };
        let aliases = self.eligible(object_type, box_id, Status::Uploading);
        if aliases.is_empty() {
            return report;
        }

        let pipeline = self.transfer_pipeline();
        let mut ledger = self.load_ledger(box_id);
        let mut paths = BTreeSet::new();
        paths.insert(box_config.staging_path.clone());
        let listings = crate::transfer::collect_listings(self.transfer.as_ref(), &paths);

        for alias in aliases {
            let Some(mut record) = self.get(object_type, box_id, &alias) else {
                continue;
            };
            let verdict = match listings.get(&box_config.staging_path) {
                Some(Ok(listing)) => pipeline.verify_upload(&record, &ledger, listing),
                Some(Err(err)) => UploadVerdict::CouldNotCheck(err.to_string()),
                None => UploadVerdict::CouldNotCheck("no staging listing".to_string()),
            };
            match verdict {
                UploadVerdict::Uploaded => {
                    ledger.clear_alias(&alias);
                    match self.advance(&mut record) {
                        Ok(_) => report.advanced.push(alias.to_string()),
                        Err(err) => warn!(%alias, error = %err, "advance failed"),
                    }
                }
                UploadVerdict::InFlight(detail) => {
                    // Jobs still running; keep the ledger entries and the
                    // alias in uploading for the next cycle.
                    info!(%alias, detail, "upload still in flight");
                }
                UploadVerdict::Failed(detail) | UploadVerdict::CouldNotCheck(detail) => {
                    ledger.clear_alias(&alias);
                    let message = format!("upload failed: {detail}");
                    self.roll_back(&mut record, message.clone());
                    report.rolled_back.push(AliasDiagnostic {
                        alias: alias.to_string(),
                        error: message,
                    });
                }
            }
        }
        self.save_ledger(box_id, &ledger);
        report
    }

    /// uploaded -> submit for file objects, valid -> submit for the rest:
    /// payload assembly with the alias-only sentinel on failure.
    fn assemble_payloads(&self, object_type: ObjectType, box_id: &BoxId) -> StageReport {
        let mut report = StageReport::new("assemble");
        let input_state = if object_type.is_file_bearing() {
            Status::Uploaded
        } else {
            Status::Valid
        };
        let assembler = Assembler::new(self.enums.as_ref());
        for alias in self.eligible(object_type, box_id, input_state) {
            let Some(mut record) = self.get(object_type, box_id, &alias) else {
                continue;
            };
            match assembler.assemble(&record) {
                Ok(payload) => {
                    record.payload = Some(payload);
                    match self.advance(&mut record) {
                        Ok(_) => report.advanced.push(alias.to_string()),
                        Err(err) => warn!(%alias, error = %err, "advance failed"),
                    }
                }
                Err(err) => {
                    record.payload = Some(sentinel_payload(alias.as_str()));
                    let message = err.to_string();
                    self.hold(&mut record, message.clone());
                    report.held.push(AliasDiagnostic {
                        alias: alias.to_string(),
                        error: message,
                    });
                }
            }
        }
        report
    }

    /// submit -> SUBMITTED: draft cleanup first, then the remote protocol
    /// per alias. Authentication failure aborts the rest of the batch; the
    /// untouched aliases retry next invocation.
    pub fn register(
        &self,
        object_type: ObjectType,
        box_id: &BoxId,
        options: &RunOptions,
    ) -> StageReport {
        let mut report = StageReport::new("register");
        let Ok(box_config) = self.config.box_config(box_id) else {
            return report;
        };
        let client = RegistrationClient::new(self.registry.as_ref(), box_config);

        match client.cleanup_drafts(self.store.as_ref(), object_type) {
            Ok(deleted) if deleted > 0 => info!(deleted, "stale drafts removed"),
            Ok(_) => {}
            Err(err) => {
                warn!(%box_id, error = %err, "draft cleanup failed, skipping registration");
                return report;
            }
        }

        for alias in self.eligible(object_type, box_id, Status::Submit) {
            let Some(mut record) = self.get(object_type, box_id, &alias) else {
                continue;
            };
            if record.accession_id.is_some() {
                // A reopened object: the registry already holds it under
                // this accession, only the files were resent. Close it out
                // without re-running the protocol.
                match self.advance(&mut record) {
                    Ok(_) => report.advanced.push(alias.to_string()),
                    Err(err) => warn!(%alias, error = %err, "advance failed"),
                }
                continue;
            }
            match client.register_one(self.store.as_ref(), &mut record) {
                Ok(RegisterOutcome::Registered { accession_id }) => {
                    record.accession_id = Some(accession_id);
                    match self.advance(&mut record) {
                        Ok(_) => {
                            report.advanced.push(alias.to_string());
                            if options.cleanup {
                                if let Err(err) = self.transfer_pipeline().cleanup_local(&record) {
                                    warn!(%alias, error = %err, "local cleanup failed");
                                }
                            }
                        }
                        Err(err) => warn!(%alias, error = %err, "advance failed"),
                    }
                }
                Ok(RegisterOutcome::Held { error }) => {
                    self.hold(&mut record, error.clone());
                    report.held.push(AliasDiagnostic {
                        alias: alias.to_string(),
                        error,
                    });
                }
                Err(err) => {
                    let fatal = matches!(err, HelixError::RegistryAuth { .. });
                    let message = err.to_string();
                    self.hold(&mut record, message.clone());
                    report.held.push(AliasDiagnostic {
                        alias: alias.to_string(),
                        error: message,
                    });
                    if fatal {
                        // No session token: nothing further can proceed.
                        warn!(%box_id, "authentication failed, aborting registration batch");
                        break;
                    }
                }
            }
        }
        report
    }

    /// uploading -> uploaded check for a single alias, for the CLI.
    pub fn check_upload(
        &self,
        object_type: ObjectType,
        box_id: &BoxId,
        alias: &Alias,
    ) -> Result<Status, HelixError> {
        let box_config = self.config.box_config(box_id)?;
        let mut record = self.store.get(object_type, box_id, alias)?;
        if record.status != Status::Uploading {
            info!(%alias, status = %record.status, "not uploading, nothing to check");
            return Ok(record.status);
        }
        let pipeline = self.transfer_pipeline();
        let mut ledger = self.load_ledger(box_id);
        let listing = self
            .transfer
            .list(&box_config.staging_path)?
            .into_iter()
            .map(|entry| entry.name)
            .collect();
        let status = match pipeline.verify_upload(&record, &ledger, &listing) {
            UploadVerdict::Uploaded => {
                ledger.clear_alias(alias);
                self.save_ledger(box_id, &ledger);
                self.advance(&mut record)?
            }
            UploadVerdict::InFlight(detail) => {
                info!(%alias, detail, "upload still in flight");
                record.status
            }
            UploadVerdict::Failed(detail) | UploadVerdict::CouldNotCheck(detail) => {
                ledger.clear_alias(alias);
                self.save_ledger(box_id, &ledger);
                self.roll_back(&mut record, format!("upload failed: {detail}"));
                record.status
            }
        };
        Ok(status)
    }

    /// Operator re-entry: a terminal object whose archived data needs a
    /// fresh upload goes back to encrypt; the normal pipeline resumes from
    /// there. The accession is kept, it is already registered.
    pub fn reopen(
        &self,
        object_type: ObjectType,
        box_id: &BoxId,
        alias: &Alias,
    ) -> Result<(), HelixError> {
        if !object_type.is_file_bearing() {
            return Err(HelixError::InvalidObjectType(format!(
                "{object_type} has no files to re-upload"
            )));
        }
        let mut record = self.store.get(object_type, box_id, alias)?;
        if record.status != Status::Submitted {
            return Err(HelixError::InvalidStatus(format!(
                "{alias} is {}, only SUBMITTED objects can be reopened",
                record.status
            )));
        }
        record.status = Status::Encrypt;
        record.error_messages = None;
        record.version = self.store.update(&record, Status::Submitted, record.version)?;
        info!(%alias, "reopened for re-upload");
        Ok(())
    }
}
