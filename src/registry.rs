use std::thread;
use std::time::Duration;

use chrono::Utc;
use reqwest::blocking::Client;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::config::BoxConfig;
use crate::domain::{ObjectType, Status, SubmissionRecord};
use crate::error::HelixError;
use crate::store::ObjectStore;

pub const STATUS_DRAFT: &str = "DRAFT";
pub const STATUS_VALIDATED: &str = "VALIDATED";
pub const STATUS_VALIDATED_WITH_ERRORS: &str = "VALIDATED_WITH_ERRORS";
pub const STATUS_SUBMITTED: &str = "SUBMITTED";

#[derive(Debug, Clone)]
pub struct SessionToken(pub String);

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteObject {
    pub id: String,
    pub alias: String,
    pub status: String,
}

#[derive(Debug, Clone)]
pub struct CreatedObject {
    pub id: String,
    pub status: String,
}

/// Status plus normalized messages from a VALIDATE or SUBMIT action.
#[derive(Debug, Clone)]
pub struct ActionResult {
    pub status: String,
    pub messages: Vec<String>,
    pub accession_id: Option<String>,
}

impl ActionResult {
    /// Joined message list, or the literal "None" when empty.
    pub fn normalized_messages(&self) -> String {
        if self.messages.is_empty() {
            "None".to_string()
        } else {
            self.messages.join("; ")
        }
    }
}

/// The registry REST protocol, one method per endpoint.
pub trait RegistryApi: Send + Sync {
    fn login(&self, username: &str, password: &str) -> Result<SessionToken, HelixError>;
    fn logout(&self, token: &SessionToken) -> Result<(), HelixError>;
    fn open_submission(&self, token: &SessionToken) -> Result<String, HelixError>;
    fn create_object(
        &self,
        token: &SessionToken,
        submission_id: &str,
        object_type: ObjectType,
        payload: &Value,
    ) -> Result<CreatedObject, HelixError>;
    fn validate_object(
        &self,
        token: &SessionToken,
        object_type: ObjectType,
        id: &str,
    ) -> Result<ActionResult, HelixError>;
    fn submit_object(
        &self,
        token: &SessionToken,
        object_type: ObjectType,
        id: &str,
    ) -> Result<ActionResult, HelixError>;
    fn delete_object(
        &self,
        token: &SessionToken,
        object_type: ObjectType,
        id: &str,
    ) -> Result<(), HelixError>;
    fn list_drafts(
        &self,
        token: &SessionToken,
        object_type: ObjectType,
        status: &str,
    ) -> Result<Vec<RemoteObject>, HelixError>;
}

#[derive(Clone)]
pub struct HttpRegistryApi {
    client: Client,
    base_url: String,
}

impl HttpRegistryApi {
    pub fn new(base_url: &str) -> Result<Self, HelixError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("helix-sub/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| HelixError::RegistryHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| HelixError::RegistryHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn bearer(token: &SessionToken) -> Result<HeaderValue, HelixError> {
        HeaderValue::from_str(&format!("Bearer {}", token.0))
            .map_err(|err| HelixError::RegistryHttp(err.to_string()))
    }

    fn send_with_retries<F>(&self, mut make_req: F) -> Result<reqwest::blocking::Response, HelixError>
    where
        F: FnMut() -> reqwest::blocking::RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            match make_req().send() {
                Ok(response) => {
                    let status = response.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        thread::sleep(Duration::from_millis(BASE_DELAY_MS * (attempt as u64 + 1)));
                        attempt += 1;
                        continue;
                    }
                    return Ok(response);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && (err.is_timeout() || err.is_connect()) {
                        thread::sleep(Duration::from_millis(BASE_DELAY_MS * (attempt as u64 + 1)));
                        attempt += 1;
                        continue;
                    }
                    return Err(HelixError::RegistryHttp(err.to_string()));
                }
            }
        }
    }

    fn check(response: reqwest::blocking::Response) -> Result<Value, HelixError> {
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "registry request failed".to_string());
            return Err(HelixError::RegistryStatus { status, message });
        }
        response
            .json::<Value>()
            .map_err(|err| HelixError::RegistryHttp(err.to_string()))
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn action_result(body: &Value) -> ActionResult {
    let status = body
        .get("status")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let messages = body
        .get("validationMessages")
        .or_else(|| body.get("messages"))
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    let accession_id = body
        .get("accessionId")
        .and_then(Value::as_str)
        .filter(|value| !value.is_empty())
        .map(str::to_string);
    ActionResult {
        status,
        messages,
        accession_id,
    }
}

impl RegistryApi for HttpRegistryApi {
    fn login(&self, username: &str, password: &str) -> Result<SessionToken, HelixError> {
        let url = format!("{}/login", self.base_url);
        let response = self.send_with_retries(|| {
            self.client
                .post(&url)
                .json(&json!({ "username": username, "password": password }))
        })?;
        let body = Self::check(response)?;
        body.get("token")
            .and_then(Value::as_str)
            .map(|token| SessionToken(token.to_string()))
            .ok_or_else(|| HelixError::RegistryHttp("login response had no token".to_string()))
    }

    fn logout(&self, token: &SessionToken) -> Result<(), HelixError> {
        let url = format!("{}/logout", self.base_url);
        let bearer = Self::bearer(token)?;
        let response = self
            .send_with_retries(|| self.client.delete(&url).header(AUTHORIZATION, bearer.clone()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().unwrap_or_default();
            return Err(HelixError::RegistryStatus { status, message });
        }
        Ok(())
    }

    fn open_submission(&self, token: &SessionToken) -> Result<String, HelixError> {
        let url = format!("{}/submissions", self.base_url);
        let bearer = Self::bearer(token)?;
        let response = self.send_with_retries(|| {
            self.client
                .post(&url)
                .header(AUTHORIZATION, bearer.clone())
                .json(&json!({}))
        })?;
        let body = Self::check(response)?;
        body.get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| HelixError::RegistryHttp("submission response had no id".to_string()))
    }

    fn create_object(
        &self,
        token: &SessionToken,
        submission_id: &str,
        object_type: ObjectType,
        payload: &Value,
    ) -> Result<CreatedObject, HelixError> {
        let url = format!(
            "{}/submissions/{submission_id}/{}",
            self.base_url,
            object_type.api_segment()
        );
        let bearer = Self::bearer(token)?;
        let response = self.send_with_retries(|| {
            self.client
                .post(&url)
                .header(AUTHORIZATION, bearer.clone())
                .json(payload)
        })?;
        let body = Self::check(response)?;
        let id = body
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| HelixError::RegistryHttp("create response had no id".to_string()))?;
        let status = body
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or(STATUS_DRAFT)
            .to_string();
        Ok(CreatedObject { id, status })
    }

    fn validate_object(
        &self,
        token: &SessionToken,
        object_type: ObjectType,
        id: &str,
    ) -> Result<ActionResult, HelixError> {
        let url = format!("{}/{}/{id}", self.base_url, object_type.api_segment());
        let bearer = Self::bearer(token)?;
        let response = self.send_with_retries(|| {
            self.client
                .put(&url)
                .query(&[("action", "VALIDATE")])
                .header(AUTHORIZATION, bearer.clone())
        })?;
        Ok(action_result(&Self::check(response)?))
    }

    fn submit_object(
        &self,
        token: &SessionToken,
        object_type: ObjectType,
        id: &str,
    ) -> Result<ActionResult, HelixError> {
        let url = format!("{}/{}/{id}", self.base_url, object_type.api_segment());
        let bearer = Self::bearer(token)?;
        let response = self.send_with_retries(|| {
            self.client
                .put(&url)
                .query(&[("action", "SUBMIT")])
                .header(AUTHORIZATION, bearer.clone())
        })?;
        Ok(action_result(&Self::check(response)?))
    }

    fn delete_object(
        &self,
        token: &SessionToken,
        object_type: ObjectType,
        id: &str,
    ) -> Result<(), HelixError> {
        let url = format!("{}/{}/{id}", self.base_url, object_type.api_segment());
        let bearer = Self::bearer(token)?;
        let response = self
            .send_with_retries(|| self.client.delete(&url).header(AUTHORIZATION, bearer.clone()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().unwrap_or_default();
            return Err(HelixError::RegistryStatus { status, message });
        }
        Ok(())
    }

    fn list_drafts(
        &self,
        token: &SessionToken,
        object_type: ObjectType,
        status: &str,
    ) -> Result<Vec<RemoteObject>, HelixError> {
        let url = format!("{}/{}", self.base_url, object_type.api_segment());
        let bearer = Self::bearer(token)?;
        let response = self.send_with_retries(|| {
            self.client
                .get(&url)
                .query(&[("status", status)])
                .header(AUTHORIZATION, bearer.clone())
        })?;
        let body = Self::check(response)?;
        serde_json::from_value(body).map_err(|err| HelixError::RegistryHttp(err.to_string()))
    }
}

/// Outcome of the registration protocol for one alias.
#[derive(Debug)]
pub enum RegisterOutcome {
    /// Confirmed terminal submission; carries the permanent accession.
    Registered { accession_id: String },
    /// Recorded error, local state held at submit for retry.
    Held { error: String },
}

pub struct RegistrationClient<'a> {
    api: &'a dyn RegistryApi,
    box_config: &'a BoxConfig,
}

impl<'a> RegistrationClient<'a> {
    pub fn new(api: &'a dyn RegistryApi, box_config: &'a BoxConfig) -> Self {
        Self { api, box_config }
    }

    fn login(&self) -> Result<SessionToken, HelixError> {
        self.api
            .login(&self.box_config.username, &self.box_config.password)
            .map_err(|err| HelixError::RegistryAuth {
                box_id: self.box_config.id.to_string(),
                message: err.to_string(),
            })
    }

    fn logout_quietly(&self, token: &SessionToken) {
        if let Err(err) = self.api.logout(token) {
            warn!(error = %err, "logout failed");
        }
    }

    /// Deletes remote drafts stuck in non-terminal validation states for
    /// aliases still locally at submit, so retries never pile up duplicate
    /// drafts. Runs before each registration cycle.
    pub fn cleanup_drafts(
        &self,
        store: &dyn ObjectStore,
        object_type: ObjectType,
    ) -> Result<usize, HelixError> {
        let token = self.login()?;
        let mut deleted = 0usize;
        let result = (|| {
            let local_submit: Vec<String> = store
                .list_eligible(object_type, &self.box_config.id, Status::Submit)?
                .into_iter()
                .map(|alias| alias.as_str().to_string())
                .collect();
            for status in [STATUS_VALIDATED_WITH_ERRORS, STATUS_VALIDATED, STATUS_DRAFT] {
                for draft in self.api.list_drafts(&token, object_type, status)? {
                    if local_submit.iter().any(|alias| alias == &draft.alias) {
                        self.api.delete_object(&token, object_type, &draft.id)?;
                        info!(alias = %draft.alias, status = %draft.status, "deleted stale draft");
                        deleted += 1;
                    }
                }
            }
            Ok(deleted)
        })();
        self.logout_quietly(&token);
        result
    }

    /// Runs the full protocol for one alias whose payload is already
    /// assembled. Intermediate remote statuses are persisted as they are
    /// observed, so a crash mid-protocol leaves visible state. The caller
    /// advances the lifecycle state on `Registered`.
    pub fn register_one(
        &self,
        store: &dyn ObjectStore,
        record: &mut SubmissionRecord,
    ) -> Result<RegisterOutcome, HelixError> {
        let payload = match &record.payload {
            Some(payload) if !crate::assemble::is_sentinel(payload) => payload.clone(),
            _ => {
                return Ok(RegisterOutcome::Held {
                    error: "no assembled payload".to_string(),
                });
            }
        };

        // Auth failure is batch-fatal; the caller aborts remaining aliases.
        let token = self.login()?;

        let outcome = self.drive_protocol(store, record, &token, &payload);
        self.logout_quietly(&token);
        outcome
    }

    fn drive_protocol(
        &self,
        store: &dyn ObjectStore,
        record: &mut SubmissionRecord,
        token: &SessionToken,
        payload: &Value,
    ) -> Result<RegisterOutcome, HelixError> {
        let submission_id = match self.api.open_submission(token) {
            Ok(id) => id,
            Err(err) => {
                return Ok(RegisterOutcome::Held {
                    error: format!("open submission failed: {err}"),
                });
            }
        };

        let created = match self
            .api
            .create_object(token, &submission_id, record.object_type, payload)
        {
            Ok(created) => created,
            Err(err) => {
                return Ok(RegisterOutcome::Held {
                    error: format!("create failed: {err}"),
                });
            }
        };
        record.submission_status = Some(created.status.clone());
        self.persist(store, record)?;

        let validation = match self.api.validate_object(token, record.object_type, &created.id) {
            Ok(result) => result,
            Err(err) => {
                return Ok(RegisterOutcome::Held {
                    error: format!("validate failed: {err}"),
                });
            }
        };
        record.submission_status = Some(validation.status.clone());
        self.persist(store, record)?;
        if validation.status != STATUS_VALIDATED {
            self.delete_quietly(token, record.object_type, &created.id);
            return Ok(RegisterOutcome::Held {
                error: format!(
                    "validation returned {}: {}",
                    validation.status,
                    validation.normalized_messages()
                ),
            });
        }

        let submission = match self.api.submit_object(token, record.object_type, &created.id) {
            Ok(result) => result,
            Err(err) => {
                self.delete_quietly(token, record.object_type, &created.id);
                return Ok(RegisterOutcome::Held {
                    error: format!("submit failed: {err}"),
                });
            }
        };
        record.submission_status = Some(submission.status.clone());
        self.persist(store, record)?;
        if submission.status != STATUS_SUBMITTED {
            self.delete_quietly(token, record.object_type, &created.id);
            return Ok(RegisterOutcome::Held {
                error: format!(
                    "submission returned {}: {}",
                    submission.status,
                    submission.normalized_messages()
                ),
            });
        }

        let Some(accession_id) = submission.accession_id else {
            return Ok(RegisterOutcome::Held {
                error: "submitted but no accession id in receipt".to_string(),
            });
        };
        record.submitted_at = Some(Utc::now());
        Ok(RegisterOutcome::Registered { accession_id })
    }

    /// Intermediate persistence keeps the lifecycle state at submit; only
    /// diagnostic fields move.
    fn persist(
        &self,
        store: &dyn ObjectStore,
        record: &mut SubmissionRecord,
    ) -> Result<(), HelixError> {
        let version = store.update(record, Status::Submit, record.version)?;
        record.version = version;
        Ok(())
    }

    fn delete_quietly(&self, token: &SessionToken, object_type: ObjectType, id: &str) {
        if let Err(err) = self.api.delete_object(token, object_type, id) {
            warn!(id, error = %err, "failed to delete remote draft");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalized_messages_joins_or_none() {
        let empty = ActionResult {
            status: STATUS_VALIDATED.to_string(),
            messages: vec![],
            accession_id: None,
        };
        assert_eq!(empty.normalized_messages(), "None");

        let some = ActionResult {
            status: STATUS_VALIDATED_WITH_ERRORS.to_string(),
            messages: vec!["bad study ref".to_string(), "missing md5".to_string()],
            accession_id: None,
        };
        assert_eq!(some.normalized_messages(), "bad study ref; missing md5");
    }

    #[test]
    fn action_result_parses_receipt_fields() {
        let body = json!({
            "status": "SUBMITTED",
            "accessionId": "EGAN0001",
            "messages": ["ok"],
        });
        let result = action_result(&body);
        assert_eq!(result.status, "SUBMITTED");
        assert_eq!(result.accession_id.as_deref(), Some("EGAN0001"));
        assert_eq!(result.messages, vec!["ok"]);
    }
}
