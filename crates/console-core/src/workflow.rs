//! Sign and verify workflows.
//!
//! Both workflows share one state machine and differ only in the key usage
//! they filter on and the operation they submit:
//!
//! ```text
//! NoSlotSelected -> KeysLoading -> KeysReady -> KeySelected -> Submitted -> ResultAvailable
//! ```
//!
//! Network results are applied in a separate step from the request itself.
//! Every key fetch and every submission is tagged with the selection
//! generation it was issued for; a result whose tag no longer matches the
//! current selection is dropped, so a slow response for a slot the operator
//! already left can never overwrite the newer state.

use std::sync::Arc;

use base64::{
    alphabet,
    engine::{general_purpose::GeneralPurpose, DecodePaddingMode, GeneralPurposeConfig},
    Engine as _,
};
use tracing::{debug, warn};

use crate::{
    api::HsmApi, ConsoleError, ConsoleResult, Key, SignRequest, SignatureAlgorithm, VerifyRequest,
};

/// Standard alphabet, padding optional on input.
const SIGNATURE_B64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

pub const SIGN_FAILED: &str = "Signing failed";
pub const VERIFICATION_SUCCESSFUL: &str = "Verification Successful";
pub const VERIFICATION_FAILED: &str = "Verification Failed";
pub const VERIFICATION_ERROR: &str = "Verification could not be completed";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkflowMode {
    Sign,
    Verify,
}

impl WorkflowMode {
    /// Substring a key's usage attribute must contain to be offered.
    pub fn usage_verb(&self) -> &'static str {
        match self {
            WorkflowMode::Sign => "sign",
            WorkflowMode::Verify => "verify",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowState {
    NoSlotSelected,
    KeysLoading,
    KeysReady,
    KeySelected,
    Submitted,
    ResultAvailable,
}

/// Identifies the selection a key fetch was issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyFetchTicket {
    generation: u64,
    slot_decimal: u64,
}

impl KeyFetchTicket {
    pub fn slot_decimal(&self) -> u64 {
        self.slot_decimal
    }
}

/// Completed key fetch, not yet applied to the workflow.
#[derive(Debug, Clone)]
pub struct KeyFetch {
    ticket: KeyFetchTicket,
    keys: Vec<Key>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationOutcome {
    Signed(String),
    SignFailed(String),
    VerificationSucceeded,
    VerificationFailed,
    VerificationError(String),
}

impl OperationOutcome {
    /// Text shown to the operator for this outcome.
    pub fn display_text(&self) -> &str {
        match self {
            OperationOutcome::Signed(signature) => signature,
            OperationOutcome::SignFailed(_) => SIGN_FAILED,
            OperationOutcome::VerificationSucceeded => VERIFICATION_SUCCESSFUL,
            OperationOutcome::VerificationFailed => VERIFICATION_FAILED,
            OperationOutcome::VerificationError(_) => VERIFICATION_ERROR,
        }
    }

    /// Error reported by the service or transport, for failed operations.
    pub fn failure_detail(&self) -> Option<&str> {
        match self {
            OperationOutcome::SignFailed(detail) | OperationOutcome::VerificationError(detail) => {
                Some(detail.as_str())
            }
            _ => None,
        }
    }

    pub fn is_failure(&self) -> bool {
        self.failure_detail().is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum OperationRequest {
    Sign(SignRequest),
    Verify(VerifyRequest),
}

/// A submission that passed the guard and is ready to be sent.
#[derive(Debug, Clone)]
pub struct PendingOperation {
    generation: u64,
    key_label: String,
    request: OperationRequest,
}

impl PendingOperation {
    pub fn key_label(&self) -> &str {
        &self.key_label
    }
}

/// Result of a sent operation, not yet applied to the workflow.
#[derive(Debug, Clone)]
pub struct CompletedOperation {
    generation: u64,
    key_label: String,
    outcome: OperationOutcome,
}

impl CompletedOperation {
    pub fn outcome(&self) -> &OperationOutcome {
        &self.outcome
    }
}

pub struct CryptoWorkflow {
    api: Arc<dyn HsmApi>,
    mode: WorkflowMode,
    generation: u64,
    selected_slot: Option<u64>,
    keys_loading: bool,
    keys: Vec<Key>,
    selected_key: Option<String>,
    algorithm: SignatureAlgorithm,
    message: String,
    signature: String,
    submitting: bool,
    outcome: Option<OperationOutcome>,
}

impl CryptoWorkflow {
    pub fn new(api: Arc<dyn HsmApi>, mode: WorkflowMode) -> Self {
        Self {
            api,
            mode,
            generation: 0,
            selected_slot: None,
            keys_loading: false,
            keys: Vec::new(),
            selected_key: None,
            algorithm: SignatureAlgorithm::default(),
            message: String::new(),
            signature: String::new(),
            submitting: false,
            outcome: None,
        }
    }

    pub fn sign(api: Arc<dyn HsmApi>) -> Self {
        Self::new(api, WorkflowMode::Sign)
    }

    pub fn verify(api: Arc<dyn HsmApi>) -> Self {
        Self::new(api, WorkflowMode::Verify)
    }

    pub fn mode(&self) -> WorkflowMode {
        self.mode
    }

    pub fn state(&self) -> WorkflowState {
        if self.selected_slot.is_none() {
            WorkflowState::NoSlotSelected
        } else if self.keys_loading {
            WorkflowState::KeysLoading
        } else if self.submitting {
            WorkflowState::Submitted
        } else if self.outcome.is_some() {
            WorkflowState::ResultAvailable
        } else if self.selected_key.is_some() {
            WorkflowState::KeySelected
        } else {
            WorkflowState::KeysReady
        }
    }

    pub fn selected_slot(&self) -> Option<u64> {
        self.selected_slot
    }

    /// Keys offered for selection: usage matches the mode and label is set.
    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    pub fn selected_key(&self) -> Option<&str> {
        self.selected_key.as_deref()
    }

    pub fn algorithm(&self) -> SignatureAlgorithm {
        self.algorithm
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn signature(&self) -> &str {
        &self.signature
    }

    pub fn outcome(&self) -> Option<&OperationOutcome> {
        self.outcome.as_ref()
    }

    pub fn result_text(&self) -> Option<&str> {
        self.outcome.as_ref().map(OperationOutcome::display_text)
    }

    /// Whether the key selector has anything to offer.
    pub fn key_selector_enabled(&self) -> bool {
        self.selected_slot.is_some() && !self.keys_loading && !self.keys.is_empty()
    }

    // ===== SLOT AND KEY SELECTION =====

    /// Selects a slot, dropping the current key list and key selection.
    ///
    /// The returned ticket must accompany the key fetch for this slot.
    pub fn select_slot(&mut self, slot_decimal: u64) -> KeyFetchTicket {
        self.generation += 1;
        self.selected_slot = Some(slot_decimal);
        self.keys_loading = true;
        self.keys.clear();
        self.selected_key = None;
        self.submitting = false;
        self.outcome = None;
        debug!(mode = ?self.mode, slot_decimal, generation = self.generation, "slot selected");
        KeyFetchTicket {
            generation: self.generation,
            slot_decimal,
        }
    }

    /// Fetches the keys for a ticket's slot. Failures come back as an empty
    /// key list, indistinguishable from a slot without usable keys.
    pub async fn fetch_keys(&self, ticket: KeyFetchTicket) -> KeyFetch {
        let keys = match self.api.list_keys(ticket.slot_decimal).await {
            Ok(keys) => keys,
            Err(err) => {
                warn!(slot_decimal = ticket.slot_decimal, error = %err, "failed to fetch keys for slot");
                Vec::new()
            }
        };
        KeyFetch { ticket, keys }
    }

    /// Applies a key fetch if it still belongs to the current selection.
    ///
    /// Returns `false` when the fetch was stale and has been discarded.
    pub fn complete_key_fetch(&mut self, fetch: KeyFetch) -> bool {
        if fetch.ticket.generation != self.generation {
            debug!(
                slot_decimal = fetch.ticket.slot_decimal,
                "discarding key list for superseded slot selection"
            );
            return false;
        }
        let verb = self.mode.usage_verb();
        self.keys = fetch
            .keys
            .into_iter()
            .filter(|key| key.permits(verb) && key.has_label())
            .collect();
        self.keys_loading = false;
        debug!(slot_decimal = fetch.ticket.slot_decimal, usable = self.keys.len(), "keys ready");
        true
    }

    /// Selects a slot and loads its usable keys.
    pub async fn load_slot(&mut self, slot_decimal: u64) -> &[Key] {
        let ticket = self.select_slot(slot_decimal);
        let fetch = self.fetch_keys(ticket).await;
        self.complete_key_fetch(fetch);
        &self.keys
    }

    pub fn select_key(&mut self, label: &str) -> ConsoleResult<()> {
        if self.keys_loading {
            return Err(ConsoleError::invalid("keys are still loading"));
        }
        if !self.keys.iter().any(|key| key.label == label) {
            return Err(ConsoleError::Validation(format!(
                "key {label:?} is not available for {} in the selected slot",
                self.mode.usage_verb()
            )));
        }
        // a result still in flight belongs to the previous key selection
        self.generation += 1;
        self.selected_key = Some(label.to_string());
        self.submitting = false;
        self.outcome = None;
        Ok(())
    }

    pub fn set_algorithm(&mut self, algorithm: SignatureAlgorithm) {
        self.algorithm = algorithm;
    }

    pub fn set_message(&mut self, message: impl Into<String>) {
        self.message = message.into();
    }

    /// Base64 signature to check. Only used in verify mode.
    pub fn set_signature(&mut self, signature: impl Into<String>) {
        self.signature = signature.into();
    }

    // ===== SUBMISSION =====

    pub fn can_submit(&self) -> bool {
        !self.submitting && self.prepare_request().is_ok()
    }

    /// Checks every precondition for the mode and returns the operation to
    /// send. Nothing reaches the network when this fails.
    pub fn begin_submit(&mut self) -> ConsoleResult<PendingOperation> {
        if self.submitting {
            return Err(ConsoleError::invalid("an operation is already in progress"));
        }
        let (key_label, request) = self.prepare_request()?;
        self.submitting = true;
        self.outcome = None;
        Ok(PendingOperation {
            generation: self.generation,
            key_label,
            request,
        })
    }

    /// Sends a pending operation. Errors are folded into the outcome.
    pub async fn execute(&self, pending: PendingOperation) -> CompletedOperation {
        let outcome = match &pending.request {
            OperationRequest::Sign(request) => {
                match self.api.sign(&pending.key_label, request).await {
                    Ok(signature) => OperationOutcome::Signed(signature),
                    Err(err) => {
                        warn!(key = %pending.key_label, error = %err, "signing failed");
                        OperationOutcome::SignFailed(err.detail().to_string())
                    }
                }
            }
            OperationRequest::Verify(request) => {
                match self.api.verify(&pending.key_label, request).await {
                    Ok(true) => OperationOutcome::VerificationSucceeded,
                    Ok(false) => OperationOutcome::VerificationFailed,
                    Err(err) => {
                        warn!(key = %pending.key_label, error = %err, "verification failed");
                        OperationOutcome::VerificationError(err.detail().to_string())
                    }
                }
            }
        };
        CompletedOperation {
            generation: pending.generation,
            key_label: pending.key_label,
            outcome,
        }
    }

    /// Stores an outcome if its slot and key are still the ones selected.
    pub fn finish_submit(&mut self, completed: CompletedOperation) -> bool {
        let current = completed.generation == self.generation
            && self.selected_key.as_deref() == Some(completed.key_label.as_str());
        if !current {
            debug!(key = %completed.key_label, "discarding result for superseded selection");
            return false;
        }
        self.submitting = false;
        self.outcome = Some(completed.outcome);
        true
    }

    /// Guard, send and store in one step.
    pub async fn submit(&mut self) -> ConsoleResult<OperationOutcome> {
        let pending = self.begin_submit()?;
        let completed = self.execute(pending).await;
        let outcome = completed.outcome.clone();
        self.finish_submit(completed);
        Ok(outcome)
    }

    fn prepare_request(&self) -> ConsoleResult<(String, OperationRequest)> {
        let key_label = self
            .selected_key
            .clone()
            .ok_or_else(|| ConsoleError::invalid("no key selected"))?;

        match self.mode {
            WorkflowMode::Sign => {
                if self.message.is_empty() {
                    return Err(ConsoleError::invalid("message to sign is required"));
                }
                Ok((
                    key_label,
                    OperationRequest::Sign(SignRequest {
                        message: self.message.clone(),
                        sign_algo: self.algorithm,
                    }),
                ))
            }
            WorkflowMode::Verify => {
                let message = self.message.trim();
                if message.is_empty() {
                    return Err(ConsoleError::invalid("message to verify is required"));
                }
                let signature = self.signature.trim();
                if signature.is_empty() {
                    return Err(ConsoleError::invalid("base64 signature is required"));
                }
                if SIGNATURE_B64.decode(signature).is_err() {
                    return Err(ConsoleError::invalid("signature is not valid base64"));
                }
                Ok((
                    key_label,
                    OperationRequest::Verify(VerifyRequest {
                        message: message.to_string(),
                        base64_signature: signature.to_string(),
                        verify_algo: self.algorithm,
                    }),
                ))
            }
        }
    }
}
