//! Validation of client-issued control commands.
//!
//! This is the only place where client-supplied, security-relevant data is
//! turned into something published on the device control topic. Validation
//! fails closed: anything not explicitly recognised is rejected and nothing
//! is repaired.

use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use vigil_protocol::{events, ClientFrame, ControlPayload};

/// Maximum credential length, in characters.
pub const MAX_CREDENTIAL_LENGTH: usize = 20;

/// Recognised command kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    /// Disarm the alarm. Requires a password.
    Disarm,
    /// Activate the alarm.
    Activate,
}

impl CommandKind {
    /// Look up a kind by its realtime event name.
    #[must_use]
    pub fn from_event(event: &str) -> Option<Self> {
        match event {
            events::DISARM_ALARM => Some(CommandKind::Disarm),
            events::ACTIVATE_ALARM => Some(CommandKind::Activate),
            _ => None,
        }
    }

    /// Short name used in logs and confirmations.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandKind::Disarm => "disarm",
            CommandKind::Activate => "activate",
        }
    }

    /// Whether this kind needs credential material.
    #[must_use]
    pub fn requires_credential(&self) -> bool {
        matches!(self, CommandKind::Disarm)
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a command was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Rejection {
    /// The command kind is not recognised.
    #[error("Unknown command")]
    UnknownKind,

    /// A required password is absent or empty.
    #[error("Password is required")]
    MissingCredential,

    /// The password is not a string.
    #[error("Password must be a string")]
    CredentialNotText,

    /// The password is too long.
    #[error("Password exceeds {MAX_CREDENTIAL_LENGTH} characters")]
    CredentialTooLong,
}

impl Rejection {
    /// Machine-readable reason code sent to clients.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Rejection::UnknownKind => "unknown_command",
            Rejection::MissingCredential => "missing_password",
            Rejection::CredentialNotText => "invalid_password_type",
            Rejection::CredentialTooLong => "password_too_long",
        }
    }
}

/// A command as received from a session, before validation.
#[derive(Clone, PartialEq)]
pub struct CommandRequest {
    /// Event name the client used.
    pub kind: String,
    /// Credential material, if the client sent any.
    pub credential: Option<Value>,
}

impl CommandRequest {
    /// Create a request.
    #[must_use]
    pub fn new(kind: impl Into<String>, credential: Option<Value>) -> Self {
        Self {
            kind: kind.into(),
            credential,
        }
    }

    /// Build a request from a decoded client frame.
    ///
    /// The credential is the `password` field of an object payload; any other
    /// payload shape carries no credential.
    #[must_use]
    pub fn from_frame(frame: ClientFrame) -> Self {
        let credential = match frame.data {
            Some(Value::Object(mut map)) => map.remove("password"),
            _ => None,
        };
        Self::new(frame.event, credential)
    }
}

impl fmt::Debug for CommandRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandRequest")
            .field("kind", &self.kind)
            .field("has_credential", &self.credential.is_some())
            .finish()
    }
}

/// A command that passed validation.
#[derive(Clone, PartialEq, Eq)]
pub enum ValidatedCommand {
    /// Disarm with a well-formed password.
    Disarm {
        /// Password forwarded to the device.
        password: String,
    },
    /// Activate the alarm.
    Activate,
}

impl ValidatedCommand {
    /// Get the command kind.
    #[must_use]
    pub fn kind(&self) -> CommandKind {
        match self {
            ValidatedCommand::Disarm { .. } => CommandKind::Disarm,
            ValidatedCommand::Activate => CommandKind::Activate,
        }
    }

    /// Build the document published on the control topic.
    #[must_use]
    pub fn payload(&self) -> ControlPayload {
        match self {
            ValidatedCommand::Disarm { password } => ControlPayload::disarm(password.clone()),
            ValidatedCommand::Activate => ControlPayload::activate(),
        }
    }
}

impl fmt::Debug for ValidatedCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidatedCommand::Disarm { .. } => f.write_str("Disarm { password: <redacted> }"),
            ValidatedCommand::Activate => f.write_str("Activate"),
        }
    }
}

/// Checks that credential material is well-formed.
///
/// This does not decide whether the credential unlocks anything; that
/// decision belongs to the device behind the control topic.
pub trait CredentialVerifier: Send + Sync {
    /// Return the credential as text if it is acceptable.
    ///
    /// # Errors
    ///
    /// Returns the rejection reason if the credential is malformed.
    fn check(&self, credential: &Value) -> Result<String, Rejection>;
}

/// Accepts non-empty strings up to a maximum length.
#[derive(Debug, Clone)]
pub struct LengthVerifier {
    max_len: usize,
}

impl LengthVerifier {
    /// Create a verifier with a custom maximum length.
    #[must_use]
    pub fn new(max_len: usize) -> Self {
        Self { max_len }
    }
}

impl Default for LengthVerifier {
    fn default() -> Self {
        Self::new(MAX_CREDENTIAL_LENGTH)
    }
}

impl CredentialVerifier for LengthVerifier {
    fn check(&self, credential: &Value) -> Result<String, Rejection> {
        match credential {
            Value::Null => Err(Rejection::MissingCredential),
            Value::String(s) if s.is_empty() => Err(Rejection::MissingCredential),
            Value::String(s) if s.chars().count() > self.max_len => {
                Err(Rejection::CredentialTooLong)
            }
            Value::String(s) => Ok(s.clone()),
            _ => Err(Rejection::CredentialNotText),
        }
    }
}

/// Validates command requests.
#[derive(Clone)]
pub struct CommandValidator {
    verifier: Arc<dyn CredentialVerifier>,
}

impl CommandValidator {
    /// Create a validator with a custom credential verifier.
    #[must_use]
    pub fn new(verifier: Arc<dyn CredentialVerifier>) -> Self {
        Self { verifier }
    }

    /// Validate a request.
    ///
    /// # Errors
    ///
    /// Returns the rejection reason for any request that is not well-formed.
    pub fn validate(&self, request: &CommandRequest) -> Result<ValidatedCommand, Rejection> {
        let kind = CommandKind::from_event(&request.kind).ok_or(Rejection::UnknownKind)?;

        match kind {
            CommandKind::Disarm => {
                let credential = request
                    .credential
                    .as_ref()
                    .ok_or(Rejection::MissingCredential)?;
                let password = self.verifier.check(credential)?;
                Ok(ValidatedCommand::Disarm { password })
            }
            // Activation ignores any credential that came along with it.
            CommandKind::Activate => Ok(ValidatedCommand::Activate),
        }
    }
}

impl Default for CommandValidator {
    fn default() -> Self {
        Self::new(Arc::new(LengthVerifier::default()))
    }
}

impl fmt::Debug for CommandValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandValidator").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn disarm(credential: Option<Value>) -> CommandRequest {
        CommandRequest::new(events::DISARM_ALARM, credential)
    }

    #[test]
    fn test_disarm_accepted() {
        let validator = CommandValidator::default();
        let command = validator.validate(&disarm(Some(json!("1234")))).unwrap();

        assert_eq!(command.kind(), CommandKind::Disarm);
        assert_eq!(command.payload(), ControlPayload::disarm("1234"));
    }

    #[test]
    fn test_disarm_length_boundary() {
        let validator = CommandValidator::default();

        let exact = "a".repeat(MAX_CREDENTIAL_LENGTH);
        assert!(validator.validate(&disarm(Some(json!(exact)))).is_ok());

        let long = "a".repeat(MAX_CREDENTIAL_LENGTH + 1);
        assert_eq!(
            validator.validate(&disarm(Some(json!(long)))),
            Err(Rejection::CredentialTooLong)
        );
    }

    #[test]
    fn test_length_counts_characters() {
        let validator = CommandValidator::default();
        let multibyte = "é".repeat(MAX_CREDENTIAL_LENGTH);
        assert!(validator.validate(&disarm(Some(json!(multibyte)))).is_ok());
    }

    #[test]
    fn test_disarm_missing_password() {
        let validator = CommandValidator::default();

        assert_eq!(
            validator.validate(&disarm(None)),
            Err(Rejection::MissingCredential)
        );
        assert_eq!(
            validator.validate(&disarm(Some(Value::Null))),
            Err(Rejection::MissingCredential)
        );
        assert_eq!(
            validator.validate(&disarm(Some(json!("")))),
            Err(Rejection::MissingCredential)
        );
    }

    #[test]
    fn test_disarm_non_text_password() {
        let validator = CommandValidator::default();

        for credential in [json!(1234), json!(true), json!(["1234"]), json!({"p": 1})] {
            assert_eq!(
                validator.validate(&disarm(Some(credential))),
                Err(Rejection::CredentialNotText)
            );
        }
    }

    #[test]
    fn test_activate_ignores_credential() {
        let validator = CommandValidator::default();
        let long = "a".repeat(100);

        for credential in [None, Some(json!(long)), Some(json!(42))] {
            let request = CommandRequest::new(events::ACTIVATE_ALARM, credential);
            let command = validator.validate(&request).unwrap();
            assert_eq!(command.payload(), ControlPayload::activate());
        }
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let validator = CommandValidator::default();

        for kind in ["", "disarm", "DisarmAlarm", "openDoor"] {
            let request = CommandRequest::new(kind, Some(json!("1234")));
            assert_eq!(validator.validate(&request), Err(Rejection::UnknownKind));
        }
    }

    #[test]
    fn test_request_from_frame() {
        let request = CommandRequest::from_frame(ClientFrame::disarm("1234"));
        assert_eq!(request.kind, events::DISARM_ALARM);
        assert_eq!(request.credential, Some(json!("1234")));

        let bare = ClientFrame::new(events::DISARM_ALARM, Some(json!("1234")));
        assert_eq!(CommandRequest::from_frame(bare).credential, None);
    }

    #[test]
    fn test_debug_redacts_password() {
        let validator = CommandValidator::default();
        let command = validator.validate(&disarm(Some(json!("secret")))).unwrap();

        assert!(!format!("{:?}", command).contains("secret"));
        assert!(!format!("{:?}", disarm(Some(json!("secret")))).contains("secret"));
    }

    #[test]
    fn test_rejection_codes_are_distinct() {
        let codes = [
            Rejection::UnknownKind.code(),
            Rejection::MissingCredential.code(),
            Rejection::CredentialNotText.code(),
            Rejection::CredentialTooLong.code(),
        ];
        let unique: std::collections::HashSet<_> = codes.iter().collect();
        assert_eq!(unique.len(), codes.len());
    }
}
