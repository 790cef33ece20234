//! SASL conversation routing.
//!
//! The core never inspects credentials. It allocates conversation ids,
//! routes `saslStart`/`saslContinue` payloads into a mechanism's state
//! machine, and drops finished conversations.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};

use base64::{Engine as _, engine::general_purpose};
use bson::{Binary, Bson};
use parking_lot::Mutex;

use crate::document::type_alias;
use crate::errors::CommandError;

/// One mechanism step's output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaslStep {
    /// Raw bytes to hand back to the client in `payload`.
    pub payload: Vec<u8>,
    /// True once the exchange is complete.
    pub done: bool,
}

/// Challenge/response state machine for one authentication exchange.
/// Implementations own credential verification; the core only routes
/// payloads.
pub trait SaslMechanism: Send + Sync {
    /// Mechanism name as sent in `saslStart.mechanism`.
    fn name(&self) -> &'static str;

    /// Advances the exchange with one client payload.
    fn step(&mut self, payload: &[u8]) -> Result<SaslStep, CommandError>;
}

type MechanismFactory = Box<dyn Fn() -> Box<dyn SaslMechanism> + Send + Sync>;

/// Mechanism table plus the live conversations.
pub struct AuthRegistry {
    factories: HashMap<String, MechanismFactory>,
    conversations: Mutex<HashMap<i32, Box<dyn SaslMechanism>>>,
    next_conversation: AtomicI32,
}

impl AuthRegistry {
    /// A registry with the PLAIN mechanism preinstalled.
    #[must_use]
    pub fn new() -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
            conversations: Mutex::new(HashMap::new()),
            next_conversation: AtomicI32::new(1),
        };
        registry.install("PLAIN", || Box::new(PlainMechanism));
        registry
    }

    /// Installs a mechanism under its wire name.
    pub fn install<F>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> Box<dyn SaslMechanism> + Send + Sync + 'static,
    {
        self.factories.insert(name.to_owned(), Box::new(factory));
    }

    /// Starts an exchange; unfinished conversations are retained under the
    /// returned id for `saslContinue`.
    pub fn start(&self, mechanism: &str, payload: &[u8]) -> Result<(i32, SaslStep), CommandError> {
        let Some(factory) = self.factories.get(mechanism) else {
            return Err(CommandError::MechanismUnavailable(format!(
                "Received authentication for mechanism {mechanism} which is not enabled"
            )));
        };
        let mut conversation = factory();
        let step = conversation.step(payload)?;
        let id = self.next_conversation.fetch_add(1, Ordering::Relaxed);
        crate::diag!("sasl {} conversation {id} started, done={}", conversation.name(), step.done);
        if !step.done {
            self.conversations.lock().insert(id, conversation);
        }
        Ok((id, step))
    }

    /// Advances an exchange. Finished and failed conversations are removed.
    pub fn advance(&self, conversation: i32, payload: &[u8]) -> Result<SaslStep, CommandError> {
        let mut conversations = self.conversations.lock();
        let Some(mechanism) = conversations.get_mut(&conversation) else {
            return Err(CommandError::AuthenticationFailed(
                "No SASL session state found".into(),
            ));
        };
        let result = mechanism.step(payload);
        if !matches!(&result, Ok(step) if !step.done) {
            conversations.remove(&conversation);
        }
        result
    }
}

impl Default for AuthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for AuthRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("AuthRegistry").field("mechanisms", &names).finish()
    }
}

/// RFC 4616 PLAIN: one `authzid \0 authcid \0 passwd` message, done in a
/// single round. Accepts any well-formed identity; deployments wire real
/// verification in through their own [`SaslMechanism`].
pub struct PlainMechanism;

impl SaslMechanism for PlainMechanism {
    fn name(&self) -> &'static str {
        "PLAIN"
    }

    fn step(&mut self, payload: &[u8]) -> Result<SaslStep, CommandError> {
        let fields: Vec<&[u8]> = payload.split(|b| *b == 0).collect();
        if fields.len() != 3 {
            return Err(CommandError::TypeMismatch(format!(
                "Invalid payload: expected 3 fields, got {}",
                fields.len()
            )));
        }
        // authzid is ignored; the authentication identity must be present.
        if fields[1].is_empty() {
            return Err(CommandError::AuthenticationFailed("Authentication failed.".into()));
        }
        Ok(SaslStep { payload: Vec::new(), done: true })
    }
}

/// Extracts raw payload bytes from a `payload` operand. The wire form is
/// binary; a base64 string is accepted because some drivers send one.
pub fn payload_bytes(value: &Bson) -> Result<Vec<u8>, CommandError> {
    match value {
        Bson::Binary(Binary { bytes, .. }) => Ok(bytes.clone()),
        Bson::String(s) => general_purpose::STANDARD
            .decode(s)
            .map_err(|err| CommandError::BadValue(format!("Invalid payload: {err}"))),
        other => Err(CommandError::TypeMismatch(format!(
            "BSON field 'payload' is the wrong type '{}', expected types '[binData, string]'",
            type_alias(other)
        ))),
    }
}
