//! `saslStart` and `saslContinue` routing into the mechanism registry.

use bson::spec::BinarySubtype;
use bson::{Binary, Bson, Document, doc};

use crate::Proxy;
use crate::auth::{SaslStep, payload_bytes};
use crate::document::type_alias;
use crate::errors::CommandError;

pub(crate) fn sasl_start(proxy: &Proxy, cmd: &Document) -> Result<Document, CommandError> {
    let mechanism = match cmd.get("mechanism") {
        Some(Bson::String(m)) => m.as_str(),
        Some(v) => {
            return Err(CommandError::TypeMismatch(format!(
                "BSON field 'saslStart.mechanism' is the wrong type '{}', expected type 'string'",
                type_alias(v)
            )));
        }
        None => {
            return Err(CommandError::Location(
                40414,
                "BSON field 'saslStart.mechanism' is missing but a required field".into(),
            ));
        }
    };
    let payload = required_payload(cmd, "saslStart")?;
    let (conversation, step) = proxy.auth.start(mechanism, &payload)?;
    Ok(sasl_reply(conversation, &step))
}

pub(crate) fn sasl_continue(proxy: &Proxy, cmd: &Document) -> Result<Document, CommandError> {
    let conversation = match cmd.get("conversationId") {
        Some(Bson::Int32(id)) => *id,
        Some(v) => {
            return Err(CommandError::TypeMismatch(format!(
                "BSON field 'saslContinue.conversationId' is the wrong type '{}', \
                 expected type 'int'",
                type_alias(v)
            )));
        }
        None => {
            return Err(CommandError::Location(
                40414,
                "BSON field 'saslContinue.conversationId' is missing but a required field".into(),
            ));
        }
    };
    let payload = required_payload(cmd, "saslContinue")?;
    let step = proxy.auth.advance(conversation, &payload)?;
    Ok(sasl_reply(conversation, &step))
}

fn required_payload(cmd: &Document, command: &str) -> Result<Vec<u8>, CommandError> {
    match cmd.get("payload") {
        Some(v) => payload_bytes(v),
        None => Err(CommandError::Location(
            40414,
            format!("BSON field '{command}.payload' is missing but a required field"),
        )),
    }
}

fn sasl_reply(conversation: i32, step: &SaslStep) -> Document {
    doc! {
        "conversationId": conversation,
        "done": step.done,
        "payload": Bson::Binary(Binary {
            subtype: BinarySubtype::Generic,
            bytes: step.payload.clone(),
        }),
        "ok": 1.0,
    }
}
