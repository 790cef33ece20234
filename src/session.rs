//! Logical session identity, carried by the `lsid` field of commands.

use std::fmt;

use bson::spec::BinarySubtype;
use bson::{Binary, Bson, Document, doc};
use uuid::Uuid;

use crate::document::type_alias;
use crate::errors::CommandError;

/// The UUID inside an `lsid` document. Cursors are owned by the session
/// that opened them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Extracts the id from an `lsid` operand, `{id: BinData(4, <16 bytes>)}`.
    pub fn from_lsid(lsid: &Document) -> Result<Self, CommandError> {
        let id = lsid.get("id").ok_or_else(|| {
            CommandError::Location(
                40414,
                "BSON field 'lsid.id' is missing but a required field".into(),
            )
        })?;
        match id {
            Bson::Binary(Binary { subtype: BinarySubtype::Uuid, bytes }) => {
                Uuid::from_slice(bytes).map(Self).map_err(|_| uuid_error())
            }
            Bson::Binary(_) => Err(uuid_error()),
            other => Err(CommandError::TypeMismatch(format!(
                "BSON field 'lsid.id' is the wrong type '{}', expected type 'binData'",
                type_alias(other)
            ))),
        }
    }

    /// The wire form of this id.
    #[must_use]
    pub fn to_lsid(&self) -> Document {
        doc! {
            "id": Bson::Binary(Binary {
                subtype: BinarySubtype::Uuid,
                bytes: self.0.as_bytes().to_vec(),
            })
        }
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

fn uuid_error() -> CommandError {
    CommandError::BadValue("uuid must be a 16-byte binary field with UUID (4) subtype".into())
}
