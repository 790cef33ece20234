use bson::{Bson, Document};

use crate::errors::CommandError;

/// The driver-facing type alias for a value, as used by `$type` and by error
/// messages that name a value's type.
#[must_use]
pub fn type_alias(v: &Bson) -> &'static str {
    match v {
        Bson::Double(_) => "double",
        Bson::String(_) => "string",
        Bson::Document(_) => "object",
        Bson::Array(_) => "array",
        Bson::Binary(_) => "binData",
        Bson::Undefined => "undefined",
        Bson::ObjectId(_) => "objectId",
        Bson::Boolean(_) => "bool",
        Bson::DateTime(_) => "date",
        Bson::Null => "null",
        Bson::RegularExpression(_) => "regex",
        Bson::DbPointer(_) => "dbPointer",
        Bson::JavaScriptCode(_) => "javascript",
        Bson::Symbol(_) => "symbol",
        Bson::JavaScriptCodeWithScope(_) => "javascriptWithScope",
        Bson::Int32(_) => "int",
        Bson::Timestamp(_) => "timestamp",
        Bson::Int64(_) => "long",
        Bson::Decimal128(_) => "decimal",
        Bson::MinKey => "minKey",
        Bson::MaxKey => "maxKey",
    }
}

/// Renders a value the way command error messages quote one.
#[must_use]
pub fn format_value(v: &Bson) -> String {
    match v {
        Bson::Double(d) => {
            if d.is_nan() {
                "nan.0".into()
            } else if d.is_infinite() {
                if *d > 0.0 { "+Inf".into() } else { "-Inf".into() }
            } else if *d == d.trunc() {
                format!("{d:.1}")
            } else {
                format!("{d}")
            }
        }
        Bson::String(s) => format!("\"{s}\""),
        Bson::Document(d) => {
            if d.is_empty() {
                "{}".into()
            } else {
                let inner = d
                    .iter()
                    .map(|(k, v)| format!("{k}: {}", format_value(v)))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{{ {inner} }}")
            }
        }
        Bson::Array(arr) => {
            if arr.is_empty() {
                "[]".into()
            } else {
                let inner = arr.iter().map(format_value).collect::<Vec<_>>().join(", ");
                format!("[ {inner} ]")
            }
        }
        Bson::Binary(b) => {
            let hex: String = b.bytes.iter().map(|x| format!("{x:02X}")).collect();
            format!("BinData({}, {hex})", u8::from(b.subtype))
        }
        Bson::ObjectId(o) => format!("ObjectId('{}')", o.to_hex()),
        Bson::Boolean(b) => b.to_string(),
        Bson::DateTime(dt) => format!("new Date({})", dt.timestamp_millis()),
        Bson::Null => "null".into(),
        Bson::RegularExpression(r) => format!("/{}/{}", r.pattern, r.options),
        Bson::Int32(i) => i.to_string(),
        Bson::Timestamp(t) => format!("Timestamp({}, {})", t.time, t.increment),
        Bson::Int64(i) => i.to_string(),
        other => type_alias(other).to_string(),
    }
}

/// Rejects values the backend cannot represent. NaN anywhere in the document
/// fails the whole command, before any write is attempted.
///
/// # Errors
/// `BadValue` "NaN is not supported".
pub fn validate_values(doc: &Document) -> Result<(), CommandError> {
    for (_, v) in doc.iter() {
        validate_value(v)?;
    }
    Ok(())
}

fn validate_value(v: &Bson) -> Result<(), CommandError> {
    match v {
        Bson::Double(d) if d.is_nan() => {
            Err(CommandError::BadValue("NaN is not supported".into()))
        }
        Bson::Document(d) => validate_values(d),
        Bson::Array(arr) => {
            for elem in arr {
                validate_value(elem)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Per-document storage validation: key restrictions and value restrictions
/// surfaced as write errors.
///
/// # Errors
/// `BadValue` for `$`-prefixed keys, dotted keys, and infinities;
/// `NotImplemented` for Decimal128.
pub fn validate_storable(doc: &Document) -> Result<(), CommandError> {
    for (k, v) in doc.iter() {
        if k.starts_with('$') {
            return Err(CommandError::BadValue(format!(
                "invalid key: \"{k}\" (key must not start with '$' sign)"
            )));
        }
        if k.contains('.') {
            return Err(CommandError::BadValue(format!(
                "invalid key: \"{k}\" (key must not contain '.' sign)"
            )));
        }
        validate_storable_value(k, v)?;
    }
    Ok(())
}

fn validate_storable_value(key: &str, v: &Bson) -> Result<(), CommandError> {
    match v {
        Bson::Double(d) if d.is_infinite() => Err(CommandError::BadValue(format!(
            "invalid value: {{ \"{key}\": {} }} (infinity values are not allowed)",
            format_value(v)
        ))),
        Bson::Decimal128(_) => {
            Err(CommandError::NotImplemented("Decimal128 is not supported".into()))
        }
        Bson::Document(d) => validate_storable(d),
        Bson::Array(arr) => {
            for elem in arr {
                validate_storable_value(key, elem)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Returns the document's `_id`, assigning a fresh ObjectID when absent.
pub fn ensure_id(doc: &mut Document) -> Bson {
    if let Some(id) = doc.get("_id") {
        return id.clone();
    }
    let id = Bson::ObjectId(bson::oid::ObjectId::new());
    doc.insert("_id", id.clone());
    id
}
