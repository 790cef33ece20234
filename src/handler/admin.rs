//! Administrative commands: collection listing and lifecycle, liveness, and
//! server identity.

use bson::{Bson, Document, doc};

use crate::Proxy;
use crate::backend::CreateOptions;
use crate::errors::CommandError;
use crate::handler::{backend_failure, namespace, optional_bool, required_db, whole_number};

/// Version reported to drivers; 7.0-era so clients negotiate modern wire
/// behavior.
pub(crate) const SERVER_VERSION: &str = "7.0.42";

pub(crate) fn list_collections(proxy: &Proxy, cmd: &Document) -> Result<Document, CommandError> {
    let db = required_db(cmd)?;
    let infos = proxy.backend.list_collections(&db).map_err(backend_failure)?;
    let batch: Vec<Bson> = infos
        .into_iter()
        .map(|info| {
            let options = if info.capped { doc! {"capped": true} } else { Document::new() };
            Bson::Document(doc! {
                "name": info.name,
                "type": "collection",
                "options": options,
            })
        })
        .collect();
    Ok(doc! {
        "cursor": {
            "firstBatch": batch,
            "id": 0_i64,
            "ns": format!("{db}.$cmd.listCollections"),
        },
        "ok": 1.0,
    })
}

pub(crate) fn create(proxy: &Proxy, cmd: &Document) -> Result<Document, CommandError> {
    let (db, coll) = namespace(cmd, "create")?;
    let ns = format!("{db}.{coll}");
    let capped = optional_bool(cmd, "capped", false)?;
    let max = match cmd.get("max") {
        None => None,
        Some(v) => {
            let n = whole_number("max", v)?;
            let n = u64::try_from(n).map_err(|_| {
                CommandError::Location(
                    51024,
                    format!("BSON field 'max' value must be >= 0, actual value '{n}'"),
                )
            })?;
            Some(n)
        }
    };
    let options = CreateOptions { capped, max };
    if !proxy.backend.create_collection(&ns, &options).map_err(backend_failure)? {
        return Err(CommandError::NamespaceExists(format!("Collection {ns} already exists.")));
    }
    log::info!(target: "bisongate::audit", "create {ns} capped={capped}");
    Ok(doc! {"ok": 1.0})
}

pub(crate) fn drop(proxy: &Proxy, cmd: &Document) -> Result<Document, CommandError> {
    let (db, coll) = namespace(cmd, "drop")?;
    let ns = format!("{db}.{coll}");
    if !proxy.backend.drop_collection(&ns).map_err(backend_failure)? {
        return Err(CommandError::NamespaceNotFound("ns not found".into()));
    }
    log::info!(target: "bisongate::audit", "drop {ns}");
    Ok(doc! {"nIndexesWas": 1, "ns": ns, "ok": 1.0})
}

pub(crate) fn ping(_proxy: &Proxy, _cmd: &Document) -> Result<Document, CommandError> {
    Ok(doc! {"ok": 1.0})
}

/// Fixed identity document; only `bisongate.version` varies by build.
pub(crate) fn build_info(_proxy: &Proxy, _cmd: &Document) -> Result<Document, CommandError> {
    Ok(doc! {
        "version": SERVER_VERSION,
        "modules": Bson::Array(vec![]),
        "sysInfo": "deprecated",
        "versionArray": [7, 0, 42, 0],
        "bits": 64_i32,
        "debug": false,
        "maxBsonObjectSize": 16_777_216_i32,
        "bisongate": {"version": env!("CARGO_PKG_VERSION")},
        "ok": 1.0,
    })
}
