use std::sync::Arc;

use rocket::serde::json::Json;
use rocket::{State, delete, get, post};

use crate::error::BrokerResult;
use crate::models::{Protocol, RegisterProtocol, SharedProtocol};
use crate::protocol_registry::ProtocolRegistry;

#[post("/api/v1/projects/<project_id>/protocols", data = "<req>")]
pub fn register(
    project_id: &str,
    req: Json<RegisterProtocol>,
    protocols: &State<Arc<ProtocolRegistry>>,
) -> BrokerResult<Json<Protocol>> {
    let req = req.into_inner();
    let protocol = Protocol {
        name: req.name,
        version: req.version,
        message_schema: req.message_schema,
        capabilities: req.capabilities,
        metadata: req.metadata,
    };
    Ok(Json(protocols.register(project_id, protocol)?))
}

#[get("/api/v1/projects/<project_id>/protocols?<name>&<version>&<include_shared>")]
pub fn discover(
    project_id: &str,
    name: Option<&str>,
    version: Option<&str>,
    include_shared: bool,
    protocols: &State<Arc<ProtocolRegistry>>,
) -> BrokerResult<Json<Vec<SharedProtocol>>> {
    Ok(Json(protocols.discover(project_id, name, version, &[], include_shared)?))
}

#[get("/api/v1/projects/<project_id>/protocols/<name>/<version>")]
pub fn get_protocol(
    project_id: &str,
    name: &str,
    version: &str,
    protocols: &State<Arc<ProtocolRegistry>>,
) -> BrokerResult<Json<Protocol>> {
    Ok(Json(protocols.get(project_id, name, version)?))
}

#[delete("/api/v1/projects/<project_id>/protocols/<name>/<version>?<force>")]
pub fn delete_protocol(
    project_id: &str,
    name: &str,
    version: &str,
    force: bool,
    protocols: &State<Arc<ProtocolRegistry>>,
) -> BrokerResult<Json<serde_json::Value>> {
    protocols.delete(project_id, name, version, force)?;
    Ok(Json(serde_json::json!({"deleted": true})))
}

#[post("/api/v1/projects/<project_id>/protocols/<name>/<version>/share/<target_project_id>")]
pub fn share(
    project_id: &str,
    name: &str,
    version: &str,
    target_project_id: &str,
    protocols: &State<Arc<ProtocolRegistry>>,
) -> BrokerResult<Json<serde_json::Value>> {
    protocols.share_protocol(name, version, project_id, target_project_id)?;
    Ok(Json(serde_json::json!({"shared": true})))
}

#[delete("/api/v1/projects/<project_id>/protocols/<name>/<version>/share/<target_project_id>")]
pub fn unshare(
    project_id: &str,
    name: &str,
    version: &str,
    target_project_id: &str,
    protocols: &State<Arc<ProtocolRegistry>>,
) -> BrokerResult<Json<serde_json::Value>> {
    protocols.unshare_protocol(name, version, project_id, target_project_id)?;
    Ok(Json(serde_json::json!({"shared": false})))
}
