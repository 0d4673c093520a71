use super::handlers;
use super::types::{AppState, Request};
use crate::ipc::error::err;

pub fn handle_request(state: &mut AppState, req: Request) -> serde_json::Value {
    log::debug!("dispatch {} (id={})", req.method, req.id);

    if let Some(resp) = handlers::core::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::folders::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::lists::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::cards::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::turmas::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::assignments::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::backup_exchange::try_handle(state, &req) {
        return resp;
    }

    err(
        &req.id,
        "not_implemented",
        format!("unknown method: {}", req.method),
        None,
    )
}
