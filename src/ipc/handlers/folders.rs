use crate::ipc::error::{err, ok};
use crate::ipc::guard;
use crate::ipc::types::{AppState, Request};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, OptionalExtension, Row};
use serde_json::json;
use uuid::Uuid;

pub(super) const FOLDER_COLS: &str =
    "id, owner_id, title, description, visibility, class_id, created_at, updated_at";

pub(super) fn folder_json(row: &Row) -> rusqlite::Result<serde_json::Value> {
    let id: String = row.get(0)?;
    let owner_id: String = row.get(1)?;
    let title: String = row.get(2)?;
    let description: Option<String> = row.get(3)?;
    let visibility: String = row.get(4)?;
    let class_id: Option<String> = row.get(5)?;
    let created_at: Option<String> = row.get(6)?;
    let updated_at: Option<String> = row.get(7)?;
    Ok(json!({
        "id": id,
        "owner_id": owner_id,
        "title": title,
        "description": description,
        "visibility": visibility,
        "class_id": class_id,
        "created_at": created_at,
        "updated_at": updated_at
    }))
}

fn handle_folders_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let actor = match guard::require_actor(req) {
        Ok(a) => a,
        Err(e) => return e.response(&req.id),
    };

    let title = match req.params.get("title").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing title", None),
    };
    if title.is_empty() {
        return err(&req.id, "bad_params", "title must not be empty", None);
    }
    let description = req
        .params
        .get("description")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    // Authoring always produces a private original; class_id stays NULL and is
    // only ever set by the assignment duplicator.
    let folder_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO folders(id, owner_id, title, description, visibility, created_at, updated_at)
         VALUES(?, ?, ?, ?, 'private',
                strftime('%Y-%m-%dT%H:%M:%SZ','now'),
                strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
        (&folder_id, actor, &title, description.as_deref()),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "folders" })),
        );
    }

    let folder = conn.query_row(
        &format!("SELECT {} FROM folders WHERE id = ?", FOLDER_COLS),
        [&folder_id],
        folder_json,
    );
    match folder {
        Ok(folder) => ok(&req.id, json!({ "folder": folder })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_folders_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let actor = match guard::require_actor(req) {
        Ok(a) => a,
        Err(e) => return e.response(&req.id),
    };

    let mut stmt = match conn.prepare(&format!(
        "SELECT {} FROM folders WHERE owner_id = ? ORDER BY title",
        FOLDER_COLS
    )) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([actor], folder_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(folders) => ok(&req.id, json!({ "folders": folders })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_folders_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let actor = match guard::require_actor(req) {
        Ok(a) => a,
        Err(e) => return e.response(&req.id),
    };
    let folder_id = match req.params.get("folder_id").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing folder_id", None),
    };

    let folder = match conn
        .query_row(
            &format!("SELECT {} FROM folders WHERE id = ?", FOLDER_COLS),
            [&folder_id],
            folder_json,
        )
        .optional()
    {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "not_found", "folder not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let owner_id = folder["owner_id"].as_str().unwrap_or_default().to_string();
    let class_id = folder["class_id"].as_str().map(|s| s.to_string());
    match guard::can_read_content(conn, actor, &owner_id, class_id.as_deref()) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "forbidden", "no access to this folder", None),
        Err(e) => return e.response(&req.id),
    }

    let mut stmt = match conn.prepare(&format!(
        "SELECT {} FROM lists WHERE folder_id = ? ORDER BY title",
        super::lists::LIST_COLS
    )) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let lists = stmt
        .query_map([&folder_id], super::lists::list_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match lists {
        Ok(lists) => ok(&req.id, json!({ "folder": folder, "lists": lists })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_folders_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let actor = match guard::require_actor(req) {
        Ok(a) => a,
        Err(e) => return e.response(&req.id),
    };
    let folder_id = match req.params.get("folder_id").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing folder_id", None),
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "missing/invalid patch", None);
    };

    let owner_id: Option<String> = match conn
        .query_row(
            "SELECT owner_id FROM folders WHERE id = ?",
            [&folder_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(owner_id) = owner_id else {
        return err(&req.id, "not_found", "folder not found", None);
    };
    if owner_id != actor {
        return err(&req.id, "forbidden", "only the owner may edit a folder", None);
    }

    let mut set_parts: Vec<String> = Vec::new();
    let mut bind_values: Vec<Value> = Vec::new();

    if let Some(v) = patch.get("title") {
        let Some(s) = v.as_str() else {
            return err(&req.id, "bad_params", "patch.title must be a string", None);
        };
        let s = s.trim().to_string();
        if s.is_empty() {
            return err(&req.id, "bad_params", "title must not be empty", None);
        }
        set_parts.push("title = ?".into());
        bind_values.push(Value::Text(s));
    }
    if let Some(v) = patch.get("description") {
        if v.is_null() {
            set_parts.push("description = ?".into());
            bind_values.push(Value::Null);
        } else if let Some(s) = v.as_str() {
            set_parts.push("description = ?".into());
            bind_values.push(Value::Text(s.to_string()));
        } else {
            return err(
                &req.id,
                "bad_params",
                "patch.description must be a string or null",
                None,
            );
        }
    }

    if set_parts.is_empty() {
        return err(
            &req.id,
            "bad_params",
            "patch must include at least one field",
            None,
        );
    }
    set_parts.push("updated_at = strftime('%Y-%m-%dT%H:%M:%SZ','now')".into());

    let sql = format!("UPDATE folders SET {} WHERE id = ?", set_parts.join(", "));
    bind_values.push(Value::Text(folder_id.clone()));

    let changed = match conn.execute(&sql, params_from_iter(bind_values)) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "db_update_failed",
                e.to_string(),
                Some(json!({ "table": "folders" })),
            )
        }
    };
    if changed == 0 {
        return err(&req.id, "not_found", "folder not found", None);
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_folders_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let actor = match guard::require_actor(req) {
        Ok(a) => a,
        Err(e) => return e.response(&req.id),
    };
    let folder_id = match req.params.get("folder_id").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing folder_id", None),
    };

    let row: Option<(String, Option<String>)> = match conn
        .query_row(
            "SELECT owner_id, class_id FROM folders WHERE id = ?",
            [&folder_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((owner_id, class_id)) = row else {
        return err(&req.id, "not_found", "folder not found", None);
    };
    if owner_id != actor {
        return err(&req.id, "forbidden", "only the owner may delete a folder", None);
    }
    // Copies are torn down by the cascade controller, never by authoring.
    if class_id.is_some() {
        return err(
            &req.id,
            "assignment_copy",
            "folder belongs to an assignment; delete the assignment instead",
            None,
        );
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // Lists may stand alone, so deleting a folder detaches them.
    if let Err(e) = tx.execute(
        "UPDATE lists SET folder_id = NULL WHERE folder_id = ?",
        [&folder_id],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "lists" })),
        );
    }
    if let Err(e) = tx.execute("DELETE FROM folders WHERE id = ?", [&folder_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "folders" })),
        );
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "folders.create" => Some(handle_folders_create(state, req)),
        "folders.list" => Some(handle_folders_list(state, req)),
        "folders.get" => Some(handle_folders_get(state, req)),
        "folders.update" => Some(handle_folders_update(state, req)),
        "folders.delete" => Some(handle_folders_delete(state, req)),
        _ => None,
    }
}
