use crate::ipc::error::{err, ok};
use crate::ipc::guard;
use crate::ipc::types::{AppState, Request};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, OptionalExtension, Row};
use serde_json::json;
use uuid::Uuid;

pub(super) const LIST_COLS: &str =
    "id, folder_id, owner_id, title, description, lang, visibility, class_id, created_at, updated_at";

pub(super) fn list_json(row: &Row) -> rusqlite::Result<serde_json::Value> {
    let id: String = row.get(0)?;
    let folder_id: Option<String> = row.get(1)?;
    let owner_id: String = row.get(2)?;
    let title: String = row.get(3)?;
    let description: Option<String> = row.get(4)?;
    let lang: Option<String> = row.get(5)?;
    let visibility: String = row.get(6)?;
    let class_id: Option<String> = row.get(7)?;
    let created_at: Option<String> = row.get(8)?;
    let updated_at: Option<String> = row.get(9)?;
    Ok(json!({
        "id": id,
        "folder_id": folder_id,
        "owner_id": owner_id,
        "title": title,
        "description": description,
        "lang": lang,
        "visibility": visibility,
        "class_id": class_id,
        "created_at": created_at,
        "updated_at": updated_at
    }))
}

fn handle_lists_create(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let lang = req
        .params
        .get("lang")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());
    let folder_id = req
        .params
        .get("folder_id")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    if let Some(fid) = folder_id.as_deref() {
        let target: Option<(String, Option<String>)> = match conn
            .query_row(
                "SELECT owner_id, class_id FROM folders WHERE id = ?",
                [fid],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()
        {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        match target {
            None => return err(&req.id, "not_found", "folder not found", None),
            Some((o, _)) if o != actor => {
                return err(&req.id, "forbidden", "folder belongs to another user", None)
            }
            // Copy folders take no new children; the cascade owns everything
            // inside them.
            Some((_, Some(_))) => {
                return err(
                    &req.id,
                    "assignment_copy",
                    "folder belongs to an assignment; new lists cannot attach to it",
                    None,
                )
            }
            Some(_) => {}
        }
    }

    let list_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO lists(id, folder_id, owner_id, title, description, lang, visibility, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, 'private',
                strftime('%Y-%m-%dT%H:%M:%SZ','now'),
                strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
        (
            &list_id,
            folder_id.as_deref(),
            actor,
            &title,
            description.as_deref(),
            lang.as_deref(),
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "lists" })),
        );
    }

    let list = conn.query_row(
        &format!("SELECT {} FROM lists WHERE id = ?", LIST_COLS),
        [&list_id],
        list_json,
    );
    match list {
        Ok(list) => ok(&req.id, json!({ "list": list })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_lists_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let actor = match guard::require_actor(req) {
        Ok(a) => a,
        Err(e) => return e.response(&req.id),
    };
    let folder_id = req
        .params
        .get("folder_id")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let rows = match folder_id {
        Some(fid) => conn
            .prepare(&format!(
                "SELECT {} FROM lists WHERE owner_id = ? AND folder_id = ? ORDER BY title",
                LIST_COLS
            ))
            .and_then(|mut stmt| {
                stmt.query_map((actor, fid.as_str()), list_json)?
                    .collect::<Result<Vec<_>, _>>()
            }),
        None => conn
            .prepare(&format!(
                "SELECT {} FROM lists WHERE owner_id = ? ORDER BY title",
                LIST_COLS
            ))
            .and_then(|mut stmt| {
                stmt.query_map([actor], list_json)?
                    .collect::<Result<Vec<_>, _>>()
            }),
    };

    match rows {
        Ok(lists) => ok(&req.id, json!({ "lists": lists })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_lists_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let actor = match guard::require_actor(req) {
        Ok(a) => a,
        Err(e) => return e.response(&req.id),
    };
    let list_id = match req.params.get("list_id").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing list_id", None),
    };

    let list = match conn
        .query_row(
            &format!("SELECT {} FROM lists WHERE id = ?", LIST_COLS),
            [&list_id],
            list_json,
        )
        .optional()
    {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "not_found", "list not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let owner_id = list["owner_id"].as_str().unwrap_or_default().to_string();
    let class_id = list["class_id"].as_str().map(|s| s.to_string());
    match guard::can_read_content(conn, actor, &owner_id, class_id.as_deref()) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "forbidden", "no access to this list", None),
        Err(e) => return e.response(&req.id),
    }

    let mut stmt = match conn.prepare(&format!(
        "SELECT {} FROM flashcards WHERE list_id = ? ORDER BY sort_order",
        super::cards::CARD_COLS
    )) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let cards = stmt
        .query_map([&list_id], super::cards::card_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match cards {
        Ok(cards) => ok(&req.id, json!({ "list": list, "cards": cards })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_lists_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let actor = match guard::require_actor(req) {
        Ok(a) => a,
        Err(e) => return e.response(&req.id),
    };
    let list_id = match req.params.get("list_id").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing list_id", None),
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "missing/invalid patch", None);
    };

    let owner_id: Option<String> = match conn
        .query_row("SELECT owner_id FROM lists WHERE id = ?", [&list_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(owner_id) = owner_id else {
        return err(&req.id, "not_found", "list not found", None);
    };
    if owner_id != actor {
        return err(&req.id, "forbidden", "only the owner may edit a list", None);
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
    if let Some(v) = patch.get("lang") {
        if v.is_null() {
            set_parts.push("lang = ?".into());
            bind_values.push(Value::Null);
        } else if let Some(s) = v.as_str() {
            set_parts.push("lang = ?".into());
            bind_values.push(Value::Text(s.to_string()));
        } else {
            return err(&req.id, "bad_params", "patch.lang must be a string or null", None);
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

    let sql = format!("UPDATE lists SET {} WHERE id = ?", set_parts.join(", "));
    bind_values.push(Value::Text(list_id.clone()));

    let changed = match conn.execute(&sql, params_from_iter(bind_values)) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "db_update_failed",
                e.to_string(),
                Some(json!({ "table": "lists" })),
            )
        }
    };
    if changed == 0 {
        return err(&req.id, "not_found", "list not found", None);
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_lists_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let actor = match guard::require_actor(req) {
        Ok(a) => a,
        Err(e) => return e.response(&req.id),
    };
    let list_id = match req.params.get("list_id").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing list_id", None),
    };

    let row: Option<(String, Option<String>)> = match conn
        .query_row(
            "SELECT owner_id, class_id FROM lists WHERE id = ?",
            [&list_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((owner_id, class_id)) = row else {
        return err(&req.id, "not_found", "list not found", None);
    };
    if owner_id != actor {
        return err(&req.id, "forbidden", "only the owner may delete a list", None);
    }
    if class_id.is_some() {
        return err(
            &req.id,
            "assignment_copy",
            "list belongs to an assignment; delete the assignment instead",
            None,
        );
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // Cards first, list second (no ON DELETE CASCADE).
    if let Err(e) = tx.execute("DELETE FROM flashcards WHERE list_id = ?", [&list_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "flashcards" })),
        );
    }
    if let Err(e) = tx.execute("DELETE FROM lists WHERE id = ?", [&list_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "lists" })),
        );
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "lists.create" => Some(handle_lists_create(state, req)),
        "lists.list" => Some(handle_lists_list(state, req)),
        "lists.get" => Some(handle_lists_get(state, req)),
        "lists.update" => Some(handle_lists_update(state, req)),
        "lists.delete" => Some(handle_lists_delete(state, req)),
        _ => None,
    }
}
