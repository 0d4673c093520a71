use crate::ipc::error::{err, ok};
use crate::ipc::guard;
use crate::ipc::types::{AppState, Request};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, OptionalExtension, Row};
use serde_json::json;
use uuid::Uuid;

pub(super) const CARD_COLS: &str =
    "id, list_id, user_id, term, translation, hint, audio_url, accepted_answers, sort_order, created_at, updated_at";

pub(super) fn card_json(row: &Row) -> rusqlite::Result<serde_json::Value> {
    let id: String = row.get(0)?;
    let list_id: String = row.get(1)?;
    let user_id: String = row.get(2)?;
    let term: String = row.get(3)?;
    let translation: String = row.get(4)?;
    let hint: Option<String> = row.get(5)?;
    let audio_url: Option<String> = row.get(6)?;
    let accepted_answers: Option<String> = row.get(7)?;
    let sort_order: i64 = row.get(8)?;
    let created_at: Option<String> = row.get(9)?;
    let updated_at: Option<String> = row.get(10)?;
    Ok(json!({
        "id": id,
        "list_id": list_id,
        "user_id": user_id,
        "term": term,
        "translation": translation,
        "hint": hint,
        "audio_url": audio_url,
        "accepted_answers": accepted_answers,
        "sort_order": sort_order,
        "created_at": created_at,
        "updated_at": updated_at
    }))
}

/// Owner of the card's parent list, or None if the card does not exist.
fn card_list_owner(
    conn: &rusqlite::Connection,
    card_id: &str,
) -> rusqlite::Result<Option<(String, String, i64)>> {
    conn.query_row(
        "SELECT f.list_id, l.owner_id, f.sort_order
         FROM flashcards f JOIN lists l ON l.id = f.list_id
         WHERE f.id = ?",
        [card_id],
        |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
    )
    .optional()
}

fn handle_cards_create(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    let owner: Option<String> = match conn
        .query_row("SELECT owner_id FROM lists WHERE id = ?", [&list_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    match owner {
        None => return err(&req.id, "not_found", "list not found", None),
        Some(o) if o != actor => {
            return err(&req.id, "forbidden", "list belongs to another user", None)
        }
        Some(_) => {}
    }

    let term = match req.params.get("term").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing term", None),
    };
    let translation = match req.params.get("translation").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing translation", None),
    };
    if term.is_empty() || translation.is_empty() {
        return err(
            &req.id,
            "bad_params",
            "term and translation must not be empty",
            None,
        );
    }
    let hint = req.params.get("hint").and_then(|v| v.as_str()).map(|s| s.to_string());
    let audio_url = req
        .params
        .get("audio_url")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());
    let accepted_answers = req
        .params
        .get("accepted_answers")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let card_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO flashcards(id, list_id, user_id, term, translation, hint, audio_url, accepted_answers, sort_order, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?,
                (SELECT COALESCE(MAX(sort_order), -1) + 1 FROM flashcards WHERE list_id = ?),
                strftime('%Y-%m-%dT%H:%M:%SZ','now'),
                strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
        (
            &card_id,
            &list_id,
            actor,
            &term,
            &translation,
            hint.as_deref(),
            audio_url.as_deref(),
            accepted_answers.as_deref(),
            &list_id,
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "flashcards" })),
        );
    }

    let card = conn.query_row(
        &format!("SELECT {} FROM flashcards WHERE id = ?", CARD_COLS),
        [&card_id],
        card_json,
    );
    match card {
        Ok(card) => ok(&req.id, json!({ "card": card })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_cards_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let actor = match guard::require_actor(req) {
        Ok(a) => a,
        Err(e) => return e.response(&req.id),
    };
    let card_id = match req.params.get("card_id").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing card_id", None),
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "missing/invalid patch", None);
    };

    let located = match card_list_owner(conn, &card_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((_, owner_id, _)) = located else {
        return err(&req.id, "not_found", "card not found", None);
    };
    if owner_id != actor {
        return err(
            &req.id,
            "forbidden",
            "card belongs to another user's list",
            None,
        );
    }

    let mut set_parts: Vec<String> = Vec::new();
    let mut bind_values: Vec<Value> = Vec::new();

    for field in ["term", "translation"] {
        if let Some(v) = patch.get(field) {
            let Some(s) = v.as_str() else {
                return err(
                    &req.id,
                    "bad_params",
                    format!("patch.{} must be a string", field),
                    None,
                );
            };
            let s = s.trim().to_string();
            if s.is_empty() {
                return err(
                    &req.id,
                    "bad_params",
                    format!("{} must not be empty", field),
                    None,
                );
            }
            set_parts.push(format!("{} = ?", field));
            bind_values.push(Value::Text(s));
        }
    }
    for field in ["hint", "audio_url", "accepted_answers"] {
        if let Some(v) = patch.get(field) {
            if v.is_null() {
                set_parts.push(format!("{} = ?", field));
                bind_values.push(Value::Null);
            } else if let Some(s) = v.as_str() {
                set_parts.push(format!("{} = ?", field));
                bind_values.push(Value::Text(s.to_string()));
            } else {
                return err(
                    &req.id,
                    "bad_params",
                    format!("patch.{} must be a string or null", field),
                    None,
                );
            }
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

    let sql = format!("UPDATE flashcards SET {} WHERE id = ?", set_parts.join(", "));
    bind_values.push(Value::Text(card_id.clone()));

    if let Err(e) = conn.execute(&sql, params_from_iter(bind_values)) {
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "flashcards" })),
        );
    }

    let card = conn.query_row(
        &format!("SELECT {} FROM flashcards WHERE id = ?", CARD_COLS),
        [&card_id],
        card_json,
    );
    match card {
        Ok(card) => ok(&req.id, json!({ "card": card })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_cards_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let actor = match guard::require_actor(req) {
        Ok(a) => a,
        Err(e) => return e.response(&req.id),
    };
    let card_id = match req.params.get("card_id").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing card_id", None),
    };

    let located = match card_list_owner(conn, &card_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((list_id, owner_id, sort_order)) = located else {
        return err(&req.id, "not_found", "card not found", None);
    };
    if owner_id != actor {
        return err(
            &req.id,
            "forbidden",
            "card belongs to another user's list",
            None,
        );
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    if let Err(e) = tx.execute("DELETE FROM flashcards WHERE id = ?", [&card_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "flashcards" })),
        );
    }
    // Keep sort_order dense so copies replay positions faithfully.
    if let Err(e) = tx.execute(
        "UPDATE flashcards SET sort_order = sort_order - 1 WHERE list_id = ? AND sort_order > ?",
        (&list_id, sort_order),
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "flashcards" })),
        );
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "cards.create" => Some(handle_cards_create(state, req)),
        "cards.update" => Some(handle_cards_update(state, req)),
        "cards.delete" => Some(handle_cards_delete(state, req)),
        _ => None,
    }
}
