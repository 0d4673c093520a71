use crate::cascade::{self, Atribuicao};
use crate::duplicate::{self, CopyError};
use crate::ipc::error::{err, ok};
use crate::ipc::guard;
use crate::ipc::types::{AppState, Request};
use chrono::NaiveDate;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, OptionalExtension, Row};
use serde_json::json;
use uuid::Uuid;

const ATRIBUICAO_COLS: &str =
    "id, turma_id, titulo, descricao, fonte_tipo, fonte_id, data_limite, pontos_vale, created_at";

fn atribuicao_json(row: &Row) -> rusqlite::Result<serde_json::Value> {
    let id: String = row.get(0)?;
    let turma_id: String = row.get(1)?;
    let titulo: String = row.get(2)?;
    let descricao: Option<String> = row.get(3)?;
    let fonte_tipo: String = row.get(4)?;
    let fonte_id: String = row.get(5)?;
    let data_limite: Option<String> = row.get(6)?;
    let pontos_vale: Option<i64> = row.get(7)?;
    let created_at: Option<String> = row.get(8)?;
    Ok(json!({
        "id": id,
        "turma_id": turma_id,
        "titulo": titulo,
        "descricao": descricao,
        "fonte_tipo": fonte_tipo,
        "fonte_id": fonte_id,
        "data_limite": data_limite,
        "pontos_vale": pontos_vale,
        "created_at": created_at
    }))
}

fn status_json(row: &Row) -> rusqlite::Result<serde_json::Value> {
    let atribuicao_id: String = row.get(0)?;
    let aluno_id: String = row.get(1)?;
    let status: String = row.get(2)?;
    let progresso: i64 = row.get(3)?;
    let updated_at: Option<String> = row.get(4)?;
    Ok(json!({
        "atribuicao_id": atribuicao_id,
        "aluno_id": aluno_id,
        "status": status,
        "progresso": progresso,
        "updated_at": updated_at
    }))
}

fn handle_assignment_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let actor = match guard::require_actor(req) {
        Ok(a) => a,
        Err(e) => return e.response(&req.id),
    };
    let turma_id = match req.params.get("turma_id").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing turma_id", None),
    };
    // Ownership is settled before the rest of the params are even looked at.
    if let Err(e) = guard::assert_turma_owner(conn, &turma_id, actor) {
        return e.response(&req.id);
    }

    let titulo = match req.params.get("titulo").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing titulo", None),
    };
    if titulo.is_empty() {
        return err(&req.id, "bad_params", "titulo must not be empty", None);
    }
    let descricao = req
        .params
        .get("descricao")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());
    let fonte_tipo = match req.params.get("fonte_tipo").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing fonte_tipo", None),
    };
    if fonte_tipo != "lista" && fonte_tipo != "pasta" {
        return err(
            &req.id,
            "bad_params",
            "fonte_tipo must be 'lista' or 'pasta'",
            None,
        );
    }
    let fonte_id = match req.params.get("fonte_id").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing fonte_id", None),
    };
    let data_limite = match req.params.get("data_limite") {
        None => None,
        Some(v) if v.is_null() => None,
        Some(v) => {
            let Some(s) = v.as_str() else {
                return err(&req.id, "bad_params", "data_limite must be a string", None);
            };
            if NaiveDate::parse_from_str(s, "%Y-%m-%d").is_err() {
                return err(
                    &req.id,
                    "bad_params",
                    "data_limite must be YYYY-MM-DD",
                    Some(json!({ "value": s })),
                );
            }
            Some(s.to_string())
        }
    };
    let pontos_vale = match req.params.get("pontos_vale") {
        None => None,
        Some(v) if v.is_null() => None,
        // The storage column is i64; u64 values past its range do not fit.
        Some(v) => match v.as_u64().and_then(|n| i64::try_from(n).ok()) {
            Some(n) => Some(n),
            None => {
                return err(
                    &req.id,
                    "bad_params",
                    "pontos_vale must be a non-negative integer",
                    None,
                )
            }
        },
    };

    let source_table = if fonte_tipo == "lista" { "lists" } else { "folders" };
    let source_owner: Option<String> = match conn
        .query_row(
            &format!("SELECT owner_id FROM {} WHERE id = ?", source_table),
            [&fonte_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    match source_owner {
        None => return err(&req.id, "not_found", "source content not found", None),
        Some(o) if o != actor => {
            return err(
                &req.id,
                "forbidden",
                "source content belongs to another user",
                None,
            )
        }
        Some(_) => {}
    }

    // Copy, registry row and fan-out either all land or none do.
    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    let copied = if fonte_tipo == "lista" {
        duplicate::duplicate_list(&tx, &fonte_id, &turma_id, actor, None)
            .map(|c| (c.list_id, c.warnings))
    } else {
        duplicate::duplicate_folder(&tx, &fonte_id, &turma_id, actor)
            .map(|c| (c.folder_id, c.warnings))
    };
    let (copy_id, warnings) = match copied {
        Ok(v) => v,
        Err(CopyError::SourceNotFound) => {
            let _ = tx.rollback();
            return err(&req.id, "not_found", "source content not found", None);
        }
        Err(CopyError::CopyFailed(e)) => {
            let _ = tx.rollback();
            log::error!("assignment.create: copy of {} {} failed: {e}", fonte_tipo, fonte_id);
            return err(&req.id, "copy_failed", e.to_string(), None);
        }
    };

    let atribuicao_id = Uuid::new_v4().to_string();
    if let Err(e) = tx.execute(
        "INSERT INTO atribuicoes(id, turma_id, titulo, descricao, fonte_tipo, fonte_id, data_limite, pontos_vale, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
        (
            &atribuicao_id,
            &turma_id,
            &titulo,
            descricao.as_deref(),
            &fonte_tipo,
            &copy_id,
            data_limite.as_deref(),
            pontos_vale,
        ),
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "atribuicoes" })),
        );
    }

    // Fan-out against the roster as it stands right now. Later membership
    // changes do not touch these rows.
    let members: Result<Vec<String>, rusqlite::Error> = tx
        .prepare(
            "SELECT user_id FROM turma_membros
             WHERE turma_id = ? AND ativo = 1 ORDER BY user_id",
        )
        .and_then(|mut stmt| {
            stmt.query_map([&turma_id], |r| r.get(0))?
                .collect::<Result<Vec<_>, _>>()
        });
    let members = match members {
        Ok(v) => v,
        Err(e) => {
            let _ = tx.rollback();
            return err(&req.id, "db_query_failed", e.to_string(), None);
        }
    };
    for aluno_id in &members {
        if let Err(e) = tx.execute(
            "INSERT INTO atribuicao_statuses(atribuicao_id, aluno_id, status, progresso, updated_at)
             VALUES(?, ?, 'pendente', 0, strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
            (&atribuicao_id, aluno_id),
        ) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "atribuicao_statuses", "aluno_id": aluno_id })),
            );
        }
    }

    let atribuicao = match tx.query_row(
        &format!("SELECT {} FROM atribuicoes WHERE id = ?", ATRIBUICAO_COLS),
        [&atribuicao_id],
        atribuicao_json,
    ) {
        Ok(v) => v,
        Err(e) => {
            let _ = tx.rollback();
            return err(&req.id, "db_query_failed", e.to_string(), None);
        }
    };

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    for w in &warnings {
        log::warn!("assignment.create: partial copy: {}", w);
    }
    log::info!(
        "assignment.create: {} -> turma {} ({} statuses)",
        atribuicao_id,
        turma_id,
        members.len()
    );

    ok(&req.id, json!({ "atribuicao": atribuicao }))
}

fn handle_assignment_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let actor = match guard::require_actor(req) {
        Ok(a) => a,
        Err(e) => return e.response(&req.id),
    };
    let atribuicao_id = match req.params.get("atribuicao_id").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing atribuicao_id", None),
    };

    let assignment: Option<Atribuicao> = match conn
        .query_row(
            "SELECT id, turma_id, fonte_tipo, fonte_id FROM atribuicoes WHERE id = ?",
            [&atribuicao_id],
            |r| {
                Ok(Atribuicao {
                    id: r.get(0)?,
                    turma_id: r.get(1)?,
                    fonte_tipo: r.get(2)?,
                    fonte_id: r.get(3)?,
                })
            },
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    // Already gone counts as deleted; racing/repeated deletes must not fail.
    let Some(assignment) = assignment else {
        return ok(&req.id, json!({ "success": true }));
    };

    if let Err(e) = guard::assert_turma_owner(conn, &assignment.turma_id, actor) {
        return e.response(&req.id);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    let report = cascade::delete_assignment_content(&tx, &assignment);
    for w in &report.warnings {
        log::warn!("assignment.delete: {}: {}", assignment.id, w);
    }
    if report.lists_detached > 0 {
        log::warn!(
            "assignment.delete: {}: detached {} foreign list(s) from the copy folder",
            assignment.id,
            report.lists_detached
        );
    }
    if let Err(e) = tx.execute("DELETE FROM atribuicoes WHERE id = ?", [&assignment.id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "atribuicoes" })),
        );
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    log::info!(
        "assignment.delete: {} (statuses {}, cards {}, lists {}, folders {})",
        assignment.id,
        report.statuses_deleted,
        report.cards_deleted,
        report.lists_deleted,
        report.folders_deleted
    );

    ok(&req.id, json!({ "success": true }))
}

fn handle_assignment_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let actor = match guard::require_actor(req) {
        Ok(a) => a,
        Err(e) => return e.response(&req.id),
    };
    let turma_id = match req.params.get("turma_id").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing turma_id", None),
    };

    let owner: Option<String> = match conn
        .query_row(
            "SELECT owner_teacher_id FROM turmas WHERE id = ?",
            [&turma_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(owner) = owner else {
        return err(&req.id, "not_found", "turma not found", None);
    };
    if owner != actor {
        let is_member: Option<i64> = match conn
            .query_row(
                "SELECT 1 FROM turma_membros WHERE turma_id = ? AND user_id = ? AND ativo = 1",
                (&turma_id, actor),
                |r| r.get(0),
            )
            .optional()
        {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        if is_member.is_none() {
            return err(&req.id, "forbidden", "no access to this turma", None);
        }
    }

    let mut stmt = match conn.prepare(&format!(
        "SELECT {} FROM atribuicoes WHERE turma_id = ? ORDER BY created_at DESC, id",
        ATRIBUICAO_COLS
    )) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&turma_id], atribuicao_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(atribuicoes) => ok(&req.id, json!({ "atribuicoes": atribuicoes })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_statuses_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let actor = match guard::require_actor(req) {
        Ok(a) => a,
        Err(e) => return e.response(&req.id),
    };
    let atribuicao_id = match req.params.get("atribuicao_id").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing atribuicao_id", None),
    };

    let turma_id: Option<String> = match conn
        .query_row(
            "SELECT turma_id FROM atribuicoes WHERE id = ?",
            [&atribuicao_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(turma_id) = turma_id else {
        return err(&req.id, "not_found", "assignment not found", None);
    };
    if let Err(e) = guard::assert_turma_owner(conn, &turma_id, actor) {
        return e.response(&req.id);
    }

    let mut stmt = match conn.prepare(
        "SELECT atribuicao_id, aluno_id, status, progresso, updated_at
         FROM atribuicao_statuses WHERE atribuicao_id = ?
         ORDER BY aluno_id",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&atribuicao_id], status_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(statuses) => ok(&req.id, json!({ "statuses": statuses })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_status_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let actor = match guard::require_actor(req) {
        Ok(a) => a,
        Err(e) => return e.response(&req.id),
    };
    let atribuicao_id = match req.params.get("atribuicao_id").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing atribuicao_id", None),
    };
    // Students only ever write their own row.
    if let Some(aluno) = req.params.get("aluno_id").and_then(|v| v.as_str()) {
        if aluno != actor {
            return err(
                &req.id,
                "forbidden",
                "status updates are limited to the acting student",
                None,
            );
        }
    }

    let mut set_parts: Vec<String> = Vec::new();
    let mut bind_values: Vec<Value> = Vec::new();

    if let Some(v) = req.params.get("status") {
        let Some(s) = v.as_str() else {
            return err(&req.id, "bad_params", "status must be a string", None);
        };
        match s {
            "pendente" | "em_andamento" | "concluida" => {}
            _ => {
                return err(
                    &req.id,
                    "bad_params",
                    "status must be pendente, em_andamento or concluida",
                    None,
                )
            }
        }
        set_parts.push("status = ?".into());
        bind_values.push(Value::Text(s.to_string()));
    }
    if let Some(v) = req.params.get("progresso") {
        let Some(n) = v.as_u64() else {
            return err(
                &req.id,
                "bad_params",
                "progresso must be an integer in 0..=100",
                None,
            );
        };
        if n > 100 {
            return err(
                &req.id,
                "bad_params",
                "progresso must be an integer in 0..=100",
                None,
            );
        }
        set_parts.push("progresso = ?".into());
        bind_values.push(Value::Integer(n as i64));
    }

    if set_parts.is_empty() {
        return err(
            &req.id,
            "bad_params",
            "provide status and/or progresso",
            None,
        );
    }
    set_parts.push("updated_at = strftime('%Y-%m-%dT%H:%M:%SZ','now')".into());

    let sql = format!(
        "UPDATE atribuicao_statuses SET {} WHERE atribuicao_id = ? AND aluno_id = ?",
        set_parts.join(", ")
    );
    bind_values.push(Value::Text(atribuicao_id.clone()));
    bind_values.push(Value::Text(actor.to_string()));

    let changed = match conn.execute(&sql, params_from_iter(bind_values)) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "db_update_failed",
                e.to_string(),
                Some(json!({ "table": "atribuicao_statuses" })),
            )
        }
    };
    if changed == 0 {
        return err(&req.id, "not_found", "no status row for this student", None);
    }

    let status = conn.query_row(
        "SELECT atribuicao_id, aluno_id, status, progresso, updated_at
         FROM atribuicao_statuses WHERE atribuicao_id = ? AND aluno_id = ?",
        (&atribuicao_id, actor),
        status_json,
    );
    match status {
        Ok(status) => ok(&req.id, json!({ "status": status })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "assignment.create" => Some(handle_assignment_create(state, req)),
        "assignment.delete" => Some(handle_assignment_delete(state, req)),
        "assignment.list" => Some(handle_assignment_list(state, req)),
        "assignment.statuses.list" => Some(handle_statuses_list(state, req)),
        "assignment.status.update" => Some(handle_status_update(state, req)),
        _ => None,
    }
}
