use crate::cascade::{self, Atribuicao};
use crate::ipc::error::{err, ok};
use crate::ipc::guard;
use crate::ipc::types::{AppState, Request};
use rusqlite::Row;
use serde_json::json;
use uuid::Uuid;

const TURMA_COLS: &str = "id, nome, descricao, owner_teacher_id, created_at";

fn turma_json(row: &Row) -> rusqlite::Result<serde_json::Value> {
    let id: String = row.get(0)?;
    let nome: String = row.get(1)?;
    let descricao: Option<String> = row.get(2)?;
    let owner_teacher_id: String = row.get(3)?;
    let created_at: Option<String> = row.get(4)?;
    Ok(json!({
        "id": id,
        "nome": nome,
        "descricao": descricao,
        "owner_teacher_id": owner_teacher_id,
        "created_at": created_at
    }))
}

fn member_json(row: &Row) -> rusqlite::Result<serde_json::Value> {
    let turma_id: String = row.get(0)?;
    let user_id: String = row.get(1)?;
    let role: String = row.get(2)?;
    let ativo: i64 = row.get(3)?;
    let joined_at: Option<String> = row.get(4)?;
    Ok(json!({
        "turma_id": turma_id,
        "user_id": user_id,
        "role": role,
        "ativo": ativo != 0,
        "joined_at": joined_at
    }))
}

fn handle_turmas_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let actor = match guard::require_actor(req) {
        Ok(a) => a,
        Err(e) => return e.response(&req.id),
    };
    let nome = match req.params.get("nome").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing nome", None),
    };
    if nome.is_empty() {
        return err(&req.id, "bad_params", "nome must not be empty", None);
    }
    let descricao = req
        .params
        .get("descricao")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let turma_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO turmas(id, nome, descricao, owner_teacher_id, created_at)
         VALUES(?, ?, ?, ?, strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
        (&turma_id, &nome, descricao.as_deref(), actor),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "turmas" })),
        );
    }

    let turma = conn.query_row(
        &format!("SELECT {} FROM turmas WHERE id = ?", TURMA_COLS),
        [&turma_id],
        turma_json,
    );
    match turma {
        Ok(turma) => ok(&req.id, json!({ "turma": turma })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_turmas_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let actor = match guard::require_actor(req) {
        Ok(a) => a,
        Err(e) => return e.response(&req.id),
    };

    let mut stmt = match conn.prepare(
        "SELECT t.id, t.nome, t.descricao, t.owner_teacher_id, t.created_at,
                (SELECT COUNT(*) FROM turma_membros m
                 WHERE m.turma_id = t.id AND m.ativo = 1) AS member_count,
                (SELECT COUNT(*) FROM atribuicoes a
                 WHERE a.turma_id = t.id) AS assignment_count
         FROM turmas t
         WHERE t.owner_teacher_id = ?
         ORDER BY t.nome",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([actor], |row| {
            let mut turma = turma_json(row)?;
            let member_count: i64 = row.get(5)?;
            let assignment_count: i64 = row.get(6)?;
            turma["member_count"] = json!(member_count);
            turma["assignment_count"] = json!(assignment_count);
            Ok(turma)
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(turmas) => ok(&req.id, json!({ "turmas": turmas })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_turmas_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    if let Err(e) = guard::assert_turma_owner(conn, &turma_id, actor) {
        return e.response(&req.id);
    }

    // Collect the turma's assignments up front; each one drags its copied
    // content with it.
    let assignments: Result<Vec<Atribuicao>, rusqlite::Error> = conn
        .prepare("SELECT id, turma_id, fonte_tipo, fonte_id FROM atribuicoes WHERE turma_id = ?")
        .and_then(|mut stmt| {
            stmt.query_map([&turma_id], |r| {
                Ok(Atribuicao {
                    id: r.get(0)?,
                    turma_id: r.get(1)?,
                    fonte_tipo: r.get(2)?,
                    fonte_id: r.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()
        });
    let assignments = match assignments {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    for a in &assignments {
        let report = cascade::delete_assignment_content(&tx, a);
        for w in &report.warnings {
            log::warn!("turmas.delete: assignment {}: {}", a.id, w);
        }
        if report.lists_detached > 0 {
            log::warn!(
                "turmas.delete: assignment {}: detached {} foreign list(s) from the copy folder",
                a.id,
                report.lists_detached
            );
        }
        if let Err(e) = tx.execute("DELETE FROM atribuicoes WHERE id = ?", [&a.id]) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": "atribuicoes", "atribuicao_id": a.id })),
            );
        }
    }
    if let Err(e) = tx.execute("DELETE FROM turma_membros WHERE turma_id = ?", [&turma_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "turma_membros" })),
        );
    }
    if let Err(e) = tx.execute("DELETE FROM turmas WHERE id = ?", [&turma_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "turmas" })),
        );
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "success": true }))
}

fn handle_members_add(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    if let Err(e) = guard::assert_turma_owner(conn, &turma_id, actor) {
        return e.response(&req.id);
    }
    let user_id = match req.params.get("user_id").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing user_id", None),
    };
    let role = req
        .params
        .get("role")
        .and_then(|v| v.as_str())
        .unwrap_or("aluno")
        .to_string();

    // Re-adding a removed-then-returning member flips them back to active.
    if let Err(e) = conn.execute(
        "INSERT INTO turma_membros(turma_id, user_id, role, ativo, joined_at)
         VALUES(?, ?, ?, 1, strftime('%Y-%m-%dT%H:%M:%SZ','now'))
         ON CONFLICT(turma_id, user_id) DO UPDATE SET ativo = 1, role = excluded.role",
        (&turma_id, &user_id, &role),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "turma_membros" })),
        );
    }

    let member = conn.query_row(
        "SELECT turma_id, user_id, role, ativo, joined_at
         FROM turma_membros WHERE turma_id = ? AND user_id = ?",
        (&turma_id, &user_id),
        member_json,
    );
    match member {
        Ok(member) => ok(&req.id, json!({ "member": member })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_members_list(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    if let Err(e) = guard::assert_turma_owner(conn, &turma_id, actor) {
        return e.response(&req.id);
    }

    let mut stmt = match conn.prepare(
        "SELECT turma_id, user_id, role, ativo, joined_at
         FROM turma_membros WHERE turma_id = ?
         ORDER BY joined_at, user_id",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&turma_id], member_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(members) => ok(&req.id, json!({ "members": members })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_members_set_active(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    if let Err(e) = guard::assert_turma_owner(conn, &turma_id, actor) {
        return e.response(&req.id);
    }
    let user_id = match req.params.get("user_id").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing user_id", None),
    };
    let Some(ativo) = req.params.get("ativo").and_then(|v| v.as_bool()) else {
        return err(&req.id, "bad_params", "missing/invalid ativo", None);
    };

    // Existing statuses stay put; only future fan-outs see the change.
    let changed = match conn.execute(
        "UPDATE turma_membros SET ativo = ? WHERE turma_id = ? AND user_id = ?",
        (ativo as i64, &turma_id, &user_id),
    ) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "db_update_failed",
                e.to_string(),
                Some(json!({ "table": "turma_membros" })),
            )
        }
    };
    if changed == 0 {
        return err(&req.id, "not_found", "membership not found", None);
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_members_remove(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    if let Err(e) = guard::assert_turma_owner(conn, &turma_id, actor) {
        return e.response(&req.id);
    }
    let user_id = match req.params.get("user_id").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing user_id", None),
    };

    // Their status rows survive removal; past work stays on the dashboard.
    let changed = match conn.execute(
        "DELETE FROM turma_membros WHERE turma_id = ? AND user_id = ?",
        (&turma_id, &user_id),
    ) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": "turma_membros" })),
            )
        }
    };
    if changed == 0 {
        return err(&req.id, "not_found", "membership not found", None);
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "turmas.create" => Some(handle_turmas_create(state, req)),
        "turmas.list" => Some(handle_turmas_list(state, req)),
        "turmas.delete" => Some(handle_turmas_delete(state, req)),
        "turmas.members.add" => Some(handle_members_add(state, req)),
        "turmas.members.list" => Some(handle_members_list(state, req)),
        "turmas.members.set_active" => Some(handle_members_set_active(state, req)),
        "turmas.members.remove" => Some(handle_members_remove(state, req)),
        _ => None,
    }
}
