use rusqlite::{Connection, OptionalExtension};

use crate::ipc::error::HandlerErr;
use crate::ipc::types::Request;

/// Every mutating operation runs under a verified caller identity. The
/// transport is responsible for attaching it; a request without one is
/// malformed, not unauthorized.
pub fn require_actor(req: &Request) -> Result<&str, HandlerErr> {
    match req.actor.as_deref().map(str::trim) {
        Some(a) if !a.is_empty() => Ok(a),
        _ => Err(HandlerErr {
            code: "bad_params",
            message: "missing actor".to_string(),
            details: None,
        }),
    }
}

/// A missing turma and a foreign turma both come back `forbidden`: a caller
/// can never prove ownership of a turma that does not exist.
pub fn assert_turma_owner(
    conn: &Connection,
    turma_id: &str,
    actor: &str,
) -> Result<(), HandlerErr> {
    let owner: Option<String> = conn
        .query_row(
            "SELECT owner_teacher_id FROM turmas WHERE id = ?",
            [turma_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        })?;

    match owner {
        Some(owner) if owner == actor => Ok(()),
        _ => Err(HandlerErr {
            code: "forbidden",
            message: "caller is not the turma owner".to_string(),
            details: None,
        }),
    }
}

/// Read reach over a content row: the owner always, and for assignment copies
/// any active member of the tagging turma.
pub fn can_read_content(
    conn: &Connection,
    actor: &str,
    owner_id: &str,
    class_id: Option<&str>,
) -> Result<bool, HandlerErr> {
    if owner_id == actor {
        return Ok(true);
    }
    let Some(turma_id) = class_id else {
        return Ok(false);
    };
    conn.query_row(
        "SELECT 1 FROM turma_membros WHERE turma_id = ? AND user_id = ? AND ativo = 1",
        (turma_id, actor),
        |r| r.get::<_, i64>(0),
    )
    .optional()
    .map(|v| v.is_some())
    .map_err(|e| HandlerErr {
        code: "db_query_failed",
        message: e.to_string(),
        details: None,
    })
}
