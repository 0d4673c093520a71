use rusqlite::Connection;
use std::fmt;

/// The assignment row, as loaded by the caller before tearing it down.
pub struct Atribuicao {
    pub id: String,
    pub turma_id: String,
    pub fonte_tipo: String,
    pub fonte_id: String,
}

pub struct CascadeWarning {
    pub table: &'static str,
    pub message: String,
}

impl fmt::Display for CascadeWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.table, self.message)
    }
}

#[derive(Default)]
pub struct CascadeReport {
    pub statuses_deleted: usize,
    pub cards_deleted: usize,
    pub lists_deleted: usize,
    pub lists_detached: usize,
    pub folders_deleted: usize,
    pub warnings: Vec<CascadeWarning>,
}

/// Removes the status fan-out and the copied content for one assignment, in
/// dependency order. Every content delete is scoped `class_id = turma_id`, so
/// the controller can only ever remove rows the engine itself created; rows
/// that already vanished count zero and the sweep continues. Step failures
/// become warnings, never errors; the one delete whose failure must reach
/// the caller, the atribuicao row itself, stays with the caller.
pub fn delete_assignment_content(conn: &Connection, atribuicao: &Atribuicao) -> CascadeReport {
    let mut report = CascadeReport::default();

    match conn.execute(
        "DELETE FROM atribuicao_statuses WHERE atribuicao_id = ?",
        [&atribuicao.id],
    ) {
        Ok(n) => report.statuses_deleted = n,
        Err(e) => report.warnings.push(CascadeWarning {
            table: "atribuicao_statuses",
            message: e.to_string(),
        }),
    }

    match atribuicao.fonte_tipo.as_str() {
        "lista" => {
            delete_list_copy(conn, &atribuicao.fonte_id, &atribuicao.turma_id, &mut report);
        }
        "pasta" => {
            let child_ids: rusqlite::Result<Vec<String>> = conn
                .prepare("SELECT id FROM lists WHERE folder_id = ? AND class_id = ?")
                .and_then(|mut stmt| {
                    stmt.query_map((&atribuicao.fonte_id, &atribuicao.turma_id), |r| {
                        r.get::<_, String>(0)
                    })?
                    .collect()
                });
            match child_ids {
                Ok(ids) => {
                    for list_id in ids {
                        delete_list_copy(conn, &list_id, &atribuicao.turma_id, &mut report);
                    }
                }
                Err(e) => report.warnings.push(CascadeWarning {
                    table: "lists",
                    message: e.to_string(),
                }),
            }

            // Anything still attached at this point is not ours to delete,
            // but it would block the folder row (lists.folder_id is a
            // foreign key). Lists may stand alone, so cut them loose. The
            // subselect keeps untagged folders out of reach.
            match conn.execute(
                "UPDATE lists SET folder_id = NULL
                 WHERE folder_id IN (SELECT id FROM folders WHERE id = ? AND class_id = ?)",
                (&atribuicao.fonte_id, &atribuicao.turma_id),
            ) {
                Ok(n) => report.lists_detached = n,
                Err(e) => report.warnings.push(CascadeWarning {
                    table: "lists",
                    message: e.to_string(),
                }),
            }

            match conn.execute(
                "DELETE FROM folders WHERE id = ? AND class_id = ?",
                (&atribuicao.fonte_id, &atribuicao.turma_id),
            ) {
                Ok(n) => report.folders_deleted += n,
                Err(e) => report.warnings.push(CascadeWarning {
                    table: "folders",
                    message: e.to_string(),
                }),
            }
        }
        other => report.warnings.push(CascadeWarning {
            table: "atribuicoes",
            message: format!("unknown fonte_tipo: {}", other),
        }),
    }

    report
}

fn delete_list_copy(conn: &Connection, list_id: &str, turma_id: &str, report: &mut CascadeReport) {
    // Cards first, list second. The subselect keeps the card delete scoped to
    // the tagged copy even when the stored fonte_id points at a stray row.
    match conn.execute(
        "DELETE FROM flashcards
         WHERE list_id IN (SELECT id FROM lists WHERE id = ? AND class_id = ?)",
        (list_id, turma_id),
    ) {
        Ok(n) => report.cards_deleted += n,
        Err(e) => report.warnings.push(CascadeWarning {
            table: "flashcards",
            message: e.to_string(),
        }),
    }
    match conn.execute(
        "DELETE FROM lists WHERE id = ? AND class_id = ?",
        (list_id, turma_id),
    ) {
        Ok(n) => report.lists_deleted += n,
        Err(e) => report.warnings.push(CascadeWarning {
            table: "lists",
            message: e.to_string(),
        }),
    }
}
