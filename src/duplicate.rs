use rusqlite::{Connection, OptionalExtension};
use std::fmt;
use uuid::Uuid;

/// Prefix for copies that surface next to the teacher's own material in
/// listings. Applied to folder copies and standalone list copies; lists copied
/// inside a folder keep their title, the folder already carries the prefix.
pub const COPY_TITLE_PREFIX: &str = "[Atribuição] ";

/// Fatal duplication outcomes. Leaf-level failures never end up here; they are
/// collected as `CopyWarning`s on the success value instead.
#[derive(Debug)]
pub enum CopyError {
    SourceNotFound,
    CopyFailed(rusqlite::Error),
}

impl fmt::Display for CopyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CopyError::SourceNotFound => write!(f, "source not found"),
            CopyError::CopyFailed(e) => write!(f, "copy failed: {}", e),
        }
    }
}

#[derive(Debug)]
pub struct CopyWarning {
    pub table: &'static str,
    pub source_id: String,
    pub message: String,
}

impl fmt::Display for CopyWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.table, self.source_id, self.message)
    }
}

#[derive(Debug)]
pub struct ListCopy {
    pub list_id: String,
    pub cards_copied: usize,
    pub warnings: Vec<CopyWarning>,
}

#[derive(Debug)]
pub struct FolderCopy {
    pub folder_id: String,
    pub lists_copied: usize,
    pub cards_copied: usize,
    pub warnings: Vec<CopyWarning>,
}

struct SourceCard {
    id: String,
    term: String,
    translation: String,
    hint: Option<String>,
    audio_url: Option<String>,
    accepted_answers: Option<String>,
    sort_order: i64,
}

/// Copies a list into a teacher-owned, turma-tagged duplicate. Creating the
/// list row is fatal on failure; each card copies independently and a failed
/// card only costs a warning, so the returned copy can hold fewer cards than
/// the source held.
pub fn duplicate_list(
    conn: &Connection,
    source_list_id: &str,
    turma_id: &str,
    teacher_id: &str,
    dest_folder_id: Option<&str>,
) -> Result<ListCopy, CopyError> {
    let source: Option<(String, Option<String>, Option<String>)> = conn
        .query_row(
            "SELECT title, description, lang FROM lists WHERE id = ?",
            [source_list_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()
        .map_err(CopyError::CopyFailed)?;
    let Some((title, description, lang)) = source else {
        return Err(CopyError::SourceNotFound);
    };

    let title = if dest_folder_id.is_some() {
        title
    } else {
        format!("{}{}", COPY_TITLE_PREFIX, title)
    };

    let list_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO lists(
           id, folder_id, owner_id, title, description, lang,
           visibility, class_id, created_at, updated_at
         ) VALUES(?, ?, ?, ?, ?, ?, 'class', ?,
                  strftime('%Y-%m-%dT%H:%M:%SZ','now'),
                  strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
        (
            &list_id,
            dest_folder_id,
            teacher_id,
            &title,
            description.as_deref(),
            lang.as_deref(),
            turma_id,
        ),
    )
    .map_err(CopyError::CopyFailed)?;

    let mut warnings: Vec<CopyWarning> = Vec::new();
    let mut cards_copied = 0usize;

    let cards = match load_source_cards(conn, source_list_id) {
        Ok(v) => v,
        Err(e) => {
            warnings.push(CopyWarning {
                table: "flashcards",
                source_id: source_list_id.to_string(),
                message: e.to_string(),
            });
            Vec::new()
        }
    };

    // Only pedagogical content crosses over; ids, authorship and timestamps
    // are fresh on every copied card.
    for card in cards {
        let card_id = Uuid::new_v4().to_string();
        let inserted = conn.execute(
            "INSERT INTO flashcards(
               id, list_id, user_id, term, translation, hint, audio_url,
               accepted_answers, sort_order, created_at, updated_at
             ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?,
                      strftime('%Y-%m-%dT%H:%M:%SZ','now'),
                      strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
            (
                &card_id,
                &list_id,
                teacher_id,
                &card.term,
                &card.translation,
                card.hint.as_deref(),
                card.audio_url.as_deref(),
                card.accepted_answers.as_deref(),
                card.sort_order,
            ),
        );
        match inserted {
            Ok(_) => cards_copied += 1,
            Err(e) => warnings.push(CopyWarning {
                table: "flashcards",
                source_id: card.id,
                message: e.to_string(),
            }),
        }
    }

    Ok(ListCopy {
        list_id,
        cards_copied,
        warnings,
    })
}

/// Copies a folder and everything under it. The folder row is fatal on
/// failure; each child list then copies best-effort, so the returned copy can
/// hold fewer lists than the source did.
pub fn duplicate_folder(
    conn: &Connection,
    source_folder_id: &str,
    turma_id: &str,
    teacher_id: &str,
) -> Result<FolderCopy, CopyError> {
    let source: Option<(String, Option<String>)> = conn
        .query_row(
            "SELECT title, description FROM folders WHERE id = ?",
            [source_folder_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(CopyError::CopyFailed)?;
    let Some((title, description)) = source else {
        return Err(CopyError::SourceNotFound);
    };

    let folder_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO folders(
           id, owner_id, title, description, visibility, class_id,
           created_at, updated_at
         ) VALUES(?, ?, ?, ?, 'class', ?,
                  strftime('%Y-%m-%dT%H:%M:%SZ','now'),
                  strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
        (
            &folder_id,
            teacher_id,
            format!("{}{}", COPY_TITLE_PREFIX, title),
            description.as_deref(),
            turma_id,
        ),
    )
    .map_err(CopyError::CopyFailed)?;

    let mut warnings: Vec<CopyWarning> = Vec::new();
    let mut lists_copied = 0usize;
    let mut cards_copied = 0usize;

    let child_ids = match load_child_list_ids(conn, source_folder_id) {
        Ok(v) => v,
        Err(e) => {
            warnings.push(CopyWarning {
                table: "lists",
                source_id: source_folder_id.to_string(),
                message: e.to_string(),
            });
            Vec::new()
        }
    };

    for child_id in child_ids {
        match duplicate_list(conn, &child_id, turma_id, teacher_id, Some(&folder_id)) {
            Ok(copy) => {
                lists_copied += 1;
                cards_copied += copy.cards_copied;
                warnings.extend(copy.warnings);
            }
            Err(e) => warnings.push(CopyWarning {
                table: "lists",
                source_id: child_id,
                message: e.to_string(),
            }),
        }
    }

    Ok(FolderCopy {
        folder_id,
        lists_copied,
        cards_copied,
        warnings,
    })
}

fn load_source_cards(conn: &Connection, list_id: &str) -> rusqlite::Result<Vec<SourceCard>> {
    let mut stmt = conn.prepare(
        "SELECT id, term, translation, hint, audio_url, accepted_answers, sort_order
         FROM flashcards WHERE list_id = ? ORDER BY sort_order",
    )?;
    let rows = stmt.query_map([list_id], |row| {
        Ok(SourceCard {
            id: row.get(0)?,
            term: row.get(1)?,
            translation: row.get(2)?,
            hint: row.get(3)?,
            audio_url: row.get(4)?,
            accepted_answers: row.get(5)?,
            sort_order: row.get(6)?,
        })
    })?;
    rows.collect()
}

fn load_child_list_ids(conn: &Connection, folder_id: &str) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT id FROM lists WHERE folder_id = ? ORDER BY rowid")?;
    let rows = stmt.query_map([folder_id], |row| row.get::<_, String>(0))?;
    rows.collect()
}
