use rusqlite::Connection;
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("fichas.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS turmas(
            id TEXT PRIMARY KEY,
            owner_teacher_id TEXT NOT NULL,
            nome TEXT NOT NULL,
            descricao TEXT,
            created_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_turmas_owner ON turmas(owner_teacher_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS turma_membros(
            turma_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            ativo INTEGER NOT NULL DEFAULT 1,
            role TEXT NOT NULL DEFAULT 'aluno',
            joined_at TEXT,
            PRIMARY KEY(turma_id, user_id),
            FOREIGN KEY(turma_id) REFERENCES turmas(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_turma_membros_user ON turma_membros(user_id)",
        [],
    )?;

    // class_id non-null marks a row as an assignment copy; authoring never sets it.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS folders(
            id TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL,
            title TEXT NOT NULL,
            description TEXT,
            visibility TEXT NOT NULL DEFAULT 'private',
            class_id TEXT,
            created_at TEXT,
            updated_at TEXT,
            FOREIGN KEY(class_id) REFERENCES turmas(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_folders_owner ON folders(owner_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_folders_class ON folders(class_id)",
        [],
    )?;

    // folder_id is nullable: a list may stand alone.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS lists(
            id TEXT PRIMARY KEY,
            folder_id TEXT,
            owner_id TEXT NOT NULL,
            title TEXT NOT NULL,
            description TEXT,
            lang TEXT,
            visibility TEXT NOT NULL DEFAULT 'private',
            class_id TEXT,
            created_at TEXT,
            updated_at TEXT,
            FOREIGN KEY(folder_id) REFERENCES folders(id),
            FOREIGN KEY(class_id) REFERENCES turmas(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_lists_folder ON lists(folder_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_lists_owner ON lists(owner_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_lists_class ON lists(class_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS flashcards(
            id TEXT PRIMARY KEY,
            list_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            term TEXT NOT NULL,
            translation TEXT NOT NULL,
            hint TEXT,
            audio_url TEXT,
            accepted_answers TEXT,
            sort_order INTEGER NOT NULL,
            created_at TEXT,
            updated_at TEXT,
            FOREIGN KEY(list_id) REFERENCES lists(id)
        )",
        [],
    )?;
    // Workspaces from before the text-to-speech integration lack audio_url.
    ensure_flashcards_audio_url(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_flashcards_list ON flashcards(list_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_flashcards_list_sort ON flashcards(list_id, sort_order)",
        [],
    )?;

    // fonte_id is polymorphic over folders/lists, so no FK; the registry only
    // ever stores the id of a copy (class_id = turma_id), never the original.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS atribuicoes(
            id TEXT PRIMARY KEY,
            turma_id TEXT NOT NULL,
            titulo TEXT NOT NULL,
            descricao TEXT,
            fonte_tipo TEXT NOT NULL,
            fonte_id TEXT NOT NULL,
            data_limite TEXT,
            pontos_vale INTEGER,
            created_at TEXT,
            FOREIGN KEY(turma_id) REFERENCES turmas(id)
        )",
        [],
    )?;
    // Workspaces from before the store/points layer lack pontos_vale.
    ensure_atribuicoes_pontos_vale(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_atribuicoes_turma ON atribuicoes(turma_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS atribuicao_statuses(
            atribuicao_id TEXT NOT NULL,
            aluno_id TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pendente',
            progresso INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT,
            PRIMARY KEY(atribuicao_id, aluno_id),
            FOREIGN KEY(atribuicao_id) REFERENCES atribuicoes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_atribuicao_statuses_aluno ON atribuicao_statuses(aluno_id)",
        [],
    )?;

    Ok(conn)
}

fn ensure_flashcards_audio_url(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "flashcards", "audio_url")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE flashcards ADD COLUMN audio_url TEXT", [])?;
    Ok(())
}

fn ensure_atribuicoes_pontos_vale(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "atribuicoes", "pontos_vale")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE atribuicoes ADD COLUMN pontos_vale INTEGER", [])?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
