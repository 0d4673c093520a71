use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_daemon() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_fichasd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn fichasd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    actor: Option<&str>,
    params: serde_json::Value,
) -> serde_json::Value {
    let mut payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    if let Some(actor) = actor {
        payload["actor"] = json!(actor);
    }
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    actor: Option<&str>,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, actor, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown error")
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn error_code(value: &serde_json::Value) -> String {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

#[test]
fn folder_assignment_primes_copy_and_delete_restores_baseline() {
    let workspace = temp_dir("fichasd-folder-scenario");
    let teacher = Some("teacher-1");

    let (_child, mut stdin, mut reader) = spawn_daemon();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        None,
        json!({ "path": workspace.to_string_lossy() }),
    );

    // One turma with three active students.
    let turma = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "turmas.create",
        teacher,
        json!({ "nome": "Francês 7A" }),
    );
    let turma_id = turma["turma"]["id"].as_str().expect("turma id").to_string();
    for (rid, aluno) in [("3", "aluno-1"), ("4", "aluno-2"), ("5", "aluno-3")] {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            rid,
            "turmas.members.add",
            teacher,
            json!({ "turma_id": turma_id, "user_id": aluno }),
        );
    }

    // Folder F holding list L1 with three cards.
    let folder = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "folders.create",
        teacher,
        json!({ "title": "Unité 3" }),
    );
    let folder_id = folder["folder"]["id"].as_str().expect("folder id").to_string();
    let list = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "lists.create",
        teacher,
        json!({ "title": "Vocabulaire", "folder_id": folder_id, "lang": "fr" }),
    );
    let list_id = list["list"]["id"].as_str().expect("list id").to_string();
    for (rid, term, translation) in [
        ("8", "maison", "casa"),
        ("9", "pain", "pão"),
        ("10", "eau", "água"),
    ] {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            rid,
            "cards.create",
            teacher,
            json!({ "list_id": list_id, "term": term, "translation": translation }),
        );
    }
    let source_detail = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "lists.get",
        teacher,
        json!({ "list_id": list_id }),
    );
    let source_card_ids: Vec<String> = source_detail["cards"]
        .as_array()
        .expect("source cards")
        .iter()
        .map(|c| c["id"].as_str().expect("card id").to_string())
        .collect();
    assert_eq!(source_card_ids.len(), 3);

    // Assign the folder.
    let created = request_ok(
        &mut stdin,
        &mut reader,
        "12",
        "assignment.create",
        teacher,
        json!({
            "turma_id": turma_id,
            "titulo": "Trabalho 1",
            "fonte_tipo": "pasta",
            "fonte_id": folder_id,
            "data_limite": "2026-09-15",
            "pontos_vale": 10
        }),
    );
    let atribuicao = &created["atribuicao"];
    let atribuicao_id = atribuicao["id"].as_str().expect("atribuicao id").to_string();
    let copy_folder_id = atribuicao["fonte_id"]
        .as_str()
        .expect("copy folder id")
        .to_string();
    assert_ne!(copy_folder_id, folder_id, "registry must point at the copy");
    assert_eq!(atribuicao["fonte_tipo"], "pasta");
    assert_eq!(atribuicao["data_limite"], "2026-09-15");
    assert_eq!(atribuicao["pontos_vale"], 10);
    assert!(atribuicao["created_at"].as_str().is_some());

    // The copy: prefixed folder, unprefixed child list, three fresh cards
    // authored by the teacher.
    let copy_detail = request_ok(
        &mut stdin,
        &mut reader,
        "13",
        "folders.get",
        teacher,
        json!({ "folder_id": copy_folder_id }),
    );
    assert_eq!(copy_detail["folder"]["title"], "[Atribuição] Unité 3");
    assert_eq!(copy_detail["folder"]["visibility"], "class");
    assert_eq!(copy_detail["folder"]["class_id"], json!(turma_id));
    assert_eq!(copy_detail["folder"]["owner_id"], "teacher-1");
    let copy_lists = copy_detail["lists"].as_array().expect("copy lists");
    assert_eq!(copy_lists.len(), 1);
    assert_eq!(copy_lists[0]["title"], "Vocabulaire");
    assert_eq!(copy_lists[0]["class_id"], json!(turma_id));
    let copy_list_id = copy_lists[0]["id"].as_str().expect("copy list id").to_string();
    assert_ne!(copy_list_id, list_id);

    let copy_list_detail = request_ok(
        &mut stdin,
        &mut reader,
        "14",
        "lists.get",
        teacher,
        json!({ "list_id": copy_list_id }),
    );
    let copy_cards = copy_list_detail["cards"].as_array().expect("copy cards");
    assert_eq!(copy_cards.len(), 3);
    let terms: Vec<&str> = copy_cards.iter().map(|c| c["term"].as_str().unwrap()).collect();
    assert_eq!(terms, vec!["maison", "pain", "eau"]);
    for card in copy_cards {
        assert_eq!(card["user_id"], "teacher-1");
        let id = card["id"].as_str().expect("copy card id");
        assert!(
            !source_card_ids.iter().any(|s| s == id),
            "copied card ids must be fresh"
        );
    }

    // Fan-out: one pendente row per active member.
    let statuses = request_ok(
        &mut stdin,
        &mut reader,
        "15",
        "assignment.statuses.list",
        teacher,
        json!({ "atribuicao_id": atribuicao_id }),
    );
    let rows = statuses["statuses"].as_array().expect("statuses");
    assert_eq!(rows.len(), 3);
    for row in rows {
        assert_eq!(row["status"], "pendente");
        assert_eq!(row["progresso"], 0);
    }

    // Delete tears the primed set down and leaves the source alone.
    let deleted = request_ok(
        &mut stdin,
        &mut reader,
        "16",
        "assignment.delete",
        teacher,
        json!({ "atribuicao_id": atribuicao_id }),
    );
    assert_eq!(deleted["success"], true);

    let gone = request(
        &mut stdin,
        &mut reader,
        "17",
        "folders.get",
        teacher,
        json!({ "folder_id": copy_folder_id }),
    );
    assert_eq!(error_code(&gone), "not_found");
    let gone_list = request(
        &mut stdin,
        &mut reader,
        "18",
        "lists.get",
        teacher,
        json!({ "list_id": copy_list_id }),
    );
    assert_eq!(error_code(&gone_list), "not_found");
    let gone_statuses = request(
        &mut stdin,
        &mut reader,
        "19",
        "assignment.statuses.list",
        teacher,
        json!({ "atribuicao_id": atribuicao_id }),
    );
    assert_eq!(error_code(&gone_statuses), "not_found");

    let source_after = request_ok(
        &mut stdin,
        &mut reader,
        "20",
        "folders.get",
        teacher,
        json!({ "folder_id": folder_id }),
    );
    assert_eq!(source_after["folder"]["title"], "Unité 3");
    assert_eq!(source_after["lists"].as_array().expect("lists").len(), 1);
    let source_list_after = request_ok(
        &mut stdin,
        &mut reader,
        "21",
        "lists.get",
        teacher,
        json!({ "list_id": list_id }),
    );
    assert_eq!(
        source_list_after["cards"].as_array().expect("cards").len(),
        3
    );

    let listing = request_ok(
        &mut stdin,
        &mut reader,
        "22",
        "assignment.list",
        teacher,
        json!({ "turma_id": turma_id }),
    );
    assert_eq!(listing["atribuicoes"].as_array().expect("listing").len(), 0);

    let _ = std::fs::remove_dir_all(workspace);
}
