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
fn roster_membership_lifecycle() {
    let workspace = temp_dir("fichasd-roster");
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
    let turma = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "turmas.create",
        teacher,
        json!({ "nome": "Espanhol A1", "descricao": "Iniciantes" }),
    );
    let turma_id = turma["turma"]["id"].as_str().expect("id").to_string();
    assert_eq!(turma["turma"]["owner_teacher_id"], "teacher-1");

    let member = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "turmas.members.add",
        teacher,
        json!({ "turma_id": turma_id, "user_id": "aluno-1" }),
    );
    assert_eq!(member["member"]["ativo"], true);
    assert_eq!(member["member"]["role"], "aluno");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "turmas.members.add",
        teacher,
        json!({ "turma_id": turma_id, "user_id": "aluno-2", "role": "monitor" }),
    );

    // Benching keeps the row but flips the flag.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "turmas.members.set_active",
        teacher,
        json!({ "turma_id": turma_id, "user_id": "aluno-1", "ativo": false }),
    );
    let roster = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "turmas.members.list",
        teacher,
        json!({ "turma_id": turma_id }),
    );
    let members = roster["members"].as_array().expect("members");
    assert_eq!(members.len(), 2);
    assert_eq!(members[0]["user_id"], "aluno-1");
    assert_eq!(members[0]["ativo"], false);
    assert_eq!(members[1]["user_id"], "aluno-2");
    assert_eq!(members[1]["role"], "monitor");

    // Re-adding is an upsert: the same row comes back active.
    let member = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "turmas.members.add",
        teacher,
        json!({ "turma_id": turma_id, "user_id": "aluno-1" }),
    );
    assert_eq!(member["member"]["ativo"], true);
    let roster = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "turmas.members.list",
        teacher,
        json!({ "turma_id": turma_id }),
    );
    assert_eq!(roster["members"].as_array().expect("members").len(), 2);

    // Removal deletes the row outright; a second removal has nothing left.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "turmas.members.remove",
        teacher,
        json!({ "turma_id": turma_id, "user_id": "aluno-2" }),
    );
    let res = request(
        &mut stdin,
        &mut reader,
        "10",
        "turmas.members.remove",
        teacher,
        json!({ "turma_id": turma_id, "user_id": "aluno-2" }),
    );
    assert_eq!(error_code(&res), "not_found");
    let res = request(
        &mut stdin,
        &mut reader,
        "11",
        "turmas.members.set_active",
        teacher,
        json!({ "turma_id": turma_id, "user_id": "aluno-9", "ativo": true }),
    );
    assert_eq!(error_code(&res), "not_found");

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn turma_listing_counts_active_members_and_assignments() {
    let workspace = temp_dir("fichasd-turma-counts");
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
    let turma = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "turmas.create",
        teacher,
        json!({ "nome": "Francês B1" }),
    );
    let turma_id = turma["turma"]["id"].as_str().expect("id").to_string();

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
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "turmas.members.set_active",
        teacher,
        json!({ "turma_id": turma_id, "user_id": "aluno-3", "ativo": false }),
    );

    let list = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "lists.create",
        teacher,
        json!({ "title": "Verbes" }),
    );
    let list_id = list["list"]["id"].as_str().expect("id").to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "cards.create",
        teacher,
        json!({ "list_id": list_id, "term": "être", "translation": "ser" }),
    );
    for (rid, titulo) in [("9", "Semana 1"), ("10", "Semana 2")] {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            rid,
            "assignment.create",
            teacher,
            json!({ "turma_id": turma_id, "titulo": titulo, "fonte_tipo": "lista", "fonte_id": list_id }),
        );
    }

    // An empty second turma keeps the counts honest.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "turmas.create",
        teacher,
        json!({ "nome": "Francês B2" }),
    );

    let listing = request_ok(
        &mut stdin,
        &mut reader,
        "12",
        "turmas.list",
        teacher,
        json!({}),
    );
    let turmas = listing["turmas"].as_array().expect("turmas");
    assert_eq!(turmas.len(), 2);
    let b1 = turmas
        .iter()
        .find(|t| t["nome"] == "Francês B1")
        .expect("B1 present");
    assert_eq!(b1["member_count"], 2);
    assert_eq!(b1["assignment_count"], 2);
    let b2 = turmas
        .iter()
        .find(|t| t["nome"] == "Francês B2")
        .expect("B2 present");
    assert_eq!(b2["member_count"], 0);
    assert_eq!(b2["assignment_count"], 0);

    // Another teacher sees only their own turmas.
    let listing = request_ok(
        &mut stdin,
        &mut reader,
        "13",
        "turmas.list",
        Some("teacher-2"),
        json!({}),
    );
    assert!(listing["turmas"].as_array().expect("turmas").is_empty());

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn turma_delete_tears_down_assignments_but_not_sources() {
    let workspace = temp_dir("fichasd-turma-delete");
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
    let turma = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "turmas.create",
        teacher,
        json!({ "nome": "Russo A2" }),
    );
    let turma_id = turma["turma"]["id"].as_str().expect("id").to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "turmas.members.add",
        teacher,
        json!({ "turma_id": turma_id, "user_id": "aluno-1" }),
    );

    let list = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "lists.create",
        teacher,
        json!({ "title": "Азбука" }),
    );
    let list_id = list["list"]["id"].as_str().expect("id").to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "cards.create",
        teacher,
        json!({ "list_id": list_id, "term": "дом", "translation": "casa" }),
    );
    let created = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "assignment.create",
        teacher,
        json!({ "turma_id": turma_id, "titulo": "Письмо", "fonte_tipo": "lista", "fonte_id": list_id }),
    );
    let copy_id = created["atribuicao"]["fonte_id"]
        .as_str()
        .expect("copy id")
        .to_string();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "turmas.delete",
        teacher,
        json!({ "turma_id": turma_id }),
    );

    // The whole class-side world is gone...
    let listing = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "turmas.list",
        teacher,
        json!({}),
    );
    assert!(listing["turmas"].as_array().expect("turmas").is_empty());
    let res = request(
        &mut stdin,
        &mut reader,
        "9",
        "lists.get",
        teacher,
        json!({ "list_id": copy_id }),
    );
    assert_eq!(error_code(&res), "not_found");
    let res = request(
        &mut stdin,
        &mut reader,
        "10",
        "assignment.list",
        teacher,
        json!({ "turma_id": turma_id }),
    );
    assert_eq!(error_code(&res), "not_found");

    // ...while the author's library is untouched.
    let detail = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "lists.get",
        teacher,
        json!({ "list_id": list_id }),
    );
    assert_eq!(detail["cards"].as_array().expect("cards").len(), 1);

    let _ = std::fs::remove_dir_all(workspace);
}
