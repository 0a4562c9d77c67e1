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

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_portald");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn portald");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
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
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
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

fn request_err(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> String {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded",
        method
    );
    value["error"]["code"].as_str().unwrap_or("").to_string()
}

fn sign_in_admin(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>, workspace: &PathBuf) {
    let _ = request_ok(
        stdin,
        reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        stdin,
        reader,
        "reg",
        "auth.register",
        json!({ "name": "Admin", "email": "admin@spdm.edu", "password": "pw", "role": "admin" }),
    );
    let _ = request_ok(
        stdin,
        reader,
        "login",
        "auth.login",
        json!({ "email": "admin@spdm.edu", "password": "pw", "role": "admin" }),
    );
}

#[test]
fn bundle_export_then_import_restores_workspace() {
    let workspace = temp_dir("portal-bundle");
    let bundle = workspace.join("out/portal-backup.zip");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    sign_in_admin(&mut stdin, &mut reader, &workspace);

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "students.create",
        json!({ "name": "Asha", "email": "asha@student.spdm.edu", "class": "ty-bsc" }),
    );
    let id = created["record"]["id"].as_str().expect("id").to_string();

    let exported = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "backup.exportBundle",
        json!({ "outPath": bundle.to_string_lossy() }),
    );
    assert_eq!(exported["bundleFormat"], json!("portal-collections-v1"));
    assert_eq!(exported["collections"]["students"], json!(1));
    assert_eq!(exported["collections"]["users"], json!(1));
    assert!(bundle.is_file());

    let _ = request_ok(&mut stdin, &mut reader, "3", "students.delete", json!({ "id": id }));
    let emptied = request_ok(&mut stdin, &mut reader, "4", "students.list", json!({}));
    assert_eq!(emptied["students"].as_array().map(|a| a.len()), Some(0));

    let imported = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "backup.importBundle",
        json!({ "inPath": bundle.to_string_lossy() }),
    );
    assert_eq!(imported["collections"]["students"], json!(1));
    assert_eq!(imported["unreadable"], json!(0));
    // The signed-in admin is part of the bundle, so the session carries on.
    let restored = request_ok(&mut stdin, &mut reader, "6", "students.list", json!({}));
    assert_eq!(restored["students"][0]["id"], json!(id));

    let junk = workspace.join("junk.zip");
    std::fs::write(&junk, b"not a zip").expect("write junk");
    let rejected = request_err(
        &mut stdin,
        &mut reader,
        "6b",
        "backup.importBundle",
        json!({ "inPath": junk.to_string_lossy() }),
    );
    assert_eq!(rejected, "import_failed");
    let still = request_ok(&mut stdin, &mut reader, "6c", "students.list", json!({}));
    assert_eq!(still["students"].as_array().map(|a| a.len()), Some(1));

    let missing = request_err(
        &mut stdin,
        &mut reader,
        "7",
        "backup.importBundle",
        json!({ "inPath": workspace.join("nope.zip").to_string_lossy() }),
    );
    assert_eq!(missing, "not_found");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn reset_clears_every_collection_and_the_session() {
    let workspace = temp_dir("portal-reset");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    sign_in_admin(&mut stdin, &mut reader, &workspace);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "students.create",
        json!({ "name": "Asha", "email": "asha@student.spdm.edu", "class": "fy-msc" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "hallTickets.create",
        json!({
            "title": "Finals",
            "fileUrl": "file://t",
            "class": "fy-msc",
            "examDate": "2024-04-01"
        }),
    );

    let reset = request_ok(&mut stdin, &mut reader, "3", "app.reset", json!({}));
    assert_eq!(reset["reset"], json!(true));

    let me = request_ok(&mut stdin, &mut reader, "4", "auth.currentUser", json!({}));
    assert!(me["user"].is_null());

    // Accounts are gone too, so the same admin can register again.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "auth.register",
        json!({ "name": "Admin", "email": "admin@spdm.edu", "password": "pw", "role": "admin" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "auth.login",
        json!({ "email": "admin@spdm.edu", "password": "pw", "role": "admin" }),
    );
    let students = request_ok(&mut stdin, &mut reader, "7", "students.list", json!({}));
    assert_eq!(students["students"].as_array().map(|a| a.len()), Some(0));
    let tickets = request_ok(&mut stdin, &mut reader, "8", "hallTickets.list", json!({}));
    assert_eq!(tickets["records"].as_array().map(|a| a.len()), Some(0));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
