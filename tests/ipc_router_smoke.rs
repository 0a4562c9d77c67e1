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
    if value.get("ok").and_then(|v| v.as_bool()) == Some(false) {
        let code = value
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        assert_ne!(
            code, "not_implemented",
            "unexpected unknown method for {}",
            method
        );
    }
    value
}

fn error_code(value: &serde_json::Value) -> Option<&str> {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
}

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("portal-router-smoke");
    let bundle_out = workspace.join("smoke-backup.zip");
    let csv_out = workspace.join("smoke-attendance.csv");

    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let health = request(&mut stdin, &mut reader, "1", "health", json!({}));
    assert_eq!(health["ok"], json!(true));

    let early = request(&mut stdin, &mut reader, "1a", "students.list", json!({}));
    assert_eq!(error_code(&early), Some("no_workspace"));

    let _ = request(
        &mut stdin,
        &mut reader,
        "2",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request(&mut stdin, &mut reader, "3", "meta.classes", json!({}));
    let _ = request(
        &mut stdin,
        &mut reader,
        "4",
        "auth.register",
        json!({
            "name": "Smoke Admin",
            "email": "admin@spdm.edu",
            "password": "pw",
            "role": "admin"
        }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "5",
        "auth.login",
        json!({ "email": "admin@spdm.edu", "password": "pw", "role": "admin" }),
    );
    let _ = request(&mut stdin, &mut reader, "6", "auth.currentUser", json!({}));
    let _ = request(&mut stdin, &mut reader, "7", "users.list", json!({}));

    let created = request(
        &mut stdin,
        &mut reader,
        "8",
        "students.create",
        json!({ "name": "Smoke Student", "email": "smoke@student.spdm.edu", "class": "mca" }),
    );
    let student_id = created["result"]["record"]["id"]
        .as_str()
        .unwrap_or("")
        .to_string();
    let _ = request(&mut stdin, &mut reader, "9", "students.list", json!({ "class": "mca" }));
    let _ = request(&mut stdin, &mut reader, "10", "students.get", json!({ "id": student_id }));
    let _ = request(&mut stdin, &mut reader, "11", "students.classCounts", json!({}));
    let mut entries = serde_json::Map::new();
    entries.insert(student_id.clone(), json!(true));
    let _ = request(
        &mut stdin,
        &mut reader,
        "12",
        "attendance.mark",
        json!({
            "date": "2024-03-11",
            "subject": "Advanced Java",
            "class": "mca",
            "entries": entries
        }),
    );
    let _ = request(&mut stdin, &mut reader, "13", "attendance.list", json!({ "class": "mca" }));
    let _ = request(
        &mut stdin,
        &mut reader,
        "14",
        "attendance.studentStats",
        json!({ "studentId": student_id }),
    );
    let _ = request(&mut stdin, &mut reader, "15", "attendance.classRollup", json!({ "class": "mca" }));
    let _ = request(&mut stdin, &mut reader, "16", "attendance.overall", json!({}));
    let _ = request(
        &mut stdin,
        &mut reader,
        "17",
        "attendance.export",
        json!({ "outPath": csv_out.to_string_lossy() }),
    );
    let _ = request(&mut stdin, &mut reader, "18", "results.list", json!({}));
    let _ = request(&mut stdin, &mut reader, "19", "hallTickets.list", json!({}));
    let _ = request(
        &mut stdin,
        &mut reader,
        "20",
        "events.create",
        json!({
            "title": "Orientation",
            "start": "2024-03-10T09:00:00Z",
            "end": "2024-03-10T11:00:00Z",
            "type": "event"
        }),
    );
    let _ = request(&mut stdin, &mut reader, "21", "events.list", json!({}));
    let _ = request(&mut stdin, &mut reader, "22", "events.visible", json!({}));
    let _ = request(&mut stdin, &mut reader, "23", "events.lectures", json!({}));
    let _ = request(
        &mut stdin,
        &mut reader,
        "24",
        "calendar.month",
        json!({ "year": 2024, "month": 3, "today": "2024-03-10" }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "25",
        "files.resolve",
        json!({ "handle": "https://example.org/a.pdf" }),
    );
    let _ = request(&mut stdin, &mut reader, "26", "dashboard.stats", json!({}));
    let _ = request(
        &mut stdin,
        &mut reader,
        "27",
        "backup.exportBundle",
        json!({ "outPath": bundle_out.to_string_lossy() }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "28",
        "backup.importBundle",
        json!({ "inPath": bundle_out.to_string_lossy() }),
    );
    let _ = request(&mut stdin, &mut reader, "29", "auth.logout", json!({}));

    let unknown = request_raw(&mut stdin, &mut reader, "30", "grades.compute");
    assert_eq!(error_code(&unknown), Some("not_implemented"));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

fn request_raw(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
) -> serde_json::Value {
    writeln!(stdin, "{}", json!({ "id": id, "method": method, "params": {} }))
        .expect("write request");
    stdin.flush().expect("flush request");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    serde_json::from_str(line.trim()).expect("parse response json")
}

#[test]
fn malformed_line_gets_bad_json_reply() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    writeln!(stdin, "{{not json").expect("write");
    stdin.flush().expect("flush");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("reply is json");
    assert_eq!(value["ok"], json!(false));
    assert_eq!(error_code(&value), Some("bad_json"));

    let health = request(&mut stdin, &mut reader, "after", "health", json!({}));
    assert_eq!(health["ok"], json!(true));

    drop(stdin);
    let _ = child.wait();
}
