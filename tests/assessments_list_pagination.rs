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
    let exe = env!("CARGO_BIN_EXE_gradebookd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn gradebookd");
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
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn actor(campus_id: &str) -> serde_json::Value {
    json!({ "id": "teacher-1", "role": "teacher", "campusId": campus_id })
}

fn titles(result: &serde_json::Value) -> Vec<String> {
    result
        .get("items")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default()
        .iter()
        .map(|a| {
            a.get("title")
                .and_then(|v| v.as_str())
                .expect("title")
                .to_string()
        })
        .collect()
}

#[test]
fn listing_orders_by_date_desc_and_pages_with_has_more() {
    let workspace = temp_dir("gradebook-paging");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let campus = request_ok(
        &mut stdin,
        &mut reader,
        "c1",
        "campuses.create",
        json!({ "name": "North" }),
    );
    let campus_id = campus
        .get("campusId")
        .and_then(|v| v.as_str())
        .expect("campusId")
        .to_string();
    let course = request_ok(
        &mut stdin,
        &mut reader,
        "c2",
        "courses.create",
        json!({ "campusId": campus_id, "name": "Maths", "code": "MA201" }),
    );
    let course_id = course
        .get("course")
        .and_then(|v| v.get("id"))
        .and_then(|v| v.as_str())
        .expect("courseId")
        .to_string();

    // Created in shuffled date order; listing must come back date-desc.
    let plan = [
        ("Quiz 1", "quiz", "2025-09-10"),
        ("Final", "final", "2025-12-15"),
        ("Quiz 2", "quiz", "2025-10-01"),
        ("Midterm", "midterm", "2025-10-20"),
        ("Project", "project", "2025-11-05"),
    ];
    for (i, (title, kind, date)) in plan.iter().enumerate() {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("a{}", i),
            "assessments.create",
            json!({
                "courseId": course_id,
                "title": title,
                "kind": kind,
                "totalMarks": 100,
                "date": date,
                "actor": actor(&campus_id),
            }),
        );
    }

    let page1 = request_ok(
        &mut stdin,
        &mut reader,
        "p1",
        "assessments.listByCourse",
        json!({ "courseId": course_id, "page": 1, "pageSize": 2 }),
    );
    assert_eq!(titles(&page1), vec!["Final", "Project"]);
    assert_eq!(page1.get("hasMore").and_then(|v| v.as_bool()), Some(true));

    let page2 = request_ok(
        &mut stdin,
        &mut reader,
        "p2",
        "assessments.listByCourse",
        json!({ "courseId": course_id, "page": 2, "pageSize": 2 }),
    );
    assert_eq!(titles(&page2), vec!["Midterm", "Quiz 2"]);
    assert_eq!(page2.get("hasMore").and_then(|v| v.as_bool()), Some(true));

    let page3 = request_ok(
        &mut stdin,
        &mut reader,
        "p3",
        "assessments.listByCourse",
        json!({ "courseId": course_id, "page": 3, "pageSize": 2 }),
    );
    assert_eq!(titles(&page3), vec!["Quiz 1"]);
    assert_eq!(page3.get("hasMore").and_then(|v| v.as_bool()), Some(false));

    // hasMore is count == pageSize, so a final exactly-full page still says
    // true and the next page comes back empty.
    let full = request_ok(
        &mut stdin,
        &mut reader,
        "p4",
        "assessments.listByCourse",
        json!({ "courseId": course_id, "page": 1, "pageSize": 5 }),
    );
    assert_eq!(full.get("hasMore").and_then(|v| v.as_bool()), Some(true));
    let past_end = request_ok(
        &mut stdin,
        &mut reader,
        "p5",
        "assessments.listByCourse",
        json!({ "courseId": course_id, "page": 2, "pageSize": 5 }),
    );
    assert_eq!(titles(&past_end).len(), 0);
    assert_eq!(past_end.get("hasMore").and_then(|v| v.as_bool()), Some(false));
}

#[test]
fn same_date_ties_break_by_creation_time_newest_first() {
    let workspace = temp_dir("gradebook-paging-ties");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let campus = request_ok(
        &mut stdin,
        &mut reader,
        "c1",
        "campuses.create",
        json!({ "name": "South" }),
    );
    let campus_id = campus
        .get("campusId")
        .and_then(|v| v.as_str())
        .expect("campusId")
        .to_string();
    let course = request_ok(
        &mut stdin,
        &mut reader,
        "c2",
        "courses.create",
        json!({ "campusId": campus_id, "name": "Physics", "code": "PH101" }),
    );
    let course_id = course
        .get("course")
        .and_then(|v| v.get("id"))
        .and_then(|v| v.as_str())
        .expect("courseId")
        .to_string();

    for (i, title) in ["First Created", "Second Created"].iter().enumerate() {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("a{}", i),
            "assessments.create",
            json!({
                "courseId": course_id,
                "title": title,
                "kind": "quiz",
                "totalMarks": 10,
                "date": "2025-09-01",
                "actor": actor(&campus_id),
            }),
        );
    }

    let listing = request_ok(
        &mut stdin,
        &mut reader,
        "p1",
        "assessments.listByCourse",
        json!({ "courseId": course_id, "page": 1, "pageSize": 10 }),
    );
    assert_eq!(titles(&listing), vec!["Second Created", "First Created"]);
}

#[test]
fn bad_page_params_are_rejected() {
    let workspace = temp_dir("gradebook-paging-params");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let campus = request_ok(
        &mut stdin,
        &mut reader,
        "c1",
        "campuses.create",
        json!({ "name": "East" }),
    );
    let campus_id = campus
        .get("campusId")
        .and_then(|v| v.as_str())
        .expect("campusId")
        .to_string();
    let course = request_ok(
        &mut stdin,
        &mut reader,
        "c2",
        "courses.create",
        json!({ "campusId": campus_id, "name": "Biology", "code": "BI101" }),
    );
    let course_id = course
        .get("course")
        .and_then(|v| v.get("id"))
        .and_then(|v| v.as_str())
        .expect("courseId")
        .to_string();

    for params in [
        json!({ "courseId": course_id, "page": 0 }),
        json!({ "courseId": course_id, "pageSize": 0 }),
        json!({ "courseId": course_id, "pageSize": 100000 }),
    ] {
        let raw = request(
            &mut stdin,
            &mut reader,
            "bad",
            "assessments.listByCourse",
            params,
        );
        assert_eq!(raw.get("ok").and_then(|v| v.as_bool()), Some(false));
        assert_eq!(
            raw.get("error")
                .and_then(|e| e.get("code"))
                .and_then(|v| v.as_str()),
            Some("bad_params")
        );
    }
}
