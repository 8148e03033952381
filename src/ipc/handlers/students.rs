use crate::db;
use crate::ipc::error::{access_err, err, ok};
use crate::ipc::types::{AppState, Request};
use crate::rotation::Rotation;
use rusqlite::params_from_iter;
use rusqlite::types::Value;
use serde_json::json;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;
use uuid::Uuid;

/// Roster display order: first letter of the name, case-insensitive, with
/// accents folded so "Émile" sorts among the e's.
/// Names sharing a first letter keep insertion order.
fn sort_key(name: &str) -> String {
    name.chars()
        .next()
        .map(|c| {
            std::iter::once(c)
                .nfd()
                .filter(|c| !is_combining_mark(*c))
                .flat_map(char::to_lowercase)
                .collect()
        })
        .unwrap_or_default()
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(teacher_id) = req.params.get("teacherId").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing teacherId", None);
    };
    let Some(class_id) = req.params.get("classId").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing classId", None);
    };

    if let Err(e) = db::owned_class(conn, teacher_id, class_id) {
        return access_err(&req.id, &e);
    }
    let mut students = match db::class_students(conn, class_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    students.sort_by_key(|s| sort_key(&s.name));

    ok(&req.id, json!({ "students": students }))
}

fn handle_students_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(teacher_id) = req.params.get("teacherId").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing teacherId", None);
    };
    let Some(student_id) = req.params.get("studentId").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing studentId", None);
    };

    match db::owned_student(conn, teacher_id, student_id) {
        Ok((student, class)) => ok(
            &req.id,
            json!({
                "student": student,
                "class": { "id": class.id, "name": class.name, "rotation": class.rotation }
            }),
        ),
        Err(e) => access_err(&req.id, &e),
    }
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(teacher_id) = req.params.get("teacherId").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing teacherId", None);
    };
    let Some(class_id) = req.params.get("classId").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing classId", None);
    };
    let name = match req.params.get("name").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing name", None),
    };
    if name.is_empty() {
        return err(&req.id, "bad_params", "name must not be empty", None);
    }

    let class = match db::owned_class(conn, teacher_id, class_id) {
        Ok(c) => c,
        Err(e) => return access_err(&req.id, &e),
    };
    // New students join whichever half is active right now.
    let rotation = match Rotation::parse(&class.rotation) {
        Ok(r) => r,
        Err(e) => return err(&req.id, e.code(), e.to_string(), None),
    };

    let student_id = Uuid::new_v4().to_string();
    let now = db::now_ts();
    if let Err(e) = conn.execute(
        "INSERT INTO students(id, class_id, name, exclude, rotation, created_at, updated_at)
         VALUES(?, ?, ?, 0, ?, ?, ?)",
        (&student_id, class_id, &name, rotation.as_str(), &now, &now),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }

    tracing::info!(class_id = class_id, student_id = %student_id, "student created");
    ok(
        &req.id,
        json!({
            "studentId": student_id,
            "name": name,
            "exclude": false,
            "rotation": rotation
        }),
    )
}

fn handle_students_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(teacher_id) = req.params.get("teacherId").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing teacherId", None);
    };
    let Some(student_id) = req.params.get("studentId").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing studentId", None);
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "missing/invalid patch", None);
    };

    let mut set_parts: Vec<&str> = Vec::new();
    let mut bind_values: Vec<Value> = Vec::new();

    if let Some(v) = patch.get("name") {
        let Some(s) = v.as_str() else {
            return err(&req.id, "bad_params", "patch.name must be a string", None);
        };
        let s = s.trim().to_string();
        if s.is_empty() {
            return err(&req.id, "bad_params", "name must not be empty", None);
        }
        set_parts.push("name = ?");
        bind_values.push(Value::Text(s));
    }
    if let Some(v) = patch.get("exclude") {
        let Some(b) = v.as_bool() else {
            return err(&req.id, "bad_params", "patch.exclude must be a boolean", None);
        };
        set_parts.push("exclude = ?");
        bind_values.push(Value::Integer(if b { 1 } else { 0 }));
    }
    if let Some(v) = patch.get("rotation") {
        let Some(s) = v.as_str() else {
            return err(&req.id, "bad_params", "patch.rotation must be a string", None);
        };
        let rotation = match Rotation::parse(s) {
            Ok(r) => r,
            Err(e) => return err(&req.id, e.code(), e.to_string(), None),
        };
        set_parts.push("rotation = ?");
        bind_values.push(Value::Text(rotation.as_str().to_string()));
    }

    if set_parts.is_empty() {
        return err(
            &req.id,
            "bad_params",
            "patch must include at least one field",
            None,
        );
    }

    if let Err(e) = db::owned_student(conn, teacher_id, student_id) {
        return access_err(&req.id, &e);
    }

    set_parts.push("updated_at = ?");
    bind_values.push(Value::Text(db::now_ts()));

    let sql = format!("UPDATE students SET {} WHERE id = ?", set_parts.join(", "));
    bind_values.push(Value::Text(student_id.to_string()));

    let changed = match conn.execute(&sql, params_from_iter(bind_values)) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "db_update_failed",
                e.to_string(),
                Some(json!({ "table": "students" })),
            )
        }
    };
    if changed == 0 {
        return err(&req.id, "not_found", "student not found", None);
    }

    match db::owned_student(conn, teacher_id, student_id) {
        Ok((student, _)) => ok(&req.id, json!({ "student": student })),
        Err(e) => access_err(&req.id, &e),
    }
}

fn handle_students_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(teacher_id) = req.params.get("teacherId").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing teacherId", None);
    };
    let Some(student_id) = req.params.get("studentId").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing studentId", None);
    };

    let (student, _) = match db::owned_student(conn, teacher_id, student_id) {
        Ok(v) => v,
        Err(e) => return access_err(&req.id, &e),
    };

    if let Err(e) = conn.execute("DELETE FROM students WHERE id = ?", [student_id]) {
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }

    tracing::info!(
        class_id = %student.class_id,
        student_id = student_id,
        "student deleted"
    );
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(handle_students_list(state, req)),
        "students.get" => Some(handle_students_get(state, req)),
        "students.create" => Some(handle_students_create(state, req)),
        "students.update" => Some(handle_students_update(state, req)),
        "students.delete" => Some(handle_students_delete(state, req)),
        _ => None,
    }
}
