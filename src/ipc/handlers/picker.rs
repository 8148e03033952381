use crate::db;
use crate::ipc::error::{access_err, err, ok};
use crate::ipc::types::{AppState, Request};
use crate::rotation;
use serde_json::json;

fn handle_picker_pick(state: &mut AppState, req: &Request) -> serde_json::Value {
    let AppState { db: conn, rng, .. } = state;
    let Some(conn) = conn.as_mut() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(teacher_id) = req.params.get("teacherId").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing teacherId", None);
    };
    let Some(class_id) = req.params.get("classId").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing classId", None);
    };

    let pick = match db::pick_for_class(conn, teacher_id, class_id, rng) {
        Ok(p) => p,
        Err(e) => return access_err(&req.id, &e),
    };

    tracing::info!(
        class_id = class_id,
        student_id = %pick.student.id,
        class_rotation = %pick.class_rotation,
        class_flipped = pick.class_flipped,
        "student picked"
    );
    ok(
        &req.id,
        json!({
            "student": {
                "id": pick.student.id,
                "classId": class_id,
                "name": pick.student.name,
                "exclude": pick.student.exclude,
                "rotation": pick.student.rotation,
            },
            "classRotation": pick.class_rotation,
            "classRotationChanged": pick.class_flipped,
        }),
    )
}

fn handle_picker_eligible(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(teacher_id) = req.params.get("teacherId").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing teacherId", None);
    };
    let Some(class_id) = req.params.get("classId").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing classId", None);
    };

    let roster = match db::load_roster(conn, teacher_id, class_id) {
        Ok(r) => r,
        Err(e) => return access_err(&req.id, &e),
    };
    let eligible = rotation::list_eligible(&roster);
    tracing::debug!(
        class_id = roster.class_id(),
        roster_size = roster.students().len(),
        eligible = eligible.len(),
        "eligible students listed"
    );

    ok(
        &req.id,
        json!({
            "classRotation": roster.rotation(),
            "students": eligible,
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "picker.pick" => Some(handle_picker_pick(state, req)),
        "picker.eligible" => Some(handle_picker_eligible(state, req)),
        _ => None,
    }
}
