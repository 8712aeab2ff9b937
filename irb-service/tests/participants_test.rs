mod common;

use axum::http::{header, Method, Request, StatusCode};
use common::{body_text, TestApp, CLIENT_IP};
use irb_service::models::Role;
use serde_json::json;

#[tokio::test]
async fn participants_require_an_active_study() {
    let app = TestApp::spawn().await;
    let pi = app.user(Role::Researcher).await;
    let draft = app.create_study(&pi, "IRB-P-DRAFT").await;

    let (status, _) = app
        .post(
            &format!("/api/studies/{}/participants", draft["study_id"].as_str().unwrap()),
            &pi.token,
            json!({ "subject_code": "S-001" }),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn enrollment_lifecycle() {
    let app = TestApp::spawn().await;
    let pi = app.user(Role::Researcher).await;
    let study_id = app.active_study(&pi, "IRB-P-LIFE").await;
    let collection = format!("/api/studies/{}/participants", study_id);

    let (status, _) = app
        .post(
            &collection,
            &pi.token,
            json!({ "subject_code": "S-001", "enrollment_status": "enrolled" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "enrolment needs consent");

    let (status, participant) = app
        .post(
            &collection,
            &pi.token,
            json!({ "subject_code": "  S-001 ", "date_of_birth": "1980-02-03", "sex": "F" }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(participant["subject_code"], "S-001");
    assert_eq!(participant["enrollment_status"], "screening");
    let uri = format!(
        "/api/participants/{}",
        participant["participant_id"].as_str().unwrap()
    );

    let (status, _) = app
        .post(&collection, &pi.token, json!({ "subject_code": "S-001" }))
        .await;
    assert_eq!(status, StatusCode::CONFLICT, "subject codes are unique per study");

    let (status, _) = app
        .patch(&uri, &pi.token, json!({ "enrollment_status": "enrolled" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = app
        .patch(
            &uri,
            &pi.token,
            json!({
                "enrollment_status": "enrolled",
                "consent_signed": true,
                "consent_date": "2025-02-01",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["enrollment_status"], "enrolled");

    let (status, _) = app
        .patch(&uri, &pi.token, json!({ "consent_signed": false }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .patch(&uri, &pi.token, json!({ "enrollment_status": "screening" }))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = app
        .patch(&uri, &pi.token, json!({ "enrollment_status": "withdrawn" }))
        .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = app
        .patch(&uri, &pi.token, json!({ "enrollment_status": "enrolled" }))
        .await;
    assert_eq!(status, StatusCode::CONFLICT, "withdrawn is terminal");

    let (status, body) = app.patch(&uri, &pi.token, json!({ "notes": "Moved away" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["notes"], "Moved away");

    let (_, list) = app
        .get(&format!("{}?enrollment_status=withdrawn", collection), &pi.token)
        .await;
    assert_eq!(list["total"], 1);

    assert_eq!(app.delete(&uri, &pi.token).await, StatusCode::NO_CONTENT);
    let (status, _) = app.get(&uri, &pi.token).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn participant_access_follows_study_visibility() {
    let app = TestApp::spawn().await;
    let pi = app.user(Role::Researcher).await;
    let outsider = app.user(Role::Researcher).await;
    let coordinator = app.user(Role::Coordinator).await;
    let reviewer = app.user(Role::Reviewer).await;
    let study_id = app.active_study(&pi, "IRB-P-VIS").await;
    let collection = format!("/api/studies/{}/participants", study_id);

    let (status, participant) = app
        .post(&collection, &coordinator.token, json!({ "subject_code": "C-1" }))
        .await;
    assert_eq!(status, StatusCode::CREATED, "coordinators manage active studies");
    let uri = format!(
        "/api/participants/{}",
        participant["participant_id"].as_str().unwrap()
    );

    let (status, _) = app.get(&uri, &outsider.token).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = app.get(&collection, &outsider.token).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app.get(&uri, &reviewer.token).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = app
        .patch(&uri, &reviewer.token, json!({ "notes": "x" }))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn participant_export_is_csv_and_audited() {
    let app = TestApp::spawn().await;
    let pi = app.user(Role::Researcher).await;
    let admin = app.user(Role::Admin).await;
    let coordinator = app.user(Role::Coordinator).await;
    let study_id = app.active_study(&pi, "IRB-P-CSV").await;
    let collection = format!("/api/studies/{}/participants", study_id);
    app.post(&collection, &pi.token, json!({ "subject_code": "=HYPERLINK(\"x\")" }))
        .await;
    app.post(&collection, &pi.token, json!({ "subject_code": "S,2" }))
        .await;

    let export = format!("{}/export", collection);
    let (status, _) = app.get(&export, &coordinator.token).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let req = Request::builder()
        .method(Method::GET)
        .uri(&export)
        .header("x-forwarded-for", CLIENT_IP)
        .header(header::AUTHORIZATION, format!("Bearer {}", pi.token))
        .body(axum::body::Body::empty())
        .unwrap();
    let res = app.send(req).await;
    assert_eq!(res.status(), StatusCode::OK);
    assert!(res.headers()[header::CONTENT_TYPE]
        .to_str()
        .unwrap()
        .starts_with("text/csv"));
    assert!(res.headers()[header::CONTENT_DISPOSITION]
        .to_str()
        .unwrap()
        .contains("IRB-P-CSV-participants.csv"));

    let csv = body_text(res).await;
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].starts_with("participant_id,subject_code,enrollment_status"));
    assert!(csv.contains("\"'=HYPERLINK(\"\"x\"\")\""));
    assert!(csv.contains("\"S,2\""));

    let (_, logs) = app
        .get("/api/audit-logs?action=data_exported", &admin.token)
        .await;
    assert_eq!(logs["total"], 1);
    assert_eq!(logs["items"][0]["details"]["export"], "participants");
    assert_eq!(logs["items"][0]["details"]["rows"], 2);
}
