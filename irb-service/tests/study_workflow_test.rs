mod common;

use axum::http::StatusCode;
use common::TestApp;
use irb_service::models::{Role, StudyStatus};
use serde_json::json;

#[tokio::test]
async fn study_moves_through_review_to_closure() {
    let app = TestApp::spawn().await;
    let pi = app.user(Role::Researcher).await;
    let reviewer = app.user(Role::Reviewer).await;
    let chair = app.user(Role::IrbChair).await;

    let study = app.create_study(&pi, "IRB-2025-001").await;
    assert_eq!(study["status"], "draft");
    assert_eq!(study["principal_investigator_id"], pi.id().to_string());
    let id = study["study_id"].as_str().unwrap();

    let (status, body) = app.transition(&pi.token, id, StudyStatus::Submitted, None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["submitted_utc"].is_string());

    let (status, body) = app
        .transition(&reviewer.token, id, StudyStatus::Reviewed, Some("Risks are addressed"))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["reviewed_by"], reviewer.id().to_string());
    assert_eq!(body["review_notes"], "Risks are addressed");

    let (status, body) = app.transition(&chair.token, id, StudyStatus::Active, None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["approved_utc"].is_string());

    let (status, body) = app.transition(&pi.token, id, StudyStatus::Closed, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "closed");
    assert!(body["closed_utc"].is_string());

    let (status, _) = app.transition(&chair.token, id, StudyStatus::Active, None).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn transitions_enforce_roles_and_notes() {
    let app = TestApp::spawn().await;
    let pi = app.user(Role::Researcher).await;
    let reviewer = app.user(Role::Reviewer).await;
    let id = app.create_study(&pi, "IRB-ROLES").await["study_id"]
        .as_str()
        .unwrap()
        .to_string();

    // Skipping straight to active is not a legal move.
    let (status, _) = app.transition(&pi.token, &id, StudyStatus::Active, None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    // Reviewers cannot submit on behalf of the investigator.
    let (status, _) = app
        .transition(&reviewer.token, &id, StudyStatus::Submitted, None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    app.transition(&pi.token, &id, StudyStatus::Submitted, None).await;

    // The investigator cannot review their own study.
    let (status, _) = app
        .transition(&pi.token, &id, StudyStatus::Reviewed, Some("Fine"))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Review requires notes.
    let (status, _) = app
        .transition(&reviewer.token, &id, StudyStatus::Reviewed, None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Returning for revisions also requires notes, then the study is editable again.
    let (status, body) = app
        .transition(&reviewer.token, &id, StudyStatus::Draft, Some("Clarify consent"))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "draft");

    let (status, _) = app
        .patch(&format!("/api/studies/{}", id), &pi.token, json!({ "title": "Revised" }))
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn transition_options_follow_the_caller() {
    let app = TestApp::spawn().await;
    let pi = app.user(Role::Researcher).await;
    let reviewer = app.user(Role::Reviewer).await;
    let id = app.create_study(&pi, "IRB-OPTS").await["study_id"]
        .as_str()
        .unwrap()
        .to_string();
    app.transition(&pi.token, &id, StudyStatus::Submitted, None).await;

    let uri = format!("/api/studies/{}/transitions", id);
    let (status, body) = app.get(&uri, &reviewer.token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["current"], "submitted");
    assert_eq!(body["allowed"], json!(["reviewed", "draft"]));

    let (_, body) = app.get(&uri, &pi.token).await;
    assert_eq!(body["allowed"], json!([]));
}

#[tokio::test]
async fn concurrent_transitions_have_a_single_winner() {
    let app = TestApp::spawn().await;
    let pi = app.user(Role::Researcher).await;
    let first = app.user(Role::Reviewer).await;
    let second = app.user(Role::Reviewer).await;
    let id = app.create_study(&pi, "IRB-RACE").await["study_id"]
        .as_str()
        .unwrap()
        .to_string();
    app.transition(&pi.token, &id, StudyStatus::Submitted, None).await;

    let (a, b) = tokio::join!(
        app.transition(&first.token, &id, StudyStatus::Reviewed, Some("A")),
        app.transition(&second.token, &id, StudyStatus::Reviewed, Some("B")),
    );
    let statuses = [a.0, b.0];
    assert_eq!(statuses.iter().filter(|s| **s == StatusCode::OK).count(), 1);
    assert_eq!(
        statuses.iter().filter(|s| **s == StatusCode::CONFLICT).count(),
        1
    );
}

#[tokio::test]
async fn only_draft_studies_can_be_edited_or_deleted() {
    let app = TestApp::spawn().await;
    let pi = app.user(Role::Researcher).await;
    let other = app.user(Role::Researcher).await;
    let id = app.create_study(&pi, "IRB-EDIT").await["study_id"]
        .as_str()
        .unwrap()
        .to_string();
    let uri = format!("/api/studies/{}", id);

    let (status, _) = app
        .patch(&uri, &pi.token, json!({ "end_date": "2024-01-01" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "end date before start date");

    let (status, body) = app
        .patch(&uri, &pi.token, json!({ "end_date": null, "target_enrollment": 80 }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["end_date"].is_null());
    assert_eq!(body["target_enrollment"], 80);

    let (status, _) = app
        .patch(&uri, &pi.token, json!({ "principal_investigator_id": other.id() }))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    app.transition(&pi.token, &id, StudyStatus::Submitted, None).await;
    let (status, _) = app.patch(&uri, &pi.token, json!({ "title": "Late" })).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(app.delete(&uri, &pi.token).await, StatusCode::CONFLICT);

    let draft = app.create_study(&pi, "IRB-GONE").await;
    let draft_uri = format!("/api/studies/{}", draft["study_id"].as_str().unwrap());
    assert_eq!(app.delete(&draft_uri, &pi.token).await, StatusCode::NO_CONTENT);
    let (status, _) = app.get(&draft_uri, &pi.token).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn studies_are_scoped_to_the_caller() {
    let app = TestApp::spawn().await;
    let alice = app.user(Role::Researcher).await;
    let bob = app.user(Role::Researcher).await;
    let reviewer = app.user(Role::Reviewer).await;
    let coordinator = app.user(Role::Coordinator).await;

    let draft = app.create_study(&alice, "IRB-ALICE").await;
    let active = app.active_study(&bob, "IRB-BOB").await;

    let (_, body) = app.get("/api/studies", &alice.token).await;
    assert_eq!(body["total"], 1);
    assert_eq!(body["items"][0]["protocol_number"], "IRB-ALICE");

    let (_, body) = app.get("/api/studies", &reviewer.token).await;
    assert_eq!(body["total"], 2);

    let (_, body) = app.get("/api/studies", &coordinator.token).await;
    assert_eq!(body["total"], 1);
    assert_eq!(body["items"][0]["study_id"], active.as_str());

    let alice_study = format!("/api/studies/{}", draft["study_id"].as_str().unwrap());
    let (status, _) = app.get(&alice_study, &bob.token).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = app.get(&alice_study, &coordinator.token).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, body) = app.get("/api/studies?q=bob&status=active", &reviewer.token).await;
    assert_eq!(body["total"], 1);
}

#[tokio::test]
async fn study_creation_rules() {
    let app = TestApp::spawn().await;
    let admin = app.user(Role::Admin).await;
    let pi = app.user(Role::Researcher).await;
    let reviewer = app.user(Role::Reviewer).await;

    let (status, _) = app
        .post(
            "/api/studies",
            &reviewer.token,
            json!({ "protocol_number": "R-1", "title": "Nope" }),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app
        .post(
            "/api/studies",
            &admin.token,
            json!({
                "protocol_number": "A-1",
                "title": "Assigned",
                "principal_investigator_id": pi.id(),
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["principal_investigator_id"], pi.id().to_string());
    assert_eq!(body["risk_level"], "minimal");

    let (status, _) = app
        .post(
            "/api/studies",
            &pi.token,
            json!({ "protocol_number": "A-1", "title": "Duplicate" }),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = app
        .post(
            "/api/studies",
            &pi.token,
            json!({
                "protocol_number": "B-1",
                "title": "Dates",
                "start_date": "2025-06-01",
                "end_date": "2025-01-01",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .post("/api/studies", &pi.token, json!({ "protocol_number": "", "title": "x" }))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}
