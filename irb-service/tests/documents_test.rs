mod common;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
};
use common::{body_bytes, TestApp, CLIENT_IP};
use irb_service::models::{document::checksum, Role, StudyStatus};

#[tokio::test]
async fn uploads_are_versioned_per_kind_and_title() {
    let app = TestApp::spawn().await;
    let pi = app.user(Role::Researcher).await;
    let study = app.create_study(&pi, "IRB-DOC-1").await;
    let study_id = study["study_id"].as_str().unwrap();

    let (status, v1) = app
        .upload(&pi.token, study_id, "protocol", "Main protocol", "protocol.pdf", b"%PDF-1 first")
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", v1);
    assert_eq!(v1["version"], 1);
    assert_eq!(v1["size_bytes"], 12);
    assert_eq!(v1["checksum_sha256"], checksum(b"%PDF-1 first"));

    let (_, v2) = app
        .upload(&pi.token, study_id, "protocol", "Main protocol", "protocol-v2.pdf", b"%PDF-1 second")
        .await;
    assert_eq!(v2["version"], 2);

    let (_, consent) = app
        .upload(&pi.token, study_id, "consent_form", "Main protocol", "consent.pdf", b"consent")
        .await;
    assert_eq!(consent["version"], 1, "a different kind starts its own series");

    let (status, list) = app
        .get(&format!("/api/studies/{}/documents", study_id), &pi.token)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list["total"], 3);
}

#[tokio::test]
async fn content_downloads_as_an_attachment() {
    let app = TestApp::spawn().await;
    let pi = app.user(Role::Researcher).await;
    let study = app.create_study(&pi, "IRB-DOC-2").await;
    let (_, doc) = app
        .upload(
            &pi.token,
            study["study_id"].as_str().unwrap(),
            "amendment",
            "Amendment 1",
            "../../amendment.pdf",
            b"amendment bytes",
        )
        .await;
    assert_eq!(doc["file_name"], "amendment.pdf");
    let doc_id = doc["document_id"].as_str().unwrap();

    let (status, meta) = app.get(&format!("/api/documents/{}", doc_id), &pi.token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(meta["kind"], "amendment");

    let req = Request::builder()
        .method(Method::GET)
        .uri(format!("/api/documents/{}/content", doc_id))
        .header("x-forwarded-for", CLIENT_IP)
        .header(header::AUTHORIZATION, format!("Bearer {}", pi.token))
        .body(Body::empty())
        .unwrap();
    let res = app.send(req).await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()[header::CONTENT_TYPE], "application/pdf");
    assert_eq!(
        res.headers()[header::CONTENT_DISPOSITION],
        "attachment; filename=\"amendment.pdf\""
    );
    assert_eq!(body_bytes(res).await, b"amendment bytes");
}

#[tokio::test]
async fn rejects_bad_uploads() {
    let mut config = irb_service::config::IrbConfig::local();
    config.limits.max_document_bytes = 16;
    let app = TestApp::with_config(config);
    let pi = app.user(Role::Researcher).await;
    let study = app.create_study(&pi, "IRB-DOC-3").await;
    let study_id = study["study_id"].as_str().unwrap();

    let (status, _) = app
        .upload(&pi.token, study_id, "protocol", "Big", "big.pdf", &[b'x'; 17])
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .upload(&pi.token, study_id, "memo", "Unknown kind", "memo.pdf", b"memo")
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .upload(&pi.token, study_id, "protocol", "Empty", "empty.pdf", b"")
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let reviewer = app.user(Role::Reviewer).await;
    let (status, _) = app
        .upload(&reviewer.token, study_id, "protocol", "Nope", "x.pdf", b"x")
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn closed_studies_keep_their_documents() {
    let app = TestApp::spawn().await;
    let pi = app.user(Role::Researcher).await;
    let study_id = app.active_study(&pi, "IRB-DOC-4").await;
    let (_, doc) = app
        .upload(&pi.token, &study_id, "approval_letter", "Approval", "approval.pdf", b"ok")
        .await;
    let doc_uri = format!("/api/documents/{}", doc["document_id"].as_str().unwrap());

    let (status, _) = app
        .transition(&pi.token, &study_id, StudyStatus::Closed, None)
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app
        .upload(&pi.token, &study_id, "other", "Late", "late.pdf", b"late")
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(app.delete(&doc_uri, &pi.token).await, StatusCode::CONFLICT);

    let (status, _) = app.get(&doc_uri, &pi.token).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn documents_of_invisible_studies_are_not_found() {
    let app = TestApp::spawn().await;
    let pi = app.user(Role::Researcher).await;
    let outsider = app.user(Role::Researcher).await;
    let study = app.create_study(&pi, "IRB-DOC-5").await;
    let (_, doc) = app
        .upload(&pi.token, study["study_id"].as_str().unwrap(), "protocol", "P", "p.pdf", b"p")
        .await;
    let doc_uri = format!("/api/documents/{}", doc["document_id"].as_str().unwrap());

    let (status, _) = app.get(&doc_uri, &outsider.token).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(app.delete(&doc_uri, &outsider.token).await, StatusCode::NOT_FOUND);

    assert_eq!(app.delete(&doc_uri, &pi.token).await, StatusCode::NO_CONTENT);
    let (status, _) = app.get(&doc_uri, &pi.token).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
