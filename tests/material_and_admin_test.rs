//! Material uploads (distinct content-type rules from video) and the admin
//! delete surface (§6, gated by the internal API key).

mod common;

use common::{part_bytes, TestServer};
use serde_json::json;
use std::time::Duration;
use tokio::time::sleep;

const CHUNK: usize = 16 * 1024 * 1024;

#[tokio::test]
async fn material_upload_accepts_any_content_type_but_requires_material_id() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();

    let missing_material_id = client
        .post(format!("{}/uploads/files", server.base_url))
        .json(&json!({
            "lesson_id": "lesson-8",
            "filename": "slides.pdf",
            "size": CHUNK,
            "content_type": "application/pdf",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(missing_material_id.status(), 400);

    let init = client
        .post(format!("{}/uploads/files", server.base_url))
        .json(&json!({
            "lesson_id": "lesson-8",
            "material_id": "slides-1",
            "filename": "slides.pdf",
            "size": CHUNK,
            "content_type": "application/pdf",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(init.status(), 200);
    let init: serde_json::Value = init.json().await.unwrap();
    let upload_id = init["upload_id"].as_str().unwrap();
    let token = init["upload_token"].as_str().unwrap();

    let put = client
        .put(format!("{}/uploads/{upload_id}/parts/1", server.base_url))
        .header("X-Upload-Token", token)
        .body(part_bytes(9, CHUNK))
        .send()
        .await
        .unwrap();
    assert_eq!(put.status(), 204);

    let complete = client
        .post(format!("{}/uploads/{upload_id}/complete", server.base_url))
        .header("X-Upload-Token", token)
        .send()
        .await
        .unwrap();
    assert_eq!(complete.status(), 202);

    for _ in 0..200 {
        let resp = client
            .get(format!("{}/uploads/{upload_id}/status", server.base_url))
            .header("X-Upload-Token", token)
            .send()
            .await
            .unwrap();
        let body: serde_json::Value = resp.json().await.unwrap();
        if body["status"] == "ready" {
            let material_path = server
                .storage_path()
                .join("materials/lesson-8/slides-1/slides.pdf");
            assert!(material_path.exists());
            return;
        }
        sleep(Duration::from_millis(25)).await;
    }
    panic!("material upload never reached Ready");
}

#[tokio::test]
async fn video_init_rejects_non_mp4_content_type() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/uploads/videos", server.base_url))
        .json(&json!({
            "lesson_id": "lesson-9",
            "filename": "lecture.mov",
            "size": CHUNK,
            "content_type": "video/quicktime",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn admin_delete_requires_internal_api_key_when_configured() {
    let server = TestServer::start_with(|cmd| {
        cmd.env("INGEST_INTERNAL_API_KEY", "topsecret");
    })
    .await;
    let client = reqwest::Client::new();

    let unauthorized = client
        .delete(format!("{}/files/lesson-10", server.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(unauthorized.status(), 401);

    let authorized = client
        .delete(format!("{}/files/lesson-10", server.base_url))
        .header("X-Internal-API-Key", "topsecret")
        .send()
        .await
        .unwrap();
    assert_eq!(authorized.status(), 200);
}
