mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use serde_json::{json, Value};

use common::spawn_app;

fn titles(body: &Value) -> Vec<&str> {
    body.as_array()
        .unwrap()
        .iter()
        .map(|c| c["title"].as_str().unwrap())
        .collect()
}

#[tokio::test]
async fn chapters_get_contiguous_positions() {
    let app = spawn_app().await;
    let (_, owner) = app.register("owner@example.com").await;
    let course_id = app.create_course(&owner, "X").await;

    let first = app.create_chapter(&owner, &course_id, "1").await;
    let second = app.create_chapter(&owner, &course_id, "2").await;
    assert_eq!(first["position"], 1);
    assert_eq!(second["position"], 2);
    assert_eq!(second["is_published"], false);
}

#[tokio::test]
async fn reorder_swaps_chapters() {
    let app = spawn_app().await;
    let (_, owner) = app.register("owner@example.com").await;
    let course_id = app.create_course(&owner, "X").await;
    let first = app.create_chapter(&owner, &course_id, "1").await;
    let second = app.create_chapter(&owner, &course_id, "2").await;

    let (status, body) = app
        .request(
            "PATCH",
            "/api/chapters/reorder",
            Some(&owner),
            Some(json!({
                "chapters": [
                    { "id": second["id"], "position": 1 },
                    { "id": first["id"], "position": 2 },
                ]
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["updated"].as_array().unwrap().len(), 2);
    assert!(body["skipped"].as_array().unwrap().is_empty());

    let (status, body) = app
        .request(
            "GET",
            &format!("/api/chapters/course/{course_id}"),
            Some(&owner),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(titles(&body), vec!["2", "1"]);
}

#[tokio::test]
async fn reorder_reports_foreign_chapters_as_skipped() {
    let app = spawn_app().await;
    let (_, owner) = app.register("owner@example.com").await;
    let (_, other) = app.register("other@example.com").await;
    let mine = app.create_course(&owner, "Mine").await;
    let theirs = app.create_course(&other, "Theirs").await;
    let own_chapter = app.create_chapter(&owner, &mine, "A").await;
    let foreign_chapter = app.create_chapter(&other, &theirs, "B").await;

    let (status, body) = app
        .request(
            "PATCH",
            "/api/chapters/reorder",
            Some(&owner),
            Some(json!({
                "chapters": [
                    { "id": own_chapter["id"], "position": 3 },
                    { "id": foreign_chapter["id"], "position": 1 },
                ]
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["updated"], json!([own_chapter["id"]]));
    assert_eq!(body["skipped"], json!([foreign_chapter["id"]]));

    let (_, body) = app
        .request("GET", &format!("/api/chapters/course/{theirs}"), Some(&other), None)
        .await;
    assert_eq!(body[0]["position"], 1);

    let (status, _) = app
        .request(
            "PATCH",
            "/api/chapters/reorder",
            Some(&owner),
            Some(json!({ "chapters": [] })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn chapter_patch_is_owner_only() {
    let app = spawn_app().await;
    let (_, owner) = app.register("owner@example.com").await;
    let (_, other) = app.register("other@example.com").await;
    let course_id = app.create_course(&owner, "X").await;
    let chapter = app.create_chapter(&owner, &course_id, "1").await;
    let chapter_id = chapter["id"].as_str().unwrap();

    let (status, _) = app
        .request(
            "PATCH",
            &format!("/api/chapters/{chapter_id}"),
            Some(&other),
            Some(json!({ "title": "Taken over" })),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app
        .request("DELETE", &format!("/api/chapters/{chapter_id}"), Some(&other), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .request(
            "PATCH",
            &format!("/api/chapters/{chapter_id}"),
            Some(&owner),
            Some(json!({ "position": 9 })),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, body) = app
        .request(
            "PATCH",
            &format!("/api/chapters/{chapter_id}"),
            Some(&owner),
            Some(json!({ "description": "Intro", "video_url": "http://cdn.test/v.mp4", "is_free": true })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["title"], "1");
    assert_eq!(body["description"], "Intro");
    assert_eq!(body["is_free"], true);

    let (status, _) = app
        .request("DELETE", &format!("/api/chapters/{chapter_id}"), Some(&owner), None)
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn unpublished_chapters_are_hidden_from_learners() {
    let app = spawn_app().await;
    let (_, owner) = app.register("owner@example.com").await;
    let (_, learner) = app.register("learner@example.com").await;
    let course_id = app.create_course(&owner, "X").await;
    let chapter = app.create_chapter(&owner, &course_id, "1").await;
    let chapter_id = chapter["id"].as_str().unwrap();

    let (status, _) = app
        .request("GET", &format!("/api/chapters/{chapter_id}"), None, None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app
        .request(
            "POST",
            &format!("/api/chapters/{chapter_id}/complete"),
            Some(&learner),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // The owner can preview drafts.
    let (status, _) = app
        .request("GET", &format!("/api/chapters/{chapter_id}"), Some(&owner), None)
        .await;
    assert_eq!(status, StatusCode::OK);

    app.publish_chapter(&owner, chapter_id).await;
    let (status, _) = app
        .request("GET", &format!("/api/chapters/{chapter_id}"), None, None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    app.publish_course(&owner, &course_id).await;
    let (status, body) = app
        .request("GET", &format!("/api/chapters/{chapter_id}"), None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["title"], "1");
    assert_eq!(body["is_completed"], false);
}

#[tokio::test]
async fn completing_a_chapter_twice_keeps_one_record() {
    let app = spawn_app().await;
    let (_, owner) = app.register("owner@example.com").await;
    let (_, learner) = app.register("learner@example.com").await;
    let course_id = app.create_course(&owner, "X").await;
    let first = app.create_chapter(&owner, &course_id, "1").await;
    let second = app.create_chapter(&owner, &course_id, "2").await;
    let first_id = first["id"].as_str().unwrap();
    app.publish_chapter(&owner, first_id).await;
    app.publish_chapter(&owner, second["id"].as_str().unwrap()).await;
    app.publish_course(&owner, &course_id).await;

    let uri = format!("/api/chapters/{first_id}/complete");
    let (status, body) = app.request("POST", &uri, Some(&learner), None).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["progress"]["is_completed"], true);

    let (status, body) = app.request("POST", &uri, Some(&learner), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Already marked complete");

    let records: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM user_progress")
        .fetch_one(&app.state.db.pool)
        .await
        .unwrap();
    assert_eq!(records, 1);

    let (_, body) = app
        .request("GET", &format!("/api/chapters/{first_id}"), Some(&learner), None)
        .await;
    assert_eq!(body["is_completed"], true);
    assert_eq!(body["previous_chapter_id"], Value::Null);
    assert_eq!(body["next_chapter_id"], second["id"]);
}

#[tokio::test]
async fn media_upload_is_served_back() {
    let app = spawn_app().await;
    let (_, owner) = app.register("owner@example.com").await;

    let boundary = "lectern-test-boundary";
    let body = format!(
        "--{boundary}\r\n\
         Content-Disposition: form-data; name=\"file\"; filename=\"cover photo.png\"\r\n\
         Content-Type: image/png\r\n\r\n\
         not-really-a-png\r\n\
         --{boundary}\r\n\
         Content-Disposition: form-data; name=\"file\"; filename=\"notes.txt\"\r\n\
         Content-Type: text/plain\r\n\r\n\
         plain text\r\n\
         --{boundary}--\r\n"
    );
    let req = Request::builder()
        .method("POST")
        .uri("/api/media/image")
        .header("authorization", format!("Bearer {owner}"))
        .header(
            "content-type",
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(Body::from(body))
        .unwrap();

    let (status, body) = app.send(req).await;
    assert_eq!(status, StatusCode::CREATED, "upload failed: {body}");
    let files = body["files"].as_array().unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(body["errors"].as_array().unwrap().len(), 1);

    let url = files[0]["url"].as_str().unwrap();
    let path = url.strip_prefix("http://localhost:5000").unwrap();
    assert!(path.starts_with("/media/image/"));

    let req = Request::builder().uri(path).body(Body::empty()).unwrap();
    let (status, body) = app.send(req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Value::String("not-really-a-png".to_string()));
}

#[tokio::test]
async fn null_clears_chapter_video() {
    let app = spawn_app().await;
    let (_, owner) = app.register("owner@example.com").await;
    let course_id = app.create_course(&owner, "X").await;
    let chapter = app.create_chapter(&owner, &course_id, "1").await;
    let uri = format!("/api/chapters/{}", chapter["id"].as_str().unwrap());

    let (status, body) = app
        .request(
            "PATCH",
            &uri,
            Some(&owner),
            Some(json!({ "description": "Intro", "video_url": "http://cdn.test/v.mp4" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["video_url"], "http://cdn.test/v.mp4");

    let (status, body) = app
        .request("PATCH", &uri, Some(&owner), Some(json!({ "video_url": null })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["video_url"], Value::Null);
    assert_eq!(body["description"], "Intro");
}

#[tokio::test]
async fn overlapping_reorders_both_succeed() {
    let app = spawn_app().await;
    let (_, owner) = app.register("owner@example.com").await;
    let course_id = app.create_course(&owner, "X").await;
    let first = app.create_chapter(&owner, &course_id, "1").await;
    let second = app.create_chapter(&owner, &course_id, "2").await;

    let forward = json!({ "chapters": [
        { "id": first["id"], "position": 1 },
        { "id": second["id"], "position": 2 },
    ]});
    let backward = json!({ "chapters": [
        { "id": second["id"], "position": 1 },
        { "id": first["id"], "position": 2 },
    ]});

    let (a, b) = tokio::join!(
        app.request("PATCH", "/api/chapters/reorder", Some(&owner), Some(forward)),
        app.request("PATCH", "/api/chapters/reorder", Some(&owner), Some(backward)),
    );
    assert_eq!(a.0, StatusCode::OK);
    assert_eq!(b.0, StatusCode::OK);

    let (_, body) = app
        .request(
            "GET",
            &format!("/api/chapters/course/{course_id}"),
            Some(&owner),
            None,
        )
        .await;
    let positions: Vec<i64> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["position"].as_i64().unwrap())
        .collect();
    assert_eq!(positions.len(), 2);
    assert!(positions.iter().all(|p| *p == 1 || *p == 2));
}
