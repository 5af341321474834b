//! HTTP API tests over a loopback listener.
//!
//! The router runs with the demo collaborators and a fast tick so scans
//! finish in milliseconds.

use serde_json::{json, Value};
use std::time::Duration;

use content_shield::config::Config;
use content_shield::orchestrator::Orchestrator;
use content_shield::server::router;

async fn spawn_server() -> String {
    let mut config = Config::default();
    config.scan.tick_interval_ms = 5;
    let orchestrator = Orchestrator::from_config(&config).unwrap().build();
    let app = router(orchestrator);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    format!("http://{}", addr)
}

async fn stage(client: &reqwest::Client, base: &str, name: &str, kind: &str, ct: &str) -> Value {
    let resp = client
        .post(format!("{}/assets", base))
        .query(&[("kind", kind), ("name", name)])
        .header("content-type", ct)
        .body(vec![7u8; 2048])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    resp.json().await.unwrap()
}

async fn wait_terminal(client: &reqwest::Client, base: &str, job_id: &str) -> Value {
    for _ in 0..200 {
        let job: Value = client
            .get(format!("{}/jobs/{}", base, job_id))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        if job["state"] == "completed" || job["state"] == "failed" {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {} did not finish", job_id);
}

#[tokio::test]
async fn health_reports_version() {
    let base = spawn_server().await;
    let body: Value = reqwest::get(format!("{}/health", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn stage_scan_and_acknowledge() {
    let base = spawn_server().await;
    let client = reqwest::Client::new();

    let asset = stage(&client, &base, "Urban Landscape.png", "image", "image/png").await;
    assert_eq!(asset["kind"], "image");
    assert_eq!(asset["size_bytes"], 2048);
    assert!(asset.get("content").is_none());
    let asset_id = asset["id"].as_str().unwrap().to_string();

    let resp = client
        .post(format!("{}/assets/{}/scan", base, asset_id))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 202);
    let started: Value = resp.json().await.unwrap();
    let job_id = started["job_id"].as_str().unwrap().to_string();

    let job = wait_terminal(&client, &base, &job_id).await;
    assert_eq!(job["state"], "completed");
    assert_eq!(job["progress"], 100);

    let alerts: Value = client
        .get(format!("{}/alerts", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let alerts = alerts["alerts"].as_array().unwrap();
    let scores: Vec<u64> = alerts
        .iter()
        .map(|a| a["match"]["score"].as_u64().unwrap())
        .collect();
    assert_eq!(scores, vec![92, 87, 76]);
    assert_eq!(alerts[0]["severity"], "high");
    assert_eq!(alerts[2]["severity"], "low");

    let match_id = alerts[0]["match"]["id"].as_str().unwrap().to_string();
    let resp = client
        .post(format!("{}/alerts/{}/acknowledge", base, match_id))
        .json(&json!({ "as": "dismissed" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let view: Value = resp.json().await.unwrap();
    assert_eq!(view["alert"]["state"], "dismissed");

    let resp = client
        .post(format!("{}/alerts/{}/acknowledge", base, match_id))
        .json(&json!({ "as": "actioned" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let err: Value = resp.json().await.unwrap();
    assert_eq!(err["error"]["code"], "not_found");

    let open: Value = client
        .get(format!("{}/alerts?state=open&kind=image", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(open["alerts"].as_array().unwrap().len(), 2);

    let summary: Value = client
        .get(format!("{}/alerts/summary", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(summary["total"], 3);
    assert_eq!(summary["dismissed"], 1);

    let cleared: Value = client
        .delete(format!("{}/jobs/{}", base, job_id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(cleared["matches_removed"], 3);
}

#[tokio::test]
async fn rejects_wrong_content_type_and_oversized_image() {
    let base = spawn_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/assets", base))
        .query(&[("kind", "image"), ("name", "track.mp3")])
        .header("content-type", "audio/mpeg")
        .body(vec![1u8; 16])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let err: Value = resp.json().await.unwrap();
    assert_eq!(err["error"]["code"], "validation");

    let resp = client
        .post(format!("{}/assets", base))
        .query(&[("kind", "image"), ("name", "huge.png")])
        .header("content-type", "image/png")
        .body(vec![1u8; 21 * 1024 * 1024])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 413);

    let assets: Value = client
        .get(format!("{}/assets", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(assets["assets"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn unknown_ids_and_bad_requests() {
    let base = spawn_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("{}/jobs/{}", base, uuid::Uuid::new_v4()))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let err: Value = resp.json().await.unwrap();
    assert_eq!(err["error"]["code"], "not_found");

    let resp = client
        .post(format!("{}/assets/not-a-uuid/scan", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = client
        .post(format!("{}/assets", base))
        .query(&[("kind", "video"), ("name", "clip.mp4")])
        .header("content-type", "video/mp4")
        .body(vec![1u8; 16])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let err: Value = resp.json().await.unwrap();
    assert_eq!(err["error"]["code"], "bad_request");
}

#[tokio::test]
async fn cancel_and_clear_asset_conflicts() {
    let base = spawn_server().await;
    let client = reqwest::Client::new();

    let asset = stage(&client, &base, "Ambient Flow.mp3", "audio", "audio/mpeg").await;
    let asset_id = asset["id"].as_str().unwrap().to_string();
    let started: Value = client
        .post(format!("{}/assets/{}/scan", base, asset_id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let job_id = started["job_id"].as_str().unwrap().to_string();

    let job = wait_terminal(&client, &base, &job_id).await;
    assert_eq!(job["state"], "completed");

    let resp = client
        .post(format!("{}/jobs/{}/cancel", base, job_id))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);

    let resp = client
        .delete(format!("{}/assets/{}", base, asset_id))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let resp = client
        .delete(format!("{}/assets/{}", base, asset_id))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    let jobs: Value = client
        .get(format!("{}/jobs", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(jobs["jobs"].as_array().unwrap().len(), 1);
}
