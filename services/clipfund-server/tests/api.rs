//! Router tests against the in-memory store and a stub provider

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{Request, StatusCode},
    Router,
};
use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use tokio_util::task::TaskTracker;
use tower::ServiceExt;

use clipfund_db::{MemoryStore, Store};
use clipfund_engine::{Engine, EngineConfig, EngineContext, ManualClock};
use clipfund_ingest::{
    sign, BulkMetrics, IngestResult, IpAllowlist, MetricsProvider, MetricsSnapshot, RefreshTicket,
    WebhookVerifier, SIGNATURE_HEADER,
};
use clipfund_scoring::thresholds_for_budget;
use clipfund_server::config::AuthSettings;
use clipfund_server::{create_router, drain_background, AppState};
use clipfund_types::{
    Campaign, CampaignId, CampaignStatus, EngagementCounters, PointsBreakdown, Submission,
    SubmissionId, SubmissionStatus, UserId,
};

const CRON_SECRET: &str = "cron-secret-for-tests";
const ADMIN_TOKEN: &str = "admin-token-for-tests";
const WEBHOOK_SECRET: &str = "whsec_tests";

/// Every content id has 1000 views and 10 likes
struct StubProvider;

#[async_trait]
impl MetricsProvider for StubProvider {
    fn name(&self) -> &str {
        "stub"
    }

    async fn fetch_metrics(&self, content_url: &str) -> IngestResult<MetricsSnapshot> {
        let id = content_url.rsplit('/').next().unwrap_or(content_url);
        Ok(snapshot(id))
    }

    async fn fetch_metrics_bulk(&self, content_ids: &[String]) -> IngestResult<BulkMetrics> {
        let snapshots: Vec<MetricsSnapshot> = content_ids.iter().map(|id| snapshot(id)).collect();
        Ok(snapshots.into())
    }

    async fn request_refresh(&self, account_id: &str) -> IngestResult<RefreshTicket> {
        Ok(RefreshTicket {
            job_id: Some(format!("job_{}", account_id)),
        })
    }
}

fn snapshot(content_id: &str) -> MetricsSnapshot {
    let counters = EngagementCounters {
        views: 1_000,
        likes: 10,
        ..Default::default()
    };
    MetricsSnapshot::new(counters, Utc::now()).with_content_id(content_id)
}

struct TestApp {
    router: Router,
    store: MemoryStore,
    background: TaskTracker,
    now: DateTime<Utc>,
}

fn app_with_allowlist(allowlist: &[&str]) -> TestApp {
    let now = Utc.with_ymd_and_hms(2026, 7, 1, 9, 0, 0).unwrap();
    let store = MemoryStore::new();
    let ctx = EngineContext::new(
        Arc::new(store.clone()),
        Arc::new(StubProvider),
        Arc::new(ManualClock::new(now)),
        EngineConfig::default(),
    )
    .unwrap();
    let verifier = WebhookVerifier::new(WEBHOOK_SECRET, IpAllowlist::parse(allowlist).unwrap(), false);
    let auth = AuthSettings {
        cron_secret: CRON_SECRET.into(),
        admin_token: Some(ADMIN_TOKEN.into()),
    };
    let state = Arc::new(AppState::new(Engine::new(ctx), verifier, auth));
    TestApp {
        background: state.background.clone(),
        router: create_router(state, &[]),
        store,
        now,
    }
}

fn app() -> TestApp {
    app_with_allowlist(&[])
}

impl TestApp {
    async fn campaign(&self) -> Campaign {
        let budget = dec!(100000);
        let campaign = Campaign {
            id: CampaignId::new(),
            artist_id: UserId::new(),
            title: "Late bloom".into(),
            status: CampaignStatus::Active,
            total_budget: budget,
            remaining_budget: budget,
            platform_fee_percent: dec!(10),
            safety_reserve_percent: dec!(5),
            total_points: 0,
            start_date: self.now - Duration::days(2),
            end_date: self.now + Duration::days(7),
            locked_at: None,
            metrics_processing_at: None,
            metrics_lease_token: None,
            next_metrics_fetch_at: Some(self.now),
            payout_status: None,
            payout_error: None,
            completed_at: None,
            insurance: thresholds_for_budget(budget),
            created_at: self.now - Duration::days(2),
            updated_at: self.now - Duration::days(2),
        };
        self.store.insert_campaign(&campaign).await.unwrap();
        campaign
    }

    async fn submission(&self, campaign: &Campaign, content_id: &str) -> Submission {
        let submission = Submission {
            id: SubmissionId::new(),
            campaign_id: campaign.id,
            creator_id: UserId::new(),
            status: SubmissionStatus::Approved,
            content_url: format!("https://clips.example.com/v/{}", content_id),
            external_content_id: content_id.to_string(),
            provider_account_id: Some("acc_1".into()),
            counters: EngagementCounters::default(),
            points: PointsBreakdown::default(),
            contribution_percent: Decimal::ZERO,
            total_earnings: Decimal::ZERO,
            last_checked_at: None,
            rejection_reason: None,
            created_at: campaign.created_at,
        };
        self.store.insert_submission(&submission).await.unwrap();
        submission
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }
}

fn post(uri: &str) -> axum::http::request::Builder {
    Request::builder().method("POST").uri(uri)
}

fn webhook_request(body: &[u8], signature: Option<&str>, peer: &str) -> Request<Body> {
    let mut builder = post("/api/webhooks/provider").header("content-type", "application/json");
    if let Some(signature) = signature {
        builder = builder.header(SIGNATURE_HEADER, signature);
    }
    let mut request = builder.body(Body::from(body.to_vec())).unwrap();
    let peer: SocketAddr = peer.parse().unwrap();
    request.extensions_mut().insert(ConnectInfo(peer));
    request
}

#[tokio::test]
async fn health_and_readiness() {
    let app = app();
    let (status, body) = app
        .send(Request::get("/health").body(Body::empty()).unwrap())
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    let (status, body) = app
        .send(Request::get("/ready").body(Body::empty()).unwrap())
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["store"], "healthy");
}

#[tokio::test]
async fn cron_requires_the_bearer_secret() {
    let app = app();
    let (status, body) = app
        .send(post("/api/cron/metrics-tick").body(Body::empty()).unwrap())
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], -1001);

    let (status, _) = app
        .send(
            post("/api/cron/metrics-tick")
                .header("authorization", "Bearer not-the-secret")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn metrics_tick_refreshes_due_campaigns() {
    let app = app();
    let campaign = app.campaign().await;
    let submission = app.submission(&campaign, "vid_1").await;

    let (status, body) = app
        .send(
            post("/api/cron/metrics-tick")
                .header("authorization", format!("Bearer {}", CRON_SECRET))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["campaigns"][0]["refreshed"], 1);
    assert_eq!(body["campaigns"][0]["cycle_complete"], true);

    let stored = app.store.get_submission(submission.id).await.unwrap().unwrap();
    assert_eq!(stored.counters.views, 1_000);
    assert!(stored.last_checked_at.is_some());
}

#[tokio::test]
async fn operators_can_use_the_admin_token() {
    let app = app();
    for path in ["/api/cron/pre-lock", "/api/cron/distribute"] {
        let (status, _) = app
            .send(
                post(path)
                    .header("x-admin-token", ADMIN_TOKEN)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{}", path);
    }
}

#[tokio::test]
async fn unsigned_webhooks_are_rejected_before_processing() {
    let app = app();
    let campaign = app.campaign().await;
    let submission = app.submission(&campaign, "vid_2").await;
    let body = json!({ "event": "metrics.updated", "id": "evt_1", "data": { "items": ["vid_2"] } })
        .to_string();

    let (status, _) = app
        .send(webhook_request(body.as_bytes(), None, "198.51.100.4:443"))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let forged = sign("some-other-secret", body.as_bytes()).unwrap();
    let (status, body_json) = app
        .send(webhook_request(body.as_bytes(), Some(&forged), "198.51.100.4:443"))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body_json["code"], -1002);

    assert!(drain_background(&app.background, StdDuration::from_secs(5)).await);
    assert!(app.store.all_fetch_logs().await.is_empty());
    let stored = app.store.get_submission(submission.id).await.unwrap().unwrap();
    assert!(stored.last_checked_at.is_none());
}

#[tokio::test]
async fn signed_webhook_is_acknowledged_then_applied() {
    let app = app();
    let campaign = app.campaign().await;
    let submission = app.submission(&campaign, "vid_3").await;
    let body = json!({ "event": "metrics.updated", "id": "evt_2", "data": { "items": ["vid_3"] } })
        .to_string();
    let signature = format!("sha256=deadbeef, sha256={}", sign(WEBHOOK_SECRET, body.as_bytes()).unwrap());

    let (status, ack) = app
        .send(webhook_request(body.as_bytes(), Some(&signature), "198.51.100.4:443"))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["received"], true);
    assert_eq!(ack["id"], "evt_2");

    // shutdown drains the delivery that was already acknowledged
    assert!(drain_background(&app.background, StdDuration::from_secs(5)).await);
    let stored = app.store.get_submission(submission.id).await.unwrap().unwrap();
    assert!(stored.last_checked_at.is_some());
    assert_eq!(stored.counters.views, 1_000);
}

#[tokio::test]
async fn drain_gives_up_after_the_grace_period() {
    let tasks = TaskTracker::new();
    tasks.spawn(std::future::pending::<()>());
    assert!(!drain_background(&tasks, StdDuration::from_millis(20)).await);
    assert!(tasks.is_closed());

    let idle = TaskTracker::new();
    assert!(drain_background(&idle, StdDuration::from_millis(20)).await);
}

#[tokio::test]
async fn webhooks_from_outside_the_allowlist_are_forbidden() {
    let app = app_with_allowlist(&["203.0.113.0/24"]);
    let body = json!({ "event": "metrics.updated", "id": "evt_3", "data": { "items": [] } }).to_string();
    let signature = sign(WEBHOOK_SECRET, body.as_bytes()).unwrap();

    let (status, _) = app
        .send(webhook_request(body.as_bytes(), Some(&signature), "198.51.100.4:443"))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .send(webhook_request(body.as_bytes(), Some(&signature), "203.0.113.20:443"))
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn malformed_but_signed_payload_is_a_bad_request() {
    let app = app();
    let body = br#"{"event":"metrics.updated","id":""}"#;
    let signature = sign(WEBHOOK_SECRET, body).unwrap();
    let (status, _) = app
        .send(webhook_request(body, Some(&signature), "198.51.100.4:443"))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn manual_finish_settles_once() {
    let app = app();
    let campaign = app.campaign().await;
    app.submission(&campaign, "vid_4").await;
    let uri = format!("/api/admin/campaigns/{}/finish", campaign.id);

    let (status, report) = app
        .send(post(&uri).header("x-admin-token", ADMIN_TOKEN).body(Body::empty()).unwrap())
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["insurance_triggered"], true);

    let (status, body) = app
        .send(post(&uri).header("x-admin-token", ADMIN_TOKEN).body(Body::empty()).unwrap())
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], -2002);

    let stored = app.store.get_campaign(campaign.id).await.unwrap().unwrap();
    assert_eq!(stored.status, CampaignStatus::Completed);
}

#[tokio::test]
async fn admin_endpoints_validate_the_campaign() {
    let app = app();
    let (status, _) = app
        .send(
            post("/api/admin/campaigns/not-a-uuid/recompute")
                .header("x-admin-token", ADMIN_TOKEN)
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let missing = CampaignId::new();
    let (status, _) = app
        .send(
            post(&format!("/api/admin/campaigns/{}/finish", missing))
                .header("x-admin-token", ADMIN_TOKEN)
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app
        .send(
            Request::get(format!("/api/admin/campaigns/{}/logs", missing))
                .header("x-admin-token", ADMIN_TOKEN)
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn audit_log_is_listed_newest_first() {
    let app = app();
    let campaign = app.campaign().await;
    app.submission(&campaign, "vid_5").await;

    app.send(
        post("/api/cron/metrics-tick")
            .header("authorization", format!("Bearer {}", CRON_SECRET))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    app.send(
        post(&format!("/api/admin/campaigns/{}/recompute", campaign.id))
            .header("x-admin-token", ADMIN_TOKEN)
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    let (status, logs) = app
        .send(
            Request::get(format!("/api/admin/campaigns/{}/logs?limit=5", campaign.id))
                .header("authorization", format!("Bearer {}", CRON_SECRET))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let logs = logs.as_array().unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0]["source"], "PER_CAMPAIGN_CRON");
    assert_eq!(logs[0]["status"], "SUCCESS");
}
