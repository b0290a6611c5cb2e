mod common;

use chrono::Duration;
use serde_json::json;

use clipfund_db::Store;
use clipfund_ingest::{IngestError, WebhookEnvelope};
use clipfund_types::{FetchSource, FetchStatus, SubmissionStatus};

use common::{shares, submission, Harness};

fn delivery(event: &str, event_id: &str, data: serde_json::Value) -> WebhookEnvelope {
    let body = json!({ "event": event, "id": event_id, "data": data });
    WebhookEnvelope::from_slice(body.to_string().as_bytes()).unwrap()
}

#[tokio::test]
async fn large_deliveries_are_fetched_in_chunks() {
    let h = Harness::new();
    let campaign = h.campaign(Duration::days(10)).await;
    let subs = h.submissions(&campaign, 120).await;
    let ids: Vec<&str> = subs.iter().map(|s| s.external_content_id.as_str()).collect();

    let report = h
        .engine
        .webhooks()
        .process(&delivery("metrics.updated", "evt_bulk", json!({ "items": ids })))
        .await
        .unwrap();
    assert_eq!(report.applied, 120);
    assert_eq!(report.campaigns_recomputed, 1);
    assert_eq!(h.provider.bulk_fetches(), 3);
    assert_eq!(h.provider.fetches(), 0);

    let stored = h.store.get_campaign(campaign.id).await.unwrap().unwrap();
    assert_eq!(stored.total_points, 120 * 15);
}

#[tokio::test]
async fn replayed_delivery_changes_nothing() {
    let h = Harness::new();
    let campaign = h.campaign(Duration::days(10)).await;
    let subs = h.submissions(&campaign, 2).await;
    let envelope = delivery(
        "refresh.completed",
        "evt_42",
        json!({
            "accountId": "acc_0",
            "jobId": "job_7",
            "items": [
                { "contentId": subs[0].external_content_id },
                { "contentId": subs[1].external_content_id },
            ],
        }),
    );

    let webhooks = h.engine.webhooks();
    let first = webhooks.process(&envelope).await.unwrap();
    assert_eq!(first.applied, 2);
    let logs_after_first = h.store.all_fetch_logs().await.len();

    // the provider now reports different numbers, but the event id was seen
    h.provider.set_metrics(&subs[0].external_content_id, shares(999));
    let second = webhooks.process(&envelope).await.unwrap();
    assert!(second.duplicate);
    assert_eq!(h.provider.bulk_fetches(), 1);
    assert_eq!(h.store.all_fetch_logs().await.len(), logs_after_first);

    let stored = h.store.get_submission(subs[0].id).await.unwrap().unwrap();
    assert_eq!(stored.points.total_points, 15);
}

#[tokio::test]
async fn content_entered_in_two_campaigns_updates_both() {
    let h = Harness::new();
    let a = h.campaign(Duration::days(10)).await;
    let b = h.campaign(Duration::days(12)).await;
    let in_a = submission(&a, 0, None);
    let mut in_b = submission(&b, 0, None);
    in_b.external_content_id = in_a.external_content_id.clone();
    in_b.content_url = in_a.content_url.clone();
    h.store.insert_submission(&in_a).await.unwrap();
    h.store.insert_submission(&in_b).await.unwrap();
    h.provider.set_metrics(&in_a.external_content_id, shares(40));

    let report = h
        .engine
        .webhooks()
        .process(&delivery(
            "metrics.updated",
            "evt_shared",
            json!({ "items": [in_a.external_content_id] }),
        ))
        .await
        .unwrap();
    assert_eq!(report.applied, 2);
    assert_eq!(report.campaigns_recomputed, 2);
    assert_eq!(h.provider.bulk_fetches(), 1);

    for campaign in [a.id, b.id] {
        let stored = h.store.get_campaign(campaign).await.unwrap().unwrap();
        assert_eq!(stored.total_points, 40);
        let log = h.store.fetch_logs(campaign, 1).await.unwrap().remove(0);
        assert_eq!(log.source, FetchSource::Webhook);
        assert_eq!(log.status, FetchStatus::Success);
        assert_eq!(log.webhook_event_id.as_deref(), Some("evt_shared"));
    }
}

#[tokio::test]
async fn content_missing_from_the_bulk_answer_is_skipped() {
    let h = Harness::new();
    let campaign = h.campaign(Duration::days(10)).await;
    let subs = h.submissions(&campaign, 2).await;
    h.provider.fail(&subs[1].external_content_id, IngestError::Timeout);

    let report = h
        .engine
        .webhooks()
        .process(&delivery(
            "metrics.updated",
            "evt_partial",
            json!({ "items": [subs[0].external_content_id, subs[1].external_content_id] }),
        ))
        .await
        .unwrap();
    assert_eq!((report.applied, report.skipped), (1, 1));

    let skipped = h
        .store
        .fetch_logs(campaign.id, 10)
        .await
        .unwrap()
        .into_iter()
        .find(|l| l.submission_id == Some(subs[1].id))
        .unwrap();
    assert_eq!(skipped.status, FetchStatus::Skipped);
}

#[tokio::test]
async fn content_reported_unavailable_is_rejected() {
    let h = Harness::new();
    let campaign = h.campaign(Duration::days(10)).await;
    let subs = h.submissions(&campaign, 2).await;
    h.provider.fail(
        &subs[1].external_content_id,
        IngestError::unavailable("video is private"),
    );

    let report = h
        .engine
        .webhooks()
        .process(&delivery(
            "metrics.updated",
            "evt_private",
            json!({ "items": [subs[0].external_content_id, subs[1].external_content_id] }),
        ))
        .await
        .unwrap();
    assert_eq!((report.applied, report.rejected, report.skipped), (1, 1, 0));
    assert_eq!(report.campaigns_recomputed, 1);

    let rejected = h.store.get_submission(subs[1].id).await.unwrap().unwrap();
    assert_eq!(rejected.status, SubmissionStatus::Rejected);
    assert!(rejected
        .rejection_reason
        .as_deref()
        .is_some_and(|r| r.contains("video is private")));

    // totals only count what is still approved
    let stored = h.store.get_campaign(campaign.id).await.unwrap().unwrap();
    assert_eq!(stored.total_points, 15);

    let log = h
        .store
        .fetch_logs(campaign.id, 10)
        .await
        .unwrap()
        .into_iter()
        .find(|l| l.submission_id == Some(subs[1].id))
        .unwrap();
    assert_eq!(log.status, FetchStatus::Failed);
    assert_eq!(log.webhook_event_id.as_deref(), Some("evt_private"));
}
