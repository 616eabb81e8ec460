//! Integration tests for OA polling.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chatops_integration_tests::{
    FakeProvisioner, FakeSource, RecordingSender, card_buttons, memory_store, oa_document,
};
use chatops_server::feishu::{FeishuError, Sender};
use chatops_server::services::{
    CardService, CredentialRefresher, PassReport, PollingScheduler, Progress, RequestOutcome,
    SchedulerOptions,
};

const FWM: &str = "api master<br>web&nbsp;release/2";

fn scheduler(
    source: &Arc<FakeSource>,
    sender: &Arc<RecordingSender>,
    options: SchedulerOptions,
) -> PollingScheduler {
    let (store, _backend) = memory_store(100);
    PollingScheduler::new(
        source.clone(),
        CardService::new(store, sender.clone()),
        options,
    )
}

fn with_provisioner(provisioner: &Arc<FakeProvisioner>) -> SchedulerOptions {
    SchedulerOptions {
        provisioner: Some(provisioner.clone()),
        ..SchedulerOptions::default()
    }
}

#[tokio::test]
async fn test_card_goes_to_new_release_group() {
    let source = Arc::new(FakeSource::default().with_user("张三", "ou_1"));
    source.push("oa1", oa_document("张三", "发布-张三-v1", FWM));
    let sender = Arc::new(RecordingSender::default());
    let provisioner = Arc::new(FakeProvisioner::default());

    let report = scheduler(&source, &sender, with_provisioner(&provisioner))
        .run_pass()
        .await
        .unwrap();

    assert_eq!(
        report,
        PassReport {
            fetched: 1,
            marked: 1,
            pending: 0
        }
    );
    assert_eq!(source.marked(), ["oa1"]);

    let created = provisioner.created();
    assert_eq!(created.len(), 1);
    let (name, description, owner, uuid) = &created[0];
    assert_eq!(name, "🚀 发布群 - 发布-张三-v1");
    assert_eq!(description, "OA发布申请: 发布-张三-v1\n发起人: 张三");
    assert_eq!(owner, "ou_1");
    assert_eq!(uuid, "9001");

    assert_eq!(sender.texts(), ["✅ 群已创建，欢迎 张三"]);

    let cards = sender.cards();
    assert_eq!(cards.len(), 1);
    let (message, card) = &cards[0];
    assert_eq!(message.receive_id, "oc_1");
    assert_eq!(message.receive_id_type, "chat_id");
    assert_eq!(card["header"]["title"]["content"], "🚀api-服务发布通知");

    let services: Vec<(String, String)> = card_buttons(card)
        .into_iter()
        .filter(|(s, _)| s != "BATCH")
        .collect();
    let expected: Vec<(String, String)> = ["api-prod", "web-prod"]
        .into_iter()
        .flat_map(|s| {
            ["do_gray_release", "do_rollback", "do_restart"]
                .into_iter()
                .map(move |a| (s.to_string(), a.to_string()))
        })
        .collect();
    assert_eq!(services, expected);
    assert!(card.to_string().contains("release/2"));
}

#[tokio::test]
async fn test_falls_back_to_initiator_when_group_creation_fails() {
    let source = Arc::new(FakeSource::default().with_user("张三", "ou_1"));
    source.push("oa1", oa_document("张三", "发布-张三-v1", FWM));
    let sender = Arc::new(RecordingSender::default());
    let provisioner = Arc::new(FakeProvisioner::failing());

    scheduler(&source, &sender, with_provisioner(&provisioner))
        .run_pass()
        .await
        .unwrap();

    let cards = sender.cards();
    assert_eq!(cards.len(), 1);
    assert_eq!(cards[0].0.receive_id, "ou_1");
    assert_eq!(cards[0].0.receive_id_type, "user_id");
    assert_eq!(source.marked(), ["oa1"]);
}

#[tokio::test]
async fn test_initiator_without_provisioner() {
    let source = Arc::new(FakeSource::default().with_user("张三", "ou_1"));
    source.push("oa1", oa_document("张三", "发布-张三-v1", FWM));
    let sender = Arc::new(RecordingSender::default());

    scheduler(&source, &sender, SchedulerOptions::default())
        .run_pass()
        .await
        .unwrap();

    let cards = sender.cards();
    assert_eq!(cards.len(), 1);
    assert_eq!(cards[0].0.receive_id, "ou_1");
    assert!(sender.texts().is_empty());
}

#[tokio::test]
async fn test_numeric_initiator_uses_name_from_request_title() {
    let source = Arc::new(FakeSource::default().with_user("李四", "ou_2"));
    source.push("oa1", oa_document("10086", "发布-李四-v2", FWM));
    let sender = Arc::new(RecordingSender::default());

    scheduler(&source, &sender, SchedulerOptions::default())
        .run_pass()
        .await
        .unwrap();

    assert_eq!(sender.cards()[0].0.receive_id, "ou_2");
}

#[tokio::test]
async fn test_unknown_initiator_uses_fallback_receiver() {
    let source = Arc::new(FakeSource::default());
    source.push("oa1", oa_document("王五", "发布-王五", FWM));
    let sender = Arc::new(RecordingSender::default());
    let options = SchedulerOptions {
        fallback_receiver: Some(("oc_ops".to_string(), "chat_id".to_string())),
        ..SchedulerOptions::default()
    };

    scheduler(&source, &sender, options).run_pass().await.unwrap();

    let cards = sender.cards();
    assert_eq!(cards.len(), 1);
    assert_eq!(cards[0].0.receive_id, "oc_ops");
}

#[tokio::test]
async fn test_unroutable_and_empty_requests_are_marked() {
    let source = Arc::new(FakeSource::default());
    source.push("no-receiver", oa_document("王五", "发布-王五", FWM));
    source.push("no-jobs", oa_document("王五", "发布-王五", "<br>only-one-word<br>"));
    let sender = Arc::new(RecordingSender::default());
    let scheduler = scheduler(&source, &sender, SchedulerOptions::default());

    let report = scheduler.run_pass().await.unwrap();

    assert_eq!(report.marked, 2);
    assert_eq!(source.marked(), ["no-receiver", "no-jobs"]);
    assert!(sender.sent().is_empty());

    let again = scheduler.run_pass().await.unwrap();
    assert_eq!(again.fetched, 0);
}

#[tokio::test]
async fn test_unparseable_documents_stay_pending() {
    let source = Arc::new(FakeSource::default().with_user("张三", "ou_1"));
    source.push("broken", serde_json::json!({"unexpected": true}));
    source.push("good", oa_document("张三", "发布-张三-v1", FWM));
    let sender = Arc::new(RecordingSender::default());
    let scheduler = scheduler(&source, &sender, SchedulerOptions::default());

    let report = scheduler.run_pass().await.unwrap();
    assert_eq!(
        report,
        PassReport {
            fetched: 2,
            marked: 1,
            pending: 1
        }
    );
    assert_eq!(source.marked(), ["good"]);

    let again = scheduler.run_pass().await.unwrap();
    assert_eq!(again.fetched, 1);
    assert_eq!(again.pending, 1);
}

#[tokio::test]
async fn test_failed_delivery_is_still_marked() {
    let source = Arc::new(FakeSource::default().with_user("张三", "ou_1"));
    source.push("oa1", oa_document("张三", "发布-张三-v1", FWM));
    let sender = Arc::new(RecordingSender::failing());
    let scheduler = scheduler(&source, &sender, SchedulerOptions::default());

    let outcome = scheduler
        .process_request(
            &chatops_server::services::UpstreamRequest {
                id: "oa1".to_string(),
                document: oa_document("张三", "发布-张三-v1", FWM),
            },
            None,
        )
        .await;
    assert_eq!(outcome, RequestOutcome::SendFailed);

    let report = scheduler.run_pass().await.unwrap();
    assert_eq!(report.marked, 1);
}

#[tokio::test]
async fn test_overlapping_passes_are_skipped() {
    let source = Arc::new(FakeSource::default().with_fetch_delay(Duration::from_millis(200)));
    let sender = Arc::new(RecordingSender::default());
    let scheduler = scheduler(&source, &sender, SchedulerOptions::default());

    let first = tokio::spawn({
        let scheduler = scheduler.clone();
        async move { scheduler.run_pass().await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(scheduler.run_pass().await.is_none());
    assert!(first.await.unwrap().is_some());
    assert_eq!(source.fetches(), 1);

    assert!(scheduler.run_pass().await.is_some());
}

#[tokio::test]
async fn test_progress_receiver_gets_steps_and_card() {
    let source = Arc::new(FakeSource::default());
    let sender = Arc::new(RecordingSender::default());
    let scheduler = scheduler(&source, &sender, SchedulerOptions::default());
    let progress = Progress::new(
        sender.clone() as Arc<dyn Sender>,
        "ou_tester".to_string(),
        "open_id".to_string(),
    );

    let outcome = scheduler
        .process_request(
            &chatops_server::services::UpstreamRequest {
                id: "oa1".to_string(),
                document: oa_document("赵六", "发布-赵六", FWM),
            },
            Some(&progress),
        )
        .await;

    assert!(matches!(outcome, RequestOutcome::Sent(_)));
    let texts = sender.texts();
    assert_eq!(texts[0], "🔍 正在查找发起人: 赵六");
    assert!(texts[1].starts_with("⚠️ 无法找到发起人 '赵六' 的 ID"));
    assert_eq!(
        texts.last().unwrap(),
        "✅ 卡片已发送，请点击卡片按钮测试 Jenkins 触发"
    );

    let cards = sender.cards();
    assert_eq!(cards.len(), 1);
    assert_eq!(cards[0].0.receive_id, "ou_tester");
    assert_eq!(cards[0].0.receive_id_type, "open_id");
    assert!(source.marked().is_empty());
}

#[tokio::test]
async fn test_progress_reports_parse_failures() {
    let source = Arc::new(FakeSource::default());
    let sender = Arc::new(RecordingSender::default());
    let scheduler = scheduler(&source, &sender, SchedulerOptions::default());
    let progress = Progress::new(
        sender.clone() as Arc<dyn Sender>,
        "ou_tester".to_string(),
        "open_id".to_string(),
    );

    let outcome = scheduler
        .process_request(
            &chatops_server::services::UpstreamRequest {
                id: "oa1".to_string(),
                document: serde_json::json!([]),
            },
            Some(&progress),
        )
        .await;

    assert_eq!(outcome, RequestOutcome::ParseFailed);
    assert!(sender.texts()[0].starts_with("❌ 解析 OA 数据失败"));
}

#[derive(Default)]
struct CountingRefresher {
    calls: AtomicUsize,
}

#[async_trait]
impl CredentialRefresher for CountingRefresher {
    async fn refresh(&self) -> Result<(), FeishuError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(FeishuError::Token("refresh token expired".to_string()))
    }
}

#[tokio::test]
async fn test_refresh_failures_are_swallowed() {
    let source = Arc::new(FakeSource::default());
    let sender = Arc::new(RecordingSender::default());
    let refresher = Arc::new(CountingRefresher::default());
    let scheduler = scheduler(
        &source,
        &sender,
        SchedulerOptions {
            refresher: Some(refresher.clone()),
            ..SchedulerOptions::default()
        },
    );

    scheduler.refresh_credentials().await;
    scheduler.refresh_credentials().await;

    assert_eq!(refresher.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_zero_intervals_do_not_stop_the_loops() {
    let source = Arc::new(FakeSource::default());
    let sender = Arc::new(RecordingSender::default());

    let handle = scheduler(&source, &sender, SchedulerOptions::default())
        .spawn(Duration::ZERO, Duration::ZERO);
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(!handle.is_finished());
    assert_eq!(source.fetches(), 1);
    handle.abort();
}
