//! End-to-end: worker pool -> capture service -> query service over the
//! in-memory store.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use pretty_assertions::assert_eq;

use oncall_stats::collector::{StatisticsCaptureService, StatisticsWorkerPool};
use oncall_stats::config::StatisticsConfig;
use oncall_stats::db::MemoryStore;
use oncall_stats::models::{
    AcknowledgedEvent, AlertMetadata, FiredEvent, GroupBy, HiddenRuleInput, OnCallRuleInput,
    PeriodType, ResolvedAlertsRequest, ResolvedEvent, RuleConfig, RuleCriterion,
    StatisticsRequest,
};
use oncall_stats::query::StatisticsQueryService;

fn at(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 9, day, hour, minute, 0).unwrap()
}

fn fired(fp: &str, name: &str, severity: &str, labels: &[(&str, &str)], fired_at: DateTime<Utc>) -> FiredEvent {
    FiredEvent {
        fingerprint: fp.into(),
        alert_name: name.into(),
        severity: severity.into(),
        metadata: AlertMetadata {
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
            ..AlertMetadata::default()
        },
        fired_at,
    }
}

struct Harness {
    store: Arc<MemoryStore>,
    pool: StatisticsWorkerPool,
    query: StatisticsQueryService,
}

impl Harness {
    fn start() -> Self {
        let store = Arc::new(MemoryStore::new());
        let capture = Arc::new(StatisticsCaptureService::new(store.clone()));
        let config = StatisticsConfig {
            worker_count: 2,
            queue_size: 256,
            ..StatisticsConfig::default()
        };
        Self {
            pool: StatisticsWorkerPool::start(capture, &config),
            query: StatisticsQueryService::with_config(store.clone(), &config),
            store,
        }
    }

    /// Submit a phase of events and wait for it to be written
    async fn run(self, events: Vec<FiredEvent>) -> Self {
        for event in events {
            assert!(self.pool.submit_fired(event));
        }
        self.pool.shutdown().await;
        self
    }
}

#[tokio::test]
async fn lifecycle_through_pool_and_queries() {
    let harness = Harness::start();
    let t = at(2, 23, 30);
    let harness = harness
        .run(vec![
            fired("db-1", "DatabaseDown", "critical", &[("team", "dba"), ("env", "prod-east")], t),
            fired("db-1", "DatabaseDown", "critical", &[("team", "dba"), ("env", "prod-east")], t),
            fired("cpu-1", "HighCPU", "warning", &[("team", "web"), ("env", "staging-east")], at(3, 12, 0)),
            fired("disk-1", "DiskFull", "critical", &[("env", "staging-east")], at(4, 5, 0)),
        ])
        .await;
    assert_eq!(harness.store.len(), 3);

    // Transitions go through a second pool run so they land after the fires.
    let capture = Arc::new(StatisticsCaptureService::new(harness.store.clone()));
    let pool = StatisticsWorkerPool::start(capture, &StatisticsConfig::default());
    assert!(pool.submit_acknowledged(AcknowledgedEvent {
        fingerprint: "db-1".into(),
        acknowledged_at: t + Duration::minutes(5),
    }));
    assert!(pool.submit_resolved(ResolvedEvent {
        fingerprint: "db-1".into(),
        resolved_at: t + Duration::minutes(30),
        metadata: None,
    }));
    assert!(pool.submit_resolved(ResolvedEvent {
        fingerprint: "cpu-1".into(),
        resolved_at: at(3, 12, 10),
        metadata: None,
    }));
    // Never fired: skipped, not failed.
    assert!(pool.submit_resolved(ResolvedEvent {
        fingerprint: "ghost".into(),
        resolved_at: at(3, 0, 0),
        metadata: None,
    }));
    pool.shutdown().await;
    let stats = pool.stats();
    assert_eq!(stats.processed, 4);
    assert_eq!(stats.failed, 0);

    // Overall statistics
    let request = StatisticsRequest::new("alice", at(1, 0, 0), at(5, 0, 0));
    let response = harness.query.query_statistics(&request).await.unwrap();
    assert_eq!(response.total_alerts, 3);
    let overall = &response.statistics.unwrap()[0];
    assert_eq!(overall.stats.count, 3);
    assert_eq!(overall.stats.total_duration_seconds, 1800 + 600);
    assert!((overall.stats.avg_mttr_seconds - 300.0).abs() < f64::EPSILON);

    // Night-shift window
    let night = request.clone().time_of_day("22:00", "06:00");
    let response = harness.query.query_statistics(&night).await.unwrap();
    assert_eq!(response.total_alerts, 2);

    // Daily breakdown
    let daily = request.clone().by_period(PeriodType::Day);
    let breakdown = harness
        .query
        .query_statistics(&daily)
        .await
        .unwrap()
        .breakdown
        .unwrap();
    assert_eq!(
        breakdown.iter().map(|b| b.total_count).collect::<Vec<_>>(),
        vec![0, 1, 1, 1]
    );

    // On-call rule: critical DBA alerts, or anything from the web team
    let rules = harness.query.rules();
    tokio_test::assert_ok!(
        rules
            .create_rule(
                "alice",
                OnCallRuleInput {
                    rule_name: "dba critical".into(),
                    rule_config: RuleConfig::new(
                        "AND",
                        vec![
                            RuleCriterion::severity("in", &["critical"]),
                            RuleCriterion::label("team", "equals", "dba"),
                        ],
                    ),
                    is_active: None,
                },
            )
            .await
    );
    tokio_test::assert_ok!(
        rules
            .create_rule(
                "alice",
                OnCallRuleInput {
                    rule_name: "web".into(),
                    rule_config: RuleConfig::new(
                        "OR",
                        vec![
                            RuleCriterion::label("team", "equals", "web"),
                            RuleCriterion::alert_name("starts_with", "Web"),
                        ],
                    ),
                    is_active: None,
                },
            )
            .await
    );
    let by_name = request.clone().group_by(GroupBy::AlertName).with_rules();
    let groups = harness.query.query_statistics(&by_name).await.unwrap().statistics.unwrap();
    let mut names: Vec<String> = groups.into_iter().map(|g| g.key).collect();
    names.sort();
    assert_eq!(names, vec!["DatabaseDown".to_string(), "HighCPU".to_string()]);

    // Resolved alerts, with prod hidden by a regex rule
    harness
        .query
        .hidden()
        .save_hidden_rule(
            "alice",
            HiddenRuleInput {
                id: None,
                name: "hide prod".into(),
                label_key: "env".into(),
                label_value: "^prod-.*".into(),
                is_regex: true,
                is_enabled: None,
                priority: 10,
            },
        )
        .await
        .unwrap();
    let resolved = harness
        .query
        .query_resolved_alerts(&ResolvedAlertsRequest {
            user_id: Some("alice".into()),
            ..ResolvedAlertsRequest::default()
        })
        .await
        .unwrap();
    assert_eq!(resolved.total_count, 1);
    assert_eq!(resolved.alerts[0].fingerprint, "cpu-1");
    assert_eq!(resolved.alerts[0].total_duration_seconds, 600);
}

#[tokio::test]
async fn occurrence_row_carries_lifecycle_timings() {
    let store = Arc::new(MemoryStore::new());
    let capture = StatisticsCaptureService::new(store.clone());
    let t = at(10, 8, 0);

    capture
        .capture_fired(fired("abc", "Latency", "warning", &[], t))
        .await
        .unwrap();
    capture
        .capture_acknowledged(AcknowledgedEvent {
            fingerprint: "abc".into(),
            acknowledged_at: t + Duration::minutes(5),
        })
        .await
        .unwrap();
    capture
        .capture_resolved(ResolvedEvent {
            fingerprint: "abc".into(),
            resolved_at: t + Duration::minutes(30),
            metadata: None,
        })
        .await
        .unwrap();

    let history = capture.history("abc", None).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].mttr_seconds, Some(300));
    assert_eq!(history[0].duration_seconds, Some(1800));
}
