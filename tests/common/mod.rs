//! 集成测试共用的辅助函数

#![allow(dead_code)]

use serde_json::{json, Value};
use site_vitals::config::QueueConfig;
use site_vitals::queue::SqliteQueue;
use site_vitals::store::{NewMonitor, SqliteStore};
use site_vitals::MonitorStore;
use std::path::Path;
use std::sync::Arc;

/// 审计接口的响应体
pub fn audit_payload(performance: f64) -> Value {
    json!({
        "lighthouseResult": {
            "categories": {
                "performance": {"score": performance},
                "seo": {"score": 1.0},
                "accessibility": {"score": 0.87},
                "best-practices": {"score": 0.92}
            },
            "audits": {
                "first-contentful-paint": {"numericValue": 812.4},
                "largest-contentful-paint": {"numericValue": 1650.0},
                "cumulative-layout-shift": {"numericValue": 0.0123},
                "total-blocking-time": {"numericValue": 40.4},
                "render-blocking-resources": {
                    "score": 0.5,
                    "title": "Eliminate render-blocking resources",
                    "description": "Resources are blocking the first paint"
                }
            }
        }
    })
}

/// 临时数据库中的存储和队列
pub fn open_pipeline(path: &Path, lease_seconds: u64) -> (Arc<SqliteStore>, Arc<SqliteQueue>) {
    let store = SqliteStore::open(path).unwrap();
    let queue = SqliteQueue::open(
        path,
        &QueueConfig {
            lease_seconds,
            ..QueueConfig::default()
        },
    )
    .unwrap();
    (Arc::new(store), Arc::new(queue))
}

/// 新增一个监控项
pub async fn add_monitor(store: &SqliteStore, name: &str, url: &str, active: bool) -> i64 {
    store
        .create_monitor(NewMonitor::new(name, url).with_active(active).with_retry_count(0))
        .await
        .unwrap()
        .id
}
