//! 性能审计报告解析
//!
//! 把 PageSpeed Insights 风格的 lighthouse 响应归一化为 [`AuditReport`]

use crate::error::AuditError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 最多保留的待改进审计项数量
pub const MAX_FINDINGS: usize = 10;

/// 低于该分数的审计项视为待改进
pub const FINDING_SCORE_THRESHOLD: f64 = 0.9;

/// 待改进的审计项
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditFinding {
    /// 标题
    pub title: String,
    /// 描述
    pub description: String,
    /// 原始分数（0~1）
    pub score: f64,
}

/// 加载过程截图帧
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilmstripFrame {
    /// 图片数据（data URI）
    pub data: String,
    /// 相对页面加载开始的时间（毫秒）
    pub timing: Option<f64>,
}

/// 归一化后的审计结果
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditReport {
    /// 性能得分（0~100，一位小数）
    pub perf_score: Option<f64>,
    /// SEO 得分
    pub perf_seo: Option<f64>,
    /// 无障碍得分
    pub perf_accessible: Option<f64>,
    /// 最佳实践得分
    pub perf_best_practices: Option<f64>,
    /// 首次内容绘制（秒）
    pub perf_fcp: Option<f64>,
    /// 最大内容绘制（秒）
    pub perf_lcp: Option<f64>,
    /// 累积布局偏移
    pub perf_cls: Option<f64>,
    /// 总阻塞时间（毫秒）
    pub perf_tbt: Option<i64>,
    /// 待改进项，按响应中的顺序
    #[serde(default)]
    pub perf_details: Vec<AuditFinding>,
    /// 最终截图
    pub perf_screenshot: Option<String>,
    /// 加载过程缩略图
    #[serde(default)]
    pub perf_thumbnails: Vec<FilmstripFrame>,
}

/// 四舍五入到指定小数位
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

fn category_score(categories: Option<&Value>, key: &str) -> Option<f64> {
    categories?
        .get(key)?
        .get("score")?
        .as_f64()
        .map(|score| round_to(score * 100.0, 1))
}

fn numeric_value(audits: Option<&Value>, key: &str) -> Option<f64> {
    audits?.get(key)?.get("numericValue")?.as_f64()
}

fn collect_findings(audits: Option<&Value>) -> Vec<AuditFinding> {
    let Some(map) = audits.and_then(Value::as_object) else {
        return Vec::new();
    };

    map.values()
        .filter_map(|audit| {
            let score = audit.get("score")?.as_f64()?;
            if score >= FINDING_SCORE_THRESHOLD {
                return None;
            }
            Some(AuditFinding {
                title: text_field(audit, "title"),
                description: text_field(audit, "description"),
                score,
            })
        })
        .take(MAX_FINDINGS)
        .collect()
}

fn collect_thumbnails(audits: Option<&Value>) -> Vec<FilmstripFrame> {
    audits
        .and_then(|a| a.get("screenshot-thumbnails"))
        .and_then(|a| a.get("details"))
        .and_then(|d| d.get("items"))
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    Some(FilmstripFrame {
                        data: item.get("data")?.as_str()?.to_string(),
                        timing: item.get("timing").and_then(Value::as_f64),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

fn text_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// 解析审计API响应
///
/// # 参数
/// * `payload` - 完整的响应JSON
///
/// # 返回
/// * `Result<AuditReport, AuditError>` - 缺少 `lighthouseResult` 时返回错误
pub fn parse_report(payload: &Value) -> Result<AuditReport, AuditError> {
    let lighthouse = payload
        .get("lighthouseResult")
        .filter(|v| v.is_object())
        .ok_or_else(|| AuditError::InvalidResponse("missing lighthouseResult".to_string()))?;

    let categories = lighthouse.get("categories");
    let audits = lighthouse.get("audits");

    Ok(AuditReport {
        perf_score: category_score(categories, "performance"),
        perf_seo: category_score(categories, "seo"),
        perf_accessible: category_score(categories, "accessibility"),
        perf_best_practices: category_score(categories, "best-practices"),
        perf_fcp: numeric_value(audits, "first-contentful-paint").map(|ms| round_to(ms / 1000.0, 2)),
        perf_lcp: numeric_value(audits, "largest-contentful-paint")
            .map(|ms| round_to(ms / 1000.0, 2)),
        perf_cls: numeric_value(audits, "cumulative-layout-shift").map(|v| round_to(v, 3)),
        perf_tbt: numeric_value(audits, "total-blocking-time").map(|ms| ms.round() as i64),
        perf_details: collect_findings(audits),
        perf_screenshot: audits
            .and_then(|a| a.get("final-screenshot"))
            .and_then(|a| a.get("details"))
            .and_then(|d| d.get("data"))
            .and_then(Value::as_str)
            .map(str::to_string),
        perf_thumbnails: collect_thumbnails(audits),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_payload() -> Value {
        json!({
            "lighthouseResult": {
                "categories": {
                    "performance": {"score": 0.95},
                    "seo": {"score": 0.90},
                    "accessibility": {"score": 1.0},
                    "best-practices": {"score": 0.85}
                },
                "audits": {
                    "first-contentful-paint": {"numericValue": 1200, "score": 0.99},
                    "largest-contentful-paint": {"numericValue": 2534.7, "score": 0.8,
                        "title": "Largest Contentful Paint", "description": "LCP marks..."},
                    "cumulative-layout-shift": {"numericValue": 0.10049},
                    "total-blocking-time": {"numericValue": 199.6},
                    "final-screenshot": {"details": {"data": "data:image/png;base64,AAAA"}},
                    "screenshot-thumbnails": {
                        "details": {"items": [{"data": "frame-1", "timing": 100}, {"data": "frame-2"}]}
                    },
                    "unused-javascript": {"score": 0.45, "title": "Reduce unused JavaScript",
                        "description": "Remove dead code"},
                    "informative": {"score": null, "title": "Diagnostics"}
                }
            }
        })
    }

    #[test]
    fn test_parse_scores_and_metrics() {
        let report = parse_report(&sample_payload()).unwrap();

        assert_eq!(report.perf_score, Some(95.0));
        assert_eq!(report.perf_seo, Some(90.0));
        assert_eq!(report.perf_accessible, Some(100.0));
        assert_eq!(report.perf_best_practices, Some(85.0));
        assert_eq!(report.perf_fcp, Some(1.2));
        assert_eq!(report.perf_lcp, Some(2.53));
        assert_eq!(report.perf_cls, Some(0.1));
        assert_eq!(report.perf_tbt, Some(200));
    }

    #[test]
    fn test_parse_screenshots() {
        let report = parse_report(&sample_payload()).unwrap();

        assert_eq!(
            report.perf_screenshot.as_deref(),
            Some("data:image/png;base64,AAAA")
        );
        assert_eq!(report.perf_thumbnails.len(), 2);
        assert_eq!(report.perf_thumbnails[0].timing, Some(100.0));
        assert_eq!(report.perf_thumbnails[1].timing, None);
    }

    #[test]
    fn test_findings_keep_payload_order_and_skip_null_scores() {
        let report = parse_report(&sample_payload()).unwrap();

        let titles: Vec<&str> = report
            .perf_details
            .iter()
            .map(|f| f.title.as_str())
            .collect();
        assert_eq!(
            titles,
            vec!["Largest Contentful Paint", "Reduce unused JavaScript"]
        );
        assert_eq!(report.perf_details[1].score, 0.45);
    }

    #[test]
    fn test_findings_are_capped() {
        let mut audits = serde_json::Map::new();
        for i in 0..15 {
            audits.insert(
                format!("audit-{i:02}"),
                json!({"score": 0.1, "title": format!("Audit {i}"), "description": ""}),
            );
        }
        let payload = json!({"lighthouseResult": {"audits": audits}});

        let report = parse_report(&payload).unwrap();
        assert_eq!(report.perf_details.len(), MAX_FINDINGS);
        assert_eq!(report.perf_details[0].title, "Audit 0");
        assert_eq!(report.perf_details[9].title, "Audit 9");
        assert!(report.perf_score.is_none());
    }

    #[test]
    fn test_missing_lighthouse_result() {
        let err = parse_report(&json!({"error": {"code": 500}})).unwrap_err();
        assert!(matches!(err, AuditError::InvalidResponse(_)));
    }

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(0.95 * 100.0, 1), 95.0);
        assert_eq!(round_to(1.23456, 2), 1.23);
        assert_eq!(round_to(0.12345, 3), 0.123);
    }
}
