//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了片段缓存的指标收集和监控功能。

use lazy_static::lazy_static;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{span, Level};

/// 指标收集器
///
/// 用于收集和存储片段缓存的各种运行时指标
#[derive(Clone, Debug, Default)]
pub struct Metrics {
    /// 片段请求总数统计
    /// key: "template:op:result"
    pub requests_total: Arc<Mutex<HashMap<String, u64>>>,
    /// 外部缓存操作统计
    /// key: "group:op:result"
    pub external_total: Arc<Mutex<HashMap<String, u64>>>,
    /// 委托给边缘缓存的次数
    /// key: template
    pub edge_delegations: Arc<Mutex<HashMap<String, u64>>>,
    /// 渲染耗时，key: "template:op" -> (total_duration_secs, count)
    pub operation_duration: Arc<Mutex<HashMap<String, (f64, u64)>>>,
    /// 当前存活的外部连接数
    pub external_connections: Arc<Mutex<HashMap<String, usize>>>,
}

lazy_static! {
    /// 全局指标实例
    pub static ref GLOBAL_METRICS: Metrics = Metrics::default();
}

fn locked<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Metrics {
    /// 记录片段请求指标
    ///
    /// # 参数
    ///
    /// * `template` - 片段模板
    /// * `op` - 操作类型（lookup/render/replay）
    /// * `result` - 操作结果（hit/miss/invalid_hit/populated/uncacheable/render_error）
    pub fn record_request(&self, template: &str, op: &str, result: &str) {
        let span = span!(Level::DEBUG, "fragment_request", template, op, result);
        let _enter = span.enter();
        let key = format!("{}:{}:{}", template, op, result);
        *locked(&self.requests_total).entry(key).or_insert(0) += 1;
    }

    /// 记录外部缓存操作
    pub fn record_external(&self, group: &str, op: &str, result: &str) {
        let key = format!("{}:{}:{}", group, op, result);
        *locked(&self.external_total).entry(key).or_insert(0) += 1;
    }

    /// 记录一次边缘委托
    pub fn record_edge_delegation(&self, template: &str) {
        *locked(&self.edge_delegations)
            .entry(template.to_string())
            .or_insert(0) += 1;
    }

    /// 记录操作耗时
    pub fn record_duration(&self, template: &str, op: &str, duration_secs: f64) {
        let key = format!("{}:{}", template, op);
        let mut map = locked(&self.operation_duration);
        let entry = map.entry(key).or_insert((0.0, 0));
        entry.0 += duration_secs;
        entry.1 += 1;
    }

    /// 设置外部连接数
    pub fn set_external_connections(&self, adapter: &str, count: usize) {
        locked(&self.external_connections).insert(adapter.to_string(), count);
    }

    /// 读取片段请求计数，未记录时返回0
    pub fn request_count(&self, template: &str, op: &str, result: &str) -> u64 {
        let key = format!("{}:{}:{}", template, op, result);
        locked(&self.requests_total).get(&key).copied().unwrap_or(0)
    }

    /// 读取外部缓存操作计数
    pub fn external_count(&self, group: &str, op: &str, result: &str) -> u64 {
        let key = format!("{}:{}:{}", group, op, result);
        locked(&self.external_total).get(&key).copied().unwrap_or(0)
    }

    /// 清空所有指标
    pub fn reset(&self) {
        locked(&self.requests_total).clear();
        locked(&self.external_total).clear();
        locked(&self.edge_delegations).clear();
        locked(&self.operation_duration).clear();
        locked(&self.external_connections).clear();
    }
}

/// 获取指标字符串
///
/// 将所有指标格式化为字符串返回，用于监控系统采集
///
/// # 返回值
///
/// 返回包含所有指标的字符串
pub fn get_metrics_string() -> String {
    let metrics = &GLOBAL_METRICS;
    let reqs = locked(&metrics.requests_total);
    let external = locked(&metrics.external_total);
    let edge = locked(&metrics.edge_delegations);
    let dur = locked(&metrics.operation_duration);
    let conns = locked(&metrics.external_connections);

    let mut output = String::new();
    for (k, v) in reqs.iter() {
        output.push_str(&format!("fragment_requests_total{{labels=\"{}\"}} {}\n", k, v));
    }
    for (k, v) in external.iter() {
        output.push_str(&format!("fragment_external_total{{labels=\"{}\"}} {}\n", k, v));
    }
    for (k, v) in edge.iter() {
        output.push_str(&format!(
            "fragment_edge_delegations_total{{template=\"{}\"}} {}\n",
            k, v
        ));
    }
    for (k, (total, count)) in dur.iter() {
        if let Some((template, op)) = k.rsplit_once(':') {
            output.push_str(&format!(
                "fragment_operation_duration_seconds_sum{{template=\"{}\", operation=\"{}\"}} {}\n",
                template, op, total
            ));
            output.push_str(&format!(
                "fragment_operation_duration_seconds_count{{template=\"{}\", operation=\"{}\"}} {}\n",
                template, op, count
            ));
        }
    }
    for (k, v) in conns.iter() {
        output.push_str(&format!(
            "fragment_external_connections{{adapter=\"{}\"}} {}\n",
            k, v
        ));
    }
    output
}
