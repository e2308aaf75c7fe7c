//! 按键串行化的任务执行器
//!
//! 同一个键（服务器名，大小写不敏感）同时最多只有一个任务在执行。键忙时直接
//! 执行拒绝回调，不排队也不重试。只有分布式命令经过这里，本地控制台调用会绕过它。

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error};

#[derive(Debug, Clone, Default)]
pub struct TaskSerializer {
    in_flight: Arc<Mutex<HashMap<String, DateTime<Utc>>>>,
}

impl TaskSerializer {
    pub fn new() -> Self {
        Self::default()
    }

    /// 键空闲时在后台执行 `action` 并返回其句柄；键忙时在当前任务中执行
    /// `on_busy` 并返回 None
    ///
    /// 无论 `action` 正常结束还是 panic，结束后都会释放键。
    pub async fn submit<A, B>(&self, key: &str, action: A, on_busy: B) -> Option<JoinHandle<()>>
    where
        A: Future<Output = ()> + Send + 'static,
        B: Future<Output = ()>,
    {
        let key = key.to_lowercase();
        {
            let mut in_flight = self.in_flight.lock().await;
            if in_flight.contains_key(&key) {
                drop(in_flight);
                debug!("{} 已有任务在执行", key);
                on_busy.await;
                return None;
            }
            in_flight.insert(key.clone(), Utc::now());
        }

        let in_flight = Arc::clone(&self.in_flight);
        Some(tokio::spawn(async move {
            let outcome = tokio::spawn(action).await;
            in_flight.lock().await.remove(&key);
            if let Err(e) = outcome {
                error!("{} 的任务异常结束: {}", key, e);
            }
        }))
    }

    pub async fn is_busy(&self, key: &str) -> bool {
        self.in_flight.lock().await.contains_key(&key.to_lowercase())
    }

    /// 正在执行的键及其开始时间
    pub async fn in_flight(&self) -> Vec<(String, DateTime<Utc>)> {
        let mut entries: Vec<_> = self
            .in_flight
            .lock()
            .await
            .iter()
            .map(|(key, since)| (key.clone(), *since))
            .collect();
        entries.sort();
        entries
    }
}
