//! 测试辅助函数

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;

/// 测试环境工具
pub struct TestEnv;

impl TestEnv {
    /// 轮询条件直到成立或超时
    pub async fn wait_for<F, Fut>(mut condition: F, timeout: Duration) -> bool
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        let start = std::time::Instant::now();

        while start.elapsed() < timeout {
            if condition().await {
                return true;
            }
            sleep(Duration::from_millis(20)).await;
        }

        condition().await
    }

    /// 初始化测试日志（每个测试二进制调用一次即可）
    pub fn init_logging() {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter("debug")
            .try_init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_wait_for_success() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        let ok = TestEnv::wait_for(
            move || {
                let c = c.clone();
                async move { c.fetch_add(1, Ordering::SeqCst) >= 2 }
            },
            Duration::from_secs(1),
        )
        .await;
        assert!(ok);
    }

    #[tokio::test]
    async fn test_wait_for_timeout() {
        let ok = TestEnv::wait_for(|| async { false }, Duration::from_millis(50)).await;
        assert!(!ok);
    }
}
