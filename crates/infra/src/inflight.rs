//! 并发请求去重
//!
//! 相同去重键的并发请求合并为一次底层操作，所有等待者拿到同一个结果。
//! 底层操作在独立任务中执行，调用方全部放弃等待时仍会跑完并移除登记项。
//! 操作一旦结束（无论成功失败），登记项立即移除，之后的同键请求会重新执行。

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

type Entries<T> = Arc<Mutex<HashMap<String, SharedOutcome<T>>>>;
type SharedOutcome<T> = Shared<BoxFuture<'static, Result<T, InflightAborted>>>;

/// 底层操作没有产出结果（任务 panic 或被取消）
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("去重操作异常终止: key={key}")]
pub struct InflightAborted {
    pub key: String,
}

/// 任务结束时移除登记项，panic 时同样生效
struct EntryGuard<T>
where
    T: Clone + Send + Sync + 'static,
{
    entries: Entries<T>,
    key: String,
}

impl<T> Drop for EntryGuard<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.entries.lock().remove(&self.key);
    }
}

/// 进行中请求注册表
pub struct InflightRegistry<T>
where
    T: Clone + Send + Sync + 'static,
{
    entries: Entries<T>,
}

impl<T> InflightRegistry<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// 执行或加入同键操作
    ///
    /// 返回值第二项表示本次调用是否复用了已有操作。
    /// `make` 只在没有同键操作时调用，产生的 future 会被 spawn，
    /// 因此必须在 tokio 运行时内调用。
    pub async fn run<F, Fut>(&self, key: &str, make: F) -> (Result<T, InflightAborted>, bool)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let (outcome, joined) = {
            let mut entries = self.entries.lock();
            match entries.get(key) {
                Some(existing) => (existing.clone(), true),
                None => {
                    let guard = EntryGuard {
                        entries: Arc::clone(&self.entries),
                        key: key.to_string(),
                    };
                    let operation = make();
                    let handle = tokio::spawn(async move {
                        let _guard = guard;
                        operation.await
                    });
                    let owned_key = key.to_string();
                    let outcome = async move {
                        handle.await.map_err(|e| {
                            tracing::error!("[DEDUPE] key={} 底层任务异常终止: {}", owned_key, e);
                            InflightAborted { key: owned_key }
                        })
                    }
                    .boxed()
                    .shared();
                    entries.insert(key.to_string(), outcome.clone());
                    (outcome, false)
                }
            }
        };

        if joined {
            tracing::debug!("[DEDUPE] key={} 复用进行中的请求", key);
        }

        (outcome.await, joined)
    }

    /// 当前进行中的操作数
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().contains_key(key)
    }
}

impl<T> Default for InflightRegistry<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
