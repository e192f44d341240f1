//! In-memory `ThreadApi` used by unit tests

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use crate::error::{ApiError, ApiResult};
use crate::rest::ThreadApi;
use crate::types::{NewThread, SentMessage, ThreadInfo};

/// One message accepted by the fake
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Posted {
    pub channel_id: String,
    pub content: String,
    pub reply_to: Option<String>,
}

pub(crate) struct FakeApi {
    next_thread: AtomicU64,
    next_message: AtomicU64,
    threads: Mutex<HashMap<String, ThreadInfo>>,
    posted: Mutex<Vec<Posted>>,
    pub creates: AtomicUsize,
    pub fetches: AtomicUsize,
    pub archives: AtomicUsize,
    pub fail_create: AtomicBool,
    pub fail_send: AtomicBool,
    pub fail_fetch: AtomicBool,
    create_delay: Mutex<Option<Duration>>,
    fetch_delay: Mutex<Option<Duration>>,
    /// Sends left before every send fails; unlimited when `None`
    send_budget: Mutex<Option<usize>>,
    /// Completed fetch/archive calls, in order
    calls: Mutex<Vec<String>>,
}

impl FakeApi {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// First created thread gets id `t{first}`
    pub fn starting_at(first: u64) -> Self {
        Self {
            next_thread: AtomicU64::new(first),
            next_message: AtomicU64::new(1),
            threads: Mutex::new(HashMap::new()),
            posted: Mutex::new(Vec::new()),
            creates: AtomicUsize::new(0),
            fetches: AtomicUsize::new(0),
            archives: AtomicUsize::new(0),
            fail_create: AtomicBool::new(false),
            fail_send: AtomicBool::new(false),
            fail_fetch: AtomicBool::new(false),
            create_delay: Mutex::new(None),
            fetch_delay: Mutex::new(None),
            send_budget: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn set_create_delay(&self, delay: Duration) {
        *self.create_delay.lock() = Some(delay);
    }

    pub fn set_fetch_delay(&self, delay: Duration) {
        *self.fetch_delay.lock() = Some(delay);
    }

    /// Accept `count` more sends, then fail every one after
    pub fn allow_sends(&self, count: usize) {
        *self.send_budget.lock() = Some(count);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// Simulate the thread being deleted on the platform side
    pub fn delete_thread(&self, thread_id: &str) {
        self.threads.lock().remove(thread_id);
    }

    pub fn is_archived(&self, thread_id: &str) -> bool {
        self.threads
            .lock()
            .get(thread_id)
            .is_some_and(|t| t.archived)
    }

    pub fn posted(&self) -> Vec<Posted> {
        self.posted.lock().clone()
    }

    pub fn posted_to(&self, channel_id: &str) -> Vec<String> {
        self.posted
            .lock()
            .iter()
            .filter(|p| p.channel_id == channel_id)
            .map(|p| p.content.clone())
            .collect()
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    fn server_error() -> ApiError {
        ApiError::Status {
            status: 500,
            body: "internal error".to_string(),
        }
    }
}

#[async_trait]
impl ThreadApi for FakeApi {
    async fn fetch_thread(&self, thread_id: &str) -> ApiResult<ThreadInfo> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let delay = *self.fetch_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.calls.lock().push(format!("fetch {}", thread_id));
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(Self::server_error());
        }
        self.threads
            .lock()
            .get(thread_id)
            .cloned()
            .ok_or_else(|| ApiError::RemoteNotFound(thread_id.to_string()))
    }

    async fn create_thread(&self, _channel_id: &str, thread: &NewThread) -> ApiResult<ThreadInfo> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        let delay = *self.create_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(Self::server_error());
        }

        let id = format!("t{}", self.next_thread.fetch_add(1, Ordering::SeqCst));
        let info = ThreadInfo {
            id: id.clone(),
            name: Some(thread.name.clone()),
            archived: false,
        };
        self.threads.lock().insert(id, info.clone());
        Ok(info)
    }

    async fn send_message(
        &self,
        channel_id: &str,
        content: &str,
        reply_to: Option<&str>,
    ) -> ApiResult<SentMessage> {
        if self.fail_send.load(Ordering::SeqCst) {
            return Err(Self::server_error());
        }
        if let Some(left) = self.send_budget.lock().as_mut() {
            if *left == 0 {
                return Err(Self::server_error());
            }
            *left -= 1;
        }
        if !self.threads.lock().contains_key(channel_id) {
            return Err(ApiError::RemoteNotFound(channel_id.to_string()));
        }

        self.posted.lock().push(Posted {
            channel_id: channel_id.to_string(),
            content: content.to_string(),
            reply_to: reply_to.map(str::to_string),
        });
        let id = format!("m{}", self.next_message.fetch_add(1, Ordering::SeqCst));
        Ok(SentMessage {
            id,
            channel_id: Some(channel_id.to_string()),
        })
    }

    async fn archive_thread(&self, thread_id: &str) -> ApiResult<()> {
        self.archives.fetch_add(1, Ordering::SeqCst);
        self.calls.lock().push(format!("archive {}", thread_id));
        match self.threads.lock().get_mut(thread_id) {
            Some(thread) => {
                thread.archived = true;
                Ok(())
            }
            None => Err(ApiError::RemoteNotFound(thread_id.to_string())),
        }
    }
}
