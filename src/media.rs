use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use anyhow::Result;
use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::{debug, warn};

use crate::cache::{MediaBuffer, MediaCache};
use crate::cancel::{self, CancellationToken};
use crate::data::MediaFetcher;
use crate::model::MediaReference;

pub const DEFAULT_WORKERS: usize = 2;

/// Temporary display resource created from a media buffer. Owned by exactly
/// one mounted item and released when dropped.
#[derive(Debug)]
pub struct DisplayHandle {
    id: u64,
    buffer: MediaBuffer,
    live: Arc<AtomicUsize>,
}

impl DisplayHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn bytes(&self) -> &[u8] {
        &self.buffer
    }
}

impl Drop for DisplayHandle {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug)]
pub enum MediaSlot {
    Loading,
    Ready(DisplayHandle),
    /// Download failed; the item renders without a thumbnail.
    Failed,
}

impl MediaSlot {
    pub fn is_ready(&self) -> bool {
        matches!(self, MediaSlot::Ready(_))
    }
}

struct PendingMedia {
    request_id: u64,
    cancel: CancellationToken,
}

struct Mounted {
    reference: Arc<MediaReference>,
    slot: MediaSlot,
    pending: Option<PendingMedia>,
}

struct Job {
    request_id: u64,
    item_id: String,
    url: String,
    cancel: CancellationToken,
}

struct MediaResponse {
    request_id: u64,
    item_id: String,
    result: Result<Vec<u8>>,
}

struct Worker {
    fetcher: Arc<dyn MediaFetcher>,
    responses: Sender<MediaResponse>,
}

impl Worker {
    fn run(&self, jobs: Receiver<Job>, stop: Receiver<()>) {
        loop {
            crossbeam_channel::select! {
                recv(stop) -> _ => break,
                recv(jobs) -> msg => {
                    match msg {
                        Ok(job) => self.process(job),
                        Err(_) => break,
                    }
                }
            }
        }
    }

    fn process(&self, job: Job) {
        if job.cancel.is_cancelled() {
            return;
        }
        let result = self.fetcher.fetch_media_bytes(&job.url, &job.cancel);
        if job.cancel.is_cancelled() {
            return;
        }
        let _ = self.responses.send(MediaResponse {
            request_id: job.request_id,
            item_id: job.item_id,
            result,
        });
    }
}

/// Resolves thumbnails for mounted items through the cache, falling back to a
/// worker pool that downloads them.
///
/// Responses are applied in [`poll`](Self::poll) on the caller's thread, which
/// is also where cache writes happen, so an unmounted item never writes.
pub struct MediaLoader {
    cache: Arc<MediaCache>,
    jobs: Sender<Job>,
    stop: Sender<()>,
    responses: Receiver<MediaResponse>,
    handles: Vec<thread::JoinHandle<()>>,
    mounted: HashMap<String, Mounted>,
    next_request_id: u64,
    next_handle_id: u64,
    live_handles: Arc<AtomicUsize>,
}

impl MediaLoader {
    pub fn new(cache: Arc<MediaCache>, fetcher: Arc<dyn MediaFetcher>, workers: usize) -> Self {
        let workers = if workers == 0 { DEFAULT_WORKERS } else { workers };
        let (job_tx, job_rx) = unbounded();
        let (stop_tx, stop_rx) = unbounded();
        let (response_tx, response_rx) = unbounded();

        let mut handles = Vec::new();
        for _ in 0..workers {
            let worker = Worker {
                fetcher: fetcher.clone(),
                responses: response_tx.clone(),
            };
            let rx_jobs = job_rx.clone();
            let rx_stop = stop_rx.clone();
            handles.push(thread::spawn(move || worker.run(rx_jobs, rx_stop)));
        }

        Self {
            cache,
            jobs: job_tx,
            stop: stop_tx,
            responses: response_rx,
            handles,
            mounted: HashMap::new(),
            next_request_id: 0,
            next_handle_id: 0,
            live_handles: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn cache(&self) -> &Arc<MediaCache> {
        &self.cache
    }

    /// Starts resolving `reference` for `item_id`. Remounting with the same
    /// reference is a no-op; a different reference replaces the old one.
    pub fn mount(&mut self, item_id: &str, reference: Arc<MediaReference>) {
        if let Some(existing) = self.mounted.get(item_id) {
            if Arc::ptr_eq(&existing.reference, &reference) {
                return;
            }
            self.unmount(item_id);
        }

        if let Some(buffer) = self.cache.read(&reference) {
            let handle = self.create_handle(buffer);
            self.mounted.insert(
                item_id.to_string(),
                Mounted {
                    reference,
                    slot: MediaSlot::Ready(handle),
                    pending: None,
                },
            );
            return;
        }

        let request_id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1);
        let cancel = CancellationToken::new();
        let job = Job {
            request_id,
            item_id: item_id.to_string(),
            url: reference.url.clone(),
            cancel: cancel.clone(),
        };
        self.mounted.insert(
            item_id.to_string(),
            Mounted {
                reference,
                slot: MediaSlot::Loading,
                pending: Some(PendingMedia { request_id, cancel }),
            },
        );
        let _ = self.jobs.send(job);
    }

    /// Cancels any download, releases the display handle and the identity
    /// cache entry for `item_id`.
    pub fn unmount(&mut self, item_id: &str) {
        let Some(mounted) = self.mounted.remove(item_id) else {
            return;
        };
        if let Some(pending) = mounted.pending {
            debug!(item = item_id, "cancelling media download");
            pending.cancel.cancel();
        }
        self.cache.release(&mounted.reference);
    }

    pub fn unmount_all(&mut self) {
        let ids: Vec<String> = self.mounted.keys().cloned().collect();
        for id in ids {
            self.unmount(&id);
        }
    }

    pub fn is_mounted(&self, item_id: &str) -> bool {
        self.mounted.contains_key(item_id)
    }

    pub fn mounted_ids(&self) -> impl Iterator<Item = &str> {
        self.mounted.keys().map(String::as_str)
    }

    pub fn slot(&self, item_id: &str) -> Option<&MediaSlot> {
        self.mounted.get(item_id).map(|mounted| &mounted.slot)
    }

    pub fn has_pending(&self) -> bool {
        self.mounted.values().any(|mounted| mounted.pending.is_some())
    }

    /// Display handles currently alive across all items.
    pub fn live_handles(&self) -> usize {
        self.live_handles.load(Ordering::SeqCst)
    }

    pub fn poll(&mut self) -> bool {
        let mut changed = false;
        while let Ok(response) = self.responses.try_recv() {
            changed |= self.apply_response(response);
        }
        changed
    }

    /// Blocks until every mounted item has settled or `timeout` elapses.
    pub fn wait_idle(&mut self, timeout: std::time::Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        let mut changed = self.poll();
        while self.has_pending() {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            match self.responses.recv_timeout(remaining) {
                Ok(response) => changed |= self.apply_response(response),
                Err(_) => break,
            }
        }
        changed
    }

    fn apply_response(&mut self, response: MediaResponse) -> bool {
        let Some(mounted) = self.mounted.get_mut(&response.item_id) else {
            return false;
        };
        let matches = mounted
            .pending
            .as_ref()
            .map(|pending| {
                pending.request_id == response.request_id && !pending.cancel.is_cancelled()
            })
            .unwrap_or(false);
        if !matches {
            return false;
        }
        mounted.pending = None;

        match response.result {
            Ok(bytes) => {
                let buffer: MediaBuffer = bytes.into();
                self.cache.write(&mounted.reference, buffer.clone());
                let id = self.next_handle_id;
                self.next_handle_id = self.next_handle_id.wrapping_add(1);
                self.live_handles.fetch_add(1, Ordering::SeqCst);
                mounted.slot = MediaSlot::Ready(DisplayHandle {
                    id,
                    buffer,
                    live: self.live_handles.clone(),
                });
            }
            Err(err) if cancel::is_cancellation(&err) => {
                mounted.slot = MediaSlot::Loading;
            }
            Err(err) => {
                warn!(
                    item = %response.item_id,
                    url = %mounted.reference.url,
                    error = %format!("{err:#}"),
                    "media download failed"
                );
                mounted.slot = MediaSlot::Failed;
            }
        }
        true
    }

    fn create_handle(&mut self, buffer: MediaBuffer) -> DisplayHandle {
        let id = self.next_handle_id;
        self.next_handle_id = self.next_handle_id.wrapping_add(1);
        self.live_handles.fetch_add(1, Ordering::SeqCst);
        DisplayHandle {
            id,
            buffer,
            live: self.live_handles.clone(),
        }
    }

    fn shutdown(&mut self) {
        self.unmount_all();
        for _ in &self.handles {
            let _ = self.stop.send(());
        }
        while let Some(handle) = self.handles.pop() {
            let _ = handle.join();
        }
    }
}

impl Drop for MediaLoader {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::MockMediaFetcher;
    use std::time::Duration;
    use tracing_test::traced_test;

    const WAIT: Duration = Duration::from_secs(5);

    fn reference(url: &str) -> Arc<MediaReference> {
        Arc::new(MediaReference::new(url, 200, 100))
    }

    fn loader(fetcher: Arc<MockMediaFetcher>) -> MediaLoader {
        MediaLoader::new(Arc::new(MediaCache::new(1 << 20)), fetcher, 2)
    }

    #[test]
    fn miss_downloads_and_populates_cache() {
        let fetcher = Arc::new(MockMediaFetcher::new(64));
        let mut loader = loader(fetcher.clone());
        let r = reference("https://m/a.mp4");
        loader.mount("a", r.clone());
        assert!(matches!(loader.slot("a"), Some(MediaSlot::Loading)));
        loader.wait_idle(WAIT);
        assert!(loader.slot("a").unwrap().is_ready());
        assert!(loader.cache().contains_url("https://m/a.mp4"));
        assert_eq!(loader.live_handles(), 1);
        assert_eq!(fetcher.calls(), vec!["https://m/a.mp4".to_string()]);
    }

    #[test]
    fn cache_hit_resolves_without_fetching() {
        let fetcher = Arc::new(MockMediaFetcher::new(64));
        let mut loader = loader(fetcher.clone());
        let r = reference("https://m/a.mp4");
        loader.cache().write(&r, vec![1u8, 2, 3].into());
        loader.mount("a", r);
        match loader.slot("a") {
            Some(MediaSlot::Ready(handle)) => assert_eq!(handle.bytes(), &[1u8, 2, 3]),
            other => panic!("expected ready slot, got {other:?}"),
        }
        assert!(fetcher.calls().is_empty());
    }

    #[test]
    #[traced_test]
    fn unmount_during_download_cancels_without_cache_write() {
        let fetcher = Arc::new(MockMediaFetcher::new(64).with_latency(Duration::from_millis(100)));
        let mut loader = loader(fetcher);
        loader.mount("a", reference("https://m/a.mp4"));
        loader.unmount("a");
        thread::sleep(Duration::from_millis(200));
        assert!(!loader.poll());
        assert_eq!(loader.cache().durable_len(), 0);
        assert!(loader.slot("a").is_none());
        assert_eq!(loader.live_handles(), 0);
        assert!(logs_contain("cancelling media download"));
        assert!(!logs_contain("media download failed"));
        assert!(!logs_contain("WARN"));
    }

    #[test]
    #[traced_test]
    fn failure_is_local_to_the_item() {
        let fetcher = Arc::new(MockMediaFetcher::new(16));
        let mut loader = loader(fetcher);
        loader.mount("bad", reference("https://m/broken.mp4"));
        loader.mount("good", reference("https://m/ok.mp4"));
        loader.wait_idle(WAIT);
        assert!(matches!(loader.slot("bad"), Some(MediaSlot::Failed)));
        assert!(loader.slot("good").unwrap().is_ready());
        assert!(logs_contain("media download failed"));
        assert!(logs_contain("https://m/broken.mp4"));
        assert!(!logs_contain("https://m/ok.mp4"));
    }

    #[test]
    fn handles_are_released_once_on_replace_and_unmount() {
        let fetcher = Arc::new(MockMediaFetcher::new(16));
        let mut loader = loader(fetcher);
        loader.mount("a", reference("https://m/1.mp4"));
        loader.wait_idle(WAIT);
        assert_eq!(loader.live_handles(), 1);

        loader.mount("a", reference("https://m/2.mp4"));
        loader.wait_idle(WAIT);
        assert_eq!(loader.live_handles(), 1);

        loader.unmount("a");
        assert_eq!(loader.live_handles(), 0);
        loader.unmount("a");
        assert_eq!(loader.live_handles(), 0);
    }

    #[test]
    fn remount_with_same_reference_is_a_no_op() {
        let fetcher = Arc::new(MockMediaFetcher::new(16));
        let mut loader = loader(fetcher.clone());
        let r = reference("https://m/a.mp4");
        loader.mount("a", r.clone());
        loader.mount("a", r);
        loader.wait_idle(WAIT);
        assert_eq!(fetcher.calls().len(), 1);
    }
}
