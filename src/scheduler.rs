//! Background load scheduler.
//!
//! A fixed pool of worker threads consumes a min-priority queue of load
//! requests and populates the shared [`ImageCache`]. Lower priority numbers
//! are served first; the terminate sentinel orders ahead of every real
//! entry, so shutdown pops promptly even when the queue is full. Decoder
//! failures are converted to cache state at the worker boundary and never
//! reach the control thread.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use crate::cache::{CacheEntry, ImageCache, LoadKey, Tier};
use crate::decoder::{ScanDecoder, decode_thumbnail};
use crate::model::Specimen;

/// File locations of one scan, fixed for the lifetime of a session.
///
/// Workers read from the plan concurrently with the control thread, so it is
/// split off from the mutable case model and shared immutably.
#[derive(Debug, Clone)]
pub struct ScanSource {
    /// Source files in sorted order, one per magnification level.
    pub paths: Vec<PathBuf>,
    /// Thumbnail file, if one exists.
    pub thumbnail: Option<PathBuf>,
}

/// Immutable per-session index of every scan's file locations.
#[derive(Debug, Default)]
pub struct LoadPlan {
    specimens: Vec<Vec<ScanSource>>,
}

impl LoadPlan {
    /// Capture the file locations of every scan, in flattened scan order.
    pub fn from_specimens(specimens: &[Specimen]) -> Self {
        let specimens = specimens
            .iter()
            .map(|specimen| {
                specimen
                    .scans()
                    .map(|scan| ScanSource {
                        paths: scan.paths(),
                        thumbnail: scan.thumbnail_path(),
                    })
                    .collect()
            })
            .collect();
        Self { specimens }
    }

    /// Source files for a (specimen, scan) pair.
    pub fn source(&self, specimen: usize, scan: usize) -> Option<&ScanSource> {
        self.specimens.get(specimen)?.get(scan)
    }

    /// Number of scans of a specimen.
    pub fn scan_count(&self, specimen: usize) -> usize {
        self.specimens.get(specimen).map_or(0, Vec::len)
    }

    /// Number of specimens in the plan.
    pub fn specimen_count(&self) -> usize {
        self.specimens.len()
    }
}

/// One queue slot: a prioritized load, or the terminate sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Task {
    /// Tells a worker to exit; compares below every load.
    Terminate,
    /// A prioritized decode request; lower priority is more urgent.
    Load { priority: usize, key: LoadKey },
}

impl Ord for Task {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Task::Terminate, Task::Terminate) => Ordering::Equal,
            (Task::Terminate, Task::Load { .. }) => Ordering::Less,
            (Task::Load { .. }, Task::Terminate) => Ordering::Greater,
            (
                Task::Load {
                    priority: a,
                    key: ka,
                },
                Task::Load {
                    priority: b,
                    key: kb,
                },
            ) => a.cmp(b).then_with(|| ka.cmp(kb)),
        }
    }
}

impl PartialOrd for Task {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Blocking min-priority queue shared by the control thread and workers.
#[derive(Debug)]
struct LoadQueue {
    heap: Mutex<BinaryHeap<Reverse<Task>>>,
    available: Condvar,
}

impl LoadQueue {
    fn new() -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::new()),
            available: Condvar::new(),
        }
    }

    fn push(&self, task: Task) {
        self.lock().push(Reverse(task));
        self.available.notify_one();
    }

    /// Pop the most urgent task, blocking while the queue is empty.
    fn pop(&self) -> Task {
        let mut heap = self.lock();
        loop {
            if let Some(Reverse(task)) = heap.pop() {
                return task;
            }
            heap = self
                .available
                .wait(heap)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, BinaryHeap<Reverse<Task>>> {
        self.heap.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Bounded worker pool servicing prioritized load requests.
#[derive(Debug)]
pub struct LoadScheduler {
    queue: Arc<LoadQueue>,
    cache: ImageCache,
    workers: Vec<JoinHandle<()>>,
}

impl LoadScheduler {
    /// Spawn `worker_count` decode workers over a shared queue.
    pub fn spawn(
        worker_count: usize,
        plan: Arc<LoadPlan>,
        decoder: Arc<dyn ScanDecoder>,
        cache: ImageCache,
        magnification: f32,
    ) -> Result<Self, std::io::Error> {
        let queue = Arc::new(LoadQueue::new());
        let mut workers = Vec::with_capacity(worker_count);
        for index in 0..worker_count {
            let queue = Arc::clone(&queue);
            let plan = Arc::clone(&plan);
            let decoder = Arc::clone(&decoder);
            let cache = cache.clone();
            let handle = thread::Builder::new()
                .name(format!("scan-loader-{index}"))
                .spawn(move || {
                    log::debug!("scan loader {index} started");
                    worker_loop(&queue, &plan, decoder.as_ref(), &cache, magnification);
                    log::debug!("scan loader {index} exiting");
                })?;
            workers.push(handle);
        }
        log::info!("spawned {worker_count} scan loader worker(s)");
        Ok(Self {
            queue,
            cache,
            workers,
        })
    }

    /// Request a background load.
    ///
    /// Returns `false` without enqueuing when the key is already cached or
    /// already requested but not yet serviced.
    pub fn request(&self, priority: usize, key: LoadKey) -> bool {
        if !self.cache.try_request(key) {
            return false;
        }
        self.queue.push(Task::Load { priority, key });
        true
    }

    /// Number of entries currently queued (loads and sentinels).
    pub fn queued_len(&self) -> usize {
        self.queue.len()
    }

    /// Cooperative drain: one terminate sentinel per worker, then join all.
    ///
    /// Blocks until every worker has exited; an in-flight decode runs to
    /// completion first. No timeout.
    pub fn shutdown(&mut self) {
        if self.workers.is_empty() {
            return;
        }
        for _ in 0..self.workers.len() {
            self.queue.push(Task::Terminate);
        }
        for handle in self.workers.drain(..) {
            if let Err(err) = handle.join() {
                log::warn!("scan loader worker panicked: {err:?}");
            }
        }
        log::debug!("scan loader workers joined");
    }
}

impl Drop for LoadScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(
    queue: &LoadQueue,
    plan: &LoadPlan,
    decoder: &dyn ScanDecoder,
    cache: &ImageCache,
    magnification: f32,
) {
    loop {
        match queue.pop() {
            Task::Terminate => break,
            Task::Load { key, .. } => match key.tier {
                Tier::Thumbnail => load_thumbnail(plan, cache, key),
                Tier::HighMagnification => {
                    load_high_magnification(plan, decoder, cache, magnification, key)
                }
            },
        }
    }
}

/// Decode a thumbnail and store the result.
///
/// Failures (missing path, unreadable file) cache an explicit unavailable
/// marker so the key is not retried forever. Also called synchronously from
/// the control thread for the current specimen.
pub(crate) fn load_thumbnail(plan: &LoadPlan, cache: &ImageCache, key: LoadKey) {
    let Some(source) = plan.source(key.specimen, key.scan) else {
        return;
    };
    let entry = match &source.thumbnail {
        None => CacheEntry::Unavailable,
        Some(path) => match decode_thumbnail(path) {
            Ok(image) => CacheEntry::Loaded(Arc::new(image)),
            Err(err) => {
                log::warn!("thumbnail for scan {}/{} was not loaded: {err}", key.specimen, key.scan);
                CacheEntry::Unavailable
            }
        },
    };
    cache.insert(key, entry);
}

/// Decode a scan at the target magnification by incremental pyramid loading.
///
/// The set of available magnifications is unknown until files are opened, so
/// source files are added one at a time in sorted order, retrying the target
/// magnification after each. On exhaustion the cache entry is left absent,
/// keeping the key retryable after eviction.
pub(crate) fn load_high_magnification(
    plan: &LoadPlan,
    decoder: &dyn ScanDecoder,
    cache: &ImageCache,
    magnification: f32,
    key: LoadKey,
) {
    let Some(source) = plan.source(key.specimen, key.scan) else {
        return;
    };
    if source.paths.is_empty() {
        log::warn!(
            "no source files for high magnification scan {}/{}",
            key.specimen,
            key.scan
        );
        return;
    }

    let mut subset: Vec<PathBuf> = Vec::with_capacity(source.paths.len());
    for path in &source.paths {
        subset.push(path.clone());
        let mut handle = match decoder.open(&subset) {
            Ok(handle) => handle,
            Err(err) => {
                log::warn!(
                    "opening scan {}/{} with {} file(s) failed: {err}",
                    key.specimen,
                    key.scan,
                    subset.len()
                );
                return;
            }
        };
        match handle.read_image(magnification) {
            Ok(image) => {
                cache.insert(key, CacheEntry::Loaded(Arc::new(image)));
                return;
            }
            Err(err) if err.is_magnification_unavailable() => continue,
            Err(err) => {
                log::warn!(
                    "decoding scan {}/{} at {magnification}x failed: {err}",
                    key.specimen,
                    key.scan
                );
                return;
            }
        }
    }

    log::warn!(
        "scan {}/{} was not loaded at {magnification}x; check whether the magnification is set correctly",
        key.specimen,
        key.scan
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::{DecodeError, ScanHandle};
    use image::RgbImage;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use std::time::{Duration, Instant};

    /// Pyramid stub: the target magnification only becomes representable
    /// once `needed` files are loaded.
    struct StubPyramidDecoder {
        needed: usize,
        open_sizes: Mutex<Vec<usize>>,
    }

    impl StubPyramidDecoder {
        fn new(needed: usize) -> Self {
            Self {
                needed,
                open_sizes: Mutex::new(Vec::new()),
            }
        }
    }

    impl ScanDecoder for StubPyramidDecoder {
        fn open(&self, paths: &[PathBuf]) -> Result<Box<dyn ScanHandle>, DecodeError> {
            self.open_sizes.lock().unwrap().push(paths.len());
            Ok(Box::new(StubHandle {
                loaded: paths.len(),
                needed: self.needed,
            }))
        }
    }

    struct StubHandle {
        loaded: usize,
        needed: usize,
    }

    impl ScanHandle for StubHandle {
        fn magnifications(&self) -> Vec<f32> {
            vec![5.0]
        }

        fn read_image(&mut self, magnification: f32) -> Result<RgbImage, DecodeError> {
            if self.loaded >= self.needed {
                Ok(RgbImage::new(2, 2))
            } else {
                Err(DecodeError::MagnificationUnavailable {
                    requested: magnification,
                })
            }
        }
    }

    /// Decoder that counts opens and always fails.
    struct CountingDecoder {
        opens: Arc<AtomicUsize>,
    }

    impl ScanDecoder for CountingDecoder {
        fn open(&self, _paths: &[PathBuf]) -> Result<Box<dyn ScanHandle>, DecodeError> {
            self.opens.fetch_add(1, AtomicOrdering::SeqCst);
            Err(DecodeError::Backend("always fails".to_string()))
        }
    }

    fn plan_with_sources(specimens: Vec<Vec<ScanSource>>) -> LoadPlan {
        LoadPlan { specimens }
    }

    fn pyramid_source(files: usize) -> ScanSource {
        ScanSource {
            paths: (0..files).map(|i| PathBuf::from(format!("level_{i}.dcm"))).collect(),
            thumbnail: None,
        }
    }

    fn wait_until(cache: &ImageCache, key: &LoadKey) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cache.contains(key) {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn sentinel_orders_ahead_of_every_load() {
        let urgent = Task::Load {
            priority: 0,
            key: LoadKey::thumbnail(0, 0),
        };
        assert!(Task::Terminate < urgent);
        assert!(urgent < Task::Load {
            priority: 1,
            key: LoadKey::thumbnail(0, 0),
        });
    }

    #[test]
    fn queue_pops_in_priority_order() {
        let queue = LoadQueue::new();
        // thumbnails at distance, high-mag pushed past the window extent
        queue.push(Task::Load {
            priority: 12,
            key: LoadKey::high_magnification(1, 0),
        });
        queue.push(Task::Load {
            priority: 2,
            key: LoadKey::thumbnail(2, 0),
        });
        queue.push(Task::Load {
            priority: 0,
            key: LoadKey::thumbnail(0, 0),
        });
        queue.push(Task::Load {
            priority: 11,
            key: LoadKey::high_magnification(0, 0),
        });

        let order: Vec<Task> = (0..4).map(|_| queue.pop()).collect();
        assert_eq!(
            order,
            vec![
                Task::Load {
                    priority: 0,
                    key: LoadKey::thumbnail(0, 0)
                },
                Task::Load {
                    priority: 2,
                    key: LoadKey::thumbnail(2, 0)
                },
                Task::Load {
                    priority: 11,
                    key: LoadKey::high_magnification(0, 0)
                },
                Task::Load {
                    priority: 12,
                    key: LoadKey::high_magnification(1, 0)
                },
            ]
        );
    }

    #[test]
    fn incremental_pyramid_decode_attempts_in_sorted_order() {
        let plan = plan_with_sources(vec![vec![pyramid_source(3)]]);
        let decoder = StubPyramidDecoder::new(3);
        let cache = ImageCache::new();
        let key = LoadKey::high_magnification(0, 0);

        load_high_magnification(&plan, &decoder, &cache, 5.0, key);

        // exactly three attempts: one file, then two, then three
        assert_eq!(*decoder.open_sizes.lock().unwrap(), vec![1, 2, 3]);
        assert!(cache.get(&key).unwrap().image().is_some());
    }

    #[test]
    fn pyramid_exhaustion_leaves_cache_entry_absent() {
        let plan = plan_with_sources(vec![vec![pyramid_source(2)]]);
        let decoder = StubPyramidDecoder::new(3);
        let cache = ImageCache::new();
        let key = LoadKey::high_magnification(0, 0);

        load_high_magnification(&plan, &decoder, &cache, 5.0, key);

        assert_eq!(*decoder.open_sizes.lock().unwrap(), vec![1, 2]);
        assert!(!cache.contains(&key));
    }

    #[test]
    fn missing_thumbnail_path_caches_unavailable_without_decode() {
        let plan = plan_with_sources(vec![vec![ScanSource {
            paths: vec![PathBuf::from("scan.dcm")],
            thumbnail: None,
        }]]);
        let cache = ImageCache::new();
        let key = LoadKey::thumbnail(0, 0);

        load_thumbnail(&plan, &cache, key);

        assert!(cache.get(&key).unwrap().image().is_none());
    }

    #[test]
    fn unreadable_thumbnail_caches_unavailable() {
        let plan = plan_with_sources(vec![vec![ScanSource {
            paths: Vec::new(),
            thumbnail: Some(PathBuf::from("/nonexistent/thumb.png")),
        }]]);
        let cache = ImageCache::new();
        let key = LoadKey::thumbnail(0, 0);

        load_thumbnail(&plan, &cache, key);

        assert!(cache.get(&key).unwrap().image().is_none());
    }

    #[test]
    fn request_deduplicates_until_serviced() {
        let plan = Arc::new(plan_with_sources(vec![vec![pyramid_source(1)]]));
        let opens = Arc::new(AtomicUsize::new(0));
        let decoder = Arc::new(CountingDecoder {
            opens: Arc::clone(&opens),
        });
        let cache = ImageCache::new();
        // zero workers: nothing drains the queue, so entries stay put
        let scheduler =
            LoadScheduler::spawn(0, plan, decoder, cache.clone(), 5.0).unwrap();

        let key = LoadKey::high_magnification(0, 0);
        assert!(scheduler.request(3, key));
        assert!(!scheduler.request(3, key));
        assert_eq!(scheduler.queued_len(), 1);
    }

    #[test]
    fn workers_service_thumbnails_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let thumb = dir.path().join("thumb.png");
        RgbImage::from_pixel(3, 3, image::Rgb([1, 2, 3]))
            .save(&thumb)
            .unwrap();

        let plan = Arc::new(plan_with_sources(vec![vec![ScanSource {
            paths: Vec::new(),
            thumbnail: Some(thumb),
        }]]));
        let decoder = Arc::new(StubPyramidDecoder::new(1));
        let cache = ImageCache::new();
        let mut scheduler =
            LoadScheduler::spawn(2, plan, decoder, cache.clone(), 5.0).unwrap();

        let key = LoadKey::thumbnail(0, 0);
        assert!(scheduler.request(0, key));
        assert!(wait_until(&cache, &key));
        assert!(cache.get(&key).unwrap().image().is_some());
        scheduler.shutdown();
    }

    #[test]
    fn shutdown_joins_workers_and_stops_cache_writes() {
        let plan = Arc::new(plan_with_sources(vec![vec![
            pyramid_source(1),
            pyramid_source(1),
        ]]));
        let opens = Arc::new(AtomicUsize::new(0));
        let decoder = Arc::new(CountingDecoder {
            opens: Arc::clone(&opens),
        });
        let cache = ImageCache::new();
        let mut scheduler =
            LoadScheduler::spawn(2, Arc::clone(&plan), decoder, cache.clone(), 5.0).unwrap();

        scheduler.request(0, LoadKey::high_magnification(0, 0));
        scheduler.request(0, LoadKey::high_magnification(0, 1));
        scheduler.shutdown();

        let opens_after_join = opens.load(AtomicOrdering::SeqCst);
        let cache_len_after_join = cache.len();

        // with no workers left, further requests change nothing
        scheduler.request(0, LoadKey::thumbnail(0, 0));
        thread::sleep(Duration::from_millis(50));
        assert_eq!(opens.load(AtomicOrdering::SeqCst), opens_after_join);
        assert_eq!(cache.len(), cache_len_after_join);
    }
}
