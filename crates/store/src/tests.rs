// SPDX-FileCopyrightText: Copyright (C) The eggplant authors
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::sync::atomic::{AtomicUsize, Ordering};

use tempfile::TempDir;

use super::*;

/// Writes a marker file after a configurable delay, mimicking the
/// temporary-file-then-rename protocol of the real converters.
struct FakeConverter {
    output_directory: PathBuf,
    conversions: AtomicUsize,
    delay: Duration,
    fail: bool,
}

impl FakeConverter {
    fn new(output_directory: PathBuf) -> Self {
        Self {
            output_directory,
            conversions: AtomicUsize::new(0),
            delay: Duration::from_millis(50),
            fail: false,
        }
    }

    fn conversions(&self) -> usize {
        self.conversions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Converter for FakeConverter {
    fn output_file(&self, id: &str) -> PathBuf {
        self.output_directory.join(format!("{id}.bin"))
    }

    fn temporary_output_file(&self, id: &str) -> PathBuf {
        self.output_directory.join(format!("_{id}.bin"))
    }

    fn output_directory(&self) -> &Path {
        &self.output_directory
    }

    async fn convert(&self, item: &Item) -> anyhow::Result<()> {
        self.conversions.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        if self.fail {
            anyhow::bail!("refusing to convert");
        }
        let temporary = self.temporary_output_file(&item.id);
        tokio::fs::write(&temporary, b"converted").await?;
        tokio::fs::rename(&temporary, self.output_file(&item.id)).await?;
        Ok(())
    }
}

struct Fixture {
    // Held for the lifetime of the test.
    _cache: TempDir,
    _source: TempDir,
    converter: Arc<FakeConverter>,
    store: Arc<Store>,
    _shutdown_tx: watch::Sender<bool>,
}

fn fixture_with(
    configure: impl FnOnce(&mut FakeConverter, &mut Options),
) -> anyhow::Result<Fixture> {
    let cache = tempfile::tempdir()?;
    let source = tempfile::tempdir()?;

    let source_path = source.path().join("a.mp3");
    std::fs::write(&source_path, b"source audio")?;

    let mut converter = FakeConverter::new(cache.path().join("items"));
    let mut options = Options {
        worker_count: 4,
        ..Options::default()
    };
    configure(&mut converter, &mut options);
    let converter = Arc::new(converter);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let store = Store::new(
        Arc::clone(&converter) as Arc<dyn Converter>,
        options,
        shutdown_rx,
    )?;
    store.set_items(vec![Item {
        id: "a".to_owned(),
        path: source_path,
    }]);

    Ok(Fixture {
        _cache: cache,
        _source: source,
        converter,
        store,
        _shutdown_tx: shutdown_tx,
    })
}

fn fixture() -> anyhow::Result<Fixture> {
    fixture_with(|_, _| {})
}

#[tokio::test]
async fn concurrent_requests_share_one_conversion() {
    let fixture = fixture().unwrap();

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let store = Arc::clone(&fixture.store);
            tokio::spawn(async move { store.get_converted_file("a").await })
        })
        .collect();
    for handle in handles {
        let file = handle.await.unwrap().unwrap();
        assert_eq!("a.bin", file.name);
        assert_eq!(9, file.len);
    }

    assert_eq!(1, fixture.converter.conversions());
    assert!(fixture.store.state.lock().ongoing.is_empty());
}

#[tokio::test]
async fn an_already_converted_item_is_served_from_disk() {
    let fixture = fixture().unwrap();

    fixture.store.get_converted_file("a").await.unwrap();
    fixture.store.get_converted_file("a").await.unwrap();

    assert_eq!(1, fixture.converter.conversions());
}

#[tokio::test]
async fn unknown_items_are_not_converted() {
    let fixture = fixture().unwrap();

    assert!(matches!(
        fixture.store.get_converted_file("nope").await,
        Err(Error::NotFound)
    ));
    assert_eq!(0, fixture.converter.conversions());
}

#[tokio::test]
async fn conversion_failures_reach_every_waiter() {
    let fixture = fixture_with(|converter, _| converter.fail = true).unwrap();

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let store = Arc::clone(&fixture.store);
            tokio::spawn(async move { store.get_converted_file("a").await })
        })
        .collect();
    for handle in handles {
        assert!(matches!(
            handle.await.unwrap(),
            Err(Error::Conversion(_))
        ));
    }
    assert_eq!(1, fixture.converter.conversions());

    // The next request retries instead of caching the failure.
    assert!(fixture.store.get_converted_file("a").await.is_err());
    assert_eq!(2, fixture.converter.conversions());
}

#[tokio::test]
async fn replacing_the_item_set_unpublishes_old_items() {
    let fixture = fixture().unwrap();

    fixture.store.get_converted_file("a").await.unwrap();
    fixture.store.set_items(vec![]);

    assert!(matches!(
        fixture.store.get_converted_file("a").await,
        Err(Error::NotFound)
    ));
    assert!(fixture.store.state.lock().access_times.is_empty());
}

#[tokio::test]
async fn unused_items_are_evicted_after_the_retention_window() {
    let fixture = fixture_with(|_, options| options.retention = Duration::from_millis(400))
        .unwrap();

    fixture.store.get_converted_file("a").await.unwrap();
    let output = fixture.converter.output_file("a");
    assert!(output.exists());

    tokio::time::sleep(Duration::from_millis(1200)).await;
    assert!(!output.exists());
}

#[tokio::test]
async fn recently_accessed_items_survive_eviction() {
    let fixture = fixture_with(|_, options| options.retention = Duration::from_millis(400))
        .unwrap();

    let output = fixture.converter.output_file("a");
    for _ in 0..8 {
        fixture.store.get_converted_file("a").await.unwrap();
        assert!(output.exists());
        tokio::time::sleep(Duration::from_millis(150)).await;
    }
    assert!(output.exists());
}

#[tokio::test]
async fn stats_report_published_and_converted_items() {
    let fixture = fixture().unwrap();

    let stats = fixture.store.get_stats().await.unwrap();
    assert_eq!(
        StoreStats {
            all_items: 1,
            converted_items: 0,
            original_size: 12,
            converted_size: 0,
        },
        stats
    );

    fixture.store.get_converted_file("a").await.unwrap();
    let stats = fixture.store.get_stats().await.unwrap();
    assert_eq!(
        StoreStats {
            all_items: 1,
            converted_items: 1,
            original_size: 12,
            converted_size: 9,
        },
        stats
    );
}
