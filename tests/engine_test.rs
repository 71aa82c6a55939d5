use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use eventlens::{
    engine::upload_images, Deadline, DirectoryStorage, Embedding, EmbeddingExtractor, Engine, EngineOptions, Error, FaceDetector,
    FaceRegion, Image, MatchOptions, Pipeline, StorageAdapter,
};
use eventlens_vision::Detection;
use image::{DynamicImage, ImageFormat, Rgb};

/// Treats every non-black pixel of the first row as one face.
struct PixelFaces;

impl FaceDetector for PixelFaces {
    fn detect(&self, image: &Image) -> eventlens_vision::Result<Vec<FaceRegion>> {
        Ok((0..image.width())
            .map(|x| *image.get_pixel(x, 0))
            .filter(|px| px.0 != [0, 0, 0])
            .map(|px| FaceRegion {
                detection: Detection::default(),
                crop: Image::from_pixel(1, 1, px),
            })
            .collect())
    }
}

/// Looks up the embedding registered for a face's colour.
struct Palette(HashMap<[u8; 3], Vec<f32>>);

impl EmbeddingExtractor for Palette {
    fn embed(&self, faces: &[FaceRegion]) -> eventlens_vision::Result<Vec<Embedding>> {
        Ok(faces
            .iter()
            .map(|f| {
                let key = f.crop.get_pixel(0, 0).0;
                Embedding::from_vec(self.0.get(&key).cloned().unwrap_or_else(|| vec![0.0; 2]))
            })
            .collect())
    }
}

/// Unit vector with cosine `s` against [1, 0].
fn at(s: f32) -> Vec<f32> {
    vec![s, (1.0 - s * s).sqrt()]
}

const QUERY: [u8; 3] = [255, 0, 0];
const STRONG: [u8; 3] = [0, 255, 0];
const WEAK: [u8; 3] = [0, 0, 255];
const NEAR: [u8; 3] = [255, 255, 0];
const SECOND: [u8; 3] = [0, 255, 255];
const BROKEN: [u8; 3] = [9, 9, 9];

fn palette() -> Palette {
    Palette(HashMap::from([
        (QUERY, vec![1.0, 0.0]),
        (STRONG, at(0.82)),
        (WEAK, at(0.3)),
        (NEAR, at(0.55)),
        (SECOND, at(0.7)),
        (BROKEN, vec![0.0, 0.0]),
    ]))
}

/// PNG whose first row holds one pixel per face colour.
fn photo(faces: &[[u8; 3]]) -> Vec<u8> {
    let width = faces.len().max(1) as u32;
    let mut img = Image::new(width, 2);
    for (x, face) in faces.iter().enumerate() {
        img.put_pixel(x as u32, 0, Rgb(*face));
    }
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut buf, ImageFormat::Png)
        .unwrap();
    buf.into_inner()
}

struct Fixture {
    _dir: tempfile::TempDir,
    storage: Arc<DirectoryStorage>,
    engine: Engine,
}

fn fixture(options: EngineOptions) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(DirectoryStorage::new(dir.path()));
    let pipeline = Pipeline::new(Arc::new(PixelFaces), Arc::new(palette()));
    let engine = Engine::new(Arc::new(pipeline), storage.clone(), options);
    Fixture {
        _dir: dir,
        storage,
        engine,
    }
}

fn seed(storage: &DirectoryStorage, collection: &str, photos: &[(&str, Vec<[u8; 3]>)]) {
    for (id, faces) in photos {
        storage.put(collection, id, &photo(faces)).unwrap();
    }
}

#[test]
fn test_event_scenario_single_match() -> Result<()> {
    env_logger::try_init().ok();
    let fx = fixture(EngineOptions::default());
    seed(
        &fx.storage,
        "eventA",
        &[("1.png", vec![WEAK]), ("2.png", vec![STRONG]), ("3.png", vec![NEAR])],
    );

    let matches = fx.engine.find_similar("eventA", &photo(&[QUERY]))?;
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].identifier, "2.png");
    assert!((matches[0].similarity - 0.82).abs() < 1e-4);
    assert_eq!(matches[0].display_similarity, "0.8200");
    assert_eq!(&matches[0].jpeg[..2], &[0xFF, 0xD8]);
    Ok(())
}

#[test]
fn test_no_face_in_query_is_distinct_from_no_match() -> Result<()> {
    let fx = fixture(EngineOptions::default());
    seed(&fx.storage, "eventA", &[("1.png", vec![WEAK])]);

    let err = fx.engine.find_similar("eventA", &photo(&[])).unwrap_err();
    assert!(matches!(err, Error::NoFaceDetected));
    assert!(err.is_client_error());

    // A face that matches nothing is a plain empty result
    assert!(fx.engine.find_similar("eventA", &photo(&[QUERY]))?.is_empty());
    Ok(())
}

#[test]
fn test_empty_or_missing_collection_has_no_matches() -> Result<()> {
    let fx = fixture(EngineOptions::default());
    assert!(fx.engine.find_similar("never-created", &photo(&[QUERY]))?.is_empty());
    Ok(())
}

#[test]
fn test_invalid_query_bytes() {
    let fx = fixture(EngineOptions::default());
    let err = fx.engine.find_similar("eventA", b"not an image").unwrap_err();
    assert!(matches!(err, Error::Decode(_)));

    let err = fx
        .engine
        .find_similar_base64("eventA", "data:image/png;base64,!!!")
        .unwrap_err();
    assert!(matches!(err, Error::Decode(_)));
}

#[test]
fn test_base64_query() -> Result<()> {
    use base64::Engine as _;
    let fx = fixture(EngineOptions::default());
    seed(&fx.storage, "eventA", &[("1.png", vec![STRONG])]);

    let payload = format!(
        "data:image/png;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(photo(&[QUERY]))
    );
    let matches = fx.engine.find_similar_base64("eventA", &payload)?;
    assert_eq!(matches.len(), 1);
    Ok(())
}

#[test]
fn test_group_query_dedups_reference_photo() -> Result<()> {
    let fx = fixture(EngineOptions::default());
    // Both query faces match the single reference face, at 0.7 and 0.82
    seed(&fx.storage, "eventA", &[("group.png", vec![QUERY])]);

    let matches = fx
        .engine
        .find_similar("eventA", &photo(&[SECOND, STRONG]))?;
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].identifier, "group.png");
    assert!((matches[0].similarity - 0.82).abs() < 1e-4);
    Ok(())
}

#[test]
fn test_reference_faces_are_averaged() -> Result<()> {
    let mut colours = palette().0;
    colours.insert([1, 2, 3], vec![0.0, 1.0]);

    let dir = tempfile::tempdir()?;
    let storage = Arc::new(DirectoryStorage::new(dir.path()));
    // mean([1, 0], [0, 1]) = [0.5, 0.5], cosine 1/sqrt(2) against [1, 0]
    seed(&storage, "eventA", &[("pair.png", vec![QUERY, [1, 2, 3]])]);
    let pipeline = Pipeline::new(Arc::new(PixelFaces), Arc::new(Palette(colours)));
    let engine = Engine::new(Arc::new(pipeline), storage, EngineOptions::default());

    let matches = engine.find_similar("eventA", &photo(&[QUERY]))?;
    assert_eq!(matches.len(), 1);
    assert!((matches[0].similarity - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-4);
    Ok(())
}

#[test]
fn test_unusable_reference_photos_are_skipped() -> Result<()> {
    let fx = fixture(EngineOptions::default());
    seed(
        &fx.storage,
        "eventA",
        &[
            ("blank.png", vec![]),
            ("broken.png", vec![BROKEN]),
            ("good.png", vec![STRONG]),
        ],
    );
    fx.storage.put("eventA", "corrupt.jpg", b"\xFF\xD8garbage")?;

    let collection = fx
        .engine
        .load_collection("eventA", &eventlens::Deadline::unbounded())?;
    let ids: Vec<_> = collection
        .entries()
        .iter()
        .map(|e| e.identifier.as_str())
        .collect();
    assert_eq!(ids, vec!["good.png"]);
    Ok(())
}

#[test]
fn test_degenerate_query_face_fails() {
    let fx = fixture(EngineOptions::default());
    seed(&fx.storage, "eventA", &[("1.png", vec![STRONG])]);
    let err = fx
        .engine
        .find_similar("eventA", &photo(&[BROKEN]))
        .unwrap_err();
    assert!(matches!(err, Error::DegenerateEmbedding(_)));
}

#[test]
fn test_threshold_and_limit_options() -> Result<()> {
    let fx = fixture(EngineOptions::default());
    seed(
        &fx.storage,
        "eventA",
        &[
            ("1.png", vec![WEAK]),
            ("2.png", vec![STRONG]),
            ("3.png", vec![NEAR]),
            ("4.png", vec![SECOND]),
        ],
    );

    let loose = fx.engine.with_matching(MatchOptions {
        threshold: 0.5,
        max_results: None,
    });
    let ids: Vec<_> = loose
        .find_similar("eventA", &photo(&[QUERY]))?
        .into_iter()
        .map(|m| m.identifier)
        .collect();
    assert_eq!(ids, vec!["2.png", "4.png", "3.png"]);

    let top = fx.engine.with_matching(MatchOptions {
        threshold: 0.5,
        max_results: Some(1),
    });
    assert_eq!(top.find_similar("eventA", &photo(&[QUERY]))?.len(), 1);
    Ok(())
}

#[test]
fn test_timeout() {
    let fx = fixture(EngineOptions {
        timeout: Some(Duration::ZERO),
        ..EngineOptions::default()
    });
    seed(&fx.storage, "eventA", &[("1.png", vec![STRONG])]);

    let err = fx
        .engine
        .find_similar("eventA", &photo(&[QUERY]))
        .unwrap_err();
    assert!(matches!(err, Error::Timeout(_)));
}

#[test]
fn test_upload_names_sequentially() -> Result<()> {
    let fx = fixture(EngineOptions::default());

    let first = fx
        .engine
        .upload("eventA", &[photo(&[STRONG]), photo(&[WEAK])])?;
    assert_eq!(first, vec!["00001.jpg", "00002.jpg"]);

    let second = fx.engine.upload("eventA", &[photo(&[NEAR])])?;
    assert_eq!(second, vec!["00003.jpg"]);

    assert_eq!(fx.engine.list("eventA")?.len(), 3);
    let stored = fx.storage.fetch("eventA", "00001.jpg")?;
    assert_eq!(&stored[..2], &[0xFF, 0xD8]);
    Ok(())
}

#[test]
fn test_upload_rejects_batch_with_bad_image() {
    let fx = fixture(EngineOptions::default());
    let err = fx
        .engine
        .upload("eventA", &[photo(&[STRONG]), b"junk".to_vec()])
        .unwrap_err();
    assert!(matches!(err, Error::Decode(_)));
    assert!(fx.engine.list("eventA").unwrap().is_empty());
}

#[test]
fn test_concurrent_uploads_keep_every_image() -> Result<()> {
    const THREADS: usize = 8;
    const PER_THREAD: usize = 4;
    let fx = fixture(EngineOptions::default());

    let batches: Vec<Vec<String>> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let engine = fx.engine.clone();
                s.spawn(move || {
                    let photos: Vec<Vec<u8>> = (0..PER_THREAD).map(|_| photo(&[STRONG])).collect();
                    engine.upload("eventA", &photos)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect::<Vec<_>>()
    })
    .into_iter()
    .collect::<eventlens::Result<_>>()?;

    let returned: HashSet<String> = batches.into_iter().flatten().collect();
    assert_eq!(returned.len(), THREADS * PER_THREAD);
    let listed = fx.engine.list("eventA")?;
    assert_eq!(listed.len(), THREADS * PER_THREAD);
    assert_eq!(listed.iter().cloned().collect::<HashSet<_>>(), returned);
    Ok(())
}

/// Lists a collection as it was before any write, like a reader that raced
/// another uploader.
struct StaleList(DirectoryStorage);

impl StorageAdapter for StaleList {
    fn list(&self, _collection: &str) -> eventlens::Result<Vec<String>> {
        Ok(vec![])
    }
    fn fetch(&self, collection: &str, identifier: &str) -> eventlens::Result<Vec<u8>> {
        self.0.fetch(collection, identifier)
    }
    fn put(&self, collection: &str, identifier: &str, bytes: &[u8]) -> eventlens::Result<()> {
        self.0.put(collection, identifier, bytes)
    }
    fn remove(&self, collection: &str, identifier: &str) -> eventlens::Result<()> {
        self.0.remove(collection, identifier)
    }
    fn purge(&self, collection: &str) -> eventlens::Result<()> {
        self.0.purge(collection)
    }
}

#[test]
fn test_upload_skips_names_taken_by_another_writer() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let storage = StaleList(DirectoryStorage::new(dir.path()));
    storage.put("eventA", "00001.jpg", b"theirs")?;
    storage.put("eventA", "00002.jpg", b"theirs")?;

    let stored = upload_images(&storage, "eventA", &[photo(&[STRONG])], 90, &Deadline::new(None))?;
    assert_eq!(stored, vec!["00003.jpg"]);
    assert_eq!(storage.fetch("eventA", "00001.jpg")?, b"theirs");
    Ok(())
}

/// Fails every write after the first `ok_puts`.
struct FailingPuts {
    inner: DirectoryStorage,
    ok_puts: usize,
    puts: AtomicUsize,
}

impl StorageAdapter for FailingPuts {
    fn list(&self, collection: &str) -> eventlens::Result<Vec<String>> {
        self.inner.list(collection)
    }
    fn fetch(&self, collection: &str, identifier: &str) -> eventlens::Result<Vec<u8>> {
        self.inner.fetch(collection, identifier)
    }
    fn put(&self, collection: &str, identifier: &str, bytes: &[u8]) -> eventlens::Result<()> {
        if self.puts.fetch_add(1, Ordering::SeqCst) >= self.ok_puts {
            return Err(Error::storage(format!("writing {identifier}"), "disk full"));
        }
        self.inner.put(collection, identifier, bytes)
    }
    fn remove(&self, collection: &str, identifier: &str) -> eventlens::Result<()> {
        self.inner.remove(collection, identifier)
    }
    fn purge(&self, collection: &str) -> eventlens::Result<()> {
        self.inner.purge(collection)
    }
}

#[test]
fn test_failed_upload_removes_partial_batch() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let storage = FailingPuts {
        inner: DirectoryStorage::new(dir.path()),
        ok_puts: 2,
        puts: AtomicUsize::new(0),
    };
    storage.inner.put("eventA", "00001.jpg", b"earlier")?;

    let photos = vec![photo(&[STRONG]), photo(&[WEAK]), photo(&[NEAR])];
    let err = upload_images(&storage, "eventA", &photos, 90, &Deadline::new(None)).unwrap_err();
    assert!(matches!(err, Error::Storage { .. }));
    assert_eq!(storage.list("eventA")?, vec!["00001.jpg"]);
    Ok(())
}

#[test]
fn test_purge() -> Result<()> {
    let fx = fixture(EngineOptions::default());
    fx.engine.upload("eventA", &[photo(&[STRONG])])?;
    fx.engine.purge("eventA")?;
    assert!(fx.engine.list("eventA")?.is_empty());
    Ok(())
}

#[test]
fn test_invalid_collection_name() {
    let fx = fixture(EngineOptions::default());
    let err = fx
        .engine
        .find_similar("../etc", &photo(&[QUERY]))
        .unwrap_err();
    assert!(matches!(err, Error::InvalidCollection(_)));
}
