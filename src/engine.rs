use std::sync::Arc;
use std::time::Duration;

use eventlens_vision::{decode, decode_base64, encode_jpeg, Embedding, Image, Pipeline};
use log::{debug, info, warn};

use crate::collection::{load_collection, Collection};
use crate::config::Config;
use crate::deadline::Deadline;
use crate::encoder::{encode_results, EncodeOptions, EncodedMatch};
use crate::error::{Error, Result};
use crate::matcher::{match_faces, MatchOptions};
use crate::storage::{next_sequence, sequence_name, validate_name, StorageAdapter};

/// Bound on name collisions one image may hit before giving up. Each collision
/// means another writer stored an image, so this is only reached under
/// heavy concurrent uploading into one collection.
const MAX_NAME_ATTEMPTS: usize = 64;

/// Store a batch of photos in a collection as JPEG, named in upload order.
///
/// Every image is decoded before anything is written, so one bad file rejects
/// the whole batch. A failure while writing removes the images this call
/// already stored, so a batch lands completely or not at all. Safe to run
/// concurrently with other uploads into the same collection. Needs no models.
pub fn upload_images(
    storage: &dyn StorageAdapter,
    collection: &str,
    images: &[Vec<u8>],
    jpeg_quality: u8,
    deadline: &Deadline,
) -> Result<Vec<String>> {
    validate_name(collection)?;

    let decoded = images
        .iter()
        .map(|bytes| decode(bytes))
        .collect::<std::result::Result<Vec<Image>, _>>()?;

    let mut seq = next_sequence(&storage.list(collection)?);
    let mut stored = Vec::with_capacity(decoded.len());
    let written = decoded.iter().try_for_each(|image| -> Result<()> {
        deadline.check()?;
        let jpeg = encode_jpeg(image, jpeg_quality)?;
        stored.push(put_next(storage, collection, &mut seq, &jpeg)?);
        Ok(())
    });
    if let Err(err) = written {
        roll_back(storage, collection, &stored);
        return Err(err);
    }

    info!("uploaded {} image(s) to {collection}", stored.len());
    Ok(stored)
}

/// Write under the next free sequence name, skipping names another writer
/// claimed since the collection was listed.
fn put_next(
    storage: &dyn StorageAdapter,
    collection: &str,
    seq: &mut u64,
    bytes: &[u8],
) -> Result<String> {
    for _ in 0..MAX_NAME_ATTEMPTS {
        let identifier = sequence_name(*seq);
        match storage.put(collection, &identifier, bytes) {
            Ok(()) => {
                *seq += 1;
                return Ok(identifier);
            }
            Err(Error::AlreadyExists { .. }) => {
                debug!("{collection}/{identifier} was taken");
                *seq = next_sequence(&storage.list(collection)?).max(*seq + 1);
            }
            Err(e) => return Err(e),
        }
    }
    Err(Error::storage(
        format!("naming an image in {collection}"),
        format!("every name collided after {MAX_NAME_ATTEMPTS} attempts"),
    ))
}

fn roll_back(storage: &dyn StorageAdapter, collection: &str, stored: &[String]) {
    if stored.is_empty() {
        return;
    }
    warn!("upload to {collection} failed, removing {} stored image(s)", stored.len());
    for identifier in stored {
        if let Err(e) = storage.remove(collection, identifier) {
            warn!("could not remove {collection}/{identifier}: {e}");
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EngineOptions {
    pub matching: MatchOptions,
    pub encoding: EncodeOptions,
    pub timeout: Option<Duration>,
}

impl From<&Config> for EngineOptions {
    fn from(cfg: &Config) -> Self {
        Self {
            matching: MatchOptions {
                threshold: cfg.threshold,
                max_results: cfg.max_results,
            },
            encoding: EncodeOptions {
                jpeg_quality: cfg.jpeg_quality,
                display_precision: cfg.display_precision,
            },
            timeout: cfg.request_timeout(),
        }
    }
}

/// Entry point shared by every delivery channel (CLI, HTTP, chat bot).
///
/// Holds no per-request state: collections are rebuilt from storage on every
/// query, so a single engine can serve concurrent callers.
#[derive(Clone)]
pub struct Engine {
    pipeline: Arc<Pipeline>,
    storage: Arc<dyn StorageAdapter>,
    options: EngineOptions,
}

impl Engine {
    pub fn new(
        pipeline: Arc<Pipeline>,
        storage: Arc<dyn StorageAdapter>,
        options: EngineOptions,
    ) -> Self {
        Self {
            pipeline,
            storage,
            options,
        }
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Same engine with different matching options for one caller.
    pub fn with_matching(&self, matching: MatchOptions) -> Self {
        let mut engine = self.clone();
        engine.options.matching = matching;
        engine
    }

    /// Store a batch of photos in a collection. See [`upload_images`].
    pub fn upload(&self, collection: &str, images: &[Vec<u8>]) -> Result<Vec<String>> {
        let deadline = Deadline::new(self.options.timeout);
        upload_images(
            self.storage.as_ref(),
            collection,
            images,
            self.options.encoding.jpeg_quality,
            &deadline,
        )
    }

    pub fn list(&self, collection: &str) -> Result<Vec<String>> {
        self.storage.list(collection)
    }

    pub fn purge(&self, collection: &str) -> Result<()> {
        self.storage.purge(collection)?;
        info!("purged collection {collection}");
        Ok(())
    }

    /// One embedding per face in the query. Unlike reference photos, query
    /// faces are never averaged.
    pub fn query_embeddings(&self, image: &Image) -> Result<Vec<Embedding>> {
        let embeddings = self.pipeline.face_embeddings(image)?;
        if embeddings.is_empty() {
            return Err(Error::NoFaceDetected);
        }
        embeddings
            .into_iter()
            .enumerate()
            .map(|(i, e)| {
                e.ensure_non_degenerate().map_err(|_| {
                    warn!("query face {i} produced a zero-norm embedding");
                    Error::DegenerateEmbedding(format!("query face {i}"))
                })
            })
            .collect()
    }

    pub fn load_collection(&self, collection: &str, deadline: &Deadline) -> Result<Collection> {
        load_collection(collection, self.storage.as_ref(), &self.pipeline, deadline)
    }

    /// Find every photo in `collection` containing a face from `image`.
    pub fn find_similar_image(&self, collection: &str, image: &Image) -> Result<Vec<EncodedMatch>> {
        validate_name(collection)?;
        let deadline = Deadline::new(self.options.timeout);

        let queries = self.query_embeddings(image)?;
        deadline.check()?;
        let reference = self.load_collection(collection, &deadline)?;

        let matches = match_faces(&queries, &reference, &self.options.matching)?;
        deadline.check()?;
        info!(
            "{collection}: {} face(s) in query, {} of {} photo(s) matched (threshold {:.2})",
            queries.len(),
            matches.len(),
            reference.len(),
            self.options.matching.threshold
        );
        encode_results(&matches, &self.options.encoding)
    }

    /// Same as [`Engine::find_similar_image`], starting from encoded bytes.
    pub fn find_similar(&self, collection: &str, query: &[u8]) -> Result<Vec<EncodedMatch>> {
        let image = decode(query)?;
        self.find_similar_image(collection, &image)
    }

    /// Same as [`Engine::find_similar_image`], starting from a base64 payload.
    pub fn find_similar_base64(&self, collection: &str, payload: &str) -> Result<Vec<EncodedMatch>> {
        let image = decode_base64(payload)?;
        self.find_similar_image(collection, &image)
    }
}
