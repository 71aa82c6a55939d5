use eventlens_vision::{decode, Embedding, Image, Pipeline};
use log::{debug, info, warn};

use crate::deadline::Deadline;
use crate::error::Result;
use crate::storage::StorageAdapter;

/// One reference photo with the mean of its face embeddings.
#[derive(Debug, Clone)]
pub struct CollectionEntry {
    pub identifier: String,
    pub embedding: Embedding,
    pub image: Image,
}

/// Reference photos of one named collection, in insertion order.
///
/// Queries are only ever compared against a single collection.
#[derive(Debug, Clone, Default)]
pub struct Collection {
    name: String,
    entries: Vec<CollectionEntry>,
}

impl Collection {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn entries(&self) -> &[CollectionEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append an entry. Identifiers are unique; a repeated one replaces the
    /// earlier entry in place.
    pub fn push(&mut self, entry: CollectionEntry) {
        match self
            .entries
            .iter_mut()
            .find(|e| e.identifier == entry.identifier)
        {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
    }
}

/// Representative embedding of one reference image, or `None` when the image
/// should be left out of the collection.
fn representative_embedding(
    pipeline: &Pipeline,
    identifier: &str,
    image: &Image,
) -> Result<Option<Embedding>> {
    let faces = pipeline.face_embeddings(image)?;
    if faces.is_empty() {
        debug!("{identifier}: no face detected, skipping");
        return Ok(None);
    }

    let total = faces.len();
    let usable: Vec<Embedding> = faces.into_iter().filter(|e| !e.is_degenerate()).collect();
    if usable.len() < total {
        warn!(
            "{identifier}: dropped {} degenerate face embedding(s)",
            total - usable.len()
        );
    }
    if usable.is_empty() {
        return Ok(None);
    }

    let mean = Embedding::mean(&usable)?;
    if mean.is_degenerate() {
        warn!("{identifier}: face embeddings cancel out, skipping");
        return Ok(None);
    }
    Ok(Some(mean))
}

/// Build a collection from storage: fetch, decode, detect and embed every
/// listed image.
///
/// Images that fail to decode, contain no face, or only yield degenerate
/// embeddings are skipped. A missing collection loads as empty.
pub fn load_collection(
    name: &str,
    storage: &dyn StorageAdapter,
    pipeline: &Pipeline,
    deadline: &Deadline,
) -> Result<Collection> {
    let identifiers = storage.list(name)?;
    let mut collection = Collection::new(name);

    for identifier in identifiers {
        deadline.check()?;

        let bytes = storage.fetch(name, &identifier)?;
        let image = match decode(&bytes) {
            Ok(image) => image,
            Err(e) => {
                warn!("{name}/{identifier}: {e}, skipping");
                continue;
            }
        };

        if let Some(embedding) = representative_embedding(pipeline, &identifier, &image)? {
            collection.push(CollectionEntry {
                identifier,
                embedding,
                image,
            });
        }
    }

    info!(
        "loaded collection {name}: {} usable entr{}",
        collection.len(),
        if collection.len() == 1 { "y" } else { "ies" }
    );
    Ok(collection)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, v: Vec<f32>) -> CollectionEntry {
        CollectionEntry {
            identifier: id.to_string(),
            embedding: Embedding::from_vec(v),
            image: Image::new(1, 1),
        }
    }

    #[test]
    fn test_push_keeps_order_and_unique_ids() {
        let mut c = Collection::new("eventA");
        c.push(entry("a", vec![1.0]));
        c.push(entry("b", vec![2.0]));
        c.push(entry("a", vec![3.0]));

        let ids: Vec<_> = c.entries().iter().map(|e| e.identifier.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(c.entries()[0].embedding.to_vec(), vec![3.0]);
        assert_eq!(c.name(), "eventA");
    }
}
