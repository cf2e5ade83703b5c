//! Copy object subgraphs from one document into another.
//!
//! Every distinct source object is cloned exactly once per [`CopyCache`]:
//! a target number is reserved and cached before the object's children are
//! visited, so shared objects and reference cycles map onto a single copy.

use std::collections::HashMap;

use log::{debug, warn};

use crate::error::Warning;
use crate::filters::{self, Filter};
use crate::save_options::Compression;
use crate::{Dictionary, Document, Error, Object, ObjectId, Result, Stream, dictionary};

/// Keys a page may inherit from its ancestors in the page tree.
const INHERITABLE_PAGE_KEYS: [&[u8]; 4] = [b"Resources", b"MediaBox", b"CropBox", b"Rotate"];

/// Source object id to target object id, for one copy session.
#[derive(Debug, Default, Clone)]
pub struct CopyCache {
    map: HashMap<ObjectId, ObjectId>,
}

impl CopyCache {
    pub fn new() -> CopyCache {
        CopyCache::default()
    }

    pub fn get(&self, source: ObjectId) -> Option<ObjectId> {
        self.map.get(&source).copied()
    }

    pub fn contains(&self, source: ObjectId) -> bool {
        self.map.contains_key(&source)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    fn insert(&mut self, source: ObjectId, target: ObjectId) {
        self.map.insert(source, target);
    }

    fn remove(&mut self, source: ObjectId) -> Option<ObjectId> {
        self.map.remove(&source)
    }
}

#[derive(Debug, Clone)]
pub struct CopyOptions {
    /// When set, only these keys of the root dictionary are copied.
    pub root_keys: Option<Vec<Vec<u8>>>,
    /// Keys dropped from every copied dictionary. Defaults to `Parent`, so
    /// copying a page does not drag in the whole source page tree.
    pub skip_keys: Vec<Vec<u8>>,
    /// Copy streams with filters that cannot be decoded byte for byte
    /// instead of failing with `UnsupportedFilter`.
    pub raw_passthrough: bool,
    /// Filter applied to payloads that had to be decoded.
    pub compression: Compression,
    pub compression_level: u32,
}

impl Default for CopyOptions {
    fn default() -> Self {
        CopyOptions {
            root_keys: None,
            skip_keys: vec![b"Parent".to_vec()],
            raw_passthrough: true,
            compression: Compression::Flate,
            compression_level: 6,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CopyStats {
    pub objects_copied: usize,
    /// Streams decoded and filtered again for the target.
    pub streams_refiltered: usize,
    /// Streams whose encoded payload was carried over unchanged.
    pub streams_passed_through: usize,
}

pub struct ObjectCopier<'a> {
    source: &'a Document,
    target: &'a mut Document,
    cache: &'a mut CopyCache,
    options: &'a CopyOptions,
    /// Source objects with a reserved target number, waiting to be copied.
    pending: Vec<ObjectId>,
    /// Every source object this copier entered into the cache, in order.
    reserved: Vec<ObjectId>,
    stats: CopyStats,
}

impl<'a> ObjectCopier<'a> {
    pub fn new(
        source: &'a Document, target: &'a mut Document, cache: &'a mut CopyCache, options: &'a CopyOptions,
    ) -> Result<ObjectCopier<'a>> {
        if source.is_encrypted() {
            return Err(Error::Encrypted);
        }
        Ok(ObjectCopier {
            source,
            target,
            cache,
            options,
            pending: Vec::new(),
            reserved: Vec::new(),
            stats: CopyStats::default(),
        })
    }

    pub fn stats(&self) -> CopyStats {
        self.stats
    }

    /// Copy `root` and everything it reaches; returns the value in target terms.
    ///
    /// On error the cache and the target are left as they were before the call.
    pub fn copy(&mut self, root: &Object) -> Result<Object> {
        self.atomically(|copier| copier.copy_root(root))
    }

    /// Copy `value` as the target counterpart of source object `source_id`.
    ///
    /// Used when the stored value must be adjusted first, e.g. a page with its
    /// inherited attributes filled in. Rolls back like [`ObjectCopier::copy`].
    pub fn copy_as(&mut self, source_id: ObjectId, value: &Object, keys: Option<&[Vec<u8>]>) -> Result<ObjectId> {
        self.atomically(|copier| copier.copy_value_as(source_id, value, keys))
    }

    fn atomically<T>(&mut self, run: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let mark = self.reserved.len();
        let max_id = self.target.max_id;
        let stats = self.stats;
        let result = run(self);
        if result.is_err() {
            self.roll_back(mark, max_id, stats);
        }
        result
    }

    /// Forget every copy made since `mark`; their target numbers were all
    /// allocated above `max_id`.
    fn roll_back(&mut self, mark: usize, max_id: u32, stats: CopyStats) {
        for source_id in self.reserved.drain(mark..) {
            if let Some(target_id) = self.cache.remove(source_id) {
                self.target.slots.remove(&target_id);
            }
        }
        debug!("copy failed, released target numbers above {}", max_id);
        self.target.max_id = max_id;
        self.pending.clear();
        self.stats = stats;
    }

    fn reserve(&mut self, source_id: ObjectId) -> ObjectId {
        let target_id = self.target.new_object_id();
        self.cache.insert(source_id, target_id);
        self.reserved.push(source_id);
        target_id
    }

    fn copy_root(&mut self, root: &Object) -> Result<Object> {
        let options = self.options;
        let source = self.source;
        let root_keys = options.root_keys.as_deref();
        let copied = match *root {
            Object::Reference(id) if root_keys.is_some() => match self.cache.get(id) {
                Some(target) => Object::Reference(target),
                None if source.has_object(id) => {
                    let value = source.get_object(id)?;
                    Object::Reference(self.copy_value_as(id, value, root_keys)?)
                }
                None => self.dangling(id),
            },
            _ => {
                let value = self.map_value(root, root_keys)?;
                self.drain()?;
                value
            }
        };
        Ok(copied)
    }

    fn copy_value_as(&mut self, source_id: ObjectId, value: &Object, keys: Option<&[Vec<u8>]>) -> Result<ObjectId> {
        if let Some(target) = self.cache.get(source_id) {
            return Ok(target);
        }
        let target_id = self.reserve(source_id);
        let copied = self.map_value(value, keys)?;
        self.target.set_object(target_id, copied);
        self.stats.objects_copied += 1;
        self.drain()?;
        Ok(target_id)
    }

    fn drain(&mut self) -> Result<()> {
        let source = self.source;
        while let Some(source_id) = self.pending.pop() {
            let Some(target_id) = self.cache.get(source_id) else {
                continue;
            };
            let value = source.get_object(source_id)?;
            let copied = self.map_value(value, None)?;
            self.target.set_object(target_id, copied);
            self.stats.objects_copied += 1;
        }
        Ok(())
    }

    fn map_reference(&mut self, id: ObjectId) -> Object {
        if let Some(target) = self.cache.get(id) {
            return Object::Reference(target);
        }
        if !self.source.has_object(id) {
            return self.dangling(id);
        }
        let target = self.reserve(id);
        self.pending.push(id);
        Object::Reference(target)
    }

    fn dangling(&mut self, id: ObjectId) -> Object {
        self.target.record_warning(Warning::DanglingReference(id));
        Object::Null
    }

    fn map_value(&mut self, value: &Object, keys: Option<&[Vec<u8>]>) -> Result<Object> {
        Ok(match value {
            Object::Reference(id) => self.map_reference(*id),
            Object::Array(items) => Object::Array(
                items
                    .iter()
                    .map(|item| self.map_value(item, None))
                    .collect::<Result<Vec<_>>>()?,
            ),
            Object::Dictionary(dict) => Object::Dictionary(self.map_dictionary(dict, keys)?),
            Object::Stream(stream) => Object::Stream(self.copy_stream(stream, keys)?),
            direct => direct.clone(),
        })
    }

    fn map_dictionary(&mut self, dict: &Dictionary, keys: Option<&[Vec<u8>]>) -> Result<Dictionary> {
        let mut copied = Dictionary::new();
        for (key, value) in dict {
            let wanted = match keys {
                Some(keys) => keys.contains(key),
                None => !self.options.skip_keys.contains(key),
            };
            if wanted {
                copied.set(key.clone(), self.map_value(value, None)?);
            }
        }
        Ok(copied)
    }

    fn copy_stream(&mut self, stream: &Stream, keys: Option<&[Vec<u8>]>) -> Result<Stream> {
        let mut dict = self.map_dictionary(&stream.dict, keys)?;
        let names = stream.filters()?;
        let parsed: Vec<Result<Filter>> = names.iter().map(|name| Filter::from_name(name)).collect();

        let reproducible = parsed
            .iter()
            .all(|filter| matches!(filter, Ok(filter) if *filter == Filter::Flate || filter.is_image_codec()));
        let decodable = parsed
            .iter()
            .all(|filter| matches!(filter, Ok(filter) if !filter.is_image_codec()));

        let decoded = if decodable && !reproducible {
            match stream.decompressed_content() {
                Ok(content) => Some(content),
                Err(err) if self.options.raw_passthrough => {
                    warn!("stream could not be decoded, copying it unchanged: {}", err);
                    None
                }
                Err(err) => return Err(err),
            }
        } else {
            None
        };

        let content = if names.is_empty() || reproducible {
            if !names.is_empty() {
                self.stats.streams_passed_through += 1;
            }
            stream.content.clone()
        } else if let Some(mut content) = decoded {
            dict.remove(b"Filter");
            dict.remove(b"DecodeParms");
            if self.options.compression == Compression::Flate {
                content = filters::encode(&content, Filter::Flate, self.options.compression_level)?;
                dict.set("Filter", "FlateDecode");
            }
            self.stats.streams_refiltered += 1;
            content
        } else if self.options.raw_passthrough {
            warn!(
                "copying stream with filters {:?} without decoding it",
                names.iter().map(|n| String::from_utf8_lossy(n).into_owned()).collect::<Vec<_>>()
            );
            self.stats.streams_passed_through += 1;
            stream.content.clone()
        } else {
            return Err(parsed
                .into_iter()
                .find_map(|filter| match filter {
                    Err(err) => Some(err),
                    Ok(filter) if filter.is_image_codec() => Some(Error::UnsupportedFilter(filter.name().to_string())),
                    Ok(_) => None,
                })
                .unwrap_or_else(|| Error::UnsupportedFilter("unknown".to_string())));
        };

        dict.set("Length", content.len() as i64);
        Ok(Stream {
            dict,
            content,
            allows_compression: stream.allows_compression,
        })
    }
}

/// Deep-copy `root` from `source` into `target`, reusing copies recorded in `cache`.
pub fn copy_subgraph(
    source: &Document, target: &mut Document, root: &Object, cache: &mut CopyCache, options: &CopyOptions,
) -> Result<Object> {
    let mut copier = ObjectCopier::new(source, target, cache, options)?;
    let copied = copier.copy(root)?;
    let stats = copier.stats();
    debug!(
        "copied {} objects ({} streams re-filtered, {} passed through)",
        stats.objects_copied, stats.streams_refiltered, stats.streams_passed_through
    );
    Ok(copied)
}

impl Document {
    /// Copy object `id` of `source`, and everything it reaches, into this document.
    pub fn import_object(&mut self, source: &Document, id: ObjectId) -> Result<ObjectId> {
        let mut cache = CopyCache::new();
        self.import_object_with(source, id, &mut cache, &CopyOptions::default())
    }

    pub fn import_object_with(
        &mut self, source: &Document, id: ObjectId, cache: &mut CopyCache, options: &CopyOptions,
    ) -> Result<ObjectId> {
        let value = source.get_object(id)?;
        let mut copier = ObjectCopier::new(source, self, cache, options)?;
        copier.copy_as(id, value, None)
    }

    /// Copy a page of `source` and append it to this document's page tree.
    ///
    /// Inherited attributes are written onto the copy, which is then attached
    /// under this document's root `Pages` node.
    pub fn import_page(&mut self, source: &Document, page_id: ObjectId) -> Result<ObjectId> {
        let mut cache = CopyCache::new();
        self.import_page_with(source, page_id, &mut cache, &CopyOptions::default())
    }

    /// Like [`Document::import_page`], sharing `cache` across calls. A page
    /// already imported through `cache` and attached to this document's page
    /// tree is returned as is.
    pub fn import_page_with(
        &mut self, source: &Document, page_id: ObjectId, cache: &mut CopyCache, options: &CopyOptions,
    ) -> Result<ObjectId> {
        if let Some(existing) = cache.get(page_id) {
            if self.get_pages().values().any(|id| *id == existing) {
                debug!("page {:?} already imported as {:?}", page_id, existing);
                return Ok(existing);
            }
        }

        let mut page = source.get_dictionary(page_id)?.clone();
        for key in INHERITABLE_PAGE_KEYS {
            if !page.has(key) {
                if let Some(value) = source.get_inherited(page_id, key)? {
                    page.set(key, value.clone());
                }
            }
        }
        page.remove(b"Parent");

        let target_page = {
            let mut copier = ObjectCopier::new(source, self, cache, options)?;
            copier.copy_as(page_id, &Object::Dictionary(page), None)?
        };

        let pages_id = self.ensure_page_tree()?;
        self.get_dictionary_mut(target_page)?.set("Parent", pages_id);
        let pages = self.get_dictionary_mut(pages_id)?;
        if let Ok(kids) = pages.get_mut(b"Kids").and_then(Object::as_array_mut) {
            kids.push(target_page.into());
        } else {
            pages.set("Kids", vec![Object::from(target_page)]);
        }
        let count = pages.get(b"Count").and_then(Object::as_i64).unwrap_or(0);
        pages.set("Count", count + 1);
        Ok(target_page)
    }

    /// The id of the root `Pages` node, creating it and the catalog if missing.
    fn ensure_page_tree(&mut self) -> Result<ObjectId> {
        let catalog_id = match self.catalog_id() {
            Ok(id) if self.get_dictionary(id).is_ok() => id,
            _ => {
                let catalog_id = self.add_object(dictionary! { "Type" => "Catalog" });
                self.trailer.set("Root", catalog_id);
                catalog_id
            }
        };

        let existing = self
            .get_dictionary(catalog_id)?
            .get(b"Pages")
            .and_then(Object::as_reference)
            .ok()
            .filter(|id| self.get_dictionary(*id).is_ok());
        if let Some(pages_id) = existing {
            return Ok(pages_id);
        }
        let pages_id = self.add_object(dictionary! {
            "Type" => "Pages",
            "Kids" => Vec::<Object>::new(),
            "Count" => 0,
        });
        self.get_dictionary_mut(catalog_id)?.set("Pages", pages_id);
        Ok(pages_id)
    }
}
