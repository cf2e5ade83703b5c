use std::cell::{OnceCell, RefCell};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use log::{debug, warn};

use crate::error::{StructureError, Warning};
use crate::object_stream::ObjectStream;
use crate::parser;
use crate::xref::{Revision, Xref, XrefType};
use crate::{Dictionary, Error, Object, ObjectId, Result};

static NULL: Object = Object::Null;

/// Where a document is in its life cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    /// Created empty, nothing registered yet.
    Fresh,
    /// Objects have been allocated or changed since the last save.
    Building,
    /// Written out; the document now wraps the bytes it produced.
    Flushed,
    /// Loaded from existing bytes, which are kept verbatim for incremental saves.
    Reopened,
    /// Torn down with `release`.
    Released,
}

/// Where the value of an indirect object comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Origin {
    New,
    /// Offset of `N G obj`, relative to the `%PDF-` header.
    Offset(usize),
    InStream { container: u32, index: u16 },
}

#[derive(Debug)]
pub(crate) struct Slot {
    pub(crate) origin: Origin,
    pub(crate) value: OnceCell<Object>,
    pub(crate) dirty: bool,
}

impl Slot {
    pub(crate) fn lazy(origin: Origin) -> Slot {
        Slot {
            origin,
            value: OnceCell::new(),
            dirty: false,
        }
    }

    fn new(origin: Origin, object: Object) -> Slot {
        Slot {
            origin,
            value: OnceCell::from(object),
            dirty: true,
        }
    }
}

/// A PDF object space: the indirect objects of one file and its trailer.
#[derive(Debug)]
pub struct Document {
    /// The version of the PDF specification to which the file conforms.
    pub version: String,

    /// The binary comment on the line after the header, if any.
    pub binary_mark: Vec<u8>,

    /// The trailer of the newest revision, without `Prev` and `XRefStm`.
    pub trailer: Dictionary,

    /// The cross-reference entries of all revisions merged together.
    pub reference_table: Xref,

    /// Cross-reference sections, newest first.
    pub revisions: Vec<Revision>,

    /// Highest object number in use.
    pub max_id: u32,

    pub(crate) slots: BTreeMap<ObjectId, Slot>,

    /// The file the document was read from (or last saved to), leading garbage included.
    pub(crate) source: Vec<u8>,
    /// Position of `%PDF-` in `source`; all offsets are relative to it.
    pub(crate) base_offset: usize,
    /// `startxref` value of the newest revision.
    pub(crate) xref_start: usize,
    /// Object numbers removed since the last save, with the generation they had.
    pub(crate) freed: BTreeMap<u32, u16>,

    state: FileState,
    object_streams: RefCell<HashMap<u32, ObjectStream>>,
    realizing: RefCell<HashSet<ObjectId>>,
    warnings: RefCell<Vec<Warning>>,
}

impl Document {
    /// Create new PDF document.
    pub fn new() -> Document {
        Document {
            version: "1.4".to_string(),
            binary_mark: b"\xBF\xF7\xA2\xFE".to_vec(),
            trailer: Dictionary::new(),
            reference_table: Xref::new(0, XrefType::CrossReferenceTable),
            revisions: Vec::new(),
            max_id: 0,
            slots: BTreeMap::new(),
            source: Vec::new(),
            base_offset: 0,
            xref_start: 0,
            freed: BTreeMap::new(),
            state: FileState::Fresh,
            object_streams: RefCell::new(HashMap::new()),
            realizing: RefCell::new(HashSet::new()),
            warnings: RefCell::new(Vec::new()),
        }
    }

    pub fn state(&self) -> FileState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: FileState) {
        self.state = state;
    }

    /// Problems recovered from so far, oldest first.
    pub fn warnings(&self) -> Vec<Warning> {
        self.warnings.borrow().clone()
    }

    pub fn clear_warnings(&mut self) {
        self.warnings.get_mut().clear();
    }

    pub(crate) fn record_warning(&self, warning: Warning) {
        warn!("{}", warning);
        self.warnings.borrow_mut().push(warning);
    }

    /// The trailer names an `Encrypt` dictionary. Such documents are read-only here.
    pub fn is_encrypted(&self) -> bool {
        self.trailer.has(b"Encrypt")
    }

    /// Whether the document carries bytes from a previous load or save.
    pub fn has_source(&self) -> bool {
        !self.source.is_empty()
    }

    /// The bytes the document was loaded from (or last saved to).
    pub fn source_bytes(&self) -> &[u8] {
        &self.source
    }

    pub(crate) fn body(&self) -> &[u8] {
        self.source.get(self.base_offset..).unwrap_or_default()
    }

    fn touch(&mut self) {
        self.state = match self.state {
            FileState::Reopened => FileState::Reopened,
            _ => FileState::Building,
        };
    }

    /// Allocate the next object number. The object is not registered yet.
    pub fn new_object_id(&mut self) -> ObjectId {
        self.max_id += 1;
        (self.max_id, 0)
    }

    /// Register a new indirect object and return its id.
    pub fn add_object<T: Into<Object>>(&mut self, object: T) -> ObjectId {
        let id = self.new_object_id();
        self.slots.insert(id, Slot::new(Origin::New, object.into()));
        self.touch();
        id
    }

    /// Store `object` under `id`, replacing any previous value.
    pub fn set_object<T: Into<Object>>(&mut self, id: ObjectId, object: T) {
        let origin = self.slots.get(&id).map_or(Origin::New, |slot| slot.origin);
        self.slots.insert(id, Slot::new(origin, object.into()));
        self.freed.remove(&id.0);
        self.max_id = self.max_id.max(id.0);
        self.touch();
    }

    #[doc(alias = "is_registered")]
    pub fn has_object(&self, id: ObjectId) -> bool {
        self.slots.contains_key(&id)
    }

    pub fn object_ids(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.slots.keys().copied()
    }

    pub fn object_count(&self) -> usize {
        self.slots.len()
    }

    /// Whether `id` changed since the document was loaded or last saved.
    pub fn is_dirty(&self, id: ObjectId) -> bool {
        self.slots.get(&id).is_some_and(|slot| slot.dirty)
    }

    pub(crate) fn dirty_ids(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.slots.iter().filter(|(_, slot)| slot.dirty).map(|(id, _)| *id)
    }

    /// Get the value of an indirect object, parsing it on first access.
    ///
    /// Every call for the same id returns the same instance.
    pub fn get_object(&self, id: ObjectId) -> Result<&Object> {
        let slot = self.slots.get(&id).ok_or(Error::ObjectNotFound(id))?;
        if let Some(object) = slot.value.get() {
            return Ok(object);
        }
        if !self.realizing.borrow_mut().insert(id) {
            return Err(Error::ReferenceCycle(id));
        }
        let object = self.realize(id, slot.origin);
        self.realizing.borrow_mut().remove(&id);
        Ok(slot.value.get_or_init(|| object))
    }

    /// Get a mutable value, marking the object to be written by the next save.
    pub fn get_object_mut(&mut self, id: ObjectId) -> Result<&mut Object> {
        self.get_object(id)?;
        self.touch();
        let slot = self.slots.get_mut(&id).ok_or(Error::ObjectNotFound(id))?;
        slot.dirty = true;
        slot.value.get_mut().ok_or(Error::ObjectNotFound(id))
    }

    pub fn remove_object(&mut self, id: ObjectId) -> Result<()> {
        let slot = self.slots.remove(&id).ok_or(Error::ObjectNotFound(id))?;
        if slot.origin != Origin::New {
            self.freed.insert(id.0, id.1.saturating_add(1));
        }
        self.touch();
        Ok(())
    }

    fn realize(&self, id: ObjectId, origin: Origin) -> Object {
        match origin {
            Origin::New => Object::Null,
            Origin::Offset(offset) => {
                let resolve_length = |length_id: ObjectId| self.get_object(length_id).ok()?.as_i64().ok();
                match parser::indirect_object(self.body(), offset, Some(id), &resolve_length) {
                    Ok((_, object)) => object,
                    Err(err) => {
                        self.record_warning(Warning::CorruptObject {
                            id,
                            offset,
                            reason: err.to_string(),
                        });
                        Object::Null
                    }
                }
            }
            Origin::InStream { container, index } => {
                if !self.object_streams.borrow().contains_key(&container) {
                    let parsed = self
                        .get_object((container, 0))
                        .and_then(Object::as_stream)
                        .and_then(ObjectStream::new);
                    match parsed {
                        Ok(objects) => {
                            debug!("object stream {} holds {} objects", container, objects.objects.len());
                            self.object_streams.borrow_mut().insert(container, objects);
                        }
                        Err(err) => {
                            self.record_warning(Warning::CorruptObject {
                                id,
                                offset: 0,
                                reason: format!("object stream {}: {}", container, err),
                            });
                            return Object::Null;
                        }
                    }
                }
                let member = self
                    .object_streams
                    .borrow()
                    .get(&container)
                    .and_then(|objects| objects.get(id.0, index))
                    .cloned();
                member.unwrap_or_else(|| {
                    self.record_warning(Warning::CorruptObject {
                        id,
                        offset: 0,
                        reason: format!("missing from object stream {}", container),
                    });
                    Object::Null
                })
            }
        }
    }

    /// Follow references until a direct value is reached.
    ///
    /// A reference to an unknown object resolves to `null` and is recorded as a warning.
    pub fn dereference<'a>(&'a self, mut object: &'a Object) -> Result<(Option<ObjectId>, &'a Object)> {
        let mut nb_deref = 0;
        let mut id = None;

        while let Ok(ref_id) = object.as_reference() {
            id = Some(ref_id);
            object = match self.get_object(ref_id) {
                Ok(target) => target,
                Err(Error::ObjectNotFound(missing)) => {
                    self.record_warning(Warning::DanglingReference(missing));
                    &NULL
                }
                Err(err) => return Err(err),
            };

            nb_deref += 1;
            if nb_deref > 128 {
                return Err(Error::ReferenceCycle(ref_id));
            }
        }

        Ok((id, object))
    }

    /// Get dictionary object by id.
    pub fn get_dictionary(&self, id: ObjectId) -> Result<&Dictionary> {
        let object = self.get_object(id)?;
        self.dereference(object).and_then(|(_, object)| object.as_dict())
    }

    pub fn get_dictionary_mut(&mut self, id: ObjectId) -> Result<&mut Dictionary> {
        self.get_object_mut(id).and_then(Object::as_dict_mut)
    }

    pub fn catalog_id(&self) -> Result<ObjectId> {
        self.trailer
            .get(b"Root")
            .and_then(Object::as_reference)
            .map_err(|_| StructureError::MissingRoot.into())
    }

    /// Get catalog dictionary.
    pub fn catalog(&self) -> Result<&Dictionary> {
        self.get_dictionary(self.catalog_id()?)
    }

    /// Page numbers (starting at 1) mapped to page object ids, in page-tree order.
    pub fn get_pages(&self) -> BTreeMap<u32, ObjectId> {
        let mut pages = BTreeMap::new();
        let Ok(root) = self.catalog().and_then(|catalog| catalog.get(b"Pages")).and_then(Object::as_reference) else {
            return pages;
        };

        let mut visited = HashSet::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if !visited.insert(id) {
                warn!("page tree visits {} {} R twice, skipping it", id.0, id.1);
                continue;
            }
            let Ok(node) = self.get_dictionary(id) else {
                continue;
            };
            match node.get(b"Kids").and_then(Object::as_array) {
                Ok(kids) => stack.extend(kids.iter().rev().filter_map(|kid| kid.as_reference().ok())),
                Err(_) => {
                    pages.insert(pages.len() as u32 + 1, id);
                }
            }
        }
        pages
    }

    pub fn page_id(&self, page_number: u32) -> Result<ObjectId> {
        self.get_pages()
            .get(&page_number)
            .copied()
            .ok_or(Error::PageNotFound(page_number))
    }

    /// Look up `key` on a page, walking up its `Parent` chain if the page lacks it.
    pub fn get_inherited(&self, page_id: ObjectId, key: &[u8]) -> Result<Option<&Object>> {
        let mut visited = HashSet::new();
        let mut current = Some(page_id);
        while let Some(id) = current {
            if !visited.insert(id) {
                return Err(Error::ReferenceCycle(id));
            }
            let node = self.get_dictionary(id)?;
            if let Ok(value) = node.get(key) {
                return Ok(Some(value));
            }
            current = node.get(b"Parent").and_then(Object::as_reference).ok();
        }
        Ok(None)
    }

    /// Ids reachable from the trailer. `Parent` back-references are not followed.
    pub fn reachable_objects(&self) -> BTreeSet<ObjectId> {
        let mut reachable = BTreeSet::new();
        let mut pending = Vec::new();
        self.trailer
            .iter()
            .filter(|(key, _)| !matches!(key.as_slice(), b"Prev" | b"XRefStm"))
            .for_each(|(_, value)| value.for_each_reference(|_, id| pending.push(id)));

        while let Some(id) = pending.pop() {
            if !self.has_object(id) || !reachable.insert(id) {
                continue;
            }
            if let Ok(object) = self.get_object(id) {
                object.for_each_reference(|key, child| {
                    if key != b"Parent" {
                        pending.push(child);
                    }
                });
            }
        }
        reachable
    }

    /// Drop objects that nothing reachable refers to; returns the removed ids.
    pub fn prune_objects(&mut self) -> Vec<ObjectId> {
        let reachable = self.reachable_objects();
        let unreachable: Vec<ObjectId> = self.object_ids().filter(|id| !reachable.contains(id)).collect();
        for id in &unreachable {
            // Ids come from the slot map, removal cannot fail.
            let _ = self.remove_object(*id);
        }
        if !unreachable.is_empty() {
            debug!("pruned {} unreachable objects", unreachable.len());
        }
        unreachable
    }

    /// Parse every object now instead of on demand.
    pub fn realize_all(&self) {
        for id in self.slots.keys() {
            let _ = self.get_object(*id);
        }
    }

    /// Tear the document down: objects, source bytes and tables are dropped.
    pub fn release(&mut self) {
        self.slots.clear();
        self.source = Vec::new();
        self.base_offset = 0;
        self.xref_start = 0;
        self.freed.clear();
        self.trailer = Dictionary::new();
        self.reference_table.clear();
        self.revisions.clear();
        self.max_id = 0;
        self.object_streams.get_mut().clear();
        self.state = FileState::Released;
    }

    /// Mark every object as written; called once a save has succeeded.
    pub(crate) fn mark_clean(&mut self) {
        for slot in self.slots.values_mut() {
            slot.dirty = false;
        }
        self.freed.clear();
    }

    /// Apply `update` to every stream, marking changed ones dirty.
    pub(crate) fn update_streams<F>(&mut self, mut update: F) -> Result<()>
    where
        F: FnMut(&mut crate::Stream) -> Result<bool>,
    {
        self.realize_all();
        let mut changed = false;
        for slot in self.slots.values_mut() {
            if let Some(Object::Stream(stream)) = slot.value.get_mut() {
                if update(stream)? {
                    slot.dirty = true;
                    changed = true;
                }
            }
        }
        if changed {
            self.touch();
        }
        Ok(())
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}
