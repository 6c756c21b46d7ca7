//! A model of the managed heap found in the dump's memory.
//!
//! Heap words are tagged: a word with its low bit clear is a small integer (a "Smi")
//! holding `word >> 1`, and a word with its low bit set points one byte past the start of
//! a heap object. Every object starts with a pointer to its [`Map`], which records the
//! object's instance type and so decides how the rest of the object is read.
//!
//! [`HeapModel`] decodes tagged words into [`HeapObject`]s. Decoding never fails; anything
//! that can't be read becomes [`Tagged::Unknown`].

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use tracing::trace;

use crate::context::Arch;
use crate::memory::ReadMemory;

pub mod constants;
mod map;
mod objects;
#[cfg(test)]
pub(crate) mod testing;
mod views;

pub use map::{decode, Map};
pub use objects::{code_header_size, materialize, Body, HeapObject, MapInfo, SharedInfo};
pub use views::{DescriptorArray, TransitionArray};

/// The size of the runtime's `int`.
pub const INT_SIZE: u64 = 4;
/// Heap pages are 1MB aligned.
pub const PAGE_ALIGNMENT_MASK: u64 = (1 << 20) - 1;
/// Objects nested deeper than this are not decoded.
pub const MAX_DECODE_DEPTH: usize = 32;

/// A decoded heap word.
#[derive(Clone, Debug)]
pub enum Tagged {
    Smi(i64),
    Object(Rc<HeapObject>),
    /// A tagged word that doesn't point at anything decodable.
    Unknown(u64),
    /// An object whose decoding is still underway further up the stack.
    InProgress(u64),
}

impl Tagged {
    pub fn as_object(&self) -> Option<&Rc<HeapObject>> {
        match self {
            Tagged::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_smi(&self) -> Option<i64> {
        match *self {
            Tagged::Smi(v) => Some(v),
            _ => None,
        }
    }

    /// Whether both refer to the same decoded value. Objects compare by identity.
    pub fn same_as(&self, other: &Tagged) -> bool {
        match (self, other) {
            (Tagged::Object(a), Tagged::Object(b)) => Rc::ptr_eq(a, b),
            (Tagged::Smi(a), Tagged::Smi(b)) => a == b,
            (Tagged::Unknown(a), Tagged::Unknown(b)) => a == b,
            (Tagged::InProgress(a), Tagged::InProgress(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Tagged {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tagged::Smi(v) => write!(f, "Smi({})", v),
            Tagged::Object(o) => write!(f, "{}", o),
            Tagged::Unknown(a) => write!(f, "Unknown({:08x})", a),
            Tagged::InProgress(a) => write!(f, "InProgress({:08x})", a),
        }
    }
}

/// The value of a Smi-tagged `word` on a machine with `pointer_size` byte words.
pub fn smi_value(word: u64, pointer_size: usize) -> i64 {
    match pointer_size {
        8 => (word as i64) >> 1,
        _ => ((word as u32 as i32) >> 1) as i64,
    }
}

/// The operations heap objects use to decode their fields.
///
/// [`HeapModel`] implements this by chasing maps. [`crate::Padawan`] layers knowledge of
/// well-known pages on top of a `HeapModel`.
pub trait HeapAccess {
    fn memory(&self) -> &dyn ReadMemory;

    /// Decode the object `tagged_address` points to.
    fn find_object(&self, tagged_address: u64) -> Tagged;

    /// Decode the map `tagged_address` points to.
    fn find_map(&self, tagged_address: u64) -> Option<MapInfo>;

    fn find_object_or_smi(&self, tagged_address: u64) -> Tagged {
        if tagged_address & 1 == 0 {
            return Tagged::Smi(smi_value(tagged_address, self.pointer_size() as usize));
        }
        self.find_object(tagged_address)
    }

    fn pointer_size(&self) -> u64 {
        self.memory().pointer_size() as u64
    }

    fn arch(&self) -> Arch {
        self.memory().arch()
    }
}

/// Renders the instructions of a code object, one line per instruction.
pub trait CodeRenderer {
    fn render_code(&self, entry: u64, size: u64) -> Vec<String>;
}

/// A `CodeRenderer` that shows no instructions.
pub struct NoCode;

impl CodeRenderer for NoCode {
    fn render_code(&self, _entry: u64, _size: u64) -> Vec<String> {
        vec![]
    }
}

#[derive(Clone)]
enum Slot {
    InProgress,
    Done(Option<Rc<HeapObject>>),
}

/// Decodes heap objects from dump memory by following map pointers.
///
/// Decoded objects are cached by tagged address for the life of the model, so decoding
/// the same address twice yields the same `Rc`.
pub struct HeapModel<'a> {
    memory: &'a dyn ReadMemory,
    objects: RefCell<HashMap<u64, Slot>>,
    depth: Cell<usize>,
}

impl<'a> HeapModel<'a> {
    pub fn new(memory: &'a dyn ReadMemory) -> HeapModel<'a> {
        HeapModel {
            memory,
            objects: RefCell::new(HashMap::new()),
            depth: Cell::new(0),
        }
    }

    pub fn object_alignment_mask(&self) -> u64 {
        self.memory.pointer_size() as u64 - 1
    }

    pub fn map_alignment_mask(&self) -> u64 {
        match self.memory.arch() {
            Arch::Amd64 | Arch::Arm => (1 << 4) - 1,
            Arch::X86 => (1 << 5) - 1,
        }
    }

    /// The number of cached decode results.
    pub fn cached_objects(&self) -> usize {
        self.objects.borrow().len()
    }

    fn decode(&self, tagged_address: u64) -> Option<Rc<HeapObject>> {
        if tagged_address & self.object_alignment_mask() != 1 {
            return None;
        }
        let address = tagged_address - 1;
        if !self.memory.is_valid_address(address) {
            return None;
        }
        let map_tagged_address = self.memory.read_pointer(address)?;
        if map_tagged_address == tagged_address {
            // A map whose map is itself: the meta map.
            let meta = Map::read(self.memory, address)?;
            if meta.instance_type != constants::MAP_TYPE {
                return None;
            }
            return Some(Rc::new(HeapObject {
                address,
                map: Some(MapInfo::Map(meta.clone())),
                body: Body::Map(meta),
            }));
        }
        let map = self.find_map(map_tagged_address)?;
        Some(Rc::new(materialize(self, map, address)))
    }
}

impl<'a> HeapAccess for HeapModel<'a> {
    fn memory(&self) -> &dyn ReadMemory {
        self.memory
    }

    fn find_object(&self, tagged_address: u64) -> Tagged {
        let cached = self.objects.borrow().get(&tagged_address).cloned();
        match cached {
            Some(Slot::Done(Some(o))) => return Tagged::Object(o),
            Some(Slot::Done(None)) => return Tagged::Unknown(tagged_address),
            Some(Slot::InProgress) => return Tagged::InProgress(tagged_address),
            None => {}
        }
        if self.depth.get() >= MAX_DECODE_DEPTH {
            trace!("decode depth exceeded at {:#x}", tagged_address);
            return Tagged::Unknown(tagged_address);
        }

        self.objects
            .borrow_mut()
            .insert(tagged_address, Slot::InProgress);
        self.depth.set(self.depth.get() + 1);
        let object = self.decode(tagged_address);
        self.depth.set(self.depth.get() - 1);
        self.objects
            .borrow_mut()
            .insert(tagged_address, Slot::Done(object.clone()));

        match object {
            Some(o) => Tagged::Object(o),
            None => Tagged::Unknown(tagged_address),
        }
    }

    fn find_map(&self, tagged_address: u64) -> Option<MapInfo> {
        if tagged_address & self.map_alignment_mask() != 1 {
            return None;
        }
        let address = tagged_address - 1;
        if !self.memory.is_valid_address(address) {
            return None;
        }
        Map::read(self.memory, address).map(MapInfo::Map)
    }
}

#[cfg(test)]
mod test {
    use super::testing::{smi, FakeMemory};
    use super::*;

    const BASE: u64 = 0x40000;

    fn strings(arch: Arch) -> FakeMemory {
        let mut m = FakeMemory::new(arch, BASE, 0x1000);
        m.put_map(BASE, BASE, constants::MAP_TYPE);
        m.put_map(BASE + 0x100, BASE, constants::ONE_BYTE_STRING_TYPE);
        m.put_map(BASE + 0x200, BASE, constants::CONS_ONE_BYTE_STRING_TYPE);
        m
    }

    #[test]
    fn test_smi_value() {
        assert_eq!(smi_value(84, 8), 42);
        assert_eq!(smi_value(0xffff_fffe, 4), -1);
        assert_eq!(smi_value(0xffff_ffff_ffff_fffe, 8), -1);
    }

    #[test]
    fn test_smi_never_reads_memory() {
        let m = FakeMemory::new(Arch::X86, BASE, 0x10);
        let heap = HeapModel::new(&m);
        assert_eq!(heap.find_object_or_smi(0x1234).as_smi(), Some(0x91a));
        assert_eq!(heap.cached_objects(), 0);
    }

    #[test]
    fn test_meta_map() {
        let m = strings(Arch::Amd64);
        let heap = HeapModel::new(&m);
        let meta = heap.find_object(BASE + 1);
        let meta = meta.as_object().unwrap();
        assert!(matches!(meta.body, Body::Map(ref map) if map.is_meta_map()));
        assert_eq!(meta.to_string(), "HeapObject(00040000, MAP_TYPE)");

        // A self-referencing word at something that isn't a map.
        let mut m = FakeMemory::new(Arch::Amd64, BASE, 0x100);
        m.put_map(BASE, BASE, constants::FIXED_ARRAY_TYPE);
        let heap = HeapModel::new(&m);
        assert!(matches!(heap.find_object(BASE + 1), Tagged::Unknown(_)));
    }

    #[test]
    fn test_cache_identity() {
        let mut m = strings(Arch::Amd64);
        m.put_string(BASE + 0x400, BASE + 0x101, "Hi");
        let heap = HeapModel::new(&m);
        let a = heap.find_object(BASE + 0x401);
        let b = heap.find_object(BASE + 0x401);
        assert!(a.same_as(&b));
        assert_eq!(a.to_string(), "\"Hi\"");
    }

    #[test]
    fn test_invalid_addresses() {
        let m = strings(Arch::Amd64);
        let heap = HeapModel::new(&m);
        // Misaligned.
        assert!(matches!(heap.find_object(BASE + 0x403), Tagged::Unknown(_)));
        // Outside the dump.
        assert!(matches!(heap.find_object(0x1001), Tagged::Unknown(0x1001)));
        // Map pointer not map-aligned.
        assert!(heap.find_map(BASE + 0x109).is_none());
    }

    #[test]
    fn test_cons_string() {
        let mut m = strings(Arch::X86);
        let (left, right, cons) = (BASE + 0x400, BASE + 0x440, BASE + 0x480);
        m.put_string(left, BASE + 0x101, "foo");
        m.put_string(right, BASE + 0x101, "bar");
        m.put_word(cons, BASE + 0x201);
        m.put_word(cons + 8, smi(6));
        m.put_word(cons + 12, left + 1);
        m.put_word(cons + 16, right + 1);
        let heap = HeapModel::new(&m);
        let s = heap.find_object(cons + 1);
        assert_eq!(
            s.as_object().unwrap().get_characters().as_deref(),
            Some("foobar")
        );
    }

    #[test]
    fn test_cycle_is_in_progress() {
        let mut m = strings(Arch::X86);
        let cons = BASE + 0x480;
        m.put_word(cons, BASE + 0x201);
        m.put_word(cons + 12, cons + 1);
        m.put_word(cons + 16, smi(1));
        let heap = HeapModel::new(&m);
        let s = heap.find_object(cons + 1);
        let s = s.as_object().unwrap();
        assert!(matches!(
            s.body,
            Body::ConsString {
                left: Tagged::InProgress(_),
                ..
            }
        ));
        assert_eq!(s.get_characters().as_deref(), Some("?string??string?"));
    }
}
