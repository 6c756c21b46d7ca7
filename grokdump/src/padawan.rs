//! Recognizing well-known objects from operator-supplied landmark pages.
//!
//! Objects on the first map page and the first old-space pages sit at offsets that are
//! fixed for a given runtime build. Once the operator says where those pages are, the
//! [`Padawan`] can name such objects without decoding them, and can fall back to
//! decoding an object through a sensed map when the plain [`HeapModel`] gives up.

use std::cell::Cell;
use std::fmt;
use std::io::{self, Write};
use std::rc::Rc;
use std::str::FromStr;
use tracing::debug;

use crate::heap::constants::{self, instance_type_name};
use crate::heap::{
    materialize, Body, HeapAccess, HeapModel, HeapObject, MapInfo, Tagged, MAX_DECODE_DEPTH,
    PAGE_ALIGNMENT_MASK,
};
use crate::memory::ReadMemory;

/// The kinds of landmark page.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PageKind {
    /// The first map-space page.
    Map,
    /// The first old-data-space page.
    Data,
    /// The first old-pointer-space page.
    Pointer,
}

impl PageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PageKind::Map => "mappage",
            PageKind::Data => "datapage",
            PageKind::Pointer => "pointerpage",
        }
    }
}

impl fmt::Display for PageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<PageKind, String> {
        match s {
            "mappage" => Ok(PageKind::Map),
            "datapage" => Ok(PageKind::Data),
            "pointerpage" => Ok(PageKind::Pointer),
            _ => Err(format!("unknown page kind `{}`", s)),
        }
    }
}

/// The start addresses of the landmark pages. Zero means unknown.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Landmarks {
    pub map_page: u64,
    pub data_page: u64,
    pub pointer_page: u64,
}

impl Landmarks {
    pub fn get(&self, kind: PageKind) -> u64 {
        match kind {
            PageKind::Map => self.map_page,
            PageKind::Data => self.data_page,
            PageKind::Pointer => self.pointer_page,
        }
    }

    /// Record the page containing `address` as the `kind` landmark.
    pub fn set(&mut self, kind: PageKind, address: u64) {
        let page = address & !PAGE_ALIGNMENT_MASK;
        match kind {
            PageKind::Map => self.map_page = page,
            PageKind::Data => self.data_page = page,
            PageKind::Pointer => self.pointer_page = page,
        }
    }
}

fn page_of(tagged_address: u64) -> u64 {
    tagged_address & !PAGE_ALIGNMENT_MASK
}

fn page_offset(tagged_address: u64) -> u64 {
    tagged_address & PAGE_ALIGNMENT_MASK
}

/// A [`HeapAccess`] that consults the landmark pages before the heap model.
pub struct Padawan<'h, 'a> {
    heap: &'h HeapModel<'a>,
    landmarks: Landmarks,
    depth: Cell<usize>,
}

impl<'h, 'a> Padawan<'h, 'a> {
    pub fn new(heap: &'h HeapModel<'a>) -> Padawan<'h, 'a> {
        Padawan {
            heap,
            landmarks: Landmarks::default(),
            depth: Cell::new(0),
        }
    }

    pub fn with_landmarks(heap: &'h HeapModel<'a>, landmarks: Landmarks) -> Padawan<'h, 'a> {
        Padawan {
            landmarks,
            ..Padawan::new(heap)
        }
    }

    pub fn heap(&self) -> &'h HeapModel<'a> {
        self.heap
    }

    pub fn landmarks(&self) -> Landmarks {
        self.landmarks
    }

    pub fn set_landmark(&mut self, kind: PageKind, address: u64) {
        self.landmarks.set(kind, address);
        debug!(
            "{} landmark is now {:#x}",
            kind,
            self.landmarks.get(kind)
        );
    }

    fn is_landmark(page: u64, landmark: u64) -> bool {
        landmark != 0 && page == landmark
    }

    fn known_old_space(&self, tagged_address: u64) -> Option<&'static str> {
        let page = page_of(tagged_address);
        if Padawan::is_landmark(page, self.landmarks.data_page) {
            Some(constants::OLD_DATA_SPACE)
        } else if Padawan::is_landmark(page, self.landmarks.pointer_page) {
            Some(constants::OLD_POINTER_SPACE)
        } else {
            None
        }
    }

    fn is_in_known_map_space(&self, tagged_address: u64) -> bool {
        Padawan::is_landmark(page_of(tagged_address), self.landmarks.map_page)
    }

    /// Identify the map at `tagged_address`, by landmark if possible.
    pub fn sense_map(&self, tagged_address: u64) -> Option<MapInfo> {
        if self.is_in_known_map_space(tagged_address) {
            if let Some((instance_type, name)) = constants::known_map(page_offset(tagged_address)) {
                return Some(MapInfo::Known {
                    name,
                    instance_type,
                });
            }
        }
        self.heap.find_map(tagged_address)
    }

    /// Identify the object at `tagged_address`.
    ///
    /// Landmark pages are consulted first, then the heap model. As a last resort the word
    /// before the object is sensed as a map and the object is decoded through it; such
    /// objects are not cached.
    pub fn sense_object(&self, tagged_address: u64) -> Option<Tagged> {
        if let Some(space) = self.known_old_space(tagged_address) {
            if let Some(name) = constants::known_object(space, page_offset(tagged_address)) {
                return Some(Tagged::Object(Rc::new(HeapObject::known(
                    tagged_address.wrapping_sub(1),
                    name,
                ))));
            }
        }
        if self.is_in_known_map_space(tagged_address) {
            let address = tagged_address.wrapping_sub(1);
            match self.sense_map(tagged_address) {
                Some(MapInfo::Known { name, .. }) => {
                    return Some(Tagged::Object(Rc::new(HeapObject::known(address, name))));
                }
                Some(MapInfo::Map(map)) => {
                    return Some(Tagged::Object(Rc::new(HeapObject {
                        address,
                        map: None,
                        body: Body::Map(map),
                    })));
                }
                None => {}
            }
        }
        match self.heap.find_object(tagged_address) {
            Tagged::Unknown(_) => {}
            found => return Some(found),
        }

        let address = tagged_address.wrapping_sub(1);
        let map_word = self.heap.memory().read_pointer(address)?;
        let map = self.sense_map(map_word)?;
        instance_type_name(map.instance_type())?;
        if self.depth.get() >= MAX_DECODE_DEPTH {
            return None;
        }
        self.depth.set(self.depth.get() + 1);
        let object = materialize(self, map, address);
        self.depth.set(self.depth.get() - 1);
        Some(Tagged::Object(Rc::new(object)))
    }

    pub fn print_knowledge<W: Write + ?Sized>(&self, out: &mut W) -> io::Result<()> {
        let memory = self.heap.memory();
        writeln!(
            out,
            "  known_first_map_page = {}",
            memory.format_pointer(self.landmarks.map_page)
        )?;
        writeln!(
            out,
            "  known_first_data_page = {}",
            memory.format_pointer(self.landmarks.data_page)
        )?;
        writeln!(
            out,
            "  known_first_pointer_page = {}",
            memory.format_pointer(self.landmarks.pointer_page)
        )
    }
}

impl<'h, 'a> HeapAccess for Padawan<'h, 'a> {
    fn memory(&self) -> &dyn ReadMemory {
        self.heap.memory()
    }

    fn find_object(&self, tagged_address: u64) -> Tagged {
        self.sense_object(tagged_address)
            .unwrap_or(Tagged::Unknown(tagged_address))
    }

    fn find_map(&self, tagged_address: u64) -> Option<MapInfo> {
        self.sense_map(tagged_address)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::context::Arch;
    use crate::heap::testing::{smi, FakeMemory};

    const PAGE: u64 = 0x0030_0000;

    #[test]
    fn test_page_kind() {
        assert_eq!("mappage".parse::<PageKind>(), Ok(PageKind::Map));
        assert_eq!(PageKind::Pointer.to_string(), "pointerpage");
        assert!("codepage".parse::<PageKind>().is_err());
    }

    #[test]
    fn test_landmarks_are_page_aligned() {
        let mut l = Landmarks::default();
        l.set(PageKind::Data, PAGE + 0x1234);
        assert_eq!(l.data_page, PAGE);
        assert_eq!(l.get(PageKind::Map), 0);
    }

    #[test]
    fn test_known_objects() {
        let m = FakeMemory::new(Arch::X86, PAGE, 0x10000);
        let heap = HeapModel::new(&m);
        let mut padawan = Padawan::new(&heap);
        padawan.set_landmark(PageKind::Pointer, PAGE + 0x10);
        padawan.set_landmark(PageKind::Map, PAGE + 0x20_0000);
        assert_eq!(
            padawan.find_object(PAGE + 0x8091).to_string(),
            "<UndefinedValue>"
        );
        assert_eq!(
            padawan.sense_map(PAGE + 0x20_80a9),
            Some(MapInfo::Known {
                name: "MetaMap",
                instance_type: constants::MAP_TYPE
            })
        );
        // The landmark path never consults the heap model.
        assert_eq!(heap.cached_objects(), 0);

        // Nothing is known without landmarks.
        let padawan = Padawan::new(&heap);
        assert!(matches!(
            padawan.find_object(PAGE + 0x8091),
            Tagged::Unknown(_)
        ));
    }

    #[test]
    fn test_object_with_known_map() {
        // A string whose map is on the map page, which isn't in the dump.
        let map_page = 0x0050_0000;
        let mut m = FakeMemory::new(Arch::X86, PAGE, 0x10000);
        let s = PAGE + 0x100;
        m.put_string(s, map_page + 0x83c9, "Yo");
        let heap = HeapModel::new(&m);
        assert!(matches!(heap.find_object(s + 1), Tagged::Unknown(_)));

        let mut padawan = Padawan::new(&heap);
        padawan.set_landmark(PageKind::Map, map_page);
        let found = padawan.find_object(s + 1);
        let found = found.as_object().unwrap();
        assert!(matches!(found.body, Body::SeqString { .. }));
        assert_eq!(found.get_characters().as_deref(), Some("Yo"));
        assert_eq!(padawan.find_object_or_smi(smi(21)).as_smi(), Some(21));
    }

    #[test]
    fn test_print_knowledge() {
        let m = FakeMemory::new(Arch::Amd64, PAGE, 0x10);
        let heap = HeapModel::new(&m);
        let padawan = Padawan::with_landmarks(
            &heap,
            Landmarks {
                map_page: PAGE,
                ..Landmarks::default()
            },
        );
        let mut out = vec![];
        padawan.print_knowledge(&mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "  known_first_map_page = 0000000000300000\n  \
known_first_data_page = 0000000000000000\n  \
known_first_pointer_page = 0000000000000000\n"
        );
    }
}
