use encoding_rs::UTF_16LE;
use std::convert::TryFrom;
use std::fmt;
use std::io;

use super::constants::{instance_type_name, is_one_byte, object_class, ObjectClass};
use super::map::Map;
use super::{smi_value, CodeRenderer, HeapAccess, Tagged, INT_SIZE};
use crate::printer::Printer;

const STRING_PLACEHOLDER: &str = "?string?";
const EXTERNAL_STRING_PLACEHOLDER: &str = "?external string?";
const SOURCE_PLACEHOLDER: &str = "?source?";

// Embedder (WebKit) external string resources.
const EXTERNAL_RESOURCE_OFFSET: u64 = 12;
const RESOURCE_STRING_IMPL_OFFSET: u64 = 4;
const STRING_IMPL_CHARS_OFFSET: u64 = 8;

const CODE_ALIGNMENT_MASK: u64 = (1 << 5) - 1;

/// Oddball kinds, indexed by the kind Smi.
pub static ODDBALL_KINDS: &[&str] = &[
    "False",
    "True",
    "TheHole",
    "Null",
    "ArgumentMarker",
    "Undefined",
    "Other",
];

/// The map an object was decoded with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MapInfo {
    /// A map read from memory.
    Map(Map),
    /// A map recognized by its position on a known map page.
    Known {
        name: &'static str,
        instance_type: u8,
    },
}

impl MapInfo {
    pub fn instance_type(&self) -> u8 {
        match self {
            MapInfo::Map(m) => m.instance_type,
            MapInfo::Known { instance_type, .. } => *instance_type,
        }
    }
}

/// Fields of a `SharedFunctionInfo`.
#[derive(Debug)]
pub struct SharedInfo {
    pub code: Tagged,
    pub script: Tagged,
    pub inferred_name: Tagged,
    pub start_position: Option<i64>,
    pub end_position: Option<i64>,
}

/// The variant-specific part of a heap object.
#[derive(Debug)]
pub enum Body {
    Generic,
    Map(Map),
    Oddball {
        to_string: Tagged,
        kind: Option<i64>,
    },
    SeqString {
        length: Option<i64>,
        chars: Option<String>,
    },
    ConsString {
        length: Option<i64>,
        left: Tagged,
        right: Tagged,
    },
    ExternalString {
        length: Option<i64>,
        chars: Option<String>,
    },
    /// Elements are decoded on demand by [`HeapObject::get`].
    FixedArray {
        length: Option<i64>,
    },
    JSFunction {
        code: Tagged,
        shared: Tagged,
    },
    SharedFunctionInfo(SharedInfo),
    Script {
        source: Tagged,
        name: Tagged,
    },
    CodeCache {
        default_cache: Tagged,
        normal_type_cache: Tagged,
    },
    Code {
        entry: u64,
        instruction_size: Option<u32>,
    },
    /// A well-known singleton or map, identified by name only.
    Known(&'static str),
}

/// A decoded heap object.
#[derive(Debug)]
pub struct HeapObject {
    /// The untagged address.
    pub address: u64,
    /// `None` for objects that were not decoded through their map.
    pub map: Option<MapInfo>,
    pub body: Body,
}

fn object_field(heap: &dyn HeapAccess, address: u64) -> Tagged {
    match heap.memory().read_pointer(address) {
        Some(word) => heap.find_object_or_smi(word),
        None => Tagged::Unknown(address),
    }
}

fn smi_field(heap: &dyn HeapAccess, address: u64) -> Option<i64> {
    let word = heap.memory().read_pointer(address)?;
    if word & 1 != 0 {
        return None;
    }
    Some(smi_value(word, heap.pointer_size() as usize))
}

fn decode_utf16(bytes: &[u8]) -> Option<String> {
    let (chars, had_errors) = UTF_16LE.decode_without_bom_handling(bytes);
    if had_errors {
        return None;
    }
    Some(chars.into_owned())
}

fn seq_string_chars(heap: &dyn HeapAccess, address: u64, instance_type: u8, length: Option<i64>) -> Option<String> {
    let length = usize::try_from(length?).ok()?;
    let chars_address = address + 3 * heap.pointer_size();
    if is_one_byte(instance_type) {
        let bytes = heap.memory().read_bytes(chars_address, length)?;
        Some(bytes.iter().map(|&b| b as char).collect())
    } else {
        let bytes = heap.memory().read_bytes(chars_address, length.checked_mul(2)?)?;
        decode_utf16(bytes)
    }
}

fn external_string_chars(heap: &dyn HeapAccess, address: u64, length: Option<i64>) -> Option<String> {
    let memory = heap.memory();
    let length = usize::try_from(length?).ok()?;
    let resource = memory.read_u32(address + EXTERNAL_RESOURCE_OFFSET)? as u64;
    let string_impl = memory.read_u32(resource + RESOURCE_STRING_IMPL_OFFSET)? as u64;
    let chars = memory.read_u32(string_impl + STRING_IMPL_CHARS_OFFSET)? as u64;
    decode_utf16(memory.read_bytes(chars, length.checked_mul(2)?)?)
}

/// The size of a code object's header; instructions start right after it.
pub fn code_header_size(pointer_size: u64) -> u64 {
    (pointer_size + INT_SIZE + 4 * pointer_size + 3 * INT_SIZE + CODE_ALIGNMENT_MASK)
        & !CODE_ALIGNMENT_MASK
}

fn shared_function_info(heap: &dyn HeapAccess, address: u64) -> SharedInfo {
    let ptr = heap.pointer_size();
    let end_offset = 12 * ptr + 4 * INT_SIZE;
    let start_and_type_offset = 12 * ptr + 5 * INT_SIZE;
    let (start_position, end_position) = if ptr == 8 {
        let memory = heap.memory();
        (
            memory
                .read_u32(address + start_and_type_offset)
                .map(|v| (v >> 2) as i64),
            memory.read_u32(address + end_offset).map(|v| (v >> 2) as i64),
        )
    } else {
        (
            smi_field(heap, address + start_and_type_offset)
                .filter(|&v| v != 0)
                .map(|v| v >> 2),
            smi_field(heap, address + end_offset),
        )
    };
    SharedInfo {
        code: object_field(heap, address + 2 * ptr),
        script: object_field(heap, address + 7 * ptr),
        inferred_name: object_field(heap, address + 9 * ptr),
        start_position,
        end_position,
    }
}

/// Decode the object at untagged `address` as the variant its map's instance type
/// selects. Fields that point at other objects are decoded through `heap`.
pub fn materialize(heap: &dyn HeapAccess, map: MapInfo, address: u64) -> HeapObject {
    let ptr = heap.pointer_size();
    let instance_type = map.instance_type();
    let body = match object_class(instance_type) {
        ObjectClass::Generic => Body::Generic,
        ObjectClass::Map => match Map::read(heap.memory(), address) {
            Some(m) => Body::Map(m),
            None => Body::Generic,
        },
        ObjectClass::Oddball => Body::Oddball {
            to_string: object_field(heap, address + ptr),
            kind: smi_field(heap, address + 3 * ptr),
        },
        ObjectClass::SeqString => {
            let length = smi_field(heap, address + 2 * ptr);
            Body::SeqString {
                length,
                chars: seq_string_chars(heap, address, instance_type, length),
            }
        }
        ObjectClass::ConsString => Body::ConsString {
            length: smi_field(heap, address + 2 * ptr),
            left: object_field(heap, address + 3 * ptr),
            right: object_field(heap, address + 4 * ptr),
        },
        ObjectClass::ExternalString => {
            let length = smi_field(heap, address + 2 * ptr);
            Body::ExternalString {
                length,
                chars: external_string_chars(heap, address, length),
            }
        }
        ObjectClass::FixedArray => Body::FixedArray {
            length: smi_field(heap, address + ptr),
        },
        ObjectClass::JSFunction => {
            let entry_address = address + 3 * ptr;
            let code = match heap.memory().read_u32(entry_address) {
                Some(entry) => heap.find_object(
                    (entry as u64)
                        .wrapping_sub(code_header_size(ptr))
                        .wrapping_add(1),
                ),
                None => Tagged::Unknown(entry_address),
            };
            Body::JSFunction {
                code,
                shared: object_field(heap, address + 5 * ptr),
            }
        }
        ObjectClass::SharedFunctionInfo => {
            Body::SharedFunctionInfo(shared_function_info(heap, address))
        }
        ObjectClass::Script => Body::Script {
            source: object_field(heap, address + ptr),
            name: object_field(heap, address + 2 * ptr),
        },
        ObjectClass::CodeCache => Body::CodeCache {
            default_cache: object_field(heap, address + ptr),
            normal_type_cache: object_field(heap, address + 2 * ptr),
        },
        ObjectClass::Code => Body::Code {
            entry: address + code_header_size(ptr),
            instruction_size: heap.memory().read_u32(address + ptr),
        },
    };
    HeapObject {
        address,
        map: Some(map),
        body,
    }
}

fn print_tagged(
    value: &Tagged,
    heap: &dyn HeapAccess,
    code: &dyn CodeRenderer,
    p: &mut Printer<'_>,
) -> io::Result<()> {
    match value {
        Tagged::Object(o) => o.print(heap, code, p),
        other => p.print(other),
    }
}

fn optional<T: fmt::Display>(value: Option<T>) -> String {
    match value {
        Some(v) => v.to_string(),
        None => "?".to_owned(),
    }
}

impl HeapObject {
    /// A named placeholder for a well-known object.
    pub fn known(address: u64, name: &'static str) -> HeapObject {
        HeapObject {
            address,
            map: None,
            body: Body::Known(name),
        }
    }

    /// View the memory at untagged `address` as a fixed array, whatever its map says.
    pub fn fixed_array_at(heap: &dyn HeapAccess, address: u64) -> HeapObject {
        HeapObject {
            address,
            map: None,
            body: Body::FixedArray {
                length: smi_field(heap, address + heap.pointer_size()),
            },
        }
    }

    pub fn instance_type(&self) -> Option<u8> {
        self.map.as_ref().map(MapInfo::instance_type)
    }

    pub fn is_string(&self) -> bool {
        matches!(
            self.body,
            Body::SeqString { .. } | Body::ConsString { .. } | Body::ExternalString { .. }
        )
    }

    pub fn is_fixed_array(&self) -> bool {
        matches!(self.body, Body::FixedArray { .. })
    }

    /// The text of a string object. `None` for anything else.
    ///
    /// Strings whose contents can't be read produce a placeholder rather than `None`.
    pub fn get_characters(&self) -> Option<String> {
        match &self.body {
            Body::SeqString { chars, .. } => Some(
                chars
                    .clone()
                    .unwrap_or_else(|| STRING_PLACEHOLDER.to_owned()),
            ),
            Body::ExternalString { chars, .. } => Some(
                chars
                    .clone()
                    .unwrap_or_else(|| EXTERNAL_STRING_PLACEHOLDER.to_owned()),
            ),
            Body::ConsString { left, right, .. } => {
                let side = |t: &Tagged| {
                    t.as_object()
                        .and_then(|o| o.get_characters())
                        .unwrap_or_else(|| STRING_PLACEHOLDER.to_owned())
                };
                Some(side(left) + &side(right))
            }
            _ => None,
        }
    }

    /// The length of a fixed array view.
    pub fn fixed_array_length(&self) -> Option<i64> {
        match self.body {
            Body::FixedArray { length } => length,
            _ => None,
        }
    }

    pub fn member_offset(heap: &dyn HeapAccess, i: u64) -> u64 {
        2 * heap.pointer_size() + i * heap.pointer_size()
    }

    /// Element `i` of a fixed array, or `None` if its word isn't in the dump.
    ///
    /// The index is not checked against the array's length.
    pub fn get(&self, heap: &dyn HeapAccess, i: u64) -> Option<Tagged> {
        let word = heap
            .memory()
            .read_pointer(self.address + HeapObject::member_offset(heap, i))?;
        Some(heap.find_object_or_smi(word))
    }

    fn type_name(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.instance_type() {
            Some(t) => match instance_type_name(t) {
                Some(name) => f.write_str(name),
                None => write!(f, "UNKNOWN_TYPE_{}", t),
            },
            None => f.write_str("?"),
        }
    }

    fn source(&self) -> String {
        let shared = match &self.body {
            Body::JSFunction { shared, .. } => shared,
            _ => return SOURCE_PLACEHOLDER.to_owned(),
        };
        let info = match shared.as_object().map(|o| &o.body) {
            Some(Body::SharedFunctionInfo(info)) => info,
            _ => return SOURCE_PLACEHOLDER.to_owned(),
        };
        let source = match info.script.as_object().map(|o| &o.body) {
            Some(Body::Script { source, .. }) => source,
            _ => return SOURCE_PLACEHOLDER.to_owned(),
        };
        let chars = match source.as_object().and_then(|o| o.get_characters()) {
            Some(chars) => chars,
            None => return SOURCE_PLACEHOLDER.to_owned(),
        };
        match (info.start_position, info.end_position) {
            (Some(start), Some(end)) if start > 0 && end > 0 => chars
                .chars()
                .skip(start as usize)
                .take(end.saturating_sub(start).max(0) as usize)
                .collect(),
            _ => SOURCE_PLACEHOLDER.to_owned(),
        }
    }

    /// Print the long form of this object.
    pub fn print(
        &self,
        heap: &dyn HeapAccess,
        code: &dyn CodeRenderer,
        p: &mut Printer<'_>,
    ) -> io::Result<()> {
        let address = heap.memory().format_pointer(self.address);
        match &self.body {
            Body::Map(map) => map.print(heap, p),
            Body::FixedArray { length } => {
                p.print(&format!("FixedArray({}) {{", address))?;
                p.indent();
                p.print(&format!("length: {}", optional(*length)))?;
                for i in 0..length.unwrap_or(0).max(0) as u64 {
                    match self.get(heap, i) {
                        Some(element) => p.print(&format!("[{:08}] = {}", i, element))?,
                        None => {
                            p.dedent();
                            p.print("...")?;
                            return p.print("}");
                        }
                    }
                }
                p.dedent();
                p.print("}")
            }
            Body::JSFunction { code: fn_code, shared } => {
                let info = match shared.as_object().map(|o| &o.body) {
                    Some(Body::SharedFunctionInfo(info)) => Some(info),
                    _ => None,
                };
                p.print(&format!("JSFunction({}) {{", address))?;
                p.indent();
                match info {
                    Some(info) => p.print(&format!("inferred name: {}", info.inferred_name))?,
                    None => p.print(&format!("shared: {}", shared))?,
                }
                if let Some(Body::Script { name, .. }) =
                    info.and_then(|i| i.script.as_object()).map(|o| &o.body)
                {
                    if name.as_object().map_or(false, |n| n.is_string()) {
                        p.print(&format!("script name: {}", name))?;
                    }
                }
                p.print("source:")?;
                p.print_lines(self.source().split('\n'))?;
                p.print("code:")?;
                print_tagged(fn_code, heap, code, p)?;
                if let Some(info) = info {
                    if !fn_code.same_as(&info.code) {
                        p.print("unoptimized code:")?;
                        print_tagged(&info.code, heap, code, p)?;
                    }
                }
                p.dedent();
                p.print("}")
            }
            Body::CodeCache {
                default_cache,
                normal_type_cache,
            } => {
                p.print(&format!("CodeCache({}) {{", address))?;
                p.indent();
                p.print(&format!("default cache: {}", default_cache))?;
                p.print(&format!("normal type cache: {}", normal_type_cache))?;
                p.dedent();
                p.print("}")
            }
            Body::Code {
                entry,
                instruction_size,
            } => {
                p.print(&format!("Code({}) {{", address))?;
                p.indent();
                p.print(&format!("instruction_size: {}", optional(*instruction_size)))?;
                if let Some(size) = instruction_size {
                    p.print_lines(code.render_code(*entry, *size as u64))?;
                }
                p.dedent();
                p.print("}")
            }
            _ => p.print(self),
        }
    }
}

impl fmt::Display for HeapObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.body {
            Body::Known(name) => write!(f, "<{}>", name),
            Body::Oddball { to_string, kind } => match to_string {
                Tagged::Object(s) => write!(f, "Oddball({:08x}, <{}>)", self.address, s),
                _ => {
                    let kind = kind
                        .and_then(|k| usize::try_from(k).ok())
                        .and_then(|k| ODDBALL_KINDS.get(k))
                        .copied()
                        .unwrap_or("???");
                    write!(f, "Oddball({:08x}, kind={})", self.address, kind)
                }
            },
            Body::SeqString { .. } | Body::ConsString { .. } | Body::ExternalString { .. } => {
                write!(f, "\"{}\"", self.get_characters().unwrap_or_default())
            }
            Body::FixedArray { length } => write!(
                f,
                "FixedArray({:08x}, length={})",
                self.address,
                optional(*length)
            ),
            Body::JSFunction { shared, .. } => {
                write!(f, "JSFunction({:08x}, ", self.address)?;
                if let Some(Body::SharedFunctionInfo(info)) = shared.as_object().map(|o| &o.body) {
                    write!(f, "{}", info.inferred_name)?;
                }
                f.write_str(")")
            }
            _ => {
                write!(f, "HeapObject({:08x}, ", self.address)?;
                self.type_name(f)?;
                f.write_str(")")
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::context::Arch;
    use crate::heap::constants;
    use crate::heap::testing::{smi, FakeMemory};
    use crate::heap::{HeapModel, NoCode};

    const BASE: u64 = 0x10000;

    // Meta map at BASE, other maps every 0x100 after it, objects from BASE + 0x800.
    fn heap_with_maps(arch: Arch) -> FakeMemory {
        let mut m = FakeMemory::new(arch, BASE, 0x2000);
        m.put_map(BASE, BASE, constants::MAP_TYPE);
        m
    }

    #[test]
    fn test_code_header_size() {
        assert_eq!(code_header_size(4), 64);
        assert_eq!(code_header_size(8), 64);
    }

    #[test]
    fn test_two_byte_string() {
        let mut m = heap_with_maps(Arch::Amd64);
        m.put_map(BASE + 0x100, BASE, constants::STRING_TYPE);
        let s = BASE + 0x800;
        m.put_word(s, BASE + 0x101);
        m.put_word(s + 16, smi(3));
        m.put_bytes(s + 24, &[b'a', 0, 0xe9, 0, b'z', 0]);
        let heap = HeapModel::new(&m);
        let o = heap.find_object(s + 1);
        let o = o.as_object().unwrap();
        assert_eq!(o.get_characters().as_deref(), Some("aéz"));
        assert_eq!(o.to_string(), "\"aéz\"");
    }

    #[test]
    fn test_string_past_region_is_placeholder() {
        let mut m = heap_with_maps(Arch::Amd64);
        m.put_map(BASE + 0x100, BASE, constants::ONE_BYTE_STRING_TYPE);
        let s = BASE + 0x800;
        m.put_word(s, BASE + 0x101);
        m.put_word(s + 16, smi(0x10_0000));
        let heap = HeapModel::new(&m);
        let o = heap.find_object(s + 1);
        assert_eq!(
            o.as_object().unwrap().get_characters().as_deref(),
            Some("?string?")
        );
    }

    #[test]
    fn test_oddball() {
        let mut m = heap_with_maps(Arch::X86);
        m.put_map(BASE + 0x100, BASE, constants::ODDBALL_TYPE);
        let o = BASE + 0x800;
        m.put_word(o, BASE + 0x101);
        m.put_word(o + 4, smi(0));
        m.put_word(o + 12, smi(5));
        let unknown_kind = BASE + 0x840;
        m.put_word(unknown_kind, BASE + 0x101);
        m.put_word(unknown_kind + 12, smi(42));
        let heap = HeapModel::new(&m);
        assert_eq!(
            heap.find_object(o + 1).to_string(),
            "Oddball(00010800, kind=Undefined)"
        );
        assert_eq!(
            heap.find_object(unknown_kind + 1).to_string(),
            "Oddball(00010840, kind=???)"
        );
    }

    #[test]
    fn test_generic_and_unknown_types() {
        let mut m = heap_with_maps(Arch::X86);
        m.put_map(BASE + 0x100, BASE, constants::JS_ARRAY_TYPE);
        m.put_map(BASE + 0x200, BASE, 0xfe);
        m.put_word(BASE + 0x800, BASE + 0x101);
        m.put_word(BASE + 0x840, BASE + 0x201);
        let heap = HeapModel::new(&m);
        assert_eq!(
            heap.find_object(BASE + 0x801).to_string(),
            "HeapObject(00010800, JS_ARRAY_TYPE)"
        );
        assert_eq!(
            heap.find_object(BASE + 0x841).to_string(),
            "HeapObject(00010840, UNKNOWN_TYPE_254)"
        );
    }

    #[test]
    fn test_fixed_array_print_truncates() {
        let mut m = FakeMemory::new(Arch::X86, BASE, 0x20);
        // Length says 10 but only three elements fit in the region.
        m.put_word(BASE + 4, smi(10));
        m.put_word(BASE + 8, smi(7));
        m.put_word(BASE + 12, smi(8));
        m.put_word(BASE + 16, 0x4);
        let heap = HeapModel::new(&m);
        let array = HeapObject::fixed_array_at(&heap, BASE);
        let mut out = vec![];
        array
            .print(&heap, &NoCode, &mut Printer::new(&mut out))
            .unwrap();
        let expected = "FixedArray(00010000) {\n  length: 10\n  [00000000] = Smi(7)\n  \
[00000001] = Smi(8)\n  [00000002] = Smi(2)\n  [00000003] = Smi(0)\n  [00000004] = Smi(0)\n  \
[00000005] = Smi(0)\n...\n}\n";
        assert_eq!(String::from_utf8(out).unwrap(), expected);
    }

    #[test]
    fn test_code_print_uses_renderer() {
        struct Lines;
        impl CodeRenderer for Lines {
            fn render_code(&self, entry: u64, size: u64) -> Vec<String> {
                vec![format!("{:x} {}", entry, size)]
            }
        }
        let mut m = heap_with_maps(Arch::X86);
        m.put_map(BASE + 0x100, BASE, constants::CODE_TYPE);
        let c = BASE + 0x800;
        m.put_word(c, BASE + 0x101);
        m.put_u32(c + 4, 0x30);
        let heap = HeapModel::new(&m);
        let code = heap.find_object(c + 1);
        let mut out = vec![];
        code.as_object()
            .unwrap()
            .print(&heap, &Lines, &mut Printer::new(&mut out))
            .unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "Code(00010800) {\n  instruction_size: 48\n  10840 48\n}\n"
        );
    }

    #[test]
    fn test_js_function() {
        let mut m = heap_with_maps(Arch::X86);
        m.put_map(BASE + 0x100, BASE, constants::JS_FUNCTION_TYPE);
        m.put_map(BASE + 0x200, BASE, constants::SHARED_FUNCTION_INFO_TYPE);
        m.put_map(BASE + 0x300, BASE, constants::SCRIPT_TYPE);
        m.put_map(BASE + 0x400, BASE, constants::ONE_BYTE_STRING_TYPE);
        m.put_map(BASE + 0x500, BASE, constants::CODE_TYPE);

        let code = BASE + 0x1000;
        m.put_word(code, BASE + 0x501);
        m.put_u32(code + 4, 0);

        let source = BASE + 0x900;
        m.put_string(source, BASE + 0x401, "function f() {}");
        let name = BASE + 0x980;
        m.put_string(name, BASE + 0x401, "a.js");
        let fname = BASE + 0x9c0;
        m.put_string(fname, BASE + 0x401, "f");

        let script = BASE + 0xa00;
        m.put_word(script, BASE + 0x301);
        m.put_word(script + 4, source + 1);
        m.put_word(script + 8, name + 1);

        let sfi = BASE + 0xb00;
        m.put_word(sfi, BASE + 0x201);
        m.put_word(sfi + 8, code + 1);
        m.put_word(sfi + 28, script + 1);
        m.put_word(sfi + 36, fname + 1);
        m.put_word(sfi + 48 + 16, smi(15));
        m.put_word(sfi + 48 + 20, smi(9 << 2));

        let f = BASE + 0xc00;
        m.put_word(f, BASE + 0x101);
        m.put_u32(f + 12, (code + code_header_size(4)) as u32);
        m.put_word(f + 20, sfi + 1);

        let heap = HeapModel::new(&m);
        let function = heap.find_object(f + 1);
        assert_eq!(function.to_string(), "JSFunction(00010c00, \"f\")");
        let mut out = vec![];
        function
            .as_object()
            .unwrap()
            .print(&heap, &NoCode, &mut Printer::new(&mut out))
            .unwrap();
        let expected = "JSFunction(00010c00) {\n  inferred name: \"f\"\n  \
script name: \"a.js\"\n  source:\n  f() {}\n  code:\n  Code(00011000) {\n    \
instruction_size: 0\n  }\n}\n";
        assert_eq!(String::from_utf8(out).unwrap(), expected);
    }
}
