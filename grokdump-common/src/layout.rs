//! A reader for records whose shape is described at runtime.
//!
//! Most minidump structs have a fixed shape and are read with `scroll` (see [`crate::format`]).
//! A few do not: a `MINIDUMP_STRING` is followed by as many bytes as its length field says,
//! and a CPU context only contains the register groups its `context_flags` select. A
//! [`Layout`] describes such a record as an ordered list of fields. Each field is either
//! fixed or computed from the fields decoded before it, so a record is always decoded
//! strictly left to right.
//!
//! ```
//! use grokdump_common::layout::{Layout, FieldSpec, FieldType};
//!
//! static PAIR: Layout = Layout {
//!     name: "PAIR",
//!     fields: &[
//!         ("flags", FieldSpec::Fixed(FieldType::U8)),
//!         ("extra", FieldSpec::on_flag("flags", 0x1, FieldType::U16)),
//!         ("tail", FieldSpec::Fixed(FieldType::U8)),
//!     ],
//! };
//!
//! let record = PAIR.read(&[0, 7], 0, scroll::LE).unwrap();
//! assert!(!record.is_present("extra"));
//! assert_eq!(record.get("tail"), Some(7));
//! assert_eq!(record.size(), 2);
//! ```

use scroll::{Endian, Pread};
use std::fmt;
use tracing::trace;

use crate::format::{
    ContextFlagsAmd64, ContextFlagsArm, ContextFlagsX86, AMD64_VECTOR_AREA_SIZE,
    ARM_FLOAT_SAVE_AREA_SIZE, X86_EXTENDED_REGISTERS_SIZE, X86_FLOAT_SAVE_AREA_SIZE,
};

/// Errors encountered while decoding a [`Record`].
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LayoutError {
    #[error("{layout}.{field}: needed {needed} bytes at offset {offset:#x}, buffer is {len} bytes")]
    OutOfBounds {
        layout: &'static str,
        field: &'static str,
        offset: usize,
        needed: usize,
        len: usize,
    },
    #[error("{layout}.{field} refers to field {refers_to} which has not been decoded")]
    UnknownField {
        layout: &'static str,
        field: &'static str,
        refers_to: &'static str,
    },
}

/// The primitive shape of a single field.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FieldType {
    U8,
    U16,
    U32,
    U64,
    /// An opaque run of bytes.
    Bytes(usize),
}

impl FieldType {
    /// The number of bytes this field occupies.
    pub fn size(&self) -> usize {
        match *self {
            FieldType::U8 => 1,
            FieldType::U16 => 2,
            FieldType::U32 => 4,
            FieldType::U64 => 8,
            FieldType::Bytes(n) => n,
        }
    }
}

/// How to compute a field's shape.
#[derive(Copy, Clone)]
pub enum FieldSpec {
    /// Always present with this shape.
    Fixed(FieldType),
    /// Present only if `(record[flags] & mask) != 0`.
    OnFlag {
        flags: &'static str,
        mask: u64,
        ty: FieldType,
    },
    /// A byte run of `record[len] * scale + extra` bytes.
    SizedBy {
        len: &'static str,
        scale: usize,
        extra: usize,
    },
    /// Anything else: the shape is computed from the partially decoded record,
    /// `None` meaning the field is absent.
    Flexible(fn(&Record<'_>) -> Option<FieldType>),
}

impl FieldSpec {
    pub const fn on_flag(flags: &'static str, mask: u64, ty: FieldType) -> FieldSpec {
        FieldSpec::OnFlag { flags, mask, ty }
    }

    pub const fn sized_by(len: &'static str, scale: usize, extra: usize) -> FieldSpec {
        FieldSpec::SizedBy { len, scale, extra }
    }
}

impl fmt::Debug for FieldSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldSpec::Fixed(ty) => write!(f, "Fixed({:?})", ty),
            FieldSpec::OnFlag { flags, mask, ty } => {
                write!(f, "OnFlag({} & {:#x}, {:?})", flags, mask, ty)
            }
            FieldSpec::SizedBy { len, scale, extra } => {
                write!(f, "SizedBy({} * {} + {})", len, scale, extra)
            }
            FieldSpec::Flexible(_) => write!(f, "Flexible"),
        }
    }
}

/// An ordered description of a record.
#[derive(Debug)]
pub struct Layout {
    pub name: &'static str,
    pub fields: &'static [(&'static str, FieldSpec)],
}

/// The decoded value of a single field.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Value<'a> {
    Int(u64),
    Bytes(&'a [u8]),
}

#[derive(Clone, Debug)]
struct Field<'a> {
    name: &'static str,
    offset: usize,
    value: Option<Value<'a>>,
}

/// A record decoded according to a [`Layout`].
///
/// Byte runs borrow from the buffer the record was read from.
#[derive(Clone, Debug)]
pub struct Record<'a> {
    layout: &'static str,
    fields: Vec<Field<'a>>,
    start: usize,
    end: usize,
}

impl<'a> Record<'a> {
    fn field(&self, name: &str) -> Option<&Field<'a>> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// The integer value of `name`, or `None` if the field is absent or not an integer.
    pub fn get(&self, name: &str) -> Option<u64> {
        match self.field(name)?.value {
            Some(Value::Int(v)) => Some(v),
            _ => None,
        }
    }

    /// The bytes of `name`, or `None` if the field is absent or not a byte run.
    pub fn bytes(&self, name: &str) -> Option<&'a [u8]> {
        match self.field(name)?.value {
            Some(Value::Bytes(b)) => Some(b),
            _ => None,
        }
    }

    /// Whether `name` was present in the stream.
    pub fn is_present(&self, name: &str) -> bool {
        self.field(name).map_or(false, |f| f.value.is_some())
    }

    /// The buffer offset `name` was read from, if it was present.
    pub fn offset_of(&self, name: &str) -> Option<usize> {
        self.field(name)
            .filter(|f| f.value.is_some())
            .map(|f| f.offset)
    }

    /// The names of all present fields, in stream order.
    pub fn present_fields(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.fields
            .iter()
            .filter(|f| f.value.is_some())
            .map(|f| f.name)
    }

    /// The number of bytes this record occupied.
    pub fn size(&self) -> usize {
        self.end - self.start
    }

    pub fn layout_name(&self) -> &'static str {
        self.layout
    }
}

impl Layout {
    /// The total size of this layout if every field is [`FieldSpec::Fixed`].
    pub fn fixed_size(&self) -> Option<usize> {
        self.fields.iter().try_fold(0, |acc, (_, spec)| match spec {
            FieldSpec::Fixed(ty) => Some(acc + ty.size()),
            _ => None,
        })
    }

    /// Decode a record from `bytes` starting at `offset`.
    ///
    /// Running off the end of `bytes` fails the whole record.
    pub fn read<'a>(
        &self,
        bytes: &'a [u8],
        offset: usize,
        endian: Endian,
    ) -> Result<Record<'a>, LayoutError> {
        let mut record = Record {
            layout: self.name,
            fields: Vec::with_capacity(self.fields.len()),
            start: offset,
            end: offset,
        };
        let mut cursor = offset;
        for &(name, ref spec) in self.fields {
            let ty = self.resolve(name, spec, &record)?;
            let value = match ty {
                None => None,
                Some(ty) => {
                    let value = read_value(bytes, cursor, ty, endian).ok_or(
                        LayoutError::OutOfBounds {
                            layout: self.name,
                            field: name,
                            offset: cursor,
                            needed: ty.size(),
                            len: bytes.len(),
                        },
                    )?;
                    Some(value)
                }
            };
            let start = cursor;
            if let Some(ty) = ty {
                cursor += ty.size();
            }
            record.fields.push(Field {
                name,
                offset: start,
                value,
            });
        }
        record.end = cursor;
        trace!(
            "decoded {} at {:#x}: {} bytes",
            self.name,
            offset,
            record.size()
        );
        Ok(record)
    }

    fn resolve(
        &self,
        name: &'static str,
        spec: &FieldSpec,
        partial: &Record<'_>,
    ) -> Result<Option<FieldType>, LayoutError> {
        let lookup = |refers_to: &'static str| {
            partial
                .field(refers_to)
                .ok_or(LayoutError::UnknownField {
                    layout: self.name,
                    field: name,
                    refers_to,
                })
                .map(|f| match f.value {
                    Some(Value::Int(v)) => v,
                    _ => 0,
                })
        };
        Ok(match *spec {
            FieldSpec::Fixed(ty) => Some(ty),
            FieldSpec::OnFlag { flags, mask, ty } => {
                if lookup(flags)? & mask != 0 {
                    Some(ty)
                } else {
                    None
                }
            }
            FieldSpec::SizedBy { len, scale, extra } => {
                let len = lookup(len)? as usize;
                Some(FieldType::Bytes(len.saturating_mul(scale).saturating_add(extra)))
            }
            FieldSpec::Flexible(f) => f(partial),
        })
    }
}

fn read_value(bytes: &[u8], offset: usize, ty: FieldType, endian: Endian) -> Option<Value<'_>> {
    Some(match ty {
        FieldType::U8 => Value::Int(bytes.pread_with::<u8>(offset, endian).ok()? as u64),
        FieldType::U16 => Value::Int(bytes.pread_with::<u16>(offset, endian).ok()? as u64),
        FieldType::U32 => Value::Int(bytes.pread_with::<u32>(offset, endian).ok()? as u64),
        FieldType::U64 => Value::Int(bytes.pread_with::<u64>(offset, endian).ok()?),
        FieldType::Bytes(n) => {
            let end = offset.checked_add(n)?;
            Value::Bytes(bytes.get(offset..end)?)
        }
    })
}

use FieldType::*;

const fn group(mask: u64, ty: FieldType) -> FieldSpec {
    FieldSpec::on_flag("context_flags", mask, ty)
}

/// A `MINIDUMP_STRING`: a byte length followed by that many bytes of UTF-16LE.
pub static MINIDUMP_STRING: Layout = Layout {
    name: "MINIDUMP_STRING",
    fields: &[
        ("length", FieldSpec::Fixed(U32)),
        ("buffer", FieldSpec::sized_by("length", 1, 0)),
    ],
};

/// The x86 `CONTEXT` record.
pub static CONTEXT_X86: Layout = {
    const DEBUG: u64 = ContextFlagsX86::DEBUG_REGISTERS.bits() as u64;
    const FLOAT: u64 = ContextFlagsX86::FLOATING_POINT.bits() as u64;
    const SEGMENTS: u64 = ContextFlagsX86::SEGMENTS.bits() as u64;
    const INTEGER: u64 = ContextFlagsX86::INTEGER.bits() as u64;
    const CONTROL: u64 = ContextFlagsX86::CONTROL.bits() as u64;
    const EXTENDED: u64 = ContextFlagsX86::EXTENDED_REGISTERS.bits() as u64;
    Layout {
        name: "CONTEXT_X86",
        fields: &[
            ("context_flags", FieldSpec::Fixed(U32)),
            ("dr0", group(DEBUG, U32)),
            ("dr1", group(DEBUG, U32)),
            ("dr2", group(DEBUG, U32)),
            ("dr3", group(DEBUG, U32)),
            ("dr6", group(DEBUG, U32)),
            ("dr7", group(DEBUG, U32)),
            ("float_save", group(FLOAT, Bytes(X86_FLOAT_SAVE_AREA_SIZE))),
            ("gs", group(SEGMENTS, U32)),
            ("fs", group(SEGMENTS, U32)),
            ("es", group(SEGMENTS, U32)),
            ("ds", group(SEGMENTS, U32)),
            ("edi", group(INTEGER, U32)),
            ("esi", group(INTEGER, U32)),
            ("ebx", group(INTEGER, U32)),
            ("edx", group(INTEGER, U32)),
            ("ecx", group(INTEGER, U32)),
            ("eax", group(INTEGER, U32)),
            ("ebp", group(CONTROL, U32)),
            ("eip", group(CONTROL, U32)),
            ("cs", group(CONTROL, U32)),
            ("eflags", group(CONTROL, U32)),
            ("esp", group(CONTROL, U32)),
            ("ss", group(CONTROL, U32)),
            (
                "extended_registers",
                group(EXTENDED, Bytes(X86_EXTENDED_REGISTERS_SIZE)),
            ),
        ],
    }
};

/// The AMD64 `CONTEXT` record.
///
/// Control registers are interleaved with the other groups, so the field order matters
/// more than usual here.
pub static CONTEXT_AMD64: Layout = {
    const CONTROL: u64 = ContextFlagsAmd64::CONTROL.bits() as u64;
    const INTEGER: u64 = ContextFlagsAmd64::INTEGER.bits() as u64;
    const SEGMENTS: u64 = ContextFlagsAmd64::SEGMENTS.bits() as u64;
    const FLOAT: u64 = ContextFlagsAmd64::FLOATING_POINT.bits() as u64;
    const DEBUG: u64 = ContextFlagsAmd64::DEBUG_REGISTERS.bits() as u64;
    Layout {
        name: "CONTEXT_AMD64",
        fields: &[
            ("p1_home", FieldSpec::Fixed(U64)),
            ("p2_home", FieldSpec::Fixed(U64)),
            ("p3_home", FieldSpec::Fixed(U64)),
            ("p4_home", FieldSpec::Fixed(U64)),
            ("p5_home", FieldSpec::Fixed(U64)),
            ("p6_home", FieldSpec::Fixed(U64)),
            ("context_flags", FieldSpec::Fixed(U32)),
            ("mx_csr", FieldSpec::Fixed(U32)),
            ("cs", group(CONTROL, U16)),
            ("ds", group(SEGMENTS, U16)),
            ("es", group(SEGMENTS, U16)),
            ("fs", group(SEGMENTS, U16)),
            ("gs", group(SEGMENTS, U16)),
            ("ss", group(CONTROL, U16)),
            ("eflags", group(CONTROL, U32)),
            ("dr0", group(DEBUG, U64)),
            ("dr1", group(DEBUG, U64)),
            ("dr2", group(DEBUG, U64)),
            ("dr3", group(DEBUG, U64)),
            ("dr6", group(DEBUG, U64)),
            ("dr7", group(DEBUG, U64)),
            ("rax", group(INTEGER, U64)),
            ("rcx", group(INTEGER, U64)),
            ("rdx", group(INTEGER, U64)),
            ("rbx", group(INTEGER, U64)),
            ("rsp", group(CONTROL, U64)),
            ("rbp", group(INTEGER, U64)),
            ("rsi", group(INTEGER, U64)),
            ("rdi", group(INTEGER, U64)),
            ("r8", group(INTEGER, U64)),
            ("r9", group(INTEGER, U64)),
            ("r10", group(INTEGER, U64)),
            ("r11", group(INTEGER, U64)),
            ("r12", group(INTEGER, U64)),
            ("r13", group(INTEGER, U64)),
            ("r14", group(INTEGER, U64)),
            ("r15", group(INTEGER, U64)),
            ("rip", group(CONTROL, U64)),
            ("sse_registers", group(FLOAT, Bytes(AMD64_VECTOR_AREA_SIZE))),
            ("vector_registers", group(FLOAT, Bytes(AMD64_VECTOR_AREA_SIZE))),
            ("vector_control", group(FLOAT, U64)),
            ("debug_control", group(DEBUG, U64)),
            ("last_branch_to_rip", group(DEBUG, U64)),
            ("last_branch_from_rip", group(DEBUG, U64)),
            ("last_exception_to_rip", group(DEBUG, U64)),
            ("last_exception_from_rip", group(DEBUG, U64)),
        ],
    }
};

/// The ARM `CONTEXT` record. `cpsr` is always present.
pub static CONTEXT_ARM: Layout = {
    const INTEGER: u64 = ContextFlagsArm::INTEGER.bits() as u64;
    const FLOAT: u64 = ContextFlagsArm::FLOATING_POINT.bits() as u64;
    Layout {
        name: "CONTEXT_ARM",
        fields: &[
            ("context_flags", FieldSpec::Fixed(U32)),
            ("r0", group(INTEGER, U32)),
            ("r1", group(INTEGER, U32)),
            ("r2", group(INTEGER, U32)),
            ("r3", group(INTEGER, U32)),
            ("r4", group(INTEGER, U32)),
            ("r5", group(INTEGER, U32)),
            ("r6", group(INTEGER, U32)),
            ("r7", group(INTEGER, U32)),
            ("r8", group(INTEGER, U32)),
            ("r9", group(INTEGER, U32)),
            ("r10", group(INTEGER, U32)),
            ("r11", group(INTEGER, U32)),
            ("r12", group(INTEGER, U32)),
            ("sp", group(INTEGER, U32)),
            ("lr", group(INTEGER, U32)),
            ("pc", group(INTEGER, U32)),
            ("cpsr", FieldSpec::Fixed(U32)),
            ("float_save", group(FLOAT, Bytes(ARM_FLOAT_SAVE_AREA_SIZE))),
        ],
    }
};

#[cfg(test)]
mod test {
    use super::*;
    use scroll::LE;

    static FIXED: Layout = Layout {
        name: "FIXED",
        fields: &[
            ("a", FieldSpec::Fixed(U16)),
            ("b", FieldSpec::Fixed(U32)),
            ("c", FieldSpec::Fixed(Bytes(3))),
        ],
    };

    fn odd_tail(partial: &Record<'_>) -> Option<FieldType> {
        match partial.get("kind")? {
            1 => Some(U8),
            2 => Some(U32),
            _ => None,
        }
    }

    static FLEXIBLE: Layout = Layout {
        name: "FLEXIBLE",
        fields: &[
            ("kind", FieldSpec::Fixed(U8)),
            ("tail", FieldSpec::Flexible(odd_tail)),
            ("end", FieldSpec::Fixed(U8)),
        ],
    };

    #[test]
    fn test_fixed_layout() {
        assert_eq!(FIXED.fixed_size(), Some(9));
        let bytes = [0x34, 0x12, 0x78, 0x56, 0x34, 0x12, 1, 2, 3, 0xff];
        let rec = FIXED.read(&bytes, 0, LE).unwrap();
        assert_eq!(rec.get("a"), Some(0x1234));
        assert_eq!(rec.get("b"), Some(0x12345678));
        assert_eq!(rec.bytes("c"), Some(&[1u8, 2, 3][..]));
        assert_eq!(rec.get("c"), None);
        assert_eq!(rec.size(), 9);
        assert_eq!(rec.offset_of("b"), Some(2));
    }

    #[test]
    fn test_flexible_field_sees_earlier_fields() {
        assert_eq!(FLEXIBLE.fixed_size(), None);
        let rec = FLEXIBLE.read(&[2, 0xaa, 0, 0, 0, 9], 0, LE).unwrap();
        assert_eq!(rec.get("tail"), Some(0xaa));
        assert_eq!(rec.get("end"), Some(9));

        let rec = FLEXIBLE.read(&[7, 9], 0, LE).unwrap();
        assert!(!rec.is_present("tail"));
        assert_eq!(rec.get("end"), Some(9));
        assert_eq!(rec.size(), 2);
    }

    #[test]
    fn test_read_past_end_fails() {
        let err = FIXED.read(&[0, 0, 0, 0], 0, LE).unwrap_err();
        assert_eq!(
            err,
            LayoutError::OutOfBounds {
                layout: "FIXED",
                field: "b",
                offset: 2,
                needed: 4,
                len: 4,
            }
        );
        // Offset beyond the buffer entirely.
        assert!(FIXED.read(&[0; 9], 4, LE).is_err());
    }

    #[test]
    fn test_minidump_string() {
        let bytes = [4, 0, 0, 0, b'h', 0, b'i', 0, 0, 0];
        let rec = MINIDUMP_STRING.read(&bytes, 0, LE).unwrap();
        assert_eq!(rec.get("length"), Some(4));
        assert_eq!(rec.bytes("buffer"), Some(&bytes[4..8]));
        assert!(MINIDUMP_STRING.read(&[40, 0, 0, 0, 1], 0, LE).is_err());
    }

    #[test]
    fn test_x86_context_skips_absent_groups() {
        // CONTROL only: flags followed directly by ebp..ss.
        let mut bytes = vec![0x01, 0x00, 0x01, 0x00];
        for v in 1u32..=6 {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        let rec = CONTEXT_X86.read(&bytes, 0, LE).unwrap();
        assert_eq!(rec.get("eip"), Some(2));
        assert_eq!(rec.get("esp"), Some(5));
        assert!(!rec.is_present("eax"));
        assert!(!rec.is_present("float_save"));
        assert_eq!(rec.size(), 4 + 6 * 4);
    }

    #[test]
    fn test_full_context_sizes() {
        let mut flags = vec![0u8; 717];
        flags[..4].copy_from_slice(&0x1003fu32.to_le_bytes());
        assert_eq!(CONTEXT_X86.read(&flags, 0, LE).unwrap().size(), 716);

        let mut amd64 = vec![0u8; 1136];
        amd64[48..52].copy_from_slice(&0x10001fu32.to_le_bytes());
        assert_eq!(CONTEXT_AMD64.read(&amd64, 0, LE).unwrap().size(), 1136);

        let mut arm = vec![0u8; 400];
        arm[..4].copy_from_slice(&0x40000006u32.to_le_bytes());
        assert_eq!(CONTEXT_ARM.read(&arm, 0, LE).unwrap().size(), 400);
    }
}
