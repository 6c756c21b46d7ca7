//! Interpretations of fixed arrays that maps point at.

use std::io;

use super::map::decode;
use super::objects::HeapObject;
use super::{HeapAccess, Tagged};
use crate::printer::Printer;

static DESCRIPTOR_TYPES: &[&str] = &["normal", "field", "function", "callbacks"];

const READ_ONLY: u64 = 1;
const DONT_ENUM: u64 = 2;
const DONT_DELETE: u64 = 4;

fn element(array: &HeapObject, heap: &dyn HeapAccess, i: u64) -> Tagged {
    array
        .get(heap, i)
        .unwrap_or_else(|| Tagged::Unknown(array.address + HeapObject::member_offset(heap, i)))
}

fn array_length(array: &HeapObject) -> i64 {
    array.fixed_array_length().unwrap_or(0)
}

/// A map's descriptor array: a length, an enum cache, then `(name, details, value)` triples.
pub struct DescriptorArray<'a> {
    array: &'a HeapObject,
}

impl<'a> DescriptorArray<'a> {
    pub fn new(array: &'a HeapObject) -> DescriptorArray<'a> {
        DescriptorArray { array }
    }

    pub fn length(&self, heap: &dyn HeapAccess) -> i64 {
        element(self.array, heap, 0).as_smi().unwrap_or(0)
    }

    /// Render a details word as `type attributes field-index N pointer N`.
    pub fn details(value: u64) -> String {
        let kind = DESCRIPTOR_TYPES
            .get(decode(0, 3, value) as usize)
            .copied()
            .unwrap_or("???");
        let attributes = decode(3, 3, value);
        let mut names = vec![];
        if attributes & READ_ONLY != 0 {
            names.push("ReadOnly");
        }
        if attributes & DONT_ENUM != 0 {
            names.push("DontEnum");
        }
        if attributes & DONT_DELETE != 0 {
            names.push("DontDelete");
        }
        format!(
            "{} [{}] field-index {} pointer {}",
            kind,
            names.join(","),
            decode(20, 11, value),
            decode(6, 11, value)
        )
    }

    /// The number of descriptors that fit in the array, whatever the stored count says.
    pub fn capacity(&self) -> i64 {
        ((array_length(self.array) - 2) / 3).max(0)
    }

    pub fn print(&self, heap: &dyn HeapAccess, p: &mut Printer<'_>) -> io::Result<()> {
        let array = self.array;
        let length = self.length(heap);
        p.print(&format!(
            "Descriptors({:08x}, length={})",
            array.address, length
        ))?;
        p.print(&format!("[et] {}", element(array, heap, 1)))?;

        for di in 0..length.min(self.capacity()).max(0) as u64 {
            let i = 2 + di * 3;
            let (name, details, value) =
                match (array.get(heap, i), array.get(heap, i + 1), array.get(heap, i + 2)) {
                    (Some(name), Some(details), Some(value)) => (name, details, value),
                    _ => return p.print("..."),
                };
            p.print(&format!(
                "0x{:x}",
                array.address + HeapObject::member_offset(heap, i)
            ))?;
            p.print(&format!("[{}] name:    {}", di, name))?;
            let details = match details {
                Tagged::Smi(v) => DescriptorArray::details(v as u64),
                other => other.to_string(),
            };
            p.print(&format!("[{}] details: {}", di, details))?;
            p.print(&format!("[{}] value:   {}", di, value))?;
        }

        let end = array_length(array) / 3;
        if length < end {
            p.print(&format!("[{}-{}] slack descriptors", length, end))?;
        }
        Ok(())
    }
}

/// A map's transition array, or the single target of a simple transition.
pub struct TransitionArray<'a> {
    array: &'a HeapObject,
}

impl<'a> TransitionArray<'a> {
    pub fn new(array: &'a HeapObject) -> TransitionArray<'a> {
        TransitionArray { array }
    }

    pub fn is_simple_transition(&self) -> bool {
        array_length(self.array) <= 2
    }

    pub fn length(&self) -> i64 {
        let length = array_length(self.array);
        if self.is_simple_transition() {
            return length - 1;
        }
        (length - 3) / 2
    }

    pub fn print(&self, heap: &dyn HeapAccess, p: &mut Printer<'_>) -> io::Result<()> {
        let array = self.array;
        let length = self.length();
        p.print(&format!(
            "Transitions({:08x}, length={})",
            array.address, length
        ))?;
        p.print(&format!("[backpointer] {}", element(array, heap, 0)))?;
        if self.is_simple_transition() {
            if length == 1 {
                p.print(&format!("[simple target] {}", element(array, heap, 1)))?;
            }
            return Ok(());
        }

        p.print(&format!("[elements   ] {}", element(array, heap, 1)))?;
        p.print(&format!("[prototype  ] {}", element(array, heap, 2)))?;
        for di in 0..length.max(0) as u64 {
            let i = 3 + di * 2;
            let (symbol, target) = match (array.get(heap, i), array.get(heap, i + 1)) {
                (Some(symbol), Some(target)) => (symbol, target),
                _ => return p.print("..."),
            };
            p.print(&format!("[{}] symbol: {}", di, symbol))?;
            p.print(&format!("[{}] target: {}", di, target))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::context::Arch;
    use crate::heap::testing::{smi, FakeMemory};
    use crate::heap::HeapModel;

    const BASE: u64 = 0x20000;

    fn print_to_string<F>(f: F) -> String
    where
        F: FnOnce(&mut Printer<'_>) -> io::Result<()>,
    {
        let mut out = vec![];
        f(&mut Printer::new(&mut out)).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_details() {
        // field, DontEnum|DontDelete, pointer 2, field index 5.
        let value = 1 | (6 << 3) | (2 << 6) | (5 << 20);
        assert_eq!(
            DescriptorArray::details(value),
            "field [DontEnum,DontDelete] field-index 5 pointer 2"
        );
        assert_eq!(
            DescriptorArray::details(1 << 3),
            "normal [ReadOnly] field-index 0 pointer 0"
        );
    }

    #[test]
    fn test_descriptor_array() {
        let mut m = FakeMemory::new(Arch::X86, BASE, 0x100);
        let values = [
            smi(1),                 // number of descriptors
            smi(0),                 // enum cache
            smi(10),                // name
            smi(1 | (1 << 3)),      // details
            smi(11),                // value
            smi(0),
            smi(0),
            smi(0),
        ];
        m.put_word(BASE + 4, smi(values.len() as u64));
        for (i, &v) in values.iter().enumerate() {
            m.put_word(BASE + 8 + 4 * i as u64, v);
        }
        let heap = HeapModel::new(&m);
        let array = HeapObject::fixed_array_at(&heap, BASE);
        let text = print_to_string(|p| DescriptorArray::new(&array).print(&heap, p));
        assert_eq!(
            text,
            "Descriptors(00020000, length=1)\n\
[et] Smi(0)\n\
0x20010\n\
[0] name:    Smi(10)\n\
[0] details: field [ReadOnly] field-index 0 pointer 0\n\
[0] value:   Smi(11)\n\
[1-2] slack descriptors\n"
        );
    }

    #[test]
    fn test_simple_transition() {
        let mut m = FakeMemory::new(Arch::X86, BASE, 0x100);
        m.put_word(BASE + 4, smi(2));
        m.put_word(BASE + 8, smi(3));
        m.put_word(BASE + 12, smi(4));
        let heap = HeapModel::new(&m);
        let array = HeapObject::fixed_array_at(&heap, BASE);
        let view = TransitionArray::new(&array);
        assert!(view.is_simple_transition());
        assert_eq!(view.length(), 1);
        let text = print_to_string(|p| view.print(&heap, p));
        assert_eq!(
            text,
            "Transitions(00020000, length=1)\n[backpointer] Smi(3)\n[simple target] Smi(4)\n"
        );
    }

    #[test]
    fn test_full_transition_array() {
        let mut m = FakeMemory::new(Arch::X86, BASE, 0x100);
        m.put_word(BASE + 4, smi(7));
        for i in 0..7 {
            m.put_word(BASE + 8 + 4 * i, smi(100 + i));
        }
        let heap = HeapModel::new(&m);
        let array = HeapObject::fixed_array_at(&heap, BASE);
        let view = TransitionArray::new(&array);
        assert_eq!(view.length(), 2);
        let text = print_to_string(|p| view.print(&heap, p));
        assert_eq!(
            text,
            "Transitions(00020000, length=2)\n\
[backpointer] Smi(100)\n\
[elements   ] Smi(101)\n\
[prototype  ] Smi(102)\n\
[0] symbol: Smi(103)\n\
[0] target: Smi(104)\n\
[1] symbol: Smi(105)\n\
[1] target: Smi(106)\n"
        );
    }

    #[test]
    fn test_descriptor_count_past_array() {
        let mut m = FakeMemory::new(Arch::X86, BASE, 0x100);
        m.put_word(BASE + 4, smi(3));
        m.put_word(BASE + 8, smi(1_000_000));
        let heap = HeapModel::new(&m);
        let array = HeapObject::fixed_array_at(&heap, BASE);
        let view = DescriptorArray::new(&array);
        assert_eq!(view.capacity(), 0);
        let text = print_to_string(|p| view.print(&heap, p));
        assert_eq!(text, "Descriptors(00020000, length=1000000)\n[et] Smi(0)\n");
    }

    #[test]
    fn test_descriptors_past_region() {
        let mut m = FakeMemory::new(Arch::X86, BASE, 0x100);
        m.put_word(BASE + 4, smi(1_000_000));
        m.put_word(BASE + 8, smi(1_000_000));
        let heap = HeapModel::new(&m);
        let array = HeapObject::fixed_array_at(&heap, BASE);
        let text = print_to_string(|p| DescriptorArray::new(&array).print(&heap, p));
        // Element 61 is the last word in the region.
        assert!(text.contains("[19] value:   Smi(0)\n"));
        assert!(!text.contains("[20] name:"));
        assert!(text.ends_with("\n...\n"));
        assert!(text.lines().count() < 100);
    }

    #[test]
    fn test_transitions_past_region() {
        let mut m = FakeMemory::new(Arch::X86, BASE, 0x100);
        m.put_word(BASE + 4, smi(1_000_000));
        let heap = HeapModel::new(&m);
        let array = HeapObject::fixed_array_at(&heap, BASE);
        let view = TransitionArray::new(&array);
        assert_eq!(view.length(), 499_998);
        let text = print_to_string(|p| view.print(&heap, p));
        assert!(text.contains("[28] target: Smi(0)\n"));
        assert!(!text.contains("[29] symbol:"));
        assert!(text.ends_with("\n...\n"));
        assert!(text.lines().count() < 100);
    }
}
