use std::io;

use super::constants::{self, instance_type_name};
use super::views::{DescriptorArray, TransitionArray};
use super::{HeapAccess, Tagged, INT_SIZE};
use crate::memory::ReadMemory;
use crate::printer::Printer;

/// Extract `size` bits starting at bit `offset`.
pub fn decode(offset: u32, size: u32, value: u64) -> u64 {
    (value >> offset) & ((1u64 << size) - 1)
}

/// A type descriptor: the first word of every heap object points at one.
///
/// Field offsets scale with the pointer size. Each offset follows from the previous
/// field's offset and width:
///
/// | offset                  | field                           |
/// |-------------------------|---------------------------------|
/// | `ptr`                   | instance size (byte)            |
/// | `ptr + 1`               | in-object properties (byte)     |
/// | `ptr + 2`               | pre-allocated properties (byte) |
/// | `ptr + 3`               | visitor id (byte)               |
/// | `ptr + 4`               | instance type (byte)            |
/// | `ptr + 5`               | unused property fields (byte)   |
/// | `ptr + 6`               | bit field (byte)                |
/// | `ptr + 7`               | bit field 2 (byte)              |
/// | `ptr + 8`               | prototype                       |
/// | `2 ptr + 8`             | constructor                     |
/// | `3 ptr + 8`             | transitions or back pointer     |
/// | `4 ptr + 8`             | descriptors                     |
/// | `5 ptr + 8`             | code cache                      |
/// | `6 ptr + 8`             | dependent code                  |
/// | `7 ptr + 8`             | bit field 3 (Smi)               |
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Map {
    /// The untagged address of the map.
    pub address: u64,
    pub instance_type: u8,
    pointer_size: u64,
}

impl Map {
    /// Read the map at untagged `address`.
    pub fn read(memory: &dyn ReadMemory, address: u64) -> Option<Map> {
        let pointer_size = memory.pointer_size() as u64;
        let instance_type = memory.read_u8(address + Map::instance_type_offset_for(pointer_size))?;
        Some(Map {
            address,
            instance_type,
            pointer_size,
        })
    }

    fn instance_type_offset_for(pointer_size: u64) -> u64 {
        pointer_size + INT_SIZE
    }

    pub fn instance_sizes_offset(&self) -> u64 {
        self.pointer_size
    }

    pub fn instance_size_offset(&self) -> u64 {
        self.instance_sizes_offset()
    }

    pub fn in_object_properties_offset(&self) -> u64 {
        self.instance_size_offset() + 1
    }

    pub fn pre_allocated_property_fields_offset(&self) -> u64 {
        self.in_object_properties_offset() + 1
    }

    pub fn visitor_id_offset(&self) -> u64 {
        self.pre_allocated_property_fields_offset() + 1
    }

    pub fn instance_attributes_offset(&self) -> u64 {
        self.instance_sizes_offset() + INT_SIZE
    }

    pub fn instance_type_offset(&self) -> u64 {
        self.instance_attributes_offset()
    }

    pub fn unused_property_fields_offset(&self) -> u64 {
        self.instance_type_offset() + 1
    }

    pub fn bit_field_offset(&self) -> u64 {
        self.unused_property_fields_offset() + 1
    }

    pub fn bit_field2_offset(&self) -> u64 {
        self.bit_field_offset() + 1
    }

    pub fn prototype_offset(&self) -> u64 {
        self.instance_attributes_offset() + INT_SIZE
    }

    pub fn constructor_offset(&self) -> u64 {
        self.prototype_offset() + self.pointer_size
    }

    pub fn transitions_or_back_pointer_offset(&self) -> u64 {
        self.constructor_offset() + self.pointer_size
    }

    pub fn descriptors_offset(&self) -> u64 {
        self.transitions_or_back_pointer_offset() + self.pointer_size
    }

    pub fn code_cache_offset(&self) -> u64 {
        self.descriptors_offset() + self.pointer_size
    }

    pub fn dependent_code_offset(&self) -> u64 {
        self.code_cache_offset() + self.pointer_size
    }

    pub fn bit_field3_offset(&self) -> u64 {
        self.dependent_code_offset() + self.pointer_size
    }

    pub fn instance_type_name(&self) -> &'static str {
        instance_type_name(self.instance_type).unwrap_or("???")
    }

    fn byte(&self, heap: &dyn HeapAccess, offset: u64) -> String {
        match heap.memory().read_u8(self.address + offset) {
            Some(b) => b.to_string(),
            None => "?".to_owned(),
        }
    }

    fn field(&self, heap: &dyn HeapAccess, offset: u64) -> Tagged {
        let address = self.address + offset;
        match heap.memory().read_pointer(address) {
            Some(word) => heap.find_object_or_smi(word),
            None => Tagged::Unknown(address),
        }
    }

    pub fn print(&self, heap: &dyn HeapAccess, p: &mut Printer<'_>) -> io::Result<()> {
        let memory = heap.memory();
        p.print(&format!("Map({:08x})", self.address))?;
        p.print(&format!(
            "- size: {}, inobject: {}, preallocated: {}, visitor: {}",
            self.byte(heap, self.instance_size_offset()),
            self.byte(heap, self.in_object_properties_offset()),
            self.byte(heap, self.pre_allocated_property_fields_offset()),
            self.byte(heap, self.visitor_id_offset()),
        ))?;

        let bitfield = memory.read_u8(self.address + self.bit_field_offset());
        let bitfield2 = memory.read_u8(self.address + self.bit_field2_offset());
        p.print(&format!(
            "- {}, unused: {}, bf: {}, bf2: {}",
            self.instance_type_name(),
            self.byte(heap, self.unused_property_fields_offset()),
            bitfield.map_or("?".to_owned(), |b| b.to_string()),
            bitfield2.map_or("?".to_owned(), |b| b.to_string()),
        ))?;
        match bitfield2 {
            Some(bf2) => p.print(&format!("- kind: {}", decode(3, 5, bf2 as u64)))?,
            None => p.print("- kind: ?")?,
        }

        match self.field(heap, self.bit_field3_offset()) {
            Tagged::Smi(bf3) => {
                let bf3 = bf3 as u64;
                p.print(&format!(
                    "- EnumLength: {} NumberOfOwnDescriptors: {} OwnsDescriptors: {}",
                    decode(0, 11, bf3),
                    decode(11, 11, bf3),
                    decode(25, 1, bf3)
                ))?;
                p.print(&format!("- IsShared: {}", decode(22, 1, bf3)))?;
                p.print(&format!("- FunctionWithPrototype: {}", decode(23, 1, bf3)))?;
                p.print(&format!("- DictionaryMap: {}", decode(24, 1, bf3)))?;
            }
            other => p.print(&format!("- bit_field3: {}", other))?,
        }

        let descriptors = self.field(heap, self.descriptors_offset());
        match descriptors.as_object() {
            Some(array) if array.is_fixed_array() => DescriptorArray::new(array).print(heap, p)?,
            _ => p.print(&format!("Descriptors: {}", descriptors))?,
        }

        let transitions = self.field(heap, self.transitions_or_back_pointer_offset());
        match transitions.as_object() {
            Some(array) if array.is_fixed_array() => TransitionArray::new(array).print(heap, p)?,
            _ => p.print(&format!("TransitionsOrBackPointer: {}", transitions))?,
        }
        Ok(())
    }

    /// Whether this map describes maps.
    pub fn is_meta_map(&self) -> bool {
        self.instance_type == constants::MAP_TYPE
    }
}
