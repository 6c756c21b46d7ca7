//! Instance types and well-known heap objects of the inspected runtime build.
//!
//! Strings occupy the instance types below `0x80`. Their low bits encode the string's
//! representation and encoding:
//!
//! | bits   | meaning                                  |
//! |--------|------------------------------------------|
//! | `0x03` | representation: seq, cons, external, sliced |
//! | `0x04` | one-byte encoding                        |
//! | `0x08` | two-byte string holding one-byte data    |
//! | `0x10` | short external string                    |
//! | `0x40` | not internalized                         |

pub const IS_NOT_STRING_MASK: u8 = 0x80;
pub const STRING_REPRESENTATION_MASK: u8 = 0x03;
pub const SEQ_STRING_TAG: u8 = 0x00;
pub const CONS_STRING_TAG: u8 = 0x01;
pub const EXTERNAL_STRING_TAG: u8 = 0x02;
pub const SLICED_STRING_TAG: u8 = 0x03;
pub const ONE_BYTE_STRING_TAG: u8 = 0x04;

pub const INTERNALIZED_STRING_TYPE: u8 = 0x00;
pub const ONE_BYTE_INTERNALIZED_STRING_TYPE: u8 = 0x04;
pub const STRING_TYPE: u8 = 0x40;
pub const CONS_STRING_TYPE: u8 = 0x41;
pub const EXTERNAL_STRING_TYPE: u8 = 0x42;
pub const ONE_BYTE_STRING_TYPE: u8 = 0x44;
pub const CONS_ONE_BYTE_STRING_TYPE: u8 = 0x45;

pub const SYMBOL_TYPE: u8 = 128;
pub const MAP_TYPE: u8 = 129;
pub const CODE_TYPE: u8 = 130;
pub const ODDBALL_TYPE: u8 = 131;
pub const HEAP_NUMBER_TYPE: u8 = 134;
pub const BYTE_ARRAY_TYPE: u8 = 136;
pub const SCRIPT_TYPE: u8 = 170;
pub const CODE_CACHE_TYPE: u8 = 171;
pub const FIXED_ARRAY_TYPE: u8 = 178;
pub const SHARED_FUNCTION_INFO_TYPE: u8 = 180;
pub const JS_OBJECT_TYPE: u8 = 184;
pub const JS_ARRAY_TYPE: u8 = 191;
pub const JS_FUNCTION_TYPE: u8 = 201;

/// Instance type number to name.
pub static INSTANCE_TYPES: &[(u8, &str)] = &[
    (0x00, "INTERNALIZED_STRING_TYPE"),
    (0x01, "CONS_INTERNALIZED_STRING_TYPE"),
    (0x02, "EXTERNAL_INTERNALIZED_STRING_TYPE"),
    (0x04, "ONE_BYTE_INTERNALIZED_STRING_TYPE"),
    (0x05, "CONS_ONE_BYTE_INTERNALIZED_STRING_TYPE"),
    (0x06, "EXTERNAL_ONE_BYTE_INTERNALIZED_STRING_TYPE"),
    (0x0a, "EXTERNAL_INTERNALIZED_STRING_WITH_ONE_BYTE_DATA_TYPE"),
    (0x12, "SHORT_EXTERNAL_INTERNALIZED_STRING_TYPE"),
    (0x16, "SHORT_EXTERNAL_ONE_BYTE_INTERNALIZED_STRING_TYPE"),
    (0x1a, "SHORT_EXTERNAL_INTERNALIZED_STRING_WITH_ONE_BYTE_DATA_TYPE"),
    (0x40, "STRING_TYPE"),
    (0x41, "CONS_STRING_TYPE"),
    (0x42, "EXTERNAL_STRING_TYPE"),
    (0x43, "SLICED_STRING_TYPE"),
    (0x44, "ONE_BYTE_STRING_TYPE"),
    (0x45, "CONS_ONE_BYTE_STRING_TYPE"),
    (0x46, "EXTERNAL_ONE_BYTE_STRING_TYPE"),
    (0x47, "SLICED_ONE_BYTE_STRING_TYPE"),
    (0x4a, "EXTERNAL_STRING_WITH_ONE_BYTE_DATA_TYPE"),
    (0x52, "SHORT_EXTERNAL_STRING_TYPE"),
    (0x56, "SHORT_EXTERNAL_ONE_BYTE_STRING_TYPE"),
    (0x5a, "SHORT_EXTERNAL_STRING_WITH_ONE_BYTE_DATA_TYPE"),
    (128, "SYMBOL_TYPE"),
    (129, "MAP_TYPE"),
    (130, "CODE_TYPE"),
    (131, "ODDBALL_TYPE"),
    (132, "CELL_TYPE"),
    (133, "PROPERTY_CELL_TYPE"),
    (134, "HEAP_NUMBER_TYPE"),
    (135, "FOREIGN_TYPE"),
    (136, "BYTE_ARRAY_TYPE"),
    (137, "FREE_SPACE_TYPE"),
    (156, "FILLER_TYPE"),
    (159, "EXECUTABLE_ACCESSOR_INFO_TYPE"),
    (160, "ACCESSOR_PAIR_TYPE"),
    (164, "FUNCTION_TEMPLATE_INFO_TYPE"),
    (165, "OBJECT_TEMPLATE_INFO_TYPE"),
    (168, "ALLOCATION_SITE_TYPE"),
    (169, "ALLOCATION_MEMENTO_TYPE"),
    (170, "SCRIPT_TYPE"),
    (171, "CODE_CACHE_TYPE"),
    (172, "POLYMORPHIC_CODE_CACHE_TYPE"),
    (173, "TYPE_FEEDBACK_INFO_TYPE"),
    (175, "BOX_TYPE"),
    (176, "DEBUG_INFO_TYPE"),
    (177, "BREAK_POINT_INFO_TYPE"),
    (178, "FIXED_ARRAY_TYPE"),
    (179, "CONSTANT_POOL_ARRAY_TYPE"),
    (180, "SHARED_FUNCTION_INFO_TYPE"),
    (181, "JS_MESSAGE_OBJECT_TYPE"),
    (182, "JS_VALUE_TYPE"),
    (183, "JS_DATE_TYPE"),
    (184, "JS_OBJECT_TYPE"),
    (185, "JS_CONTEXT_EXTENSION_OBJECT_TYPE"),
    (186, "JS_GENERATOR_OBJECT_TYPE"),
    (187, "JS_MODULE_TYPE"),
    (188, "JS_GLOBAL_OBJECT_TYPE"),
    (189, "JS_BUILTINS_OBJECT_TYPE"),
    (190, "JS_GLOBAL_PROXY_TYPE"),
    (191, "JS_ARRAY_TYPE"),
    (192, "JS_ARRAY_BUFFER_TYPE"),
    (193, "JS_TYPED_ARRAY_TYPE"),
    (194, "JS_DATA_VIEW_TYPE"),
    (195, "JS_PROXY_TYPE"),
    (196, "JS_SET_TYPE"),
    (197, "JS_MAP_TYPE"),
    (198, "JS_WEAK_MAP_TYPE"),
    (199, "JS_WEAK_SET_TYPE"),
    (200, "JS_REGEXP_TYPE"),
    (201, "JS_FUNCTION_TYPE"),
    (202, "JS_FUNCTION_PROXY_TYPE"),
];

/// The name of instance type `t`, if it is known.
pub fn instance_type_name(t: u8) -> Option<&'static str> {
    INSTANCE_TYPES
        .iter()
        .find(|&&(n, _)| n == t)
        .map(|&(_, name)| name)
}

/// Maps at fixed offsets of the first map-space page: tagged page offset to
/// `(instance type, name)`.
pub static KNOWN_MAPS: &[(u64, (u8, &str))] = &[
    (0x08081, (BYTE_ARRAY_TYPE, "ByteArrayMap")),
    (0x080a9, (MAP_TYPE, "MetaMap")),
    (0x080d1, (ODDBALL_TYPE, "OddballMap")),
    (0x080f9, (ONE_BYTE_INTERNALIZED_STRING_TYPE, "OneByteInternalizedStringMap")),
    (0x08121, (FIXED_ARRAY_TYPE, "FixedArrayMap")),
    (0x08149, (HEAP_NUMBER_TYPE, "HeapNumberMap")),
    (0x08171, (137, "FreeSpaceMap")),
    (0x08199, (156, "OnePointerFillerMap")),
    (0x081c1, (156, "TwoPointerFillerMap")),
    (0x081e9, (SYMBOL_TYPE, "SymbolMap")),
    (0x08211, (132, "CellMap")),
    (0x08239, (133, "GlobalPropertyCellMap")),
    (0x08261, (SHARED_FUNCTION_INFO_TYPE, "SharedFunctionInfoMap")),
    (0x08289, (FIXED_ARRAY_TYPE, "NativeContextMap")),
    (0x082b1, (CODE_TYPE, "CodeMap")),
    (0x082d9, (FIXED_ARRAY_TYPE, "ScopeInfoMap")),
    (0x08301, (FIXED_ARRAY_TYPE, "FixedCOWArrayMap")),
    (0x08329, (FIXED_ARRAY_TYPE, "HashTableMap")),
    (0x08351, (INTERNALIZED_STRING_TYPE, "InternalizedStringMap")),
    (0x08379, (CONS_ONE_BYTE_STRING_TYPE, "ConsOneByteStringMap")),
    (0x083a1, (CONS_STRING_TYPE, "ConsStringMap")),
    (0x083c9, (ONE_BYTE_STRING_TYPE, "OneByteStringMap")),
    (0x083f1, (STRING_TYPE, "StringMap")),
    (0x08419, (EXTERNAL_STRING_TYPE, "ExternalStringMap")),
    (0x08441, (FIXED_ARRAY_TYPE, "FunctionContextMap")),
    (0x08469, (FIXED_ARRAY_TYPE, "CatchContextMap")),
    (0x08491, (FIXED_ARRAY_TYPE, "WithContextMap")),
    (0x084b9, (FIXED_ARRAY_TYPE, "BlockContextMap")),
    (0x084e1, (FIXED_ARRAY_TYPE, "ModuleContextMap")),
    (0x08509, (FIXED_ARRAY_TYPE, "GlobalContextMap")),
    (0x08531, (SCRIPT_TYPE, "ScriptMap")),
    (0x08559, (CODE_CACHE_TYPE, "CodeCacheMap")),
    (0x08581, (JS_OBJECT_TYPE, "JSMessageObjectMap")),
    (0x085a9, (JS_ARRAY_TYPE, "JSArrayMap")),
    (0x085d1, (JS_FUNCTION_TYPE, "JSFunctionMap")),
];

pub const OLD_POINTER_SPACE: &str = "OLD_POINTER_SPACE";
pub const OLD_DATA_SPACE: &str = "OLD_DATA_SPACE";

/// Singletons at fixed offsets of the first old-space pages: `(space, tagged page offset)`
/// to name.
pub static KNOWN_OBJECTS: &[((&str, u64), &str)] = &[
    ((OLD_POINTER_SPACE, 0x08081), "NullValue"),
    ((OLD_POINTER_SPACE, 0x08091), "UndefinedValue"),
    ((OLD_POINTER_SPACE, 0x080a1), "TheHoleValue"),
    ((OLD_POINTER_SPACE, 0x080b1), "TrueValue"),
    ((OLD_POINTER_SPACE, 0x080c1), "FalseValue"),
    ((OLD_POINTER_SPACE, 0x080d1), "UninitializedValue"),
    ((OLD_POINTER_SPACE, 0x080e1), "NoInterceptorResultSentinel"),
    ((OLD_POINTER_SPACE, 0x080f1), "ArgumentsMarker"),
    ((OLD_POINTER_SPACE, 0x08101), "NumberStringCache"),
    ((OLD_POINTER_SPACE, 0x08909), "SingleCharacterStringCache"),
    ((OLD_POINTER_SPACE, 0x08d11), "StringSplitCache"),
    ((OLD_POINTER_SPACE, 0x09119), "RegExpMultipleCache"),
    ((OLD_POINTER_SPACE, 0x09521), "TerminationException"),
    ((OLD_POINTER_SPACE, 0x09531), "MessageListeners"),
    ((OLD_POINTER_SPACE, 0x0954d), "CodeStubs"),
    ((OLD_POINTER_SPACE, 0x0ca65), "NonMonomorphicCache"),
    ((OLD_POINTER_SPACE, 0x0d079), "PolymorphicCodeCache"),
    ((OLD_POINTER_SPACE, 0x0d081), "NativesSourceCache"),
    ((OLD_POINTER_SPACE, 0x0d1e5), "EmptyScript"),
    ((OLD_POINTER_SPACE, 0x0d221), "IntrinsicFunctionNames"),
    ((OLD_POINTER_SPACE, 0x0e23d), "ObservationState"),
    ((OLD_DATA_SPACE, 0x08081), "EmptyDescriptorArray"),
    ((OLD_DATA_SPACE, 0x08089), "EmptyFixedArray"),
    ((OLD_DATA_SPACE, 0x080a9), "NanValue"),
    ((OLD_DATA_SPACE, 0x08141), "EmptyByteArray"),
    ((OLD_DATA_SPACE, 0x08149), "EmptyConstantPoolArray"),
    ((OLD_DATA_SPACE, 0x08241), "EmptyString"),
    ((OLD_DATA_SPACE, 0x08249), "InfinityValue"),
    ((OLD_DATA_SPACE, 0x08255), "MinusZeroValue"),
];

pub fn known_map(page_offset: u64) -> Option<(u8, &'static str)> {
    KNOWN_MAPS
        .iter()
        .find(|&&(off, _)| off == page_offset)
        .map(|&(_, info)| info)
}

pub fn known_object(space: &str, page_offset: u64) -> Option<&'static str> {
    KNOWN_OBJECTS
        .iter()
        .find(|&&((s, off), _)| s == space && off == page_offset)
        .map(|&(_, name)| name)
}

/// The specialized view an instance type is decoded as.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ObjectClass {
    Generic,
    Map,
    Oddball,
    SeqString,
    ConsString,
    ExternalString,
    FixedArray,
    JSFunction,
    SharedFunctionInfo,
    Script,
    CodeCache,
    Code,
}

/// Choose the view for `instance_type`. Types without a specialized view are
/// [`ObjectClass::Generic`].
pub fn object_class(instance_type: u8) -> ObjectClass {
    if instance_type & IS_NOT_STRING_MASK == 0 {
        return match instance_type & STRING_REPRESENTATION_MASK {
            SEQ_STRING_TAG => ObjectClass::SeqString,
            CONS_STRING_TAG => ObjectClass::ConsString,
            EXTERNAL_STRING_TAG => ObjectClass::ExternalString,
            // Sliced strings have no view of their own.
            _ => ObjectClass::Generic,
        };
    }
    match instance_type {
        MAP_TYPE => ObjectClass::Map,
        ODDBALL_TYPE => ObjectClass::Oddball,
        FIXED_ARRAY_TYPE => ObjectClass::FixedArray,
        JS_FUNCTION_TYPE => ObjectClass::JSFunction,
        SHARED_FUNCTION_INFO_TYPE => ObjectClass::SharedFunctionInfo,
        SCRIPT_TYPE => ObjectClass::Script,
        CODE_CACHE_TYPE => ObjectClass::CodeCache,
        CODE_TYPE => ObjectClass::Code,
        _ => ObjectClass::Generic,
    }
}

/// Whether a sequential string of this type stores one byte per character.
pub fn is_one_byte(instance_type: u8) -> bool {
    instance_type & ONE_BYTE_STRING_TAG != 0
}
