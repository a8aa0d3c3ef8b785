//! Helpers for type descriptors.
//!
//! A descriptor is the mangled name of a type: one character for a primitive type (`I` for
//! `i32`), `L<path>;` for a class and `[<component>` for an array.

use crate::runtime::class::TypeId;

const ARRAY_PREFIX: u8 = b'[';

pub struct ClassHelper;

impl ClassHelper {
    pub fn is_array_descriptor(descriptor: &[u8]) -> bool {
        descriptor.first() == Some(&ARRAY_PREFIX)
    }

    pub fn is_primitive_descriptor(descriptor: &[u8]) -> bool {
        descriptor.len() == 1 && Self::get_primitive_type(descriptor[0]).is_some()
    }

    pub fn is_reference_descriptor(descriptor: &[u8]) -> bool {
        descriptor.len() > 2 && descriptor[0] == b'L' && descriptor[descriptor.len() - 1] == b';'
    }

    /// Type of a one-character primitive descriptor.
    pub fn get_primitive_type(c: u8) -> Option<TypeId> {
        Some(match c {
            b'V' => TypeId::Void,
            b'Z' => TypeId::U1,
            b'B' => TypeId::I8,
            b'H' => TypeId::U8,
            b'S' => TypeId::I16,
            b'C' => TypeId::U16,
            b'I' => TypeId::I32,
            b'U' => TypeId::U32,
            b'F' => TypeId::F32,
            b'D' => TypeId::F64,
            b'J' => TypeId::I64,
            b'Q' => TypeId::U64,
            b'A' => TypeId::Tagged,
            _ => return None,
        })
    }

    /// Descriptor of a primitive type.
    pub fn get_primitive_descriptor(type_id: TypeId) -> Option<&'static [u8]> {
        Some(match type_id {
            TypeId::Void => b"V",
            TypeId::U1 => b"Z",
            TypeId::I8 => b"B",
            TypeId::U8 => b"H",
            TypeId::I16 => b"S",
            TypeId::U16 => b"C",
            TypeId::I32 => b"I",
            TypeId::U32 => b"U",
            TypeId::F32 => b"F",
            TypeId::F64 => b"D",
            TypeId::I64 => b"J",
            TypeId::U64 => b"Q",
            TypeId::Tagged => b"A",
            TypeId::Invalid | TypeId::Reference => return None,
        })
    }

    fn get_primitive_type_name(type_id: TypeId) -> &'static str {
        match type_id {
            TypeId::Void => "void",
            TypeId::U1 => "u1",
            TypeId::I8 => "i8",
            TypeId::U8 => "u8",
            TypeId::I16 => "i16",
            TypeId::U16 => "u16",
            TypeId::I32 => "i32",
            TypeId::U32 => "u32",
            TypeId::F32 => "f32",
            TypeId::F64 => "f64",
            TypeId::I64 => "i64",
            TypeId::U64 => "u64",
            TypeId::Tagged => "any",
            TypeId::Invalid | TypeId::Reference => "<invalid>",
        }
    }

    /// Descriptor of the component type of an array descriptor.
    pub fn get_component_descriptor(descriptor: &[u8]) -> Option<&[u8]> {
        if Self::is_array_descriptor(descriptor) && descriptor.len() > 1 {
            Some(&descriptor[1..])
        } else {
            None
        }
    }

    /// Number of array dimensions of a descriptor, zero for non-arrays.
    pub fn get_dimensionality(descriptor: &[u8]) -> usize {
        descriptor
            .iter()
            .take_while(|c| **c == ARRAY_PREFIX)
            .count()
    }

    /// Descriptor of an array of `component`.
    pub fn get_array_descriptor(component: &[u8]) -> Vec<u8> {
        let mut descriptor = Vec::with_capacity(component.len() + 1);
        descriptor.push(ARRAY_PREFIX);
        descriptor.extend_from_slice(component);
        descriptor
    }

    /// Descriptor of a class name such as `panda.Object`, `i32` or `panda.String[]`.
    pub fn get_descriptor(name: &str) -> Vec<u8> {
        let mut rank = 0;
        let mut element = name;
        while let Some(stripped) = element.strip_suffix("[]") {
            element = stripped;
            rank += 1;
        }
        let mut descriptor = vec![ARRAY_PREFIX; rank];
        let primitive = [
            TypeId::Void,
            TypeId::U1,
            TypeId::I8,
            TypeId::U8,
            TypeId::I16,
            TypeId::U16,
            TypeId::I32,
            TypeId::U32,
            TypeId::F32,
            TypeId::F64,
            TypeId::I64,
            TypeId::U64,
            TypeId::Tagged,
        ]
        .into_iter()
        .find(|t| Self::get_primitive_type_name(*t) == element);
        match primitive.and_then(Self::get_primitive_descriptor) {
            Some(d) => descriptor.extend_from_slice(d),
            None => {
                descriptor.push(b'L');
                descriptor.extend(element.bytes().map(|c| if c == b'.' { b'/' } else { c }));
                descriptor.push(b';');
            }
        }
        descriptor
    }

    /// Readable name of a descriptor: `Lpanda/Object;` is `panda.Object`, `[I` is `i32[]`.
    pub fn get_name(descriptor: &[u8]) -> String {
        let rank = Self::get_dimensionality(descriptor);
        let element = &descriptor[rank..];
        let mut name = if Self::is_reference_descriptor(element) {
            String::from_utf8_lossy(&element[1..element.len() - 1]).replace('/', ".")
        } else if element.len() == 1 {
            match Self::get_primitive_type(element[0]) {
                Some(t) => Self::get_primitive_type_name(t).to_string(),
                None => String::from_utf8_lossy(element).into_owned(),
            }
        } else {
            String::from_utf8_lossy(element).into_owned()
        };
        for _ in 0..rank {
            name.push_str("[]");
        }
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predicates() {
        assert!(ClassHelper::is_array_descriptor(b"[I"));
        assert!(!ClassHelper::is_array_descriptor(b"I"));
        assert!(ClassHelper::is_primitive_descriptor(b"Q"));
        assert!(!ClassHelper::is_primitive_descriptor(b"X"));
        assert!(!ClassHelper::is_primitive_descriptor(b"II"));
        assert!(ClassHelper::is_reference_descriptor(b"LFoo;"));
        assert!(!ClassHelper::is_reference_descriptor(b"L;"));
    }

    #[test]
    fn components_and_dimensions() {
        assert_eq!(ClassHelper::get_component_descriptor(b"[[I"), Some(&b"[I"[..]));
        assert_eq!(ClassHelper::get_component_descriptor(b"I"), None);
        assert_eq!(ClassHelper::get_component_descriptor(b"["), None);
        assert_eq!(ClassHelper::get_dimensionality(b"[[Lpanda/String;"), 2);
        assert_eq!(ClassHelper::get_dimensionality(b"Lpanda/String;"), 0);
        assert_eq!(ClassHelper::get_array_descriptor(b"Lpanda/Class;"), b"[Lpanda/Class;");
    }

    #[test]
    fn names() {
        assert_eq!(ClassHelper::get_name(b"Lpanda/Object;"), "panda.Object");
        assert_eq!(ClassHelper::get_name(b"[[Lpanda/String;"), "panda.String[][]");
        assert_eq!(ClassHelper::get_name(b"[I"), "i32[]");
        assert_eq!(ClassHelper::get_name(b"Z"), "u1");
        assert_eq!(ClassHelper::get_name(b"A"), "any");
    }

    #[test]
    fn descriptors_from_names() {
        assert_eq!(ClassHelper::get_descriptor("panda.Object"), b"Lpanda/Object;");
        assert_eq!(ClassHelper::get_descriptor("u16[]"), b"[C");
        assert_eq!(ClassHelper::get_descriptor("Foo[][]"), b"[[LFoo;");
        for descriptor in [&b"Lpanda/Class;"[..], b"[[J", b"H", b"[LA;"] {
            let name = ClassHelper::get_name(descriptor);
            assert_eq!(ClassHelper::get_descriptor(&name), descriptor);
        }
    }
}
