//! Source languages and the per-language knowledge the runtime needs: descriptors of the core
//! classes and exceptions, and the class linker extension of the language.

use enum_map::Enum;
use strum_macros::{Display, EnumString};

use crate::runtime::class_linker::extension::ClassLinkerExtension;
use crate::runtime::core::core_class_linker_extension::CoreClassLinkerExtension;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, EnumString, Display, Enum)]
#[strum(serialize_all = "kebab-case")]
pub enum SourceLanguage {
    PandaAssembly,
    Ets,
    Ecmascript,
}

pub trait LanguageContext: Send + Sync {
    fn get_language(&self) -> SourceLanguage;

    fn get_object_class_descriptor(&self) -> &'static [u8];
    fn get_class_class_descriptor(&self) -> &'static [u8];
    fn get_class_array_class_descriptor(&self) -> &'static [u8];
    fn get_string_class_descriptor(&self) -> &'static [u8];
    fn get_string_array_class_descriptor(&self) -> &'static [u8];

    fn get_class_not_found_exception_descriptor(&self) -> &'static [u8];
    fn get_no_class_def_found_error_descriptor(&self) -> &'static [u8];
    fn get_no_such_field_error_descriptor(&self) -> &'static [u8];
    fn get_no_such_method_error_descriptor(&self) -> &'static [u8];
    fn get_class_circularity_error_descriptor(&self) -> &'static [u8];
    fn out_of_memory_error_descriptor(&self) -> &'static [u8];

    fn create_class_linker_extension(&'static self) -> Box<dyn ClassLinkerExtension>;
}

/// The context of the core language, panda assembly.
pub struct PandaAssemblyLanguageContext;

impl LanguageContext for PandaAssemblyLanguageContext {
    fn get_language(&self) -> SourceLanguage {
        SourceLanguage::PandaAssembly
    }

    fn get_object_class_descriptor(&self) -> &'static [u8] {
        b"Lpanda/Object;"
    }

    fn get_class_class_descriptor(&self) -> &'static [u8] {
        b"Lpanda/Class;"
    }

    fn get_class_array_class_descriptor(&self) -> &'static [u8] {
        b"[Lpanda/Class;"
    }

    fn get_string_class_descriptor(&self) -> &'static [u8] {
        b"Lpanda/String;"
    }

    fn get_string_array_class_descriptor(&self) -> &'static [u8] {
        b"[Lpanda/String;"
    }

    fn get_class_not_found_exception_descriptor(&self) -> &'static [u8] {
        b"Lpanda/ClassNotFoundException;"
    }

    fn get_no_class_def_found_error_descriptor(&self) -> &'static [u8] {
        b"Lpanda/NoClassDefFoundError;"
    }

    fn get_no_such_field_error_descriptor(&self) -> &'static [u8] {
        b"Lpanda/NoSuchFieldError;"
    }

    fn get_no_such_method_error_descriptor(&self) -> &'static [u8] {
        b"Lpanda/NoSuchMethodError;"
    }

    fn get_class_circularity_error_descriptor(&self) -> &'static [u8] {
        b"Lpanda/ClassCircularityError;"
    }

    fn out_of_memory_error_descriptor(&self) -> &'static [u8] {
        b"Lpanda/OutOfMemoryError;"
    }

    fn create_class_linker_extension(&'static self) -> Box<dyn ClassLinkerExtension> {
        Box::new(CoreClassLinkerExtension::new(self))
    }
}

static PANDA_ASSEMBLY_CONTEXT: PandaAssemblyLanguageContext = PandaAssemblyLanguageContext;

/// The context of `lang`, if the runtime supports that language.
pub fn language_context(lang: SourceLanguage) -> Option<&'static dyn LanguageContext> {
    match lang {
        SourceLanguage::PandaAssembly => Some(&PANDA_ASSEMBLY_CONTEXT),
        SourceLanguage::Ets | SourceLanguage::Ecmascript => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn languages_parse_from_kebab_case() {
        assert_eq!(
            SourceLanguage::from_str("panda-assembly"),
            Ok(SourceLanguage::PandaAssembly)
        );
        assert_eq!(SourceLanguage::Ecmascript.to_string(), "ecmascript");
        assert!(SourceLanguage::from_str("java").is_err());
    }

    #[test]
    fn only_panda_assembly_has_a_context() {
        let ctx = language_context(SourceLanguage::PandaAssembly).unwrap();
        assert_eq!(ctx.get_language(), SourceLanguage::PandaAssembly);
        assert_eq!(ctx.get_object_class_descriptor(), b"Lpanda/Object;");
        assert!(language_context(SourceLanguage::Ets).is_none());
    }
}
