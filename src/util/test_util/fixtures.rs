// Some tests are conditionally compiled. So not all the code in this module will be used. We simply allow dead code in this module.
#![allow(dead_code)]

use std::sync::Arc;

use crate::runtime::class_linker::extension::ClassLinkerExtension;
use crate::runtime::coretypes::string::StringContext;
use crate::runtime::panda_file::File;
use crate::runtime::thread::ManagedThread;
use crate::runtime::Runtime;
use crate::util::options::Options;

/// A boot file with the core exception classes and a few test classes.
pub const TEST_BOOT_FILE: &str = r#"
# Core classes
.record Lpanda/Object; access=public
.record Lpanda/Throwable; extends=Lpanda/Object; fields=2 vmethods=2 access=public
.record Lpanda/Exception; extends=Lpanda/Throwable; access=public
.record Lpanda/Error; extends=Lpanda/Throwable; access=public
.record Lpanda/ClassNotFoundException; extends=Lpanda/Exception; access=public
.record Lpanda/NoClassDefFoundError; extends=Lpanda/Error; access=public
.record Lpanda/NoSuchFieldError; extends=Lpanda/Error; access=public
.record Lpanda/NoSuchMethodError; extends=Lpanda/Error; access=public
.record Lpanda/ClassCircularityError; extends=Lpanda/Error; access=public
.record Lpanda/OutOfMemoryError; extends=Lpanda/Error; access=public

# Test classes
.record LTestBase; fields=2 static=16 vmethods=3 access=public
.record LTestDerived; extends=LTestBase; fields=1 vmethods=1 access=public,final
.record LCycleA; extends=LCycleB;
.record LCycleB; extends=LCycleA;
.record LMissingBase; extends=LNowhere;
"#;

pub trait FixtureContent {
    fn create() -> Self;
}

/// Build a fresh fixture for a single test.
pub fn with_fixture<T: FixtureContent, F: FnOnce(&T)>(func: F) {
    let content = T::create();
    func(&content)
}

/// A runtime booted from [`TEST_BOOT_FILE`] with its main thread attached to the current thread.
pub struct RuntimeFixture {
    pub runtime: Arc<Runtime>,
}

impl FixtureContent for RuntimeFixture {
    fn create() -> Self {
        Self::with_options(|_| {})
    }
}

impl RuntimeFixture {
    pub fn with_options<F: FnOnce(&mut Options)>(configure: F) -> Self {
        let mut options = Options::builtin_defaults();
        configure(&mut options);
        let boot = File::parse("test-boot.abc", TEST_BOOT_FILE).unwrap();
        let runtime = Runtime::create(options, vec![boot]).unwrap();
        RuntimeFixture { runtime }
    }

    pub fn extension(&self) -> &dyn ClassLinkerExtension {
        self.runtime.core_extension()
    }

    pub fn thread(&self) -> &ManagedThread {
        self.runtime.main_thread()
    }

    pub fn string_context(&self) -> StringContext<'_> {
        self.runtime.string_context(self.runtime.main_thread())
    }
}
