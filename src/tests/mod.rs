// Scenario tests that boot a complete runtime. Tests of a single component live next to it.

mod test_class_roots;
mod test_gc_roots;
mod test_string_relocation;
