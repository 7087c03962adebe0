#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

/// Must be called before each test to install the logger.
pub fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Shared mutable cell for observing callback effects; loops are single
/// threaded so `Rc<RefCell<_>>` is all the synchronization a test needs.
pub fn cell<T>(value: T) -> Rc<RefCell<T>> {
    Rc::new(RefCell::new(value))
}
