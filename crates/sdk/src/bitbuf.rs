//! `bf_write` layout
//!
//! User messages on the legacy engine path are written into a bit buffer
//! returned by `UserMessageBegin`.

use std::ffi::c_char;

/// Source engine `bf_write`
#[repr(C)]
#[derive(Debug)]
pub struct BfWrite {
    pub data: *mut u32,
    pub data_bytes: i32,
    pub data_bits: i32,
    pub cur_bit: i32,
    pub overflow: bool,
    pub assert_on_overflow: bool,
    pub debug_name: *const c_char,
}
