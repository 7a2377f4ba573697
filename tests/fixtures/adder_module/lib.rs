//! Native module used by the shared-library tests. Built as a cdylib against
//! this crate, installed as `adder.<ext>` and loaded through `init_adder`.

use std::sync::atomic::{AtomicUsize, Ordering};

use script_bridge::{ModuleAttr, ModuleExports, ModuleMethod, WireValue};

static UNLOADS: AtomicUsize = AtomicUsize::new(0);

#[no_mangle]
#[allow(improper_ctypes_definitions)]
pub extern "C" fn init_adder() -> *mut ModuleExports {
    let exports = ModuleExports {
        methods: vec![ModuleMethod::new("add", 2, |_, args| {
            Ok(WireValue::Double(args.number(0)? + args.number(1)?))
        })],
        attributes: vec![ModuleAttr::new("version", "1.0")],
        on_unload: Some(Box::new(|_id: &str| {
            UNLOADS.fetch_add(1, Ordering::SeqCst);
        })),
    };
    Box::into_raw(Box::new(exports))
}

/// How many times the module has been finalized.
#[no_mangle]
pub extern "C" fn adder_unload_count() -> usize {
    UNLOADS.load(Ordering::SeqCst)
}
