//! Shared helpers for objclink integration tests.

#![allow(dead_code)]

use objclink::{Client, Handle, NativeArg, RawReturn, SimRuntime};
use std::sync::Arc;

/// A fresh Foundation runtime with a coercing client.
pub fn sim_client() -> (Arc<SimRuntime>, Client) {
    let rt = Arc::new(SimRuntime::new());
    let client = Client::coercing(rt.clone());
    (rt, client)
}

/// Defines `Greeter : NSObject` with a few methods exercising every slot
/// class:
///
/// - `-greeting` returns the C string `"hello"`
/// - `-scale:by:` multiplies a double by an int
/// - `-half:` halves a float
/// - `-selectorNamed:` echoes a selector
/// - `-locationOf:` returns the location of an `_NSRange`
pub fn define_greeter(rt: &SimRuntime) -> Handle {
    let class = rt.define_class("Greeter", Some("NSObject")).unwrap();

    rt.add_method(class, "greeting", "r*16@0:8", |_, _, _| {
        Ok(RawReturn::Word(c"hello".as_ptr() as usize))
    })
    .unwrap();
    rt.add_method(class, "scale:by:", "d28@0:8d16i24", |_, _, args| {
        match args {
            [NativeArg::F64(x), NativeArg::Word(n)] => Ok(RawReturn::F64(x * (*n as i32) as f64)),
            _ => unreachable!("arguments checked by the runtime"),
        }
    })
    .unwrap();
    rt.add_method(class, "half:", "f20@0:8f16", |_, _, args| match args {
        [NativeArg::F32(x)] => Ok(RawReturn::F32(x / 2.0)),
        _ => unreachable!("arguments checked by the runtime"),
    })
    .unwrap();
    rt.add_method(class, "selectorNamed:", ":24@0:8:16", |_, _, args| {
        Ok(RawReturn::Word(args[0].as_word().unwrap()))
    })
    .unwrap();
    rt.add_method(class, "locationOf:", "Q32@0:8{_NSRange=QQ}16", |_, _, args| {
        match args {
            [NativeArg::Struct(range)] => Ok(RawReturn::Word(range.word(0).unwrap())),
            _ => unreachable!("arguments checked by the runtime"),
        }
    })
    .unwrap();
    class
}
