//! Engine doubles for tests and host smoke checks.
//!
//! `EchoEngine` is a managed engine, the `native_*` entry points stand in for
//! a loaded shared library, and `write_script` creates process engines.

use std::ffi::{c_char, c_long, CString};
use std::path::{Path, PathBuf};
use std::ptr;

use crate::contract::{EngineInfo, EngineInput, EngineOutput, FlagItem};
use crate::engine::binding::native::{
    decode_input, RawEngineInfo, RawEngineInput, RawEngineOutput, RawFlagItem,
};
use crate::engine::binding::{ManagedEngine, NativeEntryPoints};

/// Managed engine whose "audio" is the input file path.
pub struct EchoEngine;

impl ManagedEngine for EchoEngine {
    fn information() -> EngineInfo {
        EngineInfo {
            name: "echo".to_string(),
            version: "1.0".to_string(),
            author: "resampler_host".to_string(),
            usage: "returns inputWaveFile as bytes".to_string(),
            flags: vec![
                FlagItem::new("g", "GEN", 100.0, -100.0, 0.0),
                FlagItem::new("B", "BRE", 100.0, 0.0, 50.0),
            ],
        }
    }

    fn resample(input: EngineInput) -> Result<EngineOutput, String> {
        Ok(EngineOutput::new(input.input_wave_file.into_bytes()))
    }
}

/// Native entry points whose output is the JSON encoding of the input they
/// received. Handles are released through the free exports.
pub fn native_echo_entry_points() -> NativeEntryPoints {
    NativeEntryPoints::new(echo_information, echo_resample)
        .with_free_information(echo_free_information)
        .with_free_output(echo_free_output)
}

/// Native entry points that always return null handles.
pub fn native_null_entry_points() -> NativeEntryPoints {
    NativeEntryPoints::new(null_information, null_resample)
}

fn leak_c_string(value: &str) -> *const c_char {
    CString::new(value)
        .map(CString::into_raw)
        .unwrap_or(ptr::null_mut())
}

unsafe fn free_c_string(value: *const c_char) {
    if !value.is_null() {
        drop(CString::from_raw(value as *mut c_char));
    }
}

unsafe extern "C" fn echo_information() -> *mut RawEngineInfo {
    let flags: Box<[RawFlagItem]> = vec![RawFlagItem {
        flag_str: leak_c_string("t"),
        three_letter_name: leak_c_string("TRS"),
        max: 1200.0,
        min: -1200.0,
        default: 0.0,
    }]
    .into_boxed_slice();
    let count = flags.len();

    Box::into_raw(Box::new(RawEngineInfo {
        name: leak_c_string("native-echo"),
        version: leak_c_string("0.1"),
        author: leak_c_string("resampler_host"),
        usage: leak_c_string("echoes its input as JSON"),
        flag_item_count: count as i32,
        flag_item: Box::into_raw(flags) as *const RawFlagItem,
    }))
}

unsafe extern "C" fn echo_free_information(info: *mut RawEngineInfo) {
    if info.is_null() {
        return;
    }
    let info = Box::from_raw(info);
    let flags = Box::from_raw(ptr::slice_from_raw_parts_mut(
        info.flag_item as *mut RawFlagItem,
        info.flag_item_count as usize,
    ));
    for flag in flags.iter() {
        free_c_string(flag.flag_str);
        free_c_string(flag.three_letter_name);
    }
    free_c_string(info.name);
    free_c_string(info.version);
    free_c_string(info.author);
    free_c_string(info.usage);
}

unsafe extern "C" fn echo_resample(input: RawEngineInput) -> *mut RawEngineOutput {
    let Ok(decoded) = decode_input(&input) else {
        return ptr::null_mut();
    };
    let Ok(bytes) = serde_json::to_vec(&decoded) else {
        return ptr::null_mut();
    };
    let bytes = bytes.into_boxed_slice();
    let len = bytes.len();

    Box::into_raw(Box::new(RawEngineOutput {
        n_wav_data: len as c_long,
        wav_data: Box::into_raw(bytes) as *const c_char,
    }))
}

unsafe extern "C" fn echo_free_output(output: *mut RawEngineOutput) {
    if output.is_null() {
        return;
    }
    let output = Box::from_raw(output);
    if !output.wav_data.is_null() {
        drop(Box::from_raw(ptr::slice_from_raw_parts_mut(
            output.wav_data as *mut u8,
            output.n_wav_data as usize,
        )));
    }
}

unsafe extern "C" fn null_information() -> *mut RawEngineInfo {
    ptr::null_mut()
}

unsafe extern "C" fn null_resample(_input: RawEngineInput) -> *mut RawEngineOutput {
    ptr::null_mut()
}

/// Write an executable shell script to `dir/name` and return its path.
#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> std::io::Result<PathBuf> {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body))?;
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn echo_engine_information_is_valid() {
        let info = EchoEngine::information();
        assert!(info.validate().is_ok());
        assert_eq!(info.flag_item_count(), 2);
    }

    #[test]
    fn native_echo_info_round_trips_and_frees() {
        let entry = native_echo_entry_points();
        unsafe {
            let handle = (entry.get_information)();
            let info = crate::engine::binding::native::read_info(handle).unwrap();
            assert_eq!(info.name, "native-echo");
            assert_eq!(info.flags[0].three_letter_name, "TRS");
            (entry.free_information.unwrap())(handle);
        }
    }
}
