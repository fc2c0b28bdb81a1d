//! Minimal native engine built as a cdylib by `tests/native_library.rs`.
//!
//! Self-contained: no crate dependencies, so it compiles with a bare rustc.
//! `DoResampler` answers with `<note>|<nPitchBend>|<sum of pitchBend>`.

use std::ffi::{c_char, c_int, c_long, CStr};

#[repr(C)]
pub struct EngineFlagItem {
    flag_str: *const c_char,
    three_letter_name: *const c_char,
    max: f64,
    min: f64,
    default: f64,
}

#[repr(C)]
pub struct EngineInformation {
    name: *const c_char,
    version: *const c_char,
    author: *const c_char,
    usage: *const c_char,
    flag_item_count: c_int,
    flag_item: *const EngineFlagItem,
}

#[repr(C)]
pub struct EngineInput {
    input_wave_file: *const c_char,
    note_string: *const c_char,
    velocity: f64,
    str_flags: *const c_char,
    offset: f64,
    required_length: f64,
    consonant: f64,
    cutoff: f64,
    volume: f64,
    modulation: f64,
    tempo: f64,
    n_pitch_bend: c_int,
    pitch_bend: [c_int; 65536],
}

#[repr(C)]
pub struct EngineOutput {
    n_wav_data: c_long,
    wav_data: *mut c_char,
}

#[no_mangle]
pub extern "C" fn GetInformation() -> *mut EngineInformation {
    let flags = Box::leak(Box::new([EngineFlagItem {
        flag_str: c"g".as_ptr(),
        three_letter_name: c"GEN".as_ptr(),
        max: 100.0,
        min: -100.0,
        default: 0.0,
    }]));
    Box::into_raw(Box::new(EngineInformation {
        name: c"dylib-echo".as_ptr(),
        version: c"0.1".as_ptr(),
        author: c"resampler_host".as_ptr(),
        usage: c"test fixture".as_ptr(),
        flag_item_count: 1,
        flag_item: flags.as_ptr(),
    }))
}

/// # Safety
/// `input` must follow the native engine input layout.
#[no_mangle]
pub unsafe extern "C" fn DoResampler(input: EngineInput) -> *mut EngineOutput {
    let note = if input.note_string.is_null() {
        String::new()
    } else {
        CStr::from_ptr(input.note_string).to_string_lossy().into_owned()
    };
    let count = input.n_pitch_bend.clamp(0, 65536) as usize;
    let sum: i64 = input.pitch_bend[..count].iter().map(|v| *v as i64).sum();

    let mut bytes = format!("{}|{}|{}", note, count, sum).into_bytes().into_boxed_slice();
    let len = bytes.len();
    let data = bytes.as_mut_ptr() as *mut c_char;
    std::mem::forget(bytes);
    Box::into_raw(Box::new(EngineOutput {
        n_wav_data: len as c_long,
        wav_data: data,
    }))
}

/// # Safety
/// `output` must come from `DoResampler`.
#[no_mangle]
pub unsafe extern "C" fn FreeEngineOutput(output: *mut EngineOutput) {
    if output.is_null() {
        return;
    }
    let output = Box::from_raw(output);
    let len = output.n_wav_data as usize;
    drop(Box::from_raw(std::ptr::slice_from_raw_parts_mut(
        output.wav_data as *mut u8,
        len,
    )));
}

/// # Safety
/// `info` must come from `GetInformation`.
#[no_mangle]
pub unsafe extern "C" fn FreeEngineInformation(info: *mut EngineInformation) {
    if !info.is_null() {
        drop(Box::from_raw(info));
    }
}
