//! Native binding: shared libraries exporting the C entry points.
//!
//! A library must export `GetInformation` and `DoResampler` with the C
//! calling convention. Both return a handle to a populated struct laid out as
//! below. Results are copied into owned Rust values straight away; when the
//! library also exports `FreeEngineOutput` / `FreeEngineInformation` the
//! handle is handed back to it right after the copy, otherwise the library
//! keeps ownership.

use std::ffi::{c_char, c_int, c_long, CStr, CString};
use std::path::Path;
use std::ptr::NonNull;

use libc::c_void;

use super::{EngineBinding, InvokeContext, Probe};
use crate::contract::{EngineInfo, EngineInput, EngineOutput, FlagItem};
use crate::engine::descriptor::BindingKind;
use crate::error::{EngineError, InvocationCause};

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawFlagItem {
    pub flag_str: *const c_char,
    pub three_letter_name: *const c_char,
    pub max: f64,
    pub min: f64,
    pub default: f64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawEngineInfo {
    pub name: *const c_char,
    pub version: *const c_char,
    pub author: *const c_char,
    pub usage: *const c_char,
    pub flag_item_count: c_int,
    pub flag_item: *const RawFlagItem,
}

/// Capacity of the inline `pitchBend` array in the native input struct.
pub const MAX_PITCH_BEND: usize = 65536;

/// Native input, passed to `DoResampler` by value. The pitch curve is an
/// inline array, so the struct is about 256 KiB; keep it boxed on the host.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawEngineInput {
    pub input_wave_file: *const c_char,
    pub note_string: *const c_char,
    pub velocity: f64,
    pub str_flags: *const c_char,
    pub offset: f64,
    pub required_length: f64,
    pub consonant: f64,
    pub cutoff: f64,
    pub volume: f64,
    pub modulation: f64,
    pub tempo: f64,
    pub n_pitch_bend: c_int,
    pub pitch_bend: [c_int; MAX_PITCH_BEND],
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawEngineOutput {
    pub n_wav_data: c_long,
    pub wav_data: *const c_char,
}

pub type GetInformationFn = unsafe extern "C" fn() -> *mut RawEngineInfo;
pub type DoResamplerFn = unsafe extern "C" fn(RawEngineInput) -> *mut RawEngineOutput;
pub type FreeEngineOutputFn = unsafe extern "C" fn(*mut RawEngineOutput);
pub type FreeEngineInformationFn = unsafe extern "C" fn(*mut RawEngineInfo);

/// Function pointers a native engine provides.
#[derive(Clone, Copy)]
pub struct NativeEntryPoints {
    pub get_information: GetInformationFn,
    pub do_resampler: DoResamplerFn,
    pub free_output: Option<FreeEngineOutputFn>,
    pub free_information: Option<FreeEngineInformationFn>,
}

impl NativeEntryPoints {
    pub fn new(get_information: GetInformationFn, do_resampler: DoResamplerFn) -> Self {
        Self {
            get_information,
            do_resampler,
            free_output: None,
            free_information: None,
        }
    }

    pub fn with_free_output(mut self, free_output: FreeEngineOutputFn) -> Self {
        self.free_output = Some(free_output);
        self
    }

    pub fn with_free_information(mut self, free_information: FreeEngineInformationFn) -> Self {
        self.free_information = Some(free_information);
        self
    }
}

/// An [`EngineInput`] encoded for the native ABI.
///
/// Owns the C strings the raw struct points into, so [`raw`](Self::raw)
/// stays valid for as long as this value lives.
pub struct NativeInput {
    _input_wave_file: CString,
    _note_string: CString,
    _str_flags: CString,
    raw: Box<RawEngineInput>,
}

impl NativeInput {
    pub fn encode(input: &EngineInput) -> Result<Self, String> {
        let samples = input.pitch_bend.len();
        if samples > MAX_PITCH_BEND {
            return Err(format!(
                "{} pitch-bend samples exceed the native limit of {}",
                samples, MAX_PITCH_BEND
            ));
        }
        let input_wave_file = to_c_string("inputWaveFile", &input.input_wave_file)?;
        let note_string = to_c_string("NoteString", &input.note_string)?;
        let str_flags = to_c_string("StrFlags", &input.flags)?;

        let mut raw = Box::new(RawEngineInput {
            input_wave_file: input_wave_file.as_ptr(),
            note_string: note_string.as_ptr(),
            velocity: input.velocity,
            str_flags: str_flags.as_ptr(),
            offset: input.offset,
            required_length: input.required_length,
            consonant: input.consonant,
            cutoff: input.cutoff,
            volume: input.volume,
            modulation: input.modulation,
            tempo: input.tempo,
            // Fits: samples <= MAX_PITCH_BEND.
            n_pitch_bend: samples as c_int,
            pitch_bend: [0; MAX_PITCH_BEND],
        });
        raw.pitch_bend[..samples].copy_from_slice(&input.pitch_bend);

        Ok(Self {
            _input_wave_file: input_wave_file,
            _note_string: note_string,
            _str_flags: str_flags,
            raw,
        })
    }

    pub fn raw(&self) -> &RawEngineInput {
        &self.raw
    }
}

fn to_c_string(field: &str, value: &str) -> Result<CString, String> {
    CString::new(value).map_err(|_| format!("{} contains an interior NUL byte", field))
}

/// Decode a raw input back into an [`EngineInput`].
///
/// Fields the native struct does not carry keep their neutral defaults.
///
/// # Safety
/// Every string pointer must be null or a valid NUL-terminated string.
pub unsafe fn decode_input(raw: &RawEngineInput) -> Result<EngineInput, String> {
    let count = usize::try_from(raw.n_pitch_bend)
        .ok()
        .filter(|count| *count <= MAX_PITCH_BEND)
        .ok_or_else(|| format!("nPitchBend out of range ({})", raw.n_pitch_bend))?;
    let pitch_bend = raw.pitch_bend[..count].to_vec();

    Ok(EngineInput {
        input_wave_file: read_string("inputWaveFile", raw.input_wave_file)?,
        note_string: read_string("NoteString", raw.note_string)?,
        velocity: raw.velocity,
        flags: read_string("StrFlags", raw.str_flags)?,
        offset: raw.offset,
        required_length: raw.required_length,
        consonant: raw.consonant,
        cutoff: raw.cutoff,
        volume: raw.volume,
        modulation: raw.modulation,
        tempo: raw.tempo,
        pitch_bend,
        ..EngineInput::default()
    })
}

unsafe fn read_string(field: &str, value: *const c_char) -> Result<String, String> {
    if value.is_null() {
        return Err(format!("{} is null", field));
    }
    Ok(CStr::from_ptr(value).to_string_lossy().into_owned())
}

/// Copy a returned information handle into an owned [`EngineInfo`].
///
/// # Safety
/// `info` must be null or point to a valid `RawEngineInfo`.
pub unsafe fn read_info(info: *const RawEngineInfo) -> Result<EngineInfo, String> {
    let info = info
        .as_ref()
        .ok_or_else(|| "GetInformation returned a null handle".to_string())?;
    let count = usize::try_from(info.flag_item_count)
        .map_err(|_| format!("FlagItemCount is negative ({})", info.flag_item_count))?;
    if count > 0 && info.flag_item.is_null() {
        return Err(format!("FlagItem is null with FlagItemCount = {}", count));
    }

    let raw_flags = if count == 0 {
        &[][..]
    } else {
        std::slice::from_raw_parts(info.flag_item, count)
    };
    let flags = raw_flags
        .iter()
        .map(|flag| {
            Ok(FlagItem {
                flag: read_string("flagStr", flag.flag_str)?,
                three_letter_name: read_string("ThreeLetterName", flag.three_letter_name)?,
                max: flag.max,
                min: flag.min,
                default: flag.default,
            })
        })
        .collect::<Result<Vec<_>, String>>()?;

    let decoded = EngineInfo {
        name: read_string("Name", info.name)?,
        version: read_string("Version", info.version)?,
        author: read_string("Author", info.author)?,
        usage: read_string("Usage", info.usage)?,
        flags,
    };
    decoded.validate()?;
    Ok(decoded)
}

/// Copy a returned output handle into an owned byte buffer.
///
/// # Safety
/// `output` must be null or point to a valid `RawEngineOutput` whose data
/// pointer covers `n_wav_data` bytes.
pub unsafe fn read_output(output: *const RawEngineOutput) -> Result<Vec<u8>, String> {
    let output = output
        .as_ref()
        .ok_or_else(|| "DoResampler returned a null handle".to_string())?;
    let len = usize::try_from(output.n_wav_data)
        .map_err(|_| format!("nWavData is negative ({})", output.n_wav_data))?;
    if len == 0 {
        return Ok(Vec::new());
    }
    if output.wav_data.is_null() {
        return Err(format!("wavData is null with nWavData = {}", len));
    }
    Ok(std::slice::from_raw_parts(output.wav_data as *const u8, len).to_vec())
}

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        /// Handle returned by `dlopen`, closed on drop.
        struct Library {
            handle: NonNull<c_void>,
        }

        // SAFETY: dl handles are process-global and usable from any thread.
        unsafe impl Send for Library {}
        unsafe impl Sync for Library {}

        impl Library {
            fn open(path: &Path) -> Result<Self, String> {
                use std::os::unix::ffi::OsStrExt;

                let c_path = CString::new(path.as_os_str().as_bytes())
                    .map_err(|_| "path contains an interior NUL byte".to_string())?;
                // SAFETY: c_path is a valid NUL-terminated string.
                let handle = unsafe { libc::dlopen(c_path.as_ptr(), libc::RTLD_NOW | libc::RTLD_LOCAL) };
                NonNull::new(handle)
                    .map(|handle| Self { handle })
                    .ok_or_else(last_dl_error)
            }

            fn symbol(&self, name: &CStr) -> Option<NonNull<c_void>> {
                // SAFETY: handle is open for the lifetime of self.
                NonNull::new(unsafe { libc::dlsym(self.handle.as_ptr(), name.as_ptr()) })
            }
        }

        impl Drop for Library {
            fn drop(&mut self) {
                // SAFETY: handle came from dlopen and is closed exactly once.
                unsafe {
                    libc::dlclose(self.handle.as_ptr());
                }
            }
        }

        fn last_dl_error() -> String {
            // SAFETY: dlerror returns null or a thread-local message.
            let message = unsafe { libc::dlerror() };
            if message.is_null() {
                "dlopen failed".to_string()
            } else {
                unsafe { CStr::from_ptr(message) }.to_string_lossy().into_owned()
            }
        }
    } else {
        struct Library;

        impl Library {
            fn open(_path: &Path) -> Result<Self, String> {
                Err("dynamic loading is not supported on this platform".to_string())
            }

            fn symbol(&self, _name: &CStr) -> Option<NonNull<c_void>> {
                None
            }
        }
    }
}

/// Binding to a native engine's exported functions.
pub struct NativeBinding {
    location: String,
    entry: NativeEntryPoints,
    _library: Option<Library>,
}

impl NativeBinding {
    /// Bind to entry points already resolved in this process.
    pub fn from_entry_points(location: impl Into<String>, entry: NativeEntryPoints) -> Self {
        Self {
            location: location.into(),
            entry,
            _library: None,
        }
    }

    /// Try to open `location` as a shared library exporting both entry points.
    pub fn probe(location: &str) -> Probe {
        let path = Path::new(location);
        if !path.is_file() {
            return Probe::Unrecognized(format!("{} is not a file", location));
        }

        let library = match Library::open(path) {
            Ok(library) => library,
            Err(reason) => return Probe::Unrecognized(reason),
        };

        let (Some(get_information), Some(do_resampler)) = (
            library.symbol(c"GetInformation"),
            library.symbol(c"DoResampler"),
        ) else {
            return Probe::Unrecognized(format!(
                "{} does not export GetInformation and DoResampler",
                location
            ));
        };

        // SAFETY: the exported symbols follow the documented signatures.
        let entry = unsafe {
            NativeEntryPoints {
                get_information: std::mem::transmute::<*mut c_void, GetInformationFn>(
                    get_information.as_ptr(),
                ),
                do_resampler: std::mem::transmute::<*mut c_void, DoResamplerFn>(
                    do_resampler.as_ptr(),
                ),
                free_output: library.symbol(c"FreeEngineOutput").map(|symbol| {
                    std::mem::transmute::<*mut c_void, FreeEngineOutputFn>(symbol.as_ptr())
                }),
                free_information: library.symbol(c"FreeEngineInformation").map(|symbol| {
                    std::mem::transmute::<*mut c_void, FreeEngineInformationFn>(symbol.as_ptr())
                }),
            }
        };

        log::debug!("[NativeBinding] Loaded {}", location);
        Probe::Bound(Box::new(Self {
            location: location.to_string(),
            entry,
            _library: Some(library),
        }))
    }
}

impl EngineBinding for NativeBinding {
    fn kind(&self) -> BindingKind {
        BindingKind::Native
    }

    fn describe(&self) -> Result<EngineInfo, EngineError> {
        // SAFETY: entry points follow the native ABI; the handle is only
        // read before being released.
        let decoded = unsafe {
            let handle = (self.entry.get_information)();
            let decoded = read_info(handle);
            if let (false, Some(free)) = (handle.is_null(), self.entry.free_information) {
                free(handle);
            }
            decoded
        };
        decoded.map_err(|reason| EngineError::describe(&self.location, reason))
    }

    fn invoke(
        &self,
        input: &EngineInput,
        _ctx: &InvokeContext,
    ) -> Result<EngineOutput, EngineError> {
        let native = NativeInput::encode(input).map_err(|reason| {
            EngineError::invocation(&self.location, InvocationCause::Encoding(reason))
        })?;

        // SAFETY: `native` outlives the call; the handle is only read before
        // being released.
        let copied = unsafe {
            let handle = (self.entry.do_resampler)(*native.raw());
            let copied = read_output(handle);
            if let (false, Some(free)) = (handle.is_null(), self.entry.free_output) {
                free(handle);
            }
            copied
        };

        copied
            .map(EngineOutput::new)
            .map_err(|reason| EngineError::invocation(&self.location, InvocationCause::Engine(reason)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{native_echo_entry_points, native_null_entry_points};

    #[test]
    fn test_input_round_trip_preserves_fields() {
        let input = EngineInput {
            input_wave_file: "voice/_a.wav".to_string(),
            note_string: "A#3".to_string(),
            velocity: 150.0,
            flags: "g-5Y0".to_string(),
            offset: 45.5,
            required_length: 600.0,
            consonant: 80.0,
            cutoff: -320.0,
            volume: 80.0,
            modulation: 0.0,
            tempo: 128.0,
            pitch_bend: Vec::new(),
            ..EngineInput::default()
        };
        let native = NativeInput::encode(&input).unwrap();
        let raw = native.raw();
        assert_eq!(raw.n_pitch_bend, 0);
        let decoded = unsafe { decode_input(raw) }.unwrap();
        assert_eq!(decoded, input);
        assert_eq!(decoded.cutoff, -320.0);
    }

    #[test]
    fn test_large_pitch_bend_round_trip() {
        let input = EngineInput {
            pitch_bend: (0..5000).map(|i| i - 2500).collect(),
            ..EngineInput::default()
        };
        let native = NativeInput::encode(&input).unwrap();
        assert_eq!(native.raw().n_pitch_bend, 5000);
        let decoded = unsafe { decode_input(native.raw()) }.unwrap();
        assert_eq!(decoded.pitch_bend, input.pitch_bend);
    }

    #[test]
    fn test_pitch_bend_is_inline_after_count() {
        assert_eq!(
            std::mem::offset_of!(RawEngineInput, pitch_bend),
            std::mem::offset_of!(RawEngineInput, n_pitch_bend) + std::mem::size_of::<c_int>()
        );
        assert!(std::mem::size_of::<RawEngineInput>() >= MAX_PITCH_BEND * std::mem::size_of::<c_int>());

        let input = EngineInput {
            pitch_bend: vec![7; MAX_PITCH_BEND],
            ..EngineInput::default()
        };
        let native = NativeInput::encode(&input).unwrap();
        assert_eq!(native.raw().n_pitch_bend as usize, MAX_PITCH_BEND);
        assert_eq!(native.raw().pitch_bend[MAX_PITCH_BEND - 1], 7);
    }

    #[test]
    fn test_oversized_pitch_bend_is_encoding_error() {
        let binding = NativeBinding::from_entry_points("native://echo", native_echo_entry_points());
        let input = EngineInput {
            pitch_bend: vec![0; MAX_PITCH_BEND + 1],
            ..EngineInput::default()
        };
        match binding.invoke(&input, &InvokeContext::default()) {
            Err(EngineError::Invocation {
                cause: InvocationCause::Encoding(reason),
                ..
            }) => assert!(reason.contains("65537"), "{}", reason),
            other => panic!("Expected Encoding error, got {:?}", other),
        }
    }

    #[test]
    fn test_out_of_range_count_is_rejected_on_decode() {
        let native = NativeInput::encode(&EngineInput::default()).unwrap();
        let mut raw = Box::new(*native.raw());
        raw.n_pitch_bend = MAX_PITCH_BEND as c_int + 1;
        assert!(unsafe { decode_input(&raw) }.is_err());
        raw.n_pitch_bend = -1;
        assert!(unsafe { decode_input(&raw) }.is_err());
    }

    #[test]
    fn test_interior_nul_is_rejected() {
        let input = EngineInput {
            flags: "g\0".to_string(),
            ..EngineInput::default()
        };
        assert!(NativeInput::encode(&input).is_err());
    }

    #[test]
    fn test_echo_double_describe_and_invoke() {
        let binding = NativeBinding::from_entry_points("native://echo", native_echo_entry_points());
        let info = binding.describe().unwrap();
        assert_eq!(info.name, "native-echo");
        assert_eq!(info.flags.len(), 1);

        let input = EngineInput {
            note_string: "C4".to_string(),
            cutoff: -12.5,
            pitch_bend: vec![1, -2, 3],
            ..EngineInput::default()
        };
        let output = binding.invoke(&input, &InvokeContext::default()).unwrap();
        let echoed: EngineInput = serde_json::from_slice(output.as_bytes()).unwrap();
        assert_eq!(echoed.note_string, "C4");
        assert_eq!(echoed.cutoff, -12.5);
        assert_eq!(echoed.pitch_bend, vec![1, -2, 3]);
    }

    #[test]
    fn test_null_handles_are_reported() {
        let binding = NativeBinding::from_entry_points("native://null", native_null_entry_points());
        assert!(matches!(
            binding.describe(),
            Err(EngineError::Describe { .. })
        ));
        match binding.invoke(&EngineInput::default(), &InvokeContext::default()) {
            Err(EngineError::Invocation {
                cause: InvocationCause::Engine(reason),
                ..
            }) => assert!(reason.contains("null")),
            other => panic!("Expected null handle error, got {:?}", other),
        }
    }

    #[test]
    fn test_probe_rejects_non_library_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("not_a_library.txt");
        std::fs::write(&path, b"plain text").unwrap();
        assert!(matches!(
            NativeBinding::probe(path.to_str().unwrap()),
            Probe::Unrecognized(_)
        ));
        assert!(matches!(
            NativeBinding::probe("/definitely/not/here.so"),
            Probe::Unrecognized(_)
        ));
    }
}
