// abi.rs — Backend ABI adapter
//
// Thin typed wrapper over a backend's exported C function table. Every
// nonzero return code is normalized into `HarnessError::Backend` carrying
// the backend's last-error string. The rest of the harness talks to the
// `BackendApi` trait; the raw `(pointer, size, tag)` forms exist only in
// this module.
//
// Preconditions: the shared library exports every symbol listed in VTable.
// Postconditions: one engine handle per loaded backend, destroyed on drop.
// Failure modes: missing symbols, nonzero ABI codes.
// Side effects: dlopen/dlclose of the backend library.

use std::ffi::c_char;
use std::mem::MaybeUninit;
use std::path::Path;
use std::rc::Rc;

use libloading::Library;

use crate::error::{HarnessError, Result};
use crate::pack::DataPack;
use crate::workload::{
    BenchmarkDescriptor, Category, CategoryParams, DataType, WorkloadParam, CAT_PARAMS_BYTES,
};

// ── Wire structs ───────────────────────────────────────────────────────────

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawNativeBuffer {
    pub p: *mut u8,
    pub size: u64,
    pub tag: u64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawDataPack {
    pub buffers: *mut RawNativeBuffer,
    pub count: u64,
    pub param_position: u64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawPackCollection {
    pub packs: *mut RawDataPack,
    pub count: u64,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub union RawWorkloadParamValue {
    pub u: u64,
    pub i: i64,
    pub f: f64,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct RawWorkloadParam {
    pub tag: u32,
    pub value: RawWorkloadParamValue,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct RawCategoryParams {
    pub reserved: [u8; CAT_PARAMS_BYTES],
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct RawBenchmarkDescriptor {
    pub workload: u32,
    pub category: u32,
    pub data_type: u32,
    pub cipher_param_mask: u32,
    pub scheme: i32,
    pub security: i32,
    pub other: i64,
    pub cat_params: RawCategoryParams,
}

// ── Function table ─────────────────────────────────────────────────────────

type InitFn = unsafe extern "C" fn(*mut u64) -> i32;
type DestroyFn = unsafe extern "C" fn(u64) -> i32;
type SubscribeFn = unsafe extern "C" fn(u64, *mut u64, *mut u64) -> i32;
type WpDetailsFn = unsafe extern "C" fn(u64, u64, *mut u64) -> i32;
type DescribeFn = unsafe extern "C" fn(u64, u64, *mut RawBenchmarkDescriptor) -> i32;
type InitBenchmarkFn =
    unsafe extern "C" fn(u64, u64, *const RawWorkloadParam, u64, *mut u64) -> i32;
type EncodeFn = unsafe extern "C" fn(u64, u64, *const RawPackCollection, *mut u64) -> i32;
type HandleStepFn = unsafe extern "C" fn(u64, u64, u64, *mut u64) -> i32;
type LoadFn = unsafe extern "C" fn(u64, u64, *const u64, u64, *mut u64) -> i32;
type DecodeFn = unsafe extern "C" fn(u64, u64, u64, *mut RawPackCollection) -> i32;
type DestroyHandleFn = unsafe extern "C" fn(u64, u64) -> i32;
type NameFn = unsafe extern "C" fn(u64, i32, *mut c_char, *mut u64) -> i32;
type DescriptionFn = unsafe extern "C" fn(u64, *mut c_char, *mut u64) -> i32;

struct VTable {
    init: InitFn,
    destroy: DestroyFn,
    subscribe_benchmarks: SubscribeFn,
    get_workload_params_details: WpDetailsFn,
    describe_benchmark: DescribeFn,
    init_benchmark: InitBenchmarkFn,
    encode: EncodeFn,
    encrypt: HandleStepFn,
    load: LoadFn,
    operate: HandleStepFn,
    store: HandleStepFn,
    decrypt: HandleStepFn,
    decode: DecodeFn,
    destroy_handle: DestroyHandleFn,
    get_scheme_name: NameFn,
    get_security_name: NameFn,
    get_extra_description: DescriptionFn,
    get_last_error_description: DescriptionFn,
}

macro_rules! resolve {
    ($lib:expr, $name:literal) => {
        unsafe {
            *$lib.get(concat!($name, "\0").as_bytes()).map_err(|e| {
                HarnessError::Config(format!("backend library misses symbol {}: {e}", $name))
            })?
        }
    };
}

impl VTable {
    fn resolve(lib: &Library) -> Result<Self> {
        Ok(Self {
            init: resolve!(lib, "init"),
            destroy: resolve!(lib, "destroy"),
            subscribe_benchmarks: resolve!(lib, "subscribeBenchmarks"),
            get_workload_params_details: resolve!(lib, "getWorkloadParamsDetails"),
            describe_benchmark: resolve!(lib, "describeBenchmark"),
            init_benchmark: resolve!(lib, "initBenchmark"),
            encode: resolve!(lib, "encode"),
            encrypt: resolve!(lib, "encrypt"),
            load: resolve!(lib, "load"),
            operate: resolve!(lib, "operate"),
            store: resolve!(lib, "store"),
            decrypt: resolve!(lib, "decrypt"),
            decode: resolve!(lib, "decode"),
            destroy_handle: resolve!(lib, "destroyHandle"),
            get_scheme_name: resolve!(lib, "getSchemeName"),
            get_security_name: resolve!(lib, "getSecurityName"),
            get_extra_description: resolve!(lib, "getExtraDescription"),
            get_last_error_description: resolve!(lib, "getLastErrorDescription"),
        })
    }
}

// ── Trait seam ─────────────────────────────────────────────────────────────

/// Typed view of one backend instance. The shared-library adapter is the
/// production implementation; tests drive the engine through an in-process
/// implementation of the same trait.
pub trait BackendApi {
    /// The full set of benchmark descriptor handles the backend supports.
    fn subscribe_benchmarks(&self) -> Result<Vec<u64>>;

    /// Number of workload parameters the backend declares for a benchmark.
    fn workload_param_count(&self, bench: u64) -> Result<u64>;

    fn describe(&self, bench: u64) -> Result<BenchmarkDescriptor>;

    /// Instantiate a benchmark with concrete workload parameters; returns
    /// the BenchHandle the pipeline operates on.
    fn init_benchmark(&self, bench: u64, w_params: &[WorkloadParam]) -> Result<u64>;

    fn encode(&self, bench: u64, packs: &[&DataPack]) -> Result<u64>;
    fn encrypt(&self, bench: u64, encoded: u64) -> Result<u64>;
    fn load(&self, bench: u64, handles: &[u64]) -> Result<u64>;
    fn operate(&self, bench: u64, loaded: u64) -> Result<u64>;
    fn store(&self, bench: u64, remote: u64) -> Result<u64>;
    fn decrypt(&self, bench: u64, cipher: u64) -> Result<u64>;

    /// Decode a stored/decrypted result batch into harness-owned packs.
    fn decode_into(&self, bench: u64, encoded: u64, outs: &mut [DataPack]) -> Result<()>;

    fn destroy_handle(&self, handle: u64) -> Result<()>;

    fn scheme_name(&self, scheme: i32) -> Result<String>;
    fn security_name(&self, security: i32) -> Result<String>;
    fn extra_description(&self) -> Result<String>;
}

// ── RAII handle ────────────────────────────────────────────────────────────

/// A move-only backend handle. `destroyHandle` is called exactly once, on
/// explicit destroy or on drop, whichever comes first.
pub struct BackendHandle {
    raw: Option<u64>,
    backend: Rc<dyn BackendApi>,
}

impl BackendHandle {
    pub fn new(raw: u64, backend: Rc<dyn BackendApi>) -> Self {
        Self {
            raw: Some(raw),
            backend,
        }
    }

    /// The raw handle value, if not yet destroyed.
    pub fn raw(&self) -> Result<u64> {
        self.raw
            .ok_or_else(|| HarnessError::Precondition("backend handle already destroyed".into()))
    }

    /// Destroy eagerly. Idempotent; the error (if any) is surfaced here
    /// rather than swallowed as it would be on drop.
    pub fn destroy(&mut self) -> Result<()> {
        match self.raw.take() {
            Some(raw) => self.backend.destroy_handle(raw),
            None => Ok(()),
        }
    }
}

impl Drop for BackendHandle {
    fn drop(&mut self) {
        if let Some(raw) = self.raw.take() {
            if let Err(e) = self.backend.destroy_handle(raw) {
                log::warn!("destroyHandle failed on teardown: {e}");
            }
        }
    }
}

impl std::fmt::Debug for BackendHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BackendHandle({:?})", self.raw)
    }
}

// ── Shared-library adapter ─────────────────────────────────────────────────

const STRING_BUF: usize = 1024;

/// A backend loaded from a shared library. Holds the engine handle for the
/// process lifetime of the instance.
pub struct SharedLibBackend {
    // Field order matters: the vtable's function pointers are only valid
    // while `_lib` stays loaded, and `engine` must be destroyed first.
    engine: u64,
    vt: VTable,
    _lib: Library,
}

impl std::fmt::Debug for SharedLibBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedLibBackend")
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

impl SharedLibBackend {
    /// Load the library, resolve the full symbol table, and initialize the
    /// backend engine.
    pub fn load(path: &Path) -> Result<Self> {
        let lib = unsafe { Library::new(path) }.map_err(|e| {
            HarnessError::Config(format!("cannot load backend {}: {e}", path.display()))
        })?;
        let vt = VTable::resolve(&lib)?;
        let mut engine = 0u64;
        let code = unsafe { (vt.init)(&mut engine) };
        if code != 0 {
            return Err(HarnessError::Backend {
                code,
                message: "backend init failed".into(),
            });
        }
        Ok(Self {
            engine,
            vt,
            _lib: lib,
        })
    }

    /// Read the backend's last-error string, best effort.
    fn last_error(&self) -> String {
        let mut buf = [0u8; STRING_BUF];
        let mut len = STRING_BUF as u64;
        let code = unsafe {
            (self.vt.get_last_error_description)(
                self.engine,
                buf.as_mut_ptr() as *mut c_char,
                &mut len,
            )
        };
        if code != 0 {
            return "<no error description>".into();
        }
        let len = (len as usize).min(STRING_BUF);
        String::from_utf8_lossy(&buf[..len])
            .trim_end_matches('\0')
            .to_string()
    }

    /// Normalize a return code, attaching the last-error string.
    fn check(&self, code: i32) -> Result<()> {
        if code == 0 {
            Ok(())
        } else {
            Err(HarnessError::Backend {
                code,
                message: self.last_error(),
            })
        }
    }

    fn read_name(&self, f: NameFn, selector: i32) -> Result<String> {
        let mut buf = [0u8; STRING_BUF];
        let mut len = STRING_BUF as u64;
        let code =
            unsafe { f(self.engine, selector, buf.as_mut_ptr() as *mut c_char, &mut len) };
        self.check(code)?;
        let len = (len as usize).min(STRING_BUF);
        Ok(String::from_utf8_lossy(&buf[..len])
            .trim_end_matches('\0')
            .to_string())
    }

    /// Build the raw pack collection for a set of harness-owned packs.
    /// The returned vectors must outlive the ABI call that consumes them.
    fn raw_collection(
        packs: &[&DataPack],
    ) -> (Vec<Vec<RawNativeBuffer>>, Vec<RawDataPack>) {
        let mut buffer_arrays = Vec::with_capacity(packs.len());
        for pack in packs {
            let buffers: Vec<RawNativeBuffer> = (0..pack.buffer_count())
                .map(|i| {
                    let (p, size, tag) = pack.raw_parts(i);
                    RawNativeBuffer {
                        p,
                        size: size as u64,
                        tag,
                    }
                })
                .collect();
            buffer_arrays.push(buffers);
        }
        let raw_packs: Vec<RawDataPack> = packs
            .iter()
            .zip(buffer_arrays.iter_mut())
            .map(|(pack, buffers)| RawDataPack {
                buffers: buffers.as_mut_ptr(),
                count: buffers.len() as u64,
                param_position: pack.param_position(),
            })
            .collect();
        (buffer_arrays, raw_packs)
    }
}

impl Drop for SharedLibBackend {
    fn drop(&mut self) {
        let code = unsafe { (self.vt.destroy)(self.engine) };
        if code != 0 {
            log::warn!("backend engine destroy returned code {code}");
        }
    }
}

impl BackendApi for SharedLibBackend {
    fn subscribe_benchmarks(&self) -> Result<Vec<u64>> {
        // Two-call protocol: count query, then fill.
        let mut count = 0u64;
        let code = unsafe {
            (self.vt.subscribe_benchmarks)(self.engine, std::ptr::null_mut(), &mut count)
        };
        self.check(code)?;
        let mut handles = vec![0u64; count as usize];
        let code = unsafe {
            (self.vt.subscribe_benchmarks)(self.engine, handles.as_mut_ptr(), &mut count)
        };
        self.check(code)?;
        handles.truncate(count as usize);
        Ok(handles)
    }

    fn workload_param_count(&self, bench: u64) -> Result<u64> {
        let mut count = 0u64;
        let code =
            unsafe { (self.vt.get_workload_params_details)(self.engine, bench, &mut count) };
        self.check(code)?;
        Ok(count)
    }

    fn describe(&self, bench: u64) -> Result<BenchmarkDescriptor> {
        let mut raw = MaybeUninit::<RawBenchmarkDescriptor>::zeroed();
        let code =
            unsafe { (self.vt.describe_benchmark)(self.engine, bench, raw.as_mut_ptr()) };
        self.check(code)?;
        let raw = unsafe { raw.assume_init() };
        let category = Category::from_code(raw.category).ok_or_else(|| {
            HarnessError::DescriptorMismatch(format!("unknown category code {}", raw.category))
        })?;
        let data_type = DataType::from_code(raw.data_type).ok_or_else(|| {
            HarnessError::DescriptorMismatch(format!("unknown data type code {}", raw.data_type))
        })?;
        let blob = raw.cat_params.reserved;
        Ok(BenchmarkDescriptor {
            workload: raw.workload,
            category,
            data_type,
            cipher_param_mask: raw.cipher_param_mask,
            scheme: raw.scheme,
            security: raw.security,
            other: raw.other,
            cat_params: CategoryParams::decode(category, &blob),
            cat_params_raw: blob,
        })
    }

    fn init_benchmark(&self, bench: u64, w_params: &[WorkloadParam]) -> Result<u64> {
        let raw_params: Vec<RawWorkloadParam> = w_params
            .iter()
            .map(|p| RawWorkloadParam {
                tag: p.tag(),
                value: match *p {
                    WorkloadParam::UInt64(u) => RawWorkloadParamValue { u },
                    WorkloadParam::Int64(i) => RawWorkloadParamValue { i },
                    WorkloadParam::Float64(f) => RawWorkloadParamValue { f },
                },
            })
            .collect();
        let mut out = 0u64;
        let code = unsafe {
            (self.vt.init_benchmark)(
                self.engine,
                bench,
                raw_params.as_ptr(),
                raw_params.len() as u64,
                &mut out,
            )
        };
        self.check(code)?;
        Ok(out)
    }

    fn encode(&self, bench: u64, packs: &[&DataPack]) -> Result<u64> {
        let (_buffers, mut raw_packs) = Self::raw_collection(packs);
        let collection = RawPackCollection {
            packs: raw_packs.as_mut_ptr(),
            count: raw_packs.len() as u64,
        };
        let mut out = 0u64;
        let code = unsafe { (self.vt.encode)(self.engine, bench, &collection, &mut out) };
        self.check(code)?;
        Ok(out)
    }

    fn encrypt(&self, bench: u64, encoded: u64) -> Result<u64> {
        let mut out = 0u64;
        let code = unsafe { (self.vt.encrypt)(self.engine, bench, encoded, &mut out) };
        self.check(code)?;
        Ok(out)
    }

    fn load(&self, bench: u64, handles: &[u64]) -> Result<u64> {
        let mut out = 0u64;
        let code = unsafe {
            (self.vt.load)(
                self.engine,
                bench,
                handles.as_ptr(),
                handles.len() as u64,
                &mut out,
            )
        };
        self.check(code)?;
        Ok(out)
    }

    fn operate(&self, bench: u64, loaded: u64) -> Result<u64> {
        let mut out = 0u64;
        let code = unsafe { (self.vt.operate)(self.engine, bench, loaded, &mut out) };
        self.check(code)?;
        Ok(out)
    }

    fn store(&self, bench: u64, remote: u64) -> Result<u64> {
        let mut out = 0u64;
        let code = unsafe { (self.vt.store)(self.engine, bench, remote, &mut out) };
        self.check(code)?;
        Ok(out)
    }

    fn decrypt(&self, bench: u64, cipher: u64) -> Result<u64> {
        let mut out = 0u64;
        let code = unsafe { (self.vt.decrypt)(self.engine, bench, cipher, &mut out) };
        self.check(code)?;
        Ok(out)
    }

    fn decode_into(&self, bench: u64, encoded: u64, outs: &mut [DataPack]) -> Result<()> {
        let mut buffer_arrays: Vec<Vec<RawNativeBuffer>> = outs
            .iter_mut()
            .map(|pack| {
                (0..pack.buffer_count())
                    .map(|i| {
                        let (p, size, tag) = pack.raw_parts_mut(i);
                        RawNativeBuffer {
                            p,
                            size: size as u64,
                            tag,
                        }
                    })
                    .collect()
            })
            .collect();
        let mut raw_packs: Vec<RawDataPack> = outs
            .iter()
            .zip(buffer_arrays.iter_mut())
            .map(|(pack, buffers)| RawDataPack {
                buffers: buffers.as_mut_ptr(),
                count: buffers.len() as u64,
                param_position: pack.param_position(),
            })
            .collect();
        let mut collection = RawPackCollection {
            packs: raw_packs.as_mut_ptr(),
            count: raw_packs.len() as u64,
        };
        let code = unsafe { (self.vt.decode)(self.engine, bench, encoded, &mut collection) };
        self.check(code)
    }

    fn destroy_handle(&self, handle: u64) -> Result<()> {
        let code = unsafe { (self.vt.destroy_handle)(self.engine, handle) };
        self.check(code)
    }

    fn scheme_name(&self, scheme: i32) -> Result<String> {
        self.read_name(self.vt.get_scheme_name, scheme)
    }

    fn security_name(&self, security: i32) -> Result<String> {
        self.read_name(self.vt.get_security_name, security)
    }

    fn extra_description(&self) -> Result<String> {
        let mut buf = [0u8; STRING_BUF];
        let mut len = STRING_BUF as u64;
        let code = unsafe {
            (self.vt.get_extra_description)(
                self.engine,
                buf.as_mut_ptr() as *mut c_char,
                &mut len,
            )
        };
        self.check(code)?;
        let len = (len as usize).min(STRING_BUF);
        Ok(String::from_utf8_lossy(&buf[..len])
            .trim_end_matches('\0')
            .to_string())
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────
