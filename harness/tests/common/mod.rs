#![allow(dead_code)] // each test binary uses a different slice of the mock

// Shared in-process mock backend for integration tests.
//
// Implements the BackendApi seam with an independent (deliberately
// re-derived) computation of every workload, so validation cross-checks
// two implementations of the math. Records every pipeline call, which
// positions were encrypted, and which handles were destroyed; individual
// steps can be made to fail with an injected error code.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use cipherbench::abi::BackendApi;
use cipherbench::datagen::Element;
use cipherbench::error::{HarnessError, Result};
use cipherbench::pack::DataPack;
use cipherbench::workload::{
    BenchmarkDescriptor, Category, CategoryParams, DataType, Workload, WorkloadParam,
    CAT_PARAMS_BYTES, MAX_OP_PARAMS,
};

// ── Descriptor builders ────────────────────────────────────────────────────

pub fn latency_descriptor(
    workload: Workload,
    data_type: DataType,
    mask: u32,
    warmup_iterations: u64,
    min_test_time_ms: u64,
) -> BenchmarkDescriptor {
    let cat_params = CategoryParams::Latency {
        warmup_iterations,
        min_test_time_ms,
    };
    BenchmarkDescriptor {
        workload: workload.code(),
        category: Category::Latency,
        data_type,
        cipher_param_mask: mask,
        scheme: 1,
        security: 1,
        other: 0,
        cat_params_raw: cat_params.encode(),
        cat_params,
    }
}

pub fn offline_descriptor(
    workload: Workload,
    data_type: DataType,
    mask: u32,
    counts: &[u64],
) -> BenchmarkDescriptor {
    let mut data_count = [0u64; MAX_OP_PARAMS];
    data_count[..counts.len()].copy_from_slice(counts);
    let cat_params = CategoryParams::Offline { data_count };
    BenchmarkDescriptor {
        workload: workload.code(),
        category: Category::Offline,
        data_type,
        cipher_param_mask: mask,
        scheme: 1,
        security: 1,
        other: 0,
        cat_params_raw: cat_params.encode(),
        cat_params,
    }
}

// ── Mock state ─────────────────────────────────────────────────────────────

/// Cleartext copy of one op parameter's sample batch.
#[derive(Debug, Clone)]
struct ClearPack {
    param_position: u64,
    buffers: Vec<Vec<u8>>,
}

#[derive(Debug, Clone)]
enum MockObject {
    Encoded { packs: Vec<ClearPack> },
    Cipher { packs: Vec<ClearPack> },
    Loaded { packs: Vec<ClearPack>, cipher: bool },
    Result { buffers: Vec<Vec<u8>>, cipher: bool },
}

#[derive(Debug, Clone)]
struct BenchInstance {
    workload: Workload,
    dims: Vec<u64>,
    data_type: DataType,
}

#[derive(Debug, Default)]
struct MockState {
    next_handle: u64,
    objects: HashMap<u64, MockObject>,
    instances: HashMap<u64, BenchInstance>,
    pub calls: Vec<&'static str>,
    pub encrypted_positions: Vec<u64>,
    pub destroyed: Vec<u64>,
    /// First buffer of the first pack of every encode call; lets tests
    /// compare the bytes a benchmark was fed across runs.
    pub encode_fingerprints: Vec<Vec<u8>>,
}

pub struct MockBackend {
    benchmarks: Vec<(u64, BenchmarkDescriptor)>,
    state: RefCell<MockState>,
    /// Step name that should fail with a backend error, if any.
    fail_step: Option<&'static str>,
    /// Corrupt decoded results to provoke validation failures.
    corrupt_results: bool,
}

impl MockBackend {
    pub fn new(descriptors: Vec<BenchmarkDescriptor>) -> Rc<Self> {
        Rc::new(Self {
            benchmarks: descriptors
                .into_iter()
                .enumerate()
                .map(|(i, d)| (0x100 + i as u64, d))
                .collect(),
            state: RefCell::new(MockState::default()),
            fail_step: None,
            corrupt_results: false,
        })
    }

    pub fn failing_at(descriptors: Vec<BenchmarkDescriptor>, step: &'static str) -> Rc<Self> {
        let mut backend = Self::new(descriptors);
        Rc::get_mut(&mut backend).unwrap().fail_step = Some(step);
        backend
    }

    pub fn corrupting(descriptors: Vec<BenchmarkDescriptor>) -> Rc<Self> {
        let mut backend = Self::new(descriptors);
        Rc::get_mut(&mut backend).unwrap().corrupt_results = true;
        backend
    }

    pub fn call_count(&self, step: &str) -> usize {
        self.state
            .borrow()
            .calls
            .iter()
            .filter(|c| **c == step)
            .count()
    }

    pub fn encrypted_positions(&self) -> Vec<u64> {
        self.state.borrow().encrypted_positions.clone()
    }

    pub fn destroyed_handles(&self) -> Vec<u64> {
        self.state.borrow().destroyed.clone()
    }

    pub fn encode_fingerprints(&self) -> Vec<Vec<u8>> {
        self.state.borrow().encode_fingerprints.clone()
    }

    pub fn live_object_count(&self) -> usize {
        self.state.borrow().objects.len()
    }

    fn step(&self, name: &'static str) -> Result<()> {
        self.state.borrow_mut().calls.push(name);
        if self.fail_step == Some(name) {
            return Err(HarnessError::Backend {
                code: 42,
                message: format!("injected failure in {name}"),
            });
        }
        Ok(())
    }

    fn store_object(&self, object: MockObject) -> u64 {
        let mut state = self.state.borrow_mut();
        state.next_handle += 1;
        let handle = state.next_handle;
        state.objects.insert(handle, object);
        handle
    }

    fn take_object(&self, handle: u64) -> Result<MockObject> {
        self.state
            .borrow()
            .objects
            .get(&handle)
            .cloned()
            .ok_or_else(|| HarnessError::Backend {
                code: 2,
                message: format!("unknown handle {handle}"),
            })
    }

    // ── Independent workload math ──────────────────────────────────────

    fn compute(&self, bench: u64, packs: &[ClearPack]) -> Result<Vec<Vec<u8>>> {
        let instance = self
            .state
            .borrow()
            .instances
            .get(&bench)
            .cloned()
            .ok_or_else(|| HarnessError::Backend {
                code: 3,
                message: format!("unknown benchmark handle {bench}"),
            })?;
        let mut by_position: Vec<&ClearPack> = packs.iter().collect();
        by_position.sort_by_key(|p| p.param_position);
        match instance.data_type {
            DataType::Int32 => compute_typed::<i32>(&instance, &by_position),
            DataType::Int64 => compute_typed::<i64>(&instance, &by_position),
            DataType::Float32 => compute_typed::<f32>(&instance, &by_position),
            DataType::Float64 => compute_typed::<f64>(&instance, &by_position),
        }
    }
}

fn from_bytes<T: Element>(bytes: &[u8]) -> Vec<T> {
    let mut out = Vec::with_capacity(bytes.len() / std::mem::size_of::<T>());
    for chunk in bytes.chunks_exact(std::mem::size_of::<T>()) {
        let mut v = T::zero();
        unsafe {
            std::ptr::copy_nonoverlapping(
                chunk.as_ptr(),
                &mut v as *mut T as *mut u8,
                std::mem::size_of::<T>(),
            );
        }
        out.push(v);
    }
    out
}

fn to_bytes<T: Element>(values: &[T]) -> Vec<u8> {
    let mut out = vec![0u8; values.len() * std::mem::size_of::<T>()];
    unsafe {
        std::ptr::copy_nonoverlapping(
            values.as_ptr() as *const u8,
            out.as_mut_ptr(),
            out.len(),
        );
    }
    out
}

/// Cartesian product over the parameter batches, row-major (last parameter
/// varies fastest), one result buffer per coordinate.
fn compute_typed<T: Element>(
    instance: &BenchInstance,
    packs: &[&ClearPack],
) -> Result<Vec<Vec<u8>>> {
    let batches: Vec<usize> = packs.iter().map(|p| p.buffers.len()).collect();
    let total: usize = batches.iter().product();
    let mut results = Vec::with_capacity(total);
    let mut coords = vec![0usize; batches.len()];
    for _ in 0..total {
        let operand =
            |slot: usize| -> Vec<T> { from_bytes(&packs[slot].buffers[coords[slot]]) };
        let result: Vec<T> = match instance.workload {
            Workload::EltwiseAdd => {
                let (a, b) = (operand(0), operand(1));
                (0..a.len()).map(|i| a[i].add(b[i])).collect()
            }
            Workload::EltwiseMult => {
                let (a, b) = (operand(0), operand(1));
                (0..a.len()).map(|i| a[i].mul(b[i])).collect()
            }
            Workload::DotProduct => {
                let (a, b) = (operand(0), operand(1));
                let mut acc = T::zero();
                for i in 0..a.len() {
                    acc = acc.add(a[i].mul(b[i]));
                }
                vec![acc]
            }
            Workload::MatrixMultiply => {
                let (m, k, n) = (
                    instance.dims[0] as usize,
                    instance.dims[1] as usize,
                    instance.dims[2] as usize,
                );
                let (a, b) = (operand(0), operand(1));
                let mut out = vec![T::zero(); m * n];
                for r in 0..m {
                    for c in 0..n {
                        let mut acc = T::zero();
                        for j in 0..k {
                            acc = acc.add(a[r * k + j].mul(b[j * n + c]));
                        }
                        out[r * n + c] = acc;
                    }
                }
                out
            }
            Workload::LogReg
            | Workload::LogRegPolyD3
            | Workload::LogRegPolyD5
            | Workload::LogRegPolyD7 => {
                let (w, b, x) = (operand(0), operand(1), operand(2));
                let mut act = b[0].to_f64();
                for i in 0..w.len() {
                    act += w[i].to_f64() * x[i].to_f64();
                }
                vec![T::from_f64(mock_sigmoid(instance.workload, act))]
            }
        };
        results.push(to_bytes(&result));
        // advance row-major coordinates
        for slot in (0..coords.len()).rev() {
            coords[slot] += 1;
            if coords[slot] < batches[slot] {
                break;
            }
            coords[slot] = 0;
        }
    }
    Ok(results)
}

/// Re-derived sigmoid forms (not shared with the harness generator).
fn mock_sigmoid(workload: Workload, x: f64) -> f64 {
    let poly = |coeffs: &[f64]| {
        let mut acc = 0.0;
        for &c in coeffs.iter().rev() {
            acc = acc * x + c;
        }
        acc
    };
    match workload {
        Workload::LogReg => 1.0 / (1.0 + (-x).exp()),
        Workload::LogRegPolyD3 => poly(&[0.5, 0.15012, 0.0, -0.0015930078125]),
        Workload::LogRegPolyD5 => poly(&[
            0.5,
            0.19131,
            0.0,
            -0.0045963,
            0.0,
            0.0000412332000732421875,
        ]),
        Workload::LogRegPolyD7 => poly(&[
            0.5,
            0.21687,
            0.0,
            -0.00819154296875,
            0.0,
            0.0001658331298828125,
            0.0,
            -0.00000119561672210693359375,
        ]),
        _ => unreachable!("not a logreg workload"),
    }
}

// ── BackendApi implementation ──────────────────────────────────────────────

impl BackendApi for MockBackend {
    fn subscribe_benchmarks(&self) -> Result<Vec<u64>> {
        Ok(self.benchmarks.iter().map(|(h, _)| *h).collect())
    }

    fn workload_param_count(&self, bench: u64) -> Result<u64> {
        self.benchmarks
            .iter()
            .find(|(h, _)| *h == bench)
            .map(|(_, d)| {
                Workload::from_code(d.workload)
                    .map(|w| w.workload_param_count() as u64)
                    .unwrap_or(1)
            })
            .ok_or_else(|| HarnessError::Backend {
                code: 1,
                message: "unknown benchmark".into(),
            })
    }

    fn describe(&self, bench: u64) -> Result<BenchmarkDescriptor> {
        self.benchmarks
            .iter()
            .find(|(h, _)| *h == bench)
            .map(|(_, d)| d.clone())
            .ok_or_else(|| HarnessError::Backend {
                code: 1,
                message: "unknown benchmark".into(),
            })
    }

    fn init_benchmark(&self, bench: u64, w_params: &[WorkloadParam]) -> Result<u64> {
        self.step("init_benchmark")?;
        let descriptor = self.describe(bench)?;
        let workload = Workload::from_code(descriptor.workload).ok_or_else(|| {
            HarnessError::Backend {
                code: 4,
                message: "unsupported workload".into(),
            }
        })?;
        let dims: Vec<u64> = w_params.iter().filter_map(|p| p.as_u64()).collect();
        if dims.len() != w_params.len() {
            return Err(HarnessError::Backend {
                code: 5,
                message: "workload params must be u64".into(),
            });
        }
        let mut state = self.state.borrow_mut();
        state.next_handle += 1;
        let handle = state.next_handle;
        state.instances.insert(
            handle,
            BenchInstance {
                workload,
                dims,
                data_type: descriptor.data_type,
            },
        );
        Ok(handle)
    }

    fn encode(&self, _bench: u64, packs: &[&DataPack]) -> Result<u64> {
        self.step("encode")?;
        let clear: Vec<ClearPack> = packs
            .iter()
            .map(|p| ClearPack {
                param_position: p.param_position(),
                buffers: (0..p.buffer_count()).map(|i| p.bytes(i).to_vec()).collect(),
            })
            .collect();
        if let Some(first) = clear.first().and_then(|p| p.buffers.first()) {
            self.state
                .borrow_mut()
                .encode_fingerprints
                .push(first.clone());
        }
        Ok(self.store_object(MockObject::Encoded { packs: clear }))
    }

    fn encrypt(&self, _bench: u64, encoded: u64) -> Result<u64> {
        self.step("encrypt")?;
        let object = self.take_object(encoded)?;
        let packs = match object {
            MockObject::Encoded { packs } => packs,
            _ => {
                return Err(HarnessError::Backend {
                    code: 6,
                    message: "encrypt expects an encoded handle".into(),
                })
            }
        };
        self.state
            .borrow_mut()
            .encrypted_positions
            .extend(packs.iter().map(|p| p.param_position));
        Ok(self.store_object(MockObject::Cipher { packs }))
    }

    fn load(&self, _bench: u64, handles: &[u64]) -> Result<u64> {
        self.step("load")?;
        let mut merged = Vec::new();
        let mut cipher = false;
        for &h in handles {
            match self.take_object(h)? {
                MockObject::Encoded { packs } => merged.extend(packs),
                MockObject::Cipher { packs } => {
                    cipher = true;
                    merged.extend(packs);
                }
                _ => {
                    return Err(HarnessError::Backend {
                        code: 7,
                        message: "load expects encoded or cipher handles".into(),
                    })
                }
            }
        }
        Ok(self.store_object(MockObject::Loaded {
            packs: merged,
            cipher,
        }))
    }

    fn operate(&self, bench: u64, loaded: u64) -> Result<u64> {
        self.step("operate")?;
        let (packs, cipher) = match self.take_object(loaded)? {
            MockObject::Loaded { packs, cipher } => (packs, cipher),
            _ => {
                return Err(HarnessError::Backend {
                    code: 8,
                    message: "operate expects a loaded handle".into(),
                })
            }
        };
        let buffers = self.compute(bench, &packs)?;
        Ok(self.store_object(MockObject::Result { buffers, cipher }))
    }

    fn store(&self, _bench: u64, remote: u64) -> Result<u64> {
        self.step("store")?;
        let object = self.take_object(remote)?;
        match object {
            MockObject::Result { .. } => Ok(self.store_object(object)),
            _ => Err(HarnessError::Backend {
                code: 9,
                message: "store expects an operation result".into(),
            }),
        }
    }

    fn decrypt(&self, _bench: u64, handle: u64) -> Result<u64> {
        self.step("decrypt")?;
        match self.take_object(handle)? {
            MockObject::Result {
                buffers,
                cipher: true,
            } => Ok(self.store_object(MockObject::Result {
                buffers,
                cipher: false,
            })),
            MockObject::Result { cipher: false, .. } => Err(HarnessError::Backend {
                code: 10,
                message: "decrypt called on plaintext result".into(),
            }),
            _ => Err(HarnessError::Backend {
                code: 10,
                message: "decrypt expects a stored result".into(),
            }),
        }
    }

    fn decode_into(&self, _bench: u64, encoded: u64, outs: &mut [DataPack]) -> Result<()> {
        self.step("decode")?;
        let buffers = match self.take_object(encoded)? {
            MockObject::Result {
                buffers,
                cipher: false,
            } => buffers,
            MockObject::Result { cipher: true, .. } => {
                return Err(HarnessError::Backend {
                    code: 11,
                    message: "decode called on ciphertext result".into(),
                })
            }
            _ => {
                return Err(HarnessError::Backend {
                    code: 11,
                    message: "decode expects a result handle".into(),
                })
            }
        };
        let out = &mut outs[0];
        if out.buffer_count() != buffers.len() {
            return Err(HarnessError::Backend {
                code: 12,
                message: format!(
                    "result batch mismatch: harness expects {}, backend computed {}",
                    out.buffer_count(),
                    buffers.len()
                ),
            });
        }
        for (i, buffer) in buffers.iter().enumerate() {
            let dst = out.bytes_mut(i);
            dst.copy_from_slice(buffer);
            if self.corrupt_results {
                for b in dst.iter_mut() {
                    *b = b.wrapping_add(0x55);
                }
            }
        }
        Ok(())
    }

    fn destroy_handle(&self, handle: u64) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.objects.remove(&handle);
        state.instances.remove(&handle);
        state.destroyed.push(handle);
        Ok(())
    }

    fn scheme_name(&self, scheme: i32) -> Result<String> {
        Ok(format!("MockScheme{scheme}"))
    }

    fn security_name(&self, _security: i32) -> Result<String> {
        Ok("128 bits".into())
    }

    fn extra_description(&self) -> Result<String> {
        Ok("in-process mock".into())
    }
}
