// matcher.rs — Descriptor matching and sealed description tokens
//
// One matcher is registered per cataloged workload. Given a backend's
// descriptor and a candidate workload-parameter vector, a matcher either
// produces the human-readable workload name (supported) or nothing. On
// success it seals a DescriptionToken coupling itself, the descriptor, the
// parameters, and the run configuration; only a benchmark presenting the
// same matcher identity can unseal it, so a descriptor can never be wired
// to the wrong benchmark class.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::abi::BackendApi;
use crate::config::Config;
use crate::error::{HarnessError, Result};
use crate::path;
use crate::workload::{
    BenchmarkDescriptor, Category, CategoryParams, Workload, WorkloadParam,
};

// ── Matcher identity ───────────────────────────────────────────────────────

/// Opaque identity of one matcher instance; sealing and unsealing compare
/// these values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MatcherId(u32);

static NEXT_MATCHER_ID: AtomicU32 = AtomicU32::new(1);

impl MatcherId {
    fn fresh() -> Self {
        MatcherId(NEXT_MATCHER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

// ── Matcher ────────────────────────────────────────────────────────────────

/// Matcher for a single workload. All matching rules are table-driven off
/// the workload catalog: enum membership, parameter arity and tags, and
/// value domains.
#[derive(Debug)]
pub struct WorkloadMatcher {
    id: MatcherId,
    workload: Workload,
}

impl WorkloadMatcher {
    pub fn new(workload: Workload) -> Self {
        Self {
            id: MatcherId::fresh(),
            workload,
        }
    }

    pub fn id(&self) -> MatcherId {
        self.id
    }

    pub fn workload(&self) -> Workload {
        self.workload
    }

    /// Returns the workload name if this matcher supports the descriptor
    /// with the given parameters, `None` otherwise.
    pub fn try_match(
        &self,
        descriptor: &BenchmarkDescriptor,
        w_params: &[WorkloadParam],
    ) -> Option<&'static str> {
        if Workload::from_code(descriptor.workload) != Some(self.workload) {
            return None;
        }
        if w_params.len() != self.workload.workload_param_count() {
            return None;
        }
        // Every cataloged workload is configured by positive u64 scalars
        // (vector lengths, matrix dimensions, feature counts).
        if !w_params.iter().all(|p| matches!(p.as_u64(), Some(v) if v > 0)) {
            return None;
        }
        Some(self.workload.name())
    }

    /// Produce a sealed token for a supported descriptor. Fails with
    /// `DescriptorMismatch` when `try_match` rejects the pair.
    pub fn seal(
        &self,
        backend: &dyn BackendApi,
        bench_handle: u64,
        descriptor: BenchmarkDescriptor,
        w_params: Vec<WorkloadParam>,
        config: Config,
    ) -> Result<DescriptionToken> {
        let name = self.try_match(&descriptor, &w_params).ok_or_else(|| {
            HarnessError::DescriptorMismatch(format!(
                "workload code {:#x} with params {w_params:?} not supported by the {} matcher",
                descriptor.workload,
                self.workload
            ))
        })?;
        let scheme_name = backend.scheme_name(descriptor.scheme)?;
        let security_name = backend.security_name(descriptor.security)?;
        let extra = backend.extra_description().unwrap_or_default();
        let report_path = path::canonical_path(
            self.workload,
            &descriptor,
            &w_params,
            &scheme_name,
            &security_name,
        );
        let header = render_header(
            name,
            &descriptor,
            &w_params,
            &scheme_name,
            &security_name,
            &extra,
        )?;
        Ok(DescriptionToken {
            matcher_id: self.id,
            workload: self.workload,
            workload_name: name.to_string(),
            bench_handle,
            descriptor,
            w_params,
            config,
            header,
            report_path,
        })
    }
}

// ── Header ─────────────────────────────────────────────────────────────────

/// CSV-style description of the matched configuration; becomes the leading
/// block of `report.csv`. Rows go through a csv writer so backend-provided
/// strings (scheme/security names, extra description) cannot break the
/// file, whatever commas, quotes, or newlines they carry.
fn render_header(
    name: &str,
    descriptor: &BenchmarkDescriptor,
    w_params: &[WorkloadParam],
    scheme_name: &str,
    security_name: &str,
    extra: &str,
) -> Result<String> {
    let mut rows: Vec<Vec<String>> = vec![
        vec!["benchmark".into(), name.into()],
        vec!["workload".into(), format!("{:#x}", descriptor.workload)],
    ];
    let mut params = vec!["workload_params".to_string()];
    params.extend(w_params.iter().map(|p| p.to_string()));
    rows.push(params);
    rows.push(vec!["category".into(), descriptor.category.to_string()]);
    rows.push(vec!["data_type".into(), descriptor.data_type.to_string()]);
    rows.push(vec![
        "cipher_param_mask".into(),
        path::cipher_mask_text(descriptor.cipher_param_mask),
    ]);
    match descriptor.cat_params {
        CategoryParams::Latency {
            warmup_iterations,
            min_test_time_ms,
        } => {
            rows.push(vec![
                "warmup_iterations".into(),
                warmup_iterations.to_string(),
            ]);
            rows.push(vec!["min_test_time_ms".into(), min_test_time_ms.to_string()]);
        }
        CategoryParams::Offline { data_count } => {
            let mut counts = vec!["data_counts".to_string()];
            counts.extend(
                data_count
                    .iter()
                    .take_while(|&&c| c != 0)
                    .map(|c| c.to_string()),
            );
            rows.push(counts);
        }
    }
    rows.push(vec!["scheme".into(), scheme_name.into()]);
    rows.push(vec!["security".into(), security_name.into()]);
    rows.push(vec!["extra".into(), descriptor.other.to_string()]);
    if !extra.is_empty() {
        rows.push(vec!["backend_description".into(), extra.into()]);
    }

    let mut w = csv::WriterBuilder::new()
        .flexible(true)
        .from_writer(Vec::new());
    for row in &rows {
        w.write_record(row)
            .map_err(|e| HarnessError::Resource(format!("report header: {e}")))?;
    }
    let bytes = w
        .into_inner()
        .map_err(|e| HarnessError::Resource(format!("report header: {e}")))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

// ── Sealed token ───────────────────────────────────────────────────────────

/// Couples a matcher, a backend descriptor, the matched workload
/// parameters, and the run configuration. The descriptive fields are
/// public reads; the benchmark-construction fields are only reachable via
/// `unseal` with the sealing matcher's identity.
#[derive(Debug, Clone)]
pub struct DescriptionToken {
    matcher_id: MatcherId,
    workload: Workload,
    workload_name: String,
    bench_handle: u64,
    descriptor: BenchmarkDescriptor,
    w_params: Vec<WorkloadParam>,
    config: Config,
    header: String,
    report_path: String,
}

/// Read access to the sealed construction payload.
pub struct Unsealed<'a> {
    pub bench_handle: u64,
    pub descriptor: &'a BenchmarkDescriptor,
    pub w_params: &'a [WorkloadParam],
    pub config: &'a Config,
}

impl DescriptionToken {
    pub fn workload(&self) -> Workload {
        self.workload
    }

    pub fn workload_name(&self) -> &str {
        &self.workload_name
    }

    pub fn category(&self) -> Category {
        self.descriptor.category
    }

    pub fn header(&self) -> &str {
        &self.header
    }

    pub fn report_path(&self) -> &str {
        &self.report_path
    }

    /// Open the token. Fails with `PreconditionFailed` unless the caller
    /// presents the identity of the matcher that sealed it.
    pub fn unseal(&self, caller: MatcherId) -> Result<Unsealed<'_>> {
        if caller != self.matcher_id {
            return Err(HarnessError::Precondition(format!(
                "token for {} sealed by matcher {:?}, opened with {:?}",
                self.report_path, self.matcher_id, caller
            )));
        }
        Ok(Unsealed {
            bench_handle: self.bench_handle,
            descriptor: &self.descriptor,
            w_params: &self.w_params,
            config: &self.config,
        })
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pack::DataPack;
    use crate::workload::{DataType, CAT_PARAMS_BYTES};

    fn descriptor_for(workload: Workload) -> BenchmarkDescriptor {
        BenchmarkDescriptor {
            workload: workload.code(),
            category: Category::Latency,
            data_type: DataType::Float64,
            cipher_param_mask: 0,
            scheme: 1,
            security: 1,
            other: 0,
            cat_params: CategoryParams::Latency {
                warmup_iterations: 0,
                min_test_time_ms: 0,
            },
            cat_params_raw: [0u8; CAT_PARAMS_BYTES],
        }
    }

    #[test]
    fn matches_own_workload_only() {
        let m = WorkloadMatcher::new(Workload::DotProduct);
        let params = [WorkloadParam::UInt64(4)];
        assert_eq!(
            m.try_match(&descriptor_for(Workload::DotProduct), &params),
            Some("DotProduct")
        );
        assert_eq!(
            m.try_match(&descriptor_for(Workload::EltwiseAdd), &params),
            None
        );
    }

    #[test]
    fn rejects_wrong_arity() {
        let m = WorkloadMatcher::new(Workload::MatrixMultiply);
        let desc = descriptor_for(Workload::MatrixMultiply);
        assert!(m.try_match(&desc, &[WorkloadParam::UInt64(2)]).is_none());
        let good = [
            WorkloadParam::UInt64(2),
            WorkloadParam::UInt64(3),
            WorkloadParam::UInt64(2),
        ];
        assert_eq!(m.try_match(&desc, &good), Some("MatMul"));
    }

    #[test]
    fn rejects_wrong_tag_and_domain() {
        let m = WorkloadMatcher::new(Workload::EltwiseAdd);
        let desc = descriptor_for(Workload::EltwiseAdd);
        assert!(m.try_match(&desc, &[WorkloadParam::Int64(4)]).is_none());
        assert!(m.try_match(&desc, &[WorkloadParam::Float64(4.0)]).is_none());
        assert!(m.try_match(&desc, &[WorkloadParam::UInt64(0)]).is_none());
    }

    #[test]
    fn rejects_unknown_workload_code() {
        let m = WorkloadMatcher::new(Workload::EltwiseAdd);
        let mut desc = descriptor_for(Workload::EltwiseAdd);
        desc.workload = 0xdead;
        assert!(m.try_match(&desc, &[WorkloadParam::UInt64(4)]).is_none());
    }

    #[test]
    fn matcher_ids_are_unique() {
        let a = WorkloadMatcher::new(Workload::EltwiseAdd);
        let b = WorkloadMatcher::new(Workload::EltwiseAdd);
        assert_ne!(a.id(), b.id());
    }

    /// Backend that answers name queries with CSV-hostile strings.
    struct NastyNameBackend;

    impl BackendApi for NastyNameBackend {
        fn subscribe_benchmarks(&self) -> Result<Vec<u64>> {
            Ok(vec![])
        }
        fn workload_param_count(&self, _: u64) -> Result<u64> {
            Ok(1)
        }
        fn describe(&self, _: u64) -> Result<BenchmarkDescriptor> {
            Err(HarnessError::Precondition("unused".into()))
        }
        fn init_benchmark(&self, _: u64, _: &[WorkloadParam]) -> Result<u64> {
            Ok(0)
        }
        fn encode(&self, _: u64, _: &[&DataPack]) -> Result<u64> {
            Ok(0)
        }
        fn encrypt(&self, _: u64, _: u64) -> Result<u64> {
            Ok(0)
        }
        fn load(&self, _: u64, _: &[u64]) -> Result<u64> {
            Ok(0)
        }
        fn operate(&self, _: u64, _: u64) -> Result<u64> {
            Ok(0)
        }
        fn store(&self, _: u64, _: u64) -> Result<u64> {
            Ok(0)
        }
        fn decrypt(&self, _: u64, _: u64) -> Result<u64> {
            Ok(0)
        }
        fn decode_into(&self, _: u64, _: u64, _: &mut [DataPack]) -> Result<()> {
            Ok(())
        }
        fn destroy_handle(&self, _: u64) -> Result<()> {
            Ok(())
        }
        fn scheme_name(&self, _: i32) -> Result<String> {
            Ok("BGV, \"RNS\" variant".into())
        }
        fn security_name(&self, _: i32) -> Result<String> {
            Ok("128\nbits".into())
        }
        fn extra_description(&self) -> Result<String> {
            Ok("line1\nline2,with,commas".into())
        }
    }

    #[test]
    fn header_escapes_backend_provided_strings() {
        let m = WorkloadMatcher::new(Workload::DotProduct);
        let token = m
            .seal(
                &NastyNameBackend,
                1,
                descriptor_for(Workload::DotProduct),
                vec![WorkloadParam::UInt64(4)],
                Config::default(),
            )
            .unwrap();

        // Every row must parse back, with the hostile values intact in
        // their own field.
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .has_headers(false)
            .from_reader(token.header().as_bytes());
        let mut fields = std::collections::HashMap::new();
        for record in reader.records() {
            let record = record.expect("header row must stay parseable");
            if let (Some(key), Some(value)) = (record.get(0), record.get(1)) {
                fields.insert(key.to_string(), value.to_string());
            }
        }
        assert_eq!(
            fields.get("scheme").map(String::as_str),
            Some("BGV, \"RNS\" variant")
        );
        assert_eq!(
            fields.get("security").map(String::as_str),
            Some("128\nbits")
        );
        assert_eq!(
            fields.get("backend_description").map(String::as_str),
            Some("line1\nline2,with,commas")
        );
    }
}
