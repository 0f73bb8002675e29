use std::fs;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{info, warn};

use crate::engine::ExecutionStep;

/// Locations where Adreno (kgsl) and Mali drivers expose GPU memory statistics
pub const GPU_MEMSTAT_PATHS: [&str; 5] = [
  "/sys/kernel/debug/kgsl/kgsl-3d0/memstat",
  "/d/kgsl/kgsl-3d0/memstat",
  "/sys/devices/virtual/kgsl/kgsl-3d0/memstat",
  "/proc/mali/meminfo",
  "/sys/devices/platform/mali/meminfo",
];

/// Wall-clock duration of every stage of a run, in milliseconds
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TimingStats {
  pub model_load_ms: f64,
  pub delegate_init_ms: f64,
  pub tensor_allocation_ms: f64,
  pub input_copy_ms: f64,
  pub inference_ms: f64,
  pub output_copy_ms: f64,
  pub total_ms: f64,
}

/// Runs `f` and returns its result together with the elapsed milliseconds
pub fn time_ms<T>(f: impl FnOnce() -> T) -> (T, f64) {
  let start = Instant::now();
  let value = f();
  (value, start.elapsed().as_secs_f64() * 1000.0)
}

/// Process memory as reported by `/proc/self/status`, in kB
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
  pub vm_kb: usize,
  pub rss_kb: usize,
}

impl MemoryStats {
  /// All zeros when the status file is not readable (non-Linux hosts)
  pub fn capture() -> MemoryStats {
    fs::read_to_string("/proc/self/status")
      .map(|status| MemoryStats::parse_status(&status))
      .unwrap_or_default()
  }

  pub fn parse_status(status: &str) -> MemoryStats {
    let mut stats = MemoryStats::default();
    for line in status.lines() {
      if line.starts_with("VmRSS:") {
        stats.rss_kb = parse_status_value(line);
      } else if line.starts_with("VmSize:") {
        stats.vm_kb = parse_status_value(line);
      }
    }
    stats
  }

  pub fn is_known(&self) -> bool {
    self.rss_kb > 0 || self.vm_kb > 0
  }
}

// "VmRSS:     1234 kB" -> 1234
fn parse_status_value(line: &str) -> usize {
  line.split_whitespace()
    .nth(1)
    .and_then(|v| v.parse().ok())
    .unwrap_or(0)
}

/// Memory snapshots taken after each stage of the runner
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemorySnapshots {
  pub after_model_load: MemoryStats,
  pub after_delegate_init: MemoryStats,
  pub after_tensor_allocation: MemoryStats,
  pub after_inference: MemoryStats,
}

/// Raw driver report of GPU memory usage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpuMemorySnapshot {
  pub source_path: PathBuf,
  pub raw_report: String,
}

impl GpuMemorySnapshot {
  /// Reads the first readable driver statistics file, None when the device exposes none
  pub fn capture() -> Option<GpuMemorySnapshot> {
    GPU_MEMSTAT_PATHS.iter().find_map(|path| {
      fs::read_to_string(path).ok().map(|raw_report| GpuMemorySnapshot {
        source_path: PathBuf::from(path),
        raw_report,
      })
    })
  }
}

/// Where the operators of the execution plan ended up
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpPlacementStats {
  pub total_ops: usize,
  pub gpu_ops: usize,
  pub cpu_ops: usize,
  pub cpu_op_names: Vec<String>,
}

impl OpPlacementStats {
  pub fn from_plan(plan: &[ExecutionStep]) -> OpPlacementStats {
    let mut stats = OpPlacementStats { total_ops: plan.len(), ..Default::default() };
    for step in plan {
      if step.delegated {
        stats.gpu_ops += 1;
      } else {
        stats.cpu_ops += 1;
        stats.cpu_op_names.push(step.op_name.clone());
      }
    }
    stats
  }

  pub fn gpu_percent(&self) -> f64 {
    percent(self.gpu_ops, self.total_ops)
  }

  pub fn cpu_percent(&self) -> f64 {
    percent(self.cpu_ops, self.total_ops)
  }
}

fn percent(part: usize, total: usize) -> f64 {
  if total == 0 {
    0.0
  } else {
    100.0 * part as f64 / total as f64
  }
}

/// Everything collected during one run, for the final report
#[derive(Debug, Clone, Default)]
pub struct ProfileReport {
  pub timing: TimingStats,
  pub memory: Option<MemorySnapshots>,
  pub gpu_after_delegate_init: Option<GpuMemorySnapshot>,
  pub gpu_after_inference: Option<GpuMemorySnapshot>,
  pub placement: OpPlacementStats,
}

impl ProfileReport {
  /// Logs timing, memory, GPU memory and operator placement. `memory` is None when profiling is off.
  pub fn log(&self) {
    let t = &self.timing;
    info!("=== Profiling Information ===");
    info!("Model Load:         {:.2} ms", t.model_load_ms);
    info!("Delegate Init:      {:.2} ms", t.delegate_init_ms);
    info!("Tensor Allocation:  {:.2} ms", t.tensor_allocation_ms);
    info!("Input Copy:         {:.2} ms", t.input_copy_ms);
    info!("Inference:          {:.2} ms", t.inference_ms);
    info!("Output Copy:        {:.2} ms", t.output_copy_ms);
    info!("Total Runtime:      {:.2} ms", t.total_ms);

    match &self.memory {
      Some(memory) => {
        info!("=== Memory Snapshots (kB) ===");
        for (label, stats) in [("After Model Load", memory.after_model_load),
                               ("After Delegate", memory.after_delegate_init),
                               ("After Allocation", memory.after_tensor_allocation),
                               ("After Inference", memory.after_inference)] {
          info!("{:<18}  RSS={}, VM={}", format!("{}:", label), stats.rss_kb, stats.vm_kb);
        }

        info!("=== GPU Memory Snapshots ===");
        for (label, snapshot) in [("After Delegate Init", &self.gpu_after_delegate_init),
                                  ("After Inference", &self.gpu_after_inference)] {
          match snapshot {
            Some(s) => info!("{} (source: {}):\n{}", label, s.source_path.display(), s.raw_report),
            None => info!("{}: GPU mem stats unavailable on this device", label),
          }
        }
      }
      None => info!("Memory profiling disabled."),
    }

    let p = &self.placement;
    info!("=== Operation Placement ===");
    info!("Total Operations:   {}", p.total_ops);
    info!("GPU Operations:     {} ({:.1}%)", p.gpu_ops, p.gpu_percent());
    info!("CPU Operations:     {} ({:.1}%)", p.cpu_ops, p.cpu_percent());
    if p.cpu_ops == 0 && p.total_ops > 0 {
      info!("GPU delegation: All ops executed on GPU.");
    } else if p.cpu_ops > 0 {
      warn!("GPU delegation: {} ops executed on CPU fallback.", p.cpu_ops);
    }
    if !p.cpu_op_names.is_empty() {
      info!("CPU Operations: {}", p.cpu_op_names.join(", "));
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_proc_status_lines() {
    let status = "Name:\trunner\nVmPeak:\t  999 kB\nVmSize:\t  20480 kB\nVmRSS:\t    5120 kB\nThreads: 1\n";
    let stats = MemoryStats::parse_status(status);
    assert_eq!(stats, MemoryStats { vm_kb: 20480, rss_kb: 5120 });
    assert!(stats.is_known());
    assert!(!MemoryStats::parse_status("VmRSS: garbage").is_known());
  }

  #[test]
  fn placement_counts_delegated_steps() {
    let plan = vec![
      ExecutionStep { delegated: true, op_name: "Conv".to_string() },
      ExecutionStep { delegated: false, op_name: "Softmax".to_string() },
      ExecutionStep { delegated: true, op_name: "Relu".to_string() },
      ExecutionStep { delegated: true, op_name: "Add".to_string() },
    ];
    let stats = OpPlacementStats::from_plan(&plan);
    assert_eq!(stats.total_ops, 4);
    assert_eq!(stats.gpu_ops, 3);
    assert_eq!(stats.cpu_op_names, vec!["Softmax".to_string()]);
    assert_eq!(stats.gpu_percent(), 75.0);
    assert_eq!(OpPlacementStats::default().cpu_percent(), 0.0);
  }

  #[test]
  fn timing_helper_returns_the_closure_value() {
    let (value, ms) = time_ms(|| 6 * 7);
    assert_eq!(value, 42);
    assert!(ms >= 0.0);
  }
}
