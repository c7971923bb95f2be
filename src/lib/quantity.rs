//! Kubernetes quantity strings <-> numbers.
//!
//! CPU is handled in cores (`"250m"` -> `0.25`), memory in bytes (`"128Mi"` -> `134217728`).

use crate::lib::model::ResourceKind;

const KIB: f64 = 1024.0;
const MIB: f64 = KIB * 1024.0;
const GIB: f64 = MIB * 1024.0;

// Tolerance for float noise before rounding up to the next unit
const EPSILON: f64 = 1e-6;

/// Parse a CPU quantity into cores
pub fn parse_cpu(raw: &str) -> Option<f64> {
    let s = raw.trim();
    let (number, scale) = if let Some(n) = s.strip_suffix('m') {
        (n, 1e-3)
    } else if let Some(n) = s.strip_suffix('u') {
        (n, 1e-6)
    } else if let Some(n) = s.strip_suffix('n') {
        (n, 1e-9)
    } else {
        (s, 1.0)
    };

    let value = number.parse::<f64>().ok()?;
    (value.is_finite() && value >= 0.0).then_some(value * scale)
}

/// Parse a memory quantity into bytes
pub fn parse_memory(raw: &str) -> Option<f64> {
    let s = raw.trim();
    const SUFFIXES: [(&str, f64); 12] = [
        ("Ki", KIB),
        ("Mi", MIB),
        ("Gi", GIB),
        ("Ti", GIB * KIB),
        ("Pi", GIB * MIB),
        ("Ei", GIB * GIB),
        ("k", 1e3),
        ("K", 1e3),
        ("M", 1e6),
        ("G", 1e9),
        ("T", 1e12),
        ("P", 1e15),
    ];

    let (number, scale) = SUFFIXES
        .iter()
        .find_map(|(suffix, scale)| s.strip_suffix(suffix).map(|n| (n, *scale)))
        .unwrap_or((s, 1.0));

    // `E` alone is the exa suffix, but `1e3` is exponent notation handled by f64::parse
    let (number, scale) = match number.strip_suffix('E') {
        Some(n) if scale == 1.0 && !n.is_empty() => (n, 1e18),
        _ => (number, scale),
    };

    let value = number.parse::<f64>().ok()?;
    (value.is_finite() && value >= 0.0).then_some(value * scale)
}

pub fn parse_quantity(kind: ResourceKind, raw: &str) -> Option<f64> {
    match kind {
        ResourceKind::Cpu => parse_cpu(raw),
        ResourceKind::Memory => parse_memory(raw),
    }
}

/// Step a written quantity moves in
#[derive(Debug, Clone, Copy, PartialEq)]
enum Grain {
    Millicores,
    Mebibytes,
    Bytes,
}

impl Grain {
    /// Grain for writing `value` without losing it entirely to rounding
    fn for_value(kind: ResourceKind, value: f64) -> Self {
        match kind {
            ResourceKind::Cpu => Grain::Millicores,
            ResourceKind::Memory if value < MIB => Grain::Bytes,
            ResourceKind::Memory => Grain::Mebibytes,
        }
    }

    fn units(self, value: f64) -> f64 {
        match self {
            Grain::Millicores => value * 1000.0,
            Grain::Mebibytes => value / MIB,
            Grain::Bytes => value,
        }
    }

    fn up(self, value: f64) -> u64 {
        (self.units(value) - EPSILON).ceil().max(1.0) as u64
    }

    fn down(self, value: f64) -> u64 {
        (self.units(value) + EPSILON).floor().max(1.0) as u64
    }

    fn format(self, units: u64) -> String {
        match self {
            Grain::Millicores if units % 1000 == 0 => format!("{}", units / 1000),
            Grain::Millicores => format!("{}m", units),
            Grain::Mebibytes if units % 1024 == 0 => format!("{}Gi", units / 1024),
            Grain::Mebibytes => format!("{}Mi", units),
            Grain::Bytes => units.to_string(),
        }
    }
}

/// Format cores as millicores, or whole cores when integral
pub fn format_cpu(cores: f64) -> String {
    if cores <= 0.0 {
        return "0".to_string();
    }
    Grain::Millicores.format(Grain::Millicores.up(cores))
}

/// Format bytes as Mi, or Gi when integral
pub fn format_memory(bytes: f64) -> String {
    if bytes <= 0.0 {
        return "0".to_string();
    }
    Grain::Mebibytes.format(Grain::Mebibytes.up(bytes))
}

pub fn format_quantity(kind: ResourceKind, value: f64) -> String {
    match kind {
        ResourceKind::Cpu => format_cpu(value),
        ResourceKind::Memory => format_memory(value),
    }
}

/// Request and limit as written to a manifest.
///
/// The limit rounds down so it never exceeds the value it was capped to. The request
/// rounds up but never past the written limit.
pub fn format_request_limit(kind: ResourceKind, request: f64, limit: f64) -> (String, String) {
    let grain = Grain::for_value(kind, limit);
    let limit_units = grain.down(limit);
    let request_units = grain.up(request).min(limit_units);
    (grain.format(request_units), grain.format(limit_units))
}

/// Human-friendly rendering of an optional value for tables
pub fn display_quantity(kind: ResourceKind, value: Option<f64>) -> String {
    value
        .map(|v| format_quantity(kind, v))
        .unwrap_or_else(|| "not set".to_string())
}
