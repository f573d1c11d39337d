//! Source adapters: one per exposition format.
//!
//! Each adapter converts one raw response into a list of
//! [`MetricSample`](crate::sample::MetricSample)s. Adapters fail only on
//! structurally invalid input; missing optional fields default to zero or
//! are simply absent from the output.

pub mod app_push;
pub mod cadvisor;
pub mod node_exporter;
