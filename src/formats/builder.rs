//! Argument vector and filter-graph construction
//!
//! Pure functions from a validated [`OperationDescriptor`] plus the endpoint of
//! every logical channel to the transcoder's argument vector. Given the same
//! inputs they always produce the same output.

use super::descriptor::OperationDescriptor;
use super::types::{ChannelSpec, MergePolicy, OperationType};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::topology::Endpoint;

/// Flags that make the transcoder start emitting as soon as data arrives.
const LOW_LATENCY_ARGS: [&str; 8] = [
    "-analyzeduration",
    "0",
    "-probesize",
    "32",
    "-fflags",
    "+nobuffer",
    "-flags",
    "+low_delay",
];

/// Invocation-wide options that do not come from the descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOptions {
    /// Prepend the low-latency probing flags
    pub low_latency: bool,
    /// Overwrite existing output files (`-y`)
    pub overwrite: bool,
    /// Disable interactive stdin handling (`-nostdin`)
    pub no_stdin: bool,
    /// `-thread_queue_size` requested for live-stream inputs
    pub thread_queue_size: u32,
    /// `-loglevel` value, if any
    pub log_level: Option<String>,
}

impl BuildOptions {
    /// Options for pipe-attached invocations.
    pub fn for_stream(config: &EngineConfig) -> Self {
        Self {
            low_latency: config.low_latency,
            overwrite: false,
            no_stdin: false,
            thread_queue_size: config.thread_queue_size,
            log_level: config.log_level.clone(),
        }
    }

    /// Options for disk-file invocations.
    pub fn for_files(config: &EngineConfig) -> Self {
        Self {
            low_latency: false,
            overwrite: true,
            no_stdin: true,
            thread_queue_size: config.thread_queue_size,
            log_level: config.log_level.clone(),
        }
    }
}

/// A `-filter_complex` expression and the tags to `-map`, one per output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterGraph {
    pub expr: String,
    pub map_tags: Vec<String>,
}

/// `[-ar R -ac C] [-thread_queue_size N] -f FMT -i SOURCE`
pub fn input_args(spec: &ChannelSpec, endpoint: &Endpoint, thread_queue_size: u32) -> Vec<String> {
    let mut args = Vec::new();
    if spec.is_raw_pcm() {
        if let Some(rate) = spec.sample_rate {
            args.push("-ar".to_string());
            args.push(rate.to_string());
        }
        if let Some(channels) = spec.channels {
            args.push("-ac".to_string());
            args.push(channels.to_string());
        }
    }
    if endpoint.is_stream() {
        args.push("-thread_queue_size".to_string());
        args.push(thread_queue_size.to_string());
    }
    if let Some(format) = spec.format {
        args.push("-f".to_string());
        args.push(format.as_str().to_string());
    }
    args.push("-i".to_string());
    args.push(endpoint.target());
    args
}

/// `-ar R -ac C -f FMT TARGET`
pub fn output_args(spec: &ChannelSpec, endpoint: &Endpoint) -> Vec<String> {
    let mut args = Vec::new();
    if let Some(rate) = spec.sample_rate {
        args.push("-ar".to_string());
        args.push(rate.to_string());
    }
    if let Some(channels) = spec.channels {
        args.push("-ac".to_string());
        args.push(channels.to_string());
    }
    if let Some(format) = spec.format {
        args.push("-f".to_string());
        args.push(format.as_str().to_string());
    }
    args.push(endpoint.target());
    args
}

fn target_rate(spec: &ChannelSpec, label: &str) -> Result<u32> {
    spec.sample_rate.ok_or_else(|| {
        EngineError::invalid(
            format!("{}.sample_rate", label),
            "target sample rate is required to build the resample stage",
        )
    })
}

/// Resample chain for a single-stream conversion, custom filter first.
pub fn convert_filter(desc: &OperationDescriptor) -> Result<String> {
    let rate = target_rate(&desc.output_spec(0), "outputs[0]")?;
    Ok(match desc.custom_filter() {
        Some(custom) => format!("{},aresample={}", custom, rate),
        None => format!("aresample={}", rate),
    })
}

/// Structural filter graph for split and merge operations.
///
/// Returns `None` for conversions, which use a plain `-af` chain instead.
pub fn filter_graph(desc: &OperationDescriptor) -> Result<Option<FilterGraph>> {
    match desc.op_type {
        OperationType::Convert => Ok(None),
        OperationType::Split => split_graph(desc).map(Some),
        OperationType::Merge => merge_graph(desc).map(Some),
    }
}

fn split_graph(desc: &OperationDescriptor) -> Result<FilterGraph> {
    desc.check_shape()?;
    if desc.input_spec(0).channels != Some(2) {
        return Err(EngineError::invalid(
            "inputs[0].channels",
            "channel split needs a stereo input",
        ));
    }
    let left_rate = target_rate(&desc.output_spec(0), "outputs[0]")?;
    let right_rate = target_rate(&desc.output_spec(1), "outputs[1]")?;
    let leg = |rate: u32| match desc.custom_filter() {
        Some(custom) => format!("{},aresample={}", custom, rate),
        None => format!("aresample={}", rate),
    };

    Ok(FilterGraph {
        expr: format!(
            "[0:a]channelsplit=channel_layout=stereo[l][r]; [l]{}[left]; [r]{}[right]",
            leg(left_rate),
            leg(right_rate)
        ),
        map_tags: vec!["[left]".to_string(), "[right]".to_string()],
    })
}

fn merge_graph(desc: &OperationDescriptor) -> Result<FilterGraph> {
    desc.check_shape()?;
    let target = desc.output_spec(0);
    if desc.merge_policy == MergePolicy::SideBySide {
        for i in 0..2 {
            if !matches!(desc.input_spec(i).channels, None | Some(1)) {
                return Err(EngineError::invalid(
                    format!("inputs[{}].channels", i),
                    "SideBySide merge needs mono inputs",
                ));
            }
        }
        if target.channels != Some(2) {
            return Err(EngineError::invalid(
                "outputs[0].channels",
                "SideBySide merge requires a stereo output (channels = 2)",
            ));
        }
    }
    let rate = target_rate(&target, "outputs[0]")?;

    let mut stages: Vec<String> = (0..2)
        .map(|i| format!("[{}:a]aresample={}[a{}]", i, rate, i))
        .collect();

    match desc.merge_policy {
        MergePolicy::SideBySide => {
            stages.push("[a0][a1]join=inputs=2:channel_layout=stereo[out]".to_string());
        }
        MergePolicy::Mix => {
            stages.push("[a0][a1]amix=inputs=2:duration=longest[mixed]".to_string());
            // amix yields mono here; a stereo target gets the same signal on both sides
            if target.channels == Some(2) {
                stages.push("[mixed]pan=stereo|c0=c0|c1=c0[out]".to_string());
            } else {
                stages.push("[mixed]anull[out]".to_string());
            }
        }
    }

    let tag = match desc.custom_filter() {
        Some(custom) => {
            stages.push(format!("[out]{}[finalout]", custom));
            "[finalout]"
        }
        None => "[out]",
    };

    Ok(FilterGraph {
        expr: stages.join("; "),
        map_tags: vec![tag.to_string()],
    })
}

/// Build the complete argument vector.
///
/// `inputs` and `outputs` hold one endpoint per logical channel, in
/// topology order. The descriptor must already be defaulted and validated.
pub fn build_args(
    desc: &OperationDescriptor,
    inputs: &[Endpoint],
    outputs: &[Endpoint],
    opts: &BuildOptions,
) -> Result<Vec<String>> {
    let topology = desc.topology();
    if inputs.len() != topology.inputs.len() {
        return Err(EngineError::invalid(
            "inputs",
            format!(
                "{} needs {} input endpoint(s), got {}",
                desc.op_type,
                topology.inputs.len(),
                inputs.len()
            ),
        ));
    }
    if outputs.len() != topology.outputs.len() {
        return Err(EngineError::invalid(
            "outputs",
            format!(
                "{} needs {} output endpoint(s), got {}",
                desc.op_type,
                topology.outputs.len(),
                outputs.len()
            ),
        ));
    }

    let mut args = vec!["-hide_banner".to_string()];
    if let Some(level) = &opts.log_level {
        args.push("-loglevel".to_string());
        args.push(level.clone());
    }
    if opts.overwrite {
        args.push("-y".to_string());
    }
    if opts.no_stdin {
        args.push("-nostdin".to_string());
    }
    if opts.low_latency {
        args.extend(LOW_LATENCY_ARGS.iter().map(|a| a.to_string()));
    }

    for (i, endpoint) in inputs.iter().enumerate() {
        args.extend(input_args(&desc.input_spec(i), endpoint, opts.thread_queue_size));
    }

    match filter_graph(desc)? {
        None => {
            args.push("-af".to_string());
            args.push(convert_filter(desc)?);
            args.extend(output_args(&desc.output_spec(0), &outputs[0]));
        }
        Some(graph) => {
            args.push("-filter_complex".to_string());
            args.push(graph.expr);
            for (i, (endpoint, tag)) in outputs.iter().zip(graph.map_tags).enumerate() {
                args.push("-map".to_string());
                args.push(tag);
                args.extend(output_args(&desc.output_spec(i), endpoint));
            }
        }
    }

    Ok(args)
}
