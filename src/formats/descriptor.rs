//! Operation descriptor: defaulting, broadcast resolution and validation

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::types::{ChannelSpec, MergePolicy, OperationType};
use crate::error::{EngineError, Result};
use crate::topology::Topology;

/// Declarative description of one transcoding job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperationDescriptor {
    pub op_type: OperationType,
    /// One entry (applies to every input) or one entry per input channel
    pub inputs: Vec<ChannelSpec>,
    /// One entry (applies to every output) or one entry per output channel
    pub outputs: Vec<ChannelSpec>,
    /// Only read when `op_type` is `Merge`
    pub merge_policy: MergePolicy,
    /// Optional ffmpeg filter chain applied in addition to the structural graph
    pub filter: Option<String>,
    /// File-mode input paths, one per input channel
    pub input_files: Vec<PathBuf>,
    /// File-mode output paths, one per output channel
    pub output_files: Vec<PathBuf>,
}

/// Pick the effective entry for `index` out of a spec sequence.
///
/// A single entry is broadcast to every index. Past the end of a longer
/// sequence the last entry is used; validation rejects sequences whose length
/// does not fit the topology, so this only matters for unvalidated input.
fn resolve(specs: &[ChannelSpec], index: usize) -> ChannelSpec {
    match specs {
        [] => ChannelSpec::placeholder(),
        [only] => *only,
        many => many.get(index).copied().unwrap_or(many[many.len() - 1]),
    }
}

impl OperationDescriptor {
    /// Format conversion of one stream.
    pub fn convert(input: ChannelSpec, output: ChannelSpec) -> Self {
        Self {
            op_type: OperationType::Convert,
            inputs: vec![input],
            outputs: vec![output],
            ..Default::default()
        }
    }

    /// Split a stereo input into left and right outputs.
    pub fn split(input: ChannelSpec, left: ChannelSpec, right: ChannelSpec) -> Self {
        Self {
            op_type: OperationType::Split,
            inputs: vec![input],
            outputs: vec![left, right],
            ..Default::default()
        }
    }

    /// Merge two inputs into one output under `policy`.
    pub fn merge(
        policy: MergePolicy,
        primary: ChannelSpec,
        secondary: ChannelSpec,
        output: ChannelSpec,
    ) -> Self {
        Self {
            op_type: OperationType::Merge,
            inputs: vec![primary, secondary],
            outputs: vec![output],
            merge_policy: policy,
            ..Default::default()
        }
    }

    /// Attach a custom filter chain.
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Attach file-mode endpoints.
    pub fn with_files<I, O, P, Q>(mut self, inputs: I, outputs: O) -> Self
    where
        I: IntoIterator<Item = P>,
        O: IntoIterator<Item = Q>,
        P: AsRef<Path>,
        Q: AsRef<Path>,
    {
        self.input_files = inputs.into_iter().map(|p| p.as_ref().to_path_buf()).collect();
        self.output_files = outputs.into_iter().map(|p| p.as_ref().to_path_buf()).collect();
        self
    }

    /// Parse a descriptor from a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| EngineError::Config(e.to_string()))
    }

    pub fn topology(&self) -> &'static Topology {
        self.op_type.topology()
    }

    /// Effective parameters of input channel `index`.
    pub fn input_spec(&self, index: usize) -> ChannelSpec {
        resolve(&self.inputs, index)
    }

    /// Effective parameters of output channel `index`.
    pub fn output_spec(&self, index: usize) -> ChannelSpec {
        resolve(&self.outputs, index)
    }

    /// The custom filter, if one is set and not blank.
    pub fn custom_filter(&self) -> Option<&str> {
        self.filter
            .as_deref()
            .map(str::trim)
            .filter(|f| !f.is_empty())
    }

    /// Replace an empty spec sequence with the placeholder entry.
    ///
    /// Populated sequences are left untouched, so calling this on an already
    /// valid descriptor is a no-op.
    pub fn apply_defaults(&mut self) {
        if self.inputs.is_empty() {
            self.inputs.push(ChannelSpec::placeholder());
        }
        if self.outputs.is_empty() {
            self.outputs.push(ChannelSpec::placeholder());
        }
    }

    /// Each spec sequence holds one shared entry or one entry per channel.
    pub(crate) fn check_shape(&self) -> Result<()> {
        let topology = self.topology();
        check_sequence_len("inputs", self.inputs.len(), topology.inputs.len(), self.op_type)?;
        check_sequence_len("outputs", self.outputs.len(), topology.outputs.len(), self.op_type)
    }

    /// Check the descriptor against the rules of its operation type.
    pub fn validate(&self) -> Result<()> {
        let topology = self.topology();
        self.check_shape()?;

        for i in 0..topology.inputs.len() {
            let spec = self.input_spec(i);
            spec.check(&format!("inputs[{}]", i), spec.is_raw_pcm())?;
        }
        for i in 0..topology.outputs.len() {
            self.output_spec(i).check(&format!("outputs[{}]", i), true)?;
        }

        match self.op_type {
            OperationType::Convert => Ok(()),
            OperationType::Split => self.validate_split(),
            OperationType::Merge => self.validate_merge(),
        }
    }

    /// Check that the descriptor carries no file endpoints (stream mode).
    pub(crate) fn validate_stream_endpoints(&self) -> Result<()> {
        if !self.input_files.is_empty() {
            return Err(EngineError::invalid(
                "input_files",
                "file paths cannot be combined with stream mode",
            ));
        }
        if !self.output_files.is_empty() {
            return Err(EngineError::invalid(
                "output_files",
                "file paths cannot be combined with stream mode",
            ));
        }
        Ok(())
    }

    /// Check that every logical channel has exactly one file path (file mode).
    pub(crate) fn validate_file_endpoints(&self) -> Result<()> {
        let topology = self.topology();
        if self.input_files.len() != topology.inputs.len() {
            return Err(EngineError::invalid(
                "input_files",
                format!(
                    "{} needs {} input file(s), got {}",
                    self.op_type,
                    topology.inputs.len(),
                    self.input_files.len()
                ),
            ));
        }
        if self.output_files.len() != topology.outputs.len() {
            return Err(EngineError::invalid(
                "output_files",
                format!(
                    "{} needs {} output file(s), got {}",
                    self.op_type,
                    topology.outputs.len(),
                    self.output_files.len()
                ),
            ));
        }
        Ok(())
    }

    fn validate_split(&self) -> Result<()> {
        if self.input_spec(0).channels != Some(2) {
            return Err(EngineError::invalid(
                "inputs[0].channels",
                "ChannelSplit requires a stereo input (channels = 2)",
            ));
        }
        Ok(())
    }

    fn validate_merge(&self) -> Result<()> {
        if self.merge_policy != MergePolicy::SideBySide {
            return Ok(());
        }
        for i in 0..self.topology().inputs.len() {
            if let Some(channels) = self.input_spec(i).channels {
                if channels != 1 {
                    return Err(EngineError::invalid(
                        format!("inputs[{}].channels", i),
                        "SideBySide merge requires mono inputs (channels = 1)",
                    ));
                }
            }
        }
        if self.output_spec(0).channels != Some(2) {
            return Err(EngineError::invalid(
                "outputs[0].channels",
                "SideBySide merge requires a stereo output (channels = 2)",
            ));
        }
        Ok(())
    }
}

fn check_sequence_len(field: &str, len: usize, channels: usize, op: OperationType) -> Result<()> {
    if len == 0 {
        return Err(EngineError::invalid(field, "no channel spec given"));
    }
    if len != 1 && len != channels {
        return Err(EngineError::invalid(
            field,
            format!(
                "{} takes one shared spec or {} per-channel specs, got {}",
                op, channels, len
            ),
        ));
    }
    Ok(())
}
