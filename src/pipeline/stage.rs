//! Stage model: kinds, typed parameters, and format negotiation.
//!
//! A [`Stage`] is the declarative half of a pipeline unit.  Its parameter
//! names and types are fixed by its [`StageKind`]; the runtime half (the
//! [`Element`](super::Element) doing the per-block work) is built from it by
//! a [`StageFactory`](super::StageFactory) when the graph starts.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::equalizer::{band_index, band_name, EqualizerHandle, BAND_COUNT, DEFAULT_GAINS};
use super::error::{ConfigurationError, ParameterError};

/// Raw PCM layouts the parser stage understands.
pub const PCM_FORMATS: [&str; 2] = ["s16le", "f32le"];

const MAX_SAMPLE_RATE: i64 = 384_000;
const MAX_CHANNELS: i64 = 32;

// ---------------------------------------------------------------------------
// StageKind
// ---------------------------------------------------------------------------

/// Role of a stage in the linear chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    Source,
    Parser,
    Filter,
    Converter,
    Resampler,
    Sink,
}

impl StageKind {
    pub const ALL: [StageKind; 6] = [
        StageKind::Source,
        StageKind::Parser,
        StageKind::Filter,
        StageKind::Converter,
        StageKind::Resampler,
        StageKind::Sink,
    ];

    /// Parse the lowercase kind name used in configuration files.
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == name)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Source => "source",
            StageKind::Parser => "parser",
            StageKind::Filter => "filter",
            StageKind::Converter => "converter",
            StageKind::Resampler => "resampler",
            StageKind::Sink => "sink",
        }
    }

    /// Sources and sinks talk to devices; a fault in either ends streaming.
    pub fn is_endpoint(&self) -> bool {
        matches!(self, StageKind::Source | StageKind::Sink)
    }

    /// Parameter schema with default values.  The variant of each default
    /// fixes the parameter's type.
    pub fn default_params(&self) -> BTreeMap<String, ParamValue> {
        let text = |s: &str| ParamValue::Text(s.to_string());
        let pairs: Vec<(String, ParamValue)> = match self {
            StageKind::Source => vec![
                ("device".into(), text("default")),
                ("sample-rate".into(), ParamValue::Int(48_000)),
                ("num-channels".into(), ParamValue::Int(1)),
            ],
            StageKind::Parser => vec![
                ("format".into(), text("pcm")),
                ("pcm-format".into(), text("s16le")),
                ("sample-rate".into(), ParamValue::Int(48_000)),
                ("num-channels".into(), ParamValue::Int(1)),
            ],
            StageKind::Filter => (0..BAND_COUNT)
                .map(|i| (band_name(i), ParamValue::Float(DEFAULT_GAINS[i])))
                .collect(),
            StageKind::Converter => vec![("num-channels".into(), ParamValue::Int(2))],
            StageKind::Resampler => vec![("sample-rate".into(), ParamValue::Int(48_000))],
            StageKind::Sink => vec![("device".into(), text("default"))],
        };
        pairs.into_iter().collect()
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ParamValue
// ---------------------------------------------------------------------------

/// A typed stage parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl ParamValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            ParamValue::Int(_) => "integer",
            ParamValue::Float(_) => "float",
            ParamValue::Text(_) => "text",
        }
    }

    /// Coerce `self` to the type of `declared`.  Only integer → float
    /// widening is allowed.
    fn conform_to(self, declared: &ParamValue) -> Option<ParamValue> {
        match (declared, self) {
            (ParamValue::Int(_), v @ ParamValue::Int(_)) => Some(v),
            (ParamValue::Float(_), v @ ParamValue::Float(_)) => Some(v),
            (ParamValue::Float(_), ParamValue::Int(i)) => Some(ParamValue::Float(i as f64)),
            (ParamValue::Text(_), v @ ParamValue::Text(_)) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Int(i) => write!(f, "{i}"),
            ParamValue::Float(v) => write!(f, "{v}"),
            ParamValue::Text(s) => write!(f, "{s:?}"),
        }
    }
}

// ---------------------------------------------------------------------------
// StageSpec
// ---------------------------------------------------------------------------

/// Configuration entry for one stage, as written in `settings.toml`:
///
/// ```toml
/// [[pipeline.stages]]
/// name = "raw_audio_parse"
/// kind = "parser"
///
/// [pipeline.stages.params]
/// pcm-format = "s16le"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSpec {
    pub name: String,
    /// Kept as text so an unknown kind is reported by graph assembly rather
    /// than by the TOML parser.
    pub kind: String,
    #[serde(default)]
    pub params: BTreeMap<String, ParamValue>,
}

impl StageSpec {
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            params: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, name: impl Into<String>, value: ParamValue) -> Self {
        self.params.insert(name.into(), value);
        self
    }
}

/// The reference chain: device → raw parser → 10-band EQ → channel
/// converter → resampler → playback device.
pub fn default_stage_specs() -> Vec<StageSpec> {
    vec![
        StageSpec::new("input_device", "source"),
        StageSpec::new("raw_audio_parse", "parser"),
        StageSpec::new("eq", "filter"),
        StageSpec::new("audioconvert", "converter"),
        StageSpec::new("audioresample", "resampler"),
        StageSpec::new("sink", "sink"),
    ]
}

// ---------------------------------------------------------------------------
// AudioFormat
// ---------------------------------------------------------------------------

/// Sample rate and channel count flowing across one link of the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} Hz, {} ch", self.sample_rate, self.channels)
    }
}

/// Negotiated formats around one stage.  `input` is `None` for the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caps {
    pub input: Option<AudioFormat>,
    pub output: AudioFormat,
}

// ---------------------------------------------------------------------------
// Stage
// ---------------------------------------------------------------------------

/// One named unit of the chain with its typed parameter set.
///
/// Filter stages keep their band gains in a shared [`EqualizerHandle`]
/// instead of the parameter map so the streaming thread sees writes without
/// any coordination.
#[derive(Debug, Clone)]
pub struct Stage {
    name: String,
    kind: StageKind,
    params: BTreeMap<String, ParamValue>,
    equalizer: Option<EqualizerHandle>,
}

impl Stage {
    /// Build a stage with the kind's defaults overlaid by `spec.params`.
    pub fn from_spec(spec: &StageSpec) -> Result<Self, ConfigurationError> {
        let kind = StageKind::parse(&spec.kind).ok_or_else(|| ConfigurationError::UnknownKind {
            stage: spec.name.clone(),
            kind: spec.kind.clone(),
        })?;

        let mut stage = Stage {
            name: spec.name.clone(),
            kind,
            params: if kind == StageKind::Filter {
                BTreeMap::new()
            } else {
                kind.default_params()
            },
            equalizer: (kind == StageKind::Filter).then(EqualizerHandle::new),
        };

        for (param, value) in &spec.params {
            stage
                .set_param(param, value.clone())
                .map_err(|source| ConfigurationError::Parameter {
                    stage: spec.name.clone(),
                    source,
                })?;
        }
        Ok(stage)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> StageKind {
        self.kind
    }

    /// The band store of a filter stage.
    pub fn equalizer(&self) -> Option<&EqualizerHandle> {
        self.equalizer.as_ref()
    }

    /// Current value of `name`, or `None` if the kind has no such parameter.
    pub fn param(&self, name: &str) -> Option<ParamValue> {
        match &self.equalizer {
            Some(eq) => {
                let index = band_index(name)?;
                eq.gain(index).map(ParamValue::Float)
            }
            None => self.params.get(name).cloned(),
        }
    }

    /// All parameters in name order.
    pub fn params(&self) -> Vec<(String, ParamValue)> {
        match &self.equalizer {
            Some(eq) => eq
                .gains()
                .iter()
                .enumerate()
                .map(|(i, g)| (band_name(i), ParamValue::Float(*g)))
                .collect(),
            None => self
                .params
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    /// Write a parameter through the kind's closed schema.
    ///
    /// Equalizer bands apply on the next processed block; other parameters
    /// are read when the graph next starts.
    pub fn set_param(&mut self, name: &str, value: ParamValue) -> Result<(), ParameterError> {
        if let Some(eq) = &self.equalizer {
            let gain = match value {
                ParamValue::Float(v) => v,
                ParamValue::Int(i) => i as f64,
                ParamValue::Text(_) => {
                    return Err(ParameterError::TypeMismatch {
                        param: name.to_string(),
                        expected: "float",
                    })
                }
            };
            return eq.set_param(name, gain);
        }

        let declared = self
            .params
            .get(name)
            .ok_or_else(|| ParameterError::UnknownParameter(name.to_string()))?;
        let expected = declared.type_name();
        let value = value
            .conform_to(declared)
            .ok_or_else(|| ParameterError::TypeMismatch {
                param: name.to_string(),
                expected,
            })?;
        self.params.insert(name.to_string(), value);
        Ok(())
    }

    pub(crate) fn int(&self, name: &str) -> Option<i64> {
        match self.params.get(name) {
            Some(ParamValue::Int(i)) => Some(*i),
            _ => None,
        }
    }

    pub(crate) fn text(&self, name: &str) -> Option<&str> {
        match self.params.get(name) {
            Some(ParamValue::Text(s)) => Some(s),
            _ => None,
        }
    }

    /// Compute this stage's output format from its upstream format.
    pub fn negotiate(&self, upstream: Option<AudioFormat>) -> Result<Caps, ConfigurationError> {
        let output = match (self.kind, upstream) {
            (StageKind::Source, _) => AudioFormat {
                sample_rate: self.rate_param("sample-rate")?,
                channels: self.channel_param("num-channels")?,
            },
            (_, None) => {
                return Err(ConfigurationError::CapsMismatch {
                    stage: self.name.clone(),
                    reason: "no upstream stage".into(),
                })
            }
            (StageKind::Parser, Some(up)) => {
                self.check_parser_format()?;
                let declared = AudioFormat {
                    sample_rate: self.rate_param("sample-rate")?,
                    channels: self.channel_param("num-channels")?,
                };
                if declared != up {
                    return Err(ConfigurationError::CapsMismatch {
                        stage: self.name.clone(),
                        reason: format!("declares {declared} but upstream delivers {up}"),
                    });
                }
                declared
            }
            (StageKind::Filter | StageKind::Sink, Some(up)) => up,
            (StageKind::Converter, Some(up)) => AudioFormat {
                channels: self.channel_param("num-channels")?,
                ..up
            },
            (StageKind::Resampler, Some(up)) => AudioFormat {
                sample_rate: self.rate_param("sample-rate")?,
                ..up
            },
        };
        Ok(Caps {
            input: upstream,
            output,
        })
    }

    fn rate_param(&self, param: &str) -> Result<u32, ConfigurationError> {
        self.bounded_int(param, 1, MAX_SAMPLE_RATE).map(|v| v as u32)
    }

    fn channel_param(&self, param: &str) -> Result<u16, ConfigurationError> {
        self.bounded_int(param, 1, MAX_CHANNELS).map(|v| v as u16)
    }

    fn bounded_int(&self, param: &str, min: i64, max: i64) -> Result<i64, ConfigurationError> {
        match self.int(param) {
            Some(v) if (min..=max).contains(&v) => Ok(v),
            other => Err(ConfigurationError::InvalidParameter {
                stage: self.name.clone(),
                param: param.to_string(),
                reason: format!("{other:?} not in {min}..={max}"),
            }),
        }
    }

    fn check_parser_format(&self) -> Result<(), ConfigurationError> {
        let invalid = |param: &str, reason: String| ConfigurationError::InvalidParameter {
            stage: self.name.clone(),
            param: param.to_string(),
            reason,
        };
        match self.text("format") {
            Some("pcm") => {}
            other => return Err(invalid("format", format!("{other:?} is not \"pcm\""))),
        }
        match self.text("pcm-format") {
            Some(f) if PCM_FORMATS.contains(&f) => Ok(()),
            other => Err(invalid(
                "pcm-format",
                format!("{other:?} is not one of {PCM_FORMATS:?}"),
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
