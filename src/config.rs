use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fmt,
    fs::read_to_string,
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
};

use crate::{
    codec::{InputStreamProcessorProvider, ResourcePostProcessorProvider},
    error::ResourceError,
};

/// Options controlling one load, reload or save.
///
/// The serializable part can be read from a TOML file; the plug-in slots (input pre-processor,
/// post-processors) are set in code.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadOptions {
    /// Text encoding label. Falls back to the resource's default encoding, then UTF-8.
    pub encoding: Option<String>,
    pub disable_location_map: bool,
    pub disable_layout_information_recording: bool,
    pub disable_marker_creation_for_problems: bool,
    pub disable_validation: bool,
    /// Notation specific settings passed through to parsers, printers and resolvers
    pub extra: BTreeMap<String, toml::Value>,
    #[serde(skip)]
    pub input_stream_preprocessor: Option<Arc<dyn InputStreamProcessorProvider>>,
    /// Run in registration order, after the syntax's own post-processor
    #[serde(skip)]
    pub post_processors: Vec<Arc<dyn ResourcePostProcessorProvider>>,
}

impl fmt::Debug for LoadOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadOptions")
            .field("encoding", &self.encoding)
            .field("disable_location_map", &self.disable_location_map)
            .field(
                "disable_layout_information_recording",
                &self.disable_layout_information_recording,
            )
            .field(
                "disable_marker_creation_for_problems",
                &self.disable_marker_creation_for_problems,
            )
            .field("disable_validation", &self.disable_validation)
            .field("extra", &self.extra)
            .field(
                "input_stream_preprocessor",
                &self.input_stream_preprocessor.is_some(),
            )
            .field("post_processors", &self.post_processors.len())
            .finish()
    }
}

impl LoadOptions {
    pub fn from_toml_str(content: &str) -> Result<Self, ResourceError> {
        Ok(toml::from_str(content)?)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ResourceError> {
        tracing::debug!("Reading load options from: {:?}", path.as_ref());
        let content = read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn to_toml_string(&self) -> Result<String, ResourceError> {
        Ok(toml::to_string(self)?)
    }

    pub fn with_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.encoding = Some(encoding.into());
        self
    }

    pub fn with_post_processor(mut self, provider: Arc<dyn ResourcePostProcessorProvider>) -> Self {
        self.post_processors.push(provider);
        self
    }

    pub fn with_input_stream_preprocessor(
        mut self,
        provider: Arc<dyn InputStreamProcessorProvider>,
    ) -> Self {
        self.input_stream_preprocessor = Some(provider);
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<toml::Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    pub fn extra_integer(&self, key: &str) -> Option<i64> {
        self.extra.get(key).and_then(toml::Value::as_integer)
    }

    pub fn extra_str(&self, key: &str) -> Option<&str> {
        self.extra.get(key).and_then(toml::Value::as_str)
    }

    /// Overlay the values explicitly present in `other`. Flags only ever switch on.
    pub fn merge(&mut self, other: LoadOptions) {
        if other.encoding.is_some() {
            self.encoding = other.encoding;
        }
        self.disable_location_map |= other.disable_location_map;
        self.disable_layout_information_recording |= other.disable_layout_information_recording;
        self.disable_marker_creation_for_problems |= other.disable_marker_creation_for_problems;
        self.disable_validation |= other.disable_validation;
        self.extra.extend(other.extra);
        if other.input_stream_preprocessor.is_some() {
            self.input_stream_preprocessor = other.input_stream_preprocessor;
        }
        self.post_processors.extend(other.post_processors);
    }
}

/// Supplies default load options. Every registered provider is applied on top of a copy of the
/// caller's options before each load and reload.
pub trait OptionProvider: Send + Sync {
    fn apply(&self, options: &mut LoadOptions) -> Result<(), ResourceError>;
}

/// Reads default options from a TOML file each time they are applied. A missing file provides
/// nothing.
#[derive(Debug, Serialize, Deserialize)]
pub struct TomlOptionProvider {
    path: PathBuf,
}

impl TomlOptionProvider {
    pub fn new(path: PathBuf) -> Self {
        TomlOptionProvider { path }
    }
}

impl OptionProvider for TomlOptionProvider {
    fn apply(&self, options: &mut LoadOptions) -> Result<(), ResourceError> {
        tracing::debug!("Attempting to read load options from: {:?}", &self.path);
        if !self.path.exists() {
            tracing::debug!("Options file not found, keeping caller options.");
            return Ok(());
        }
        options.merge(LoadOptions::from_file(&self.path)?);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TextEncoding {
    Utf8,
    Utf16Le,
    Utf16Be,
    /// Byte order taken from the BOM, big endian without one
    Utf16,
    Latin1,
    Ascii,
}

impl FromStr for TextEncoding {
    type Err = ResourceError;

    fn from_str(label: &str) -> Result<Self, Self::Err> {
        match label.trim().to_ascii_uppercase().as_str() {
            "UTF-8" | "UTF8" => Ok(TextEncoding::Utf8),
            "UTF-16LE" => Ok(TextEncoding::Utf16Le),
            "UTF-16BE" => Ok(TextEncoding::Utf16Be),
            "UTF-16" | "UTF16" => Ok(TextEncoding::Utf16),
            "ISO-8859-1" | "LATIN1" | "LATIN-1" => Ok(TextEncoding::Latin1),
            "US-ASCII" | "ASCII" => Ok(TextEncoding::Ascii),
            _ => Err(ResourceError::Encoding(format!(
                "unsupported encoding '{label}'"
            ))),
        }
    }
}

impl fmt::Display for TextEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

impl TextEncoding {
    pub fn label(&self) -> &'static str {
        match self {
            TextEncoding::Utf8 => "UTF-8",
            TextEncoding::Utf16Le => "UTF-16LE",
            TextEncoding::Utf16Be => "UTF-16BE",
            TextEncoding::Utf16 => "UTF-16",
            TextEncoding::Latin1 => "ISO-8859-1",
            TextEncoding::Ascii => "US-ASCII",
        }
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<String, ResourceError> {
        match self {
            TextEncoding::Utf8 => {
                let bytes = bytes.strip_prefix(&[0xEFu8, 0xBB, 0xBF]).unwrap_or(bytes);
                Ok(String::from_utf8(bytes.to_vec())?)
            }
            TextEncoding::Utf16Le => decode_utf16(bytes, u16::from_le_bytes),
            TextEncoding::Utf16Be => decode_utf16(bytes, u16::from_be_bytes),
            TextEncoding::Utf16 => match bytes {
                [0xFF, 0xFE, rest @ ..] => decode_utf16(rest, u16::from_le_bytes),
                [0xFE, 0xFF, rest @ ..] => decode_utf16(rest, u16::from_be_bytes),
                _ => decode_utf16(bytes, u16::from_be_bytes),
            },
            TextEncoding::Latin1 => Ok(bytes.iter().map(|b| *b as char).collect()),
            TextEncoding::Ascii => match bytes.iter().position(|b| !b.is_ascii()) {
                Some(offset) => Err(ResourceError::Encoding(format!(
                    "non-ASCII byte 0x{:02X} at offset {offset}",
                    bytes[offset]
                ))),
                None => Ok(bytes.iter().map(|b| *b as char).collect()),
            },
        }
    }

    pub fn encode(&self, text: &str) -> Result<Vec<u8>, ResourceError> {
        match self {
            TextEncoding::Utf8 => Ok(text.as_bytes().to_vec()),
            TextEncoding::Utf16Le => Ok(text.encode_utf16().flat_map(u16::to_le_bytes).collect()),
            TextEncoding::Utf16Be => Ok(text.encode_utf16().flat_map(u16::to_be_bytes).collect()),
            TextEncoding::Utf16 => {
                let mut bytes = vec![0xFE, 0xFF];
                bytes.extend(text.encode_utf16().flat_map(u16::to_be_bytes));
                Ok(bytes)
            }
            TextEncoding::Latin1 => encode_narrow(text, 0xFF, self.label()),
            TextEncoding::Ascii => encode_narrow(text, 0x7F, self.label()),
        }
    }
}

fn decode_utf16(bytes: &[u8], unit: fn([u8; 2]) -> u16) -> Result<String, ResourceError> {
    if bytes.len() % 2 != 0 {
        return Err(ResourceError::Encoding(
            "UTF-16 input has an odd number of bytes".to_string(),
        ));
    }
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| unit([pair[0], pair[1]]))
        .collect();
    String::from_utf16(&units)
        .map_err(|e| ResourceError::Encoding(format!("Invalid UTF-16 input: {e}")))
}

fn encode_narrow(text: &str, max: u32, label: &str) -> Result<Vec<u8>, ResourceError> {
    text.chars()
        .map(|c| {
            if (c as u32) <= max {
                Ok(c as u32 as u8)
            } else {
                Err(ResourceError::Encoding(format!(
                    "character '{c}' cannot be encoded as {label}"
                )))
            }
        })
        .collect()
}
